//! Sampling CPU profiler for the whole run.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pprof::protos::Message;

/// Samples per second.
const FREQUENCY: i32 = 100;

/// Frames of these libraries are dropped from samples.
const BLOCKLIST: &[&str] = &["libc", "libgcc", "pthread", "vdso"];

/// A running CPU profile that is written in `pprof` format when finished.
///
/// Dropping the profile writes it as well, but any error is only logged. Call
/// [`finish`](Self::finish) to observe errors.
pub struct CpuProfile {
    guard: Option<pprof::ProfilerGuard<'static>>,
    file: File,
    path: PathBuf,
}

impl std::fmt::Debug for CpuProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuProfile")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl CpuProfile {
    /// Creates the output file and starts sampling.
    pub fn start(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("failed to create profile `{}`", path.display()))?;

        let guard = pprof::ProfilerGuardBuilder::default()
            .frequency(FREQUENCY)
            .blocklist(BLOCKLIST)
            .build()
            .context("failed to start CPU profiler")?;

        tracing::debug!(path = %path.display(), "started CPU profile");
        Ok(Self {
            guard: Some(guard),
            file,
            path: path.to_owned(),
        })
    }

    /// Stops sampling and writes the profile.
    pub fn finish(mut self) -> Result<()> {
        self.write()
    }

    fn write(&mut self) -> Result<()> {
        let Some(guard) = self.guard.take() else {
            return Ok(());
        };

        let profile = guard
            .report()
            .build()
            .context("failed to build profile report")?
            .pprof()
            .context("failed to convert profile")?;
        drop(guard);

        let mut content = Vec::new();
        profile
            .encode(&mut content)
            .context("failed to encode profile")?;
        self.file
            .write_all(&content)
            .with_context(|| format!("failed to write profile `{}`", self.path.display()))?;

        tracing::info!(path = %self.path.display(), "wrote CPU profile");
        Ok(())
    }
}

impl Drop for CpuProfile {
    fn drop(&mut self) {
        if let Err(error) = self.write() {
            tracing::error!(
                error = AsRef::<dyn std::error::Error>::as_ref(&error),
                "failed to write CPU profile"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fails_for_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("cpu.pprof");

        let err = CpuProfile::start(&path).unwrap_err();
        assert!(err.to_string().contains("failed to create profile"));
    }

    #[test]
    fn writes_decodable_profile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cpu.pprof");

        let profile = CpuProfile::start(&path).unwrap();
        let started = std::time::Instant::now();
        let mut sum = 0u64;
        while started.elapsed() < std::time::Duration::from_millis(200) {
            sum = std::hint::black_box(sum.wrapping_mul(31).wrapping_add(7));
        }
        profile.finish().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert!(!bytes.is_empty());
        let decoded = pprof::protos::Profile::decode(bytes.as_slice()).unwrap();
        assert!(!decoded.sample_type.is_empty());
    }
}
