//! Command line entry point of the `tracebench` binary.

use std::path::PathBuf;

use anyhow::{Context, Result};
use argh::FromArgs;

use crate::api::Api;
use crate::auth::DefaultCredentials;
use crate::config::Config;
use crate::profile::CpuProfile;
use crate::{bench, remote, telemetry};

/// Measure upload and ranged download latency against Cloud Storage.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    /// name of the bucket to use
    #[argh(option)]
    bucket: Option<String>,

    /// transport to use: http1, http2 or grpc-dp
    #[argh(option)]
    api: Option<Api>,

    /// write a CPU profile to this file
    #[argh(option)]
    cpuprofile: Option<PathBuf>,

    /// wrap the phases in spans and export them to Cloud Trace
    #[argh(switch)]
    add_spans: bool,

    /// list all objects of the bucket after the download
    #[argh(switch)]
    list_objects: bool,
}

impl Args {
    /// Overrides configuration values with the flags that were given.
    fn apply(self, config: &mut Config) {
        if let Some(bucket) = self.bucket {
            config.bucket = bucket;
        }
        if let Some(api) = self.api {
            config.api = api;
        }
        if let Some(path) = self.cpuprofile {
            config.cpuprofile = Some(path);
        }
        config.add_spans |= self.add_spans;
        config.list_objects |= self.list_objects;
    }
}

/// Bootstrap the runtime and run the benchmark.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();

    let mut config = Config::load(args.config.as_deref())?;
    args.apply(&mut config);

    // Must happen before the runtime spawns any threads.
    if config.api == Api::GrpcDirectPath {
        remote::enable_direct_path();
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let credentials = runtime
        .block_on(DefaultCredentials::discover())
        .context("failed to find default credentials")?;

    // The span exporter runs a blocking client and is set up outside of the runtime.
    let (telemetry_guard, export) = if config.add_spans {
        let auth = runtime.block_on(telemetry::authenticate(&credentials, &config.telemetry))?;
        let (guard, layer) = telemetry::init_telemetry(&config.telemetry, auth)?;
        (Some(guard), Some(layer))
    } else {
        (None, None)
    };

    gcsprobe_observability::init_tracing(&config.logging, export);
    tracing::debug!(?config);

    let profile = config
        .cpuprofile
        .as_deref()
        .map(CpuProfile::start)
        .transpose()?;

    let result = runtime.block_on(async {
        let remote = remote::connect(&config, credentials)
            .await
            .context("failed to create storage client")?;
        bench::run(remote.as_ref(), &config).await
    });

    if let Ok(summary) = &result {
        summary.print();
    }

    // Flush the profile and pending spans unconditionally, even on error.
    let profiled = profile.map(CpuProfile::finish).transpose();
    drop(runtime);
    drop(telemetry_guard);

    result?;
    profiled?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args, argh::EarlyExit> {
        Args::from_args(&["tracebench"], args)
    }

    #[test]
    fn rejects_unknown_api() {
        let err = parse(&["--api", "http3"]).unwrap_err();
        assert!(err.output.contains("http3"));
    }

    #[test]
    fn accepts_all_apis() {
        for (value, api) in [
            ("http1", Api::Http1),
            ("http2", Api::Http2),
            ("grpc-dp", Api::GrpcDirectPath),
        ] {
            let args = parse(&["--api", value]).unwrap();
            assert_eq!(args.api, Some(api));
        }
    }

    #[test]
    fn flags_override_config() {
        let args = parse(&[
            "--bucket",
            "other",
            "--api",
            "http1",
            "--add-spans",
            "--cpuprofile",
            "cpu.pprof",
        ])
        .unwrap();

        let mut config = Config::default();
        args.apply(&mut config);

        assert_eq!(config.bucket, "other");
        assert_eq!(config.api, Api::Http1);
        assert!(config.add_spans);
        assert!(!config.list_objects);
        assert_eq!(config.cpuprofile, Some(PathBuf::from("cpu.pprof")));
    }

    #[test]
    fn missing_flags_keep_config() {
        let args = parse(&[]).unwrap();

        let mut config = Config {
            bucket: "from-config".into(),
            api: Api::GrpcDirectPath,
            list_objects: true,
            ..Config::default()
        };
        args.apply(&mut config);

        assert_eq!(config.bucket, "from-config");
        assert_eq!(config.api, Api::GrpcDirectPath);
        assert!(config.list_objects);
    }
}
