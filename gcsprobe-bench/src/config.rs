//! Configuration for the benchmark.
//!
//! Configuration is merged from the following sources, with later sources overriding earlier
//! ones:
//!
//! 1. Built-in defaults
//! 2. YAML configuration file (specified via `-c` or `--config` flag)
//! 3. Environment variables (prefixed with `TRACEBENCH__`)
//! 4. Command line flags
//!
//! Environment variables use double underscores (`__`) to denote nested configuration
//! structures. For example:
//!
//! - `TRACEBENCH__API=http1` selects the transport
//! - `TRACEBENCH__PHASES__PAUSE=10s` shortens the pause between the two reads
//!
//! The same configuration in YAML looks like this:
//!
//! ```yaml
//! api: http1
//! phases:
//!   pause: 10s
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, bail};
use bytesize::ByteSize;
use figment::providers::{Env, Format, Serialized, Yaml};
use gcsprobe_observability::Logging;
use serde::{Deserialize, Serialize};

use crate::api::Api;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "TRACEBENCH__";

/// The bucket used when none is configured.
pub const DEFAULT_BUCKET: &str = "mhall-golang-test";

/// Main configuration struct for the benchmark.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// The bucket to upload to and download from.
    ///
    /// # Default
    ///
    /// `mhall-golang-test`
    pub bucket: String,

    /// The storage API and transport, see [`Api`].
    ///
    /// # Default
    ///
    /// `http2`
    pub api: Api,

    /// Wraps every phase in application level spans and exports them to Cloud Trace.
    pub add_spans: bool,

    /// Enumerates all objects of the bucket after the download.
    pub list_objects: bool,

    /// Captures a CPU profile of the run and writes it to this file.
    pub cpuprofile: Option<PathBuf>,

    /// Base URL of the JSON API, used by the `http1` and `http2` transports.
    ///
    /// # Default
    ///
    /// `https://storage.googleapis.com`
    pub storage_endpoint: String,

    /// Sizes and delays of the benchmark phases.
    pub phases: Phases,

    /// Span export settings, used if [`add_spans`](Self::add_spans) is set.
    pub telemetry: Telemetry,

    /// Log output settings.
    pub logging: Logging,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bucket: DEFAULT_BUCKET.into(),
            api: Api::default(),
            add_spans: false,
            list_objects: false,
            cpuprofile: None,
            storage_endpoint: "https://storage.googleapis.com".into(),
            phases: Phases::default(),
            telemetry: Telemetry::default(),
            logging: Logging::default(),
        }
    }
}

/// Sizes and delays of the benchmark phases.
///
/// The delays model a reader that consumes the head of an object, pauses for a long time, and
/// then continues with the same stream.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Phases {
    /// Number of random bytes uploaded.
    ///
    /// # Default
    ///
    /// `10 MiB`
    pub upload_size: ByteSize,

    /// Delay between opening the write stream and writing to it.
    ///
    /// # Default
    ///
    /// `1s`
    #[serde(with = "humantime_serde")]
    pub pre_upload_delay: Duration,

    /// Length of the range read from the start of the object.
    ///
    /// # Default
    ///
    /// `1 MiB`
    pub read_range: ByteSize,

    /// Bytes read before the pause. The rest of the range is read after it.
    ///
    /// # Default
    ///
    /// `1 KiB`
    pub head_read: ByteSize,

    /// Pause between the two reads.
    ///
    /// # Default
    ///
    /// `100s`
    #[serde(with = "humantime_serde")]
    pub pause: Duration,

    /// Delay after the second read, before the stream is closed.
    ///
    /// # Default
    ///
    /// `5s`
    #[serde(with = "humantime_serde")]
    pub tail_delay: Duration,
}

impl Default for Phases {
    fn default() -> Self {
        Self {
            upload_size: ByteSize::mib(10),
            pre_upload_delay: Duration::from_secs(1),
            read_range: ByteSize::mib(1),
            head_read: ByteSize::kib(1),
            pause: Duration::from_secs(100),
            tail_delay: Duration::from_secs(5),
        }
    }
}

impl Phases {
    /// Checks that the reads fit into the range.
    pub fn validate(&self) -> Result<()> {
        if self.read_range.as_u64() == 0 {
            bail!("phases.read_range must not be zero");
        }
        if self.head_read > self.read_range {
            bail!(
                "phases.head_read ({}) exceeds phases.read_range ({})",
                self.head_read,
                self.read_range
            );
        }
        Ok(())
    }

    /// Returns the number of bytes read after the pause.
    pub fn tail_read(&self) -> u64 {
        self.read_range.as_u64() - self.head_read.as_u64()
    }
}

/// Span export settings.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Telemetry {
    /// OTLP/HTTP endpoint receiving the spans.
    ///
    /// # Default
    ///
    /// `https://telemetry.googleapis.com/v1/traces`
    pub endpoint: String,

    /// The `service.name` resource attribute.
    ///
    /// # Default
    ///
    /// `my-resource-with-attr`
    pub service_name: String,

    /// Project that receives the spans.
    ///
    /// Falls back to `GOOGLE_CLOUD_PROJECT` and then to the project of the default credentials.
    pub project_id: Option<String>,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            endpoint: "https://telemetry.googleapis.com/v1/traces".into(),
            service_name: "my-resource-with-attr".into(),
            project_id: None,
        }
    }
}

impl Config {
    /// Loads configuration from defaults, the optional YAML file at `path`, and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The YAML configuration file cannot be read or parsed
    /// - Environment variables contain invalid values
    /// - The phase sizes are inconsistent
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        config.phases.validate()?;
        Ok(config)
    }
}
