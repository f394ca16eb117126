use std::borrow::Cow;
use std::io::IsTerminal;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, de};
use thiserror::Error;
use tracing::level_filters::LevelFilter;

/// How log lines are rendered on stderr.
///
/// Configuration values are matched case-insensitively, see the [`FromStr`] implementation.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// [`LogFormat::Pretty`] if stderr is a terminal, otherwise [`LogFormat::Simplified`].
    #[default]
    Auto,

    /// Colored output for humans.
    ///
    /// ```text
    /// 2020-12-04T12:10:32Z  INFO gcsprobe_bench::bench: upload finished object=trace_3f2a..
    /// ```
    Pretty,

    /// The same as `Pretty`, without colors.
    Simplified,

    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// Resolves [`LogFormat::Auto`] against the current stderr.
    pub fn resolve(self) -> Self {
        match self {
            LogFormat::Auto if std::io::stderr().is_terminal() => LogFormat::Pretty,
            LogFormat::Auto => LogFormat::Simplified,
            format => format,
        }
    }
}

/// Error returned when parsing an unknown [`LogFormat`].
#[derive(Clone, Debug, Error)]
#[error(r#"unknown log format "{0}", use auto, pretty, simplified or json"#)]
pub struct FormatParseError(String);

impl FromStr for LogFormat {
    type Err = FormatParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(LogFormat::Auto),
            "pretty" => Ok(LogFormat::Pretty),
            "simplified" => Ok(LogFormat::Simplified),
            "json" => Ok(LogFormat::Json),
            _ => Err(FormatParseError(s.into())),
        }
    }
}

impl<'de> Deserialize<'de> for LogFormat {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = Cow::<'de, str>::deserialize(deserializer)?;
        name.parse().map_err(de::Error::custom)
    }
}

/// Logging configuration.
///
/// Logs are always written to stderr. `RUST_LOG` takes precedence over [`Logging::level`], see
/// [`parse_rust_log`](crate::parse_rust_log).
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// Minimum log level to output.
    ///
    /// Valid levels in increasing severity: TRACE, DEBUG, INFO, WARN, ERROR, OFF.
    #[serde(with = "level_name")]
    pub level: LevelFilter,

    /// Log output format, see [`LogFormat`].
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// Reads and writes a [`LevelFilter`] by name, such as `info` or `OFF`.
mod level_name {
    use std::borrow::Cow;

    use serde::{Deserialize, Deserializer, Serializer, de};
    use tracing::level_filters::LevelFilter;

    pub fn serialize<S: Serializer>(level: &LevelFilter, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(level)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<LevelFilter, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = Cow::<'de, str>::deserialize(deserializer)?;
        name.parse().map_err(de::Error::custom)
    }
}
