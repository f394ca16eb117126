use std::env;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, Registry, prelude::*};

use crate::config::{LogFormat, Logging};

/// Targets of our own crates, which are logged up to `TRACE` before the per-output filters apply.
const CRATE_NAMES: &[&str] = &[
    "gcsprobe_observability",
    "gcsprobe_layout",
    "gcsprobe_bench",
    "storage_layout",
    "tracebench",
];

/// An additional layer that receives spans next to the log output, such as a span exporter.
pub type ExportLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Installs the global `tracing` subscriber.
///
/// Logs go to stderr in the configured [`LogFormat`], filtered to the configured level. If an
/// `export` layer is given, it is registered alongside and applies its own filtering.
pub fn init_tracing(config: &Logging, export: Option<ExportLayer>) {
    let (level, env_filter) = parse_rust_log(config.level);

    let format = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);
    let format = match config.format.resolve() {
        LogFormat::Json => format.json().with_filter(level).boxed(),
        LogFormat::Simplified => format.with_ansi(false).with_filter(level).boxed(),
        LogFormat::Pretty | LogFormat::Auto => format.with_ansi(true).with_filter(level).boxed(),
    };

    tracing_subscriber::registry()
        .with(export)
        .with(format)
        .with(env_filter)
        .init();
}

/// Determines the output level and the global filter from `RUST_LOG`.
///
/// If `RUST_LOG` is a plain level, it replaces `default` and our own crates are still logged with
/// full verbosity internally. Any other value is used literally as filter directive.
pub fn parse_rust_log(default: LevelFilter) -> (LevelFilter, EnvFilter) {
    let level = match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(value) => match value.parse::<LevelFilter>() {
            Ok(level) => level,
            Err(_) => return (LevelFilter::TRACE, EnvFilter::new(value)),
        },
        Err(_) => default,
    };

    // This is the maximum verbosity that will be logged, we filter this down to `level`.
    (level, own_crates_at_trace("INFO"))
}

/// Initialize the logger for testing.
///
/// This logs to the stdout registered by the Rust test runner, and only captures logs from our
/// own crates. Calling it repeatedly is fine.
pub fn init_test_logging() {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(own_crates_at_trace("ERROR"))
        .with_target(true)
        .with_test_writer()
        .compact()
        .try_init()
        .ok();
}

/// Builds a filter that logs everything at `default` and our own crates at `TRACE`.
fn own_crates_at_trace(default: &str) -> EnvFilter {
    let directives = CRATE_NAMES
        .iter()
        .map(|name| format!("{name}=TRACE"))
        .fold(default.to_owned(), |acc, directive| acc + "," + &directive);
    EnvFilter::new(directives)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_crates_raise_max_level() {
        let filter = own_crates_at_trace("ERROR");
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::TRACE));
    }
}
