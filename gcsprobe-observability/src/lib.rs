//! Logging shared by the `storage-layout` and `tracebench` binaries.
//!
//! Both binaries write human readable logs to stderr and keep stdout for their results. The
//! benchmark can additionally plug a span exporter into the same subscriber, see
//! [`init_tracing`].
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

mod config;
mod logging;

pub use config::{FormatParseError, LogFormat, Logging};
pub use logging::{ExportLayer, init_test_logging, init_tracing, parse_rust_log};
