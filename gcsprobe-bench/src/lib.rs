//! Latency benchmark for Cloud Storage uploads and ranged downloads.
//!
//! A single run uploads a blob of random bytes to a fresh object, then reads the head of that
//! object back in two chunks separated by a long pause. Each phase can be wrapped in
//! application level spans which are exported to Cloud Trace, so the timeline of a paused
//! partial read can be inspected next to the spans of the transport.
//!
//! The transport is selected with [`Api`]: the JSON API over HTTP/1.1 or HTTP/2, or the gRPC
//! client with direct path enabled. See [`bench::run`] for the sequence of phases.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod api;
pub mod auth;
pub mod bench;
pub mod cli;
pub mod config;
pub mod payload;
pub mod profile;
pub mod remote;
pub mod spans;
pub mod telemetry;

pub use crate::api::Api;
pub use crate::bench::run;
pub use crate::config::Config;
