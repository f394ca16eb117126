//! Transport modes of the benchmark.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The storage API and transport used for the data plane.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub enum Api {
    /// JSON API over a client that never negotiates HTTP/2.
    #[serde(rename = "http1")]
    Http1,
    /// JSON API over the default client, which prefers HTTP/2.
    #[default]
    #[serde(rename = "http2")]
    Http2,
    /// The gRPC client with direct path routing enabled.
    #[serde(rename = "grpc-dp")]
    GrpcDirectPath,
}

impl Api {
    /// Returns the name used on the command line and in span attributes.
    pub fn as_str(self) -> &'static str {
        match self {
            Api::Http1 => "http1",
            Api::Http2 => "http2",
            Api::GrpcDirectPath => "grpc-dp",
        }
    }
}

impl fmt::Display for Api {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown [`Api`].
#[derive(Clone, Debug, Error)]
#[error(r#"invalid api "{0}": expected one of "http1", "http2", "grpc-dp""#)]
pub struct ApiParseError(String);

impl FromStr for Api {
    type Err = ApiParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http1" => Ok(Api::Http1),
            "http2" => Ok(Api::Http2),
            "grpc-dp" => Ok(Api::GrpcDirectPath),
            other => Err(ApiParseError(other.into())),
        }
    }
}
