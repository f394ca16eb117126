//! Data plane clients for the benchmark.
//!
//! Every [`Api`] maps to one [`Remote`] implementation:
//!
//! - [`Api::Http1`] and [`Api::Http2`] use the JSON API through [`JsonRemote`], with a `reqwest`
//!   client configured for the respective protocol.
//! - [`Api::GrpcDirectPath`] uses the `google-cloud-storage` client through [`GrpcRemote`].
//!
//! Uploads go through an [`ObjectWriter`], which streams everything written to it into a
//! background request until it is closed. Downloads go through a [`RangeReader`].

use std::fmt::Debug;
use std::future::Future;
use std::ops::Range;
use std::pin::Pin;
use std::sync::Arc;
use std::{io, task};

use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::task::JoinHandle;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::Instrument;

use crate::api::Api;
use crate::auth::DefaultCredentials;
use crate::config::Config;

mod grpc;
#[cfg(test)]
pub(crate) mod in_memory;
mod json;

pub use grpc::{DIRECT_PATH_ENV, GrpcRemote, enable_direct_path};
pub use json::{JsonRemote, http1_client, http2_client};

/// User agent string used for outgoing requests.
pub const USER_AGENT: &str = concat!("gcsprobe-bench/", env!("CARGO_PKG_VERSION"));

/// Size of the in-memory pipe between an [`ObjectWriter`] and its request.
const WRITE_BUFFER_SIZE: usize = 256 * 1024;

/// A stream of object contents.
pub type PayloadStream = BoxStream<'static, io::Result<Bytes>>;

/// A type-erased [`Remote`] instance.
pub type BoxedRemote = Box<dyn Remote>;

/// Access to objects in a single bucket.
#[async_trait::async_trait]
pub trait Remote: Debug + Send + Sync + 'static {
    /// The remote name, used for diagnostics.
    fn name(&self) -> &'static str;

    /// Opens a write stream that creates or replaces `object` once it is closed.
    fn writer(&self, object: &str) -> ObjectWriter;

    /// Opens a read stream over the given byte range of `object`.
    async fn range_reader(&self, object: &str, range: Range<u64>) -> RemoteResult<RangeReader>;

    /// Enumerates all objects in the bucket and returns how many there are.
    async fn list_objects(&self) -> RemoteResult<u64>;
}

/// Creates the [`Remote`] for the configured [`Api`].
pub async fn connect(
    config: &Config,
    credentials: DefaultCredentials,
) -> RemoteResult<BoxedRemote> {
    let remote: BoxedRemote = match config.api {
        Api::Http1 => Box::new(JsonRemote::new(
            http1_client()?,
            Arc::new(credentials),
            &config.storage_endpoint,
            &config.bucket,
        )?),
        Api::Http2 => Box::new(JsonRemote::new(
            http2_client()?,
            Arc::new(credentials),
            &config.storage_endpoint,
            &config.bucket,
        )?),
        Api::GrpcDirectPath => Box::new(GrpcRemote::new(&config.bucket).await?),
    };

    tracing::info!(remote = remote.name(), api = %config.api, "created storage client");
    Ok(remote)
}

/// A write stream to a single object.
///
/// Bytes written to this stream are forwarded to a background upload. The object is only
/// committed by [`close`](Self::close), which also reports the outcome of the upload. Dropping
/// the writer without closing it aborts the upload, so no partial object is created.
#[derive(Debug)]
pub struct ObjectWriter {
    sink: DuplexStream,
    /// Taken by `close`. Still present on drop means the upload must not commit.
    upload: Option<JoinHandle<RemoteResult<()>>>,
}

impl ObjectWriter {
    /// Spawns `upload` with a stream of everything that will be written to this writer.
    ///
    /// The upload runs within the current span.
    pub fn spawn<F, Fut>(upload: F) -> Self
    where
        F: FnOnce(PayloadStream) -> Fut,
        Fut: Future<Output = RemoteResult<()>> + Send + 'static,
    {
        let (sink, source) = tokio::io::duplex(WRITE_BUFFER_SIZE);
        let stream = ReaderStream::new(source).boxed();
        let upload = tokio::spawn(upload(stream).in_current_span());

        Self {
            sink,
            upload: Some(upload),
        }
    }

    /// Finishes the object and waits for the upload to complete.
    pub async fn close(mut self) -> RemoteResult<()> {
        let shutdown = self.sink.shutdown().await;
        let Some(upload) = self.upload.take() else {
            return Ok(());
        };

        // The upload error explains a failed shutdown better than the broken pipe does.
        upload.await??;
        shutdown?;

        Ok(())
    }
}

impl Drop for ObjectWriter {
    fn drop(&mut self) {
        // Runs before `sink` is dropped, so the upload never observes the end of the stream.
        if let Some(upload) = self.upload.take() {
            upload.abort();
        }
    }
}

impl AsyncWrite for ObjectWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
        buf: &[u8],
    ) -> task::Poll<io::Result<usize>> {
        Pin::new(&mut self.sink).poll_write(cx, buf)
    }

    fn poll_flush(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<io::Result<()>> {
        Pin::new(&mut self.sink).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<io::Result<()>> {
        Pin::new(&mut self.sink).poll_shutdown(cx)
    }
}

/// A read stream over a byte range of a single object.
pub struct RangeReader {
    inner: StreamReader<PayloadStream, Bytes>,
}

impl RangeReader {
    /// Creates a reader over the given stream of object contents.
    pub fn new(stream: PayloadStream) -> Self {
        Self {
            inner: StreamReader::new(stream),
        }
    }

    /// Releases the underlying connection or stream.
    pub fn close(self) {
        tracing::trace!("closing range reader");
    }
}

impl Debug for RangeReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeReader").finish_non_exhaustive()
    }
}

impl AsyncRead for RangeReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> task::Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

/// Errors returned by a [`Remote`].
#[derive(Debug, Error)]
pub enum RemoteError {
    /// IO errors related to payload streaming.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Errors of the `reqwest` client, either while sending a request or returned by the API.
    #[error("reqwest error: {context}")]
    Reqwest {
        /// What was attempted.
        context: String,
        /// The underlying error.
        #[source]
        cause: reqwest::Error,
    },

    /// Errors encountered when obtaining default credentials or tokens.
    #[error("GCP authentication error: {0}")]
    Auth(#[from] gcp_auth::Error),

    /// The requested object does not exist.
    #[error("object not found: {0}")]
    NotFound(String),

    /// The configured endpoint cannot be used as base URL.
    #[error("invalid storage endpoint `{0}`")]
    InvalidEndpoint(String),

    /// The background upload panicked or was cancelled.
    #[error("upload task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Any other error of a storage client library.
    #[error("storage client error: {context}")]
    Generic {
        /// What was attempted.
        context: String,
        /// The underlying error.
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Result type for [`Remote`] operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Returns a closure that wraps a client library error with `context`.
pub(crate) fn generic<E>(context: &'static str) -> impl FnOnce(E) -> RemoteError
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    move |cause| RemoteError::Generic {
        context: context.into(),
        cause: cause.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::in_memory::InMemoryRemote;
    use super::*;

    #[tokio::test]
    async fn close_commits_object() {
        let remote = InMemoryRemote::new();

        let mut writer = remote.writer("trace_closed");
        writer.write_all(&[1; 100]).await.unwrap();
        writer.close().await.unwrap();

        assert_eq!(remote.get("trace_closed").unwrap().len(), 100);
    }

    #[tokio::test]
    async fn dropped_writer_discards_object() {
        let remote = InMemoryRemote::new();

        let mut writer = remote.writer("trace_partial");
        writer.write_all(&[1; 100]).await.unwrap();
        drop(writer);

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(remote.get("trace_partial"), None);
    }
}
