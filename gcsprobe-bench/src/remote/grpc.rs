use std::io;
use std::ops::Range;

use bytes::BytesMut;
use futures_util::{StreamExt, TryStreamExt};
use google_cloud_storage::client::{Storage, StorageControl};
use google_cloud_storage::model_ext::ReadRange;

use super::{ObjectWriter, RangeReader, Remote, RemoteResult, generic};

/// Environment variable that opts the Google Cloud clients into direct path routing.
pub const DIRECT_PATH_ENV: &str = "GOOGLE_CLOUD_ENABLE_DIRECT_PATH_XDS";

/// Opts into direct path routing for all clients created afterwards.
///
/// This must be called before the async runtime or any other thread is started.
pub fn enable_direct_path() {
    // SAFETY: The process is still single-threaded, so nothing can read the environment
    // concurrently.
    unsafe { std::env::set_var(DIRECT_PATH_ENV, "true") };
}

/// A [`Remote`] using the `google-cloud-storage` client.
///
/// Ranged reads are served by the bidirectional `BidiReadObject` RPC, listing goes through the
/// control plane.
#[derive(Debug)]
pub struct GrpcRemote {
    storage: Storage,
    control: StorageControl,
    bucket: String,
}

impl GrpcRemote {
    /// Creates clients with default application credentials for `bucket`.
    pub async fn new(bucket: &str) -> RemoteResult<Self> {
        let storage = Storage::builder()
            .build()
            .await
            .map_err(generic("failed to create storage client"))?;
        let control = StorageControl::builder()
            .build()
            .await
            .map_err(generic("failed to create storage control client"))?;

        Ok(Self {
            storage,
            control,
            bucket: format!("projects/_/buckets/{bucket}"),
        })
    }
}

#[async_trait::async_trait]
impl Remote for GrpcRemote {
    fn name(&self) -> &'static str {
        "grpc"
    }

    fn writer(&self, object: &str) -> ObjectWriter {
        let storage = self.storage.clone();
        let bucket = self.bucket.clone();
        let object = object.to_owned();

        // The client needs a rewindable payload to resume uploads, so the stream is buffered.
        ObjectWriter::spawn(move |stream| async move {
            let payload: BytesMut = stream.try_collect().await?;
            tracing::debug!(object, size = payload.len(), "starting object write");

            storage
                .write_object(bucket, object, payload.freeze())
                .send_unbuffered()
                .await
                .map_err(generic("failed to write object"))?;

            Ok(())
        })
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn range_reader(&self, object: &str, range: Range<u64>) -> RemoteResult<RangeReader> {
        let (descriptor, reader) = self
            .storage
            .open_object(&self.bucket, object)
            .send_and_read(ReadRange::segment(range.start, range.end - range.start))
            .await
            .map_err(generic("failed to open object"))?;

        // The descriptor owns the bidi stream, so it has to live as long as the reader.
        let stream = futures_util::stream::unfold(
            (descriptor, reader),
            |(descriptor, mut reader)| async move {
                let chunk = reader.next().await?;
                Some((chunk.map_err(io::Error::other), (descriptor, reader)))
            },
        );

        Ok(RangeReader::new(stream.boxed()))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list_objects(&self) -> RemoteResult<u64> {
        let mut page_token = String::new();
        let mut count = 0;

        loop {
            let page = self
                .control
                .list_objects()
                .set_parent(&self.bucket)
                .set_page_token(&page_token)
                .send()
                .await
                .map_err(generic("failed to list objects"))?;

            count += page.objects.len() as u64;
            tracing::trace!(count, "received list page");

            if page.next_page_token.is_empty() {
                break;
            }
            page_token = page.next_page_token;
        }

        Ok(count)
    }
}
