use std::fmt;
use std::io;
use std::ops::Range;
use std::sync::Arc;

use futures_util::{StreamExt, TryStreamExt};
use reqwest::header::{CONTENT_TYPE, RANGE};
use reqwest::{Body, StatusCode};
use serde::Deserialize;
use serde::de::IgnoredAny;
use url::Url;

use super::{ObjectWriter, RangeReader, Remote, RemoteError, RemoteResult, USER_AGENT};
use crate::auth::TokenSource;

/// Maximum number of idle connections kept per host by the HTTP/1.1 client.
const MAX_IDLE_CONNECTIONS: usize = 100;

/// Creates a client that only speaks HTTP/1.1.
pub fn http1_client() -> RemoteResult<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .http1_only()
        .pool_max_idle_per_host(MAX_IDLE_CONNECTIONS)
        .build()
        .map_err(reqwest_error("failed to build HTTP/1.1 client"))
}

/// Creates the default client, which negotiates HTTP/2 where the server supports it.
pub fn http2_client() -> RemoteResult<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .map_err(reqwest_error("failed to build HTTP/2 client"))
}

/// A [`Remote`] using the Cloud Storage JSON API.
pub struct JsonRemote {
    client: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
    endpoint: Url,
    bucket: String,
}

impl JsonRemote {
    /// Creates a remote for `bucket` at the given API endpoint, such as
    /// `https://storage.googleapis.com`.
    pub fn new(
        client: reqwest::Client,
        tokens: Arc<dyn TokenSource>,
        endpoint: &str,
        bucket: &str,
    ) -> RemoteResult<Self> {
        let endpoint =
            Url::parse(endpoint).map_err(|_| RemoteError::InvalidEndpoint(endpoint.into()))?;
        if endpoint.cannot_be_a_base() {
            return Err(RemoteError::InvalidEndpoint(endpoint.into()));
        }

        Ok(Self {
            client,
            tokens,
            endpoint,
            bucket: bucket.into(),
        })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.endpoint.clone();
        // Checked in `new`.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

impl fmt::Debug for JsonRemote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonRemote")
            .field("endpoint", &self.endpoint.as_str())
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Remote for JsonRemote {
    fn name(&self) -> &'static str {
        "json"
    }

    fn writer(&self, object: &str) -> ObjectWriter {
        let client = self.client.clone();
        let tokens = Arc::clone(&self.tokens);
        let url = self.url(&["upload", "storage", "v1", "b", &self.bucket, "o"]);
        let object = object.to_owned();

        ObjectWriter::spawn(move |stream| async move {
            let token = tokens.bearer_token().await?;
            tracing::debug!(object, "starting media upload");

            let response = client
                .post(url)
                .query(&[("uploadType", "media"), ("name", object.as_str())])
                .bearer_auth(token)
                .header(CONTENT_TYPE, "application/octet-stream")
                .body(Body::wrap_stream(stream))
                .send()
                .await
                .map_err(reqwest_error("failed to send upload request"))?;

            response
                .error_for_status()
                .map_err(reqwest_error("upload was rejected"))?;

            tracing::debug!(object, "upload committed");
            Ok(())
        })
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn range_reader(&self, object: &str, range: Range<u64>) -> RemoteResult<RangeReader> {
        if range.is_empty() {
            return Ok(RangeReader::new(futures_util::stream::empty().boxed()));
        }

        let token = self.tokens.bearer_token().await?;
        let url = self.url(&["storage", "v1", "b", &self.bucket, "o", object]);

        let response = self
            .client
            .get(url)
            .query(&[("alt", "media")])
            .bearer_auth(token)
            // The end of an HTTP range is inclusive.
            .header(RANGE, format!("bytes={}-{}", range.start, range.end - 1))
            .send()
            .await
            .map_err(reqwest_error("failed to send download request"))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound(object.into()));
        }
        let response = response
            .error_for_status()
            .map_err(reqwest_error("download was rejected"))?;

        let stream = response.bytes_stream().map_err(io::Error::other).boxed();
        Ok(RangeReader::new(stream))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list_objects(&self) -> RemoteResult<u64> {
        let url = self.url(&["storage", "v1", "b", &self.bucket, "o"]);
        let mut page_token: Option<String> = None;
        let mut count = 0;

        loop {
            let token = self.tokens.bearer_token().await?;
            let mut request = self
                .client
                .get(url.clone())
                .query(&[("fields", "items(name),nextPageToken")])
                .bearer_auth(token);
            if let Some(page_token) = &page_token {
                request = request.query(&[("pageToken", page_token)]);
            }

            let page: ListPage = request
                .send()
                .await
                .map_err(reqwest_error("failed to send list request"))?
                .error_for_status()
                .map_err(reqwest_error("listing was rejected"))?
                .json()
                .await
                .map_err(reqwest_error("failed to parse list response"))?;

            count += page.items.len() as u64;
            tracing::trace!(count, "received list page");

            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        Ok(count)
    }
}

/// One page of an object listing. Only the number of items matters.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListPage {
    #[serde(default)]
    items: Vec<IgnoredAny>,
    next_page_token: Option<String>,
}

fn reqwest_error(context: &'static str) -> impl FnOnce(reqwest::Error) -> RemoteError {
    move |cause| RemoteError::Reqwest {
        context: context.into(),
        cause,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct NoToken;

    #[async_trait::async_trait]
    impl TokenSource for NoToken {
        async fn bearer_token(&self) -> RemoteResult<String> {
            Ok(String::new())
        }
    }

    fn remote(endpoint: &str) -> RemoteResult<JsonRemote> {
        JsonRemote::new(http2_client()?, Arc::new(NoToken), endpoint, "my-bucket")
    }

    #[test]
    fn builds_encoded_object_urls() {
        let remote = remote("https://storage.googleapis.com").unwrap();

        let url = remote.url(&["storage", "v1", "b", "my-bucket", "o", "dir/trace_1"]);
        assert_eq!(
            url.as_str(),
            "https://storage.googleapis.com/storage/v1/b/my-bucket/o/dir%2Ftrace_1"
        );
    }

    #[test]
    fn keeps_endpoint_path_prefix() {
        let remote = remote("http://localhost:4443/gcs/").unwrap();

        let url = remote.url(&["upload", "storage", "v1", "b", "my-bucket", "o"]);
        assert_eq!(
            url.as_str(),
            "http://localhost:4443/gcs/upload/storage/v1/b/my-bucket/o"
        );
    }

    #[test]
    fn rejects_invalid_endpoints() {
        assert!(matches!(
            remote("not a url"),
            Err(RemoteError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            remote("mailto:storage@example.com"),
            Err(RemoteError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn parses_list_pages() {
        let json = r#"{"items": [{"name": "a"}, {"name": "b"}], "nextPageToken": "x"}"#;
        let page: ListPage = serde_json::from_str(json).unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.next_page_token.as_deref(), Some("x"));

        let page: ListPage = serde_json::from_str("{}").unwrap();
        assert!(page.items.is_empty());
        assert!(page.next_page_token.is_none());
    }
}
