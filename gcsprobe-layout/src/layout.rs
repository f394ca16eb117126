use anyhow::{Context, Result};
use google_cloud_storage::client::StorageControl;
use google_cloud_storage::model::StorageLayout;

/// OAuth scope requested for the control plane credentials.
pub const FULL_CONTROL_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.full_control";

/// The bucket inspected when none is given on the command line.
pub const DEFAULT_BUCKET: &str = "mhall-golang-test";

/// Returns the resource name of the storage layout of `bucket`.
pub fn layout_name(bucket: &str) -> String {
    format!("projects/_/buckets/{bucket}/storageLayout")
}

/// Creates a control plane client authenticated with default application credentials.
pub async fn control_client() -> Result<StorageControl> {
    let credentials = google_cloud_auth::credentials::Builder::default()
        .with_scopes([FULL_CONTROL_SCOPE])
        .build()
        .context("failed to load default credentials")?;

    StorageControl::builder()
        .with_credentials(credentials)
        .build()
        .await
        .context("failed to create control client")
}

/// Fetches the storage layout of `bucket`, optionally restricted to objects under `prefix`.
#[tracing::instrument(level = "debug", skip(client))]
pub async fn storage_layout(
    client: &StorageControl,
    bucket: &str,
    prefix: Option<&str>,
) -> Result<StorageLayout> {
    let mut request = client.get_storage_layout().set_name(layout_name(bucket));
    if let Some(prefix) = prefix {
        request = request.set_prefix(prefix);
    }

    request
        .send()
        .await
        .with_context(|| format!("failed to get storage layout of bucket `{bucket}`"))
}
