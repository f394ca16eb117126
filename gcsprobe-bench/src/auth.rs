//! Default application credentials.

use std::fmt;
use std::sync::Arc;

use crate::remote::RemoteResult;

/// OAuth scope for the data plane, matching what the storage clients request.
pub const FULL_CONTROL_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.full_control";

/// OAuth scope used to export spans to Cloud Trace.
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// A source of OAuth bearer tokens for the JSON API.
#[async_trait::async_trait]
pub trait TokenSource: Send + Sync + 'static {
    /// Returns a token that is valid for the storage scope.
    async fn bearer_token(&self) -> RemoteResult<String>;
}

/// Credentials discovered from the environment, such as a service account key or the metadata
/// server.
#[derive(Clone)]
pub struct DefaultCredentials {
    provider: Arc<dyn gcp_auth::TokenProvider>,
}

impl DefaultCredentials {
    /// Looks up the default application credentials.
    pub async fn discover() -> RemoteResult<Self> {
        let provider = gcp_auth::provider().await?;
        Ok(Self { provider })
    }

    /// Fetches an access token for the given scopes.
    pub async fn token(&self, scopes: &[&str]) -> RemoteResult<String> {
        let token = self.provider.token(scopes).await?;
        Ok(token.as_str().to_owned())
    }

    /// Returns the project the credentials belong to.
    pub async fn project_id(&self) -> RemoteResult<String> {
        let project_id = self.provider.project_id().await?;
        Ok(project_id.to_string())
    }
}

impl fmt::Debug for DefaultCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultCredentials").finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl TokenSource for DefaultCredentials {
    async fn bearer_token(&self) -> RemoteResult<String> {
        self.token(&[FULL_CONTROL_SCOPE]).await
    }
}
