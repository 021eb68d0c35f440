use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use tracing::trace;

use super::RawSnapshot;
use crate::FallbackConfig;
use crate::FallbackError;
use crate::Result;

/// Where aggregate snapshots come from
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SnapshotSource: Send + Sync + 'static {
    /// Fetches one aggregate snapshot.
    ///
    /// # Errors
    /// - [`FallbackError::Http`] on request failures, timeouts included
    /// - [`FallbackError::Status`] on non-success responses
    /// - [`FallbackError::Body`] when the body is not a snapshot
    async fn fetch(&self) -> Result<RawSnapshot>;
}

/// `GET` of the configured snapshot endpoint
pub struct HttpSnapshotSource {
    client: Client,
    url: String,
}

impl HttpSnapshotSource {
    pub fn new(config: &FallbackConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
    async fn fetch(&self) -> Result<RawSnapshot> {
        trace!(url = %self.url, "fetching snapshot");
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FallbackError::Status(status.as_u16()).into());
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| FallbackError::Body(e.to_string()).into())
    }
}
