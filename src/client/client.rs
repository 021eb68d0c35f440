//! Live query client implementation
//!
//! Contains the primary interface [`Client`], which owns:
//! - the shared push connection through [`ConnectionManager`]
//! - per-channel relays through [`ChannelRegistry`]
//! - the REST fallback through [`SnapshotFallbackPoller`]

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;
use tracing::warn;

use super::ClientBuilder;
use crate::ChannelRegistry;
use crate::ConnectionManager;
use crate::QueryView;
use crate::Result;
use crate::Settings;
use crate::SnapshotFallbackPoller;
use crate::SortKey;

/// Main entry point of the live query synchronizer
///
/// Cheap to clone; clones share the connection, the registry and the poller.
/// Created through the [`builder()`](Client::builder) method.
#[derive(Clone)]
pub struct Client {
    pub(super) inner: Arc<ClientInner>,
}

pub(super) struct ClientInner {
    pub(super) settings: Settings,
    pub(super) connection: ConnectionManager,
    pub(super) registry: ChannelRegistry,
    pub(super) poller: Option<Arc<SnapshotFallbackPoller>>,
    pub(super) shutdown: CancellationToken,
    pub(super) views: TaskTracker,
    pub(super) tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Client {
    /// Create a configured client builder
    ///
    /// Chain the optional seams before calling
    /// [`build()`](ClientBuilder::build).
    pub fn builder(settings: Settings) -> ClientBuilder {
        ClientBuilder::new(settings)
    }

    /// Opens a continuously updated view of `channel`.
    ///
    /// Returns immediately; registration, reload and merging happen in the
    /// view's own task. Until live data arrives the view shows the fallback
    /// snapshot rows of the channel, if any.
    ///
    /// # Examples
    /// ```rust,ignore
    /// let view = client.subscribe("inactive-children", Some(SortKey::descending("daysInactive")));
    /// ```
    pub fn subscribe(
        &self,
        channel: &str,
        sort: Option<SortKey>,
    ) -> QueryView {
        info!(%channel, "subscribing");
        QueryView::spawn(
            channel,
            sort,
            self.inner.registry.clone(),
            self.inner.poller.as_ref().map(|poller| poller.subscribe()),
            self.inner.settings.view.clone(),
            self.inner.shutdown.child_token(),
            &self.inner.views,
        )
    }

    /// Starts the push transport now instead of on the first subscription.
    pub async fn connect(&self) -> Result<()> {
        self.inner.connection.acquire().await?;
        Ok(())
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.inner.connection
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.inner.registry
    }

    /// The snapshot poller; `None` when the fallback is disabled
    pub fn fallback(&self) -> Option<&Arc<SnapshotFallbackPoller>> {
        self.inner.poller.as_ref()
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// Stops every view of this client, the poller and the shared transport.
    ///
    /// View drivers have released their channels by the time the transport
    /// is stopped; the views themselves only stop publishing.
    pub async fn shutdown(&self) {
        info!("client shutting down");
        self.inner.shutdown.cancel();

        self.inner.views.close();
        self.inner.views.wait().await;

        let tasks = std::mem::take(&mut *self.inner.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!("background task ended abnormally: {:?}", e);
            }
        }

        self.inner.connection.shutdown().await;
        info!("client shut down");
    }
}
