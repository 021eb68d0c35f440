use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use super::Client;
use super::ClientInner;
use crate::async_task::spawn_task;
use crate::ChannelRegistry;
use crate::ConnectionManager;
use crate::HttpSnapshotSource;
use crate::Result;
use crate::Settings;
use crate::SignalRTransportFactory;
use crate::SnapshotFallbackPoller;
use crate::SnapshotSource;
use crate::TransportFactory;

pub struct ClientBuilder {
    settings: Settings,
    transport_factory: Option<Arc<dyn TransportFactory>>,
    snapshot_source: Option<Arc<dyn SnapshotSource>>,
}

impl ClientBuilder {
    /// Create a new builder from loaded settings
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            transport_factory: None,
            snapshot_source: None,
        }
    }

    /// Replaces the hub transport (default: [`SignalRTransportFactory`])
    pub fn transport_factory(
        mut self,
        factory: Arc<dyn TransportFactory>,
    ) -> Self {
        self.transport_factory = Some(factory);
        self
    }

    /// Replaces the REST snapshot source (default: [`HttpSnapshotSource`])
    pub fn snapshot_source(
        mut self,
        source: Arc<dyn SnapshotSource>,
    ) -> Self {
        self.snapshot_source = Some(source);
        self
    }

    /// Validates the settings and builds the client.
    ///
    /// Nothing connects yet: the push transport is started by the first
    /// subscription. When the fallback is enabled its poller is spawned right
    /// away, so this must be called within a Tokio runtime.
    ///
    /// # Errors
    /// - [`Error::InvalidConfig`](crate::Error::InvalidConfig) or
    ///   [`Error::Config`](crate::Error::Config) for unusable settings
    /// - [`Error::Fallback`](crate::Error::Fallback) when the HTTP client
    ///   cannot be built
    pub fn build(self) -> Result<Client> {
        let settings = self.settings.validate()?;

        let factory = match self.transport_factory {
            Some(factory) => factory,
            None => Arc::new(SignalRTransportFactory::new(settings.connection.clone())),
        };
        let connection = ConnectionManager::new(factory, settings.connection.clone());
        let registry = ChannelRegistry::new(connection.clone());

        let shutdown = CancellationToken::new();
        let mut tasks = Vec::new();
        let poller = if settings.fallback.enabled {
            let source = match self.snapshot_source {
                Some(source) => source,
                None => Arc::new(HttpSnapshotSource::new(&settings.fallback)?),
            };
            let poller = Arc::new(SnapshotFallbackPoller::new(source, settings.fallback.clone()));
            let (task_poller, cancel) = (poller.clone(), shutdown.child_token());
            spawn_task("snapshot fallback poller", move || task_poller.run(cancel), Some(&mut tasks));
            Some(poller)
        } else {
            info!("snapshot fallback disabled");
            None
        };

        info!(hub = %settings.connection.hub_url, "client built");
        Ok(Client {
            inner: Arc::new(ClientInner {
                settings,
                connection,
                registry,
                poller,
                shutdown,
                views: TaskTracker::new(),
                tasks: Mutex::new(tasks),
            }),
        })
    }
}
