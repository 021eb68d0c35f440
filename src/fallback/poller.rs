use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::interval;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::FallbackSnapshot;
use super::SnapshotSource;
use crate::metrics::FALLBACK_POLLS;
use crate::metrics::OUTCOME_FAILURE;
use crate::metrics::OUTCOME_SUCCESS;
use crate::FallbackConfig;
use crate::Result;

/// Periodic REST snapshot poller
///
/// Independent of channel subscriptions: it publishes the latest normalized
/// snapshot to every view through a `watch` channel. A failed poll keeps the
/// previously published snapshot. Whether a view shows it is the view's
/// decision.
pub struct SnapshotFallbackPoller {
    source: Arc<dyn SnapshotSource>,
    config: FallbackConfig,
    publisher: watch::Sender<Arc<FallbackSnapshot>>,
}

impl SnapshotFallbackPoller {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        config: FallbackConfig,
    ) -> Self {
        let (publisher, _) = watch::channel(Arc::new(FallbackSnapshot::default()));
        Self {
            source,
            config,
            publisher,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<FallbackSnapshot>> {
        self.publisher.subscribe()
    }

    /// Latest successfully fetched snapshot
    pub fn current(&self) -> Arc<FallbackSnapshot> {
        self.publisher.borrow().clone()
    }

    /// Fetches and publishes one snapshot. Subscribers are only notified
    /// when the content changed.
    pub async fn poll_once(&self) -> Result<()> {
        let raw = match self.source.fetch().await {
            Ok(raw) => raw,
            Err(e) => {
                FALLBACK_POLLS.with_label_values(&[OUTCOME_FAILURE]).inc();
                return Err(e);
            }
        };
        FALLBACK_POLLS.with_label_values(&[OUTCOME_SUCCESS]).inc();

        let snapshot = FallbackSnapshot::from_raw(raw, &self.config.channels);
        let changed = self.publisher.send_if_modified(|current| {
            if **current == snapshot {
                false
            } else {
                *current = Arc::new(snapshot);
                true
            }
        });
        debug!(changed, "snapshot polled");
        Ok(())
    }

    /// Polls every `poll_interval_ms`, starting immediately, until cancelled.
    pub async fn run(
        self: Arc<Self>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut ticker = interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(url = %self.config.url, "snapshot fallback polling started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        warn!("snapshot poll failed, keeping last snapshot: {}", e);
                    }
                }
            }
        }
        info!("snapshot fallback polling stopped");
        Ok(())
    }
}
