use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep_until;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::MaterializedMap;
use super::ReloadSession;
use super::SortKey;
use crate::metrics::EVENTS_APPLIED;
use crate::ChangeEvent;
use crate::ChangeFeed;
use crate::ChannelRegistry;
use crate::ConnectionManager;
use crate::FallbackSnapshot;
use crate::LifecycleEvent;
use crate::RawFrame;
use crate::Record;
use crate::Result;
use crate::ViewConfig;

/// Which data a view is currently showing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewSource {
    /// Live map of the push channel
    Live,
    /// REST snapshot, shown while the live map is empty
    Fallback,
    Empty,
}

/// Sorted items published by a view
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub items: Vec<Record>,
    pub source: ViewSource,
}

impl Projection {
    fn empty() -> Self {
        Self {
            items: Vec::new(),
            source: ViewSource::Empty,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewSnapshot {
    pub items: Vec<Record>,
    pub connected: bool,
}

/// One consumer's materialized, continuously updated view of a channel
///
/// Created by [`Client::subscribe`](crate::Client::subscribe). A driver task
/// registers on the channel, reloads it, merges live events and reconciles
/// with the REST fallback; the view only reads what the driver publishes.
/// Dropping the view unsubscribes it.
pub struct QueryView {
    channel: String,
    projection: watch::Receiver<Projection>,
    connection: ConnectionManager,
    mounted: Arc<AtomicBool>,
    cancel: CancellationToken,
    driver: Option<JoinHandle<()>>,
}

impl QueryView {
    /// Spawns the driver on `tracker`. Must be called within a Tokio runtime.
    ///
    /// Cancelling `cancel` stops the view like [`unsubscribe`](Self::unsubscribe).
    pub(crate) fn spawn(
        channel: &str,
        sort: Option<SortKey>,
        registry: ChannelRegistry,
        fallback: Option<watch::Receiver<Arc<FallbackSnapshot>>>,
        config: ViewConfig,
        cancel: CancellationToken,
        tracker: &TaskTracker,
    ) -> Self {
        let (publisher, projection) = watch::channel(Projection::empty());
        let mounted = Arc::new(AtomicBool::new(true));
        let connection = registry.connection().clone();

        let driver = ViewDriver {
            channel: channel.to_string(),
            sort,
            registry,
            fallback,
            config,
            publisher,
            mounted: mounted.clone(),
            cancel: cancel.clone(),
            map: MaterializedMap::new(),
        };

        Self {
            channel: channel.to_string(),
            projection,
            connection,
            mounted,
            cancel,
            driver: Some(tracker.spawn(driver.run())),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Current projected items
    pub fn items(&self) -> Vec<Record> {
        self.projection.borrow().items.clone()
    }

    pub fn source(&self) -> ViewSource {
        self.projection.borrow().source
    }

    /// Whether the shared transport is connected right now. This is a
    /// transport-level flag, not a per-channel one.
    pub fn connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        ViewSnapshot {
            items: self.items(),
            connected: self.connected(),
        }
    }

    /// Waits for the next projection. `None` once the view stopped.
    pub async fn changed(&mut self) -> Option<Vec<Record>> {
        self.projection.changed().await.ok()?;
        Some(self.projection.borrow_and_update().items.clone())
    }

    /// Receiver of every projection published from now on
    pub fn watch(&self) -> watch::Receiver<Projection> {
        self.projection.clone()
    }

    /// Stops the view and waits for its driver to exit. Unregisters from the
    /// channel and cancels an in-flight reload.
    pub async fn unsubscribe(mut self) {
        self.unmount();
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                warn!(channel = %self.channel, "view driver ended abnormally: {:?}", e);
            }
        }
    }

    fn unmount(&self) {
        self.mounted.store(false, Ordering::Release);
        self.cancel.cancel();
    }
}

impl Drop for QueryView {
    fn drop(&mut self) {
        self.unmount();
    }
}

/// Single writer of one view's map
struct ViewDriver {
    channel: String,
    sort: Option<SortKey>,
    registry: ChannelRegistry,
    fallback: Option<watch::Receiver<Arc<FallbackSnapshot>>>,
    config: ViewConfig,
    publisher: watch::Sender<Projection>,
    mounted: Arc<AtomicBool>,
    cancel: CancellationToken,
    map: MaterializedMap,
}

impl ViewDriver {
    async fn run(mut self) {
        let mut lifecycle = self.registry.connection().lifecycle();
        let mut feed: Option<ChangeFeed> = None;
        let mut reload: Option<ReloadSession> = None;
        let mut attach_at = Some(Instant::now());
        let mut fallback = self.fallback.take();

        self.publish(fallback.as_ref());

        loop {
            if feed.is_none() && attach_at.is_some_and(|at| at <= Instant::now()) {
                let registered = tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    registered = self.registry.register(&self.channel) => registered,
                };
                match registered {
                    Ok(registered) => {
                        info!(channel = %self.channel, "view attached");
                        feed = Some(registered);
                        attach_at = None;
                        reload = self.start_reload().await;
                    }
                    Err(e) => {
                        attach_at = self.config.attach_retry().map(|delay| Instant::now() + delay);
                        warn!(
                            channel = %self.channel,
                            retry = attach_at.is_some(),
                            "view attach failed, serving fallback data: {}", e
                        );
                    }
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = next_event(&mut feed) => match event {
                    Some(event) => self.on_live(event, reload.as_mut(), fallback.as_ref()),
                    None => {
                        debug!(channel = %self.channel, "feed ended, re-attaching");
                        feed = None;
                        attach_at = Some(Instant::now());
                    }
                },
                item = next_reload_item(&mut reload) => match item {
                    Some(item) => {
                        if let Some(session) = reload.as_mut() {
                            session.on_item(item);
                        }
                    }
                    None => {
                        if let Some(session) = reload.take() {
                            session.finish(&mut self.map);
                            self.publish(fallback.as_ref());
                        }
                    }
                },
                alive = fallback_changed(&mut fallback) => {
                    if alive {
                        self.publish(fallback.as_ref());
                    } else {
                        fallback = None;
                    }
                },
                event = lifecycle.recv() => match event {
                    Ok(LifecycleEvent::Reconnected) if feed.is_some() && self.config.reload_on_reconnect => {
                        info!(channel = %self.channel, "transport reconnected, reloading");
                        reload = self.start_reload().await;
                    }
                    Ok(LifecycleEvent::Closed(reason)) if feed.is_some() => {
                        warn!(channel = %self.channel, ?reason, "transport closed, detaching view");
                        reload = None;
                        feed = None;
                        attach_at = self.config.attach_retry().map(|delay| Instant::now() + delay);
                    }
                    Ok(event) => trace!(channel = %self.channel, ?event, "lifecycle event"),
                    Err(RecvError::Lagged(skipped)) => warn!(channel = %self.channel, skipped, "lifecycle lagged"),
                    Err(RecvError::Closed) => lifecycle = self.registry.connection().lifecycle(),
                },
                _ = attach_due(attach_at), if feed.is_none() => {}
            }
        }

        drop(reload);
        drop(feed);
        debug!(channel = %self.channel, "view driver stopped");
    }

    /// `None` when no transport is available or the view is cancelled first
    async fn start_reload(&self) -> Option<ReloadSession> {
        let acquired = tokio::select! {
            _ = self.cancel.cancelled() => return None,
            acquired = self.registry.connection().acquire() => acquired,
        };
        match acquired {
            Ok(transport) => Some(ReloadSession::start(transport.as_ref(), &self.channel, self.config.reload_merge).await),
            Err(e) => {
                warn!(channel = %self.channel, "reload skipped, no transport: {}", e);
                None
            }
        }
    }

    fn on_live(
        &mut self,
        event: ChangeEvent,
        reload: Option<&mut ReloadSession>,
        fallback: Option<&watch::Receiver<Arc<FallbackSnapshot>>>,
    ) {
        if let Some(session) = reload {
            session.on_live(&event);
        }
        if self.map.apply(&event) {
            EVENTS_APPLIED.with_label_values(&[&self.channel]).inc();
            self.publish(fallback);
        }
    }

    /// Live data when the map holds any, otherwise this channel's fallback
    /// rows, otherwise nothing.
    fn project(
        &self,
        fallback: Option<&watch::Receiver<Arc<FallbackSnapshot>>>,
    ) -> Projection {
        let (mut items, source) = if !self.map.is_empty() {
            (self.map.values().cloned().collect::<Vec<_>>(), ViewSource::Live)
        } else {
            let rows = fallback.and_then(|rx| {
                let snapshot = rx.borrow();
                snapshot.rows(&self.channel).filter(|rows| !rows.is_empty()).map(<[Record]>::to_vec)
            });
            match rows {
                Some(rows) => (rows, ViewSource::Fallback),
                None => (Vec::new(), ViewSource::Empty),
            }
        };
        if let Some(sort) = &self.sort {
            sort.sort(&mut items);
        }
        Projection { items, source }
    }

    fn publish(
        &self,
        fallback: Option<&watch::Receiver<Arc<FallbackSnapshot>>>,
    ) {
        if !self.mounted.load(Ordering::Acquire) {
            return;
        }
        let projection = self.project(fallback);
        self.publisher.send_if_modified(|current| {
            if *current == projection {
                false
            } else {
                trace!(channel = %self.channel, items = projection.items.len(), source = ?projection.source, "publishing projection");
                *current = projection;
                true
            }
        });
    }
}

async fn next_event(feed: &mut Option<ChangeFeed>) -> Option<ChangeEvent> {
    match feed {
        Some(feed) => feed.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_reload_item(reload: &mut Option<ReloadSession>) -> Option<Result<RawFrame>> {
    match reload {
        Some(session) => session.next().await,
        None => std::future::pending().await,
    }
}

/// `false` once the poller is gone
async fn fallback_changed(fallback: &mut Option<watch::Receiver<Arc<FallbackSnapshot>>>) -> bool {
    match fallback {
        Some(rx) => rx.changed().await.is_ok(),
        None => std::future::pending().await,
    }
}

async fn attach_due(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
