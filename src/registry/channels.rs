use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::ChangeFeed;
use crate::metrics::ACTIVE_CHANNELS;
use crate::metrics::MALFORMED_EVENTS;
use crate::ChangeEvent;
use crate::ConnectionManager;
use crate::ConnectionState;
use crate::RawFrame;
use crate::Result;
use crate::Transport;

/// Ref-counted channel relays over the shared transport
///
/// A channel is attached to the transport iff at least one listener is
/// registered. Activation is serialized, so concurrent first registrations
/// of a channel attach a single relay.
#[derive(Clone)]
pub struct ChannelRegistry {
    inner: Arc<RegistryInner>,
}

pub(super) struct RegistryInner {
    connection: ConnectionManager,
    channels: DashMap<String, ChannelEntry>,
    activation: tokio::sync::Mutex<()>,
    next_id: AtomicU64,
}

struct ChannelEntry {
    listeners: Vec<Listener>,
    relay: JoinHandle<()>,
    transport: Arc<dyn Transport>,
}

struct Listener {
    id: u64,
    sender: mpsc::UnboundedSender<ChangeEvent>,
}

impl ChannelRegistry {
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                connection,
                channels: DashMap::new(),
                activation: tokio::sync::Mutex::new(()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Registers a listener on `channel`, activating the channel if needed.
    ///
    /// Dropping the returned feed unregisters the listener.
    ///
    /// # Errors
    /// Propagates the connection failure when the channel has to be activated
    /// and the transport cannot be acquired. Nothing is registered then.
    pub async fn register(
        &self,
        channel: &str,
    ) -> Result<ChangeFeed> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();

        if self.inner.join_live(channel, id, &sender) {
            trace!(%channel, listener = id, "joined active channel");
            return Ok(ChangeFeed::new(self.inner.clone(), channel, id, receiver));
        }

        let _activation = self.inner.activation.lock().await;
        if self.inner.join_live(channel, id, &sender) {
            trace!(%channel, listener = id, "joined channel activated concurrently");
            return Ok(ChangeFeed::new(self.inner.clone(), channel, id, receiver));
        }

        let transport = self.inner.connection.acquire().await?;
        let frames = transport.attach(channel);
        let relay = tokio::spawn(relay(Arc::downgrade(&self.inner), channel.to_string(), frames));
        let listener = Listener { id, sender };

        // An entry still present here is bound to a dead transport; keep its
        // listeners and rebind it.
        match self.inner.channels.get_mut(channel) {
            Some(mut entry) => {
                entry.relay.abort();
                entry.relay = relay;
                entry.transport = transport;
                entry.listeners.push(listener);
                info!(%channel, "channel rebound to a new transport");
            }
            None => {
                self.inner.channels.insert(
                    channel.to_string(),
                    ChannelEntry {
                        listeners: vec![listener],
                        relay,
                        transport,
                    },
                );
                ACTIVE_CHANNELS.inc();
                info!(%channel, "channel activated");
            }
        }

        Ok(ChangeFeed::new(self.inner.clone(), channel, id, receiver))
    }

    pub fn listener_count(
        &self,
        channel: &str,
    ) -> usize {
        self.inner
            .channels
            .get(channel)
            .map(|entry| entry.listeners.len())
            .unwrap_or(0)
    }

    pub fn is_active(
        &self,
        channel: &str,
    ) -> bool {
        self.inner.channels.contains_key(channel)
    }

    /// Names of the channels with an attached relay, sorted
    pub fn active_channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.inner.channels.iter().map(|e| e.key().clone()).collect();
        channels.sort();
        channels
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.inner.connection
    }
}

impl RegistryInner {
    /// Adds the listener to an existing entry whose transport is still
    /// usable.
    fn join_live(
        &self,
        channel: &str,
        id: u64,
        sender: &mpsc::UnboundedSender<ChangeEvent>,
    ) -> bool {
        match self.channels.get_mut(channel) {
            Some(mut entry) if entry.transport.state() != ConnectionState::Disconnected => {
                entry.listeners.push(Listener {
                    id,
                    sender: sender.clone(),
                });
                true
            }
            _ => false,
        }
    }

    /// Removes a listener; detaches the channel when it was the last one.
    ///
    /// Uses `remove_if_mut` so that removing the listener, checking for
    /// emptiness and detaching happen under the entry's lock. A concurrent
    /// registration either joins before the check or activates afresh after
    /// the detach.
    pub(super) fn unregister(
        &self,
        channel: &str,
        id: u64,
    ) {
        let removed = self.channels.remove_if_mut(channel, |_, entry| {
            entry.listeners.retain(|l| l.id != id);
            if entry.listeners.is_empty() {
                entry.transport.detach(channel);
                true
            } else {
                false
            }
        });

        if let Some((_, entry)) = removed {
            entry.relay.abort();
            ACTIVE_CHANNELS.dec();
            info!(%channel, "channel deactivated");
        }
    }
}

/// Decodes the channel's frames and fans them out to its listeners until
/// the attachment ends.
async fn relay(
    registry: Weak<RegistryInner>,
    channel: String,
    mut frames: mpsc::UnboundedReceiver<RawFrame>,
) {
    while let Some(frame) = frames.recv().await {
        let event = match ChangeEvent::from_frame(frame) {
            Ok(event) => event,
            Err(e) => {
                warn!(%channel, "skipping malformed change event: {}", e);
                MALFORMED_EVENTS.with_label_values(&[&channel]).inc();
                continue;
            }
        };

        let Some(inner) = registry.upgrade() else {
            break;
        };
        if let Some(entry) = inner.channels.get(&channel) {
            trace!(%channel, op = %event.op, listeners = entry.listeners.len(), "relaying change event");
            for listener in &entry.listeners {
                if listener.sender.send(event.clone()).is_err() {
                    debug!(%channel, listener = listener.id, "listener receiver dropped");
                }
            }
        };
    }
    debug!(%channel, "relay ended");
}
