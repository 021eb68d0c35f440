use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::future::Shared;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::timeout;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::ConnectionConfig;
use crate::ConnectionError;
use crate::ConnectionState;
use crate::LifecycleEvent;
use crate::Result;
use crate::Transport;
use crate::TransportFactory;

const LIFECYCLE_CAPACITY: usize = 64;

type ConnectAttempt = Shared<BoxFuture<'static, std::result::Result<Arc<dyn Transport>, ConnectionError>>>;

enum Slot {
    Idle,
    Connecting { generation: u64, attempt: ConnectAttempt },
    Ready { transport: Arc<dyn Transport> },
}

/// Owner of the shared push transport
///
/// Hands out the one live transport, creating and starting it on demand.
/// Overlapping [`acquire`](Self::acquire) calls share a single connect
/// attempt. There is no retry loop here: a failed attempt resets the manager
/// and the next `acquire` starts over.
///
/// Lifecycle events of whichever transport is current are republished on
/// [`lifecycle`](Self::lifecycle). The manager never re-attaches channels after
/// a reconnect.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    factory: Arc<dyn TransportFactory>,
    config: ConnectionConfig,
    slot: Mutex<Slot>,
    generation: AtomicU64,
    lifecycle: broadcast::Sender<LifecycleEvent>,
}

impl ConnectionManager {
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        config: ConnectionConfig,
    ) -> Self {
        let (lifecycle, _) = broadcast::channel(LIFECYCLE_CAPACITY);
        Self {
            inner: Arc::new(ManagerInner {
                factory,
                config,
                slot: Mutex::new(Slot::Idle),
                generation: AtomicU64::new(0),
                lifecycle,
            }),
        }
    }

    /// Returns the live transport, connecting first if there is none.
    ///
    /// # Errors
    /// [`ConnectionError::StartFailed`] when the transport failed to start or
    /// did not start within `connect_timeout_ms`. Every caller sharing the
    /// attempt observes the same error.
    pub async fn acquire(&self) -> Result<Arc<dyn Transport>> {
        let (generation, attempt) = {
            let mut slot = self.inner.slot.lock();
            if let Slot::Ready { transport } = &*slot {
                if transport.state() != ConnectionState::Disconnected {
                    return Ok(transport.clone());
                }
                debug!("held transport is disconnected, starting a new one");
            }

            if let Slot::Connecting { generation, attempt } = &*slot {
                (*generation, attempt.clone())
            } else {
                let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
                let attempt = connect(self.inner.clone(), generation).boxed().shared();
                *slot = Slot::Connecting {
                    generation,
                    attempt: attempt.clone(),
                };
                (generation, attempt)
            }
        };

        let outcome = attempt.await;

        let mut slot = self.inner.slot.lock();
        let current = matches!(&*slot, Slot::Connecting { generation: g, .. } if *g == generation);
        match outcome {
            Ok(transport) => {
                if current {
                    *slot = Slot::Ready {
                        transport: transport.clone(),
                    };
                }
                Ok(transport)
            }
            Err(e) => {
                if current {
                    *slot = Slot::Idle;
                }
                Err(e.into())
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        match &*self.inner.slot.lock() {
            Slot::Idle => ConnectionState::Disconnected,
            Slot::Connecting { .. } => ConnectionState::Connecting,
            Slot::Ready { transport } => transport.state(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Lifecycle events of the current transport, across replacements
    pub fn lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.lifecycle.subscribe()
    }

    /// Stops the held transport and resets to `Disconnected`.
    ///
    /// An attempt still in flight is abandoned; its waiters get the transport
    /// but the manager no longer holds it.
    pub async fn shutdown(&self) {
        let previous = std::mem::replace(&mut *self.inner.slot.lock(), Slot::Idle);
        match previous {
            Slot::Ready { transport } => {
                info!("stopping shared transport");
                transport.stop().await;
            }
            Slot::Connecting { generation, .. } => {
                debug!(generation, "abandoning in-flight connect attempt");
            }
            Slot::Idle => {}
        }
    }
}

async fn connect(
    inner: Arc<ManagerInner>,
    generation: u64,
) -> std::result::Result<Arc<dyn Transport>, ConnectionError> {
    let transport = inner.factory.create();
    // Subscribe before start so `Connected` is not missed
    tokio::spawn(forward_lifecycle(transport.lifecycle(), inner.lifecycle.clone()));

    let connect_timeout = inner.config.connect_timeout();
    debug!(generation, "starting transport");
    match timeout(connect_timeout, transport.start()).await {
        Ok(Ok(())) => {
            info!(generation, "transport connected");
            Ok(transport)
        }
        Ok(Err(e)) => {
            warn!(generation, "transport failed to start: {}", e);
            transport.stop().await;
            Err(ConnectionError::StartFailed(e.to_string()))
        }
        Err(_) => {
            warn!(generation, "transport start timed out after {:?}", connect_timeout);
            transport.stop().await;
            Err(ConnectionError::StartFailed(
                ConnectionError::Timeout(connect_timeout).to_string(),
            ))
        }
    }
}

async fn forward_lifecycle(
    mut from: broadcast::Receiver<LifecycleEvent>,
    to: broadcast::Sender<LifecycleEvent>,
) {
    loop {
        match from.recv().await {
            Ok(event) => {
                let terminal = matches!(event, LifecycleEvent::Closed(_));
                let _ = to.send(event);
                if terminal {
                    return;
                }
            }
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "lifecycle forwarder lagged"),
            Err(RecvError::Closed) => return,
        }
    }
}
