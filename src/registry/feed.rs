use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use futures::Stream;
use tokio::sync::mpsc;
use tracing::trace;

use super::channels::RegistryInner;
use crate::ChangeEvent;

/// Cleanup state for a registered listener
struct ListenerCleanup {
    id: u64,
    channel: String,
    registry: Arc<RegistryInner>,
}

impl Drop for ListenerCleanup {
    fn drop(&mut self) {
        self.registry.unregister(&self.channel, self.id);
        trace!(listener = self.id, channel = %self.channel, "listener unregistered");
    }
}

/// One listener's ordered stream of decoded change events
///
/// Unregisters from the registry when dropped or closed.
pub struct ChangeFeed {
    receiver: mpsc::UnboundedReceiver<ChangeEvent>,
    cleanup: ListenerCleanup,
}

impl ChangeFeed {
    pub(super) fn new(
        registry: Arc<RegistryInner>,
        channel: &str,
        id: u64,
        receiver: mpsc::UnboundedReceiver<ChangeEvent>,
    ) -> Self {
        Self {
            receiver,
            cleanup: ListenerCleanup {
                id,
                channel: channel.to_string(),
                registry,
            },
        }
    }

    pub fn channel(&self) -> &str {
        &self.cleanup.channel
    }

    pub fn id(&self) -> u64 {
        self.cleanup.id
    }

    /// Next event, or `None` once the channel's relay is gone
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.receiver.recv().await
    }

    /// Unregisters the listener
    pub fn close(self) {
        drop(self)
    }
}

impl Stream for ChangeFeed {
    type Item = ChangeEvent;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
