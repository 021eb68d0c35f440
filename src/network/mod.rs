//! Push transport abstraction
//!
//! A [`Transport`] is one persistent, multiplexed connection to the hub. Many
//! channels share it: each attached channel gets its own ordered stream of raw
//! frames, and per-channel snapshots are requested as finite reload streams.
//! The [`signalr`] module provides the WebSocket implementation.
pub mod signalr;

pub use signalr::SignalRTransport;
pub use signalr::SignalRTransportFactory;

use std::fmt;
use std::sync::Arc;

use futures::stream::BoxStream;
#[cfg(test)]
use mockall::automock;
use tokio::sync::broadcast;
use tokio::sync::mpsc;

use crate::RawFrame;
use crate::Result;

/// Finite stream of reload rows. Dropping it cancels the server-side
/// invocation.
pub type ReloadStream = BoxStream<'static, Result<RawFrame>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
        }
    }
}

/// Transport lifecycle notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Connected,
    /// Session lost, automatic reconnect in progress
    Reconnecting,
    /// Session restored after a loss. Attached channels keep flowing, but
    /// events emitted while disconnected are gone.
    Reconnected,
    /// Terminal: the transport gave up or was stopped
    Closed(Option<String>),
    Error(String),
}

#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Opens the connection. Resolves once the session is usable.
    ///
    /// # Errors
    /// - [`TransportError::Handshake`](crate::TransportError::Handshake) when the hub rejects the
    ///   session
    /// - [`TransportError::WebSocket`](crate::TransportError::WebSocket) on socket failures
    async fn start(&self) -> Result<()>;

    /// Closes the connection. Terminal: the transport will not reconnect.
    async fn stop(&self);

    fn state(&self) -> ConnectionState;

    /// Routes every frame addressed to `channel` to the returned receiver.
    ///
    /// A channel has at most one attachment; attaching again replaces the
    /// previous receiver.
    fn attach(
        &self,
        channel: &str,
    ) -> mpsc::UnboundedReceiver<RawFrame>;

    fn detach(
        &self,
        channel: &str,
    );

    /// Requests a full snapshot of `channel`.
    ///
    /// The stream yields `{op: "r", after}` frames and then ends. It fails if
    /// the session drops before completion.
    async fn reload(
        &self,
        channel: &str,
    ) -> Result<ReloadStream>;

    fn lifecycle(&self) -> broadcast::Receiver<LifecycleEvent>;
}

/// Creates fresh, not yet started transports
#[cfg_attr(test, automock)]
pub trait TransportFactory: Send + Sync + 'static {
    fn create(&self) -> Arc<dyn Transport>;
}
