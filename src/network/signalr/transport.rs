use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use futures::SinkExt;
use futures::Stream;
use futures::StreamExt;
use nanoid::nanoid;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::interval_at;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::protocol::handshake_request;
use super::protocol::parse_handshake;
use super::protocol::split_frames;
use super::protocol::HubMessage;
use crate::async_task::task_with_timeout_and_exponential_backoff;
use crate::ConnectionConfig;
use crate::ConnectionState;
use crate::LifecycleEvent;
use crate::RawFrame;
use crate::ReloadStream;
use crate::Result;
use crate::Transport;
use crate::TransportError;
use crate::TransportFactory;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const LIFECYCLE_CAPACITY: usize = 64;

/// [`Transport`] over the JSON hub protocol
///
/// One WebSocket session multiplexes every attached channel: server
/// invocations whose `target` names an attached channel are routed to that
/// channel's receiver, and reloads are server-to-client streams keyed by
/// invocation id. A lost session is re-established in the background with the
/// configured backoff; attachments are kept across sessions.
pub struct SignalRTransport {
    inner: Arc<Inner>,
}

struct Inner {
    config: ConnectionConfig,
    state: Mutex<ConnectionState>,
    channels: DashMap<String, mpsc::UnboundedSender<RawFrame>>,
    streams: DashMap<String, PendingReload>,
    outbound: ArcSwapOption<mpsc::UnboundedSender<Message>>,
    lifecycle: broadcast::Sender<LifecycleEvent>,
    stop: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

struct PendingReload {
    channel: String,
    tx: mpsc::UnboundedSender<Result<RawFrame>>,
}

enum SessionEnd {
    Stopped,
    Closed { error: Option<String>, allow_reconnect: bool },
    Lost(String),
}

impl SignalRTransport {
    pub fn new(config: ConnectionConfig) -> Self {
        let (lifecycle, _) = broadcast::channel(LIFECYCLE_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(ConnectionState::Disconnected),
                channels: DashMap::new(),
                streams: DashMap::new(),
                outbound: ArcSwapOption::empty(),
                lifecycle,
                stop: CancellationToken::new(),
                supervisor: Mutex::new(None),
            }),
        }
    }
}

impl Drop for SignalRTransport {
    fn drop(&mut self) {
        self.inner.stop.cancel();
    }
}

#[async_trait::async_trait]
impl Transport for SignalRTransport {
    async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.stop.is_cancelled() {
            return Err(TransportError::Closed("transport was stopped".to_string()).into());
        }
        {
            let mut state = inner.state.lock();
            match *state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Connecting => {
                    return Err(TransportError::Protocol("start already in progress".to_string()).into())
                }
                ConnectionState::Disconnected => *state = ConnectionState::Connecting,
            }
        }

        match connect_session(inner).await {
            Ok((ws, leftover)) => {
                let outbound = inner.open_outbound();
                inner.set_state(ConnectionState::Connected);
                info!(url = %inner.config.hub_url, "hub session established");
                inner.emit(LifecycleEvent::Connected);
                let handle = tokio::spawn(supervise(inner.clone(), ws, leftover, outbound));
                *inner.supervisor.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                inner.set_state(ConnectionState::Disconnected);
                warn!(url = %inner.config.hub_url, "hub connect failed: {}", e);
                Err(e)
            }
        }
    }

    async fn stop(&self) {
        self.inner.stop.cancel();
        let supervisor = self.inner.supervisor.lock().take();
        match supervisor {
            Some(handle) => {
                if let Err(e) = handle.await {
                    error!("hub supervisor ended abnormally: {:?}", e);
                }
            }
            None => self.inner.set_state(ConnectionState::Disconnected),
        }
    }

    fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    fn attach(
        &self,
        channel: &str,
    ) -> mpsc::UnboundedReceiver<RawFrame> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.inner.channels.insert(channel.to_string(), tx).is_some() {
            debug!(%channel, "replaced existing attachment");
        }
        rx
    }

    fn detach(
        &self,
        channel: &str,
    ) {
        self.inner.channels.remove(channel);
    }

    async fn reload(
        &self,
        channel: &str,
    ) -> Result<ReloadStream> {
        let outbound = self.inner.outbound.load_full().ok_or(TransportError::NotConnected)?;

        let invocation_id = nanoid!();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.streams.insert(
            invocation_id.clone(),
            PendingReload {
                channel: channel.to_string(),
                tx,
            },
        );

        let request = HubMessage::StreamInvocation {
            invocation_id: invocation_id.clone(),
            target: self.inner.config.reload_method.clone(),
            arguments: vec![Value::String(channel.to_string())],
        };
        if outbound.send(Message::Text(request.encode())).is_err() {
            self.inner.streams.remove(&invocation_id);
            return Err(TransportError::NotConnected.into());
        }
        debug!(%channel, %invocation_id, "reload requested");

        Ok(Box::pin(InvocationStream {
            inner: self.inner.clone(),
            invocation_id,
            rx,
            completed: false,
        }))
    }

    fn lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.lifecycle.subscribe()
    }
}

impl Inner {
    /// Installs the sender of the next session. Messages queued before the
    /// session loop runs are flushed by it in order.
    fn open_outbound(&self) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.outbound.store(Some(Arc::new(tx)));
        rx
    }

    fn set_state(
        &self,
        state: ConnectionState,
    ) {
        *self.state.lock() = state;
    }

    fn emit(
        &self,
        event: LifecycleEvent,
    ) {
        // No receivers is fine
        let _ = self.lifecycle.send(event);
    }

    fn finish(
        &self,
        error: Option<String>,
    ) {
        self.set_state(ConnectionState::Disconnected);
        self.emit(LifecycleEvent::Closed(error));
    }

    fn fail_streams(
        &self,
        reason: &str,
    ) {
        self.streams.retain(|_, pending| {
            let _ = pending.tx.send(Err(TransportError::Closed(reason.to_string()).into()));
            false
        });
    }

    fn dispatch(
        &self,
        frame: &str,
    ) -> Option<SessionEnd> {
        let message = match HubMessage::parse(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!("skipping hub message: {}", e);
                return None;
            }
        };

        match message {
            HubMessage::Invocation { target, mut arguments } => match self.channels.get(&target) {
                Some(tx) => {
                    if arguments.is_empty() {
                        warn!(channel = %target, "invocation without arguments");
                        return None;
                    }
                    if tx.send(arguments.swap_remove(0)).is_err() {
                        debug!(channel = %target, "attachment receiver dropped");
                    }
                }
                None => trace!(channel = %target, "no attachment, dropping invocation"),
            },
            HubMessage::StreamItem { invocation_id, item } => {
                if let Some(pending) = self.streams.get(&invocation_id) {
                    let _ = pending.tx.send(Ok(item));
                }
            }
            HubMessage::Completion { invocation_id, error } => {
                if let Some((_, pending)) = self.streams.remove(&invocation_id) {
                    if let Some(reason) = error {
                        let _ = pending.tx.send(Err(TransportError::ReloadFailed {
                            channel: pending.channel.clone(),
                            reason,
                        }
                        .into()));
                    }
                }
            }
            HubMessage::Ping => trace!("hub ping"),
            HubMessage::Close { error, allow_reconnect } => {
                return Some(SessionEnd::Closed { error, allow_reconnect });
            }
            other => debug!("ignoring hub message: {:?}", other),
        }
        None
    }
}

async fn connect_session(inner: &Inner) -> Result<(WsStream, String)> {
    debug!(url = %inner.config.hub_url, "connecting to hub");
    let (mut ws, _) = connect_async(inner.config.hub_url.as_str()).await?;
    ws.send(Message::Text(handshake_request())).await?;

    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                let leftover = parse_handshake(&text)?.to_string();
                return Ok((ws, leftover));
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(Message::Close(frame))) => {
                return Err(TransportError::Closed(format!("closed during handshake: {:?}", frame)).into())
            }
            Some(Ok(other)) => {
                return Err(TransportError::Handshake(format!("unexpected message: {:?}", other)).into())
            }
            Some(Err(e)) => return Err(e.into()),
            None => return Err(TransportError::Closed("socket ended during handshake".to_string()).into()),
        }
    }
}

async fn run_session(
    inner: &Inner,
    ws: WsStream,
    leftover: String,
    mut out_rx: mpsc::UnboundedReceiver<Message>,
) -> SessionEnd {
    let (mut sink, mut source) = ws.split();

    for frame in split_frames(&leftover) {
        if let Some(end) = inner.dispatch(frame) {
            return end;
        }
    }

    let period = inner.config.keepalive_interval();
    let mut keepalive = interval_at(Instant::now() + period, period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = inner.stop.cancelled() => {
                let close = HubMessage::Close { error: None, allow_reconnect: false };
                let _ = sink.send(Message::Text(close.encode())).await;
                let _ = sink.close().await;
                return SessionEnd::Stopped;
            }
            Some(message) = out_rx.recv() => {
                if let Err(e) = sink.send(message).await {
                    return SessionEnd::Lost(e.to_string());
                }
            }
            _ = keepalive.tick() => {
                if let Err(e) = sink.send(Message::Text(HubMessage::Ping.encode())).await {
                    return SessionEnd::Lost(e.to_string());
                }
            }
            incoming = source.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    for frame in split_frames(&text) {
                        if let Some(end) = inner.dispatch(frame) {
                            return end;
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    return SessionEnd::Lost(format!("socket closed by peer: {:?}", frame));
                }
                Some(Ok(Message::Binary(_))) => warn!("ignoring binary hub message"),
                Some(Ok(_)) => {}
                Some(Err(e)) => return SessionEnd::Lost(e.to_string()),
                None => return SessionEnd::Lost("socket ended".to_string()),
            }
        }
    }
}

/// Runs sessions back to back until the transport is stopped, the hub closes
/// without allowing reconnects, or reconnecting gives up.
async fn supervise(
    inner: Arc<Inner>,
    mut ws: WsStream,
    mut leftover: String,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) {
    loop {
        let end = run_session(&inner, ws, leftover, outbound).await;
        inner.outbound.store(None);

        match end {
            SessionEnd::Stopped => {
                inner.fail_streams("transport stopped");
                inner.finish(None);
                info!("hub session stopped");
                return;
            }
            SessionEnd::Closed {
                error,
                allow_reconnect: false,
            } => {
                inner.fail_streams("hub closed the session");
                info!("hub closed the session: {:?}", error);
                inner.finish(error);
                return;
            }
            SessionEnd::Closed {
                error,
                allow_reconnect: true,
            } => {
                inner.fail_streams("hub closed the session");
                warn!("hub closed the session, reconnecting: {:?}", error);
            }
            SessionEnd::Lost(reason) => {
                inner.fail_streams(&reason);
                warn!("hub connection lost, reconnecting: {}", reason);
            }
        }

        inner.set_state(ConnectionState::Connecting);
        inner.emit(LifecycleEvent::Reconnecting);

        tokio::select! {
            _ = inner.stop.cancelled() => {
                inner.finish(None);
                return;
            }
            result = task_with_timeout_and_exponential_backoff(|| connect_session(&inner), inner.config.reconnect) => {
                match result {
                    Ok((next_ws, next_leftover)) => {
                        ws = next_ws;
                        leftover = next_leftover;
                        outbound = inner.open_outbound();
                        inner.set_state(ConnectionState::Connected);
                        info!("hub session re-established");
                        inner.emit(LifecycleEvent::Reconnected);
                    }
                    Err(e) => {
                        error!("giving up on hub reconnect: {}", e);
                        inner.emit(LifecycleEvent::Error(e.to_string()));
                        inner.finish(Some(e.to_string()));
                        return;
                    }
                }
            }
        }
    }
}

/// Reload rows of one stream invocation
///
/// Ends when the hub completes the invocation. Dropping it before then
/// cancels the invocation on the hub.
struct InvocationStream {
    inner: Arc<Inner>,
    invocation_id: String,
    rx: mpsc::UnboundedReceiver<Result<RawFrame>>,
    completed: bool,
}

impl Stream for InvocationStream {
    type Item = Result<RawFrame>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        match self.rx.poll_recv(cx) {
            Poll::Ready(None) => {
                self.completed = true;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl Drop for InvocationStream {
    fn drop(&mut self) {
        if self.completed || self.inner.streams.remove(&self.invocation_id).is_none() {
            return;
        }
        if let Some(outbound) = self.inner.outbound.load_full() {
            let cancel = HubMessage::CancelInvocation {
                invocation_id: self.invocation_id.clone(),
            };
            let _ = outbound.send(Message::Text(cancel.encode()));
            debug!(invocation_id = %self.invocation_id, "reload cancelled");
        }
    }
}

/// Builds [`SignalRTransport`]s for the configured hub
pub struct SignalRTransportFactory {
    config: ConnectionConfig,
}

impl SignalRTransportFactory {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }
}

impl TransportFactory for SignalRTransportFactory {
    fn create(&self) -> Arc<dyn Transport> {
        Arc::new(SignalRTransport::new(self.config.clone()))
    }
}
