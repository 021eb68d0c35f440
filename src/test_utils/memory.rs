use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::ConnectionState;
use crate::LifecycleEvent;
use crate::RawFrame;
use crate::ReloadStream;
use crate::Result;
use crate::Transport;
use crate::TransportError;
use crate::TransportFactory;

/// Scripted answer to the next `reload` of a channel
pub enum ReloadScript {
    Rows(Vec<RawFrame>),
    /// The request itself fails
    Reject(String),
    /// Rows are fed by the test through the paired sender; the stream ends
    /// when the sender is dropped
    Manual(mpsc::UnboundedReceiver<Result<RawFrame>>),
}

/// In-process [`Transport`] driven by the test
pub struct MemoryTransport {
    state: Mutex<ConnectionState>,
    channels: DashMap<String, mpsc::UnboundedSender<RawFrame>>,
    reloads: Mutex<HashMap<String, VecDeque<ReloadScript>>>,
    reload_calls: DashMap<String, usize>,
    lifecycle: broadcast::Sender<LifecycleEvent>,
    start_delay: Duration,
    start_error: Option<String>,
    starts: AtomicUsize,
    attaches: AtomicUsize,
    detaches: AtomicUsize,
    stops: AtomicUsize,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        let (lifecycle, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(ConnectionState::Disconnected),
            channels: DashMap::new(),
            reloads: Mutex::new(HashMap::new()),
            reload_calls: DashMap::new(),
            lifecycle,
            start_delay: Duration::ZERO,
            start_error: None,
            starts: AtomicUsize::new(0),
            attaches: AtomicUsize::new(0),
            detaches: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        }
    }

    pub fn with_start_delay(
        mut self,
        delay: Duration,
    ) -> Self {
        self.start_delay = delay;
        self
    }

    pub fn failing_start(
        mut self,
        reason: &str,
    ) -> Self {
        self.start_error = Some(reason.to_string());
        self
    }

    /// Delivers a frame to the channel's attachment. Returns false when the
    /// channel is not attached.
    pub fn push(
        &self,
        channel: &str,
        frame: RawFrame,
    ) -> bool {
        match self.channels.get(channel) {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    pub fn script_reload(
        &self,
        channel: &str,
        script: ReloadScript,
    ) {
        self.reloads
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push_back(script);
    }

    /// Scripts a reload whose rows the test feeds by hand
    pub fn manual_reload(
        &self,
        channel: &str,
    ) -> mpsc::UnboundedSender<Result<RawFrame>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.script_reload(channel, ReloadScript::Manual(rx));
        tx
    }

    pub fn set_state(
        &self,
        state: ConnectionState,
    ) {
        *self.state.lock() = state;
    }

    pub fn emit(
        &self,
        event: LifecycleEvent,
    ) {
        let _ = self.lifecycle.send(event);
    }

    pub fn is_attached(
        &self,
        channel: &str,
    ) -> bool {
        self.channels.contains_key(channel)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn attaches(&self) -> usize {
        self.attaches.load(Ordering::SeqCst)
    }

    pub fn detaches(&self) -> usize {
        self.detaches.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn reload_calls(
        &self,
        channel: &str,
    ) -> usize {
        self.reload_calls.get(channel).map(|c| *c).unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    async fn start(&self) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.set_state(ConnectionState::Connecting);
        if !self.start_delay.is_zero() {
            tokio::time::sleep(self.start_delay).await;
        }
        if let Some(reason) = &self.start_error {
            self.set_state(ConnectionState::Disconnected);
            return Err(TransportError::Handshake(reason.clone()).into());
        }
        self.set_state(ConnectionState::Connected);
        self.emit(LifecycleEvent::Connected);
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        let was = std::mem::replace(&mut *self.state.lock(), ConnectionState::Disconnected);
        if was != ConnectionState::Disconnected {
            self.emit(LifecycleEvent::Closed(None));
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn attach(
        &self,
        channel: &str,
    ) -> mpsc::UnboundedReceiver<RawFrame> {
        self.attaches.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels.insert(channel.to_string(), tx);
        rx
    }

    fn detach(
        &self,
        channel: &str,
    ) {
        self.detaches.fetch_add(1, Ordering::SeqCst);
        self.channels.remove(channel);
    }

    async fn reload(
        &self,
        channel: &str,
    ) -> Result<ReloadStream> {
        *self.reload_calls.entry(channel.to_string()).or_insert(0) += 1;
        if self.state() != ConnectionState::Connected {
            return Err(TransportError::NotConnected.into());
        }

        let script = self.reloads.lock().get_mut(channel).and_then(VecDeque::pop_front);
        match script {
            None => Ok(futures::stream::empty().boxed()),
            Some(ReloadScript::Rows(rows)) => Ok(futures::stream::iter(rows.into_iter().map(Ok)).boxed()),
            Some(ReloadScript::Reject(reason)) => Err(TransportError::ReloadFailed {
                channel: channel.to_string(),
                reason,
            }
            .into()),
            Some(ReloadScript::Manual(rx)) => Ok(UnboundedReceiverStream::new(rx).boxed()),
        }
    }

    fn lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle.subscribe()
    }
}

/// Factory handing out [`MemoryTransport`]s and remembering them
pub struct MemoryTransportFactory {
    make: Box<dyn Fn(usize) -> MemoryTransport + Send + Sync>,
    created: Mutex<Vec<Arc<MemoryTransport>>>,
}

impl MemoryTransportFactory {
    pub fn new() -> Self {
        Self::with(|_| MemoryTransport::new())
    }

    /// `make` receives the number of transports created so far
    pub fn with(make: impl Fn(usize) -> MemoryTransport + Send + Sync + 'static) -> Self {
        Self {
            make: Box::new(make),
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn created(&self) -> usize {
        self.created.lock().len()
    }

    pub fn last(&self) -> Option<Arc<MemoryTransport>> {
        self.created.lock().last().cloned()
    }
}

impl TransportFactory for MemoryTransportFactory {
    fn create(&self) -> Arc<dyn Transport> {
        let mut created = self.created.lock();
        let transport = Arc::new((self.make)(created.len()));
        created.push(transport.clone());
        transport
    }
}
