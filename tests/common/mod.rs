use std::time::Duration;

use futures::SinkExt;
use futures::StreamExt;
use livequery::ConnectionConfig;
use livequery::LifecycleEvent;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

pub const SEPARATOR: char = '\u{1e}';
pub const WAIT: Duration = Duration::from_secs(3);

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
}

/// How the hub answers handshakes
#[derive(Clone, Copy)]
pub enum Handshake {
    Accept,
    Reject,
}

/// Local hub accepting WebSocket sessions on an ephemeral port
pub struct Hub {
    pub url: String,
    sessions: mpsc::UnboundedReceiver<Session>,
}

impl Hub {
    pub async fn start(handshake: Handshake) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/hub", listener.local_addr().unwrap());
        let (tx, sessions) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(mut ws) = accept_async(stream).await else {
                    continue;
                };
                if !answer_handshake(&mut ws, handshake).await {
                    continue;
                }
                if tx.send(Session { ws }).is_err() {
                    return;
                }
            }
        });

        Self { url, sessions }
    }

    /// Next session that completed the handshake
    pub async fn session(&mut self) -> Session {
        timeout(WAIT, self.sessions.recv())
            .await
            .expect("no session in time")
            .expect("hub stopped")
    }

    pub fn config(&self) -> ConnectionConfig {
        let mut config = ConnectionConfig {
            hub_url: self.url.clone(),
            ..ConnectionConfig::default()
        };
        config.reconnect.max_retries = 3;
        config.reconnect.base_delay_ms = 10;
        config.reconnect.max_delay_ms = 50;
        config.reconnect.timeout_ms = 1000;
        config
    }
}

async fn answer_handshake(
    ws: &mut WebSocketStream<TcpStream>,
    handshake: Handshake,
) -> bool {
    let Some(Ok(Message::Text(request))) = ws.next().await else {
        return false;
    };
    let request: Value = serde_json::from_str(request.trim_end_matches(SEPARATOR)).unwrap();
    assert_eq!(request["protocol"], "json");

    let reply = match handshake {
        Handshake::Accept => format!("{{}}{SEPARATOR}"),
        Handshake::Reject => format!("{{\"error\":\"protocol not supported\"}}{SEPARATOR}"),
    };
    ws.send(Message::Text(reply)).await.is_ok() && matches!(handshake, Handshake::Accept)
}

/// Server side of one hub session
pub struct Session {
    ws: WebSocketStream<TcpStream>,
}

impl Session {
    pub async fn send(
        &mut self,
        message: Value,
    ) {
        self.ws
            .send(Message::Text(format!("{message}{SEPARATOR}")))
            .await
            .unwrap();
    }

    /// Next client message that is not a keep-alive ping
    pub async fn recv(&mut self) -> Value {
        timeout(WAIT, async {
            loop {
                match self.ws.next().await {
                    Some(Ok(Message::Text(text))) => {
                        for frame in text.split(SEPARATOR).filter(|f| !f.is_empty()) {
                            let message: Value = serde_json::from_str(frame).unwrap();
                            if message["type"] != 6 {
                                return message;
                            }
                        }
                    }
                    Some(Ok(_)) => continue,
                    other => panic!("session ended: {:?}", other),
                }
            }
        })
        .await
        .expect("no client message in time")
    }

    /// Drops the socket without a close handshake
    pub fn kill(self) {
        drop(self.ws);
    }
}

/// Waits for the first lifecycle event matching `pred`
pub async fn next_matching(
    events: &mut broadcast::Receiver<LifecycleEvent>,
    pred: impl Fn(&LifecycleEvent) -> bool,
) -> LifecycleEvent {
    timeout(WAIT, async {
        loop {
            let event = events.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("lifecycle event not observed in time")
}
