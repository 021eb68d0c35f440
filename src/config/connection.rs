use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;
use url::Url;

use super::BackoffPolicy;
use crate::Error;
use crate::Result;

/// Push connection parameters
///
/// Controls how the shared hub transport is established, kept alive and
/// recovered after a connection loss.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConnectionConfig {
    /// WebSocket endpoint of the hub (`ws://` or `wss://`)
    /// Default: ws://localhost:8080/hub
    #[serde(default = "default_hub_url")]
    pub hub_url: String,

    /// Maximum time to wait for the transport to start, handshake included
    /// Default: 5 seconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Interval between protocol pings sent to the hub
    /// Default: 15 seconds
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,

    /// Hub method that streams a channel's full result set
    /// Default: "reload"
    #[serde(default = "default_reload_method")]
    pub reload_method: String,

    /// Auto-reconnect policy used by the transport after a connection loss
    #[serde(default)]
    pub reconnect: BackoffPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            hub_url: default_hub_url(),
            connect_timeout_ms: default_connect_timeout_ms(),
            keepalive_interval_ms: default_keepalive_interval_ms(),
            reload_method: default_reload_method(),
            reconnect: BackoffPolicy::default(),
        }
    }
}

impl ConnectionConfig {
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.hub_url)
            .map_err(|e| Error::InvalidConfig(format!("hub_url {:?} is not a valid url: {}", self.hub_url, e)))?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(Error::InvalidConfig(format!(
                "hub_url must use ws:// or wss://, got {}",
                url.scheme()
            )));
        }

        if self.connect_timeout_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "connect_timeout_ms must be greater than 0".into(),
            )));
        }

        if self.keepalive_interval_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "keepalive_interval_ms must be greater than 0".into(),
            )));
        }

        if self.reload_method.trim().is_empty() {
            return Err(Error::InvalidConfig("reload_method cannot be empty".into()));
        }

        self.reconnect.validate()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }
}

fn default_hub_url() -> String {
    "ws://localhost:8080/hub".to_string()
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_keepalive_interval_ms() -> u64 {
    15_000
}
fn default_reload_method() -> String {
    "reload".to_string()
}
