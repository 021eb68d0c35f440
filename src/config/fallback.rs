use std::collections::HashSet;
use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;
use url::Url;

use crate::Error;
use crate::Result;

/// REST snapshot polling used while live channels are still empty
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FallbackConfig {
    /// Disable to rely on the push channel only
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Aggregate snapshot endpoint (`http://` or `https://`)
    #[serde(default = "default_url")]
    pub url: String,

    /// Interval between two polls
    /// Default: 10 seconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Per-request timeout
    /// Default: 5 seconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Channel each snapshot category is published under
    #[serde(default)]
    pub channels: FallbackChannels,
}

/// Maps the snapshot endpoint's categories onto push channel names
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FallbackChannels {
    #[serde(default = "default_trending_channel")]
    pub trending: String,

    #[serde(default = "default_duplicates_channel")]
    pub duplicates: String,

    #[serde(default = "default_inactive_channel")]
    pub inactive: String,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            url: default_url(),
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            channels: FallbackChannels::default(),
        }
    }
}

impl Default for FallbackChannels {
    fn default() -> Self {
        Self {
            trending: default_trending_channel(),
            duplicates: default_duplicates_channel(),
            inactive: default_inactive_channel(),
        }
    }
}

impl FallbackConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let url = Url::parse(&self.url)
            .map_err(|e| Error::InvalidConfig(format!("fallback url {:?} is not a valid url: {}", self.url, e)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(Error::InvalidConfig(format!(
                "fallback url must use http:// or https://, got {}",
                url.scheme()
            )));
        }

        if self.poll_interval_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "poll_interval_ms must be greater than 0".into(),
            )));
        }

        if self.request_timeout_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "request_timeout_ms must be greater than 0".into(),
            )));
        }

        self.channels.validate()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl FallbackChannels {
    pub fn validate(&self) -> Result<()> {
        let names = [&self.trending, &self.duplicates, &self.inactive];
        if names.iter().any(|n| n.trim().is_empty()) {
            return Err(Error::InvalidConfig("fallback channel names cannot be empty".into()));
        }

        let unique: HashSet<&String> = names.iter().copied().collect();
        if unique.len() != names.len() {
            return Err(Error::InvalidConfig(format!(
                "fallback channel names must be distinct: {:?}",
                names
            )));
        }
        Ok(())
    }
}

fn default_enabled() -> bool {
    true
}
fn default_url() -> String {
    "http://localhost:5000/api/dashboard/snapshot".to_string()
}
fn default_poll_interval_ms() -> u64 {
    10_000
}
fn default_request_timeout_ms() -> u64 {
    5000
}
fn default_trending_channel() -> String {
    "wishlist-trending-1h".to_string()
}
fn default_duplicates_channel() -> String {
    "wishlist-duplicates-by-child".to_string()
}
fn default_inactive_channel() -> String {
    "inactive-children".to_string()
}
