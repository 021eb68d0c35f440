use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::Result;

/// How a completed reload is merged with live events that arrived while it
/// was in flight
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReloadMergePolicy {
    /// Replace the map with the snapshot. Live events received during the
    /// reload and absent from the snapshot are lost.
    #[default]
    Replace,

    /// Replace the map with the snapshot, then re-apply the live events
    /// received during the reload in arrival order.
    ReplayLive,
}

/// Consumer-side view behavior
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ViewConfig {
    /// Issue a fresh reload when the transport reports `Reconnected`
    #[serde(default = "default_reload_on_reconnect")]
    pub reload_on_reconnect: bool,

    #[serde(default)]
    pub reload_merge: ReloadMergePolicy,

    /// Delay between registration attempts of a view whose first attach
    /// failed. 0 disables retrying.
    #[serde(default = "default_attach_retry_ms")]
    pub attach_retry_ms: u64,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            reload_on_reconnect: default_reload_on_reconnect(),
            reload_merge: ReloadMergePolicy::default(),
            attach_retry_ms: default_attach_retry_ms(),
        }
    }
}

impl ViewConfig {
    pub fn validate(&self) -> Result<()> {
        #[cfg(debug_assertions)]
        if self.attach_retry_ms == 0 {
            tracing::warn!("attach_retry_ms is 0: views whose first attach fails stay on fallback data");
        }
        Ok(())
    }

    pub fn attach_retry(&self) -> Option<Duration> {
        (self.attach_retry_ms > 0).then(|| Duration::from_millis(self.attach_retry_ms))
    }
}

fn default_reload_on_reconnect() -> bool {
    true
}
fn default_attach_retry_ms() -> u64 {
    5000
}
