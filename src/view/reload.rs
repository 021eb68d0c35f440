use futures::StreamExt;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::MaterializedMap;
use crate::metrics::RELOADS;
use crate::ChangeEvent;
use crate::RawFrame;
use crate::Record;
use crate::ReloadMergePolicy;
use crate::ReloadStream;
use crate::Result;
use crate::Transport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// The map was replaced by this many snapshot records
    Replaced(usize),
    /// The snapshot was empty; the map was left untouched
    Retained,
    /// The request or its stream failed; the map was left untouched
    Failed(String),
}

impl ReloadOutcome {
    fn label(&self) -> &'static str {
        match self {
            ReloadOutcome::Replaced(_) => "replaced",
            ReloadOutcome::Retained => "retained",
            ReloadOutcome::Failed(_) => "failed",
        }
    }
}

/// One consumer's in-flight snapshot of a channel
///
/// Rows are collected in a side buffer, never in the live map, until the
/// stream completes. Dropping the session drops the stream, which cancels
/// the request for this consumer only.
pub struct ReloadSession {
    channel: String,
    policy: ReloadMergePolicy,
    rows: Option<ReloadStream>,
    buffer: Vec<Record>,
    live: Vec<ChangeEvent>,
    failure: Option<String>,
}

impl ReloadSession {
    /// Requests the snapshot. A failed request yields a session that is
    /// already finished.
    pub async fn start(
        transport: &dyn Transport,
        channel: &str,
        policy: ReloadMergePolicy,
    ) -> Self {
        let (rows, failure) = match transport.reload(channel).await {
            Ok(rows) => {
                debug!(%channel, "reload started");
                (Some(rows), None)
            }
            Err(e) => {
                warn!(%channel, "reload request failed: {}", e);
                (None, Some(e.to_string()))
            }
        };
        Self {
            channel: channel.to_string(),
            policy,
            rows,
            buffer: Vec::new(),
            live: Vec::new(),
            failure,
        }
    }

    /// Next raw item, `None` once the snapshot is complete
    pub async fn next(&mut self) -> Option<Result<RawFrame>> {
        match self.rows.as_mut() {
            Some(rows) => rows.next().await,
            None => None,
        }
    }

    pub fn on_item(
        &mut self,
        item: Result<RawFrame>,
    ) {
        let frame = match item {
            Ok(frame) => frame,
            Err(e) => {
                warn!(channel = %self.channel, "reload stream failed: {}", e);
                self.failure = Some(e.to_string());
                self.rows = None;
                return;
            }
        };
        match ChangeEvent::from_frame(frame) {
            Ok(ChangeEvent { after: Some(after), .. }) => self.buffer.push(after),
            Ok(event) => debug!(channel = %self.channel, op = %event.op, "skipping reload row without payload"),
            Err(e) => warn!(channel = %self.channel, "skipping malformed reload row: {}", e),
        }
    }

    /// Records a live event that arrived while the snapshot was in flight
    pub fn on_live(
        &mut self,
        event: &ChangeEvent,
    ) {
        if self.policy == ReloadMergePolicy::ReplayLive {
            self.live.push(event.clone());
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Merges the snapshot into `map` according to the policy
    pub fn finish(
        self,
        map: &mut MaterializedMap,
    ) -> ReloadOutcome {
        let outcome = if let Some(reason) = self.failure {
            ReloadOutcome::Failed(reason)
        } else if self.buffer.is_empty() {
            ReloadOutcome::Retained
        } else {
            let count = self.buffer.len();
            map.replace_with(self.buffer);
            for event in &self.live {
                map.apply(event);
            }
            ReloadOutcome::Replaced(count)
        };

        RELOADS.with_label_values(&[&self.channel, outcome.label()]).inc();
        info!(channel = %self.channel, ?outcome, "reload finished");
        outcome
    }
}
