//! Field-name reconciliation of snapshot categories
//!
//! The push channels and the REST snapshot name the same fields differently.
//! Each category has a typed input union covering both shapes and one typed
//! output in the push shape, so consumers see identical records whichever
//! source fed the view.
use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::FallbackChannels;
use crate::Record;

/// Aggregate body of the snapshot endpoint, before normalization
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSnapshot {
    #[serde(default)]
    pub trending_items: Option<Vec<Value>>,
    #[serde(default, alias = "duplicateEntries")]
    pub duplicates: Option<Vec<Value>>,
    #[serde(default, alias = "inactive")]
    pub inactive_children: Option<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendingItem {
    pub item: String,
    pub frequency: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateEntry {
    pub child_id: String,
    pub item: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InactiveChild {
    pub child_id: String,
    pub name: String,
    pub days_inactive: u64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TrendingInput {
    Push {
        item: String,
        frequency: u64,
    },
    Pull {
        item: String,
        #[serde(rename = "requestCount", alias = "count")]
        request_count: u64,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DuplicateInput {
    Push {
        #[serde(rename = "childId", deserialize_with = "id")]
        child_id: String,
        item: String,
        count: u64,
    },
    Pull {
        #[serde(rename = "childId", deserialize_with = "id")]
        child_id: String,
        item: String,
        #[serde(rename = "duplicateCount")]
        duplicate_count: u64,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum InactiveInput {
    Push {
        #[serde(rename = "childId", deserialize_with = "id")]
        child_id: String,
        name: String,
        #[serde(rename = "daysInactive")]
        days_inactive: u64,
    },
    Pull {
        #[serde(rename = "childId", deserialize_with = "id")]
        child_id: String,
        #[serde(rename = "childName")]
        child_name: String,
        #[serde(rename = "lastActivityDays")]
        last_activity_days: u64,
    },
}

impl From<TrendingInput> for TrendingItem {
    fn from(input: TrendingInput) -> Self {
        match input {
            TrendingInput::Push { item, frequency } => TrendingItem { item, frequency },
            TrendingInput::Pull { item, request_count } => TrendingItem {
                item,
                frequency: request_count,
            },
        }
    }
}

impl From<DuplicateInput> for DuplicateEntry {
    fn from(input: DuplicateInput) -> Self {
        match input {
            DuplicateInput::Push { child_id, item, count } => DuplicateEntry { child_id, item, count },
            DuplicateInput::Pull {
                child_id,
                item,
                duplicate_count,
            } => DuplicateEntry {
                child_id,
                item,
                count: duplicate_count,
            },
        }
    }
}

impl From<InactiveInput> for InactiveChild {
    fn from(input: InactiveInput) -> Self {
        match input {
            InactiveInput::Push {
                child_id,
                name,
                days_inactive,
            } => InactiveChild {
                child_id,
                name,
                days_inactive,
            },
            InactiveInput::Pull {
                child_id,
                child_name,
                last_activity_days,
            } => InactiveChild {
                child_id,
                name: child_name,
                days_inactive: last_activity_days,
            },
        }
    }
}

/// Ids arrive as strings or numbers
fn id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("expected an id, got {}", other))),
    }
}

fn normalize<I, O>(
    category: &str,
    raw: Option<Vec<Value>>,
) -> Vec<O>
where
    I: DeserializeOwned + Into<O>,
{
    raw.unwrap_or_default()
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<I>(entry.clone()) {
            Ok(input) => Some(input.into()),
            Err(_) => {
                debug!(%category, %entry, "dropping snapshot entry of unknown shape");
                None
            }
        })
        .collect()
}

pub fn normalize_trending(raw: Option<Vec<Value>>) -> Vec<TrendingItem> {
    normalize::<TrendingInput, _>("trending", raw)
}

pub fn normalize_duplicates(raw: Option<Vec<Value>>) -> Vec<DuplicateEntry> {
    normalize::<DuplicateInput, _>("duplicates", raw)
}

pub fn normalize_inactive(raw: Option<Vec<Value>>) -> Vec<InactiveChild> {
    normalize::<InactiveInput, _>("inactive", raw)
}

/// Normalized rows keyed by channel name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FallbackSnapshot {
    channels: HashMap<String, Vec<Record>>,
}

impl FallbackSnapshot {
    pub fn from_raw(
        raw: RawSnapshot,
        names: &FallbackChannels,
    ) -> Self {
        let mut channels = HashMap::new();
        channels.insert(names.trending.clone(), to_records(normalize_trending(raw.trending_items)));
        channels.insert(names.duplicates.clone(), to_records(normalize_duplicates(raw.duplicates)));
        channels.insert(names.inactive.clone(), to_records(normalize_inactive(raw.inactive_children)));
        Self { channels }
    }

    /// Rows for `channel`; `None` when the snapshot does not cover it
    pub fn rows(
        &self,
        channel: &str,
    ) -> Option<&[Record]> {
        self.channels.get(channel).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.channels.values().all(Vec::is_empty)
    }
}

fn to_records<T: Serialize>(rows: Vec<T>) -> Vec<Record> {
    rows.into_iter()
        .filter_map(|row| match serde_json::to_value(row) {
            Ok(Value::Object(record)) => Some(record),
            _ => None,
        })
        .collect()
}
