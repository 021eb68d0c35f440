use std::fmt;

use super::Record;

/// Structural identity of a record
///
/// Records carry no stable upstream id, so the key is the canonical
/// serialization of the full content: object keys sorted recursively, no
/// insignificant whitespace. Two records with the same content share a key
/// even when their fields arrived in a different order.
///
/// Sorting comes from `serde_json::Map` being a `BTreeMap`, which holds only
/// while the `preserve_order` feature stays off for the whole build.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityKey(String);

impl EntityKey {
    pub fn of(record: &Record) -> Self {
        // A map of `Value`s always serializes
        EntityKey(serde_json::to_string(record).unwrap_or_default())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityKey {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.0)
    }
}
