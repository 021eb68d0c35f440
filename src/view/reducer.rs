use std::collections::BTreeMap;

use crate::ChangeEvent;
use crate::EntityKey;
use crate::Op;
use crate::Record;

/// Locally materialized result set of one channel, keyed by content
///
/// Only [`apply`](Self::apply) and a completed reload write it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaterializedMap(BTreeMap<EntityKey, Record>);

impl MaterializedMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(
        &self,
        record: &Record,
    ) -> bool {
        self.0.contains_key(&EntityKey::of(record))
    }

    /// Records in key order
    pub fn values(&self) -> impl Iterator<Item = &Record> {
        self.0.values()
    }

    /// Applies one live operation. Returns whether the map changed.
    ///
    /// - insert: upserts `after`
    /// - update: removes `before`, then upserts `after`
    /// - delete: removes `before`
    /// - control `cleared`: empties the map; other control kinds are no-ops
    /// - reload rows are not live operations and are ignored
    ///
    /// Absent payloads make the corresponding step a no-op. An update whose
    /// `before` arrives after a newer `after` of the same entity is not
    /// reconciled.
    pub fn apply(
        &mut self,
        event: &ChangeEvent,
    ) -> bool {
        match event.op {
            Op::Insert => self.upsert(event.after.as_ref()),
            Op::Update => {
                let before = event.before.as_ref().map(EntityKey::of);
                let after = event.after.as_ref().map(EntityKey::of);
                if before.is_some() && before == after {
                    return self.upsert(event.after.as_ref());
                }
                let removed = before.map(|key| self.0.remove(&key).is_some()).unwrap_or(false);
                let added = self.upsert(event.after.as_ref());
                removed || added
            }
            Op::Delete => event
                .before
                .as_ref()
                .map(|before| self.0.remove(&EntityKey::of(before)).is_some())
                .unwrap_or(false),
            Op::Control => {
                if event.is_cleared() && !self.0.is_empty() {
                    self.0.clear();
                    true
                } else {
                    false
                }
            }
            Op::Reload => false,
        }
    }

    /// Replaces the whole content with a reload snapshot
    pub(super) fn replace_with(
        &mut self,
        records: Vec<Record>,
    ) {
        self.0 = records.into_iter().map(|r| (EntityKey::of(&r), r)).collect();
    }

    fn upsert(
        &mut self,
        record: Option<&Record>,
    ) -> bool {
        match record {
            Some(record) => self.0.insert(EntityKey::of(record), record.clone()).is_none(),
            None => false,
        }
    }
}

/// Pure form of [`MaterializedMap::apply`]
pub fn reduce(
    mut map: MaterializedMap,
    event: &ChangeEvent,
) -> MaterializedMap {
    map.apply(event);
    map
}
