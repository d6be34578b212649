//! Accumulated result of a graph walk.

use crate::models::{ModelLabel, Record, RecordId, RecordKey};
use std::collections::{BTreeSet, HashMap};

/// Distinct record identities per model, in the order models were first met.
///
/// Identity is the primary key: adding a key that is already present is a
/// no-op, which is what keeps walks over cyclic graphs finite. Records that
/// were never persisted have no key; they are only counted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Collection {
    order: Vec<ModelLabel>,
    ids: HashMap<ModelLabel, BTreeSet<RecordId>>,
    unsaved: HashMap<ModelLabel, usize>,
}

impl Collection {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn touch(&mut self, model: &ModelLabel) {
        if !self.ids.contains_key(model) {
            self.order.push(model.clone());
            self.ids.insert(model.clone(), BTreeSet::new());
        }
    }

    /// Adds an identity. Returns `false` if it was already collected.
    pub fn add(&mut self, key: &RecordKey) -> bool {
        self.touch(&key.model);
        self.ids
            .get_mut(&key.model)
            .is_some_and(|ids| ids.insert(key.id))
    }

    /// Adds a record by identity, or counts it as unsaved when it has none.
    ///
    /// Returns `true` if the record was not collected before.
    pub fn add_record(&mut self, record: &Record) -> bool {
        if let Some(key) = record.key() {
            return self.add(&key);
        }
        self.touch(&record.model);
        *self.unsaved.entry(record.model.clone()).or_insert(0) += 1;
        true
    }

    /// Whether an identity has been collected.
    #[must_use]
    pub fn contains(&self, key: &RecordKey) -> bool {
        self.ids
            .get(&key.model)
            .is_some_and(|ids| ids.contains(&key.id))
    }

    /// Models in first-seen order.
    pub fn models(&self) -> impl Iterator<Item = &ModelLabel> {
        self.order.iter()
    }

    /// Collected ids of one model, ascending.
    #[must_use]
    pub fn ids(&self, model: &ModelLabel) -> Vec<RecordId> {
        self.ids
            .get(model)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Unsaved records met for one model.
    #[must_use]
    pub fn unsaved(&self, model: &ModelLabel) -> usize {
        self.unsaved.get(model).copied().unwrap_or(0)
    }

    /// All collected identities, model by model.
    pub fn keys(&self) -> impl Iterator<Item = RecordKey> + '_ {
        self.order.iter().flat_map(move |model| {
            self.ids
                .get(model)
                .into_iter()
                .flatten()
                .map(move |id| RecordKey::new(model.clone(), *id))
        })
    }

    /// Number of distinct persisted identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.values().map(BTreeSet::len).sum()
    }

    /// Returns `true` if nothing at all was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
