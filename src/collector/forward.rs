//! Forward collector: required ancestors of the roots.

use super::{Collection, Collector};
use crate::models::{Record, RecordKey};
use crate::storage::RecordStore;
use crate::Result;
use std::collections::VecDeque;
use tracing::{debug, instrument};

/// Collects the roots and, transitively, every row they reference through a
/// required (non-null) one-to-one or many-to-one relation.
///
/// Restoring a row must bring back the rows it cannot exist without; an
/// optional parent is not forced back. The walk is an explicit worklist and
/// an identity is queued at most once, so cyclic graphs terminate.
pub struct ForwardRelatedCollector<'s> {
    store: &'s dyn RecordStore,
    collection: Collection,
}

impl<'s> ForwardRelatedCollector<'s> {
    /// Creates an empty collector over `store`.
    #[must_use]
    pub fn new(store: &'s dyn RecordStore) -> Self {
        Self {
            store,
            collection: Collection::new(),
        }
    }
}

impl Collector for ForwardRelatedCollector<'_> {
    #[instrument(name = "lazarus.collector.forward", skip_all, fields(roots = roots.len()))]
    fn collect(&mut self, roots: &[Record]) -> Result<()> {
        let registry = self.store.registry();
        let mut queue: VecDeque<Record> = VecDeque::new();

        for root in roots {
            if self.collection.add_record(root) {
                queue.push_back(root.clone());
            }
        }

        while let Some(record) = queue.pop_front() {
            let meta = registry.model(&record.model)?;
            for relation in meta.forward_relations() {
                if !relation.is_forward_candidate() || relation.nullable {
                    continue;
                }
                let Some(id) = record.reference(&relation.name) else {
                    continue;
                };
                let key = RecordKey::new(relation.related_model.clone(), id);
                if self.collection.contains(&key) {
                    continue;
                }
                match self.store.get(&key.model, key.id)? {
                    Some(parent) => {
                        self.collection.add(&key);
                        queue.push_back(parent);
                    },
                    None => debug!(key = %key, "Referenced row is missing"),
                }
            }
        }

        debug!(collected = self.collection.len(), "Forward walk finished");
        Ok(())
    }

    fn collection(&self) -> &Collection {
        &self.collection
    }

    fn store(&self) -> &dyn RecordStore {
        self.store
    }
}
