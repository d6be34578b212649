//! Reverse collector: dependents that would cascade from the roots.

use super::{Collection, Collector, propagate};
use crate::clock::Clock;
use crate::models::{Changes, PropagationResult, Record};
use crate::storage::{RecordStore, cascade};
use crate::Result;
use tracing::{debug, instrument};

/// Collects the roots and every row a cascading hard delete of them would
/// reach, join rows of many-to-many relations included.
///
/// With [`including_optional`](Self::including_optional), relations that
/// would not cascade (protect, set-null, do-nothing) are followed as well;
/// restoring "with related" uses this.
pub struct ReverseRelatedCollector<'s> {
    store: &'s dyn RecordStore,
    include_optional: bool,
    collection: Collection,
    protected: Collection,
}

impl<'s> ReverseRelatedCollector<'s> {
    /// Creates an empty collector over `store`.
    #[must_use]
    pub fn new(store: &'s dyn RecordStore) -> Self {
        Self {
            store,
            include_optional: false,
            collection: Collection::new(),
            protected: Collection::new(),
        }
    }

    /// Also follow non-cascading reverse relations.
    #[must_use]
    pub const fn including_optional(mut self, include: bool) -> Self {
        self.include_optional = include;
        self
    }

    /// Rows behind protect relations that were not followed.
    #[must_use]
    pub const fn protected(&self) -> &Collection {
        &self.protected
    }

    /// Marks every collected soft-deletable row removed, stamped with one
    /// reading of `clock`.
    ///
    /// # Errors
    ///
    /// Returns the first store error.
    pub fn remove(&self, clock: &dyn Clock) -> Result<PropagationResult> {
        let now = clock.now();
        propagate::update(self.store, &self.collection, &Changes::removal(now), "remove")
    }
}

impl Collector for ReverseRelatedCollector<'_> {
    #[instrument(
        name = "lazarus.collector.reverse",
        skip_all,
        fields(roots = roots.len(), include_optional = self.include_optional)
    )]
    fn collect(&mut self, roots: &[Record]) -> Result<()> {
        let mut keys = Vec::with_capacity(roots.len());
        for root in roots {
            match root.key() {
                Some(key) => keys.push(key),
                None => {
                    self.collection.add_record(root);
                },
            }
        }

        let nested = cascade::nested_objects(self.store, &keys, self.include_optional)?;
        for key in nested.protected().keys() {
            self.protected.add(&key);
        }
        for key in nested.into_collection().keys() {
            self.collection.add(&key);
        }

        debug!(
            collected = self.collection.len(),
            protected = self.protected.len(),
            "Reverse walk finished"
        );
        Ok(())
    }

    fn collection(&self) -> &Collection {
        &self.collection
    }

    fn store(&self) -> &dyn RecordStore {
        self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::models::{ModelSchema, OnDelete};
    use crate::schema::Registry;
    use crate::storage::InMemoryStore;
    use chrono::{TimeZone, Utc};

    fn store() -> InMemoryStore {
        let registry = Registry::builder()
            .model(ModelSchema::new("library.author").soft_delete())
            .model(ModelSchema::new("library.tag"))
            .model(
                ModelSchema::new("library.book")
                    .soft_delete()
                    .foreign_key("author", "library.author", OnDelete::Cascade)
                    .many_to_many("tags", "library.tag"),
            )
            .model(
                ModelSchema::new("library.review")
                    .soft_delete()
                    .nullable_foreign_key("author", "library.author", OnDelete::SetNull),
            )
            .build()
            .unwrap();
        InMemoryStore::new(registry)
    }

    #[test]
    fn test_collects_cascade_and_join_rows() {
        let store = store();
        let author = store.insert(&Record::new("library.author")).unwrap();
        let book = store
            .insert(&Record::new("library.book").with_value("author", author))
            .unwrap();
        let tag = store.insert(&Record::new("library.tag")).unwrap();
        store
            .insert(
                &Record::new("library.book_tags")
                    .with_value("source", book)
                    .with_value("target", tag),
            )
            .unwrap();
        store
            .insert(&Record::new("library.review").with_value("author", author))
            .unwrap();
        let root = store.get(&"library.author".into(), author).unwrap().unwrap();

        let mut collector = ReverseRelatedCollector::new(&store);
        collector.collect(&[root.clone()]).unwrap();
        let collection = collector.collection();
        assert_eq!(collection.ids(&"library.book_tags".into()).len(), 1);
        assert!(collection.ids(&"library.review".into()).is_empty());

        let mut related = ReverseRelatedCollector::new(&store).including_optional(true);
        related.collect(&[root]).unwrap();
        assert_eq!(related.collection().ids(&"library.review".into()).len(), 1);
    }

    #[test]
    fn test_remove_skips_join_rows_and_stamps_once() {
        let store = store();
        let author = store.insert(&Record::new("library.author")).unwrap();
        let book = store
            .insert(&Record::new("library.book").with_value("author", author))
            .unwrap();
        let tag = store.insert(&Record::new("library.tag")).unwrap();
        store
            .insert(
                &Record::new("library.book_tags")
                    .with_value("source", book)
                    .with_value("target", tag),
            )
            .unwrap();
        let root = store.get(&"library.author".into(), author).unwrap().unwrap();

        let mut collector = ReverseRelatedCollector::new(&store);
        collector.collect(&[root]).unwrap();
        let at = Utc.with_ymd_and_hms(2025, 5, 1, 9, 0, 0).unwrap();
        let result = collector.remove(&FixedClock::new(at)).unwrap();

        assert_eq!(result.total, 2);
        assert_eq!(result.count_for("library.book_tags"), 0);
        let book = store.get(&"library.book".into(), book).unwrap().unwrap();
        assert!(book.is_removed());
        assert_eq!(book.removed_at(), Some(at));
        assert_eq!(store.update_statements(), 2);
    }
}
