//! Set-level lifecycle operations over all rows of one model.

use super::entity::{SoftDelete, record_duration};
use crate::clock::Clock;
use crate::collector::{Collector, ForwardRelatedCollector, ReverseRelatedCollector, aggregate};
use crate::models::{ModelLabel, PropagationResult, Record, RecordKey};
use crate::storage::{Filter, RecordStore, View, atomically, cascade};
use crate::Result;
use std::time::Instant;
use tracing::{debug, instrument};

/// The rows of one model, narrowed by a [`View`].
///
/// A set is a description, not a snapshot: every operation reads the rows
/// it acts on when it runs.
#[derive(Clone)]
pub struct RecordSet<'a> {
    store: &'a dyn RecordStore,
    clock: &'a dyn Clock,
    model: ModelLabel,
    view: View,
}

impl<'a> RecordSet<'a> {
    /// All rows of `model`.
    #[must_use]
    pub fn new(
        store: &'a dyn RecordStore,
        clock: &'a dyn Clock,
        model: impl Into<ModelLabel>,
    ) -> Self {
        Self {
            store,
            clock,
            model: model.into(),
            view: View::All,
        }
    }

    /// Narrows the set to rows that are not removed.
    #[must_use]
    pub fn active(mut self) -> Self {
        self.view = View::Active;
        self
    }

    /// Narrows the set to removed rows.
    #[must_use]
    pub fn removed(mut self) -> Self {
        self.view = View::Removed;
        self
    }

    /// The model the set ranges over.
    #[must_use]
    pub const fn model(&self) -> &ModelLabel {
        &self.model
    }

    /// The current view.
    #[must_use]
    pub const fn view(&self) -> View {
        self.view
    }

    fn lifecycle(&self) -> SoftDelete<'a> {
        SoftDelete::new(self.store, self.clock)
    }

    /// Reads the rows in the set.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FieldNotFound`] when an active or removed
    /// view is asked of a model without soft delete.
    pub fn fetch(&self) -> Result<Vec<Record>> {
        self.store.select(&self.model, &Filter::new(self.view))
    }

    /// Removed rows whose removal is older than the model's retention
    /// limit. Empty for models that never expire.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FieldNotFound`] if the model has no soft
    /// delete.
    pub fn expired(&self) -> Result<Vec<Record>> {
        let Some(limit) = self.lifecycle().retention_limit(&self.model)? else {
            return Ok(Vec::new());
        };
        self.store.select(
            &self.model,
            &Filter::new(View::Removed).with_removed_before(limit),
        )
    }

    /// Physically deletes every expired row, with whatever cascades from
    /// them.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Protected`] if protected rows reference an
    /// expired row, or the first store error. Nothing is deleted on error.
    #[instrument(name = "lazarus.records.purge", skip(self), fields(model = %self.model))]
    pub fn purge(&self) -> Result<PropagationResult> {
        let start = Instant::now();
        let result = atomically(self.store, || {
            let keys = keys_of(&self.expired()?);
            if keys.is_empty() {
                debug!("Nothing to purge");
                return Ok(PropagationResult::new());
            }
            cascade::delete(self.store, &keys)
        });
        record_duration("purge", start, &result);
        result
    }

    /// Removes every row in the set, and what cascades from them, with one
    /// removal stamp.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FieldNotFound`] if the model has no soft
    /// delete, or the first store error.
    #[instrument(name = "lazarus.records.remove", skip(self), fields(model = %self.model, view = ?self.view))]
    pub fn remove(&self) -> Result<PropagationResult> {
        let start = Instant::now();
        let result = atomically(self.store, || {
            let roots = self.soft_rows()?;
            let mut collector = ReverseRelatedCollector::new(self.store);
            collector.collect(&roots)?;
            collector.remove(self.clock)
        });
        record_duration("remove", start, &result);
        result
    }

    /// Restores every row in the set, as per-record restore does for one.
    ///
    /// Each persisted root is counted by both walks, so the combined total
    /// subtracts the number of roots instead of one.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FieldNotFound`] if the model has no soft
    /// delete, or the first store error.
    #[instrument(
        name = "lazarus.records.restore",
        skip(self),
        fields(model = %self.model, view = ?self.view)
    )]
    pub fn restore(&self, with_related: bool) -> Result<PropagationResult> {
        let start = Instant::now();
        let result = atomically(self.store, || {
            let roots = self.soft_rows()?;
            let mut forward = ForwardRelatedCollector::new(self.store);
            forward.collect(&roots)?;
            let mut reverse =
                ReverseRelatedCollector::new(self.store).including_optional(with_related);
            reverse.collect(&roots)?;

            Ok(aggregate::combine_with_overlap(
                [forward.restore()?, reverse.restore()?],
                roots.len(),
            ))
        });
        record_duration("restore", start, &result);
        result
    }

    /// Removes the set, unless it is the removed view, in which case its
    /// expired rows are purged.
    ///
    /// # Errors
    ///
    /// See [`remove`](Self::remove) and [`purge`](Self::purge).
    pub fn delete(&self) -> Result<PropagationResult> {
        match self.view {
            View::Removed => self.purge(),
            View::All | View::Active => self.remove(),
        }
    }

    /// Physically deletes every row in the set, expired or not.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Protected`] if protected rows reference a
    /// row in the set, or the first store error.
    #[instrument(name = "lazarus.records.hard_delete", skip(self), fields(model = %self.model, view = ?self.view))]
    pub fn hard_delete(&self) -> Result<PropagationResult> {
        let start = Instant::now();
        let result = atomically(self.store, || {
            let keys = keys_of(&self.fetch()?);
            if keys.is_empty() {
                return Ok(PropagationResult::new());
            }
            cascade::delete(self.store, &keys)
        });
        record_duration("hard_delete", start, &result);
        result
    }

    fn soft_rows(&self) -> Result<Vec<Record>> {
        self.lifecycle().require_soft(&self.model)?;
        self.fetch()
    }
}

impl std::fmt::Debug for RecordSet<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordSet")
            .field("model", &self.model)
            .field("view", &self.view)
            .finish_non_exhaustive()
    }
}

fn keys_of(rows: &[Record]) -> Vec<RecordKey> {
    rows.iter().filter_map(Record::key).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::models::{ModelSchema, OnDelete, RecordId};
    use crate::schema::Registry;
    use crate::storage::InMemoryStore;
    use crate::Error;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn store() -> InMemoryStore {
        let registry = Registry::builder()
            .model(ModelSchema::new("shop.customer").soft_delete())
            .model(
                ModelSchema::new("shop.order")
                    .soft_delete()
                    .foreign_key("customer", "shop.customer", OnDelete::Cascade),
            )
            .model(ModelSchema::new("shop.country"))
            .build()
            .unwrap();
        InMemoryStore::new(registry)
    }

    fn customer_with_order(store: &InMemoryStore) -> (RecordId, RecordId) {
        let customer = store.insert(&Record::new("shop.customer")).unwrap();
        let order = store
            .insert(&Record::new("shop.order").with_value("customer", customer))
            .unwrap();
        (customer, order)
    }

    fn remove_at(store: &InMemoryStore, id: RecordId, at: DateTime<Utc>) {
        let clock = FixedClock::new(at);
        let record = store.get(&"shop.customer".into(), id).unwrap().unwrap();
        SoftDelete::new(store, &clock).remove(&record).unwrap();
    }

    #[test]
    fn test_views_filter_on_removal_state() {
        let store = store();
        let clock = FixedClock::new(now());
        let (kept, _) = customer_with_order(&store);
        let (gone, _) = customer_with_order(&store);
        remove_at(&store, gone, now());

        let set = RecordSet::new(&store, &clock, "shop.customer");
        assert_eq!(set.fetch().unwrap().len(), 2);
        let active = set.clone().active().fetch().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, Some(kept));
        let removed = set.removed().fetch().unwrap();
        assert_eq!(removed[0].id, Some(gone));
    }

    #[test]
    fn test_purge_deletes_only_expired() {
        let store = store();
        let clock = FixedClock::new(now());
        let (old, old_order) = customer_with_order(&store);
        let (recent, _) = customer_with_order(&store);
        remove_at(&store, old, now() - Duration::days(31));
        remove_at(&store, recent, now() - Duration::days(29));

        let set = RecordSet::new(&store, &clock, "shop.customer").removed();
        assert_eq!(set.expired().unwrap().len(), 1);
        let purged = set.delete().unwrap();

        assert_eq!(purged.total, 2);
        assert!(store.get(&"shop.customer".into(), old).unwrap().is_none());
        assert!(store.get(&"shop.order".into(), old_order).unwrap().is_none());
        assert!(store.get(&"shop.customer".into(), recent).unwrap().is_some());
    }

    #[test]
    fn test_bulk_remove_and_restore_count_each_root_once() {
        let store = store();
        let clock = FixedClock::new(now());
        customer_with_order(&store);
        customer_with_order(&store);
        let set = RecordSet::new(&store, &clock, "shop.customer");

        let removed = set.clone().active().delete().unwrap();
        assert_eq!(removed.total, 4);
        assert_eq!(store.update_statements(), 2);

        let restored = set.removed().restore(false).unwrap();
        assert_eq!(restored.total, 4);
        assert_eq!(restored.count_for("shop.order"), 2);
        assert!(
            RecordSet::new(&store, &clock, "shop.order")
                .removed()
                .fetch()
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_plain_model_set_cannot_be_removed() {
        let store = store();
        let clock = FixedClock::new(now());
        store.insert(&Record::new("shop.country")).unwrap();

        let set = RecordSet::new(&store, &clock, "shop.country");
        assert_eq!(set.fetch().unwrap().len(), 1);
        assert!(matches!(set.remove(), Err(Error::FieldNotFound { .. })));
        assert_eq!(set.hard_delete().unwrap().total, 1);
    }
}
