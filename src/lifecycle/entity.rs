//! Per-record lifecycle operations.

use super::RecordSet;
use crate::clock::Clock;
use crate::collector::{Collector, ForwardRelatedCollector, ReverseRelatedCollector, aggregate};
use crate::models::{IS_REMOVED, ModelLabel, PropagationResult, Record, RecordId, RecordKey};
use crate::schema::{JOIN_SOURCE, JOIN_TARGET};
use crate::storage::{RecordStore, atomically, cascade};
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use std::time::Instant;
use tracing::{info, instrument};

/// Remove, restore and delete operations on single records.
///
/// Every operation that writes runs inside one unit of work of the store:
/// either the whole propagation is applied or none of it is.
///
/// # Example
///
/// ```rust,ignore
/// let lifecycle = SoftDelete::new(&store, &SystemClock);
/// let removed = lifecycle.remove(&author)?;
/// assert!(removed.count_for("library.book") > 0);
/// ```
#[derive(Clone, Copy)]
pub struct SoftDelete<'a> {
    store: &'a dyn RecordStore,
    clock: &'a dyn Clock,
}

impl<'a> SoftDelete<'a> {
    /// Creates the façade over a store and a clock.
    #[must_use]
    pub fn new(store: &'a dyn RecordStore, clock: &'a dyn Clock) -> Self {
        Self { store, clock }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &'a dyn RecordStore {
        self.store
    }

    /// The clock used for removal stamps and retention limits.
    #[must_use]
    pub fn clock(&self) -> &'a dyn Clock {
        self.clock
    }

    /// All rows of `model`, as a [`RecordSet`] sharing this store and clock.
    #[must_use]
    pub fn records(&self, model: impl Into<ModelLabel>) -> RecordSet<'a> {
        RecordSet::new(self.store, self.clock, model)
    }

    pub(super) fn require_soft(&self, model: &ModelLabel) -> Result<()> {
        if self.store.registry().is_soft_delete(model) {
            Ok(())
        } else {
            Err(Error::FieldNotFound {
                model: model.to_string(),
                field: IS_REMOVED.to_string(),
            })
        }
    }

    /// Marks `record` and everything that would cascade from it removed.
    ///
    /// All rows share one `removed_at`. Rows of models without soft delete
    /// (join rows included) are reached but left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FieldNotFound`] if the record's model has no soft
    /// delete, or the first store error.
    #[instrument(
        name = "lazarus.lifecycle.remove",
        skip(self, record),
        fields(model = %record.model, id = ?record.id)
    )]
    pub fn remove(&self, record: &Record) -> Result<PropagationResult> {
        let start = Instant::now();
        self.require_soft(&record.model)?;

        let result = atomically(self.store, || {
            let mut collector = ReverseRelatedCollector::new(self.store);
            collector.collect(std::slice::from_ref(record))?;
            collector.remove(self.clock)
        });
        record_duration("remove", start, &result);
        result
    }

    /// Marks `record` active again, together with the required rows it
    /// references and the rows that cascade from it.
    ///
    /// With `with_related`, rows reached through non-cascading relations
    /// (set-null, protect, do-nothing) are restored as well.
    ///
    /// The root is counted by both walks; the combined total counts it once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FieldNotFound`] if the record's model has no soft
    /// delete, or the first store error.
    #[instrument(
        name = "lazarus.lifecycle.restore",
        skip(self, record),
        fields(model = %record.model, id = ?record.id)
    )]
    pub fn restore(&self, record: &Record, with_related: bool) -> Result<PropagationResult> {
        let start = Instant::now();
        self.require_soft(&record.model)?;

        let roots = std::slice::from_ref(record);
        let result = atomically(self.store, || {
            let mut forward = ForwardRelatedCollector::new(self.store);
            forward.collect(roots)?;
            let mut reverse =
                ReverseRelatedCollector::new(self.store).including_optional(with_related);
            reverse.collect(roots)?;

            Ok(aggregate::combine([forward.restore()?, reverse.restore()?]))
        });
        record_duration("restore", start, &result);
        result
    }

    /// Purges `record` physically if it is expired, otherwise removes it.
    ///
    /// # Errors
    ///
    /// See [`remove`](Self::remove) and [`hard_delete`](Self::hard_delete).
    #[instrument(
        name = "lazarus.lifecycle.delete",
        skip(self, record),
        fields(model = %record.model, id = ?record.id)
    )]
    pub fn delete(&self, record: &Record) -> Result<PropagationResult> {
        if self.is_expired(record)? {
            info!("Record is past retention, purging");
            self.hard_delete(record)
        } else {
            self.remove(record)
        }
    }

    /// Physically deletes `record` and everything that cascades from it,
    /// whatever its removal state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an unsaved record,
    /// [`Error::Protected`] if protected rows reference it, or the first
    /// store error.
    #[instrument(
        name = "lazarus.lifecycle.hard_delete",
        skip(self, record),
        fields(model = %record.model, id = ?record.id)
    )]
    pub fn hard_delete(&self, record: &Record) -> Result<PropagationResult> {
        let start = Instant::now();
        let key = record.key().ok_or_else(|| {
            Error::InvalidInput(format!("cannot delete an unsaved '{}' record", record.model))
        })?;

        let result = atomically(self.store, || cascade::delete(self.store, &[key]));
        record_duration("hard_delete", start, &result);
        result
    }

    /// Whether `record` is removed and was removed strictly before its
    /// model's retention limit. Models that never expire are never expired.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FieldNotFound`] if the model has no soft delete.
    pub fn is_expired(&self, record: &Record) -> Result<bool> {
        let Some(limit) = self.retention_limit(&record.model)? else {
            return Ok(false);
        };
        Ok(record.is_removed() && record.removed_at().is_some_and(|at| at < limit))
    }

    /// `now - retention_days` for `model`, or `None` if it never expires.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FieldNotFound`] if the model has no soft delete.
    pub fn retention_limit(&self, model: &ModelLabel) -> Result<Option<DateTime<Utc>>> {
        let days = self.store.registry().retention_days(model)?;
        Ok(days.map(|days| self.clock.now() - Duration::days(i64::from(days))))
    }

    /// Adds `target` to the many-to-many field `field` of `owner` by
    /// inserting a join row. Returns the join row's id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an unsaved owner,
    /// [`Error::FieldNotFound`] if `field` is not a many-to-many field of the
    /// owner's model, or [`Error::IntegrityViolation`] if `target` does not
    /// exist.
    pub fn link(&self, owner: &Record, field: &str, target: RecordId) -> Result<RecordId> {
        let RecordKey { model, id } = owner.key().ok_or_else(|| {
            Error::InvalidInput(format!("cannot link an unsaved '{}' record", owner.model))
        })?;
        let join = self.store.registry().join_model(&model, field)?;
        self.store.insert(
            &Record::new(join.clone())
                .with_value(JOIN_SOURCE, id)
                .with_value(JOIN_TARGET, target),
        )
    }
}

impl std::fmt::Debug for SoftDelete<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftDelete").finish_non_exhaustive()
    }
}

/// Records `lazarus_lifecycle_duration_ms` for one finished operation.
pub(super) fn record_duration<T>(operation: &'static str, start: Instant, result: &Result<T>) {
    let status = if result.is_ok() { "success" } else { "error" };
    metrics::histogram!(
        "lazarus_lifecycle_duration_ms",
        "operation" => operation,
        "status" => status
    )
    .record(start.elapsed().as_secs_f64() * 1000.0);
}
