//! Record store trait: the boundary between the propagation core and the
//! relational storage engine.
//!
//! # Available Implementations
//!
//! | Backend | Use Case | Unit of work |
//! |---------|----------|--------------|
//! | `SqliteStore` | Default; embedded | `BEGIN IMMEDIATE` / `COMMIT` / `ROLLBACK` |
//! | `InMemoryStore` | Testing | Snapshot and restore |
//!
//! # Operations
//!
//! | Operation | Statements | Notes |
//! |-----------|------------|-------|
//! | `insert` | 1 | Assigns the identity |
//! | `select` | 1 | Filtered by [`View`] and removal time |
//! | `update_many` | 1 | Bulk conditional update by identity set |
//! | `referencing` | 1 | Reverse lookup through one foreign key |
//! | `set_null` / `delete_rows` | 1 | Primitives for physical deletion |
//!
//! Every failure is returned as [`crate::Error`]; nothing is retried.

use crate::models::{Changes, ModelLabel, Record, RecordId};
use crate::schema::Registry;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which rows of a soft-deletable model a query sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum View {
    /// Every row.
    #[default]
    All,
    /// Rows with `is_removed = false`.
    Active,
    /// Rows with `is_removed = true`.
    Removed,
}

impl View {
    /// Whether a row with the given removal flag is visible.
    #[must_use]
    pub const fn admits(self, is_removed: bool) -> bool {
        match self {
            Self::All => true,
            Self::Active => !is_removed,
            Self::Removed => is_removed,
        }
    }
}

/// Row filter for [`RecordStore::select`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Filter {
    /// Removal-state view.
    pub view: View,
    /// Only rows whose `removed_at` is strictly earlier than this.
    pub removed_before: Option<DateTime<Utc>>,
}

impl Filter {
    /// Creates a filter for a view.
    #[must_use]
    pub const fn new(view: View) -> Self {
        Self {
            view,
            removed_before: None,
        }
    }

    /// Restricts to rows removed strictly before `limit`.
    #[must_use]
    pub const fn with_removed_before(mut self, limit: DateTime<Utc>) -> Self {
        self.removed_before = Some(limit);
        self
    }

    /// Whether the filter reads the soft-delete columns at all.
    #[must_use]
    pub const fn needs_soft_delete(&self) -> bool {
        !matches!(self.view, View::All) || self.removed_before.is_some()
    }
}

/// Trait for record stores.
///
/// # Implementor Notes
///
/// - Methods use `&self` to enable sharing via `Arc<dyn RecordStore>`
/// - Use interior mutability (e.g., `Mutex<Connection>`) for mutable state
/// - `update_many` must be a single statement regardless of how many ids it
///   is given, and must report matched rows (not rows whose values changed)
/// - Constraint failures map to [`Error::IntegrityViolation`]; a change set
///   or filter naming a column the model lacks maps to [`Error::FieldNotFound`]
/// - `atomic` must nest: a unit of work started inside another joins it
pub trait RecordStore: Send + Sync {
    /// The model catalogue the store was created with.
    fn registry(&self) -> &Registry;

    /// Inserts a record and returns its assigned identity.
    ///
    /// Columns missing from the record take their default (`NULL`, or
    /// `false` for `is_removed`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the record already has an id or a
    /// value has the wrong type, and [`Error::IntegrityViolation`] if a
    /// required column is missing or a reference points nowhere.
    fn insert(&self, record: &Record) -> Result<RecordId>;

    /// Fetches one row.
    ///
    /// # Errors
    ///
    /// Returns an error if the model is unknown or the lookup fails.
    fn get(&self, model: &ModelLabel, id: RecordId) -> Result<Option<Record>>;

    /// Fetches the rows of a model that pass `filter`, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FieldNotFound`] if the filter needs soft-delete
    /// columns the model lacks.
    fn select(&self, model: &ModelLabel, filter: &Filter) -> Result<Vec<Record>>;

    /// Applies `changes` to every row whose id is in `ids`, as one statement.
    ///
    /// Returns the number of rows matched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FieldNotFound`] if a changed field does not exist and
    /// [`Error::IntegrityViolation`] if the update breaks a constraint.
    fn update_many(&self, model: &ModelLabel, ids: &[RecordId], changes: &Changes)
    -> Result<usize>;

    /// Ids of `model` rows whose foreign key `field` points at one of `ids`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FieldNotFound`] if `field` is not a foreign key of
    /// `model`.
    fn referencing(
        &self,
        model: &ModelLabel,
        field: &str,
        ids: &[RecordId],
    ) -> Result<Vec<RecordId>>;

    /// Clears foreign key `field` on every `model` row pointing at `ids`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IntegrityViolation`] if the column is not nullable.
    fn set_null(&self, model: &ModelLabel, field: &str, ids: &[RecordId]) -> Result<usize>;

    /// Physically deletes rows. No cascading happens here.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IntegrityViolation`] if other rows still reference
    /// the deleted ones.
    fn delete_rows(&self, model: &ModelLabel, ids: &[RecordId]) -> Result<usize>;

    /// Runs `work` as one all-or-nothing unit.
    ///
    /// If `work` fails, every change it made is undone and its error is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns the error from `work`, or an error if the unit cannot be
    /// started or finished.
    fn atomic(&self, work: &mut dyn FnMut() -> Result<()>) -> Result<()>;
}

/// Runs `work` inside [`RecordStore::atomic`] and hands back its value.
///
/// # Errors
///
/// Returns the error from `work` or from the unit of work itself.
pub fn atomically<T>(store: &dyn RecordStore, work: impl FnOnce() -> Result<T>) -> Result<T> {
    let mut work = Some(work);
    let mut output = None;
    store.atomic(&mut || {
        let run = work.take().ok_or_else(|| Error::OperationFailed {
            operation: "atomic".to_string(),
            cause: "unit of work invoked twice".to_string(),
        })?;
        output = Some(run()?);
        Ok(())
    })?;
    output.ok_or_else(|| Error::OperationFailed {
        operation: "atomic".to_string(),
        cause: "unit of work did not run".to_string(),
    })
}
