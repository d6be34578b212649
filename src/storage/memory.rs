//! In-memory record store for testing.
//!
//! Provides a fast, non-persistent implementation of [`RecordStore`] with the
//! same constraint behavior as the `SQLite` store. It also counts bulk update
//! statements, which lets tests check that propagation issues one statement
//! per model rather than one per row.

use super::sqlite::acquire_lock;
use super::traits::{Filter, RecordStore};
use super::transaction::UnitOfWork;
use super::values::{check_value, filtered_model, foreign_key, not_null_violation, prepare_row};
use crate::models::{Changes, FieldKind, ModelLabel, Record, RecordId, Value};
use crate::schema::{ModelMeta, Registry};
use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

type Rows = BTreeMap<RecordId, Record>;

#[derive(Debug, Clone, Default)]
struct Tables {
    rows: HashMap<ModelLabel, Rows>,
    last_id: HashMap<ModelLabel, i64>,
}

impl Tables {
    fn rows(&self, model: &ModelLabel) -> impl Iterator<Item = &Record> {
        self.rows.get(model).into_iter().flat_map(BTreeMap::values)
    }

    fn exists(&self, model: &ModelLabel, id: RecordId) -> bool {
        self.rows.get(model).is_some_and(|rows| rows.contains_key(&id))
    }
}

/// In-memory record store.
///
/// Uses `RwLock` for thread-safe access with reader-writer semantics. Data
/// is not persisted between runs. Ids are assigned per model starting at 1.
///
/// # Example
///
/// ```
/// use lazarus::{InMemoryStore, ModelSchema, Record, RecordStore, Registry};
///
/// let registry = Registry::builder()
///     .model(ModelSchema::new("library.author").soft_delete())
///     .build()?;
/// let store = InMemoryStore::new(registry);
/// let id = store.insert(&Record::new("library.author"))?;
/// assert_eq!(id.get(), 1);
/// # Ok::<(), lazarus::Error>(())
/// ```
#[derive(Debug)]
pub struct InMemoryStore {
    registry: Registry,
    tables: RwLock<Tables>,
    snapshot: Mutex<Option<Tables>>,
    unit: UnitOfWork,
    update_statements: AtomicUsize,
}

impl InMemoryStore {
    /// Creates an empty store for the registered models.
    #[must_use]
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            tables: RwLock::new(Tables::default()),
            snapshot: Mutex::new(None),
            unit: UnitOfWork::new(),
            update_statements: AtomicUsize::new(0),
        }
    }

    /// Number of bulk update statements executed so far.
    #[must_use]
    pub fn update_statements(&self) -> usize {
        self.update_statements.load(Ordering::SeqCst)
    }

    /// Resets the bulk update statement counter.
    pub fn reset_statement_count(&self) {
        self.update_statements.store(0, Ordering::SeqCst);
    }

    /// Number of rows currently stored for a model.
    #[must_use]
    pub fn row_count(&self, model: &ModelLabel) -> usize {
        self.tables
            .read()
            .map(|t| t.rows.get(model).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }

    fn read(&self, operation: &str) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables.read().map_err(|_| Error::OperationFailed {
            operation: operation.to_string(),
            cause: "Lock poisoned".to_string(),
        })
    }

    fn write(&self, operation: &str) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables.write().map_err(|_| Error::OperationFailed {
            operation: operation.to_string(),
            cause: "Lock poisoned".to_string(),
        })
    }

    /// Applies one write under the table lock. A write from outside a unit
    /// of work waits until a unit open on another thread has finished, so a
    /// rollback never discards it.
    fn mutate<T>(
        &self,
        operation: &str,
        change: impl FnOnce(&mut Tables) -> Result<T>,
    ) -> Result<T> {
        self.unit.exclusive(|| {
            let mut tables = self.write(operation)?;
            change(&mut tables)
        })
    }

    /// Rejects references to rows that do not exist.
    fn check_references<'v>(
        meta: &ModelMeta,
        tables: &Tables,
        values: impl Iterator<Item = (&'v str, &'v Value)>,
        operation: &str,
    ) -> Result<()> {
        for (field, value) in values {
            let Some(column) = meta.column(field) else {
                continue;
            };
            if let (FieldKind::Reference(target), Value::Integer(id)) = (&column.kind, value) {
                if !tables.exists(target, RecordId::new(*id)) {
                    return Err(Error::IntegrityViolation {
                        operation: operation.to_string(),
                        cause: format!(
                            "FOREIGN KEY constraint failed: {}.{field} -> {target}#{id}",
                            meta.label
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

impl RecordStore for InMemoryStore {
    fn registry(&self) -> &Registry {
        &self.registry
    }

    fn insert(&self, record: &Record) -> Result<RecordId> {
        let meta = self.registry.model(&record.model)?;
        let values = prepare_row(meta, record)?;

        self.mutate("insert", |tables| {
            Self::check_references(
                meta,
                tables,
                values.iter().map(|(k, v)| (k.as_str(), v)),
                "insert",
            )?;

            let last = tables.last_id.entry(meta.label.clone()).or_insert(0);
            *last += 1;
            let id = RecordId::new(*last);

            let row = Record {
                model: meta.label.clone(),
                id: Some(id),
                values,
            };
            tables
                .rows
                .entry(meta.label.clone())
                .or_default()
                .insert(id, row);
            Ok(id)
        })
    }

    fn get(&self, model: &ModelLabel, id: RecordId) -> Result<Option<Record>> {
        self.registry.model(model)?;
        let tables = self.read("get")?;
        Ok(tables.rows.get(model).and_then(|rows| rows.get(&id)).cloned())
    }

    fn select(&self, model: &ModelLabel, filter: &Filter) -> Result<Vec<Record>> {
        filtered_model(&self.registry, model, filter)?;
        let tables = self.read("select")?;
        Ok(tables
            .rows(model)
            .filter(|row| filter.view.admits(row.is_removed()))
            .filter(|row| {
                filter
                    .removed_before
                    .is_none_or(|limit| row.removed_at().is_some_and(|at| at < limit))
            })
            .cloned()
            .collect())
    }

    fn update_many(
        &self,
        model: &ModelLabel,
        ids: &[RecordId],
        changes: &Changes,
    ) -> Result<usize> {
        self.registry.validate_changes(model, changes)?;
        let meta = self.registry.model(model)?;
        for (field, value) in changes.iter() {
            if let Some(column) = meta.column(field) {
                check_value(meta, column, value)?;
            }
        }
        if ids.is_empty() {
            return Ok(0);
        }

        self.mutate("update_many", |tables| {
            Self::check_references(meta, tables, changes.iter(), "update_many")?;
            self.update_statements.fetch_add(1, Ordering::SeqCst);

            let Some(rows) = tables.rows.get_mut(model) else {
                return Ok(0);
            };
            let wanted: HashSet<RecordId> = ids.iter().copied().collect();
            let mut matched = 0;
            for id in &wanted {
                if let Some(row) = rows.get_mut(id) {
                    changes.apply_to(row);
                    matched += 1;
                }
            }
            Ok(matched)
        })
    }

    fn referencing(
        &self,
        model: &ModelLabel,
        field: &str,
        ids: &[RecordId],
    ) -> Result<Vec<RecordId>> {
        let meta = self.registry.model(model)?;
        foreign_key(meta, field)?;
        let wanted: HashSet<RecordId> = ids.iter().copied().collect();

        let tables = self.read("referencing")?;
        Ok(tables
            .rows(model)
            .filter(|row| row.reference(field).is_some_and(|id| wanted.contains(&id)))
            .filter_map(|row| row.id)
            .collect())
    }

    fn set_null(&self, model: &ModelLabel, field: &str, ids: &[RecordId]) -> Result<usize> {
        let meta = self.registry.model(model)?;
        let fk = foreign_key(meta, field)?;
        if !fk.nullable {
            return Err(not_null_violation(meta, field));
        }
        let wanted: HashSet<RecordId> = ids.iter().copied().collect();

        self.mutate("set_null", |tables| {
            let mut updated = 0;
            if let Some(rows) = tables.rows.get_mut(model) {
                for row in rows.values_mut() {
                    if row.reference(field).is_some_and(|id| wanted.contains(&id)) {
                        row.values.insert(field.to_string(), Value::Null);
                        updated += 1;
                    }
                }
            }
            Ok(updated)
        })
    }

    fn delete_rows(&self, model: &ModelLabel, ids: &[RecordId]) -> Result<usize> {
        let meta = self.registry.model(model)?;
        let doomed: HashSet<RecordId> = ids.iter().copied().collect();

        self.mutate("delete_rows", |tables| {
            for relation in meta.reverse_relations() {
                let dangling = tables.rows(&relation.related_model).any(|row| {
                    let self_deleted = relation.related_model == *model
                        && row.id.is_some_and(|id| doomed.contains(&id));
                    !self_deleted
                        && row
                            .reference(&relation.name)
                            .is_some_and(|id| doomed.contains(&id))
                });
                if dangling {
                    return Err(Error::IntegrityViolation {
                        operation: "delete_rows".to_string(),
                        cause: format!(
                            "FOREIGN KEY constraint failed: {}.{} still references {model}",
                            relation.related_model, relation.name
                        ),
                    });
                }
            }

            let Some(rows) = tables.rows.get_mut(model) else {
                return Ok(0);
            };
            let before = rows.len();
            rows.retain(|id, _| !doomed.contains(id));
            Ok(before - rows.len())
        })
    }

    fn atomic(&self, work: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        self.unit.run(
            work,
            || {
                let tables = self.read("atomic_begin")?;
                *acquire_lock(&self.snapshot) = Some(tables.clone());
                Ok(())
            },
            |commit| {
                let saved = acquire_lock(&self.snapshot).take();
                if !commit {
                    if let Some(saved) = saved {
                        *self.write("atomic_rollback")? = saved;
                    }
                }
                Ok(())
            },
        )
    }
}
