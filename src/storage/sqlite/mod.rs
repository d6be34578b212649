//! `SQLite` record store.
//!
//! One table per registered model, named after the model label, with an
//! integer primary key `id` and one column per field. Foreign keys are
//! enforced by the engine (`PRAGMA foreign_keys = ON`); referential actions
//! are not, since the cascade walk performs them explicitly.
//!
//! ## Module Structure
//!
//! - [`connection`]: lock acquisition with poison recovery, pragmas
//! - [`sql`]: DDL, placeholders, JSON id sets, value conversion
//! - [`metrics`]: per-operation metrics

// SQLite reports affected rows as usize and ids as i64; neither overflows here.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
// Dropping the connection guard a statement earlier buys nothing.
#![allow(clippy::significant_drop_tightening)]

mod connection;
mod metrics;
mod sql;

pub(crate) use self::connection::acquire_lock;

use self::connection::configure_connection;
use self::metrics::observe;
use self::sql::{
    create_index_sql, create_table_sql, from_sql, id_set, id_set_param, placeholders, quote_ident,
    to_sql,
};
use super::traits::{Filter, RecordStore, View};
use super::transaction::UnitOfWork;
use super::values::{check_value, filtered_model, foreign_key, not_null_violation, prepare_row};
use crate::models::{Changes, IS_REMOVED, ModelLabel, REMOVED_AT, Record, RecordId, Value};
use crate::config::LazarusConfig;
use crate::schema::{ModelMeta, PRIMARY_KEY, Registry, RegistryBuilder};
use crate::{Error, Result};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, Row, params_from_iter};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, instrument};

const BACKEND: &str = "sqlite";

/// `SQLite`-backed record store.
///
/// # Concurrency Model
///
/// Uses a `Mutex<Connection>` for thread-safe access. WAL mode and
/// `busy_timeout` handle contention with other processes. Units of work are
/// serialized with `BEGIN IMMEDIATE`.
///
/// # Example
///
/// ```
/// use lazarus::{ModelSchema, Record, RecordStore, Registry, SqliteStore};
///
/// let registry = Registry::builder()
///     .model(ModelSchema::new("library.author").soft_delete())
///     .build()?;
/// let store = SqliteStore::in_memory(registry)?;
/// let id = store.insert(&Record::new("library.author"))?;
/// assert!(store.get(&"library.author".into(), id)?.is_some());
/// # Ok::<(), lazarus::Error>(())
/// ```
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
    registry: Registry,
    unit: UnitOfWork,
}

impl SqliteStore {
    /// Opens (or creates) a database file and creates missing tables.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn new(db_path: impl Into<PathBuf>, registry: Registry) -> Result<Self> {
        let db_path = db_path.into();
        let conn = Connection::open(&db_path).map_err(|e| Error::OperationFailed {
            operation: "open_sqlite".to_string(),
            cause: e.to_string(),
        })?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path),
            registry,
            unit: UnitOfWork::new(),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Creates an in-memory database (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory(registry: Registry) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::OperationFailed {
            operation: "open_sqlite_memory".to_string(),
            cause: e.to_string(),
        })?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path: None,
            registry,
            unit: UnitOfWork::new(),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Builds the registry with the configured retention and opens the
    /// configured database, or an in-memory one when no path is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry is invalid or the database cannot be
    /// opened.
    pub fn open(config: &LazarusConfig, models: RegistryBuilder) -> Result<Self> {
        let registry = models.with_retention(&config.retention).build()?;
        match &config.database_path {
            Some(path) => Self::new(path.clone(), registry),
            None => Self::in_memory(registry),
        }
    }

    /// Returns the database path (`None` for in-memory databases).
    #[must_use]
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn initialize(&self) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        configure_connection(&conn)?;

        for label in self.registry.labels() {
            let meta = self.registry.model(label)?;
            conn.execute(&create_table_sql(meta), [])
                .map_err(|e| Error::OperationFailed {
                    operation: "create_table".to_string(),
                    cause: format!("{label}: {e}"),
                })?;
            for index in create_index_sql(meta) {
                // Missing indexes cost speed, not correctness
                let _ = conn.execute(&index, []);
            }
        }

        debug!(
            models = self.registry.labels().count(),
            path = ?self.db_path,
            "SQLite store initialized"
        );
        Ok(())
    }

    fn select_sql(meta: &ModelMeta) -> String {
        let columns: Vec<String> = std::iter::once(PRIMARY_KEY)
            .chain(meta.columns.iter().map(|c| c.name.as_str()))
            .map(quote_ident)
            .collect();
        format!(
            "SELECT {} FROM {}",
            columns.join(", "),
            quote_ident(meta.label.as_str())
        )
    }

    fn read_row(meta: &ModelMeta, row: &Row<'_>) -> Result<Record> {
        let id: i64 = row.get(0).map_err(read_error)?;
        let mut values = BTreeMap::new();
        for (i, column) in meta.columns.iter().enumerate() {
            let raw = row.get_ref(i + 1).map_err(read_error)?;
            values.insert(column.name.clone(), from_sql(column, raw)?);
        }
        Ok(Record {
            model: meta.label.clone(),
            id: Some(RecordId::new(id)),
            values,
        })
    }

    fn query_records(
        conn: &Connection,
        meta: &ModelMeta,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Vec<Record>> {
        let mut stmt = conn.prepare(sql).map_err(storage_error("select"))?;
        let mut rows = stmt
            .query(params_from_iter(params.iter()))
            .map_err(storage_error("select"))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().map_err(storage_error("select"))? {
            records.push(Self::read_row(meta, row)?);
        }
        Ok(records)
    }

}

impl RecordStore for SqliteStore {
    fn registry(&self) -> &Registry {
        &self.registry
    }

    #[instrument(skip(self, record), fields(model = %record.model))]
    fn insert(&self, record: &Record) -> Result<RecordId> {
        let start = Instant::now();
        let result = (|| -> Result<RecordId> {
            let meta = self.registry.model(&record.model)?;
            let row = prepare_row(meta, record)?;
            let table = quote_ident(meta.label.as_str());

            let sql = if row.is_empty() {
                format!("INSERT INTO {table} DEFAULT VALUES")
            } else {
                let columns: Vec<String> = row.keys().map(|k| quote_ident(k)).collect();
                format!(
                    "INSERT INTO {table} ({}) VALUES ({})",
                    columns.join(", "),
                    placeholders(1, row.len())
                )
            };
            let params: Vec<SqlValue> = row.values().map(to_sql).collect();

            self.unit.exclusive(|| {
                let conn = acquire_lock(&self.conn);
                conn.execute(&sql, params_from_iter(params.iter()))
                    .map_err(storage_error("insert"))?;
                Ok(RecordId::new(conn.last_insert_rowid()))
            })
        })();
        observe(BACKEND, "insert", start, &result);
        result
    }

    fn get(&self, model: &ModelLabel, id: RecordId) -> Result<Option<Record>> {
        let meta = self.registry.model(model)?;
        let sql = format!(
            "{} WHERE {} = ?1",
            Self::select_sql(meta),
            quote_ident(PRIMARY_KEY)
        );

        let conn = acquire_lock(&self.conn);
        let mut found = Self::query_records(&conn, meta, &sql, &[SqlValue::Integer(id.get())])?;
        Ok(found.pop())
    }

    #[instrument(skip(self, filter), fields(model = %model, view = ?filter.view))]
    fn select(&self, model: &ModelLabel, filter: &Filter) -> Result<Vec<Record>> {
        let start = Instant::now();
        let result = (|| -> Result<Vec<Record>> {
            let meta = filtered_model(&self.registry, model, filter)?;
            let mut conditions = Vec::new();
            let mut params = Vec::new();

            match filter.view {
                View::All => {},
                View::Active => conditions.push(format!("{} = 0", quote_ident(IS_REMOVED))),
                View::Removed => conditions.push(format!("{} = 1", quote_ident(IS_REMOVED))),
            }
            if let Some(limit) = filter.removed_before {
                params.push(to_sql(&Value::Timestamp(limit)));
                conditions.push(format!(
                    "{col} IS NOT NULL AND {col} < ?{}",
                    params.len(),
                    col = quote_ident(REMOVED_AT)
                ));
            }

            let mut sql = Self::select_sql(meta);
            if !conditions.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&conditions.join(" AND "));
            }
            sql.push_str(&format!(" ORDER BY {}", quote_ident(PRIMARY_KEY)));

            let conn = acquire_lock(&self.conn);
            Self::query_records(&conn, meta, &sql, &params)
        })();
        observe(BACKEND, "select", start, &result);
        result
    }

    #[instrument(skip(self, ids, changes), fields(model = %model, ids = ids.len()))]
    fn update_many(
        &self,
        model: &ModelLabel,
        ids: &[RecordId],
        changes: &Changes,
    ) -> Result<usize> {
        let start = Instant::now();
        let result = (|| -> Result<usize> {
            self.registry.validate_changes(model, changes)?;
            let meta = self.registry.model(model)?;
            for (field, value) in changes.iter() {
                if let Some(column) = meta.column(field) {
                    check_value(meta, column, value)?;
                }
            }
            if ids.is_empty() || changes.is_empty() {
                return Ok(0);
            }

            let assignments: Vec<String> = changes
                .fields()
                .enumerate()
                .map(|(i, field)| format!("{} = ?{}", quote_ident(field), i + 1))
                .collect();
            let sql = format!(
                "UPDATE {} SET {} WHERE {} IN ({})",
                quote_ident(model.as_str()),
                assignments.join(", "),
                quote_ident(PRIMARY_KEY),
                id_set(changes.len() + 1)
            );
            let mut params: Vec<SqlValue> = changes.iter().map(|(_, v)| to_sql(v)).collect();
            params.push(id_set_param(ids));

            self.unit.exclusive(|| {
                acquire_lock(&self.conn)
                    .execute(&sql, params_from_iter(params.iter()))
                    .map_err(storage_error("update_many"))
            })
        })();
        observe(BACKEND, "update_many", start, &result);
        result
    }

    fn referencing(
        &self,
        model: &ModelLabel,
        field: &str,
        ids: &[RecordId],
    ) -> Result<Vec<RecordId>> {
        let meta = self.registry.model(model)?;
        foreign_key(meta, field)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {pk} FROM {} WHERE {} IN ({}) ORDER BY {pk}",
            quote_ident(model.as_str()),
            quote_ident(field),
            id_set(1),
            pk = quote_ident(PRIMARY_KEY)
        );
        let params = [id_set_param(ids)];

        let conn = acquire_lock(&self.conn);
        let mut stmt = conn.prepare(&sql).map_err(storage_error("referencing"))?;
        let found = stmt
            .query_map(params_from_iter(params.iter()), |row| row.get::<_, i64>(0))
            .map_err(storage_error("referencing"))?
            .map(|id| id.map(RecordId::new))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(storage_error("referencing"))?;
        Ok(found)
    }

    fn set_null(&self, model: &ModelLabel, field: &str, ids: &[RecordId]) -> Result<usize> {
        let meta = self.registry.model(model)?;
        if !foreign_key(meta, field)?.nullable {
            return Err(not_null_violation(meta, field));
        }
        if ids.is_empty() {
            return Ok(0);
        }

        let sql = format!(
            "UPDATE {} SET {col} = NULL WHERE {col} IN ({})",
            quote_ident(model.as_str()),
            id_set(1),
            col = quote_ident(field)
        );
        let params = [id_set_param(ids)];

        self.unit.exclusive(|| {
            acquire_lock(&self.conn)
                .execute(&sql, params_from_iter(params.iter()))
                .map_err(storage_error("set_null"))
        })
    }

    #[instrument(skip(self, ids), fields(model = %model, ids = ids.len()))]
    fn delete_rows(&self, model: &ModelLabel, ids: &[RecordId]) -> Result<usize> {
        let start = Instant::now();
        let result = (|| -> Result<usize> {
            self.registry.model(model)?;
            if ids.is_empty() {
                return Ok(0);
            }
            let sql = format!(
                "DELETE FROM {} WHERE {} IN ({})",
                quote_ident(model.as_str()),
                quote_ident(PRIMARY_KEY),
                id_set(1)
            );
            let params = [id_set_param(ids)];

            self.unit.exclusive(|| {
                acquire_lock(&self.conn)
                    .execute(&sql, params_from_iter(params.iter()))
                    .map_err(storage_error("delete_rows"))
            })
        })();
        observe(BACKEND, "delete_rows", start, &result);
        result
    }

    fn atomic(&self, work: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        self.unit.run(
            work,
            || {
                acquire_lock(&self.conn)
                    .execute_batch("BEGIN IMMEDIATE")
                    .map_err(storage_error("begin"))
            },
            |commit| {
                let statement = if commit { "COMMIT" } else { "ROLLBACK" };
                acquire_lock(&self.conn)
                    .execute_batch(statement)
                    .map_err(storage_error("finish"))
            },
        )
    }
}

/// Maps a rusqlite error, sending constraint failures to
/// [`Error::IntegrityViolation`].
fn storage_error(operation: &'static str) -> impl Fn(rusqlite::Error) -> Error {
    move |e| {
        if e.sqlite_error_code() == Some(rusqlite::ErrorCode::ConstraintViolation) {
            Error::IntegrityViolation {
                operation: operation.to_string(),
                cause: e.to_string(),
            }
        } else {
            Error::OperationFailed {
                operation: operation.to_string(),
                cause: e.to_string(),
            }
        }
    }
}

#[allow(clippy::needless_pass_by_value)]
fn read_error(e: rusqlite::Error) -> Error {
    Error::OperationFailed {
        operation: "read_row".to_string(),
        cause: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FieldKind, ModelSchema, OnDelete};
    use chrono::{Duration, TimeZone, Utc};

    fn registry() -> Registry {
        Registry::builder()
            .model(ModelSchema::new("shop.customer").soft_delete().field("name", FieldKind::Text))
            .model(
                ModelSchema::new("shop.order")
                    .soft_delete()
                    .field("total", FieldKind::Integer)
                    .foreign_key("customer", "shop.customer", OnDelete::Cascade),
            )
            .model(ModelSchema::new("shop.coupon").nullable_foreign_key(
                "customer",
                "shop.customer",
                OnDelete::SetNull,
            ))
            .build()
            .unwrap()
    }

    fn customer(store: &SqliteStore, name: &str) -> RecordId {
        store
            .insert(&Record::new("shop.customer").with_value("name", name))
            .unwrap()
    }

    #[test]
    fn test_insert_and_get_round_trip() {
        let store = SqliteStore::in_memory(registry()).unwrap();
        let id = customer(&store, "ada");

        let row = store.get(&"shop.customer".into(), id).unwrap().unwrap();
        assert_eq!(row.id, Some(id));
        assert_eq!(row.value("name"), Some(&Value::Text("ada".to_string())));
        assert!(!row.is_removed());
        assert_eq!(row.removed_at(), None);

        assert!(store.get(&"shop.customer".into(), RecordId::new(42)).unwrap().is_none());
    }

    #[test]
    fn test_insert_without_values() {
        let store = SqliteStore::in_memory(registry()).unwrap();
        let id = store.insert(&Record::new("shop.coupon")).unwrap();
        assert_eq!(id.get(), 1);
    }

    #[test]
    fn test_dangling_reference_is_integrity_violation() {
        let store = SqliteStore::in_memory(registry()).unwrap();
        let result = store.insert(
            &Record::new("shop.order")
                .with_value("total", 1_i64)
                .with_value("customer", RecordId::new(7)),
        );
        assert!(matches!(result, Err(Error::IntegrityViolation { .. })));
    }

    #[test]
    fn test_update_many_and_views() {
        let store = SqliteStore::in_memory(registry()).unwrap();
        let model: ModelLabel = "shop.customer".into();
        let ids: Vec<_> = (0..4).map(|i| customer(&store, &format!("c{i}"))).collect();

        let now = Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap();
        let updated = store
            .update_many(&model, &ids[..3], &Changes::removal(now))
            .unwrap();
        assert_eq!(updated, 3);

        let removed = store.select(&model, &Filter::new(View::Removed)).unwrap();
        assert_eq!(removed.len(), 3);
        assert!(removed.iter().all(|r| r.removed_at() == Some(now)));
        assert_eq!(store.select(&model, &Filter::new(View::Active)).unwrap().len(), 1);

        let expired = store
            .select(
                &model,
                &Filter::new(View::Removed).with_removed_before(now + Duration::seconds(1)),
            )
            .unwrap();
        assert_eq!(expired.len(), 3);
        let none = store
            .select(&model, &Filter::new(View::Removed).with_removed_before(now))
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_update_many_unknown_field() {
        let store = SqliteStore::in_memory(registry()).unwrap();
        let id = store.insert(&Record::new("shop.coupon")).unwrap();
        assert!(matches!(
            store.update_many(&"shop.coupon".into(), &[id], &Changes::restoration()),
            Err(Error::FieldNotFound { .. })
        ));
    }

    #[test]
    fn test_referencing_set_null_and_delete() {
        let store = SqliteStore::in_memory(registry()).unwrap();
        let a = customer(&store, "a");
        let coupon = store
            .insert(&Record::new("shop.coupon").with_value("customer", a))
            .unwrap();
        let order = store
            .insert(
                &Record::new("shop.order")
                    .with_value("total", 5_i64)
                    .with_value("customer", a),
            )
            .unwrap();

        assert_eq!(
            store.referencing(&"shop.order".into(), "customer", &[a]).unwrap(),
            vec![order]
        );
        assert!(matches!(
            store.delete_rows(&"shop.customer".into(), &[a]),
            Err(Error::IntegrityViolation { .. })
        ));

        store.delete_rows(&"shop.order".into(), &[order]).unwrap();
        store.set_null(&"shop.coupon".into(), "customer", &[a]).unwrap();
        assert_eq!(store.delete_rows(&"shop.customer".into(), &[a]).unwrap(), 1);

        let coupon = store.get(&"shop.coupon".into(), coupon).unwrap().unwrap();
        assert_eq!(coupon.value("customer"), Some(&Value::Null));
    }

    #[test]
    fn test_atomic_rolls_back() {
        let store = SqliteStore::in_memory(registry()).unwrap();
        customer(&store, "kept");

        let result = store.atomic(&mut || {
            customer(&store, "discarded");
            Err(Error::InvalidInput("abort".to_string()))
        });
        assert!(result.is_err());

        let all = store.select(&"shop.customer".into(), &Filter::default()).unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lazarus.db");

        let id = {
            let store = SqliteStore::new(&path, registry()).unwrap();
            assert_eq!(store.db_path(), Some(path.as_path()));
            customer(&store, "persisted")
        };

        let store = SqliteStore::new(&path, registry()).unwrap();
        assert!(store.get(&"shop.customer".into(), id).unwrap().is_some());
    }

    #[test]
    fn test_open_from_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = LazarusConfig::new()
            .with_database_path(dir.path().join("configured.db"))
            .with_retention(crate::config::RetentionConfig::new().with_default_days(Some(7)));
        let models = Registry::builder().model(ModelSchema::new("shop.customer").soft_delete());

        let store = SqliteStore::open(&config, models).unwrap();
        assert_eq!(store.db_path(), Some(dir.path().join("configured.db").as_path()));
        assert_eq!(
            store.registry().retention_days(&"shop.customer".into()).unwrap(),
            Some(7)
        );

        let in_memory = SqliteStore::open(
            &LazarusConfig::new(),
            Registry::builder().model(ModelSchema::new("shop.customer").soft_delete()),
        )
        .unwrap();
        assert_eq!(in_memory.db_path(), None);
    }
}
