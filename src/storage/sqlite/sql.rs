//! SQL construction and value conversion for the `SQLite` store.
//!
//! Model labels and field names reach SQL only as quoted identifiers, and
//! only after the registry has checked they are plain identifiers; values
//! always travel as bound parameters.

use crate::models::{FieldDef, FieldKind, IS_REMOVED, RecordId, Value};
use crate::schema::{ModelMeta, PRIMARY_KEY};
use crate::{Error, Result};
use chrono::DateTime;
use rusqlite::types::{Value as SqlValue, ValueRef};

/// Quotes an identifier for use in SQL.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(quote_ident("library.author"), "\"library.author\"");
/// ```
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Builds `?start, ?start+1, ...` for `count` parameters.
#[must_use]
pub fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Subquery yielding every id of the JSON array bound at `?index`.
///
/// An id set travels as a single parameter, so one statement covers any
/// number of rows without hitting the engine's parameter limit.
#[must_use]
pub fn id_set(index: usize) -> String {
    format!("SELECT value FROM json_each(?{index})")
}

/// Binds an id set as one JSON array parameter for [`id_set`].
#[must_use]
pub fn id_set_param(ids: &[RecordId]) -> SqlValue {
    let raw: Vec<i64> = ids.iter().map(|id| id.get()).collect();
    SqlValue::Text(serde_json::Value::from(raw).to_string())
}

fn column_sql(column: &FieldDef) -> String {
    let mut sql = quote_ident(&column.name);
    sql.push_str(match column.kind {
        FieldKind::Text => " TEXT",
        FieldKind::Bool | FieldKind::Integer | FieldKind::Timestamp | FieldKind::Reference(_) => {
            " INTEGER"
        },
    });
    if !column.nullable {
        sql.push_str(" NOT NULL");
    }
    if column.name == IS_REMOVED {
        sql.push_str(" DEFAULT 0");
    }
    if let FieldKind::Reference(target) = &column.kind {
        sql.push_str(&format!(
            " REFERENCES {}({PRIMARY_KEY})",
            quote_ident(target.as_str())
        ));
    }
    sql
}

/// `CREATE TABLE` statement for a model.
///
/// References carry no `ON DELETE` action: the engine only refuses dangling
/// rows, and every referential action is carried out by the cascade walk.
#[must_use]
pub fn create_table_sql(meta: &ModelMeta) -> String {
    let mut columns = vec![format!("{} INTEGER PRIMARY KEY", quote_ident(PRIMARY_KEY))];
    columns.extend(meta.columns.iter().map(column_sql));
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        quote_ident(meta.label.as_str()),
        columns.join(",\n    ")
    )
}

/// `CREATE INDEX` statements for foreign-key and removal-state columns.
#[must_use]
pub fn create_index_sql(meta: &ModelMeta) -> Vec<String> {
    meta.columns
        .iter()
        .filter(|c| matches!(c.kind, FieldKind::Reference(_)) || c.name == IS_REMOVED)
        .map(|c| {
            let index = format!("idx_{}_{}", meta.label.as_str().replace('.', "_"), c.name);
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {}({})",
                quote_ident(&index),
                quote_ident(meta.label.as_str()),
                quote_ident(&c.name)
            )
        })
        .collect()
}

/// Converts a value to its stored form.
///
/// Booleans are stored as 0/1 and timestamps as microseconds since the
/// Unix epoch.
#[must_use]
pub fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Integer(i) => SqlValue::Integer(*i),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Timestamp(t) => SqlValue::Integer(t.timestamp_micros()),
    }
}

/// Converts a stored value back, guided by the column kind.
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] if the stored value does not fit the
/// column.
pub fn from_sql(column: &FieldDef, raw: ValueRef<'_>) -> Result<Value> {
    let mismatch = || Error::OperationFailed {
        operation: "read_row".to_string(),
        cause: format!("column '{}' holds an unexpected value", column.name),
    };

    match (&column.kind, raw) {
        (_, ValueRef::Null) => Ok(Value::Null),
        (FieldKind::Bool, ValueRef::Integer(i)) => Ok(Value::Bool(i != 0)),
        (FieldKind::Integer | FieldKind::Reference(_), ValueRef::Integer(i)) => {
            Ok(Value::Integer(i))
        },
        (FieldKind::Timestamp, ValueRef::Integer(i)) => DateTime::from_timestamp_micros(i)
            .map(Value::Timestamp)
            .ok_or_else(mismatch),
        (FieldKind::Text, ValueRef::Text(bytes)) => std::str::from_utf8(bytes)
            .map(|s| Value::Text(s.to_string()))
            .map_err(|_| mismatch()),
        _ => Err(mismatch()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ModelSchema, OnDelete};
    use crate::schema::Registry;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("library.author"), "\"library.author\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(1, 3), "?1, ?2, ?3");
        assert_eq!(placeholders(4, 1), "?4");
        assert_eq!(placeholders(1, 0), "");
    }

    #[test]
    fn test_id_set_binds_one_json_array() {
        assert_eq!(id_set(3), "SELECT value FROM json_each(?3)");
        assert_eq!(
            id_set_param(&[RecordId::new(4), RecordId::new(9)]),
            SqlValue::Text("[4,9]".to_string())
        );
        assert_eq!(id_set_param(&[]), SqlValue::Text("[]".to_string()));
    }

    #[test]
    fn test_create_table_sql() {
        let registry = Registry::builder()
            .model(ModelSchema::new("library.author"))
            .model(
                ModelSchema::new("library.book")
                    .soft_delete()
                    .field("title", FieldKind::Text)
                    .foreign_key("author", "library.author", OnDelete::Cascade),
            )
            .build()
            .unwrap();
        let sql = create_table_sql(registry.model(&"library.book".into()).unwrap());

        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"library.book\""));
        assert!(sql.contains("\"title\" TEXT NOT NULL"));
        assert!(sql.contains("\"author\" INTEGER NOT NULL REFERENCES \"library.author\"(id)"));
        assert!(sql.contains("\"is_removed\" INTEGER NOT NULL DEFAULT 0"));
        assert!(sql.contains("\"removed_at\" INTEGER,") || sql.ends_with("\"removed_at\" INTEGER\n)"));
    }

    #[test]
    fn test_timestamp_conversion_keeps_microseconds() {
        let column = FieldDef::nullable("removed_at", FieldKind::Timestamp);
        let at = Utc.with_ymd_and_hms(2025, 5, 1, 12, 30, 0).unwrap();
        let SqlValue::Integer(raw) = to_sql(&Value::Timestamp(at)) else {
            unreachable!("timestamps are stored as integers");
        };
        assert_eq!(
            from_sql(&column, ValueRef::Integer(raw)).unwrap(),
            Value::Timestamp(at)
        );
    }

    #[test]
    fn test_from_sql_rejects_mismatch() {
        let column = FieldDef::new("flag", FieldKind::Bool);
        assert!(from_sql(&column, ValueRef::Text(b"yes")).is_err());
        assert_eq!(
            from_sql(&column, ValueRef::Integer(1)).unwrap(),
            Value::Bool(true)
        );
    }
}
