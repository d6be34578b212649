//! Column value checks shared by the stores.

use super::traits::Filter;
use crate::models::{FieldDef, FieldKind, ForeignKey, IS_REMOVED, ModelLabel, Record, Value};
use crate::schema::{ModelMeta, Registry};
use crate::{Error, Result};
use std::collections::BTreeMap;

/// Checks that `value` fits `column`.
///
/// # Errors
///
/// Returns [`Error::IntegrityViolation`] for `NULL` in a non-null column and
/// [`Error::InvalidInput`] for a value of the wrong kind.
pub fn check_value(meta: &ModelMeta, column: &FieldDef, value: &Value) -> Result<()> {
    let fits = match (&column.kind, value) {
        (_, Value::Null) => {
            if column.nullable {
                return Ok(());
            }
            return Err(not_null_violation(meta, &column.name));
        },
        (FieldKind::Bool, Value::Bool(_))
        | (FieldKind::Integer | FieldKind::Reference(_), Value::Integer(_))
        | (FieldKind::Text, Value::Text(_))
        | (FieldKind::Timestamp, Value::Timestamp(_)) => true,
        _ => false,
    };

    if fits {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "'{}.{}' expects {:?}, got {value:?}",
            meta.label, column.name, column.kind
        )))
    }
}

/// Builds the full column map for a new row: every declared column present,
/// missing ones defaulted.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if the record already has an id,
/// [`Error::FieldNotFound`] if it names a column the model lacks, or any
/// error from [`check_value`].
pub fn prepare_row(meta: &ModelMeta, record: &Record) -> Result<BTreeMap<String, Value>> {
    if let Some(id) = record.id {
        return Err(Error::InvalidInput(format!(
            "record of '{}' already has id {id}",
            meta.label
        )));
    }
    if let Some(unknown) = record.values.keys().find(|k| meta.column(k).is_none()) {
        return Err(Error::FieldNotFound {
            model: meta.label.to_string(),
            field: unknown.clone(),
        });
    }

    let mut row = BTreeMap::new();
    for column in &meta.columns {
        let value = match record.value(&column.name) {
            Some(value) => value.clone(),
            None if column.name == IS_REMOVED => Value::Bool(false),
            None => Value::Null,
        };
        check_value(meta, column, &value)?;
        row.insert(column.name.clone(), value);
    }
    Ok(row)
}

/// Looks up a model for a filtered query.
///
/// # Errors
///
/// Returns [`Error::FieldNotFound`] if the filter reads soft-delete columns
/// and the model has none.
pub fn filtered_model<'r>(
    registry: &'r Registry,
    model: &ModelLabel,
    filter: &Filter,
) -> Result<&'r ModelMeta> {
    let meta = registry.model(model)?;
    if filter.needs_soft_delete() && !meta.soft_delete {
        return Err(Error::FieldNotFound {
            model: model.to_string(),
            field: IS_REMOVED.to_string(),
        });
    }
    Ok(meta)
}

/// Looks up a declared foreign key.
///
/// # Errors
///
/// Returns [`Error::FieldNotFound`] if `field` is not a foreign key of the
/// model.
pub fn foreign_key<'m>(meta: &'m ModelMeta, field: &str) -> Result<&'m ForeignKey> {
    meta.foreign_keys
        .iter()
        .find(|fk| fk.name == field)
        .ok_or_else(|| Error::FieldNotFound {
            model: meta.label.to_string(),
            field: field.to_string(),
        })
}

/// The error a store reports for `NULL` in a non-null column.
pub fn not_null_violation(meta: &ModelMeta, field: &str) -> Error {
    Error::IntegrityViolation {
        operation: "write".to_string(),
        cause: format!("NOT NULL constraint failed: {}.{field}", meta.label),
    }
}
