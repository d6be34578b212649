//! Record types, identifiers and field values.

use super::schema::{IS_REMOVED, ModelLabel, REMOVED_AT};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Primary-key identity of a persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(i64);

impl RecordId {
    /// Creates a record ID from a raw primary key.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw primary key.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// A `(model, identity)` pair naming one row anywhere in the store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    /// Model the row belongs to.
    pub model: ModelLabel,
    /// Primary key of the row.
    pub id: RecordId,
}

impl RecordKey {
    /// Creates a new record key.
    #[must_use]
    pub fn new(model: impl Into<ModelLabel>, id: impl Into<RecordId>) -> Self {
        Self {
            model: model.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.model, self.id)
    }
}

/// A single column value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// SQL `NULL`.
    Null,
    /// Boolean flag.
    Bool(bool),
    /// Integer, also used for foreign-key references.
    Integer(i64),
    /// UTF-8 text.
    Text(String),
    /// UTC timestamp.
    Timestamp(DateTime<Utc>),
}

impl Value {
    /// Returns `true` for [`Value::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the boolean payload, if any.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer payload, if any.
    #[must_use]
    pub const fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the timestamp payload, if any.
    #[must_use]
    pub const fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<RecordId> for Value {
    fn from(id: RecordId) -> Self {
        Self::Integer(id.get())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self {
        Self::Timestamp(ts)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// A row of some model, as read from or written to a store.
///
/// `id` is `None` until the store assigns one on insert. Unsaved records can
/// still seed a graph walk (their references are followed) but are never part
/// of a bulk update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Model the record belongs to.
    pub model: ModelLabel,
    /// Primary key, once persisted.
    pub id: Option<RecordId>,
    /// Column values keyed by field name.
    pub values: BTreeMap<String, Value>,
}

impl Record {
    /// Creates an unsaved record with no values.
    #[must_use]
    pub fn new(model: impl Into<ModelLabel>) -> Self {
        Self {
            model: model.into(),
            id: None,
            values: BTreeMap::new(),
        }
    }

    /// Sets the primary key.
    #[must_use]
    pub const fn with_id(mut self, id: RecordId) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets a column value.
    #[must_use]
    pub fn with_value(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(field.into(), value.into());
        self
    }

    /// Returns a column value.
    #[must_use]
    pub fn value(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// Returns the row referenced by a foreign-key column, if set.
    #[must_use]
    pub fn reference(&self, field: &str) -> Option<RecordId> {
        self.value(field)
            .and_then(Value::as_integer)
            .map(RecordId::new)
    }

    /// Returns the store-wide key, if the record is persisted.
    #[must_use]
    pub fn key(&self) -> Option<RecordKey> {
        self.id.map(|id| RecordKey {
            model: self.model.clone(),
            id,
        })
    }

    /// Whether the record is flagged removed.
    ///
    /// Models without the soft-delete columns always read as not removed.
    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.value(IS_REMOVED)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// When the record was removed, if it is.
    #[must_use]
    pub fn removed_at(&self) -> Option<DateTime<Utc>> {
        self.value(REMOVED_AT).and_then(Value::as_timestamp)
    }
}

/// A field → value map applied by a bulk update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Changes(BTreeMap<String, Value>);

impl Changes {
    /// Creates an empty change set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The removal change set: `is_removed = true`, `removed_at = now`.
    #[must_use]
    pub fn removal(now: DateTime<Utc>) -> Self {
        Self::new()
            .set(IS_REMOVED, true)
            .set(REMOVED_AT, now)
    }

    /// The restoration change set: `is_removed = false`, `removed_at = NULL`.
    #[must_use]
    pub fn restoration() -> Self {
        Self::new()
            .set(IS_REMOVED, false)
            .set(REMOVED_AT, Value::Null)
    }

    /// Adds or replaces a field assignment.
    #[must_use]
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Iterates over assignments in field-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterates over the assigned field names.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Number of assignments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no assignments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Applies the assignments to an in-memory record.
    pub fn apply_to(&self, record: &mut Record) {
        for (field, value) in &self.0 {
            record.values.insert(field.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_reference_reads_integer_only() {
        let record = Record::new("library.book")
            .with_value("author", 7_i64)
            .with_value("editor", Value::Null);
        assert_eq!(record.reference("author"), Some(RecordId::new(7)));
        assert_eq!(record.reference("editor"), None);
        assert_eq!(record.reference("missing"), None);
    }

    #[test]
    fn test_removal_and_restoration_change_sets() {
        let now = Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap();
        let removal = Changes::removal(now);
        assert_eq!(removal.len(), 2);

        let mut record = Record::new("library.author").with_id(RecordId::new(1));
        removal.apply_to(&mut record);
        assert!(record.is_removed());
        assert_eq!(record.removed_at(), Some(now));

        Changes::restoration().apply_to(&mut record);
        assert!(!record.is_removed());
        assert_eq!(record.removed_at(), None);
    }

    #[test]
    fn test_key_requires_identity() {
        let unsaved = Record::new("library.author");
        assert!(unsaved.key().is_none());

        let saved = unsaved.with_id(RecordId::new(3));
        assert_eq!(saved.key().unwrap().to_string(), "library.author#3");
    }

    #[test]
    fn test_option_into_value() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some(4_i64)), Value::Integer(4));
    }
}
