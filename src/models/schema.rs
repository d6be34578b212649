//! Model declarations: fields, foreign keys and soft-delete capability.
//!
//! A [`ModelSchema`] is what a host application declares. The
//! [`Registry`](crate::schema::Registry) validates a set of them, injects the
//! soft-delete columns and derives relation metadata in both directions.
//!
//! # Example
//!
//! ```rust
//! use lazarus::models::{FieldKind, ModelSchema, OnDelete};
//!
//! let book = ModelSchema::new("library.book")
//!     .soft_delete()
//!     .field("title", FieldKind::Text)
//!     .foreign_key("author", "library.author", OnDelete::Cascade)
//!     .nullable_foreign_key("editor", "library.editor", OnDelete::SetNull)
//!     .many_to_many("tags", "library.tag");
//! assert!(book.is_soft_delete());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Column holding the removed flag on soft-deletable models.
pub const IS_REMOVED: &str = "is_removed";

/// Column holding the removal timestamp on soft-deletable models.
pub const REMOVED_AT: &str = "removed_at";

/// Stable, human-readable label of a model (e.g. `library.author`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelLabel(String);

impl ModelLabel {
    /// Creates a model label.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// Returns the label as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ModelLabel {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ModelLabel {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for ModelLabel {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Storage type of a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Boolean flag.
    Bool,
    /// 64-bit integer.
    Integer,
    /// UTF-8 text.
    Text,
    /// UTC timestamp.
    Timestamp,
    /// Foreign key holding the primary key of the target model.
    Reference(ModelLabel),
}

/// A plain column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Column name.
    pub name: String,
    /// Storage type.
    pub kind: FieldKind,
    /// Whether `NULL` is allowed.
    pub nullable: bool,
}

impl FieldDef {
    /// Creates a non-null column.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
        }
    }

    /// Creates a nullable column.
    #[must_use]
    pub fn nullable(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            nullable: true,
            ..Self::new(name, kind)
        }
    }
}

/// What happens to referencing rows when the referenced row is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnDelete {
    /// Referencing rows are deleted (or soft-removed) too.
    Cascade,
    /// Deletion is refused while referencing rows exist.
    Protect,
    /// The referencing column is set to `NULL`.
    SetNull,
    /// Nothing happens; the store is left to cope.
    DoNothing,
}

/// Relation cardinality, seen from the side that declares it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// At most one row on each side.
    OneToOne,
    /// Many rows here point to one row there.
    ManyToOne,
    /// One row here is pointed to by many rows there.
    OneToMany,
    /// Many rows on each side, linked through a join model.
    ManyToMany,
}

impl Cardinality {
    /// Returns `true` when this side resolves to at most one related row.
    #[must_use]
    pub const fn is_singular(self) -> bool {
        matches!(self, Self::OneToOne | Self::ManyToOne)
    }
}

/// A foreign key declared on a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Column name on the declaring model.
    pub name: String,
    /// Referenced model.
    pub target: ModelLabel,
    /// Referential action.
    pub on_delete: OnDelete,
    /// Whether the reference may be absent.
    pub nullable: bool,
    /// `OneToOne` or `ManyToOne`.
    pub cardinality: Cardinality,
}

/// A many-to-many field; realised as a hidden join model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManyToMany {
    /// Field name on the declaring model.
    pub name: String,
    /// The other side.
    pub target: ModelLabel,
}

/// How long removed rows of a soft-deletable model are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Take the value resolved from configuration at registration time.
    #[default]
    Inherit,
    /// Expire this many days after removal.
    Days(u32),
    /// Never expire.
    Never,
}

/// Declaration of one model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSchema {
    /// Model label.
    pub label: ModelLabel,
    /// Plain columns (foreign keys excluded).
    pub fields: Vec<FieldDef>,
    /// Foreign keys.
    pub foreign_keys: Vec<ForeignKey>,
    /// Many-to-many fields.
    pub many_to_many: Vec<ManyToMany>,
    /// Soft-delete capability; `None` for ordinary models.
    pub soft_delete: Option<RetentionPolicy>,
    /// System-generated model (join tables).
    pub auto_created: bool,
}

impl ModelSchema {
    /// Declares an ordinary model with no fields.
    #[must_use]
    pub fn new(label: impl Into<ModelLabel>) -> Self {
        Self {
            label: label.into(),
            fields: Vec::new(),
            foreign_keys: Vec::new(),
            many_to_many: Vec::new(),
            soft_delete: None,
            auto_created: false,
        }
    }

    /// Marks the model soft-deletable with the configured retention.
    #[must_use]
    pub fn soft_delete(mut self) -> Self {
        self.soft_delete = Some(RetentionPolicy::Inherit);
        self
    }

    /// Marks the model soft-deletable with a fixed retention period.
    #[must_use]
    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.soft_delete = Some(RetentionPolicy::Days(days));
        self
    }

    /// Marks the model soft-deletable and never expiring.
    #[must_use]
    pub fn never_expires(mut self) -> Self {
        self.soft_delete = Some(RetentionPolicy::Never);
        self
    }

    /// Adds a non-null column.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldDef::new(name, kind));
        self
    }

    /// Adds a nullable column.
    #[must_use]
    pub fn nullable_field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldDef::nullable(name, kind));
        self
    }

    /// Adds a required many-to-one reference.
    #[must_use]
    pub fn foreign_key(
        self,
        name: impl Into<String>,
        target: impl Into<ModelLabel>,
        on_delete: OnDelete,
    ) -> Self {
        self.reference(name, target, on_delete, false, Cardinality::ManyToOne)
    }

    /// Adds an optional many-to-one reference.
    #[must_use]
    pub fn nullable_foreign_key(
        self,
        name: impl Into<String>,
        target: impl Into<ModelLabel>,
        on_delete: OnDelete,
    ) -> Self {
        self.reference(name, target, on_delete, true, Cardinality::ManyToOne)
    }

    /// Adds a required one-to-one reference.
    #[must_use]
    pub fn one_to_one(
        self,
        name: impl Into<String>,
        target: impl Into<ModelLabel>,
        on_delete: OnDelete,
    ) -> Self {
        self.reference(name, target, on_delete, false, Cardinality::OneToOne)
    }

    /// Adds a many-to-many field.
    #[must_use]
    pub fn many_to_many(mut self, name: impl Into<String>, target: impl Into<ModelLabel>) -> Self {
        self.many_to_many.push(ManyToMany {
            name: name.into(),
            target: target.into(),
        });
        self
    }

    fn reference(
        mut self,
        name: impl Into<String>,
        target: impl Into<ModelLabel>,
        on_delete: OnDelete,
        nullable: bool,
        cardinality: Cardinality,
    ) -> Self {
        self.foreign_keys.push(ForeignKey {
            name: name.into(),
            target: target.into(),
            on_delete,
            nullable,
            cardinality,
        });
        self
    }

    /// Whether the model carries the soft-delete capability.
    #[must_use]
    pub const fn is_soft_delete(&self) -> bool {
        self.soft_delete.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_collects_declarations() {
        let schema = ModelSchema::new("library.book")
            .with_retention_days(7)
            .field("title", FieldKind::Text)
            .nullable_field("isbn", FieldKind::Text)
            .foreign_key("author", "library.author", OnDelete::Cascade)
            .one_to_one("cover", "library.cover", OnDelete::Protect)
            .many_to_many("tags", "library.tag");

        assert_eq!(schema.soft_delete, Some(RetentionPolicy::Days(7)));
        assert_eq!(schema.fields.len(), 2);
        assert!(schema.fields[1].nullable);
        assert_eq!(schema.foreign_keys[0].cardinality, Cardinality::ManyToOne);
        assert_eq!(schema.foreign_keys[1].cardinality, Cardinality::OneToOne);
        assert!(!schema.foreign_keys[1].nullable);
        assert_eq!(schema.many_to_many[0].target.as_str(), "library.tag");
    }

    #[test]
    fn test_ordinary_model_is_not_soft_delete() {
        assert!(!ModelSchema::new("library.tag").is_soft_delete());
        assert!(ModelSchema::new("library.tag").never_expires().is_soft_delete());
    }

    #[test]
    fn test_singular_cardinalities() {
        assert!(Cardinality::OneToOne.is_singular());
        assert!(Cardinality::ManyToOne.is_singular());
        assert!(!Cardinality::OneToMany.is_singular());
        assert!(!Cardinality::ManyToMany.is_singular());
    }
}
