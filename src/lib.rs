//! # Lazarus
//!
//! Reversible ("soft") deletion for records held in a relational record store.
//!
//! Removing a record flips its `is_removed` flag and stamps `removed_at` instead
//! of erasing the row. Restoring clears both. Once a removed record is older
//! than its model's retention period it becomes eligible for physical purge.
//!
//! The interesting part is the graph walk: a single remove or restore must
//! reach every related record that the corresponding hard operation would
//! touch, honouring cascade, protect and set-null semantics while replacing
//! "delete" with "mark removed".
//!
//! ## Layers
//!
//! - [`schema`]: model catalogue, relation metadata and the soft-delete classifier
//! - [`storage`]: the [`RecordStore`] boundary plus `SQLite` and in-memory stores
//! - [`collector`]: forward/reverse relation-graph collectors, batch propagation
//!   and result aggregation
//! - [`lifecycle`]: per-record ([`SoftDelete`]) and per-set ([`RecordSet`]) operations
//!
//! ## Example
//!
//! ```rust,ignore
//! use lazarus::{InMemoryStore, ModelSchema, OnDelete, RecordId, RecordStore, Registry, SoftDelete, SystemClock};
//!
//! let registry = Registry::builder()
//!     .model(ModelSchema::new("library.author").soft_delete())
//!     .model(
//!         ModelSchema::new("library.book")
//!             .soft_delete()
//!             .foreign_key("author", "library.author", OnDelete::Cascade),
//!     )
//!     .build()?;
//!
//! let store = InMemoryStore::new(registry);
//! let lifecycle = SoftDelete::new(&store, &SystemClock);
//!
//! let author = store.get(&"library.author".into(), RecordId::new(1))?.unwrap();
//! let removed = lifecycle.remove(&author)?; // author + books
//! let restored = lifecycle.restore(&author, false)?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod clock;
pub mod collector;
pub mod config;
pub mod lifecycle;
pub mod models;
pub mod observability;
pub mod schema;
pub mod storage;

pub use clock::{Clock, FixedClock, SystemClock};
pub use collector::{Collection, Collector, ForwardRelatedCollector, ReverseRelatedCollector};
pub use config::{LazarusConfig, RetentionConfig};
pub use lifecycle::{RecordSet, SoftDelete, View};
pub use models::{
    Cardinality, Changes, FieldDef, FieldKind, ForeignKey, ModelLabel, ModelSchema, OnDelete,
    PropagationResult, Record, RecordId, RecordKey, RetentionPolicy, Value,
};
pub use schema::{ModelRef, Registry, RegistryBuilder, Relation, RelationDirection};
pub use storage::{Filter, InMemoryStore, RecordStore, SqliteStore};

/// Error type for lazarus operations.
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Arguments are malformed (e.g. an id-less record where an id is needed) |
/// | `InvalidSchema` | The model catalogue fails validation |
/// | `UnknownModel` | A label is not registered |
/// | `FieldNotFound` | A change set or view names a field the model lacks |
/// | `IntegrityViolation` | The store rejects a write on a constraint |
/// | `Protected` | A physical delete would orphan rows behind a `Protect` relation |
/// | `OperationFailed` | Any other storage or I/O failure |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The schema catalogue is inconsistent.
    ///
    /// Raised when:
    /// - A foreign key targets an unregistered model
    /// - A model or field name is declared twice
    /// - A label or field name is not a plain identifier
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// A model label is not present in the registry.
    #[error("unknown model: {0}")]
    UnknownModel(String),

    /// A field was addressed on a model that does not declare it.
    ///
    /// This is the fail-fast outcome of treating an ordinary model as
    /// soft-deletable: the removal fields simply do not exist on it.
    #[error("model '{model}' has no field '{field}'")]
    FieldNotFound {
        /// The model label.
        model: String,
        /// The missing field.
        field: String,
    },

    /// The store rejected a write because of a constraint.
    #[error("integrity violation during '{operation}': {cause}")]
    IntegrityViolation {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// Physical deletion is blocked by protected references.
    #[error("cannot delete: {count} '{model}' row(s) reference it through a protected relation")]
    Protected {
        /// The referencing model label.
        model: String,
        /// Number of referencing rows.
        count: usize,
    },

    /// An operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

/// Result type alias for lazarus operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidInput("missing id".to_string());
        assert_eq!(err.to_string(), "invalid input: missing id");

        let err = Error::FieldNotFound {
            model: "library.tag".to_string(),
            field: "is_removed".to_string(),
        };
        assert_eq!(err.to_string(), "model 'library.tag' has no field 'is_removed'");

        let err = Error::Protected {
            model: "library.loan".to_string(),
            count: 2,
        };
        assert!(err.to_string().contains("2 'library.loan' row(s)"));
    }
}
