//! Data models for lazarus.
//!
//! Records and their values, model declarations, and operation results.

mod record;
mod result;
mod schema;

pub use record::{Changes, Record, RecordId, RecordKey, Value};
pub use result::PropagationResult;
pub use schema::{
    Cardinality, FieldDef, FieldKind, ForeignKey, IS_REMOVED, ManyToMany, ModelLabel, ModelSchema,
    OnDelete, REMOVED_AT, RetentionPolicy,
};
