//! Model registry and relation metadata.
//!
//! Models are declared with [`ModelSchema`](crate::models::ModelSchema) and
//! registered once; the resulting [`Registry`] is immutable and answers every
//! metadata question the collectors and stores ask.

mod registry;
mod relation;

pub use registry::{
    JOIN_SOURCE, JOIN_TARGET, ModelMeta, ModelRef, PRIMARY_KEY, Registry, RegistryBuilder,
};
pub use relation::{Relation, RelationDirection};
