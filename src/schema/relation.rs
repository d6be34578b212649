//! Relation metadata derived from model declarations.

use crate::models::{Cardinality, ModelLabel, OnDelete};
use serde::{Deserialize, Serialize};

/// Which way a relation points, seen from its owning model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationDirection {
    /// The owning model holds a reference to the related model.
    Forward,
    /// The related model holds a reference to the owning model.
    Reverse,
}

/// One edge of the model graph, as seen from `model`.
///
/// For a forward relation, `name` is the column on `model`. For a reverse
/// relation, `name` is the column on `related_model` that points back here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    /// Field name (see type docs for which side holds it).
    pub name: String,
    /// Owning model.
    pub model: ModelLabel,
    /// Model on the other end.
    pub related_model: ModelLabel,
    /// Direction relative to `model`.
    pub direction: RelationDirection,
    /// Cardinality seen from `model`.
    pub cardinality: Cardinality,
    /// Whether the underlying column may be `NULL`.
    pub nullable: bool,
    /// Referential action of the underlying column.
    pub on_delete: OnDelete,
    /// System-generated (reverse accessors); never walked forward.
    pub auto_created: bool,
    /// Backed by a column on `model`.
    pub concrete: bool,
}

impl Relation {
    /// Whether the forward collector may follow this relation.
    ///
    /// Only declared, column-backed, singular references qualify; nullable
    /// ones are further skipped by the collector itself.
    #[must_use]
    pub const fn is_forward_candidate(&self) -> bool {
        matches!(self.direction, RelationDirection::Forward)
            && !self.auto_created
            && self.concrete
            && self.cardinality.is_singular()
    }

    /// Whether deleting the owning row would cascade into the related rows.
    #[must_use]
    pub const fn is_cascading(&self) -> bool {
        matches!(self.direction, RelationDirection::Reverse)
            && matches!(self.on_delete, OnDelete::Cascade)
    }
}
