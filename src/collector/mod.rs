//! Relation-graph collectors.
//!
//! A collector walks the relation graph from a set of roots in one
//! direction and accumulates a [`Collection`]. The accumulated rows are then
//! updated in bulk by [`propagate::update`]:
//!
//! | Collector | Walks | Used by |
//! |-----------|-------|---------|
//! | [`ForwardRelatedCollector`] | required singular references | restore |
//! | [`ReverseRelatedCollector`] | cascading dependents | remove, restore |
//!
//! Restore runs both from the same root and merges the results with
//! [`aggregate::combine`].

pub mod aggregate;
mod collection;
mod forward;
pub mod propagate;
mod reverse;

pub use collection::Collection;
pub use forward::ForwardRelatedCollector;
pub use reverse::ReverseRelatedCollector;

use crate::models::{Changes, PropagationResult, Record};
use crate::storage::RecordStore;
use crate::Result;

/// A graph walk plus the bulk updates it enables.
pub trait Collector {
    /// Walks from `roots`, adding to the collection. Identities already
    /// collected are not revisited.
    ///
    /// # Errors
    ///
    /// Returns an error if a model is unknown or a store lookup fails.
    fn collect(&mut self, roots: &[Record]) -> Result<()>;

    /// What has been collected so far.
    fn collection(&self) -> &Collection;

    /// The store the collector reads and writes.
    fn store(&self) -> &dyn RecordStore;

    /// Applies `changes` with one bulk update per soft-deletable model.
    ///
    /// # Errors
    ///
    /// Returns the first store error.
    fn update(&self, changes: &Changes) -> Result<PropagationResult> {
        propagate::update(self.store(), self.collection(), changes, "update")
    }

    /// Marks every collected soft-deletable row active again.
    ///
    /// # Errors
    ///
    /// Returns the first store error.
    fn restore(&self) -> Result<PropagationResult> {
        propagate::update(
            self.store(),
            self.collection(),
            &Changes::restoration(),
            "restore",
        )
    }
}
