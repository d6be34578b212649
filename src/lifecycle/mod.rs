//! Soft-delete lifecycle.
//!
//! Each row moves Active → Removed → Purged:
//!
//! - [`SoftDelete::remove`] marks a row and its cascade dependents removed
//! - [`SoftDelete::restore`] brings them back, with required ancestors
//! - [`SoftDelete::delete`] purges rows past retention and removes the rest
//! - [`SoftDelete::hard_delete`] purges unconditionally
//!
//! [`RecordSet`] offers the same operations over all rows of a model,
//! narrowed by a [`View`].

mod entity;
mod records;

pub use crate::storage::View;
pub use entity::SoftDelete;
pub use records::RecordSet;
