//! Storage layer.
//!
//! - [`RecordStore`]: the boundary trait the propagation core is written
//!   against (bulk conditional update, filtered select, reverse lookup,
//!   physical delete primitives, unit of work)
//! - [`SqliteStore`]: embedded, file-backed or in-memory
//! - [`InMemoryStore`]: for tests; counts bulk statements
//! - [`cascade`]: cascading-object discovery and native physical delete,
//!   built only on the trait primitives

pub mod cascade;
mod memory;
mod sqlite;
mod traits;
mod transaction;
mod values;

pub use cascade::NestedObjects;
pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{Filter, RecordStore, View, atomically};
