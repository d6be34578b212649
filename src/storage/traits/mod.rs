//! Storage backend traits.

mod store;

pub use store::{Filter, RecordStore, View, atomically};
