//! Outcome of a propagating operation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Rows affected by one lifecycle operation: a total plus a per-model
/// breakdown keyed by model label.
///
/// Created fresh per operation and never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationResult {
    /// Total rows affected.
    pub total: usize,
    /// Rows affected per model label.
    pub per_model: BTreeMap<String, usize>,
}

impl PropagationResult {
    /// Creates an empty result.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `count` rows for `label`, accumulating into the total.
    pub fn record(&mut self, label: &str, count: usize) {
        *self.per_model.entry(label.to_string()).or_insert(0) += count;
        self.total += count;
    }

    /// Rows affected for one model label (zero if untouched).
    #[must_use]
    pub fn count_for(&self, label: &str) -> usize {
        self.per_model.get(label).copied().unwrap_or(0)
    }

    /// Returns `true` if nothing was affected.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Returns `(total, per_model)`.
    #[must_use]
    pub fn into_parts(self) -> (usize, BTreeMap<String, usize>) {
        (self.total, self.per_model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_accumulates() {
        let mut result = PropagationResult::new();
        result.record("library.book", 2);
        result.record("library.book", 1);
        result.record("library.author", 1);

        assert_eq!(result.total, 4);
        assert_eq!(result.count_for("library.book"), 3);
        assert_eq!(result.count_for("library.tag"), 0);
    }

    #[test]
    fn test_serializes_as_json() {
        let mut result = PropagationResult::new();
        result.record("library.author", 1);
        let json = serde_json::to_string(&result).unwrap();
        assert_eq!(json, r#"{"total":1,"per_model":{"library.author":1}}"#);
    }
}
