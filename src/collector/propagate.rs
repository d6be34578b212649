//! Batch propagation: one bulk update per soft-deletable model.

use super::collection::Collection;
use crate::models::{Changes, PropagationResult};
use crate::storage::RecordStore;
use crate::Result;
use tracing::{debug, instrument};

/// Applies `changes` to every collected, persisted row of a soft-deletable
/// model.
///
/// Models are visited in first-seen order and each gets exactly one
/// [`RecordStore::update_many`] call, so the number of statements is the
/// number of distinct models, never the number of rows. Models outside the
/// soft-delete capability and unsaved records are skipped.
///
/// `operation` labels the metrics (`remove`, `restore`, ...).
///
/// # Errors
///
/// Returns the first store error; rows updated by earlier statements are
/// only rolled back if the caller runs this inside a unit of work.
#[instrument(
    name = "lazarus.collector.update",
    skip(store, collection, changes),
    fields(models = collection.models().count(), rows = collection.len())
)]
pub fn update(
    store: &dyn RecordStore,
    collection: &Collection,
    changes: &Changes,
    operation: &'static str,
) -> Result<PropagationResult> {
    let registry = store.registry();
    let mut result = PropagationResult::new();

    for model in collection.models() {
        if !registry.is_soft_delete(model) {
            debug!(model = %model, "Skipping model without soft delete");
            continue;
        }
        let ids = collection.ids(model);
        if ids.is_empty() {
            debug!(model = %model, unsaved = collection.unsaved(model), "No persisted rows");
            continue;
        }

        let count = store.update_many(model, &ids, changes)?;
        metrics::counter!("lazarus_bulk_statements_total", "operation" => operation).increment(1);
        metrics::counter!(
            "lazarus_rows_updated_total",
            "model" => model.to_string(),
            "operation" => operation
        )
        .increment(count as u64);
        debug!(model = %model, rows = count, "Bulk update applied");

        result.record(model.as_str(), count);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ModelSchema, OnDelete, Record, RecordKey};
    use crate::schema::Registry;
    use crate::storage::InMemoryStore;
    use chrono::Utc;

    fn store() -> InMemoryStore {
        let registry = Registry::builder()
            .model(ModelSchema::new("library.shelf"))
            .model(
                ModelSchema::new("library.book")
                    .soft_delete()
                    .foreign_key("shelf", "library.shelf", OnDelete::Cascade),
            )
            .build()
            .unwrap();
        InMemoryStore::new(registry)
    }

    #[test]
    fn test_one_statement_per_model_and_plain_models_skipped() {
        let store = store();
        let shelf = store.insert(&Record::new("library.shelf")).unwrap();
        let mut collection = Collection::new();
        collection.add(&RecordKey::new("library.shelf", shelf));
        for _ in 0..10 {
            let id = store
                .insert(&Record::new("library.book").with_value("shelf", shelf))
                .unwrap();
            collection.add(&RecordKey::new("library.book", id));
        }
        collection.add_record(&Record::new("library.book"));

        let result = update(&store, &collection, &Changes::removal(Utc::now()), "remove").unwrap();

        assert_eq!(result.total, 10);
        assert_eq!(result.count_for("library.book"), 10);
        assert_eq!(result.count_for("library.shelf"), 0);
        assert!(!result.per_model.contains_key("library.shelf"));
        assert_eq!(store.update_statements(), 1);
    }

    #[test]
    fn test_empty_collection_updates_nothing() {
        let store = store();
        let result =
            update(&store, &Collection::new(), &Changes::restoration(), "restore").unwrap();
        assert!(result.is_empty());
        assert_eq!(store.update_statements(), 0);
    }
}
