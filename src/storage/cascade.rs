//! Cascading-object discovery and native physical deletion.
//!
//! Both walk reverse relations breadth-first from a root set, one
//! [`RecordStore::referencing`] query per (batch, relation), and never visit
//! an identity twice.

use super::traits::RecordStore;
use crate::collector::Collection;
use crate::models::{ModelLabel, OnDelete, PropagationResult, RecordId, RecordKey};
use crate::schema::Registry;
use crate::{Error, Result};
use std::collections::VecDeque;
use tracing::{debug, instrument, warn};

/// Rows a hard delete of the roots would touch.
#[derive(Debug, Clone, Default)]
pub struct NestedObjects {
    collection: Collection,
    protected: Collection,
}

/// A reference between two collected models that must be cleared before
/// either side can be deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detach {
    /// Model holding the reference.
    pub model: ModelLabel,
    /// Nullable foreign-key field to clear.
    pub field: String,
    /// Referenced model.
    pub target: ModelLabel,
}

/// How to physically delete a collection: references to clear first, then
/// one batch per model, every model after the models that reference it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionPlan {
    /// References that close a cycle between models.
    pub detach: Vec<Detach>,
    /// Ids per model, in delete order.
    pub batches: Vec<(ModelLabel, Vec<RecordId>)>,
}

impl NestedObjects {
    /// Roots and every dependent reached.
    #[must_use]
    pub const fn collection(&self) -> &Collection {
        &self.collection
    }

    /// Rows that reference a collected row through a `Protect` relation the
    /// walk did not follow, and that are not themselves collected.
    #[must_use]
    pub fn protected(&self) -> Collection {
        let mut outside = Collection::new();
        for key in self.protected.keys() {
            if !self.collection.contains(&key) {
                outside.add(&key);
            }
        }
        outside
    }

    /// Consumes the walk, keeping only the collection.
    #[must_use]
    pub fn into_collection(self) -> Collection {
        self.collection
    }

    /// Orders the collected models so that each is deleted after every
    /// collected model referencing it.
    ///
    /// All rows of a model go in one batch, so references between rows of
    /// the same model never block the delete. A cycle between different
    /// models is broken by clearing one of its nullable cascade references;
    /// a cycle without one is left to the store to reject.
    ///
    /// # Errors
    ///
    /// Returns an error if a collected model is not registered.
    pub fn deletion_plan(&self, registry: &Registry) -> Result<DeletionPlan> {
        let models: Vec<ModelLabel> = self
            .collection
            .models()
            .filter(|model| !self.collection.ids(model).is_empty())
            .cloned()
            .collect();

        // (referencing, field, referenced, nullable cascade)
        let mut edges: Vec<(ModelLabel, String, ModelLabel, bool)> = Vec::new();
        for model in &models {
            for relation in registry.model(model)?.reverse_relations() {
                let child = &relation.related_model;
                if child == model
                    || relation.on_delete == OnDelete::SetNull
                    || !models.contains(child)
                {
                    continue;
                }
                edges.push((
                    child.clone(),
                    relation.name.clone(),
                    model.clone(),
                    relation.nullable && relation.on_delete == OnDelete::Cascade,
                ));
            }
        }

        let mut plan = DeletionPlan::default();
        let mut pending = models;
        while !pending.is_empty() {
            let ready = pending.iter().position(|model| {
                !edges
                    .iter()
                    .any(|(child, _, target, _)| target == model && pending.contains(child))
            });
            if let Some(index) = ready {
                let model = pending.remove(index);
                let ids = self.collection.ids(&model);
                plan.batches.push((model, ids));
                continue;
            }

            let before = edges.len();
            edges.retain(|(child, field, target, breakable)| {
                let cut = *breakable && pending.contains(child) && pending.contains(target);
                if cut {
                    plan.detach.push(Detach {
                        model: child.clone(),
                        field: field.clone(),
                        target: target.clone(),
                    });
                }
                !cut
            });
            if edges.len() == before {
                warn!(models = pending.len(), "Reference cycle without a nullable link");
                for model in pending.drain(..) {
                    let ids = self.collection.ids(&model);
                    plan.batches.push((model, ids));
                }
            }
        }
        Ok(plan)
    }
}

/// Walks reverse relations from `roots`.
///
/// `Cascade` relations are always followed. Other relations are followed
/// only when `include_optional` is set; otherwise rows behind an unfollowed
/// `Protect` relation are recorded as protected.
///
/// # Errors
///
/// Returns an error if a model is unknown or a lookup fails.
#[instrument(
    name = "lazarus.cascade.nested_objects",
    skip(store, roots),
    fields(roots = roots.len())
)]
pub fn nested_objects(
    store: &dyn RecordStore,
    roots: &[RecordKey],
    include_optional: bool,
) -> Result<NestedObjects> {
    let registry = store.registry();
    let mut nested = NestedObjects::default();
    let mut queue: VecDeque<(ModelLabel, Vec<RecordId>)> = VecDeque::new();

    for key in roots {
        if nested.collection.add(key) {
            match queue.iter_mut().find(|(m, _)| *m == key.model) {
                Some((_, ids)) => ids.push(key.id),
                None => queue.push_back((key.model.clone(), vec![key.id])),
            }
        }
    }

    while let Some((model, ids)) = queue.pop_front() {
        let meta = registry.model(&model)?;
        for relation in meta.reverse_relations() {
            let follow = relation.is_cascading() || include_optional;
            if !follow && relation.on_delete != OnDelete::Protect {
                continue;
            }

            let children = store.referencing(&relation.related_model, &relation.name, &ids)?;
            if children.is_empty() {
                continue;
            }
            if !follow {
                for id in children {
                    nested
                        .protected
                        .add(&RecordKey::new(relation.related_model.clone(), id));
                }
                continue;
            }

            let next: Vec<RecordId> = children
                .into_iter()
                .filter(|id| {
                    nested
                        .collection
                        .add(&RecordKey::new(relation.related_model.clone(), *id))
                })
                .collect();
            if !next.is_empty() {
                debug!(
                    model = %relation.related_model,
                    via = %relation.name,
                    count = next.len(),
                    "Collected dependents"
                );
                queue.push_back((relation.related_model.clone(), next));
            }
        }
    }

    Ok(nested)
}

/// Physically deletes `roots` and everything that cascades from them.
///
/// `SetNull` references to deleted rows are cleared first; `Protect`
/// references abort the whole delete; `DoNothing` references are left to
/// the store, which rejects them if they would dangle. Counts in the result
/// are deleted rows, join rows included.
///
/// # Errors
///
/// Returns [`Error::Protected`] if a protected row references a row to be
/// deleted, and [`Error::IntegrityViolation`] if the store refuses the
/// delete.
#[instrument(name = "lazarus.cascade.delete", skip(store, roots), fields(roots = roots.len()))]
pub fn delete(store: &dyn RecordStore, roots: &[RecordKey]) -> Result<PropagationResult> {
    let nested = nested_objects(store, roots, false)?;

    let protected = nested.protected();
    if let Some(model) = protected.models().next() {
        let count = protected.ids(model).len();
        warn!(model = %model, count, "Delete refused by protected references");
        return Err(Error::Protected {
            model: model.to_string(),
            count,
        });
    }

    let registry = store.registry();
    let collection = nested.collection();
    for model in collection.models() {
        let ids = collection.ids(model);
        for relation in registry.model(model)?.reverse_relations() {
            if relation.on_delete == OnDelete::SetNull {
                store.set_null(&relation.related_model, &relation.name, &ids)?;
            }
        }
    }

    let plan = nested.deletion_plan(registry)?;
    for detach in &plan.detach {
        debug!(model = %detach.model, field = %detach.field, "Clearing cyclic reference");
        store.set_null(&detach.model, &detach.field, &collection.ids(&detach.target))?;
    }

    let mut result = PropagationResult::new();
    for (model, ids) in &plan.batches {
        let deleted = store.delete_rows(model, ids)?;
        result.record(model.as_str(), deleted);
    }

    warn!(total = result.total, "Rows physically deleted");
    Ok(result)
}
