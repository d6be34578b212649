//! Validated model catalogue.
//!
//! The registry is the metadata boundary the collectors rely on: it answers
//! "what relations does this model have, in which direction" and "does this
//! model participate in soft deletion". Both answers are fixed when the
//! registry is built.

use super::relation::{Relation, RelationDirection};
use crate::config::RetentionConfig;
use crate::models::{
    Cardinality, Changes, FieldDef, FieldKind, ForeignKey, IS_REMOVED, ModelLabel, ModelSchema,
    OnDelete, REMOVED_AT, Record, RecordKey, RetentionPolicy,
};
use crate::{Error, Result};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Column name of every model's primary key.
pub const PRIMARY_KEY: &str = "id";

/// Join-model column pointing at the model that declares the many-to-many field.
pub const JOIN_SOURCE: &str = "source";

/// Join-model column pointing at the many-to-many target.
pub const JOIN_TARGET: &str = "target";

/// Anything that names a model: a label, a record, a key.
///
/// Lets the classifier accept either a type or an instance.
pub trait ModelRef {
    /// The model label.
    fn model_label(&self) -> &ModelLabel;
}

impl ModelRef for ModelLabel {
    fn model_label(&self) -> &ModelLabel {
        self
    }
}

impl ModelRef for Record {
    fn model_label(&self) -> &ModelLabel {
        &self.model
    }
}

impl ModelRef for RecordKey {
    fn model_label(&self) -> &ModelLabel {
        &self.model
    }
}

impl ModelRef for ModelSchema {
    fn model_label(&self) -> &ModelLabel {
        &self.label
    }
}

impl ModelRef for ModelMeta {
    fn model_label(&self) -> &ModelLabel {
        &self.label
    }
}

/// Resolved metadata for one registered model.
#[derive(Debug, Clone)]
pub struct ModelMeta {
    /// Model label.
    pub label: ModelLabel,
    /// All columns except the primary key: declared fields, foreign-key
    /// columns and, for soft-deletable models, `is_removed`/`removed_at`.
    pub columns: Vec<FieldDef>,
    /// Declared foreign keys.
    pub foreign_keys: Vec<ForeignKey>,
    /// Relations in both directions.
    pub relations: Vec<Relation>,
    /// Whether the model carries the soft-delete capability.
    pub soft_delete: bool,
    /// Retention resolved at registration (`None` = never expires).
    pub retention_days: Option<u32>,
    /// System-generated join model.
    pub auto_created: bool,
    join_models: BTreeMap<String, ModelLabel>,
}

impl ModelMeta {
    /// Returns a column definition.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&FieldDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Forward relations (this model references another).
    pub fn forward_relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations
            .iter()
            .filter(|r| r.direction == RelationDirection::Forward)
    }

    /// Reverse relations (another model references this one).
    pub fn reverse_relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations
            .iter()
            .filter(|r| r.direction == RelationDirection::Reverse)
    }
}

/// Validated, immutable model catalogue.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    models: BTreeMap<ModelLabel, ModelMeta>,
    order: Vec<ModelLabel>,
}

impl Registry {
    /// Starts building a registry.
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Looks up a model.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownModel`] if the label is not registered.
    pub fn model(&self, label: &ModelLabel) -> Result<&ModelMeta> {
        self.models
            .get(label)
            .ok_or_else(|| Error::UnknownModel(label.to_string()))
    }

    /// Whether a label is registered.
    #[must_use]
    pub fn contains(&self, label: &ModelLabel) -> bool {
        self.models.contains_key(label)
    }

    /// Registered labels in registration order (join models follow their owner).
    pub fn labels(&self) -> impl Iterator<Item = &ModelLabel> {
        self.order.iter()
    }

    /// Relations of a model in both directions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownModel`] if the label is not registered.
    pub fn relations(&self, label: &ModelLabel) -> Result<&[Relation]> {
        Ok(&self.model(label)?.relations)
    }

    /// Whether a model (given by label or by instance) participates in soft
    /// deletion. Unregistered models never do.
    #[must_use]
    pub fn is_soft_delete<T: ModelRef + ?Sized>(&self, obj: &T) -> bool {
        self.models
            .get(obj.model_label())
            .is_some_and(|meta| meta.soft_delete)
    }

    /// Retention of a model in days (`None` = never expires).
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownModel`] if the label is not registered, or
    /// [`Error::FieldNotFound`] if the model is not soft-deletable.
    pub fn retention_days(&self, label: &ModelLabel) -> Result<Option<u32>> {
        let meta = self.model(label)?;
        if !meta.soft_delete {
            return Err(Error::FieldNotFound {
                model: label.to_string(),
                field: REMOVED_AT.to_string(),
            });
        }
        Ok(meta.retention_days)
    }

    /// The hidden join model behind a many-to-many field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FieldNotFound`] if the model has no such field.
    pub fn join_model(&self, label: &ModelLabel, field: &str) -> Result<&ModelLabel> {
        self.model(label)?
            .join_models
            .get(field)
            .ok_or_else(|| Error::FieldNotFound {
                model: label.to_string(),
                field: field.to_string(),
            })
    }

    /// Checks that every field a change set assigns exists on the model.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FieldNotFound`] for the first missing field.
    pub fn validate_changes(&self, label: &ModelLabel, changes: &Changes) -> Result<()> {
        let meta = self.model(label)?;
        for field in changes.fields() {
            if meta.column(field).is_none() {
                return Err(Error::FieldNotFound {
                    model: label.to_string(),
                    field: field.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Builder for [`Registry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    schemas: Vec<ModelSchema>,
    retention: Option<RetentionConfig>,
}

impl RegistryBuilder {
    /// Adds a model declaration.
    #[must_use]
    pub fn model(mut self, schema: ModelSchema) -> Self {
        self.schemas.push(schema);
        self
    }

    /// Resolves inherited retention against this configuration instead of the
    /// built-in default.
    #[must_use]
    pub fn with_retention(mut self, config: &RetentionConfig) -> Self {
        self.retention = Some(config.clone());
        self
    }

    /// Validates the declarations and derives relation metadata.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSchema`] if labels or field names are invalid
    /// or duplicated, a foreign key targets an unregistered model, a
    /// `SetNull` key is not nullable, or a soft-deletable model declares
    /// `is_removed`/`removed_at` itself.
    pub fn build(self) -> Result<Registry> {
        let retention = self.retention.unwrap_or_default();
        let schemas = expand_many_to_many(self.schemas);

        let mut seen = HashSet::new();
        for schema in &schemas {
            validate_label(&schema.label)?;
            if !seen.insert(schema.label.clone()) {
                return Err(Error::InvalidSchema(format!(
                    "model '{}' declared twice",
                    schema.label
                )));
            }
        }

        let mut registry = Registry::default();
        for schema in &schemas {
            let meta = resolve_model(schema, &seen, &retention)?;
            registry.order.push(meta.label.clone());
            registry.models.insert(meta.label.clone(), meta);
        }

        // Reverse relations, now that every model exists.
        for schema in &schemas {
            for fk in &schema.foreign_keys {
                let reverse = Relation {
                    name: fk.name.clone(),
                    model: fk.target.clone(),
                    related_model: schema.label.clone(),
                    direction: RelationDirection::Reverse,
                    cardinality: match fk.cardinality {
                        Cardinality::OneToOne => Cardinality::OneToOne,
                        _ => Cardinality::OneToMany,
                    },
                    nullable: fk.nullable,
                    on_delete: fk.on_delete,
                    auto_created: true,
                    concrete: false,
                };
                if let Some(target) = registry.models.get_mut(&fk.target) {
                    target.relations.push(reverse);
                }
            }
        }

        debug!(
            models = registry.models.len(),
            soft_delete = registry.models.values().filter(|m| m.soft_delete).count(),
            "Model registry built"
        );

        Ok(registry)
    }
}

/// Replaces each many-to-many field with a hidden join model holding two
/// cascading keys.
fn expand_many_to_many(schemas: Vec<ModelSchema>) -> Vec<ModelSchema> {
    let mut expanded = Vec::with_capacity(schemas.len());
    for schema in schemas {
        let joins: Vec<ModelSchema> = schema
            .many_to_many
            .iter()
            .map(|m2m| {
                let mut join = ModelSchema::new(join_label(&schema.label, &m2m.name))
                    .foreign_key(JOIN_SOURCE, schema.label.clone(), OnDelete::Cascade)
                    .foreign_key(JOIN_TARGET, m2m.target.clone(), OnDelete::Cascade);
                join.auto_created = true;
                join
            })
            .collect();
        expanded.push(schema);
        expanded.extend(joins);
    }
    expanded
}

fn join_label(owner: &ModelLabel, field: &str) -> ModelLabel {
    ModelLabel::new(format!("{owner}_{field}"))
}

fn resolve_model(
    schema: &ModelSchema,
    known: &HashSet<ModelLabel>,
    retention: &RetentionConfig,
) -> Result<ModelMeta> {
    let label = &schema.label;
    let mut columns: Vec<FieldDef> = schema.fields.clone();
    let mut relations = Vec::new();

    for fk in &schema.foreign_keys {
        if !known.contains(&fk.target) {
            return Err(Error::InvalidSchema(format!(
                "'{label}.{}' references unknown model '{}'",
                fk.name, fk.target
            )));
        }
        if fk.on_delete == OnDelete::SetNull && !fk.nullable {
            return Err(Error::InvalidSchema(format!(
                "'{label}.{}' uses SetNull but is not nullable",
                fk.name
            )));
        }
        columns.push(FieldDef {
            name: fk.name.clone(),
            kind: FieldKind::Reference(fk.target.clone()),
            nullable: fk.nullable,
        });
        relations.push(Relation {
            name: fk.name.clone(),
            model: label.clone(),
            related_model: fk.target.clone(),
            direction: RelationDirection::Forward,
            cardinality: fk.cardinality,
            nullable: fk.nullable,
            on_delete: fk.on_delete,
            auto_created: false,
            concrete: true,
        });
    }

    let mut join_models = BTreeMap::new();
    for m2m in &schema.many_to_many {
        if !known.contains(&m2m.target) {
            return Err(Error::InvalidSchema(format!(
                "'{label}.{}' references unknown model '{}'",
                m2m.name, m2m.target
            )));
        }
        join_models.insert(m2m.name.clone(), join_label(label, &m2m.name));
        relations.push(Relation {
            name: m2m.name.clone(),
            model: label.clone(),
            related_model: m2m.target.clone(),
            direction: RelationDirection::Forward,
            cardinality: Cardinality::ManyToMany,
            nullable: true,
            on_delete: OnDelete::DoNothing,
            auto_created: false,
            concrete: true,
        });
    }

    let retention_days = match schema.soft_delete {
        Some(RetentionPolicy::Inherit) => retention.days_for(label),
        Some(RetentionPolicy::Days(days)) => Some(days),
        Some(RetentionPolicy::Never) | None => None,
    };

    if schema.is_soft_delete() {
        if let Some(clash) = columns
            .iter()
            .find(|c| c.name == IS_REMOVED || c.name == REMOVED_AT)
        {
            return Err(Error::InvalidSchema(format!(
                "'{label}' declares reserved soft-delete field '{}'",
                clash.name
            )));
        }
        columns.push(FieldDef::new(IS_REMOVED, FieldKind::Bool));
        columns.push(FieldDef::nullable(REMOVED_AT, FieldKind::Timestamp));
    }

    let mut names = HashSet::new();
    for column in &columns {
        validate_identifier(label, &column.name)?;
        if column.name == PRIMARY_KEY || !names.insert(column.name.as_str()) {
            return Err(Error::InvalidSchema(format!(
                "'{label}' declares field '{}' more than once",
                column.name
            )));
        }
    }
    for m2m in &schema.many_to_many {
        validate_identifier(label, &m2m.name)?;
        if names.contains(m2m.name.as_str()) {
            return Err(Error::InvalidSchema(format!(
                "'{label}' declares field '{}' more than once",
                m2m.name
            )));
        }
    }

    Ok(ModelMeta {
        label: label.clone(),
        columns,
        foreign_keys: schema.foreign_keys.clone(),
        relations,
        soft_delete: schema.is_soft_delete(),
        retention_days,
        auto_created: schema.auto_created,
        join_models,
    })
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Labels are dot-separated identifiers (`app.model`); they double as table
/// names, so nothing else is allowed through.
fn validate_label(label: &ModelLabel) -> Result<()> {
    if label.as_str().split('.').all(is_identifier) {
        Ok(())
    } else {
        Err(Error::InvalidSchema(format!("invalid model label '{label}'")))
    }
}

fn validate_identifier(label: &ModelLabel, name: &str) -> Result<()> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(Error::InvalidSchema(format!(
            "invalid field name '{name}' on '{label}'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library() -> Registry {
        Registry::builder()
            .model(ModelSchema::new("library.author").soft_delete())
            .model(ModelSchema::new("library.editor").never_expires())
            .model(ModelSchema::new("library.tag").field("name", FieldKind::Text))
            .model(
                ModelSchema::new("library.book")
                    .with_retention_days(7)
                    .field("title", FieldKind::Text)
                    .foreign_key("author", "library.author", OnDelete::Cascade)
                    .nullable_foreign_key("editor", "library.editor", OnDelete::SetNull)
                    .many_to_many("tags", "library.tag"),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_classifier_accepts_labels_and_instances() {
        let registry = library();
        let author: ModelLabel = "library.author".into();
        assert!(registry.is_soft_delete(&author));
        assert!(registry.is_soft_delete(&Record::new("library.book")));
        assert!(!registry.is_soft_delete(&ModelLabel::new("library.tag")));
        assert!(!registry.is_soft_delete(&ModelLabel::new("library.unknown")));
        // Join models never participate
        assert!(!registry.is_soft_delete(&ModelLabel::new("library.book_tags")));
    }

    #[test]
    fn test_soft_delete_columns_injected() {
        let registry = library();
        let book = registry.model(&"library.book".into()).unwrap();
        assert!(book.column(IS_REMOVED).is_some());
        assert!(book.column(REMOVED_AT).unwrap().nullable);

        let tag = registry.model(&"library.tag".into()).unwrap();
        assert!(tag.column(IS_REMOVED).is_none());
    }

    #[test]
    fn test_forward_and_reverse_relations() {
        let registry = library();
        let book = registry.model(&"library.book".into()).unwrap();
        let forward: Vec<_> = book.forward_relations().map(|r| r.name.as_str()).collect();
        assert_eq!(forward, vec!["author", "editor", "tags"]);

        let author = registry.model(&"library.author".into()).unwrap();
        let reverse: Vec<_> = author.reverse_relations().collect();
        assert_eq!(reverse.len(), 1);
        assert_eq!(reverse[0].related_model.as_str(), "library.book");
        assert_eq!(reverse[0].cardinality, Cardinality::OneToMany);
        assert!(reverse[0].auto_created);
        assert!(!reverse[0].concrete);

        // The join model points back at both sides
        let tag = registry.model(&"library.tag".into()).unwrap();
        let tag_reverse: Vec<_> = tag
            .reverse_relations()
            .map(|r| r.related_model.as_str())
            .collect();
        assert_eq!(tag_reverse, vec!["library.book_tags"]);
    }

    #[test]
    fn test_retention_resolution() {
        let config = RetentionConfig::new()
            .with_default_days(Some(60))
            .with_model_days("library.author", Some(5));
        let registry = Registry::builder()
            .model(ModelSchema::new("library.author").soft_delete())
            .model(ModelSchema::new("library.book").soft_delete())
            .model(ModelSchema::new("library.note").with_retention_days(1))
            .model(ModelSchema::new("library.audit").never_expires())
            .model(ModelSchema::new("library.tag"))
            .with_retention(&config)
            .build()
            .unwrap();

        assert_eq!(registry.retention_days(&"library.author".into()).unwrap(), Some(5));
        assert_eq!(registry.retention_days(&"library.book".into()).unwrap(), Some(60));
        assert_eq!(registry.retention_days(&"library.note".into()).unwrap(), Some(1));
        assert_eq!(registry.retention_days(&"library.audit".into()).unwrap(), None);
        assert!(matches!(
            registry.retention_days(&"library.tag".into()),
            Err(Error::FieldNotFound { .. })
        ));
    }

    #[test]
    fn test_default_retention_is_thirty_days() {
        let registry = library();
        assert_eq!(registry.retention_days(&"library.author".into()).unwrap(), Some(30));
    }

    #[test]
    fn test_rejects_unknown_target() {
        let err = Registry::builder()
            .model(ModelSchema::new("a.b").foreign_key("c", "a.missing", OnDelete::Cascade))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSchema(msg) if msg.contains("a.missing")));
    }

    #[test]
    fn test_rejects_non_nullable_set_null() {
        let err = Registry::builder()
            .model(ModelSchema::new("a.parent"))
            .model(ModelSchema::new("a.child").foreign_key("p", "a.parent", OnDelete::SetNull))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSchema(_)));
    }

    #[test]
    fn test_rejects_reserved_fields_and_bad_names() {
        assert!(
            Registry::builder()
                .model(ModelSchema::new("a.b").soft_delete().field(IS_REMOVED, FieldKind::Bool))
                .build()
                .is_err()
        );
        assert!(
            Registry::builder()
                .model(ModelSchema::new("a.b; drop table x"))
                .build()
                .is_err()
        );
        assert!(
            Registry::builder()
                .model(ModelSchema::new("a.b").field("id", FieldKind::Integer))
                .build()
                .is_err()
        );
        assert!(
            Registry::builder()
                .model(ModelSchema::new("a.b"))
                .model(ModelSchema::new("a.b"))
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_validate_changes() {
        let registry = library();
        let removal = Changes::removal(chrono::Utc::now());
        assert!(registry.validate_changes(&"library.book".into(), &removal).is_ok());
        assert!(matches!(
            registry.validate_changes(&"library.tag".into(), &removal),
            Err(Error::FieldNotFound { ref field, .. }) if field == IS_REMOVED
        ));
    }

    #[test]
    fn test_join_model_lookup() {
        let registry = library();
        assert_eq!(
            registry.join_model(&"library.book".into(), "tags").unwrap().as_str(),
            "library.book_tags"
        );
        assert!(registry.join_model(&"library.book".into(), "title").is_err());
    }
}
