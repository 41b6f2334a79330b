//! In-memory schema registry.
//!
//! Provides O(1) lookups for `(model -> fields)`, `(model, field -> field
//! info)`, `(model -> FK fields -> target model)`, `(field -> indexed?)`,
//! and category classification (spec §4.1). Loading from the upstream or
//! from Excel is an external concern (spec §1's out-of-scope collaborators
//! implement [`SchemaSource`](crate::schema::SchemaSource)); this module
//! only consumes an already-loaded registry, and the registry is immutable
//! for the lifetime of a sync run.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// The data type of a registry field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    /// Free text.
    String,
    /// Integer or float.
    Number,
    /// ISO-8601 date or datetime.
    Date,
    /// Boolean.
    Boolean,
    /// `reference-single` foreign key.
    ReferenceSingle,
    /// `reference-multi` foreign key (many2many).
    ReferenceMulti,
    /// `reference-reverse` foreign key (one2many, the inverse side).
    ReferenceReverse,
    /// Opaque JSON object.
    Json,
}

impl FieldType {
    /// Whether this type represents a foreign-key relation of any kind.
    #[must_use]
    pub fn is_reference(self) -> bool {
        matches!(
            self,
            FieldType::ReferenceSingle | FieldType::ReferenceMulti | FieldType::ReferenceReverse
        )
    }
}

/// Heuristic category assigned to a field, used by narrative templates and
/// diagnostics (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    /// Primary identifying fields (id, name, code, reference).
    Identity,
    /// Date/datetime fields.
    Temporal,
    /// Monetary/amount fields.
    Financial,
    /// Foreign-key fields of any relation kind.
    ForeignKey,
    /// State/stage/status fields.
    Status,
    /// Free-text descriptive content.
    Content,
    /// Bookkeeping fields (create/write uid and date, active flag).
    Metadata,
    /// Anything not otherwise classified.
    Custom,
}

/// A single schema registry field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Registry-wide unique field id, carved into schema- and graph-namespace point ids.
    pub id: u64,
    /// Technical (API) name, e.g. `partner_id`.
    pub name: String,
    /// Human-readable label, e.g. `Customer`.
    pub label: String,
    /// Declared type.
    pub field_type: FieldType,
    /// Whether the value is computed rather than stored.
    pub is_derived: bool,
    /// Whether this field is projected into the data point payload.
    pub payload_enabled: bool,
    /// Target model's technical name, when this field is a foreign key.
    pub fk_target_model: Option<String>,
    /// Target model's numeric id, when this field is a foreign key.
    pub fk_target_model_id: Option<u16>,
}

impl Field {
    /// Whether this field is a foreign key (any relation kind).
    #[must_use]
    pub fn is_fk(&self) -> bool {
        self.field_type.is_reference() && self.fk_target_model.is_some()
    }
}

/// A foreign-key field paired with its resolved target model id, as
/// returned by [`SchemaRegistry::fk_fields_of`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FkField {
    /// The field itself.
    pub field: Field,
    /// Target model's technical name.
    pub target_model: String,
    /// Target model's numeric id.
    pub target_model_id: u16,
}

/// A registered model: its technical name, numeric id, and ordered fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    /// Technical name, e.g. `lead`.
    pub name: String,
    /// Numeric model id, carved into data/graph point ids.
    pub id: u16,
    /// Fields in registry order (used for the deterministic vector-text fallback).
    pub fields: Vec<Field>,
}

/// Loads a [`SchemaRegistry`] from an external source (upstream RPC or
/// Excel). Implemented by a collaborator outside this crate; see spec §1.
pub trait SchemaSource {
    /// The error type this source can fail with.
    type Error;

    /// Load all models and their fields.
    fn load(&self) -> Result<Vec<Model>, Self::Error>;
}

/// O(1) schema lookups over an immutable, already-loaded set of models.
///
/// All lookups are pure; absence is a value (`None`/empty), never an
/// error — the registry only consumes an already-loaded schema (spec
/// §4.1's failure semantics).
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    models_by_name: HashMap<String, Model>,
    models_by_id: HashMap<u16, String>,
    indexed_fields: HashSet<String>,
}

impl SchemaRegistry {
    /// Builds a registry from a flat list of models and a static allow-list
    /// of indexed payload fields (supplied by the vector-sink configuration,
    /// spec §4.1).
    #[must_use]
    pub fn new(models: Vec<Model>, indexed_fields: HashSet<String>) -> Self {
        let mut models_by_name = HashMap::with_capacity(models.len());
        let mut models_by_id = HashMap::with_capacity(models.len());
        for model in models {
            models_by_id.insert(model.id, model.name.clone());
            models_by_name.insert(model.name.clone(), model);
        }
        Self {
            models_by_name,
            models_by_id,
            indexed_fields,
        }
    }

    /// Whether any model has been loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models_by_name.is_empty()
    }

    /// Resolves a model's numeric id by name.
    #[must_use]
    pub fn model_id(&self, model: &str) -> Option<u16> {
        self.models_by_name.get(model).map(|m| m.id)
    }

    /// Resolves a model's technical name by numeric id.
    #[must_use]
    pub fn model_name(&self, model_id: u16) -> Option<&str> {
        self.models_by_id.get(&model_id).map(String::as_str)
    }

    /// All fields of `model`, in registry order.
    #[must_use]
    pub fn fields_of(&self, model: &str) -> &[Field] {
        self.models_by_name
            .get(model)
            .map_or(&[], |m| m.fields.as_slice())
    }

    /// The subset of `model`'s fields that are foreign keys, with target
    /// model resolved.
    #[must_use]
    pub fn fk_fields_of(&self, model: &str) -> Vec<FkField> {
        self.fields_of(model)
            .iter()
            .filter_map(|field| {
                let target_model = field.fk_target_model.clone()?;
                let target_model_id = field
                    .fk_target_model_id
                    .or_else(|| self.model_id(&target_model))?;
                Some(FkField {
                    field: field.clone(),
                    target_model,
                    target_model_id,
                })
            })
            .collect()
    }

    /// Finds a single field by (model, field name).
    #[must_use]
    pub fn find(&self, model: &str, field_name: &str) -> Option<&Field> {
        self.fields_of(model).iter().find(|f| f.name == field_name)
    }

    /// Whether `field_name` is in the static indexed-field allow-list.
    #[must_use]
    pub fn is_indexed(&self, field_name: &str) -> bool {
        self.indexed_fields.contains(field_name)
    }

    /// Up to `limit` model names similar to `model`, for error suggestions.
    #[must_use]
    pub fn suggest_models(&self, model: &str, limit: usize) -> Vec<String> {
        let mut candidates: Vec<&String> = self.models_by_name.keys().collect();
        candidates.sort_by_key(|name| levenshtein(model, name));
        candidates
            .into_iter()
            .filter(|name| levenshtein(model, name) <= 3)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Classifies `field` into a [`Category`] by type and name heuristics
    /// (spec §4.1, e.g. a name ending in `_date` is temporal).
    #[must_use]
    pub fn categorize(&self, field: &Field) -> Category {
        if field.is_fk() {
            return Category::ForeignKey;
        }
        let name = field.name.as_str();
        match field.field_type {
            FieldType::Date => Category::Temporal,
            FieldType::Boolean if name == "active" => Category::Metadata,
            _ => {
                if name.ends_with("_date") || name.ends_with("_at") {
                    Category::Temporal
                } else if is_financial_name(name) {
                    Category::Financial
                } else if matches!(name, "id" | "name" | "code" | "reference" | "ref") {
                    Category::Identity
                } else if matches!(name, "state" | "status" | "stage_id") {
                    Category::Status
                } else if matches!(
                    name,
                    "create_uid" | "create_date" | "write_uid" | "write_date"
                ) {
                    Category::Metadata
                } else if matches!(field.field_type, FieldType::String) && is_content_name(name) {
                    Category::Content
                } else {
                    Category::Custom
                }
            }
        }
    }
}

fn is_financial_name(name: &str) -> bool {
    const NEEDLES: &[&str] = &["amount", "balance", "debit", "credit", "price", "total", "cost"];
    NEEDLES.iter().any(|needle| name.contains(needle))
}

fn is_content_name(name: &str) -> bool {
    const NEEDLES: &[&str] = &["description", "note", "comment", "body", "summary"];
    NEEDLES.iter().any(|needle| name.contains(needle))
}

/// Simple Levenshtein distance used only to rank model-name suggestions.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0usize; b.len() + 1];
    for i in 1..=a.len() {
        cur[0] = i;
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            cur[j] = (prev[j] + 1).min(cur[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lead_model() -> Model {
        Model {
            name: "lead".to_string(),
            id: 344,
            fields: vec![
                Field {
                    id: 1,
                    name: "partner_id".to_string(),
                    label: "Customer".to_string(),
                    field_type: FieldType::ReferenceSingle,
                    is_derived: false,
                    payload_enabled: true,
                    fk_target_model: Some("partner".to_string()),
                    fk_target_model_id: Some(78),
                },
                Field {
                    id: 2,
                    name: "create_date".to_string(),
                    label: "Created On".to_string(),
                    field_type: FieldType::Date,
                    is_derived: false,
                    payload_enabled: true,
                    fk_target_model: None,
                    fk_target_model_id: None,
                },
                Field {
                    id: 3,
                    name: "expected_revenue".to_string(),
                    label: "Expected Revenue".to_string(),
                    field_type: FieldType::Number,
                    is_derived: false,
                    payload_enabled: true,
                    fk_target_model: None,
                    fk_target_model_id: None,
                },
            ],
        }
    }

    fn registry() -> SchemaRegistry {
        let indexed = ["model_name", "record_id", "point_type", "create_date"]
            .into_iter()
            .map(String::from)
            .collect();
        SchemaRegistry::new(vec![lead_model()], indexed)
    }

    #[test]
    fn fields_of_returns_registry_order() {
        let reg = registry();
        let names: Vec<_> = reg.fields_of("lead").iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["partner_id", "create_date", "expected_revenue"]);
    }

    #[test]
    fn fields_of_unknown_model_is_empty_not_error() {
        let reg = registry();
        assert!(reg.fields_of("no_such_model").is_empty());
    }

    #[test]
    fn fk_fields_of_resolves_target() {
        let reg = registry();
        let fks = reg.fk_fields_of("lead");
        assert_eq!(fks.len(), 1);
        assert_eq!(fks[0].target_model, "partner");
        assert_eq!(fks[0].target_model_id, 78);
    }

    #[test]
    fn is_indexed_reflects_allow_list() {
        let reg = registry();
        assert!(reg.is_indexed("create_date"));
        assert!(!reg.is_indexed("expected_revenue"));
    }

    #[test]
    fn categorize_classifies_fk_temporal_and_financial() {
        let reg = registry();
        let fk = reg.find("lead", "partner_id").unwrap();
        assert_eq!(reg.categorize(fk), Category::ForeignKey);

        let date = reg.find("lead", "create_date").unwrap();
        assert_eq!(reg.categorize(date), Category::Temporal);

        let revenue = reg.find("lead", "expected_revenue").unwrap();
        assert_eq!(reg.categorize(revenue), Category::Financial);
    }

    #[test]
    fn suggest_models_ranks_by_edit_distance() {
        let reg = registry();
        let suggestions = reg.suggest_models("laed", 3);
        assert_eq!(suggestions, vec!["lead".to_string()]);
    }

    #[test]
    fn model_id_and_name_are_inverse() {
        let reg = registry();
        assert_eq!(reg.model_id("lead"), Some(344));
        assert_eq!(reg.model_name(344), Some("lead"));
    }
}
