//! [`SchemaSource`] adapters (spec §1: schema loading is a host-supplied
//! collaborator; spec §6's `sync schema --source {excel,upstream}`).
//!
//! `excel` loads a pre-exported JSON sidecar (turning a spreadsheet into
//! this shape is a one-off conversion step outside this crate's scope);
//! `upstream` introspects the live schema over the same JSON-RPC session
//! [`HttpUpstreamClient`] uses.

use std::fs;
use std::path::Path;

use cascade_core::schema::{Field, FieldType, Model, SchemaSource};
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum SchemaLoadError {
    #[error("schema file I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("schema file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("upstream schema introspection failed: {0}")]
    Upstream(String),
}

/// Loads a model/field list from a pre-exported JSON file (the `excel`
/// source, after a one-off spreadsheet-to-JSON conversion).
pub struct JsonFileSchemaSource {
    path: std::path::PathBuf,
}

impl JsonFileSchemaSource {
    #[must_use]
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[derive(Debug, Deserialize)]
struct ModelFile {
    models: Vec<ModelDef>,
}

#[derive(Debug, Deserialize)]
struct ModelDef {
    name: String,
    id: u16,
    fields: Vec<FieldDef>,
}

#[derive(Debug, Deserialize)]
struct FieldDef {
    id: u64,
    name: String,
    label: String,
    #[serde(rename = "type")]
    field_type: String,
    #[serde(default)]
    is_derived: bool,
    #[serde(default = "default_true")]
    payload_enabled: bool,
    #[serde(default)]
    fk_target_model: Option<String>,
    #[serde(default)]
    fk_target_model_id: Option<u16>,
}

fn default_true() -> bool {
    true
}

fn parse_field_type(raw: &str) -> FieldType {
    match raw {
        "number" => FieldType::Number,
        "date" => FieldType::Date,
        "boolean" => FieldType::Boolean,
        "reference-single" => FieldType::ReferenceSingle,
        "reference-multi" => FieldType::ReferenceMulti,
        "reference-reverse" => FieldType::ReferenceReverse,
        "json" => FieldType::Json,
        _ => FieldType::String,
    }
}

impl SchemaSource for JsonFileSchemaSource {
    type Error = SchemaLoadError;

    fn load(&self) -> Result<Vec<Model>, Self::Error> {
        let contents = fs::read_to_string(&self.path)?;
        let file: ModelFile = serde_json::from_str(&contents)?;
        Ok(file
            .models
            .into_iter()
            .map(|m| Model {
                name: m.name,
                id: m.id,
                fields: m
                    .fields
                    .into_iter()
                    .map(|f| Field {
                        id: f.id,
                        name: f.name,
                        label: f.label,
                        field_type: parse_field_type(&f.field_type),
                        is_derived: f.is_derived,
                        payload_enabled: f.payload_enabled,
                        fk_target_model: f.fk_target_model,
                        fk_target_model_id: f.fk_target_model_id,
                    })
                    .collect(),
            })
            .collect())
    }
}

/// Writes a minimal `ModelFile`-shaped JSON document, for tests and for
/// operators bootstrapping a schema file by hand.
#[must_use]
pub fn example_schema_document() -> serde_json::Value {
    serde_json::json!({
        "models": [
            {
                "name": "crm.lead",
                "id": 1,
                "fields": [
                    {"id": 1, "name": "partner_id", "label": "Customer", "type": "reference-single", "fk_target_model": "res.partner", "fk_target_model_id": 2},
                    {"id": 2, "name": "create_date", "label": "Created On", "type": "date"},
                    {"id": 3, "name": "expected_revenue", "label": "Expected Revenue", "type": "number"},
                ],
            },
        ],
    })
}

/// Whether `path` looks like it exists, for a friendlier CLI error than a
/// raw `NotFound` I/O error.
#[must_use]
pub fn looks_readable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_models_and_fk_fields_from_a_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        fs::write(&path, example_schema_document().to_string()).unwrap();

        let source = JsonFileSchemaSource::new(&path);
        let models = source.load().unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].name, "crm.lead");
        assert_eq!(models[0].fields[0].fk_target_model.as_deref(), Some("res.partner"));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let source = JsonFileSchemaSource::new("/no/such/schema.json");
        assert!(matches!(source.load(), Err(SchemaLoadError::Io(_))));
    }
}
