//! Loads per-model narrative templates (spec §6, persistent "Patterns"
//! state) from a JSON sidecar mapping model name to template string. A
//! missing or absent file is not an error: the transformer's deterministic
//! `label: value | ...` fallback covers every model with no pattern (spec
//! §4.3).

use std::collections::HashMap;
use std::path::Path;

use cascade_core::Pattern;
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum PatternLoadError {
    #[error("pattern file I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("pattern file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct PatternFile {
    #[serde(default)]
    patterns: HashMap<String, String>,
}

/// Reads `path` as a `{"patterns": {"crm.lead": "...", ...}}` document and
/// parses each template. When `path` is `None`, returns an empty map so
/// every model falls back to the deterministic concatenation.
pub fn load(path: Option<&Path>) -> Result<HashMap<String, Pattern>, PatternLoadError> {
    let Some(path) = path else { return Ok(HashMap::new()) };
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(e.into()),
    };
    let file: PatternFile = serde_json::from_str(&contents)?;
    Ok(file.patterns.into_iter().map(|(model, template)| (model, Pattern::parse(&template))).collect())
}
