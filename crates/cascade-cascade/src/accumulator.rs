//! Per-batch accumulation of foreign-key references observed while
//! transforming a page of records (spec §4.6 step 3: "During (2), for
//! every FK field touched, accumulate the distinct target ids referenced
//! and a running total of references").
//!
//! `TransformOutput::graph_refs` only carries the derived graph-namespace
//! edge id, not the per-field raw target id set, so accumulation here
//! walks `TransformOutput::fields` directly and matches FK fields by name.

use std::collections::{HashMap, HashSet};

use cascade_core::ids::RelationKind;
use cascade_core::schema::{FieldType, FkField};
use cascade_core::payload::PayloadValue;

fn relation_kind_of(field_type: FieldType) -> Option<RelationKind> {
    match field_type {
        FieldType::ReferenceSingle => Some(RelationKind::Single),
        FieldType::ReferenceMulti => Some(RelationKind::Multi),
        FieldType::ReferenceReverse => Some(RelationKind::Reverse),
        _ => None,
    }
}

/// Running totals for one FK field across a model sync (spec §4.6 step 4:
/// `edge_count = totalReferences`, `unique_targets = |ids|`).
#[derive(Debug, Clone)]
pub struct FkFieldAccumulator {
    pub field_id: u64,
    pub field_name: String,
    pub field_label: String,
    pub relation_kind: RelationKind,
    pub target_model: String,
    pub target_model_id: u16,
    pub total_references: u64,
    pub unique_targets: HashSet<i64>,
}

impl FkFieldAccumulator {
    fn new(fk: &FkField) -> Self {
        Self {
            field_id: fk.field.id,
            field_name: fk.field.name.clone(),
            field_label: fk.field.label.clone(),
            relation_kind: relation_kind_of(fk.field.field_type).unwrap_or(RelationKind::Single),
            target_model: fk.target_model.clone(),
            target_model_id: fk.target_model_id,
            total_references: 0,
            unique_targets: HashSet::new(),
        }
    }

    fn observe_single(&mut self, raw: i64) {
        self.total_references += 1;
        self.unique_targets.insert(raw);
    }

    fn observe_multi(&mut self, raw: &[i64]) {
        self.total_references += raw.len() as u64;
        self.unique_targets.extend(raw.iter().copied());
    }
}

/// Accumulates FK references across an entire model sync, keyed by field name.
#[derive(Debug, Clone, Default)]
pub struct FkAccumulator(HashMap<String, FkFieldAccumulator>);

impl FkAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one transformed record's value for `fk`'s field into the
    /// running totals, doing nothing when the field was blank.
    pub fn observe(&mut self, fk: &FkField, fields: &HashMap<String, PayloadValue>) {
        let Some(value) = fields.get(&fk.field.name) else { return };
        let entry = self.0.entry(fk.field.name.clone()).or_insert_with(|| FkFieldAccumulator::new(fk));
        match value {
            PayloadValue::SingleRef { raw, .. } => entry.observe_single(*raw),
            PayloadValue::MultiRef { raw, .. } => entry.observe_multi(raw),
            PayloadValue::Scalar(_) => {}
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.values().all(|entry| entry.unique_targets.is_empty())
    }

    /// Read-only view over the accumulated per-field entries.
    pub fn entries(&self) -> impl Iterator<Item = &FkFieldAccumulator> {
        self.0.values()
    }

    #[must_use]
    pub fn into_entries(self) -> Vec<FkFieldAccumulator> {
        self.0.into_values().collect()
    }
}
