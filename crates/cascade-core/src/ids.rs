//! Deterministic 128-bit point identifiers.
//!
//! Every point in the collection carries an id that is a pure function of
//! its namespace and domain key (spec §3): the leading 32 bits select the
//! namespace, the remaining 96 bits encode the namespace-specific key. No
//! clock or randomness is involved, which is what makes cascade upserts
//! idempotent and convergent.

use std::fmt;
use std::str::FromStr;

/// Namespace tag occupying the leading 32 bits of a [`PointId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[non_exhaustive]
pub enum Namespace {
    /// One point per (model, record): a synced business record.
    Data,
    /// One point per field: a schema registry entry.
    Schema,
    /// One point per (source, target, field, kind): a graph edge.
    Graph,
    /// One point per (level, model, item): a knowledge-core entry.
    Knowledge,
}

impl Namespace {
    const fn tag(self) -> u32 {
        match self {
            Namespace::Data => 0x0001,
            Namespace::Schema => 0x0002,
            Namespace::Graph => 0x0003,
            Namespace::Knowledge => 0x0004,
        }
    }

    const fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0x0001 => Some(Namespace::Data),
            0x0002 => Some(Namespace::Schema),
            0x0003 => Some(Namespace::Graph),
            0x0004 => Some(Namespace::Knowledge),
            _ => None,
        }
    }
}

/// Relation kind carved into graph-namespace ids (8 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum RelationKind {
    /// `reference-single` FK field.
    Single,
    /// `reference-multi` FK field.
    Multi,
    /// `reference-reverse` FK field (the inverse side of a relation).
    Reverse,
}

impl RelationKind {
    const fn code(self) -> u8 {
        match self {
            RelationKind::Single => 0,
            RelationKind::Multi => 1,
            RelationKind::Reverse => 2,
        }
    }

    const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(RelationKind::Single),
            1 => Some(RelationKind::Multi),
            2 => Some(RelationKind::Reverse),
            _ => None,
        }
    }
}

const MASK_16: u128 = 0xFFFF;
const MASK_48: u128 = 0xFFFF_FFFF_FFFF;
const MASK_8: u128 = 0xFF;

/// A 128-bit point identifier, opaque except for namespace inspection.
///
/// Renders to and parses from the lowercase-hex-UUID wire format required
/// by spec §6 ("Point id wire format").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PointId(pub u128);

impl PointId {
    /// The namespace this id was minted in, recovered from the leading 32 bits.
    #[must_use]
    pub fn namespace(self) -> Option<Namespace> {
        let tag = (self.0 >> 96) as u32;
        Namespace::from_tag(tag)
    }

    const fn from_parts(namespace: Namespace, low_96: u128) -> Self {
        let tag = (namespace.tag() as u128) << 96;
        PointId(tag | (low_96 & ((1u128 << 96) - 1)))
    }
}

impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hi = (self.0 >> 64) as u64;
        let lo = self.0 as u64;
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
            (hi >> 32) as u32,
            (hi >> 16) & 0xFFFF,
            hi & 0xFFFF,
            (lo >> 48) & 0xFFFF,
            lo & 0xFFFF_FFFF_FFFF,
        )
    }
}

/// Error returned when a point-id string is not a well-formed 32-hex-digit id.
#[derive(Debug, thiserror::Error)]
#[error("invalid point id: {0}")]
pub struct ParseIdError(String);

impl FromStr for PointId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex: String = s.chars().filter(|c| *c != '-').collect();
        if hex.len() != 32 {
            return Err(ParseIdError(s.to_string()));
        }
        u128::from_str_radix(&hex, 16)
            .map(PointId)
            .map_err(|_| ParseIdError(s.to_string()))
    }
}

impl serde::Serialize for PointId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for PointId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Builds the data-namespace id for a (model, record) pair.
///
/// Layout: model-id (16) ‖ reserved (16) ‖ record-id (48).
#[must_use]
pub fn data_id(model_id: u16, record_id: u64) -> PointId {
    let low = ((model_id as u128) << 80) | (u128::from(record_id) & MASK_48);
    PointId::from_parts(Namespace::Data, low)
}

/// Recovers (model-id, record-id) from a data-namespace id.
#[must_use]
pub fn parse_data_id(id: PointId) -> Option<(u16, u64)> {
    if id.namespace() != Some(Namespace::Data) {
        return None;
    }
    let low = id.0 & ((1u128 << 96) - 1);
    let model_id = ((low >> 80) & MASK_16) as u16;
    let record_id = (low & MASK_48) as u64;
    Some((model_id, record_id))
}

/// Builds the schema-namespace id for a field.
///
/// Layout: fixed level tag (48, constant) ‖ field-id (48).
#[must_use]
pub fn schema_id(field_id: u64) -> PointId {
    let low = u128::from(field_id) & MASK_48;
    PointId::from_parts(Namespace::Schema, low)
}

/// Recovers the field-id from a schema-namespace id.
#[must_use]
pub fn parse_schema_id(id: PointId) -> Option<u64> {
    if id.namespace() != Some(Namespace::Schema) {
        return None;
    }
    Some((id.0 & MASK_48) as u64)
}

/// Builds the graph-namespace id for a (source, target, field, kind) edge.
///
/// Layout: source-model (16) ‖ target-model (16) ‖ relation-code (8) ‖
/// reserved (8) ‖ field-id (48).
#[must_use]
pub fn graph_id(source_model: u16, target_model: u16, kind: RelationKind, field_id: u64) -> PointId {
    let low = ((source_model as u128) << 80)
        | ((target_model as u128) << 64)
        | ((kind.code() as u128) << 56)
        | (u128::from(field_id) & MASK_48);
    PointId::from_parts(Namespace::Graph, low)
}

/// Recovers (source-model, target-model, kind, field-id) from a graph-namespace id.
#[must_use]
pub fn parse_graph_id(id: PointId) -> Option<(u16, u16, RelationKind, u64)> {
    if id.namespace() != Some(Namespace::Graph) {
        return None;
    }
    let low = id.0 & ((1u128 << 96) - 1);
    let source_model = ((low >> 80) & MASK_16) as u16;
    let target_model = ((low >> 64) & MASK_16) as u16;
    let kind = RelationKind::from_code(((low >> 56) & MASK_8) as u8)?;
    let field_id = (low & MASK_48) as u64;
    Some((source_model, target_model, kind, field_id))
}

/// Builds the knowledge-namespace id for a (level, model, item) triple.
///
/// Layout: level (16) ‖ model (16) ‖ reserved (16) ‖ item (48).
#[must_use]
pub fn knowledge_id(level: u16, model: u16, item: u64) -> PointId {
    let low = ((level as u128) << 80) | ((model as u128) << 64) | (u128::from(item) & MASK_48);
    PointId::from_parts(Namespace::Knowledge, low)
}

/// Recovers (level, model, item) from a knowledge-namespace id.
#[must_use]
pub fn parse_knowledge_id(id: PointId) -> Option<(u16, u16, u64)> {
    if id.namespace() != Some(Namespace::Knowledge) {
        return None;
    }
    let low = id.0 & ((1u128 << 96) - 1);
    let level = ((low >> 80) & MASK_16) as u16;
    let model = ((low >> 64) & MASK_16) as u16;
    let item = (low & MASK_48) as u64;
    Some((level, model, item))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn data_id_is_deterministic() {
        assert_eq!(data_id(344, 41085), data_id(344, 41085));
    }

    #[test]
    fn data_id_round_trips() {
        let id = data_id(344, 41_085);
        assert_eq!(parse_data_id(id), Some((344, 41_085)));
        assert_eq!(id.namespace(), Some(Namespace::Data));
    }

    #[test]
    fn graph_id_round_trips_all_relation_kinds() {
        for kind in [RelationKind::Single, RelationKind::Multi, RelationKind::Reverse] {
            let id = graph_id(344, 78, kind, 12);
            assert_eq!(parse_graph_id(id), Some((344, 78, kind, 12)));
        }
    }

    #[test]
    fn schema_and_knowledge_ids_round_trip() {
        let sid = schema_id(99);
        assert_eq!(parse_schema_id(sid), Some(99));

        let kid = knowledge_id(1, 344, 7);
        assert_eq!(parse_knowledge_id(kid), Some((1, 344, 7)));
    }

    #[test]
    fn namespaces_do_not_collide() {
        let d = data_id(1, 1);
        let s = schema_id(1);
        let g = graph_id(1, 1, RelationKind::Single, 1);
        let k = knowledge_id(1, 1, 1);
        let all = [d.0, s.0, g.0, k.0];
        for i in 0..all.len() {
            for j in (i + 1)..all.len() {
                assert_ne!(all[i], all[j]);
            }
        }
    }

    #[test]
    fn display_then_parse_round_trips() {
        let id = graph_id(344, 78, RelationKind::Multi, 55);
        let rendered = id.to_string();
        assert_eq!(rendered.len(), 36);
        let parsed: PointId = rendered.parse().unwrap();
        assert_eq!(parsed, id);
    }

    proptest! {
        #[test]
        fn data_id_prop_round_trips(model in 0u16..=u16::MAX, record in 0u64..(1u64 << 48)) {
            let id = data_id(model, record);
            prop_assert_eq!(parse_data_id(id), Some((model, record)));
        }

        #[test]
        fn graph_id_prop_round_trips(
            source in 0u16..=u16::MAX,
            target in 0u16..=u16::MAX,
            field in 0u64..(1u64 << 48),
        ) {
            let id = graph_id(source, target, RelationKind::Single, field);
            prop_assert_eq!(parse_graph_id(id), Some((source, target, RelationKind::Single, field)));
        }
    }
}
