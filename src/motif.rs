use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Sentinel catalog id for a motif discovered by this submission and not yet
/// present in the shared catalog.
pub const NEW_MOTIF_ID: &str = "New";

/// One motif as the rest of the application consumes it: catalog identity,
/// statistics, pair lists and the rendered diagram markup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Motif {
    pub id: String,
    pub num_occurrences: u64,
    pub length: usize,
    pub families: BTreeMap<String, u64>,
    pub bpairs: Vec<(usize, usize)>,
    pub ipairs: Vec<(usize, usize)>,
    pub loops: usize,
    pub svg: String,
    pub dot_bracket: String,
    pub structure_ids: Vec<String>,
}

impl Motif {
    pub fn is_new(&self) -> bool {
        self.id == NEW_MOTIF_ID
    }
}

/// One motif entry exactly as the analysis backend emits it inside a batch
/// record. Tolerant of missing fields; identity decisions happen in
/// [`motif_from_record`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MotifRecord {
    pub id_uniq: Value,
    pub is_duplicated: Option<bool>,
    pub occurrences: Vec<String>,
    pub length: usize,
    pub family2count: BTreeMap<String, u64>,
    pub bpairs: Vec<(usize, usize)>,
    pub ipairs: Vec<(usize, usize)>,
    pub num_loops: usize,
    pub dot_bracket: String,
}

impl MotifRecord {
    /// A motif counts as newly discovered only when the backend explicitly
    /// reports `is_duplicated: false`. An absent flag means "unknown" and the
    /// motif keeps its catalog identity.
    pub fn is_new(&self) -> bool {
        self.is_duplicated == Some(false)
    }
}

/// A rendered diagram as delivered in the batch record's `svgs` array,
/// positionally parallel to `motifs`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SvgDocument {
    pub id: String,
    pub content: String,
}

fn catalog_id(raw: &Value) -> String {
    match raw {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Null => "unknown".to_string(),
        other => other.to_string(),
    }
}

/// Builds the application-facing motif from one backend record, attaching the
/// diagram matched by array position (missing diagram means empty markup).
pub fn motif_from_record(record: MotifRecord, svg: Option<&SvgDocument>) -> Motif {
    let id = if record.is_new() {
        NEW_MOTIF_ID.to_string()
    } else {
        catalog_id(&record.id_uniq)
    };
    let num_occurrences = record.family2count.values().sum();
    Motif {
        id,
        num_occurrences,
        length: record.length,
        families: record.family2count,
        bpairs: record.bpairs,
        ipairs: record.ipairs,
        loops: record.num_loops,
        svg: svg.map(|s| s.content.clone()).unwrap_or_default(),
        dot_bracket: record.dot_bracket,
        structure_ids: record.occurrences,
    }
}
