use crate::motif::{MotifRecord, SvgDocument};
use serde::Deserialize;
use serde_json::Value;

/// Logical records on the wire are separated by a blank line and carry a JSON
/// payload behind this marker.
pub const DATA_PREFIX: &str = "data: ";
const RECORD_SEPARATOR: &[u8] = b"\n\n";

/// One decoded wire record that matters to the submission pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Free-text status line from the analysis job.
    Progress(String),
    /// A batch of motifs with their diagrams, positionally parallel.
    Batch {
        motifs: Vec<MotifRecord>,
        svgs: Vec<SvgDocument>,
    },
    /// The backend reported a fatal job error; nothing after it is valid.
    Error(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RecordPayload {
    error: Option<String>,
    progress: Option<String>,
    motifs: Option<Vec<Value>>,
    svgs: Option<Vec<SvgDocument>>,
    message: Option<String>,
}

/// Reassembles records from arbitrarily-split byte chunks. Complete records
/// are decoded in arrival order; the trailing incomplete segment stays
/// buffered until the next chunk.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    pending: Vec<u8>,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one transport chunk and returns every record completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.pending.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = find_separator(&self.pending) {
            let record: Vec<u8> = self.pending.drain(..pos + RECORD_SEPARATOR.len()).collect();
            if let Some(event) = decode_record(&record[..pos]) {
                events.push(event);
            }
        }
        events
    }

    /// Bytes still waiting for their record separator.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn find_separator(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(RECORD_SEPARATOR.len())
        .position(|window| window == RECORD_SEPARATOR)
}

/// Decodes one complete record. Returns `None` for records the client
/// ignores: lines without the data marker, unparsable JSON (logged and
/// skipped, never fatal) and informational `message` payloads.
fn decode_record(record: &[u8]) -> Option<StreamEvent> {
    let text = String::from_utf8_lossy(record);
    let json_text = text.trim_start().strip_prefix(DATA_PREFIX)?;
    let payload = match serde_json::from_str::<RecordPayload>(json_text) {
        Ok(payload) => payload,
        Err(e) => {
            eprintln!("Skipping malformed stream record: {e}");
            return None;
        }
    };
    if let Some(error) = payload.error {
        return Some(StreamEvent::Error(error));
    }
    if let Some(progress) = payload.progress {
        return Some(StreamEvent::Progress(progress));
    }
    if let Some(motifs) = payload.motifs {
        let svgs = payload.svgs.unwrap_or_default();
        return Some(StreamEvent::Batch {
            motifs: decode_motif_entries(motifs),
            svgs,
        });
    }
    // e.g. {"message": "Task completed successfully."}
    let _ = payload.message;
    None
}

/// A batch entry that fails to decode is dropped on its own; the rest of the
/// batch survives.
fn decode_motif_entries(entries: Vec<Value>) -> Vec<MotifRecord> {
    entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<MotifRecord>(entry) {
            Ok(record) => Some(record),
            Err(e) => {
                eprintln!("Skipping undecodable motif entry in batch: {e}");
                None
            }
        })
        .collect()
}
