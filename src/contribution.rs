use crate::dot_bracket::CandidateStructure;
use crate::motif::Motif;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{fmt, time::Duration};
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

pub const MAX_NAME_CHARS: usize = 80;
pub const MAX_EMAIL_CHARS: usize = 254;
const SAVE_PATH: &str = "/save/motifs";
const SAVE_TIMEOUT: Duration = Duration::from_secs(30);

lazy_static! {
    // local@domain.tld shape; full RFC validation is the backend's job.
    static ref EMAIL_SHAPE_RE: Regex = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Attribution name cleanup, applied on every edit and on pasted text before
/// insertion: NFKC-normalize, keep letters (accented included), combining
/// marks, whitespace, apostrophe, hyphen and period, collapse whitespace runs
/// to one space, trim, cap at [`MAX_NAME_CHARS`]. Idempotent.
pub fn sanitize_name(raw: &str) -> String {
    let kept: String = raw
        .nfkc()
        .filter(|c| {
            c.is_alphabetic()
                || is_combining_mark(*c)
                || c.is_whitespace()
                || matches!(c, '\'' | '-' | '.')
        })
        .collect();
    let collapsed = kept.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&collapsed, MAX_NAME_CHARS)
        .trim_end()
        .to_string()
}

/// Attribution email cleanup: NFKC-normalize, strip all whitespace, cap at
/// [`MAX_EMAIL_CHARS`]. Shape is only enforced at submit time. Idempotent.
pub fn sanitize_email(raw: &str) -> String {
    let stripped: String = raw.nfkc().filter(|c| !c.is_whitespace()).collect();
    truncate_chars(&stripped, MAX_EMAIL_CHARS)
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_SHAPE_RE.is_match(email)
}

/// Newly discovered entries of a result set, the only ones worth offering
/// for contribution.
pub fn new_motifs(results: &[Motif]) -> Vec<Motif> {
    results.iter().filter(|m| m.is_new()).cloned().collect()
}

pub fn should_offer_contribution(results: &[Motif]) -> bool {
    results.iter().any(Motif::is_new)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContributionError {
    /// The result set has no newly discovered motifs to save.
    NothingToContribute,
    /// `save_structure` was requested but no structure is available; caught
    /// before any request is issued.
    MissingStructure,
    InvalidEmail(String),
}

impl fmt::Display for ContributionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NothingToContribute => {
                write!(f, "No newly discovered motifs to contribute")
            }
            Self::MissingStructure => write!(
                f,
                "Saving the structure was requested but the originating structure is unavailable"
            ),
            Self::InvalidEmail(email) => {
                write!(f, "'{email}' is not a valid email address")
            }
        }
    }
}

impl std::error::Error for ContributionError {}

/// Everything one save round trip needs. Constructed after a successful
/// submission; discarded once the user declines or the round trip returns.
#[derive(Debug, Clone, Default)]
pub struct ContributionDraft {
    pub motifs: Vec<Motif>,
    pub structure: Option<CandidateStructure>,
    pub discoverer_name: String,
    pub discoverer_email: String,
    pub save_structure: bool,
}

/// Accept/reject answer from the save endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    pub ok: bool,
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct SaveResponse {
    ok: bool,
    message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct StructurePayload {
    dot_bracket: String,
    length: usize,
    num_pairs: usize,
    num_loops: usize,
}

impl ContributionDraft {
    /// Validates the draft and builds the request body. Every failure here
    /// happens before any network traffic.
    pub fn build_payload(&self) -> Result<serde_json::Value, ContributionError> {
        if !self.motifs.iter().any(Motif::is_new) {
            return Err(ContributionError::NothingToContribute);
        }
        let name = sanitize_name(&self.discoverer_name);
        let email = sanitize_email(&self.discoverer_email);
        if !email.is_empty() && !is_valid_email(&email) {
            return Err(ContributionError::InvalidEmail(email));
        }
        let structure = if self.save_structure {
            let structure = self
                .structure
                .as_ref()
                .ok_or(ContributionError::MissingStructure)?;
            Some(StructurePayload {
                dot_bracket: structure.as_str().to_string(),
                length: structure.len(),
                num_pairs: structure.num_pairs(),
                num_loops: structure.num_loops(),
            })
        } else {
            None
        };
        Ok(json!({
            "motifs": self.motifs,
            "structure": structure,
            "submittedBy": {
                "name": if name.is_empty() { None } else { Some(name) },
                "email": if email.is_empty() { None } else { Some(email) },
            },
            "saveStructure": self.save_structure,
        }))
    }
}

/// One request/response round trip to the save endpoint. Transport failures
/// and non-acknowledging responses both come back as a rejected
/// [`SaveOutcome`] so the caller keeps the form editable for retry;
/// [`ContributionError`] covers only pre-flight validation.
pub fn submit_contribution(
    base_url: &str,
    draft: &ContributionDraft,
) -> Result<SaveOutcome, ContributionError> {
    let payload = draft.build_payload()?;
    let client = match reqwest::blocking::Client::builder()
        .timeout(SAVE_TIMEOUT)
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            return Ok(SaveOutcome {
                ok: false,
                message: format!("Could not build HTTP client: {e}"),
            })
        }
    };
    let response = match client
        .post(format!("{base_url}{SAVE_PATH}"))
        .header("Content-Type", "application/json")
        .json(&payload)
        .send()
    {
        Ok(response) => response,
        Err(e) => {
            return Ok(SaveOutcome {
                ok: false,
                message: format!("Failed to submit motifs for review: {e}"),
            })
        }
    };
    let status = response.status();
    let body: SaveResponse = response.json().unwrap_or_default();
    if status.is_success() && body.ok {
        return Ok(SaveOutcome {
            ok: true,
            message: body
                .message
                .unwrap_or_else(|| "Submission sent for admin review.".to_string()),
        });
    }
    Ok(SaveOutcome {
        ok: false,
        message: body.message.unwrap_or_else(|| {
            format!("Backend did not acknowledge submission (status={status})")
        }),
    })
}

/// UI-facing state for the post-result contribution prompt. The gate:
/// offered only while new motifs exist and the user has not yet answered for
/// this result set.
#[derive(Debug, Clone)]
pub struct ContributionPanel {
    draft: ContributionDraft,
    busy: bool,
    resolved: bool,
}

impl ContributionPanel {
    /// Opens the panel if the result set warrants it.
    pub fn offer(results: &[Motif], structure: Option<CandidateStructure>) -> Option<Self> {
        if !should_offer_contribution(results) {
            return None;
        }
        Some(Self {
            draft: ContributionDraft {
                motifs: new_motifs(results),
                structure,
                ..ContributionDraft::default()
            },
            busy: false,
            resolved: false,
        })
    }

    pub fn draft(&self) -> &ContributionDraft {
        &self.draft
    }

    /// While a save is in flight every input and action is disabled.
    pub fn inputs_enabled(&self) -> bool {
        !self.busy && !self.resolved
    }

    pub fn is_open(&self) -> bool {
        !self.resolved
    }

    /// Keystroke/paste edits go through the sanitizers; raw text never lands
    /// in the draft.
    pub fn edit_name(&mut self, raw: &str) {
        if self.inputs_enabled() {
            self.draft.discoverer_name = sanitize_name(raw);
        }
    }

    pub fn edit_email(&mut self, raw: &str) {
        if self.inputs_enabled() {
            self.draft.discoverer_email = sanitize_email(raw);
        }
    }

    pub fn set_save_structure(&mut self, save: bool) {
        if self.inputs_enabled() {
            self.draft.save_structure = save;
        }
    }

    pub fn decline(&mut self) {
        self.resolved = true;
    }

    /// Runs the save round trip. On accept the panel dismisses itself; on
    /// reject it stays open with the fields untouched.
    pub fn submit(&mut self, base_url: &str) -> Result<SaveOutcome, ContributionError> {
        if !self.inputs_enabled() {
            return Ok(SaveOutcome {
                ok: false,
                message: "A submission is already in flight or resolved".to_string(),
            });
        }
        self.busy = true;
        let result = submit_contribution(base_url, &self.draft);
        self.busy = false;
        if let Ok(outcome) = &result {
            if outcome.ok {
                self.resolved = true;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dot_bracket::validate_structure;
    use crate::motif::NEW_MOTIF_ID;
    use std::collections::BTreeMap;

    fn motif(id: &str) -> Motif {
        Motif {
            id: id.to_string(),
            num_occurrences: 1,
            length: 5,
            families: BTreeMap::new(),
            bpairs: vec![],
            ipairs: vec![],
            loops: 1,
            svg: String::new(),
            dot_bracket: "(...)".to_string(),
            structure_ids: vec![],
        }
    }

    #[test]
    fn name_sanitization_strips_and_collapses() {
        assert_eq!(sanitize_name("  Ada   Lovelace  "), "Ada Lovelace");
        assert_eq!(sanitize_name("R2-D2 <script>!"), "R-D script");
        assert_eq!(sanitize_name("José O'Brien-Núñez Jr."), "José O'Brien-Núñez Jr.");
        assert_eq!(sanitize_name("12345"), "");
    }

    #[test]
    fn name_sanitization_is_idempotent_and_bounded() {
        let long_name = "é ".repeat(120);
        let inputs = [
            "  Ada   Lovelace  ",
            "José O'Brien-Núñez Jr.",
            long_name.as_str(),
            "tabs\t\tand\nnewlines",
        ];
        for raw in inputs {
            let once = sanitize_name(raw);
            assert_eq!(sanitize_name(&once), once, "not idempotent for {raw:?}");
            assert!(once.chars().count() <= MAX_NAME_CHARS);
        }
    }

    #[test]
    fn email_sanitization_strips_whitespace_and_is_idempotent() {
        assert_eq!(sanitize_email(" ada @ example.org \n"), "ada@example.org");
        let long = format!("{}@example.org", "a".repeat(300));
        let once = sanitize_email(&long);
        assert_eq!(once.chars().count(), MAX_EMAIL_CHARS);
        assert_eq!(sanitize_email(&once), once);
    }

    #[test]
    fn email_shape_is_checked_at_submit_time_only() {
        assert!(is_valid_email("ada@example.org"));
        assert!(!is_valid_email("ada@example"));
        assert!(!is_valid_email("not-an-email"));
        let draft = ContributionDraft {
            motifs: vec![motif(NEW_MOTIF_ID)],
            discoverer_email: "not-an-email".to_string(),
            ..ContributionDraft::default()
        };
        assert_eq!(
            draft.build_payload(),
            Err(ContributionError::InvalidEmail("not-an-email".to_string()))
        );
    }

    #[test]
    fn save_structure_without_structure_fails_before_any_request() {
        let draft = ContributionDraft {
            motifs: vec![motif(NEW_MOTIF_ID)],
            save_structure: true,
            structure: None,
            ..ContributionDraft::default()
        };
        assert_eq!(
            draft.build_payload(),
            Err(ContributionError::MissingStructure)
        );
        // submit_contribution short-circuits on the same validation.
        assert_eq!(
            submit_contribution("http://192.0.2.1:1", &draft),
            Err(ContributionError::MissingStructure)
        );
    }

    #[test]
    fn payload_carries_structure_only_when_opted_in() {
        let structure = validate_structure("(.(...).)").expect("valid");
        let mut draft = ContributionDraft {
            motifs: vec![motif(NEW_MOTIF_ID)],
            structure: Some(structure),
            discoverer_name: "Ada".to_string(),
            save_structure: false,
            ..ContributionDraft::default()
        };
        let payload = draft.build_payload().expect("payload");
        assert!(payload["structure"].is_null());
        assert_eq!(payload["saveStructure"], false);
        assert_eq!(payload["submittedBy"]["name"], "Ada");
        assert!(payload["submittedBy"]["email"].is_null());

        draft.save_structure = true;
        let payload = draft.build_payload().expect("payload");
        assert_eq!(payload["structure"]["dotBracket"], "(.(...).)");
        assert_eq!(payload["structure"]["numPairs"], 2);
        assert_eq!(payload["structure"]["numLoops"], 1);
    }

    #[test]
    fn gate_requires_new_motifs() {
        assert!(ContributionPanel::offer(&[motif("42")], None).is_none());
        let panel = ContributionPanel::offer(&[motif("42"), motif(NEW_MOTIF_ID)], None)
            .expect("panel offered");
        assert_eq!(panel.draft().motifs.len(), 1);
        assert!(panel.draft().motifs[0].is_new());
    }

    #[test]
    fn panel_edits_are_sanitized_and_decline_dismisses() {
        let mut panel =
            ContributionPanel::offer(&[motif(NEW_MOTIF_ID)], None).expect("panel offered");
        panel.edit_name("  Ada 99  Lovelace ");
        panel.edit_email(" ada @example.org ");
        assert_eq!(panel.draft().discoverer_name, "Ada Lovelace");
        assert_eq!(panel.draft().discoverer_email, "ada@example.org");
        assert!(panel.inputs_enabled());
        panel.decline();
        assert!(!panel.is_open());
        assert!(!panel.inputs_enabled());
        panel.edit_name("Ignored");
        assert_eq!(panel.draft().discoverer_name, "Ada Lovelace");
    }
}
