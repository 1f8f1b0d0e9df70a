use serde::{Deserialize, Serialize};
use std::fmt;

/// Known-good dot-bracket inputs offered as starting points in the UI and CLI.
pub const SAMPLE_STRUCTURES: &[(&str, &str)] = &[
    ("Sample 1", "(.(.(...)...))"),
    ("Sample 2", "(.(...(...)..)..)"),
];

/// A validated dot-bracket structure: characters `(`, `)`, `.` only, with
/// every `(` matched by a later `)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateStructure(String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructureError {
    EmptyStructure,
    UnbalancedClosingParen { position: usize },
    UnbalancedOpenParen { open_count: usize },
}

impl fmt::Display for StructureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyStructure => {
                write!(f, "Structure is empty after removing non-dot-bracket characters")
            }
            Self::UnbalancedClosingParen { position } => write!(
                f,
                "Unbalanced ')' at position {position}: no matching '(' before it"
            ),
            Self::UnbalancedOpenParen { open_count } => write!(
                f,
                "{open_count} unmatched '(' left at end of structure"
            ),
        }
    }
}

impl std::error::Error for StructureError {}

/// Maps alternate bracket notations (`{}`, `[]`, `<>`) to `.` and drops every
/// other character outside the dot-bracket alphabet. Crossing (pseudoknot)
/// pairings are not expressible after this mapping.
pub fn sanitize_structure(raw: &str) -> String {
    raw.chars()
        .filter_map(|c| match c {
            '(' | ')' | '.' => Some(c),
            '{' | '}' | '[' | ']' | '<' | '>' => Some('.'),
            _ => None,
        })
        .collect()
}

/// Sanitizes and validates a user-typed structure. The balance scan fails
/// fast on the first surplus `)` so very long garbage inputs exit early.
pub fn validate_structure(raw: &str) -> Result<CandidateStructure, StructureError> {
    let sanitized = sanitize_structure(raw);
    if sanitized.is_empty() {
        return Err(StructureError::EmptyStructure);
    }
    let mut balance: usize = 0;
    for (position, c) in sanitized.chars().enumerate() {
        match c {
            '(' => balance += 1,
            ')' => {
                if balance == 0 {
                    return Err(StructureError::UnbalancedClosingParen { position });
                }
                balance -= 1;
            }
            _ => {}
        }
    }
    if balance != 0 {
        return Err(StructureError::UnbalancedOpenParen { open_count: balance });
    }
    Ok(CandidateStructure(sanitized))
}

impl CandidateStructure {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of base pairs, i.e. matched `(`/`)` pairs.
    pub fn num_pairs(&self) -> usize {
        self.0.chars().filter(|c| *c == '(').count()
    }

    /// Number of hairpin loops: maximal runs of `.` directly enclosed by a
    /// pair, counted as `()` turns in the bracket skeleton.
    pub fn num_loops(&self) -> usize {
        self.0
            .chars()
            .filter(|c| *c != '.')
            .collect::<String>()
            .matches("()")
            .count()
    }
}

impl fmt::Display for CandidateStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_balanced_structures() {
        for (name, structure) in SAMPLE_STRUCTURES {
            let validated = validate_structure(structure)
                .unwrap_or_else(|e| panic!("{name} should validate: {e}"));
            assert_eq!(validated.as_str(), *structure);
        }
        assert!(validate_structure("(())").is_ok());
        assert!(validate_structure("...").is_ok());
    }

    #[test]
    fn rejects_unmatched_open_paren() {
        assert_eq!(
            validate_structure("(()"),
            Err(StructureError::UnbalancedOpenParen { open_count: 1 })
        );
    }

    #[test]
    fn rejects_surplus_closing_paren_at_first_offence() {
        assert_eq!(
            validate_structure(")("),
            Err(StructureError::UnbalancedClosingParen { position: 0 })
        );
        assert_eq!(
            validate_structure("(.))."),
            Err(StructureError::UnbalancedClosingParen { position: 3 })
        );
    }

    #[test]
    fn strips_letters_before_balance_check() {
        let validated = validate_structure("(a.b)").expect("letters are stripped, rest balances");
        assert_eq!(validated.as_str(), "(.)");
    }

    #[test]
    fn maps_alternate_brackets_to_dots() {
        assert_eq!(sanitize_structure("({[<>]})"), "(......)");
        let validated = validate_structure("({...})").expect("curly pair becomes dots");
        assert_eq!(validated.as_str(), "(.....)");
    }

    #[test]
    fn rejects_empty_and_all_garbage_input() {
        assert_eq!(validate_structure(""), Err(StructureError::EmptyStructure));
        assert_eq!(
            validate_structure("hello world"),
            Err(StructureError::EmptyStructure)
        );
    }

    #[test]
    fn pair_and_loop_counts() {
        let s = validate_structure("(.(...)..(...).)").expect("valid");
        assert_eq!(s.num_pairs(), 3);
        assert_eq!(s.num_loops(), 2);
        let flat = validate_structure("....").expect("valid");
        assert_eq!(flat.num_pairs(), 0);
        assert_eq!(flat.num_loops(), 0);
    }
}
