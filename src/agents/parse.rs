//! Strict parsing of backend replies into stage outputs.
//!
//! The only leniency is structural: a markdown code fence around the JSON,
//! or prose before/after the outermost object, is discarded. The object
//! itself must deserialize into the stage schema and pass validation.

use super::types::StageOutput;
use super::AgentStage;
use thiserror::Error;

/// Why a backend reply could not be used.
#[derive(Error, Debug)]
pub enum ParseError {
    /// No `{ ... }` object anywhere in the reply.
    #[error("{stage} response contained no JSON object")]
    NoJson { stage: AgentStage },

    /// JSON was present but did not match the schema.
    #[error("{stage} response is not valid JSON for its schema: {source}")]
    Malformed {
        stage: AgentStage,
        #[source]
        source: serde_json::Error,
    },

    /// JSON matched the schema but violated a semantic rule.
    #[error("{stage} output failed validation: {reason}")]
    Invalid { stage: AgentStage, reason: String },
}

/// Strip a surrounding markdown code fence, if any.
fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let clean = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let clean = clean.strip_suffix("```").unwrap_or(clean);
    clean.trim()
}

/// Extract the first balanced `{ ... }` span.
///
/// Braces inside JSON strings are ignored. An object that never closes is
/// returned up to the end of the text so deserialization reports it.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    Some(&text[start..])
}

/// Parse a backend reply as the given stage's output.
pub fn parse_stage_output<T: StageOutput>(text: &str, stage: AgentStage) -> Result<T, ParseError> {
    let clean = strip_markdown_fences(text);
    let json = extract_json_object(clean).ok_or(ParseError::NoJson { stage })?;

    let output: T =
        serde_json::from_str(json).map_err(|source| ParseError::Malformed { stage, source })?;

    output
        .validate()
        .map_err(|reason| ParseError::Invalid { stage, reason })?;

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::types::{FixGenerationOutput, ReviewOutput};

    const REVIEW: &str = r#"{"approved": true, "issues": [], "assessment": "fine", "fixConfidence": 88}"#;

    #[test]
    fn test_parse_plain_json() {
        let review: ReviewOutput = parse_stage_output(REVIEW, AgentStage::Review).unwrap();
        assert!(review.approved);
        assert_eq!(review.fix_confidence, 88);
    }

    #[test]
    fn test_parse_fenced_json() {
        let text = format!("```json\n{}\n```", REVIEW);
        let review: ReviewOutput = parse_stage_output(&text, AgentStage::Review).unwrap();
        assert_eq!(review.assessment, "fine");
    }

    #[test]
    fn test_parse_json_with_surrounding_prose() {
        let text = format!("Here is my review:\n{}\nLet me know.", REVIEW);
        let review: ReviewOutput = parse_stage_output(&text, AgentStage::Review).unwrap();
        assert!(review.issues.is_empty());
    }

    #[test]
    fn test_parse_ignores_braces_in_trailing_prose() {
        let text = format!("{}\nNote: the selector {{data-testid}} was renamed.", REVIEW);
        let review: ReviewOutput = parse_stage_output(&text, AgentStage::Review).unwrap();
        assert_eq!(review.fix_confidence, 88);
    }

    #[test]
    fn test_parse_ignores_braces_inside_strings() {
        let text = r#"{"approved": false, "issues": [], "assessment": "unbalanced } and \" quote {", "fixConfidence": 40} trailing }"#;
        let review: ReviewOutput = parse_stage_output(text, AgentStage::Review).unwrap();
        assert_eq!(review.assessment, "unbalanced } and \" quote {");
    }

    #[test]
    fn test_parse_unterminated_object_is_malformed() {
        let err = parse_stage_output::<ReviewOutput>(r#"{"approved": true, "issues": ["#, AgentStage::Review)
            .unwrap_err();
        assert!(matches!(err, ParseError::Malformed { .. }));
    }

    #[test]
    fn test_parse_no_json() {
        let err = parse_stage_output::<ReviewOutput>("I cannot help with that.", AgentStage::Review)
            .unwrap_err();
        assert!(matches!(err, ParseError::NoJson { .. }));
        assert!(err.to_string().contains("review"));
    }

    #[test]
    fn test_parse_schema_mismatch() {
        let err = parse_stage_output::<ReviewOutput>(r#"{"approved": "yes"}"#, AgentStage::Review)
            .unwrap_err();
        assert!(matches!(err, ParseError::Malformed { .. }));
    }

    #[test]
    fn test_parse_validation_failure() {
        let text = r#"{"changes": [], "confidence": 90, "summary": "nothing to do"}"#;
        let err =
            parse_stage_output::<FixGenerationOutput>(text, AgentStage::FixGeneration).unwrap_err();
        assert!(matches!(err, ParseError::Invalid { .. }));
        assert!(err.to_string().contains("no changes"));
    }
}
