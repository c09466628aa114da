//! The confidence gate.
//!
//! Pure: the same inputs always give the same decision, and nothing is
//! logged or recorded here.

use crate::agents::ReviewOutput;

/// Outcome of gating one fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateDecision {
    /// Whether the fix may be returned as a success.
    pub accepted: bool,
    /// Confidence the fix would be reported with.
    pub confidence: u8,
}

/// Confidence a fix is reported with.
///
/// An approving review's `fixConfidence` supersedes the generator's own
/// estimate; a rejecting or missing review leaves the generator's value.
#[must_use]
pub fn final_confidence(fix_confidence: u8, review: Option<&ReviewOutput>) -> u8 {
    match review {
        Some(review) if review.approved => review.fix_confidence,
        _ => fix_confidence,
    }
}

/// Decide whether a fix clears `min_confidence`.
///
/// With a review, the fix must be approved and the reviewer's confidence
/// must clear the bar. Without one, the generator's own confidence is
/// judged alone.
#[must_use]
pub fn evaluate(min_confidence: u8, fix_confidence: u8, review: Option<&ReviewOutput>) -> GateDecision {
    let confidence = final_confidence(fix_confidence, review);
    let accepted = match review {
        Some(review) => review.approved && review.fix_confidence >= min_confidence,
        None => fix_confidence >= min_confidence,
    };
    GateDecision {
        accepted,
        confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn review(approved: bool, fix_confidence: u8) -> ReviewOutput {
        ReviewOutput {
            approved,
            issues: vec![],
            assessment: String::new(),
            fix_confidence,
            improvements: None,
        }
    }

    #[test]
    fn test_approved_review_sets_confidence() {
        let decision = evaluate(70, 60, Some(&review(true, 88)));
        assert!(decision.accepted);
        assert_eq!(decision.confidence, 88);
    }

    #[test]
    fn test_approved_but_below_threshold() {
        let decision = evaluate(70, 95, Some(&review(true, 65)));
        assert!(!decision.accepted);
        assert_eq!(decision.confidence, 65);
    }

    #[test]
    fn test_rejected_review_never_accepts() {
        let decision = evaluate(70, 95, Some(&review(false, 95)));
        assert!(!decision.accepted);
        assert_eq!(decision.confidence, 95);
    }

    #[test]
    fn test_unreviewed_uses_own_confidence() {
        assert!(evaluate(70, 70, None).accepted);
        assert!(!evaluate(70, 69, None).accepted);
    }

    #[test]
    fn test_low_confidence_rejected() {
        let decision = evaluate(70, 40, None);
        assert!(!decision.accepted);
        assert_eq!(decision.confidence, 40);
    }

    #[test]
    fn test_gate_is_idempotent() {
        let r = review(true, 75);
        let first = evaluate(70, 50, Some(&r));
        let second = evaluate(70, 50, Some(&r));
        assert_eq!(first, second);
        assert_eq!(evaluate(80, 85, None), evaluate(80, 85, None));
    }
}
