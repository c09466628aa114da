//! The four reasoning stages of the repair pipeline.
//!
//! Each stage is a small struct holding a shared backend client. All of them
//! implement [`Agent`]: build a system prompt, render the prior outputs and
//! the failure context into a user prompt, make exactly one backend call, and
//! parse the reply strictly into the stage's typed output.
//!
//! ```text
//! ErrorContext ──> Analysis ──> Investigation ──> FixGeneration ⇄ Review
//!                     │               │                  │           │
//!                     └───────────────┴──── AgentInputs ─┴───────────┘
//! ```
//!
//! A stage never retries on its own; a malformed reply becomes a failed
//! [`StageResult`] and the orchestrator decides what happens next.

pub mod analysis;
pub mod fix_generation;
pub mod investigation;
pub mod parse;
pub mod prompt;
pub mod review;
pub mod types;

pub use analysis::AnalysisAgent;
pub use fix_generation::FixGenerationAgent;
pub use investigation::InvestigationAgent;
pub use parse::{parse_stage_output, ParseError};
pub use review::ReviewAgent;
pub use types::{
    AnalysisOutput, ChangeType, CodeChange, CodeLocation, Finding, FindingSeverity,
    FixGenerationOutput, InvestigationOutput, IssueLocation, IssueSeverity, PatternFlags,
    ReviewIssue, ReviewOutput, RootCauseCategory, SelectorUpdate, StageOutput,
};

use crate::context::ErrorContext;
use crate::llm::LlmClient;
use async_trait::async_trait;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

// ============================================================================
// Stage tags
// ============================================================================

/// The closed set of pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AgentStage {
    Analysis,
    Investigation,
    FixGeneration,
    Review,
}

impl AgentStage {
    /// Label used in logs and error messages.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::Investigation => "investigation",
            Self::FixGeneration => "fix generation",
            Self::Review => "review",
        }
    }
}

impl std::fmt::Display for AgentStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

// ============================================================================
// Stage result
// ============================================================================

/// Outcome of one stage invocation.
///
/// Either carries validated data or an error message, never both. The
/// fields are private so that holds by construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageResult<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    duration_ms: u64,
}

impl<T> StageResult<T> {
    /// A successful stage with validated output.
    pub fn succeeded(data: T, duration: Duration) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            duration_ms: duration_millis(duration),
        }
    }

    /// A failed stage.
    pub fn failed(error: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            duration_ms: duration_millis(duration),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.success
    }

    #[must_use]
    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    /// Convert into a `Result`, consuming the stage result.
    pub fn into_result(self) -> std::result::Result<T, String> {
        match (self.data, self.error) {
            (Some(data), _) => Ok(data),
            (None, Some(error)) => Err(error),
            (None, None) => Err("stage produced no output".to_string()),
        }
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Prior outputs
// ============================================================================

/// What the previous iteration produced, handed to the next Fix Generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryFeedback {
    /// The fix that was not accepted.
    pub previous_fix: FixGenerationOutput,
    /// Issues the reviewer raised against it (empty when review was unavailable).
    pub issues: Vec<ReviewIssue>,
    /// Reviewer's overall assessment, if a review happened.
    pub assessment: Option<String>,
}

impl RetryFeedback {
    /// Feedback from a completed review.
    pub fn from_review(previous_fix: FixGenerationOutput, review: &ReviewOutput) -> Self {
        Self {
            previous_fix,
            issues: review.issues.clone(),
            assessment: Some(review.assessment.clone()),
        }
    }

    /// Feedback when the review stage could not judge the fix.
    pub fn unreviewed(previous_fix: FixGenerationOutput) -> Self {
        Self {
            previous_fix,
            issues: Vec::new(),
            assessment: None,
        }
    }
}

/// Outputs of earlier stages, populated as the pipeline advances.
///
/// Every field is optional; each agent declares which ones it requires and
/// fails the stage when one is missing.
#[derive(Debug, Clone, Copy, Default)]
pub struct AgentInputs<'a> {
    pub analysis: Option<&'a AnalysisOutput>,
    pub investigation: Option<&'a InvestigationOutput>,
    pub proposed_fix: Option<&'a FixGenerationOutput>,
    pub feedback: Option<&'a RetryFeedback>,
}

impl<'a> AgentInputs<'a> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_analysis(mut self, analysis: &'a AnalysisOutput) -> Self {
        self.analysis = Some(analysis);
        self
    }

    #[must_use]
    pub fn with_investigation(mut self, investigation: &'a InvestigationOutput) -> Self {
        self.investigation = Some(investigation);
        self
    }

    #[must_use]
    pub fn with_proposed_fix(mut self, fix: &'a FixGenerationOutput) -> Self {
        self.proposed_fix = Some(fix);
        self
    }

    #[must_use]
    pub fn with_feedback(mut self, feedback: Option<&'a RetryFeedback>) -> Self {
        self.feedback = feedback;
        self
    }

    pub(crate) fn require_analysis(&self) -> Result<&'a AnalysisOutput, String> {
        self.analysis
            .ok_or_else(|| "missing required input: analysis output".to_string())
    }

    pub(crate) fn require_investigation(&self) -> Result<&'a InvestigationOutput, String> {
        self.investigation
            .ok_or_else(|| "missing required input: investigation output".to_string())
    }

    pub(crate) fn require_proposed_fix(&self) -> Result<&'a FixGenerationOutput, String> {
        self.proposed_fix
            .ok_or_else(|| "missing required input: proposed fix".to_string())
    }
}

// ============================================================================
// Agent contract
// ============================================================================

/// One reasoning stage.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Typed output of this stage.
    type Output: StageOutput;

    /// Which stage this is.
    const STAGE: AgentStage;

    /// Backend used for the single call.
    fn client(&self) -> &dyn LlmClient;

    /// Stage-specific instructions, including the JSON schema to answer with.
    fn system_prompt(&self) -> &'static str;

    /// Render prior outputs and context into the user prompt.
    ///
    /// Returns an error naming any required input that is missing.
    fn build_user_prompt(
        &self,
        inputs: AgentInputs<'_>,
        context: &ErrorContext,
    ) -> Result<String, String>;

    /// Look over a parsed output for things worth logging. Never rejects.
    fn inspect(&self, _output: &Self::Output, _inputs: AgentInputs<'_>, _context: &ErrorContext) {}

    /// Run the stage once.
    async fn execute(
        &self,
        inputs: AgentInputs<'_>,
        context: &ErrorContext,
    ) -> StageResult<Self::Output>
    where
        Self: Sized,
    {
        execute_stage(self, inputs, context).await
    }
}

async fn execute_stage<A: Agent>(
    agent: &A,
    inputs: AgentInputs<'_>,
    context: &ErrorContext,
) -> StageResult<A::Output> {
    let start = Instant::now();
    let stage = A::STAGE;

    let user_prompt = match agent.build_user_prompt(inputs, context) {
        Ok(prompt) => prompt,
        Err(e) => {
            warn!("{} stage not started: {}", stage, e);
            return StageResult::failed(e, start.elapsed());
        }
    };
    let system_prompt = agent.system_prompt();

    debug!(
        "Invoking {} on {} ({} chars system, {} chars user)",
        agent.client().model_name(),
        stage,
        system_prompt.len(),
        user_prompt.len()
    );

    let text = match agent.client().complete(system_prompt, &user_prompt).await {
        Ok(text) => text,
        Err(e) => {
            warn!("{} backend call failed: {:#}", stage, e);
            return StageResult::failed(format!("backend call failed: {:#}", e), start.elapsed());
        }
    };

    match parse_stage_output::<A::Output>(&text, stage) {
        Ok(output) => {
            agent.inspect(&output, inputs, context);
            debug!(
                "{} completed in {}ms with confidence {}",
                stage,
                start.elapsed().as_millis(),
                output.confidence()
            );
            StageResult::succeeded(output, start.elapsed())
        }
        Err(e) => {
            warn!("{} output rejected: {}", stage, e);
            StageResult::failed(e.to_string(), start.elapsed())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_result_success_invariant() {
        let result = StageResult::succeeded(42u32, Duration::from_millis(15));
        assert!(result.is_success());
        assert_eq!(result.data(), Some(&42));
        assert!(result.error().is_none());
        assert_eq!(result.duration_ms(), 15);
    }

    #[test]
    fn test_stage_result_failure_invariant() {
        let result: StageResult<u32> = StageResult::failed("boom", Duration::ZERO);
        assert!(!result.is_success());
        assert!(result.data().is_none());
        assert_eq!(result.error(), Some("boom"));
        assert_eq!(result.into_result(), Err("boom".to_string()));
    }

    #[test]
    fn test_stage_result_serializes_camel_case() {
        let result: StageResult<u32> = StageResult::failed("bad json", Duration::from_millis(7));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "bad json");
        assert_eq!(json["durationMs"], 7);
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_agent_inputs_require_missing() {
        let inputs = AgentInputs::new();
        assert!(inputs.require_analysis().unwrap_err().contains("analysis"));
        assert!(inputs
            .require_investigation()
            .unwrap_err()
            .contains("investigation"));
        assert!(inputs.require_proposed_fix().unwrap_err().contains("fix"));
    }

    #[test]
    fn test_stage_labels() {
        assert_eq!(AgentStage::FixGeneration.to_string(), "fix generation");
        assert_eq!(AgentStage::Analysis.label(), "analysis");
    }
}
