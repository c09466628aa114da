//! What an orchestration run returns.

use super::gate::final_confidence;
use crate::agents::{
    AnalysisOutput, CodeChange, FixGenerationOutput, InvestigationOutput, ReviewOutput,
    StageResult,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// How the returned fix was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Approach {
    /// The multi-stage pipeline.
    Agentic,
    /// The fallback strategy after the pipeline failed.
    SingleShot,
    /// No fix was produced.
    Failed,
}

impl std::fmt::Display for Approach {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Agentic => write!(f, "agentic"),
            Self::SingleShot => write!(f, "single-shot"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One edit in the recommended fix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedChange {
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub old_code: String,
    pub new_code: String,
    pub justification: String,
}

impl From<&CodeChange> for ProposedChange {
    fn from(change: &CodeChange) -> Self {
        Self {
            file: change.file.clone(),
            line: change.line,
            old_code: change.old_code.clone(),
            new_code: change.new_code.clone(),
            justification: change.justification.clone(),
        }
    }
}

/// The fix handed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FixRecommendation {
    pub confidence: u8,
    pub summary: String,
    pub reasoning: String,
    pub evidence: Vec<String>,
    pub proposed_changes: Vec<ProposedChange>,
}

impl FixRecommendation {
    /// Convert a generated fix, taking the reviewer's confidence if it approved.
    pub fn from_fix(fix: &FixGenerationOutput, review: Option<&ReviewOutput>) -> Self {
        Self {
            confidence: final_confidence(fix.confidence, review),
            summary: fix.summary.clone(),
            reasoning: fix.reasoning.clone(),
            evidence: fix.evidence.clone(),
            proposed_changes: fix.changes.iter().map(ProposedChange::from).collect(),
        }
    }
}

/// Latest record of each stage. Absent means the stage never ran.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<StageResult<AnalysisOutput>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub investigation: Option<StageResult<InvestigationOutput>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix_generation: Option<StageResult<FixGenerationOutput>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review: Option<StageResult<ReviewOutput>>,
}

/// Outcome of [`super::Orchestrator::orchestrate`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationResult {
    pub success: bool,
    pub approach: Approach,
    pub iterations: u32,
    pub total_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix: Option<FixRecommendation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub agent_results: AgentResults,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
}
