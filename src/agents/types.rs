//! Typed outputs of the four stages.
//!
//! These mirror the JSON the backend is asked to produce: camelCase fields,
//! SCREAMING_SNAKE_CASE enum tags. Optional collections default to empty so
//! a terse but correct answer still parses; anything structurally wrong is
//! rejected by serde or by [`StageOutput::validate`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;

/// Common behaviour of every stage output.
pub trait StageOutput: DeserializeOwned + Serialize + Send + Sync + 'static {
    /// Self-reported confidence, 0-100.
    fn confidence(&self) -> u8;

    /// Semantic checks serde cannot express.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Accepts integer or float confidence values in 0..=100 and rounds them.
fn deserialize_confidence<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if !(0.0..=100.0).contains(&value) {
        return Err(serde::de::Error::custom(format!(
            "confidence {} is outside 0-100",
            value
        )));
    }
    Ok(value.round() as u8)
}

// ============================================================================
// Analysis
// ============================================================================

/// Root-cause category of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RootCauseCategory {
    SelectorMismatch,
    TimingIssue,
    NetworkIssue,
    AssertionMismatch,
    #[serde(other)]
    Other,
}

impl RootCauseCategory {
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::SelectorMismatch => "Selector mismatch",
            Self::TimingIssue => "Timing issue",
            Self::NetworkIssue => "Network issue",
            Self::AssertionMismatch => "Assertion mismatch",
            Self::Other => "Other",
        }
    }
}

impl std::fmt::Display for RootCauseCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Where the fault most likely lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueLocation {
    TestCode,
    AppCode,
    Both,
}

/// Boolean pattern flags describing the failing test.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PatternFlags {
    pub has_timeout: bool,
    pub has_visibility_issue: bool,
    pub has_network_call: bool,
    pub has_state_assertion: bool,
    pub has_dynamic_content: bool,
    pub has_responsive_issue: bool,
}

impl PatternFlags {
    /// Names of the flags that are set, in declaration order.
    #[must_use]
    pub fn active(&self) -> Vec<&'static str> {
        [
            (self.has_timeout, "timeout"),
            (self.has_visibility_issue, "visibility"),
            (self.has_network_call, "network call"),
            (self.has_state_assertion, "state assertion"),
            (self.has_dynamic_content, "dynamic content"),
            (self.has_responsive_issue, "responsive layout"),
        ]
        .into_iter()
        .filter_map(|(set, name)| set.then_some(name))
        .collect()
    }
}

/// Output of the Analysis stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOutput {
    pub root_cause_category: RootCauseCategory,
    #[serde(default)]
    pub contributing_factors: BTreeSet<RootCauseCategory>,
    #[serde(deserialize_with = "deserialize_confidence")]
    pub confidence: u8,
    pub explanation: String,
    #[serde(default)]
    pub selectors: Vec<String>,
    #[serde(default)]
    pub elements: Vec<String>,
    pub issue_location: IssueLocation,
    #[serde(default)]
    pub patterns: PatternFlags,
    #[serde(default)]
    pub suggested_approach: String,
}

impl StageOutput for AnalysisOutput {
    fn confidence(&self) -> u8 {
        self.confidence
    }

    fn validate(&self) -> Result<(), String> {
        if self.explanation.trim().is_empty() {
            return Err("explanation is empty".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// Investigation
// ============================================================================

/// Severity of an investigation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// A code location referenced by a finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeLocation {
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// One concrete observation from the investigation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    #[serde(rename = "type")]
    pub finding_type: String,
    pub severity: FindingSeverity,
    pub description: String,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<CodeLocation>,
    #[serde(default)]
    pub relation_to_error: String,
}

/// A selector the test should stop using.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorUpdate {
    pub current: String,
    pub suggested_replacement: String,
    #[serde(default)]
    pub reason: String,
}

/// Output of the Investigation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestigationOutput {
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_finding: Option<Finding>,
    pub is_test_code_fixable: bool,
    pub recommended_approach: String,
    #[serde(default)]
    pub selectors_to_update: Vec<SelectorUpdate>,
    #[serde(deserialize_with = "deserialize_confidence")]
    pub confidence: u8,
}

impl InvestigationOutput {
    /// Highest severity among findings.
    #[must_use]
    pub fn max_severity(&self) -> Option<FindingSeverity> {
        self.findings.iter().map(|f| f.severity).max()
    }
}

impl StageOutput for InvestigationOutput {
    fn confidence(&self) -> u8 {
        self.confidence
    }

    fn validate(&self) -> Result<(), String> {
        for (i, update) in self.selectors_to_update.iter().enumerate() {
            if update.current.trim().is_empty() || update.suggested_replacement.trim().is_empty() {
                return Err(format!("selectorsToUpdate[{}] has an empty selector", i));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Fix generation
// ============================================================================

/// Kind of edit a change makes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    SelectorUpdate,
    WaitAddition,
    AssertionUpdate,
    LogicChange,
    #[default]
    #[serde(other)]
    Other,
}

/// One concrete code edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeChange {
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// Text to replace; expected to occur verbatim in the file.
    #[serde(default)]
    pub old_code: String,
    #[serde(default)]
    pub new_code: String,
    #[serde(default)]
    pub justification: String,
    #[serde(default)]
    pub change_type: ChangeType,
}

/// Output of the Fix Generation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixGenerationOutput {
    pub changes: Vec<CodeChange>,
    #[serde(deserialize_with = "deserialize_confidence")]
    pub confidence: u8,
    pub summary: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternatives: Option<Vec<String>>,
}

impl StageOutput for FixGenerationOutput {
    fn confidence(&self) -> u8 {
        self.confidence
    }

    fn validate(&self) -> Result<(), String> {
        if self.changes.is_empty() {
            return Err("fix contains no changes".to_string());
        }
        for (i, change) in self.changes.iter().enumerate() {
            if change.file.trim().is_empty() {
                return Err(format!("changes[{}] has no file path", i));
            }
            if change.old_code.is_empty() && change.new_code.is_empty() {
                return Err(format!("changes[{}] has neither oldCode nor newCode", i));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Review
// ============================================================================

/// Severity of a review issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueSeverity {
    Info,
    Warning,
    Critical,
}

/// A problem the reviewer found with one change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewIssue {
    pub severity: IssueSeverity,
    pub change_index: usize,
    pub description: String,
    #[serde(default)]
    pub suggestion: String,
}

/// Output of the Review stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewOutput {
    pub approved: bool,
    #[serde(default)]
    pub issues: Vec<ReviewIssue>,
    pub assessment: String,
    #[serde(deserialize_with = "deserialize_confidence")]
    pub fix_confidence: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub improvements: Option<Vec<String>>,
}

impl ReviewOutput {
    /// Issues marked critical.
    pub fn critical_issues(&self) -> impl Iterator<Item = &ReviewIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Critical)
    }
}

impl StageOutput for ReviewOutput {
    fn confidence(&self) -> u8 {
        self.fix_confidence
    }
}
