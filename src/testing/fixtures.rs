//! Canned data for the login-form selector rename scenario.
//!
//! A Cypress test targets `[data-testid="email-input"]`; the PR under test
//! renamed that attribute to `email-field`. The reply builders produce the
//! JSON a well-behaved backend would return at each stage.

use crate::agents::{
    parse_stage_output, AgentStage, AnalysisOutput, FixGenerationOutput, InvestigationOutput,
};
use crate::context::{ChangedFile, ErrorContext, FileStatus};
use serde_json::json;

/// Path of the failing test file.
pub const TEST_FILE: &str = "cypress/e2e/login.cy.ts";

/// Source of the failing test file.
pub const LOGIN_TEST_SOURCE: &str = r#"describe('Login', () => {
  it('logs in with valid credentials', () => {
    cy.visit('/login');
    cy.get('[data-testid="email-input"]').type('user@example.com');
    cy.get('[data-testid="password-input"]').type('secret');
    cy.get('[data-testid="submit"]').click();
    cy.url().should('include', '/dashboard');
  });
});
"#;

const LOGIN_FORM_PATCH: &str = r#"@@ -12,7 +12,7 @@ export function LoginForm() {
   return (
     <form onSubmit={onSubmit}>
-      <input data-testid="email-input" type="email" />
+      <input data-testid="email-field" type="email" />
       <input data-testid="password-input" type="password" />
       <button data-testid="submit">Sign in</button>
     </form>"#;

/// The full failure context for the rename scenario.
#[must_use]
pub fn selector_rename_context() -> ErrorContext {
    ErrorContext::new(
        "Timed out retrying after 4000ms: Expected to find element: [data-testid=\"email-input\"], but never found it.",
        TEST_FILE,
        "Login logs in with valid credentials",
    )
    .with_stack_trace("AssertionError: Timed out retrying after 4000ms\n    at Context.eval (webpack:///./cypress/e2e/login.cy.ts:4:8)")
    .with_error_type("AssertionError")
    .with_failing_selector("[data-testid=\"email-input\"]")
    .with_changed_file(
        ChangedFile::new("src/components/LoginForm.tsx", FileStatus::Modified)
            .with_patch(LOGIN_FORM_PATCH),
    )
    .with_source_file_content(LOGIN_TEST_SOURCE)
}

/// Analysis reply classifying the failure as a selector mismatch.
#[must_use]
pub fn selector_analysis_json(confidence: u8) -> String {
    json!({
        "rootCauseCategory": "SELECTOR_MISMATCH",
        "contributingFactors": ["TIMING_ISSUE"],
        "confidence": confidence,
        "explanation": "The test waits for [data-testid=\"email-input\"] which no longer exists in the rendered form.",
        "selectors": ["[data-testid=\"email-input\"]"],
        "elements": ["email input"],
        "issueLocation": "TEST_CODE",
        "patterns": {
            "hasTimeout": true,
            "hasVisibilityIssue": false,
            "hasNetworkCall": false,
            "hasStateAssertion": false,
            "hasDynamicContent": false,
            "hasResponsiveIssue": false
        },
        "suggestedApproach": "Update the selector to match the renamed data-testid."
    })
    .to_string()
}

/// Investigation reply pointing at the renamed attribute.
#[must_use]
pub fn selector_investigation_json() -> String {
    let finding = json!({
        "type": "SELECTOR_CHANGE",
        "severity": "HIGH",
        "description": "data-testid on the email input was renamed from email-input to email-field",
        "evidence": [
            "-      <input data-testid=\"email-input\" type=\"email\" />",
            "+      <input data-testid=\"email-field\" type=\"email\" />"
        ],
        "location": { "file": "src/components/LoginForm.tsx", "line": 14 },
        "relationToError": "cy.get can no longer find the element and times out"
    });
    json!({
        "findings": [finding.clone()],
        "primaryFinding": finding,
        "isTestCodeFixable": true,
        "recommendedApproach": "Replace the old data-testid in the test file with the new one.",
        "selectorsToUpdate": [{
            "current": "[data-testid=\"email-input\"]",
            "suggestedReplacement": "[data-testid=\"email-field\"]",
            "reason": "renamed in LoginForm.tsx"
        }],
        "confidence": 90
    })
    .to_string()
}

fn fix_json(confidence: u8, new_code: &str, summary: &str) -> String {
    json!({
        "changes": [{
            "file": TEST_FILE,
            "line": 4,
            "oldCode": "cy.get('[data-testid=\"email-input\"]')",
            "newCode": new_code,
            "justification": "The app renamed the data-testid in LoginForm.tsx.",
            "changeType": "SELECTOR_UPDATE"
        }],
        "confidence": confidence,
        "summary": summary,
        "reasoning": "The PR diff renames email-input to email-field and the test still uses the old value.",
        "evidence": ["LoginForm.tsx line 14"],
        "risks": ["Other tests may use the old selector."]
    })
    .to_string()
}

/// First-pass fix: swap the selector.
#[must_use]
pub fn selector_fix_json(confidence: u8) -> String {
    fix_json(
        confidence,
        "cy.get('[data-testid=\"email-field\"]')",
        "Update email selector to data-testid=\"email-field\"",
    )
}

/// Second-pass fix: swap the selector and wait for visibility.
#[must_use]
pub fn visible_fix_json(confidence: u8) -> String {
    fix_json(
        confidence,
        "cy.get('[data-testid=\"email-field\"]').should('be.visible')",
        "Update email selector and assert it is visible before typing",
    )
}

/// A review with no issues.
#[must_use]
pub fn review_json(approved: bool, fix_confidence: u8) -> String {
    json!({
        "approved": approved,
        "issues": [],
        "assessment": if approved { "The fix addresses the root cause." } else { "The fix is not convincing." },
        "fixConfidence": fix_confidence
    })
    .to_string()
}

/// A rejection asking for a visibility assertion.
#[must_use]
pub fn visibility_review_json() -> String {
    json!({
        "approved": false,
        "issues": [{
            "severity": "CRITICAL",
            "changeIndex": 0,
            "description": "The input is rendered after an animation; typing immediately can fail.",
            "suggestion": "Add .should('be.visible') before .type()"
        }],
        "assessment": "Selector is right but the interaction is racy.",
        "fixConfidence": 55
    })
    .to_string()
}

/// # Panics
///
/// Panics if the canned reply stops matching the stage schema.
#[must_use]
pub fn selector_analysis(confidence: u8) -> AnalysisOutput {
    parse_stage_output(&selector_analysis_json(confidence), AgentStage::Analysis)
        .expect("analysis fixture must parse")
}

/// # Panics
///
/// Panics if the canned reply stops matching the stage schema.
#[must_use]
pub fn selector_investigation() -> InvestigationOutput {
    parse_stage_output(&selector_investigation_json(), AgentStage::Investigation)
        .expect("investigation fixture must parse")
}

/// # Panics
///
/// Panics if the canned reply stops matching the stage schema.
#[must_use]
pub fn selector_fix(confidence: u8) -> FixGenerationOutput {
    parse_stage_output(&selector_fix_json(confidence), AgentStage::FixGeneration)
        .expect("fix fixture must parse")
}

/// # Panics
///
/// Panics if the canned reply stops matching the stage schema.
#[must_use]
pub fn visible_fix(confidence: u8) -> FixGenerationOutput {
    parse_stage_output(&visible_fix_json(confidence), AgentStage::FixGeneration)
        .expect("fix fixture must parse")
}
