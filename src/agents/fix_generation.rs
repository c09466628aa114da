//! Fix Generation stage: propose concrete edits to the failing test.

use super::prompt::{render_failure, render_source, to_json_block, truncate_chars};
use super::types::{CodeChange, FixGenerationOutput};
use super::{Agent, AgentInputs, AgentStage, RetryFeedback};
use crate::context::ErrorContext;
use crate::llm::LlmClient;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::warn;

const SYSTEM_PROMPT: &str = r#"You are fixing a failing end-to-end test. You are given the failure, a root-cause analysis, an investigation with evidence and the test source.
Propose the smallest change to the TEST code that makes it pass for the right reason.
Rules:
- oldCode must be copied verbatim from the source, including indentation, so it can be found with an exact string search.
- Never weaken an assertion just to make the test pass.
- Prefer stable selectors (data-testid, data-cy) over CSS classes or text.
- When you add waits, wait for a condition (visibility, a network alias), never a fixed sleep.

Respond with a single JSON object and nothing else:
{
  "changes": [
    {
      "file": "<path>",
      "line": <int or null>,
      "oldCode": "<exact text to replace>",
      "newCode": "<replacement text>",
      "justification": "<why this change>",
      "changeType": "SELECTOR_UPDATE | WAIT_ADDITION | ASSERTION_UPDATE | LOGIC_CHANGE | OTHER"
    }
  ],
  "confidence": <integer 0-100>,
  "summary": "<one sentence>",
  "reasoning": "<how the evidence supports the fix>",
  "evidence": ["<facts the fix relies on>"],
  "risks": ["<what could still go wrong>"],
  "alternatives": ["<other fixes considered>"]
}"#;

/// Whether `change.old_code` occurs verbatim in the fetched source.
///
/// `None` when there is nothing to compare against: no source was fetched,
/// the change targets a different file, or the change is a pure insertion.
pub fn old_code_matches_source(change: &CodeChange, context: &ErrorContext) -> Option<bool> {
    let source = context.source_file_content.as_deref()?;
    if change.old_code.is_empty() || !same_file(&change.file, &context.test_file) {
        return None;
    }
    Some(source.contains(&change.old_code))
}

fn same_file(a: &str, b: &str) -> bool {
    let a = a.trim_start_matches("./");
    let b = b.trim_start_matches("./");
    a == b || a.ends_with(&format!("/{}", b)) || b.ends_with(&format!("/{}", a))
}

fn render_feedback(feedback: &RetryFeedback) -> String {
    let mut out = String::from("## Previous attempt (not accepted)\n");
    out.push_str(&to_json_block(&feedback.previous_fix.changes));
    out.push('\n');

    if let Some(assessment) = &feedback.assessment {
        let _ = writeln!(out, "\nReviewer assessment: {}", assessment);
    }

    if feedback.issues.is_empty() {
        out.push_str("\nThe previous attempt could not be reviewed. Re-examine it critically.\n");
    } else {
        out.push_str("\nReviewer issues:\n");
        for issue in &feedback.issues {
            let _ = write!(
                out,
                "- [{:?}] change #{}: {}",
                issue.severity, issue.change_index, issue.description
            );
            if !issue.suggestion.is_empty() {
                let _ = write!(out, " (suggestion: {})", issue.suggestion);
            }
            out.push('\n');
        }
        out.push_str("\nYou MUST address every issue listed above in the new fix.\n");
    }
    out
}

/// Edit proposer.
pub struct FixGenerationAgent {
    client: Arc<dyn LlmClient>,
}

impl FixGenerationAgent {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }
}

impl Agent for FixGenerationAgent {
    type Output = FixGenerationOutput;
    const STAGE: AgentStage = AgentStage::FixGeneration;

    fn client(&self) -> &dyn LlmClient {
        self.client.as_ref()
    }

    fn system_prompt(&self) -> &'static str {
        SYSTEM_PROMPT
    }

    fn build_user_prompt(
        &self,
        inputs: AgentInputs<'_>,
        context: &ErrorContext,
    ) -> Result<String, String> {
        let analysis = inputs.require_analysis()?;
        let investigation = inputs.require_investigation()?;

        let mut prompt = render_failure(context);
        let _ = write!(
            prompt,
            "\n## Analysis\n{}\n\n## Investigation\n{}\n",
            to_json_block(analysis),
            to_json_block(investigation)
        );

        if !investigation.selectors_to_update.is_empty() {
            prompt.push_str("\n## Selectors to update\n");
            for update in &investigation.selectors_to_update {
                let _ = writeln!(
                    prompt,
                    "- {} -> {}",
                    update.current, update.suggested_replacement
                );
            }
        }

        match render_source(context) {
            Some(source) => {
                prompt.push('\n');
                prompt.push_str(&source);
            }
            None => prompt.push_str(
                "\nThe test source is not available. Quote oldCode exactly as it appears in the error or stack trace.\n",
            ),
        }

        if let Some(feedback) = inputs.feedback {
            prompt.push('\n');
            prompt.push_str(&truncate_chars(&render_feedback(feedback), 8_000));
        }

        prompt.push_str("\nPropose the fix.");
        Ok(prompt)
    }

    fn inspect(&self, output: &FixGenerationOutput, _inputs: AgentInputs<'_>, context: &ErrorContext) {
        for (i, change) in output.changes.iter().enumerate() {
            if old_code_matches_source(change, context) == Some(false) {
                warn!(
                    "Proposed change #{} in {}: oldCode not found verbatim in source",
                    i, change.file
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::types::{IssueSeverity, ReviewIssue};
    use crate::llm::MockLlmClient;
    use crate::testing::fixtures;

    fn change(file: &str, old_code: &str) -> CodeChange {
        CodeChange {
            file: file.to_string(),
            line: None,
            old_code: old_code.to_string(),
            new_code: "x".to_string(),
            justification: String::new(),
            change_type: Default::default(),
        }
    }

    #[test]
    fn test_old_code_matches_source() {
        let ctx = fixtures::selector_rename_context();
        let hit = change(&ctx.test_file, "[data-testid=\"email-input\"]");
        let miss = change(&ctx.test_file, "cy.get('#nope')");
        let other = change("cypress/e2e/other.cy.ts", "anything");

        assert_eq!(old_code_matches_source(&hit, &ctx), Some(true));
        assert_eq!(old_code_matches_source(&miss, &ctx), Some(false));
        assert_eq!(old_code_matches_source(&other, &ctx), None);
    }

    #[test]
    fn test_same_file_tolerates_prefixes() {
        assert!(same_file("./cypress/e2e/login.cy.ts", "cypress/e2e/login.cy.ts"));
        assert!(same_file("repo/cypress/e2e/login.cy.ts", "cypress/e2e/login.cy.ts"));
        assert!(!same_file("cypress/e2e/signup.cy.ts", "cypress/e2e/login.cy.ts"));
    }

    #[test]
    fn test_prompt_requires_investigation() {
        let agent = FixGenerationAgent::new(Arc::new(MockLlmClient::new()));
        let analysis = fixtures::selector_analysis(85);
        let err = agent
            .build_user_prompt(
                AgentInputs::new().with_analysis(&analysis),
                &fixtures::selector_rename_context(),
            )
            .unwrap_err();
        assert!(err.contains("investigation"));
    }

    #[test]
    fn test_prompt_without_feedback() {
        let agent = FixGenerationAgent::new(Arc::new(MockLlmClient::new()));
        let analysis = fixtures::selector_analysis(85);
        let investigation = fixtures::selector_investigation();
        let prompt = agent
            .build_user_prompt(
                AgentInputs::new()
                    .with_analysis(&analysis)
                    .with_investigation(&investigation),
                &fixtures::selector_rename_context(),
            )
            .unwrap();
        assert!(prompt.contains("## Selectors to update"));
        assert!(prompt.contains("email-field"));
        assert!(!prompt.contains("Previous attempt"));
    }

    #[test]
    fn test_prompt_embeds_review_feedback() {
        let agent = FixGenerationAgent::new(Arc::new(MockLlmClient::new()));
        let analysis = fixtures::selector_analysis(85);
        let investigation = fixtures::selector_investigation();
        let feedback = RetryFeedback {
            previous_fix: fixtures::selector_fix(80),
            issues: vec![ReviewIssue {
                severity: IssueSeverity::Critical,
                change_index: 0,
                description: "element may not be visible yet".to_string(),
                suggestion: "assert be.visible before typing".to_string(),
            }],
            assessment: Some("close but racy".to_string()),
        };
        let prompt = agent
            .build_user_prompt(
                AgentInputs::new()
                    .with_analysis(&analysis)
                    .with_investigation(&investigation)
                    .with_feedback(Some(&feedback)),
                &fixtures::selector_rename_context(),
            )
            .unwrap();
        assert!(prompt.contains("Previous attempt"));
        assert!(prompt.contains("[Critical] change #0: element may not be visible yet"));
        assert!(prompt.contains("assert be.visible before typing"));
        assert!(prompt.contains("You MUST address every issue"));
    }

    #[test]
    fn test_prompt_with_unreviewed_feedback() {
        let feedback = RetryFeedback::unreviewed(fixtures::selector_fix(40));
        let rendered = render_feedback(&feedback);
        assert!(rendered.contains("could not be reviewed"));
        assert!(!rendered.contains("MUST"));
    }

    #[tokio::test]
    async fn test_execute_parses_fix() {
        let client = Arc::new(
            MockLlmClient::new().with_scripted_response(fixtures::selector_fix_json(82)),
        );
        let agent = FixGenerationAgent::new(client);
        let analysis = fixtures::selector_analysis(85);
        let investigation = fixtures::selector_investigation();
        let result = agent
            .execute(
                AgentInputs::new()
                    .with_analysis(&analysis)
                    .with_investigation(&investigation),
                &fixtures::selector_rename_context(),
            )
            .await;

        let fix = result.data().unwrap();
        assert_eq!(fix.confidence, 82);
        assert!(fix.changes[0].new_code.contains("email-field"));
    }

    #[tokio::test]
    async fn test_execute_empty_changes_is_failure() {
        let client = Arc::new(MockLlmClient::new().with_scripted_response(
            r#"{"changes": [], "confidence": 90, "summary": "nothing to change"}"#,
        ));
        let agent = FixGenerationAgent::new(client);
        let analysis = fixtures::selector_analysis(85);
        let investigation = fixtures::selector_investigation();
        let result = agent
            .execute(
                AgentInputs::new()
                    .with_analysis(&analysis)
                    .with_investigation(&investigation),
                &fixtures::selector_rename_context(),
            )
            .await;
        assert!(result.error().unwrap().contains("no changes"));
    }
}
