//! Review stage: critique a proposed fix before it is accepted.

use super::fix_generation::old_code_matches_source;
use super::prompt::{render_failure, render_source, to_json_block};
use super::types::ReviewOutput;
use super::{Agent, AgentInputs, AgentStage};
use crate::context::ErrorContext;
use crate::llm::LlmClient;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::warn;

const SYSTEM_PROMPT: &str = r#"You are reviewing a proposed fix for a failing end-to-end test before it is applied.
Check each change:
- Does it address the root cause identified in the analysis, not just the symptom?
- Is oldCode an exact excerpt of the source so it can be applied mechanically?
- Does it weaken or delete an assertion?
- Does it introduce fixed sleeps, flakiness, or new races (e.g. typing into an element before it is visible)?
Approve only if the fix is correct and safe to apply as-is.

Respond with a single JSON object and nothing else:
{
  "approved": <bool>,
  "issues": [
    {
      "severity": "INFO | WARNING | CRITICAL",
      "changeIndex": <0-based index into changes>,
      "description": "<the problem>",
      "suggestion": "<how to fix it>"
    }
  ],
  "assessment": "<overall judgement>",
  "fixConfidence": <integer 0-100, your confidence the fix works>,
  "improvements": ["<optional non-blocking improvements>"]
}"#;

/// Fix critic.
pub struct ReviewAgent {
    client: Arc<dyn LlmClient>,
}

impl ReviewAgent {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }
}

impl Agent for ReviewAgent {
    type Output = ReviewOutput;
    const STAGE: AgentStage = AgentStage::Review;

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
        let fix = inputs.require_proposed_fix()?;
        let analysis = inputs.require_analysis()?;

        let mut prompt = render_failure(context);
        let _ = write!(
            prompt,
            "\n## Analysis\n{}\n\n## Proposed fix\n{}\n",
            to_json_block(analysis),
            to_json_block(fix)
        );

        if let Some(investigation) = inputs.investigation {
            let _ = write!(
                prompt,
                "\n## Investigation summary\n- Test code fixable: {}\n- Recommended approach: {}\n",
                investigation.is_test_code_fixable, investigation.recommended_approach
            );
        }

        prompt.push_str("\n## Mechanical checks\n");
        for (i, change) in fix.changes.iter().enumerate() {
            let note = match old_code_matches_source(change, context) {
                Some(true) => "oldCode found verbatim in source",
                Some(false) => "oldCode NOT found in source",
                None => "not checked",
            };
            let _ = writeln!(prompt, "- change #{} ({}): {}", i, change.file, note);
        }

        if let Some(source) = render_source(context) {
            prompt.push('\n');
            prompt.push_str(&source);
        }

        prompt.push_str("\nReview the proposed fix.");
        Ok(prompt)
    }

    fn inspect(&self, output: &ReviewOutput, inputs: AgentInputs<'_>, _context: &ErrorContext) {
        let Some(fix) = inputs.proposed_fix else {
            return;
        };
        for issue in &output.issues {
            if issue.change_index >= fix.changes.len() {
                warn!(
                    "Review issue references change #{} but the fix has {} changes",
                    issue.change_index,
                    fix.changes.len()
                );
            }
        }
    }
}
