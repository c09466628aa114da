//! Single-shot fallback used when the agentic pipeline gives up.

use crate::agents::prompt::{render_failure, render_pr_diff, render_source};
use crate::agents::{parse_stage_output, AgentStage, FixGenerationOutput};
use crate::context::ErrorContext;
use crate::llm::LlmClient;
use crate::orchestrator::FixRecommendation;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// A way to produce a fix without the staged pipeline.
#[async_trait]
pub trait FixStrategy: Send + Sync {
    /// Try to produce a fix.
    ///
    /// `Ok(None)` means the strategy ran but has nothing it is willing to
    /// recommend.
    async fn generate(&self, context: &ErrorContext) -> Result<Option<FixRecommendation>>;

    /// Short name for logs.
    fn name(&self) -> &str;
}

const SINGLE_SHOT_PROMPT: &str = r#"You are fixing a failing end-to-end test in one step.
First work out the root cause from the error, the pull request diff and the test source; then propose the smallest change to the TEST code that fixes it.
oldCode must be copied verbatim from the source. Never weaken an assertion.

Respond with a single JSON object and nothing else:
{
  "changes": [
    { "file": "<path>", "line": <int or null>, "oldCode": "<exact text>", "newCode": "<replacement>", "justification": "<why>", "changeType": "SELECTOR_UPDATE | WAIT_ADDITION | ASSERTION_UPDATE | LOGIC_CHANGE | OTHER" }
  ],
  "confidence": <integer 0-100>,
  "summary": "<one sentence>",
  "reasoning": "<root cause and how the fix addresses it>",
  "evidence": ["<facts the fix relies on>"],
  "risks": ["<what could still go wrong>"]
}"#;

/// One backend call that analyses and fixes at once.
pub struct SingleShotFixer {
    client: Arc<dyn LlmClient>,
    min_confidence: u8,
}

impl SingleShotFixer {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self {
            client,
            min_confidence: 70,
        }
    }

    /// Only recommend fixes at or above this confidence.
    #[must_use]
    pub fn with_min_confidence(mut self, min_confidence: u8) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    fn build_user_prompt(context: &ErrorContext) -> String {
        let mut prompt = render_failure(context);
        prompt.push('\n');
        prompt.push_str(&render_pr_diff(context));
        if let Some(source) = render_source(context) {
            prompt.push('\n');
            prompt.push_str(&source);
        }
        prompt.push_str("\nDiagnose and fix this failure.");
        prompt
    }
}

#[async_trait]
impl FixStrategy for SingleShotFixer {
    async fn generate(&self, context: &ErrorContext) -> Result<Option<FixRecommendation>> {
        let user_prompt = Self::build_user_prompt(context);
        debug!(
            "Single-shot fix via {} ({} chars user)",
            self.client.model_name(),
            user_prompt.len()
        );

        let text = self.client.complete(SINGLE_SHOT_PROMPT, &user_prompt).await?;
        let fix: FixGenerationOutput = parse_stage_output(&text, AgentStage::FixGeneration)?;

        if fix.confidence < self.min_confidence {
            info!(
                "Single-shot fix confidence {} below {}, discarding",
                fix.confidence, self.min_confidence
            );
            return Ok(None);
        }
        Ok(Some(FixRecommendation::from_fix(&fix, None)))
    }

    fn name(&self) -> &str {
        "single-shot"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::testing::fixtures;

    #[tokio::test]
    async fn test_single_shot_returns_confident_fix() {
        let client = Arc::new(MockLlmClient::new().with_response(&fixtures::selector_fix_json(81)));
        let fixer = SingleShotFixer::new(client.clone());

        let fix = fixer
            .generate(&fixtures::selector_rename_context())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fix.confidence, 81);
        assert!(fix.proposed_changes[0].new_code.contains("email-field"));
        assert_eq!(client.call_count(), 1);
        assert!(client.calls()[0].user_content.contains("## PR changes"));
    }

    #[tokio::test]
    async fn test_single_shot_discards_low_confidence() {
        let client = Arc::new(MockLlmClient::new().with_response(&fixtures::selector_fix_json(50)));
        let fixer = SingleShotFixer::new(client).with_min_confidence(60);
        let fix = fixer
            .generate(&fixtures::selector_rename_context())
            .await
            .unwrap();
        assert!(fix.is_none());
    }

    #[tokio::test]
    async fn test_single_shot_propagates_parse_error() {
        let client = Arc::new(MockLlmClient::new().with_response("sorry"));
        let fixer = SingleShotFixer::new(client);
        let err = fixer
            .generate(&fixtures::selector_rename_context())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no JSON object"));
    }

    #[tokio::test]
    async fn test_single_shot_propagates_backend_error() {
        let fixer = SingleShotFixer::new(Arc::new(MockLlmClient::new().with_error("quota exceeded")));
        assert!(fixer
            .generate(&fixtures::selector_rename_context())
            .await
            .is_err());
    }
}
