//! Investigation stage: turn the analysis into concrete, evidence-backed findings.

use super::prompt::{render_failure, render_pr_diff, render_source, to_json_block};
use super::types::InvestigationOutput;
use super::{Agent, AgentInputs, AgentStage};
use crate::context::{ChangedFile, ErrorContext};
use crate::llm::LlmClient;
use regex::Regex;
use std::sync::{Arc, OnceLock};

const SYSTEM_PROMPT: &str = r#"You are investigating a failing end-to-end test. You are given the failure, a prior root-cause analysis, the pull request diff and (when available) the test source.
Find concrete evidence that explains the failure. Prefer evidence from the diff over speculation.
Decide explicitly whether the failure can be fixed by changing only the test code.
If selectors changed in the application, list each old selector with its replacement.

Respond with a single JSON object and nothing else:
{
  "findings": [
    {
      "type": "<e.g. SELECTOR_CHANGE, CODE_CHANGE, TIMING_GAP, DATA_CHANGE>",
      "severity": "LOW | MEDIUM | HIGH | CRITICAL",
      "description": "<what you found>",
      "evidence": ["<diff lines or code that prove it>"],
      "location": { "file": "<path>", "line": <int or null>, "code": "<snippet or null>" },
      "relationToError": "<how this causes the failure>"
    }
  ],
  "primaryFinding": <the single most important finding object, or null>,
  "isTestCodeFixable": <bool>,
  "recommendedApproach": "<how to fix>",
  "selectorsToUpdate": [
    { "current": "<selector in the test>", "suggestedReplacement": "<new selector>", "reason": "<why>" }
  ],
  "confidence": <integer 0-100>
}"#;

/// A selector attribute value that the diff removed and replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorRename {
    pub file: String,
    pub attribute: String,
    pub from: String,
    pub to: String,
}

impl SelectorRename {
    /// Render as CSS attribute selectors, e.g. `[data-testid="a"] -> [data-testid="b"]`.
    #[must_use]
    pub fn describe(&self) -> String {
        format!(
            "[{attr}=\"{}\"] -> [{attr}=\"{}\"] (in {})",
            self.from,
            self.to,
            self.file,
            attr = self.attribute
        )
    }
}

const SELECTOR_ATTRIBUTE: &str = r#"(data-testid|data-test|data-cy|id)=["']([^"']+)["']"#;

static SELECTOR_REGEX: OnceLock<Option<Regex>> = OnceLock::new();

fn selector_regex() -> Option<&'static Regex> {
    SELECTOR_REGEX
        .get_or_init(|| Regex::new(SELECTOR_ATTRIBUTE).ok())
        .as_ref()
}

/// Find selector attributes removed on `-` lines and replaced on `+` lines.
///
/// Removed and added values are paired in order of appearance per attribute;
/// values present on both sides are ignored.
pub fn detect_selector_renames(files: &[ChangedFile]) -> Vec<SelectorRename> {
    let Some(re) = selector_regex() else {
        return Vec::new();
    };
    let mut renames = Vec::new();

    for file in files {
        let Some(patch) = &file.patch else { continue };
        let mut removed: Vec<(String, String)> = Vec::new();
        let mut added: Vec<(String, String)> = Vec::new();

        for line in patch.lines() {
            let bucket = if line.starts_with('-') && !line.starts_with("---") {
                &mut removed
            } else if line.starts_with('+') && !line.starts_with("+++") {
                &mut added
            } else {
                continue;
            };
            for cap in re.captures_iter(line) {
                bucket.push((cap[1].to_string(), cap[2].to_string()));
            }
        }

        let gone: Vec<_> = removed
            .iter()
            .filter(|r| !added.contains(r))
            .cloned()
            .collect();
        let mut fresh: Vec<_> = added
            .iter()
            .filter(|a| !removed.contains(a))
            .cloned()
            .collect();

        for (attribute, from) in gone {
            if let Some(pos) = fresh.iter().position(|(a, _)| *a == attribute) {
                let (_, to) = fresh.remove(pos);
                renames.push(SelectorRename {
                    file: file.filename.clone(),
                    attribute,
                    from,
                    to,
                });
            }
        }
    }

    renames
}

/// Evidence gatherer.
pub struct InvestigationAgent {
    client: Arc<dyn LlmClient>,
}

impl InvestigationAgent {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }
}

impl Agent for InvestigationAgent {
    type Output = InvestigationOutput;
    const STAGE: AgentStage = AgentStage::Investigation;

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

        let mut prompt = render_failure(context);
        prompt.push_str("\n## Prior analysis\n");
        prompt.push_str(&to_json_block(analysis));
        prompt.push('\n');
        prompt.push('\n');
        prompt.push_str(&render_pr_diff(context));

        let renames = detect_selector_renames(&context.pr_diff);
        if !renames.is_empty() {
            prompt.push_str("\n## Selector renames detected in the diff\n");
            for rename in &renames {
                prompt.push_str(&format!("- {}\n", rename.describe()));
            }
        }

        if let Some(source) = render_source(context) {
            prompt.push('\n');
            prompt.push_str(&source);
        }

        prompt.push_str("\nInvestigate this failure and report your findings.");
        Ok(prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::FileStatus;
    use crate::llm::MockLlmClient;
    use crate::testing::fixtures;

    #[test]
    fn test_selector_regex_compiles() {
        assert!(selector_regex().is_some());
    }

    #[test]
    fn test_detect_selector_rename_in_jsx_patch() {
        let files = vec![ChangedFile::new("src/Login.tsx", FileStatus::Modified).with_patch(
            "@@ -10,3 +10,3 @@\n-  <input data-testid=\"email-input\" />\n+  <input data-testid=\"email-field\" />\n   <input data-testid=\"password\" />",
        )];
        let renames = detect_selector_renames(&files);
        assert_eq!(renames.len(), 1);
        assert_eq!(renames[0].from, "email-input");
        assert_eq!(renames[0].to, "email-field");
        assert_eq!(renames[0].attribute, "data-testid");
        assert!(renames[0]
            .describe()
            .contains("[data-testid=\"email-field\"]"));
    }

    #[test]
    fn test_unchanged_selector_is_not_a_rename() {
        let files = vec![ChangedFile::new("src/Form.tsx", FileStatus::Modified)
            .with_patch("-<button id=\"save\" disabled>\n+<button id=\"save\">")];
        assert!(detect_selector_renames(&files).is_empty());
    }

    #[test]
    fn test_rename_requires_same_attribute() {
        let files = vec![ChangedFile::new("src/Form.tsx", FileStatus::Modified)
            .with_patch("-<div data-cy=\"old\">\n+<div data-testid=\"new\">")];
        assert!(detect_selector_renames(&files).is_empty());
    }

    #[test]
    fn test_file_headers_are_ignored() {
        let files = vec![ChangedFile::new("src/A.tsx", FileStatus::Modified)
            .with_patch("--- a/src/A.tsx id=\"x\"\n+++ b/src/A.tsx id=\"y\"")];
        assert!(detect_selector_renames(&files).is_empty());
    }

    #[test]
    fn test_prompt_requires_analysis() {
        let agent = InvestigationAgent::new(Arc::new(MockLlmClient::new()));
        let err = agent
            .build_user_prompt(AgentInputs::new(), &fixtures::selector_rename_context())
            .unwrap_err();
        assert!(err.contains("analysis"));
    }

    #[test]
    fn test_prompt_includes_analysis_diff_and_renames() {
        let agent = InvestigationAgent::new(Arc::new(MockLlmClient::new()));
        let analysis = fixtures::selector_analysis(85);
        let prompt = agent
            .build_user_prompt(
                AgentInputs::new().with_analysis(&analysis),
                &fixtures::selector_rename_context(),
            )
            .unwrap();
        assert!(prompt.contains("SELECTOR_MISMATCH"));
        assert!(prompt.contains("src/components/LoginForm.tsx (modified)"));
        assert!(prompt.contains("Selector renames detected"));
        assert!(prompt.contains("email-field"));
    }

    #[tokio::test]
    async fn test_execute_without_analysis_makes_no_backend_call() {
        let client = Arc::new(MockLlmClient::new().with_response("{}"));
        let agent = InvestigationAgent::new(client.clone());
        let result = agent
            .execute(AgentInputs::new(), &fixtures::selector_rename_context())
            .await;
        assert!(!result.is_success());
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_execute_parses_selector_updates() {
        let client = Arc::new(
            MockLlmClient::new().with_scripted_response(fixtures::selector_investigation_json()),
        );
        let agent = InvestigationAgent::new(client);
        let analysis = fixtures::selector_analysis(85);
        let result = agent
            .execute(
                AgentInputs::new().with_analysis(&analysis),
                &fixtures::selector_rename_context(),
            )
            .await;

        let investigation = result.data().unwrap();
        assert!(investigation.is_test_code_fixable);
        assert_eq!(
            investigation.selectors_to_update[0].suggested_replacement,
            "[data-testid=\"email-field\"]"
        );
    }
}
