//! Analysis stage: classify the root cause from the failure context alone.

use super::prompt::{render_failure, render_source};
use super::types::{AnalysisOutput, PatternFlags};
use super::{Agent, AgentInputs, AgentStage};
use crate::context::ErrorContext;
use crate::llm::LlmClient;
use regex::Regex;
use std::sync::{Arc, OnceLock};

const SYSTEM_PROMPT: &str = r#"You are a senior test automation engineer analysing a failing end-to-end test.
Classify the most likely root cause of the failure using only the information provided.

Categories:
- SELECTOR_MISMATCH: the element the test targets no longer matches (renamed id, data-testid, class, text)
- TIMING_ISSUE: the element or state appears later than the test waits for
- NETWORK_ISSUE: a request failed, was not intercepted, or returned unexpected data
- ASSERTION_MISMATCH: the app behaves correctly but the expected value in the test is stale
- OTHER: anything else

Respond with a single JSON object and nothing else:
{
  "rootCauseCategory": "SELECTOR_MISMATCH | TIMING_ISSUE | NETWORK_ISSUE | ASSERTION_MISMATCH | OTHER",
  "contributingFactors": ["<category>", ...],
  "confidence": <integer 0-100>,
  "explanation": "<why you chose this category>",
  "selectors": ["<selectors referenced by the failure>"],
  "elements": ["<UI elements involved>"],
  "issueLocation": "TEST_CODE | APP_CODE | BOTH",
  "patterns": {
    "hasTimeout": <bool>,
    "hasVisibilityIssue": <bool>,
    "hasNetworkCall": <bool>,
    "hasStateAssertion": <bool>,
    "hasDynamicContent": <bool>,
    "hasResponsiveIssue": <bool>
  },
  "suggestedApproach": "<one or two sentences>"
}"#;

/// Regexes for the local pattern hints, in [`PatternFlags`] field order.
const PATTERN_RULES: [&str; 6] = [
    r"(?i)timed out|timeout|exceeded",
    r"(?i)not visible|is being covered|visibility|display:\s*none|hidden|detached from the dom",
    r#"(?i)cy\.(intercept|request)|cy\.wait\(\s*['"]@|xhr|fetch|network|econnrefused|status code"#,
    r"(?i)expected .+ to (equal|eq|have|be|contain|include)|assertionerror",
    r"(?i)dynamic|timestamp|random|uuid|\d{4}-\d{2}-\d{2}",
    r"(?i)viewport|mobile|responsive|breakpoint",
];

static PATTERN_REGEXES: OnceLock<[Option<Regex>; 6]> = OnceLock::new();

fn pattern_regexes() -> &'static [Option<Regex>; 6] {
    PATTERN_REGEXES.get_or_init(|| PATTERN_RULES.map(|rule| Regex::new(rule).ok()))
}

/// Scan the error message and stack trace for well-known failure patterns.
///
/// These are hints for the backend, which has the final say.
pub fn detect_pattern_hints(context: &ErrorContext) -> PatternFlags {
    let haystack = match &context.stack_trace {
        Some(stack) => format!("{}\n{}", context.error_message, stack),
        None => context.error_message.clone(),
    };
    let [timeout, visibility, network, state, dynamic, responsive] = pattern_regexes();
    let hit = |re: &Option<Regex>| re.as_ref().is_some_and(|re| re.is_match(&haystack));

    PatternFlags {
        has_timeout: hit(timeout),
        has_visibility_issue: hit(visibility),
        has_network_call: hit(network),
        has_state_assertion: hit(state),
        has_dynamic_content: hit(dynamic),
        has_responsive_issue: hit(responsive),
    }
}

/// Root-cause classifier.
pub struct AnalysisAgent {
    client: Arc<dyn LlmClient>,
}

impl AnalysisAgent {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }
}

impl Agent for AnalysisAgent {
    type Output = AnalysisOutput;
    const STAGE: AgentStage = AgentStage::Analysis;

    fn client(&self) -> &dyn LlmClient {
        self.client.as_ref()
    }

    fn system_prompt(&self) -> &'static str {
        SYSTEM_PROMPT
    }

    fn build_user_prompt(
        &self,
        _inputs: AgentInputs<'_>,
        context: &ErrorContext,
    ) -> Result<String, String> {
        let mut prompt = render_failure(context);

        let hints = detect_pattern_hints(context).active();
        if !hints.is_empty() {
            prompt.push_str(&format!(
                "\n## Pattern hints (from log scanning, may be incomplete)\n{}\n",
                hints.join(", ")
            ));
        }

        if let Some(source) = render_source(context) {
            prompt.push('\n');
            prompt.push_str(&source);
        }

        prompt.push_str("\nClassify the root cause of this failure.");
        Ok(prompt)
    }
}
