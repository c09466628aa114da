//! End-to-end orchestration runs against a scripted backend.
//!
//! Scripted replies are consumed in call order: analysis, investigation,
//! then fix generation and review alternating per iteration.

use std::sync::Arc;
use std::time::Duration;
use triage::agents::RootCauseCategory;
use triage::llm::MockLlmClient;
use triage::testing::fixtures;
use triage::{Approach, Orchestrator, OrchestratorConfig, SingleShotFixer};

fn pipeline_prefix() -> MockLlmClient {
    MockLlmClient::new()
        .with_scripted_response(fixtures::selector_analysis_json(85))
        .with_scripted_response(fixtures::selector_investigation_json())
}

// ============================================================================
// Happy paths
// ============================================================================

#[tokio::test]
async fn test_selector_rename_fixed_on_first_pass() {
    let client = Arc::new(
        pipeline_prefix()
            .with_scripted_response(fixtures::selector_fix_json(82))
            .with_scripted_response(fixtures::review_json(true, 90)),
    );
    let orchestrator = Orchestrator::new(client.clone(), OrchestratorConfig::default());

    let result = orchestrator
        .orchestrate(&fixtures::selector_rename_context())
        .await;

    assert!(result.success);
    assert_eq!(result.approach, Approach::Agentic);
    assert_eq!(result.iterations, 1);
    assert!(result.error.is_none());

    let analysis = result.agent_results.analysis.as_ref().unwrap();
    assert_eq!(
        analysis.data().unwrap().root_cause_category,
        RootCauseCategory::SelectorMismatch
    );
    let investigation = result.agent_results.investigation.as_ref().unwrap();
    assert_eq!(
        investigation.data().unwrap().selectors_to_update[0].suggested_replacement,
        "[data-testid=\"email-field\"]"
    );

    let fix = result.fix.unwrap();
    assert!(fix.confidence >= 70);
    assert_eq!(fix.confidence, 90);
    assert!(fix.proposed_changes[0].old_code.contains("email-input"));
    assert!(fix.proposed_changes[0].new_code.contains("email-field"));

    assert_eq!(client.call_count(), 4);
    assert_eq!(client.remaining(), 0);
}

#[tokio::test]
async fn test_each_stage_sees_prior_outputs() {
    let client = Arc::new(
        pipeline_prefix()
            .with_scripted_response(fixtures::selector_fix_json(82))
            .with_scripted_response(fixtures::review_json(true, 90)),
    );
    let orchestrator = Orchestrator::new(client.clone(), OrchestratorConfig::default());
    orchestrator
        .orchestrate(&fixtures::selector_rename_context())
        .await;

    let calls = client.calls();
    assert_eq!(calls.len(), 4);
    assert!(!calls[0].user_content.contains("## Prior analysis"));
    assert!(calls[1].user_content.contains("SELECTOR_MISMATCH"));
    assert!(calls[2].user_content.contains("## Investigation"));
    assert!(calls[3].user_content.contains("## Proposed fix"));
    assert!(calls[3].user_content.contains("email-field"));
}

#[tokio::test]
async fn test_rejection_then_approval_with_visibility_check() {
    let client = Arc::new(
        pipeline_prefix()
            .with_scripted_response(fixtures::selector_fix_json(80))
            .with_scripted_response(fixtures::visibility_review_json())
            .with_scripted_response(fixtures::visible_fix_json(85))
            .with_scripted_response(fixtures::review_json(true, 88)),
    );
    let orchestrator = Orchestrator::new(client.clone(), OrchestratorConfig::default());

    let result = orchestrator
        .orchestrate(&fixtures::selector_rename_context())
        .await;

    assert!(result.success);
    assert_eq!(result.iterations, 2);
    let fix = result.fix.unwrap();
    assert_eq!(fix.confidence, 88);
    assert!(fix.proposed_changes[0].new_code.contains("be.visible"));
    assert!(!fixtures::selector_fix(80).changes[0]
        .new_code
        .contains("be.visible"));

    let retry_prompt = &client.calls()[4].user_content;
    assert!(retry_prompt.contains("Previous attempt"));
    assert!(retry_prompt.contains("be.visible"));
    assert!(retry_prompt.contains("You MUST address every issue"));
}

// ============================================================================
// Exhaustion and the confidence gate
// ============================================================================

#[tokio::test]
async fn test_all_rejected_but_confident_fix_is_returned() {
    let mut client = pipeline_prefix();
    for _ in 0..3 {
        client = client
            .with_scripted_response(fixtures::selector_fix_json(80))
            .with_scripted_response(fixtures::review_json(false, 60));
    }
    let client = Arc::new(client);
    let orchestrator = Orchestrator::new(client.clone(), OrchestratorConfig::default());

    let result = orchestrator
        .orchestrate(&fixtures::selector_rename_context())
        .await;

    assert!(result.success);
    assert_eq!(result.approach, Approach::Agentic);
    assert_eq!(result.iterations, 3);
    assert_eq!(result.fix.unwrap().confidence, 80);
    assert_eq!(client.call_count(), 8);
}

#[tokio::test]
async fn test_all_rejected_low_confidence_fails() {
    let mut client = pipeline_prefix();
    for _ in 0..3 {
        client = client
            .with_scripted_response(fixtures::selector_fix_json(50))
            .with_scripted_response(fixtures::review_json(false, 40));
    }
    let orchestrator = Orchestrator::new(Arc::new(client), OrchestratorConfig::default());

    let result = orchestrator
        .orchestrate(&fixtures::selector_rename_context())
        .await;

    assert!(!result.success);
    assert_eq!(result.approach, Approach::Failed);
    assert_eq!(result.iterations, 3);
    assert!(result.fix.is_none());
    assert_eq!(
        result.error.as_deref(),
        Some("Fix confidence below threshold after 3 iterations")
    );
    assert!(result.agent_results.review.is_some());
}

#[tokio::test]
async fn test_low_analysis_and_fix_confidence_rejected() {
    let client = Arc::new(
        MockLlmClient::new()
            .with_scripted_response(fixtures::selector_analysis_json(30))
            .with_scripted_response(fixtures::selector_investigation_json())
            .with_scripted_response(fixtures::selector_fix_json(40))
            .with_scripted_response(fixtures::review_json(true, 40)),
    );
    let config = OrchestratorConfig::default().with_max_iterations(1);
    let orchestrator = Orchestrator::new(client, config);

    let result = orchestrator
        .orchestrate(&fixtures::selector_rename_context())
        .await;

    assert!(!result.success);
    assert!(result.fix.is_none());
    assert!(result.error.unwrap().contains("below threshold after 1 iterations"));
}

#[tokio::test]
async fn test_approved_but_below_threshold_keeps_iterating() {
    let client = Arc::new(
        pipeline_prefix()
            .with_scripted_response(fixtures::selector_fix_json(60))
            .with_scripted_response(fixtures::review_json(true, 65))
            .with_scripted_response(fixtures::visible_fix_json(85))
            .with_scripted_response(fixtures::review_json(true, 85)),
    );
    let orchestrator = Orchestrator::new(client, OrchestratorConfig::default());

    let result = orchestrator
        .orchestrate(&fixtures::selector_rename_context())
        .await;

    assert!(result.success);
    assert_eq!(result.iterations, 2);
    assert_eq!(result.fix.unwrap().confidence, 85);
}

// ============================================================================
// Stage failures
// ============================================================================

#[tokio::test]
async fn test_analysis_failure_aborts_run() {
    let client = Arc::new(MockLlmClient::new().with_scripted_error("503 Service Unavailable"));
    let orchestrator = Orchestrator::new(client.clone(), OrchestratorConfig::default());

    let result = orchestrator
        .orchestrate(&fixtures::selector_rename_context())
        .await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("Analysis agent failed"));
    assert!(!result.agent_results.analysis.unwrap().is_success());
    assert!(result.agent_results.investigation.is_none());
    assert_eq!(client.call_count(), 1);
}

#[tokio::test]
async fn test_fix_generation_failure_without_prior_fix() {
    let client = Arc::new(pipeline_prefix().with_scripted_response("I would rather not."));
    let orchestrator = Orchestrator::new(client, OrchestratorConfig::default());

    let result = orchestrator
        .orchestrate(&fixtures::selector_rename_context())
        .await;

    assert!(!result.success);
    assert_eq!(result.iterations, 1);
    assert!(result
        .error
        .unwrap()
        .starts_with("Fix generation agent failed:"));
    assert!(result.agent_results.review.is_none());
}

#[tokio::test]
async fn test_fix_generation_failure_after_rejection_uses_last_fix() {
    let client = Arc::new(
        pipeline_prefix()
            .with_scripted_response(fixtures::selector_fix_json(80))
            .with_scripted_response(fixtures::review_json(false, 60))
            .with_scripted_error("connection reset"),
    );
    let orchestrator = Orchestrator::new(client, OrchestratorConfig::default());

    let result = orchestrator
        .orchestrate(&fixtures::selector_rename_context())
        .await;

    assert!(result.success);
    assert_eq!(result.iterations, 2);
    assert_eq!(result.fix.unwrap().confidence, 80);
    assert!(!result.agent_results.fix_generation.unwrap().is_success());
}

#[tokio::test]
async fn test_review_failure_accepts_confident_fix_unreviewed() {
    let client = Arc::new(
        pipeline_prefix()
            .with_scripted_response(fixtures::selector_fix_json(82))
            .with_scripted_response("LGTM"),
    );
    let orchestrator = Orchestrator::new(client, OrchestratorConfig::default());

    let result = orchestrator
        .orchestrate(&fixtures::selector_rename_context())
        .await;

    assert!(result.success);
    assert_eq!(result.iterations, 1);
    assert_eq!(result.fix.unwrap().confidence, 82);
    assert!(!result.agent_results.review.unwrap().is_success());
}

#[tokio::test]
async fn test_review_failure_with_low_confidence_retries() {
    let client = Arc::new(
        pipeline_prefix()
            .with_scripted_response(fixtures::selector_fix_json(50))
            .with_scripted_error("review backend timeout")
            .with_scripted_response(fixtures::visible_fix_json(85))
            .with_scripted_response(fixtures::review_json(true, 90)),
    );
    let orchestrator = Orchestrator::new(client.clone(), OrchestratorConfig::default());

    let result = orchestrator
        .orchestrate(&fixtures::selector_rename_context())
        .await;

    assert!(result.success);
    assert_eq!(result.iterations, 2);
    assert!(client.calls()[4]
        .user_content
        .contains("could not be reviewed"));
}

// ============================================================================
// Configuration switches
// ============================================================================

#[tokio::test]
async fn test_review_skipped_when_not_required() {
    let client = Arc::new(pipeline_prefix().with_scripted_response(fixtures::selector_fix_json(82)));
    let config = OrchestratorConfig::default().with_require_review(false);
    let orchestrator = Orchestrator::new(client.clone(), config);

    let result = orchestrator
        .orchestrate(&fixtures::selector_rename_context())
        .await;

    assert!(result.success);
    assert_eq!(result.iterations, 1);
    assert_eq!(result.fix.unwrap().confidence, 82);
    assert!(result.agent_results.review.is_none());
    assert_eq!(client.call_count(), 3);
}

#[tokio::test]
async fn test_low_confidence_fix_still_reviewed_when_review_optional() {
    let client = Arc::new(
        pipeline_prefix()
            .with_scripted_response(fixtures::selector_fix_json(50))
            .with_scripted_response(fixtures::review_json(true, 90)),
    );
    let config = OrchestratorConfig::default().with_require_review(false);
    let orchestrator = Orchestrator::new(client.clone(), config);

    let result = orchestrator
        .orchestrate(&fixtures::selector_rename_context())
        .await;

    assert!(result.success);
    assert_eq!(result.fix.unwrap().confidence, 90);
    assert_eq!(client.call_count(), 4);
}

#[tokio::test]
async fn test_timeout_reported_and_no_new_stage_started() {
    let client = Arc::new(
        MockLlmClient::new()
            .with_response(&fixtures::selector_analysis_json(85))
            .with_delay(Duration::from_millis(50)),
    );
    let fallback_client = Arc::new(MockLlmClient::new().with_response(&fixtures::selector_fix_json(90)));
    let config = OrchestratorConfig::default().with_total_timeout_ms(20);
    let orchestrator = Orchestrator::new(client.clone(), config)
        .with_fallback(Arc::new(SingleShotFixer::new(fallback_client.clone())));

    let result = orchestrator
        .orchestrate(&fixtures::selector_rename_context())
        .await;

    assert!(!result.success);
    assert_eq!(result.approach, Approach::Failed);
    assert!(result.error.unwrap().contains("timed out"));
    assert!(result.total_time_ms >= 20);
    assert!(result.agent_results.analysis.is_some());
    assert!(result.agent_results.investigation.is_none());
    assert_eq!(client.call_count(), 1);
    assert_eq!(fallback_client.call_count(), 0);
}

#[tokio::test]
async fn test_review_finishing_after_deadline_is_not_adopted() {
    // Review starts at ~300ms, inside the budget, and returns at ~400ms
    let client = Arc::new(
        pipeline_prefix()
            .with_scripted_response(fixtures::selector_fix_json(82))
            .with_scripted_response(fixtures::review_json(true, 90))
            .with_delay(Duration::from_millis(100)),
    );
    let fallback_client = Arc::new(MockLlmClient::new().with_response(&fixtures::selector_fix_json(90)));
    let config = OrchestratorConfig::default().with_total_timeout_ms(380);
    let orchestrator = Orchestrator::new(client.clone(), config)
        .with_fallback(Arc::new(SingleShotFixer::new(fallback_client.clone())));

    let result = orchestrator
        .orchestrate(&fixtures::selector_rename_context())
        .await;

    assert!(!result.success);
    assert_eq!(result.approach, Approach::Failed);
    assert!(result.fix.is_none());
    assert!(result.error.unwrap().contains("timed out"));
    assert!(result.total_time_ms >= 380);
    assert_eq!(result.iterations, 1);
    assert_eq!(fallback_client.call_count(), 0);
}

#[tokio::test]
async fn test_deadline_passing_during_fix_generation_skips_review() {
    // Fix generation starts at ~200ms and returns at ~300ms
    let client = Arc::new(
        pipeline_prefix()
            .with_scripted_response(fixtures::selector_fix_json(82))
            .with_scripted_response(fixtures::review_json(true, 90))
            .with_delay(Duration::from_millis(100)),
    );
    let config = OrchestratorConfig::default().with_total_timeout_ms(280);
    let orchestrator = Orchestrator::new(client.clone(), config);

    let result = orchestrator
        .orchestrate(&fixtures::selector_rename_context())
        .await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("timed out"));
    assert_eq!(result.iterations, 1);
    assert!(result.agent_results.fix_generation.is_some());
    assert!(result.agent_results.review.is_none());
    assert_eq!(client.call_count(), 3);
}

#[tokio::test]
async fn test_unreviewed_fix_past_deadline_is_not_accepted() {
    let client = Arc::new(
        pipeline_prefix()
            .with_scripted_response(fixtures::selector_fix_json(95))
            .with_delay(Duration::from_millis(100)),
    );
    let config = OrchestratorConfig::default()
        .with_require_review(false)
        .with_total_timeout_ms(280);
    let orchestrator = Orchestrator::new(client.clone(), config);

    let result = orchestrator
        .orchestrate(&fixtures::selector_rename_context())
        .await;

    assert!(!result.success);
    assert!(result.fix.is_none());
    assert!(result.error.unwrap().contains("timed out"));
    assert_eq!(client.call_count(), 3);
}

// ============================================================================
// Fallback
// ============================================================================

#[tokio::test]
async fn test_fallback_adopted_after_agentic_failure() {
    let client = Arc::new(MockLlmClient::new().with_scripted_error("model overloaded"));
    let fallback_client = Arc::new(MockLlmClient::new().with_response(&fixtures::selector_fix_json(81)));
    let orchestrator = Orchestrator::new(client, OrchestratorConfig::default())
        .with_fallback(Arc::new(SingleShotFixer::new(fallback_client.clone())));

    let result = orchestrator
        .orchestrate(&fixtures::selector_rename_context())
        .await;

    assert!(result.success);
    assert_eq!(result.approach, Approach::SingleShot);
    assert!(result.error.is_none());
    assert_eq!(result.fix.unwrap().confidence, 81);
    assert!(!result.agent_results.analysis.unwrap().is_success());
    assert_eq!(fallback_client.call_count(), 1);
}

#[tokio::test]
async fn test_fallback_disabled_by_config() {
    let client = Arc::new(MockLlmClient::new().with_scripted_error("model overloaded"));
    let fallback_client = Arc::new(MockLlmClient::new().with_response(&fixtures::selector_fix_json(81)));
    let config = OrchestratorConfig::default().with_fallback(false);
    let orchestrator = Orchestrator::new(client, config)
        .with_fallback(Arc::new(SingleShotFixer::new(fallback_client.clone())));

    let result = orchestrator
        .orchestrate(&fixtures::selector_rename_context())
        .await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("Analysis agent failed"));
    assert_eq!(fallback_client.call_count(), 0);
}

#[tokio::test]
async fn test_fallback_without_confident_fix_keeps_agentic_error() {
    let client = Arc::new(MockLlmClient::new().with_scripted_error("model overloaded"));
    let fallback_client = Arc::new(MockLlmClient::new().with_response(&fixtures::selector_fix_json(30)));
    let orchestrator = Orchestrator::new(client, OrchestratorConfig::default())
        .with_fallback(Arc::new(SingleShotFixer::new(fallback_client)));

    let result = orchestrator
        .orchestrate(&fixtures::selector_rename_context())
        .await;

    assert!(!result.success);
    assert_eq!(result.approach, Approach::Failed);
    assert!(result.error.unwrap().contains("Analysis agent failed"));
}

// ============================================================================
// Result shape
// ============================================================================

#[tokio::test]
async fn test_result_serializes_camel_case() {
    let client = Arc::new(
        pipeline_prefix()
            .with_scripted_response(fixtures::selector_fix_json(82))
            .with_scripted_response(fixtures::review_json(true, 90)),
    );
    let orchestrator = Orchestrator::new(client, OrchestratorConfig::default());
    let result = orchestrator
        .orchestrate(&fixtures::selector_rename_context())
        .await;

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["success"], true);
    assert_eq!(json["approach"], "agentic");
    assert_eq!(json["iterations"], 1);
    assert!(json["totalTimeMs"].is_u64());
    assert!(json["runId"].is_string());
    assert!(json["startedAt"].is_string());
    assert_eq!(json["fix"]["proposedChanges"][0]["line"], 4);
    assert_eq!(json["agentResults"]["review"]["success"], true);
    assert_eq!(
        json["agentResults"]["analysis"]["data"]["rootCauseCategory"],
        "SELECTOR_MISMATCH"
    );
    assert!(json.get("error").is_none());
}
