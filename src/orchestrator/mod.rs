//! Drives the four stages to a single fix recommendation.
//!
//! ```text
//! ANALYZING -> INVESTIGATING -> GENERATING_FIX -> REVIEWING -> APPROVED
//!                                     ^               |
//!                                     +---- RETRY ----+--> EXHAUSTED
//! ```
//!
//! Stages run strictly one after another. A deadline computed at entry is
//! checked before each stage starts and again when it returns. A stage
//! already in flight is allowed to finish, but its output is discarded once
//! the deadline has passed. Every outcome, including a timeout, is returned
//! as an [`OrchestrationResult`].

pub mod gate;
pub mod result;

pub use gate::{evaluate, final_confidence, GateDecision};
pub use result::{AgentResults, Approach, FixRecommendation, OrchestrationResult, ProposedChange};

use crate::agents::{
    Agent, AgentInputs, AnalysisAgent, FixGenerationAgent, FixGenerationOutput,
    InvestigationAgent, RetryFeedback, ReviewAgent, StageResult,
};
use crate::config::OrchestratorConfig;
use crate::context::ErrorContext;
use crate::error::OrchestrationError;
use crate::fallback::FixStrategy;
use crate::llm::LlmClient;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

// ============================================================================
// Deadline
// ============================================================================

/// Wall-clock budget for one run.
#[derive(Debug, Clone, Copy)]
struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    fn start(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn expired(&self) -> bool {
        self.started.elapsed() > self.budget
    }

    fn check(&self) -> Result<(), OrchestrationError> {
        if self.expired() {
            return Err(OrchestrationError::TimedOut {
                elapsed_ms: self.elapsed_ms(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Run outcome
// ============================================================================

struct Accepted {
    fix: FixRecommendation,
    iterations: u32,
}

struct Aborted {
    error: OrchestrationError,
    iterations: u32,
}

impl Aborted {
    fn new(error: OrchestrationError, iterations: u32) -> Self {
        Self { error, iterations }
    }
}

fn failure_reason<T>(result: &StageResult<T>) -> String {
    result.error().unwrap_or("stage produced no output").to_string()
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Runs Analysis, Investigation and the Fix Generation / Review loop.
///
/// Holds no per-run state; one instance can serve concurrent runs.
pub struct Orchestrator {
    analysis: AnalysisAgent,
    investigation: InvestigationAgent,
    fix_generation: FixGenerationAgent,
    review: ReviewAgent,
    config: OrchestratorConfig,
    fallback: Option<Arc<dyn FixStrategy>>,
}

impl Orchestrator {
    /// Create an orchestrator whose stages all share `client`.
    pub fn new(client: Arc<dyn LlmClient>, config: OrchestratorConfig) -> Self {
        Self {
            analysis: AnalysisAgent::new(Arc::clone(&client)),
            investigation: InvestigationAgent::new(Arc::clone(&client)),
            fix_generation: FixGenerationAgent::new(Arc::clone(&client)),
            review: ReviewAgent::new(client),
            config,
            fallback: None,
        }
    }

    /// Attach the strategy used when `fallbackToSingleShot` is on.
    #[must_use]
    pub fn with_fallback(mut self, strategy: Arc<dyn FixStrategy>) -> Self {
        self.fallback = Some(strategy);
        self
    }

    /// Produce a fix recommendation for one failure.
    pub async fn orchestrate(&self, context: &ErrorContext) -> OrchestrationResult {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let deadline = Deadline::start(self.config.total_timeout());
        let mut agent_results = AgentResults::default();

        info!(
            %run_id,
            test_file = %context.test_file,
            max_iterations = self.config.max_iterations,
            min_confidence = self.config.min_confidence,
            "Starting orchestration"
        );

        let outcome = self
            .run_agentic(context, &deadline, &mut agent_results, run_id)
            .await;

        let (success, approach, iterations, fix, error) = match outcome {
            Ok(accepted) => (
                true,
                Approach::Agentic,
                accepted.iterations,
                Some(accepted.fix),
                None,
            ),
            Err(aborted) => match self.try_fallback(&aborted.error, context, &deadline, run_id).await {
                Some(fix) => (true, Approach::SingleShot, aborted.iterations, Some(fix), None),
                None => (
                    false,
                    Approach::Failed,
                    aborted.iterations,
                    None,
                    Some(aborted.error.to_string()),
                ),
            },
        };

        let total_time_ms = deadline.elapsed_ms();
        match &error {
            None => info!(
                %run_id,
                %approach,
                iterations,
                confidence = fix.as_ref().map(|f| f.confidence).unwrap_or_default(),
                total_time_ms,
                "Orchestration succeeded"
            ),
            Some(e) => warn!(%run_id, iterations, total_time_ms, "Orchestration failed: {}", e),
        }

        OrchestrationResult {
            success,
            approach,
            iterations,
            total_time_ms,
            fix,
            error,
            agent_results,
            run_id,
            started_at,
        }
    }

    async fn run_agentic(
        &self,
        context: &ErrorContext,
        deadline: &Deadline,
        results: &mut AgentResults,
        run_id: Uuid,
    ) -> Result<Accepted, Aborted> {
        let min_confidence = self.config.min_confidence;
        let max_iterations = self.config.max_iterations.max(1);

        // ANALYZING
        deadline.check().map_err(|e| Aborted::new(e, 0))?;
        let analysis_result = results
            .analysis
            .insert(self.analysis.execute(AgentInputs::new(), context).await);
        deadline.check().map_err(|e| Aborted::new(e, 0))?;
        let Some(analysis) = analysis_result.data() else {
            return Err(Aborted::new(
                OrchestrationError::AnalysisFailed {
                    reason: failure_reason(analysis_result),
                },
                0,
            ));
        };
        info!(
            %run_id,
            stage = "analysis",
            confidence = analysis.confidence,
            "Root cause: {}",
            analysis.root_cause_category
        );

        // INVESTIGATING
        deadline.check().map_err(|e| Aborted::new(e, 0))?;
        let investigation_result = results.investigation.insert(
            self.investigation
                .execute(AgentInputs::new().with_analysis(analysis), context)
                .await,
        );
        deadline.check().map_err(|e| Aborted::new(e, 0))?;
        let Some(investigation) = investigation_result.data() else {
            return Err(Aborted::new(
                OrchestrationError::InvestigationFailed {
                    reason: failure_reason(investigation_result),
                },
                0,
            ));
        };
        info!(
            %run_id,
            stage = "investigation",
            confidence = investigation.confidence,
            findings = investigation.findings.len(),
            max_severity = ?investigation.max_severity(),
            "Test code fixable: {}",
            investigation.is_test_code_fixable
        );

        let mut feedback: Option<RetryFeedback> = None;
        let mut last_fix: Option<FixGenerationOutput> = None;

        for iteration in 1..=max_iterations {
            // GENERATING_FIX
            deadline
                .check()
                .map_err(|e| Aborted::new(e, iteration - 1))?;
            let inputs = AgentInputs::new()
                .with_analysis(analysis)
                .with_investigation(investigation)
                .with_feedback(feedback.as_ref());
            let fix_result = self.fix_generation.execute(inputs, context).await;
            let fix = fix_result.data().cloned();
            let reason = failure_reason(&fix_result);
            results.fix_generation = Some(fix_result);
            deadline.check().map_err(|e| Aborted::new(e, iteration))?;

            let Some(fix) = fix else {
                warn!(%run_id, iteration, "Fix generation failed: {}", reason);
                return match last_fix {
                    Some(previous) => self.exhausted(&previous, iteration, run_id),
                    None => Err(Aborted::new(
                        OrchestrationError::FixGenerationFailed { reason },
                        iteration,
                    )),
                };
            };
            info!(
                %run_id,
                stage = "fix generation",
                iteration,
                confidence = fix.confidence,
                changes = fix.changes.len(),
                "{}",
                fix.summary
            );

            if !self.config.require_review && evaluate(min_confidence, fix.confidence, None).accepted
            {
                info!(%run_id, iteration, "Accepting fix without review");
                return Ok(Accepted {
                    fix: FixRecommendation::from_fix(&fix, None),
                    iterations: iteration,
                });
            }

            // REVIEWING
            deadline.check().map_err(|e| Aborted::new(e, iteration))?;
            let review_inputs = AgentInputs::new()
                .with_analysis(analysis)
                .with_investigation(investigation)
                .with_proposed_fix(&fix);
            let review_result = self.review.execute(review_inputs, context).await;
            let review = review_result.data().cloned();
            let review_error = failure_reason(&review_result);
            results.review = Some(review_result);
            deadline.check().map_err(|e| Aborted::new(e, iteration))?;

            match review {
                Some(review) => {
                    let decision = evaluate(min_confidence, fix.confidence, Some(&review));
                    info!(
                        %run_id,
                        stage = "review",
                        iteration,
                        approved = review.approved,
                        confidence = review.fix_confidence,
                        issues = review.issues.len(),
                        "{}",
                        review.assessment
                    );
                    if decision.accepted {
                        return Ok(Accepted {
                            fix: FixRecommendation::from_fix(&fix, Some(&review)),
                            iterations: iteration,
                        });
                    }
                    feedback = Some(RetryFeedback::from_review(fix.clone(), &review));
                }
                None => {
                    if evaluate(min_confidence, fix.confidence, None).accepted {
                        warn!(
                            %run_id,
                            iteration,
                            "Review unavailable ({}); accepting fix on its own confidence {}",
                            review_error,
                            fix.confidence
                        );
                        return Ok(Accepted {
                            fix: FixRecommendation::from_fix(&fix, None),
                            iterations: iteration,
                        });
                    }
                    warn!(%run_id, iteration, "Review unavailable ({}); retrying", review_error);
                    feedback = Some(RetryFeedback::unreviewed(fix.clone()));
                }
            }

            last_fix = Some(fix);
        }

        // EXHAUSTED
        match last_fix {
            Some(fix) => self.exhausted(&fix, max_iterations, run_id),
            None => Err(Aborted::new(
                OrchestrationError::BelowThreshold {
                    iterations: max_iterations,
                },
                max_iterations,
            )),
        }
    }

    /// Final gate once the loop stops without an approval.
    fn exhausted(
        &self,
        fix: &FixGenerationOutput,
        iterations: u32,
        run_id: Uuid,
    ) -> Result<Accepted, Aborted> {
        if evaluate(self.config.min_confidence, fix.confidence, None).accepted {
            warn!(
                %run_id,
                iterations,
                "No approval after {} iterations; returning last fix at confidence {}",
                iterations,
                fix.confidence
            );
            Ok(Accepted {
                fix: FixRecommendation::from_fix(fix, None),
                iterations,
            })
        } else {
            Err(Aborted::new(
                OrchestrationError::BelowThreshold { iterations },
                iterations,
            ))
        }
    }

    async fn try_fallback(
        &self,
        error: &OrchestrationError,
        context: &ErrorContext,
        deadline: &Deadline,
        run_id: Uuid,
    ) -> Option<FixRecommendation> {
        if error.is_timeout() || deadline.expired() || !self.config.fallback_to_single_shot {
            return None;
        }
        let strategy = self.fallback.as_ref()?;

        info!(%run_id, "Agentic run failed ({}); trying {} fallback", error, strategy.name());
        match strategy.generate(context).await {
            Ok(Some(fix)) => Some(fix),
            Ok(None) => {
                info!(%run_id, "{} fallback produced no confident fix", strategy.name());
                None
            }
            Err(e) => {
                warn!(%run_id, "{} fallback failed: {:#}", strategy.name(), e);
                None
            }
        }
    }
}
