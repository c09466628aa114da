//! triage - staged repair of failing end-to-end tests
//!
//! Given the context of a failing test (error, stack trace, PR diff, test
//! source), triage runs four reasoning stages against a language-model
//! backend and returns one fix recommendation with a confidence score.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`agents`] - The Analysis, Investigation, Fix Generation and Review stages
//! - [`orchestrator`] - The stage state machine, iteration loop and confidence gate
//! - [`fallback`] - Single-shot fix strategy used when the staged run fails
//! - [`llm`] - Backend clients (OpenAI HTTP, Claude CLI, scripted mock)
//! - [`context`] - The failure context every stage reads
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Custom error types and handling
//! - [`testing`] - Canned scenarios for tests
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use triage::llm::MockLlmClient;
//! use triage::testing::fixtures;
//! use triage::{Orchestrator, OrchestratorConfig};
//!
//! let client = Arc::new(
//!     MockLlmClient::new()
//!         .with_scripted_response(fixtures::selector_analysis_json(85))
//!         .with_scripted_response(fixtures::selector_investigation_json())
//!         .with_scripted_response(fixtures::selector_fix_json(82))
//!         .with_scripted_response(fixtures::review_json(true, 90)),
//! );
//! let orchestrator = Orchestrator::new(client, OrchestratorConfig::default());
//! let result = orchestrator.orchestrate(&fixtures::selector_rename_context()).await;
//!
//! assert!(result.success);
//! assert_eq!(result.iterations, 1);
//! ```

pub mod agents;
pub mod config;
pub mod context;
pub mod error;
pub mod fallback;
pub mod llm;
pub mod orchestrator;
pub mod testing;

// Re-export commonly used types
pub use error::{OrchestrationError, Result, TriageError};

pub use config::{OrchestratorConfig, TriageSettings};
pub use context::{ChangedFile, ErrorContext, FileStatus};
pub use fallback::{FixStrategy, SingleShotFixer};
pub use llm::{create_llm_client, LlmClient, LlmConfig};
pub use orchestrator::{
    Approach, FixRecommendation, OrchestrationResult, Orchestrator, ProposedChange,
};
