//! Testing infrastructure for triage.
//!
//! The scripted backend lives in [`crate::llm::MockLlmClient`]; this module
//! holds canned failure contexts and stage replies so unit tests and the
//! integration tests under `tests/` describe the same scenario.
//!
//! # Example
//!
//! ```rust
//! use triage::llm::MockLlmClient;
//! use triage::testing::fixtures;
//!
//! let context = fixtures::selector_rename_context();
//! let client = MockLlmClient::new()
//!     .with_scripted_response(fixtures::selector_analysis_json(85))
//!     .with_scripted_response(fixtures::selector_investigation_json());
//!
//! assert!(context.has_pr_diff());
//! assert_eq!(client.remaining(), 2);
//! ```

pub mod fixtures;
