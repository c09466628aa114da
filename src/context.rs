//! Failure context shared by every pipeline stage.
//!
//! An [`ErrorContext`] is built once by the caller from whatever the CI
//! ingestion layer extracted (error text, stack trace, PR diff, source file)
//! and then handed to the orchestrator by shared reference. Nothing in the
//! pipeline mutates it.
//!
//! # Example
//!
//! ```
//! use triage::context::{ChangedFile, ErrorContext, FileStatus};
//!
//! let ctx = ErrorContext::new(
//!     "Timed out retrying: Expected to find element: [data-testid=\"email-input\"]",
//!     "cypress/e2e/login.cy.ts",
//!     "logs in with valid credentials",
//! )
//! .with_error_type("ELEMENT_NOT_FOUND")
//! .with_failing_selector("[data-testid=\"email-input\"]")
//! .with_changed_file(ChangedFile::new("src/Login.tsx", FileStatus::Modified));
//!
//! assert!(ctx.has_pr_diff());
//! assert!(ctx.validate().is_ok());
//! ```

use crate::error::{Result, TriageError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Status of a file in the pull request diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Added,
    #[default]
    Modified,
    Removed,
    Renamed,
    #[serde(other)]
    Changed,
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Removed => "removed",
            Self::Renamed => "renamed",
            Self::Changed => "changed",
        };
        write!(f, "{}", s)
    }
}

/// One file touched by the pull request under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangedFile {
    /// Repository-relative path.
    pub filename: String,
    /// How the file changed.
    #[serde(default)]
    pub status: FileStatus,
    /// Unified diff hunk text, when the provider supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
}

impl ChangedFile {
    /// Create a changed file entry without patch text.
    pub fn new(filename: impl Into<String>, status: FileStatus) -> Self {
        Self {
            filename: filename.into(),
            status,
            patch: None,
        }
    }

    /// Attach the diff hunk text.
    #[must_use]
    pub fn with_patch(mut self, patch: impl Into<String>) -> Self {
        self.patch = Some(patch.into());
        self
    }
}

/// Everything known about a single test failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorContext {
    /// Primary error message from the test runner.
    pub error_message: String,
    /// Stack trace, if captured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    /// Path of the failing test file.
    pub test_file: String,
    /// Name of the failing test case.
    #[serde(default)]
    pub test_name: String,
    /// Classification tag assigned by the log extractor (e.g. `ELEMENT_NOT_FOUND`).
    #[serde(default)]
    pub error_type: String,
    /// Selector the test was waiting on, if the error names one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failing_selector: Option<String>,
    /// Files changed by the pull request under test.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pr_diff: Vec<ChangedFile>,
    /// Contents of the failing test file, fetched from the repository.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file_content: Option<String>,
}

impl ErrorContext {
    /// Create a context with the three required facts.
    pub fn new(
        error_message: impl Into<String>,
        test_file: impl Into<String>,
        test_name: impl Into<String>,
    ) -> Self {
        Self {
            error_message: error_message.into(),
            stack_trace: None,
            test_file: test_file.into(),
            test_name: test_name.into(),
            error_type: String::new(),
            failing_selector: None,
            pr_diff: Vec::new(),
            source_file_content: None,
        }
    }

    /// Set the stack trace.
    #[must_use]
    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }

    /// Set the error classification tag.
    #[must_use]
    pub fn with_error_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = error_type.into();
        self
    }

    /// Set the failing selector.
    #[must_use]
    pub fn with_failing_selector(mut self, selector: impl Into<String>) -> Self {
        self.failing_selector = Some(selector.into());
        self
    }

    /// Add one changed file to the PR diff.
    #[must_use]
    pub fn with_changed_file(mut self, file: ChangedFile) -> Self {
        self.pr_diff.push(file);
        self
    }

    /// Set the fetched source of the failing test file.
    #[must_use]
    pub fn with_source_file_content(mut self, content: impl Into<String>) -> Self {
        self.source_file_content = Some(content.into());
        self
    }

    /// Whether any PR diff is available.
    #[must_use]
    pub fn has_pr_diff(&self) -> bool {
        !self.pr_diff.is_empty()
    }

    /// Check the facts every stage relies on are present.
    pub fn validate(&self) -> Result<()> {
        if self.error_message.trim().is_empty() {
            return Err(TriageError::invalid_context("error message is empty"));
        }
        if self.test_file.trim().is_empty() {
            return Err(TriageError::invalid_context("test file path is empty"));
        }
        Ok(())
    }

    /// Load a context from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let ctx: ErrorContext = serde_json::from_str(&content).map_err(|e| {
            TriageError::invalid_context(format!("{}: {}", path.display(), e))
        })?;
        ctx.validate()?;
        Ok(ctx)
    }
}
