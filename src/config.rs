//! Configuration for the orchestrator and the backend.
//!
//! Settings live in `<project>/.triage/settings.json`. Every field has a
//! default, so a partial file (or no file at all) is valid.
//!
//! # Example settings.json
//!
//! ```json
//! {
//!   "orchestrator": {
//!     "maxIterations": 2,
//!     "minConfidence": 80,
//!     "totalTimeoutMs": 60000
//!   },
//!   "llm": {
//!     "provider": "openai",
//!     "model": "gpt-4o"
//!   }
//! }
//! ```

use crate::error::{Result, TriageError};
use crate::llm::LlmConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Orchestrator
// ============================================================================

/// Loop and gating policy for one orchestration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorConfig {
    /// Upper bound on Fix Generation / Review rounds.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Minimum final confidence (0-100) for a fix to count as a success.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: u8,

    /// Run the Review stage before accepting a fix.
    #[serde(default = "default_true")]
    pub require_review: bool,

    /// Try the single-shot strategy when the agentic run fails.
    #[serde(default = "default_true")]
    pub fallback_to_single_shot: bool,

    /// Wall-clock budget for the whole run.
    #[serde(default = "default_total_timeout_ms")]
    pub total_timeout_ms: u64,
}

fn default_max_iterations() -> u32 {
    3
}

fn default_min_confidence() -> u8 {
    70
}

fn default_true() -> bool {
    true
}

fn default_total_timeout_ms() -> u64 {
    120_000
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            min_confidence: default_min_confidence(),
            require_review: true,
            fallback_to_single_shot: true,
            total_timeout_ms: default_total_timeout_ms(),
        }
    }
}

impl OrchestratorConfig {
    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    #[must_use]
    pub fn with_min_confidence(mut self, min_confidence: u8) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    #[must_use]
    pub fn with_require_review(mut self, require_review: bool) -> Self {
        self.require_review = require_review;
        self
    }

    #[must_use]
    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.fallback_to_single_shot = enabled;
        self
    }

    #[must_use]
    pub fn with_total_timeout_ms(mut self, total_timeout_ms: u64) -> Self {
        self.total_timeout_ms = total_timeout_ms;
        self
    }

    /// The run budget as a [`Duration`].
    #[must_use]
    pub fn total_timeout(&self) -> Duration {
        Duration::from_millis(self.total_timeout_ms)
    }

    /// Check that the policy can be executed.
    ///
    /// # Errors
    ///
    /// Returns [`TriageError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(TriageError::invalid_config(
                "maxIterations",
                "must be at least 1",
            ));
        }
        if self.min_confidence > 100 {
            return Err(TriageError::invalid_config(
                "minConfidence",
                format!("{} is outside 0-100", self.min_confidence),
            ));
        }
        if self.total_timeout_ms == 0 {
            return Err(TriageError::invalid_config(
                "totalTimeoutMs",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Settings file
// ============================================================================

/// Everything read from `.triage/settings.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriageSettings {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub llm: LlmConfig,
}

impl TriageSettings {
    /// Load settings for a project, falling back to defaults when the file
    /// does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`TriageError::Config`] if the file exists but cannot be read
    /// or parsed.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let settings_path = Self::settings_path(project_dir);

        if !settings_path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&settings_path).map_err(|e| {
            TriageError::config_with_path(format!("cannot read settings: {}", e), settings_path.clone())
        })?;
        serde_json::from_str(&content).map_err(|e| {
            TriageError::config_with_path(format!("malformed settings: {}", e), settings_path)
        })
    }

    /// Get the settings.json path for a project
    pub fn settings_path(project_dir: &Path) -> PathBuf {
        project_dir.join(".triage/settings.json")
    }

    /// Validate both sections.
    ///
    /// # Errors
    ///
    /// Returns [`TriageError::InvalidConfig`] for the first invalid value.
    pub fn validate(&self) -> Result<()> {
        self.orchestrator.validate()?;
        self.llm
            .validate()
            .map_err(|reason| TriageError::invalid_config("llm", reason))
    }
}
