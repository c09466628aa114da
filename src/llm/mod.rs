//! Reasoning backend abstraction.
//!
//! Every pipeline stage talks to the backend through the [`LlmClient`]
//! trait: one system prompt, one user prompt, one text completion back.
//! What the text means is the stage's business, not the client's.
//!
//! # Architecture
//!
//! The [`LlmClient`] trait is designed to be:
//!
//! - **Object-safe**: the orchestrator holds an `Arc<dyn LlmClient>`
//! - **Thread-safe**: `Send + Sync` so one client can serve concurrent runs
//! - **Async-first**: the backend call is the only suspension point of a run
//!
//! Implementations:
//!
//! - [`OpenAiProvider`] - chat-completions over HTTPS
//! - [`ClaudeClient`] - the local `claude` CLI in print mode
//! - [`MockLlmClient`] - scripted responses for tests
//!
//! # Example
//!
//! ```rust,ignore
//! use triage::llm::{create_llm_client, LlmConfig};
//!
//! let client = create_llm_client(&LlmConfig::default())?;
//! let text = client.complete("You are terse.", "Say hi").await?;
//! ```

pub mod openai;

pub use openai::{OpenAiApiError, OpenAiProvider};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

/// Abstraction for reasoning backend calls.
///
/// # Errors
///
/// `complete` returns an error when the backend is unreachable, rejects the
/// request, or times out. Returning text that is not what the caller asked
/// for is *not* an error at this layer.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a system prompt and user content, returning the completion text.
    async fn complete(&self, system_prompt: &str, user_content: &str) -> Result<String>;

    /// Human-readable model identifier.
    fn model_name(&self) -> &str;

    /// Whether the backend looks usable (credentials present, binary on PATH).
    async fn available(&self) -> bool {
        true
    }
}

// =============================================================================
// Claude CLI client
// =============================================================================

/// Claude Code CLI client.
///
/// Runs `claude -p` with the system prompt passed as a flag and the user
/// content written to stdin.
#[derive(Debug, Clone)]
pub struct ClaudeClient {
    /// Binary to execute.
    binary: String,
    /// Model variant to use.
    model: String,
}

impl Default for ClaudeClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ClaudeClient {
    /// Create a client using the `claude` binary and the sonnet variant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            binary: "claude".to_string(),
            model: "sonnet".to_string(),
        }
    }

    /// Set the model variant to use (e.g. "opus", "sonnet").
    #[must_use]
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    /// Override the binary path.
    #[must_use]
    pub fn with_binary(mut self, binary: &str) -> Self {
        self.binary = binary.to_string();
        self
    }
}

#[async_trait]
impl LlmClient for ClaudeClient {
    async fn complete(&self, system_prompt: &str, user_content: &str) -> Result<String> {
        let args = [
            "-p",
            "--model",
            self.model.as_str(),
            "--output-format",
            "text",
            "--system-prompt",
            system_prompt,
        ];

        debug!(
            "Running {} with model {} ({} chars system, {} chars user)",
            self.binary,
            self.model,
            system_prompt.len(),
            user_content.len()
        );

        let mut child = AsyncCommand::new(&self.binary)
            .args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(user_content.as_bytes()).await?;
            stdin.flush().await?;
            drop(stdin);
        }

        let output = child.wait_with_output().await?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            anyhow::bail!(
                "{} exited with code {}: {}",
                self.binary,
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            )
        }
    }

    fn model_name(&self) -> &str {
        match self.model.as_str() {
            "opus" => "claude-opus-4",
            "sonnet" => "claude-sonnet-4",
            "haiku" => "claude-haiku-3.5",
            other => other,
        }
    }

    async fn available(&self) -> bool {
        which::which(&self.binary).is_ok()
    }
}

// =============================================================================
// Mock client
// =============================================================================

/// One prompt pair received by [`MockLlmClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub system_prompt: String,
    pub user_content: String,
}

/// Mock LLM client for testing.
///
/// Responses are served in FIFO order; once the script runs out the
/// fallback response (or error) is returned. Every call is recorded so tests
/// can assert on the prompts a stage built.
///
/// # Example
///
/// ```rust,ignore
/// use triage::llm::MockLlmClient;
///
/// let client = MockLlmClient::new()
///     .with_scripted_response("{\"a\": 1}")
///     .with_scripted_error("backend unreachable");
///
/// assert_eq!(client.complete("s", "u").await.unwrap(), "{\"a\": 1}");
/// assert!(client.complete("s", "u").await.is_err());
/// ```
#[derive(Debug)]
pub struct MockLlmClient {
    /// Scripted outcomes, consumed front to back.
    script: Mutex<VecDeque<std::result::Result<String, String>>>,
    /// Response once the script is exhausted.
    response: String,
    /// Error once the script is exhausted (takes precedence over `response`).
    error: Option<String>,
    /// Artificial latency per call.
    delay: Option<Duration>,
    /// Model name to return.
    model: String,
    /// Count of completion calls.
    call_count: AtomicU32,
    /// Every prompt pair received.
    calls: Mutex<Vec<RecordedCall>>,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            response: String::new(),
            error: None,
            delay: None,
            model: "mock-llm".to_string(),
            call_count: AtomicU32::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl MockLlmClient {
    /// Create a new mock client with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the response returned once the script is exhausted.
    #[must_use]
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    /// Return this error once the script is exhausted.
    #[must_use]
    pub fn with_error(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }

    /// Queue a successful response.
    #[must_use]
    pub fn with_scripted_response(self, response: impl Into<String>) -> Self {
        self.push(Ok(response.into()));
        self
    }

    /// Queue a backend failure.
    #[must_use]
    pub fn with_scripted_error(self, error: impl Into<String>) -> Self {
        self.push(Err(error.into()));
        self
    }

    /// Sleep this long inside every call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Get the number of times `complete` was called.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Snapshot of every call received so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    /// Number of scripted outcomes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or_default()
    }

    fn push(&self, outcome: std::result::Result<String, String>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(outcome);
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, system_prompt: &str, user_content: &str) -> Result<String> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                system_prompt: system_prompt.to_string(),
                user_content: user_content.to_string(),
            });
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match scripted {
            Some(Ok(response)) => Ok(response),
            Some(Err(error)) => anyhow::bail!("{}", error),
            None => match self.error {
                Some(ref error) => anyhow::bail!("{}", error),
                None => Ok(self.response.clone()),
            },
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// =============================================================================
// LLM Configuration
// =============================================================================

/// Configuration for backend selection and options.
///
/// Loaded from the `llm` section of `.triage/settings.json`.
///
/// ```json
/// {
///   "llm": {
///     "provider": "openai",
///     "model": "gpt-4o",
///     "apiKeyEnv": "OPENAI_API_KEY",
///     "options": { "temperature": 0.2 }
///   }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmConfig {
    /// Backend to use: "openai" or "claude".
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Model identifier passed to the backend.
    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable holding the API key (HTTP backends only).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Provider-specific options.
    ///
    /// For OpenAI: `temperature` (number), `maxTokens` (integer),
    /// `apiBase` (string).
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_request_timeout_secs() -> u64 {
    90
}

/// Providers [`create_llm_client`] knows how to build.
pub const VALID_PROVIDERS: &[&str] = &["openai", "claude"];

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            request_timeout_secs: default_request_timeout_secs(),
            options: HashMap::new(),
        }
    }
}

impl LlmConfig {
    /// Validate the backend configuration.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !VALID_PROVIDERS.contains(&self.provider.as_str()) {
            return Err(format!(
                "Invalid provider '{}'. Valid options: {}",
                self.provider,
                VALID_PROVIDERS.join(", ")
            ));
        }
        if self.model.trim().is_empty() {
            return Err("Model name must not be empty".to_string());
        }
        if self.request_timeout_secs == 0 {
            return Err("Request timeout must be greater than zero".to_string());
        }
        if let Some(temperature) = self.options.get("temperature") {
            match temperature.as_f64() {
                Some(t) if (0.0..=2.0).contains(&t) => {}
                _ => return Err("temperature must be a number between 0 and 2".to_string()),
            }
        }
        Ok(())
    }

    /// Temperature option, if set.
    #[must_use]
    pub fn temperature(&self) -> Option<f32> {
        self.options
            .get("temperature")
            .and_then(|v| v.as_f64())
            .map(|t| t as f32)
    }

    /// Max output tokens option, if set.
    #[must_use]
    pub fn max_tokens(&self) -> Option<u32> {
        self.options
            .get("maxTokens")
            .and_then(|v| v.as_u64())
            .and_then(|t| u32::try_from(t).ok())
    }

    /// API base URL override, if set.
    #[must_use]
    pub fn api_base(&self) -> Option<&str> {
        self.options.get("apiBase").and_then(|v| v.as_str())
    }
}

/// Create a backend client based on configuration.
///
/// # Errors
///
/// Returns an error if the configuration is invalid.
pub fn create_llm_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    config.validate().map_err(|e| anyhow::anyhow!("{}", e))?;

    match config.provider.as_str() {
        "openai" => {
            let mut provider = OpenAiProvider::new(&config.model)
                .with_api_key_env(&config.api_key_env)
                .with_timeout(Duration::from_secs(config.request_timeout_secs));
            if let Some(temperature) = config.temperature() {
                provider = provider.with_temperature(temperature);
            }
            if let Some(max_tokens) = config.max_tokens() {
                provider = provider.with_max_tokens(max_tokens);
            }
            if let Some(api_base) = config.api_base() {
                provider = provider.with_api_base(api_base);
            }
            Ok(Arc::new(provider))
        }
        "claude" => Ok(Arc::new(ClaudeClient::new().with_model(&config.model))),
        other => anyhow::bail!(
            "Unknown provider '{}'. Valid options: {}",
            other,
            VALID_PROVIDERS.join(", ")
        ),
    }
}
