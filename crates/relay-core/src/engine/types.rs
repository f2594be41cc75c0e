//! Result and error types shared by all engines.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::activity::ActivityItem;
use crate::config::ConfigError;

/// Token counts as reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub reasoning: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.input += other.input;
        self.output += other.output;
        self.reasoning += other.reasoning;
    }
}

/// Backend-specific run metadata. Unset fields are omitted from JSON; keys
/// relay does not model land in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turns: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Metadata {
    /// Accumulate token usage into `tokens`.
    pub fn add_tokens(&mut self, usage: TokenUsage) {
        self.tokens.get_or_insert_with(TokenUsage::default).add(usage);
    }
}

/// What an engine hands back after a run it considers finished.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineResult {
    /// Final response text. May be empty.
    pub response: String,
    /// The items the engine reported through `on_item`, in order.
    pub items: Vec<ActivityItem>,
    pub metadata: Metadata,
}

impl EngineResult {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            ..Self::default()
        }
    }
}

/// Failures an engine can report.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to spawn {binary:?} -- is it installed and on PATH? ({source})")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed backend stream: {0}")]
    Protocol(String),

    #[error("backend reported an error: {0}")]
    Backend(String),

    #[error("backend exited with {status}{}", stderr_suffix(.stderr))]
    Exited { status: String, stderr: String },

    #[error("invalid engine configuration: {0}")]
    Config(#[from] ConfigError),

    /// The engine observed the cancellation signal and stopped early.
    #[error("run cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn stderr_suffix(stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}
