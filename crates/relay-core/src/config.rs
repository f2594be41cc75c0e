//! Run configuration: backend selection, effort tiers and the immutable
//! [`RunConfig`] handed to the orchestrator.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cancel::CancelSignal;

/// Errors raised while validating a [`RunConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("prompt must not be empty")]
    EmptyPrompt,

    #[error("working directory {0} does not exist or is not a directory")]
    WorkingDir(PathBuf),

    #[error("timeout must be greater than zero")]
    ZeroTimeout,

    #[error("invalid option {key:?}: {reason}")]
    InvalidOption { key: String, reason: String },

    #[error("unknown {kind} {value:?} (expected {expected})")]
    UnknownVariant {
        kind: &'static str,
        value: String,
        expected: &'static str,
    },
}

// -----------------------------------------------------------------------
// Backend
// -----------------------------------------------------------------------

/// The closed set of agent backends relay can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Claude,
    Codex,
    Gemini,
}

impl Backend {
    pub const ALL: [Backend; 3] = [Backend::Claude, Backend::Codex, Backend::Gemini];

    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Claude => "claude",
            Backend::Codex => "codex",
            Backend::Gemini => "gemini",
        }
    }

    /// Environment variables any one of which satisfies the credential check.
    pub fn credential_vars(&self) -> &'static [&'static str] {
        match self {
            Backend::Claude => &["ANTHROPIC_API_KEY", "CLAUDE_CODE_OAUTH_TOKEN"],
            Backend::Codex => &["OPENAI_API_KEY", "CODEX_API_KEY"],
            Backend::Gemini => &["GEMINI_API_KEY", "GOOGLE_API_KEY"],
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claude" => Ok(Backend::Claude),
            "codex" => Ok(Backend::Codex),
            "gemini" => Ok(Backend::Gemini),
            _ => Err(ConfigError::UnknownVariant {
                kind: "backend",
                value: s.to_string(),
                expected: "claude, codex, or gemini",
            }),
        }
    }
}

// -----------------------------------------------------------------------
// Effort
// -----------------------------------------------------------------------

/// Coarse knob scaling the default deadline and backend budgets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effort {
    Low,
    #[default]
    Medium,
    High,
}

impl Effort {
    pub fn as_str(&self) -> &'static str {
        match self {
            Effort::Low => "low",
            Effort::Medium => "medium",
            Effort::High => "high",
        }
    }

    /// Deadline used when no explicit timeout is given.
    pub fn default_timeout(&self) -> Duration {
        match self {
            Effort::Low => Duration::from_secs(300),
            Effort::Medium => Duration::from_secs(900),
            Effort::High => Duration::from_secs(1800),
        }
    }

    /// Turn budget for backends that count agentic turns.
    pub fn max_turns(&self) -> u32 {
        match self {
            Effort::Low => 10,
            Effort::Medium => 30,
            Effort::High => 60,
        }
    }
}

impl fmt::Display for Effort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Effort {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Effort::Low),
            "medium" => Ok(Effort::Medium),
            "high" => Ok(Effort::High),
            _ => Err(ConfigError::UnknownVariant {
                kind: "effort",
                value: s.to_string(),
                expected: "low, medium, or high",
            }),
        }
    }
}

// -----------------------------------------------------------------------
// RunConfig
// -----------------------------------------------------------------------

/// Everything one run needs. Built once, then owned by the orchestrator.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub prompt: String,
    pub working_dir: PathBuf,
    /// Soft deadline; elapsing it triggers [`CancelSignal`], nothing more.
    pub timeout: Duration,
    pub cancel: CancelSignal,
    pub backend: Backend,
    pub model: Option<String>,
    pub effort: Effort,
    /// Backend-specific option bag (`binary`, `extra_path`, `args`, ...).
    pub options: Map<String, Value>,
    pub system_prompt: Option<String>,
}

impl RunConfig {
    /// A config with medium effort, its default deadline and an empty
    /// option bag.
    pub fn new(backend: Backend, prompt: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        let effort = Effort::default();
        Self {
            prompt: prompt.into(),
            working_dir: working_dir.into(),
            timeout: effort.default_timeout(),
            cancel: CancelSignal::new(),
            backend,
            model: None,
            effort,
            options: Map::new(),
            system_prompt: None,
        }
    }

    /// Check the invariants the orchestrator relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.prompt.trim().is_empty() {
            return Err(ConfigError::EmptyPrompt);
        }
        if !self.working_dir.is_dir() {
            return Err(ConfigError::WorkingDir(self.working_dir.clone()));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if let Some(v) = self.options.get("binary") {
            if !v.as_str().is_some_and(|s| !s.is_empty()) {
                return Err(invalid_option("binary", "expected a non-empty string"));
            }
        }
        for key in ["extra_path", "args"] {
            self.option_str_list(key)?;
        }
        if let Some(v) = self.options.get("max_turns") {
            if !v.as_u64().is_some_and(|n| n > 0) {
                return Err(invalid_option("max_turns", "expected a positive integer"));
            }
        }
        Ok(())
    }

    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }

    pub fn option_u64(&self, key: &str) -> Option<u64> {
        self.options.get(key).and_then(Value::as_u64)
    }

    /// Read an option holding an array of strings. A missing key is an
    /// empty list; a single string is accepted as a one-element list.
    pub fn option_str_list(&self, key: &str) -> Result<Vec<String>, ConfigError> {
        match self.options.get(key) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::String(s)) => Ok(vec![s.clone()]),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| invalid_option(key, "expected an array of strings"))
                })
                .collect(),
            Some(_) => Err(invalid_option(key, "expected an array of strings")),
        }
    }

    /// The prompt with the optional system prompt prepended, for backends
    /// that have no separate system-prompt channel.
    pub fn prompt_with_system(&self) -> String {
        match self.system_prompt.as_deref().map(str::trim) {
            Some(system) if !system.is_empty() => format!("{system}\n\n{}", self.prompt),
            _ => self.prompt.clone(),
        }
    }
}

fn invalid_option(key: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidOption {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}
