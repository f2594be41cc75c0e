//! Configuration file handling and run-config resolution for relay.
//!
//! Provides a TOML config file at `~/.config/relay/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default. Env vars
//! (`RELAY_BACKEND`, `RELAY_MODEL`, `RELAY_TIMEOUT`) are folded into the
//! flags by clap.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use relay_core::config::ConfigError;
use relay_core::{Backend, Effort, ErrorCode, RunConfig};

use crate::Cli;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub defaults: DefaultsSection,
    pub auth: AuthSection,
    pub engines: EnginesSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DefaultsSection {
    pub backend: Option<Backend>,
    pub effort: Option<Effort>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthSection {
    /// Refuse to run when none of the backend's credential vars is set.
    pub require_api_key: bool,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            require_api_key: true,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnginesSection {
    pub claude: EngineSection,
    pub codex: EngineSection,
    pub gemini: EngineSection,
}

impl EnginesSection {
    pub fn get(&self, backend: Backend) -> &EngineSection {
        match backend {
            Backend::Claude => &self.claude,
            Backend::Codex => &self.codex,
            Backend::Gemini => &self.gemini,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSection {
    pub binary: Option<String>,
    pub model: Option<String>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the relay config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/relay` or `~/.config/relay`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("relay");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("relay")
}

/// Return the path to the relay config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read
// -----------------------------------------------------------------------

/// Load and parse the config file at `path`.
pub fn load_config(path: &Path) -> Result<ConfigFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))
}

/// Load an explicitly named config file, or the default one if it exists.
pub fn load_config_or_default(explicit: Option<&Path>) -> Result<ConfigFile> {
    match explicit {
        Some(path) => load_config(path),
        None => {
            let path = config_path();
            if path.exists() {
                load_config(&path)
            } else {
                Ok(ConfigFile::default())
            }
        }
    }
}

// -----------------------------------------------------------------------
// Resolution
// -----------------------------------------------------------------------

/// Why a run was rejected before any backend started.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Invalid(#[from] anyhow::Error),

    #[error("no credentials for {backend}: set one of {}", .vars.join(", "))]
    MissingApiKey {
        backend: Backend,
        vars: &'static [&'static str],
    },
}

impl CliError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CliError::MissingApiKey { .. } => ErrorCode::MissingApiKey,
            CliError::Config(_) | CliError::Invalid(_) => ErrorCode::InvalidArgs,
        }
    }
}

/// Build and validate the run config from flags, file and defaults.
pub fn resolve(cli: &Cli, file: &ConfigFile, prompt: String) -> Result<RunConfig, CliError> {
    let backend = match cli.backend.as_deref() {
        Some(name) => name.parse()?,
        None => file.defaults.backend.unwrap_or(Backend::Claude),
    };
    let effort = match cli.effort.as_deref() {
        Some(name) => name.parse()?,
        None => file.defaults.effort.unwrap_or_default(),
    };
    let timeout = cli
        .timeout
        .or(file.defaults.timeout_secs)
        .map(Duration::from_secs)
        .unwrap_or_else(|| effort.default_timeout());
    let working_dir = match &cli.cwd {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("failed to determine the current directory")?,
    };
    let engine_file = file.engines.get(backend);

    let mut options = parse_options(&cli.options)?;
    if let Some(binary) = &engine_file.binary {
        options
            .entry("binary")
            .or_insert_with(|| Value::from(binary.as_str()));
    }

    let mut config = RunConfig::new(backend, prompt, working_dir);
    config.effort = effort;
    config.timeout = timeout;
    config.model = cli.model.clone().or_else(|| engine_file.model.clone());
    config.system_prompt = cli.system_prompt.clone();
    config.options = options;
    config.validate()?;
    Ok(config)
}

/// Parse repeated `KEY=JSON` flags into an option bag. A value that is not
/// valid JSON is taken as a plain string.
pub fn parse_options(raw: &[String]) -> Result<Map<String, Value>> {
    let mut options = Map::new();
    for entry in raw {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("invalid option {entry:?}: expected KEY=JSON"))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(anyhow!("invalid option {entry:?}: empty key"));
        }
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::from(value));
        options.insert(key.to_string(), value);
    }
    Ok(options)
}

/// Require one of the backend's credential variables when `required`.
pub fn check_credentials<F>(backend: Backend, required: bool, lookup: F) -> Result<(), CliError>
where
    F: Fn(&str) -> Option<String>,
{
    if !required {
        return Ok(());
    }
    let vars = backend.credential_vars();
    let found = vars
        .iter()
        .any(|var| lookup(var).is_some_and(|v| !v.trim().is_empty()));
    if found {
        Ok(())
    } else {
        Err(CliError::MissingApiKey { backend, vars })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
