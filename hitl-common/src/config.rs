//! Configuration for the HITL agent.
//!
//! Loaded from `~/.hitl-agent/config.json` when present, defaults otherwise.
//!
//! # Environment Variable Overrides
//!
//! ## Model
//! - `GROQ_API_KEY` → model.api_key
//! - `LLM_MODEL` → model.model
//! - `LLM_TEMPERATURE` → model.temperature
//! - `LLM_BASE_URL` → model.base_url
//!
//! ## Tools
//! - `GITHUB_TOKEN` → tools.github_token
//! - `OPENWEATHER_API_KEY` → tools.openweather_api_key
//! - `TAVILY_API_KEY` → tools.tavily_api_key
//!
//! ## Storage / Observability
//! - `HITL_DB_PATH` → storage.db_path
//! - `HITL_LOG_LEVEL` → observability.log_level
//! - `HITL_LOG_FORMAT` → observability.log_format

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result, ResultExt};
use crate::logging::LogFormat;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".hitl-agent"),
        |dirs| dirs.home_dir().join(".hitl-agent"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Execution engine settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Chat-completion endpoint settings
    #[serde(default)]
    pub model: ModelConfig,

    /// Checkpoint storage settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Credentials for the built-in tools
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Logging settings
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ============================================================================
// Agent Configuration
// ============================================================================

/// Execution engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum model round-trips per submit/resume before the turn is reported stalled
    #[serde(default = "default_max_round_trips")]
    pub max_round_trips: u32,

    /// Tools that require human confirmation before execution
    #[serde(default = "default_dangerous_tools")]
    pub dangerous_tools: Vec<String>,

    /// Argument clamping for list-style tools
    #[serde(default)]
    pub clamp: ClampConfig,

    /// Optional system prompt sent ahead of the conversation
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_round_trips: default_max_round_trips(),
            dangerous_tools: default_dangerous_tools(),
            clamp: ClampConfig::default(),
            system_prompt: None,
        }
    }
}

/// Ceiling applied to limit-like arguments of list/enumerate-style tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClampConfig {
    /// Highest value a limit-like argument may carry
    #[serde(default = "default_clamp_ceiling")]
    pub ceiling: u64,

    /// Tool name prefixes the clamp applies to
    #[serde(default = "default_clamp_prefixes")]
    pub tool_prefixes: Vec<String>,

    /// Argument names treated as limits
    #[serde(default = "default_clamp_arguments")]
    pub argument_names: Vec<String>,
}

impl Default for ClampConfig {
    fn default() -> Self {
        Self {
            ceiling: default_clamp_ceiling(),
            tool_prefixes: default_clamp_prefixes(),
            argument_names: default_clamp_arguments(),
        }
    }
}

// ============================================================================
// Model Configuration
// ============================================================================

/// OpenAI-compatible chat-completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Base URL, without the `/v1/chat/completions` suffix
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model identifier
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature (0.0 - 2.0)
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Bearer token for the endpoint
    #[serde(default)]
    pub api_key: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

// ============================================================================
// Storage / Tools / Observability
// ============================================================================

/// Checkpoint database location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// Tool credentials. Every built-in tool is registered regardless; one whose
/// credential is missing reports a soft failure when called.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub github_token: Option<String>,
    #[serde(default)]
    pub openweather_api_key: Option<String>,
    #[serde(default)]
    pub tavily_api_key: Option<String>,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_max_round_trips() -> u32 {
    10
}

fn default_dangerous_tools() -> Vec<String> {
    vec!["create_repository".into(), "delete_repository".into()]
}

fn default_clamp_ceiling() -> u64 {
    10
}

fn default_clamp_prefixes() -> Vec<String> {
    vec!["list_".into(), "enumerate_".into()]
}

fn default_clamp_arguments() -> Vec<String> {
    vec!["limit".into(), "max_results".into(), "per_page".into()]
}

fn default_base_url() -> String {
    "https://api.groq.com/openai".into()
}

fn default_model() -> String {
    "llama-3.3-70b-versatile".into()
}

fn default_temperature() -> f64 {
    0.2
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_db_path() -> PathBuf {
    config_dir().join("checkpoints.db")
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Loading
// ============================================================================

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .context(format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration, apply environment overrides and validate.
    pub fn load_with_env(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from(path)?,
            None => Self::load()?,
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("GROQ_API_KEY") {
            self.model.api_key = Some(key);
        }
        if let Some(model) = lookup("LLM_MODEL") {
            self.model.model = model;
        }
        if let Some(raw) = lookup("LLM_TEMPERATURE") {
            match raw.parse::<f64>() {
                Ok(temperature) => self.model.temperature = temperature,
                Err(_) => tracing::warn!(value = %raw, "Ignoring unparsable LLM_TEMPERATURE"),
            }
        }
        if let Some(url) = lookup("LLM_BASE_URL") {
            self.model.base_url = url;
        }
        if let Some(token) = lookup("GITHUB_TOKEN") {
            self.tools.github_token = Some(token);
        }
        if let Some(key) = lookup("OPENWEATHER_API_KEY") {
            self.tools.openweather_api_key = Some(key);
        }
        if let Some(key) = lookup("TAVILY_API_KEY") {
            self.tools.tavily_api_key = Some(key);
        }
        if let Some(path) = lookup("HITL_DB_PATH") {
            self.storage.db_path = PathBuf::from(path);
        }
        if let Some(level) = lookup("HITL_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(format) = lookup("HITL_LOG_FORMAT") {
            self.observability.log_format = format;
        }
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.agent.max_round_trips == 0 {
            return Err(Error::Config("agent.max_round_trips must be at least 1".into()));
        }
        if self.agent.clamp.ceiling == 0 {
            return Err(Error::Config("agent.clamp.ceiling must be at least 1".into()));
        }
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(Error::Config(format!(
                "model.temperature must be within 0.0..=2.0, got {}",
                self.model.temperature
            )));
        }
        if self.model.model.trim().is_empty() {
            return Err(Error::Config("model.model must not be empty".into()));
        }
        self.observability
            .log_format
            .parse::<LogFormat>()
            .map_err(|reason| Error::Config(format!("observability.log_format: {reason}")))?;
        Ok(())
    }
}
