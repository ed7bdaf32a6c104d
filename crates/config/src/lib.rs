//! Configuration loading, validation, and management for ironloop.
//!
//! Loads configuration from `~/.ironloop/config.toml` with environment
//! variable overrides. Validates all settings at startup; every setting
//! the interaction loop depends on (keys, continuous mode, budget) is
//! fixed before the loop starts.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.ironloop/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the model backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model backend and model selection
    #[serde(default)]
    pub llm: LlmConfig,

    /// Retry policy for backend calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Human authorization gate and continuous mode
    #[serde(default)]
    pub interaction: InteractionConfig,

    /// Spending ceiling
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Sandboxed workspace
    #[serde(default)]
    pub workspace: WorkspaceConfig,

    /// Local command execution
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Plugin allow/deny lists
    #[serde(default)]
    pub plugins: PluginsConfig,

    /// Per-cycle debug logging
    #[serde(default)]
    pub logging: LoggingConfig,

    /// The agent's name, role and goals
    #[serde(default)]
    pub ai: AiProfile,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("llm", &self.llm)
            .field("retry", &self.retry)
            .field("interaction", &self.interaction)
            .field("budget", &self.budget)
            .field("workspace", &self.workspace)
            .field("execution", &self.execution)
            .field("plugins", &self.plugins)
            .field("logging", &self.logging)
            .field("ai", &self.ai)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model used for the interaction loop and self-feedback
    #[serde(default = "default_fast_model")]
    pub fast_model: String,

    /// Model used for AI functions (JSON repair, summaries)
    #[serde(default = "default_smart_model")]
    pub smart_model: String,

    #[serde(default = "default_fast_token_limit")]
    pub fast_token_limit: usize,

    #[serde(default = "default_smart_token_limit")]
    pub smart_token_limit: usize,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Maximum tokens per embedding chunk
    #[serde(default = "default_embedding_token_limit")]
    pub embedding_token_limit: usize,

    #[serde(default)]
    pub temperature: f32,

    /// Per-1K-token pricing overrides (model name → pricing)
    #[serde(default)]
    pub custom_pricing: HashMap<String, PricingOverrideConfig>,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_fast_model() -> String {
    "gpt-3.5-turbo".into()
}
fn default_smart_model() -> String {
    "gpt-4".into()
}
fn default_fast_token_limit() -> usize {
    4000
}
fn default_smart_token_limit() -> usize {
    8000
}
fn default_embedding_model() -> String {
    "text-embedding-ada-002".into()
}
fn default_embedding_token_limit() -> usize {
    8191
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            fast_model: default_fast_model(),
            smart_model: default_smart_model(),
            fast_token_limit: default_fast_token_limit(),
            smart_token_limit: default_smart_token_limit(),
            embedding_model: default_embedding_model(),
            embedding_token_limit: default_embedding_token_limit(),
            temperature: 0.0,
            custom_pricing: HashMap::new(),
        }
    }
}

/// Custom per-1K-token pricing for a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingOverrideConfig {
    /// Price per 1K prompt tokens in USD
    pub prompt_per_k: f64,
    /// Price per 1K completion tokens in USD
    pub completion_per_k: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Additional attempts after the first one
    #[serde(default = "default_num_retries")]
    pub num_retries: u32,

    /// Backoff is `backoff_base ^ (attempt + 2)` seconds
    #[serde(default = "default_backoff_base")]
    pub backoff_base: f64,

    /// Warn once about paid-account requirements on rate limits
    #[serde(default = "default_true")]
    pub warn_user: bool,

    /// Server error statuses that are worth retrying
    #[serde(default = "default_retry_on_status")]
    pub retry_on_status: Vec<u16>,
}

fn default_num_retries() -> u32 {
    10
}
fn default_backoff_base() -> f64 {
    2.0
}
fn default_retry_on_status() -> Vec<u16> {
    vec![502]
}
fn default_true() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            num_retries: default_num_retries(),
            backoff_base: default_backoff_base(),
            warn_user: true,
            retry_on_status: default_retry_on_status(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionConfig {
    #[serde(default = "default_authorise_key")]
    pub authorise_key: String,

    #[serde(default = "default_exit_key")]
    pub exit_key: String,

    #[serde(default = "default_feedback_key")]
    pub feedback_key: String,

    /// Auto-approve every action
    #[serde(default)]
    pub continuous_mode: bool,

    /// Stop after this many cycles in continuous mode (0 = unlimited)
    #[serde(default)]
    pub continuous_limit: u64,

    /// Actions pre-approved at startup
    #[serde(default)]
    pub next_action_count: u32,

    /// The last instruction the model sees each cycle
    #[serde(default = "default_triggering_prompt")]
    pub triggering_prompt: String,

    /// Label the console prompt as a chat message
    #[serde(default)]
    pub chat_messages_enabled: bool,
}

fn default_authorise_key() -> String {
    "y".into()
}
fn default_exit_key() -> String {
    "n".into()
}
fn default_feedback_key() -> String {
    "s".into()
}
pub fn default_triggering_prompt() -> String {
    "Determine exactly one command to use, and respond using the JSON schema specified previously:"
        .into()
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            authorise_key: default_authorise_key(),
            exit_key: default_exit_key(),
            feedback_key: default_feedback_key(),
            continuous_mode: false,
            continuous_limit: 0,
            next_action_count: 0,
            triggering_prompt: default_triggering_prompt(),
            chat_messages_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Maximum spend in USD (0 = no ceiling)
    #[serde(default)]
    pub total_budget: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Workspace root; defaults to `~/.ironloop/workspace`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    #[serde(default = "default_true")]
    pub restrict_to_workspace: bool,

    /// Operation log, relative to the workspace root
    #[serde(default = "default_file_logger_path")]
    pub file_logger_path: PathBuf,
}

fn default_file_logger_path() -> PathBuf {
    PathBuf::from("file_logger.txt")
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            path: None,
            restrict_to_workspace: true,
            file_logger_path: default_file_logger_path(),
        }
    }
}

/// How `shell_allowlist` / `shell_denylist` are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellControl {
    Allowlist,
    Denylist,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub execute_local_commands: bool,

    #[serde(default = "default_shell_control")]
    pub shell_command_control: ShellControl,

    #[serde(default)]
    pub shell_allowlist: Vec<String>,

    #[serde(default = "default_shell_denylist")]
    pub shell_denylist: Vec<String>,
}

fn default_shell_control() -> ShellControl {
    ShellControl::Denylist
}
fn default_shell_denylist() -> Vec<String> {
    vec!["sudo".into(), "su".into()]
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            execute_local_commands: false,
            shell_command_control: default_shell_control(),
            shell_allowlist: Vec::new(),
            shell_denylist: default_shell_denylist(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginsConfig {
    #[serde(default)]
    pub allowlist: Vec<String>,

    #[serde(default)]
    pub denylist: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Dump per-cycle JSON files
    #[serde(default)]
    pub log_cycles: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs/DEBUG")
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_cycles: false,
            log_dir: default_log_dir(),
        }
    }
}

/// The agent's persona.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiProfile {
    #[serde(default = "default_ai_name")]
    pub name: String,

    #[serde(default = "default_ai_role")]
    pub role: String,

    #[serde(default)]
    pub goals: Vec<String>,
}

fn default_ai_name() -> String {
    "Ironloop".into()
}
fn default_ai_role() -> String {
    "an AI designed to autonomously accomplish the goals it is given".into()
}

impl Default for AiProfile {
    fn default() -> Self {
        Self {
            name: default_ai_name(),
            role: default_ai_role(),
            goals: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.ironloop/config.toml).
    ///
    /// Also checks environment variables:
    /// - `IRONLOOP_API_KEY` (highest priority), then `OPENAI_API_KEY`
    /// - `IRONLOOP_MODEL` overrides the fast model
    /// - `IRONLOOP_BASE_URL` overrides the backend URL
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("IRONLOOP_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(model) = std::env::var("IRONLOOP_MODEL") {
            config.llm.fast_model = model;
        }

        if let Ok(url) = std::env::var("IRONLOOP_BASE_URL") {
            config.llm.base_url = url;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".ironloop")
    }

    /// The workspace root: the configured path, or `~/.ironloop/workspace`.
    pub fn workspace_root(&self) -> PathBuf {
        self.workspace
            .path
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("workspace"))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::ValidationError(
                "llm.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.llm.fast_token_limit == 0
            || self.llm.smart_token_limit == 0
            || self.llm.embedding_token_limit == 0
        {
            return Err(ConfigError::ValidationError(
                "token limits must be > 0".into(),
            ));
        }

        if self.retry.backoff_base < 1.0 {
            return Err(ConfigError::ValidationError(
                "retry.backoff_base must be >= 1.0".into(),
            ));
        }

        // Keys are matched against trimmed, lower-cased input.
        let keys = &self.interaction;
        let normalized = [
            ("authorise_key", keys.authorise_key.trim().to_lowercase()),
            ("exit_key", keys.exit_key.trim().to_lowercase()),
            ("feedback_key", keys.feedback_key.trim().to_lowercase()),
        ];
        if let Some((name, _)) = normalized.iter().find(|(_, key)| key.is_empty()) {
            return Err(ConfigError::ValidationError(format!(
                "interaction.{name} must not be empty"
            )));
        }
        for (i, (first, a)) in normalized.iter().enumerate() {
            if let Some((second, _)) = normalized[i + 1..].iter().find(|(_, b)| a == b) {
                return Err(ConfigError::ValidationError(format!(
                    "interaction keys must be distinct: {first} and {second} are both '{a}'"
                )));
            }
        }

        if self.budget.total_budget < 0.0 {
            return Err(ConfigError::ValidationError(
                "budget.total_budget must be >= 0".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            llm: LlmConfig::default(),
            retry: RetryConfig::default(),
            interaction: InteractionConfig::default(),
            budget: BudgetConfig::default(),
            workspace: WorkspaceConfig::default(),
            execution: ExecutionConfig::default(),
            plugins: PluginsConfig::default(),
            logging: LoggingConfig::default(),
            ai: AiProfile::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
