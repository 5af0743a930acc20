//! Configuration loading, validation, and management for opsclaw.
//!
//! Loads configuration from `~/.opsclaw/config.toml` (or `OPSCLAW_CONFIG`)
//! with environment variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Official DeepSeek endpoint; the only base URL that strictly needs a key.
pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";

/// The root configuration structure.
///
/// Maps directly to `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Chat-completion endpoint settings
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Hosts the agent may run commands on
    #[serde(default)]
    pub assets: Vec<AssetConfig>,

    /// Agent loop limits
    #[serde(default)]
    pub agent: AgentConfig,

    /// HTTP gateway
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Session persistence
    #[serde(default)]
    pub sessions: SessionsConfig,

    /// SSH transport
    #[serde(default)]
    pub ssh: SshConfig,
}

fn default_true() -> bool {
    true
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Upper bound on generated tokens per request
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    DEEPSEEK_BASE_URL.into()
}
fn default_model() -> String {
    "deepseek-chat".into()
}
fn default_max_tokens() -> u32 {
    8192
}
fn default_request_timeout() -> u64 {
    300
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// A Linux host reachable over SSH.
#[derive(Clone, Serialize, Deserialize)]
pub struct AssetConfig {
    pub name: String,
    pub host: String,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    pub username: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<String>,
}

fn default_ssh_port() -> u16 {
    22
}

impl AssetConfig {
    /// `user@host:port`
    pub fn address(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

impl std::fmt::Debug for AssetConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetConfig")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("private_key_path", &self.private_key_path)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    /// Corrective messages allowed per run before raw text is accepted
    #[serde(default = "default_max_nudges")]
    pub max_nudges: u32,

    /// Character ceiling for a tool result fed back to the model
    #[serde(default = "default_tool_result_max_chars")]
    pub tool_result_max_chars: usize,

    /// Directory for per-run interaction transcripts (disabled when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interaction_log_dir: Option<String>,

    /// Rebuild user/disk listings as Markdown tables from raw command output
    #[serde(default = "default_true")]
    pub post_process_tables: bool,
}

fn default_max_rounds() -> u32 {
    50
}
fn default_max_nudges() -> u32 {
    2
}
fn default_tool_result_max_chars() -> usize {
    12_000
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            max_nudges: default_max_nudges(),
            tool_result_max_chars: default_tool_result_max_chars(),
            interaction_log_dir: None,
            post_process_tables: true,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Seconds between keep-alive comments on an idle event stream
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// How long an acknowledged run stays pollable
    #[serde(default = "default_finished_run_ttl")]
    pub finished_run_ttl_secs: u64,

    /// Bearer token required on `/api/*` when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,

    /// Extra CORS origins; same-origin only when empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cors_origins: Vec<String>,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_heartbeat_secs() -> u64 {
    15
}
fn default_finished_run_ttl() -> u64 {
    300
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            heartbeat_secs: default_heartbeat_secs(),
            finished_run_ttl_secs: default_finished_run_ttl(),
            api_token: None,
            cors_origins: Vec::new(),
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("port", &self.port)
            .field("host", &self.host)
            .field("heartbeat_secs", &self.heartbeat_secs)
            .field("finished_run_ttl_secs", &self.finished_run_ttl_secs)
            .field("api_token", &redact(&self.api_token))
            .field("cors_origins", &self.cors_origins)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// SQLite file; defaults to `~/.opsclaw/sessions.db`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Timeout for apt/dnf/yum/zypper invocations
    #[serde(default = "default_package_manager_timeout")]
    pub package_manager_timeout_secs: u64,
}

fn default_connect_timeout() -> u64 {
    10
}
fn default_command_timeout() -> u64 {
    60
}
fn default_package_manager_timeout() -> u64 {
    120
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            command_timeout_secs: default_command_timeout(),
            package_manager_timeout_secs: default_package_manager_timeout(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `OPSCLAW_CONFIG`, or `~/.opsclaw/config.toml`.
    ///
    /// Environment overrides, applied after the file:
    /// - `OPSCLAW_API_KEY`, then `DEEPSEEK_API_KEY` (only when no key is configured)
    /// - `OPSCLAW_BASE_URL`, `OPSCLAW_MODEL`
    /// - `OPSCLAW_SESSION_DB`, `OPSCLAW_INTERACTION_LOG_DIR`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(None)
    }

    /// Like [`AppConfig::load`], but an explicit `path` (the CLI `--config`
    /// flag) takes precedence over `OPSCLAW_CONFIG`.
    pub fn load_with(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = Self::resolve_path(path);
        let mut config = Self::load_from(&path)?;
        config.apply_env();
        config.validate()?;
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

    fn apply_env(&mut self) {
        let has_key = self
            .provider
            .api_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty());
        if !has_key {
            self.provider.api_key = std::env::var("OPSCLAW_API_KEY")
                .ok()
                .or_else(|| std::env::var("DEEPSEEK_API_KEY").ok())
                .filter(|k| !k.trim().is_empty());
        }
        if let Ok(url) = std::env::var("OPSCLAW_BASE_URL") {
            self.provider.base_url = url;
        }
        if let Ok(model) = std::env::var("OPSCLAW_MODEL") {
            self.provider.model = model;
        }
        if let Ok(db) = std::env::var("OPSCLAW_SESSION_DB") {
            self.sessions.db_path = Some(db);
        }
        if let Ok(dir) = std::env::var("OPSCLAW_INTERACTION_LOG_DIR") {
            self.agent.interaction_log_dir = Some(dir);
        }
    }

    /// The config file that [`AppConfig::load_with`] reads.
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        explicit.map(Path::to_path_buf).unwrap_or_else(|| {
            std::env::var("OPSCLAW_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| Self::config_dir().join("config.toml"))
        })
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".opsclaw")
    }

    /// Resolved session database path.
    pub fn session_db_path(&self) -> PathBuf {
        self.sessions
            .db_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| Self::config_dir().join("sessions.db"))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.max_rounds == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_rounds must be at least 1".into(),
            ));
        }
        if self.agent.tool_result_max_chars == 0 {
            return Err(ConfigError::ValidationError(
                "agent.tool_result_max_chars must be at least 1".into(),
            ));
        }
        if self.gateway.heartbeat_secs == 0 {
            return Err(ConfigError::ValidationError(
                "gateway.heartbeat_secs must be at least 1".into(),
            ));
        }

        let mut seen = HashSet::new();
        for asset in &self.assets {
            if asset.name.trim().is_empty() || asset.host.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "every asset needs a non-empty name and host".into(),
                ));
            }
            if !seen.insert(asset.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate asset name '{}'",
                    asset.name
                )));
            }
        }

        Ok(())
    }

    /// Look up an asset by exact name.
    pub fn asset(&self, name: &str) -> Option<&AssetConfig> {
        self.assets.iter().find(|a| a.name == name)
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.provider
            .api_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty())
    }

    /// True when pointed at the official DeepSeek API without a key.
    /// Local OpenAI-compatible servers (Ollama, vLLM) run keyless.
    pub fn needs_api_key(&self) -> bool {
        let base = self.provider.base_url.trim().trim_end_matches('/');
        !self.has_api_key() && (base.is_empty() || base == DEEPSEEK_BASE_URL)
    }

    /// Generate a starter config TOML string (for `opsclaw config init`).
    pub fn default_toml() -> String {
        let mut config = Self::default();
        config.assets.push(AssetConfig {
            name: "web-server-01".into(),
            host: "192.168.1.10".into(),
            port: 22,
            username: "root".into(),
            password: None,
            private_key_path: Some("~/.ssh/id_rsa".into()),
        });
        toml::to_string_pretty(&config).unwrap_or_default()
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
