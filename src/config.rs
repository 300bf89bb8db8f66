use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_BACKEND_URL: &str = "https://chatgpt.com/backend-api/codex/responses";
pub const DEFAULT_ORIGINATOR: &str = "codex_cli_rs";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    #[serde(default = "default_originator")]
    pub originator: String,
    #[serde(default = "default_system_fingerprint")]
    pub system_fingerprint: String,
    /// Instructions prepended to every upstream request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Reasoning effort used when the caller does not pick one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_tool_call_queue_capacity")]
    pub tool_call_queue_capacity: usize,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub models: ModelsConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthSource {
    #[default]
    Codex,
    OpenCode,
    Env,
    Auto,
}

impl AuthSource {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "codex" => Ok(Self::Codex),
            "opencode" => Ok(Self::OpenCode),
            "env" => Ok(Self::Env),
            "auto" => Ok(Self::Auto),
            other => Err(GatewayError::config(format!(
                "unsupported auth source: {other}. Known sources: codex, opencode, env, auto"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub source: AuthSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codex_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opencode_path: Option<PathBuf>,
    #[serde(default = "default_access_token_env")]
    pub access_token_env: String,
    #[serde(default = "default_account_id_env")]
    pub account_id_env: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            source: AuthSource::default(),
            codex_path: None,
            opencode_path: None,
            access_token_env: default_access_token_env(),
            account_id_env: default_account_id_env(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_legacy_namespace")]
    pub legacy_namespace: String,
    /// Ordered `[id, display name]` pairs; the first entry is the default model.
    #[serde(default = "default_presets")]
    pub presets: Vec<(String, String)>,
    #[serde(default = "default_mini_model")]
    pub mini_model: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            legacy_namespace: default_legacy_namespace(),
            presets: default_presets(),
            mini_model: default_mini_model(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            backend_url: default_backend_url(),
            originator: default_originator(),
            system_fingerprint: default_system_fingerprint(),
            instructions: None,
            reasoning_effort: None,
            request_timeout_secs: default_request_timeout_secs(),
            tool_call_queue_capacity: default_tool_call_queue_capacity(),
            auth: AuthConfig::default(),
            models: ModelsConfig::default(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_backend_url() -> String {
    DEFAULT_BACKEND_URL.to_string()
}

fn default_originator() -> String {
    DEFAULT_ORIGINATOR.to_string()
}

fn default_system_fingerprint() -> String {
    "fp_bridge".to_string()
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_tool_call_queue_capacity() -> usize {
    16
}

fn default_access_token_env() -> String {
    "RESPONSES_BRIDGE_ACCESS_TOKEN".to_string()
}

fn default_account_id_env() -> String {
    "RESPONSES_BRIDGE_ACCOUNT_ID".to_string()
}

fn default_namespace() -> String {
    "chatgpt/codex/".to_string()
}

fn default_legacy_namespace() -> String {
    "opencode/codex/".to_string()
}

fn default_mini_model() -> String {
    "gpt-5.1-codex-mini".to_string()
}

fn default_presets() -> Vec<(String, String)> {
    [
        ("gpt-5.3-codex", "GPT-5.3 Codex"),
        ("gpt-5.2-codex", "GPT-5.2 Codex"),
        ("gpt-5.2", "GPT-5.2"),
        ("gpt-5.1-codex-max", "GPT-5.1 Codex Max"),
        ("gpt-5.1-codex", "GPT-5.1 Codex"),
        ("gpt-5.1-codex-mini", "GPT-5.1 Codex Mini"),
        ("gpt-5.1", "GPT-5.1"),
    ]
    .into_iter()
    .map(|(id, name)| (id.to_string(), name.to_string()))
    .collect()
}

impl GatewayConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir > built-in defaults
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        for candidate in &config_search_paths() {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(candidate);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<()> {
        if self.backend_url.trim().is_empty() {
            return Err(GatewayError::config("backend_url must not be empty"));
        }
        if self.models.presets.is_empty() {
            return Err(GatewayError::config("models.presets must list at least one model"));
        }
        if self.tool_call_queue_capacity == 0 {
            return Err(GatewayError::config("tool_call_queue_capacity must be > 0"));
        }
        Ok(())
    }

    /// Originator header value, falling back to the codex CLI identity.
    pub fn effective_originator(&self) -> &str {
        let trimmed = self.originator.trim();
        if trimmed.is_empty() {
            DEFAULT_ORIGINATOR
        } else {
            trimmed
        }
    }
}

pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("responses-bridge.toml")];

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        paths.push(PathBuf::from(xdg).join("responses-bridge").join("config.toml"));
    }
    if let Some(home) = home_dir() {
        paths.push(home.join(".config").join("responses-bridge").join("config.toml"));
        paths.push(home.join(".responses-bridge.toml"));
    }

    paths
}

pub(crate) fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
