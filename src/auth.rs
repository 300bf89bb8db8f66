//! Credential sources for the upstream backend.
//!
//! The gateway only needs a bearer token and an optional account id per
//! request; where they come from is decided by [`AuthConfig::source`].

use crate::config::{home_dir, AuthConfig, AuthSource};
use crate::error::{GatewayError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: String,
    pub account_id: Option<String>,
}

impl Credentials {
    fn new(access_token: &str, account_id: &str) -> Self {
        let account_id = account_id.trim();
        Self {
            access_token: access_token.trim().to_string(),
            account_id: (!account_id.is_empty()).then(|| account_id.to_string()),
        }
    }
}

pub trait AuthProvider: Send + Sync {
    fn credentials(&self) -> Result<Credentials>;
}

pub type SharedAuth = Arc<dyn AuthProvider>;

/// Build the provider selected in config.
pub fn provider_from_config(config: &AuthConfig) -> SharedAuth {
    match config.source {
        AuthSource::Codex => Arc::new(CodexFileAuth::new(config.codex_path.clone())),
        AuthSource::OpenCode => Arc::new(OpenCodeFileAuth::new(config.opencode_path.clone())),
        AuthSource::Env => Arc::new(EnvAuth::from_config(config)),
        AuthSource::Auto => Arc::new(AutoAuth::new(vec![
            Arc::new(CodexFileAuth::new(config.codex_path.clone())),
            Arc::new(OpenCodeFileAuth::new(config.opencode_path.clone())),
            Arc::new(EnvAuth::from_config(config)),
        ])),
    }
}

pub struct EnvAuth {
    token_var: String,
    account_var: String,
}

impl EnvAuth {
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            token_var: config.access_token_env.clone(),
            account_var: config.account_id_env.clone(),
        }
    }
}

impl AuthProvider for EnvAuth {
    fn credentials(&self) -> Result<Credentials> {
        let token = std::env::var(&self.token_var).unwrap_or_default();
        if token.trim().is_empty() {
            return Err(GatewayError::auth(format!(
                "environment variable '{}' not set",
                self.token_var
            )));
        }
        let account = std::env::var(&self.account_var).unwrap_or_default();
        Ok(Credentials::new(&token, &account))
    }
}

#[derive(Deserialize, Default)]
struct CodexAuthFile {
    #[serde(rename = "OPENAI_API_KEY", default)]
    openai_api_key: Option<String>,
    #[serde(default)]
    tokens: CodexTokens,
}

#[derive(Deserialize, Default)]
struct CodexTokens {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    account_id: String,
}

/// Reads `~/.codex/auth.json` as written by the codex CLI.
pub struct CodexFileAuth {
    path: Option<PathBuf>,
}

impl CodexFileAuth {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn read_from(path: &Path) -> Result<Credentials> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::auth(format!("failed to read codex auth file: {e}")))?;
        let parsed: CodexAuthFile = serde_json::from_str(&data)
            .map_err(|e| GatewayError::auth(format!("failed to parse codex auth file: {e}")))?;

        let mut token = parsed.tokens.access_token.trim().to_string();
        if token.is_empty() {
            // An API key is still usable as a bearer token.
            token = parsed.openai_api_key.unwrap_or_default().trim().to_string();
        }
        if token.is_empty() {
            return Err(GatewayError::auth("codex auth missing tokens.access_token"));
        }
        Ok(Credentials::new(&token, &parsed.tokens.account_id))
    }
}

impl AuthProvider for CodexFileAuth {
    fn credentials(&self) -> Result<Credentials> {
        let path = match &self.path {
            Some(p) => p.clone(),
            None => home_dir()
                .ok_or_else(|| GatewayError::auth("failed to resolve home directory"))?
                .join(".codex")
                .join("auth.json"),
        };
        Self::read_from(&path)
    }
}

#[derive(Deserialize, Default)]
struct OpenCodeAuthFile {
    #[serde(default)]
    openai: OpenCodeEntry,
}

#[derive(Deserialize, Default)]
struct OpenCodeEntry {
    #[serde(default)]
    access: String,
    #[serde(rename = "accountId", default)]
    account_id: String,
}

/// Reads `~/.local/share/opencode/auth.json`.
pub struct OpenCodeFileAuth {
    path: Option<PathBuf>,
}

impl OpenCodeFileAuth {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn read_from(path: &Path) -> Result<Credentials> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::auth(format!("failed to read opencode auth file: {e}")))?;
        let parsed: OpenCodeAuthFile = serde_json::from_str(&data)
            .map_err(|e| GatewayError::auth(format!("failed to parse opencode auth file: {e}")))?;
        if parsed.openai.access.trim().is_empty() {
            return Err(GatewayError::auth("opencode auth missing openai.access"));
        }
        Ok(Credentials::new(&parsed.openai.access, &parsed.openai.account_id))
    }
}

impl AuthProvider for OpenCodeFileAuth {
    fn credentials(&self) -> Result<Credentials> {
        let path = match &self.path {
            Some(p) => p.clone(),
            None => home_dir()
                .ok_or_else(|| GatewayError::auth("failed to resolve home directory"))?
                .join(".local")
                .join("share")
                .join("opencode")
                .join("auth.json"),
        };
        Self::read_from(&path)
    }
}

/// Tries each provider in order and returns the first usable token.
pub struct AutoAuth {
    providers: Vec<SharedAuth>,
}

impl AutoAuth {
    pub fn new(providers: Vec<SharedAuth>) -> Self {
        Self { providers }
    }
}

impl AuthProvider for AutoAuth {
    fn credentials(&self) -> Result<Credentials> {
        let mut last_err = None;
        for provider in &self.providers {
            match provider.credentials() {
                Ok(creds) if !creds.access_token.is_empty() => return Ok(creds),
                Ok(_) => {}
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| GatewayError::auth("no auth available")))
    }
}

/// Fixed credentials, handy for tests and embedding.
pub struct StaticAuth(pub Credentials);

impl AuthProvider for StaticAuth {
    fn credentials(&self) -> Result<Credentials> {
        Ok(self.0.clone())
    }
}
