//! Error types for the gateway.

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Auth error: {message}")]
    Auth { message: String },

    #[error("{message}")]
    InvalidRequest { message: String },

    #[error("unsupported model: {model}")]
    UnsupportedModel { model: String },

    /// Upstream rejected the request with a non-success status.
    #[error("{}", backend_status_text(.status, .message))]
    BackendStatus { status: u16, message: String },

    /// Upstream reported a failure inside the event stream.
    #[error("backend response error: {message}")]
    BackendEvent { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("request cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

fn backend_status_text(status: &u16, message: &str) -> String {
    let message = message.trim();
    if message.is_empty() {
        format!("backend request failed with status {status}")
    } else {
        format!("backend request failed with status {status}: {message}")
    }
}

impl GatewayError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth {
            message: msg.into(),
        }
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: msg.into(),
        }
    }

    pub fn unsupported_model(model: impl Into<String>) -> Self {
        Self::UnsupportedModel {
            model: model.into(),
        }
    }

    pub fn backend_status(status: u16, msg: impl Into<String>) -> Self {
        Self::BackendStatus {
            status,
            message: msg.into(),
        }
    }

    pub fn backend_event(msg: impl Into<String>) -> Self {
        Self::BackendEvent {
            message: msg.into(),
        }
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Status code to report downstream for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidRequest { .. } | Self::UnsupportedModel { .. } => 400,
            Self::Auth { .. } => 503,
            Self::BackendStatus { status, .. } => *status,
            Self::BackendEvent { .. } | Self::Http(_) => 502,
            _ => 500,
        }
    }

    /// Message suitable for a downstream error body.
    pub fn client_message(&self) -> String {
        match self {
            Self::Auth { .. } => "auth not available".to_string(),
            Self::UnsupportedModel { .. } => "unsupported model".to_string(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
