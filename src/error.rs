use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrintdError {
    #[error("Renderer pool exhausted: {waiting} requests already waiting")]
    PoolExhausted { waiting: usize },

    #[error("Timed out after {0:?} waiting for a renderer")]
    AcquireTimeout(Duration),

    #[error("Renderer pool is closed")]
    PoolClosed,

    #[error("Failed to start renderer: {0}")]
    CreateFailed(String),

    #[error("Failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("Content did not finish loading within {0:?}")]
    LoadTimeout(Duration),

    #[error("Failed to load content: {0}")]
    Load(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PrintdError {
    pub fn fetch(url: impl Into<String>, reason: impl Into<String>) -> Self {
        PrintdError::Fetch {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn render(message: impl Into<String>) -> Self {
        PrintdError::Render(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        PrintdError::Validation(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        PrintdError::Config(message.into())
    }

    /// The underlying failure detail, without the variant prefix.
    pub fn reason(&self) -> String {
        match self {
            PrintdError::Fetch { reason, .. } => reason.clone(),
            PrintdError::Load(msg)
            | PrintdError::Render(msg)
            | PrintdError::Validation(msg)
            | PrintdError::Config(msg)
            | PrintdError::CreateFailed(msg) => msg.clone(),
            other => other.to_string(),
        }
    }

    /// Whether the failure happened while acquiring a remote address.
    pub fn is_fetch_failure(&self) -> bool {
        matches!(self, PrintdError::Fetch { .. })
    }

    pub fn to_payload(&self) -> ErrorPayload {
        match self {
            PrintdError::PoolExhausted { .. } => ErrorPayload::new(
                ErrorCategory::Pool,
                self.to_string(),
                "Raise --max-waiting-clients or --pool-max, or retry once load drops.",
            ),
            PrintdError::AcquireTimeout(_) => ErrorPayload::new(
                ErrorCategory::Pool,
                self.to_string(),
                "Increase --acquire-timeout-ms or the pool size; renderers are all busy.",
            ),
            PrintdError::PoolClosed => ErrorPayload::new(
                ErrorCategory::Pool,
                self.to_string(),
                "The service is shutting down; retry against a running instance.",
            ),
            PrintdError::CreateFailed(_) => ErrorPayload::new(
                ErrorCategory::Pool,
                self.to_string(),
                "Check that Chromium is installed, or point --browser-path / PRINTD_BROWSER_PATH at it.",
            ),
            PrintdError::Fetch { .. } => ErrorPayload::new(
                ErrorCategory::Fetch,
                self.to_string(),
                "Verify the URL resolves and is reachable (http/https only).",
            ),
            PrintdError::LoadTimeout(_) | PrintdError::Load(_) => ErrorPayload::new(
                ErrorCategory::Render,
                self.to_string(),
                "Increase the `timeout` option or reduce external resources in the markup.",
            ),
            PrintdError::Render(_) => ErrorPayload::new(
                ErrorCategory::Render,
                self.to_string(),
                "Check page ranges, margins and templates in the options.",
            ),
            PrintdError::Validation(_) => ErrorPayload::new(
                ErrorCategory::Validation,
                self.to_string(),
                "Provide exactly one of html or url, and valid options.",
            ),
            PrintdError::Config(_) => ErrorPayload::new(
                ErrorCategory::Config,
                self.to_string(),
                "Check the config file, PRINTD_* environment variables and CLI flags.",
            ),
            PrintdError::Io(e) => ErrorPayload::new(
                ErrorCategory::Io,
                e.to_string(),
                "Check file paths/permissions.",
            ),
            PrintdError::Serialization(e) => ErrorPayload::new(
                ErrorCategory::Validation,
                e.to_string(),
                "Check the JSON options file.",
            ),
        }
    }
}

pub type Result<T> = std::result::Result<T, PrintdError>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Pool,
    Fetch,
    Render,
    Validation,
    Config,
    Io,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub category: ErrorCategory,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

impl ErrorPayload {
    pub fn new(category: ErrorCategory, message: String, remediation: impl Into<String>) -> Self {
        Self {
            category,
            message,
            remediation: Some(remediation.into()),
        }
    }
}
