//! Error taxonomy shared by every stage.
//!
//! Raw failures from collaborators arrive as [`ServiceError`]. They are
//! classified into an [`AgentError`] whose [`ErrorCategory`] decides
//! whether the calling stage retries and is recorded on the incident when
//! the stage gives up.

use serde::{Deserialize, Serialize};

/// Category recorded as `error_category` on failure transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Network failure or timeout talking to a collaborator.
    Connectivity,
    /// The tool session could not be initialized.
    ServiceInit,
    /// Throttling, service unavailable, or model timeout.
    Transient,
    /// The caller is not authorized.
    Auth,
    /// Local schema validation failure.
    Validation,
    /// Anything unrecognized.
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Connectivity => "connectivity",
            ErrorCategory::ServiceInit => "service_init",
            ErrorCategory::Transient => "transient",
            ErrorCategory::Auth => "auth",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Unknown => "unknown",
        }
    }

    /// Returns true if a failed call in this category may be attempted again.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorCategory::Connectivity | ErrorCategory::ServiceInit | ErrorCategory::Transient
        )
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw failure raised by the reasoning service or a tool transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("tool session initialization failed: {0}")]
    Init(String),

    /// A structured error returned by a remote API, identified by its code.
    #[error("{code}: {message}")]
    Api { code: String, message: String },

    #[error("{0}")]
    Other(String),
}

impl ServiceError {
    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// A classified failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("[{category}] {message}")]
pub struct AgentError {
    pub category: ErrorCategory,
    pub message: String,
}

impl AgentError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

const AUTH_CODES: &[&str] = &["AccessDeniedException", "UnauthorizedException"];
const TRANSIENT_CODES: &[&str] = &[
    "ThrottlingException",
    "ServiceUnavailableException",
    "ModelTimeoutException",
];

/// Maps a raw service failure onto the error taxonomy.
pub fn classify(err: &ServiceError) -> AgentError {
    let category = match err {
        ServiceError::Timeout(_) | ServiceError::Connection(_) => ErrorCategory::Connectivity,
        ServiceError::Init(_) => ErrorCategory::ServiceInit,
        ServiceError::Api { code, .. } if AUTH_CODES.contains(&code.as_str()) => {
            ErrorCategory::Auth
        }
        ServiceError::Api { code, .. } if TRANSIENT_CODES.contains(&code.as_str()) => {
            ErrorCategory::Transient
        }
        ServiceError::Api { .. } | ServiceError::Other(_) => ErrorCategory::Unknown,
    };
    AgentError::new(category, err.to_string())
}

impl From<ServiceError> for AgentError {
    fn from(err: ServiceError) -> Self {
        classify(&err)
    }
}
