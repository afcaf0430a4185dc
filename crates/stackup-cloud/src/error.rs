//! Cloud provider error types

use crate::resource::ResourceKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How the orchestrator reacts to a provider error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Expected during lookups and teardown, never fatal
    NotFound,
    /// Name taken by a resource in an unexpected state
    Conflict,
    /// Rate limiting or eventual-consistency lag, retried with backoff
    Transient,
    /// Auth or configuration errors, abort immediately
    Fatal,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorClass::NotFound => write!(f, "not-found"),
            ErrorClass::Conflict => write!(f, "conflict"),
            ErrorClass::Transient => write!(f, "transient"),
            ErrorClass::Fatal => write!(f, "fatal"),
        }
    }
}

/// Cloud provider errors
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Resource not found: {kind} '{id}'")]
    NotFound { kind: ResourceKind, id: String },

    #[error("Resource conflict: {0}")]
    Conflict(String),

    #[error("Transient provider error: {0}")]
    Transient(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("State file error: {0}")]
    StateError(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    pub fn not_found(kind: ResourceKind, id: impl Into<String>) -> Self {
        CloudError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Classify this error into the orchestrator's taxonomy
    pub fn class(&self) -> ErrorClass {
        match self {
            CloudError::NotFound { .. } => ErrorClass::NotFound,
            CloudError::Conflict(_) => ErrorClass::Conflict,
            CloudError::Transient(_) | CloudError::Timeout(_) => ErrorClass::Transient,
            _ => ErrorClass::Fatal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.class() == ErrorClass::NotFound
    }

    /// Only provider-side transient errors are retried; our own wait timeouts are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CloudError::Transient(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CloudError::Cancelled(_))
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(
            CloudError::not_found(ResourceKind::KeyPair, "k").class(),
            ErrorClass::NotFound
        );
        assert_eq!(
            CloudError::Conflict("taken".into()).class(),
            ErrorClass::Conflict
        );
        assert_eq!(
            CloudError::Transient("throttled".into()).class(),
            ErrorClass::Transient
        );
        assert_eq!(
            CloudError::AccessDenied("no".into()).class(),
            ErrorClass::Fatal
        );
        assert_eq!(
            CloudError::Cancelled("ctrl-c".into()).class(),
            ErrorClass::Fatal
        );
    }

    #[test]
    fn test_only_provider_transients_retry() {
        assert!(CloudError::Transient("slow down".into()).is_retryable());
        assert!(!CloudError::Timeout("instance".into()).is_retryable());
        assert!(!CloudError::AuthenticationFailed("expired".into()).is_retryable());
    }
}
