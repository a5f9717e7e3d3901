//! Backend error types

use thiserror::Error;

/// Errors reported by a stack backend
#[derive(Error, Debug)]
pub enum BackendError {
    /// The backend rejected or failed the request
    #[error("backend error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Stack not found: {0}")]
    NotFound(String),

    #[error("Operation not supported by this backend: {0}")]
    Unsupported(String),

    #[error("Timed out after {waited_secs}s waiting for stack {stack} to settle")]
    Timeout { stack: String, waited_secs: u64 },

    #[error("State file error: {0}")]
    State(String),

    #[error("Lock acquisition failed: {0}")]
    Lock(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl BackendError {
    pub fn api(code: u16, message: impl Into<String>) -> Self {
        BackendError::Api {
            code,
            message: message.into(),
        }
    }

    /// Status code carried by the error, if the backend produced one
    pub fn status_code(&self) -> Option<u16> {
        match self {
            BackendError::Api { code, .. } => Some(*code),
            BackendError::NotFound(_) => Some(404),
            BackendError::Unsupported(_) => Some(501),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, BackendError::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, BackendError>;
