use crate::model::StackId;
use serde::{Deserialize, Serialize};
use stackflow_cloud::BackendError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StackflowError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid stack configuration: {path}\nReason: {message}")]
    ConfigFile { path: PathBuf, message: String },

    #[error("Stack '{stack}' depends on unknown stack '{dependency}'")]
    UnknownDependency { stack: StackId, dependency: StackId },

    #[error("No stacks match path '{0}'")]
    NoStacksMatched(String),

    #[error("Stack '{stack}' is in unrecognised status '{status}'")]
    UnknownStatus { stack: StackId, status: String },

    #[error("Template error: {file}\nReason: {message}")]
    TemplateError { file: PathBuf, message: String },

    #[error("Template render error: {0}")]
    TemplateRenderError(String),

    #[error(
        "Project root not found\nSearched from: {0}\nHint: run inside a directory that contains config/"
    )]
    ProjectRootNotFound(PathBuf),

    #[error("Circular dependency detected: {}", format_cycle(.cycle))]
    CircularDependency { cycle: Vec<StackId> },

    #[error("Could not resolve {reference} for stack '{stack}': {reason}")]
    Resolution {
        stack: StackId,
        reference: String,
        reason: String,
    },

    #[error("Backend rejected action on stack '{stack}': {source}")]
    Provider {
        stack: StackId,
        #[source]
        source: BackendError,
    },

    #[error("Stack '{stack}' {action} ended in status {status}")]
    ActionFailed {
        stack: StackId,
        action: String,
        status: String,
    },

    #[error("Timed out waiting for stack '{stack}' after {waited_secs}s")]
    Timeout { stack: StackId, waited_secs: u64 },

    #[error("Stack '{0}' is protected; set 'protect: false' to modify it")]
    Protected(StackId),

    #[error("Settings error: {0}")]
    Settings(#[from] stackflow_config::ConfigError),

    #[error("File read error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Coarse classification of errors, used for reporting and exit handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    Dependency,
    Resolution,
    Provider,
    Timeout,
    Protected,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Config => "config",
            ErrorKind::Dependency => "dependency",
            ErrorKind::Resolution => "resolution",
            ErrorKind::Provider => "provider",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Protected => "protected",
        };
        f.write_str(name)
    }
}

impl StackflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StackflowError::CircularDependency { .. } => ErrorKind::Dependency,
            StackflowError::Resolution { .. } => ErrorKind::Resolution,
            StackflowError::Provider { .. } | StackflowError::ActionFailed { .. } => {
                ErrorKind::Provider
            }
            StackflowError::Timeout { .. } => ErrorKind::Timeout,
            StackflowError::Protected(_) => ErrorKind::Protected,
            _ => ErrorKind::Config,
        }
    }

    /// Wrap a backend error for a stack, keeping timeouts distinct
    pub fn backend(stack: &StackId, source: BackendError) -> Self {
        match source {
            BackendError::Timeout { waited_secs, .. } => StackflowError::Timeout {
                stack: stack.clone(),
                waited_secs,
            },
            source => StackflowError::Provider {
                stack: stack.clone(),
                source,
            },
        }
    }
}

fn format_cycle(cycle: &[StackId]) -> String {
    cycle
        .iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}

pub type Result<T> = std::result::Result<T, StackflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_every_stack() {
        let err = StackflowError::CircularDependency {
            cycle: vec!["a".into(), "b".into(), "c".into(), "a".into()],
        };
        assert_eq!(
            err.to_string(),
            "Circular dependency detected: a -> b -> c -> a"
        );
        assert_eq!(err.kind(), ErrorKind::Dependency);
    }

    #[test]
    fn test_backend_timeout_is_distinct() {
        let stack = StackId::from("app");
        let timeout = StackflowError::backend(
            &stack,
            BackendError::Timeout {
                stack: "dev-app".into(),
                waited_secs: 30,
            },
        );
        assert_eq!(timeout.kind(), ErrorKind::Timeout);

        let rejected = StackflowError::backend(&stack, BackendError::api(400, "bad template"));
        assert_eq!(rejected.kind(), ErrorKind::Provider);
    }
}
