//! Action types for stack mutations

use crate::status::RemoteStatus;
use serde::{Deserialize, Serialize};

/// Type of mutation applied to a stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Create a new stack
    Create,
    /// Update an existing stack
    Update,
    /// Delete a stack
    Delete,
    /// No changes needed
    NoOp,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::Create => write!(f, "create"),
            ActionType::Update => write!(f, "update"),
            ActionType::Delete => write!(f, "delete"),
            ActionType::NoOp => write!(f, "no-op"),
        }
    }
}

/// Result of an update request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateOutcome {
    /// The backend accepted changes and started an update
    Updated,
    /// Template, parameters and tags already match the live stack
    NoChanges,
}

/// What happened to a stack after a mutating action settled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    /// Actions performed, in order (a relaunch records `delete` then `create`)
    pub actions: Vec<ActionType>,

    /// Status the stack settled in
    pub final_status: RemoteStatus,
}

impl ApplyOutcome {
    pub fn new(action: ActionType, final_status: RemoteStatus) -> Self {
        Self {
            actions: vec![action],
            final_status,
        }
    }

    pub fn then(mut self, action: ActionType, final_status: RemoteStatus) -> Self {
        self.actions.push(action);
        self.final_status = final_status;
        self
    }

    /// True when nothing was changed remotely
    pub fn is_noop(&self) -> bool {
        self.actions.iter().all(|a| *a == ActionType::NoOp)
    }
}

impl std::fmt::Display for ApplyOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let actions: Vec<String> = self.actions.iter().map(|a| a.to_string()).collect();
        write!(f, "{} ({})", actions.join(" + "), self.final_status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relaunch_outcome_display() {
        let outcome = ApplyOutcome::new(ActionType::Delete, RemoteStatus::Absent)
            .then(ActionType::Create, RemoteStatus::CreateComplete);
        assert_eq!(outcome.to_string(), "delete + create (CREATE_COMPLETE)");
        assert!(!outcome.is_noop());
    }

    #[test]
    fn test_noop_outcome() {
        let outcome = ApplyOutcome::new(ActionType::NoOp, RemoteStatus::UpdateComplete);
        assert!(outcome.is_noop());
    }
}
