//! Remote stack status
//!
//! Backends report status as upper-case codes (`CREATE_COMPLETE`,
//! `UPDATE_ROLLBACK_IN_PROGRESS`, ...). They are folded into the smaller set of
//! states the orchestrator reasons about.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a stack as reported by the backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum RemoteStatus {
    /// The stack does not exist
    Absent,
    CreateComplete,
    CreateFailed,
    UpdateComplete,
    UpdateFailed,
    /// An update failed and was rolled back; the previous state is live
    UpdateRollbackComplete,
    /// Created from a change set that was never executed
    ReviewInProgress,
    /// A failed create was rolled back; nothing usable remains
    RollbackComplete,
    RollbackFailed,
    DeleteFailed,
    /// Any `*_IN_PROGRESS` transition
    InProgress,
    /// A code this crate does not recognise
    Unknown(String),
}

impl RemoteStatus {
    /// Parse a backend status code
    pub fn from_code(code: &str) -> Self {
        match code {
            "" | "ABSENT" | "DELETE_COMPLETE" => RemoteStatus::Absent,
            "CREATE_COMPLETE" => RemoteStatus::CreateComplete,
            "CREATE_FAILED" => RemoteStatus::CreateFailed,
            "UPDATE_COMPLETE" => RemoteStatus::UpdateComplete,
            "UPDATE_FAILED" | "UPDATE_ROLLBACK_FAILED" => RemoteStatus::UpdateFailed,
            "UPDATE_ROLLBACK_COMPLETE" => RemoteStatus::UpdateRollbackComplete,
            "REVIEW_IN_PROGRESS" => RemoteStatus::ReviewInProgress,
            "ROLLBACK_COMPLETE" => RemoteStatus::RollbackComplete,
            "ROLLBACK_FAILED" => RemoteStatus::RollbackFailed,
            "DELETE_FAILED" => RemoteStatus::DeleteFailed,
            other if other.ends_with("_IN_PROGRESS") => RemoteStatus::InProgress,
            other => RemoteStatus::Unknown(other.to_string()),
        }
    }

    /// Canonical code for this status
    pub fn code(&self) -> &str {
        match self {
            RemoteStatus::Absent => "ABSENT",
            RemoteStatus::CreateComplete => "CREATE_COMPLETE",
            RemoteStatus::CreateFailed => "CREATE_FAILED",
            RemoteStatus::UpdateComplete => "UPDATE_COMPLETE",
            RemoteStatus::UpdateFailed => "UPDATE_FAILED",
            RemoteStatus::UpdateRollbackComplete => "UPDATE_ROLLBACK_COMPLETE",
            RemoteStatus::ReviewInProgress => "REVIEW_IN_PROGRESS",
            RemoteStatus::RollbackComplete => "ROLLBACK_COMPLETE",
            RemoteStatus::RollbackFailed => "ROLLBACK_FAILED",
            RemoteStatus::DeleteFailed => "DELETE_FAILED",
            RemoteStatus::InProgress => "IN_PROGRESS",
            RemoteStatus::Unknown(code) => code,
        }
    }

    /// True while the backend is still transitioning the stack
    pub fn is_in_progress(&self) -> bool {
        matches!(self, RemoteStatus::InProgress)
    }

    /// True for statuses where the stack is live and can be updated
    pub fn is_complete(&self) -> bool {
        matches!(
            self,
            RemoteStatus::CreateComplete
                | RemoteStatus::UpdateComplete
                | RemoteStatus::UpdateRollbackComplete
        )
    }

    /// True for terminal statuses that leave a broken remnant behind
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            RemoteStatus::CreateFailed
                | RemoteStatus::UpdateFailed
                | RemoteStatus::ReviewInProgress
                | RemoteStatus::RollbackComplete
                | RemoteStatus::RollbackFailed
                | RemoteStatus::DeleteFailed
        )
    }

    pub fn exists(&self) -> bool {
        !matches!(self, RemoteStatus::Absent)
    }
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl From<RemoteStatus> for String {
    fn from(status: RemoteStatus) -> Self {
        status.code().to_string()
    }
}

impl From<String> for RemoteStatus {
    fn from(code: String) -> Self {
        RemoteStatus::from_code(&code)
    }
}
