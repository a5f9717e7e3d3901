//! Launch decision
//!
//! `launch` is idempotent: the action it takes depends only on the stack's
//! current remote status.

use serde::Serialize;
use stackflow_cloud::RemoteStatus;
use std::fmt;

/// Low-level action chosen for a launch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchAction {
    Create,
    /// Tear down a failed remnant, wait for it to go, then create afresh
    DeleteThenCreate,
    /// "No changes" from the backend counts as success
    Update,
    /// Poll until the status settles, then decide again
    Wait,
    /// The status is not recognised; fail rather than guess
    Reject { status: String },
}

/// Map a remote status to the action a launch takes
///
/// Total over [`RemoteStatus`] and deterministic.
pub fn decide(status: &RemoteStatus) -> LaunchAction {
    match status {
        RemoteStatus::Absent => LaunchAction::Create,
        RemoteStatus::CreateComplete
        | RemoteStatus::UpdateComplete
        | RemoteStatus::UpdateRollbackComplete => LaunchAction::Update,
        RemoteStatus::CreateFailed
        | RemoteStatus::UpdateFailed
        | RemoteStatus::ReviewInProgress
        | RemoteStatus::RollbackComplete
        | RemoteStatus::RollbackFailed
        | RemoteStatus::DeleteFailed => LaunchAction::DeleteThenCreate,
        RemoteStatus::InProgress => LaunchAction::Wait,
        RemoteStatus::Unknown(code) => LaunchAction::Reject {
            status: code.clone(),
        },
    }
}

impl fmt::Display for LaunchAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchAction::Create => f.write_str("create"),
            LaunchAction::DeleteThenCreate => f.write_str("delete + create"),
            LaunchAction::Update => f.write_str("update"),
            LaunchAction::Wait => f.write_str("wait"),
            LaunchAction::Reject { status } => write!(f, "reject ({status})"),
        }
    }
}
