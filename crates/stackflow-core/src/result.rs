//! Per-stack and per-plan results

use crate::command::Command;
use crate::error::{ErrorKind, StackflowError};
use crate::model::StackId;
use crate::plan::Batch;
use serde::Serialize;
use stackflow_cloud::{ApplyOutcome, RemoteStatus, TemplateSummary};
use std::collections::BTreeMap;
use std::fmt;

/// Value produced by a successful per-stack action
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ActionOutput {
    /// create, update, launch, delete
    Applied(ApplyOutcome),
    Status(RemoteStatus),
    /// generate, fetch-remote-template
    Template(String),
    Diff(StackDiff),
    Validation(TemplateSummary),
    /// estimate-cost
    Url(String),
    /// stack-name
    Name(String),
    Outputs(BTreeMap<String, String>),
}

impl fmt::Display for ActionOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionOutput::Applied(outcome) => write!(f, "{outcome}"),
            ActionOutput::Status(status) => write!(f, "{status}"),
            ActionOutput::Template(body) => f.write_str(body.trim_end()),
            ActionOutput::Diff(diff) => write!(f, "{diff}"),
            ActionOutput::Validation(summary) => {
                write!(
                    f,
                    "valid: {}",
                    summary.description.as_deref().unwrap_or("(no description)")
                )?;
                if !summary.parameters.is_empty() {
                    write!(f, " [parameters: {}]", summary.parameters.join(", "))?;
                }
                Ok(())
            }
            ActionOutput::Url(url) => f.write_str(url),
            ActionOutput::Name(name) => f.write_str(name),
            ActionOutput::Outputs(outputs) => {
                let pairs: Vec<String> = outputs.iter().map(|(k, v)| format!("{k}={v}")).collect();
                f.write_str(&pairs.join(", "))
            }
        }
    }
}

/// One changed parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterChange {
    pub local: Option<String>,
    pub remote: Option<String>,
}

/// Drift between the generated stack and the deployed one
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StackDiff {
    pub deployed: bool,
    /// Template changes, remote -> local, in the chosen differ's format; empty when identical
    pub template: String,
    pub parameters: BTreeMap<String, ParameterChange>,
}

impl StackDiff {
    pub fn has_changes(&self) -> bool {
        !self.deployed || !self.template.is_empty() || !self.parameters.is_empty()
    }
}

impl fmt::Display for StackDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lines = Vec::new();
        if !self.deployed {
            lines.push("not deployed".to_string());
        } else if !self.has_changes() {
            return f.write_str("no difference");
        }
        if !self.template.is_empty() {
            lines.push(self.template.trim_end().to_string());
        }
        for (name, change) in &self.parameters {
            lines.push(format!(
                "{}: {} -> {}",
                name,
                change.remote.as_deref().unwrap_or("<unset>"),
                change.local.as_deref().unwrap_or("<unset>")
            ));
        }
        f.write_str(&lines.join("\n"))
    }
}

/// Why a stack was never dispatched
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "stack", rename_all = "snake_case")]
pub enum SkipReason {
    /// A stack it had to wait for failed or was skipped
    UpstreamFailed(StackId),
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UpstreamFailed(id) => write!(f, "upstream stack '{id}' did not succeed"),
            SkipReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Terminal outcome of one stack in a plan
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StackOutcome {
    Succeeded { value: ActionOutput },
    Failed { kind: ErrorKind, message: String },
    Skipped { reason: SkipReason },
}

impl StackOutcome {
    pub fn failed(error: &StackflowError) -> Self {
        StackOutcome::Failed {
            kind: error.kind(),
            message: error.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StackOutcome::Succeeded { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            StackOutcome::Succeeded { .. } => "succeeded",
            StackOutcome::Failed { .. } => "failed",
            StackOutcome::Skipped { .. } => "skipped",
        }
    }
}

/// Counts by outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Outcome of every stack in a plan, keyed by identity
#[derive(Debug, Clone, Serialize)]
pub struct PlanResult {
    pub command: Command,
    pub batches: Vec<Batch>,
    pub stacks: BTreeMap<StackId, StackOutcome>,
}

impl PlanResult {
    pub fn get(&self, id: &str) -> Option<&StackOutcome> {
        self.stacks.get(id)
    }

    /// True only when every stack succeeded
    pub fn is_success(&self) -> bool {
        self.stacks.values().all(StackOutcome::is_success)
    }

    pub fn summary(&self) -> PlanSummary {
        self.stacks
            .values()
            .fold(PlanSummary::default(), |mut summary, outcome| {
                match outcome {
                    StackOutcome::Succeeded { .. } => summary.succeeded += 1,
                    StackOutcome::Failed { .. } => summary.failed += 1,
                    StackOutcome::Skipped { .. } => summary.skipped += 1,
                }
                summary
            })
    }
}
