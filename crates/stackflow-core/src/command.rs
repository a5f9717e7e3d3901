use serde::{Deserialize, Serialize};
use std::fmt;

/// A command applied to every stack of a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Command {
    Create,
    Update,
    Launch,
    Delete,
    Generate,
    Validate,
    Diff,
    Describe,
    EstimateCost,
    FetchRemoteTemplate,
    StackName,
    ListOutputs,
}

/// Order in which a plan visits its stacks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// A stack runs after everything it depends on
    DependencyFirst,
    /// A stack runs after everything that depends on it
    DependentFirst,
}

/// Which stacks beyond the addressed ones a plan includes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    WithUpstream,
    WithDependents,
    TargetsOnly,
}

impl Command {
    pub const ALL: [Command; 12] = [
        Command::Create,
        Command::Update,
        Command::Launch,
        Command::Delete,
        Command::Generate,
        Command::Validate,
        Command::Diff,
        Command::Describe,
        Command::EstimateCost,
        Command::FetchRemoteTemplate,
        Command::StackName,
        Command::ListOutputs,
    ];

    pub fn direction(self) -> Direction {
        match self {
            Command::Delete => Direction::DependentFirst,
            _ => Direction::DependencyFirst,
        }
    }

    pub fn scope(self) -> Scope {
        match self {
            Command::Create | Command::Update | Command::Launch => Scope::WithUpstream,
            Command::Delete => Scope::WithDependents,
            _ => Scope::TargetsOnly,
        }
    }

    /// Whether the command changes remote state
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            Command::Create | Command::Update | Command::Launch | Command::Delete
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Command::Create => "create",
            Command::Update => "update",
            Command::Launch => "launch",
            Command::Delete => "delete",
            Command::Generate => "generate",
            Command::Validate => "validate",
            Command::Diff => "diff",
            Command::Describe => "describe",
            Command::EstimateCost => "estimate-cost",
            Command::FetchRemoteTemplate => "fetch-remote-template",
            Command::StackName => "stack-name",
            Command::ListOutputs => "list-outputs",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
