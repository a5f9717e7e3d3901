//! Stackflow core
//!
//! Turns a project of stack configuration files into a dependency graph,
//! compiles a command against part of that graph into ordered batches, and
//! runs the batches against a [`StackBackend`].
//!
//! ```text
//! config/**/*.yaml ──load──▶ Vec<StackConfig> ──build_graph──▶ StackGraph
//!                                                                 │
//!                                                   compile_plan(command, path)
//!                                                                 ▼
//!                 PlanResult ◀──execute── Executor ◀──────────── Plan
//! ```

pub mod command;
pub mod context;
pub mod diff;
pub mod discovery;
pub mod error;
pub mod executor;
pub mod graph;
pub mod launch;
pub mod loader;
pub mod model;
pub mod plan;
pub mod resolver;
pub mod result;
pub mod stack;
pub mod template;

pub use command::{Command, Direction, Scope};
pub use context::ExecutionContext;
pub use diff::Differ;
pub use discovery::{DiscoveredStack, discover_stacks, find_project_root, find_project_root_from};
pub use error::{ErrorKind, Result, StackflowError};
pub use executor::Executor;
pub use graph::StackGraph;
pub use launch::{LaunchAction, decide};
pub use loader::load_stack_configs;
pub use model::{Accessor, ParamValue, ResolverRef, StackConfig, StackId};
pub use plan::{Batch, Plan};
pub use resolver::ResolverCache;
pub use result::{ActionOutput, PlanResult, PlanSummary, SkipReason, StackDiff, StackOutcome};
pub use stack::Stack;
pub use template::{TemplateProcessor, Variables};

use stackflow_cloud::StackBackend;
use std::sync::Arc;

/// Build and validate the dependency graph of a whole project
pub fn build_graph(configs: Vec<StackConfig>) -> Result<StackGraph> {
    StackGraph::build(configs)
}

/// Compile `command` against the stacks addressed by `path`
pub fn compile_plan(
    graph: Arc<StackGraph>,
    command: Command,
    path: &str,
    ignore_dependencies: bool,
) -> Result<Plan> {
    Plan::compile(graph, command, path, ignore_dependencies)
}

/// Run a compiled plan; per-stack failures are reported in the result
pub async fn execute(
    plan: &Plan,
    backend: Arc<dyn StackBackend>,
    ctx: &ExecutionContext,
) -> PlanResult {
    Executor::new(backend, ctx).run(plan).await
}
