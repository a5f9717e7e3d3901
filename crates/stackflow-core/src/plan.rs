//! Plan compilation
//!
//! A plan is the ordered list of batches a command runs through. Each batch
//! is the set of not-yet-scheduled stacks whose required predecessors are all
//! scheduled in earlier batches (a layered topological sort), so stacks in one
//! batch never depend on each other.

use crate::command::{Command, Direction, Scope};
use crate::error::{Result, StackflowError};
use crate::graph::StackGraph;
use crate::model::StackId;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Stacks that may run concurrently
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Batch {
    /// Position in the plan, starting at 0
    pub index: usize,
    pub stacks: BTreeSet<StackId>,
}

/// Compiled, read-only plan for one command
#[derive(Debug, Clone)]
pub struct Plan {
    command: Command,
    batches: Vec<Batch>,
    /// Full project graph; resolvers may reference stacks outside the plan
    graph: Arc<StackGraph>,
    members: BTreeSet<StackId>,
    ignore_dependencies: bool,
}

impl Plan {
    /// Compile `command` against the stacks addressed by `path`
    #[instrument(skip(graph), fields(stacks = graph.len()))]
    pub fn compile(
        graph: Arc<StackGraph>,
        command: Command,
        path: &str,
        ignore_dependencies: bool,
    ) -> Result<Plan> {
        let targets = graph.select(path)?;

        if ignore_dependencies {
            info!(
                stacks = targets.len(),
                "Ignoring dependencies, scheduling a single batch"
            );
            return Ok(Plan {
                command,
                batches: vec![Batch {
                    index: 0,
                    stacks: targets.clone(),
                }],
                graph,
                members: targets,
                ignore_dependencies,
            });
        }

        let members = match command.scope() {
            Scope::WithUpstream => graph.upstream_closure(&targets),
            Scope::WithDependents => graph.downstream_closure(&targets),
            Scope::TargetsOnly => targets,
        };

        let mut plan = Plan {
            command,
            batches: Vec::new(),
            graph,
            members,
            ignore_dependencies,
        };
        plan.batches = plan.layer()?;

        debug!(
            command = %command,
            batches = plan.batches.len(),
            stacks = plan.members.len(),
            "Compiled plan"
        );
        Ok(plan)
    }

    fn layer(&self) -> Result<Vec<Batch>> {
        let mut remaining: BTreeMap<&StackId, usize> = self
            .members
            .iter()
            .map(|id| (id, self.predecessors(id).len()))
            .collect();
        let mut batches = Vec::new();

        while !remaining.is_empty() {
            let ready: BTreeSet<StackId> = remaining
                .iter()
                .filter(|(_, pending)| **pending == 0)
                .map(|(id, _)| (*id).clone())
                .collect();

            if ready.is_empty() {
                // Unreachable for a graph validated acyclic
                return Err(StackflowError::CircularDependency {
                    cycle: remaining.keys().map(|id| (*id).clone()).collect(),
                });
            }

            for id in &ready {
                remaining.remove(id);
                for successor in self.successors(id) {
                    if let Some(pending) = remaining.get_mut(successor) {
                        *pending -= 1;
                    }
                }
            }

            batches.push(Batch {
                index: batches.len(),
                stacks: ready,
            });
        }

        Ok(batches)
    }

    /// Plan members that must finish before `id` may run
    pub fn predecessors(&self, id: &StackId) -> Vec<&StackId> {
        if self.ignore_dependencies {
            return Vec::new();
        }
        let edges: Vec<&StackId> = match self.command.direction() {
            Direction::DependencyFirst => self.graph.upstream_of(id).collect(),
            Direction::DependentFirst => self.graph.downstream_of(id).collect(),
        };
        edges
            .into_iter()
            .filter(|p| self.members.contains(*p))
            .collect()
    }

    fn successors(&self, id: &StackId) -> Vec<&StackId> {
        let edges: Vec<&StackId> = match self.command.direction() {
            Direction::DependencyFirst => self.graph.downstream_of(id).collect(),
            Direction::DependentFirst => self.graph.upstream_of(id).collect(),
        };
        edges
            .into_iter()
            .filter(|s| self.members.contains(*s))
            .collect()
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    pub fn graph(&self) -> &Arc<StackGraph> {
        &self.graph
    }

    /// Whether `id` is scheduled by this plan
    pub fn contains(&self, id: &StackId) -> bool {
        self.members.contains(id)
    }

    pub fn members(&self) -> &BTreeSet<StackId> {
        &self.members
    }

    pub fn ignores_dependencies(&self) -> bool {
        self.ignore_dependencies
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StackConfig;

    fn stack(id: &str, deps: &[&str]) -> StackConfig {
        deps.iter()
            .fold(StackConfig::new(id, format!("{id}.yaml")), |c, d| c.with_dependency(*d))
    }

    fn graph(stacks: Vec<StackConfig>) -> Arc<StackGraph> {
        Arc::new(StackGraph::build(stacks).unwrap())
    }

    fn batch_names(plan: &Plan) -> Vec<Vec<&str>> {
        plan.batches()
            .iter()
            .map(|b| b.stacks.iter().map(StackId::as_str).collect())
            .collect()
    }

    fn chain() -> Arc<StackGraph> {
        graph(vec![
            stack("net", &[]),
            stack("app", &["net"]),
            stack("cache", &["app"]),
        ])
    }

    #[test]
    fn test_launch_chain_batches() {
        let plan = Plan::compile(chain(), Command::Launch, ".", false).unwrap();
        assert_eq!(batch_names(&plan), vec![vec!["net"], vec!["app"], vec!["cache"]]);
    }

    #[test]
    fn test_delete_reverses_order() {
        let plan = Plan::compile(chain(), Command::Delete, ".", false).unwrap();
        assert_eq!(batch_names(&plan), vec![vec!["cache"], vec!["app"], vec!["net"]]);
    }

    #[test]
    fn test_independent_stacks_share_a_batch() {
        let g = graph(vec![stack("db", &[]), stack("queue", &[])]);
        let plan = Plan::compile(g, Command::Launch, ".", false).unwrap();
        assert_eq!(batch_names(&plan), vec![vec!["db", "queue"]]);
    }

    #[test]
    fn test_diamond() {
        let g = graph(vec![
            stack("vpc", &[]),
            stack("subnet-a", &["vpc"]),
            stack("subnet-b", &["vpc"]),
            stack("lb", &["subnet-a", "subnet-b"]),
        ]);
        let plan = Plan::compile(g, Command::Create, ".", false).unwrap();
        assert_eq!(
            batch_names(&plan),
            vec![vec!["vpc"], vec!["subnet-a", "subnet-b"], vec!["lb"]]
        );
    }

    #[test]
    fn test_launch_pulls_in_upstream() {
        let plan = Plan::compile(chain(), Command::Launch, "app", false).unwrap();
        assert_eq!(batch_names(&plan), vec![vec!["net"], vec!["app"]]);
    }

    #[test]
    fn test_delete_pulls_in_dependents() {
        let plan = Plan::compile(chain(), Command::Delete, "app", false).unwrap();
        assert_eq!(batch_names(&plan), vec![vec!["cache"], vec!["app"]]);
    }

    #[test]
    fn test_read_only_commands_run_targets_only() {
        let plan = Plan::compile(chain(), Command::Diff, "app", false).unwrap();
        assert_eq!(batch_names(&plan), vec![vec!["app"]]);
        assert!(plan.predecessors(&"app".into()).is_empty());
    }

    #[test]
    fn test_ignore_dependencies_single_batch() {
        let plan = Plan::compile(chain(), Command::Launch, ".", true).unwrap();
        assert_eq!(batch_names(&plan), vec![vec!["app", "cache", "net"]]);
        assert!(plan.predecessors(&"cache".into()).is_empty());
    }

    #[test]
    fn test_every_member_scheduled_once_after_its_upstream() {
        let g = graph(vec![
            stack("a", &[]),
            stack("b", &["a"]),
            stack("c", &["a"]),
            stack("d", &["b", "c"]),
            stack("e", &[]),
            stack("f", &["e", "d"]),
        ]);
        let plan = Plan::compile(g.clone(), Command::Update, ".", false).unwrap();

        let mut position = BTreeMap::new();
        for batch in plan.batches() {
            for id in &batch.stacks {
                assert!(position.insert(id.clone(), batch.index).is_none());
            }
        }
        assert_eq!(position.len(), g.len());
        for id in g.ids() {
            for dep in g.upstream_of(id) {
                assert!(position[dep] < position[id], "{dep} must precede {id}");
            }
        }
    }

    #[test]
    fn test_config_file_path_selects_stack() {
        let g = graph(vec![stack("network/vpc", &[]), stack("app/web", &["network/vpc"])]);
        let plan = Plan::compile(g, Command::Launch, "network/vpc.yaml", false).unwrap();
        assert_eq!(batch_names(&plan), vec![vec!["network/vpc"]]);
    }

    #[test]
    fn test_unknown_path() {
        assert!(matches!(
            Plan::compile(chain(), Command::Launch, "nope", false),
            Err(StackflowError::NoStacksMatched(_))
        ));
    }
}
