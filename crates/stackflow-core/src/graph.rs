//! Stack dependency graph
//!
//! Edges point from a stack to the stacks it depends on (its upstream).
//! They come from explicit `dependencies` and from resolver sources. The
//! graph is validated acyclic on construction and is immutable afterwards.

use crate::error::{Result, StackflowError};
use crate::model::{StackConfig, StackId};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::{debug, instrument};

#[derive(Debug, Clone, Default)]
pub struct StackGraph {
    stacks: BTreeMap<StackId, StackConfig>,
    /// stack -> stacks it depends on
    upstream: BTreeMap<StackId, BTreeSet<StackId>>,
    /// stack -> stacks depending on it
    downstream: BTreeMap<StackId, BTreeSet<StackId>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

impl StackGraph {
    /// Build the graph over the full set of project stacks
    ///
    /// Fails with `UnknownDependency` when an edge names a stack that does
    /// not exist, and with `CircularDependency` (carrying the cycle path)
    /// when the edges are not acyclic.
    #[instrument(skip(configs), fields(stacks = configs.len()))]
    pub fn build(configs: Vec<StackConfig>) -> Result<Self> {
        let mut stacks = BTreeMap::new();
        for config in configs {
            if let Some(previous) = stacks.insert(config.id.clone(), config) {
                return Err(StackflowError::InvalidConfig(format!(
                    "stack '{}' is defined twice",
                    previous.id
                )));
            }
        }

        let mut upstream: BTreeMap<StackId, BTreeSet<StackId>> = BTreeMap::new();
        let mut downstream: BTreeMap<StackId, BTreeSet<StackId>> = stacks
            .keys()
            .map(|id| (id.clone(), BTreeSet::new()))
            .collect();

        for (id, config) in &stacks {
            let deps = config.upstream();
            for dep in &deps {
                if !stacks.contains_key(dep) {
                    return Err(StackflowError::UnknownDependency {
                        stack: id.clone(),
                        dependency: dep.clone(),
                    });
                }
                if let Some(dependents) = downstream.get_mut(dep) {
                    dependents.insert(id.clone());
                }
            }
            upstream.insert(id.clone(), deps);
        }

        let graph = Self {
            stacks,
            upstream,
            downstream,
        };
        graph.check_acyclic()?;

        debug!(
            edges = graph.upstream.values().map(BTreeSet::len).sum::<usize>(),
            "Built stack graph"
        );
        Ok(graph)
    }

    fn check_acyclic(&self) -> Result<()> {
        let mut marks: BTreeMap<&StackId, Mark> = BTreeMap::new();
        let mut path: Vec<&StackId> = Vec::new();

        for id in self.stacks.keys() {
            if !marks.contains_key(id) {
                self.visit(id, &mut marks, &mut path)?;
            }
        }
        Ok(())
    }

    fn visit<'a>(
        &'a self,
        id: &'a StackId,
        marks: &mut BTreeMap<&'a StackId, Mark>,
        path: &mut Vec<&'a StackId>,
    ) -> Result<()> {
        marks.insert(id, Mark::InProgress);
        path.push(id);

        for dep in self.upstream_of(id) {
            match marks.get(dep) {
                Some(Mark::InProgress) => {
                    let start = path.iter().position(|p| *p == dep).unwrap_or(0);
                    let mut cycle: Vec<StackId> = path[start..].iter().map(|p| (*p).clone()).collect();
                    cycle.push(dep.clone());
                    return Err(StackflowError::CircularDependency { cycle });
                }
                Some(Mark::Done) => {}
                None => self.visit(dep, marks, path)?,
            }
        }

        path.pop();
        marks.insert(id, Mark::Done);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.stacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }

    pub fn contains(&self, id: &StackId) -> bool {
        self.stacks.contains_key(id)
    }

    pub fn get(&self, id: &StackId) -> Option<&StackConfig> {
        self.stacks.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &StackId> {
        self.stacks.keys()
    }

    pub fn stacks(&self) -> impl Iterator<Item = &StackConfig> {
        self.stacks.values()
    }

    /// Stacks `id` depends on directly
    pub fn upstream_of<'a>(&'a self, id: &StackId) -> impl Iterator<Item = &'a StackId> + use<'a> {
        self.upstream.get(id).into_iter().flatten()
    }

    /// Stacks depending on `id` directly
    pub fn downstream_of<'a>(&'a self, id: &StackId) -> impl Iterator<Item = &'a StackId> + use<'a> {
        self.downstream.get(id).into_iter().flatten()
    }

    /// Stacks addressed by `path`: one stack, a group prefix, or `.`
    pub fn select(&self, path: &str) -> Result<BTreeSet<StackId>> {
        let selected: BTreeSet<StackId> = self
            .stacks
            .keys()
            .filter(|id| id.is_within(path))
            .cloned()
            .collect();
        if selected.is_empty() {
            return Err(StackflowError::NoStacksMatched(path.to_string()));
        }
        Ok(selected)
    }

    /// `targets` plus every stack they transitively depend on
    pub fn upstream_closure(&self, targets: &BTreeSet<StackId>) -> BTreeSet<StackId> {
        closure(&self.upstream, targets)
    }

    /// `targets` plus every stack that transitively depends on them
    pub fn downstream_closure(&self, targets: &BTreeSet<StackId>) -> BTreeSet<StackId> {
        closure(&self.downstream, targets)
    }

    /// Induced subgraph of the stacks at `path` plus their upstream closure
    pub fn subgraph(&self, path: &str) -> Result<StackGraph> {
        let targets = self.select(path)?;
        Ok(self.induced(&self.upstream_closure(&targets)))
    }

    /// Induced subgraph over `ids`; edges leaving the set are dropped
    pub fn induced(&self, ids: &BTreeSet<StackId>) -> StackGraph {
        let keep = |id: &StackId| ids.contains(id);
        let stacks: BTreeMap<StackId, StackConfig> = self
            .stacks
            .iter()
            .filter(|(id, _)| keep(id))
            .map(|(id, config)| (id.clone(), config.clone()))
            .collect();
        let restrict = |edges: &BTreeMap<StackId, BTreeSet<StackId>>| -> BTreeMap<StackId, BTreeSet<StackId>> {
            edges
                .iter()
                .filter(|(id, _)| keep(id))
                .map(|(id, set)| (id.clone(), set.iter().filter(|d| keep(d)).cloned().collect()))
                .collect()
        };
        StackGraph {
            stacks,
            upstream: restrict(&self.upstream),
            downstream: restrict(&self.downstream),
        }
    }
}

fn closure(
    edges: &BTreeMap<StackId, BTreeSet<StackId>>,
    targets: &BTreeSet<StackId>,
) -> BTreeSet<StackId> {
    let mut seen: BTreeSet<StackId> = BTreeSet::new();
    let mut queue: VecDeque<&StackId> = targets.iter().collect();
    while let Some(id) = queue.pop_front() {
        if !seen.insert(id.clone()) {
            continue;
        }
        if let Some(next) = edges.get(id) {
            queue.extend(next.iter().filter(|n| !seen.contains(*n)));
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ParamValue, ResolverRef};

    fn stack(id: &str, deps: &[&str]) -> StackConfig {
        deps.iter()
            .fold(StackConfig::new(id, format!("{id}.yaml")), |c, d| c.with_dependency(*d))
    }

    fn ids(set: &BTreeSet<StackId>) -> Vec<&str> {
        set.iter().map(StackId::as_str).collect()
    }

    #[test]
    fn test_build_chain() {
        let graph = StackGraph::build(vec![
            stack("net", &[]),
            stack("app", &["net"]),
            stack("cache", &["app"]),
        ])
        .unwrap();

        assert_eq!(graph.len(), 3);
        let upstream: Vec<_> = graph.upstream_of(&"app".into()).collect();
        assert_eq!(upstream, vec![&StackId::from("net")]);
        let downstream: Vec<_> = graph.downstream_of(&"app".into()).collect();
        assert_eq!(downstream, vec![&StackId::from("cache")]);
    }

    #[test]
    fn test_resolver_creates_edge() {
        let app = StackConfig::new("app", "app.yaml").with_parameter(
            "VpcId",
            ParamValue::Resolver(ResolverRef::output("net", "VpcId")),
        );
        let graph = StackGraph::build(vec![stack("net", &[]), app]).unwrap();

        assert_eq!(graph.upstream_of(&"app".into()).count(), 1);
        assert_eq!(graph.downstream_of(&"net".into()).count(), 1);
    }

    #[test]
    fn test_unknown_dependency() {
        let err = StackGraph::build(vec![stack("app", &["missing"])]).unwrap_err();
        match err {
            StackflowError::UnknownDependency { stack, dependency } => {
                assert_eq!(stack.as_str(), "app");
                assert_eq!(dependency.as_str(), "missing");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_resolver_source() {
        let app = StackConfig::new("app", "app.yaml").with_parameter(
            "Name",
            ParamValue::Resolver(ResolverRef::external_name("ghost")),
        );
        assert!(matches!(
            StackGraph::build(vec![app]),
            Err(StackflowError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn test_cycle_reports_full_path() {
        let err = StackGraph::build(vec![
            stack("a", &["b"]),
            stack("b", &["c"]),
            stack("c", &["a"]),
            stack("d", &["a"]),
        ])
        .unwrap_err();

        match err {
            StackflowError::CircularDependency { cycle } => {
                let names: Vec<_> = cycle.iter().map(StackId::as_str).collect();
                assert_eq!(names, vec!["a", "b", "c", "a"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_self_cycle_via_resolver() {
        let a = StackConfig::new("a", "a.yaml").with_parameter(
            "Own",
            ParamValue::Resolver(ResolverRef::output("a", "Key")),
        );
        match StackGraph::build(vec![a]) {
            Err(StackflowError::CircularDependency { cycle }) => assert_eq!(cycle.len(), 2),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_subgraph_pulls_in_upstream() {
        let graph = StackGraph::build(vec![
            stack("network/vpc", &[]),
            stack("network/subnets", &["network/vpc"]),
            stack("app/web", &["network/subnets"]),
            stack("app/worker", &[]),
            stack("monitoring", &[]),
        ])
        .unwrap();

        let sub = graph.subgraph("app/web").unwrap();
        let members: BTreeSet<StackId> = sub.ids().cloned().collect();
        assert_eq!(ids(&members), vec!["app/web", "network/subnets", "network/vpc"]);

        let group = graph.select("app").unwrap();
        assert_eq!(ids(&group), vec!["app/web", "app/worker"]);
    }

    #[test]
    fn test_downstream_closure() {
        let graph = StackGraph::build(vec![
            stack("net", &[]),
            stack("app", &["net"]),
            stack("cache", &["app"]),
            stack("db", &[]),
        ])
        .unwrap();

        let targets = BTreeSet::from([StackId::from("net")]);
        assert_eq!(ids(&graph.downstream_closure(&targets)), vec!["app", "cache", "net"]);
    }

    #[test]
    fn test_select_nothing() {
        let graph = StackGraph::build(vec![stack("net", &[])]).unwrap();
        assert!(matches!(
            graph.select("app"),
            Err(StackflowError::NoStacksMatched(_))
        ));
    }

    #[test]
    fn test_induced_drops_outside_edges() {
        let graph = StackGraph::build(vec![stack("net", &[]), stack("app", &["net"])]).unwrap();
        let only_app = graph.induced(&BTreeSet::from([StackId::from("app")]));
        assert_eq!(only_app.len(), 1);
        assert_eq!(only_app.upstream_of(&"app".into()).count(), 0);
    }
}
