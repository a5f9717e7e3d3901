//! Resolver evaluation
//!
//! Resolvers are evaluated lazily while a plan runs. Outputs are fetched at
//! most once per source stack per run, so every stack sees the same values.
//! A source that the current run is going to change must have completed
//! successfully before anything resolves against it.

use crate::error::{Result, StackflowError};
use crate::graph::StackGraph;
use crate::model::{Accessor, ParamValue, ResolverRef, StackConfig, StackId, literal_to_string};
use stackflow_cloud::StackBackend;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::debug;

type Outputs = BTreeMap<String, String>;

/// Per-run memo of resolver sources
pub struct ResolverCache {
    backend: Arc<dyn StackBackend>,
    graph: Arc<StackGraph>,
    /// Sources this run changes; they must complete before being read
    pending: BTreeSet<StackId>,
    completed: RwLock<BTreeSet<StackId>>,
    outputs: Mutex<HashMap<StackId, Arc<OnceCell<Outputs>>>>,
}

impl ResolverCache {
    pub fn new(backend: Arc<dyn StackBackend>, graph: Arc<StackGraph>) -> Self {
        Self {
            backend,
            graph,
            pending: BTreeSet::new(),
            completed: RwLock::new(BTreeSet::new()),
            outputs: Mutex::new(HashMap::new()),
        }
    }

    /// Require these stacks to complete in this run before they are read
    pub fn with_pending(mut self, pending: BTreeSet<StackId>) -> Self {
        self.pending = pending;
        self
    }

    /// Record that a stack finished successfully in this run
    pub async fn mark_completed(&self, id: &StackId) {
        self.completed.write().await.insert(id.clone());
    }

    /// Evaluate one resolver on behalf of `stack`
    pub async fn resolve(&self, stack: &StackId, reference: &ResolverRef) -> Result<String> {
        let fail = |reason: String| StackflowError::Resolution {
            stack: stack.clone(),
            reference: reference.to_string(),
            reason,
        };

        let source = self
            .graph
            .get(&reference.source)
            .ok_or_else(|| fail(format!("stack '{}' does not exist", reference.source)))?;

        if self.pending.contains(&source.id) && !self.completed.read().await.contains(&source.id) {
            return Err(fail(format!(
                "stack '{}' has not completed in this run",
                source.id
            )));
        }

        match &reference.accessor {
            Accessor::ExternalName => Ok(source.external_name.clone()),
            Accessor::Output(key) => {
                let outputs = self.outputs_of(source).await.map_err(|e| fail(e.to_string()))?;
                outputs.get(key).cloned().ok_or_else(|| {
                    fail(format!(
                        "output '{}' not found on stack '{}'",
                        key, source.external_name
                    ))
                })
            }
        }
    }

    async fn outputs_of(&self, source: &StackConfig) -> stackflow_cloud::Result<Outputs> {
        let cell = {
            let mut cells = self.outputs.lock().await;
            cells.entry(source.id.clone()).or_default().clone()
        };
        let outputs = cell
            .get_or_try_init(|| async {
                debug!(stack = %source.id, "Fetching outputs for resolvers");
                self.backend.get_outputs(&source.external_name).await
            })
            .await?;
        Ok(outputs.clone())
    }

    /// Evaluate a parameter value to the string sent to the backend
    pub async fn resolve_value(&self, stack: &StackId, value: &ParamValue) -> Result<String> {
        match value {
            ParamValue::Literal(literal) => Ok(literal_to_string(literal)),
            ParamValue::Resolver(reference) => self.resolve(stack, reference).await,
            ParamValue::List(items) => {
                let mut parts = Vec::with_capacity(items.len());
                for leaf in leaves(items) {
                    parts.push(match leaf {
                        ParamValue::Resolver(reference) => self.resolve(stack, reference).await?,
                        ParamValue::Literal(literal) => literal_to_string(literal),
                        ParamValue::List(_) => continue,
                    });
                }
                Ok(parts.join(","))
            }
        }
    }

    /// Evaluate every parameter of a stack
    pub async fn resolve_parameters(&self, config: &StackConfig) -> Result<BTreeMap<String, String>> {
        let mut resolved = BTreeMap::new();
        for (key, value) in &config.parameters {
            resolved.insert(key.clone(), self.resolve_value(&config.id, value).await?);
        }
        Ok(resolved)
    }
}

/// Non-list values of a (possibly nested) list, in order
fn leaves(items: &[ParamValue]) -> Vec<&ParamValue> {
    items
        .iter()
        .flat_map(|item| match item {
            ParamValue::List(nested) => leaves(nested),
            other => vec![other],
        })
        .collect()
}
