//! File-backed backend
//!
//! Deploys stacks into the project's `.stackflow/state.json`. Templates are
//! YAML (or JSON) documents with optional `Description`, `Parameters` and
//! `Outputs` sections; outputs may reference parameters with `${Name}` or
//! `{ Ref: Name }`. Every request settles immediately.

use crate::action::UpdateOutcome;
use crate::error::{BackendError, Result};
use crate::provider::{Deployment, StackBackend, TemplateSummary};
use crate::state::{Ledger, StackRecord, StateStore};
use crate::status::RemoteStatus;
use async_trait::async_trait;
use regex::Regex;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z0-9_]+)\}").expect("valid placeholder pattern"));

/// Backend storing stacks in a local state file
pub struct LocalBackend {
    state: StateStore,
    // Serialises state access between concurrent workers in this process
    guard: Mutex<()>,
}

impl LocalBackend {
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            state: StateStore::new(project_root),
            guard: Mutex::new(()),
        }
    }

    async fn read_state(&self) -> Result<Ledger> {
        let _guard = self.guard.lock().await;
        self.state.load().await
    }

    /// Run a mutation under the state lock and persist it on success
    async fn with_state<T>(
        &self,
        mutate: impl FnOnce(&mut Ledger) -> Result<T>,
    ) -> Result<T> {
        let _guard = self.guard.lock().await;
        let lock = self.state.lock().await?;
        let mut state = self.state.load().await?;

        let result = mutate(&mut state);
        if result.is_ok() {
            self.state.save(&state).await?;
        }
        lock.release().await?;
        result
    }

    async fn record(&self, stack_name: &str) -> Result<StackRecord> {
        self.read_state()
            .await?
            .get(stack_name)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(stack_name.to_string()))
    }
}

#[async_trait]
impl StackBackend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    async fn describe_status(&self, stack_name: &str) -> Result<RemoteStatus> {
        let state = self.read_state().await?;
        Ok(state
            .get(stack_name)
            .map(|r| r.status.clone())
            .unwrap_or(RemoteStatus::Absent))
    }

    async fn create(&self, stack_name: &str, deployment: &Deployment) -> Result<()> {
        let template = ParsedTemplate::parse(&deployment.template_body)?;

        self.with_state(|state| {
            if state.get(stack_name).is_some() {
                return Err(BackendError::api(
                    409,
                    format!("Stack [{}] already exists", stack_name),
                ));
            }

            let mut record =
                StackRecord::new(RemoteStatus::CreateComplete, &deployment.template_body);
            record.parameters = deployment.parameters.clone();
            record.tags = deployment.tags.clone();

            let missing = template.missing_parameters(&deployment.parameters);
            if missing.is_empty() {
                record.outputs = template.render_outputs(&deployment.parameters);
                info!(stack = stack_name, outputs = record.outputs.len(), "Created stack");
            } else {
                warn!(stack = stack_name, missing = ?missing, "Create failed: parameters without values");
                record.touch(RemoteStatus::CreateFailed);
            }

            state.insert(stack_name, record);
            Ok(())
        })
        .await
    }

    async fn update(&self, stack_name: &str, deployment: &Deployment) -> Result<UpdateOutcome> {
        let template = ParsedTemplate::parse(&deployment.template_body)?;

        self.with_state(|state| {
            let mut record = state
                .get(stack_name)
                .cloned()
                .ok_or_else(|| BackendError::NotFound(stack_name.to_string()))?;

            if !record.status.is_complete() {
                return Err(BackendError::api(
                    400,
                    format!(
                        "Stack [{}] is in {} state and can not be updated",
                        stack_name, record.status
                    ),
                ));
            }

            if record.template_body == deployment.template_body
                && record.parameters == deployment.parameters
                && record.tags == deployment.tags
            {
                debug!(stack = stack_name, "No updates are to be performed");
                return Ok(UpdateOutcome::NoChanges);
            }

            let missing = template.missing_parameters(&deployment.parameters);
            if missing.is_empty() {
                record.template_body = deployment.template_body.clone();
                record.parameters = deployment.parameters.clone();
                record.tags = deployment.tags.clone();
                record.outputs = template.render_outputs(&deployment.parameters);
                record.touch(RemoteStatus::UpdateComplete);
                info!(stack = stack_name, "Updated stack");
            } else {
                warn!(stack = stack_name, missing = ?missing, "Update rolled back: parameters without values");
                record.touch(RemoteStatus::UpdateRollbackComplete);
            }

            state.insert(stack_name, record);
            Ok(UpdateOutcome::Updated)
        })
        .await
    }

    async fn delete(&self, stack_name: &str) -> Result<()> {
        self.with_state(|state| {
            if state.remove(stack_name).is_some() {
                info!(stack = stack_name, "Deleted stack");
            } else {
                debug!(stack = stack_name, "Stack does not exist, nothing to delete");
            }
            Ok(())
        })
        .await
    }

    async fn get_template(&self, stack_name: &str) -> Result<String> {
        Ok(self.record(stack_name).await?.template_body)
    }

    async fn get_outputs(&self, stack_name: &str) -> Result<BTreeMap<String, String>> {
        Ok(self.record(stack_name).await?.outputs)
    }

    async fn get_parameters(&self, stack_name: &str) -> Result<BTreeMap<String, String>> {
        Ok(self.record(stack_name).await?.parameters)
    }

    async fn validate_template(&self, template_body: &str) -> Result<TemplateSummary> {
        let template = ParsedTemplate::parse(template_body)?;
        Ok(TemplateSummary {
            description: template.description,
            parameters: template.parameters.keys().cloned().collect(),
        })
    }

    async fn estimate_cost(&self, stack_name: &str, _deployment: &Deployment) -> Result<String> {
        Err(BackendError::Unsupported(format!(
            "cost estimation for {}",
            stack_name
        )))
    }
}

/// The parts of a template the local backend understands
#[derive(Debug)]
struct ParsedTemplate {
    description: Option<String>,
    /// Parameter name -> default value
    parameters: BTreeMap<String, Option<String>>,
    outputs: Mapping,
}

impl ParsedTemplate {
    fn parse(body: &str) -> Result<Self> {
        let document: Value = serde_yaml::from_str(body)
            .map_err(|e| BackendError::api(400, format!("Template format error: {}", e)))?;
        let Value::Mapping(root) = document else {
            return Err(BackendError::api(
                400,
                "Template format error: template must be a mapping",
            ));
        };

        let description = root
            .get("Description")
            .and_then(scalar_to_string);

        let mut parameters = BTreeMap::new();
        if let Some(Value::Mapping(declared)) = root.get("Parameters") {
            for (name, spec) in declared {
                let Some(name) = name.as_str() else {
                    continue;
                };
                let default = spec.get("Default").and_then(scalar_to_string);
                parameters.insert(name.to_string(), default);
            }
        }

        let outputs = match root.get("Outputs") {
            Some(Value::Mapping(outputs)) => outputs.clone(),
            _ => Mapping::new(),
        };

        Ok(Self {
            description,
            parameters,
            outputs,
        })
    }

    fn missing_parameters(&self, provided: &BTreeMap<String, String>) -> Vec<String> {
        self.parameters
            .iter()
            .filter(|(name, default)| default.is_none() && !provided.contains_key(*name))
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn render_outputs(&self, provided: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut values: BTreeMap<String, String> = self
            .parameters
            .iter()
            .filter_map(|(k, v)| v.clone().map(|v| (k.clone(), v)))
            .collect();
        values.extend(provided.clone());

        let mut rendered = BTreeMap::new();
        for (key, entry) in &self.outputs {
            let Some(key) = key.as_str() else {
                continue;
            };
            let value = match entry {
                Value::Mapping(m) => m.get("Value").unwrap_or(entry),
                other => other,
            };
            rendered.insert(key.to_string(), render_value(value, &values));
        }
        rendered
    }
}

fn render_value(value: &Value, parameters: &BTreeMap<String, String>) -> String {
    if let Some(reference) = value.get("Ref").and_then(Value::as_str) {
        return parameters.get(reference).cloned().unwrap_or_default();
    }

    match scalar_to_string(value) {
        Some(text) => PLACEHOLDER
            .replace_all(&text, |caps: &regex::Captures| {
                parameters.get(&caps[1]).cloned().unwrap_or_default()
            })
            .into_owned(),
        None => serde_json::to_string(value).unwrap_or_default(),
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}
