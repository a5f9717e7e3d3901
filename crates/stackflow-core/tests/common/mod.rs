use async_trait::async_trait;
use stackflow_cloud::{
    BackendError, Deployment, PollConfig, RemoteStatus, StackBackend, TemplateSummary,
    UpdateOutcome,
};
use stackflow_core::ExecutionContext;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub const TEMPLATE: &str = "stack.yaml";

/// In-memory backend driven by a per-stack script
#[derive(Default)]
pub struct MockBackend {
    statuses: Mutex<HashMap<String, RemoteStatus>>,
    outputs: Mutex<HashMap<String, BTreeMap<String, String>>>,
    deployed: Mutex<HashMap<String, Deployment>>,
    failing: Mutex<HashSet<String>>,
    cancel_on_create: Mutex<Option<(String, CancellationToken)>>,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Duration,
}

#[allow(dead_code)]
impl MockBackend {
    pub fn new() -> Self {
        Self {
            delay: Duration::from_millis(30),
            ..Default::default()
        }
    }

    pub fn with_status(self, stack: &str, status: RemoteStatus) -> Self {
        self.statuses.lock().unwrap().insert(stack.to_string(), status);
        self
    }

    /// Outputs the stack exposes once created
    pub fn with_outputs(self, stack: &str, outputs: &[(&str, &str)]) -> Self {
        let outputs = outputs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.outputs.lock().unwrap().insert(stack.to_string(), outputs);
        self
    }

    /// Make every mutating call against `op:stack` fail, e.g. `create:net`
    pub fn failing(self, call: &str) -> Self {
        self.failing.lock().unwrap().insert(call.to_string());
        self
    }

    pub fn cancel_when_creating(self, stack: &str, token: CancellationToken) -> Self {
        *self.cancel_on_create.lock().unwrap() = Some((stack.to_string(), token));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn deployed(&self, stack: &str) -> Option<Deployment> {
        self.deployed.lock().unwrap().get(stack).cloned()
    }

    async fn mutate(&self, op: &str, stack: &str) -> stackflow_cloud::Result<()> {
        let call = format!("{op}:{stack}");
        self.calls.lock().unwrap().push(call.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.lock().unwrap().contains(&call) {
            return Err(BackendError::api(400, format!("{call} rejected")));
        }
        Ok(())
    }
}

#[async_trait]
impl StackBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn describe_status(&self, stack_name: &str) -> stackflow_cloud::Result<RemoteStatus> {
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(stack_name)
            .cloned()
            .unwrap_or(RemoteStatus::Absent))
    }

    async fn create(&self, stack_name: &str, deployment: &Deployment) -> stackflow_cloud::Result<()> {
        let cancel = self
            .cancel_on_create
            .lock()
            .unwrap()
            .as_ref()
            .filter(|(stack, _)| stack == stack_name)
            .map(|(_, token)| token.clone());
        if let Some(token) = cancel {
            token.cancel();
        }

        self.mutate("create", stack_name).await?;
        self.statuses
            .lock()
            .unwrap()
            .insert(stack_name.to_string(), RemoteStatus::CreateComplete);
        self.deployed
            .lock()
            .unwrap()
            .insert(stack_name.to_string(), deployment.clone());
        Ok(())
    }

    async fn update(
        &self,
        stack_name: &str,
        deployment: &Deployment,
    ) -> stackflow_cloud::Result<UpdateOutcome> {
        self.mutate("update", stack_name).await?;
        self.statuses
            .lock()
            .unwrap()
            .insert(stack_name.to_string(), RemoteStatus::UpdateComplete);
        self.deployed
            .lock()
            .unwrap()
            .insert(stack_name.to_string(), deployment.clone());
        Ok(UpdateOutcome::Updated)
    }

    async fn delete(&self, stack_name: &str) -> stackflow_cloud::Result<()> {
        self.mutate("delete", stack_name).await?;
        self.statuses.lock().unwrap().remove(stack_name);
        self.deployed.lock().unwrap().remove(stack_name);
        Ok(())
    }

    async fn get_template(&self, stack_name: &str) -> stackflow_cloud::Result<String> {
        self.deployed
            .lock()
            .unwrap()
            .get(stack_name)
            .map(|d| d.template_body.clone())
            .ok_or_else(|| BackendError::NotFound(stack_name.to_string()))
    }

    async fn get_outputs(&self, stack_name: &str) -> stackflow_cloud::Result<BTreeMap<String, String>> {
        let exists = self.statuses.lock().unwrap().contains_key(stack_name);
        if !exists {
            return Err(BackendError::NotFound(stack_name.to_string()));
        }
        Ok(self
            .outputs
            .lock()
            .unwrap()
            .get(stack_name)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_parameters(&self, stack_name: &str) -> stackflow_cloud::Result<BTreeMap<String, String>> {
        Ok(self
            .deployed
            .lock()
            .unwrap()
            .get(stack_name)
            .map(|d| d.parameters.clone())
            .unwrap_or_default())
    }

    async fn validate_template(&self, _template_body: &str) -> stackflow_cloud::Result<TemplateSummary> {
        Ok(TemplateSummary::default())
    }

    async fn estimate_cost(
        &self,
        stack_name: &str,
        _deployment: &Deployment,
    ) -> stackflow_cloud::Result<String> {
        Ok(format!("https://calculator.invalid/{stack_name}"))
    }
}

/// Project directory holding the one template every test stack uses
pub struct TestProject {
    pub root: TempDir,
}

#[allow(dead_code)]
impl TestProject {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let templates = root.path().join("templates");
        fs::create_dir_all(&templates).unwrap();
        fs::write(templates.join(TEMPLATE), "Resources: {}\n").unwrap();
        Self { root }
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    /// Context with short polling so timeouts resolve quickly
    pub fn context(&self) -> ExecutionContext {
        ExecutionContext::new(self.path()).with_poll(PollConfig {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            multiplier: 2.0,
            timeout: Duration::from_millis(200),
        })
    }
}
