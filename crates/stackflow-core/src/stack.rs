//! Per-stack actions
//!
//! A [`Stack`] pairs one [`StackConfig`] with the backend and delegates every
//! action to it. It holds no state between runs; the backend is the only
//! source of truth for what is deployed.

use crate::command::Command;
use crate::context::ExecutionContext;
use crate::diff::{Differ, Side};
use crate::error::{Result, StackflowError};
use crate::launch::{LaunchAction, decide};
use crate::model::{StackConfig, StackId};
use crate::resolver::ResolverCache;
use crate::result::{ActionOutput, ParameterChange, StackDiff};
use crate::template::{TemplateProcessor, Variables, is_template_file};
use stackflow_cloud::{
    ActionType, ApplyOutcome, BackendError, Deployment, PollConfig, RemoteStatus, StackBackend,
    TemplateSummary, UpdateOutcome, wait_for_settled,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub struct Stack {
    config: StackConfig,
    backend: Arc<dyn StackBackend>,
    templates_dir: PathBuf,
    variables: Arc<Variables>,
    poll: PollConfig,
    differ: Differ,
}

impl Stack {
    pub fn new(config: StackConfig, backend: Arc<dyn StackBackend>, ctx: &ExecutionContext) -> Self {
        Self {
            config,
            backend,
            templates_dir: ctx.templates_dir(),
            variables: ctx.variables.clone(),
            poll: ctx.poll.clone(),
            differ: ctx.differ,
        }
    }

    pub fn id(&self) -> &StackId {
        &self.config.id
    }

    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    /// Name understood by the backend
    pub fn stack_name(&self) -> &str {
        &self.config.external_name
    }

    /// Run one command against this stack
    pub async fn run(&self, command: Command, resolver: &ResolverCache) -> Result<ActionOutput> {
        Ok(match command {
            Command::Create => ActionOutput::Applied(self.create(resolver).await?),
            Command::Update => ActionOutput::Applied(self.update(resolver).await?),
            Command::Launch => ActionOutput::Applied(self.launch(resolver).await?),
            Command::Delete => ActionOutput::Applied(self.delete().await?),
            Command::Generate => ActionOutput::Template(self.generate()?),
            Command::Validate => ActionOutput::Validation(self.validate().await?),
            Command::Diff => ActionOutput::Diff(self.diff(resolver).await?),
            Command::Describe => ActionOutput::Status(self.describe().await?),
            Command::EstimateCost => ActionOutput::Url(self.estimate_cost(resolver).await?),
            Command::FetchRemoteTemplate => {
                ActionOutput::Template(self.fetch_remote_template().await?)
            }
            Command::StackName => ActionOutput::Name(self.stack_name().to_string()),
            Command::ListOutputs => ActionOutput::Outputs(self.outputs().await?),
        })
    }

    fn backend_error(&self, error: BackendError) -> StackflowError {
        StackflowError::backend(&self.config.id, error)
    }

    fn ensure_unprotected(&self) -> Result<()> {
        if self.config.protect {
            warn!(stack = %self.config.id, "Refusing to modify protected stack");
            return Err(StackflowError::Protected(self.config.id.clone()));
        }
        Ok(())
    }

    /// Render the template body
    ///
    /// `.j2` and `.tera` files are rendered with `stack_name`, `stack_id`,
    /// `user_data` and `var` in scope; anything else is read verbatim.
    pub fn generate(&self) -> Result<String> {
        let path = self.templates_dir.join(&self.config.template_path);
        if !is_template_file(&path) {
            return std::fs::read_to_string(&path).map_err(|e| StackflowError::TemplateError {
                file: path.clone(),
                message: e.to_string(),
            });
        }

        let mut processor = TemplateProcessor::new();
        processor.add_variable("stack_name", self.config.external_name.clone().into());
        processor.add_variable("stack_id", self.config.id.to_string().into());
        processor.add_variable("user_data", self.config.user_data.clone());
        processor.add_variable("var", serde_json::Value::Object((*self.variables).clone()));
        processor.render_file(&path)
    }

    async fn deployment(&self, resolver: &ResolverCache) -> Result<Deployment> {
        let template_body = self.generate()?;
        let parameters = resolver.resolve_parameters(&self.config).await?;
        Ok(Deployment {
            template_body,
            parameters,
            tags: self.config.tags.clone(),
        })
    }

    pub async fn describe(&self) -> Result<RemoteStatus> {
        self.backend
            .describe_status(self.stack_name())
            .await
            .map_err(|e| self.backend_error(e))
    }

    async fn wait(&self) -> Result<RemoteStatus> {
        wait_for_settled(self.backend.as_ref(), self.stack_name(), &self.poll)
            .await
            .map_err(|e| self.backend_error(e))
    }

    fn expect_status(&self, action: ActionType, status: RemoteStatus, expected: &RemoteStatus) -> Result<RemoteStatus> {
        if &status == expected {
            Ok(status)
        } else {
            Err(StackflowError::ActionFailed {
                stack: self.config.id.clone(),
                action: action.to_string(),
                status: status.to_string(),
            })
        }
    }

    #[instrument(skip(self, resolver), fields(stack = %self.config.id))]
    pub async fn create(&self, resolver: &ResolverCache) -> Result<ApplyOutcome> {
        self.ensure_unprotected()?;
        let deployment = self.deployment(resolver).await?;
        self.apply_create(&deployment).await
    }

    async fn apply_create(&self, deployment: &Deployment) -> Result<ApplyOutcome> {
        info!(stack = %self.config.id, name = %self.stack_name(), "Creating stack");
        self.backend
            .create(self.stack_name(), deployment)
            .await
            .map_err(|e| self.backend_error(e))?;
        let status = self.wait().await?;
        let status = self.expect_status(ActionType::Create, status, &RemoteStatus::CreateComplete)?;
        Ok(ApplyOutcome::new(ActionType::Create, status))
    }

    #[instrument(skip(self, resolver), fields(stack = %self.config.id))]
    pub async fn update(&self, resolver: &ResolverCache) -> Result<ApplyOutcome> {
        self.ensure_unprotected()?;
        let deployment = self.deployment(resolver).await?;
        self.apply_update(&deployment).await
    }

    async fn apply_update(&self, deployment: &Deployment) -> Result<ApplyOutcome> {
        info!(stack = %self.config.id, name = %self.stack_name(), "Updating stack");
        let outcome = self
            .backend
            .update(self.stack_name(), deployment)
            .await
            .map_err(|e| self.backend_error(e))?;

        match outcome {
            UpdateOutcome::NoChanges => {
                debug!(stack = %self.config.id, "No updates to perform");
                Ok(ApplyOutcome::new(ActionType::NoOp, self.describe().await?))
            }
            UpdateOutcome::Updated => {
                let status = self.wait().await?;
                let status =
                    self.expect_status(ActionType::Update, status, &RemoteStatus::UpdateComplete)?;
                Ok(ApplyOutcome::new(ActionType::Update, status))
            }
        }
    }

    /// Delete the stack; an absent stack is a successful no-op
    #[instrument(skip(self), fields(stack = %self.config.id))]
    pub async fn delete(&self) -> Result<ApplyOutcome> {
        self.ensure_unprotected()?;
        let mut status = self.describe().await?;
        if status.is_in_progress() {
            status = self.wait().await?;
        }
        self.apply_delete(status).await
    }

    async fn apply_delete(&self, current: RemoteStatus) -> Result<ApplyOutcome> {
        if !current.exists() {
            debug!(stack = %self.config.id, "Stack does not exist");
            return Ok(ApplyOutcome::new(ActionType::NoOp, current));
        }

        info!(stack = %self.config.id, name = %self.stack_name(), "Deleting stack");
        self.backend
            .delete(self.stack_name())
            .await
            .map_err(|e| self.backend_error(e))?;
        let status = self.wait().await?;
        let status = self.expect_status(ActionType::Delete, status, &RemoteStatus::Absent)?;
        Ok(ApplyOutcome::new(ActionType::Delete, status))
    }

    /// Create, update or recreate the stack depending on its remote status
    #[instrument(skip(self, resolver), fields(stack = %self.config.id))]
    pub async fn launch(&self, resolver: &ResolverCache) -> Result<ApplyOutcome> {
        self.ensure_unprotected()?;
        let mut status = self.describe().await?;

        loop {
            let action = decide(&status);
            debug!(stack = %self.config.id, status = %status, action = %action, "Launch decision");

            match action {
                LaunchAction::Wait => {
                    status = self.wait().await?;
                }
                LaunchAction::Reject { status } => {
                    return Err(StackflowError::UnknownStatus {
                        stack: self.config.id.clone(),
                        status,
                    });
                }
                LaunchAction::Create => {
                    let deployment = self.deployment(resolver).await?;
                    return self.apply_create(&deployment).await;
                }
                LaunchAction::Update => {
                    let deployment = self.deployment(resolver).await?;
                    return self.apply_update(&deployment).await;
                }
                LaunchAction::DeleteThenCreate => {
                    // Resolve before tearing anything down
                    let deployment = self.deployment(resolver).await?;
                    let deleted = self.apply_delete(status).await?;
                    let created = self.apply_create(&deployment).await?;
                    return Ok(deleted.then(ActionType::Create, created.final_status));
                }
            }
        }
    }

    /// Compare the generated template and parameters with the deployed stack
    #[instrument(skip(self, resolver), fields(stack = %self.config.id))]
    pub async fn diff(&self, resolver: &ResolverCache) -> Result<StackDiff> {
        let local = self.deployment(resolver).await?;
        let deployed = self.describe().await?.exists();

        let (remote_template, remote_parameters) = if deployed {
            let name = self.stack_name();
            let template = self
                .backend
                .get_template(name)
                .await
                .map_err(|e| self.backend_error(e))?;
            let parameters = self
                .backend
                .get_parameters(name)
                .await
                .map_err(|e| self.backend_error(e))?;
            (template, parameters)
        } else {
            (String::new(), BTreeMap::new())
        };

        let template = self.differ.compare(
            Side {
                label: format!("remote/{}", self.stack_name()),
                body: &remote_template,
            },
            Side {
                label: format!("local/{}", self.config.template_path.display()),
                body: &local.template_body,
            },
        )?;

        Ok(StackDiff {
            deployed,
            template,
            parameters: parameter_changes(&local.parameters, &remote_parameters),
        })
    }

    pub async fn validate(&self) -> Result<TemplateSummary> {
        let body = self.generate()?;
        self.backend
            .validate_template(&body)
            .await
            .map_err(|e| self.backend_error(e))
    }

    pub async fn estimate_cost(&self, resolver: &ResolverCache) -> Result<String> {
        let deployment = self.deployment(resolver).await?;
        self.backend
            .estimate_cost(self.stack_name(), &deployment)
            .await
            .map_err(|e| self.backend_error(e))
    }

    pub async fn fetch_remote_template(&self) -> Result<String> {
        self.backend
            .get_template(self.stack_name())
            .await
            .map_err(|e| self.backend_error(e))
    }

    pub async fn outputs(&self) -> Result<BTreeMap<String, String>> {
        self.backend
            .get_outputs(self.stack_name())
            .await
            .map_err(|e| self.backend_error(e))
    }
}

fn parameter_changes(
    local: &BTreeMap<String, String>,
    remote: &BTreeMap<String, String>,
) -> BTreeMap<String, ParameterChange> {
    local
        .keys()
        .chain(remote.keys())
        .filter(|key| local.get(*key) != remote.get(*key))
        .map(|key| {
            (
                key.clone(),
                ParameterChange {
                    local: local.get(key).cloned(),
                    remote: remote.get(key).cloned(),
                },
            )
        })
        .collect()
}
