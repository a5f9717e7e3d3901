//! Stack backend trait definition

use crate::action::UpdateOutcome;
use crate::error::Result;
use crate::status::RemoteStatus;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Remote provisioning backend
///
/// Every method addresses a stack by its external name. Mutating calls return
/// once the backend has accepted the request; callers poll
/// [`StackBackend::describe_status`] (see [`crate::waiter`]) until it settles.
#[async_trait]
pub trait StackBackend: Send + Sync {
    /// Returns the backend name (e.g., "local")
    fn name(&self) -> &str;

    /// Current status of a stack, `Absent` if it does not exist
    async fn describe_status(&self, stack_name: &str) -> Result<RemoteStatus>;

    /// Start creating a stack
    async fn create(&self, stack_name: &str, deployment: &Deployment) -> Result<()>;

    /// Start updating a stack
    async fn update(&self, stack_name: &str, deployment: &Deployment) -> Result<UpdateOutcome>;

    /// Start deleting a stack; deleting an absent stack succeeds
    async fn delete(&self, stack_name: &str) -> Result<()>;

    /// Template body the live stack was deployed with
    async fn get_template(&self, stack_name: &str) -> Result<String>;

    /// Outputs exported by the live stack
    async fn get_outputs(&self, stack_name: &str) -> Result<BTreeMap<String, String>>;

    /// Parameters the live stack was deployed with
    async fn get_parameters(&self, stack_name: &str) -> Result<BTreeMap<String, String>>;

    /// Validate a template body without deploying it
    async fn validate_template(&self, template_body: &str) -> Result<TemplateSummary>;

    /// URL of a cost estimate for the deployment
    async fn estimate_cost(&self, stack_name: &str, deployment: &Deployment) -> Result<String>;
}

/// Everything sent to the backend when creating or updating a stack
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub template_body: String,
    pub parameters: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
}

impl Deployment {
    pub fn new(template_body: impl Into<String>) -> Self {
        Self {
            template_body: template_body.into(),
            ..Default::default()
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Result of template validation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSummary {
    pub description: Option<String>,

    /// Declared parameter names
    pub parameters: Vec<String>,
}

/// Polling configuration for in-progress statuses
#[derive(Debug, Clone, PartialEq)]
pub struct PollConfig {
    /// Delay before the second status check
    pub initial_delay: Duration,

    /// Maximum delay between checks
    pub max_delay: Duration,

    /// Backoff multiplier
    pub multiplier: f64,

    /// Overall bound on waiting for a stack to settle
    pub timeout: Duration,
}

impl PollConfig {
    /// Delay after the given (zero-based) attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt as i32);
        let millis = (self.initial_delay.as_millis() as f64 * factor) as u128;
        let capped = millis.min(self.max_delay.as_millis());
        Duration::from_millis(capped as u64)
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            timeout: Duration::from_secs(30 * 60),
        }
    }
}
