use crate::diff::Differ;
use crate::discovery::{CONFIG_DIR, TEMPLATES_DIR};
use crate::template::Variables;
use stackflow_cloud::PollConfig;
use stackflow_config::Settings;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Everything one invocation needs, built once and passed by reference
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub project_root: PathBuf,

    /// User variables from `--var` and `--var-file`
    pub variables: Arc<Variables>,

    /// Maximum stacks dispatched at once within a batch (None = unbounded)
    pub max_concurrency: Option<usize>,

    pub poll: PollConfig,

    /// Template comparison used by `diff`
    pub differ: Differ,

    /// Cancelled on operator interrupt; stops further dispatch
    pub cancel: CancellationToken,
}

impl ExecutionContext {
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            project_root: project_root.as_ref().to_path_buf(),
            variables: Arc::new(Variables::new()),
            max_concurrency: None,
            poll: PollConfig::default(),
            differ: Differ::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Apply tool settings (concurrency cap and poll constants)
    pub fn with_settings(mut self, settings: &Settings) -> Self {
        self.max_concurrency = settings.max_concurrency;
        self.poll = PollConfig {
            initial_delay: Duration::from_millis(settings.poll.initial_delay_ms),
            max_delay: Duration::from_millis(settings.poll.max_delay_ms),
            multiplier: settings.poll.multiplier,
            timeout: Duration::from_secs(settings.poll.timeout_secs),
        };
        self
    }

    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = Arc::new(variables);
        self
    }

    pub fn with_differ(mut self, differ: Differ) -> Self {
        self.differ = differ;
        self
    }

    pub fn with_max_concurrency(mut self, limit: Option<usize>) -> Self {
        self.max_concurrency = limit.filter(|n| *n > 0);
        self
    }

    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn config_dir(&self) -> PathBuf {
        self.project_root.join(CONFIG_DIR)
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.project_root.join(TEMPLATES_DIR)
    }
}
