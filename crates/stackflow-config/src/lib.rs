//! Stackflow tool settings
//!
//! Settings control how plans execute rather than what they deploy: the
//! per-batch concurrency cap and the polling constants used while a stack is
//! in progress. They are layered, later sources winning:
//!
//! 1. built-in defaults
//! 2. `~/.config/stackflow/config.yaml` (global)
//! 3. `<project>/stackflow.yaml`
//! 4. `STACKFLOW_MAX_CONCURRENCY`, `STACKFLOW_POLL_TIMEOUT_SECS`

pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

const GLOBAL_SETTINGS_FILE: &str = "config.yaml";
const PROJECT_SETTINGS_FILE: &str = "stackflow.yaml";

/// Effective settings for one invocation
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Maximum stacks dispatched at once within a batch (None = unbounded)
    pub max_concurrency: Option<usize>,

    pub poll: PollSettings,
}

/// Backoff constants for waiting on in-progress stacks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollSettings {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub timeout_secs: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            timeout_secs: 1800,
        }
    }
}

/// A settings file; every key is optional
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsFile {
    max_concurrency: Option<usize>,
    #[serde(default)]
    poll: PollFile,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PollFile {
    initial_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    multiplier: Option<f64>,
    timeout_secs: Option<u64>,
}

impl Settings {
    fn apply(&mut self, file: SettingsFile) {
        if file.max_concurrency.is_some() {
            self.max_concurrency = file.max_concurrency;
        }
        let poll = file.poll;
        if let Some(v) = poll.initial_delay_ms {
            self.poll.initial_delay_ms = v;
        }
        if let Some(v) = poll.max_delay_ms {
            self.poll.max_delay_ms = v;
        }
        if let Some(v) = poll.multiplier {
            self.poll.multiplier = v;
        }
        if let Some(v) = poll.timeout_secs {
            self.poll.timeout_secs = v;
        }
    }

    /// Reject poll constants the waiter cannot make progress with
    pub fn validate(&self) -> Result<()> {
        let poll = &self.poll;
        if !poll.multiplier.is_finite() || poll.multiplier < 1.0 {
            return Err(invalid(
                "poll.multiplier",
                format!("must be at least 1.0, got {}", poll.multiplier),
            ));
        }
        for (key, value) in [
            ("poll.initial_delay_ms", poll.initial_delay_ms),
            ("poll.max_delay_ms", poll.max_delay_ms),
            ("poll.timeout_secs", poll.timeout_secs),
        ] {
            if value == 0 {
                return Err(invalid(key, "must be greater than 0".to_string()));
            }
        }
        if poll.max_delay_ms < poll.initial_delay_ms {
            return Err(invalid(
                "poll.max_delay_ms",
                format!("must not be below poll.initial_delay_ms ({})", poll.initial_delay_ms),
            ));
        }
        Ok(())
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(value) = env_number("STACKFLOW_MAX_CONCURRENCY")? {
            // 0 means unbounded
            self.max_concurrency = (value > 0).then_some(value as usize);
        }
        if let Some(value) = env_number("STACKFLOW_POLL_TIMEOUT_SECS")? {
            self.poll.timeout_secs = value;
        }
        Ok(())
    }
}

fn invalid(key: &'static str, reason: String) -> ConfigError {
    ConfigError::InvalidSetting { key, reason }
}

fn env_number(key: &str) -> Result<Option<u64>> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

/// Stackflow's global configuration directory (`~/.config/stackflow`)
pub fn get_config_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("stackflow"))
}

/// Load settings for a project, including the global settings file
pub fn load_settings(project_root: &Path) -> Result<Settings> {
    let global = get_config_dir().ok().map(|d| d.join(GLOBAL_SETTINGS_FILE));
    load_settings_from(global.as_deref(), project_root)
}

/// Load settings with an explicit global settings file
pub fn load_settings_from(global_file: Option<&Path>, project_root: &Path) -> Result<Settings> {
    let mut settings = Settings::default();

    let project_file = project_root.join(PROJECT_SETTINGS_FILE);
    for path in global_file.into_iter().chain(std::iter::once(project_file.as_path())) {
        if let Some(file) = read_settings_file(path)? {
            debug!(path = %path.display(), "Applying settings file");
            settings.apply(file);
        }
    }

    settings.apply_env()?;
    settings.validate()?;
    Ok(settings)
}

fn read_settings_file(path: &Path) -> Result<Option<SettingsFile>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(Some(SettingsFile::default()));
    }
    serde_yaml::from_str(&content)
        .map(Some)
        .map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
}
