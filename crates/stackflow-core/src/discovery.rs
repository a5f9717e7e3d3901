//! Project discovery
//!
//! Locates the project root and the stack files below `config/`.

use crate::error::{Result, StackflowError};
use crate::model::StackId;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const CONFIG_DIR: &str = "config";
pub const TEMPLATES_DIR: &str = "templates";
const GROUP_CONFIG_STEM: &str = "config";
const YAML_EXTENSIONS: &[&str] = &["yaml", "yml"];

/// A stack file and the group configs it inherits from
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredStack {
    pub id: StackId,
    pub path: PathBuf,
    /// `config.yaml` files from `config/` down to the stack's directory
    pub group_configs: Vec<PathBuf>,
}

/// Find the project root
///
/// Search order:
/// 1. `STACKFLOW_PROJECT_ROOT`
/// 2. upward from the current directory for a directory containing `config/`
#[tracing::instrument]
pub fn find_project_root() -> Result<PathBuf> {
    if let Ok(root) = std::env::var("STACKFLOW_PROJECT_ROOT") {
        let path = PathBuf::from(&root);
        debug!(env_root = %root, "Checking STACKFLOW_PROJECT_ROOT");
        if path.join(CONFIG_DIR).is_dir() {
            info!(project_root = %path.display(), "Found project root from environment variable");
            return Ok(path);
        }
        warn!(env_root = %root, "STACKFLOW_PROJECT_ROOT has no config/ directory, ignoring");
    }

    find_project_root_from(&std::env::current_dir()?)
}

/// Search upward from `start` for a directory containing `config/`
pub fn find_project_root_from(start: &Path) -> Result<PathBuf> {
    let mut current = start.to_path_buf();
    debug!(start_dir = %start.display(), "Searching for project root");

    loop {
        if current.join(CONFIG_DIR).is_dir() {
            info!(project_root = %current.display(), "Found project root");
            return Ok(current);
        }
        if !current.pop() {
            break;
        }
    }

    warn!(start_dir = %start.display(), "Project root not found");
    Err(StackflowError::ProjectRootNotFound(start.to_path_buf()))
}

/// Every stack file below `<project_root>/config`, sorted by identity
#[tracing::instrument(skip(project_root), fields(project_root = %project_root.display()))]
pub fn discover_stacks(project_root: &Path) -> Result<Vec<DiscoveredStack>> {
    let config_dir = project_root.join(CONFIG_DIR);
    if !config_dir.is_dir() {
        return Err(StackflowError::ProjectRootNotFound(project_root.to_path_buf()));
    }

    let mut stacks = Vec::new();
    for path in yaml_files(&config_dir)? {
        if is_group_config(&path) {
            continue;
        }
        let id = stack_id_for(&config_dir, &path)?;
        let group_configs = group_configs_for(&config_dir, &path);
        debug!(stack = %id, file = %path.display(), "Discovered stack file");
        stacks.push(DiscoveredStack {
            id,
            path,
            group_configs,
        });
    }

    stacks.sort_by(|a, b| a.id.cmp(&b.id));
    if let Some(dup) = stacks.windows(2).find(|w| w[0].id == w[1].id) {
        return Err(StackflowError::ConfigFile {
            path: dup[1].path.clone(),
            message: format!("stack '{}' is defined by more than one file", dup[1].id),
        });
    }

    info!(stack_count = stacks.len(), "Discovered stack files");
    Ok(stacks)
}

fn yaml_files(config_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for ext in YAML_EXTENSIONS {
        let pattern = config_dir.join("**").join(format!("*.{ext}"));
        let pattern = pattern.to_string_lossy();
        let entries = glob::glob(&pattern)
            .map_err(|e| StackflowError::InvalidConfig(format!("bad glob pattern: {e}")))?;
        for entry in entries {
            match entry {
                Ok(path) if path.is_file() => files.push(path),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Skipping unreadable path"),
            }
        }
    }
    files.sort();
    Ok(files)
}

fn is_group_config(path: &Path) -> bool {
    path.file_stem().and_then(|s| s.to_str()) == Some(GROUP_CONFIG_STEM)
}

/// Identity of a stack file: relative path, `/`-separated, without extension
pub fn stack_id_for(config_dir: &Path, path: &Path) -> Result<StackId> {
    let relative = path
        .strip_prefix(config_dir)
        .map_err(|_| StackflowError::ConfigFile {
            path: path.to_path_buf(),
            message: "stack file is outside the config directory".to_string(),
        })?
        .with_extension("");
    let parts: Vec<_> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(StackId::new(parts.join("/")))
}

fn group_configs_for(config_dir: &Path, path: &Path) -> Vec<PathBuf> {
    let Some(stack_dir) = path.parent() else {
        return Vec::new();
    };
    let Ok(relative) = stack_dir.strip_prefix(config_dir) else {
        return Vec::new();
    };

    let mut dirs = vec![config_dir.to_path_buf()];
    let mut current = config_dir.to_path_buf();
    for component in relative.components() {
        current.push(component);
        dirs.push(current.clone());
    }

    dirs.into_iter()
        .filter_map(|dir| {
            YAML_EXTENSIONS
                .iter()
                .map(|ext| dir.join(format!("{GROUP_CONFIG_STEM}.{ext}")))
                .find(|candidate| candidate.is_file())
        })
        .collect()
}
