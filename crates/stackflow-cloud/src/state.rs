//! On-disk ledger of the local backend
//!
//! ```text
//! .stackflow/
//!   state.json         current ledger
//!   state.json.backup  ledger before the last save
//!   lock.json          present while a process mutates the ledger
//! ```
//!
//! Saves go through a temporary file that is renamed over `state.json`, so a
//! reader sees either the old ledger or the new one, never a partial write.

use crate::error::{BackendError, Result};
use crate::status::RemoteStatus;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const LEDGER_VERSION: u32 = 1;
const STATE_DIR: &str = ".stackflow";

/// A lock older than this is assumed to belong to a crashed process
const STALE_LOCK_AFTER: TimeDelta = TimeDelta::hours(1);

/// Every stack the local backend has deployed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ledger {
    pub version: u32,
    pub updated_at: DateTime<Utc>,
    /// Keyed by external stack name
    pub stacks: BTreeMap<String, StackRecord>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self {
            version: LEDGER_VERSION,
            updated_at: Utc::now(),
            stacks: BTreeMap::new(),
        }
    }
}

impl Ledger {
    pub fn get(&self, name: &str) -> Option<&StackRecord> {
        self.stacks.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, record: StackRecord) {
        self.stacks.insert(name.into(), record);
        self.updated_at = Utc::now();
    }

    pub fn remove(&mut self, name: &str) -> Option<StackRecord> {
        let removed = self.stacks.remove(name);
        if removed.is_some() {
            self.updated_at = Utc::now();
        }
        removed
    }
}

/// What the backend remembers about one deployed stack
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackRecord {
    pub status: RemoteStatus,
    pub template_body: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StackRecord {
    pub fn new(status: RemoteStatus, template_body: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            status,
            template_body: template_body.into(),
            parameters: BTreeMap::new(),
            tags: BTreeMap::new(),
            outputs: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self, status: RemoteStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// Reads and writes the ledger below one project root
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            dir: project_root.as_ref().join(STATE_DIR),
        }
    }

    fn file(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn ledger_path(&self) -> PathBuf {
        self.file("state.json")
    }

    /// Read the ledger; a project that never deployed has an empty one
    pub async fn load(&self) -> Result<Ledger> {
        let content = match fs::read_to_string(self.ledger_path()).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Ledger::default()),
            Err(e) => return Err(e.into()),
        };

        let ledger: Ledger = serde_json::from_str(&content)?;
        if ledger.version > LEDGER_VERSION {
            return Err(BackendError::State(format!(
                "ledger version {} is newer than the supported version {LEDGER_VERSION}",
                ledger.version
            )));
        }
        debug!(stacks = ledger.stacks.len(), "Loaded ledger");
        Ok(ledger)
    }

    /// Replace the ledger atomically, keeping the previous one as a backup
    pub async fn save(&self, ledger: &Ledger) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;

        let current = self.ledger_path();
        let staged = self.file("state.json.tmp");
        let body = serde_json::to_vec_pretty(ledger)?;

        let mut file = fs::File::create(&staged).await?;
        file.write_all(&body).await?;
        file.sync_all().await?;
        drop(file);

        match fs::copy(&current, self.file("state.json.backup")).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::rename(&staged, &current).await?;

        debug!(stacks = ledger.stacks.len(), "Saved ledger");
        Ok(())
    }

    /// Take the cross-process lock, breaking it if its holder went away
    pub async fn lock(&self) -> Result<LockGuard> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.file("lock.json");
        let holder = LockHolder::current();

        // Second attempt only after a stale lock was removed
        for _ in 0..2 {
            match create_new(&path, &holder).await {
                Ok(()) => {
                    debug!(pid = holder.pid, "Acquired state lock");
                    return Ok(LockGuard { path: Some(path) });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }

            let existing: LockHolder = serde_json::from_str(&fs::read_to_string(&path).await?)?;
            if Utc::now() - existing.since < STALE_LOCK_AFTER {
                return Err(BackendError::Lock(format!(
                    "state is locked by {} (pid {}) since {}",
                    existing.host, existing.pid, existing.since
                )));
            }
            warn!(host = %existing.host, pid = existing.pid, "Breaking stale state lock");
            fs::remove_file(&path).await?;
        }
        Err(BackendError::Lock(
            "lock was taken again while breaking a stale one".to_string(),
        ))
    }
}

async fn create_new(path: &Path, holder: &LockHolder) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    let body = serde_json::to_vec(holder).map_err(std::io::Error::other)?;
    file.write_all(&body).await?;
    file.sync_all().await
}

#[derive(Debug, Serialize, Deserialize)]
struct LockHolder {
    host: String,
    pid: u32,
    since: DateTime<Utc>,
}

impl LockHolder {
    fn current() -> Self {
        Self {
            host: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            pid: std::process::id(),
            since: Utc::now(),
        }
    }
}

/// Removes the lock file on release or drop
pub struct LockGuard {
    path: Option<PathBuf>,
}

impl LockGuard {
    pub async fn release(mut self) -> Result<()> {
        if let Some(path) = self.path.take() {
            match fs::remove_file(&path).await {
                Ok(()) => debug!("Released state lock"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}
