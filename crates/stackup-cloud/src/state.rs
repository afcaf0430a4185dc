//! Run store: the last run report and the in-flight run lock
//!
//! Manages `.stackup/last-run.json`. The stored report is informational only;
//! every run re-resolves resources through the provider. The lock file
//! advertises an in-flight run so a second invocation can refuse to start.

use crate::error::{CloudError, Result};
use crate::report::{RunReport, TeardownReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const STORE_VERSION: u32 = 1;
const STATE_DIR: &str = ".stackup";
const LAST_RUN_FILE: &str = "last-run.json";
const LOCK_FILE: &str = "lock.json";
/// A lock older than this belongs to a run that crashed
const STALE_LOCK_HOURS: i64 = 1;

/// What the last invocation did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum LastRun {
    Up { report: RunReport },
    Down { deployment: String, report: TeardownReport },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRun {
    pub version: u32,
    pub recorded_at: DateTime<Utc>,
    #[serde(flatten)]
    pub run: LastRun,
}

/// `.stackup/` under a project root
pub struct RunStore {
    dir: PathBuf,
}

impl RunStore {
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            dir: project_root.as_ref().join(STATE_DIR),
        }
    }

    /// The last recorded run, if any
    pub async fn load(&self) -> Result<Option<StoredRun>> {
        let content = match fs::read_to_string(self.dir.join(LAST_RUN_FILE)).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let stored: StoredRun = serde_json::from_str(&content)?;
        if stored.version > STORE_VERSION {
            return Err(CloudError::StateError(format!(
                "{} was written by a newer stackup (version {})",
                LAST_RUN_FILE, stored.version
            )));
        }
        Ok(Some(stored))
    }

    /// Replace the last run record.
    ///
    /// Written to a temporary file first so an interrupted save never leaves
    /// a truncated record behind.
    pub async fn save(&self, run: LastRun) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;

        let stored = StoredRun {
            version: STORE_VERSION,
            recorded_at: Utc::now(),
            run,
        };
        let path = self.dir.join(LAST_RUN_FILE);
        let partial = self.dir.join(format!("{}.partial", LAST_RUN_FILE));
        fs::write(&partial, serde_json::to_vec_pretty(&stored)?).await?;
        fs::rename(&partial, &path).await?;

        tracing::debug!(path = %path.display(), "Recorded run");
        Ok(())
    }

    /// Claim the deployment for this process.
    ///
    /// Fails while another live run holds the lock; a lock left by a crashed
    /// run is taken over once it is stale.
    pub async fn acquire_lock(&self, deployment: &str) -> Result<RunLock> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(LOCK_FILE);
        let holder = LockHolder {
            deployment: deployment.to_string(),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        let content = serde_json::to_vec_pretty(&holder)?;

        for _ in 0..2 {
            match create_exclusive(&path, &content).await {
                Ok(()) => {
                    tracing::debug!(deployment = %deployment, "Acquired run lock");
                    return Ok(RunLock {
                        path,
                        released: false,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }

            let existing: LockHolder = serde_json::from_str(&fs::read_to_string(&path).await?)?;
            let age = Utc::now().signed_duration_since(existing.acquired_at);
            if age.num_hours() < STALE_LOCK_HOURS {
                return Err(CloudError::LockError(format!(
                    "deployment '{}' is in use by pid {} since {}",
                    existing.deployment,
                    existing.pid,
                    existing.acquired_at.format("%Y-%m-%d %H:%M:%S UTC")
                )));
            }
            tracing::warn!(pid = existing.pid, "Taking over stale run lock");
            fs::remove_file(&path).await?;
        }

        Err(CloudError::LockError(format!(
            "could not claim {}",
            path.display()
        )))
    }
}

async fn create_exclusive(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(content).await?;
    file.flush().await
}

#[derive(Debug, Serialize, Deserialize)]
struct LockHolder {
    deployment: String,
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// Held for the duration of a mutating command; removed on release or drop
pub struct RunLock {
    path: PathBuf,
    released: bool,
}

impl RunLock {
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
