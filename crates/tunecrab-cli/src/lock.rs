use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct LockRecord {
    pid: u32,
    timestamp: DateTime<Utc>,
}

/// Marker file that keeps a second instance from starting. Removed on drop.
#[derive(Debug)]
pub struct ProcessLock {
    path: PathBuf,
}

impl ProcessLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                match serde_json::from_str::<LockRecord>(&content) {
                    Ok(record) if record.pid != std::process::id() && is_process_running(record.pid) => {
                        anyhow::bail!(
                            "tunecrab is already running (pid: {}, since {})",
                            record.pid,
                            record.timestamp
                        );
                    }
                    Ok(record) => {
                        tracing::info!(pid = record.pid, "removing stale lock file");
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "removing unreadable lock file");
                    }
                }
                std::fs::remove_file(path)
                    .with_context(|| format!("failed to remove stale lock {}", path.display()))?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read lock {}", path.display()));
            }
        }

        let record = LockRecord {
            pid: std::process::id(),
            timestamp: Utc::now(),
        };
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .with_context(|| format!("failed to create lock {}", path.display()))?;
        file.write_all(serde_json::to_string(&record)?.as_bytes())?;

        tracing::debug!(path = %path.display(), pid = record.pid, "process lock acquired");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove lock file");
        }
    }
}

#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
    // kill(pid, 0) checks if process exists without sending a signal
    if unsafe { libc::kill(pid as i32, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn is_process_running(_pid: u32) -> bool {
    false
}
