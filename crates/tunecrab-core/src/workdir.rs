//! Job-owned scratch directories.
//!
//! Every download runs inside a fresh directory that is removed when the
//! [`JobWorkdir`] is closed or dropped, on success and failure alike.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use tempfile::TempDir;
use tunecrab_schema::JobKind;

use crate::credentials::CREDENTIAL_PREFIX;

const JOB_KINDS: [JobKind; 3] = [JobKind::MusicFetch, JobKind::VideoFetch, JobKind::MediaFetch];

pub struct JobWorkdir {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl JobWorkdir {
    pub fn create(root: &Path, kind: JobKind) -> Result<Self> {
        std::fs::create_dir_all(root)
            .with_context(|| format!("failed to create work root {}", root.display()))?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}_", prefix_for(kind)))
            .tempdir_in(root)
            .with_context(|| format!("failed to create job directory in {}", root.display()))?;
        let path = dir.path().to_path_buf();
        tracing::debug!(path = %path.display(), "job directory created");
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the directory now. Failures are logged, never returned.
    pub fn close(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        match dir.close() {
            Ok(()) => tracing::debug!(path = %self.path.display(), "job directory removed"),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove job directory")
            }
        }
    }
}

impl Drop for JobWorkdir {
    fn drop(&mut self) {
        self.remove();
    }
}

fn prefix_for(kind: JobKind) -> &'static str {
    match kind {
        JobKind::MusicFetch => "music",
        JobKind::VideoFetch => "yt",
        JobKind::MediaFetch => "ig",
    }
}

/// Whether `name` is something the bot creates under its scratch roots: a
/// job directory or an imported credential file.
pub fn is_owned_artifact(name: &str) -> bool {
    name.starts_with(CREDENTIAL_PREFIX)
        || JOB_KINDS
            .iter()
            .any(|kind| name.strip_prefix(prefix_for(*kind)).is_some_and(|rest| rest.starts_with('_')))
}

/// Delete bot-owned entries directly under `root` last modified more than
/// `max_age` ago, except paths listed in `keep`. Anything else is left
/// alone. Returns how many were removed.
pub fn sweep_stale(root: &Path, max_age: Duration, keep: &HashSet<PathBuf>) -> Result<usize> {
    if !root.exists() {
        return Ok(0);
    }
    let now = SystemTime::now();
    let mut removed = 0;

    for entry in std::fs::read_dir(root)
        .with_context(|| format!("failed to read {}", root.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if keep.contains(&path) || !is_owned_artifact(&entry.file_name().to_string_lossy()) {
            continue;
        }
        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "skipping entry without mtime");
                continue;
            }
        };
        let age = now.duration_since(modified).unwrap_or_default();
        if age < max_age {
            continue;
        }

        let result = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        match result {
            Ok(()) => {
                removed += 1;
                tracing::info!(path = %path.display(), age_secs = age.as_secs(), "removed stale artifact");
            }
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove stale artifact"),
        }
    }

    Ok(removed)
}
