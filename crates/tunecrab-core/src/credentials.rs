//! Imported Instagram cookie exports, one file per conversation.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tunecrab_schema::ConversationKey;

pub const CREDENTIAL_PREFIX: &str = "instagram_cookies_";

fn conversation_hash(conversation: &ConversationKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(conversation.as_str().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

pub fn credential_path(temp_dir: &Path, conversation: &ConversationKey, unix_ms: i64) -> PathBuf {
    temp_dir.join(format!(
        "{CREDENTIAL_PREFIX}{}_{unix_ms}.txt",
        conversation_hash(conversation)
    ))
}

/// Write `contents` to a fresh owner-only file under `temp_dir`.
pub async fn save(temp_dir: &Path, conversation: &ConversationKey, contents: &str) -> Result<PathBuf> {
    tokio::fs::create_dir_all(temp_dir)
        .await
        .with_context(|| format!("failed to create {}", temp_dir.display()))?;

    let path = credential_path(temp_dir, conversation, chrono::Utc::now().timestamp_millis());
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options
        .open(&path)
        .await
        .with_context(|| format!("failed to create credential file {}", path.display()))?;
    file.write_all(contents.as_bytes())
        .await
        .with_context(|| format!("failed to write credential file {}", path.display()))?;
    file.flush().await?;

    tracing::info!(conversation = %conversation, path = %path.display(), "credential file saved");
    Ok(path)
}

/// Best-effort removal; a missing file is fine.
pub async fn remove(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "credential file removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove credential file"),
    }
}
