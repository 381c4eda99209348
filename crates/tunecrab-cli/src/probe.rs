use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::Command;
use tunecrab_core::DownloaderConfig;

const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// Run `<binary> <flag>` and return the first line it prints.
pub async fn probe_binary(binary: &str, flag: &str) -> Result<String> {
    let output = tokio::time::timeout(
        PROBE_TIMEOUT,
        Command::new(binary)
            .arg(flag)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .with_context(|| format!("{binary} {flag} timed out"))?
    .with_context(|| format!("failed to run {binary}"))?;

    if !output.status.success() {
        anyhow::bail!("{binary} {flag} exited with {}", output.status);
    }
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .to_string())
}

/// Both external tools must answer before the bot starts.
pub async fn ensure_tools(config: &DownloaderConfig) -> Result<()> {
    let ytdlp = probe_binary(&config.ytdlp_binary, "--version")
        .await
        .context("yt-dlp is required: install it with `pip install yt-dlp` (or `pkg install yt-dlp` on Termux)")?;
    tracing::info!(binary = %config.ytdlp_binary, version = %ytdlp, "yt-dlp found");

    let ffmpeg = probe_binary(&config.ffmpeg_binary, "-version")
        .await
        .context("ffmpeg is required: install it with `apt install ffmpeg` (or `pkg install ffmpeg` on Termux)")?;
    tracing::info!(binary = %config.ffmpeg_binary, version = %ffmpeg, "ffmpeg found");
    Ok(())
}
