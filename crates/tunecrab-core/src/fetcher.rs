//! yt-dlp invocation.
//!
//! The downloader is an opaque child process: a non-zero exit is a failed
//! fetch carrying its captured output, a zero exit is judged by the files
//! left in the job directory.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tunecrab_schema::JobKind;

use crate::error::FetchError;

const MAX_DIAGNOSTIC_BYTES: usize = 16_000;
const OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub kind: JobKind,
    pub url: String,
    pub format: Option<String>,
    pub cookies: Option<PathBuf>,
}

impl FetchRequest {
    pub fn music(url: impl Into<String>) -> Self {
        Self {
            kind: JobKind::MusicFetch,
            url: url.into(),
            format: None,
            cookies: None,
        }
    }

    pub fn video(url: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            kind: JobKind::VideoFetch,
            url: url.into(),
            format: Some(format.into()),
            cookies: None,
        }
    }

    pub fn media(url: impl Into<String>, cookies: Option<PathBuf>) -> Self {
        Self {
            kind: JobKind::MediaFetch,
            url: url.into(),
            format: Some("best".to_string()),
            cookies,
        }
    }
}

/// Metadata from a `--dump-json` probe.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideoInfo {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub uploader: Option<String>,
}

impl VideoInfo {
    pub fn duration_secs(&self) -> Option<u64> {
        self.duration
            .filter(|d| d.is_finite() && *d >= 0.0)
            .map(|d| d.round() as u64)
    }

    pub fn channel_name(&self) -> &str {
        self.channel
            .as_deref()
            .or(self.uploader.as_deref())
            .unwrap_or("Unknown")
    }
}

#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn probe(&self, url: &str) -> Result<VideoInfo, FetchError>;

    /// Download into `workdir` and return the files produced there.
    async fn fetch(&self, request: &FetchRequest, workdir: &Path) -> Result<Vec<PathBuf>, FetchError>;
}

pub struct YtDlpFetcher {
    binary: String,
}

impl YtDlpFetcher {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn args_for(request: &FetchRequest, workdir: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        match request.kind {
            JobKind::MusicFetch => {
                for arg in [
                    "--extract-audio",
                    "--audio-format",
                    "mp3",
                    "--audio-quality",
                    "0",
                    "--add-metadata",
                ] {
                    args.push(arg.into());
                }
            }
            JobKind::VideoFetch | JobKind::MediaFetch => {
                if let Some(format) = &request.format {
                    args.push("-f".into());
                    args.push(format.into());
                }
                args.push("--no-warnings".into());
                args.push("--no-check-certificate".into());
            }
        }
        args.push("-o".into());
        args.push(workdir.join(OUTPUT_TEMPLATE).into_os_string());
        if let Some(cookies) = &request.cookies {
            args.push("--cookies".into());
            args.push(cookies.clone().into_os_string());
        }
        args.push(request.url.clone().into());
        args
    }
}

#[async_trait]
impl MediaFetcher for YtDlpFetcher {
    async fn probe(&self, url: &str) -> Result<VideoInfo, FetchError> {
        let args: Vec<OsString> = ["--dump-json", "--no-warnings", "--no-check-certificate", url]
            .into_iter()
            .map(OsString::from)
            .collect();
        let output = run_tool(&self.binary, &args).await?;
        let first = output
            .stdout
            .lines()
            .find(|line| !line.trim().is_empty())
            .ok_or_else(|| FetchError::Probe("empty metadata output".to_string()))?;
        serde_json::from_str(first).map_err(|e| FetchError::Probe(e.to_string()))
    }

    async fn fetch(&self, request: &FetchRequest, workdir: &Path) -> Result<Vec<PathBuf>, FetchError> {
        let args = Self::args_for(request, workdir);
        tracing::info!(kind = %request.kind, url = %request.url, "starting downloader");
        run_tool(&self.binary, &args).await?;
        produced_files(workdir)
    }
}

/// Captured output of a successful tool run.
#[derive(Debug)]
pub(crate) struct ToolOutput {
    pub stdout: String,
}

/// Run `binary` to completion. If this future is dropped the child is
/// killed along with everything it spawned (ffmpeg under yt-dlp).
pub(crate) async fn run_tool(binary: &str, args: &[OsString]) -> Result<ToolOutput, FetchError> {
    let spawn_err = |source| FetchError::Spawn {
        binary: binary.to_string(),
        source,
    };
    let mut command = Command::new(binary);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let child = command.spawn().map_err(spawn_err)?;
    let group = ProcessGroup::new(child.id());
    let output = child.wait_with_output().await.map_err(spawn_err)?;
    group.disarm();

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    if !output.status.success() {
        let diagnostics = tail(&format!("{stdout}{stderr}"), MAX_DIAGNOSTIC_BYTES);
        tracing::warn!(
            binary,
            code = ?output.status.code(),
            diagnostics = %diagnostics,
            "tool exited unsuccessfully"
        );
        return Err(FetchError::Exit {
            code: output.status.code(),
            diagnostics,
        });
    }

    if !stderr.trim().is_empty() {
        tracing::debug!(binary, stderr = %tail(&stderr, MAX_DIAGNOSTIC_BYTES), "tool stderr");
    }
    Ok(ToolOutput { stdout })
}

/// Kills the child's process group on drop unless disarmed after the child
/// has been waited for.
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn new(pid: Option<u32>) -> Self {
        Self { pgid: pid }
    }

    fn disarm(mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        #[cfg(unix)]
        {
            // The child leads its own group, so pgid == pid.
            if unsafe { libc::killpg(pgid as libc::pid_t, libc::SIGKILL) } == 0 {
                tracing::debug!(pgid, "killed downloader process group");
            }
        }
        #[cfg(not(unix))]
        let _ = pgid;
    }
}

/// Last `max_bytes` of `text`, cut on a char boundary.
fn tail(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...(truncated)\n{}", &text[start..])
}

/// Regular files in `workdir`, sorted by name. None at all is `NoMedia`.
pub fn produced_files(workdir: &Path) -> Result<Vec<PathBuf>, FetchError> {
    let io_err = |source| FetchError::Io {
        path: workdir.to_path_buf(),
        source,
    };
    let mut files = Vec::new();
    for entry in std::fs::read_dir(workdir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let path = entry.path();
        if path.is_file() && !is_partial(&path) {
            files.push(path);
        }
    }
    if files.is_empty() {
        return Err(FetchError::NoMedia);
    }
    files.sort();
    Ok(files)
}

fn is_partial(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("part") | Some("ytdl")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strs(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().to_string()).collect()
    }

    #[test]
    fn music_args_extract_mp3() {
        let args = YtDlpFetcher::args_for(
            &FetchRequest::music("https://www.youtube.com/watch?v=abc"),
            Path::new("/tmp/job"),
        );
        assert_eq!(
            strs(&args),
            vec![
                "--extract-audio",
                "--audio-format",
                "mp3",
                "--audio-quality",
                "0",
                "--add-metadata",
                "-o",
                "/tmp/job/%(title)s.%(ext)s",
                "https://www.youtube.com/watch?v=abc",
            ]
        );
    }

    #[test]
    fn video_args_carry_format() {
        let args = strs(&YtDlpFetcher::args_for(
            &FetchRequest::video("https://youtu.be/x", "best[height<=720]"),
            Path::new("/tmp/job"),
        ));
        assert_eq!(&args[..2], &["-f", "best[height<=720]"]);
        assert!(args.contains(&"--no-check-certificate".to_string()));
        assert!(!args.contains(&"--cookies".to_string()));
    }

    #[test]
    fn media_args_pass_cookies() {
        let args = strs(&YtDlpFetcher::args_for(
            &FetchRequest::media(
                "https://www.instagram.com/p/abc/",
                Some(PathBuf::from("/tmp/cookies.txt")),
            ),
            Path::new("/tmp/job"),
        ));
        let idx = args.iter().position(|a| a == "--cookies").unwrap();
        assert_eq!(args[idx + 1], "/tmp/cookies.txt");
        assert_eq!(args.last().unwrap(), "https://www.instagram.com/p/abc/");
    }

    #[test]
    fn tail_keeps_end_on_char_boundary() {
        let text = "é".repeat(10);
        let cut = tail(&text, 5);
        assert!(cut.ends_with("éé"));
        assert!(cut.starts_with("...(truncated)"));
        assert_eq!(tail("short", 100), "short");
    }

    #[test]
    fn produced_files_skips_partials() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.mp4"), b"x").unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"x").unwrap();
        std::fs::write(dir.path().join("c.mp4.part"), b"x").unwrap();
        let files = produced_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.jpg", "b.mp4"]);
    }

    #[test]
    fn empty_dir_is_no_media() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(matches!(produced_files(dir.path()), Err(FetchError::NoMedia)));
    }

    #[test]
    fn video_info_duration_rounds() {
        let info: VideoInfo =
            serde_json::from_str(r#"{"title":"Clip","duration":212.6,"uploader":"Up"}"#).unwrap();
        assert_eq!(info.duration_secs(), Some(213));
        assert_eq!(info.channel_name(), "Up");
    }

    #[cfg(target_os = "linux")]
    fn is_gone(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            // Field 3 is the state; a zombie has already been killed.
            Ok(stat) => stat.rsplit(')').next().and_then(|rest| rest.split_whitespace().next()) == Some("Z"),
            Err(_) => true,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn dropped_run_kills_grandchildren() {
        use std::os::unix::fs::PermissionsExt;
        use std::time::Duration;

        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("fake-yt-dlp");
        std::fs::write(&script, "#!/bin/sh\nsleep 30 &\necho $! > \"$1\"\nwait\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        let pid_file = dir.path().join("child.pid");

        let args = vec![pid_file.clone().into_os_string()];
        let run = run_tool(script.to_str().unwrap(), &args);
        assert!(tokio::time::timeout(Duration::from_millis(500), run).await.is_err());

        let pid = std::fs::read_to_string(&pid_file).unwrap().trim().to_string();
        let mut gone = false;
        for _ in 0..50 {
            if is_gone(&pid) {
                gone = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(gone, "sleep {pid} outlived the cancelled run");
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let fetcher = YtDlpFetcher::new("/nonexistent/tunecrab-yt-dlp");
        let dir = tempfile::TempDir::new().unwrap();
        let err = fetcher
            .fetch(&FetchRequest::music("https://youtu.be/x"), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Spawn { .. }));
    }
}
