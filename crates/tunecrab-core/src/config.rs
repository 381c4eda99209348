use std::{fs, path::Path, path::PathBuf, time::Duration};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

/// Host the bot runs on. Resource ceilings default differently per host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostProfile {
    Termux,
    Ubuntu,
    Generic,
}

impl HostProfile {
    pub fn detect() -> Self {
        if std::env::consts::OS == "android" || Path::new("/data/data/com.termux").exists() {
            HostProfile::Termux
        } else if std::env::consts::OS == "linux" && Path::new("/etc/lsb-release").exists() {
            HostProfile::Ubuntu
        } else {
            HostProfile::Generic
        }
    }
}

impl std::fmt::Display for HostProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostProfile::Termux => write!(f, "termux"),
            HostProfile::Ubuntu => write!(f, "ubuntu"),
            HostProfile::Generic => write!(f, "generic"),
        }
    }
}

fn default_app_name() -> String {
    "tunecrab".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
        }
    }
}

/// Admission ceilings as written in the config file. Unset fields fall back
/// to the host profile defaults in [`LimitsConfig::resolve`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default)]
    pub max_concurrent_downloads: Option<usize>,
    #[serde(default)]
    pub job_timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_file_size_mb: Option<u64>,
    /// Jobs allowed to wait for a slot. Unset means unbounded.
    #[serde(default)]
    pub max_queue_depth: Option<usize>,
}

/// Effective admission ceilings, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    pub max_concurrent_downloads: usize,
    pub job_timeout: Duration,
    pub max_file_size_bytes: u64,
    pub max_queue_depth: Option<usize>,
}

impl LimitsConfig {
    pub fn resolve(&self, profile: HostProfile, cpus: usize) -> Limits {
        let (concurrent, timeout_secs, file_mb) = match profile {
            HostProfile::Termux => (1, 120, 25),
            HostProfile::Ubuntu | HostProfile::Generic => ((cpus / 2).clamp(1, 3), 240, 100),
        };
        Limits {
            max_concurrent_downloads: self.max_concurrent_downloads.unwrap_or(concurrent),
            job_timeout: Duration::from_secs(self.job_timeout_secs.unwrap_or(timeout_secs)),
            max_file_size_bytes: self.max_file_size_mb.unwrap_or(file_mb).saturating_mul(1024 * 1024),
            max_queue_depth: self.max_queue_depth,
        }
    }
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("temp")
}

fn default_downloads_dir() -> PathBuf {
    PathBuf::from("downloads")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
    #[serde(default = "default_downloads_dir")]
    pub downloads_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            temp_dir: default_temp_dir(),
            downloads_dir: default_downloads_dir(),
        }
    }
}

fn default_session_expiry_secs() -> u64 {
    3600
}

fn default_sweep_interval_secs() -> u64 {
    15 * 60
}

fn default_stale_artifact_secs() -> u64 {
    2 * 3600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_expiry_secs")]
    pub expiry_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_stale_artifact_secs")]
    pub stale_artifact_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            expiry_secs: default_session_expiry_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            stale_artifact_secs: default_stale_artifact_secs(),
        }
    }
}

fn default_ytdlp_binary() -> String {
    "yt-dlp".to_string()
}

fn default_ffmpeg_binary() -> String {
    "ffmpeg".to_string()
}

fn default_video_max_duration_secs() -> u64 {
    600
}

fn default_video_format() -> String {
    "best[height<=720]".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloaderConfig {
    #[serde(default = "default_ytdlp_binary")]
    pub ytdlp_binary: String,
    #[serde(default = "default_ffmpeg_binary")]
    pub ffmpeg_binary: String,
    #[serde(default = "default_video_max_duration_secs")]
    pub video_max_duration_secs: u64,
    #[serde(default = "default_video_format")]
    pub video_format: String,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            ytdlp_binary: default_ytdlp_binary(),
            ffmpeg_binary: default_ffmpeg_binary(),
            video_max_duration_secs: default_video_max_duration_secs(),
            video_format: default_video_format(),
        }
    }
}

fn default_requests_per_minute() -> u32 {
    30
}

fn default_burst() -> u32 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            burst: default_burst(),
        }
    }
}

fn default_telegram_connector_id() -> String {
    "tg_main".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramChannelConfig {
    #[serde(default = "default_telegram_connector_id")]
    pub connector_id: String,
    pub token: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub telegram: Option<TelegramChannelConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TunecrabConfig {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub downloader: DownloaderConfig,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub channels: ChannelsConfig,
}

impl TunecrabConfig {
    pub fn session_expiry(&self) -> Duration {
        Duration::from_secs(self.session.expiry_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.session.sweep_interval_secs)
    }

    pub fn stale_artifact_age(&self) -> Duration {
        Duration::from_secs(self.session.stale_artifact_secs)
    }

    /// Paths from the config are relative to `root` unless absolute.
    pub fn anchor_paths(&mut self, root: &Path) {
        if self.paths.temp_dir.is_relative() {
            self.paths.temp_dir = root.join(&self.paths.temp_dir);
        }
        if self.paths.downloads_dir.is_relative() {
            self.paths.downloads_dir = root.join(&self.paths.downloads_dir);
        }
    }
}

pub fn resolve_env_var(raw: &str) -> String {
    let mut output = String::new();
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);

        let candidate = &rest[start + 2..];
        let Some(end) = candidate.find('}') else {
            output.push_str(&rest[start..]);
            return output;
        };

        let key = &candidate[..end];
        output.push_str(&std::env::var(key).unwrap_or_default());
        rest = &candidate[end + 1..];
    }

    output.push_str(rest);
    output
}

/// Load `main.yaml` from `config_dir` if present, then apply process
/// environment overrides and validate.
pub fn load_config(config_dir: &Path) -> Result<TunecrabConfig> {
    let path = config_dir.join("main.yaml");
    let mut config = if path.exists() {
        read_yaml_file::<TunecrabConfig>(&path)?
    } else {
        TunecrabConfig::default()
    };

    resolve_config_env(&mut config);
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config)?;
    Ok(config)
}

pub fn apply_env_overrides<F>(config: &mut TunecrabConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup("TUNECRAB_MAX_CONCURRENT") {
        config.limits.max_concurrent_downloads = Some(parse_env("TUNECRAB_MAX_CONCURRENT", &raw)?);
    }
    if let Some(raw) = lookup("TUNECRAB_JOB_TIMEOUT_SECS") {
        config.limits.job_timeout_secs = Some(parse_env("TUNECRAB_JOB_TIMEOUT_SECS", &raw)?);
    }
    if let Some(raw) = lookup("TUNECRAB_MAX_FILE_MB") {
        config.limits.max_file_size_mb = Some(parse_env("TUNECRAB_MAX_FILE_MB", &raw)?);
    }
    if let Some(raw) = lookup("TUNECRAB_MAX_QUEUE") {
        config.limits.max_queue_depth = Some(parse_env("TUNECRAB_MAX_QUEUE", &raw)?);
    }
    if let Some(dir) = lookup("TUNECRAB_TEMP_DIR") {
        config.paths.temp_dir = PathBuf::from(dir);
    }
    if let Some(dir) = lookup("TUNECRAB_DOWNLOADS_DIR") {
        config.paths.downloads_dir = PathBuf::from(dir);
    }
    if let Some(bin) = lookup("TUNECRAB_YTDLP") {
        config.downloader.ytdlp_binary = bin;
    }
    if let Some(bin) = lookup("TUNECRAB_FFMPEG") {
        config.downloader.ffmpeg_binary = bin;
    }
    if let Some(token) = lookup("TELEGRAM_BOT_TOKEN").filter(|t| !t.trim().is_empty()) {
        match &mut config.channels.telegram {
            Some(telegram) => telegram.token = token,
            None => {
                config.channels.telegram = Some(TelegramChannelConfig {
                    connector_id: default_telegram_connector_id(),
                    token,
                })
            }
        }
    }
    Ok(())
}

fn parse_env<T>(key: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| anyhow!("invalid value for {key} ({raw:?}): {e}"))
}

pub fn validate_config(config: &TunecrabConfig) -> Result<()> {
    if config.limits.max_concurrent_downloads == Some(0) {
        return Err(anyhow!("limits.max_concurrent_downloads must be at least 1"));
    }
    if config.limits.job_timeout_secs == Some(0) {
        return Err(anyhow!("limits.job_timeout_secs must be positive"));
    }
    if config.limits.max_file_size_mb == Some(0) {
        return Err(anyhow!("limits.max_file_size_mb must be positive"));
    }
    if config.session.expiry_secs == 0 {
        return Err(anyhow!("session.expiry_secs must be positive"));
    }
    if config.session.sweep_interval_secs == 0 {
        return Err(anyhow!("session.sweep_interval_secs must be positive"));
    }
    if let Some(telegram) = &config.channels.telegram {
        if telegram.token.trim().is_empty() {
            return Err(anyhow!("channels.telegram.token is empty"));
        }
    }
    Ok(())
}

fn read_yaml_file<T>(path: &Path) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse yaml file: {}", path.display()))
}

fn resolve_config_env(config: &mut TunecrabConfig) {
    config.app.name = resolve_env_var(&config.app.name);
    config.downloader.ytdlp_binary = resolve_env_var(&config.downloader.ytdlp_binary);
    config.downloader.ffmpeg_binary = resolve_env_var(&config.downloader.ffmpeg_binary);
    config.paths.temp_dir = PathBuf::from(resolve_env_var(&config.paths.temp_dir.to_string_lossy()));
    config.paths.downloads_dir =
        PathBuf::from(resolve_env_var(&config.paths.downloads_dir.to_string_lossy()));

    if let Some(telegram) = &mut config.channels.telegram {
        telegram.connector_id = resolve_env_var(&telegram.connector_id);
        telegram.token = resolve_env_var(&telegram.token);
    }
}
