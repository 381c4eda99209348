use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use teloxide::requests::Requester;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod lock;
mod probe;

use lock::ProcessLock;
use tunecrab_bus::EventBus;
use tunecrab_channels::console::{ConsoleBot, ConsoleOutbox};
use tunecrab_channels::telegram::{TelegramBot, TelegramOutbox};
use tunecrab_channels::ChannelBot;
use tunecrab_core::*;
use tunecrab_gateway::{spawn_job_event_listener, Gateway, RateLimitConfig, RateLimiter};

const CATALOG_TIMEOUT: Duration = Duration::from_secs(30);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "tunecrab", version, about = "tunecrab music and video download bot")]
struct Cli {
    #[arg(
        long,
        default_value = "~/.tunecrab",
        help = "Config root directory (contains config/, logs/ and scratch dirs)"
    )]
    config_root: PathBuf,

    #[arg(long, help = "Talk to the bot on stdin instead of Telegram")]
    console: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();

    // Expand ~ to home directory
    if cli.config_root.starts_with("~") {
        if let Some(home) = std::env::var_os("HOME") {
            cli.config_root = PathBuf::from(home).join(
                cli.config_root
                    .strip_prefix("~")
                    .unwrap_or(&cli.config_root),
            );
        }
    }

    let log_dir = cli.config_root.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, "tunecrab.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .init();

    let _lock = ProcessLock::acquire(&cli.config_root.join("tunecrab.lock"))?;
    start_bot(&cli.config_root, cli.console).await
}

async fn start_bot(root: &Path, force_console: bool) -> Result<()> {
    let profile = HostProfile::detect();
    let mut config = load_config(&root.join("config"))?;
    config.anchor_paths(root);

    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let limits = config.limits.resolve(profile, cpus);
    tracing::info!(
        app = %config.app.name,
        profile = %profile,
        cpus,
        max_concurrent = limits.max_concurrent_downloads,
        job_timeout_secs = limits.job_timeout.as_secs(),
        max_file_mb = limits.max_file_size_bytes / (1024 * 1024),
        "host profile resolved"
    );

    probe::ensure_tools(&config.downloader).await?;

    for dir in [&config.paths.temp_dir, &config.paths.downloads_dir] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let bus = EventBus::new(256);
    let listener = spawn_job_event_listener(&bus).await;
    let shutdown = CancellationToken::new();

    let sessions = SessionStore::new(config.session_expiry());
    let maintenance = spawn_maintenance(
        sessions.clone(),
        vec![config.paths.temp_dir.clone(), config.paths.downloads_dir.clone()],
        config.sweep_interval(),
        config.stale_artifact_age(),
        shutdown.clone(),
    );

    let catalog = Arc::new(YtDlpCatalog::new(
        config.downloader.ytdlp_binary.clone(),
        CATALOG_TIMEOUT,
    ));
    let fetcher = Arc::new(YtDlpFetcher::new(config.downloader.ytdlp_binary.clone()));
    let settings = RouterSettings::from_config(&config, limits);
    let rate_limiter = RateLimiter::new(RateLimitConfig::from(&config.rate_limit));

    let telegram = config
        .channels
        .telegram
        .clone()
        .filter(|tg| !force_console && !tg.token.trim().is_empty());

    let (orchestrator, bot): (Orchestrator, Box<dyn ChannelBot>) = match telegram {
        Some(tg) => {
            let client = teloxide::Bot::new(tg.token.trim());
            let me = client
                .get_me()
                .await
                .context("failed to reach Telegram with the configured bot token")?;
            let bot_handle = me.user.username.clone();
            tracing::info!(username = ?bot_handle, "telegram bot identity resolved");

            let outbox = Arc::new(TelegramOutbox::new(client.clone()));
            let settings = settings.with_bot_handle(bot_handle.clone());
            let orchestrator =
                Orchestrator::new(settings, sessions, catalog, fetcher, outbox, bus.publisher());
            let gateway = Arc::new(Gateway::new(orchestrator.clone(), bus.publisher(), rate_limiter));
            let bot = TelegramBot::new(client, tg.connector_id, bot_handle, gateway, shutdown.clone());
            (orchestrator, Box::new(bot))
        }
        None => {
            // Outside the swept scratch roots.
            let outbox = Arc::new(ConsoleOutbox::stdout(root.join("received")));
            let orchestrator =
                Orchestrator::new(settings, sessions, catalog, fetcher, outbox, bus.publisher());
            let gateway = Arc::new(Gateway::new(orchestrator.clone(), bus.publisher(), rate_limiter));
            let bot = ConsoleBot::new("console".to_string(), gateway, shutdown.clone());
            (orchestrator, Box::new(bot))
        }
    };

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    tracing::info!(
        channel = bot.channel_type(),
        connector = bot.connector_id(),
        "starting channel bot"
    );
    let result = bot.run().await;

    shutdown.cancel();
    orchestrator.shutdown(SHUTDOWN_GRACE).await;
    if let Err(e) = maintenance.await {
        tracing::warn!(error = %e, "maintenance task ended abnormally");
    }
    listener.abort();
    tracing::info!("shutdown complete. Goodbye.");
    result
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => tracing::info!("Received SIGINT, shutting down..."),
            _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        tracing::info!("Received SIGINT, shutting down...");
    }
}
