//! Command routing and download orchestration.
//!
//! Each inbound message is classified (credential export, unaddressed group
//! chatter, selection reply, `!command`, free text) and drives at most one
//! session transition. Downloads are reserved for the conversation before the
//! handler returns and then run on a tracked task, so a later `!cancel` from
//! the same conversation is never stuck behind its own job.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tunecrab_bus::BusPublisher;
use tunecrab_schema::{BusMessage, ConversationKey, InboundMessage, JobKind, JobState, MediaKind, MediaPayload};

use crate::admission::{AdmissionController, Reservation};
use crate::catalog::{to_search_results, watch_url, CatalogSearch};
use crate::commands::{
    is_credential_export, is_greeting, is_instagram_url, is_youtube_url, mentions_handle,
    parse_command, parse_selection, strip_mention, BotCommand,
};
use crate::config::{Limits, TunecrabConfig};
use crate::credentials;
use crate::error::{BotError, FetchError, Rejected};
use crate::fetcher::{FetchRequest, MediaFetcher};
use crate::job::{DownloadJob, JobOutcome};
use crate::media::{classify_files, Deliverable};
use crate::outbox::{Outbox, Replier};
use crate::replies;
use crate::session::{SearchResult, SessionGuard, SessionStore};
use crate::workdir::JobWorkdir;

// ──── Types ────

#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub limits: Limits,
    pub temp_dir: PathBuf,
    pub downloads_dir: PathBuf,
    pub video_format: String,
    pub video_max_duration_secs: u64,
    /// The bot's own username. Group messages must mention it to be handled.
    pub bot_handle: Option<String>,
}

impl RouterSettings {
    pub fn from_config(config: &TunecrabConfig, limits: Limits) -> Self {
        Self {
            limits,
            temp_dir: config.paths.temp_dir.clone(),
            downloads_dir: config.paths.downloads_dir.clone(),
            video_format: config.downloader.video_format.clone(),
            video_max_duration_secs: config.downloader.video_max_duration_secs,
            bot_handle: None,
        }
    }

    pub fn with_bot_handle(mut self, handle: Option<String>) -> Self {
        self.bot_handle = handle.filter(|h| !h.trim().is_empty());
        self
    }

    /// Whether `inbound` mentions this bot rather than some other member.
    pub fn addresses_bot(&self, inbound: &InboundMessage) -> bool {
        match (&self.bot_handle, &inbound.mention_target) {
            (Some(handle), Some(target)) => inbound.is_mention && mentions_handle(target, handle),
            _ => false,
        }
    }
}

/// Which classification branch a message took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    CredentialImport,
    Ignored,
    Selection,
    Command(&'static str),
    FreeText,
    Failed,
}

/// Result of handling one inbound message.
#[derive(Debug)]
pub struct Dispatch {
    pub route: Route,
    /// The download started by this message, resolving to its final state.
    pub job: Option<JoinHandle<JobState>>,
}

impl Dispatch {
    fn done(route: Route) -> Self {
        Self { route, job: None }
    }
}

/// Failure inside a running job.
#[derive(Debug, thiserror::Error)]
enum JobError {
    #[error(transparent)]
    Bot(#[from] BotError),
    /// Carries its own reply instead of the generic one for its kind.
    #[error("{detail}")]
    Notice { reply: String, detail: String },
}

impl JobError {
    fn notice(reply: impl Into<String>, detail: impl Into<String>) -> Self {
        JobError::Notice {
            reply: reply.into(),
            detail: detail.into(),
        }
    }
}

fn download_error(err: FetchError) -> JobError {
    match err {
        FetchError::Io { .. } => BotError::Conversion(err.to_string()).into(),
        other => BotError::Download(other.summary()).into(),
    }
}

fn conversion_error(err: FetchError) -> JobError {
    BotError::Conversion(err.to_string()).into()
}

/// Prefer a file of `kind`, else the first one.
fn pick(deliverables: &[Deliverable], kind: MediaKind) -> Option<&Deliverable> {
    deliverables
        .iter()
        .find(|d| d.kind == kind)
        .or_else(|| deliverables.first())
}

// ──── Orchestrator ────

#[derive(Clone)]
pub struct Orchestrator {
    settings: Arc<RouterSettings>,
    sessions: SessionStore,
    admission: AdmissionController,
    catalog: Arc<dyn CatalogSearch>,
    fetcher: Arc<dyn MediaFetcher>,
    replier: Replier,
    bus: BusPublisher,
    jobs: TaskTracker,
}

impl Orchestrator {
    pub fn new(
        settings: RouterSettings,
        sessions: SessionStore,
        catalog: Arc<dyn CatalogSearch>,
        fetcher: Arc<dyn MediaFetcher>,
        outbox: Arc<dyn Outbox>,
        bus: BusPublisher,
    ) -> Self {
        let admission = AdmissionController::from_limits(&settings.limits);
        Self {
            settings: Arc::new(settings),
            sessions,
            admission,
            catalog,
            fetcher,
            replier: Replier::new(outbox),
            bus,
            jobs: TaskTracker::new(),
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn settings(&self) -> &RouterSettings {
        &self.settings
    }

    pub fn replier(&self) -> &Replier {
        &self.replier
    }

    /// Classify and act on one message. Never fails: handler errors are
    /// logged, answered with a translated notice and announced on the bus.
    pub async fn handle(&self, inbound: &InboundMessage) -> Dispatch {
        let key = ConversationKey::from_inbound(inbound);
        match self.route(inbound, &key).await {
            Ok(dispatch) => {
                tracing::debug!(
                    trace_id = %inbound.trace_id,
                    conversation = %key,
                    route = ?dispatch.route,
                    "message handled"
                );
                dispatch
            }
            Err(err) => {
                match err.downcast_ref::<BotError>() {
                    Some(bot) => {
                        self.replier.error(inbound, bot).await;
                    }
                    None => {
                        tracing::error!(
                            trace_id = %inbound.trace_id,
                            conversation = %key,
                            error = %format!("{err:#}"),
                            "handler failed"
                        );
                        self.replier.notice(inbound, replies::GENERIC_ERROR).await;
                    }
                }
                self.publish(BusMessage::TaskFailed {
                    trace_id: inbound.trace_id,
                    error: format!("{err:#}"),
                })
                .await;
                Dispatch::done(Route::Failed)
            }
        }
    }

    async fn route(&self, inbound: &InboundMessage, key: &ConversationKey) -> Result<Dispatch> {
        if is_credential_export(&inbound.text) {
            self.import_credentials(inbound, key).await;
            return Ok(Dispatch::done(Route::CredentialImport));
        }

        if inbound.is_group && !self.settings.addresses_bot(inbound) {
            return Ok(Dispatch::done(Route::Ignored));
        }

        let text = strip_mention(&inbound.text, self.settings.bot_handle.as_deref());

        if let Some(index) = parse_selection(text) {
            let mut session = self.sessions.lock(key).await;
            if session.awaiting_selection() {
                let job = self.select(inbound, key, &mut session, index).await?;
                return Ok(Dispatch {
                    route: Route::Selection,
                    job,
                });
            }
        }

        if let Some(command) = parse_command(text) {
            let name = command.name();
            let job = self.dispatch_command(inbound, key, command).await?;
            return Ok(Dispatch {
                route: Route::Command(name),
                job,
            });
        }

        let reply = if is_greeting(text) {
            replies::GREETING
        } else {
            replies::CAPABILITIES
        };
        self.replier.text(inbound, reply).await;
        Ok(Dispatch::done(Route::FreeText))
    }

    async fn dispatch_command(
        &self,
        inbound: &InboundMessage,
        key: &ConversationKey,
        command: BotCommand,
    ) -> Result<Option<JoinHandle<JobState>>> {
        match command {
            BotCommand::Music { query } => {
                self.search_music(inbound, key, &query).await?;
                Ok(None)
            }
            BotCommand::Youtube { url } => Ok(self.start_video(inbound, key, url).await),
            BotCommand::Instagram { url } => Ok(self.start_instagram(inbound, key, url).await),
            BotCommand::InstagramLogin => {
                self.replier.text(inbound, replies::IG_LOGIN_HELP).await;
                Ok(None)
            }
            BotCommand::Help => {
                self.replier.text(inbound, replies::HELP).await;
                Ok(None)
            }
            BotCommand::Ping => {
                self.replier.text(inbound, replies::PONG).await;
                Ok(None)
            }
            BotCommand::Cancel => {
                self.cancel(inbound, key).await;
                Ok(None)
            }
        }
    }

    // ──── Session transitions ────

    async fn import_credentials(&self, inbound: &InboundMessage, key: &ConversationKey) {
        let mut session = self.sessions.lock(key).await;
        match credentials::save(&self.settings.temp_dir, key, &inbound.text).await {
            Ok(path) => {
                if let Some(previous) = session.set_credential_file(path) {
                    credentials::remove(&previous).await;
                }
                drop(session);
                self.replier.text(inbound, replies::COOKIES_SAVED).await;
            }
            Err(e) => {
                drop(session);
                tracing::warn!(conversation = %key, error = %format!("{e:#}"), "credential import failed");
                self.replier.text(inbound, replies::COOKIES_FAILED).await;
            }
        }
    }

    async fn search_music(&self, inbound: &InboundMessage, key: &ConversationKey, query: &str) -> Result<()> {
        if query.is_empty() {
            self.replier.text(inbound, replies::MUSIC_USAGE).await;
            return Ok(());
        }
        if self.admission.is_busy(key) {
            self.replier.text(inbound, replies::BUSY).await;
            return Ok(());
        }

        // Held across the lookup so a selection cannot interleave with the new list.
        let mut session = self.sessions.lock(key).await;
        self.replier.text(inbound, replies::searching(query)).await;

        let entries = self
            .catalog
            .search(query)
            .await
            .map_err(|e| BotError::Search(format!("{e:#}")))?;
        let results = to_search_results(entries);
        session.set_pending_results(results.clone());
        drop(session);

        tracing::info!(conversation = %key, query, count = results.len(), "catalog search finished");
        if results.is_empty() {
            self.replier.text(inbound, replies::no_results(query)).await;
        } else {
            self.replier
                .text(inbound, replies::result_list(query, &results))
                .await;
        }
        Ok(())
    }

    async fn select(
        &self,
        inbound: &InboundMessage,
        key: &ConversationKey,
        session: &mut SessionGuard,
        index: usize,
    ) -> Result<Option<JoinHandle<JobState>>> {
        let Some(choice) = session.pending_results().get(index).cloned() else {
            return Err(BotError::SessionState(format!(
                "selection {} outside pending list of {}",
                index + 1,
                session.pending_results().len()
            ))
            .into());
        };

        let job = DownloadJob::new(
            JobKind::MusicFetch,
            watch_url(&choice.external_id),
            key.clone(),
            self.settings.limits.job_timeout,
        );
        let reservation = match self.admission.reserve(&job) {
            Ok(reservation) => reservation,
            Err(rejected) => {
                self.reply_rejected(inbound, rejected).await;
                return Ok(None);
            }
        };
        session.consume_selection(index);

        self.replier
            .text(inbound, replies::downloading_song(&choice))
            .await;

        let this = self.clone();
        let msg = inbound.clone();
        Ok(Some(self.spawn_job(inbound, job, reservation, move |dir| async move {
            this.deliver_song(&msg, &choice, &dir).await
        })))
    }

    async fn start_video(
        &self,
        inbound: &InboundMessage,
        key: &ConversationKey,
        url: String,
    ) -> Option<JoinHandle<JobState>> {
        if url.is_empty() || !is_youtube_url(&url) {
            self.replier.text(inbound, replies::YT_INVALID).await;
            return None;
        }
        let job = DownloadJob::new(
            JobKind::VideoFetch,
            url.clone(),
            key.clone(),
            self.settings.limits.job_timeout,
        );
        let reservation = match self.admission.reserve(&job) {
            Ok(reservation) => reservation,
            Err(rejected) => {
                self.reply_rejected(inbound, rejected).await;
                return None;
            }
        };
        self.replier.text(inbound, replies::YT_PROCESSING).await;

        let this = self.clone();
        let msg = inbound.clone();
        Some(self.spawn_job(inbound, job, reservation, move |dir| async move {
            this.fetch_video(&msg, &url, &dir).await
        }))
    }

    async fn start_instagram(
        &self,
        inbound: &InboundMessage,
        key: &ConversationKey,
        url: String,
    ) -> Option<JoinHandle<JobState>> {
        if url.is_empty() || !is_instagram_url(&url) {
            self.replier.text(inbound, replies::IG_INVALID).await;
            return None;
        }
        let job = DownloadJob::new(
            JobKind::MediaFetch,
            url.clone(),
            key.clone(),
            self.settings.limits.job_timeout,
        );
        let reservation = match self.admission.reserve(&job) {
            Ok(reservation) => reservation,
            Err(rejected) => {
                self.reply_rejected(inbound, rejected).await;
                return None;
            }
        };

        let cookies = self
            .sessions
            .lock(key)
            .await
            .credential_file()
            .filter(|path| path.exists())
            .cloned();
        if cookies.is_none() {
            tracing::debug!(conversation = %key, "no credentials, fetching anonymously");
        }
        self.replier.text(inbound, replies::IG_PROCESSING).await;

        let this = self.clone();
        let msg = inbound.clone();
        let key = key.clone();
        Some(self.spawn_job(inbound, job, reservation, move |dir| async move {
            this.fetch_instagram(&msg, &key, FetchRequest::media(url, cookies), &dir)
                .await
        }))
    }

    async fn cancel(&self, inbound: &InboundMessage, key: &ConversationKey) {
        let cleared = {
            let mut session = self.sessions.lock(key).await;
            let had_selection = session.awaiting_selection();
            session.clear();
            had_selection
        };
        let stopping = self.admission.cancel(key);
        tracing::info!(conversation = %key, stopping, cleared, "cancel requested");

        let reply = if stopping {
            replies::CANCEL_REQUESTED
        } else if cleared {
            replies::SELECTION_CLEARED
        } else {
            replies::NOTHING_TO_CANCEL
        };
        self.replier.text(inbound, reply).await;
    }

    async fn reply_rejected(&self, inbound: &InboundMessage, rejected: Rejected) {
        tracing::info!(trace_id = %inbound.trace_id, reason = %rejected, "job not admitted");
        let reply = match rejected {
            Rejected::ConversationBusy => replies::BUSY,
            Rejected::QueueFull => replies::QUEUE_FULL,
            Rejected::Cancelled => replies::CANCELLED,
            Rejected::Closed => replies::SHUTTING_DOWN,
        };
        self.replier.text(inbound, reply).await;
    }

    // ──── Job execution ────

    fn spawn_job<F, Fut>(
        &self,
        inbound: &InboundMessage,
        job: DownloadJob,
        reservation: Reservation,
        work: F,
    ) -> JoinHandle<JobState>
    where
        F: FnOnce(PathBuf) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), JobError>> + Send + 'static,
    {
        let this = self.clone();
        let inbound = inbound.clone();
        self.jobs
            .spawn(async move { this.execute(inbound, job, reservation, work).await })
    }

    async fn execute<F, Fut>(
        self,
        inbound: InboundMessage,
        job: DownloadJob,
        reservation: Reservation,
        work: F,
    ) -> JobState
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<(), JobError>>,
    {
        let lease = match reservation.acquire(job.cancel_token()).await {
            Ok(lease) => {
                let stats = self.admission.stats();
                tracing::debug!(
                    job_id = %job.id,
                    running = stats.running,
                    slots = self.admission.max_concurrent(),
                    queued = stats.queued,
                    "download slot acquired"
                );
                lease
            }
            Err(rejected) => {
                let state = if rejected == Rejected::Cancelled {
                    JobState::Cancelled
                } else {
                    JobState::Failed
                };
                job.transition(state);
                self.reply_rejected(&inbound, rejected).await;
                return job.state();
            }
        };

        let root = match job.kind {
            JobKind::MusicFetch => &self.settings.downloads_dir,
            JobKind::VideoFetch | JobKind::MediaFetch => &self.settings.temp_dir,
        };
        let workdir = match JobWorkdir::create(root, job.kind) {
            Ok(workdir) => workdir,
            Err(e) => {
                job.transition(JobState::Failed);
                drop(lease);
                let err = BotError::Download(format!("{e:#}"));
                self.replier.error(&inbound, &err).await;
                return job.state();
            }
        };

        self.publish(BusMessage::JobStarted {
            job_id: job.id,
            conversation: job.conversation.to_string(),
            kind: job.kind,
        })
        .await;

        let outcome = job.run(lease, workdir, work).await;

        self.publish(BusMessage::JobFinished {
            job_id: job.id,
            conversation: job.conversation.to_string(),
            kind: job.kind,
            state: job.state(),
            elapsed_ms: job.elapsed_ms(),
        })
        .await;

        match outcome {
            JobOutcome::Succeeded(()) => {}
            JobOutcome::Failed(JobError::Bot(err)) => {
                self.replier.error(&inbound, &err).await;
                self.publish(BusMessage::TaskFailed {
                    trace_id: inbound.trace_id,
                    error: err.to_string(),
                })
                .await;
            }
            JobOutcome::Failed(JobError::Notice { reply, detail }) => {
                tracing::warn!(job_id = %job.id, detail = %detail, "job failed");
                self.replier.notice(&inbound, reply).await;
            }
            JobOutcome::TimedOut => {
                tracing::warn!(job_id = %job.id, timeout_secs = job.timeout.as_secs(), "job timed out");
                self.replier.text(&inbound, replies::TIMED_OUT).await;
            }
            JobOutcome::Cancelled => {
                self.replier.text(&inbound, replies::CANCELLED).await;
            }
        }
        job.state()
    }

    async fn deliver_song(
        &self,
        inbound: &InboundMessage,
        choice: &SearchResult,
        dir: &Path,
    ) -> Result<(), JobError> {
        let request = FetchRequest::music(watch_url(&choice.external_id));
        let files = self
            .fetcher
            .fetch(&request, dir)
            .await
            .map_err(download_error)?;
        let max_bytes = self.settings.limits.max_file_size_bytes;
        let classified = classify_files(&files, max_bytes).map_err(conversion_error)?;

        let Some(track) = pick(&classified.deliverables, MediaKind::Audio) else {
            if let Some(big) = classified.oversized.first() {
                return Err(JobError::notice(
                    replies::audio_too_large(big.size),
                    format!("{} is {} bytes, limit {max_bytes}", big.file_name, big.size),
                ));
            }
            return Err(BotError::Conversion("no audio file produced".into()).into());
        };
        if track.size == 0 {
            return Err(BotError::Conversion(format!("{} is empty", track.file_name)).into());
        }

        let file_name = format!(
            "{}.mp3",
            replies::sanitize_filename(&format!("{} - {}", choice.title, choice.artist))
        );
        let audio = audio_payload(track, choice, &file_name, MediaKind::Audio).await?;

        match self.replier.media(inbound, audio).await {
            Ok(()) => {
                self.replier
                    .text(inbound, replies::song_info(choice, track.size, false))
                    .await;
            }
            Err(e) => {
                tracing::warn!(error = %e, file = %file_name, "audio delivery failed, sending as document");
                let document = audio_payload(track, choice, &file_name, MediaKind::Document).await?;
                self.replier
                    .media(inbound, document)
                    .await
                    .map_err(|e| BotError::Delivery(e.to_string()))?;
                self.replier
                    .text(inbound, replies::song_info(choice, track.size, true))
                    .await;
            }
        }
        Ok(())
    }

    async fn fetch_video(&self, inbound: &InboundMessage, url: &str, dir: &Path) -> Result<(), JobError> {
        let info = self
            .fetcher
            .probe(url)
            .await
            .map_err(|e| BotError::Download(format!("metadata probe failed: {e}")))?;

        let limit = self.settings.video_max_duration_secs;
        if let Some(secs) = info.duration_secs().filter(|secs| *secs > limit) {
            return Err(JobError::notice(
                replies::video_too_long(secs),
                format!("video is {secs}s, limit {limit}s"),
            ));
        }
        self.replier.text(inbound, replies::video_found(&info)).await;

        let request = FetchRequest::video(url, self.settings.video_format.clone());
        let files = self
            .fetcher
            .fetch(&request, dir)
            .await
            .map_err(download_error)?;
        let classified =
            classify_files(&files, self.settings.limits.max_file_size_bytes).map_err(conversion_error)?;

        let Some(video) = pick(&classified.deliverables, MediaKind::Video) else {
            if let Some(big) = classified.oversized.first() {
                return Err(JobError::notice(
                    replies::video_too_large(big.size),
                    format!("{} exceeds the size ceiling", big.file_name),
                ));
            }
            return Err(BotError::Download("no video file produced".into()).into());
        };

        let payload = video
            .load(Some(replies::video_caption(&info, video.size)))
            .await
            .map_err(conversion_error)?;
        self.replier
            .media(inbound, payload)
            .await
            .map_err(|e| BotError::Delivery(e.to_string()))?;
        Ok(())
    }

    async fn fetch_instagram(
        &self,
        inbound: &InboundMessage,
        key: &ConversationKey,
        request: FetchRequest,
        dir: &Path,
    ) -> Result<(), JobError> {
        let files = match self.fetcher.fetch(&request, dir).await {
            Ok(files) => files,
            Err(FetchError::NoMedia) => {
                return Err(JobError::notice(replies::IG_NO_MEDIA, "downloader produced no media"))
            }
            Err(FetchError::Exit { code, diagnostics }) => {
                return Err(self.instagram_failure(key, code, diagnostics).await)
            }
            Err(e) => return Err(download_error(e)),
        };

        let max_bytes = self.settings.limits.max_file_size_bytes;
        let classified = classify_files(&files, max_bytes).map_err(conversion_error)?;
        for big in &classified.oversized {
            self.replier
                .text(inbound, replies::file_too_large(&big.file_name, big.size, max_bytes))
                .await;
        }

        let mut delivered = 0;
        let mut last_error = None;
        for item in &classified.deliverables {
            let payload = item.load(None).await.map_err(conversion_error)?;
            match self.replier.media(inbound, payload).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(file = %item.file_name, error = %e, "media delivery failed");
                    last_error = Some(e);
                }
            }
        }

        if delivered == 0 {
            if let Some(e) = last_error {
                return Err(BotError::Delivery(e.to_string()).into());
            }
            return Err(JobError::notice(
                replies::IG_NOTHING_SENDABLE,
                format!("all {} files over the size limit", classified.oversized.len()),
            ));
        }
        self.replier.text(inbound, replies::IG_COMPLETE).await;
        Ok(())
    }

    /// Map downloader diagnostics to a reply. A login complaint also drops
    /// the conversation's stored credentials.
    async fn instagram_failure(
        &self,
        key: &ConversationKey,
        code: Option<i32>,
        diagnostics: String,
    ) -> JobError {
        if diagnostics.contains("This content is private") {
            return JobError::notice(replies::IG_PRIVATE, diagnostics);
        }
        if diagnostics.to_lowercase().contains("login") {
            let stale = self.sessions.lock(key).await.take_credential_file();
            if let Some(path) = stale {
                credentials::remove(&path).await;
            }
            return JobError::notice(replies::IG_LOGIN_REQUIRED, diagnostics);
        }
        JobError::notice(replies::ig_failed(code), diagnostics)
    }

    async fn publish(&self, msg: BusMessage) {
        if let Err(e) = self.bus.publish(msg).await {
            tracing::warn!(error = %e, "bus publish failed");
        }
    }

    /// Stop admitting, cancel every job and wait up to `grace` for them to
    /// clean up.
    pub async fn shutdown(&self, grace: Duration) {
        self.admission.close();
        let cancelled = self.admission.cancel_all();
        self.jobs.close();
        if cancelled > 0 {
            tracing::info!(cancelled, "cancelling in-flight jobs");
        }
        if tokio::time::timeout(grace, self.jobs.wait()).await.is_err() {
            tracing::warn!(grace_secs = grace.as_secs(), "jobs still running after shutdown grace");
        }
    }
}

async fn audio_payload(
    track: &Deliverable,
    choice: &SearchResult,
    file_name: &str,
    kind: MediaKind,
) -> Result<MediaPayload, JobError> {
    let mut payload = track.load(None).await.map_err(conversion_error)?;
    payload.kind = kind;
    payload.mime_type = "audio/mpeg".to_string();
    payload.file_name = file_name.to_string();
    payload.title = Some(choice.title.clone());
    payload.performer = Some(choice.artist.clone());
    Ok(payload)
}
