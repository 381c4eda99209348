use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tunecrab_bus::{EventBus, Topic};
use tunecrab_core::replies;
use tunecrab_core::*;
use tunecrab_schema::{
    BusMessage, ConversationKey, InboundMessage, JobState, MediaKind, OutboundBody,
    OutboundMessage,
};
use uuid::Uuid;

// ──── Fakes ────

struct FakeCatalog {
    lines: &'static str,
}

#[async_trait]
impl CatalogSearch for FakeCatalog {
    async fn search(&self, _query: &str) -> anyhow::Result<Vec<CatalogEntry>> {
        parse_entries(self.lines)
    }
}

const THREE_SONGS: &str = r#"{"title":"Shape of You","channel":"Ed Sheeran","duration":233,"id":"aaa"}
{"title":"Second Song","artists":[{"name":"Artist B"}],"duration":181,"id":"bbb"}
{"title":"Third Song","uploader":"Someone","id":"ccc"}"#;

enum FetchMode {
    /// Write these files (name, size) into the workdir.
    Produce(Vec<(&'static str, usize)>),
    /// Never finish.
    Hang,
    Fail {
        code: Option<i32>,
        diagnostics: &'static str,
    },
}

struct FakeFetcher {
    mode: FetchMode,
    duration: Option<f64>,
    requests: Mutex<Vec<FetchRequest>>,
}

impl FakeFetcher {
    fn new(mode: FetchMode) -> Self {
        Self {
            mode,
            duration: Some(120.0),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaFetcher for FakeFetcher {
    async fn probe(&self, _url: &str) -> Result<VideoInfo, FetchError> {
        Ok(VideoInfo {
            title: "Clip".into(),
            duration: self.duration,
            channel: Some("Channel".into()),
            uploader: None,
        })
    }

    async fn fetch(&self, request: &FetchRequest, workdir: &Path) -> Result<Vec<PathBuf>, FetchError> {
        self.requests.lock().unwrap().push(request.clone());
        match &self.mode {
            FetchMode::Produce(files) => {
                for (name, size) in files {
                    std::fs::write(workdir.join(name), vec![7u8; *size]).unwrap();
                }
                produced_files(workdir)
            }
            FetchMode::Hang => std::future::pending().await,
            FetchMode::Fail { code, diagnostics } => Err(FetchError::Exit {
                code: *code,
                diagnostics: diagnostics.to_string(),
            }),
        }
    }
}

#[derive(Default)]
struct RecordingOutbox {
    sent: Mutex<Vec<OutboundMessage>>,
    reject_audio: bool,
}

#[async_trait]
impl Outbox for RecordingOutbox {
    async fn send(&self, msg: OutboundMessage) -> Result<(), DeliveryError> {
        if self.reject_audio && msg.media_kind() == Some(MediaKind::Audio) {
            return Err(DeliveryError::Rejected("audio not accepted".into()));
        }
        self.sent.lock().unwrap().push(msg);
        Ok(())
    }
}

impl RecordingOutbox {
    fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| matches!(m.body, OutboundBody::Text { .. }))
            .filter_map(|m| m.text().map(str::to_string))
            .collect()
    }

    fn media(&self) -> Vec<(MediaKind, String)> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| match &m.body {
                OutboundBody::Media(media) => Some((media.kind, media.file_name.clone())),
                OutboundBody::Text { .. } => None,
            })
            .collect()
    }

    fn last_text(&self) -> String {
        self.texts().last().cloned().unwrap_or_default()
    }
}

// ──── Harness ────

struct Harness {
    orchestrator: Orchestrator,
    outbox: Arc<RecordingOutbox>,
    fetcher: Arc<FakeFetcher>,
    bus: EventBus,
    temp_dir: PathBuf,
    downloads_dir: PathBuf,
    _root: TempDir,
}

fn harness_with(fetcher: FakeFetcher, outbox: RecordingOutbox, job_timeout: Duration) -> Harness {
    let root = TempDir::new().unwrap();
    let temp_dir = root.path().join("temp");
    let downloads_dir = root.path().join("downloads");
    std::fs::create_dir_all(&temp_dir).unwrap();
    std::fs::create_dir_all(&downloads_dir).unwrap();

    let settings = RouterSettings {
        limits: Limits {
            max_concurrent_downloads: 2,
            job_timeout,
            max_file_size_bytes: 1024 * 1024,
            max_queue_depth: Some(4),
        },
        temp_dir: temp_dir.clone(),
        downloads_dir: downloads_dir.clone(),
        video_format: "best[height<=720]".into(),
        video_max_duration_secs: 600,
        bot_handle: Some("tunebot".into()),
    };

    let bus = EventBus::new(64);
    let outbox = Arc::new(outbox);
    let fetcher = Arc::new(fetcher);
    let orchestrator = Orchestrator::new(
        settings,
        SessionStore::new(Duration::from_secs(3600)),
        Arc::new(FakeCatalog { lines: THREE_SONGS }),
        fetcher.clone(),
        outbox.clone(),
        bus.publisher(),
    );

    Harness {
        orchestrator,
        outbox,
        fetcher,
        bus,
        temp_dir,
        downloads_dir,
        _root: root,
    }
}

fn harness(mode: FetchMode) -> Harness {
    harness_with(
        FakeFetcher::new(mode),
        RecordingOutbox::default(),
        Duration::from_secs(30),
    )
}

fn inbound(text: &str) -> InboundMessage {
    InboundMessage {
        trace_id: Uuid::new_v4(),
        channel_type: "telegram".into(),
        connector_id: "tg_main".into(),
        conversation_scope: "chat:1".into(),
        user_scope: "user:1".into(),
        text: text.into(),
        at: chrono::Utc::now(),
        is_group: false,
        is_mention: false,
        mention_target: None,
        message_id: None,
    }
}

fn key() -> ConversationKey {
    ConversationKey::from_inbound(&inbound(""))
}

fn entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

async fn finish(dispatch: Dispatch) -> JobState {
    dispatch.job.expect("a job was started").await.unwrap()
}

// ──── Music ────

#[tokio::test]
async fn search_then_select_delivers_one_track() {
    let h = harness(FetchMode::Produce(vec![("Second Song.mp3", 2048)]));
    let mut finished = h.bus.subscribe(Topic::JobFinished).await;

    let search = h.orchestrator.handle(&inbound("!music shape of you")).await;
    assert_eq!(search.route, Route::Command("music"));
    assert!(search.job.is_none());
    assert!(h.orchestrator.sessions().get(&key()).await.awaiting_selection());
    assert!(h.outbox.last_text().contains("Found 3 results"));

    let select = h.orchestrator.handle(&inbound("2")).await;
    assert_eq!(select.route, Route::Selection);
    assert_eq!(finish(select).await, JobState::Succeeded);

    assert_eq!(
        h.outbox.media(),
        vec![(MediaKind::Audio, "Second Song - Artist B.mp3".to_string())]
    );
    assert!(h.outbox.last_text().contains("Second Song"));
    assert!(h.outbox.texts().iter().any(|t| t.starts_with("🎵 Downloading")));

    let session = h.orchestrator.sessions().get(&key()).await;
    assert!(!session.awaiting_selection());
    assert!(session.pending_results().is_empty());
    assert_eq!(entries(&h.downloads_dir), 0);

    let requests = h.fetcher.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url, "https://www.youtube.com/watch?v=bbb");

    match finished.recv().await {
        Some(BusMessage::JobFinished { state, .. }) => assert_eq!(state, JobState::Succeeded),
        other => panic!("unexpected bus event: {other:?}"),
    }
    assert_eq!(h.orchestrator.admission().stats().running, 0);
}

#[tokio::test]
async fn selection_is_consumed_once() {
    let h = harness(FetchMode::Produce(vec![("a.mp3", 16)]));
    h.orchestrator.handle(&inbound("!music anything")).await;
    finish(h.orchestrator.handle(&inbound("1")).await).await;

    let again = h.orchestrator.handle(&inbound("1")).await;
    assert_eq!(again.route, Route::FreeText);
    assert!(again.job.is_none());
    assert_eq!(h.outbox.last_text(), replies::CAPABILITIES);
    assert_eq!(h.fetcher.requests().len(), 1);
}

#[tokio::test]
async fn out_of_range_selection_keeps_results() {
    let h = harness(FetchMode::Produce(vec![("a.mp3", 16)]));
    h.orchestrator.handle(&inbound("!music anything")).await;

    let dispatch = h.orchestrator.handle(&inbound("5")).await;
    assert_eq!(dispatch.route, Route::Failed);
    assert!(h.outbox.last_text().contains("Invalid selection"));

    let session = h.orchestrator.sessions().get(&key()).await;
    assert!(session.awaiting_selection());
    assert_eq!(session.pending_results().len(), 3);
    assert!(h.fetcher.requests().is_empty());
}

#[tokio::test]
async fn empty_query_shows_usage() {
    let h = harness(FetchMode::Hang);
    h.orchestrator.handle(&inbound("!music   ")).await;
    assert_eq!(h.outbox.last_text(), replies::MUSIC_USAGE);
    assert!(!h.orchestrator.sessions().get(&key()).await.awaiting_selection());
}

#[tokio::test]
async fn rejected_audio_falls_back_to_document() {
    let h = harness_with(
        FakeFetcher::new(FetchMode::Produce(vec![("song.mp3", 64)])),
        RecordingOutbox {
            reject_audio: true,
            ..Default::default()
        },
        Duration::from_secs(30),
    );
    h.orchestrator.handle(&inbound("!music x")).await;
    let state = finish(h.orchestrator.handle(&inbound("1")).await).await;

    assert_eq!(state, JobState::Succeeded);
    assert_eq!(
        h.outbox.media(),
        vec![(MediaKind::Document, "Shape of You - Ed Sheeran.mp3".to_string())]
    );
    assert!(h.outbox.last_text().contains("sent as a document"));
}

#[tokio::test]
async fn empty_audio_is_a_conversion_failure() {
    let h = harness(FetchMode::Produce(vec![("song.mp3", 0)]));
    h.orchestrator.handle(&inbound("!music x")).await;
    let state = finish(h.orchestrator.handle(&inbound("1")).await).await;

    assert_eq!(state, JobState::Failed);
    assert!(h.outbox.media().is_empty());
    assert!(h.outbox.last_text().contains("Failed to convert"));
}

// ──── Admission ────

#[tokio::test]
async fn second_download_in_conversation_is_refused() {
    let h = harness(FetchMode::Hang);
    let first = h
        .orchestrator
        .handle(&inbound("!yt https://youtu.be/abc"))
        .await;
    assert!(first.job.is_some());

    let second = h
        .orchestrator
        .handle(&inbound("!yt https://youtu.be/def"))
        .await;
    assert!(second.job.is_none());

    let search = h.orchestrator.handle(&inbound("!music x")).await;
    assert!(search.job.is_none());
    let busy = h.outbox.texts().iter().filter(|t| *t == replies::BUSY).count();
    assert_eq!(busy, 2);
    assert!(!h.orchestrator.sessions().get(&key()).await.awaiting_selection());

    h.orchestrator.handle(&inbound("!cancel")).await;
    assert_eq!(finish(first).await, JobState::Cancelled);
}

#[tokio::test]
async fn cancel_stops_running_job_and_cleans_up() {
    let h = harness(FetchMode::Hang);
    let job = h
        .orchestrator
        .handle(&inbound("!yt https://youtu.be/abc"))
        .await;

    // Wait until the job holds its slot and workdir.
    while h.orchestrator.admission().stats().running == 0 {
        tokio::task::yield_now().await;
    }

    let cancel = h.orchestrator.handle(&inbound("!cancel")).await;
    assert_eq!(cancel.route, Route::Command("cancel"));
    assert!(h.outbox.texts().contains(&replies::CANCEL_REQUESTED.to_string()));

    assert_eq!(finish(job).await, JobState::Cancelled);
    assert_eq!(h.outbox.last_text(), replies::CANCELLED);
    assert_eq!(entries(&h.temp_dir), 0);
    assert_eq!(h.orchestrator.admission().stats().running, 0);
    assert!(!h.orchestrator.admission().is_busy(&key()));
}

#[tokio::test]
async fn cancel_with_nothing_running() {
    let h = harness(FetchMode::Hang);
    h.orchestrator.handle(&inbound("!cancel")).await;
    assert_eq!(h.outbox.last_text(), replies::NOTHING_TO_CANCEL);

    h.orchestrator.handle(&inbound("!music x")).await;
    h.orchestrator.handle(&inbound("!cancel")).await;
    assert_eq!(h.outbox.last_text(), replies::SELECTION_CLEARED);
    assert!(!h.orchestrator.sessions().get(&key()).await.awaiting_selection());
}

#[tokio::test]
async fn slow_job_times_out() {
    let h = harness_with(
        FakeFetcher::new(FetchMode::Hang),
        RecordingOutbox::default(),
        Duration::from_millis(50),
    );
    let job = h
        .orchestrator
        .handle(&inbound("!yt https://www.youtube.com/watch?v=abc"))
        .await;

    assert_eq!(finish(job).await, JobState::TimedOut);
    assert_eq!(h.outbox.last_text(), replies::TIMED_OUT);
    assert_eq!(entries(&h.temp_dir), 0);
    assert!(!h.orchestrator.admission().is_busy(&key()));
}

#[tokio::test]
async fn shutdown_cancels_in_flight_jobs() {
    let h = harness(FetchMode::Hang);
    let job = h
        .orchestrator
        .handle(&inbound("!yt https://youtu.be/abc"))
        .await;

    h.orchestrator.shutdown(Duration::from_secs(5)).await;
    assert_eq!(finish(job).await, JobState::Cancelled);

    let late = h
        .orchestrator
        .handle(&inbound("!yt https://youtu.be/def"))
        .await;
    assert_eq!(finish(late).await, JobState::Failed);
    assert_eq!(h.outbox.last_text(), replies::SHUTTING_DOWN);
}

// ──── Video ────

#[tokio::test]
async fn video_is_delivered_with_caption() {
    let h = harness(FetchMode::Produce(vec![("Clip.mp4", 512)]));
    let job = h
        .orchestrator
        .handle(&inbound("!yt https://youtu.be/abc"))
        .await;
    assert_eq!(finish(job).await, JobState::Succeeded);

    assert_eq!(h.outbox.media(), vec![(MediaKind::Video, "Clip.mp4".to_string())]);
    let requests = h.fetcher.requests();
    assert_eq!(requests[0].format.as_deref(), Some("best[height<=720]"));
    assert_eq!(entries(&h.temp_dir), 0);
}

#[tokio::test]
async fn long_video_is_refused_before_download() {
    let mut fetcher = FakeFetcher::new(FetchMode::Produce(vec![("Clip.mp4", 512)]));
    fetcher.duration = Some(4000.0);
    let h = harness_with(fetcher, RecordingOutbox::default(), Duration::from_secs(30));

    let job = h
        .orchestrator
        .handle(&inbound("!yt https://youtu.be/abc"))
        .await;
    assert_eq!(finish(job).await, JobState::Failed);
    assert!(h.outbox.last_text().contains("minutes long"));
    assert!(h.fetcher.requests().is_empty());
}

#[tokio::test]
async fn invalid_youtube_url_starts_nothing() {
    let h = harness(FetchMode::Hang);
    let dispatch = h
        .orchestrator
        .handle(&inbound("!yt https://example.com/v"))
        .await;
    assert!(dispatch.job.is_none());
    assert_eq!(h.outbox.last_text(), replies::YT_INVALID);
}

// ──── Instagram ────

#[tokio::test]
async fn instagram_sends_every_file_and_reports_oversized() {
    let h = harness(FetchMode::Produce(vec![
        ("a.jpg", 100),
        ("b.mp4", 200),
        ("huge.mp4", 2 * 1024 * 1024),
    ]));
    let job = h
        .orchestrator
        .handle(&inbound("!ig https://www.instagram.com/p/xyz/"))
        .await;
    assert_eq!(finish(job).await, JobState::Succeeded);

    assert_eq!(
        h.outbox.media(),
        vec![
            (MediaKind::Image, "a.jpg".to_string()),
            (MediaKind::Video, "b.mp4".to_string()),
        ]
    );
    assert!(h.outbox.texts().iter().any(|t| t.contains("huge.mp4")));
    assert_eq!(h.outbox.last_text(), replies::IG_COMPLETE);
}

#[tokio::test]
async fn instagram_with_only_oversized_files_fails() {
    let h = harness(FetchMode::Produce(vec![("huge.mp4", 2 * 1024 * 1024)]));
    let job = h
        .orchestrator
        .handle(&inbound("!ig https://www.instagram.com/p/xyz/"))
        .await;
    assert_eq!(finish(job).await, JobState::Failed);

    assert!(h.outbox.media().is_empty());
    assert!(h.outbox.texts().iter().any(|t| t.contains("huge.mp4")));
    assert_eq!(h.outbox.last_text(), replies::IG_NOTHING_SENDABLE);
    assert!(!h
        .outbox
        .texts()
        .iter()
        .any(|t| t.as_str() == replies::IG_COMPLETE));
}

#[tokio::test]
async fn imported_credentials_are_used_then_dropped_on_login_failure() {
    let h = harness(FetchMode::Fail {
        code: Some(1),
        diagnostics: "ERROR: login required to view this post",
    });
    let export = "# Netscape HTTP Cookie File\n.instagram.com\tTRUE\t/\tTRUE\t0\tsessionid\tabc\n";

    let import = h.orchestrator.handle(&inbound(export)).await;
    assert_eq!(import.route, Route::CredentialImport);
    assert_eq!(h.outbox.last_text(), replies::COOKIES_SAVED);
    let saved = h
        .orchestrator
        .sessions()
        .get(&key())
        .await
        .credential_file()
        .cloned()
        .unwrap();
    assert!(saved.exists());

    let job = h
        .orchestrator
        .handle(&inbound("!ig https://www.instagram.com/reel/xyz/"))
        .await;
    assert_eq!(finish(job).await, JobState::Failed);

    assert_eq!(h.fetcher.requests()[0].cookies.as_ref(), Some(&saved));
    assert_eq!(h.outbox.last_text(), replies::IG_LOGIN_REQUIRED);
    assert!(!saved.exists());
    assert!(h.orchestrator.sessions().get(&key()).await.credential_file().is_none());
}

#[tokio::test]
async fn private_instagram_content_is_reported() {
    let h = harness(FetchMode::Fail {
        code: Some(1),
        diagnostics: "ERROR: This content is private",
    });
    let job = h
        .orchestrator
        .handle(&inbound("!ig https://instagram.com/p/xyz"))
        .await;
    assert_eq!(finish(job).await, JobState::Failed);
    assert_eq!(h.outbox.last_text(), replies::IG_PRIVATE);
}

// ──── Classification ────

#[tokio::test]
async fn group_chatter_is_ignored_unless_addressed() {
    let h = harness(FetchMode::Hang);
    let mut msg = inbound("!ping");
    msg.is_group = true;

    let dispatch = h.orchestrator.handle(&msg).await;
    assert_eq!(dispatch.route, Route::Ignored);
    assert!(h.outbox.texts().is_empty());

    msg.is_mention = true;
    msg.mention_target = Some("@TuneBot".into());
    msg.text = "@TuneBot !ping".into();
    let dispatch = h.orchestrator.handle(&msg).await;
    assert_eq!(dispatch.route, Route::Command("ping"));
    assert_eq!(h.outbox.last_text(), replies::PONG);
}

#[tokio::test]
async fn group_message_mentioning_someone_else_is_ignored() {
    let h = harness(FetchMode::Hang);
    let mut msg = inbound("@alice hi, see you later");
    msg.is_group = true;
    msg.is_mention = true;
    msg.mention_target = Some("@alice".into());

    let dispatch = h.orchestrator.handle(&msg).await;
    assert_eq!(dispatch.route, Route::Ignored);
    assert!(h.outbox.texts().is_empty());

    msg.text = "@alice !ping".into();
    let dispatch = h.orchestrator.handle(&msg).await;
    assert_eq!(dispatch.route, Route::Ignored);
    assert!(h.outbox.texts().is_empty());
}

#[tokio::test]
async fn direct_message_keeps_foreign_mention_in_text() {
    let h = harness(FetchMode::Hang);
    let dispatch = h.orchestrator.handle(&inbound("@alice 2")).await;
    assert_eq!(dispatch.route, Route::FreeText);
    assert_eq!(h.outbox.last_text(), replies::CAPABILITIES);
}

#[tokio::test]
async fn free_text_gets_greeting_or_capabilities() {
    let h = harness(FetchMode::Hang);
    h.orchestrator.handle(&inbound("hello there")).await;
    assert_eq!(h.outbox.last_text(), replies::GREETING);
    h.orchestrator.handle(&inbound("what can you do")).await;
    assert_eq!(h.outbox.last_text(), replies::CAPABILITIES);
}
