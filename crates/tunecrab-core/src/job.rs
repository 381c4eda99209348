use std::future::Future;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tunecrab_schema::{ConversationKey, JobKind, JobState};
use uuid::Uuid;

use crate::admission::Lease;
use crate::workdir::JobWorkdir;

#[derive(Debug, Default)]
struct JobStatus {
    state: JobState,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

/// One externally executed fetch, from admission to its terminal state.
#[derive(Debug)]
pub struct DownloadJob {
    pub id: Uuid,
    pub kind: JobKind,
    pub source_url: String,
    pub conversation: ConversationKey,
    pub created_at: DateTime<Utc>,
    pub timeout: Duration,
    status: Mutex<JobStatus>,
    cancel: CancellationToken,
}

/// How a job ended.
#[derive(Debug)]
pub enum JobOutcome<T, E> {
    Succeeded(T),
    Failed(E),
    TimedOut,
    Cancelled,
}

impl<T, E> JobOutcome<T, E> {
    pub fn state(&self) -> JobState {
        match self {
            JobOutcome::Succeeded(_) => JobState::Succeeded,
            JobOutcome::Failed(_) => JobState::Failed,
            JobOutcome::TimedOut => JobState::TimedOut,
            JobOutcome::Cancelled => JobState::Cancelled,
        }
    }
}

impl DownloadJob {
    pub fn new(
        kind: JobKind,
        source_url: impl Into<String>,
        conversation: ConversationKey,
        timeout: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            source_url: source_url.into(),
            conversation,
            created_at: Utc::now(),
            timeout,
            status: Mutex::new(JobStatus::default()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn state(&self) -> JobState {
        self.status
            .lock()
            .map(|s| s.state)
            .unwrap_or(JobState::Failed)
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.status.lock().ok().and_then(|s| s.started_at)
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        let timeout = chrono::Duration::from_std(self.timeout).ok()?;
        self.started_at().map(|at| at + timeout)
    }

    /// Milliseconds from start (or creation, if never started) to finish or now.
    pub fn elapsed_ms(&self) -> i64 {
        let Ok(status) = self.status.lock() else {
            return 0;
        };
        let from = status.started_at.unwrap_or(self.created_at);
        let to = status.finished_at.unwrap_or_else(Utc::now);
        (to - from).num_milliseconds()
    }

    /// Apply a state change. Once a terminal state is reached every later
    /// transition is a no-op and returns false.
    pub fn transition(&self, next: JobState) -> bool {
        let Ok(mut status) = self.status.lock() else {
            return false;
        };
        let allowed = match (status.state, next) {
            (current, _) if current.is_terminal() => false,
            (JobState::Queued, JobState::Running) => true,
            (JobState::Queued, JobState::Queued) | (JobState::Running, JobState::Running) => false,
            (JobState::Running, JobState::Queued) => false,
            (_, next) => next.is_terminal(),
        };
        if !allowed {
            return false;
        }
        status.state = next;
        match next {
            JobState::Running => status.started_at = Some(Utc::now()),
            s if s.is_terminal() => status.finished_at = Some(Utc::now()),
            _ => {}
        }
        true
    }

    /// Run `work` inside `workdir` under `lease`, racing it against the
    /// timeout and the cancel token.
    ///
    /// Losing the race drops the work future, which kills any child process
    /// it spawned. The directory is removed before the terminal state is
    /// recorded and the lease is released last.
    pub async fn run<T, E, F, Fut>(
        &self,
        lease: Lease,
        workdir: JobWorkdir,
        work: F,
    ) -> JobOutcome<T, E>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.transition(JobState::Running);
        tracing::info!(
            job_id = %self.id,
            kind = %self.kind,
            conversation = %lease.conversation(),
            url = %self.source_url,
            timeout_secs = self.timeout.as_secs(),
            deadline = ?self.deadline(),
            "job running"
        );

        let outcome = {
            let work = work(workdir.path().to_path_buf());
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => JobOutcome::Cancelled,
                result = work => match result {
                    Ok(value) => JobOutcome::Succeeded(value),
                    Err(e) => JobOutcome::Failed(e),
                },
                _ = tokio::time::sleep(self.timeout) => JobOutcome::TimedOut,
            }
        };

        workdir.close();

        let terminal = outcome.state();
        if !self.transition(terminal) {
            tracing::debug!(job_id = %self.id, state = %terminal, "job already terminal");
        }
        drop(lease);

        tracing::info!(
            job_id = %self.id,
            state = %self.state(),
            elapsed_ms = self.elapsed_ms(),
            "job finished"
        );
        outcome
    }
}
