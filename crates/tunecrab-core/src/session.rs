//! Per-conversation state: the pending search selection and the imported
//! credential file.
//!
//! Operations on one conversation are serialized through that
//! conversation's own mutex; different conversations never contend beyond
//! the brief map lookup.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tunecrab_schema::ConversationKey;

/// Most entries a search may leave pending.
pub const MAX_PENDING_RESULTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub artist: String,
    pub duration_secs: Option<u64>,
    pub external_id: String,
    #[serde(default)]
    pub album: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConversationSession {
    pending_results: Vec<SearchResult>,
    awaiting_selection: bool,
    results_set_at: Option<Instant>,
    credential_file: Option<PathBuf>,
    last_touched: Instant,
    expiry: Duration,
}

impl ConversationSession {
    fn new(expiry: Duration) -> Self {
        Self {
            pending_results: Vec::new(),
            awaiting_selection: false,
            results_set_at: None,
            credential_file: None,
            last_touched: Instant::now(),
            expiry,
        }
    }

    pub fn touch(&mut self) {
        self.last_touched = Instant::now();
    }

    pub fn is_expired(&self) -> bool {
        self.last_touched.elapsed() >= self.expiry
    }

    fn selection_expired(&self) -> bool {
        self.results_set_at
            .map(|at| at.elapsed() >= self.expiry)
            .unwrap_or(true)
    }

    /// True while a non-empty result list is pending and has not expired.
    pub fn awaiting_selection(&self) -> bool {
        self.awaiting_selection && !self.selection_expired()
    }

    pub fn pending_results(&self) -> &[SearchResult] {
        if self.awaiting_selection() {
            &self.pending_results
        } else {
            &[]
        }
    }

    /// Replace the pending list. Anything past [`MAX_PENDING_RESULTS`] is dropped.
    pub fn set_pending_results(&mut self, mut results: Vec<SearchResult>) {
        results.truncate(MAX_PENDING_RESULTS);
        self.awaiting_selection = !results.is_empty();
        self.results_set_at = Some(Instant::now());
        self.pending_results = results;
        self.touch();
    }

    /// Take entry `index` (zero based). An out-of-range index or an expired
    /// list returns `None` and leaves the session untouched.
    pub fn consume_selection(&mut self, index: usize) -> Option<SearchResult> {
        if !self.awaiting_selection() {
            return None;
        }
        let chosen = self.pending_results.get(index)?.clone();
        self.clear();
        Some(chosen)
    }

    pub fn clear(&mut self) {
        self.pending_results.clear();
        self.awaiting_selection = false;
        self.results_set_at = None;
    }

    pub fn credential_file(&self) -> Option<&PathBuf> {
        self.credential_file.as_ref()
    }

    /// Returns the previously associated file, if any.
    pub fn set_credential_file(&mut self, path: PathBuf) -> Option<PathBuf> {
        self.credential_file.replace(path)
    }

    pub fn take_credential_file(&mut self) -> Option<PathBuf> {
        self.credential_file.take()
    }
}

pub type SessionGuard = OwnedMutexGuard<ConversationSession>;

/// A session removed by [`SessionStore::sweep_expired`].
#[derive(Debug)]
pub struct EvictedSession {
    pub key: ConversationKey,
    pub credential_file: Option<PathBuf>,
}

#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<ConversationKey, Arc<Mutex<ConversationSession>>>>>,
    expiry: Duration,
}

impl SessionStore {
    pub fn new(expiry: Duration) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            expiry,
        }
    }

    async fn entry(&self, key: &ConversationKey) -> Arc<Mutex<ConversationSession>> {
        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(ConversationSession::new(self.expiry))))
            .clone()
    }

    /// Exclusive access to one conversation, creating it on first use.
    pub async fn lock(&self, key: &ConversationKey) -> SessionGuard {
        let mut guard = self.entry(key).await.lock_owned().await;
        guard.touch();
        guard
    }

    /// Snapshot of the session.
    pub async fn get(&self, key: &ConversationKey) -> ConversationSession {
        self.lock(key).await.clone()
    }

    pub async fn set_pending_results(&self, key: &ConversationKey, results: Vec<SearchResult>) {
        self.lock(key).await.set_pending_results(results);
    }

    pub async fn consume_selection(
        &self,
        key: &ConversationKey,
        index: usize,
    ) -> Option<SearchResult> {
        self.lock(key).await.consume_selection(index)
    }

    pub async fn clear(&self, key: &ConversationKey) {
        self.lock(key).await.clear();
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Credential files currently associated with any session.
    pub async fn credential_files(&self) -> Vec<PathBuf> {
        let slots: Vec<_> = self.sessions.lock().await.values().cloned().collect();
        let mut files = Vec::new();
        for slot in slots {
            if let Some(path) = slot.lock().await.credential_file() {
                files.push(path.clone());
            }
        }
        files
    }

    /// Drop sessions idle past the expiry window. A session whose handle is
    /// held elsewhere (a router mid-transition) is skipped until next sweep.
    pub async fn sweep_expired(&self) -> Vec<EvictedSession> {
        let mut sessions = self.sessions.lock().await;
        let mut evicted = Vec::new();

        sessions.retain(|key, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            let Ok(mut session) = slot.try_lock() else {
                return true;
            };
            if !session.is_expired() {
                return true;
            }
            evicted.push(EvictedSession {
                key: key.clone(),
                credential_file: session.take_credential_file(),
            });
            false
        });

        if !evicted.is_empty() {
            tracing::debug!(count = evicted.len(), "evicted idle sessions");
        }
        evicted
    }
}
