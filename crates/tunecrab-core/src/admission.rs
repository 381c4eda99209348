//! Bounded admission for download jobs.
//!
//! A fair semaphore caps concurrently running jobs; excess jobs wait in FIFO
//! order, optionally up to a queue-depth ceiling. Each conversation may hold
//! at most one admitted or waiting job. The returned [`Lease`] gives the slot
//! back when dropped, whichever way the job ends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;
use tunecrab_schema::ConversationKey;

use crate::config::Limits;
use crate::error::Rejected;
use crate::job::DownloadJob;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdmissionStats {
    pub running: usize,
    pub queued: usize,
    pub acquired: u64,
    pub released: u64,
}

struct Shared {
    slots: Arc<Semaphore>,
    max_queue_depth: Option<usize>,
    active: Mutex<HashMap<ConversationKey, CancellationToken>>,
    queued: AtomicUsize,
    running: AtomicUsize,
    acquired: AtomicU64,
    released: AtomicU64,
}

impl Shared {
    fn unregister(&self, key: &ConversationKey) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(key);
        }
    }
}

#[derive(Clone)]
pub struct AdmissionController {
    shared: Arc<Shared>,
    max_concurrent: usize,
}

impl AdmissionController {
    pub fn new(max_concurrent: usize, max_queue_depth: Option<usize>) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            shared: Arc::new(Shared {
                slots: Arc::new(Semaphore::new(max_concurrent)),
                max_queue_depth,
                active: Mutex::new(HashMap::new()),
                queued: AtomicUsize::new(0),
                running: AtomicUsize::new(0),
                acquired: AtomicU64::new(0),
                released: AtomicU64::new(0),
            }),
            max_concurrent,
        }
    }

    pub fn from_limits(limits: &Limits) -> Self {
        Self::new(limits.max_concurrent_downloads, limits.max_queue_depth)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Claim the conversation for `job` and wait for a running slot.
    pub async fn admit(&self, job: &DownloadJob) -> Result<Lease, Rejected> {
        self.reserve(job)?.acquire(job.cancel_token()).await
    }

    /// Claim the conversation for `job` without waiting.
    ///
    /// Fails fast with [`Rejected::ConversationBusy`] when the conversation
    /// already has a job reserved, waiting or running. The claim is held
    /// until the returned [`Reservation`] (or the lease it becomes) drops.
    pub fn reserve(&self, job: &DownloadJob) -> Result<Reservation, Rejected> {
        let registration = self.register(job)?;
        tracing::debug!(job_id = %job.id, conversation = %job.conversation, "conversation reserved");
        Ok(Reservation {
            shared: self.shared.clone(),
            registration,
        })
    }

    fn register(&self, job: &DownloadJob) -> Result<Registration, Rejected> {
        let mut active = self.shared.active.lock().map_err(|_| Rejected::Closed)?;
        if active.contains_key(&job.conversation) {
            return Err(Rejected::ConversationBusy);
        }
        active.insert(job.conversation.clone(), job.cancel_token().clone());
        Ok(Registration {
            shared: self.shared.clone(),
            key: job.conversation.clone(),
        })
    }

    /// Ask the conversation's admitted or waiting job to stop. Returns false
    /// when the conversation has no job.
    pub fn cancel(&self, conversation: &ConversationKey) -> bool {
        let Ok(active) = self.shared.active.lock() else {
            return false;
        };
        match active.get(conversation) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_busy(&self, conversation: &ConversationKey) -> bool {
        self.shared
            .active
            .lock()
            .map(|active| active.contains_key(conversation))
            .unwrap_or(false)
    }

    /// Stop admitting. Waiting jobs are rejected with [`Rejected::Closed`].
    pub fn close(&self) {
        self.shared.slots.close();
    }

    /// Cancel every reserved, waiting or running job.
    pub fn cancel_all(&self) -> usize {
        let Ok(active) = self.shared.active.lock() else {
            return 0;
        };
        for token in active.values() {
            token.cancel();
        }
        active.len()
    }

    pub fn stats(&self) -> AdmissionStats {
        AdmissionStats {
            running: self.shared.running.load(Ordering::SeqCst),
            queued: self.shared.queued.load(Ordering::SeqCst),
            acquired: self.shared.acquired.load(Ordering::SeqCst),
            released: self.shared.released.load(Ordering::SeqCst),
        }
    }
}

/// A claimed conversation that has not started running yet.
pub struct Reservation {
    shared: Arc<Shared>,
    registration: Registration,
}

impl Reservation {
    /// Wait in FIFO order for a running slot. Rejected with
    /// [`Rejected::QueueFull`] when every slot is taken and the queue is at
    /// its ceiling, and with [`Rejected::Cancelled`] if `cancel` fires first.
    pub async fn acquire(self, cancel: &CancellationToken) -> Result<Lease, Rejected> {
        if cancel.is_cancelled() {
            return Err(Rejected::Cancelled);
        }
        let permit = match self.shared.slots.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::Closed) => return Err(Rejected::Closed),
            Err(TryAcquireError::NoPermits) => {
                let _position = self.enqueue()?;
                tracing::debug!(conversation = %self.registration.key, "job queued");

                tokio::select! {
                    acquired = self.shared.slots.clone().acquire_owned() => {
                        acquired.map_err(|_| Rejected::Closed)?
                    }
                    _ = cancel.cancelled() => return Err(Rejected::Cancelled),
                }
            }
        };

        self.shared.running.fetch_add(1, Ordering::SeqCst);
        self.shared.acquired.fetch_add(1, Ordering::SeqCst);

        Ok(Lease {
            _permit: permit,
            registration: self.registration,
        })
    }

    fn enqueue(&self) -> Result<QueuePosition, Rejected> {
        let previous = self.shared.queued.fetch_add(1, Ordering::SeqCst);
        let position = QueuePosition {
            shared: self.shared.clone(),
        };
        if let Some(limit) = self.shared.max_queue_depth {
            if previous >= limit {
                return Err(Rejected::QueueFull);
            }
        }
        Ok(position)
    }
}

/// Marks the conversation as occupied until dropped.
struct Registration {
    shared: Arc<Shared>,
    key: ConversationKey,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.shared.unregister(&self.key);
    }
}

struct QueuePosition {
    shared: Arc<Shared>,
}

impl Drop for QueuePosition {
    fn drop(&mut self) {
        self.shared.queued.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Permission to run one job. Dropping it frees the slot and the
/// conversation.
pub struct Lease {
    _permit: OwnedSemaphorePermit,
    registration: Registration,
}

impl Lease {
    pub fn conversation(&self) -> &ConversationKey {
        &self.registration.key
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let shared = &self.registration.shared;
        shared.running.fetch_sub(1, Ordering::SeqCst);
        shared.released.fetch_add(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("conversation", &self.registration.key)
            .finish()
    }
}
