use std::collections::HashMap as StdHashMap;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Mutex as TokioMutex;
use tunecrab_bus::{BusPublisher, EventBus, Topic};
use tunecrab_core::{replies, Dispatch, Orchestrator, RateLimitSettings};
use tunecrab_schema::*;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 30,
            burst: 10,
        }
    }
}

impl From<&RateLimitSettings> for RateLimitConfig {
    fn from(settings: &RateLimitSettings) -> Self {
        Self {
            requests_per_minute: settings.requests_per_minute,
            burst: settings.burst,
        }
    }
}

struct TokenBucket {
    tokens: f64,
    max_tokens: f64,
    refill_rate: f64,
    last_refill: chrono::DateTime<chrono::Utc>,
    /// Set once the sender has been told to slow down.
    warned: bool,
}

impl TokenBucket {
    fn new(config: &RateLimitConfig) -> Self {
        Self {
            tokens: config.burst as f64,
            max_tokens: config.burst as f64,
            refill_rate: config.requests_per_minute as f64 / 60.0,
            last_refill: chrono::Utc::now(),
            warned: false,
        }
    }

    fn try_consume(&mut self) -> RateVerdict {
        let now = chrono::Utc::now();
        let elapsed = (now - self.last_refill).num_milliseconds() as f64 / 1000.0;
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            self.warned = false;
            RateVerdict::Allowed
        } else {
            let notify = !self.warned;
            self.warned = true;
            RateVerdict::Limited { notify }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateVerdict {
    Allowed,
    /// `notify` is true only for the first refusal in a run.
    Limited { notify: bool },
}

pub struct RateLimiter {
    buckets: Arc<TokioMutex<StdHashMap<String, TokenBucket>>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            buckets: Arc::new(TokioMutex::new(StdHashMap::new())),
            config,
        }
    }

    pub async fn check(&self, key: &str) -> RateVerdict {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(&self.config));
        bucket.try_consume()
    }
}

/// Entry point for every transport: throttles senders, announces accepted
/// messages and hands them to the orchestrator.
pub struct Gateway {
    orchestrator: Orchestrator,
    bus: BusPublisher,
    rate_limiter: RateLimiter,
}

impl Gateway {
    pub fn new(orchestrator: Orchestrator, bus: BusPublisher, rate_limiter: RateLimiter) -> Self {
        Self {
            orchestrator,
            bus,
            rate_limiter,
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub async fn handle_inbound(&self, inbound: InboundMessage) -> Result<Dispatch> {
        if let RateVerdict::Limited { notify } = self.rate_limiter.check(&inbound.user_scope).await {
            tracing::warn!(user = %inbound.user_scope, notify, "rate limited");
            if notify {
                self.orchestrator
                    .replier()
                    .text(&inbound, replies::RATE_LIMITED)
                    .await;
            }
            return Err(anyhow::anyhow!("rate limited: too many requests"));
        }

        let _ = self
            .bus
            .publish(BusMessage::MessageAccepted {
                trace_id: inbound.trace_id,
            })
            .await;

        Ok(self.orchestrator.handle(&inbound).await)
    }
}

/// Spawns a listener that logs job completions and handler failures. It
/// ends once the bus is dropped.
pub async fn spawn_job_event_listener(bus: &EventBus) -> tokio::task::JoinHandle<()> {
    let mut finished = bus.subscribe(Topic::JobFinished).await;
    let mut failed = bus.subscribe(Topic::TaskFailed).await;
    tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                Some(msg) = finished.recv() => msg,
                Some(msg) = failed.recv() => msg,
                else => break,
            };
            match msg {
                BusMessage::JobFinished {
                    job_id,
                    conversation,
                    kind,
                    state,
                    elapsed_ms,
                } => {
                    tracing::info!(
                        job_id = %job_id,
                        conversation = %conversation,
                        kind = %kind,
                        state = %state,
                        elapsed_ms,
                        "job finished"
                    );
                }
                BusMessage::TaskFailed { trace_id, error } => {
                    tracing::warn!(trace_id = %trace_id, error = %error, "message handling failed");
                }
                _ => {}
            }
        }
    })
}
