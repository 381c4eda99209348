use std::sync::Arc;

use async_trait::async_trait;
use tunecrab_schema::{InboundMessage, MediaPayload, OutboundMessage};

use crate::error::{BotError, DeliveryError};
use crate::replies::FALLBACK_ERROR;

const MINIMIZED_MAX_CHARS: usize = 300;

/// Outbound side of a transport.
#[async_trait]
pub trait Outbox: Send + Sync {
    async fn send(&self, msg: OutboundMessage) -> Result<(), DeliveryError>;
}

/// Sends replies to the conversation an inbound message came from.
///
/// A failed text delivery is retried exactly once with a minimized plain
/// version; if that also fails the reply is dropped with an error log.
#[derive(Clone)]
pub struct Replier {
    outbox: Arc<dyn Outbox>,
}

impl Replier {
    pub fn new(outbox: Arc<dyn Outbox>) -> Self {
        Self { outbox }
    }

    pub async fn text(&self, inbound: &InboundMessage, text: impl Into<String>) -> bool {
        let text = text.into();
        let retry = minimize(&text);
        self.deliver_with_retry(inbound, text, retry).await
    }

    /// Send the user-facing message for `err`, falling back to a generic one.
    pub async fn error(&self, inbound: &InboundMessage, err: &BotError) -> bool {
        tracing::warn!(trace_id = %inbound.trace_id, error = %err, "handler failed");
        self.deliver_with_retry(inbound, err.user_message().to_string(), FALLBACK_ERROR.to_string())
            .await
    }

    /// Send a notice whose retry is the generic error text.
    pub async fn notice(&self, inbound: &InboundMessage, text: impl Into<String>) -> bool {
        self.deliver_with_retry(inbound, text.into(), FALLBACK_ERROR.to_string())
            .await
    }

    /// Media goes out once; the caller decides how to fall back.
    pub async fn media(
        &self,
        inbound: &InboundMessage,
        media: MediaPayload,
    ) -> Result<(), DeliveryError> {
        self.outbox
            .send(OutboundMessage::media_reply(inbound, media))
            .await
    }

    async fn deliver_with_retry(&self, inbound: &InboundMessage, text: String, retry: String) -> bool {
        let first = self
            .outbox
            .send(OutboundMessage::text_reply(inbound, text))
            .await;
        let Err(first_err) = first else {
            return true;
        };
        tracing::warn!(
            trace_id = %inbound.trace_id,
            conversation = %inbound.conversation_scope,
            error = %first_err,
            "delivery failed, retrying with minimized message"
        );

        match self
            .outbox
            .send(OutboundMessage::text_reply(inbound, retry))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    trace_id = %inbound.trace_id,
                    conversation = %inbound.conversation_scope,
                    error = %e,
                    "retry delivery failed, dropping reply"
                );
                false
            }
        }
    }
}

/// Plain text without markup, cut to a short length.
pub fn minimize(text: &str) -> String {
    let plain: String = text.chars().filter(|c| !matches!(c, '*' | '_' | '`')).collect();
    let plain = plain.trim();
    if plain.chars().count() <= MINIMIZED_MAX_CHARS {
        return plain.to_string();
    }
    let mut cut: String = plain.chars().take(MINIMIZED_MAX_CHARS).collect();
    cut.push('…');
    cut
}
