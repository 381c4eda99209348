use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, InputFile, Message, MessageEntity, MessageEntityKind, ParseMode};
use teloxide::RequestError;
use tokio_util::sync::CancellationToken;
use tunecrab_core::{mentions_handle, DeliveryError, Outbox};
use tunecrab_gateway::Gateway;
use tunecrab_schema::{InboundMessage, MediaKind, MediaPayload, OutboundBody, OutboundMessage};
use uuid::Uuid;

/// Largest file the Bot API accepts as an upload.
pub const UPLOAD_LIMIT_BYTES: usize = 50 * 1024 * 1024;

pub struct TelegramAdapter {
    connector_id: String,
}

impl TelegramAdapter {
    pub fn new(connector_id: impl Into<String>) -> Self {
        Self {
            connector_id: connector_id.into(),
        }
    }

    pub fn to_inbound(&self, chat_id: i64, user_id: i64, text: &str, message_id: Option<i32>) -> InboundMessage {
        InboundMessage {
            trace_id: Uuid::new_v4(),
            channel_type: "telegram".to_string(),
            connector_id: self.connector_id.clone(),
            conversation_scope: format!("chat:{chat_id}"),
            user_scope: format!("user:{user_id}"),
            text: text.to_string(),
            at: Utc::now(),
            is_group: false,
            is_mention: false,
            mention_target: None,
            message_id: message_id.map(|id| id.to_string()),
        }
    }
}

/// Sends replies through the Bot API.
#[derive(Clone)]
pub struct TelegramOutbox {
    bot: Bot,
}

impl TelegramOutbox {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    async fn send_media(&self, chat: ChatId, media: MediaPayload) -> Result<Message, RequestError> {
        let MediaPayload {
            kind,
            file_name,
            caption,
            title,
            performer,
            bytes,
            ..
        } = media;
        let file = InputFile::memory(bytes).file_name(file_name);

        match kind {
            MediaKind::Audio => {
                let mut req = self.bot.send_audio(chat, file);
                if let Some(title) = title {
                    req = req.title(title);
                }
                if let Some(performer) = performer {
                    req = req.performer(performer);
                }
                if let Some(caption) = caption {
                    req = req.caption(caption);
                }
                req.await
            }
            MediaKind::Video => {
                let mut req = self.bot.send_video(chat, file);
                if let Some(caption) = caption {
                    req = req.caption(caption);
                }
                req.await
            }
            MediaKind::Image => {
                let mut req = self.bot.send_photo(chat, file);
                if let Some(caption) = caption {
                    req = req.caption(caption);
                }
                req.await
            }
            MediaKind::Document => {
                let mut req = self.bot.send_document(chat, file);
                if let Some(caption) = caption {
                    req = req.caption(caption);
                }
                req.await
            }
        }
    }
}

#[async_trait]
impl Outbox for TelegramOutbox {
    async fn send(&self, msg: OutboundMessage) -> Result<(), DeliveryError> {
        let Some(chat_id) = parse_chat_id(&msg.conversation_scope) else {
            return Err(DeliveryError::Rejected(format!(
                "not a telegram chat: {}",
                msg.conversation_scope
            )));
        };
        let chat = ChatId(chat_id);

        let result = match msg.body {
            OutboundBody::Text { text } => {
                self.bot
                    .send_message(chat, text)
                    .parse_mode(ParseMode::Markdown)
                    .await
            }
            OutboundBody::Media(media) => {
                if media.bytes.len() > UPLOAD_LIMIT_BYTES {
                    return Err(DeliveryError::TooLarge {
                        size: media.bytes.len(),
                    });
                }
                self.send_media(chat, media).await
            }
        };
        result.map(|_| ()).map_err(delivery_error)
    }
}

fn delivery_error(err: RequestError) -> DeliveryError {
    match err {
        RequestError::Api(_) => DeliveryError::Rejected(err.to_string()),
        other => DeliveryError::Unavailable(other.to_string()),
    }
}

pub struct TelegramBot {
    bot: Bot,
    connector_id: String,
    /// Username from `getMe`, used to tell mentions of the bot apart.
    bot_handle: Option<String>,
    gateway: Arc<Gateway>,
    shutdown: CancellationToken,
}

impl TelegramBot {
    pub fn new(
        bot: Bot,
        connector_id: String,
        bot_handle: Option<String>,
        gateway: Arc<Gateway>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            bot,
            connector_id,
            bot_handle,
            gateway,
            shutdown,
        }
    }

    pub async fn run_impl(self) -> anyhow::Result<()> {
        let adapter = Arc::new(TelegramAdapter::new(&self.connector_id));
        let gateway = self.gateway;
        let bot_handle: Arc<Option<String>> = Arc::new(self.bot_handle);

        // Updates from one chat are handled in order; the orchestrator
        // returns as soon as a download is started.
        let handler = Update::filter_message().endpoint(move |bot: Bot, msg: Message| {
            let adapter = adapter.clone();
            let gateway = gateway.clone();
            let bot_handle = bot_handle.clone();

            async move {
                let Some(text) = msg.text() else {
                    return Ok::<(), RequestError>(());
                };

                let user_id = msg.from.as_ref().map(|user| user.id.0 as i64).unwrap_or(0);
                let (is_mention, mention_target) = detect_mention(&msg, bot_handle.as_deref());

                let mut inbound = adapter.to_inbound(msg.chat.id.0, user_id, text, Some(msg.id.0));
                inbound.is_group = msg.chat.is_group() || msg.chat.is_supergroup();
                inbound.is_mention = is_mention;
                inbound.mention_target = mention_target;

                if !inbound.is_group || inbound.is_mention {
                    let _ = bot.send_chat_action(msg.chat.id, ChatAction::Typing).await;
                }

                if let Err(err) = gateway.handle_inbound(inbound).await {
                    tracing::warn!(chat_id = msg.chat.id.0, error = %err, "inbound message dropped");
                }
                Ok::<(), RequestError>(())
            }
        });

        let mut dispatcher = Dispatcher::builder(self.bot, handler).build();
        let token = dispatcher.shutdown_token();
        let shutdown = self.shutdown;
        tokio::spawn(async move {
            shutdown.cancelled().await;
            match token.shutdown() {
                Ok(stopped) => stopped.await,
                Err(_) => tracing::debug!("telegram dispatcher already idle"),
            }
        });

        tracing::info!(connector_id = %self.connector_id, "telegram dispatcher started");
        dispatcher.dispatch().await;
        tracing::info!(connector_id = %self.connector_id, "telegram dispatcher stopped");
        Ok(())
    }
}

#[async_trait]
impl crate::ChannelBot for TelegramBot {
    fn channel_type(&self) -> &str {
        "telegram"
    }

    fn connector_id(&self) -> &str {
        &self.connector_id
    }

    async fn run(self: Box<Self>) -> anyhow::Result<()> {
        (*self).run_impl().await
    }
}

/// `(true, target)` only when the message @mentions `bot_handle`.
pub fn detect_mention(msg: &Message, bot_handle: Option<&str>) -> (bool, Option<String>) {
    let (Some(entities), Some(text), Some(handle)) = (msg.entities(), msg.text(), bot_handle) else {
        return (false, None);
    };
    match find_bot_mention(text, entities, handle) {
        Some(target) => (true, Some(target)),
        None => (false, None),
    }
}

fn find_bot_mention(text: &str, entities: &[MessageEntity], handle: &str) -> Option<String> {
    entities
        .iter()
        .filter(|entity| matches!(&entity.kind, MessageEntityKind::Mention))
        .filter_map(|entity| utf16_range_to_byte_range(text, entity.offset, entity.length))
        .map(|(start, end)| &text[start..end])
        .find(|target| mentions_handle(target, handle))
        .map(str::to_string)
}

/// Parse chat ID from conversation_scope (format: "chat:123" or "chat:-100123")
fn parse_chat_id(conversation_scope: &str) -> Option<i64> {
    conversation_scope.strip_prefix("chat:")?.parse().ok()
}

fn utf16_range_to_byte_range(text: &str, offset: usize, length: usize) -> Option<(usize, usize)> {
    let start = utf16_offset_to_byte_idx(text, offset)?;
    let end = utf16_offset_to_byte_idx(text, offset.checked_add(length)?)?;
    Some((start, end))
}

fn utf16_offset_to_byte_idx(text: &str, target: usize) -> Option<usize> {
    if target == 0 {
        return Some(0);
    }

    let mut utf16_units = 0usize;
    for (byte_idx, ch) in text.char_indices() {
        if utf16_units == target {
            return Some(byte_idx);
        }
        utf16_units = utf16_units.checked_add(ch.len_utf16())?;
        if utf16_units == target {
            return Some(byte_idx + ch.len_utf8());
        }
    }

    if utf16_units == target {
        Some(text.len())
    } else {
        None
    }
}
