use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub trace_id: Uuid,
    pub channel_type: String,
    pub connector_id: String,
    pub conversation_scope: String,
    pub user_scope: String,
    pub text: String,
    pub at: DateTime<Utc>,
    /// Group chats only get answers when the bot is addressed
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub is_mention: bool,
    #[serde(default)]
    pub mention_target: Option<String>,
    /// Platform-specific message ID
    #[serde(default)]
    pub message_id: Option<String>,
}

/// Delivery class of an outbound file
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Image => write!(f, "image"),
            MediaKind::Video => write!(f, "video"),
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Document => write!(f, "document"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaPayload {
    pub kind: MediaKind,
    pub file_name: String,
    pub mime_type: String,
    #[serde(default)]
    pub caption: Option<String>,
    /// Track title, for audio
    #[serde(default)]
    pub title: Option<String>,
    /// Track performer, for audio
    #[serde(default)]
    pub performer: Option<String>,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum OutboundBody {
    Text { text: String },
    Media(MediaPayload),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub trace_id: Uuid,
    pub channel_type: String,
    pub connector_id: String,
    pub conversation_scope: String,
    pub body: OutboundBody,
    pub at: DateTime<Utc>,
}

impl OutboundMessage {
    pub fn text_reply(inbound: &InboundMessage, text: impl Into<String>) -> Self {
        Self::reply(
            inbound,
            OutboundBody::Text { text: text.into() },
        )
    }

    pub fn media_reply(inbound: &InboundMessage, media: MediaPayload) -> Self {
        Self::reply(inbound, OutboundBody::Media(media))
    }

    fn reply(inbound: &InboundMessage, body: OutboundBody) -> Self {
        Self {
            trace_id: inbound.trace_id,
            channel_type: inbound.channel_type.clone(),
            connector_id: inbound.connector_id.clone(),
            conversation_scope: inbound.conversation_scope.clone(),
            body,
            at: Utc::now(),
        }
    }

    /// Text content, or the caption for media bodies.
    pub fn text(&self) -> Option<&str> {
        match &self.body {
            OutboundBody::Text { text } => Some(text),
            OutboundBody::Media(media) => media.caption.as_deref(),
        }
    }

    pub fn media_kind(&self) -> Option<MediaKind> {
        match &self.body {
            OutboundBody::Text { .. } => None,
            OutboundBody::Media(media) => Some(media.kind),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    MusicFetch,
    VideoFetch,
    MediaFetch,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::MusicFetch => write!(f, "music"),
            JobKind::VideoFetch => write!(f, "video"),
            JobKind::MediaFetch => write!(f, "media"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Queued,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::TimedOut | JobState::Cancelled
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::TimedOut => "timed_out",
            JobState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BusMessage {
    MessageAccepted {
        trace_id: Uuid,
    },
    JobStarted {
        job_id: Uuid,
        conversation: String,
        kind: JobKind,
    },
    JobFinished {
        job_id: Uuid,
        conversation: String,
        kind: JobKind,
        state: JobState,
        elapsed_ms: i64,
    },
    TaskFailed {
        trace_id: Uuid,
        error: String,
    },
}

/// Stable per-conversation identifier: `channel:connector:scope`.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ConversationKey(pub String);

impl ConversationKey {
    pub fn from_inbound(msg: &InboundMessage) -> Self {
        Self(format!(
            "{}:{}:{}",
            msg.channel_type, msg.connector_id, msg.conversation_scope
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
