use std::path::PathBuf;

use thiserror::Error;

/// Per-conversation failure, one variant per user-visible message.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("search failed: {0}")]
    Search(String),
    #[error("download failed: {0}")]
    Download(String),
    #[error("conversion failed: {0}")]
    Conversion(String),
    #[error("delivery failed: {0}")]
    Delivery(String),
    #[error("stale or invalid selection: {0}")]
    SessionState(String),
}

impl BotError {
    pub fn user_message(&self) -> &'static str {
        match self {
            BotError::Search(_) => {
                "❌ Failed to search for the song. Please try again with a different query."
            }
            BotError::Download(_) => {
                "❌ Failed to download the media. It might be unavailable or restricted."
            }
            BotError::Conversion(_) => "❌ Failed to convert the downloaded file. Please try again later.",
            BotError::Delivery(_) => "❌ Failed to send the message. Please try again later.",
            BotError::SessionState(_) => {
                "❌ Invalid selection or your search results expired. Please search again with !music [song name]"
            }
        }
    }
}

/// Returned by an [`crate::outbox::Outbox`] when the transport refuses a message.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("transport rejected message: {0}")]
    Rejected(String),
    #[error("payload too large for transport ({size} bytes)")]
    TooLarge { size: usize },
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// Why the admission controller refused or abandoned a job before it ran.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Rejected {
    #[error("conversation already has a running job")]
    ConversationBusy,
    #[error("download queue is full")]
    QueueFull,
    #[error("job cancelled while waiting for a slot")]
    Cancelled,
    #[error("admission controller closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("downloader exited with code {code:?}")]
    Exit {
        code: Option<i32>,
        diagnostics: String,
    },
    #[error("downloader produced no media")]
    NoMedia,
    #[error("failed to start {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not read media info: {0}")]
    Probe(String),
}

impl FetchError {
    /// Downloader output, when the process ran to a non-zero exit.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            FetchError::Exit { diagnostics, .. } => Some(diagnostics),
            _ => None,
        }
    }

    /// The error plus the downloader's last non-empty output line, if any.
    pub fn summary(&self) -> String {
        let last_line = self
            .diagnostics()
            .and_then(|d| d.lines().rev().map(str::trim).find(|line| !line.is_empty()));
        match last_line {
            Some(line) => format!("{self}: {line}"),
            None => self.to_string(),
        }
    }
}
