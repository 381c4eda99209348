//! Local stdin/stdout transport for running the bot without a chat network.

use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tunecrab_core::{size_mb, DeliveryError, Outbox};
use tunecrab_gateway::Gateway;
use tunecrab_schema::{InboundMessage, OutboundBody, OutboundMessage};
use uuid::Uuid;

pub const CONSOLE_SCOPE: &str = "console:local";

pub fn to_inbound(connector_id: &str, text: &str) -> InboundMessage {
    InboundMessage {
        trace_id: Uuid::new_v4(),
        channel_type: "console".into(),
        connector_id: connector_id.into(),
        conversation_scope: CONSOLE_SCOPE.into(),
        user_scope: "user:local".into(),
        text: text.into(),
        at: Utc::now(),
        is_group: false,
        is_mention: false,
        mention_target: None,
        message_id: None,
    }
}

/// Prints replies and stores delivered media under `save_dir`.
pub struct ConsoleOutbox {
    writer: Mutex<Box<dyn Write + Send>>,
    save_dir: PathBuf,
}

impl ConsoleOutbox {
    pub fn new(writer: Box<dyn Write + Send>, save_dir: PathBuf) -> Self {
        Self {
            writer: Mutex::new(writer),
            save_dir,
        }
    }

    pub fn stdout(save_dir: PathBuf) -> Self {
        Self::new(Box::new(std::io::stdout()), save_dir)
    }

    fn write_line(&self, line: &str) -> Result<(), DeliveryError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| DeliveryError::Unavailable("console writer poisoned".into()))?;
        writeln!(writer, "{line}")
            .and_then(|_| writer.flush())
            .map_err(|e| DeliveryError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl Outbox for ConsoleOutbox {
    async fn send(&self, msg: OutboundMessage) -> Result<(), DeliveryError> {
        match msg.body {
            OutboundBody::Text { text } => self.write_line(&text),
            OutboundBody::Media(media) => {
                tokio::fs::create_dir_all(&self.save_dir)
                    .await
                    .map_err(|e| DeliveryError::Unavailable(e.to_string()))?;
                let path = self.save_dir.join(&media.file_name);
                let size = media.bytes.len() as u64;
                tokio::fs::write(&path, &media.bytes)
                    .await
                    .map_err(|e| DeliveryError::Unavailable(e.to_string()))?;

                let mut line = format!(
                    "[{}] {} ({:.2} MB) saved to {}",
                    media.kind,
                    media.file_name,
                    size_mb(size),
                    path.display()
                );
                if let Some(caption) = media.caption {
                    line.push('\n');
                    line.push_str(&caption);
                }
                self.write_line(&line)
            }
        }
    }
}

/// Reads one message per stdin line until EOF, `quit`, or shutdown.
pub struct ConsoleBot {
    connector_id: String,
    gateway: Arc<Gateway>,
    shutdown: CancellationToken,
}

impl ConsoleBot {
    pub fn new(connector_id: String, gateway: Arc<Gateway>, shutdown: CancellationToken) -> Self {
        Self {
            connector_id,
            gateway,
            shutdown,
        }
    }

    pub async fn run_impl(self) -> anyhow::Result<()> {
        println!("tunecrab console. Type !help for commands, 'quit' to exit.");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                line = lines.next_line() => line?,
            };
            let Some(line) = line else {
                break;
            };
            let input = line.trim();
            if input == "quit" || input == "exit" {
                break;
            }
            if input.is_empty() {
                continue;
            }

            let inbound = to_inbound(&self.connector_id, input);
            if let Err(err) = self.gateway.handle_inbound(inbound).await {
                eprintln!("Error: {err}");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl crate::ChannelBot for ConsoleBot {
    fn channel_type(&self) -> &str {
        "console"
    }

    fn connector_id(&self) -> &str {
        &self.connector_id
    }

    async fn run(self: Box<Self>) -> anyhow::Result<()> {
        (*self).run_impl().await
    }
}
