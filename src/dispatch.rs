use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::keyboard::InlineKeyboard;
use crate::views;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Video,
    Document,
}

impl MediaKind {
    pub fn method(self) -> &'static str {
        match self {
            Self::Photo => "sendPhoto",
            Self::Video => "sendVideo",
            Self::Document => "sendDocument",
        }
    }

    pub fn field(self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Video => "video",
            Self::Document => "document",
        }
    }
}

/// One owner message to be copied into every target chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Media {
        kind: MediaKind,
        file_id: String,
        caption: String,
    },
    Unsupported,
}

impl Payload {
    pub fn from_message(message: &Value) -> Self {
        if let Some(text) = message.get("text").and_then(Value::as_str) {
            return Self::Text(text.to_owned());
        }
        let caption = message
            .get("caption")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();

        // Telegram lists photo sizes smallest first.
        let photo = message
            .get("photo")
            .and_then(Value::as_array)
            .and_then(|sizes| sizes.last())
            .and_then(|size| size.get("file_id"))
            .and_then(Value::as_str);
        if let Some(file_id) = photo {
            return Self::Media {
                kind: MediaKind::Photo,
                file_id: file_id.to_owned(),
                caption,
            };
        }

        for kind in [MediaKind::Video, MediaKind::Document] {
            if let Some(file_id) = message
                .get(kind.field())
                .and_then(|media| media.get("file_id"))
                .and_then(Value::as_str)
            {
                return Self::Media {
                    kind,
                    file_id: file_id.to_owned(),
                    caption,
                };
            }
        }
        Self::Unsupported
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Media { kind, .. } => kind.field(),
            Self::Unsupported => "unsupported",
        }
    }
}

/// Outbound side of the bot API the wizards and the fan-out need.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Returns the id of the sent message.
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<i64, String>;

    async fn send_media(
        &self,
        chat_id: i64,
        kind: MediaKind,
        file_id: &str,
        caption: &str,
    ) -> Result<(), String>;

    async fn edit_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<(), String>;

    async fn edit_keyboard(
        &self,
        chat_id: i64,
        message_id: i64,
        keyboard: &InlineKeyboard,
    ) -> Result<(), String>;

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<(), String>;
}

pub async fn deliver(messenger: &dyn Messenger, chat_id: i64, payload: &Payload) -> Result<(), String> {
    match payload {
        Payload::Text(text) => messenger.send_text(chat_id, text, None).await.map(|_| ()),
        Payload::Media {
            kind,
            file_id,
            caption,
        } => messenger.send_media(chat_id, *kind, file_id, caption).await,
        Payload::Unsupported => messenger
            .send_text(chat_id, views::UNSUPPORTED_PAYLOAD, None)
            .await
            .map(|_| ()),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Sends `payload` to each target in order with `delay` between sends. A
/// failed target is counted and skipped; nothing is retried.
pub async fn fan_out(
    messenger: &dyn Messenger,
    targets: &[i64],
    payload: &Payload,
    delay: Duration,
) -> FanoutReport {
    let mut report = FanoutReport::default();
    for (index, chat_id) in targets.iter().enumerate() {
        if index > 0 && !delay.is_zero() {
            sleep(delay).await;
        }
        report.attempted += 1;
        match deliver(messenger, *chat_id, payload).await {
            Ok(()) => report.succeeded += 1,
            Err(err) => {
                report.failed += 1;
                warn!("broadcast to chat {chat_id} failed: {err}");
            }
        }
    }
    info!(
        "broadcast ({}) finished: {} sent, {} failed",
        payload.kind_name(),
        report.succeeded,
        report.failed
    );
    report
}
