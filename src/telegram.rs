use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::config::TelegramConfig;
use crate::dispatch::{MediaKind, Messenger};
use crate::keyboard::InlineKeyboard;

const TELEGRAM_TEXT_MAX_CHARS: usize = 4_096;
const TELEGRAM_CAPTION_MAX_CHARS: usize = 1_024;
const TELEGRAM_CALLBACK_TEXT_MAX_CHARS: usize = 200;

#[derive(Debug, Clone)]
pub struct BotIdentity {
    pub id: i64,
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    pub message_id: i64,
    pub chat_id: i64,
    pub chat_type: String,
    pub chat_title: Option<String>,
    pub from_id: Option<i64>,
    pub from_is_bot: bool,
    pub text: Option<String>,
    /// Whole message object, kept for payload extraction.
    pub raw: Value,
}

impl IncomingMessage {
    pub fn is_private(&self) -> bool {
        self.chat_type == "private"
    }

    /// Bot command name without the leading slash or `@botname` suffix.
    pub fn command(&self) -> Option<&str> {
        let text = self.text.as_deref()?.trim();
        let rest = text.strip_prefix('/')?;
        let token = rest.split_whitespace().next()?;
        let name = token.split('@').next()?;
        (!name.is_empty()).then_some(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingCallback {
    pub id: String,
    pub from_id: i64,
    pub chat_id: Option<i64>,
    pub message_id: Option<i64>,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Message(IncomingMessage),
    Callback(IncomingCallback),
}

pub fn parse_update(update: &Value) -> Option<Incoming> {
    if let Some(message) = update.get("message").filter(|value| value.is_object()) {
        return parse_message(message).map(Incoming::Message);
    }
    let query = update.get("callback_query").filter(|value| value.is_object())?;
    let id = query.get("id").and_then(Value::as_str)?.to_owned();
    let from_id = query
        .get("from")
        .and_then(|value| value.get("id"))
        .and_then(Value::as_i64)?;
    let message = query.get("message");
    Some(Incoming::Callback(IncomingCallback {
        id,
        from_id,
        chat_id: message
            .and_then(|value| value.get("chat"))
            .and_then(|value| value.get("id"))
            .and_then(Value::as_i64),
        message_id: message
            .and_then(|value| value.get("message_id"))
            .and_then(Value::as_i64),
        data: query
            .get("data")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
    }))
}

fn parse_message(message: &Value) -> Option<IncomingMessage> {
    let chat = message.get("chat")?;
    let chat_id = chat.get("id").and_then(Value::as_i64)?;
    let from = message.get("from");
    Some(IncomingMessage {
        message_id: message.get("message_id").and_then(Value::as_i64).unwrap_or(0),
        chat_id,
        chat_type: chat
            .get("type")
            .and_then(Value::as_str)
            .and_then(normalize_optional_text)
            .unwrap_or_else(|| "private".to_owned()),
        chat_title: chat
            .get("title")
            .and_then(Value::as_str)
            .and_then(normalize_optional_text),
        from_id: from
            .and_then(|value| value.get("id"))
            .and_then(Value::as_i64),
        from_is_bot: from
            .and_then(|value| value.get("is_bot"))
            .and_then(Value::as_bool)
            .unwrap_or(false),
        text: message
            .get("text")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned),
        raw: message.clone(),
    })
}

/// Bot API client over plain HTTPS + JSON.
#[derive(Debug, Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
    poll_timeout_secs: u64,
}

impl TelegramClient {
    pub fn new(config: &TelegramConfig) -> Result<Self, String> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|err| format!("failed building telegram http client: {err}"))?;
        Ok(Self {
            http,
            base_url: api_url(&config.api_base, &config.bot_token),
            poll_timeout_secs: config.poll_timeout_secs,
        })
    }

    pub async fn get_me(&self) -> Result<BotIdentity, String> {
        let payload = self.call("getMe", json!({})).await?;
        let id = payload
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| "telegram getMe missing result.id".to_owned())?;
        let username = payload
            .get("username")
            .and_then(Value::as_str)
            .and_then(normalize_optional_text);
        Ok(BotIdentity { id, username })
    }

    /// Long polling does not work while a webhook is registered.
    pub async fn delete_webhook(&self) -> Result<(), String> {
        self.call("deleteWebhook", json!({ "drop_pending_updates": false }))
            .await
            .map(|_| ())
    }

    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Value>, String> {
        let mut body = json!({
            "timeout": self.poll_timeout_secs,
            "allowed_updates": ["message", "callback_query"],
        });
        if offset > 0 {
            body["offset"] = json!(offset);
        }
        let result = self.call("getUpdates", body).await?;
        result
            .as_array()
            .cloned()
            .ok_or_else(|| "telegram getUpdates result must be an array".to_owned())
    }

    async fn call(&self, method: &str, body: Value) -> Result<Value, String> {
        let response = self
            .http
            .post(format!("{}/{method}", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|err| format!("telegram {method} request failed: {}", err.without_url()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| format!("telegram {method} body read failed: {err}"))?;
        let payload: Value = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(err) if status.is_success() => {
                return Err(format!("telegram {method} invalid JSON: {err}"));
            }
            Err(_) => {
                return Err(format!(
                    "telegram {method} returned status {}: {}",
                    status.as_u16(),
                    truncate_text(&text, 256)
                ));
            }
        };
        if !payload.get("ok").and_then(Value::as_bool).unwrap_or(false) {
            let reason = payload
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("telegram API returned ok=false");
            return Err(format!("telegram {method} failed: {reason}"));
        }
        Ok(payload.get("result").cloned().unwrap_or(Value::Null))
    }

    async fn call_edit(&self, method: &str, body: Value) -> Result<(), String> {
        match self.call(method, body).await {
            Ok(_) => Ok(()),
            Err(err) if is_not_modified(&err) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl Messenger for TelegramClient {
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<i64, String> {
        let mut body = Map::new();
        body.insert("chat_id".to_owned(), json!(chat_id));
        body.insert(
            "text".to_owned(),
            json!(truncate_text(text, TELEGRAM_TEXT_MAX_CHARS)),
        );
        body.insert("disable_web_page_preview".to_owned(), json!(true));
        if let Some(keyboard) = keyboard {
            body.insert("reply_markup".to_owned(), keyboard.to_reply_markup());
        }
        let result = self.call("sendMessage", Value::Object(body)).await?;
        result
            .get("message_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| "telegram sendMessage missing result.message_id".to_owned())
    }

    async fn send_media(
        &self,
        chat_id: i64,
        kind: MediaKind,
        file_id: &str,
        caption: &str,
    ) -> Result<(), String> {
        let mut body = Map::new();
        body.insert("chat_id".to_owned(), json!(chat_id));
        body.insert(kind.field().to_owned(), json!(file_id));
        body.insert(
            "caption".to_owned(),
            json!(truncate_text(caption, TELEGRAM_CAPTION_MAX_CHARS)),
        );
        self.call(kind.method(), Value::Object(body)).await.map(|_| ())
    }

    async fn edit_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<(), String> {
        let mut body = Map::new();
        body.insert("chat_id".to_owned(), json!(chat_id));
        body.insert("message_id".to_owned(), json!(message_id));
        body.insert(
            "text".to_owned(),
            json!(truncate_text(text, TELEGRAM_TEXT_MAX_CHARS)),
        );
        body.insert("disable_web_page_preview".to_owned(), json!(true));
        if let Some(keyboard) = keyboard {
            body.insert("reply_markup".to_owned(), keyboard.to_reply_markup());
        }
        self.call_edit("editMessageText", Value::Object(body)).await
    }

    async fn edit_keyboard(
        &self,
        chat_id: i64,
        message_id: i64,
        keyboard: &InlineKeyboard,
    ) -> Result<(), String> {
        self.call_edit(
            "editMessageReplyMarkup",
            json!({
                "chat_id": chat_id,
                "message_id": message_id,
                "reply_markup": keyboard.to_reply_markup(),
            }),
        )
        .await
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<(), String> {
        let mut body = Map::new();
        body.insert("callback_query_id".to_owned(), json!(callback_id));
        if let Some(text) = text {
            body.insert(
                "text".to_owned(),
                json!(truncate_text(text, TELEGRAM_CALLBACK_TEXT_MAX_CHARS)),
            );
        }
        body.insert("show_alert".to_owned(), json!(show_alert));
        self.call("answerCallbackQuery", Value::Object(body))
            .await
            .map(|_| ())
    }
}

fn api_url(api_base: &str, token: &str) -> String {
    format!("{}/bot{token}", api_base.trim().trim_end_matches('/'))
}

/// Re-rendering an unchanged screen is reported as an error by Telegram.
fn is_not_modified(err: &str) -> bool {
    err.contains("message is not modified")
}

fn normalize_optional_text(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }
    if value.chars().count() <= max_chars {
        return value.to_owned();
    }
    let mut out: String = value.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}
