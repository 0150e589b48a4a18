//! Update routing. Group messages are registered before anything else looks
//! at them; wizard input is accepted only from the owner.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::broadcast::BroadcastWizard;
use crate::callback::{CallbackAction, MenuAction};
use crate::config::Config;
use crate::dispatch::{fan_out, FanoutReport, Messenger, Payload};
use crate::keyboard::{Answer, Outcome, Render, Screen};
use crate::registry::{ChatKind, ChatRegistry};
use crate::tagging::TaggingWizard;
use crate::tags::TagCatalog;
use crate::telegram::{parse_update, Incoming, IncomingCallback, IncomingMessage, TelegramClient};
use crate::views;

pub struct UpdateHandler {
    messenger: Arc<dyn Messenger>,
    registry: Arc<ChatRegistry>,
    broadcast: BroadcastWizard,
    tagging: TaggingWizard,
    owner_id: i64,
    send_delay: Duration,
    fanout_running: Arc<AtomicBool>,
}

/// Marks a fan-out as in flight until dropped, including when the task is
/// aborted before it finishes.
struct FanoutInFlight(Arc<AtomicBool>);

impl FanoutInFlight {
    fn begin(flag: &Arc<AtomicBool>) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag.clone())
    }
}

impl Drop for FanoutInFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl UpdateHandler {
    pub fn new(
        messenger: Arc<dyn Messenger>,
        registry: Arc<ChatRegistry>,
        catalog: Arc<TagCatalog>,
        config: &Config,
    ) -> Self {
        Self {
            broadcast: BroadcastWizard::new(
                registry.clone(),
                catalog.clone(),
                config.broadcast.clone(),
            ),
            tagging: TaggingWizard::new(registry.clone(), catalog, config.broadcast.page_size),
            messenger,
            registry,
            owner_id: config.telegram.owner_id,
            send_delay: Duration::from_millis(config.broadcast.send_delay_ms),
            fanout_running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn handle(&self, incoming: Incoming) -> Result<()> {
        match incoming {
            Incoming::Message(message) => self.handle_message(message).await.map(|_| ()),
            Incoming::Callback(callback) => self.handle_callback(callback).await,
        }
    }

    fn is_owner(&self, user_id: i64) -> bool {
        self.owner_id != 0 && user_id == self.owner_id
    }

    /// Returns the fan-out task when the message was taken as a broadcast payload.
    pub async fn handle_message(
        &self,
        message: IncomingMessage,
    ) -> Result<Option<JoinHandle<FanoutReport>>> {
        if message.from_is_bot {
            return Ok(None);
        }
        if ChatKind::from_telegram(&message.chat_type).is_some() {
            if let Err(err) = self
                .registry
                .upsert(
                    message.chat_id,
                    message.chat_title.as_deref(),
                    &message.chat_type,
                )
                .await
            {
                warn!("chat {} registration failed: {err:#}", message.chat_id);
            } else {
                debug!("chat {} registered", message.chat_id);
            }
        }

        let Some(from_id) = message.from_id else {
            return Ok(None);
        };
        let owner = self.is_owner(from_id);

        match message.command() {
            Some("start" | "menu") => {
                self.send(message.chat_id, &Screen::text(views::start_text(from_id, owner)))
                    .await;
                if owner && message.is_private() {
                    self.send(message.chat_id, &views::main_menu()).await;
                }
                return Ok(None);
            }
            Some("cancel") if owner && message.is_private() => {
                let broadcast = self.broadcast.cancel(from_id).await;
                let tagging = self.tagging.cancel(from_id).await;
                let text = if broadcast || tagging {
                    views::CANCELLED
                } else {
                    views::NOTHING_TO_CANCEL
                };
                self.send(message.chat_id, &Screen::text(text)).await;
                return Ok(None);
            }
            _ => {}
        }

        if !owner || !message.is_private() {
            return Ok(None);
        }
        let Some(targets) = self.broadcast.take_payload_targets(from_id).await else {
            return Ok(None);
        };

        let payload = Payload::from_message(&message.raw);
        info!(
            "broadcast of {} payload to {} chats started",
            payload.kind_name(),
            targets.len()
        );
        self.send(message.chat_id, &Screen::text(views::fanout_started(targets.len())))
            .await;

        let messenger = self.messenger.clone();
        let report_chat = message.chat_id;
        let delay = self.send_delay;
        let in_flight = FanoutInFlight::begin(&self.fanout_running);
        Ok(Some(tokio::spawn(async move {
            let _in_flight = in_flight;
            let report = fan_out(messenger.as_ref(), &targets, &payload, delay).await;
            if let Err(err) = messenger
                .send_text(report_chat, &views::fanout_finished(&report), None)
                .await
            {
                warn!("broadcast report delivery failed: {err}");
            }
            report
        })))
    }

    pub async fn handle_callback(&self, callback: IncomingCallback) -> Result<()> {
        if !self.is_owner(callback.from_id) {
            debug!("callback from non-owner {} ignored", callback.from_id);
            self.answer(&callback, &Answer::Toast(views::NOT_OWNER.to_owned()))
                .await;
            return Ok(());
        }

        let outcome = match self.route(callback.from_id, &callback.data).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.answer(&callback, &Answer::Alert(views::STORAGE_ERROR.to_owned()))
                    .await;
                return Err(err);
            }
        };
        self.apply(&callback, outcome).await;
        Ok(())
    }

    async fn route(&self, owner_id: i64, data: &str) -> Result<Outcome> {
        let Some(action) = CallbackAction::parse(data) else {
            debug!("unknown callback token `{data}`");
            return Ok(Outcome::silent());
        };
        let outcome = match action {
            CallbackAction::Noop => Outcome::silent(),
            CallbackAction::Menu(MenuAction::StartBroadcast) => {
                // One fan-out at a time keeps the send rate at one per delay.
                if self.fanout_running.load(Ordering::SeqCst) {
                    Outcome::toast(views::BROADCAST_RUNNING)
                } else {
                    self.broadcast.start(owner_id).await
                }
            }
            CallbackAction::Menu(MenuAction::TagNext(flow)) => {
                self.tagging.start_next(owner_id, flow).await?
            }
            CallbackAction::Menu(MenuAction::EditTags) => self.tagging.start_edit(owner_id).await,
            CallbackAction::Broadcast(action) => self.broadcast.handle(owner_id, action).await?,
            CallbackAction::Tagging(action) => self.tagging.handle(owner_id, action).await?,
        };
        Ok(outcome)
    }

    async fn apply(&self, callback: &IncomingCallback, outcome: Outcome) {
        self.answer(callback, &outcome.answer).await;
        let chat_id = callback.chat_id.unwrap_or(callback.from_id);
        for render in outcome.renders {
            match (render, callback.message_id) {
                (Render::Edit(screen), Some(message_id)) => {
                    if let Err(err) = self
                        .messenger
                        .edit_text(chat_id, message_id, &screen.text, screen.keyboard.as_ref())
                        .await
                    {
                        debug!("edit failed, sending instead: {err}");
                        self.send(chat_id, &screen).await;
                    }
                }
                (Render::EditKeyboard(keyboard), Some(message_id)) => {
                    if let Err(err) = self
                        .messenger
                        .edit_keyboard(chat_id, message_id, &keyboard)
                        .await
                    {
                        debug!("keyboard edit failed: {err}");
                    }
                }
                (Render::Edit(screen) | Render::Send(screen), _) => self.send(chat_id, &screen).await,
                (Render::EditKeyboard(_), None) => {}
            }
        }
    }

    async fn answer(&self, callback: &IncomingCallback, answer: &Answer) {
        let (text, alert) = match answer {
            Answer::Silent => (None, false),
            Answer::Toast(text) => (Some(text.as_str()), false),
            Answer::Alert(text) => (Some(text.as_str()), true),
        };
        if let Err(err) = self.messenger.answer_callback(&callback.id, text, alert).await {
            debug!("callback answer failed: {err}");
        }
    }

    async fn send(&self, chat_id: i64, screen: &Screen) {
        if let Err(err) = self
            .messenger
            .send_text(chat_id, &screen.text, screen.keyboard.as_ref())
            .await
        {
            warn!("message to chat {chat_id} failed: {err}");
        }
    }
}

/// Long-polls Telegram until the process is stopped.
pub async fn run(config: &Config, registry: Arc<ChatRegistry>) -> Result<()> {
    let client = TelegramClient::new(&config.telegram).map_err(|err| anyhow!(err))?;
    let identity = client
        .get_me()
        .await
        .map_err(|err| anyhow!(err))
        .context("telegram bot token rejected")?;
    info!(
        "telegram bot linked id={} username={}",
        identity.id,
        identity.username.as_deref().unwrap_or("<unknown>")
    );
    if let Err(err) = client.delete_webhook().await {
        warn!("telegram deleteWebhook failed: {err}");
    }

    let client = Arc::new(client);
    let catalog = Arc::new(config.tags.catalog());
    let handler = UpdateHandler::new(client.clone(), registry, catalog, config);
    let retry_delay = Duration::from_secs(config.telegram.retry_delay_secs);

    let mut offset: i64 = 0;
    loop {
        let updates = match client.get_updates(offset).await {
            Ok(value) => value,
            Err(err) => {
                warn!("telegram getUpdates failed: {err}");
                sleep(retry_delay).await;
                continue;
            }
        };
        for update in updates {
            let Some(update_id) = update.get("update_id").and_then(Value::as_i64) else {
                continue;
            };
            if update_id >= offset {
                offset = update_id.saturating_add(1);
            }
            let Some(incoming) = parse_update(&update) else {
                continue;
            };
            if let Err(err) = handler.handle(incoming).await {
                warn!("telegram update {update_id} failed: {err:#}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::UpdateHandler;
    use crate::config::{Config, TagsConfig};
    use crate::dispatch::tests::{RecordingMessenger, Sent};
    use crate::registry::tests::temp_registry_path;
    use crate::registry::ChatRegistry;
    use crate::tags::TagOption;
    use crate::telegram::{IncomingCallback, IncomingMessage};
    use crate::views;

    const OWNER: i64 = 500;

    async fn handler(
        name: &str,
        messenger: Arc<RecordingMessenger>,
    ) -> (UpdateHandler, Arc<ChatRegistry>) {
        handler_with_delay(name, messenger, 0).await
    }

    async fn handler_with_delay(
        name: &str,
        messenger: Arc<RecordingMessenger>,
        send_delay_ms: u64,
    ) -> (UpdateHandler, Arc<ChatRegistry>) {
        let registry = Arc::new(
            ChatRegistry::open(temp_registry_path(name))
                .await
                .expect("open"),
        );
        let mut config = Config::default();
        config.telegram.owner_id = OWNER;
        config.broadcast.send_delay_ms = send_delay_ms;
        config.tags = TagsConfig {
            branches: vec![TagOption::new("x", "X")],
            ..TagsConfig::default()
        };
        let catalog = Arc::new(config.tags.catalog());
        let handler = UpdateHandler::new(messenger, registry.clone(), catalog, &config);
        (handler, registry)
    }

    fn message(chat_id: i64, chat_type: &str, from_id: i64, text: &str) -> IncomingMessage {
        IncomingMessage {
            message_id: 1,
            chat_id,
            chat_type: chat_type.to_owned(),
            chat_title: (chat_type != "private").then(|| format!("Group {chat_id}")),
            from_id: Some(from_id),
            from_is_bot: false,
            text: Some(text.to_owned()),
            raw: json!({ "text": text }),
        }
    }

    fn callback(from_id: i64, data: &str) -> IncomingCallback {
        IncomingCallback {
            id: format!("cb-{data}"),
            from_id,
            chat_id: Some(from_id),
            message_id: Some(77),
            data: data.to_owned(),
        }
    }

    #[tokio::test]
    async fn group_messages_register_chats_for_anyone() {
        let messenger = Arc::new(RecordingMessenger::default());
        let (handler, registry) = handler("bot-register", messenger.clone()).await;

        handler
            .handle_message(message(-100_1, "supergroup", 9, "hello"))
            .await
            .expect("group");
        handler
            .handle_message(message(9, "private", 9, "hello"))
            .await
            .expect("private");

        let record = registry.get(-100_1).await.expect("get").expect("record");
        assert_eq!(record.title, "Group -1001");
        assert!(registry.get(9).await.expect("get").is_none());
        assert!(messenger.sent().is_empty());
    }

    #[tokio::test]
    async fn non_owner_callbacks_are_refused() {
        let messenger = Arc::new(RecordingMessenger::default());
        let (handler, _registry) = handler("bot-non-owner", messenger.clone()).await;

        handler
            .handle_callback(callback(9, "menu:bc"))
            .await
            .expect("callback");
        assert_eq!(
            messenger.sent(),
            vec![Sent::Answer {
                callback_id: "cb-menu:bc".to_owned(),
                text: Some(views::NOT_OWNER.to_owned()),
                alert: false,
            }]
        );
    }

    #[tokio::test]
    async fn start_shows_menu_only_to_owner() {
        let messenger = Arc::new(RecordingMessenger::default());
        let (handler, _registry) = handler("bot-start", messenger.clone()).await;

        handler
            .handle_message(message(9, "private", 9, "/start"))
            .await
            .expect("start");
        handler
            .handle_message(message(OWNER, "private", OWNER, "/menu"))
            .await
            .expect("menu");

        let texts: Vec<String> = messenger
            .sent()
            .into_iter()
            .filter_map(|entry| match entry {
                Sent::Text { text, .. } => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(texts.len(), 3);
        assert_eq!(texts[0], views::start_text(9, false));
        assert_eq!(texts[2], views::main_menu().text);
    }

    #[tokio::test]
    async fn confirmed_broadcast_fans_out_next_owner_message() {
        let messenger = Arc::new(RecordingMessenger::failing(&[-2]));
        let (handler, registry) = handler("bot-broadcast", messenger.clone()).await;
        for (chat_id, title) in [(-1, "Alpha"), (-2, "Bravo"), (-3, "Charlie")] {
            handler
                .handle_message(IncomingMessage {
                    chat_title: Some(title.to_owned()),
                    ..message(chat_id, "group", 9, ".")
                })
                .await
                .expect("register");
        }
        for chat_id in [-1, -2, -3] {
            registry
                .set_field(chat_id, crate::tags::TagField::Branch, Some("x"))
                .await
                .expect("tag");
        }

        for data in [
            "menu:bc",
            "bc:branch:x",
            "bc:mode:manual",
            "bc:pick_all",
            "bc:pick_done",
            "bc:confirm",
        ] {
            handler
                .handle_callback(callback(OWNER, data))
                .await
                .expect("callback");
        }

        let task = handler
            .handle_message(message(OWNER, "private", OWNER, "Занятия переносятся"))
            .await
            .expect("payload")
            .expect("fan-out task");
        let report = task.await.expect("join");
        assert_eq!((report.attempted, report.succeeded, report.failed), (3, 2, 1));

        let sent = messenger.sent();
        let delivered: Vec<i64> = sent
            .iter()
            .filter_map(|entry| match entry {
                Sent::Text { chat_id, text } if text == "Занятия переносятся" => Some(*chat_id),
                _ => None,
            })
            .collect();
        assert_eq!(delivered, vec![-1, -2, -3]);
        assert!(sent.iter().any(|entry| matches!(
            entry,
            Sent::Text { chat_id: OWNER, text } if *text == views::fanout_finished(&report)
        )));

        let after = handler
            .handle_message(message(OWNER, "private", OWNER, "second"))
            .await
            .expect("second");
        assert!(after.is_none());
    }

    #[tokio::test]
    async fn second_broadcast_waits_for_running_fanout() {
        let messenger = Arc::new(RecordingMessenger::default());
        let (handler, registry) =
            handler_with_delay("bot-one-fanout", messenger.clone(), 60_000).await;
        for (chat_id, title) in [(-1, "Alpha"), (-2, "Bravo")] {
            registry.upsert(chat_id, Some(title), "group").await.expect("upsert");
            registry
                .set_field(chat_id, crate::tags::TagField::Branch, Some("x"))
                .await
                .expect("tag");
        }
        for data in [
            "menu:bc",
            "bc:branch:x",
            "bc:mode:manual",
            "bc:pick_all",
            "bc:pick_done",
            "bc:confirm",
        ] {
            handler
                .handle_callback(callback(OWNER, data))
                .await
                .expect("callback");
        }
        let task = handler
            .handle_message(message(OWNER, "private", OWNER, "first"))
            .await
            .expect("payload")
            .expect("fan-out task");

        handler
            .handle_callback(callback(OWNER, "menu:bc"))
            .await
            .expect("refused");
        assert_eq!(
            messenger.sent().last(),
            Some(&Sent::Answer {
                callback_id: "cb-menu:bc".to_owned(),
                text: Some(views::BROADCAST_RUNNING.to_owned()),
                alert: false,
            })
        );
        assert_eq!(handler.broadcast.stage(OWNER).await, None);

        task.abort();
        assert!(task.await.is_err());
        handler
            .handle_callback(callback(OWNER, "menu:bc"))
            .await
            .expect("restart");
        assert_eq!(
            handler.broadcast.stage(OWNER).await,
            Some(crate::broadcast::BroadcastStage::ChooseBranch)
        );
    }

    #[tokio::test]
    async fn failed_edit_falls_back_to_new_message() {
        let messenger = Arc::new(RecordingMessenger {
            fail_edits: true,
            ..RecordingMessenger::default()
        });
        let (handler, _registry) = handler("bot-edit-fallback", messenger.clone()).await;

        handler
            .handle_callback(callback(OWNER, "menu:bc"))
            .await
            .expect("menu");
        handler
            .handle_callback(callback(OWNER, "bc:cancel"))
            .await
            .expect("cancel");

        let sent = messenger.sent();
        assert!(matches!(
            sent.last(),
            Some(Sent::Text { chat_id: OWNER, text }) if text == views::BROADCAST_CANCELLED
        ));
    }

    #[tokio::test]
    async fn cancel_command_ends_both_wizards() {
        let messenger = Arc::new(RecordingMessenger::default());
        let (handler, _registry) = handler("bot-cancel", messenger.clone()).await;

        handler
            .handle_callback(callback(OWNER, "menu:bc"))
            .await
            .expect("menu");
        handler
            .handle_message(message(OWNER, "private", OWNER, "/cancel"))
            .await
            .expect("cancel");
        handler
            .handle_callback(callback(OWNER, "bc:branch:x"))
            .await
            .expect("stale");

        let sent = messenger.sent();
        assert!(sent.iter().any(|entry| matches!(
            entry,
            Sent::Text { text, .. } if text == views::CANCELLED
        )));
        assert_eq!(
            sent.last(),
            Some(&Sent::Answer {
                callback_id: "cb-bc:branch:x".to_owned(),
                text: Some(views::STALE.to_owned()),
                alert: false,
            })
        );
    }
}
