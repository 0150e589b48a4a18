//! Tagging wizard. "Next untagged" flows walk chats missing a tag in title
//! order; the edit flow browses every chat and changes tags from a per-chat
//! menu.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::keyboard::{clamp_page, Answer, Outcome, Render, Screen};
use crate::registry::{ChatRecord, ChatRegistry};
use crate::session::SessionStore;
use crate::tags::{TagCatalog, TagField};
use crate::views;

/// Which tags one pass of the wizard assigns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagFlow {
    Single(TagField),
    /// Age then level, saved together.
    AgeAndLevel,
}

impl TagFlow {
    pub fn fields(self) -> &'static [TagField] {
        match self {
            Self::Single(TagField::Branch) => &[TagField::Branch],
            Self::Single(TagField::Age) => &[TagField::Age],
            Self::Single(TagField::Level) => &[TagField::Level],
            Self::AgeAndLevel => &[TagField::Age, TagField::Level],
        }
    }

    pub fn first_field(self) -> TagField {
        self.fields()[0]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Single(field) => field.as_str(),
            Self::AgeAndLevel => "agelevel",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "agelevel" => Some(Self::AgeAndLevel),
            other => TagField::parse(other).map(Self::Single),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaggingAction {
    SetValue { chat_id: i64, slug: String },
    Cancel,
    BrowseBranch(String),
    BrowseAll,
    PrevPage,
    NextPage,
    SelectChat(i64),
    Edit(TagFlow),
    Clear(TagField),
    BackToList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagStage {
    ChoosingValue(TagField),
    BrowseFilter,
    Browsing,
    Menu,
}

impl TagStage {
    /// Whether `action` belongs to this stage. Everything else is stale.
    pub fn accepts(self, action: &TaggingAction) -> bool {
        use TaggingAction as A;
        matches!(
            (self, action),
            (_, A::Cancel)
                | (Self::ChoosingValue(_), A::SetValue { .. })
                | (Self::BrowseFilter, A::BrowseBranch(_) | A::BrowseAll)
                | (Self::Browsing, A::PrevPage | A::NextPage | A::SelectChat(_))
                | (Self::Menu, A::Edit(_) | A::Clear(_) | A::BackToList)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggingSession {
    pub stage: TagStage,
    pub flow: TagFlow,
    pub target_chat_id: Option<i64>,
    /// Age chosen in the first half of the combined flow.
    pub pending_age: Option<String>,
    pub auto_advance: bool,
    pub branch_filter: Option<String>,
    pub page: usize,
    /// Set for sessions opened from "edit tags"; saves return to the chat menu.
    pub editing: bool,
}

pub struct TaggingWizard {
    registry: Arc<ChatRegistry>,
    catalog: Arc<TagCatalog>,
    sessions: SessionStore<TaggingSession>,
    page_size: usize,
}

impl TaggingWizard {
    pub fn new(registry: Arc<ChatRegistry>, catalog: Arc<TagCatalog>, page_size: usize) -> Self {
        Self {
            registry,
            catalog,
            sessions: SessionStore::new(),
            page_size,
        }
    }

    /// Prompts for the first chat (by title) still missing the flow's tags.
    pub async fn start_next(&self, owner_id: i64, flow: TagFlow) -> Result<Outcome> {
        let Some(record) = self.next_untagged(flow).await? else {
            self.sessions.end(owner_id).await;
            return Ok(Outcome::send(views::nothing_to_tag(flow)));
        };
        let field = flow.first_field();
        let screen = views::tag_prompt(&self.catalog, field, &record, None);
        self.sessions
            .start(
                owner_id,
                TaggingSession {
                    stage: TagStage::ChoosingValue(field),
                    flow,
                    target_chat_id: Some(record.chat_id),
                    pending_age: None,
                    auto_advance: true,
                    branch_filter: None,
                    page: 0,
                    editing: false,
                },
            )
            .await;
        debug!("tagging {} for chat {}", flow.as_str(), record.chat_id);
        Ok(Outcome::send(screen))
    }

    pub async fn start_edit(&self, owner_id: i64) -> Outcome {
        self.sessions
            .start(
                owner_id,
                TaggingSession {
                    stage: TagStage::BrowseFilter,
                    flow: TagFlow::Single(TagField::Branch),
                    target_chat_id: None,
                    pending_age: None,
                    auto_advance: false,
                    branch_filter: None,
                    page: 0,
                    editing: true,
                },
            )
            .await;
        Outcome::send(views::edit_filter(&self.catalog))
    }

    pub async fn cancel(&self, owner_id: i64) -> bool {
        self.sessions.end(owner_id).await.is_some()
    }

    #[cfg(test)]
    pub async fn stage(&self, owner_id: i64) -> Option<TagStage> {
        self.sessions.get(owner_id).await.map(|session| session.stage)
    }

    pub async fn handle(&self, owner_id: i64, action: TaggingAction) -> Result<Outcome> {
        if action == TaggingAction::Cancel {
            return Ok(if self.cancel(owner_id).await {
                info!("tagging cancelled by owner");
                Outcome::edit(Screen::text(views::TAGGING_CANCELLED))
            } else {
                Outcome::toast(views::STALE)
            });
        }

        let Some(mut session) = self.sessions.get(owner_id).await else {
            return Ok(Outcome::toast(views::STALE));
        };
        if !session.stage.accepts(&action) {
            debug!("stale tagging action {action:?} in stage {:?}", session.stage);
            return Ok(Outcome::toast(views::STALE));
        }

        let outcome = match action {
            TaggingAction::SetValue { chat_id, slug } => {
                let TagStage::ChoosingValue(field) = session.stage else {
                    return Ok(Outcome::toast(views::STALE));
                };
                if session.target_chat_id != Some(chat_id) {
                    debug!("tag value for chat {chat_id} pressed on an old prompt");
                    return Ok(Outcome::toast(views::STALE));
                }
                return self.set_value(owner_id, session, field, slug).await;
            }
            TaggingAction::BrowseBranch(slug) => {
                if !self.catalog.branches.contains(&slug) {
                    return Ok(Outcome::alert(views::UNKNOWN_VALUE));
                }
                session.branch_filter = Some(slug);
                session.page = 0;
                session.stage = TagStage::Browsing;
                Outcome::edit(self.chat_list(&session).await?)
            }
            TaggingAction::BrowseAll => {
                session.branch_filter = None;
                session.page = 0;
                session.stage = TagStage::Browsing;
                Outcome::edit(self.chat_list(&session).await?)
            }
            TaggingAction::PrevPage => match self.turn_page(&mut session, false).await? {
                Some(screen) => Outcome::edit(screen),
                None => return Ok(Outcome::silent()),
            },
            TaggingAction::NextPage => match self.turn_page(&mut session, true).await? {
                Some(screen) => Outcome::edit(screen),
                None => return Ok(Outcome::silent()),
            },
            TaggingAction::SelectChat(chat_id) => {
                let Some(record) = self.registry.get(chat_id).await? else {
                    return Ok(Outcome::alert(views::CHAT_NOT_FOUND));
                };
                session.target_chat_id = Some(chat_id);
                session.stage = TagStage::Menu;
                Outcome::edit(views::chat_menu(&self.catalog, &record, None))
            }
            TaggingAction::Edit(flow) => {
                let Some(record) = self.target_record(&session).await? else {
                    return Ok(Outcome::alert(views::NO_CHAT_SELECTED));
                };
                let field = flow.first_field();
                session.flow = flow;
                session.pending_age = None;
                session.stage = TagStage::ChoosingValue(field);
                Outcome::edit(views::tag_prompt(&self.catalog, field, &record, None))
            }
            TaggingAction::Clear(field) => {
                let Some(chat_id) = session.target_chat_id else {
                    return Ok(Outcome::alert(views::NO_CHAT_SELECTED));
                };
                if !self.registry.set_field(chat_id, field, None).await? {
                    return Ok(Outcome::alert(views::CHAT_NOT_FOUND));
                }
                info!("cleared {} for chat {chat_id}", field.as_str());
                let Some(record) = self.registry.get(chat_id).await? else {
                    return Ok(Outcome::alert(views::CHAT_NOT_FOUND));
                };
                Outcome::edit(views::chat_menu(&self.catalog, &record, None))
                    .with_answer(Answer::Toast(views::CLEARED.to_owned()))
            }
            TaggingAction::BackToList => {
                session.stage = TagStage::Browsing;
                session.target_chat_id = None;
                Outcome::edit(self.chat_list(&session).await?)
            }
            TaggingAction::Cancel => Outcome::toast(views::STALE),
        };

        self.sessions.put(owner_id, session).await;
        Ok(outcome)
    }

    async fn set_value(
        &self,
        owner_id: i64,
        mut session: TaggingSession,
        field: TagField,
        slug: String,
    ) -> Result<Outcome> {
        if !self.catalog.vocabulary(field).contains(&slug) {
            return Ok(Outcome::alert(views::UNKNOWN_VALUE));
        }
        let Some(chat_id) = session.target_chat_id else {
            return Ok(Outcome::toast(views::STALE));
        };

        if session.flow == TagFlow::AgeAndLevel && field == TagField::Age {
            let Some(record) = self.registry.get(chat_id).await? else {
                self.sessions.end(owner_id).await;
                return Ok(Outcome::alert(views::CHAT_NOT_FOUND));
            };
            let screen = views::tag_prompt(&self.catalog, TagField::Level, &record, Some(&slug));
            session.pending_age = Some(slug);
            session.stage = TagStage::ChoosingValue(TagField::Level);
            self.sessions.put(owner_id, session).await;
            return Ok(Outcome::edit(screen));
        }

        let mut changes: Vec<(TagField, &str)> = Vec::new();
        if session.flow == TagFlow::AgeAndLevel {
            let Some(age) = session.pending_age.as_deref() else {
                return Ok(Outcome::toast(views::STALE));
            };
            changes.push((TagField::Age, age));
        }
        changes.push((field, slug.as_str()));

        let writes: Vec<(TagField, Option<&str>)> = changes
            .iter()
            .map(|(field, value)| (*field, Some(*value)))
            .collect();
        if !self.registry.set_fields(chat_id, &writes).await? {
            self.sessions.end(owner_id).await;
            return Ok(Outcome::alert(views::CHAT_NOT_FOUND));
        }
        info!(
            "tagged chat {chat_id}: {}",
            changes
                .iter()
                .map(|(field, value)| format!("{}={value}", field.as_str()))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let title = self.registry.title_of(chat_id).await;
        let saved = views::tag_saved(&title, &changes);
        let flow = session.flow;
        session.pending_age = None;

        if session.editing {
            let Some(record) = self.registry.get(chat_id).await? else {
                return Ok(Outcome::alert(views::CHAT_NOT_FOUND));
            };
            session.stage = TagStage::Menu;
            self.sessions.put(owner_id, session).await;
            return Ok(Outcome::edit(views::chat_menu(
                &self.catalog,
                &record,
                Some(&saved.text),
            ))
            .with_answer(Answer::Toast(views::SAVED.to_owned())));
        }

        let outcome = Outcome::edit(saved).with_answer(Answer::Toast(views::SAVED.to_owned()));
        if !session.auto_advance {
            self.sessions.end(owner_id).await;
            return Ok(outcome);
        }

        match self.next_untagged(flow).await? {
            Some(record) => {
                let first = flow.first_field();
                session.target_chat_id = Some(record.chat_id);
                session.stage = TagStage::ChoosingValue(first);
                self.sessions.put(owner_id, session).await;
                Ok(outcome.then(Render::Send(views::tag_prompt(
                    &self.catalog,
                    first,
                    &record,
                    None,
                ))))
            }
            None => {
                self.sessions.end(owner_id).await;
                info!("every chat now has {}", flow.as_str());
                Ok(outcome.then(Render::Send(views::all_tagged(flow))))
            }
        }
    }

    async fn next_untagged(&self, flow: TagFlow) -> Result<Option<ChatRecord>> {
        match flow {
            TagFlow::Single(field) => self.registry.next_missing(field).await,
            TagFlow::AgeAndLevel => self.registry.next_missing_any(flow.fields()).await,
        }
    }

    async fn target_record(&self, session: &TaggingSession) -> Result<Option<ChatRecord>> {
        match session.target_chat_id {
            Some(chat_id) => self.registry.get(chat_id).await,
            None => Ok(None),
        }
    }

    /// `None` when the list is already at the edge.
    async fn turn_page(&self, session: &mut TaggingSession, forward: bool) -> Result<Option<Screen>> {
        let records = self.registry.list(session.branch_filter.as_deref()).await?;
        let requested = if forward {
            session.page.saturating_add(1)
        } else {
            session.page.saturating_sub(1)
        };
        let page = clamp_page(requested, records.len(), self.page_size);
        if page == session.page {
            return Ok(None);
        }
        session.page = page;
        Ok(Some(views::chat_list(
            &self.catalog,
            &records,
            session.branch_filter.as_deref(),
            session.page,
            self.page_size,
        )))
    }

    async fn chat_list(&self, session: &TaggingSession) -> Result<Screen> {
        let records = self.registry.list(session.branch_filter.as_deref()).await?;
        Ok(views::chat_list(
            &self.catalog,
            &records,
            session.branch_filter.as_deref(),
            session.page,
            self.page_size,
        ))
    }
}
