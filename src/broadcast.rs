//! Broadcast wizard: branch, selection mode, manual picks or an age/level
//! filter, confirmation, then one payload message fanned out to the targets.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::config::BroadcastConfig;
use crate::keyboard::{clamp_page, Answer, Outcome, Screen};
use crate::registry::{ChatRecord, ChatRegistry};
use crate::session::SessionStore;
use crate::tags::{toggle_all, toggle_one, TagCatalog, TagField};
use crate::views;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastAction {
    ChooseBranch(String),
    ManualMode,
    TagMode,
    TogglePick(i64),
    TogglePickAll,
    PrevPage,
    NextPage,
    FinishPicks,
    ToggleAge(String),
    ToggleAllAges,
    FinishAges,
    ToggleLevel(String),
    ToggleAllLevels,
    BackToAges,
    FinishLevels,
    Confirm,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastStage {
    ChooseBranch,
    ChooseMode,
    ManualPick,
    ChooseAges,
    ChooseLevels,
    Confirm,
    AwaitPayload,
}

impl BroadcastStage {
    /// Stage reached by applying `action`, or `None` when the action does not
    /// belong to this stage. `Cancel` applies everywhere and is handled before
    /// this lookup.
    pub fn next(self, action: &BroadcastAction) -> Option<Self> {
        use BroadcastAction as A;
        let next = match (self, action) {
            (Self::ChooseBranch, A::ChooseBranch(_)) => Self::ChooseMode,
            (Self::ChooseMode, A::ManualMode) => Self::ManualPick,
            (Self::ChooseMode, A::TagMode) => Self::ChooseAges,
            (
                Self::ManualPick,
                A::TogglePick(_) | A::TogglePickAll | A::PrevPage | A::NextPage,
            ) => Self::ManualPick,
            (Self::ManualPick, A::FinishPicks) => Self::Confirm,
            (Self::ChooseAges, A::ToggleAge(_) | A::ToggleAllAges) => Self::ChooseAges,
            (Self::ChooseAges, A::FinishAges) => Self::ChooseLevels,
            (Self::ChooseLevels, A::ToggleLevel(_) | A::ToggleAllLevels) => Self::ChooseLevels,
            (Self::ChooseLevels, A::BackToAges) => Self::ChooseAges,
            (Self::ChooseLevels, A::FinishLevels) => Self::Confirm,
            (Self::Confirm, A::Confirm) => Self::AwaitPayload,
            _ => return None,
        };
        Some(next)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastSession {
    pub stage: BroadcastStage,
    pub branch: Option<String>,
    pub ages: BTreeSet<String>,
    pub levels: BTreeSet<String>,
    pub picked: BTreeSet<i64>,
    pub page: usize,
    /// Resolved when leaving manual pick or the level checklist.
    pub targets: Vec<i64>,
}

impl BroadcastSession {
    fn new(stage: BroadcastStage) -> Self {
        Self {
            stage,
            branch: None,
            ages: BTreeSet::new(),
            levels: BTreeSet::new(),
            picked: BTreeSet::new(),
            page: 0,
            targets: Vec::new(),
        }
    }
}

pub struct BroadcastWizard {
    registry: Arc<ChatRegistry>,
    catalog: Arc<TagCatalog>,
    sessions: SessionStore<BroadcastSession>,
    settings: BroadcastConfig,
}

impl BroadcastWizard {
    pub fn new(registry: Arc<ChatRegistry>, catalog: Arc<TagCatalog>, settings: BroadcastConfig) -> Self {
        Self {
            registry,
            catalog,
            sessions: SessionStore::new(),
            settings,
        }
    }

    /// Opens a fresh session, discarding any previous one.
    pub async fn start(&self, owner_id: i64) -> Outcome {
        let (stage, screen) = if self.settings.scope_by_branch {
            (
                BroadcastStage::ChooseBranch,
                views::broadcast_branch_picker(&self.catalog),
            )
        } else {
            (BroadcastStage::ChooseMode, views::broadcast_mode(None))
        };
        self.sessions.start(owner_id, BroadcastSession::new(stage)).await;
        debug!("broadcast session started for {owner_id}");
        Outcome::send(screen)
    }

    pub async fn cancel(&self, owner_id: i64) -> bool {
        self.sessions.end(owner_id).await.is_some()
    }

    #[cfg(test)]
    pub async fn stage(&self, owner_id: i64) -> Option<BroadcastStage> {
        self.sessions.get(owner_id).await.map(|session| session.stage)
    }

    /// Ends a session waiting for its payload and hands back the targets.
    /// Any other stage leaves the session alone.
    pub async fn take_payload_targets(&self, owner_id: i64) -> Option<Vec<i64>> {
        let session = self.sessions.get(owner_id).await?;
        if session.stage != BroadcastStage::AwaitPayload {
            return None;
        }
        self.sessions.end(owner_id).await;
        Some(session.targets)
    }

    pub async fn handle(&self, owner_id: i64, action: BroadcastAction) -> Result<Outcome> {
        if action == BroadcastAction::Cancel {
            return Ok(if self.cancel(owner_id).await {
                info!("broadcast cancelled by owner");
                Outcome::edit(Screen::text(views::BROADCAST_CANCELLED))
            } else {
                Outcome::toast(views::STALE)
            });
        }

        let Some(mut session) = self.sessions.get(owner_id).await else {
            return Ok(Outcome::toast(views::STALE));
        };
        let Some(next) = session.stage.next(&action) else {
            debug!("stale broadcast action {action:?} in stage {:?}", session.stage);
            return Ok(Outcome::toast(views::STALE));
        };

        let outcome = match action {
            BroadcastAction::ChooseBranch(slug) => {
                if !self.catalog.branches.contains(&slug) {
                    return Ok(Outcome::alert(views::UNKNOWN_VALUE));
                }
                let label = self.catalog.describe(TagField::Branch, Some(&slug));
                session.branch = Some(slug);
                Outcome::edit(views::broadcast_mode(Some(&label)))
            }
            BroadcastAction::ManualMode => {
                session.picked.clear();
                session.page = 0;
                let candidates = self.candidates(&session).await?;
                Outcome::edit(views::manual_pick(
                    &candidates,
                    &session.picked,
                    session.page,
                    self.settings.page_size,
                ))
            }
            BroadcastAction::TagMode => {
                session.ages.clear();
                session.levels.clear();
                Outcome::edit(views::ages(&self.catalog, &session.ages))
            }
            BroadcastAction::TogglePick(chat_id) => {
                let candidates = self.candidates(&session).await?;
                if !candidates.iter().any(|record| record.chat_id == chat_id) {
                    return Ok(Outcome::alert(views::CHAT_NOT_FOUND));
                }
                toggle_one(&mut session.picked, chat_id);
                Outcome::edit_keyboard(views::manual_pick_keyboard(
                    &candidates,
                    &session.picked,
                    session.page,
                    self.settings.page_size,
                ))
            }
            BroadcastAction::TogglePickAll => {
                let candidates = self.candidates(&session).await?;
                let ids: BTreeSet<i64> = candidates.iter().map(|record| record.chat_id).collect();
                session.picked = toggle_all(&session.picked, &ids);
                Outcome::edit_keyboard(views::manual_pick_keyboard(
                    &candidates,
                    &session.picked,
                    session.page,
                    self.settings.page_size,
                ))
                .with_answer(Answer::Toast(views::OK.to_owned()))
            }
            BroadcastAction::PrevPage => match self.turn_page(&mut session, false).await? {
                Some(outcome) => outcome,
                None => return Ok(Outcome::silent()),
            },
            BroadcastAction::NextPage => match self.turn_page(&mut session, true).await? {
                Some(outcome) => outcome,
                None => return Ok(Outcome::silent()),
            },
            BroadcastAction::FinishPicks => {
                let candidates = self.candidates(&session).await?;
                let chosen: Vec<&ChatRecord> = candidates
                    .iter()
                    .filter(|record| session.picked.contains(&record.chat_id))
                    .collect();
                if chosen.is_empty() {
                    return Ok(Outcome::alert(views::PICK_ONE_CHAT));
                }
                session.targets = chosen.iter().map(|record| record.chat_id).collect();
                let titles: Vec<String> = chosen
                    .iter()
                    .take(self.settings.preview_limit)
                    .map(|record| record.title.clone())
                    .collect();
                Outcome::edit(views::confirm(
                    session.targets.len(),
                    &titles,
                    self.settings.preview_limit,
                    true,
                ))
            }
            BroadcastAction::ToggleAge(slug) => {
                if !self.catalog.ages.contains(&slug) {
                    return Ok(Outcome::alert(views::UNKNOWN_VALUE));
                }
                toggle_one(&mut session.ages, slug);
                Outcome::edit_keyboard(views::ages_keyboard(&self.catalog, &session.ages))
            }
            BroadcastAction::ToggleAllAges => {
                session.ages = toggle_all(&session.ages, &self.catalog.ages.slugs());
                Outcome::edit_keyboard(views::ages_keyboard(&self.catalog, &session.ages))
                    .with_answer(Answer::Toast(views::OK.to_owned()))
            }
            BroadcastAction::FinishAges => {
                if session.ages.is_empty() {
                    return Ok(Outcome::alert(views::PICK_ONE_AGE));
                }
                Outcome::edit(views::levels(&self.catalog, &session.levels))
            }
            BroadcastAction::ToggleLevel(slug) => {
                if !self.catalog.levels.contains(&slug) {
                    return Ok(Outcome::alert(views::UNKNOWN_VALUE));
                }
                toggle_one(&mut session.levels, slug);
                Outcome::edit_keyboard(views::levels_keyboard(&self.catalog, &session.levels))
            }
            BroadcastAction::ToggleAllLevels => {
                session.levels = toggle_all(&session.levels, &self.catalog.levels.slugs());
                Outcome::edit_keyboard(views::levels_keyboard(&self.catalog, &session.levels))
                    .with_answer(Answer::Toast(views::OK.to_owned()))
            }
            BroadcastAction::BackToAges => Outcome::edit(views::ages(&self.catalog, &session.ages)),
            BroadcastAction::FinishLevels => {
                if session.levels.is_empty() {
                    return Ok(Outcome::alert(views::PICK_ONE_LEVEL));
                }
                let targets = self
                    .registry
                    .list_matching(self.scope(&session), &session.ages, &session.levels)
                    .await?;
                if targets.is_empty() {
                    return Ok(Outcome::alert(views::NO_MATCHING_CHATS));
                }
                let mut titles = Vec::new();
                for chat_id in targets.iter().take(self.settings.preview_limit) {
                    titles.push(self.registry.title_of(*chat_id).await);
                }
                session.targets = targets;
                Outcome::edit(views::confirm(
                    session.targets.len(),
                    &titles,
                    self.settings.preview_limit,
                    false,
                ))
            }
            BroadcastAction::Confirm => {
                info!(
                    "broadcast confirmed for {} chats, awaiting payload",
                    session.targets.len()
                );
                Outcome::edit(views::await_payload())
            }
            BroadcastAction::Cancel => Outcome::toast(views::STALE),
        };

        session.stage = next;
        self.sessions.put(owner_id, session).await;
        Ok(outcome)
    }

    /// `None` when the page is already at the edge.
    async fn turn_page(&self, session: &mut BroadcastSession, forward: bool) -> Result<Option<Outcome>> {
        let candidates = self.candidates(session).await?;
        let requested = if forward {
            session.page.saturating_add(1)
        } else {
            session.page.saturating_sub(1)
        };
        let page = clamp_page(requested, candidates.len(), self.settings.page_size);
        if page == session.page {
            return Ok(None);
        }
        session.page = page;
        Ok(Some(Outcome::edit_keyboard(views::manual_pick_keyboard(
            &candidates,
            &session.picked,
            session.page,
            self.settings.page_size,
        ))))
    }

    fn scope<'a>(&self, session: &'a BroadcastSession) -> Option<&'a str> {
        if self.settings.scope_by_branch {
            session.branch.as_deref()
        } else {
            None
        }
    }

    async fn candidates(&self, session: &BroadcastSession) -> Result<Vec<ChatRecord>> {
        match self.scope(session) {
            Some(branch) => self.registry.list_by_branch(branch).await,
            None => self.registry.list(None).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{BroadcastAction, BroadcastSession, BroadcastStage, BroadcastWizard};
    use crate::config::BroadcastConfig;
    use crate::keyboard::{Answer, Outcome, Render};
    use crate::registry::tests::temp_registry_path;
    use crate::registry::ChatRegistry;
    use crate::tags::{TagField, TagOption};
    use crate::views;

    const OWNER: i64 = 42;

    fn catalog() -> crate::tags::TagCatalog {
        crate::config::TagsConfig {
            branches: vec![TagOption::new("x", "X"), TagOption::new("y", "Y")],
            ..Default::default()
        }
        .catalog()
    }

    async fn wizard(name: &str, settings: BroadcastConfig) -> (BroadcastWizard, Arc<ChatRegistry>) {
        let registry = Arc::new(
            ChatRegistry::open(temp_registry_path(name))
                .await
                .expect("open"),
        );
        let wizard = BroadcastWizard::new(registry.clone(), Arc::new(catalog()), settings);
        (wizard, registry)
    }

    async fn seed(registry: &ChatRegistry, chat_id: i64, title: &str, tags: [&str; 3]) {
        registry
            .upsert(chat_id, Some(title), "supergroup")
            .await
            .expect("upsert");
        registry
            .set_fields(
                chat_id,
                &[
                    (TagField::Branch, Some(tags[0])),
                    (TagField::Age, Some(tags[1])),
                    (TagField::Level, Some(tags[2])),
                ],
            )
            .await
            .expect("tag");
    }

    async fn step(wizard: &BroadcastWizard, action: BroadcastAction) -> Outcome {
        wizard.handle(OWNER, action).await.expect("handle")
    }

    #[tokio::test]
    async fn tag_filter_resolves_every_matching_chat() {
        let (wizard, registry) = wizard("bc-scenario-a", BroadcastConfig::default()).await;
        seed(&registry, -1, "Alpha", ["x", "kids", "beginner"]).await;
        seed(&registry, -2, "Bravo", ["x", "kids", "beginner"]).await;
        seed(&registry, -3, "Charlie", ["x", "kids", "pro"]).await;
        seed(&registry, -4, "Delta", ["y", "kids", "pro"]).await;

        wizard.start(OWNER).await;
        step(&wizard, BroadcastAction::ChooseBranch("x".to_owned())).await;
        step(&wizard, BroadcastAction::TagMode).await;
        step(&wizard, BroadcastAction::ToggleAge("kids".to_owned())).await;
        step(&wizard, BroadcastAction::FinishAges).await;
        step(&wizard, BroadcastAction::ToggleLevel("beginner".to_owned())).await;
        step(&wizard, BroadcastAction::ToggleLevel("pro".to_owned())).await;
        let confirm = step(&wizard, BroadcastAction::FinishLevels).await;
        match &confirm.renders[..] {
            [Render::Edit(screen)] => {
                assert!(screen.text.contains("3"));
                assert!(screen.text.contains("• Charlie"));
                assert!(!screen.text.contains("Delta"));
            }
            other => panic!("unexpected renders {other:?}"),
        }
        step(&wizard, BroadcastAction::Confirm).await;
        assert_eq!(wizard.stage(OWNER).await, Some(BroadcastStage::AwaitPayload));

        let mut targets = wizard.take_payload_targets(OWNER).await.expect("targets");
        targets.sort_unstable();
        assert_eq!(targets, vec![-3, -2, -1]);
        assert_eq!(wizard.stage(OWNER).await, None);
        assert!(wizard.take_payload_targets(OWNER).await.is_none());
    }

    #[tokio::test]
    async fn out_of_stage_actions_are_stale_and_do_not_mutate() {
        let (wizard, _registry) = wizard("bc-stale", BroadcastConfig::default()).await;
        assert_eq!(
            step(&wizard, BroadcastAction::Confirm).await,
            Outcome::toast(views::STALE)
        );

        wizard.start(OWNER).await;
        for action in [
            BroadcastAction::ManualMode,
            BroadcastAction::TogglePickAll,
            BroadcastAction::ToggleAge("kids".to_owned()),
            BroadcastAction::FinishLevels,
            BroadcastAction::Confirm,
        ] {
            assert_eq!(step(&wizard, action).await, Outcome::toast(views::STALE));
            assert_eq!(wizard.stage(OWNER).await, Some(BroadcastStage::ChooseBranch));
        }
        assert!(wizard.take_payload_targets(OWNER).await.is_none());
        assert_eq!(wizard.stage(OWNER).await, Some(BroadcastStage::ChooseBranch));
    }

    #[tokio::test]
    async fn validation_errors_keep_the_stage() {
        let (wizard, registry) = wizard("bc-validation", BroadcastConfig::default()).await;
        seed(&registry, -1, "Alpha", ["x", "kids", "beginner"]).await;
        wizard.start(OWNER).await;

        let unknown = step(&wizard, BroadcastAction::ChooseBranch("nowhere".to_owned())).await;
        assert_eq!(unknown.answer, Answer::Alert(views::UNKNOWN_VALUE.to_owned()));
        assert_eq!(wizard.stage(OWNER).await, Some(BroadcastStage::ChooseBranch));

        step(&wizard, BroadcastAction::ChooseBranch("x".to_owned())).await;
        step(&wizard, BroadcastAction::TagMode).await;
        let empty_ages = step(&wizard, BroadcastAction::FinishAges).await;
        assert_eq!(empty_ages.answer, Answer::Alert(views::PICK_ONE_AGE.to_owned()));
        assert_eq!(wizard.stage(OWNER).await, Some(BroadcastStage::ChooseAges));

        step(&wizard, BroadcastAction::ToggleAge("adult".to_owned())).await;
        step(&wizard, BroadcastAction::FinishAges).await;
        let empty_levels = step(&wizard, BroadcastAction::FinishLevels).await;
        assert_eq!(empty_levels.answer, Answer::Alert(views::PICK_ONE_LEVEL.to_owned()));

        step(&wizard, BroadcastAction::ToggleLevel("pro".to_owned())).await;
        let nothing = step(&wizard, BroadcastAction::FinishLevels).await;
        assert_eq!(nothing.answer, Answer::Alert(views::NO_MATCHING_CHATS.to_owned()));
        assert_eq!(wizard.stage(OWNER).await, Some(BroadcastStage::ChooseLevels));

        step(&wizard, BroadcastAction::BackToAges).await;
        assert_eq!(wizard.stage(OWNER).await, Some(BroadcastStage::ChooseAges));
    }

    #[tokio::test]
    async fn manual_pick_keeps_title_order_and_requires_a_selection() {
        let (wizard, registry) = wizard("bc-manual", BroadcastConfig::default()).await;
        seed(&registry, -3, "Charlie", ["x", "kids", "pro"]).await;
        seed(&registry, -1, "Alpha", ["x", "adult", "pro"]).await;
        seed(&registry, -2, "Bravo", ["x", "mom", "middle"]).await;
        seed(&registry, -9, "Other", ["y", "kids", "pro"]).await;

        wizard.start(OWNER).await;
        step(&wizard, BroadcastAction::ChooseBranch("x".to_owned())).await;
        step(&wizard, BroadcastAction::ManualMode).await;

        let none = step(&wizard, BroadcastAction::FinishPicks).await;
        assert_eq!(none.answer, Answer::Alert(views::PICK_ONE_CHAT.to_owned()));

        let foreign = step(&wizard, BroadcastAction::TogglePick(-9)).await;
        assert_eq!(foreign.answer, Answer::Alert(views::CHAT_NOT_FOUND.to_owned()));

        step(&wizard, BroadcastAction::TogglePick(-3)).await;
        step(&wizard, BroadcastAction::TogglePick(-1)).await;
        step(&wizard, BroadcastAction::TogglePick(-2)).await;
        step(&wizard, BroadcastAction::TogglePick(-2)).await;
        assert_eq!(
            step(&wizard, BroadcastAction::NextPage).await,
            Outcome::silent()
        );
        step(&wizard, BroadcastAction::FinishPicks).await;
        step(&wizard, BroadcastAction::Confirm).await;
        assert_eq!(wizard.take_payload_targets(OWNER).await, Some(vec![-1, -3]));
    }

    #[tokio::test]
    async fn select_all_toggles_between_all_and_none() {
        let (wizard, registry) = wizard("bc-select-all", BroadcastConfig::default()).await;
        seed(&registry, -1, "Alpha", ["x", "kids", "pro"]).await;
        seed(&registry, -2, "Bravo", ["x", "kids", "pro"]).await;

        wizard.start(OWNER).await;
        step(&wizard, BroadcastAction::ChooseBranch("x".to_owned())).await;
        step(&wizard, BroadcastAction::ManualMode).await;

        let first = step(&wizard, BroadcastAction::TogglePickAll).await;
        assert_eq!(first.answer, Answer::Toast(views::OK.to_owned()));
        step(&wizard, BroadcastAction::TogglePickAll).await;
        let none = step(&wizard, BroadcastAction::FinishPicks).await;
        assert_eq!(none.answer, Answer::Alert(views::PICK_ONE_CHAT.to_owned()));

        step(&wizard, BroadcastAction::TogglePickAll).await;
        step(&wizard, BroadcastAction::FinishPicks).await;
        step(&wizard, BroadcastAction::Confirm).await;
        assert_eq!(wizard.take_payload_targets(OWNER).await, Some(vec![-1, -2]));
    }

    #[tokio::test]
    async fn cancel_discards_the_session_from_any_stage() {
        let (wizard, _registry) = wizard("bc-cancel", BroadcastConfig::default()).await;
        wizard.start(OWNER).await;
        step(&wizard, BroadcastAction::ChooseBranch("y".to_owned())).await;
        step(&wizard, BroadcastAction::TagMode).await;

        let cancelled = step(&wizard, BroadcastAction::Cancel).await;
        assert!(matches!(
            &cancelled.renders[..],
            [Render::Edit(screen)] if screen.text == views::BROADCAST_CANCELLED
        ));
        assert_eq!(wizard.stage(OWNER).await, None);
        assert_eq!(
            step(&wizard, BroadcastAction::Cancel).await,
            Outcome::toast(views::STALE)
        );
    }

    #[tokio::test]
    async fn unscoped_broadcast_skips_branch_and_filters_globally() {
        let settings = BroadcastConfig {
            scope_by_branch: false,
            ..BroadcastConfig::default()
        };
        let (wizard, registry) = wizard("bc-unscoped", settings).await;
        seed(&registry, -1, "Alpha", ["x", "kids", "pro"]).await;
        seed(&registry, -2, "Bravo", ["y", "kids", "pro"]).await;

        wizard.start(OWNER).await;
        assert_eq!(wizard.stage(OWNER).await, Some(BroadcastStage::ChooseMode));
        step(&wizard, BroadcastAction::TagMode).await;
        step(&wizard, BroadcastAction::ToggleAllAges).await;
        step(&wizard, BroadcastAction::FinishAges).await;
        step(&wizard, BroadcastAction::ToggleAllLevels).await;
        step(&wizard, BroadcastAction::FinishLevels).await;
        step(&wizard, BroadcastAction::Confirm).await;
        assert_eq!(wizard.take_payload_targets(OWNER).await, Some(vec![-1, -2]));
    }

    fn every_action() -> Vec<BroadcastAction> {
        use BroadcastAction as A;
        vec![
            A::ChooseBranch("x".to_owned()),
            A::ManualMode,
            A::TagMode,
            A::TogglePick(-1),
            A::TogglePickAll,
            A::PrevPage,
            A::NextPage,
            A::FinishPicks,
            A::ToggleAge("kids".to_owned()),
            A::ToggleAllAges,
            A::FinishAges,
            A::ToggleLevel("pro".to_owned()),
            A::ToggleAllLevels,
            A::BackToAges,
            A::FinishLevels,
            A::Confirm,
            A::Cancel,
        ]
    }

    fn action_name(action: &BroadcastAction) -> &'static str {
        use BroadcastAction as A;
        match action {
            A::ChooseBranch(_) => "branch",
            A::ManualMode => "manual",
            A::TagMode => "tags",
            A::TogglePick(_) => "pick",
            A::TogglePickAll => "pick_all",
            A::PrevPage => "prev",
            A::NextPage => "next",
            A::FinishPicks => "pick_done",
            A::ToggleAge(_) => "age",
            A::ToggleAllAges => "ages_all",
            A::FinishAges => "ages_done",
            A::ToggleLevel(_) => "lvl",
            A::ToggleAllLevels => "lvls_all",
            A::BackToAges => "lvls_back",
            A::FinishLevels => "lvls_done",
            A::Confirm => "confirm",
            A::Cancel => "cancel",
        }
    }

    const ALL_STAGES: [BroadcastStage; 7] = [
        BroadcastStage::ChooseBranch,
        BroadcastStage::ChooseMode,
        BroadcastStage::ManualPick,
        BroadcastStage::ChooseAges,
        BroadcastStage::ChooseLevels,
        BroadcastStage::Confirm,
        BroadcastStage::AwaitPayload,
    ];

    /// Every legal (stage, action) -> stage move. `Cancel` is handled before the
    /// table and appears nowhere in it.
    const TRANSITIONS: [(BroadcastStage, &str, BroadcastStage); 16] = {
        use BroadcastStage as S;
        [
            (S::ChooseBranch, "branch", S::ChooseMode),
            (S::ChooseMode, "manual", S::ManualPick),
            (S::ChooseMode, "tags", S::ChooseAges),
            (S::ManualPick, "pick", S::ManualPick),
            (S::ManualPick, "pick_all", S::ManualPick),
            (S::ManualPick, "prev", S::ManualPick),
            (S::ManualPick, "next", S::ManualPick),
            (S::ManualPick, "pick_done", S::Confirm),
            (S::ChooseAges, "age", S::ChooseAges),
            (S::ChooseAges, "ages_all", S::ChooseAges),
            (S::ChooseAges, "ages_done", S::ChooseLevels),
            (S::ChooseLevels, "lvl", S::ChooseLevels),
            (S::ChooseLevels, "lvls_all", S::ChooseLevels),
            (S::ChooseLevels, "lvls_back", S::ChooseAges),
            (S::ChooseLevels, "lvls_done", S::Confirm),
            (S::Confirm, "confirm", S::AwaitPayload),
        ]
    };

    fn expected_next(stage: BroadcastStage, name: &str) -> Option<BroadcastStage> {
        TRANSITIONS
            .iter()
            .find(|(from, action, _)| *from == stage && *action == name)
            .map(|(_, _, to)| *to)
    }

    #[test]
    fn transition_table_covers_every_stage_and_action() {
        for stage in ALL_STAGES {
            for action in every_action() {
                let name = action_name(&action);
                assert_eq!(
                    stage.next(&action),
                    expected_next(stage, name),
                    "{stage:?} / {name}"
                );
            }
        }
    }

    #[tokio::test]
    async fn foreign_actions_in_every_stage_are_stale_and_change_nothing() {
        let (wizard, registry) = wizard("bc-every-stage", BroadcastConfig::default()).await;
        seed(&registry, -1, "Alpha", ["x", "kids", "pro"]).await;

        for stage in ALL_STAGES {
            let mut session = BroadcastSession::new(stage);
            session.branch = Some("x".to_owned());
            session.ages.insert("kids".to_owned());
            session.levels.insert("pro".to_owned());
            session.picked.insert(-1);
            session.targets = vec![-1];
            wizard.sessions.start(OWNER, session.clone()).await;

            for action in every_action() {
                let name = action_name(&action);
                if name == "cancel" || expected_next(stage, name).is_some() {
                    continue;
                }
                assert_eq!(
                    step(&wizard, action).await,
                    Outcome::toast(views::STALE),
                    "{stage:?} / {name}"
                );
                assert_eq!(
                    wizard.sessions.get(OWNER).await.as_ref(),
                    Some(&session),
                    "{stage:?} / {name}"
                );
            }
        }
    }
}
