//! Inline-button tokens. Every token is `<scope>:<verb>[:<arg>]`; the argument
//! is the remainder after the second `:`, so signed chat ids survive intact.

use crate::broadcast::BroadcastAction;
use crate::tagging::{TagFlow, TaggingAction};
use crate::tags::TagField;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuAction {
    StartBroadcast,
    TagNext(TagFlow),
    EditTags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    Noop,
    Menu(MenuAction),
    Broadcast(BroadcastAction),
    Tagging(TaggingAction),
}

impl CallbackAction {
    pub fn parse(data: &str) -> Option<Self> {
        let data = data.trim();
        if data == "noop" {
            return Some(Self::Noop);
        }
        let mut parts = data.splitn(3, ':');
        let scope = parts.next()?;
        let verb = parts.next()?;
        let arg = parts.next();
        match scope {
            "menu" => parse_menu(verb, arg).map(Self::Menu),
            "bc" => parse_broadcast(verb, arg).map(Self::Broadcast),
            "tg" => parse_tagging(verb, arg).map(Self::Tagging),
            _ => None,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Self::Noop => "noop".to_owned(),
            Self::Menu(action) => match action {
                MenuAction::StartBroadcast => "menu:bc".to_owned(),
                MenuAction::TagNext(flow) => format!("menu:next:{}", flow.as_str()),
                MenuAction::EditTags => "menu:edit".to_owned(),
            },
            Self::Broadcast(action) => match action {
                BroadcastAction::ChooseBranch(slug) => format!("bc:branch:{slug}"),
                BroadcastAction::ManualMode => "bc:mode:manual".to_owned(),
                BroadcastAction::TagMode => "bc:mode:tags".to_owned(),
                BroadcastAction::TogglePick(chat_id) => format!("bc:pick:{chat_id}"),
                BroadcastAction::TogglePickAll => "bc:pick_all".to_owned(),
                BroadcastAction::PrevPage => "bc:page:prev".to_owned(),
                BroadcastAction::NextPage => "bc:page:next".to_owned(),
                BroadcastAction::FinishPicks => "bc:pick_done".to_owned(),
                BroadcastAction::ToggleAge(slug) => format!("bc:age:{slug}"),
                BroadcastAction::ToggleAllAges => "bc:ages_all".to_owned(),
                BroadcastAction::FinishAges => "bc:ages_done".to_owned(),
                BroadcastAction::ToggleLevel(slug) => format!("bc:lvl:{slug}"),
                BroadcastAction::ToggleAllLevels => "bc:lvls_all".to_owned(),
                BroadcastAction::BackToAges => "bc:lvls_back".to_owned(),
                BroadcastAction::FinishLevels => "bc:lvls_done".to_owned(),
                BroadcastAction::Confirm => "bc:confirm".to_owned(),
                BroadcastAction::Cancel => "bc:cancel".to_owned(),
            },
            Self::Tagging(action) => match action {
                TaggingAction::SetValue { chat_id, slug } => format!("tg:set:{chat_id}:{slug}"),
                TaggingAction::Cancel => "tg:cancel".to_owned(),
                TaggingAction::BrowseBranch(slug) => format!("tg:browse:{slug}"),
                TaggingAction::BrowseAll => "tg:browse_all".to_owned(),
                TaggingAction::PrevPage => "tg:page:prev".to_owned(),
                TaggingAction::NextPage => "tg:page:next".to_owned(),
                TaggingAction::SelectChat(chat_id) => format!("tg:chat:{chat_id}"),
                TaggingAction::Edit(flow) => format!("tg:edit:{}", flow.as_str()),
                TaggingAction::Clear(field) => format!("tg:clear:{}", field.as_str()),
                TaggingAction::BackToList => "tg:list".to_owned(),
            },
        }
    }
}

fn parse_menu(verb: &str, arg: Option<&str>) -> Option<MenuAction> {
    match (verb, arg) {
        ("bc", None) => Some(MenuAction::StartBroadcast),
        ("next", Some(flow)) => TagFlow::parse(flow).map(MenuAction::TagNext),
        ("edit", None) => Some(MenuAction::EditTags),
        _ => None,
    }
}

fn parse_broadcast(verb: &str, arg: Option<&str>) -> Option<BroadcastAction> {
    let action = match (verb, arg) {
        ("branch", Some(slug)) => BroadcastAction::ChooseBranch(non_empty(slug)?),
        ("mode", Some("manual")) => BroadcastAction::ManualMode,
        ("mode", Some("tags")) => BroadcastAction::TagMode,
        ("pick", Some(raw)) => BroadcastAction::TogglePick(parse_chat_id(raw)?),
        ("pick_all", None) => BroadcastAction::TogglePickAll,
        ("pick_done", None) => BroadcastAction::FinishPicks,
        ("page", Some("prev")) => BroadcastAction::PrevPage,
        ("page", Some("next")) => BroadcastAction::NextPage,
        ("age", Some(slug)) => BroadcastAction::ToggleAge(non_empty(slug)?),
        ("ages_all", None) => BroadcastAction::ToggleAllAges,
        ("ages_done", None) => BroadcastAction::FinishAges,
        ("lvl", Some(slug)) => BroadcastAction::ToggleLevel(non_empty(slug)?),
        ("lvls_all", None) => BroadcastAction::ToggleAllLevels,
        ("lvls_back", None) => BroadcastAction::BackToAges,
        ("lvls_done", None) => BroadcastAction::FinishLevels,
        ("confirm", None) => BroadcastAction::Confirm,
        ("cancel", None) => BroadcastAction::Cancel,
        _ => return None,
    };
    Some(action)
}

fn parse_tagging(verb: &str, arg: Option<&str>) -> Option<TaggingAction> {
    let action = match (verb, arg) {
        ("set", Some(raw)) => {
            let (chat_id, slug) = raw.rsplit_once(':')?;
            TaggingAction::SetValue {
                chat_id: parse_chat_id(chat_id)?,
                slug: non_empty(slug)?,
            }
        }
        ("cancel", None) => TaggingAction::Cancel,
        ("browse", Some(slug)) => TaggingAction::BrowseBranch(non_empty(slug)?),
        ("browse_all", None) => TaggingAction::BrowseAll,
        ("page", Some("prev")) => TaggingAction::PrevPage,
        ("page", Some("next")) => TaggingAction::NextPage,
        ("chat", Some(raw)) => TaggingAction::SelectChat(parse_chat_id(raw)?),
        ("edit", Some(flow)) => TaggingAction::Edit(TagFlow::parse(flow)?),
        ("clear", Some(field)) => TaggingAction::Clear(TagField::parse(field)?),
        ("list", None) => TaggingAction::BackToList,
        _ => return None,
    };
    Some(action)
}

fn parse_chat_id(raw: &str) -> Option<i64> {
    raw.trim().parse::<i64>().ok()
}

fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}
