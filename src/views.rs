use std::collections::BTreeSet;
use std::fmt::Write as _;

use crate::broadcast::BroadcastAction;
use crate::callback::{CallbackAction, MenuAction};
use crate::dispatch::FanoutReport;
use crate::keyboard::{clamp_page, page_count, page_slice, InlineButton, InlineKeyboard, Screen};
use crate::registry::ChatRecord;
use crate::tagging::{TagFlow, TaggingAction};
use crate::tags::{TagCatalog, TagField, TagVocabulary};

pub const NOT_OWNER: &str = "⛔ Только владелец";
pub const STALE: &str = "Неактуально";
pub const OK: &str = "Ок";
pub const SAVED: &str = "Сохранено";
pub const CLEARED: &str = "Очищено";
pub const UNKNOWN_VALUE: &str = "Неизвестное значение";
pub const NO_CHAT_SELECTED: &str = "Ошибка: чат не выбран";
pub const CHAT_NOT_FOUND: &str = "Чат не найден";
pub const PICK_ONE_CHAT: &str = "Выбери хотя бы 1 чат";
pub const PICK_ONE_AGE: &str = "Выбери минимум 1 возраст";
pub const PICK_ONE_LEVEL: &str = "Выбери минимум 1 уровень";
pub const NO_MATCHING_CHATS: &str = "Нет чатов под фильтр. Разметь группы.";
pub const BROADCAST_CANCELLED: &str = "❌ Рассылка отменена.";
pub const TAGGING_CANCELLED: &str = "❌ Разметка отменена.";
pub const CANCELLED: &str = "❌ Отменено.";
pub const BROADCAST_RUNNING: &str = "⏳ Предыдущая рассылка ещё идёт";
pub const NOTHING_TO_CANCEL: &str = "Нечего отменять.";
pub const STORAGE_ERROR: &str = "⚠️ Не удалось сохранить. Попробуй ещё раз.";
pub const UNSUPPORTED_PAYLOAD: &str = "⚠️ Этот тип сообщения пока не поддерживается.";

const CHECKED: &str = "✅";
const UNCHECKED: &str = "⬜";

fn mark(checked: bool) -> &'static str {
    if checked {
        CHECKED
    } else {
        UNCHECKED
    }
}

fn field_name(field: TagField) -> &'static str {
    match field {
        TagField::Branch => "филиал",
        TagField::Age => "возраст",
        TagField::Level => "уровень",
    }
}

fn flow_name(flow: TagFlow) -> &'static str {
    match flow {
        TagFlow::Single(field) => field_name(field),
        TagFlow::AgeAndLevel => "возраст и уровень",
    }
}

pub fn start_text(user_id: i64, is_owner: bool) -> String {
    let mut text = format!("✅ Бот работает.\nВаш ID: {user_id}");
    if !is_owner {
        text.push_str("\n\nУправление доступно только владельцу.");
    }
    text
}

pub fn main_menu() -> Screen {
    let keyboard = InlineKeyboard::new()
        .button("📣 Рассылка", &CallbackAction::Menu(MenuAction::StartBroadcast))
        .button(
            "🏢 Разметка филиала (следующий)",
            &CallbackAction::Menu(MenuAction::TagNext(TagFlow::Single(TagField::Branch))),
        )
        .button(
            "🎂 Разметка возраста (следующий)",
            &CallbackAction::Menu(MenuAction::TagNext(TagFlow::Single(TagField::Age))),
        )
        .button(
            "🎯 Разметка уровня (следующий)",
            &CallbackAction::Menu(MenuAction::TagNext(TagFlow::Single(TagField::Level))),
        )
        .button(
            "🏷 Возраст + уровень (следующий)",
            &CallbackAction::Menu(MenuAction::TagNext(TagFlow::AgeAndLevel)),
        )
        .button("✏️ Изменить теги чатов", &CallbackAction::Menu(MenuAction::EditTags));
    Screen::with_keyboard("Главное меню:", keyboard)
}

// Broadcast wizard

fn bc(action: BroadcastAction) -> CallbackAction {
    CallbackAction::Broadcast(action)
}

fn bc_cancel_button() -> InlineButton {
    InlineButton::new("❌ Отмена", &bc(BroadcastAction::Cancel))
}

pub fn broadcast_branch_picker(catalog: &TagCatalog) -> Screen {
    let mut keyboard = InlineKeyboard::new();
    for option in catalog.branches.options() {
        keyboard = keyboard.button(
            option.label.clone(),
            &bc(BroadcastAction::ChooseBranch(option.slug.clone())),
        );
    }
    Screen::with_keyboard(
        "📣 Выбери филиал для рассылки:",
        keyboard.row(vec![bc_cancel_button()]),
    )
}

pub fn broadcast_mode(branch_label: Option<&str>) -> Screen {
    let keyboard = InlineKeyboard::new()
        .button("🔎 Выбрать чаты по названию", &bc(BroadcastAction::ManualMode))
        .button("🏷 Выбрать чаты по тегу", &bc(BroadcastAction::TagMode))
        .row(vec![bc_cancel_button()]);
    let text = match branch_label {
        Some(label) => format!("✅ Филиал выбран: {label}\n\nТеперь выбери как выбирать чаты:"),
        None => "📣 Рассылка по всем чатам.\n\nВыбери как выбирать чаты:".to_owned(),
    };
    Screen::with_keyboard(text, keyboard)
}

pub fn manual_pick_keyboard(
    candidates: &[ChatRecord],
    picked: &BTreeSet<i64>,
    page: usize,
    page_size: usize,
) -> InlineKeyboard {
    let pages = page_count(candidates.len(), page_size);
    let page = clamp_page(page, candidates.len(), page_size);
    let mut keyboard = InlineKeyboard::new();
    for record in page_slice(candidates, page, page_size) {
        keyboard = keyboard.button(
            format!("{} {}", mark(picked.contains(&record.chat_id)), record.title),
            &bc(BroadcastAction::TogglePick(record.chat_id)),
        );
    }

    let mut nav = Vec::new();
    if page > 0 {
        nav.push(InlineButton::new("⬅️", &bc(BroadcastAction::PrevPage)));
    }
    nav.push(InlineButton::new(
        format!("📄 {}/{}", page + 1, pages),
        &CallbackAction::Noop,
    ));
    if page + 1 < pages {
        nav.push(InlineButton::new("➡️", &bc(BroadcastAction::NextPage)));
    }

    let all_selected = !candidates.is_empty()
        && candidates
            .iter()
            .all(|record| picked.contains(&record.chat_id));
    keyboard
        .row(nav)
        .button(
            format!("{} ✅ Выбрать все", mark(all_selected)),
            &bc(BroadcastAction::TogglePickAll),
        )
        .button("➡️ Далее", &bc(BroadcastAction::FinishPicks))
        .row(vec![bc_cancel_button()])
}

pub fn manual_pick(
    candidates: &[ChatRecord],
    picked: &BTreeSet<i64>,
    page: usize,
    page_size: usize,
) -> Screen {
    let text = if candidates.is_empty() {
        "🔎 Выбор чатов вручную.\n\nВ этом филиале пока нет чатов.".to_owned()
    } else {
        "🔎 Выбор чатов вручную.\n\nОтмечай нужные чаты ✅".to_owned()
    };
    Screen::with_keyboard(text, manual_pick_keyboard(candidates, picked, page, page_size))
}

fn checklist(
    vocabulary: &TagVocabulary,
    selected: &BTreeSet<String>,
    toggle: impl Fn(String) -> BroadcastAction,
    all_label: &str,
    all_action: BroadcastAction,
) -> InlineKeyboard {
    let mut keyboard = InlineKeyboard::new();
    for option in vocabulary.options() {
        keyboard = keyboard.button(
            format!("{} {}", mark(selected.contains(&option.slug)), option.label),
            &bc(toggle(option.slug.clone())),
        );
    }
    let everything = *selected == vocabulary.slugs();
    keyboard.button(format!("{} ✅ {all_label}", mark(everything)), &bc(all_action))
}

pub fn ages_keyboard(catalog: &TagCatalog, selected: &BTreeSet<String>) -> InlineKeyboard {
    checklist(
        &catalog.ages,
        selected,
        BroadcastAction::ToggleAge,
        "Выбрать все возраста",
        BroadcastAction::ToggleAllAges,
    )
    .button("➡️ Далее", &bc(BroadcastAction::FinishAges))
    .row(vec![bc_cancel_button()])
}

pub fn ages(catalog: &TagCatalog, selected: &BTreeSet<String>) -> Screen {
    Screen::with_keyboard("🏷 Выбери возраст:", ages_keyboard(catalog, selected))
}

pub fn levels_keyboard(catalog: &TagCatalog, selected: &BTreeSet<String>) -> InlineKeyboard {
    checklist(
        &catalog.levels,
        selected,
        BroadcastAction::ToggleLevel,
        "Выбрать все уровни",
        BroadcastAction::ToggleAllLevels,
    )
    .button("⬅️ Назад", &bc(BroadcastAction::BackToAges))
    .button("➡️ Далее", &bc(BroadcastAction::FinishLevels))
    .row(vec![bc_cancel_button()])
}

pub fn levels(catalog: &TagCatalog, selected: &BTreeSet<String>) -> Screen {
    Screen::with_keyboard("🏷 Выбери уровень:", levels_keyboard(catalog, selected))
}

/// Bulleted preview of the first `limit` titles with a "+K more" tail.
pub fn preview_list(titles: &[String], total: usize, limit: usize) -> String {
    let mut out = titles
        .iter()
        .take(limit)
        .map(|title| format!("• {title}"))
        .collect::<Vec<_>>()
        .join("\n");
    let shown = titles.len().min(limit);
    let extra = total.saturating_sub(shown);
    if extra > 0 {
        let _ = write!(out, "\n… и ещё {extra} чатов");
    }
    out
}

pub fn confirm(total: usize, titles: &[String], limit: usize, manual: bool) -> Screen {
    let heading = if manual {
        format!("✅ Выбрано чатов: {total}")
    } else {
        format!("✅ Чатов подходит: {total}")
    };
    let keyboard = InlineKeyboard::new()
        .button("✅ Подтвердить", &bc(BroadcastAction::Confirm))
        .row(vec![bc_cancel_button()]);
    Screen::with_keyboard(
        format!(
            "{heading}\n\n📋 Чаты:\n{}\n\nНажми ✅ Подтвердить, чтобы перейти к отправке сообщения.",
            preview_list(titles, total, limit)
        ),
        keyboard,
    )
}

pub fn await_payload() -> Screen {
    Screen::with_keyboard(
        "✅ Подтверждено!\n\n\
         Теперь пришли ОДНО сообщение для рассылки:\n\
         💬 текст / 🖼 фото / 🎬 видео / 📎 файл\n\n\
         Если передумал — нажми отмену ниже.",
        InlineKeyboard::new().button("❌ Отменить рассылку", &bc(BroadcastAction::Cancel)),
    )
}

pub fn fanout_started(total: usize) -> String {
    format!("🚀 Начинаю рассылку в {total} чатов...")
}

pub fn fanout_finished(report: &FanoutReport) -> String {
    format!(
        "✅ Готово!\nУспешно: {}\nОшибок: {}",
        report.succeeded, report.failed
    )
}

// Tagging wizard

fn tg(action: TaggingAction) -> CallbackAction {
    CallbackAction::Tagging(action)
}

fn tg_cancel_button() -> InlineButton {
    InlineButton::new("❌ Отмена", &tg(TaggingAction::Cancel))
}

/// Value buttons carry the chat they were shown for, so an old prompt cannot
/// tag whichever chat the session moved on to.
pub fn tag_value_picker(vocabulary: &TagVocabulary, chat_id: i64) -> InlineKeyboard {
    let mut keyboard = InlineKeyboard::new();
    for option in vocabulary.options() {
        keyboard = keyboard.button(
            option.label.clone(),
            &tg(TaggingAction::SetValue {
                chat_id,
                slug: option.slug.clone(),
            }),
        );
    }
    keyboard.row(vec![tg_cancel_button()])
}

pub fn tag_prompt(
    catalog: &TagCatalog,
    field: TagField,
    record: &ChatRecord,
    pending_age: Option<&str>,
) -> Screen {
    let heading = match field {
        TagField::Branch => "🏢 Назначаем филиал",
        TagField::Age => "🎂 Назначаем возраст",
        TagField::Level => "🎯 Назначаем уровень",
    };
    let mut text = format!("{heading}\nЧат: {}\n", record.title);
    if let Some(age) = pending_age {
        let _ = writeln!(text, "Возраст: {}", catalog.describe(TagField::Age, Some(age)));
    }
    let _ = write!(text, "\nВыбери {}:", field_name(field));
    Screen::with_keyboard(text, tag_value_picker(catalog.vocabulary(field), record.chat_id))
}

pub fn tag_saved(title: &str, changes: &[(TagField, &str)]) -> Screen {
    let assigned = changes
        .iter()
        .map(|(field, value)| format!("{}={value}", field.as_str()))
        .collect::<Vec<_>>()
        .join("\n");
    Screen::text(format!("✅ Назначено!\n\n{title}\n{assigned}"))
}

pub fn all_tagged(flow: TagFlow) -> Screen {
    Screen::text(format!("✅ Все группы теперь имеют {}!", flow_name(flow)))
}

pub fn nothing_to_tag(flow: TagFlow) -> Screen {
    Screen::text(format!(
        "✅ Нет групп без разметки ({}).\n\n\
         ⚠️ Если групп нет в базе — напиши любое сообщение (можно '.') в каждую группу, \
         где есть бот, чтобы он сохранил чаты.",
        flow_name(flow)
    ))
}

pub fn edit_filter(catalog: &TagCatalog) -> Screen {
    let mut keyboard = InlineKeyboard::new();
    for option in catalog.branches.options() {
        keyboard = keyboard.button(
            option.label.clone(),
            &tg(TaggingAction::BrowseBranch(option.slug.clone())),
        );
    }
    keyboard = keyboard
        .button("🌐 Все чаты", &tg(TaggingAction::BrowseAll))
        .row(vec![tg_cancel_button()]);
    Screen::with_keyboard("✏️ Какие чаты показать?", keyboard)
}

fn compact_tags(catalog: &TagCatalog, record: &ChatRecord) -> String {
    TagField::ALL
        .iter()
        .map(|field| catalog.describe(*field, record.tag(*field)))
        .collect::<Vec<_>>()
        .join(" · ")
}

pub fn chat_list(
    catalog: &TagCatalog,
    records: &[ChatRecord],
    branch: Option<&str>,
    page: usize,
    page_size: usize,
) -> Screen {
    let pages = page_count(records.len(), page_size);
    let page = clamp_page(page, records.len(), page_size);
    let mut keyboard = InlineKeyboard::new();
    for record in page_slice(records, page, page_size) {
        keyboard = keyboard.button(
            format!("{} · {}", record.title, compact_tags(catalog, record)),
            &tg(TaggingAction::SelectChat(record.chat_id)),
        );
    }
    let mut nav = Vec::new();
    if page > 0 {
        nav.push(InlineButton::new("⬅️", &tg(TaggingAction::PrevPage)));
    }
    nav.push(InlineButton::new(
        format!("📄 {}/{}", page + 1, pages),
        &CallbackAction::Noop,
    ));
    if page + 1 < pages {
        nav.push(InlineButton::new("➡️", &tg(TaggingAction::NextPage)));
    }
    keyboard = keyboard.row(nav).row(vec![tg_cancel_button()]);

    let scope = match branch {
        Some(slug) => catalog.describe(TagField::Branch, Some(slug)),
        None => "все чаты".to_owned(),
    };
    let text = if records.is_empty() {
        format!("✏️ Чаты ({scope}): пусто.")
    } else {
        format!("✏️ Чаты ({scope}): {}\n\nВыбери чат для изменения тегов:", records.len())
    };
    Screen::with_keyboard(text, keyboard)
}

pub fn chat_menu(catalog: &TagCatalog, record: &ChatRecord, notice: Option<&str>) -> Screen {
    let mut text = String::new();
    if let Some(notice) = notice {
        let _ = write!(text, "{notice}\n\n");
    }
    let _ = write!(
        text,
        "✏️ {}\n\nФилиал: {}\nВозраст: {}\nУровень: {}",
        record.title,
        catalog.describe(TagField::Branch, record.branch.as_deref()),
        catalog.describe(TagField::Age, record.age.as_deref()),
        catalog.describe(TagField::Level, record.level.as_deref()),
    );
    let keyboard = InlineKeyboard::new()
        .button(
            "🏢 Изменить филиал",
            &tg(TaggingAction::Edit(TagFlow::Single(TagField::Branch))),
        )
        .button(
            "🎂 Изменить возраст",
            &tg(TaggingAction::Edit(TagFlow::Single(TagField::Age))),
        )
        .button(
            "🏷 Изменить возраст + уровень",
            &tg(TaggingAction::Edit(TagFlow::AgeAndLevel)),
        )
        .row(vec![
            InlineButton::new("🧹 Филиал", &tg(TaggingAction::Clear(TagField::Branch))),
            InlineButton::new("🧹 Возраст", &tg(TaggingAction::Clear(TagField::Age))),
            InlineButton::new("🧹 Уровень", &tg(TaggingAction::Clear(TagField::Level))),
        ])
        .button("⬅️ К списку", &tg(TaggingAction::BackToList))
        .row(vec![tg_cancel_button()]);
    Screen::with_keyboard(text, keyboard)
}

pub fn registry_line(catalog: &TagCatalog, record: &ChatRecord) -> String {
    format!(
        "{}\t{}\t{}\t{}",
        record.chat_id,
        record.chat_kind.as_str(),
        record.title,
        compact_tags(catalog, record)
    )
}
