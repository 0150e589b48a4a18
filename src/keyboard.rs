use serde_json::{json, Value};

use crate::callback::CallbackAction;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

impl InlineButton {
    pub fn new(text: impl Into<String>, action: &CallbackAction) -> Self {
        Self {
            text: text.into(),
            callback_data: action.encode(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InlineKeyboard {
    rows: Vec<Vec<InlineButton>>,
}

impl InlineKeyboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// One button per row, the layout every picker uses.
    pub fn button(mut self, text: impl Into<String>, action: &CallbackAction) -> Self {
        self.rows.push(vec![InlineButton::new(text, action)]);
        self
    }

    pub fn row(mut self, buttons: Vec<InlineButton>) -> Self {
        if !buttons.is_empty() {
            self.rows.push(buttons);
        }
        self
    }

    #[cfg(test)]
    pub fn find(&self, callback_data: &str) -> Option<&InlineButton> {
        self.rows
            .iter()
            .flatten()
            .find(|button| button.callback_data == callback_data)
    }

    pub fn to_reply_markup(&self) -> Value {
        let rows: Vec<Vec<Value>> = self
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|button| {
                        json!({
                            "text": button.text,
                            "callback_data": button.callback_data,
                        })
                    })
                    .collect()
            })
            .collect();
        json!({ "inline_keyboard": rows })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Screen {
    pub text: String,
    pub keyboard: Option<InlineKeyboard>,
}

impl Screen {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: None,
        }
    }

    pub fn with_keyboard(text: impl Into<String>, keyboard: InlineKeyboard) -> Self {
        Self {
            text: text.into(),
            keyboard: Some(keyboard),
        }
    }
}

/// How the callback query itself is acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Silent,
    Toast(String),
    Alert(String),
}

/// A change to the owner's view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Render {
    /// Replace the text (and keyboard) of the message the button belongs to.
    Edit(Screen),
    /// Replace only the keyboard of that message.
    EditKeyboard(InlineKeyboard),
    /// Post a new message to the owner's chat.
    Send(Screen),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub answer: Answer,
    pub renders: Vec<Render>,
}

impl Outcome {
    pub fn silent() -> Self {
        Self {
            answer: Answer::Silent,
            renders: Vec::new(),
        }
    }

    pub fn toast(text: impl Into<String>) -> Self {
        Self {
            answer: Answer::Toast(text.into()),
            renders: Vec::new(),
        }
    }

    pub fn alert(text: impl Into<String>) -> Self {
        Self {
            answer: Answer::Alert(text.into()),
            renders: Vec::new(),
        }
    }

    pub fn edit(screen: Screen) -> Self {
        Self::silent().then(Render::Edit(screen))
    }

    pub fn edit_keyboard(keyboard: InlineKeyboard) -> Self {
        Self::silent().then(Render::EditKeyboard(keyboard))
    }

    pub fn send(screen: Screen) -> Self {
        Self::silent().then(Render::Send(screen))
    }

    pub fn then(mut self, render: Render) -> Self {
        self.renders.push(render);
        self
    }

    pub fn with_answer(mut self, answer: Answer) -> Self {
        self.answer = answer;
        self
    }
}

pub fn page_count(total: usize, page_size: usize) -> usize {
    if page_size == 0 {
        return 1;
    }
    total.div_ceil(page_size).max(1)
}

pub fn clamp_page(page: usize, total: usize, page_size: usize) -> usize {
    page.min(page_count(total, page_size) - 1)
}

pub fn page_slice<T>(items: &[T], page: usize, page_size: usize) -> &[T] {
    let page = clamp_page(page, items.len(), page_size);
    let start = page.saturating_mul(page_size).min(items.len());
    let end = start.saturating_add(page_size).min(items.len());
    &items[start..end]
}
