use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagField {
    Branch,
    Age,
    Level,
}

impl TagField {
    pub const ALL: [TagField; 3] = [TagField::Branch, TagField::Age, TagField::Level];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Branch => "branch",
            Self::Age => "age",
            Self::Level => "level",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "branch" => Some(Self::Branch),
            "age" => Some(Self::Age),
            "level" => Some(Self::Level),
            _ => None,
        }
    }

    pub fn column(self) -> &'static str {
        self.as_str()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagOption {
    pub slug: String,
    pub label: String,
}

impl TagOption {
    pub fn new(slug: &str, label: &str) -> Self {
        Self {
            slug: slug.to_owned(),
            label: label.to_owned(),
        }
    }
}

/// Ordered, closed set of values one tag field may take.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagVocabulary {
    options: Vec<TagOption>,
}

impl TagVocabulary {
    pub fn new(options: Vec<TagOption>) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &[TagOption] {
        &self.options
    }

    pub fn contains(&self, slug: &str) -> bool {
        self.options.iter().any(|option| option.slug == slug)
    }

    pub fn label<'a>(&'a self, slug: &'a str) -> &'a str {
        self.options
            .iter()
            .find(|option| option.slug == slug)
            .map(|option| option.label.as_str())
            .unwrap_or(slug)
    }

    pub fn slugs(&self) -> BTreeSet<String> {
        self.options.iter().map(|option| option.slug.clone()).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagCatalog {
    pub branches: TagVocabulary,
    pub ages: TagVocabulary,
    pub levels: TagVocabulary,
}

impl TagCatalog {
    pub fn vocabulary(&self, field: TagField) -> &TagVocabulary {
        match field {
            TagField::Branch => &self.branches,
            TagField::Age => &self.ages,
            TagField::Level => &self.levels,
        }
    }

    /// Human label for a stored value; unknown or legacy slugs render as-is.
    pub fn describe(&self, field: TagField, value: Option<&str>) -> String {
        match value {
            Some(slug) => self.vocabulary(field).label(slug).to_owned(),
            None => "—".to_owned(),
        }
    }
}

/// "Select all" checkbox: selects every candidate unless that is already the
/// selection, in which case it clears it.
pub fn toggle_all<T: Ord + Clone>(current: &BTreeSet<T>, candidates: &BTreeSet<T>) -> BTreeSet<T> {
    if current == candidates {
        BTreeSet::new()
    } else {
        candidates.clone()
    }
}

pub fn toggle_one<T: Ord>(selection: &mut BTreeSet<T>, value: T) {
    if !selection.remove(&value) {
        selection.insert(value);
    }
}

pub fn default_branches() -> Vec<TagOption> {
    vec![
        TagOption::new("krylatskoe", "📍 Крылатское"),
        TagOption::new("odintsovo", "📍 Одинцово"),
    ]
}

pub fn default_ages() -> Vec<TagOption> {
    vec![
        TagOption::new("baby", "👶 Бейби"),
        TagOption::new("kids", "🧒 Дети"),
        TagOption::new("junior", "🧑‍🎓 Юниоры"),
        TagOption::new("adult", "🧑 Взрослые"),
        TagOption::new("mom", "🤱 Мамочки"),
    ]
}

pub fn default_levels() -> Vec<TagOption> {
    vec![
        TagOption::new("beginner", "🟢 Начинающие"),
        TagOption::new("middle", "🟡 Продолжающие"),
        TagOption::new("pro", "🔴 Профи"),
    ]
}
