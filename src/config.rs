use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::tags::{default_ages, default_branches, default_levels, TagCatalog, TagOption, TagVocabulary};

const CALLBACK_DATA_MAX_BYTES: usize = 64;
// Longest prefix a slug is embedded behind: `tg:set:<i64 chat id>:`.
const CALLBACK_SLUG_PREFIX_BYTES: usize = 28;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub tags: TagsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub owner_id: i64,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            owner_id: 0,
            api_base: default_api_base(),
            poll_timeout_secs: default_poll_timeout_secs(),
            http_timeout_secs: default_http_timeout_secs(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    #[serde(default = "default_send_delay_ms")]
    pub send_delay_ms: u64,
    #[serde(default = "default_preview_limit")]
    pub preview_limit: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_scope_by_branch")]
    pub scope_by_branch: bool,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            send_delay_ms: default_send_delay_ms(),
            preview_limit: default_preview_limit(),
            page_size: default_page_size(),
            scope_by_branch: default_scope_by_branch(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagsConfig {
    #[serde(default = "default_branches")]
    pub branches: Vec<TagOption>,
    #[serde(default = "default_ages")]
    pub ages: Vec<TagOption>,
    #[serde(default = "default_levels")]
    pub levels: Vec<TagOption>,
}

impl Default for TagsConfig {
    fn default() -> Self {
        Self {
            branches: default_branches(),
            ages: default_ages(),
            levels: default_levels(),
        }
    }
}

impl TagsConfig {
    pub fn catalog(&self) -> TagCatalog {
        TagCatalog {
            branches: TagVocabulary::new(self.branches.clone()),
            ages: TagVocabulary::new(self.ages.clone()),
            levels: TagVocabulary::new(self.levels.clone()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            telegram: TelegramConfig::default(),
            storage: StorageConfig::default(),
            broadcast: BroadcastConfig::default(),
            tags: TagsConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let mut cfg = Self::read(path)?;
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads the file and environment without requiring bot credentials; used by
    /// offline subcommands that only touch storage.
    pub fn load_offline(path: &Path) -> Result<Self> {
        let mut cfg = Self::read(path)?;
        cfg.apply_env_overrides();
        cfg.validate_storage()?;
        Ok(cfg)
    }

    fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading config file {}", path.display()))?;
        toml::from_str::<Config>(&text)
            .with_context(|| format!("failed parsing TOML config {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = first_env(&["CHATCAST_BOT_TOKEN", "BOT_TOKEN"]) {
            self.telegram.bot_token = v.trim().to_owned();
        }
        if let Some(v) = first_env(&["CHATCAST_OWNER_ID", "OWNER_ID"]) {
            // Unparseable ids leave nobody authorized rather than failing startup.
            self.telegram.owner_id = v.trim().parse::<i64>().unwrap_or(0);
        }
        if let Ok(v) = env::var("CHATCAST_STORAGE_PATH") {
            let trimmed = v.trim();
            if !trimmed.is_empty() {
                self.storage.path = PathBuf::from(trimmed);
            }
        }
        if let Ok(v) = env::var("CHATCAST_SEND_DELAY_MS") {
            if let Ok(n) = v.trim().parse::<u64>() {
                self.broadcast.send_delay_ms = n;
            }
        }
        if let Ok(v) = env::var("CHATCAST_PAGE_SIZE") {
            if let Ok(n) = v.trim().parse::<usize>() {
                self.broadcast.page_size = n;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            anyhow::bail!("telegram.bot_token is required (or CHATCAST_BOT_TOKEN / BOT_TOKEN)");
        }
        if self.telegram.poll_timeout_secs >= self.telegram.http_timeout_secs {
            anyhow::bail!("telegram.http_timeout_secs must exceed telegram.poll_timeout_secs");
        }
        self.validate_storage()?;
        if self.broadcast.page_size == 0 {
            anyhow::bail!("broadcast.page_size must be > 0");
        }
        if self.broadcast.preview_limit == 0 {
            anyhow::bail!("broadcast.preview_limit must be > 0");
        }
        if self.broadcast.scope_by_branch && self.tags.branches.is_empty() {
            anyhow::bail!("tags.branches must not be empty while broadcast.scope_by_branch = true");
        }
        if self.tags.ages.is_empty() {
            anyhow::bail!("tags.ages must not be empty");
        }
        if self.tags.levels.is_empty() {
            anyhow::bail!("tags.levels must not be empty");
        }
        validate_vocabulary("tags.branches", &self.tags.branches)?;
        validate_vocabulary("tags.ages", &self.tags.ages)?;
        validate_vocabulary("tags.levels", &self.tags.levels)?;
        Ok(())
    }

    fn validate_storage(&self) -> Result<()> {
        if self.storage.path.as_os_str().is_empty() {
            anyhow::bail!("storage.path is required (or CHATCAST_STORAGE_PATH)");
        }
        Ok(())
    }
}

fn validate_vocabulary(name: &str, options: &[TagOption]) -> Result<()> {
    let mut seen = HashSet::new();
    for option in options {
        let slug = option.slug.as_str();
        if slug.is_empty() || slug.contains(':') || slug.chars().any(char::is_whitespace) {
            anyhow::bail!("{name}: slug `{slug}` must be non-empty without `:` or whitespace");
        }
        if slug.len() + CALLBACK_SLUG_PREFIX_BYTES > CALLBACK_DATA_MAX_BYTES {
            anyhow::bail!("{name}: slug `{slug}` is too long for a callback button");
        }
        if option.label.trim().is_empty() {
            anyhow::bail!("{name}: slug `{slug}` has an empty label");
        }
        if !seen.insert(slug) {
            anyhow::bail!("{name}: duplicate slug `{slug}`");
        }
    }
    Ok(())
}

fn first_env(keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| env::var(key).ok())
        .find(|value| !value.trim().is_empty())
}

fn default_api_base() -> String {
    "https://api.telegram.org".to_owned()
}

fn default_poll_timeout_secs() -> u64 {
    20
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_retry_delay_secs() -> u64 {
    2
}

fn default_storage_path() -> PathBuf {
    PathBuf::from(".chat-broadcaster/chats.db")
}

fn default_send_delay_ms() -> u64 {
    1_000
}

fn default_preview_limit() -> usize {
    30
}

fn default_page_size() -> usize {
    15
}

fn default_scope_by_branch() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::Config;
    use crate::tags::TagOption;

    fn valid_config() -> Config {
        let mut cfg = Config::default();
        cfg.telegram.bot_token = "123:abc".to_owned();
        cfg
    }

    #[test]
    fn default_config_requires_bot_token() {
        let err = Config::default().validate().expect_err("missing token");
        assert!(err.to_string().contains("bot_token"));
        valid_config().validate().expect("valid");
    }

    #[test]
    fn parses_minimal_toml_with_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [telegram]
            bot_token = "123:abc"
            owner_id = 42

            [broadcast]
            send_delay_ms = 250
            "#,
        )
        .expect("toml");
        assert_eq!(cfg.telegram.owner_id, 42);
        assert_eq!(cfg.broadcast.send_delay_ms, 250);
        assert_eq!(cfg.broadcast.page_size, 15);
        assert_eq!(cfg.broadcast.preview_limit, 30);
        assert_eq!(cfg.tags.ages.len(), 5);
        assert_eq!(cfg.tags.levels[2].slug, "pro");
        cfg.validate().expect("valid");
    }

    #[test]
    fn parses_custom_vocabularies() {
        let cfg: Config = toml::from_str(
            r#"
            [telegram]
            bot_token = "t"

            [tags]
            branches = [{ slug = "north", label = "North" }]
            levels = [{ slug = "pro", label = "Pro" }]
            "#,
        )
        .expect("toml");
        let catalog = cfg.tags.catalog();
        assert_eq!(catalog.branches.options().len(), 1);
        assert!(catalog.levels.contains("pro"));
        assert!(!catalog.levels.contains("beginner"));
        assert!(catalog.ages.contains("kids"));
    }

    #[test]
    fn rejects_slugs_that_break_callback_tokens() {
        let mut cfg = valid_config();
        cfg.tags.ages.push(TagOption::new("a:b", "broken"));
        assert!(cfg.validate().is_err());

        let mut cfg = valid_config();
        cfg.tags.levels.push(TagOption::new("pro", "again"));
        let err = cfg.validate().expect_err("duplicate");
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn branch_vocabulary_only_required_when_scoped() {
        let mut cfg = valid_config();
        cfg.tags.branches.clear();
        assert!(cfg.validate().is_err());
        cfg.broadcast.scope_by_branch = false;
        cfg.validate().expect("global broadcast without branches");
    }

    #[test]
    fn rejects_zero_page_size_and_empty_storage() {
        let mut cfg = valid_config();
        cfg.broadcast.page_size = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = valid_config();
        cfg.storage.path = std::path::PathBuf::new();
        assert!(cfg.validate().is_err());
    }
}
