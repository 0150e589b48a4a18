use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
#[cfg(feature = "sqlite-registry")]
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
#[cfg(feature = "sqlite-registry")]
use tokio::sync::Mutex;
use tokio::sync::RwLock;
use tracing::debug;

use crate::tags::TagField;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Group,
    Supergroup,
}

impl ChatKind {
    /// Only group-like chats are tracked; private chats and channels map to `None`.
    pub fn from_telegram(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "group" => Some(Self::Group),
            "supergroup" => Some(Self::Supergroup),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Group => "group",
            Self::Supergroup => "supergroup",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub chat_id: i64,
    pub title: String,
    pub chat_kind: ChatKind,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub age: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    pub updated_at_ms: u64,
}

impl ChatRecord {
    pub fn tag(&self, field: TagField) -> Option<&str> {
        match field {
            TagField::Branch => self.branch.as_deref(),
            TagField::Age => self.age.as_deref(),
            TagField::Level => self.level.as_deref(),
        }
    }

    fn set_tag(&mut self, field: TagField, value: Option<String>) {
        match field {
            TagField::Branch => self.branch = value,
            TagField::Age => self.age = value,
            TagField::Level => self.level = value,
        }
    }

    fn matches(&self, branch: Option<&str>, ages: &BTreeSet<String>, levels: &BTreeSet<String>) -> bool {
        let branch_ok = match branch {
            Some(expected) => self.branch.as_deref() == Some(expected),
            None => true,
        };
        branch_ok
            && self.age.as_ref().is_some_and(|age| ages.contains(age))
            && self.level.as_ref().is_some_and(|level| levels.contains(level))
    }
}

/// Persistent set of known group chats and their tags.
pub struct ChatRegistry {
    backend: RegistryBackend,
}

enum RegistryBackend {
    Json {
        path: PathBuf,
        records: RwLock<BTreeMap<i64, ChatRecord>>,
    },
    #[cfg(feature = "sqlite-registry")]
    Sqlite { path: PathBuf, lock: Mutex<()> },
}

impl ChatRegistry {
    pub async fn open(path: PathBuf) -> Result<Self> {
        if is_sqlite_path(&path) {
            #[cfg(feature = "sqlite-registry")]
            {
                init_sqlite(path.clone()).await?;
                return Ok(Self {
                    backend: RegistryBackend::Sqlite {
                        path,
                        lock: Mutex::new(()),
                    },
                });
            }

            #[cfg(not(feature = "sqlite-registry"))]
            {
                anyhow::bail!(
                    "sqlite registry requested for {} but binary was built without \
                     `sqlite-registry` feature",
                    path.display()
                );
            }
        }

        let records = if path.exists() {
            let text = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("read chat registry {}", path.display()))?;
            if text.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str::<BTreeMap<i64, ChatRecord>>(&text)
                    .with_context(|| format!("parse chat registry {}", path.display()))?
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            backend: RegistryBackend::Json {
                path,
                records: RwLock::new(records),
            },
        })
    }

    pub fn backend_name(&self) -> &'static str {
        match &self.backend {
            RegistryBackend::Json { .. } => "json",
            #[cfg(feature = "sqlite-registry")]
            RegistryBackend::Sqlite { .. } => "sqlite",
        }
    }

    /// Records a group chat seen in an inbound message. Returns `false` (and
    /// writes nothing) for chat types that are not tracked.
    pub async fn upsert(&self, chat_id: i64, title: Option<&str>, chat_type: &str) -> Result<bool> {
        let Some(kind) = ChatKind::from_telegram(chat_type) else {
            return Ok(false);
        };
        let title = title
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| chat_id.to_string());
        let now = now_ms();
        debug!("registry upsert chat_id={chat_id} kind={}", kind.as_str());

        match &self.backend {
            RegistryBackend::Json { path, records } => {
                let mut guard = records.write().await;
                let mut next = guard.clone();
                next
                    .entry(chat_id)
                    .and_modify(|record| {
                        record.title = title.clone();
                        record.chat_kind = kind;
                        record.updated_at_ms = now;
                    })
                    .or_insert_with(|| ChatRecord {
                        chat_id,
                        title: title.clone(),
                        chat_kind: kind,
                        branch: None,
                        age: None,
                        level: None,
                        updated_at_ms: now,
                    });
                persist_json(path, &next).await?;
                *guard = next;
            }
            #[cfg(feature = "sqlite-registry")]
            RegistryBackend::Sqlite { path, lock } => {
                let _guard = lock.lock().await;
                let path = path.clone();
                tokio::task::spawn_blocking(move || -> Result<()> {
                    let conn = open_sqlite(&path)?;
                    conn.execute(
                        "INSERT INTO chats (chat_id, title, chat_type, updated_at_ms)
                         VALUES (?1, ?2, ?3, ?4)
                         ON CONFLICT(chat_id) DO UPDATE SET
                            title=excluded.title,
                            chat_type=excluded.chat_type,
                            updated_at_ms=excluded.updated_at_ms",
                        params![chat_id, title, kind.as_str(), now as i64],
                    )
                    .with_context(|| "upsert chats row")?;
                    Ok(())
                })
                .await
                .with_context(|| "sqlite upsert join error")??;
            }
        }
        Ok(true)
    }

    pub async fn get(&self, chat_id: i64) -> Result<Option<ChatRecord>> {
        match &self.backend {
            RegistryBackend::Json { records, .. } => Ok(records.read().await.get(&chat_id).cloned()),
            #[cfg(feature = "sqlite-registry")]
            RegistryBackend::Sqlite { path, lock } => {
                let _guard = lock.lock().await;
                let path = path.clone();
                tokio::task::spawn_blocking(move || -> Result<Option<ChatRecord>> {
                    let conn = open_sqlite(&path)?;
                    conn.query_row(
                        &format!("SELECT {SELECT_COLUMNS} FROM chats WHERE chat_id = ?1"),
                        params![chat_id],
                        row_to_record,
                    )
                    .optional()
                    .with_context(|| "select chat by id")
                })
                .await
                .with_context(|| "sqlite get join error")?
            }
        }
    }

    /// Title of a chat, or its id when the chat is unknown.
    pub async fn title_of(&self, chat_id: i64) -> String {
        match self.get(chat_id).await {
            Ok(Some(record)) => record.title,
            _ => chat_id.to_string(),
        }
    }

    /// All chats in title order, optionally restricted to one branch.
    pub async fn list(&self, branch: Option<&str>) -> Result<Vec<ChatRecord>> {
        let branch = branch.map(ToOwned::to_owned);
        match &self.backend {
            RegistryBackend::Json { records, .. } => {
                let guard = records.read().await;
                let rows = guard
                    .values()
                    .filter(|record| match branch.as_deref() {
                        Some(expected) => record.branch.as_deref() == Some(expected),
                        None => true,
                    })
                    .cloned()
                    .collect();
                Ok(sorted_by_title(rows))
            }
            #[cfg(feature = "sqlite-registry")]
            RegistryBackend::Sqlite { path, lock } => {
                let _guard = lock.lock().await;
                let path = path.clone();
                tokio::task::spawn_blocking(move || -> Result<Vec<ChatRecord>> {
                    let conn = open_sqlite(&path)?;
                    match branch {
                        Some(branch) => query_records(
                            &conn,
                            &format!(
                                "SELECT {SELECT_COLUMNS} FROM chats WHERE branch = ?1 \
                                 ORDER BY title ASC, rowid ASC"
                            ),
                            vec![branch],
                        ),
                        None => query_records(
                            &conn,
                            &format!("SELECT {SELECT_COLUMNS} FROM chats ORDER BY title ASC, rowid ASC"),
                            Vec::new(),
                        ),
                    }
                })
                .await
                .with_context(|| "sqlite list join error")?
            }
        }
    }

    pub async fn list_by_branch(&self, branch: &str) -> Result<Vec<ChatRecord>> {
        self.list(Some(branch)).await
    }

    /// First chat by title whose `field` is not yet tagged.
    pub async fn next_missing(&self, field: TagField) -> Result<Option<ChatRecord>> {
        self.next_missing_any(&[field]).await
    }

    /// First chat by title missing at least one of `fields`.
    pub async fn next_missing_any(&self, fields: &[TagField]) -> Result<Option<ChatRecord>> {
        if fields.is_empty() {
            return Ok(None);
        }
        match &self.backend {
            RegistryBackend::Json { records, .. } => {
                let guard = records.read().await;
                let missing = guard
                    .values()
                    .filter(|record| fields.iter().any(|field| record.tag(*field).is_none()))
                    .cloned()
                    .collect();
                Ok(sorted_by_title(missing).into_iter().next())
            }
            #[cfg(feature = "sqlite-registry")]
            RegistryBackend::Sqlite { path, lock } => {
                let _guard = lock.lock().await;
                let path = path.clone();
                let condition = fields
                    .iter()
                    .map(|field| format!("{} IS NULL", field.column()))
                    .collect::<Vec<_>>()
                    .join(" OR ");
                tokio::task::spawn_blocking(move || -> Result<Option<ChatRecord>> {
                    let conn = open_sqlite(&path)?;
                    let rows = query_records(
                        &conn,
                        &format!(
                            "SELECT {SELECT_COLUMNS} FROM chats WHERE {condition} \
                             ORDER BY title ASC, rowid ASC LIMIT 1"
                        ),
                        Vec::new(),
                    )?;
                    Ok(rows.into_iter().next())
                })
                .await
                .with_context(|| "sqlite next_missing join error")?
            }
        }
    }

    /// Chat ids (title order) whose branch matches and whose age and level are
    /// both in the given sets. An empty age or level set matches nothing.
    pub async fn list_matching(
        &self,
        branch: Option<&str>,
        ages: &BTreeSet<String>,
        levels: &BTreeSet<String>,
    ) -> Result<Vec<i64>> {
        if ages.is_empty() || levels.is_empty() {
            return Ok(Vec::new());
        }
        match &self.backend {
            RegistryBackend::Json { records, .. } => {
                let guard = records.read().await;
                let rows = guard
                    .values()
                    .filter(|record| record.matches(branch, ages, levels))
                    .cloned()
                    .collect();
                Ok(sorted_by_title(rows)
                    .into_iter()
                    .map(|record| record.chat_id)
                    .collect())
            }
            #[cfg(feature = "sqlite-registry")]
            RegistryBackend::Sqlite { path, lock } => {
                let _guard = lock.lock().await;
                let path = path.clone();
                let mut clauses = Vec::new();
                let mut values = Vec::new();
                if let Some(branch) = branch {
                    clauses.push("branch = ?".to_owned());
                    values.push(branch.to_owned());
                }
                clauses.push(format!("age IN ({})", placeholders(ages.len())));
                values.extend(ages.iter().cloned());
                clauses.push(format!("level IN ({})", placeholders(levels.len())));
                values.extend(levels.iter().cloned());
                let sql = format!(
                    "SELECT chat_id FROM chats WHERE {} ORDER BY title ASC, rowid ASC",
                    clauses.join(" AND ")
                );
                tokio::task::spawn_blocking(move || -> Result<Vec<i64>> {
                    let conn = open_sqlite(&path)?;
                    let mut stmt = conn.prepare(&sql).with_context(|| "prepare list_matching")?;
                    let ids = stmt
                        .query_map(params_from_iter(values.iter()), |row| row.get::<_, i64>(0))
                        .with_context(|| "query list_matching")?
                        .collect::<rusqlite::Result<Vec<_>>>()
                        .with_context(|| "read list_matching rows")?;
                    Ok(ids)
                })
                .await
                .with_context(|| "sqlite list_matching join error")?
            }
        }
    }

    /// Sets or clears a single tag. Returns `false` if the chat is unknown.
    pub async fn set_field(&self, chat_id: i64, field: TagField, value: Option<&str>) -> Result<bool> {
        self.set_fields(chat_id, &[(field, value)]).await
    }

    /// Applies several tag changes in one write.
    pub async fn set_fields(&self, chat_id: i64, changes: &[(TagField, Option<&str>)]) -> Result<bool> {
        if changes.is_empty() {
            return Ok(false);
        }
        let now = now_ms();
        let owned: Vec<(TagField, Option<String>)> = changes
            .iter()
            .map(|(field, value)| (*field, value.map(ToOwned::to_owned)))
            .collect();

        match &self.backend {
            RegistryBackend::Json { path, records } => {
                let mut guard = records.write().await;
                let mut next = guard.clone();
                let Some(record) = next.get_mut(&chat_id) else {
                    return Ok(false);
                };
                for (field, value) in owned {
                    record.set_tag(field, value);
                }
                record.updated_at_ms = now;
                persist_json(path, &next).await?;
                *guard = next;
                Ok(true)
            }
            #[cfg(feature = "sqlite-registry")]
            RegistryBackend::Sqlite { path, lock } => {
                let _guard = lock.lock().await;
                let path = path.clone();
                tokio::task::spawn_blocking(move || -> Result<bool> {
                    let conn = open_sqlite(&path)?;
                    let assignments = owned
                        .iter()
                        .map(|(field, _)| format!("{} = ?", field.column()))
                        .collect::<Vec<_>>()
                        .join(", ");
                    let sql = format!(
                        "UPDATE chats SET {assignments}, updated_at_ms = ? WHERE chat_id = ?"
                    );
                    let mut values: Vec<rusqlite::types::Value> = owned
                        .into_iter()
                        .map(|(_, value)| match value {
                            Some(text) => rusqlite::types::Value::Text(text),
                            None => rusqlite::types::Value::Null,
                        })
                        .collect();
                    values.push(rusqlite::types::Value::Integer(now as i64));
                    values.push(rusqlite::types::Value::Integer(chat_id));
                    let changed = conn
                        .execute(&sql, params_from_iter(values.iter()))
                        .with_context(|| "update chat tags")?;
                    Ok(changed > 0)
                })
                .await
                .with_context(|| "sqlite set_fields join error")?
            }
        }
    }
}

fn sorted_by_title(mut rows: Vec<ChatRecord>) -> Vec<ChatRecord> {
    // Stable sort keeps chat-id order among equal titles.
    rows.sort_by(|a, b| a.title.cmp(&b.title));
    rows
}

/// Writes the whole document. Callers swap their in-memory map only after this
/// succeeds, so a failed write leaves memory matching disk.
async fn persist_json(path: &Path, records: &BTreeMap<i64, ChatRecord>) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let snapshot = serde_json::to_vec_pretty(records)?;
    let temp_path = path.with_extension("tmp");
    tokio::fs::write(&temp_path, snapshot)
        .await
        .with_context(|| format!("write registry temp file {}", temp_path.display()))?;
    tokio::fs::rename(&temp_path, path)
        .await
        .with_context(|| format!("replace registry file {}", path.display()))?;
    Ok(())
}

fn is_sqlite_path(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()).map(|s| s.to_ascii_lowercase()),
        Some(ext) if ext == "db" || ext == "sqlite" || ext == "sqlite3"
    )
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(feature = "sqlite-registry")]
const CHATS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS chats (
    chat_id INTEGER PRIMARY KEY,
    title TEXT NOT NULL,
    chat_type TEXT NOT NULL,
    updated_at_ms INTEGER NOT NULL
);
"#;

#[cfg(feature = "sqlite-registry")]
const SELECT_COLUMNS: &str = "chat_id, title, chat_type, branch, age, level, updated_at_ms";

#[cfg(feature = "sqlite-registry")]
async fn init_sqlite(path: PathBuf) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::task::spawn_blocking(move || -> Result<()> {
        let conn =
            Connection::open(&path).with_context(|| format!("open sqlite {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .with_context(|| "set WAL mode")?;
        conn.execute_batch(CHATS_SCHEMA)
            .with_context(|| "ensure chats schema")?;
        migrate_tag_columns(&conn)?;
        Ok(())
    })
    .await
    .with_context(|| "sqlite init join error")??;
    Ok(())
}

/// Tag columns arrived after the first deployments; add whichever are missing.
#[cfg(feature = "sqlite-registry")]
fn migrate_tag_columns(conn: &Connection) -> Result<()> {
    let existing = {
        let mut stmt = conn
            .prepare("PRAGMA table_info(chats)")
            .with_context(|| "read chats columns")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .with_context(|| "query chats columns")?
            .collect::<rusqlite::Result<BTreeSet<String>>>()
            .with_context(|| "read chats column names")?;
        names
    };
    for field in TagField::ALL {
        if !existing.contains(field.column()) {
            conn.execute_batch(&format!("ALTER TABLE chats ADD COLUMN {} TEXT;", field.column()))
                .with_context(|| format!("add chats.{} column", field.column()))?;
        }
    }
    Ok(())
}

#[cfg(feature = "sqlite-registry")]
fn open_sqlite(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path).with_context(|| format!("open sqlite {}", path.display()))?;
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .with_context(|| "set sqlite busy timeout")?;
    Ok(conn)
}

#[cfg(feature = "sqlite-registry")]
fn query_records(conn: &Connection, sql: &str, values: Vec<String>) -> Result<Vec<ChatRecord>> {
    let mut stmt = conn.prepare(sql).with_context(|| "prepare chats query")?;
    let rows = stmt
        .query_map(params_from_iter(values.iter()), row_to_record)
        .with_context(|| "query chats")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .with_context(|| "read chats rows")?;
    Ok(rows)
}

#[cfg(feature = "sqlite-registry")]
fn row_to_record(row: &Row<'_>) -> rusqlite::Result<ChatRecord> {
    let chat_type: String = row.get(2)?;
    Ok(ChatRecord {
        chat_id: row.get(0)?,
        title: row.get(1)?,
        chat_kind: ChatKind::from_telegram(&chat_type).unwrap_or(ChatKind::Group),
        branch: row.get(3)?,
        age: row.get(4)?,
        level: row.get(5)?,
        updated_at_ms: row.get::<_, i64>(6)? as u64,
    })
}

#[cfg(feature = "sqlite-registry")]
fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}
