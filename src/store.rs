use crate::error::{Result, SyncError};
use crate::models::UserRecord;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS user_records (
    user_key    TEXT PRIMARY KEY,
    record_json TEXT NOT NULL,
    updated_at  INTEGER NOT NULL
);
";

/// Keyed record store for per-user state. Last write wins; no transactions
/// span a load/save pair.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Unknown keys yield an empty record.
    async fn load(&self, user_key: &str) -> Result<UserRecord>;

    async fn save(&self, user_key: &str, record: &UserRecord) -> Result<()>;
}

pub fn open_or_create(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::Store(format!("create {}: {}", parent.display(), e)))?;
        }
    }
    let conn = Connection::open(path)?;
    run_migrations(&conn)?;
    Ok(conn)
}

pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// Load raw record JSON for a user
pub fn load_record_raw(conn: &Connection, user_key: &str) -> Result<Option<String>> {
    let mut stmt = conn.prepare("SELECT record_json FROM user_records WHERE user_key = ?1 LIMIT 1")?;
    let row = stmt
        .query_row(params![user_key], |r| r.get::<_, String>(0))
        .optional()?;
    Ok(row)
}

/// Upsert raw record JSON for a user
pub fn save_record_raw(conn: &Connection, user_key: &str, json_blob: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO user_records (user_key, record_json, updated_at) VALUES (?1, ?2, strftime('%s','now')) ON CONFLICT(user_key) DO UPDATE SET record_json = excluded.record_json, updated_at = strftime('%s','now')",
        params![user_key, json_blob],
    )?;
    Ok(())
}

/// List every stored user key, oldest update first.
pub fn list_user_keys(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT user_key FROM user_records ORDER BY updated_at ASC, user_key ASC")?;
    let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
    let mut v = Vec::new();
    for r in rows {
        v.push(r?);
    }
    Ok(v)
}

/// SQLite-backed store; one JSON record per user key.
/// Each call opens its own connection on a blocking thread.
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        open_or_create(&db_path)?;
        Ok(Self { db_path })
    }

    pub async fn user_keys(&self) -> Result<Vec<String>> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
            let conn = Connection::open(db_path)?;
            list_user_keys(&conn)
        })
        .await?
    }
}

#[async_trait]
impl CredentialStore for SqliteStore {
    async fn load(&self, user_key: &str) -> Result<UserRecord> {
        let db_path = self.db_path.clone();
        let key = user_key.to_string();
        let json_opt = tokio::task::spawn_blocking(move || -> Result<Option<String>> {
            let conn = Connection::open(db_path)?;
            load_record_raw(&conn, &key)
        })
        .await??;

        match json_opt {
            Some(s) => Ok(serde_json::from_str(&s)?),
            None => Ok(UserRecord::default()),
        }
    }

    async fn save(&self, user_key: &str, record: &UserRecord) -> Result<()> {
        let db_path = self.db_path.clone();
        let key = user_key.to_string();
        let s = serde_json::to_string(record)?;
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = Connection::open(db_path)?;
            save_record_raw(&conn, &key, &s)
        })
        .await??;
        Ok(())
    }
}
