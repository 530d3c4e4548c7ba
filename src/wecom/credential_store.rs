// access_token 持久化：按 corpid + secret 摘要分键，进程重启后仍可复用未过期的 token。
use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub corp_id: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(corp_id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            corp_id: corp_id.into(),
            secret: secret.into(),
        }
    }

    /// secret 在前、corpid 在后做 md5，与已落盘的 token 文件保持同一键名。
    pub fn credential_key(&self) -> String {
        let mut raw = String::with_capacity(self.secret.len() + self.corp_id.len());
        raw.push_str(&self.secret);
        raw.push_str(&self.corp_id);
        format!("{:x}", md5::compute(raw.as_bytes()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub credential_key: String,
    pub token: String,
    pub expires_at: i64,
}

impl TokenRecord {
    pub fn is_valid_at(&self, now: i64) -> bool {
        now < self.expires_at
    }
}

pub trait CredentialStore: Send + Sync {
    fn load(&self, credential_key: &str) -> Result<Option<TokenRecord>>;
    fn save(&self, record: &TokenRecord) -> Result<()>;
}

pub struct SqliteCredentialStore {
    db_path: PathBuf,
    initialized: AtomicBool,
    init_guard: Mutex<()>,
}

impl SqliteCredentialStore {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        let path: PathBuf = db_path.into();
        let path = if path.as_os_str().is_empty() {
            PathBuf::from("./data/bridge.db")
        } else {
            path
        };
        Self {
            db_path: path,
            initialized: AtomicBool::new(false),
            init_guard: Mutex::new(()),
        }
    }

    fn open(&self) -> Result<Connection> {
        if let Some(parent) = self.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&self.db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        Ok(conn)
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }
        let _guard = self.init_guard.lock();
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }
        let conn = self.open()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS wecom_tokens (
                credential_key TEXT PRIMARY KEY,
                token TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )?;
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn load(&self, credential_key: &str) -> Result<Option<TokenRecord>> {
        self.ensure_initialized()?;
        let conn = self.open()?;
        let record = conn
            .query_row(
                "SELECT credential_key, token, expires_at FROM wecom_tokens WHERE credential_key = ?1",
                params![credential_key],
                |row| {
                    Ok(TokenRecord {
                        credential_key: row.get(0)?,
                        token: row.get(1)?,
                        expires_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn save(&self, record: &TokenRecord) -> Result<()> {
        self.ensure_initialized()?;
        let conn = self.open()?;
        // 单键 upsert，一条语句内完成覆盖，不会留下半写状态。
        conn.execute(
            "INSERT INTO wecom_tokens (credential_key, token, expires_at, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(credential_key) DO UPDATE SET
                token = excluded.token,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at",
            params![
                record.credential_key,
                record.token,
                record.expires_at,
                Utc::now().timestamp()
            ],
        )?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    records: Mutex<HashMap<String, TokenRecord>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: TokenRecord) -> Self {
        let store = Self::default();
        store
            .records
            .lock()
            .insert(record.credential_key.clone(), record);
        store
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self, credential_key: &str) -> Result<Option<TokenRecord>> {
        Ok(self.records.lock().get(credential_key).cloned())
    }

    fn save(&self, record: &TokenRecord) -> Result<()> {
        self.records
            .lock()
            .insert(record.credential_key.clone(), record.clone());
        Ok(())
    }
}
