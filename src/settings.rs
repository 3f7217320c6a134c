//! Persisted settings document and its storage backends.
//!
//! The document is deliberately small: the in-progress marker plus one
//! credential record per remote type. Every mutation is read-modify-write
//! against the latest persisted value; the one atomic primitive is
//! `try_set_in_progress`, which is the single-flight gate for run starts.

use crate::error::{BackupError, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

/// The whole persisted settings document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsDocument {
    /// Unix timestamp of the moment a backup started, absent when idle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_progress: Option<i64>,

    /// Credential records keyed by remote type ("sftp", "ftp").
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub remote: HashMap<String, RemoteCredential>,
}

/// Protocol flavor for a remote target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteSubtype {
    #[default]
    Sftp,
    Ftp,
}

impl fmt::Display for RemoteSubtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteSubtype::Sftp => write!(f, "sftp"),
            RemoteSubtype::Ftp => write!(f, "ftp"),
        }
    }
}

impl FromStr for RemoteSubtype {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sftp" => Ok(RemoteSubtype::Sftp),
            "ftp" => Ok(RemoteSubtype::Ftp),
            other => Err(BackupError::Validation(format!(
                "unknown remote subtype: {other}"
            ))),
        }
    }
}

/// Per-remote-type credential record.
///
/// host/user/secret/port/subtype are only ever replaced as a group, and only
/// after a successful validation handshake. retention_count and nickname may
/// be updated independently.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteCredential {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub subtype: RemoteSubtype,
    /// Remote archives to keep; 0 means unlimited.
    #[serde(default)]
    pub retention_count: u32,
    #[serde(default)]
    pub nickname: String,
}

impl RemoteCredential {
    pub fn is_configured(&self) -> bool {
        !self.host.is_empty() && !self.user.is_empty()
    }
}

/// Settings repository. Passed explicitly to every component that needs it.
pub trait SettingsStore: Send + Sync {
    /// Load the latest persisted document.
    fn get(&self) -> Result<SettingsDocument>;

    /// Persist the document as a whole.
    fn save(&self, doc: &SettingsDocument) -> Result<()>;

    /// Atomically set the in-progress marker if and only if it is absent.
    /// Returns false when another run already holds the marker.
    fn try_set_in_progress(&self, started_at: i64) -> Result<bool>;
}

const DOCUMENT_KEY: &str = "settings";

/// SQLite-backed store: one key/value table, the document as a JSON row.
pub struct SqliteSettingsStore {
    conn: Mutex<Connection>,
}

impl SqliteSettingsStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS settings (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("settings store mutex poisoned").into())
    }

    fn read_document(conn: &Connection) -> Result<SettingsDocument> {
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?",
                params![DOCUMENT_KEY],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(SettingsDocument::default()),
        }
    }

    fn write_document(conn: &Connection, doc: &SettingsDocument) -> Result<()> {
        let json = serde_json::to_string(doc)?;
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![DOCUMENT_KEY, json],
        )?;
        Ok(())
    }
}

impl SettingsStore for SqliteSettingsStore {
    fn get(&self) -> Result<SettingsDocument> {
        let conn = self.lock()?;
        Self::read_document(&conn)
    }

    fn save(&self, doc: &SettingsDocument) -> Result<()> {
        let conn = self.lock()?;
        Self::write_document(&conn, doc)
    }

    fn try_set_in_progress(&self, started_at: i64) -> Result<bool> {
        let mut conn = self.lock()?;
        // IMMEDIATE takes the write lock up front, so the check and the
        // write commit as one unit even across processes.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut doc = Self::read_document(&tx)?;
        if doc.in_progress.is_some() {
            return Ok(false);
        }
        doc.in_progress = Some(started_at);
        Self::write_document(&tx, &doc)?;
        tx.commit()?;
        Ok(true)
    }
}

/// In-memory store for tests and dry runs.
#[derive(Default)]
pub struct MemorySettingsStore {
    doc: Mutex<SettingsDocument>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get(&self) -> Result<SettingsDocument> {
        let doc = self
            .doc
            .lock()
            .map_err(|_| anyhow::anyhow!("settings mutex poisoned"))?;
        Ok(doc.clone())
    }

    fn save(&self, doc: &SettingsDocument) -> Result<()> {
        let mut current = self
            .doc
            .lock()
            .map_err(|_| anyhow::anyhow!("settings mutex poisoned"))?;
        *current = doc.clone();
        Ok(())
    }

    fn try_set_in_progress(&self, started_at: i64) -> Result<bool> {
        let mut current = self
            .doc
            .lock()
            .map_err(|_| anyhow::anyhow!("settings mutex poisoned"))?;
        if current.in_progress.is_some() {
            return Ok(false);
        }
        current.in_progress = Some(started_at);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn sqlite_store_roundtrip() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let store = SqliteSettingsStore::open(&dir.path().join("settings.db"))?;

        assert_eq!(store.get()?, SettingsDocument::default());

        let mut doc = SettingsDocument::default();
        doc.remote.insert(
            "sftp".into(),
            RemoteCredential {
                host: "backups.example.com".into(),
                user: "site".into(),
                secret: "hunter2".into(),
                port: 22,
                subtype: RemoteSubtype::Sftp,
                retention_count: 5,
                nickname: "offsite".into(),
            },
        );
        store.save(&doc)?;

        let loaded = store.get()?;
        assert_eq!(loaded, doc);
        Ok(())
    }

    #[test]
    fn try_set_in_progress_is_check_and_set() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let store = SqliteSettingsStore::open(&dir.path().join("settings.db"))?;

        assert!(store.try_set_in_progress(100)?);
        assert!(!store.try_set_in_progress(200)?);
        assert_eq!(store.get()?.in_progress, Some(100));

        let mut doc = store.get()?;
        doc.in_progress = None;
        store.save(&doc)?;
        assert!(store.try_set_in_progress(300)?);
        Ok(())
    }

    #[test]
    fn memory_store_single_flight() -> Result<()> {
        let store = MemorySettingsStore::new();
        assert!(store.try_set_in_progress(1)?);
        assert!(!store.try_set_in_progress(2)?);
        Ok(())
    }

    #[test]
    fn subtype_parses_and_displays() {
        assert_eq!("sftp".parse::<RemoteSubtype>().unwrap(), RemoteSubtype::Sftp);
        assert_eq!("ftp".parse::<RemoteSubtype>().unwrap(), RemoteSubtype::Ftp);
        assert!("ftps".parse::<RemoteSubtype>().is_err());
        assert_eq!(RemoteSubtype::Sftp.to_string(), "sftp");
    }
}
