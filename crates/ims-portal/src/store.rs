//! Durable session store backed by a small SQLite key/value table.
//!
//! ## Keys
//!
//! | key              | value (JSON)                       |
//! |------------------|------------------------------------|
//! | `session`        | [`HttpSessionSnapshot`]            |
//! | `profile_url`    | string                             |
//! | `activities_url` | string                             |
//! | `urls`           | [`LinkTable`] (object)             |
//! | `updated_at`     | RFC 3339 timestamp, display only   |
//!
//! Every call opens the database, does its work, and drops the connection.
//! Reads never fail: a missing file, a file that is not a database, or a
//! value that no longer deserializes is treated as unset.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use serde::de::DeserializeOwned;

use crate::error::{PortalError, PortalResult};
use crate::links::LinkTable;
use crate::session::{HttpSessionSnapshot, SessionState, SessionUpdate};

const KEY_SESSION: &str = "session";
const KEY_PROFILE_URL: &str = "profile_url";
const KEY_ACTIVITIES_URL: &str = "activities_url";
const KEY_URLS: &str = "urls";
const KEY_UPDATED_AT: &str = "updated_at";

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS session_kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);";

const UPSERT: &str = "INSERT INTO session_kv (key, value) VALUES (?1, ?2)
    ON CONFLICT(key) DO UPDATE SET value = excluded.value";

/// Session persistence at a fixed path.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the resolved default location (see [`crate::config::resolve_store_path`]).
    pub fn open_default() -> Self {
        Self::new(crate::config::resolve_store_path(None))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted state, falling back to an empty default.
    pub fn load(&self) -> SessionState {
        match self.try_load() {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(
                    "Session store {} unreadable, starting fresh: {e}",
                    self.path.display()
                );
                SessionState::default()
            }
        }
    }

    fn try_load(&self) -> PortalResult<SessionState> {
        if !self.path.exists() {
            tracing::debug!("No session store at {}", self.path.display());
            return Ok(SessionState::default());
        }

        let db = Connection::open_with_flags(&self.path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(SessionState {
            http: read_value::<HttpSessionSnapshot>(&db, KEY_SESSION)?.unwrap_or_default(),
            profile_url: read_value::<String>(&db, KEY_PROFILE_URL)?.unwrap_or_default(),
            activities_url: read_value::<String>(&db, KEY_ACTIVITIES_URL)?.unwrap_or_default(),
            link_table: read_value::<LinkTable>(&db, KEY_URLS)?.unwrap_or_default(),
        })
    }

    /// Persist only the fields set in `update`; everything else keeps its
    /// stored value.
    pub fn save(&self, update: &SessionUpdate) -> PortalResult<()> {
        if update.is_empty() {
            return Ok(());
        }

        let mut entries: Vec<(&str, String)> = Vec::new();
        if let Some(http) = &update.http {
            entries.push((KEY_SESSION, to_json(http)?));
        }
        if let Some(url) = &update.profile_url {
            entries.push((KEY_PROFILE_URL, to_json(url)?));
        }
        if let Some(url) = &update.activities_url {
            entries.push((KEY_ACTIVITIES_URL, to_json(url)?));
        }
        if let Some(table) = &update.link_table {
            entries.push((KEY_URLS, to_json(table)?));
        }
        entries.push((KEY_UPDATED_AT, to_json(&Utc::now())?));

        let mut db = self.open_writable()?;
        let tx = db.transaction()?;
        for (key, value) in &entries {
            tx.execute(UPSERT, rusqlite::params![key, value])?;
        }
        tx.commit()?;

        tracing::debug!(
            "Saved {} session keys to {}",
            entries.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Delete every persisted key.
    ///
    /// An unreadable file is removed outright.
    pub fn clear(&self) -> PortalResult<()> {
        if !self.path.exists() {
            return Ok(());
        }
        match self.open_checked() {
            Ok(db) => {
                db.execute("DELETE FROM session_kv", [])?;
            }
            Err(e) => {
                tracing::warn!(
                    "Session store {} unreadable, removing it: {e}",
                    self.path.display()
                );
                self.remove_file()?;
            }
        }
        tracing::info!("Cleared session store {}", self.path.display());
        Ok(())
    }

    /// When the store was last written, if known.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        if !self.path.exists() {
            return None;
        }
        let db = Connection::open_with_flags(&self.path, OpenFlags::SQLITE_OPEN_READ_ONLY).ok()?;
        read_value::<DateTime<Utc>>(&db, KEY_UPDATED_AT).ok().flatten()
    }

    /// Open for writing, replacing a file that is not a usable store.
    ///
    /// A corrupt file or a foreign `session_kv` schema is moved aside to
    /// `<path>.corrupt` and a fresh store is created in its place.
    fn open_writable(&self) -> PortalResult<Connection> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    PortalError::StorageUnavailable(format!(
                        "failed to create directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }

        match self.open_checked() {
            Ok(db) => Ok(db),
            Err(e) if self.path.exists() => {
                let aside = self.corrupt_path();
                tracing::warn!(
                    "Session store {} unusable ({e}), moving it to {} and starting fresh",
                    self.path.display(),
                    aside.display()
                );
                if std::fs::rename(&self.path, &aside).is_err() {
                    self.remove_file()?;
                }
                self.open_checked()
            }
            Err(e) => Err(e),
        }
    }

    /// Open, create the table, and confirm the upsert compiles against it.
    fn open_checked(&self) -> PortalResult<Connection> {
        let db = Connection::open(&self.path).map_err(|e| {
            PortalError::StorageUnavailable(format!(
                "failed to open {}: {e}",
                self.path.display()
            ))
        })?;
        db.execute_batch(SCHEMA)?;
        db.prepare(UPSERT)?;
        Ok(db)
    }

    fn corrupt_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".corrupt");
        PathBuf::from(name)
    }

    fn remove_file(&self) -> PortalResult<()> {
        std::fs::remove_file(&self.path).map_err(|e| {
            PortalError::StorageUnavailable(format!(
                "failed to remove {}: {e}",
                self.path.display()
            ))
        })
    }
}

/// Read one key. A missing table or key is `None`; a value that fails to
/// deserialize is logged and also `None`.
fn read_value<T: DeserializeOwned>(db: &Connection, key: &str) -> PortalResult<Option<T>> {
    let raw: Option<String> = match db
        .query_row(
            "SELECT value FROM session_kv WHERE key = ?1",
            rusqlite::params![key],
            |row| row.get(0),
        )
        .optional()
    {
        Ok(raw) => raw,
        Err(rusqlite::Error::SqliteFailure(_, Some(msg))) if msg.contains("no such table") => {
            return Ok(None)
        }
        Err(e) => return Err(e.into()),
    };

    let Some(raw) = raw else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            tracing::warn!("Ignoring unreadable session key '{key}': {e}");
            Ok(None)
        }
    }
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> PortalResult<String> {
    serde_json::to_string(value)
        .map_err(|e| PortalError::StorageUnavailable(format!("failed to encode value: {e}")))
}
