//! # Stage: Durable Client Store
//!
//! ## Responsibility
//! Small string key/value store that outlives the process. Holds the
//! transcript archive, the pending feedback queue and the
//! show-feedback-on-load flag.
//!
//! ## Guarantees
//! - File writes go through a temp file and a rename, so a crash mid-write
//!   leaves the previous value readable
//! - Non-panicking: every failure is a `ChatError::Storage` or `ChatError::Io`
//!
//! ## NOT Responsible For
//! - Cross-process locking: two clients sharing a data directory can
//!   clobber each other's read-modify-write cycles
//! - Interpreting values (callers own the JSON shapes)

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::ChatError;

/// Transcript archive (JSON array of sessions, most-recent-first).
pub const KEY_CHAT_HISTORY: &str = "chatHistory";
/// Feedback records that have not been acknowledged yet.
pub const KEY_PENDING_FEEDBACK: &str = "pendingFeedback";
/// `"true"` when the previous run asked for a feedback prompt at startup.
pub const KEY_SHOW_FEEDBACK_ON_LOAD: &str = "showFeedbackOnLoad";

/// Abstraction over the durable store.
///
/// Implemented by [`FileStore`], [`MemoryStore`] and, behind the
/// `sqlite-store` feature, `SqliteStore`.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, ChatError>;
    fn set(&self, key: &str, value: &str) -> Result<(), ChatError>;
    fn remove(&self, key: &str) -> Result<(), ChatError>;
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// Process-local store; used by tests and `--ephemeral` runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    fail_writes: Mutex<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `set`/`remove` fail, to simulate a full disk.
    pub fn fail_writes(&self, fail: bool) {
        if let Ok(mut flag) = self.fail_writes.lock() {
            *flag = fail;
        }
    }

    fn check_writable(&self) -> Result<(), ChatError> {
        let failing = self
            .fail_writes
            .lock()
            .map(|f| *f)
            .map_err(|e| ChatError::Storage(e.to_string()))?;
        if failing {
            return Err(ChatError::Storage("quota exceeded".to_string()));
        }
        Ok(())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, ChatError> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| ChatError::Storage(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ChatError> {
        self.check_writable()?;
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| ChatError::Storage(e.to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), ChatError> {
        self.check_writable()?;
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| ChatError::Storage(e.to_string()))?;
        entries.remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FileStore
// ---------------------------------------------------------------------------

/// One `<key>.json` file per key inside a data directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) the data directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, ChatError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, ChatError> {
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ChatError::Storage(format!("invalid key: {key:?}")));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, ChatError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ChatError> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(value.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), ChatError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// SqliteStore
// ---------------------------------------------------------------------------

/// Single-table SQLite backend (`kv(key TEXT PRIMARY KEY, value TEXT)`).
#[cfg(feature = "sqlite-store")]
pub struct SqliteStore {
    conn: Mutex<rusqlite::Connection>,
}

#[cfg(feature = "sqlite-store")]
impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ChatError> {
        let conn = rusqlite::Connection::open(path).map_err(|e| ChatError::Storage(e.to_string()))?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self, ChatError> {
        let conn = rusqlite::Connection::open_in_memory().map_err(|e| ChatError::Storage(e.to_string()))?;
        Self::init(conn)
    }

    fn init(conn: rusqlite::Connection) -> Result<Self, ChatError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )
        .map_err(|e| ChatError::Storage(e.to_string()))?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

#[cfg(feature = "sqlite-store")]
impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, ChatError> {
        use rusqlite::OptionalExtension;
        let conn = self.conn.lock().map_err(|e| ChatError::Storage(e.to_string()))?;
        conn.query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| row.get::<_, String>(0))
            .optional()
            .map_err(|e| ChatError::Storage(e.to_string()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ChatError> {
        let conn = self.conn.lock().map_err(|e| ChatError::Storage(e.to_string()))?;
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [key, value],
        )
        .map(|_| ())
        .map_err(|e| ChatError::Storage(e.to_string()))
    }

    fn remove(&self, key: &str) -> Result<(), ChatError> {
        let conn = self.conn.lock().map_err(|e| ChatError::Storage(e.to_string()))?;
        conn.execute("DELETE FROM kv WHERE key = ?1", [key])
            .map(|_| ())
            .map_err(|e| ChatError::Storage(e.to_string()))
    }
}
