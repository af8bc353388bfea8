//! SQLite cache backend, so installed buckets survive restarts.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use shellcache_common::{ResultExt, ShellCacheError, Result};

use super::{now_millis, CacheBackend, CachedResponse};

/// Database schema version for migrations
const SCHEMA_VERSION: i32 = 1;

/// Persistent backend over a single SQLite file.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open (or create) the store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .storage_context(format!("failed to open cache store {}", path.display()))?;
        Self::init(conn)
    }

    /// Private in-memory database; used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().storage_context("failed to open in-memory store")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute("PRAGMA foreign_keys = ON", [])
            .storage_context("failed to enable foreign keys")?;

        let table_exists: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
                [],
                |row| row.get::<_, i32>(0).map(|count| count > 0),
            )
            .unwrap_or(false);

        let version: i32 = if table_exists {
            conn.query_row(
                "SELECT version FROM schema_version ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .storage_context("failed to read schema version")?
            .unwrap_or(0)
        } else {
            0
        };

        if version < SCHEMA_VERSION {
            create_schema_v1(&conn)?;
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ShellCacheError::internal("cache store lock poisoned"))
    }
}

/// Create initial schema (version 1)
fn create_schema_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            version INTEGER NOT NULL,
            applied_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS buckets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS entries (
            bucket TEXT NOT NULL REFERENCES buckets(name) ON DELETE CASCADE,
            key TEXT NOT NULL,
            response_url TEXT,
            status INTEGER NOT NULL,
            status_text TEXT NOT NULL,
            headers TEXT NOT NULL,
            body BLOB NOT NULL,
            cached_at INTEGER NOT NULL,
            PRIMARY KEY (bucket, key)
        );
        "#,
    )
    .storage_context("failed to create schema")?;

    conn.execute(
        "INSERT INTO schema_version (version, applied_at) VALUES (?, ?)",
        params![SCHEMA_VERSION, now_millis() as i64],
    )
    .storage_context("failed to record schema version")?;

    Ok(())
}

fn ensure_bucket(conn: &Connection, name: &str) -> Result<()> {
    conn.execute("INSERT OR IGNORE INTO buckets (name) VALUES (?)", [name])
        .storage_context(format!("failed to create bucket {}", name))?;
    Ok(())
}

fn upsert(conn: &Connection, bucket: &str, entry: &CachedResponse) -> Result<()> {
    let headers = serde_json::to_string(&entry.headers).context("failed to encode headers")?;
    conn.execute(
        "INSERT OR REPLACE INTO entries
            (bucket, key, response_url, status, status_text, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            bucket,
            entry.key,
            entry.response_url,
            entry.status,
            entry.status_text,
            headers,
            entry.body,
            entry.cached_at as i64
        ],
    )
    .storage_context(format!("failed to store {}", entry.key))?;
    Ok(())
}

impl CacheBackend for SqliteBackend {
    fn bucket_names(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT name FROM buckets ORDER BY id")
            .storage_context("failed to list buckets")?;
        let names = stmt
            .query_map([], |row| row.get(0))
            .storage_context("failed to list buckets")?
            .collect::<std::result::Result<Vec<String>, _>>()
            .storage_context("failed to read bucket name")?;
        Ok(names)
    }

    fn create_bucket(&mut self, name: &str) -> Result<()> {
        ensure_bucket(&*self.conn()?, name)
    }

    fn delete_bucket(&mut self, name: &str) -> Result<bool> {
        let removed = self
            .conn()?
            .execute("DELETE FROM buckets WHERE name = ?", [name])
            .storage_context(format!("failed to delete bucket {}", name))?;
        Ok(removed > 0)
    }

    fn get(&self, bucket: &str, key: &str) -> Result<Option<CachedResponse>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT key, response_url, status, status_text, headers, body, cached_at
                 FROM entries WHERE bucket = ? AND key = ?",
                params![bucket, key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, u16>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Vec<u8>>(5)?,
                        row.get::<_, i64>(6)?,
                    ))
                },
            )
            .optional()
            .storage_context(format!("failed to read {}", key))?;

        let Some((key, response_url, status, status_text, headers, body, cached_at)) = row else {
            return Ok(None);
        };
        let headers = serde_json::from_str(&headers).context("failed to decode headers")?;

        Ok(Some(CachedResponse {
            key,
            response_url,
            status,
            status_text,
            headers,
            body,
            cached_at: cached_at as u64,
        }))
    }

    fn put(&mut self, bucket: &str, entry: CachedResponse) -> Result<()> {
        let conn = self.conn()?;
        ensure_bucket(&conn, bucket)?;
        upsert(&conn, bucket, &entry)
    }

    fn put_all(&mut self, bucket: &str, entries: Vec<CachedResponse>) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .storage_context("failed to begin transaction")?;
        ensure_bucket(&tx, bucket)?;
        for entry in &entries {
            upsert(&tx, bucket, entry)?;
        }
        tx.commit().storage_context("failed to commit entries")?;
        Ok(())
    }

    fn keys(&self, bucket: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT key FROM entries WHERE bucket = ? ORDER BY key")
            .storage_context("failed to list keys")?;
        let keys = stmt
            .query_map([bucket], |row| row.get(0))
            .storage_context("failed to list keys")?
            .collect::<std::result::Result<Vec<String>, _>>()
            .storage_context("failed to read key")?;
        Ok(keys)
    }
}
