// SQLite-backed device cache (`cache.db`) with versioned migrations.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::store::device_cache::{check_quota, entry_bytes, DeviceCache, DeviceCacheError};

const MIGRATION_V1_SQL: &str = r#"
CREATE TABLE device_cache (
    cache_key   TEXT PRIMARY KEY,
    value       TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
"#;

const MIGRATIONS: &[(i64, &str)] = &[(1, MIGRATION_V1_SQL)];

#[derive(Debug)]
pub struct CacheDb {
    conn: Connection,
    max_bytes: u64,
}

impl CacheDb {
    pub fn open(path: impl AsRef<Path>, max_bytes: u64) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create cache.db parent directory `{}`", parent.display())
            })?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("failed to open cache.db at `{}`", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .context("failed to configure sqlite pragmas for cache.db")?;

        Self::initialize(conn, max_bytes)
    }

    pub fn open_in_memory(max_bytes: u64) -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory cache.db")?;
        Self::initialize(conn, max_bytes)
    }

    fn initialize(mut conn: Connection, max_bytes: u64) -> Result<Self> {
        ensure_migration_table(&conn)?;
        apply_pending_migrations(&mut conn)?;
        Ok(Self { conn, max_bytes })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn schema_version(&self) -> Result<i64> {
        current_schema_version(&self.conn)
    }

    pub fn entry_count(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM device_cache", [], |row| row.get(0))
            .context("failed to count device_cache rows")
    }

    fn stored_bytes(&self) -> Result<u64> {
        let bytes: i64 = self
            .conn
            .query_row(
                "SELECT COALESCE(SUM(LENGTH(CAST(cache_key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0) \
                 FROM device_cache",
                [],
                |row| row.get(0),
            )
            .context("failed to sum device_cache sizes")?;
        Ok(bytes.max(0) as u64)
    }

    fn read(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM device_cache WHERE cache_key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .context("failed to read device_cache row")
    }
}

impl DeviceCache for CacheDb {
    fn get(&self, key: &str) -> Result<Option<String>, DeviceCacheError> {
        self.read(key).map_err(storage_error)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), DeviceCacheError> {
        let used = self.stored_bytes().map_err(storage_error)?;
        let replaced = self
            .read(key)
            .map_err(storage_error)?
            .map(|old| entry_bytes(key, &old))
            .unwrap_or(0);
        check_quota(self.max_bytes, used, replaced, entry_bytes(key, value))?;

        self.conn
            .execute(
                "INSERT INTO device_cache (cache_key, value, updated_at) \
                 VALUES (?1, ?2, datetime('now')) \
                 ON CONFLICT(cache_key) DO UPDATE SET value = excluded.value, \
                 updated_at = excluded.updated_at",
                params![key, value],
            )
            .context("failed to write device_cache row")
            .map_err(storage_error)?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<bool, DeviceCacheError> {
        let changed = self
            .conn
            .execute("DELETE FROM device_cache WHERE cache_key = ?1", params![key])
            .context("failed to delete device_cache row")
            .map_err(storage_error)?;
        Ok(changed > 0)
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, DeviceCacheError> {
        let keys = (|| -> Result<Vec<String>> {
            let mut stmt = self
                .conn
                .prepare(
                    "SELECT cache_key FROM device_cache \
                     WHERE substr(cache_key, 1, length(?1)) = ?1 \
                     ORDER BY cache_key ASC",
                )
                .context("failed to prepare device_cache prefix query")?;
            let rows = stmt
                .query_map(params![prefix], |row| row.get(0))
                .context("failed to query device_cache by prefix")?;
            rows.collect::<std::result::Result<Vec<String>, _>>()
                .context("failed to collect device_cache keys")
        })();
        keys.map_err(storage_error)
    }

    fn used_bytes(&self) -> Result<u64, DeviceCacheError> {
        self.stored_bytes().map_err(storage_error)
    }
}

fn storage_error(error: anyhow::Error) -> DeviceCacheError {
    DeviceCacheError::Storage(format!("{error:#}"))
}

fn ensure_migration_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY,
            applied_at  TEXT NOT NULL
        );
        ",
    )
    .context("failed to ensure schema_migrations table exists")
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| row.get(0))
        .context("failed to read current schema version")
}

fn apply_pending_migrations(conn: &mut Connection) -> Result<()> {
    let mut current_version = current_schema_version(conn)?;

    for (version, sql) in MIGRATIONS {
        if *version <= current_version {
            continue;
        }

        let tx = conn.transaction().context("failed to start migration transaction")?;
        tx.execute_batch(sql)
            .with_context(|| format!("failed to apply cache.db migration v{version}"))?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, datetime('now'))",
            params![version],
        )
        .with_context(|| format!("failed to record migration v{version}"))?;
        tx.commit().with_context(|| format!("failed to commit migration v{version}"))?;
        current_version = *version;
    }

    Ok(())
}
