//! External store facade (spec §6 "External store (database)"). The
//! narrow interface the spec names is backed by `sqlx`'s SQLite driver
//! the way the teacher's `call-engine::database::DatabaseManager` uses
//! it — an async connection pool, plain string queries with `.bind()`
//! rather than compile-time-checked macros (those require a live
//! database at build time, which this facade's callers do not assume).
//!
//! The engine's own concurrency model is synchronous `std::thread`
//! (spec §5), so this facade owns a dedicated single-threaded
//! `tokio::runtime::Runtime` purely to drive `sqlx`'s async API and
//! exposes a blocking method surface to its plain-thread callers.

use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::line::LineConfig;

pub struct Store {
    pool: SqlitePool,
    runtime: Runtime,
}

impl Store {
    /// Opens (creating if absent) the SQLite database at `path` and runs
    /// the engine's schema against it.
    pub fn open(path: &str) -> Result<Self> {
        let runtime: Runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(EngineError::RuntimeInit)?;
        let url = format!("sqlite://{path}?mode=rwc");
        let pool = runtime.block_on(async {
            let pool = SqlitePoolOptions::new().max_connections(1).connect(&url).await?;
            init_schema(&pool).await?;
            Ok::<_, sqlx::Error>(pool)
        })?;
        info!(path, "external store opened");
        Ok(Store { pool, runtime })
    }

    pub fn get_all_sip_lines(&self) -> Result<Vec<LineConfig>> {
        self.runtime.block_on(async {
            let rows = sqlx::query(
                "SELECT line_id, username, password, server_host, server_port, display_name, enabled, status
                 FROM sip_lines ORDER BY line_id ASC",
            )
            .fetch_all(&self.pool)
            .await?;
            Ok(rows
                .into_iter()
                .map(|row| LineConfig {
                    line_id: row.get::<i64, _>("line_id") as u32,
                    username: row.get("username"),
                    password: row.get("password"),
                    server_host: row.get("server_host"),
                    server_port: row.get::<i64, _>("server_port") as u16,
                    display_name: row.get("display_name"),
                    enabled: row.get::<i64, _>("enabled") != 0,
                    status: row.get("status"),
                })
                .collect())
        })
    }

    /// Spec §8 Invariant 6: callers must deduplicate before calling this
    /// — this method itself always writes.
    pub fn update_sip_line_status(&self, line_id: u32, status: &str) -> Result<()> {
        let now = Utc::now();
        self.runtime.block_on(async {
            sqlx::query("UPDATE sip_lines SET status = ?, updated_at = ? WHERE line_id = ?")
                .bind(status)
                .bind(now)
                .bind(line_id as i64)
                .execute(&self.pool)
                .await?;
            Ok(())
        })?;
        debug!(line_id, status, "line status published");
        Ok(())
    }

    pub fn get_or_create_caller(&self, number: &str) -> Result<i64> {
        self.runtime.block_on(async {
            if let Some(row) = sqlx::query("SELECT caller_id FROM callers WHERE number = ?")
                .bind(number)
                .fetch_optional(&self.pool)
                .await?
            {
                return Ok(row.get::<i64, _>("caller_id"));
            }
            let result = sqlx::query("INSERT INTO callers (number) VALUES (?)")
                .bind(number)
                .execute(&self.pool)
                .await?;
            Ok(result.last_insert_rowid())
        })
    }

    /// Returns the numeric call id assigned to the new call row — this
    /// id names the SHM channels (`/ap_in_<id>`, `/ap_out_<id>`).
    pub fn create_call(&self, call_id: &str, caller_id: i64, line_id: u32, number: &str) -> Result<u64> {
        let now = Utc::now();
        self.runtime.block_on(async {
            let result = sqlx::query(
                "INSERT INTO calls (call_id, caller_id, line_id, number, created_at)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(call_id)
            .bind(caller_id)
            .bind(line_id as i64)
            .bind(number)
            .bind(now)
            .execute(&self.pool)
            .await?;
            Ok(result.last_insert_rowid() as u64)
        })
    }

    pub fn get_call(&self, call_id: &str) -> Result<Option<u64>> {
        self.runtime.block_on(async {
            let row = sqlx::query("SELECT numeric_id FROM calls WHERE call_id = ?")
                .bind(call_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row.map(|r| r.get::<i64, _>("numeric_id") as u64))
        })
    }

    pub fn end_call(&self, call_id: &str) -> Result<()> {
        let now = Utc::now();
        self.runtime.block_on(async {
            sqlx::query("UPDATE calls SET ended_at = ? WHERE call_id = ?")
                .bind(now)
                .bind(call_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
    }
}

async fn init_schema(pool: &SqlitePool) -> sqlx::Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS sip_lines (
            line_id      INTEGER PRIMARY KEY,
            username     TEXT NOT NULL,
            password     TEXT NOT NULL,
            server_host  TEXT NOT NULL,
            server_port  INTEGER NOT NULL,
            display_name TEXT NOT NULL DEFAULT '',
            enabled      INTEGER NOT NULL DEFAULT 1,
            status       TEXT NOT NULL DEFAULT 'disabled',
            updated_at   TEXT
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS callers (
            caller_id INTEGER PRIMARY KEY AUTOINCREMENT,
            number    TEXT NOT NULL UNIQUE
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS calls (
            numeric_id INTEGER PRIMARY KEY AUTOINCREMENT,
            call_id    TEXT NOT NULL UNIQUE,
            caller_id  INTEGER NOT NULL,
            line_id    INTEGER NOT NULL,
            number     TEXT NOT NULL,
            created_at TEXT NOT NULL,
            ended_at   TEXT
        )",
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_test_store() -> (Store, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("whisper.db");
        let store = Store::open(path.to_str().unwrap()).unwrap();
        (store, dir)
    }

    #[test]
    fn empty_store_has_no_lines() {
        let (store, _dir) = open_test_store();
        assert!(store.get_all_sip_lines().unwrap().is_empty());
    }

    #[test]
    fn caller_lookup_is_idempotent() {
        let (store, _dir) = open_test_store();
        let a = store.get_or_create_caller("+15551234567").unwrap();
        let b = store.get_or_create_caller("+15551234567").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn call_lifecycle_create_get_end() {
        let (store, _dir) = open_test_store();
        let caller_id = store.get_or_create_caller("+15550001111").unwrap();
        store.create_call("call-abc-123", caller_id, 1, "+15550001111").unwrap();
        let numeric_id = store.get_call("call-abc-123").unwrap();
        assert!(numeric_id.is_some());
        store.end_call("call-abc-123").unwrap();
    }

    #[test]
    fn status_update_is_readable_back() {
        let (store, _dir) = open_test_store();
        store
            .runtime
            .block_on(async {
                sqlx::query(
                    "INSERT INTO sip_lines (line_id, username, password, server_host, server_port) VALUES (1, 'u', 'p', 'h', 5060)",
                )
                .execute(&store.pool)
                .await
            })
            .unwrap();
        store.update_sip_line_status(1, "connected").unwrap();
        let lines = store.get_all_sip_lines().unwrap();
        assert_eq!(lines[0].status, "connected");
    }
}
