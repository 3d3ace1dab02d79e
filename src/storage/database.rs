//! Database Layer with Connection Pooling and Safe Transactions
//!
//! SQLite persistence for zone status, the archive of finished requests and
//! task lists:
//! - Connection pooling via r2d2 for concurrent access
//! - Panic-safe transactions with automatic rollback
//! - Version-stamped schema
//! - WAL mode for concurrent readers while workers write

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::types::{
    CleanlinessState, Result, ResultExt, TaskItem, TaskPriority, TaskStatus, TidyError,
    ZoneRunStatus, ZoneStatus,
};

/// Shared database handle for async contexts.
pub type SharedDatabase = Arc<Database>;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS zone_status (
    zone TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    score INTEGER,
    state TEXT NOT NULL,
    last_run TEXT,
    last_provider TEXT,
    last_error TEXT,
    last_request TEXT,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS analysis_runs (
    request_id TEXT PRIMARY KEY,
    zone TEXT NOT NULL,
    priority TEXT NOT NULL,
    state TEXT NOT NULL,
    attempt INTEGER NOT NULL,
    retry_of TEXT,
    provider TEXT,
    cache_hit INTEGER NOT NULL DEFAULT 0,
    fallback INTEGER NOT NULL DEFAULT 0,
    score INTEGER,
    error TEXT,
    attempts_json TEXT NOT NULL DEFAULT '[]',
    enqueued_at TEXT NOT NULL,
    finished_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_runs_zone ON analysis_runs(zone, finished_at);

CREATE TABLE IF NOT EXISTS task_items (
    id TEXT PRIMARY KEY,
    list TEXT NOT NULL,
    description TEXT NOT NULL,
    status TEXT NOT NULL,
    priority TEXT NOT NULL,
    created_at TEXT NOT NULL,
    completed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_task_items_list ON task_items(list, status);
"#;

/// Stamped into `user_version`. Every statement in `SCHEMA` is idempotent,
/// so any older file is brought up to date by re-running it.
const SCHEMA_VERSION: u32 = 1;

/// One archived terminal request
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub request_id: String,
    pub zone: String,
    pub priority: String,
    pub state: String,
    pub attempt: u32,
    pub retry_of: Option<String>,
    pub provider: Option<String>,
    pub cache_hit: bool,
    pub fallback: bool,
    pub score: Option<u8>,
    pub error: Option<String>,
    pub attempts_json: String,
    pub enqueued_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Connection pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_size: u32,
    pub min_idle: u32,
    /// Timeout for acquiring a connection (seconds)
    pub connection_timeout_secs: u64,
}

impl PoolConfig {
    const MIN_POOL_SIZE: u32 = 2;
    const MAX_POOL_SIZE: u32 = 16;

    /// One connection per core, bounded
    pub fn auto() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|p| p.get() as u32)
            .unwrap_or(4);
        let max_size = cores.clamp(Self::MIN_POOL_SIZE, Self::MAX_POOL_SIZE);
        Self {
            max_size,
            min_idle: 1,
            connection_timeout_secs: 30,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::auto()
    }
}

/// Thread-safe database with connection pooling.
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Open (and create) the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, PoolConfig::default())
    }

    pub fn open_with_config<P: AsRef<Path>>(path: P, config: PoolConfig) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let manager =
            SqliteConnectionManager::file(path.as_ref()).with_init(Self::configure_connection);

        let pool = Pool::builder()
            .max_size(config.max_size)
            .min_idle(Some(config.min_idle))
            .connection_timeout(std::time::Duration::from_secs(
                config.connection_timeout_secs,
            ))
            .build(manager)
            .map_err(|e| TidyError::Storage(format!("Failed to create connection pool: {}", e)))?;

        Ok(Self { pool })
    }

    /// Open an in-memory database for testing or temporary use.
    pub fn open_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory();

        // A single connection keeps the in-memory database alive
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| TidyError::Storage(format!("Failed to create in-memory pool: {}", e)))?;

        Ok(Self { pool })
    }

    fn configure_connection(conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA wal_autocheckpoint = 1000;
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| {
            TidyError::Storage(format!("Failed to acquire database connection: {}", e))
        })
    }

    /// Initialize database schema.
    pub fn initialize(&self) -> Result<()> {
        let conn = self.conn()?;
        let version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .with_context("Failed to read schema version")?;
        if version > SCHEMA_VERSION {
            return Err(TidyError::Storage(format!(
                "database schema version {} is newer than supported version {}",
                version, SCHEMA_VERSION
            )));
        }

        conn.execute_batch(SCHEMA)
            .with_context("Failed to initialize database schema")?;

        if version < SCHEMA_VERSION {
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)
                .with_context("Failed to set schema version")?;
            tracing::info!(from = version, to = SCHEMA_VERSION, "Database schema stamped");
        }
        Ok(())
    }

    /// Get a raw connection for advanced operations.
    pub fn connection(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.conn()
    }

    /// Execute a function within a panic-safe database transaction.
    ///
    /// If the closure panics, the transaction is rolled back and an error is
    /// returned instead of poisoning the connection pool.
    pub fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .with_context("Failed to start transaction")?;

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(&tx)));

        match result {
            Ok(Ok(value)) => {
                tx.commit().with_context("Failed to commit transaction")?;
                Ok(value)
            }
            Ok(Err(e)) => Err(e),
            Err(panic_payload) => {
                let panic_msg = panic_payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic_payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "Unknown panic".to_string());

                tracing::error!("Transaction panicked: {}", panic_msg);
                Err(TidyError::Storage(format!(
                    "Transaction panicked: {}",
                    panic_msg
                )))
            }
        }
    }

    // =========================================================================
    // Zone Status
    // =========================================================================

    pub fn upsert_zone_status(&self, status: &ZoneStatus) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO zone_status
                 (zone, status, score, state, last_run, last_provider, last_error, last_request, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(zone) DO UPDATE SET
                    status = excluded.status,
                    score = excluded.score,
                    state = excluded.state,
                    last_run = excluded.last_run,
                    last_provider = excluded.last_provider,
                    last_error = excluded.last_error,
                    last_request = excluded.last_request,
                    updated_at = excluded.updated_at",
                params![
                    status.zone,
                    status.status.as_str(),
                    status.score.map(i64::from),
                    status.state.as_str(),
                    status.last_run.map(|t| t.to_rfc3339()),
                    status.last_provider,
                    status.last_error,
                    status.last_request.as_ref().map(|id| id.to_string()),
                    Utc::now().to_rfc3339(),
                ],
            )
            .with_context("Failed to store zone status")?;
        Ok(())
    }

    pub fn load_zone_statuses(&self) -> Result<Vec<ZoneStatus>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT zone, status, score, state, last_run, last_provider, last_error, last_request
             FROM zone_status ORDER BY zone",
        )?;
        let rows = stmt.query_map([], |row| {
            let score: Option<i64> = row.get(2)?;
            let state: String = row.get(3)?;
            let last_run: Option<String> = row.get(4)?;
            let last_request: Option<String> = row.get(7)?;
            Ok(ZoneStatus {
                zone: row.get(0)?,
                status: ZoneRunStatus::parse(&row.get::<_, String>(1)?),
                score: score.and_then(|s| u8::try_from(s).ok()),
                state: CleanlinessState::parse(&state).unwrap_or_default(),
                last_run: last_run.as_deref().and_then(parse_timestamp),
                last_provider: row.get(5)?,
                last_error: row.get(6)?,
                last_request: last_request.map(Into::into),
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    // =========================================================================
    // Run Archive
    // =========================================================================

    pub fn archive_run(&self, run: &RunRecord) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO analysis_runs
                 (request_id, zone, priority, state, attempt, retry_of, provider, cache_hit,
                  fallback, score, error, attempts_json, enqueued_at, finished_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    run.request_id,
                    run.zone,
                    run.priority,
                    run.state,
                    run.attempt,
                    run.retry_of,
                    run.provider,
                    run.cache_hit,
                    run.fallback,
                    run.score.map(i64::from),
                    run.error,
                    run.attempts_json,
                    run.enqueued_at.to_rfc3339(),
                    run.finished_at.to_rfc3339(),
                ],
            )
            .with_context("Failed to archive analysis run")?;
        Ok(())
    }

    /// Most recent runs first, optionally filtered by zone
    pub fn recent_runs(&self, zone: Option<&str>, limit: usize) -> Result<Vec<RunRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT request_id, zone, priority, state, attempt, retry_of, provider, cache_hit,
                    fallback, score, error, attempts_json, enqueued_at, finished_at
             FROM analysis_runs
             WHERE ?1 IS NULL OR zone = ?1
             ORDER BY finished_at DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![zone, limit as i64], Self::row_to_run)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    fn row_to_run(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
        let score: Option<i64> = row.get(9)?;
        let enqueued_at: String = row.get(12)?;
        let finished_at: String = row.get(13)?;
        Ok(RunRecord {
            request_id: row.get(0)?,
            zone: row.get(1)?,
            priority: row.get(2)?,
            state: row.get(3)?,
            attempt: row.get(4)?,
            retry_of: row.get(5)?,
            provider: row.get(6)?,
            cache_hit: row.get(7)?,
            fallback: row.get(8)?,
            score: score.and_then(|s| u8::try_from(s).ok()),
            error: row.get(10)?,
            attempts_json: row.get(11)?,
            enqueued_at: parse_timestamp(&enqueued_at).unwrap_or_default(),
            finished_at: parse_timestamp(&finished_at).unwrap_or_default(),
        })
    }

    // =========================================================================
    // Task Items
    // =========================================================================

    pub fn list_task_items(&self, list: &str) -> Result<Vec<TaskItem>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, description, status, priority, created_at
             FROM task_items WHERE list = ?1 ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map([list], |row| {
            let status: String = row.get(2)?;
            let priority: String = row.get(3)?;
            let created_at: String = row.get(4)?;
            Ok(TaskItem {
                id: row.get(0)?,
                description: row.get(1)?,
                status: TaskStatus::parse(&status).unwrap_or(TaskStatus::NeedsAction),
                priority: TaskPriority::parse_lenient(&priority),
                created_at: parse_timestamp(&created_at).unwrap_or_default(),
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn insert_task_item(&self, list: &str, item: &TaskItem) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO task_items (id, list, description, status, priority, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    item.id,
                    list,
                    item.description,
                    item.status.as_str(),
                    item.priority.as_str(),
                    item.created_at.to_rfc3339(),
                ],
            )
            .with_context("Failed to insert task item")?;
        Ok(())
    }

    /// Returns false when the item does not exist in the list
    pub fn complete_task_item(&self, list: &str, item_id: &str) -> Result<bool> {
        self.transaction(|conn| {
            let exists = conn
                .query_row(
                    "SELECT status FROM task_items WHERE list = ?1 AND id = ?2",
                    params![list, item_id],
                    |row| row.get::<_, String>(0),
                )
                .optional()?;
            if exists.is_none() {
                return Ok(false);
            }
            conn.execute(
                "UPDATE task_items SET status = ?1, completed_at = COALESCE(completed_at, ?2)
                 WHERE list = ?3 AND id = ?4",
                params![
                    TaskStatus::Completed.as_str(),
                    Utc::now().to_rfc3339(),
                    list,
                    item_id
                ],
            )
            .with_context("Failed to complete task item")?;
            Ok(true)
        })
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RequestId;
    use tempfile::TempDir;

    fn db() -> Database {
        let db = Database::open_in_memory().expect("Failed to open in-memory database");
        db.initialize().expect("Failed to initialize schema");
        db
    }

    #[test]
    fn test_open_in_memory() {
        let db = db();
        let conn = db.connection().expect("Failed to get connection");
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert!(tables.contains(&"zone_status".to_string()));
        assert!(tables.contains(&"analysis_runs".to_string()));
        assert!(tables.contains(&"task_items".to_string()));
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("tidyzone.db");
        let db = Database::open(&path).unwrap();
        db.initialize().unwrap();
        db.initialize().unwrap();

        let version: u32 = db
            .connection()
            .unwrap()
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_initialize_adopts_unversioned_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tidyzone.db");
        {
            let db = Database::open(&path).unwrap();
            db.connection().unwrap().execute_batch(SCHEMA).unwrap();
        }

        let db = Database::open(&path).unwrap();
        db.initialize().unwrap();
        let version: u32 = db
            .connection()
            .unwrap()
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
        assert!(db.load_zone_statuses().unwrap().is_empty());
    }

    #[test]
    fn test_initialize_rejects_newer_schema() {
        let db = Database::open_in_memory().unwrap();
        db.connection()
            .unwrap()
            .pragma_update(None, "user_version", SCHEMA_VERSION + 1)
            .unwrap();

        let err = db.initialize().unwrap_err();
        assert!(err.to_string().contains("newer"));
    }

    #[test]
    fn test_transaction_panic_safety() {
        let db = db();

        let result = db.transaction(|_conn| {
            panic!("Intentional panic for testing");
            #[allow(unreachable_code)]
            Ok(())
        });

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("panicked"));
        assert!(db.connection().is_ok());
    }

    #[test]
    fn test_zone_status_roundtrip() {
        let db = db();
        let mut status = ZoneStatus::new("kitchen");
        status.status = ZoneRunStatus::Completed;
        status.score = Some(72);
        status.state = CleanlinessState::Acceptable;
        status.last_run = Some(Utc::now());
        status.last_provider = Some("openai".into());
        status.last_request = Some(RequestId::new("req-1"));
        db.upsert_zone_status(&status).unwrap();

        status.score = Some(90);
        db.upsert_zone_status(&status).unwrap();

        let loaded = db.load_zone_statuses().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].score, Some(90));
        assert_eq!(loaded[0].status, ZoneRunStatus::Completed);
        assert_eq!(loaded[0].state, CleanlinessState::Acceptable);
        assert_eq!(loaded[0].last_request, Some(RequestId::new("req-1")));
    }

    #[test]
    fn test_recent_runs_filter_and_order() {
        let db = db();
        let base = Utc::now();
        for (i, zone) in ["kitchen", "office", "kitchen"].iter().enumerate() {
            db.archive_run(&RunRecord {
                request_id: format!("r{}", i),
                zone: zone.to_string(),
                priority: "manual".into(),
                state: "completed".into(),
                attempt: 0,
                retry_of: None,
                provider: Some("openai".into()),
                cache_hit: false,
                fallback: false,
                score: Some(80),
                error: None,
                attempts_json: "[]".into(),
                enqueued_at: base,
                finished_at: base + chrono::Duration::seconds(i as i64),
            })
            .unwrap();
        }

        let kitchen = db.recent_runs(Some("kitchen"), 10).unwrap();
        assert_eq!(kitchen.len(), 2);
        assert_eq!(kitchen[0].request_id, "r2");

        let all = db.recent_runs(None, 2).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_task_item_lifecycle() {
        let db = db();
        let item = TaskItem {
            id: "t1".into(),
            description: "Wipe the counter".into(),
            status: TaskStatus::NeedsAction,
            priority: TaskPriority::High,
            created_at: Utc::now(),
        };
        db.insert_task_item("kitchen", &item).unwrap();

        assert!(db.complete_task_item("kitchen", "t1").unwrap());
        assert!(db.complete_task_item("kitchen", "t1").unwrap());
        assert!(!db.complete_task_item("kitchen", "missing").unwrap());
        assert!(!db.complete_task_item("office", "t1").unwrap());

        let items = db.list_task_items("kitchen").unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].status, TaskStatus::Completed);
        assert_eq!(items[0].priority, TaskPriority::High);
    }
}
