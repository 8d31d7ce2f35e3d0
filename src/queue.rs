//! Durable import queue, backed by SQLite via `rusqlite`.
//!
//! Claims are priority-weighted FIFO: `High` items claim before `Normal`
//! before `Low`, and within a priority bucket the oldest `created_at` wins.
//! Writers retry on lock contention with exponential backoff plus jitter,
//! since SQLite serializes writers at the file level.

use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::ImportError;
use crate::model::{Priority, QueueItem, QueueStatus};

const MAX_CONTENTION_ATTEMPTS: usize = 3;
const BACKOFF_FLOOR: Duration = Duration::from_millis(50);
const BACKOFF_CEILING: Duration = Duration::from_secs(5);

/// Aggregate counts across the queue, broken down by status.
#[derive(Clone, Copy, Debug, Default)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub retrying: u64,
    pub fallback: u64,
}

/// Durable queue operations the Import Orchestrator depends on.
///
/// Implementations must make `claim_next` atomic with respect to concurrent
/// callers: two callers racing for the same item must never both receive it.
pub trait QueueStore: Send + Sync {
    /// Enqueues a new import, returning its assigned id.
    fn enqueue(
        &self,
        nzb_path: &str,
        base_path: Option<&str>,
        category: Option<&str>,
        priority: Priority,
    ) -> Result<String, ImportError>;

    /// Atomically claims the next pending item, transitioning it to `Processing`.
    fn claim_next(&self) -> Result<Option<QueueItem>, ImportError>;

    fn set_status(&self, id: &str, status: QueueStatus, error_message: Option<&str>) -> Result<(), ImportError>;

    fn set_storage_path(&self, id: &str, storage_path: &str) -> Result<(), ImportError>;

    fn set_nzb_path(&self, id: &str, nzb_path: &str) -> Result<(), ImportError>;

    fn stats(&self) -> Result<QueueStats, ImportError>;

    /// Returns items stuck in `Processing` past a staleness threshold back to
    /// `Pending`, incrementing their retry count. Used on orchestrator
    /// startup to recover from a crash mid-import.
    fn reset_stale(&self, older_than: Duration) -> Result<u64, ImportError>;

    fn is_in_queue(&self, nzb_path: &str) -> Result<bool, ImportError>;

    fn get_item(&self, id: &str) -> Result<Option<QueueItem>, ImportError>;
}

/// Reference `QueueStore` implementation over an embedded SQLite database.
pub struct SqliteQueueStore {
    conn: std::sync::Mutex<Connection>,
}

impl SqliteQueueStore {
    /// Opens (creating if absent) the queue database at `path` and ensures
    /// its schema exists.
    pub fn open(path: &str) -> Result<Self, ImportError> {
        let conn = Connection::open(path).map_err(|e| ImportError::Store(e.to_string()))?;
        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS queue_items (
                id TEXT PRIMARY KEY,
                nzb_path TEXT NOT NULL,
                base_path TEXT,
                category TEXT,
                priority TEXT NOT NULL,
                status TEXT NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL DEFAULT 3,
                file_size INTEGER,
                created_at TEXT NOT NULL,
                error_message TEXT,
                fallback_external_id TEXT,
                storage_path TEXT,
                extracted_files_hint TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_queue_status ON queue_items(status);
            ",
        )
        .map_err(|e| ImportError::Store(e.to_string()))?;
        Ok(Self {
            conn: std::sync::Mutex::new(conn),
        })
    }

    /// Opens an in-memory database, for tests.
    pub fn open_in_memory() -> Result<Self, ImportError> {
        Self::open(":memory:")
    }

    /// Runs `f` against the connection, retrying on SQLite lock contention
    /// with exponential backoff and jitter, up to [`MAX_CONTENTION_ATTEMPTS`].
    fn with_retry<T>(&self, mut f: impl FnMut(&Connection) -> rusqlite::Result<T>) -> Result<T, ImportError> {
        let mut backoff = BACKOFF_FLOOR;
        for attempt in 0..MAX_CONTENTION_ATTEMPTS {
            let conn = self.conn.lock().expect("queue connection mutex poisoned");
            match f(&conn) {
                Ok(value) => return Ok(value),
                Err(e) if attempt + 1 < MAX_CONTENTION_ATTEMPTS && is_contention(&e) => {
                    drop(conn);
                    let jitter = rand::rng().random_range(0..backoff.as_millis() as u64 / 2 + 1);
                    std::thread::sleep(backoff + Duration::from_millis(jitter));
                    backoff = (backoff * 2).min(BACKOFF_CEILING);
                }
                Err(e) => return Err(ImportError::Store(e.to_string())),
            }
        }
        unreachable!("loop always returns on its final attempt")
    }
}

fn is_contention(e: &rusqlite::Error) -> bool {
    let msg = e.to_string().to_lowercase();
    msg.contains("locked") || msg.contains("busy")
}

fn row_to_item(row: &rusqlite::Row) -> rusqlite::Result<QueueItem> {
    let priority_s: String = row.get("priority")?;
    let status_s: String = row.get("status")?;
    let created_at_s: String = row.get("created_at")?;

    Ok(QueueItem {
        id: row.get("id")?,
        nzb_path: row.get("nzb_path")?,
        base_path: row.get("base_path")?,
        category: row.get("category")?,
        priority: priority_s.parse().unwrap_or_default(),
        status: status_s.parse().unwrap_or(QueueStatus::Failed),
        retry_count: row.get::<_, i64>("retry_count")? as u32,
        max_retries: row.get::<_, i64>("max_retries")? as u32,
        file_size: row.get::<_, Option<i64>>("file_size")?.map(|v| v as u64),
        created_at: created_at_s.parse().unwrap_or_else(|_| Utc::now()),
        error_message: row.get("error_message")?,
        fallback_external_id: row.get("fallback_external_id")?,
        storage_path: row.get("storage_path")?,
        extracted_files_hint: row.get("extracted_files_hint")?,
    })
}

impl QueueStore for SqliteQueueStore {
    fn enqueue(
        &self,
        nzb_path: &str,
        base_path: Option<&str>,
        category: Option<&str>,
        priority: Priority,
    ) -> Result<String, ImportError> {
        let id = uuid::Uuid::new_v4().to_string();
        let created_at = Utc::now().to_rfc3339();
        self.with_retry(|conn| {
            conn.execute(
                "INSERT INTO queue_items (id, nzb_path, base_path, category, priority, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![id, nzb_path, base_path, category, priority.to_string(), QueueStatus::Pending.to_string(), created_at],
            )
        })?;
        Ok(id)
    }

    fn claim_next(&self) -> Result<Option<QueueItem>, ImportError> {
        self.with_retry(|conn| {
            let tx = conn.unchecked_transaction()?;
            let next_id: Option<String> = tx
                .query_row(
                    "SELECT id FROM queue_items WHERE status = 'pending'
                     ORDER BY CASE priority WHEN 'high' THEN 0 WHEN 'normal' THEN 1 ELSE 2 END, created_at ASC
                     LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(id) = next_id else {
                return Ok(None);
            };

            tx.execute(
                "UPDATE queue_items SET status = 'processing' WHERE id = ?1",
                params![id],
            )?;

            let item = tx.query_row("SELECT * FROM queue_items WHERE id = ?1", params![id], row_to_item)?;
            tx.commit()?;
            Ok(Some(item))
        })
    }

    fn set_status(&self, id: &str, status: QueueStatus, error_message: Option<&str>) -> Result<(), ImportError> {
        self.with_retry(|conn| {
            conn.execute(
                "UPDATE queue_items SET status = ?1, error_message = ?2 WHERE id = ?3",
                params![status.to_string(), error_message, id],
            )
        })?;
        Ok(())
    }

    fn set_storage_path(&self, id: &str, storage_path: &str) -> Result<(), ImportError> {
        self.with_retry(|conn| {
            conn.execute(
                "UPDATE queue_items SET storage_path = ?1 WHERE id = ?2",
                params![storage_path, id],
            )
        })?;
        Ok(())
    }

    fn set_nzb_path(&self, id: &str, nzb_path: &str) -> Result<(), ImportError> {
        self.with_retry(|conn| {
            conn.execute("UPDATE queue_items SET nzb_path = ?1 WHERE id = ?2", params![nzb_path, id])
        })?;
        Ok(())
    }

    fn stats(&self) -> Result<QueueStats, ImportError> {
        self.with_retry(|conn| {
            let mut stats = QueueStats::default();
            let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM queue_items GROUP BY status")?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let status: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                match status.as_str() {
                    "pending" => stats.pending = count as u64,
                    "processing" => stats.processing = count as u64,
                    "completed" => stats.completed = count as u64,
                    "failed" => stats.failed = count as u64,
                    "retrying" => stats.retrying = count as u64,
                    "fallback" => stats.fallback = count as u64,
                    _ => {}
                }
            }
            Ok(stats)
        })
    }

    fn reset_stale(&self, older_than: Duration) -> Result<u64, ImportError> {
        let cutoff = (Utc::now() - chrono::Duration::seconds(older_than.as_secs() as i64)).to_rfc3339();
        self.with_retry(|conn| {
            let affected = conn.execute(
                "UPDATE queue_items SET status = 'pending', retry_count = retry_count + 1
                 WHERE status = 'processing' AND created_at < ?1",
                params![cutoff],
            )?;
            Ok(affected as u64)
        })
    }

    fn is_in_queue(&self, nzb_path: &str) -> Result<bool, ImportError> {
        self.with_retry(|conn| {
            conn.query_row(
                "SELECT 1 FROM queue_items WHERE nzb_path = ?1 AND status IN ('pending', 'processing') LIMIT 1",
                params![nzb_path],
                |_| Ok(()),
            )
            .optional()
            .map(|found| found.is_some())
        })
    }

    fn get_item(&self, id: &str) -> Result<Option<QueueItem>, ImportError> {
        self.with_retry(|conn| {
            conn.query_row("SELECT * FROM queue_items WHERE id = ?1", params![id], row_to_item)
                .optional()
        })
    }
}
