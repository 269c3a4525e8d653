//! Durable store on SQLite
//!
//! One `command_queue` table mirrors the descriptor layout exactly, with a
//! UNIQUE index on the idempotency key doing the dedup atomically inside the
//! database. Running marks live only in process memory: a row stays in the
//! table from insert until final removal, which is what makes restart
//! recovery implicit: whatever the table holds after a crash is pending.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::debug;

use crate::{
    CommandDescriptor, CommandMessage, DescriptorId, EligibilityFn, InsertOutcome, Priority,
    QueueError, QueueResult, QueueStore,
};

const CREATE_TABLE: &str = "\
CREATE TABLE IF NOT EXISTS command_queue (
    id TEXT PRIMARY KEY,
    queue TEXT NOT NULL,
    type_tag TEXT NOT NULL,
    idempotency_key TEXT NOT NULL UNIQUE,
    priority INTEGER NOT NULL,
    sequence INTEGER NOT NULL,
    parameters TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    attempt_count INTEGER NOT NULL
)";

const CREATE_ORDER_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_command_queue_order ON command_queue (queue, priority, sequence)";

/// SQLite-backed queue store
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    running: Arc<Mutex<HashSet<DescriptorId>>>,
    sequence: Arc<AtomicU64>,
}

impl SqliteStore {
    /// Open (creating if missing) the queue database at `path`
    pub async fn open(path: impl AsRef<Path>) -> QueueResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        sqlx::query(CREATE_ORDER_INDEX).execute(&pool).await?;

        let max_sequence: Option<i64> = sqlx::query_scalar("SELECT MAX(sequence) FROM command_queue")
            .fetch_one(&pool)
            .await?;

        Ok(Self {
            pool,
            running: Arc::new(Mutex::new(HashSet::new())),
            sequence: Arc::new(AtomicU64::new(max_sequence.unwrap_or(0) as u64)),
        })
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn fetch_by_key(&self, idempotency_key: &str) -> QueueResult<Option<CommandDescriptor>> {
        let row = sqlx::query("SELECT * FROM command_queue WHERE idempotency_key = ?")
            .bind(idempotency_key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_descriptor).transpose()
    }
}

fn parse_timestamp(text: &str) -> QueueResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| QueueError::StoreFailure(format!("bad timestamp in store: {}", e)))
}

fn row_to_descriptor(row: &SqliteRow) -> QueueResult<CommandDescriptor> {
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    Ok(CommandDescriptor {
        id: DescriptorId::from_string(row.try_get("id")?),
        queue: row.try_get("queue")?,
        type_tag: row.try_get("type_tag")?,
        idempotency_key: row.try_get("idempotency_key")?,
        priority: Priority(row.try_get::<i64, _>("priority")? as u8),
        sequence: row.try_get::<i64, _>("sequence")? as u64,
        parameters: row.try_get("parameters")?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
        attempt_count: row.try_get::<i64, _>("attempt_count")? as u32,
    })
}

#[async_trait]
impl QueueStore for SqliteStore {
    async fn try_insert(&self, message: CommandMessage) -> QueueResult<InsertOutcome> {
        let id = DescriptorId::new();
        let sequence = self.next_sequence();
        let now = Utc::now();

        let result = sqlx::query(
            "INSERT INTO command_queue \
             (id, queue, type_tag, idempotency_key, priority, sequence, parameters, created_at, updated_at, attempt_count) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0) \
             ON CONFLICT(idempotency_key) DO NOTHING",
        )
        .bind(id.as_str())
        .bind(&message.queue)
        .bind(&message.type_tag)
        .bind(&message.idempotency_key)
        .bind(message.priority.as_u8() as i64)
        .bind(sequence as i64)
        .bind(&message.parameters)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let existing = self.fetch_by_key(&message.idempotency_key).await?.ok_or_else(|| {
                QueueError::StoreFailure(format!(
                    "duplicate key '{}' vanished mid-insert",
                    message.idempotency_key
                ))
            })?;
            debug!(
                idempotency_key = %message.idempotency_key,
                existing_id = %existing.id,
                "Rejected duplicate enqueue"
            );
            return Ok(InsertOutcome::Duplicate(existing));
        }

        debug!(
            id = %id,
            queue = %message.queue,
            type_tag = %message.type_tag,
            priority = %message.priority,
            sequence,
            "Inserted descriptor"
        );
        Ok(InsertOutcome::Inserted(CommandDescriptor {
            id,
            queue: message.queue,
            type_tag: message.type_tag,
            idempotency_key: message.idempotency_key,
            priority: message.priority,
            sequence,
            parameters: message.parameters,
            created_at: now,
            updated_at: now,
            attempt_count: 0,
        }))
    }

    async fn take_next(
        &self,
        queue: &str,
        eligible: Option<&EligibilityFn>,
    ) -> QueueResult<Option<CommandDescriptor>> {
        let rows = sqlx::query(
            "SELECT * FROM command_queue WHERE queue = ? ORDER BY priority ASC, sequence ASC",
        )
        .bind(queue)
        .fetch_all(&self.pool)
        .await?;

        // Marking is serialized on the lock, so even two concurrent takers of
        // one queue cannot pick the same row.
        let mut running = self.running.lock();
        for row in &rows {
            let descriptor = row_to_descriptor(row)?;
            if running.contains(&descriptor.id) {
                continue;
            }
            if let Some(predicate) = eligible {
                if !predicate(&descriptor) {
                    continue;
                }
            }
            running.insert(descriptor.id.clone());
            debug!(
                id = %descriptor.id,
                queue = %descriptor.queue,
                type_tag = %descriptor.type_tag,
                "Took descriptor"
            );
            return Ok(Some(descriptor));
        }
        Ok(None)
    }

    async fn remove(&self, id: &DescriptorId) -> QueueResult<()> {
        let result = sqlx::query("DELETE FROM command_queue WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        self.running.lock().remove(id);
        if result.rows_affected() == 0 {
            return Err(QueueError::DescriptorNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn reinsert(&self, descriptor: CommandDescriptor) -> QueueResult<()> {
        let sequence = self.next_sequence();
        let result = sqlx::query(
            "UPDATE command_queue SET sequence = ?, updated_at = ?, attempt_count = ? WHERE id = ?",
        )
        .bind(sequence as i64)
        .bind(descriptor.updated_at.to_rfc3339())
        .bind(descriptor.attempt_count as i64)
        .bind(descriptor.id.as_str())
        .execute(&self.pool)
        .await?;
        self.running.lock().remove(&descriptor.id);
        if result.rows_affected() == 0 {
            return Err(QueueError::DescriptorNotFound(descriptor.id.to_string()));
        }
        Ok(())
    }

    async fn find_by_key(&self, idempotency_key: &str) -> QueueResult<Option<CommandDescriptor>> {
        self.fetch_by_key(idempotency_key).await
    }

    async fn pending(&self, queue: &str) -> QueueResult<Vec<CommandDescriptor>> {
        let rows = sqlx::query(
            "SELECT * FROM command_queue WHERE queue = ? ORDER BY priority ASC, sequence ASC",
        )
        .bind(queue)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_descriptor).collect()
    }

    async fn pending_count(&self, queue: &str) -> QueueResult<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM command_queue WHERE queue = ?")
            .bind(queue)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}
