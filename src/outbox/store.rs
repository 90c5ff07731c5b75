//! Durable store: crash-safe persistence of [`QueuedMessage`] records.
//!
//! Every method is a single statement or a single transaction against the
//! shared connection, so each transition is atomic. Methods are synchronous;
//! async callers go through `tokio::task::spawn_blocking`.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use super::lock::OwnerLock;
use super::stats::QueueSummary;
use super::types::{MessagePayload, MessageStatus, QueuedMessage};
use crate::error::StoreError;

const SELECT_COLUMNS: &str = "SELECT id, client_id, content, session_id, status, retry_count, \
     last_error, created_at, updated_at FROM outbox";

/// Error text recorded on messages found mid-flight after a restart.
pub const INTERRUPTED_ERROR: &str = "interrupted before delivery was confirmed";

/// Handle to the `outbox` table. Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct OutboxStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl OutboxStore {
    /// Wrap a connection that already has the schema and migrations applied.
    /// The store is treated as private to this process.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        }
    }

    /// Open (or create) the on-disk outbox at `path`.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        Ok(Self {
            path: Some(path.to_path_buf()),
            ..Self::new(crate::db::open_database(path)?)
        })
    }

    /// Database file, `None` for an in-memory outbox.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Try to become the process that drains this outbox. `Ok(None)` when
    /// another process already owns it.
    pub fn try_own(&self) -> Result<Option<OwnerLock>, StoreError> {
        match &self.path {
            Some(path) => OwnerLock::try_acquire(path),
            None => Ok(Some(OwnerLock::private())),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    /// Persist a new `pending` message with `retry_count = 0`.
    pub fn append(&self, payload: &MessagePayload) -> Result<QueuedMessage, StoreError> {
        if payload.content.trim().is_empty() {
            return Err(StoreError::EmptyContent);
        }

        let now = Utc::now();
        let client_id = uuid::Uuid::now_v7().to_string();

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO outbox (client_id, content, session_id, status, retry_count, created_at, updated_at) \
             VALUES (?1, ?2, ?3, 'pending', 0, ?4, ?4)",
            params![client_id, payload.content, payload.session_id, timestamp(now)],
        )?;
        let id = conn.last_insert_rowid();

        tracing::debug!(id, session = ?payload.session_id, "message appended to outbox");

        Ok(QueuedMessage {
            id,
            client_id,
            payload: payload.clone(),
            status: MessageStatus::Pending,
            retry_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// All `pending` messages in delivery order, read as one snapshot.
    pub fn list_pending(&self) -> Result<Vec<QueuedMessage>, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let messages = query_messages(
            &tx,
            &format!("{SELECT_COLUMNS} WHERE status = 'pending' ORDER BY id"),
        )?;
        tx.commit()?;
        Ok(messages)
    }

    /// Every message regardless of status, in delivery order.
    pub fn list_all(&self) -> Result<Vec<QueuedMessage>, StoreError> {
        let conn = self.lock()?;
        query_messages(&conn, &format!("{SELECT_COLUMNS} ORDER BY id"))
    }

    pub fn get(&self, id: i64) -> Result<Option<QueuedMessage>, StoreError> {
        let conn = self.lock()?;
        let message = conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id],
                row_to_message,
            )
            .optional()?;
        Ok(message)
    }

    /// `pending → sending`.
    pub fn mark_sending(&self, id: i64) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE outbox SET status = 'sending', updated_at = ?2 WHERE id = ?1 AND status = 'pending'",
            params![id, timestamp(Utc::now())],
        )?;
        expect_transition(&conn, id, changed, MessageStatus::Pending)
    }

    /// `sending → pending`, recording the attempt count and the error that caused it.
    pub fn mark_pending(
        &self,
        id: i64,
        retry_count: u32,
        last_error: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE outbox SET status = 'pending', retry_count = ?2, last_error = ?3, updated_at = ?4 \
             WHERE id = ?1 AND status = 'sending'",
            params![id, retry_count, last_error, timestamp(Utc::now())],
        )?;
        expect_transition(&conn, id, changed, MessageStatus::Sending)
    }

    /// `sending → failed`. Terminal until the user retries or discards.
    pub fn mark_failed(
        &self,
        id: i64,
        retry_count: u32,
        last_error: &str,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE outbox SET status = 'failed', retry_count = ?2, last_error = ?3, updated_at = ?4 \
             WHERE id = ?1 AND status = 'sending'",
            params![id, retry_count, last_error, timestamp(Utc::now())],
        )?;
        expect_transition(&conn, id, changed, MessageStatus::Sending)
    }

    /// Delete a message after confirmed delivery.
    pub fn remove(&self, id: i64) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let changed = conn.execute("DELETE FROM outbox WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    /// `failed → pending` with a fresh retry budget.
    pub fn requeue_failed(&self, id: i64) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE outbox SET status = 'pending', retry_count = 0, last_error = NULL, updated_at = ?2 \
             WHERE id = ?1 AND status = 'failed'",
            params![id, timestamp(Utc::now())],
        )?;
        expect_transition(&conn, id, changed, MessageStatus::Failed)
    }

    /// Drop a `failed` message the user gave up on.
    pub fn discard(&self, id: i64) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "DELETE FROM outbox WHERE id = ?1 AND status = 'failed'",
            params![id],
        )?;
        expect_transition(&conn, id, changed, MessageStatus::Failed)
    }

    /// Point every `pending` message of session `from` at session `to`.
    /// `from = None` matches messages that asked for a new session.
    pub fn reassign_session(&self, from: Option<&str>, to: &str) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE outbox SET session_id = ?2, updated_at = ?3 \
             WHERE status = 'pending' AND session_id IS ?1",
            params![from, to, timestamp(Utc::now())],
        )?;
        Ok(changed)
    }

    /// Return messages left in `sending` by a crashed process to `pending`,
    /// counting the interrupted attempt.
    pub fn recover_interrupted(&self) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE outbox SET status = 'pending', retry_count = retry_count + 1, \
             last_error = ?1, updated_at = ?2 WHERE status = 'sending'",
            params![INTERRUPTED_ERROR, timestamp(Utc::now())],
        )?;
        if changed > 0 {
            tracing::warn!(count = changed, "recovered messages interrupted mid-delivery");
        }
        Ok(changed)
    }

    /// Counts per status for the UI.
    pub fn summary(&self) -> Result<QueueSummary, StoreError> {
        let conn = self.lock()?;
        super::stats::queue_summary(&conn)
    }

    /// Rows inserted, updated or deleted through this handle since it was opened.
    pub fn total_changes(&self) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT total_changes()", [], |row| row.get(0))?;
        Ok(n as u64)
    }
}

/// Fixed-width RFC 3339 so stored timestamps sort lexically.
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {raw:?}: {e}")))
}

fn query_messages(conn: &Connection, sql: &str) -> Result<Vec<QueuedMessage>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let messages = stmt
        .query_map([], row_to_message)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(messages)
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<QueuedMessage> {
    let corrupt = |idx: usize, err: StoreError| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
    };

    let status: String = row.get(4)?;
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;

    Ok(QueuedMessage {
        id: row.get(0)?,
        client_id: row.get(1)?,
        payload: MessagePayload {
            content: row.get(2)?,
            session_id: row.get(3)?,
        },
        status: status
            .parse()
            .map_err(|e: String| corrupt(4, StoreError::Corrupt(e)))?,
        retry_count: row.get(5)?,
        last_error: row.get(6)?,
        created_at: parse_timestamp(&created_at).map_err(|e| corrupt(7, e))?,
        updated_at: parse_timestamp(&updated_at).map_err(|e| corrupt(8, e))?,
    })
}

/// Turn a zero-row UPDATE/DELETE into `NotFound` or `InvalidTransition`.
fn expect_transition(
    conn: &Connection,
    id: i64,
    changed: usize,
    expected: MessageStatus,
) -> Result<(), StoreError> {
    if changed > 0 {
        return Ok(());
    }

    let actual: Option<String> = conn
        .query_row(
            "SELECT status FROM outbox WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;

    match actual {
        None => Err(StoreError::NotFound(id)),
        Some(actual) => Err(StoreError::InvalidTransition {
            id,
            expected,
            actual: actual.parse().map_err(StoreError::Corrupt)?,
        }),
    }
}
