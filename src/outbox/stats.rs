use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;

use super::store::parse_timestamp;
use crate::error::StoreError;

/// Read-only projection of the outbox for the UI: how many messages are still
/// waiting, in flight, or need the user's attention.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueSummary {
    pub pending: u64,
    pub sending: u64,
    pub failed: u64,
    /// Authoring time of the oldest undelivered, non-failed message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_pending: Option<DateTime<Utc>>,
}

impl QueueSummary {
    /// Messages not yet confirmed by the remote, failed ones included.
    pub fn undelivered(&self) -> u64 {
        self.pending + self.sending + self.failed
    }

    pub fn is_idle(&self) -> bool {
        self.pending == 0 && self.sending == 0
    }
}

/// Compute per-status counts in one pass.
pub fn queue_summary(conn: &Connection) -> Result<QueueSummary, StoreError> {
    let mut summary = QueueSummary::default();

    let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM outbox GROUP BY status")?;
    let rows: Vec<(String, i64)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    for (status, count) in rows {
        let count = count as u64;
        match status.as_str() {
            "pending" => summary.pending = count,
            "sending" => summary.sending = count,
            "failed" => summary.failed = count,
            other => return Err(StoreError::Corrupt(format!("unknown message status: {other}"))),
        }
    }

    let oldest: Option<String> = conn.query_row(
        "SELECT MIN(created_at) FROM outbox WHERE status IN ('pending','sending')",
        [],
        |row| row.get(0),
    )?;
    summary.oldest_pending = oldest.as_deref().map(parse_timestamp).transpose()?;

    Ok(summary)
}
