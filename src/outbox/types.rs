//! Outbox record definitions.
//!
//! Defines [`MessageStatus`] (the per-record delivery state), [`MessagePayload`]
//! (what the user authored) and [`QueuedMessage`] (a full `outbox` row).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Delivery state of a queued message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Waiting for the next drain cycle.
    Pending,
    /// A delivery attempt is in flight.
    Sending,
    /// Retries exhausted or permanently rejected; needs retry or discard from the user.
    Failed,
}

impl MessageStatus {
    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sending => "sending",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "sending" => Ok(Self::Sending),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("unknown message status: {s}")),
        }
    }
}

/// Message content plus the conversation it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub content: String,
    /// `None` asks the remote to open a new session.
    pub session_id: Option<String>,
}

impl MessagePayload {
    pub fn new(content: impl Into<String>, session_id: Option<&str>) -> Self {
        Self {
            content: content.into(),
            session_id: session_id.map(str::to_string),
        }
    }
}

/// One row of the `outbox` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMessage {
    /// Store-assigned, strictly increasing. Ascending id is delivery order.
    pub id: i64,
    /// UUID v7 sent as the remote's idempotency key.
    pub client_id: String,
    #[serde(flatten)]
    pub payload: MessagePayload,
    pub status: MessageStatus,
    /// Delivery attempts made so far.
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
