//! Error types for the outbox store and the sync manager.
//!
//! Delivery errors live next to the [`Delivery`](crate::remote::Delivery) trait
//! in [`crate::remote`].

use thiserror::Error;

use crate::outbox::types::MessageStatus;

/// Failure of a durable-store operation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("message {0} not found")]
    NotFound(i64),

    #[error("message {id} is {actual}, expected {expected}")]
    InvalidTransition {
        id: i64,
        expected: MessageStatus,
        actual: MessageStatus,
    },

    #[error("message content must not be empty")]
    EmptyContent,

    #[error("corrupt outbox row: {0}")]
    Corrupt(String),

    #[error("database lock poisoned: {0}")]
    Poisoned(String),

    #[error("storage task failed: {0}")]
    Task(String),

    #[error("outbox lock file: {0}")]
    Lock(#[from] std::io::Error),
}

/// Failure surfaced by [`SyncManager`](crate::sync::SyncManager).
///
/// Delivery failures never appear here: they are recorded on the message and
/// retried, so the only hard errors are storage errors.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("outbox storage failed: {0}")]
    Store(#[from] StoreError),
}
