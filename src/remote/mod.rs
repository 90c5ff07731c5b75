//! Remote delivery seam.
//!
//! The [`Delivery`] trait is the one operation the sync manager consumes from
//! the chat service: send `(content, session)` and get back the session the
//! message landed in. [`http::HttpDelivery`] is the production implementation.

pub mod http;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::outbox::types::QueuedMessage;

/// What goes over the wire for one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingMessage {
    /// Stable across retries of the same message.
    #[serde(rename = "client_message_id")]
    pub client_id: String,
    pub content: String,
    pub session_id: Option<String>,
}

impl From<&QueuedMessage> for OutgoingMessage {
    fn from(message: &QueuedMessage) -> Self {
        Self {
            client_id: message.client_id.clone(),
            content: message.payload.content.clone(),
            session_id: message.payload.session_id.clone(),
        }
    }
}

/// Successful delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// Session the remote filed the message under, if it reported one.
    pub session_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("delivery timed out")]
    Timeout,

    #[error("server error: HTTP {status}")]
    Server { status: u16 },

    #[error("credentials refused: HTTP {status}")]
    Unauthorized { status: u16 },

    #[error("rejected by server: HTTP {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl DeliveryError {
    /// Whether another attempt could succeed. Only an explicit rejection is final.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }

    /// Classify a non-success HTTP status.
    ///
    /// 5xx plus 408 (request timeout), 425 (too early) and 429 (rate limited)
    /// are transient. 401 and 403 are about the client's credentials, not the
    /// message. Every other status is a permanent rejection.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            401 | 403 => Self::Unauthorized { status },
            408 | 425 | 429 | 500..=599 => Self::Server { status },
            _ => Self::Rejected {
                status,
                message: message.into(),
            },
        }
    }
}

/// The remote chat API's send operation.
#[async_trait]
pub trait Delivery: Send + Sync {
    async fn deliver(&self, message: &OutgoingMessage) -> Result<DeliveryReceipt, DeliveryError>;
}
