pub mod lock;
pub mod stats;
pub mod store;
pub mod types;

pub use lock::OwnerLock;
pub use stats::QueueSummary;
pub use store::OutboxStore;
pub use types::{MessagePayload, MessageStatus, QueuedMessage};
