//! Offline message outbox for a personal assistant chat client.
//!
//! Courier guarantees that a message the user sends survives a lost
//! connection, a reload or a restart, and reaches the remote chat service in
//! the order it was written, without blocking the caller.
//!
//! # Architecture
//!
//! - **Durable store**: SQLite `outbox` table; one row per undelivered message,
//!   deleted on confirmed delivery
//! - **Connectivity observer**: online/offline state with callback and
//!   `watch` subscriptions, fed by an HTTP reachability probe
//! - **Sync manager**: the only writer of message status; drains the outbox in
//!   order, one message at a time, stopping at the first failure
//!
//! | Status | Meaning |
//! |--------|---------|
//! | **pending** | Waiting for the next drain |
//! | **sending** | Delivery attempt in flight |
//! | **failed** | Rejected or out of retries; needs retry or discard |
//!
//! # Modules
//!
//! - [`config`]: configuration loading from TOML files and environment variables
//! - [`db`]: SQLite initialization, schema, migrations, and health checks
//! - [`outbox`]: the durable store and its record types
//! - [`connectivity`]: the connectivity observer and probe
//! - [`remote`]: the delivery trait and its HTTP implementation
//! - [`sync`]: the sync manager, drain cycle and background worker

pub mod app;
pub mod config;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod outbox;
pub mod remote;
pub mod sync;
