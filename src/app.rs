//! Composition root: builds one [`SyncManager`] from configuration.
//!
//! Nothing in the crate holds a process-wide manager; the binary (or an
//! embedding application) owns the instance built here, one per user session.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::config::CourierConfig;
use crate::connectivity::probe::ConnectivityProbe;
use crate::connectivity::ConnectivityObserver;
use crate::outbox::OutboxStore;
use crate::remote::http::HttpDelivery;
use crate::remote::Delivery;
use crate::sync::{SyncManager, SyncPolicy};

/// Everything the binary needs to run the outbox.
pub struct Runtime {
    pub manager: Arc<SyncManager>,
    pub connectivity: ConnectivityObserver,
    /// `None` when no probe URL is configured (connectivity stays online).
    pub probe: Option<ConnectivityProbe>,
}

/// Open the store, wire the HTTP delivery and connectivity probe, and build the manager.
pub fn build(config: &CourierConfig) -> Result<Runtime> {
    let db_path = config.resolved_db_path();
    let store = OutboxStore::open(&db_path)?;
    tracing::info!(db = %db_path.display(), "outbox ready");

    let policy = SyncPolicy::from_config(&config.sync);
    let delivery: Arc<dyn Delivery> = Arc::new(HttpDelivery::new(
        &config.remote,
        policy.delivery_timeout,
    )?);
    tracing::info!(endpoint = %config.remote.endpoint, "delivery client ready");

    let connectivity = ConnectivityObserver::default();
    let probe = ConnectivityProbe::from_config(&config.connectivity)?;
    if probe.is_none() {
        tracing::debug!("no connectivity probe configured, assuming online");
    }

    let manager = SyncManager::new(store, connectivity.clone(), delivery, policy)
        .context("failed to initialize sync manager")?;

    Ok(Runtime {
        manager: Arc::new(manager),
        connectivity,
        probe,
    })
}
