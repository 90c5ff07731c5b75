//! CLI `retry` and `discard` commands for failed messages.

use anyhow::{Context, Result};

use courier::config::CourierConfig;
use courier::outbox::OutboxStore;

/// Requeue a failed message and try to deliver it.
pub async fn retry(config: &CourierConfig, id: i64) -> Result<()> {
    let runtime = courier::app::build(config)?;
    runtime
        .manager
        .retry_failed(id)
        .await
        .with_context(|| format!("cannot retry message {id}"))?;
    println!("Message {id} requeued.");

    if super::refresh_connectivity(&runtime).await {
        let outcome = runtime.manager.drain().await?;
        super::print_outcome(&outcome);
    }
    Ok(())
}

/// Delete a failed message.
pub fn discard(config: &CourierConfig, id: i64) -> Result<()> {
    let store = OutboxStore::open(config.resolved_db_path())?;
    store
        .discard(id)
        .with_context(|| format!("cannot discard message {id}"))?;
    println!("Message {id} discarded.");
    Ok(())
}
