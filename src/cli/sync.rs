//! CLI `sync` and `run` commands.

use anyhow::{Context, Result};

use courier::config::CourierConfig;

/// Run a single drain cycle.
pub async fn sync_once(config: &CourierConfig) -> Result<()> {
    let runtime = courier::app::build(config)?;
    super::refresh_connectivity(&runtime).await;

    let outcome = runtime.manager.drain().await?;
    super::print_outcome(&outcome);
    Ok(())
}

/// Deliver in the background until Ctrl-C.
pub async fn run(config: &CourierConfig) -> Result<()> {
    let runtime = courier::app::build(config)?;

    let probe_task = runtime
        .probe
        .map(|probe| probe.spawn(runtime.connectivity.clone()));

    if !runtime.manager.is_owner() {
        tracing::warn!("another courier process owns this outbox, standing by");
    }
    let handle = runtime.manager.start();
    let mut status = runtime.manager.status();

    tracing::info!("courier running, press Ctrl-C to stop");

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for ctrl-c")?;
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let summary = status.borrow_and_update().clone();
                tracing::info!(
                    pending = summary.pending,
                    sending = summary.sending,
                    failed = summary.failed,
                    "queue status"
                );
            }
        }
    }

    tracing::info!("shutting down");
    if let Some(task) = probe_task {
        task.abort();
    }
    handle.shutdown().await;
    Ok(())
}
