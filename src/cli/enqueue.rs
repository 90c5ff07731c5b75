//! CLI `enqueue` command: queue a message, then attempt delivery.

use anyhow::{Context, Result};

use courier::config::CourierConfig;
use courier::outbox::MessagePayload;

pub async fn enqueue(
    config: &CourierConfig,
    content: String,
    session: Option<String>,
    no_sync: bool,
) -> Result<()> {
    let runtime = courier::app::build(config)?;
    let online = super::refresh_connectivity(&runtime).await;

    let payload = MessagePayload::new(content, session.as_deref());
    let message = runtime
        .manager
        .enqueue(payload)
        .await
        .context("message was NOT queued")?;
    println!("Queued message {} ({})", message.id, message.client_id);

    if no_sync {
        return Ok(());
    }
    if !online {
        println!("Offline: the message will be sent when the connection returns.");
        return Ok(());
    }

    let outcome = runtime.manager.drain().await?;
    super::print_outcome(&outcome);
    Ok(())
}
