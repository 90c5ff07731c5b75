use anyhow::Result;

use courier::config::CourierConfig;
use courier::outbox::OutboxStore;

/// List every undelivered message with its status.
pub fn list(config: &CourierConfig) -> Result<()> {
    let store = OutboxStore::open(config.resolved_db_path())?;
    let messages = store.list_all()?;

    if messages.is_empty() {
        println!("Outbox is empty.");
        return Ok(());
    }

    println!(
        "{:>6}  {:<8} {:>8}  {:<20} {}",
        "ID", "STATUS", "ATTEMPTS", "CREATED", "CONTENT"
    );
    for m in &messages {
        let preview: String = m.payload.content.chars().take(48).collect();
        println!(
            "{:>6}  {:<8} {:>8}  {:<20} {}",
            m.id,
            m.status,
            m.retry_count,
            m.created_at.format("%Y-%m-%d %H:%M:%S"),
            preview,
        );
        if let Some(ref session) = m.payload.session_id {
            println!("{:>6}  session: {session}", "");
        }
        if let Some(ref err) = m.last_error {
            println!("{:>6}  last error: {err}", "");
        }
    }

    Ok(())
}
