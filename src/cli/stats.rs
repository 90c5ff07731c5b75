use anyhow::Result;

use courier::config::CourierConfig;
use courier::outbox::OutboxStore;

/// Display queue counts in the terminal.
pub fn stats(config: &CourierConfig) -> Result<()> {
    let db_path = config.resolved_db_path();
    let store = OutboxStore::open(&db_path)?;
    let summary = store.summary()?;

    println!("Outbox Statistics");
    println!("{}", "=".repeat(40));
    println!("  Pending:             {}", summary.pending);
    println!("  Sending:             {}", summary.sending);
    println!("  Failed:              {}", summary.failed);
    println!("  Undelivered total:   {}", summary.undelivered());

    if let Some(oldest) = summary.oldest_pending {
        println!();
        println!("Oldest waiting since:  {}", oldest.to_rfc3339());
    }

    Ok(())
}
