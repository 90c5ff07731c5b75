//! CLI `doctor` command: run database diagnostics and print a health report.

use anyhow::{Context, Result};

use courier::config::CourierConfig;
use courier::db;
use courier::outbox::lock::lock_path;
use courier::outbox::OwnerLock;

/// Run database diagnostics and print a health report.
pub fn doctor(config: &CourierConfig) -> Result<()> {
    let db_path = config.resolved_db_path();

    if !db_path.exists() {
        println!("Database: not found at {}", db_path.display());
        println!("Run `courier enqueue` or `courier run` to initialize.");
        return Ok(());
    }

    let file_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

    let conn = db::open_database(&db_path).context("failed to open database (may be corrupt)")?;
    let report = db::check_database_health(&conn).context("failed to run health check")?;

    println!("Courier Health Report");
    println!("=====================");
    println!();
    println!("Database:          {}", db_path.display());
    println!("File size:         {}", format_bytes(file_size));
    println!("Schema version:    {}", report.schema_version);
    println!("Endpoint:          {}", config.remote.endpoint);
    println!(
        "Probe:             {}",
        config.connectivity.probe_url.as_deref().unwrap_or("(none, assuming online)")
    );
    if OwnerLock::is_held(&db_path)? {
        let pid = std::fs::read_to_string(lock_path(&db_path)).unwrap_or_default();
        println!("Delivery owner:    running (pid {})", pid.trim());
    } else {
        println!("Delivery owner:    none");
    }
    println!();
    println!("Messages:");
    println!("  Pending:         {}", report.pending_count);
    println!("  Sending:         {}", report.sending_count);
    println!("  Failed:          {}", report.failed_count);
    if report.sending_count > 0 {
        println!("  NOTE: messages in `sending` were interrupted and will be retried on next start.");
    }
    println!();
    if report.integrity_ok {
        println!("Integrity check:   PASSED");
    } else {
        println!("Integrity check:   FAILED ({})", report.integrity_details);
        println!();
        println!("Recovery steps:");
        println!("  1. Stop any running `courier run` process");
        println!("  2. Restore from a backup: cp backup.db {}", db_path.display());
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
