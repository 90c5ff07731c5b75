mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use courier::config::CourierConfig;

#[derive(Parser)]
#[command(name = "courier", version, about = "Offline message outbox for the assistant chat client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Queue a message and try to deliver it right away
    Enqueue {
        /// Message text
        content: String,
        /// Conversation to post into (omit to start a new one)
        #[arg(long)]
        session: Option<String>,
        /// Only queue; do not attempt delivery
        #[arg(long)]
        no_sync: bool,
    },
    /// List every undelivered message with its status
    List,
    /// Show queue counts per status
    Stats,
    /// Run one drain cycle now
    Sync,
    /// Requeue a failed message
    Retry { id: i64 },
    /// Delete a failed message
    Discard { id: i64 },
    /// Keep delivering in the background until Ctrl-C
    Run,
    /// Check database health
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = CourierConfig::load()?;

    // Logs go to stderr so command output on stdout stays clean.
    let filter = EnvFilter::try_new(&config.general.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Enqueue {
            content,
            session,
            no_sync,
        } => cli::enqueue::enqueue(&config, content, session, no_sync).await?,
        Command::List => cli::list::list(&config)?,
        Command::Stats => cli::stats::stats(&config)?,
        Command::Sync => cli::sync::sync_once(&config).await?,
        Command::Retry { id } => cli::resolve::retry(&config, id).await?,
        Command::Discard { id } => cli::resolve::discard(&config, id)?,
        Command::Run => cli::sync::run(&config).await?,
        Command::Doctor => cli::doctor::doctor(&config)?,
    }

    Ok(())
}
