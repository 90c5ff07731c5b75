pub mod doctor;
pub mod enqueue;
pub mod list;
pub mod resolve;
pub mod stats;
pub mod sync;

use courier::app::Runtime;
use courier::sync::{DrainOutcome, StopReason};

/// Probe once (when a probe is configured) so one-shot commands see the real state.
pub async fn refresh_connectivity(runtime: &Runtime) -> bool {
    match &runtime.probe {
        Some(probe) => probe.check_and_publish(&runtime.connectivity).await,
        None => runtime.connectivity.current_state(),
    }
}

/// Print a drain outcome for humans.
pub fn print_outcome(outcome: &DrainOutcome) {
    match outcome {
        DrainOutcome::Offline => println!("Offline: messages stay queued until the connection returns."),
        DrainOutcome::AlreadyRunning => println!("A sync is already in progress."),
        DrainOutcome::OwnedElsewhere => {
            println!("Another courier process is delivering this outbox; it will send queued messages.")
        }
        DrainOutcome::Completed(report) => {
            println!("Delivered {} message(s).", report.delivered.len());
            match &report.stopped {
                Some(StopReason::Retrying { id, retry_count }) => {
                    println!("Message {id} failed (attempt {retry_count}); it will be retried.")
                }
                Some(StopReason::Failed { id, retry_count }) => println!(
                    "Message {id} failed permanently after {retry_count} attempt(s). \
                     Use `courier retry {id}` or `courier discard {id}`."
                ),
                Some(StopReason::Unauthorized { id, status }) => println!(
                    "Message {id} was refused with HTTP {status}: check the auth token. \
                     Messages stay queued."
                ),
                Some(StopReason::WentOffline) => {
                    println!("Connection dropped; remaining messages stay queued.")
                }
                None => {}
            }
        }
    }
}
