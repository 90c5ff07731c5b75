//! Background drain loop.
//!
//! The worker sleeps until woken by an enqueue, a transition to online, or its
//! timer, then runs [`SyncManager::drain`]. The timer is set from how the last
//! drain ended: backoff after a retryable failure, right away after a terminal
//! one (the next message is not blocked by a `failed` record), the longest
//! backoff after refused credentials, and the poll interval otherwise.

use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{DrainOutcome, StopReason, SyncManager};
use crate::connectivity::Subscription;

/// Running worker. Dropping it stops the loop after any in-flight drain.
pub struct SyncHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    _subscription: Subscription,
}

impl SyncHandle {
    /// Stop the worker and wait for an in-flight drain to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "sync worker panicked");
            }
        }
    }
}

impl SyncManager {
    fn poll_deadline(&self) -> Option<Instant> {
        let interval = self.policy.poll_interval;
        (!interval.is_zero()).then(|| Instant::now() + interval)
    }

    /// Spawn the background worker and subscribe it to connectivity changes.
    ///
    /// The subscription fires immediately, so starting while online drains
    /// whatever a previous run left behind.
    pub fn start(self: &Arc<Self>) -> SyncHandle {
        let wake = Arc::clone(&self.wake);
        let subscription = self.connectivity.subscribe(move |online| {
            if online {
                wake.notify_one();
            }
        });

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let manager = Arc::clone(self);

        let task = tokio::spawn(async move {
            tracing::info!("sync worker started");
            let mut next_at: Option<Instant> = manager.poll_deadline();

            loop {
                let timer = async move {
                    match next_at {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending::<()>().await,
                    }
                };

                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    _ = manager.wake.notified() => {}
                    _ = timer => tracing::trace!("worker timer elapsed"),
                }

                next_at = match manager.drain().await {
                    Ok(DrainOutcome::Completed(report)) => match report.stopped {
                        Some(StopReason::Retrying { id, retry_count }) => {
                            let delay = manager.policy.backoff(retry_count);
                            tracing::debug!(id, retry_count, ?delay, "scheduling retry");
                            Some(Instant::now() + delay)
                        }
                        Some(StopReason::Failed { .. }) => Some(Instant::now()),
                        Some(StopReason::Unauthorized { .. }) => {
                            Some(Instant::now() + manager.policy.retry_max_delay)
                        }
                        Some(StopReason::WentOffline) | None => manager.poll_deadline(),
                    },
                    Ok(outcome) => {
                        tracing::trace!(?outcome, "drain skipped");
                        manager.poll_deadline()
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "drain failed");
                        Some(Instant::now() + manager.policy.backoff(1))
                    }
                };
            }

            tracing::info!("sync worker stopped");
        });

        SyncHandle {
            shutdown: Some(shutdown_tx),
            task: Some(task),
            _subscription: subscription,
        }
    }
}
