//! Sync manager: the reconciliation loop between the outbox and the remote.
//!
//! [`SyncManager`] is the only writer of message status. A drain cycle reads
//! the pending list once and walks it strictly in order:
//!
//! ```text
//! pending ──mark_sending──▶ sending ──ok──▶ (removed)
//!                              │
//!                              ├─retryable──▶ pending   (retry_count + 1, cycle stops)
//!                              └─permanent / exhausted──▶ failed (cycle stops)
//! ```
//!
//! Stopping at the first failure keeps a later message from overtaking an
//! earlier undelivered one. At most one drain runs at a time; a trigger that
//! arrives mid-drain is folded into a rerun of the active drain.
//!
//! Across processes, only the holder of the outbox [`OwnerLock`] drains or
//! recovers interrupted messages. Other managers on the same database can
//! still enqueue, retry and discard; their drains report
//! [`DrainOutcome::OwnedElsewhere`] until the owner exits.

mod guard;
pub mod policy;
pub mod worker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{watch, Notify};

use crate::connectivity::ConnectivityObserver;
use crate::error::{StoreError, SyncError};
use crate::outbox::{MessagePayload, OutboxStore, OwnerLock, QueueSummary, QueuedMessage};
use crate::remote::{Delivery, DeliveryError, OutgoingMessage};
use guard::DrainGuard;
pub use policy::SyncPolicy;
pub use worker::SyncHandle;

/// Why a drain cycle ended before the queue was empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Delivery failed; the message is `pending` again and will be retried.
    Retrying { id: i64, retry_count: u32 },
    /// Delivery failed for good; the message is `failed` and needs the user.
    Failed { id: i64, retry_count: u32 },
    /// The remote refused our credentials. The message stays `pending`
    /// without spending a retry; nothing can go through until auth is fixed.
    Unauthorized { id: i64, status: u16 },
    /// Connectivity dropped between two messages.
    WentOffline,
}

/// What a completed drain did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Ids removed after confirmed delivery, in delivery order.
    pub delivered: Vec<i64>,
    /// Number of passes over the pending list (more than one when triggers
    /// arrived while draining).
    pub cycles: u32,
    pub stopped: Option<StopReason>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Offline: nothing was read or written.
    Offline,
    /// Another drain is active and will pick up this request.
    AlreadyRunning,
    /// Another process owns this outbox and delivers its messages.
    OwnedElsewhere,
    Completed(DrainReport),
}

pub struct SyncManager {
    store: OutboxStore,
    connectivity: ConnectivityObserver,
    delivery: Arc<dyn Delivery>,
    policy: SyncPolicy,
    owner: Arc<Mutex<Option<OwnerLock>>>,
    draining: AtomicBool,
    rerun: AtomicBool,
    // Set when a message could not be released after a storage error.
    needs_recovery: AtomicBool,
    wake: Arc<Notify>,
    status: watch::Sender<QueueSummary>,
}

impl SyncManager {
    /// Build a manager over its injected collaborators.
    ///
    /// Tries to take ownership of the outbox. The owner returns messages left
    /// `sending` by a previous process to `pending` here, before anything can
    /// drain. A non-owner leaves them alone: they may be in flight elsewhere.
    pub fn new(
        store: OutboxStore,
        connectivity: ConnectivityObserver,
        delivery: Arc<dyn Delivery>,
        policy: SyncPolicy,
    ) -> Result<Self, SyncError> {
        let owner = Arc::new(Mutex::new(None));
        if !claim_ownership(&store, &owner)? {
            tracing::info!("outbox is owned by another process, queueing only");
        }
        let (status, _) = watch::channel(store.summary()?);

        Ok(Self {
            store,
            connectivity,
            delivery,
            policy,
            owner,
            draining: AtomicBool::new(false),
            rerun: AtomicBool::new(false),
            needs_recovery: AtomicBool::new(false),
            wake: Arc::new(Notify::new()),
            status,
        })
    }

    /// Whether this manager holds the outbox owner lock.
    pub fn is_owner(&self) -> bool {
        self.owner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    pub fn connectivity(&self) -> &ConnectivityObserver {
        &self.connectivity
    }

    /// Persist a message and, when online, wake the background worker.
    ///
    /// Returns once the message is durable. A storage error means the message
    /// was not queued and must be reported to the user.
    pub async fn enqueue(&self, payload: MessagePayload) -> Result<QueuedMessage, SyncError> {
        let message = self.blocking(move |store| store.append(&payload)).await?;
        tracing::info!(
            id = message.id,
            session = ?message.payload.session_id,
            "message queued"
        );

        self.publish_status().await;
        if self.connectivity.current_state() {
            self.wake.notify_one();
        }
        Ok(message)
    }

    /// Put a `failed` message back in the queue with a fresh retry budget.
    pub async fn retry_failed(&self, id: i64) -> Result<(), SyncError> {
        self.blocking(move |store| store.requeue_failed(id)).await?;
        tracing::info!(id, "failed message requeued by user");

        self.publish_status().await;
        if self.connectivity.current_state() {
            self.wake.notify_one();
        }
        Ok(())
    }

    /// Drop a `failed` message the user gave up on.
    pub async fn discard(&self, id: i64) -> Result<(), SyncError> {
        self.blocking(move |store| store.discard(id)).await?;
        tracing::info!(id, "failed message discarded by user");

        self.publish_status().await;
        Ok(())
    }

    /// Live per-status counts. Updated after every status change.
    pub fn status(&self) -> watch::Receiver<QueueSummary> {
        self.status.subscribe()
    }

    /// Every undelivered message with its status, in delivery order.
    pub async fn messages(&self) -> Result<Vec<QueuedMessage>, SyncError> {
        Ok(self.blocking(|store| store.list_all()).await?)
    }

    /// Run a drain now.
    ///
    /// Returns [`DrainOutcome::Offline`] without touching the store when
    /// offline, [`DrainOutcome::OwnedElsewhere`] while another process owns
    /// the outbox, and [`DrainOutcome::AlreadyRunning`] when another drain
    /// holds the guard; that drain makes one more pass on behalf of this call.
    pub async fn drain(&self) -> Result<DrainOutcome, SyncError> {
        let mut report: Option<DrainReport> = None;

        loop {
            if !self.connectivity.current_state() {
                tracing::debug!("offline, skipping drain");
                return Ok(report.map_or(DrainOutcome::Offline, DrainOutcome::Completed));
            }

            if !self.ensure_owner().await? {
                tracing::debug!("outbox owned by another process, skipping drain");
                return Ok(DrainOutcome::OwnedElsewhere);
            }

            let guard = match DrainGuard::acquire(&self.draining) {
                Some(guard) => guard,
                None => {
                    self.rerun.store(true, Ordering::Release);
                    // The holder may have finished between the two checks.
                    match DrainGuard::acquire(&self.draining) {
                        Some(guard) => guard,
                        None => {
                            tracing::debug!("drain already running, requested rerun");
                            return Ok(report
                                .map_or(DrainOutcome::AlreadyRunning, DrainOutcome::Completed));
                        }
                    }
                }
            };
            self.rerun.store(false, Ordering::Release);

            let report = report.get_or_insert_with(DrainReport::default);
            report.cycles += 1;
            let result = self.drain_cycle(report).await;
            drop(guard);
            result?;

            if report.stopped.is_some() || !self.rerun.swap(false, Ordering::AcqRel) {
                break;
            }
            tracing::debug!("rerunning drain for requests that arrived mid-cycle");
        }

        let report = report.unwrap_or_default();
        if !report.delivered.is_empty() || report.stopped.is_some() {
            tracing::info!(
                delivered = report.delivered.len(),
                cycles = report.cycles,
                stopped = ?report.stopped,
                "drain finished"
            );
        }
        Ok(DrainOutcome::Completed(report))
    }

    /// Take ownership if no other process holds it. Recovery of interrupted
    /// messages runs as part of the takeover.
    async fn ensure_owner(&self) -> Result<bool, SyncError> {
        if self.is_owner() {
            return Ok(true);
        }
        let owner = Arc::clone(&self.owner);
        let owned = self
            .blocking(move |store| claim_ownership(store, &owner))
            .await?;
        Ok(owned)
    }

    /// One pass over the pending list. Sets `report.stopped` if it ended early.
    async fn drain_cycle(&self, report: &mut DrainReport) -> Result<(), SyncError> {
        if self.needs_recovery.swap(false, Ordering::AcqRel) {
            // Holding the drain guard as owner: any `sending` row is stranded.
            if let Err(e) = self.blocking(|store| store.recover_interrupted()).await {
                self.needs_recovery.store(true, Ordering::Release);
                return Err(e.into());
            }
        }

        let mut pending = self.blocking(|store| store.list_pending()).await?;
        if pending.is_empty() {
            return Ok(());
        }
        tracing::debug!(count = pending.len(), "draining outbox");

        for idx in 0..pending.len() {
            if !self.connectivity.current_state() {
                tracing::info!(remaining = pending.len() - idx, "went offline mid-drain");
                report.stopped = Some(StopReason::WentOffline);
                return Ok(());
            }

            let message = pending[idx].clone();
            let id = message.id;

            self.blocking(move |store| store.mark_sending(id)).await?;
            self.publish_status().await;

            match self.send_one(&message, &mut pending[idx + 1..], report).await {
                Ok(None) => {}
                Ok(Some(reason)) => {
                    report.stopped = Some(reason);
                    return Ok(());
                }
                Err(e) => {
                    self.release(&message, &e).await;
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    /// Deliver a message already marked `sending` and record the result.
    /// `Ok(Some(_))` means the cycle must stop.
    async fn send_one(
        &self,
        message: &QueuedMessage,
        remaining: &mut [QueuedMessage],
        report: &mut DrainReport,
    ) -> Result<Option<StopReason>, SyncError> {
        let id = message.id;

        match self.attempt(message).await {
            Ok(session_id) => {
                self.blocking(move |store| store.remove(id)).await?;
                report.delivered.push(id);
                tracing::debug!(id, "message delivered");

                if let Some(new_session) = session_id {
                    self.rebind_session(message, new_session, remaining).await?;
                }
                self.publish_status().await;
                Ok(None)
            }
            Err(error) => {
                let reason = self.record_failure(message, error).await?;
                self.publish_status().await;
                Ok(Some(reason))
            }
        }
    }

    /// A storage error interrupted the bookkeeping for a `sending` message:
    /// put it back in the queue so it is not stranded until restart.
    async fn release(&self, message: &QueuedMessage, cause: &SyncError) {
        let id = message.id;
        let retry_count = message.retry_count.saturating_add(1);
        let text = cause.to_string();

        match self
            .blocking(move |store| store.mark_pending(id, retry_count, Some(&text)))
            .await
        {
            Ok(()) => {
                tracing::warn!(id, error = %cause, "storage error mid-delivery, message returned to pending")
            }
            // Already removed or settled before the error.
            Err(StoreError::NotFound(_) | StoreError::InvalidTransition { .. }) => {}
            Err(e) => {
                tracing::error!(id, error = %e, "could not release message, recovering on next drain");
                self.needs_recovery.store(true, Ordering::Release);
            }
        }
        self.publish_status().await;
    }

    /// One bounded delivery call. `Ok` carries a session id that differs from
    /// the one the message was sent with, if the remote reported one.
    async fn attempt(&self, message: &QueuedMessage) -> Result<Option<String>, DeliveryError> {
        let outgoing = OutgoingMessage::from(message);
        let receipt = tokio::time::timeout(
            self.policy.delivery_timeout,
            self.delivery.deliver(&outgoing),
        )
        .await
        .map_err(|_| DeliveryError::Timeout)??;

        Ok(receipt
            .session_id
            .filter(|s| message.payload.session_id.as_deref() != Some(s.as_str())))
    }

    /// `sending → pending` or `sending → failed` after a failed attempt.
    async fn record_failure(
        &self,
        message: &QueuedMessage,
        error: DeliveryError,
    ) -> Result<StopReason, SyncError> {
        let id = message.id;
        let text = error.to_string();

        if let DeliveryError::Unauthorized { status } = error {
            let retry_count = message.retry_count;
            tracing::error!(id, status, "remote refused credentials, holding the queue");
            self.blocking(move |store| store.mark_pending(id, retry_count, Some(&text)))
                .await?;
            return Ok(StopReason::Unauthorized { id, status });
        }

        let retry_count = message.retry_count.saturating_add(1);
        if !error.is_retryable() || self.policy.exhausted(retry_count) {
            tracing::error!(id, retry_count, error = %text, "message delivery failed permanently");
            self.blocking(move |store| store.mark_failed(id, retry_count, &text))
                .await?;
            Ok(StopReason::Failed { id, retry_count })
        } else {
            tracing::warn!(id, retry_count, error = %text, "message delivery failed, will retry");
            self.blocking(move |store| store.mark_pending(id, retry_count, Some(&text)))
                .await?;
            Ok(StopReason::Retrying { id, retry_count })
        }
    }

    /// The remote filed `delivered` under a new session: move the rest of its
    /// conversation there, both in the store and in the in-memory remainder.
    async fn rebind_session(
        &self,
        delivered: &QueuedMessage,
        new_session: String,
        remaining: &mut [QueuedMessage],
    ) -> Result<(), StoreError> {
        let from = delivered.payload.session_id.clone();
        let to = new_session.clone();
        let from_db = from.clone();
        let moved = self
            .blocking(move |store| store.reassign_session(from_db.as_deref(), &to))
            .await?;
        tracing::debug!(from = ?from, to = %new_session, moved, "session reassigned");

        for later in remaining.iter_mut().filter(|m| m.payload.session_id == from) {
            later.payload.session_id = Some(new_session.clone());
        }
        Ok(())
    }

    /// Recompute and broadcast the queue summary. A failed read only costs the UI an update.
    async fn publish_status(&self) {
        match self.blocking(|store| store.summary()).await {
            Ok(summary) => {
                self.status.send_replace(summary);
            }
            Err(e) => tracing::warn!(error = %e, "failed to refresh queue status"),
        }
    }

    /// Run a store operation on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&OutboxStore) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

/// Take the owner lock into `slot` if it is free, then recover messages a
/// previous owner left `sending`. Returns whether `slot` holds the lock.
fn claim_ownership(
    store: &OutboxStore,
    slot: &Mutex<Option<OwnerLock>>,
) -> Result<bool, StoreError> {
    let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
    if slot.is_some() {
        return Ok(true);
    }
    let Some(lock) = store.try_own()? else {
        return Ok(false);
    };
    store.recover_interrupted()?;
    *slot = Some(lock);
    Ok(true)
}
