#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use courier::connectivity::ConnectivityObserver;
use courier::db;
use courier::outbox::OutboxStore;
use courier::remote::{Delivery, DeliveryError, DeliveryReceipt, OutgoingMessage};
use courier::sync::{DrainOutcome, DrainReport, SyncManager, SyncPolicy};

/// Fresh in-memory outbox with schema and migrations applied.
pub fn test_store() -> OutboxStore {
    OutboxStore::new(db::open_memory_database().unwrap())
}

/// Policy with short timeouts so failure tests run quickly.
pub fn fast_policy() -> SyncPolicy {
    SyncPolicy {
        max_retries: 5,
        delivery_timeout: Duration::from_secs(2),
        retry_base_delay: Duration::from_millis(50),
        retry_max_delay: Duration::from_millis(200),
        poll_interval: Duration::ZERO,
    }
}

pub fn manager(
    store: &OutboxStore,
    observer: &ConnectivityObserver,
    delivery: &Arc<MockDelivery>,
    policy: SyncPolicy,
) -> Arc<SyncManager> {
    let delivery: Arc<dyn Delivery> = delivery.clone();
    Arc::new(SyncManager::new(store.clone(), observer.clone(), delivery, policy).unwrap())
}

/// Scripted result for one delivery call.
pub enum Scripted {
    Ok(Option<&'static str>),
    Transport,
    Reject(u16),
    /// Never answers; only a timeout ends the call.
    Hang,
}

/// One recorded invocation of [`MockDelivery::deliver`].
#[derive(Debug, Clone)]
pub struct Call {
    pub client_id: String,
    pub content: String,
    pub session_id: Option<String>,
    pub started: Instant,
    pub finished: Option<Instant>,
}

/// Delivery double: records every call with timestamps, answers from a
/// script (then succeeds), and counts overlapping calls for the same message.
pub struct MockDelivery {
    calls: Mutex<Vec<Call>>,
    script: Mutex<VecDeque<Scripted>>,
    in_flight: Mutex<HashSet<String>>,
    overlaps: AtomicUsize,
    delay: Duration,
    on_call: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

impl MockDelivery {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
            in_flight: Mutex::new(HashSet::new()),
            overlaps: AtomicUsize::new(0),
            delay,
            on_call: Mutex::new(None),
        })
    }

    /// Queue results for the next calls, in order.
    pub fn script(&self, results: impl IntoIterator<Item = Scripted>) {
        self.script.lock().unwrap().extend(results);
    }

    /// Run `hook` at the start of every call.
    pub fn on_call(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_call.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn contents(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.content).collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Times a call started while another call for the same message was in flight.
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }
}

struct InFlight<'a> {
    set: &'a Mutex<HashSet<String>>,
    key: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.lock().unwrap().remove(&self.key);
    }
}

#[async_trait]
impl Delivery for MockDelivery {
    async fn deliver(&self, message: &OutgoingMessage) -> Result<DeliveryReceipt, DeliveryError> {
        if let Some(hook) = self.on_call.lock().unwrap().as_ref() {
            hook();
        }

        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Call {
                client_id: message.client_id.clone(),
                content: message.content.clone(),
                session_id: message.session_id.clone(),
                started: Instant::now(),
                finished: None,
            });
            calls.len() - 1
        };

        if !self.in_flight.lock().unwrap().insert(message.client_id.clone()) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        let _in_flight = InFlight {
            set: &self.in_flight,
            key: message.client_id.clone(),
        };

        let scripted = self.script.lock().unwrap().pop_front();

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let result = match scripted {
            None => Ok(DeliveryReceipt::default()),
            Some(Scripted::Ok(session)) => Ok(DeliveryReceipt {
                session_id: session.map(str::to_string),
            }),
            Some(Scripted::Transport) => Err(DeliveryError::Transport("connection reset".into())),
            Some(Scripted::Reject(status)) => Err(DeliveryError::from_status(status, "invalid message")),
            Some(Scripted::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(DeliveryReceipt::default())
            }
        };

        self.calls.lock().unwrap()[index].finished = Some(Instant::now());
        result
    }
}

/// Poll `cond` until it holds, failing the test after five seconds.
pub async fn wait_for(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Unwrap a drain that ran, failing the test on `Offline` or `AlreadyRunning`.
pub fn completed(outcome: DrainOutcome) -> DrainReport {
    match outcome {
        DrainOutcome::Completed(report) => report,
        other => panic!("expected a completed drain, got {other:?}"),
    }
}
