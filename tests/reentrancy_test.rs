mod helpers;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use courier::connectivity::ConnectivityObserver;
use courier::outbox::MessagePayload;
use courier::sync::DrainOutcome;
use helpers::{completed, fast_policy, manager, test_store, MockDelivery};

#[tokio::test]
async fn concurrent_drains_send_each_message_once() {
    let store = test_store();
    let observer = ConnectivityObserver::new(true);
    let delivery = MockDelivery::with_delay(Duration::from_millis(30));
    let manager = manager(&store, &observer, &delivery, fast_policy());

    let ids: Vec<i64> = ["A", "B", "C"]
        .iter()
        .map(|c| store.append(&MessagePayload::new(*c, Some("s1"))).unwrap().id)
        .collect();

    let (first, second) = tokio::join!(manager.drain(), manager.drain());

    let report = completed(first.unwrap());
    assert_eq!(report.delivered, ids);
    assert_eq!(report.cycles, 2, "the rejected call is folded into a rerun");
    assert_eq!(second.unwrap(), DrainOutcome::AlreadyRunning);

    assert_eq!(delivery.contents(), vec!["A", "B", "C"]);
    assert_eq!(delivery.overlaps(), 0);
    assert!(store.list_all().unwrap().is_empty());
}

#[tokio::test]
async fn message_enqueued_mid_drain_is_picked_up_by_the_rerun() {
    let store = test_store();
    let observer = ConnectivityObserver::new(true);
    let delivery = MockDelivery::with_delay(Duration::from_millis(30));
    let manager = manager(&store, &observer, &delivery, fast_policy());

    store.append(&MessagePayload::new("early", None)).unwrap();

    let late = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        manager.enqueue(MessagePayload::new("late", None)).await.unwrap();
        manager.drain().await.unwrap()
    };
    let (first, second) = tokio::join!(manager.drain(), late);

    assert_eq!(second, DrainOutcome::AlreadyRunning);
    let report = completed(first.unwrap());
    assert_eq!(report.delivered.len(), 2);
    assert_eq!(delivery.contents(), vec!["early", "late"]);
}

#[tokio::test]
async fn calls_never_overlap_in_time() {
    let store = test_store();
    let observer = ConnectivityObserver::new(true);
    let delivery = MockDelivery::with_delay(Duration::from_millis(10));
    let manager = manager(&store, &observer, &delivery, fast_policy());

    for i in 0..5 {
        store.append(&MessagePayload::new(format!("m{i}"), None)).unwrap();
    }

    let (a, b, c) = tokio::join!(manager.drain(), manager.drain(), manager.drain());
    for outcome in [a, b, c] {
        outcome.unwrap();
    }

    let calls = delivery.calls();
    assert_eq!(calls.len(), 5);
    for pair in calls.windows(2) {
        let finished = pair[0].finished.expect("call finished");
        assert!(pair[1].started >= finished, "a call started before the previous one finished");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn worker_connectivity_flaps_and_manual_drains_race_safely() {
    let store = test_store();
    let observer = ConnectivityObserver::new(true);
    let delivery = MockDelivery::with_delay(Duration::from_millis(2));
    let manager = manager(&store, &observer, &delivery, fast_policy());
    let handle = manager.start();

    let flapper = {
        let observer = observer.clone();
        tokio::spawn(async move {
            for i in 0..40 {
                observer.set_online(i % 2 == 1);
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
    };

    let drainer = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            for _ in 0..20 {
                manager.drain().await.unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    let mut enqueuers = Vec::new();
    for t in 0..4 {
        let manager = Arc::clone(&manager);
        enqueuers.push(tokio::spawn(async move {
            let mut queued = Vec::new();
            for i in 0..5 {
                let m = manager
                    .enqueue(MessagePayload::new(format!("t{t}-{i}"), None))
                    .await
                    .unwrap();
                queued.push((m.id, m.client_id));
            }
            queued
        }));
    }

    let mut queued = Vec::new();
    for task in enqueuers {
        queued.extend(task.await.unwrap());
    }
    flapper.await.unwrap();
    drainer.await.unwrap();

    observer.set_online(true);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !store.list_all().unwrap().is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "outbox never drained");
        manager.drain().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    handle.shutdown().await;

    queued.sort_by_key(|(id, _)| *id);
    let expected: Vec<String> = queued.into_iter().map(|(_, client_id)| client_id).collect();
    let sent: Vec<String> = delivery.calls().into_iter().map(|c| c.client_id).collect();

    assert_eq!(sent.len(), 20);
    assert_eq!(sent.iter().collect::<HashSet<_>>().len(), 20, "a message was sent twice");
    assert_eq!(sent, expected, "delivery order must follow enqueue order");
    assert_eq!(delivery.overlaps(), 0);
}
