//! Integration tests for the coordinator, executor and fakes together.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stride_engine::{
    spawn_probe_loop, ConnectivityMonitor, DeliveryError, EventKind, HttpClient, HttpEndpoint,
    HttpRequest, HttpResponse, RemoteEndpoint, SyncCoordinator, SyncEvent, SyncStatus,
    TerminalError, TriggerOutcome,
};
use stride_oplog::{DeadLetterReason, ManualClock, OperationLog};
use stride_testkit::prelude::*;

fn record<E: RemoteEndpoint + 'static>(
    coordinator: &SyncCoordinator<E>,
    kind: EventKind,
) -> Arc<Mutex<Vec<SyncEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _ = coordinator.subscribe(kind, move |event| sink.lock().push(event.clone()));
    seen
}

fn transitions(events: &[SyncEvent]) -> Vec<(SyncStatus, SyncStatus)> {
    events
        .iter()
        .filter_map(|event| match event {
            SyncEvent::StatusChanged { from, to } => Some((*from, *to)),
            _ => None,
        })
        .collect()
}

/// Settles spawned work without moving past any display window.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn offline_operations_drain_once_back_online() {
    let harness = TestHarness::new(ScriptedEndpoint::new());
    let coordinator = &harness.coordinator;
    coordinator.start();
    let statuses = record(coordinator, EventKind::StatusChanged);

    harness.monitor.report(false);
    for n in 0..3u8 {
        coordinator
            .enqueue("task.complete", Some(format!("task-{n}")), vec![n])
            .unwrap();
    }
    assert_eq!(coordinator.trigger_sync(), TriggerOutcome::Offline);
    assert_eq!(coordinator.pending_count(), 3);

    harness.monitor.report(true);
    settle().await;

    assert_eq!(coordinator.pending_count(), 0);
    assert_eq!(coordinator.current_status(), SyncStatus::Success);
    assert_eq!(
        transitions(&statuses.lock()),
        vec![
            (SyncStatus::Idle, SyncStatus::Syncing),
            (SyncStatus::Syncing, SyncStatus::Success),
        ]
    );

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(coordinator.current_status(), SyncStatus::Idle);
    assert_eq!(
        transitions(&statuses.lock()).last(),
        Some(&(SyncStatus::Success, SyncStatus::Idle))
    );
    assert_eq!(coordinator.history().len(), 1);
    assert_eq!(coordinator.history()[0].item_count, 3);
}

#[tokio::test(start_paused = true)]
async fn persistent_server_errors_keep_the_operation() {
    let harness = TestHarness::new(ScriptedEndpoint::always(Err(DeliveryError::server(
        500,
        "internal error",
    ))));
    let coordinator = &harness.coordinator;
    let statuses = record(coordinator, EventKind::StatusChanged);
    let op = coordinator.enqueue("task.complete", None, vec![]).unwrap();

    for _ in 0..5 {
        let report = coordinator.sync_now().await.unwrap();
        assert_eq!(report.retried, 1);
        harness.advance(Duration::from_secs(61)).await;
    }

    let stored = harness.log.log.get(op.id).unwrap();
    assert_eq!(stored.attempts, 5);
    assert!(stored.last_error.unwrap().contains("500"));

    let history = coordinator.history();
    assert_eq!(history.len(), 5);
    assert!(history.iter().all(|e| e.status == SyncStatus::Error));
    assert_eq!(coordinator.current_status(), SyncStatus::Idle);

    let trace = transitions(&statuses.lock());
    assert_eq!(
        trace[..3],
        [
            (SyncStatus::Idle, SyncStatus::Syncing),
            (SyncStatus::Syncing, SyncStatus::Error),
            (SyncStatus::Error, SyncStatus::Idle),
        ]
    );
    assert_eq!(harness.endpoint.call_count(), 5);
}

struct StatusClient {
    status: AtomicU16,
    requests: Mutex<Vec<HttpRequest>>,
}

impl StatusClient {
    fn new(status: u16) -> Self {
        Self {
            status: AtomicU16::new(status),
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl HttpClient for StatusClient {
    async fn post(&self, request: HttpRequest) -> Result<HttpResponse, String> {
        self.requests.lock().push(request);
        Ok(HttpResponse {
            status: self.status.load(Ordering::SeqCst),
            body: b"title is required".to_vec(),
        })
    }
}

#[tokio::test(start_paused = true)]
async fn validation_failure_dead_letters_and_notifies() {
    let harness = TestHarness::new(HttpEndpoint::new(
        "https://api.stride.test",
        StatusClient::new(422),
    ));
    let coordinator = &harness.coordinator;
    let letters = record(coordinator, EventKind::DeadLettered);
    let history = record(coordinator, EventKind::HistoryAppended);
    let op = coordinator
        .enqueue("reflection.create", Some("r-7".into()), b"{}".to_vec())
        .unwrap();

    let report = coordinator.sync_now().await.unwrap();

    assert_eq!(report.dead_lettered, 1);
    assert_eq!(coordinator.pending_count(), 0);
    assert_eq!(coordinator.dead_letters().len(), 1);
    assert_eq!(coordinator.stats().operations_dead_lettered, 1);

    let letters = letters.lock();
    assert_eq!(letters.len(), 1);
    match &letters[0] {
        SyncEvent::DeadLettered(letter) => {
            assert_eq!(letter.operation.id, op.id);
            assert_eq!(letter.reason, DeadLetterReason::Rejected);
            assert_eq!(letter.error.as_deref(), Some("validation failed: title is required"));
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(history.lock().len(), 1);

    let requests = harness.endpoint.client().requests.lock();
    assert_eq!(requests[0].url, "https://api.stride.test/reflection.create");
    let key = op.idempotency_key.to_string();
    assert_eq!(requests[0].header("Idempotency-Key"), Some(key.as_str()));
}

#[tokio::test(start_paused = true)]
async fn requeued_dead_letter_is_delivered() {
    let harness = TestHarness::new(HttpEndpoint::new(
        "https://api.stride.test",
        StatusClient::new(422),
    ));
    let coordinator = &harness.coordinator;
    let op = coordinator.enqueue("task.create", None, vec![1]).unwrap();
    coordinator.sync_now().await.unwrap();
    assert_eq!(coordinator.pending_count(), 0);

    harness.endpoint.client().status.store(201, Ordering::SeqCst);
    let requeued = coordinator.requeue_dead_letter(op.id).unwrap().unwrap();
    assert!(requeued.id > op.id);
    assert_eq!(requeued.idempotency_key, op.idempotency_key);
    assert_eq!(coordinator.pending_count(), 1);

    let report = coordinator.sync_now().await.unwrap();
    assert!(report.is_clean());
    assert!(coordinator.dead_letters().is_empty());
}

#[tokio::test(start_paused = true)]
async fn discarded_dead_letter_is_gone() {
    let harness = TestHarness::new(ScriptedEndpoint::always(Err(DeliveryError::Conflict(
        "version mismatch".into(),
    ))));
    let coordinator = &harness.coordinator;
    let op = coordinator.enqueue("avatar.update", None, vec![]).unwrap();
    coordinator.sync_now().await.unwrap();

    assert_eq!(coordinator.dead_letters()[0].reason, DeadLetterReason::Conflict);
    assert!(coordinator.discard_dead_letter(op.id).unwrap());
    assert!(!coordinator.discard_dead_letter(op.id).unwrap());
    assert!(coordinator.dead_letters().is_empty());
}

#[tokio::test(start_paused = true)]
async fn concurrent_triggers_share_one_run() {
    let endpoint = ScriptedEndpoint::new();
    endpoint.set_latency(Duration::from_secs(5));
    let harness = TestHarness::new(endpoint);
    let coordinator = &harness.coordinator;
    for _ in 0..3 {
        coordinator.enqueue("task.complete", None, vec![]).unwrap();
    }

    assert_eq!(coordinator.trigger_sync(), TriggerOutcome::Started);
    for _ in 0..10 {
        assert_eq!(coordinator.trigger_sync(), TriggerOutcome::AlreadySyncing);
    }
    let (a, b) = tokio::join!(coordinator.sync_now(), coordinator.sync_now());

    assert_eq!(a, b);
    assert_eq!(a.unwrap().processed, 3);
    assert_eq!(coordinator.stats().runs, 1);
    assert_eq!(harness.endpoint.call_count(), 3);
    assert_eq!(harness.endpoint.max_in_flight(), 1);
}

#[tokio::test(start_paused = true)]
async fn independent_entities_are_delivered_concurrently() {
    let endpoint = ScriptedEndpoint::new();
    endpoint.set_latency(Duration::from_secs(1));
    let harness = TestHarness::new(endpoint);
    let coordinator = &harness.coordinator;
    for n in 0..4 {
        coordinator
            .enqueue("task.complete", Some(format!("task-{n}")), vec![])
            .unwrap();
    }

    let report = coordinator.sync_now().await.unwrap();

    assert_eq!(report.processed, 4);
    assert_eq!(harness.endpoint.max_in_flight(), 4);
    assert!(report.duration < Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn same_entity_order_survives_failures() {
    let endpoint = ScriptedEndpoint::new();
    for n in 0..12 {
        if n % 3 == 0 {
            endpoint.push(Err(DeliveryError::Timeout));
        } else {
            endpoint.push(Ok(()));
        }
    }
    let harness = TestHarness::new(endpoint);
    let coordinator = &harness.coordinator;

    let mut expected: Vec<(String, u64)> = Vec::new();
    for n in 0..15u64 {
        let entity = format!("entity-{}", n % 3);
        let op = coordinator
            .enqueue("task.complete", Some(entity.clone()), vec![])
            .unwrap();
        expected.push((entity, op.id));
    }

    for _ in 0..20 {
        if coordinator.pending_count() == 0 {
            break;
        }
        coordinator.sync_now().await;
        harness.advance(Duration::from_secs(61)).await;
    }
    assert_eq!(coordinator.pending_count(), 0);

    let delivered = harness.endpoint.deliveries();
    for entity in ["entity-0", "entity-1", "entity-2"] {
        let order: Vec<u64> = delivered
            .iter()
            .filter(|d| d.succeeded && d.entity.as_deref() == Some(entity))
            .map(|d| d.id)
            .collect();
        let want: Vec<u64> = expected
            .iter()
            .filter(|(e, _)| e == entity)
            .map(|(_, id)| *id)
            .collect();
        assert_eq!(order, want, "order for {entity}");
    }
}

#[tokio::test(start_paused = true)]
async fn lost_acknowledgements_do_not_duplicate_remote_state() {
    let remote = IdempotentRemote::new();
    remote.lose_next_acks(2);
    let harness = TestHarness::new(remote);
    let coordinator = &harness.coordinator;
    for n in 0..3u8 {
        coordinator.enqueue("battlepass.claim", None, vec![n]).unwrap();
    }

    for _ in 0..5 {
        if coordinator.pending_count() == 0 {
            break;
        }
        coordinator.sync_now().await;
        harness.advance(Duration::from_secs(61)).await;
    }

    assert_eq!(coordinator.pending_count(), 0);
    let applied = harness.endpoint.applied();
    assert_eq!(
        applied.iter().map(|r| r.payload[0]).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert_eq!(harness.endpoint.duplicate_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn auth_failure_blocks_until_credentials_refresh() {
    let harness = TestHarness::new(ScriptedEndpoint::always(Err(DeliveryError::Auth(
        "token expired".into(),
    ))));
    let coordinator = &harness.coordinator;
    coordinator.start();
    coordinator.enqueue("task.complete", None, vec![]).unwrap();
    coordinator.enqueue("task.complete", None, vec![]).unwrap();

    let report = coordinator.sync_now().await.unwrap();
    assert!(matches!(report.terminal_error, Some(TerminalError::Auth(_))));
    assert_eq!(harness.endpoint.call_count(), 1);
    assert_eq!(coordinator.current_status(), SyncStatus::Error);
    assert!(coordinator.is_auth_blocked());

    harness.monitor.report(false);
    harness.monitor.report(true);
    assert_eq!(coordinator.trigger_sync(), TriggerOutcome::AuthBlocked);
    harness.advance(Duration::from_secs(90)).await;
    assert_eq!(coordinator.stats().runs, 1);

    harness.endpoint.set_fallback(Ok(()));
    assert_eq!(coordinator.credentials_refreshed(), TriggerOutcome::Started);
    settle().await;
    assert_eq!(coordinator.pending_count(), 0);
    assert_eq!(coordinator.current_status(), SyncStatus::Success);
}

#[tokio::test(start_paused = true)]
async fn storage_failure_ends_run_with_error() {
    let store = FaultyStore::new();
    let switch = store.switch();
    let clock = Arc::new(ManualClock::new(FIXTURE_EPOCH_MILLIS));
    let log = Arc::new(OperationLog::open(Box::new(store), clock.clone()).unwrap());
    let monitor = ConnectivityMonitor::with_dwell(clock, Duration::ZERO);
    let endpoint = Arc::new(ScriptedEndpoint::new());
    let coordinator =
        SyncCoordinator::new(log.clone(), monitor, endpoint.clone(), test_config()).unwrap();
    coordinator.enqueue("task.complete", None, vec![]).unwrap();

    switch.fail_always(Fault::Unavailable);
    let report = coordinator.sync_now().await.unwrap();

    assert!(matches!(report.terminal_error, Some(TerminalError::Storage(_))));
    assert_eq!(switch.failures(), 3);
    assert_eq!(coordinator.current_status(), SyncStatus::Error);
    assert_eq!(log.count(), 1);
    assert!(!coordinator.is_auth_blocked());

    switch.heal();
    let report = coordinator.sync_now().await.unwrap();
    assert!(report.is_clean());
    assert_eq!(endpoint.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn transient_storage_failure_is_retried() {
    let store = FaultyStore::new();
    let switch = store.switch();
    let clock = Arc::new(ManualClock::new(FIXTURE_EPOCH_MILLIS));
    let log = Arc::new(OperationLog::open(Box::new(store), clock.clone()).unwrap());
    let monitor = ConnectivityMonitor::with_dwell(clock, Duration::ZERO);
    let coordinator = SyncCoordinator::new(
        log.clone(),
        monitor,
        Arc::new(ScriptedEndpoint::new()),
        test_config(),
    )
    .unwrap();
    coordinator.enqueue("task.complete", None, vec![]).unwrap();

    switch.fail_next(Fault::Unavailable, 1);
    let report = coordinator.sync_now().await.unwrap();

    assert!(report.is_clean());
    assert_eq!(switch.failures(), 1);
}

#[tokio::test(start_paused = true)]
async fn periodic_timer_retries_after_backoff() {
    let endpoint = ScriptedEndpoint::new();
    endpoint.push(Err(DeliveryError::Timeout));
    let harness = TestHarness::new(endpoint);
    let coordinator = &harness.coordinator;
    coordinator.start();
    coordinator.enqueue("task.complete", None, vec![]).unwrap();

    let first = coordinator.sync_now().await.unwrap();
    assert_eq!(first.retried, 1);

    harness.advance(Duration::from_secs(31)).await;
    settle().await;

    assert_eq!(coordinator.stats().runs, 2);
    assert_eq!(coordinator.pending_count(), 0);
    coordinator.shutdown();
}

#[tokio::test(start_paused = true)]
async fn enqueue_triggers_when_configured() {
    let harness = TestHarness::with_config(
        ScriptedEndpoint::new(),
        test_config().with_sync_on_enqueue(true),
    );
    let coordinator = &harness.coordinator;
    let counts = record(coordinator, EventKind::PendingCountChanged);

    coordinator.enqueue("task.complete", None, vec![]).unwrap();
    settle().await;

    assert_eq!(coordinator.pending_count(), 0);
    let counts: Vec<usize> = counts
        .lock()
        .iter()
        .filter_map(|e| match e {
            SyncEvent::PendingCountChanged(n) => Some(*n),
            _ => None,
        })
        .collect();
    assert_eq!(counts.first(), Some(&1));
    assert_eq!(counts.last(), Some(&0));
}

#[tokio::test(start_paused = true)]
async fn progress_reaches_one_hundred() {
    let harness = TestHarness::new(ScriptedEndpoint::new());
    let coordinator = &harness.coordinator;
    let progress = record(coordinator, EventKind::ProgressChanged);
    for _ in 0..4 {
        coordinator.enqueue("task.complete", None, vec![]).unwrap();
    }

    coordinator.sync_now().await.unwrap();

    let values: Vec<u8> = progress
        .lock()
        .iter()
        .filter_map(|e| match e {
            SyncEvent::ProgressChanged(p) => Some(*p),
            _ => None,
        })
        .collect();
    assert_eq!(values, vec![0, 25, 50, 75, 100]);
    assert_eq!(coordinator.progress(), 100);
}

#[tokio::test(start_paused = true)]
async fn panicking_subscriber_does_not_break_the_engine() {
    let harness = TestHarness::new(ScriptedEndpoint::new());
    let coordinator = &harness.coordinator;
    let _ = coordinator.subscribe(EventKind::StatusChanged, |_| panic!("subscriber bug"));
    let statuses = record(coordinator, EventKind::StatusChanged);
    coordinator.enqueue("task.complete", None, vec![]).unwrap();

    let report = coordinator.sync_now().await.unwrap();

    assert!(report.is_clean());
    assert_eq!(transitions(&statuses.lock()).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn history_is_bounded() {
    let harness = TestHarness::with_config(
        ScriptedEndpoint::new(),
        test_config().with_history_capacity(3),
    );
    let coordinator = &harness.coordinator;

    for n in 0..5usize {
        for _ in 0..=n {
            coordinator.enqueue("task.complete", None, vec![]).unwrap();
        }
        coordinator.sync_now().await.unwrap();
    }

    let counts: Vec<usize> = coordinator.history().iter().map(|e| e.item_count).collect();
    assert_eq!(counts, vec![3, 4, 5]);
}

#[tokio::test(start_paused = true)]
async fn probe_loop_drives_sync() {
    let harness = TestHarness::new(ScriptedEndpoint::new());
    let coordinator = &harness.coordinator;
    coordinator.start();

    let probe = ScriptedProbe::new();
    probe.feed([Some(false)]);
    let handle = spawn_probe_loop(&harness.monitor, probe.clone(), Duration::from_secs(1));
    settle().await;
    assert!(!harness.monitor.is_online());

    coordinator.enqueue("task.complete", None, vec![]).unwrap();
    coordinator.enqueue("task.complete", None, vec![]).unwrap();
    assert_eq!(coordinator.pending_count(), 2);

    probe.set(Some(true));
    tokio::time::sleep(Duration::from_millis(1_100)).await;

    assert!(harness.monitor.is_online());
    assert_eq!(coordinator.pending_count(), 0);
    handle.abort();
}

#[tokio::test(start_paused = true)]
async fn pending_operations_survive_restart() {
    let mut fixture = TestLog::file();
    {
        let monitor = ConnectivityMonitor::with_dwell(fixture.clock.clone(), Duration::ZERO);
        monitor.report(false);
        let coordinator = SyncCoordinator::new(
            fixture.log.clone(),
            monitor,
            ScriptedEndpoint::new(),
            test_config(),
        )
        .unwrap();
        coordinator.enqueue("task.complete", Some("t-1".into()), vec![1]).unwrap();
        coordinator.enqueue("task.complete", Some("t-1".into()), vec![2]).unwrap();
        assert_eq!(coordinator.trigger_sync(), TriggerOutcome::Offline);
    }

    fixture.restart();
    assert_eq!(fixture.log.count(), 2);

    let monitor = ConnectivityMonitor::with_dwell(fixture.clock.clone(), Duration::ZERO);
    let endpoint = Arc::new(ScriptedEndpoint::new());
    let coordinator =
        SyncCoordinator::new(fixture.log.clone(), monitor, endpoint.clone(), test_config())
            .unwrap();
    let report = coordinator.sync_now().await.unwrap();

    assert_eq!(report.processed, 2);
    assert_eq!(endpoint.delivered_ids(), vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn run_inside_display_window_passes_through_idle() {
    let harness = TestHarness::new(ScriptedEndpoint::new());
    let coordinator = &harness.coordinator;
    let statuses = record(coordinator, EventKind::StatusChanged);

    coordinator.enqueue("task.complete", None, vec![1]).unwrap();
    coordinator.sync_now().await.unwrap();
    harness.advance(Duration::from_millis(400)).await;
    assert_eq!(coordinator.current_status(), SyncStatus::Success);

    coordinator.enqueue("task.complete", None, vec![2]).unwrap();
    coordinator.sync_now().await.unwrap();
    harness.advance(Duration::from_millis(700)).await;
    assert_eq!(coordinator.current_status(), SyncStatus::Success);

    harness.advance(Duration::from_secs(1)).await;
    assert_eq!(coordinator.current_status(), SyncStatus::Idle);
    assert_eq!(
        transitions(&statuses.lock()),
        vec![
            (SyncStatus::Idle, SyncStatus::Syncing),
            (SyncStatus::Syncing, SyncStatus::Success),
            (SyncStatus::Success, SyncStatus::Idle),
            (SyncStatus::Idle, SyncStatus::Syncing),
            (SyncStatus::Syncing, SyncStatus::Success),
            (SyncStatus::Success, SyncStatus::Idle),
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn status_events_arrive_in_commit_order_across_threads() {
    let harness = TestHarness::new(ScriptedEndpoint::new());
    let statuses = record(&harness.coordinator, EventKind::StatusChanged);

    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let coordinator = harness.coordinator.clone();
            tokio::spawn(async move {
                for n in 0..250u32 {
                    let entity = Some(format!("w{worker}"));
                    coordinator
                        .enqueue("task.complete", entity, n.to_le_bytes().to_vec())
                        .unwrap();
                    let _ = coordinator.sync_now().await;
                }
            })
        })
        .collect();
    for worker in workers {
        worker.await.unwrap();
    }

    let trace = transitions(&statuses.lock());
    assert!(!trace.is_empty());
    assert_eq!(trace[0].0, SyncStatus::Idle);
    for pair in trace.windows(2) {
        assert_eq!(pair[0].1, pair[1].0, "broken transition pair {pair:?}");
    }
    assert!(trace
        .iter()
        .all(|(from, to)| *to != SyncStatus::Syncing || *from == SyncStatus::Idle));
}

mod properties {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn paused_runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn every_operation_is_delivered_or_dead_lettered_in_lane_order(
            templates in op_templates_strategy(20),
            outcomes in prop::collection::vec(delivery_outcome_strategy(), 0..30),
        ) {
            let runtime = paused_runtime();
            runtime.block_on(async {
                let endpoint = ScriptedEndpoint::new();
                for outcome in outcomes {
                    endpoint.push(outcome);
                }
                let harness = TestHarness::new(endpoint);
                let coordinator = &harness.coordinator;

                let mut lanes: BTreeMap<(String, Option<String>), Vec<u64>> = BTreeMap::new();
                for template in &templates {
                    let op = coordinator
                        .enqueue(
                            template.kind.clone(),
                            template.entity.clone(),
                            template.payload.clone(),
                        )
                        .unwrap();
                    lanes.entry((op.kind, op.entity)).or_default().push(op.id);
                }

                for _ in 0..50 {
                    if coordinator.pending_count() == 0 {
                        break;
                    }
                    coordinator.sync_now().await;
                    harness.advance(Duration::from_secs(61)).await;
                }

                assert_eq!(coordinator.pending_count(), 0);
                let delivered = harness.endpoint.delivered_ids();
                assert_eq!(
                    delivered.len() + coordinator.dead_letters().len(),
                    templates.len()
                );

                let successes = harness.endpoint.deliveries();
                for ((kind, entity), ids) in &lanes {
                    let order: Vec<u64> = successes
                        .iter()
                        .filter(|d| d.succeeded && &d.kind == kind && &d.entity == entity)
                        .map(|d| d.id)
                        .collect();
                    let expected: Vec<u64> =
                        ids.iter().copied().filter(|id| order.contains(id)).collect();
                    assert_eq!(order, expected);
                }
            });
        }
    }
}
