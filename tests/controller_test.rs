//! Integration tests for the controller: boot, registry handling, debounced
//! rounds and inventory change detection, on tokio's paused clock.

mod common;

use common::{ScriptedSource, SetSwapFailure, record, records, register, unregister};
use regbot_controller::engine::{Controller, ControllerConfig, ControllerState};
use regbot_controller::error::{Error, Result};
use regbot_controller::model::AssignMessage;
use regbot_controller::store::{MemoryStore, SharedStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const CONTROL: &str = "reg-bot-controller";

fn controller(source: &Arc<ScriptedSource>, store: &Arc<MemoryStore>) -> Controller {
    Controller::new(source.clone(), store.clone(), ControllerConfig::default())
}

async fn ready(n: usize) -> (Controller, Arc<ScriptedSource>, Arc<MemoryStore>) {
    let source = Arc::new(ScriptedSource::new(records(n)));
    let store = Arc::new(MemoryStore::new());
    let mut ctrl = controller(&source, &store);
    assert_eq!(ctrl.initialize().await.unwrap(), n);
    (ctrl, source, store)
}

fn assigned(store: &MemoryStore, channel: &str) -> Vec<AssignMessage> {
    store
        .published_on(channel)
        .iter()
        .map(|p| serde_json::from_str(p).unwrap())
        .collect()
}

// ---------------------------------------------------------------------------
// Boot
// ---------------------------------------------------------------------------

#[tokio::test]
async fn initialize_stores_inventory_and_becomes_ready() {
    let (ctrl, _source, store) = ready(4).await;

    assert_eq!(ctrl.state(), ControllerState::Idle);
    assert!(ctrl.ensure_ready().is_ok());
    assert!(ctrl.digest().is_some());

    let mut members = store.members("msisdns").await.unwrap();
    members.sort();
    assert_eq!(members.len(), 4);
    let stored = store.value("msisdn:1555000002").expect("record stored");
    assert_eq!(
        serde_json::from_str::<regbot_controller::model::SubscriberRecord>(&stored).unwrap(),
        record("1555000002")
    );
}

#[tokio::test]
async fn empty_inventory_still_becomes_ready() {
    let (ctrl, _source, _store) = ready(0).await;
    assert_eq!(ctrl.state(), ControllerState::Idle);
}

#[tokio::test]
async fn source_failure_leaves_controller_unready() {
    let source = Arc::new(ScriptedSource::new(records(3)));
    source.set_failing(true);
    let store = Arc::new(MemoryStore::new());
    let mut ctrl = controller(&source, &store);

    assert!(ctrl.initialize().await.is_err());
    assert_eq!(ctrl.state(), ControllerState::Initializing);
    assert!(matches!(ctrl.ensure_ready(), Err(Error::Invariant(_))));
    assert!(matches!(ctrl.run().await, Err(Error::Invariant(_))));
}

#[tokio::test]
async fn duplicate_msisdns_fail_initialization() {
    let source = Arc::new(ScriptedSource::new(vec![record("1"), record("1")]));
    let store = Arc::new(MemoryStore::new());
    let mut ctrl = controller(&source, &store);

    let err = ctrl.initialize().await.unwrap_err();
    assert!(err.is_fatal(), "expected invariant error, got {err}");
    assert_eq!(ctrl.state(), ControllerState::Initializing);
}

#[tokio::test]
async fn initialize_twice_is_rejected() {
    let (mut ctrl, _source, _store) = ready(1).await;
    assert!(matches!(ctrl.initialize().await, Err(Error::Invariant(_))));
}

// ---------------------------------------------------------------------------
// Control messages
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn register_moves_to_pending_and_arms_window() {
    let (mut ctrl, _source, _store) = ready(4).await;
    let t0 = tokio::time::Instant::now();

    ctrl.handle_message(&register("w1")).unwrap();
    assert_eq!(ctrl.state(), ControllerState::PendingAssignment);
    assert_eq!(ctrl.workers(), vec!["w1".to_string()]);
    assert_eq!(ctrl.assignment_deadline(), Some(t0 + Duration::from_secs(10)));
}

#[tokio::test(start_paused = true)]
async fn duplicate_register_is_a_checkin() {
    let (mut ctrl, _source, _store) = ready(4).await;
    let t0 = tokio::time::Instant::now();
    ctrl.handle_message(&register("w1")).unwrap();

    tokio::time::advance(Duration::from_secs(5)).await;
    ctrl.handle_message(&register("w1")).unwrap();

    assert_eq!(ctrl.workers().len(), 1);
    assert_eq!(ctrl.assignment_deadline(), Some(t0 + Duration::from_secs(10)));
}

#[tokio::test]
async fn malformed_messages_are_dropped() {
    let (mut ctrl, _source, _store) = ready(4).await;
    let unknown = unregister("nobody");

    for payload in [
        "not json",
        "[1, 2, 3]",
        r#"{"action": "dance", "channel": "w1"}"#,
        r#"{"channel": "w1"}"#,
        r#"{"action": "register"}"#,
        r#"{"action": "register", "channel": ""}"#,
        r#"{"action": "unregister"}"#,
        unknown.as_str(),
    ] {
        ctrl.handle_message(payload).unwrap();
        assert_eq!(ctrl.state(), ControllerState::Idle, "after {payload}");
    }
    assert!(ctrl.workers().is_empty());
    assert!(ctrl.assignment_deadline().is_none());
}

#[tokio::test(start_paused = true)]
async fn unregister_keeps_order_of_remaining_workers() {
    let (mut ctrl, _source, _store) = ready(4).await;
    for w in ["w1", "w2", "w3"] {
        ctrl.handle_message(&register(w)).unwrap();
    }
    ctrl.handle_message(&unregister("w2")).unwrap();

    assert_eq!(ctrl.workers(), vec!["w1".to_string(), "w3".to_string()]);
    assert_eq!(ctrl.state(), ControllerState::PendingAssignment);
}

#[tokio::test(start_paused = true)]
async fn last_unregister_goes_straight_to_idle() {
    let (mut ctrl, _source, store) = ready(4).await;
    ctrl.handle_message(&register("w1")).unwrap();
    tokio::time::advance(Duration::from_secs(2)).await;
    ctrl.handle_message(&unregister("w1")).unwrap();

    assert_eq!(ctrl.state(), ControllerState::Idle);
    assert!(ctrl.assignment_deadline().is_none());

    tokio::time::advance(Duration::from_secs(30)).await;
    assert!(ctrl.run_due_assignment().await.unwrap().is_none());
    assert!(store.published_on("w1").is_empty());
}

// ---------------------------------------------------------------------------
// Debounced rounds
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn round_waits_for_a_quiet_window() {
    let (mut ctrl, _source, store) = ready(10).await;
    ctrl.handle_message(&register("w1")).unwrap();
    tokio::time::advance(Duration::from_secs(6)).await;
    ctrl.handle_message(&register("w2")).unwrap();
    tokio::time::advance(Duration::from_secs(6)).await;
    ctrl.handle_message(&register("w3")).unwrap();

    // 12s after w1 but only 0s after w3
    assert!(ctrl.run_due_assignment().await.unwrap().is_none());
    assert_eq!(ctrl.state(), ControllerState::PendingAssignment);

    tokio::time::advance(Duration::from_secs(9)).await;
    assert!(ctrl.run_due_assignment().await.unwrap().is_none());

    tokio::time::advance(Duration::from_secs(1)).await;
    let summary = ctrl.run_due_assignment().await.unwrap().expect("round due");
    assert_eq!(summary.workers_assigned, 3);
    assert_eq!(ctrl.state(), ControllerState::Idle);

    let sizes: Vec<usize> = ["w1", "w2", "w3"]
        .iter()
        .map(|w| assigned(&store, w)[0].users.len())
        .collect();
    assert_eq!(sizes, vec![4, 3, 3]);
}

#[tokio::test(start_paused = true)]
async fn failed_round_still_returns_to_idle() {
    let (mut ctrl, _source, store) = ready(5).await;
    ctrl.handle_message(&register("w1")).unwrap();
    tokio::time::advance(Duration::from_secs(10)).await;

    store.set_failing(true);
    let summary = ctrl.run_due_assignment().await.unwrap().expect("round due");
    assert_eq!(summary.workers_assigned, 0);
    assert_eq!(ctrl.state(), ControllerState::Idle);

    // Still responsive afterwards
    store.set_failing(false);
    ctrl.handle_message(&register("w2")).unwrap();
    assert_eq!(ctrl.state(), ControllerState::PendingAssignment);
}

#[tokio::test(start_paused = true)]
async fn watch_reports_state_changes() {
    let (mut ctrl, _source, _store) = ready(2).await;
    let rx = ctrl.watch_state();
    assert_eq!(*rx.borrow(), ControllerState::Idle);

    ctrl.handle_message(&register("w1")).unwrap();
    assert_eq!(*rx.borrow(), ControllerState::PendingAssignment);

    tokio::time::advance(Duration::from_secs(10)).await;
    ctrl.run_due_assignment().await.unwrap();
    assert_eq!(*rx.borrow(), ControllerState::Idle);
}

// ---------------------------------------------------------------------------
// Change detection
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn unchanged_inventory_keeps_registry() {
    let (mut ctrl, _source, _store) = ready(3).await;
    ctrl.handle_message(&register("w1")).unwrap();

    assert!(!ctrl.check_inventory().await.unwrap());
    assert_eq!(ctrl.workers().len(), 1);
    assert_eq!(ctrl.state(), ControllerState::PendingAssignment);
}

#[tokio::test(start_paused = true)]
async fn changed_inventory_clears_registry_and_cancels_round() {
    let (mut ctrl, source, store) = ready(3).await;
    let before = ctrl.digest().unwrap().to_string();
    ctrl.handle_message(&register("w1")).unwrap();

    let mut updated = records(3);
    updated[1].sip_password = Some("rotated".to_string());
    source.set(updated);

    assert!(ctrl.check_inventory().await.unwrap());
    assert_ne!(ctrl.digest().unwrap(), before);
    assert!(ctrl.workers().is_empty());
    assert_eq!(ctrl.state(), ControllerState::Idle);
    assert!(ctrl.assignment_deadline().is_none());

    tokio::time::advance(Duration::from_secs(30)).await;
    assert!(ctrl.run_due_assignment().await.unwrap().is_none());
    assert!(store.published_on("w1").is_empty());

    let stored = store.value("msisdn:1555000001").unwrap();
    assert!(stored.contains("rotated"));
}

#[tokio::test]
async fn changed_inventory_replaces_entries_wholesale() {
    let (mut ctrl, source, store) = ready(3).await;
    source.set(vec![record("1555000002"), record("1555999999")]);

    assert!(ctrl.check_inventory().await.unwrap());
    let mut members = store.members("msisdns").await.unwrap();
    members.sort();
    assert_eq!(members, vec!["1555000002", "1555999999"]);
    assert!(store.value("msisdn:1555000000").is_none());
    assert!(store.value("msisdn:1555999999").is_some());
}

#[tokio::test]
async fn failed_check_keeps_previous_snapshot() {
    let (mut ctrl, source, _store) = ready(3).await;
    let before = ctrl.digest().unwrap().to_string();
    source.set_failing(true);

    assert!(ctrl.check_inventory().await.is_err());
    assert_eq!(ctrl.digest().unwrap(), before);
    assert_eq!(ctrl.state(), ControllerState::Idle);
}

#[tokio::test(start_paused = true)]
async fn store_heals_after_a_failed_adoption() {
    let source = Arc::new(ScriptedSource::new(records(3)));
    let store = Arc::new(SetSwapFailure::default());
    let mut ctrl = Controller::new(source.clone(), store.clone(), ControllerConfig::default());
    ctrl.initialize().await.unwrap();

    source.set(records(4));
    store.set_failing(true);
    assert!(matches!(
        ctrl.check_inventory().await,
        Err(Error::StoreUnavailable(_))
    ));
    assert!(ctrl.digest().is_none());
    assert!(store.inner.value("msisdn:1555000000").is_some());

    // Source reverts to what was adopted before the failure
    store.set_failing(false);
    source.set(records(3));
    assert!(ctrl.check_inventory().await.unwrap());
    assert!(ctrl.digest().is_some());

    ctrl.handle_message(&register("w1")).unwrap();
    tokio::time::advance(Duration::from_secs(10)).await;
    let summary = ctrl.run_due_assignment().await.unwrap().expect("round due");
    assert_eq!(summary.workers_assigned, 1);
    assert_eq!(summary.msisdns_assigned, 3);
    assert_eq!(assigned(&store.inner, "w1")[0].users.len(), 3);
}

// ---------------------------------------------------------------------------
// Run loop
// ---------------------------------------------------------------------------

fn spawn_run(mut ctrl: Controller) -> JoinHandle<(Controller, Result<()>)> {
    tokio::spawn(async move {
        let result = ctrl.run().await;
        (ctrl, result)
    })
}

#[tokio::test(start_paused = true)]
async fn run_loop_assigns_after_registrations_settle() {
    let (ctrl, _source, store) = ready(10).await;
    let shutdown = ctrl.shutdown_handle();
    let handle = spawn_run(ctrl);

    for w in ["w1", "w2", "w3"] {
        store.publish(CONTROL, &register(w)).await.unwrap();
    }
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(store.published_on("w1").is_empty());

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(assigned(&store, "w1")[0].users.len(), 4);
    assert_eq!(assigned(&store, "w2")[0].users.len(), 3);
    assert_eq!(assigned(&store, "w3")[0].users.len(), 3);

    shutdown.notify_one();
    let (ctrl, result) = handle.await.unwrap();
    assert!(result.is_ok());
    assert_eq!(ctrl.state(), ControllerState::Idle);
}

#[tokio::test(start_paused = true)]
async fn run_loop_requires_reregistration_after_inventory_change() {
    let (ctrl, source, store) = ready(4).await;
    let shutdown = ctrl.shutdown_handle();
    let handle = spawn_run(ctrl);

    store.publish(CONTROL, &register("w1")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(assigned(&store, "w1").len(), 1);

    source.set(records(6));
    // First poll fires 120s after start; stay well past it
    tokio::time::sleep(Duration::from_secs(175)).await;
    assert_eq!(assigned(&store, "w1").len(), 1, "no round without re-registration");

    store.publish(CONTROL, &register("w1")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(11)).await;
    let rounds = assigned(&store, "w1");
    assert_eq!(rounds.len(), 2);
    assert_eq!(rounds[1].users.len(), 6);

    shutdown.notify_one();
    let (ctrl, result) = handle.await.unwrap();
    assert!(result.is_ok());
    assert_eq!(ctrl.workers(), vec!["w1".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn run_loop_polls_inventory_on_interval() {
    let (ctrl, source, _store) = ready(2).await;
    let shutdown = ctrl.shutdown_handle();
    let handle = spawn_run(ctrl);
    assert_eq!(source.calls(), 1);

    tokio::time::sleep(Duration::from_secs(121)).await;
    assert_eq!(source.calls(), 2);
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(source.calls(), 3);

    shutdown.notify_one();
    handle.await.unwrap().1.unwrap();
}

#[tokio::test(start_paused = true)]
async fn due_round_runs_before_queued_messages() {
    let (mut ctrl, _source, store) = ready(3).await;
    ctrl.handle_message(&register("w1")).unwrap();
    tokio::time::advance(Duration::from_secs(10)).await;

    // Queued while the round is already due
    for _ in 0..5 {
        store.publish(CONTROL, &register("w1")).await.unwrap();
    }
    store.publish(CONTROL, &unregister("w1")).await.unwrap();

    let shutdown = ctrl.shutdown_handle();
    let handle = spawn_run(ctrl);
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert_eq!(assigned(&store, "w1").len(), 1);
    assert_eq!(assigned(&store, "w1")[0].users.len(), 3);

    shutdown.notify_one();
    let (ctrl, result) = handle.await.unwrap();
    assert!(result.is_ok());
    assert!(ctrl.workers().is_empty());
    assert_eq!(ctrl.state(), ControllerState::Idle);
}
