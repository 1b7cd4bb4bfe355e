mod common;

use common::{wait_for, FakeTransport, OpenOutcome, Sent};
use parking_lot::Mutex;
use realtime::{
    BackoffConfig, ConnectionConfig, ConnectionManager, ConnectionState, StepRecord, StepStatus,
    TaskSnapshot, TaskStatus, TokioClock, UpdateSink,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn config() -> ConnectionConfig {
    ConnectionConfig::new("ws://test/ws/tasks/task-1").with_token("secret")
}

fn sink() -> UpdateSink {
    UpdateSink::new("task-1", TokioClock::shared())
}

fn running_snapshot(progress: u32) -> TaskSnapshot {
    TaskSnapshot::new("task-1", TaskStatus::Running).with_steps(vec![
        StepRecord::new("upload", 1, StepStatus::Completed, 100),
        StepRecord::new("parse", 2, StepStatus::Running, progress),
    ])
}

async fn wait_state(manager: &ConnectionManager, wanted: ConnectionState) {
    let mut rx = manager.watch_state();
    wait_for(&mut rx, |state| *state == wanted).await;
}

fn record_states(manager: &ConnectionManager) -> Arc<Mutex<Vec<ConnectionState>>> {
    let states = Arc::new(Mutex::new(Vec::new()));
    let captured = states.clone();
    manager.on_connection_state_change(move |state| captured.lock().push(state));
    states
}

#[tokio::test(start_paused = true)]
async fn test_open_sends_handshake_with_task_id() {
    let (transport, mut servers) = FakeTransport::new(OpenOutcome::Accept);
    let manager = ConnectionManager::spawn("task-1", transport.clone(), config(), sink());
    let states = record_states(&manager);

    let mut server = servers.recv().await.unwrap();
    assert_eq!(
        server.next_sent().await,
        Some(Sent::Text(r#"{"task_id":"task-1"}"#.to_string()))
    );
    wait_state(&manager, ConnectionState::Connected).await;

    let request = &transport.requests()[0];
    assert_eq!(request.url, "ws://test/ws/tasks/task-1");
    assert_eq!(request.token.as_deref(), Some("secret"));
    assert_eq!(
        *states.lock(),
        vec![ConnectionState::Connecting, ConnectionState::Connected]
    );
}

#[tokio::test(start_paused = true)]
async fn test_task_update_reaches_sink() {
    let (transport, mut servers) = FakeTransport::new(OpenOutcome::Accept);
    let sink = sink();
    let manager = ConnectionManager::spawn("task-1", transport, config(), sink.clone());

    let received = Arc::new(AtomicUsize::new(0));
    let counter = received.clone();
    manager.on_update(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let server = servers.recv().await.unwrap();
    server.send_update(&running_snapshot(40));

    let mut progress = sink.progress();
    wait_for(&mut progress, |view| view.overall_progress == 70).await;
    assert_eq!(received.load(Ordering::SeqCst), 1);
    assert_eq!(progress.borrow().current_step_name.as_deref(), Some("parse"));
}

#[tokio::test(start_paused = true)]
async fn test_bad_messages_are_dropped_without_disconnecting() {
    let (transport, mut servers) = FakeTransport::new(OpenOutcome::Accept);
    let sink = sink();
    let manager = ConnectionManager::spawn("task-1", transport.clone(), config(), sink.clone());

    let received = Arc::new(AtomicUsize::new(0));
    let counter = received.clone();
    manager.on_update(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let server = servers.recv().await.unwrap();
    server.send_text("not json at all");
    server.send_text(r#"{"event": "heartbeat"}"#);
    server.send_text(r#"{"event": "task_update", "data": {"task_id": "task-1"}}"#);
    server.send_update(&TaskSnapshot::new("task-2", TaskStatus::Running));
    server.send_update(&running_snapshot(10));

    let mut progress = sink.progress();
    wait_for(&mut progress, |view| view.overall_progress == 55).await;

    assert_eq!(received.load(Ordering::SeqCst), 1);
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(transport.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_end_in_failed() {
    let (transport, _servers) = FakeTransport::new(OpenOutcome::Fail);
    let manager = ConnectionManager::spawn("task-1", transport.clone(), config(), sink());
    let states = record_states(&manager);

    wait_state(&manager, ConnectionState::Failed).await;

    // initial attempt plus five retries
    assert_eq!(transport.open_count(), 6);
    assert_eq!(
        transport.open_gaps_ms(),
        vec![1_000, 2_000, 4_000, 8_000, 16_000]
    );
    assert!(states.lock().contains(&ConnectionState::Reconnecting));
    assert_eq!(states.lock().last(), Some(&ConnectionState::Failed));

    // no timer left armed
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(transport.open_count(), 6);
    assert_eq!(manager.state(), ConnectionState::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_abnormal_close_reconnects_after_base_delay() {
    let (transport, mut servers) = FakeTransport::new(OpenOutcome::Accept);
    let manager = ConnectionManager::spawn("task-1", transport.clone(), config(), sink());

    let first = servers.recv().await.unwrap();
    wait_state(&manager, ConnectionState::Connected).await;

    first.close(Some(1006));
    wait_state(&manager, ConnectionState::Reconnecting).await;

    let mut second = servers.recv().await.unwrap();
    assert!(matches!(second.next_sent().await, Some(Sent::Text(_))));
    wait_state(&manager, ConnectionState::Connected).await;
    assert_eq!(transport.open_gaps_ms(), vec![1_000]);
}

#[tokio::test(start_paused = true)]
async fn test_channel_error_after_success_restarts_backoff() {
    let (transport, mut servers) = FakeTransport::new(OpenOutcome::Fail);
    transport.push_outcome(OpenOutcome::Fail);
    transport.push_outcome(OpenOutcome::Fail);
    transport.push_outcome(OpenOutcome::Accept);
    let manager = ConnectionManager::spawn("task-1", transport.clone(), config(), sink());

    let server = servers.recv().await.unwrap();
    wait_state(&manager, ConnectionState::Connected).await;
    assert_eq!(transport.open_gaps_ms(), vec![1_000, 2_000]);

    transport.set_default(OpenOutcome::Accept);
    server.fail("connection reset");
    let _second = servers.recv().await.unwrap();

    // a successful open resets the counter, so the next delay is the base delay again
    assert_eq!(transport.open_gaps_ms(), vec![1_000, 2_000, 1_000]);
}

#[tokio::test(start_paused = true)]
async fn test_normal_close_does_not_reconnect() {
    let (transport, mut servers) = FakeTransport::new(OpenOutcome::Accept);
    let manager = ConnectionManager::spawn("task-1", transport.clone(), config(), sink());

    let server = servers.recv().await.unwrap();
    wait_state(&manager, ConnectionState::Connected).await;

    server.close(Some(1000));
    wait_state(&manager, ConnectionState::Disconnected).await;

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(transport.open_count(), 1);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_manual_reconnect_recovers_from_failed() {
    let (transport, mut servers) = FakeTransport::new(OpenOutcome::Fail);
    let config = config().with_backoff(BackoffConfig::default().with_max_attempts(1));
    let manager = ConnectionManager::spawn("task-1", transport.clone(), config, sink());

    wait_state(&manager, ConnectionState::Failed).await;
    assert_eq!(transport.open_count(), 2);

    transport.set_default(OpenOutcome::Accept);
    manager.reconnect();

    let _server = servers.recv().await.unwrap();
    wait_state(&manager, ConnectionState::Connected).await;
    assert_eq!(transport.open_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_manual_reconnect_replaces_open_channel() {
    let (transport, mut servers) = FakeTransport::new(OpenOutcome::Accept);
    let manager = ConnectionManager::spawn("task-1", transport.clone(), config(), sink());

    let mut first = servers.recv().await.unwrap();
    assert!(matches!(first.next_sent().await, Some(Sent::Text(_))));

    manager.reconnect();

    assert_eq!(first.next_sent().await, Some(Sent::Close(1000)));
    let _second = servers.recv().await.unwrap();
    wait_state(&manager, ConnectionState::Connected).await;
    assert_eq!(transport.open_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_dispose_closes_channel_and_silences_updates() {
    let (transport, mut servers) = FakeTransport::new(OpenOutcome::Accept);
    let manager = ConnectionManager::spawn("task-1", transport.clone(), config(), sink());

    let received = Arc::new(AtomicUsize::new(0));
    let counter = received.clone();
    manager.on_update(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let mut server = servers.recv().await.unwrap();
    assert!(matches!(server.next_sent().await, Some(Sent::Text(_))));
    wait_state(&manager, ConnectionState::Connected).await;

    manager.dispose();
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(manager.is_disposed());

    server.send_update(&running_snapshot(90));
    assert_eq!(server.next_sent().await, Some(Sent::Close(1000)));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(received.load(Ordering::SeqCst), 0);
    assert_eq!(transport.open_count(), 1);

    // idempotent, and reconnect is ignored once disposed
    manager.dispose();
    manager.reconnect();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(transport.open_count(), 1);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_dispose_cancels_pending_retry() {
    let (transport, _servers) = FakeTransport::new(OpenOutcome::Fail);
    let manager = ConnectionManager::spawn("task-1", transport.clone(), config(), sink());

    wait_state(&manager, ConnectionState::Reconnecting).await;
    manager.dispose();

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(transport.open_count(), 1);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_hung_open_times_out_into_reconnecting() {
    let (transport, mut servers) = FakeTransport::new(OpenOutcome::Accept);
    transport.push_outcome(OpenOutcome::Hang);
    let config = config().with_connect_timeout(Duration::from_secs(2));
    let manager = ConnectionManager::spawn("task-1", transport.clone(), config, sink());

    let _server = servers.recv().await.unwrap();
    wait_state(&manager, ConnectionState::Connected).await;

    // 2s timeout then the 1s base delay
    assert_eq!(transport.open_gaps_ms(), vec![3_000]);
}

#[tokio::test(start_paused = true)]
async fn test_dispose_interrupts_hung_open() {
    let (transport, _servers) = FakeTransport::new(OpenOutcome::Hang);
    let manager = ConnectionManager::spawn("task-1", transport.clone(), config(), sink());

    wait_state(&manager, ConnectionState::Connecting).await;
    manager.dispose();

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.open_count(), 1);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_each_manager_owns_its_channel() {
    let (transport, mut servers) = FakeTransport::new(OpenOutcome::Accept);
    let a = ConnectionManager::spawn("task-1", transport.clone(), config(), sink());
    let b = ConnectionManager::spawn("task-1", transport.clone(), config(), sink());

    let _first = servers.recv().await.unwrap();
    let _second = servers.recv().await.unwrap();
    wait_state(&a, ConnectionState::Connected).await;
    wait_state(&b, ConnectionState::Connected).await;

    assert_eq!(transport.open_count(), 2);
    drop(a);
    assert_eq!(b.state(), ConnectionState::Connected);
}
