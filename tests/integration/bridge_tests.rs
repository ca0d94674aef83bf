//! Integration tests for the bridge against real child processes.
//!
//! Covers the correlation properties end to end: id restoration, collision
//! isolation, notification fire-and-forget, timeout isolation, crash
//! fan-out, fail-fast after exit, and shutdown.

use std::time::{Duration, Instant};

use serde_json::json;

use mcp_relay::bridge::Bridge;
use mcp_relay::AppError;

use super::test_helpers::{
    echo_config, instant_exit_config, selective_config, short_lived_config, silent_config,
};

#[tokio::test]
async fn end_to_end_echo_restores_the_client_id() {
    let bridge = Bridge::start(&echo_config(5)).expect("bridge start");

    let response = bridge
        .handle(json!({"jsonrpc": "2.0", "method": "ping", "id": 7}))
        .await
        .expect("request must succeed")
        .expect("a request must yield a response");

    // `cat` echoed the remapped line back; the bridge must have restored
    // the caller's id and left the rest of the message intact.
    assert_eq!(response["id"], 7);
    assert_eq!(response["method"], "ping");
    assert_eq!(response["jsonrpc"], "2.0");

    bridge.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn colliding_client_ids_do_not_cross_talk() {
    let bridge = Bridge::start(&echo_config(5)).expect("bridge start");

    let first = bridge.handle(json!({
        "jsonrpc": "2.0",
        "method": "tools/call",
        "params": {"marker": "caller-a"},
        "id": "1",
    }));
    let second = bridge.handle(json!({
        "jsonrpc": "2.0",
        "method": "tools/call",
        "params": {"marker": "caller-b"},
        "id": "1",
    }));

    let (first, second) = tokio::join!(first, second);
    let first = first.expect("first request").expect("first response");
    let second = second.expect("second request").expect("second response");

    assert_eq!(first["id"], "1");
    assert_eq!(second["id"], "1");
    assert_eq!(first["params"]["marker"], "caller-a");
    assert_eq!(second["params"]["marker"], "caller-b");

    bridge.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn id_types_are_preserved_verbatim() {
    let bridge = Bridge::start(&echo_config(5)).expect("bridge start");

    let string_id = bridge
        .handle(json!({"jsonrpc": "2.0", "method": "ping", "id": "abc-123"}))
        .await
        .expect("request")
        .expect("response");
    assert_eq!(string_id["id"], "abc-123", "string ids stay strings");

    let numeric_id = bridge
        .handle(json!({"jsonrpc": "2.0", "method": "ping", "id": 42}))
        .await
        .expect("request")
        .expect("response");
    assert_eq!(numeric_id["id"], 42, "numeric ids stay numeric");

    bridge.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn notification_is_fire_and_forget() {
    let bridge = Bridge::start(&echo_config(5)).expect("bridge start");

    let ack = bridge
        .handle(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
        .await
        .expect("notification must be acknowledged");

    assert!(ack.is_none(), "notifications yield an empty acknowledgment");
    assert_eq!(
        bridge.pending_requests().await,
        0,
        "a notification must never create a table entry"
    );

    bridge.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn notification_prefix_overrides_a_present_id() {
    let bridge = Bridge::start(&echo_config(5)).expect("bridge start");

    // Some clients stamp ids on notifications anyway; the method prefix
    // still classifies the message as one-way.
    let ack = bridge
        .handle(json!({"jsonrpc": "2.0", "method": "notifications/progress", "id": 3}))
        .await
        .expect("notification must be acknowledged");

    assert!(ack.is_none());
    assert_eq!(bridge.pending_requests().await, 0);

    bridge.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn timeout_is_isolated_to_the_silent_request() {
    let bridge = Bridge::start(&selective_config(1)).expect("bridge start");

    let quiet = bridge.handle(json!({
        "jsonrpc": "2.0",
        "method": "tools/call",
        "params": {"marker": "stay-quiet"},
        "id": 1,
    }));
    let answered = bridge.handle(json!({
        "jsonrpc": "2.0",
        "method": "tools/call",
        "params": {"marker": "respond-now"},
        "id": 2,
    }));

    let (quiet, answered) = tokio::join!(quiet, answered);

    assert!(
        matches!(quiet, Err(AppError::RequestTimeout(_))),
        "the unanswered request must time out, got: {quiet:?}"
    );
    let answered = answered.expect("answered request").expect("response");
    assert_eq!(answered["id"], 2, "the answered request must be unaffected");

    assert_eq!(
        bridge.pending_requests().await,
        0,
        "the timed-out entry must have been removed"
    );

    bridge.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn crash_fans_out_to_every_pending_request() {
    let bridge = Bridge::start(&short_lived_config(10)).expect("bridge start");

    let a = bridge.handle(json!({"jsonrpc": "2.0", "method": "ping", "id": 1}));
    let b = bridge.handle(json!({"jsonrpc": "2.0", "method": "ping", "id": 2}));
    let c = bridge.handle(json!({"jsonrpc": "2.0", "method": "ping", "id": 3}));

    let started = Instant::now();
    let (a, b, c) = tokio::join!(a, b, c);

    for outcome in [a, b, c] {
        assert!(
            matches!(outcome, Err(AppError::ProcessCrashed)),
            "every pending caller must see the crash, got: {outcome:?}"
        );
    }
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "crash fan-out must not wait for the request timeout"
    );
    assert_eq!(bridge.pending_requests().await, 0);
    assert!(!bridge.is_running());
}

#[tokio::test]
async fn requests_after_exit_fail_fast() {
    let bridge = Bridge::start(&instant_exit_config(30)).expect("bridge start");

    // Give the reader a moment to observe the EOF.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!bridge.is_running());

    let started = Instant::now();
    let outcome = bridge
        .handle(json!({"jsonrpc": "2.0", "method": "ping", "id": 1}))
        .await;

    assert!(
        matches!(outcome, Err(AppError::ProcessExited)),
        "requests against a dead child must fail fast, got: {outcome:?}"
    );
    assert!(
        started.elapsed() < Duration::from_secs(1),
        "fail-fast must not consume the request timeout"
    );
}

#[tokio::test]
async fn spawn_failure_is_a_spawn_error() {
    let config = super::test_helpers::test_config("definitely-not-a-real-binary", &[], 5);
    let outcome = Bridge::start(&config);

    assert!(
        matches!(outcome, Err(AppError::Spawn(_))),
        "an unlaunchable command must surface SpawnError, got: {outcome:?}"
    );
}

#[tokio::test]
async fn shutdown_terminates_the_child_and_rejects_new_requests() {
    let bridge = Bridge::start(&silent_config(5)).expect("bridge start");
    assert!(bridge.is_running());

    bridge.shutdown().await.expect("shutdown");
    assert!(!bridge.is_running());

    let outcome = bridge
        .handle(json!({"jsonrpc": "2.0", "method": "ping", "id": 1}))
        .await;
    assert!(matches!(outcome, Err(AppError::ProcessExited)));

    // A second shutdown is a no-op.
    bridge.shutdown().await.expect("repeat shutdown");
}
