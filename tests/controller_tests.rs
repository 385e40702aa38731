#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! End-to-end behaviour of `ReadySessionController` against scripted push
//! channels and a mock session API, all on a paused clock.

mod common;

use std::time::Duration;

use common::*;
use live_quiz_sync::protocol::ReadyResponse;
use live_quiz_sync::{Command, ConnectionState, SessionEvent, SessionStatus, SyncError};

fn count_matches(events: &[SessionEvent], wanted: &SessionEvent) -> usize {
    events.iter().filter(|e| *e == wanted).count()
}

// ── Scenarios ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn happy_path_confirms_then_navigates_once() {
    let connector = MockConnector::new();
    let server = connector.accept();
    let api = MockApi::new(snapshot(SessionStatus::Waiting, [false, false]));
    let (mut controller, mut events) = start(&connector, &api, config());
    settle().await;

    let view = controller.view();
    assert_eq!(view.connection, ConnectionState::Connected);
    assert_eq!(view.status, Some(SessionStatus::Waiting));
    assert_eq!(api.count(ApiCall::FetchStatus), 1, "one seed fetch");

    // P1 readies; the server has not seen P2 yet.
    api.queue_ready(Ok(ReadyResponse {
        status: SessionStatus::Waiting,
        all_ready: false,
    }));
    controller.request_ready().unwrap();
    settle().await;
    assert!(controller.view().is_self_ready);
    assert!(!controller.view().all_ready);

    // P2 readies; the push channel reports everyone ready.
    server.push(session_updated("ready", [true, true]));
    settle().await;
    assert!(controller.view().all_ready);
    assert_eq!(controller.view().status, Some(SessionStatus::Ready));

    api.queue_ready(Ok(ReadyResponse {
        status: SessionStatus::InProgress,
        all_ready: true,
    }));
    advance_ms(2999).await;
    assert_eq!(api.count(ApiCall::SubmitReady), 1);
    advance_ms(1).await;
    assert_eq!(api.count(ApiCall::SubmitReady), 2, "confirm fired at +3000ms");
    assert_eq!(controller.view().status, Some(SessionStatus::InProgress));

    // Both channels report in_progress at nearly the same time.
    server.push(status_only("in_progress"));
    api.set_status(snapshot(SessionStatus::InProgress, [true, true]));
    server.push(participant_ready(true));
    settle().await;

    advance_ms(999).await;
    assert!(drain(&mut events).is_empty());
    advance_ms(1).await;
    assert_eq!(drain(&mut events), vec![SessionEvent::NavigateToMatch]);

    advance_ms(10_000).await;
    assert!(drain(&mut events).is_empty());
    controller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn failover_polls_when_push_never_connects() {
    let connector = MockConnector::new();
    let api = MockApi::new(snapshot(SessionStatus::Waiting, [false, false]));
    let (mut controller, _events) = start(&connector, &api, config());
    settle().await;
    assert_eq!(controller.connection_state(), ConnectionState::Connecting);

    // Poller starts at +2000 and first fetches one interval later.
    advance_ms(4999).await;
    assert_eq!(api.count(ApiCall::FetchStatus), 0);
    advance_ms(1).await;
    assert_eq!(api.count(ApiCall::FetchStatus), 1);
    assert_eq!(controller.view().status, Some(SessionStatus::Waiting));

    api.set_status(snapshot(SessionStatus::Waiting, [true, false]));
    advance_ms(3000).await;
    assert_eq!(api.count(ApiCall::FetchStatus), 2);
    assert!(controller.view().is_self_ready);

    // The handshake times out at +10s and a retry follows; polling continues.
    advance_ms(6000).await;
    assert_eq!(api.count(ApiCall::FetchStatus), 4);
    assert_eq!(connector.connect_count(), 2);
    assert_ne!(controller.connection_state(), ConnectionState::Connected);

    controller.stop().await;
    let fetched = api.count(ApiCall::FetchStatus);
    advance_ms(10_000).await;
    assert_eq!(api.count(ApiCall::FetchStatus), fetched, "no polling after stop");
}

#[tokio::test(start_paused = true)]
async fn connecting_mid_interval_suppresses_next_poll() {
    let connector = MockConnector::new();
    connector.fail("refused");
    // Reconnect fires at +2000 and completes at +5500.
    let _server = connector.accept_after(Duration::from_millis(3500));
    let api = MockApi::new(snapshot(SessionStatus::Waiting, [true, false]));
    api.set_latency(Duration::from_millis(1000));
    let (mut controller, _events) = start(&connector, &api, config());
    let mut view_rx = controller.subscribe();
    settle().await;

    // Poll tick at +5000 dispatches a request that lands at +6000.
    advance_ms(5000).await;
    assert_eq!(api.count(ApiCall::FetchStatus), 1);

    advance_ms(500).await;
    assert_eq!(controller.connection_state(), ConnectionState::Connected);
    assert_eq!(api.count(ApiCall::FetchStatus), 2, "seed fetch on connect");

    advance_ms(500).await;
    assert_eq!(controller.view().status, Some(SessionStatus::Waiting));
    view_rx.borrow_and_update();

    // The seed response carries the same snapshot: nothing changes.
    advance_ms(500).await;
    assert!(!view_rx.has_changed().unwrap());

    advance_ms(20_000).await;
    assert_eq!(api.count(ApiCall::FetchStatus), 2, "poller stayed stopped");
    controller.stop().await;
}

// ── Invariants ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn poller_runs_only_while_disconnected() {
    let connector = MockConnector::new();
    let server = connector.accept();
    let _second = connector.accept();
    let api = MockApi::new(snapshot(SessionStatus::Waiting, [false, false]));
    let config = config().with_reconnect_delay(Duration::from_millis(7000));
    let (mut controller, _events) = start(&connector, &api, config);
    settle().await;
    assert_eq!(api.count(ApiCall::FetchStatus), 1);

    advance_ms(10_000).await;
    assert_eq!(api.count(ApiCall::FetchStatus), 1, "no polling while connected");

    server.close();
    settle().await;
    assert_eq!(controller.connection_state(), ConnectionState::Disconnected);

    // Fallback at +2000, tick at +5000, reconnect at +7000.
    advance_ms(5000).await;
    assert_eq!(api.count(ApiCall::FetchStatus), 2);
    advance_ms(2000).await;
    assert_eq!(controller.connection_state(), ConnectionState::Connected);
    assert_eq!(connector.connect_count(), 2);

    advance_ms(30_000).await;
    assert_eq!(api.count(ApiCall::FetchStatus), 2, "seed fetch is first-connect only");
    controller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn cancel_before_confirm_suppresses_it() {
    let connector = MockConnector::new();
    let server = connector.accept();
    let api = MockApi::new(snapshot(SessionStatus::Waiting, [false, false]));
    let (mut controller, mut events) = start(&connector, &api, config());
    settle().await;

    server.push(session_updated("ready", [true, true]));
    settle().await;
    assert!(controller.view().all_ready);

    advance_ms(1000).await;
    server.push(status_only("cancelled"));
    settle().await;
    assert_eq!(drain(&mut events), vec![SessionEvent::NavigateToDisconnected]);

    advance_ms(5000).await;
    assert_eq!(api.count(ApiCall::SubmitReady), 0, "confirm never fired");
    assert!(drain(&mut events).is_empty());

    let view = controller.view();
    assert_eq!(view.status, Some(SessionStatus::Cancelled));
    assert_eq!(view.connection, ConnectionState::Disconnected);
    assert!(server.client_closed());
    controller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn terminal_path_ignores_later_updates() {
    let connector = MockConnector::new();
    let server = connector.accept();
    let api = MockApi::new(snapshot(SessionStatus::Ready, [true, true]));
    let (mut controller, mut events) = start(&connector, &api, config());
    settle().await;

    server.push(status_only("cancelled"));
    server.push(status_only("in_progress"));
    settle().await;

    controller.request_ready().unwrap();
    advance_ms(10_000).await;

    let all = drain(&mut events);
    assert_eq!(count_matches(&all, &SessionEvent::NavigateToDisconnected), 1);
    assert_eq!(count_matches(&all, &SessionEvent::NavigateToMatch), 0);
    assert_eq!(controller.view().status, Some(SessionStatus::Cancelled));
    assert_eq!(api.count(ApiCall::SubmitReady), 0);

    // Leaving still works after cancellation.
    controller.request_leave().unwrap();
    settle().await;
    assert_eq!(drain(&mut events), vec![SessionEvent::Left]);
    controller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn duplicate_in_progress_from_every_source_navigates_once() {
    let connector = MockConnector::new();
    let server = connector.accept();
    let api = MockApi::new(snapshot(SessionStatus::InProgress, [true, true]));
    let (mut controller, mut events) = start(&connector, &api, config());
    settle().await;

    for _ in 0..3 {
        server.push(session_updated("in_progress", [true, true]));
        server.push(participant_ready(true));
        advance_ms(300).await;
    }
    advance_ms(5000).await;

    assert_eq!(drain(&mut events), vec![SessionEvent::NavigateToMatch]);
    controller.stop().await;
}

// ── Commands ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn optimistic_mark_shows_before_response() {
    let connector = MockConnector::new();
    let _server = connector.accept();
    let api = MockApi::new(snapshot(SessionStatus::Waiting, [false, false]));
    let (mut controller, _events) = start(&connector, &api, config());
    settle().await;

    api.set_latency(Duration::from_millis(500));
    controller.request_ready().unwrap();
    controller.request_ready().unwrap();
    settle().await;
    assert!(controller.view().is_self_ready);
    assert_eq!(api.count(ApiCall::SubmitReady), 1, "second request deduplicated");

    advance_ms(500).await;
    assert!(controller.view().is_self_ready, "success keeps the mark");
    controller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn failed_ready_reverts_and_is_not_retried() {
    let connector = MockConnector::new();
    let _server = connector.accept();
    let api = MockApi::new(snapshot(SessionStatus::Waiting, [false, false]));
    api.queue_ready(Err(SyncError::HttpStatus {
        path: "sessions/42/ready".into(),
        status: 503,
    }));
    let (mut controller, mut events) = start(&connector, &api, config());
    settle().await;

    controller.request_ready().unwrap();
    settle().await;

    let all = drain(&mut events);
    assert_eq!(all.len(), 1);
    assert!(matches!(
        all[0],
        SessionEvent::CommandFailed {
            command: Command::Ready,
            ..
        }
    ));
    assert!(!controller.view().is_self_ready);

    advance_ms(10_000).await;
    assert_eq!(api.count(ApiCall::SubmitReady), 1);
    controller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn rejected_ready_surfaces_server_message() {
    let connector = MockConnector::new();
    let _server = connector.accept();
    let api = MockApi::new(snapshot(SessionStatus::Waiting, [false, false]));
    api.queue_ready(Err(SyncError::Rejected {
        message: Some("session closed".into()),
    }));
    let (mut controller, mut events) = start(&connector, &api, config());
    settle().await;

    controller.request_ready().unwrap();
    settle().await;

    assert_eq!(
        drain(&mut events),
        vec![SessionEvent::CommandFailed {
            command: Command::Ready,
            message: "session closed".into(),
        }]
    );
    controller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn leave_request_precedes_back_navigation() {
    let connector = MockConnector::new();
    let server = connector.accept();
    let api = MockApi::new(snapshot(SessionStatus::Waiting, [false, false]));
    let (mut controller, mut events) = start(&connector, &api, config());
    settle().await;

    api.set_latency(Duration::from_millis(500));
    controller.request_leave().unwrap();
    settle().await;
    assert_eq!(api.count(ApiCall::Leave), 1);
    assert!(drain(&mut events).is_empty());

    advance_ms(500).await;
    assert_eq!(drain(&mut events), vec![SessionEvent::Left]);
    assert_eq!(controller.connection_state(), ConnectionState::Disconnected);
    assert!(server.client_closed());
    controller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn commands_after_leaving_are_ignored() {
    let connector = MockConnector::new();
    let _server = connector.accept();
    let api = MockApi::new(snapshot(SessionStatus::Waiting, [false, false]));
    let (mut controller, mut events) = start(&connector, &api, config());
    settle().await;

    controller.request_leave().unwrap();
    settle().await;
    controller.request_leave().unwrap();
    settle().await;
    controller.request_cancel_attempt().unwrap();
    settle().await;

    assert_eq!(drain(&mut events), vec![SessionEvent::Left]);
    assert_eq!(api.count(ApiCall::Leave), 1);
    assert_eq!(api.count(ApiCall::CancelAttempt), 0);
    controller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn concurrent_leave_and_cancel_finish_once() {
    let connector = MockConnector::new();
    let _server = connector.accept();
    let api = MockApi::new(snapshot(SessionStatus::Waiting, [false, false]));
    let (mut controller, mut events) = start(&connector, &api, config());
    settle().await;

    api.set_latency(Duration::from_millis(500));
    controller.request_leave().unwrap();
    controller.request_cancel_attempt().unwrap();
    settle().await;
    advance_ms(500).await;

    let all = drain(&mut events);
    let finished = count_matches(&all, &SessionEvent::Left)
        + count_matches(&all, &SessionEvent::AttemptCancelled);
    assert_eq!(finished, 1, "events: {all:?}");
    controller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn failed_leave_keeps_the_session() {
    let connector = MockConnector::new();
    let _server = connector.accept();
    let api = MockApi::new(snapshot(SessionStatus::Waiting, [false, false]));
    api.fail_leave(SyncError::Rejected {
        message: Some("too late".into()),
    });
    let (mut controller, mut events) = start(&connector, &api, config());
    settle().await;

    controller.request_leave().unwrap();
    settle().await;

    let all = drain(&mut events);
    assert_eq!(all.len(), 1);
    match &all[0] {
        SessionEvent::CommandFailed { command, message } => {
            assert_eq!(*command, Command::Leave);
            assert!(message.contains("too late"));
        }
        other => panic!("expected CommandFailed, got {other:?}"),
    }
    assert_eq!(controller.connection_state(), ConnectionState::Connected);
    controller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn cancel_attempt_finishes_the_session() {
    let connector = MockConnector::new();
    let server = connector.accept();
    let api = MockApi::new(snapshot(SessionStatus::Waiting, [true, false]));
    let (mut controller, mut events) = start(&connector, &api, config());
    settle().await;

    controller.request_cancel_attempt().unwrap();
    settle().await;
    assert_eq!(drain(&mut events), vec![SessionEvent::AttemptCancelled]);
    assert_eq!(api.calls().last(), Some(&ApiCall::CancelAttempt));
    assert!(server.client_closed());

    advance_ms(10_000).await;
    assert!(drain(&mut events).is_empty());
    controller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn failed_cancel_attempt_is_reported() {
    let connector = MockConnector::new();
    let _server = connector.accept();
    let api = MockApi::new(snapshot(SessionStatus::Waiting, [false, false]));
    api.fail_cancel_attempt(SyncError::Io(std::io::Error::other("offline")));
    let (mut controller, mut events) = start(&connector, &api, config());
    settle().await;

    controller.request_cancel_attempt().unwrap();
    settle().await;
    assert!(matches!(
        drain(&mut events).as_slice(),
        [SessionEvent::CommandFailed {
            command: Command::CancelAttempt,
            ..
        }]
    ));
    controller.stop().await;
}

// ── Push channel handling ───────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn participant_ready_refreshes_participants() {
    let connector = MockConnector::new();
    let server = connector.accept();
    let api = MockApi::new(snapshot(SessionStatus::Waiting, [false, false]));
    let (mut controller, _events) = start(&connector, &api, config());
    settle().await;

    api.set_status(snapshot(SessionStatus::Waiting, [true, true]));
    server.push(participant_ready(true));
    settle().await;

    assert_eq!(api.count(ApiCall::FetchStatus), 2);
    let view = controller.view();
    assert_eq!(view.participants, participants([true, true]));
    assert!(view.all_ready);
    controller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn malformed_and_unknown_frames_are_ignored() {
    let connector = MockConnector::new();
    let server = connector.accept();
    let api = MockApi::new(snapshot(SessionStatus::Waiting, [false, false]));
    let (mut controller, _events) = start(&connector, &api, config());
    settle().await;
    let before = controller.view();

    server.push("not json");
    server.push(r#"{"type":"quiz.question","data":{"id":1}}"#);
    settle().await;

    assert_eq!(controller.view(), before);
    assert_eq!(controller.connection_state(), ConnectionState::Connected);
    controller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn receive_error_triggers_reconnect() {
    let connector = MockConnector::new();
    let server = connector.accept();
    let _second = connector.accept();
    let api = MockApi::new(snapshot(SessionStatus::Waiting, [false, false]));
    let (mut controller, _events) = start(&connector, &api, config());
    settle().await;

    server.fail("connection reset");
    settle().await;
    assert_eq!(controller.connection_state(), ConnectionState::Error);

    advance_ms(2000).await;
    assert_eq!(connector.connect_count(), 2);
    assert_eq!(controller.connection_state(), ConnectionState::Connected);
    controller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn reconnects_stop_after_limit() {
    let connector = MockConnector::new();
    for _ in 0..5 {
        connector.fail("refused");
    }
    let api = MockApi::new(snapshot(SessionStatus::Waiting, [false, false]));
    let config = config().with_max_reconnect_attempts(2);
    let (mut controller, _events) = start(&connector, &api, config);

    advance_ms(30_000).await;
    assert_eq!(connector.connect_count(), 3, "initial attempt plus two retries");
    assert!(api.count(ApiCall::FetchStatus) > 0, "poller carries the session");
    controller.stop().await;
}

// ── Lifecycle ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn stop_tears_down_and_is_idempotent() {
    let connector = MockConnector::new();
    let server = connector.accept();
    let api = MockApi::new(snapshot(SessionStatus::Waiting, [false, false]));
    let (mut controller, mut events) = start(&connector, &api, config());
    settle().await;

    controller.stop().await;
    controller.stop().await;
    settle().await;

    assert!(server.client_closed());
    assert_eq!(controller.connection_state(), ConnectionState::Disconnected);
    assert!(matches!(
        controller.request_leave(),
        Err(SyncError::NotRunning)
    ));
    assert_eq!(events.recv().await, None);
}
