//! End-to-end scenarios for `CallSessionController` driven through the mock
//! transport under a paused clock.
//!
//! Covers:
//! - Server fallback order and failure reporting
//! - Start-call response handling (timeout, ended rooms, E2EE key exchange)
//! - One-on-one lifecycle: unanswered, promotion to instant, peer leaving
//! - Idle detection and the resume-call handshake
//! - Control messages from peers (barrage, mute, end, hands, countdown)
//! - Registry bookkeeping and release

#![allow(clippy::unwrap_used, clippy::expect_used)]

use call_engine::actors::{CallRegistry, RegistryEvent, SendOutcome};
use call_engine::errors::{CallError, CallErrorEvent};
use call_engine::ports::{ConnectionQuality, DisconnectReason, TransportError, TransportEvent};
use call_engine::session::{CallStatus, IdleMode, SessionNotice};
use call_test_utils::*;
use common::types::{CallKind, RoomId};
use signaling_protocol::{ControlMessage, CountdownAction, CountdownTimer, RaisedHand, Topic};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

fn drain<T: Clone>(rx: &mut broadcast::Receiver<T>) -> Vec<T> {
    let mut received = Vec::new();
    while let Ok(item) = rx.try_recv() {
        received.push(item);
    }
    received
}

async fn advance(duration: Duration) {
    tokio::time::advance(duration).await;
    settle().await;
}

fn status(session: &TestSession) -> CallStatus {
    *session.handle.observers().status.borrow()
}

fn no_activity_notices(notices: &[SessionNotice]) -> usize {
    notices
        .iter()
        .filter(|n| matches!(n, SessionNotice::NoActivity { .. }))
        .count()
}

// ============================================================================
// Connecting
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_fallback_tries_each_server_once_in_order() {
    let transport = MockTransport::builder()
        .fail(SERVER_A, TransportError::Timeout)
        .fail(SERVER_B, TransportError::Tls("certificate expired".to_string()))
        .build();
    let session = TestCall::outgoing(CallKind::Group)
        .with_transport(transport)
        .spawn();

    let url = session
        .handle
        .connect(urls(&[SERVER_A, SERVER_B, SERVER_C]))
        .await
        .unwrap();

    assert_eq!(url, SERVER_C);
    assert_eq!(session.transport.attempts(), urls(&[SERVER_A, SERVER_B, SERVER_C]));
    assert_eq!(
        *session.handle.observers().connected_url.borrow(),
        Some(SERVER_C.to_string())
    );
    assert_eq!(status(&session), CallStatus::Calling);
}

#[tokio::test(start_paused = true)]
async fn test_all_servers_unreachable_reports_one_error() {
    let transport = MockTransport::builder()
        .fail(SERVER_A, TransportError::Timeout)
        .fail(SERVER_B, TransportError::UnresolvedHost("media-b".to_string()))
        .fail(SERVER_C, TransportError::Tls("handshake".to_string()))
        .build();
    let session = TestCall::outgoing(CallKind::Group)
        .with_transport(transport)
        .spawn();
    let mut errors = session.handle.observers().subscribe_errors();

    let result = session
        .handle
        .connect(urls(&[SERVER_A, SERVER_B, SERVER_C]))
        .await;
    settle().await;

    let Err(CallError::Connection { url, .. }) = result else {
        unreachable!("expected a connection error, got {result:?}");
    };
    assert_eq!(url, SERVER_C);

    let events = drain(&mut errors);
    assert_eq!(events.len(), 1);
    let [CallErrorEvent {
        error: CallError::Connection { url, .. },
        terminal: true,
        ..
    }] = events.as_slice()
    else {
        unreachable!("unexpected error events {events:?}");
    };
    assert_eq!(url, SERVER_C);
    assert_eq!(status(&session), CallStatus::ConnectedFailed);
    assert_eq!(session.transport.disconnect_count(), 1);
    assert!(session.handle.is_released());
}

#[tokio::test(start_paused = true)]
async fn test_unauthorized_stops_fallback() {
    let transport = MockTransport::builder()
        .fail(SERVER_A, TransportError::Unauthorized("bad token".to_string()))
        .build();
    let session = TestCall::outgoing(CallKind::Group)
        .with_transport(transport)
        .spawn();

    let result = session.handle.connect(urls(&[SERVER_A, SERVER_B])).await;

    assert!(matches!(result, Err(CallError::StartCall(_))));
    assert_eq!(session.transport.attempts(), urls(&[SERVER_A]));
    assert_eq!(status(&session), CallStatus::ConnectedFailed);
}

#[tokio::test(start_paused = true)]
async fn test_connect_passes_token_and_call_params() {
    let session = TestCall::outgoing(CallKind::Group)
        .with_config(StaticConfig::new().with_e2ee().with_quic_signal())
        .spawn();

    session.handle.connect(urls(&[SERVER_A])).await.unwrap();

    let requests = session.transport.requests();
    let [request] = requests.as_slice() else {
        unreachable!("expected one connect request, got {}", requests.len());
    };
    assert!(request.use_quic_signal);
    assert_eq!(request.call_params.as_ref(), b"{\"type\":\"start\"}");
}

#[tokio::test(start_paused = true)]
async fn test_second_connect_is_rejected() {
    let session = TestCall::outgoing(CallKind::Group).spawn();
    session.handle.connect(urls(&[SERVER_A])).await.unwrap();

    let again = session.handle.connect(urls(&[SERVER_B])).await;

    assert!(matches!(again, Err(CallError::InvalidState(_))));
    assert_eq!(session.transport.attempts(), urls(&[SERVER_A]));
}

#[tokio::test(start_paused = true)]
async fn test_dispose_during_connect() {
    let transport = MockTransport::builder()
        .connect_delay(Duration::from_secs(10))
        .build();
    let session = TestCall::outgoing(CallKind::Group)
        .with_transport(transport)
        .spawn();

    let handle = session.handle.clone();
    let connecting = tokio::spawn(async move { handle.connect(urls(&[SERVER_A])).await });
    settle().await;
    session.handle.dispose();

    let result = connecting.await.unwrap();
    assert!(matches!(result, Err(CallError::InvalidState(_))));
    session.task.await.unwrap();
    assert_eq!(session.transport.disconnect_count(), 1);
}

// ============================================================================
// Start-call response
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_missing_start_response_times_out() {
    let session = TestCall::outgoing(CallKind::OneOnOne).spawn();
    let mut errors = session.handle.observers().subscribe_errors();
    session.handle.connect(urls(&[SERVER_A])).await.unwrap();

    advance(Duration::from_secs(14)).await;
    assert_eq!(status(&session), CallStatus::Calling);

    advance(Duration::from_secs(2)).await;

    assert_eq!(status(&session), CallStatus::ConnectedFailed);
    let events = drain(&mut errors);
    let [CallErrorEvent {
        error: CallError::ResponseTimeout(budget),
        terminal: true,
        ..
    }] = events.as_slice()
    else {
        unreachable!("unexpected error events {events:?}");
    };
    assert_eq!(*budget, Duration::from_secs(15));
    assert_eq!(session.transport.disconnect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_room_already_ended() {
    let session = TestCall::incoming(CallKind::Group, ROOM_ID).spawn();
    let mut errors = session.handle.observers().subscribe_errors();
    session.handle.connect(urls(&[SERVER_A])).await.unwrap();

    session
        .emit(start_call_status(ROOM_ID, 22001, "call finished"))
        .await;

    assert_eq!(status(&session), CallStatus::ConnectedFailed);
    let events = drain(&mut errors);
    assert!(matches!(
        events.as_slice(),
        [CallErrorEvent {
            error: CallError::CallEnded,
            terminal: true,
            ..
        }]
    ));
}

#[tokio::test(start_paused = true)]
async fn test_rejected_start_call() {
    let session = TestCall::outgoing(CallKind::Group).spawn();
    let mut errors = session.handle.observers().subscribe_errors();
    session.handle.connect(urls(&[SERVER_A])).await.unwrap();

    session.emit(start_call_status("", 40300, "forbidden")).await;

    assert_eq!(status(&session), CallStatus::ConnectedFailed);
    let events = drain(&mut errors);
    let [CallErrorEvent {
        error: CallError::StartCall(reason),
        ..
    }] = events.as_slice()
    else {
        unreachable!("unexpected error events {events:?}");
    };
    assert!(reason.contains("40300"));
}

#[tokio::test(start_paused = true)]
async fn test_response_without_key_material_fails_encryption() {
    let session = TestCall::outgoing(CallKind::Group).spawn();
    let mut errors = session.handle.observers().subscribe_errors();
    session.handle.connect(urls(&[SERVER_A])).await.unwrap();

    session.emit(start_call_ok(ROOM_ID)).await;

    assert_eq!(status(&session), CallStatus::ConnectedFailed);
    assert!(matches!(
        drain(&mut errors).as_slice(),
        [CallErrorEvent {
            error: CallError::Encryption(_),
            terminal: true,
            ..
        }]
    ));
}

#[tokio::test(start_paused = true)]
async fn test_undecryptable_session_key_fails_encryption() {
    let session = TestCall::outgoing(CallKind::Group)
        .with_crypto(MockCrypto::new(local_key()).failing_session_keys())
        .spawn();
    let mut errors = session.handle.observers().subscribe_errors();
    session.handle.connect(urls(&[SERVER_A])).await.unwrap();

    session.emit(start_call_with_key(ROOM_ID)).await;

    assert_eq!(status(&session), CallStatus::ConnectedFailed);
    assert!(matches!(
        drain(&mut errors).as_slice(),
        [CallErrorEvent {
            error: CallError::Encryption(_),
            ..
        }]
    ));
}

#[tokio::test(start_paused = true)]
async fn test_plain_call_needs_no_key_material() {
    let session = TestCall::outgoing(CallKind::Group)
        .with_config(StaticConfig::new())
        .spawn();

    session.establish(&[PEER_IDENTITY]).await;

    let state = session.handle.get_state().await.unwrap();
    assert_eq!(state.status, CallStatus::Connected);
    assert!(!state.e2ee_active);
}

#[tokio::test(start_paused = true)]
async fn test_server_room_id_replaces_provisional() {
    let session = TestCall::outgoing(CallKind::Group).spawn();
    assert!(session.handle.observers().room_id.borrow().is_provisional());

    session.establish(&[PEER_IDENTITY]).await;

    let state = session.handle.get_state().await.unwrap();
    assert_eq!(state.room_id, RoomId::new(ROOM_ID));
    assert_eq!(*session.handle.observers().room_id.borrow(), RoomId::new(ROOM_ID));
    assert!(state.e2ee_active);
}

// ============================================================================
// One-on-one lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_one_on_one_waits_for_peer() {
    let session = TestCall::outgoing(CallKind::OneOnOne).spawn();

    session.establish(&[]).await;
    assert_eq!(status(&session), CallStatus::Calling);

    session.emit(joined(PEER_IDENTITY)).await;
    assert_eq!(status(&session), CallStatus::Connected);

    let participants = session.handle.observers().participants.borrow().clone();
    assert_eq!(participants.len(), 2);
    let Some(peer) = participants.iter().find(|p| p.identity == PEER_IDENTITY) else {
        unreachable!("peer missing from roster");
    };
    assert_eq!(peer.display_name.as_deref(), Some("Alice"));
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_call_ends() {
    let session = TestCall::outgoing(CallKind::OneOnOne).spawn();
    let mut notices = session.handle.observers().subscribe_notices();
    session.establish(&[]).await;

    advance(Duration::from_secs(59)).await;
    assert_eq!(status(&session), CallStatus::Calling);

    advance(Duration::from_secs(2)).await;

    assert_eq!(status(&session), CallStatus::Disconnected);
    assert!(drain(&mut notices).contains(&SessionNotice::NoAnswer));
    assert_eq!(session.transport.disconnect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_peer_leaving_one_on_one_ends_after_grace() {
    let session = TestCall::outgoing(CallKind::OneOnOne).spawn();
    let mut notices = session.handle.observers().subscribe_notices();
    session.establish(&[PEER_IDENTITY]).await;

    session.emit(left(PEER_IDENTITY)).await;
    advance(Duration::from_secs(30)).await;
    assert_eq!(status(&session), CallStatus::Connected);

    advance(Duration::from_secs(31)).await;

    assert_eq!(status(&session), CallStatus::Disconnected);
    assert!(drain(&mut notices).contains(&SessionNotice::PeerLeft));
}

#[tokio::test(start_paused = true)]
async fn test_peer_returning_cancels_leave_timer() {
    let session = TestCall::outgoing(CallKind::OneOnOne).spawn();
    session.establish(&[PEER_IDENTITY]).await;

    session.emit(left(PEER_IDENTITY)).await;
    advance(Duration::from_secs(30)).await;
    session.emit(joined(PEER_IDENTITY)).await;
    advance(Duration::from_secs(60)).await;

    assert_eq!(status(&session), CallStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_alone_in_one_on_one_runs_solo_timer_alongside_leave_timer() {
    let session = TestCall::outgoing(CallKind::OneOnOne)
        .with_config(
            StaticConfig::new()
                .with_e2ee()
                .with_idle_timeouts(Duration::from_secs(10), Duration::from_secs(600)),
        )
        .spawn();
    let mut notices = session.handle.observers().subscribe_notices();
    session.establish(&[PEER_IDENTITY]).await;

    session.emit(left(PEER_IDENTITY)).await;
    advance(Duration::from_secs(11)).await;

    assert!(*session.handle.observers().no_activity.borrow());
    assert!(drain(&mut notices).contains(&SessionNotice::NoActivity {
        mode: IdleMode::Solo
    }));
    assert_eq!(status(&session), CallStatus::Connected);

    advance(Duration::from_secs(50)).await;

    assert_eq!(status(&session), CallStatus::Disconnected);
    assert!(drain(&mut notices).contains(&SessionNotice::PeerLeft));
}

#[tokio::test(start_paused = true)]
async fn test_third_participant_promotes_to_instant() {
    let (registry, _registry_task) = CallRegistry::spawn(CancellationToken::new());
    let mut registry_events = registry.subscribe();
    let session = TestCall::outgoing(CallKind::OneOnOne)
        .with_registry(registry.clone())
        .with_config(
            StaticConfig::new()
                .with_e2ee()
                .with_idle_timeouts(Duration::from_secs(120), Duration::from_secs(600)),
        )
        .spawn();
    let mut notices = session.handle.observers().subscribe_notices();
    session.establish(&[PEER_IDENTITY]).await;

    session.emit(joined(THIRD_IDENTITY)).await;

    assert_eq!(*session.handle.observers().call_kind.borrow(), CallKind::Instant);
    let events = drain(&mut registry_events);
    assert!(events.contains(&RegistryEvent::KindChanged {
        room_id: RoomId::new(ROOM_ID),
        kind: CallKind::Instant,
    }));
    let stored = registry.get(&RoomId::new(ROOM_ID)).await.unwrap().unwrap();
    assert_eq!(stored.kind, CallKind::Instant);

    // Instant calls have no leave timer; being alone runs the solo idle timer
    session.emit(left(PEER_IDENTITY)).await;
    session.emit(left(THIRD_IDENTITY)).await;
    advance(Duration::from_secs(61)).await;
    assert_eq!(status(&session), CallStatus::Connected);

    advance(Duration::from_secs(60)).await;

    assert_eq!(status(&session), CallStatus::Connected);
    assert!(*session.handle.observers().no_activity.borrow());
    assert!(drain(&mut notices).contains(&SessionNotice::NoActivity {
        mode: IdleMode::Solo
    }));
}

// ============================================================================
// Idle detection
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_silence_fires_once_and_resume_rearms() {
    let session = TestCall::outgoing(CallKind::Group)
        .with_config(
            StaticConfig::new()
                .with_e2ee()
                .with_idle_timeouts(Duration::from_secs(300), Duration::from_secs(30)),
        )
        .spawn();
    let mut notices = session.handle.observers().subscribe_notices();
    session.establish(&[PEER_IDENTITY]).await;

    advance(Duration::from_secs(31)).await;
    assert!(*session.handle.observers().no_activity.borrow());
    advance(Duration::from_secs(120)).await;
    let fired = drain(&mut notices);
    assert_eq!(no_activity_notices(&fired), 1);
    assert!(fired.contains(&SessionNotice::NoActivity {
        mode: IdleMode::Silence
    }));

    session
        .emit(peer_packet(
            PEER_IDENTITY,
            &peer_key(),
            &ControlMessage::ResumeCall {
                identities: vec![LOCAL_IDENTITY.to_string()],
                sent_at: now_millis(),
            },
        ))
        .await;

    assert!(!*session.handle.observers().no_activity.borrow());
    assert!(drain(&mut notices).contains(&SessionNotice::ContinueRequested {
        by: PEER_IDENTITY.to_string()
    }));

    advance(Duration::from_secs(31)).await;
    assert!(*session.handle.observers().no_activity.borrow());
    assert_eq!(no_activity_notices(&drain(&mut notices)), 1);
}

#[tokio::test(start_paused = true)]
async fn test_resume_for_someone_else_is_ignored() {
    let session = TestCall::outgoing(CallKind::Group)
        .with_config(
            StaticConfig::new()
                .with_e2ee()
                .with_idle_timeouts(Duration::from_secs(300), Duration::from_secs(30)),
        )
        .spawn();
    let mut notices = session.handle.observers().subscribe_notices();
    session.establish(&[PEER_IDENTITY, THIRD_IDENTITY]).await;
    advance(Duration::from_secs(31)).await;
    drain(&mut notices);

    session
        .emit(peer_packet(
            PEER_IDENTITY,
            &peer_key(),
            &ControlMessage::ResumeCall {
                identities: vec![THIRD_IDENTITY.to_string()],
                sent_at: now_millis(),
            },
        ))
        .await;

    assert!(*session.handle.observers().no_activity.borrow());
    assert!(drain(&mut notices).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_keep_call_alive_clears_prompt() {
    let session = TestCall::outgoing(CallKind::Group)
        .with_config(
            StaticConfig::new()
                .with_e2ee()
                .with_idle_timeouts(Duration::from_secs(20), Duration::from_secs(300)),
        )
        .spawn();
    session.establish(&[]).await;
    advance(Duration::from_secs(21)).await;
    assert!(*session.handle.observers().no_activity.borrow());

    session.handle.keep_call_alive().await.unwrap();

    assert!(!*session.handle.observers().no_activity.borrow());
    advance(Duration::from_secs(10)).await;
    assert!(!session.handle.get_state().await.unwrap().no_activity);
}

// ============================================================================
// Active speakers
// ============================================================================

fn active_speaker(session: &TestSession) -> Option<String> {
    session.handle.observers().active_speaker.borrow().clone()
}

#[tokio::test(start_paused = true)]
async fn test_active_speaker_is_debounced() {
    let session = TestCall::outgoing(CallKind::Group).spawn();
    session.establish(&[PEER_IDENTITY, THIRD_IDENTITY]).await;

    session
        .emit(speaking(&[(PEER_IDENTITY, 0.4), (THIRD_IDENTITY, 0.9)]))
        .await;
    advance(Duration::from_millis(100)).await;
    assert_eq!(active_speaker(&session), None);

    advance(Duration::from_millis(150)).await;
    assert_eq!(active_speaker(&session), Some(THIRD_IDENTITY.to_string()));

    // Local participant stays first; the loudest remote follows
    let participants = session.handle.observers().participants.borrow().clone();
    let order: Vec<&str> = participants.iter().map(|p| p.identity.as_str()).collect();
    assert_eq!(order, vec![LOCAL_IDENTITY, THIRD_IDENTITY, PEER_IDENTITY]);
}

#[tokio::test(start_paused = true)]
async fn test_empty_speaker_set_waits_longer() {
    let session = TestCall::outgoing(CallKind::Group).spawn();
    session.establish(&[PEER_IDENTITY]).await;
    session.emit(speaking(&[(PEER_IDENTITY, 0.5)])).await;
    advance(Duration::from_millis(250)).await;
    assert_eq!(active_speaker(&session), Some(PEER_IDENTITY.to_string()));

    session.emit(speaking(&[])).await;
    advance(Duration::from_secs(2)).await;
    assert_eq!(active_speaker(&session), Some(PEER_IDENTITY.to_string()));

    advance(Duration::from_millis(600)).await;
    assert_eq!(active_speaker(&session), None);
}

#[tokio::test(start_paused = true)]
async fn test_speaking_with_live_microphone_cancels_silence() {
    let session = TestCall::outgoing(CallKind::Group)
        .with_config(
            StaticConfig::new()
                .with_e2ee()
                .with_idle_timeouts(Duration::from_secs(300), Duration::from_secs(30)),
        )
        .spawn();
    let mut notices = session.handle.observers().subscribe_notices();
    session.establish(&[PEER_IDENTITY]).await;

    session.emit(microphone_on(PEER_IDENTITY)).await;
    session.emit(speaking(&[(PEER_IDENTITY, 0.7)])).await;
    advance(Duration::from_secs(40)).await;

    assert!(!*session.handle.observers().no_activity.borrow());
    assert_eq!(no_activity_notices(&drain(&mut notices)), 0);

    // Going quiet starts the silence timer from that moment
    session.emit(speaking(&[])).await;
    advance(Duration::from_secs(29)).await;
    assert!(!*session.handle.observers().no_activity.borrow());

    advance(Duration::from_secs(2)).await;
    assert!(*session.handle.observers().no_activity.borrow());
    assert!(drain(&mut notices).contains(&SessionNotice::NoActivity {
        mode: IdleMode::Silence
    }));
}

#[tokio::test(start_paused = true)]
async fn test_continue_call_is_addressed() {
    let session = TestCall::outgoing(CallKind::Group).spawn();
    session.establish(&[PEER_IDENTITY]).await;

    let outcome = session.handle.send_continue_call(PEER_IDENTITY).await.unwrap();

    assert_eq!(outcome, SendOutcome::Sent);
    let sent = session.transport.published_on(Topic::ResumeCall);
    let [packet] = sent.as_slice() else {
        unreachable!("expected one resume packet, got {}", sent.len());
    };
    assert_eq!(packet.targets, Some(vec![PEER_IDENTITY.to_string()]));
}

// ============================================================================
// Duration and connection quality
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_duration_pauses_while_reconnecting() {
    let session = TestCall::outgoing(CallKind::Group).spawn();
    session.establish(&[PEER_IDENTITY]).await;

    advance(Duration::from_secs(5)).await;
    assert_eq!(*session.handle.observers().duration.borrow(), "00:05");

    session.emit(TransportEvent::Reconnecting).await;
    assert_eq!(status(&session), CallStatus::Reconnecting);
    advance(Duration::from_secs(10)).await;
    assert_eq!(session.handle.get_state().await.unwrap().duration_secs, 5);

    session.emit(TransportEvent::Reconnected).await;
    assert_eq!(status(&session), CallStatus::Reconnected);
    advance(Duration::from_secs(3)).await;

    assert_eq!(*session.handle.observers().duration.borrow(), "00:08");
    assert_eq!(session.handle.get_state().await.unwrap().duration_secs, 8);
}

#[tokio::test(start_paused = true)]
async fn test_drop_while_reconnecting_is_reconnect_failed() {
    let session = TestCall::outgoing(CallKind::Group).spawn();
    let mut errors = session.handle.observers().subscribe_errors();
    session.establish(&[PEER_IDENTITY]).await;

    session.emit(TransportEvent::Reconnecting).await;
    session
        .emit(TransportEvent::Disconnected {
            reason: DisconnectReason::ServerShutdown,
        })
        .await;

    assert_eq!(status(&session), CallStatus::ReconnectFailed);
    assert!(matches!(
        drain(&mut errors).as_slice(),
        [CallErrorEvent {
            error: CallError::ReconnectFailed,
            terminal: true,
            ..
        }]
    ));
}

#[tokio::test(start_paused = true)]
async fn test_client_initiated_disconnect_is_clean() {
    let session = TestCall::outgoing(CallKind::Group).spawn();
    let mut errors = session.handle.observers().subscribe_errors();
    session.establish(&[PEER_IDENTITY]).await;

    session
        .emit(TransportEvent::Disconnected {
            reason: DisconnectReason::ClientInitiated,
        })
        .await;

    assert_eq!(status(&session), CallStatus::Disconnected);
    assert!(drain(&mut errors).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_handle_reconnect_uses_new_server() {
    let session = TestCall::outgoing(CallKind::Group).spawn();
    session.establish(&[PEER_IDENTITY]).await;

    let url = session.handle.reconnect(urls(&[SERVER_B])).await.unwrap();

    assert_eq!(url, SERVER_B);
    assert_eq!(status(&session), CallStatus::Reconnected);
    assert_eq!(session.transport.attempts(), urls(&[SERVER_A, SERVER_B]));
}

#[tokio::test(start_paused = true)]
async fn test_poor_quality_advisory_is_throttled() {
    let session = TestCall::outgoing(CallKind::Group).spawn();
    let mut errors = session.handle.observers().subscribe_errors();
    session.establish(&[PEER_IDENTITY]).await;
    let poor = |identity: &str| TransportEvent::ConnectionQualityChanged {
        identity: identity.to_string(),
        quality: ConnectionQuality::Poor,
    };

    session.emit(poor(LOCAL_IDENTITY)).await;
    session.emit(poor(LOCAL_IDENTITY)).await;
    session.emit(poor(PEER_IDENTITY)).await;
    let first = drain(&mut errors);
    assert_eq!(first.len(), 1);
    assert!(matches!(
        first.as_slice(),
        [CallErrorEvent {
            error: CallError::PoorConnection,
            terminal: false,
            ..
        }]
    ));

    advance(Duration::from_secs(61)).await;
    session.emit(poor(LOCAL_IDENTITY)).await;

    assert_eq!(drain(&mut errors).len(), 1);
    assert_eq!(status(&session), CallStatus::Connected);
}

// ============================================================================
// Control messages
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_barrage_from_peer_carries_display_name() {
    let session = TestCall::outgoing(CallKind::Group).spawn();
    let mut notices = session.handle.observers().subscribe_notices();
    session.establish(&[PEER_IDENTITY]).await;

    session
        .emit(peer_packet(
            PEER_IDENTITY,
            &peer_key(),
            &ControlMessage::Chat {
                text: "hello there".to_string(),
                kind: Some(1),
                sent_at: now_millis(),
            },
        ))
        .await;

    assert!(drain(&mut notices).contains(&SessionNotice::Barrage {
        sender: PEER_IDENTITY.to_string(),
        display_name: Some("Alice".to_string()),
        text: "hello there".to_string(),
        kind: Some(1),
    }));
}

#[tokio::test(start_paused = true)]
async fn test_forged_barrage_is_dropped() {
    let session = TestCall::outgoing(CallKind::Group).spawn();
    let mut notices = session.handle.observers().subscribe_notices();
    session.establish(&[PEER_IDENTITY, THIRD_IDENTITY]).await;

    // Sealed with the third participant's key but claimed by the peer
    session
        .emit(peer_packet(
            PEER_IDENTITY,
            &third_key(),
            &ControlMessage::Chat {
                text: "trust me".to_string(),
                kind: None,
                sent_at: now_millis(),
            },
        ))
        .await;

    assert!(drain(&mut notices).is_empty());
    assert_eq!(status(&session), CallStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_send_barrage() {
    let session = TestCall::outgoing(CallKind::Group).spawn();
    session.establish(&[PEER_IDENTITY]).await;

    assert_eq!(
        session.handle.send_barrage("   ", None).await.unwrap(),
        SendOutcome::Dropped
    );
    assert!(session.transport.published().is_empty());

    assert_eq!(
        session.handle.send_barrage("hi all", Some(2)).await.unwrap(),
        SendOutcome::Sent
    );
    let sent = session.transport.published_on(Topic::Chat);
    let [packet] = sent.as_slice() else {
        unreachable!("expected one chat packet, got {}", sent.len());
    };
    assert!(packet.targets.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_barrage_before_key_exchange_is_dropped() {
    let session = TestCall::outgoing(CallKind::Group).spawn();
    session.handle.connect(urls(&[SERVER_A])).await.unwrap();

    let outcome = session.handle.send_barrage("too early", None).await.unwrap();

    assert_eq!(outcome, SendOutcome::Dropped);
    assert!(session.transport.published().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_mute_request_from_peer_mutes_local_microphone() {
    let session = TestCall::outgoing(CallKind::Group).spawn();
    let mut notices = session.handle.observers().subscribe_notices();
    session.establish(&[PEER_IDENTITY]).await;
    session.handle.set_mic_enabled(true).await.unwrap();
    assert_eq!(session.transport.microphone(), Some(true));

    session
        .emit(peer_packet(
            PEER_IDENTITY,
            &peer_key(),
            &ControlMessage::MuteRequest {
                identities: vec![LOCAL_IDENTITY.to_string()],
                sent_at: now_millis(),
            },
        ))
        .await;

    assert_eq!(session.transport.microphone(), Some(false));
    assert!(drain(&mut notices).contains(&SessionNotice::MutedByPeer {
        by: PEER_IDENTITY.to_string()
    }));
    // One state packet for unmuting, one for being muted
    assert_eq!(session.transport.published_on(Topic::MuteState).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_toggle_mute_targets() {
    let session = TestCall::outgoing(CallKind::Group).spawn();
    session.establish(&[PEER_IDENTITY]).await;

    assert!(matches!(
        session.handle.toggle_mute(LOCAL_IDENTITY).await,
        Err(CallError::InvalidState(_))
    ));
    assert!(matches!(
        session.handle.toggle_mute("+9999.1").await,
        Err(CallError::NotFound(_))
    ));
    assert_eq!(
        session.handle.toggle_mute(PEER_IDENTITY).await.unwrap(),
        SendOutcome::Sent
    );

    let sent = session.transport.published_on(Topic::Mute);
    let [packet] = sent.as_slice() else {
        unreachable!("expected one mute packet, got {}", sent.len());
    };
    assert_eq!(packet.targets, Some(vec![PEER_IDENTITY.to_string()]));
}

#[tokio::test(start_paused = true)]
async fn test_publish_failure_surfaces_as_transport_error() {
    let transport = MockTransport::builder()
        .publish_error(TransportError::NotConnected)
        .build();
    let session = TestCall::outgoing(CallKind::Group)
        .with_transport(transport)
        .spawn();
    session.establish(&[PEER_IDENTITY]).await;

    let result = session.handle.send_barrage("hello", None).await;

    assert!(matches!(result, Err(CallError::Transport(_))));
    assert_eq!(status(&session), CallStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_microphone_toggle_survives_undelivered_mute_state() {
    let transport = MockTransport::builder()
        .publish_error(TransportError::NotConnected)
        .build();
    let session = TestCall::outgoing(CallKind::Group)
        .with_transport(transport)
        .spawn();
    session.establish(&[PEER_IDENTITY]).await;

    session.handle.set_mic_enabled(true).await.unwrap();

    assert_eq!(session.transport.microphone(), Some(true));
    assert!(session.transport.published_on(Topic::MuteState).is_empty());
    assert_eq!(status(&session), CallStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_end_call_from_peer() {
    let session = TestCall::outgoing(CallKind::Group).spawn();
    let mut notices = session.handle.observers().subscribe_notices();
    session.establish(&[PEER_IDENTITY]).await;

    session
        .emit(peer_packet(
            PEER_IDENTITY,
            &peer_key(),
            &ControlMessage::EndCall {
                sent_at: now_millis(),
            },
        ))
        .await;

    assert_eq!(status(&session), CallStatus::Disconnected);
    assert!(drain(&mut notices).contains(&SessionNotice::EndedByPeer {
        by: PEER_IDENTITY.to_string()
    }));
    assert_eq!(session.transport.disconnect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_hands_track_local_membership() {
    let session = TestCall::outgoing(CallKind::Group).spawn();
    session.establish(&[PEER_IDENTITY]).await;

    session
        .emit(peer_packet(
            PEER_IDENTITY,
            &peer_key(),
            &ControlMessage::Hands {
                raised: true,
                hands: vec![RaisedHand::new(PEER_IDENTITY), RaisedHand::new(LOCAL_IDENTITY)],
                sent_at: now_millis(),
            },
        ))
        .await;

    assert_eq!(session.handle.observers().hands.borrow().len(), 2);
    assert!(session.handle.get_state().await.unwrap().local_hand_raised);

    session
        .emit(peer_packet(
            PEER_IDENTITY,
            &peer_key(),
            &ControlMessage::Hands {
                raised: false,
                hands: vec![RaisedHand::new(PEER_IDENTITY)],
                sent_at: now_millis(),
            },
        ))
        .await;

    let hands = session.handle.observers().hands.borrow().clone();
    assert_eq!(hands.len(), 1);
    assert_eq!(hands.first().map(|h| h.identity.as_str()), Some(PEER_IDENTITY));
    let state = session.handle.get_state().await.unwrap();
    assert!(!state.local_hand_raised);
    let Some(peer) = state.participants.iter().find(|p| p.identity == PEER_IDENTITY) else {
        unreachable!("peer missing from roster");
    };
    assert!(peer.hand_raised);
}

#[tokio::test(start_paused = true)]
async fn test_raise_hand_publishes_plain_packet() {
    let session = TestCall::outgoing(CallKind::Group).spawn();
    session.establish(&[PEER_IDENTITY]).await;

    assert_eq!(
        session.handle.set_hand_raised(true).await.unwrap(),
        SendOutcome::Sent
    );
    assert!(session.handle.get_state().await.unwrap().local_hand_raised);
    assert_eq!(session.transport.published_on(Topic::RaiseHand).len(), 1);

    session.handle.set_hand_raised(false).await.unwrap();
    assert!(!session.handle.get_state().await.unwrap().local_hand_raised);
    assert_eq!(session.transport.published_on(Topic::CancelHand).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_countdown_ticks_and_clears() {
    let session = TestCall::outgoing(CallKind::Group).spawn();
    let mut notices = session.handle.observers().subscribe_notices();
    session.establish(&[PEER_IDENTITY]).await;

    session
        .emit(peer_packet(
            PEER_IDENTITY,
            &peer_key(),
            &ControlMessage::Countdown {
                action: CountdownAction::Set,
                timer: CountdownTimer {
                    expired_time_ms: 1_700_000_065_000,
                    current_time_ms: 1_700_000_060_000,
                    duration_ms: Some(5_000),
                    operator_identity: PEER_IDENTITY.to_string(),
                },
            },
        ))
        .await;

    assert_eq!(
        *session.handle.observers().countdown.borrow(),
        Some("00:05".to_string())
    );
    assert!(drain(&mut notices).contains(&SessionNotice::CountdownStarted {
        operator: PEER_IDENTITY.to_string(),
        display_name: Some("Alice".to_string()),
        remaining_seconds: 5,
    }));

    advance(Duration::from_secs(1)).await;
    assert_eq!(
        *session.handle.observers().countdown.borrow(),
        Some("00:04".to_string())
    );

    session
        .emit(peer_packet(
            PEER_IDENTITY,
            &peer_key(),
            &ControlMessage::Countdown {
                action: CountdownAction::Clear,
                timer: CountdownTimer::default(),
            },
        ))
        .await;

    assert_eq!(*session.handle.observers().countdown.borrow(), None);
    advance(Duration::from_secs(2)).await;
    assert_eq!(*session.handle.observers().countdown.borrow(), None);
}

#[tokio::test(start_paused = true)]
async fn test_countdown_stops_at_zero() {
    let session = TestCall::outgoing(CallKind::Group).spawn();
    session.establish(&[PEER_IDENTITY]).await;

    session
        .emit(peer_packet(
            PEER_IDENTITY,
            &peer_key(),
            &ControlMessage::Countdown {
                action: CountdownAction::Extend,
                timer: CountdownTimer {
                    expired_time_ms: 2_000,
                    current_time_ms: 0,
                    duration_ms: None,
                    operator_identity: PEER_IDENTITY.to_string(),
                },
            },
        ))
        .await;

    for _ in 0..5 {
        advance(Duration::from_secs(1)).await;
    }

    assert_eq!(
        *session.handle.observers().countdown.borrow(),
        Some("00:00".to_string())
    );
}

// ============================================================================
// Teardown and registry
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_dispose_twice_releases_once() {
    let session = TestCall::outgoing(CallKind::Group).spawn();
    session.establish(&[PEER_IDENTITY]).await;

    session.handle.dispose();
    session.handle.dispose();
    session.task.await.unwrap();

    assert_eq!(session.transport.disconnect_count(), 1);
    assert!(session.handle.is_released());
    assert!(!session.transport.emit(TransportEvent::Reconnecting).await);
}

#[tokio::test(start_paused = true)]
async fn test_events_after_release_are_ignored() {
    let session = TestCall::outgoing(CallKind::Group).spawn();
    let mut errors = session.handle.observers().subscribe_errors();
    session.establish(&[PEER_IDENTITY]).await;

    session.handle.hangup().await.unwrap();
    settle().await;

    assert_eq!(status(&session), CallStatus::Disconnected);
    assert!(session.handle.observers().participants.borrow().is_empty());
    assert!(!session.transport.emit(joined(THIRD_IDENTITY)).await);
    assert!(matches!(
        session.handle.hangup().await,
        Err(CallError::InvalidState(_))
    ));
    assert!(drain(&mut errors).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_registry_tracks_group_call() {
    let (registry, _registry_task) = CallRegistry::spawn(CancellationToken::new());
    let session = TestCall::outgoing(CallKind::Group)
        .with_registry(registry.clone())
        .with_conversation(CONVERSATION_ID)
        .spawn();

    session.establish(&[PEER_IDENTITY]).await;

    let stored = registry.get(&RoomId::new(ROOM_ID)).await.unwrap().unwrap();
    assert!(stored.is_in_calling);
    assert_eq!(stored.conversation_id.as_deref(), Some(CONVERSATION_ID));
    assert_eq!(
        registry
            .get_by_conversation_id(CONVERSATION_ID)
            .await
            .unwrap()
            .map(|c| c.room_id),
        Some(RoomId::new(ROOM_ID))
    );

    // Leaving a group call keeps it joinable
    session.handle.hangup().await.unwrap();
    let stored = registry.get(&RoomId::new(ROOM_ID)).await.unwrap().unwrap();
    assert!(!stored.is_in_calling);
    assert!(registry
        .claim_incoming_notification(&RoomId::new(ROOM_ID))
        .await
        .unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_end_call_marks_room_ended() {
    let (registry, _registry_task) = CallRegistry::spawn(CancellationToken::new());
    let session = TestCall::outgoing(CallKind::Group)
        .with_registry(registry.clone())
        .spawn();
    session.establish(&[PEER_IDENTITY]).await;

    session.handle.end_call().await.unwrap();

    assert_eq!(session.transport.published_on(Topic::EndCall).len(), 1);
    assert!(registry.get(&RoomId::new(ROOM_ID)).await.unwrap().is_none());
    assert!(!registry
        .claim_incoming_notification(&RoomId::new(ROOM_ID))
        .await
        .unwrap());
}
