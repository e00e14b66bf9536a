//! End-to-end session tests through [`TeacherService`].
//!
//! # Purpose
//!
//! These tests run the whole teacher stack (session manager, registry,
//! violation pipeline, transports, metadata endpoint) on loopback ephemeral
//! ports with a hand-rolled student client.  They verify the flows a class
//! actually exercises:
//!
//! - join → presenter event → metadata document updated
//! - violation flood → three shown per window, everything journaled
//! - low-battery telemetry → derived violation, silenced while charging
//! - focus mode broadcast, kick, screen request round trip, session end
//!
//! # Event flow under test
//!
//! ```text
//! Student socket ──> listener ──ConnectionEvent──> dispatcher
//!                                                    │
//!                        roster / pipeline / gates <─┤
//!                                                    └─TeacherEvent──> test
//! ```

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use uuid::Uuid;

use focusclass_core::media::SyntheticSource;
use focusclass_core::protocol::codec::{decode_header, decode_payload, encode_message};
use focusclass_core::protocol::messages::{
    FrameMessage, JoinMessage, ViolationMessage, HEADER_SIZE,
};
use focusclass_core::{ClassMessage, Role, TelemetryPatch, ViolationKind};
use focusclass_teacher::application::events::{DisconnectReason, TeacherEvent};
use focusclass_teacher::infrastructure::storage::activity::MemoryActivityStore;
use focusclass_teacher::infrastructure::storage::config::AppConfig;
use focusclass_teacher::service::{StartedSession, TeacherService};

// ── Harness ───────────────────────────────────────────────────────────────────

async fn start_service() -> (
    TeacherService,
    mpsc::Receiver<TeacherEvent>,
    StartedSession,
) {
    let mut config = AppConfig::default();
    config.network.bind_address = "127.0.0.1".to_string();
    config.network.control_port = 0;
    config.network.metadata_port = 0;

    let (mut service, events) = TeacherService::new(
        config,
        Arc::new(SyntheticSource::with_resolution(64, 40)),
        Arc::new(MemoryActivityStore::new()),
    );
    let started = service.start_session("Integration").await.unwrap();
    (service, events, started)
}

async fn send(stream: &mut TcpStream, message: &ClassMessage) {
    let bytes = encode_message(message, 0).unwrap();
    stream.write_all(&bytes).await.unwrap();
}

async fn read_frame(stream: &mut TcpStream) -> Option<ClassMessage> {
    let mut header_buf = [0u8; HEADER_SIZE];
    stream.read_exact(&mut header_buf).await.ok()?;
    let header = decode_header(&header_buf).expect("teacher must emit valid headers");
    let mut payload = vec![0u8; header.payload_length as usize];
    if !payload.is_empty() {
        stream.read_exact(&mut payload).await.ok()?;
    }
    Some(decode_payload(header.kind, &payload).expect("teacher payloads must decode"))
}

/// Joins as `name` and waits for both the `Welcome` and the presenter-side
/// `StudentJoined` event, so tests start from a settled state.
async fn join(
    started: &StartedSession,
    events: &mut mpsc::Receiver<TeacherEvent>,
    name: &str,
) -> (TcpStream, Uuid) {
    let mut stream = TcpStream::connect(started.control_addr).await.unwrap();
    send(
        &mut stream,
        &ClassMessage::Join(JoinMessage {
            code: started.code.clone(),
            password: started.password.clone(),
            display_name: name.to_string(),
            role: Role::Observer,
        }),
    )
    .await;
    let participant_id = match timeout(Duration::from_secs(2), read_frame(&mut stream)).await {
        Ok(Some(ClassMessage::Welcome(welcome))) => welcome.participant_id,
        other => panic!("expected Welcome, got {other:?}"),
    };
    match timeout(Duration::from_secs(2), events.recv()).await {
        Ok(Some(TeacherEvent::StudentJoined { .. })) => {}
        other => panic!("expected StudentJoined, got {other:?}"),
    }
    (stream, participant_id)
}

async fn next_event(events: &mut mpsc::Receiver<TeacherEvent>) -> TeacherEvent {
    match timeout(Duration::from_secs(3), events.recv()).await {
        Ok(Some(event)) => event,
        other => panic!("expected an event, got {other:?}"),
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

async fn http_get(addr: std::net::SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(format!("GET {path} HTTP/1.1\r\nHost: t\r\n\r\n").as_bytes())
        .await
        .unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    String::from_utf8(response).unwrap()
}

// ── Flows ─────────────────────────────────────────────────────────────────────

/// Tests that a join is visible everywhere it should be: the presenter event
/// stream, the roster, and the public metadata document.
#[tokio::test]
async fn test_join_updates_roster_and_metadata() {
    // Arrange
    let (mut service, mut events, started) = start_service().await;

    // Act
    let (_stream, participant_id) = join(&started, &mut events, "amara").await;

    // Assert
    let roster = service.roster().await;
    assert_eq!(roster.len(), 1);
    assert_eq!(roster[0].id, participant_id);
    assert_eq!(roster[0].display_name, "amara");

    let response = http_get(started.metadata_addr, "/session/current").await;
    assert!(response.starts_with("HTTP/1.1 200 OK"));
    let body = response.split("\r\n\r\n").nth(1).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(parsed["code"], started.code.as_str());
    assert_eq!(parsed["participant_count"], 1);
    assert_eq!(parsed["status"], "active");

    service.stop_session().await;
}

/// Tests the violation throttle end to end: five identical reports in one
/// window surface exactly three presenter events, numbered 1..=3, while all
/// five land in the journal and the participant's history.
#[tokio::test]
async fn test_violation_flood_shows_three_and_journals_five() {
    // Arrange
    let (mut service, mut events, started) = start_service().await;
    let (mut stream, participant_id) = join(&started, &mut events, "liam").await;

    // Act: five tab switches back to back.
    for n in 0..5 {
        send(
            &mut stream,
            &ClassMessage::Violation(ViolationMessage {
                kind: ViolationKind::TabSwitch,
                detail: format!("tab {n}"),
                timestamp_ms: now_ms(),
            }),
        )
        .await;
    }

    // Assert: exactly three visible, counted 1, 2, 3.
    for expected in 1..=3u32 {
        match next_event(&mut events).await {
            TeacherEvent::ViolationObserved {
                event,
                display_count,
            } => {
                assert_eq!(event.participant_id, participant_id);
                assert_eq!(event.kind, ViolationKind::TabSwitch);
                assert_eq!(display_count, expected);
            }
            other => panic!("expected ViolationObserved, got {other:?}"),
        }
    }
    // Nothing further surfaces for the suppressed pair.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(events.try_recv().is_err());

    // The journal and the roster history still hold all five.
    let history = service.violation_history(participant_id).await.unwrap();
    assert_eq!(history.len(), 5);
    let roster = service.roster().await;
    assert_eq!(roster[0].telemetry.violation_count, 5);

    service.stop_session().await;
}

/// Tests the derived low-battery violation: a discharging battery below the
/// threshold raises one, while the same level on a charger stays silent.
#[tokio::test]
async fn test_low_battery_telemetry_raises_a_derived_violation() {
    // Arrange
    let (mut service, mut events, started) = start_service().await;
    let (mut stream, participant_id) = join(&started, &mut events, "gia").await;

    // Act: 15% and draining.
    send(
        &mut stream,
        &ClassMessage::Telemetry(TelemetryPatch {
            battery_percent: Some(15),
            charging: Some(false),
            ..TelemetryPatch::default()
        }),
    )
    .await;

    // Assert: the merged telemetry surfaces, then the derived violation.
    match next_event(&mut events).await {
        TeacherEvent::TelemetryUpdated { telemetry, .. } => {
            assert_eq!(telemetry.battery_percent, 15);
            assert!(!telemetry.charging);
        }
        other => panic!("expected TelemetryUpdated, got {other:?}"),
    }
    match next_event(&mut events).await {
        TeacherEvent::ViolationObserved { event, .. } => {
            assert_eq!(event.participant_id, participant_id);
            assert_eq!(event.kind, ViolationKind::LowBattery);
        }
        other => panic!("expected the derived LowBattery, got {other:?}"),
    }

    // Act: same level, but now on a charger.
    send(
        &mut stream,
        &ClassMessage::Telemetry(TelemetryPatch {
            battery_percent: Some(15),
            charging: Some(true),
            ..TelemetryPatch::default()
        }),
    )
    .await;

    // Assert: telemetry only; no violation while charging.
    match next_event(&mut events).await {
        TeacherEvent::TelemetryUpdated { telemetry, .. } => assert!(telemetry.charging),
        other => panic!("expected TelemetryUpdated, got {other:?}"),
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(events.try_recv().is_err());

    service.stop_session().await;
}

/// Tests that a class-wide focus toggle reaches the student over the wire.
#[tokio::test]
async fn test_focus_mode_toggle_is_broadcast() {
    // Arrange
    let (mut service, mut events, started) = start_service().await;
    let (mut stream, _) = join(&started, &mut events, "noah").await;

    // Act
    assert!(service.set_focus_mode(true, None).await);

    // Assert
    match timeout(Duration::from_secs(2), read_frame(&mut stream)).await {
        Ok(Some(ClassMessage::FocusMode(focus))) => {
            assert!(focus.enabled);
            assert_eq!(focus.target, None);
        }
        other => panic!("expected FocusMode, got {other:?}"),
    }

    service.stop_session().await;
}

/// Tests the kick flow through the service: notice on the wire, close,
/// departure event, roster cleared.
#[tokio::test]
async fn test_kick_removes_the_student() {
    // Arrange
    let (mut service, mut events, started) = start_service().await;
    let (mut stream, participant_id) = join(&started, &mut events, "zoe").await;

    // Act
    assert!(service.kick(participant_id).await);

    // Assert: the student sees the notice, then EOF.
    match timeout(Duration::from_secs(2), read_frame(&mut stream)).await {
        Ok(Some(ClassMessage::Kick { participant_id: id })) => assert_eq!(id, participant_id),
        other => panic!("expected Kick, got {other:?}"),
    }
    assert!(read_frame(&mut stream).await.is_none());

    match next_event(&mut events).await {
        TeacherEvent::StudentLeft {
            participant_id: id,
            reason,
            ..
        } => {
            assert_eq!(id, participant_id);
            assert_eq!(reason, DisconnectReason::Kicked);
        }
        other => panic!("expected StudentLeft, got {other:?}"),
    }
    assert_eq!(service.participant_count().await, 0);

    service.stop_session().await;
}

/// Tests the screen-request round trip and the inbound frame gate: the
/// request goes out, the approval comes back, and only forward-moving frame
/// sequences surface to the presenter.
#[tokio::test]
async fn test_screen_request_roundtrip_gates_stale_frames() {
    // Arrange
    let (mut service, mut events, started) = start_service().await;
    let (mut stream, participant_id) = join(&started, &mut events, "raj").await;

    // Act: request, approve.
    assert!(service.request_screen(participant_id).await);
    match timeout(Duration::from_secs(2), read_frame(&mut stream)).await {
        Ok(Some(ClassMessage::ScreenRequest { target })) => assert_eq!(target, participant_id),
        other => panic!("expected ScreenRequest, got {other:?}"),
    }
    send(&mut stream, &ClassMessage::ScreenResponse { approved: true }).await;
    match next_event(&mut events).await {
        TeacherEvent::ScreenRequestAnswered { approved, .. } => assert!(approved),
        other => panic!("expected ScreenRequestAnswered, got {other:?}"),
    }

    // Act: frames 5, 3 (stale), 9.
    for sequence in [5u64, 3, 9] {
        send(
            &mut stream,
            &ClassMessage::Frame(FrameMessage {
                sequence,
                monitor: 0,
                width: 8,
                height: 8,
                data: vec![0xAB; 16],
            }),
        )
        .await;
    }

    // Assert: 5 and 9 surface; 3 is dropped by the gate.
    for expected in [5u64, 9] {
        match next_event(&mut events).await {
            TeacherEvent::StudentFrame { frame, .. } => assert_eq!(frame.sequence, expected),
            other => panic!("expected StudentFrame, got {other:?}"),
        }
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(events.try_recv().is_err());

    service.stop_session().await;
}

/// Tests that ending the session tells the students, closes their
/// connections, and takes the metadata document down.
#[tokio::test]
async fn test_stop_session_notifies_students_and_clears_metadata() {
    // Arrange
    let (mut service, mut events, started) = start_service().await;
    let (mut stream, _) = join(&started, &mut events, "ava").await;
    let metadata_addr = started.metadata_addr;

    // Act
    assert!(service.stop_session().await);

    // Assert: the student was told before the close.
    match timeout(Duration::from_secs(2), read_frame(&mut stream)).await {
        Ok(Some(ClassMessage::SessionEnded)) => {}
        other => panic!("expected SessionEnded, got {other:?}"),
    }
    assert!(read_frame(&mut stream).await.is_none());
    assert_eq!(service.participant_count().await, 0);

    // The metadata endpoint is gone with the session.
    assert!(TcpStream::connect(metadata_addr).await.is_err());
}

/// Tests that heartbeats quietly keep the roster's focus flag current.
#[tokio::test]
async fn test_heartbeats_update_the_focus_flag() {
    // Arrange
    let (mut service, mut events, started) = start_service().await;
    let (mut stream, _) = join(&started, &mut events, "ben").await;

    // Act
    send(&mut stream, &ClassMessage::Heartbeat { focus_active: false }).await;

    // Assert: no presenter event, but the roster reflects it shortly.
    let mut updated = false;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let roster = service.roster().await;
        if roster.first().is_some_and(|p| !p.telemetry.focus_compliant) {
            updated = true;
            break;
        }
    }
    assert!(updated, "heartbeat must reach the roster");
    assert!(events.try_recv().is_err(), "heartbeats are not presenter events");

    service.stop_session().await;
}
