//! Session orchestration.
//!
//! [`TeacherService`] is the composition root used by the binary and the
//! integration tests.  It owns the long-lived collaborators and runs the
//! session lifecycle:
//!
//! ```text
//! start_session(name)
//!  ├─ SessionManager::begin          -- Created, credentials generated
//!  ├─ bind control + metadata ports  -- failure leaves the session Created
//!  ├─ SessionManager::mark_active    -- Active, joins now accepted
//!  └─ spawn sweep + dispatcher tasks
//!
//! stop_session()
//!  ├─ SessionManager::end            -- repeat calls are no-ops
//!  ├─ stop share streams, notify and drop every connection
//!  └─ join transport tasks, clear the roster, close the record
//! ```
//!
//! Inbound traffic flows `listener -> ConnectionEvent -> EventDispatcher`,
//! which updates the roster, feeds the violation pipeline, and surfaces
//! [`TeacherEvent`]s to whatever front end is attached.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use focusclass_core::domain::participant::Participant;
use focusclass_core::protocol::messages::FocusModeMessage;
use focusclass_core::{
    ClassMessage, FrameGate, FrameSource, ParticipantId, QualityPreset, SessionError,
    SessionStatus, TelemetryPatch, ViolationEvent, ViolationKind,
};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::application::events::{DisconnectReason, TeacherEvent};
use crate::application::manage_session::SessionManager;
use crate::application::roster::ClientRegistry;
use crate::application::sharing::{Fanout, FrameBroadcaster};
use crate::application::violations::{
    ActivityStore, SessionRecord, StoreError, ThrottlePolicy, ViolationPipeline,
};
use crate::infrastructure::network::listener::{
    start_control_listener, ConnectionEvent, ConnectionHub, ListenerContext, TransportConfig,
    TransportError,
};
use crate::infrastructure::network::metadata::{start_metadata_endpoint, SessionMetadata};
use crate::infrastructure::storage::config::AppConfig;

const EVENT_CHANNEL_DEPTH: usize = 256;
const CONNECTION_CHANNEL_DEPTH: usize = 256;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("invalid bind address '{addr}': {source}")]
    BadBindAddress {
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },
}

/// What the presenter needs to put on the board.
#[derive(Debug, Clone)]
pub struct StartedSession {
    pub code: String,
    pub password: String,
    pub control_addr: SocketAddr,
    pub metadata_addr: SocketAddr,
}

/// Handles held only while a session is live.
struct RunningTransport {
    control_addr: SocketAddr,
    metadata_addr: SocketAddr,
    control_task: JoinHandle<()>,
    metadata_task: JoinHandle<()>,
    sweep_task: JoinHandle<()>,
    dispatch_task: JoinHandle<()>,
}

// ── Metadata publishing ───────────────────────────────────────────────────────

/// Rebuilds the `/session/current` document whenever session state moves.
#[derive(Clone)]
struct MetadataPublisher {
    manager: Arc<tokio::sync::Mutex<SessionManager>>,
    registry: Arc<tokio::sync::Mutex<ClientRegistry>>,
    sharing_active: Arc<AtomicBool>,
    control_addr: SocketAddr,
    document: Arc<watch::Sender<Option<SessionMetadata>>>,
}

impl MetadataPublisher {
    async fn publish(&self) {
        let participant_count = self.registry.lock().await.len() as u32;
        let snapshot = self
            .manager
            .lock()
            .await
            .snapshot(participant_count, self.sharing_active.load(Ordering::Relaxed));
        let next = snapshot
            .filter(|s| s.status == SessionStatus::Active)
            .map(|s| SessionMetadata {
                code: s.code,
                presenter_address: self.control_addr.to_string(),
                status: s.status,
                participant_count: s.participant_count,
            });
        let _ = self.document.send(next);
    }
}

// ── Event dispatch ────────────────────────────────────────────────────────────

/// Consumes [`ConnectionEvent`]s from the transport and turns them into
/// roster updates, violation reports, and [`TeacherEvent`]s.
struct EventDispatcher {
    registry: Arc<tokio::sync::Mutex<ClientRegistry>>,
    pipeline: Arc<ViolationPipeline>,
    broadcaster: Arc<tokio::sync::Mutex<FrameBroadcaster>>,
    events: mpsc::Sender<TeacherEvent>,
    publisher: MetadataPublisher,
    battery_warn_threshold: u8,
    /// Per-student inbound frame gates; stale frames are dropped here.
    gates: HashMap<ParticipantId, FrameGate>,
}

impl EventDispatcher {
    async fn run(mut self, mut inbound: mpsc::Receiver<ConnectionEvent>) {
        while let Some(event) = inbound.recv().await {
            match event {
                ConnectionEvent::Joined {
                    participant_id,
                    display_name,
                    remote_addr,
                } => {
                    self.publisher.publish().await;
                    let _ = self
                        .events
                        .send(TeacherEvent::StudentJoined {
                            participant_id,
                            display_name,
                            remote_addr,
                        })
                        .await;
                }
                ConnectionEvent::Message {
                    participant_id,
                    message,
                } => self.handle_message(participant_id, message).await,
                ConnectionEvent::Left {
                    participant,
                    reason,
                } => {
                    self.pipeline.forget(participant.id);
                    self.gates.remove(&participant.id);
                    self.broadcaster
                        .lock()
                        .await
                        .stop_directed(participant.id)
                        .await;
                    self.publisher.publish().await;
                    let _ = self
                        .events
                        .send(TeacherEvent::StudentLeft {
                            participant_id: participant.id,
                            display_name: participant.display_name,
                            reason,
                            telemetry: participant.telemetry,
                        })
                        .await;
                }
            }
        }
        debug!("connection event channel closed; dispatcher exiting");
    }

    async fn handle_message(&mut self, participant_id: ParticipantId, message: ClassMessage) {
        match message {
            ClassMessage::Heartbeat { focus_active } => {
                let patch = TelemetryPatch {
                    focus_compliant: Some(focus_active),
                    ..TelemetryPatch::default()
                };
                self.registry
                    .lock()
                    .await
                    .update_telemetry(participant_id, &patch);
            }
            ClassMessage::Telemetry(patch) => {
                let battery_reported = patch.battery_percent.is_some();
                let merged = self
                    .registry
                    .lock()
                    .await
                    .update_telemetry(participant_id, &patch);
                let Some(telemetry) = merged else {
                    return;
                };
                let _ = self
                    .events
                    .send(TeacherEvent::TelemetryUpdated {
                        participant_id,
                        telemetry,
                    })
                    .await;
                // A low, draining battery is itself a violation; raised here
                // so devices too flat to run an enforcer still get flagged.
                if battery_reported
                    && telemetry.battery_percent < self.battery_warn_threshold
                    && !telemetry.charging
                {
                    self.pipeline
                        .report(
                            participant_id,
                            ViolationKind::LowBattery,
                            format!("battery at {}%", telemetry.battery_percent),
                            SystemTime::now(),
                        )
                        .await;
                }
            }
            ClassMessage::Violation(violation) => {
                let timestamp =
                    SystemTime::UNIX_EPOCH + Duration::from_millis(violation.timestamp_ms);
                self.pipeline
                    .report(participant_id, violation.kind, violation.detail, timestamp)
                    .await;
            }
            ClassMessage::ScreenResponse { approved } => {
                let _ = self
                    .events
                    .send(TeacherEvent::ScreenRequestAnswered {
                        participant_id,
                        approved,
                    })
                    .await;
            }
            ClassMessage::Frame(frame) => {
                let gate = self.gates.entry(participant_id).or_insert_with(FrameGate::new);
                if gate.accept(frame.sequence) {
                    let _ = self
                        .events
                        .send(TeacherEvent::StudentFrame {
                            participant_id,
                            frame,
                        })
                        .await;
                }
            }
            other => {
                debug!(
                    participant = %participant_id,
                    "unexpected {:?} from student; ignored",
                    other.kind()
                );
            }
        }
    }
}

// ── Service ───────────────────────────────────────────────────────────────────

pub struct TeacherService {
    config: AppConfig,
    manager: Arc<tokio::sync::Mutex<SessionManager>>,
    registry: Arc<tokio::sync::Mutex<ClientRegistry>>,
    hub: Arc<ConnectionHub>,
    pipeline: Arc<ViolationPipeline>,
    store: Arc<dyn ActivityStore>,
    broadcaster: Arc<tokio::sync::Mutex<FrameBroadcaster>>,
    events: mpsc::Sender<TeacherEvent>,
    sharing_active: Arc<AtomicBool>,
    /// Cleared to stop the accept loops.
    running: Arc<AtomicBool>,
    metadata_document: Arc<watch::Sender<Option<SessionMetadata>>>,
    transport: Option<RunningTransport>,
}

impl TeacherService {
    /// Wires the service together.  `source` feeds outgoing share streams;
    /// `store` receives the activity journal.
    ///
    /// Returns the receiving end of the presenter event stream alongside
    /// the service.
    pub fn new(
        config: AppConfig,
        source: Arc<dyn FrameSource>,
        store: Arc<dyn ActivityStore>,
    ) -> (Self, mpsc::Receiver<TeacherEvent>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_DEPTH);
        let manager = Arc::new(tokio::sync::Mutex::new(SessionManager::new()));
        let registry = Arc::new(tokio::sync::Mutex::new(ClientRegistry::new()));
        let hub = Arc::new(ConnectionHub::new());
        let sharing_active = Arc::new(AtomicBool::new(false));

        let pipeline = Arc::new(ViolationPipeline::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            events_tx.clone(),
            ThrottlePolicy {
                window: config.monitoring.violation_window(),
                visible_per_window: config.monitoring.visible_violations_per_window,
            },
        ));
        let broadcaster = Arc::new(tokio::sync::Mutex::new(FrameBroadcaster::new(
            source,
            Arc::clone(&hub) as Arc<dyn Fanout>,
            events_tx.clone(),
            Arc::clone(&sharing_active),
        )));
        let (metadata_tx, _) = watch::channel(None);

        let service = Self {
            config,
            manager,
            registry,
            hub,
            pipeline,
            store,
            broadcaster,
            events: events_tx,
            sharing_active,
            running: Arc::new(AtomicBool::new(false)),
            metadata_document: Arc::new(metadata_tx),
            transport: None,
        };
        (service, events_rx)
    }

    /// Creates a session and brings the transports up.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Session`] while another session is active;
    /// [`ServiceError::Transport`] when a port cannot be bound, in which
    /// case the session stays `Created` and a retry is allowed.
    pub async fn start_session(&mut self, name: &str) -> Result<StartedSession, ServiceError> {
        let bind_address: IpAddr =
            self.config.network.bind_address.parse().map_err(|source| {
                ServiceError::BadBindAddress {
                    addr: self.config.network.bind_address.clone(),
                    source,
                }
            })?;

        let session = self.manager.lock().await.begin(name)?;
        self.pipeline.reset_fault_latch();
        self.running.store(true, Ordering::Relaxed);

        let (connection_tx, connection_rx) = mpsc::channel(CONNECTION_CHANNEL_DEPTH);
        let ctx = ListenerContext {
            manager: Arc::clone(&self.manager),
            registry: Arc::clone(&self.registry),
            hub: Arc::clone(&self.hub),
            events: connection_tx,
            sharing_active: Arc::clone(&self.sharing_active),
            config: TransportConfig {
                bind_address,
                control_port: self.config.network.control_port,
                ..TransportConfig::default()
            },
        };
        let (control_addr, control_task) =
            match start_control_listener(ctx, Arc::clone(&self.running)).await {
                Ok(bound) => bound,
                Err(e) => {
                    self.running.store(false, Ordering::Relaxed);
                    return Err(e.into());
                }
            };

        let (metadata_addr, metadata_task) = match start_metadata_endpoint(
            bind_address,
            self.config.network.metadata_port,
            self.metadata_document.subscribe(),
            Arc::clone(&self.running),
        )
        .await
        {
            Ok(bound) => bound,
            Err(e) => {
                self.running.store(false, Ordering::Relaxed);
                let _ = control_task.await;
                return Err(e.into());
            }
        };

        if let Err(e) = self.manager.lock().await.mark_active() {
            self.running.store(false, Ordering::Relaxed);
            let _ = control_task.await;
            let _ = metadata_task.await;
            return Err(e.into());
        }

        // Open entry in the activity journal; closed again by stop_session.
        self.pipeline
            .append_session_record(&SessionRecord {
                session_id: session.id,
                name: session.name.clone(),
                code: session.code.clone(),
                started_at: session.created_at,
                ended_at: None,
                participant_count: 0,
            })
            .await;

        let publisher = MetadataPublisher {
            manager: Arc::clone(&self.manager),
            registry: Arc::clone(&self.registry),
            sharing_active: Arc::clone(&self.sharing_active),
            control_addr,
            document: Arc::clone(&self.metadata_document),
        };
        let sweep_task = self.spawn_sweep();
        let dispatcher = EventDispatcher {
            registry: Arc::clone(&self.registry),
            pipeline: Arc::clone(&self.pipeline),
            broadcaster: Arc::clone(&self.broadcaster),
            events: self.events.clone(),
            publisher: publisher.clone(),
            battery_warn_threshold: self.config.monitoring.battery_warn_threshold,
            gates: HashMap::new(),
        };
        let dispatch_task = tokio::spawn(dispatcher.run(connection_rx));

        self.transport = Some(RunningTransport {
            control_addr,
            metadata_addr,
            control_task,
            metadata_task,
            sweep_task,
            dispatch_task,
        });
        publisher.publish().await;

        info!(code = %session.code, "session '{}' started", session.name);
        Ok(StartedSession {
            code: session.code,
            password: session.password,
            control_addr,
            metadata_addr,
        })
    }

    /// Ends the session: stops streams, notifies and drops every student,
    /// closes the activity record.  Returns `false` when no session was
    /// active; repeat calls are safe.
    pub async fn stop_session(&mut self) -> bool {
        let Some(session) = self.manager.lock().await.end() else {
            return false;
        };

        self.broadcaster.lock().await.stop_all().await;

        let final_count = self.registry.lock().await.len() as u32;
        self.hub
            .shutdown_all(
                Some(ClassMessage::SessionEnded),
                DisconnectReason::SessionEnded,
            )
            .await;

        // Stop accepting; connection tasks drain their queues and exit, and
        // the dispatcher follows once the last event sender drops.
        self.running.store(false, Ordering::Relaxed);
        if let Some(transport) = self.transport.take() {
            let _ = transport.control_task.await;
            let _ = transport.metadata_task.await;
            transport.sweep_task.abort();
            let _ = transport.dispatch_task.await;
        }

        self.registry.lock().await.clear();
        let _ = self.metadata_document.send(None);

        self.pipeline
            .append_session_record(&SessionRecord {
                session_id: session.id,
                name: session.name.clone(),
                code: session.code.clone(),
                started_at: session.created_at,
                ended_at: Some(SystemTime::now()),
                participant_count: final_count,
            })
            .await;

        info!(code = %session.code, "session '{}' ended", session.name);
        true
    }

    /// Every `heartbeat_timeout / 3`, drops students who have gone silent.
    fn spawn_sweep(&self) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        let hub = Arc::clone(&self.hub);
        let threshold = self.config.monitoring.heartbeat_timeout();
        let interval = (threshold / 3).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let stale = registry
                    .lock()
                    .await
                    .stale_participants(Instant::now(), threshold);
                for participant_id in stale {
                    warn!(
                        participant = %participant_id,
                        "no traffic within {threshold:?}; disconnecting"
                    );
                    hub.disconnect(participant_id, DisconnectReason::HeartbeatTimeout, None)
                        .await;
                }
            }
        })
    }

    // ── Presenter operations ──────────────────────────────────────────────

    /// Toggles focus mode class-wide (`target: None`) or nudges a single
    /// student without touching the session flag.  Returns `false` when
    /// there is nothing to apply it to.
    pub async fn set_focus_mode(&self, enabled: bool, target: Option<ParticipantId>) -> bool {
        match target {
            None => {
                if self.manager.lock().await.set_focus_mode(enabled).is_none() {
                    return false;
                }
                self.hub
                    .broadcast(ClassMessage::FocusMode(FocusModeMessage {
                        enabled,
                        target: None,
                    }))
                    .await;
                true
            }
            Some(participant_id) => {
                if !self.registry.lock().await.contains(participant_id) {
                    return false;
                }
                self.hub
                    .send_to(
                        participant_id,
                        ClassMessage::FocusMode(FocusModeMessage {
                            enabled,
                            target: Some(participant_id),
                        }),
                    )
                    .await;
                true
            }
        }
    }

    /// Removes a student: they receive a `Kick` notice, then the connection
    /// closes.  Returns `false` for an unknown id.
    pub async fn kick(&self, participant_id: ParticipantId) -> bool {
        if !self.registry.lock().await.contains(participant_id) {
            return false;
        }
        info!(participant = %participant_id, "kicking participant");
        self.hub
            .disconnect(
                participant_id,
                DisconnectReason::Kicked,
                Some(ClassMessage::Kick { participant_id }),
            )
            .await;
        true
    }

    /// Asks one student to stream their screen.  The answer arrives as
    /// [`TeacherEvent::ScreenRequestAnswered`], and frames (if approved) as
    /// [`TeacherEvent::StudentFrame`].
    pub async fn request_screen(&self, target: ParticipantId) -> bool {
        if !self.registry.lock().await.contains(target) {
            return false;
        }
        self.hub
            .send_to(target, ClassMessage::ScreenRequest { target })
            .await;
        true
    }

    /// Starts the class-wide share stream.
    pub async fn start_sharing(&self, monitor: u8, preset: QualityPreset) {
        self.broadcaster.lock().await.start(monitor, preset);
    }

    pub async fn stop_sharing(&self) {
        self.broadcaster.lock().await.stop().await;
    }

    /// Changes the live stream's quality; `false` when nothing is running.
    pub async fn set_share_quality(&self, preset: QualityPreset) -> bool {
        self.broadcaster.lock().await.set_quality(preset).await
    }

    /// Streams the presenter's screen to a single student.
    pub async fn start_directed_sharing(
        &self,
        target: ParticipantId,
        monitor: u8,
        preset: QualityPreset,
    ) -> bool {
        if !self.registry.lock().await.contains(target) {
            return false;
        }
        self.broadcaster
            .lock()
            .await
            .start_directed(target, monitor, preset);
        true
    }

    pub async fn stop_directed_sharing(&self, target: ParticipantId) {
        self.broadcaster.lock().await.stop_directed(target).await;
    }

    // ── Queries ───────────────────────────────────────────────────────────

    pub async fn session_status(&self) -> Option<SessionStatus> {
        self.manager.lock().await.status()
    }

    pub async fn roster(&self) -> Vec<Participant> {
        self.registry.lock().await.iter().cloned().collect()
    }

    pub async fn participant_count(&self) -> usize {
        self.registry.lock().await.len()
    }

    /// Full stored violation history for one participant, throttled and
    /// suppressed events included.
    ///
    /// # Errors
    ///
    /// Propagates [`StoreError`] from the activity store.
    pub async fn violation_history(
        &self,
        participant_id: ParticipantId,
    ) -> Result<Vec<ViolationEvent>, StoreError> {
        self.store.query_history(participant_id).await
    }

    pub fn control_addr(&self) -> Option<SocketAddr> {
        self.transport.as_ref().map(|t| t.control_addr)
    }

    pub fn metadata_addr(&self) -> Option<SocketAddr> {
        self.transport.as_ref().map(|t| t.metadata_addr)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::activity::MemoryActivityStore;
    use focusclass_core::media::SyntheticSource;
    use uuid::Uuid;

    fn loopback_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.network.bind_address = "127.0.0.1".to_string();
        config.network.control_port = 0;
        config.network.metadata_port = 0;
        config
    }

    fn new_service() -> (TeacherService, mpsc::Receiver<TeacherEvent>, Arc<MemoryActivityStore>) {
        let store = Arc::new(MemoryActivityStore::new());
        let (service, events) = TeacherService::new(
            loopback_config(),
            Arc::new(SyntheticSource::with_resolution(32, 32)),
            Arc::clone(&store) as Arc<dyn ActivityStore>,
        );
        (service, events, store)
    }

    #[tokio::test]
    async fn test_start_session_reports_generated_credentials() {
        // Arrange
        let (mut service, _events, _store) = new_service();

        // Act
        let started = service.start_session("Period 3").await.unwrap();

        // Assert
        assert_eq!(started.code.len(), 8);
        assert_eq!(started.password.len(), 12);
        assert_ne!(started.control_addr.port(), 0);
        assert_ne!(started.metadata_addr.port(), 0);
        assert_eq!(service.session_status().await, Some(SessionStatus::Active));

        service.stop_session().await;
    }

    #[tokio::test]
    async fn test_second_start_while_active_is_rejected() {
        // Arrange
        let (mut service, _events, _store) = new_service();
        service.start_session("first").await.unwrap();

        // Act
        let second = service.start_session("second").await;

        // Assert
        assert!(matches!(
            second,
            Err(ServiceError::Session(SessionError::AlreadyActive))
        ));

        service.stop_session().await;
    }

    #[tokio::test]
    async fn test_stop_session_is_idempotent() {
        // Arrange
        let (mut service, _events, _store) = new_service();
        service.start_session("once").await.unwrap();

        // Act / Assert
        assert!(service.stop_session().await);
        assert!(!service.stop_session().await);
        assert_eq!(service.session_status().await, Some(SessionStatus::Ended));
    }

    #[tokio::test]
    async fn test_stop_without_a_session_is_a_noop() {
        let (mut service, _events, _store) = new_service();
        assert!(!service.stop_session().await);
    }

    #[tokio::test]
    async fn test_session_journal_gets_an_open_and_a_closed_entry() {
        // Arrange
        let (mut service, _events, store) = new_service();

        // Act
        service.start_session("journaled").await.unwrap();
        service.stop_session().await;

        // Assert
        let records = store.session_records();
        assert_eq!(records.len(), 2);
        assert!(records[0].ended_at.is_none());
        assert!(records[1].ended_at.is_some());
        assert_eq!(records[0].session_id, records[1].session_id);
    }

    #[tokio::test]
    async fn test_kick_of_an_unknown_participant_is_refused() {
        let (service, _events, _store) = new_service();
        assert!(!service.kick(Uuid::new_v4()).await);
    }

    #[tokio::test]
    async fn test_focus_mode_without_an_active_session_is_refused() {
        let (service, _events, _store) = new_service();
        assert!(!service.set_focus_mode(true, None).await);
    }

    #[tokio::test]
    async fn test_bad_bind_address_is_rejected_before_session_creation() {
        // Arrange
        let mut config = loopback_config();
        config.network.bind_address = "not-an-address".to_string();
        let (mut service, _events) = TeacherService::new(
            config,
            Arc::new(SyntheticSource::with_resolution(32, 32)),
            Arc::new(MemoryActivityStore::new()),
        );

        // Act
        let result = service.start_session("broken").await;

        // Assert
        assert!(matches!(result, Err(ServiceError::BadBindAddress { .. })));
        assert_eq!(service.session_status().await, None);
    }
}
