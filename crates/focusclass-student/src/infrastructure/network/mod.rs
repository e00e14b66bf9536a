//! Network infrastructure for the student application.
//!
//! Handles the TCP control channel to the teacher and dispatches inbound
//! [`ClassMessage`]s to the application layer.
//!
//! Architecture:
//! - [`TeacherConnection::join`] connects, performs the Join handshake, and
//!   only returns once the teacher has said `Welcome` (or why not).
//! - Inbound messages are decoded by a read task and forwarded on an `mpsc`
//!   channel as [`StudentEvent`]s; broadcast frames pass a sequence gate
//!   first so stale ones never reach the application layer.
//! - Outbound messages are sent through the connection, which stamps the
//!   channel sequence at write time.
//!
//! There is no reconnect loop.  `Kick`, `Reject`, and a finished session
//! all mean the student is out until a human joins again, so the link
//! simply reports why it ended and stays down.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use focusclass_core::protocol::codec::{decode_header, decode_payload, encode_message};
use focusclass_core::protocol::messages::{
    FrameMessage, JoinMessage, RejectReason, ScreenSharingMessage, HEADER_SIZE,
};
use focusclass_core::{
    ClassMessage, FrameGate, ParticipantId, ProtocolError, Role, SequenceCounter, SessionSnapshot,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::application::link::TeacherLink;

fn reason_label(reason: RejectReason) -> &'static str {
    match reason {
        RejectReason::InvalidCredentials => "code or password did not match",
        RejectReason::NoActiveSession => "no session is currently active",
        RejectReason::UnsupportedRole => "role not accepted",
    }
}

/// Errors that can occur in the student network layer.
#[derive(Debug, Error)]
pub enum StudentNetworkError {
    /// TCP connection to the teacher failed.
    #[error("failed to connect to teacher at {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    /// An I/O error occurred on the established connection.
    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A message could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// The teacher did not answer the join in time.
    #[error("no reply to the join within {0:?}")]
    HandshakeTimeout(Duration),
    /// The teacher turned the join down.
    #[error("join rejected: {}", reason_label(*.0))]
    Rejected(RejectReason),
    /// The connection closed before the handshake finished.
    #[error("connection closed during the join handshake")]
    ClosedDuringHandshake,
    /// The first reply was something other than `Welcome` or `Reject`.
    #[error("unexpected reply to the join")]
    UnexpectedReply,
}

/// Everything needed to join a session.
#[derive(Debug, Clone)]
pub struct JoinConfig {
    /// Teacher control endpoint as `host:port`.
    pub teacher_addr: String,
    /// Session code as shown on the classroom screen.
    pub code: String,
    /// Session password distributed alongside the code.
    pub password: String,
    /// Name shown in the teacher's roster.
    pub display_name: String,
    /// How long to wait for the teacher's handshake reply.
    pub handshake_timeout: Duration,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            teacher_addr: "127.0.0.1:8765".to_string(),
            code: String::new(),
            password: String::new(),
            display_name: "Student".to_string(),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

/// Events emitted by the network layer to the application layer.
#[derive(Debug)]
pub enum StudentEvent {
    /// The teacher toggled focus enforcement.
    FocusMode {
        enabled: bool,
        target: Option<ParticipantId>,
    },
    /// The teacher's broadcast started or stopped.
    ScreenSharing(ScreenSharingMessage),
    /// A broadcast frame that passed the sequence gate.
    Frame(FrameMessage),
    /// The teacher asked to view this student's screen.
    ScreenRequested,
    /// The teacher removed this student from the session.
    Kicked,
    /// The teacher ended the session.
    SessionEnded,
    /// The connection dropped without a goodbye.  Not emitted after a
    /// local [`TeacherConnection::close`]; the channel just closes then.
    Disconnected { detail: String },
}

// ── Framing ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
enum ReadError {
    /// The teacher closed the stream.
    #[error("connection closed by teacher")]
    Closed,
    #[error("read failed: {0}")]
    Io(std::io::Error),
    /// The header bytes are unusable; framing is lost.
    #[error("bad header: {0}")]
    Header(ProtocolError),
    /// The payload did not decode; framing is still aligned.
    #[error("bad payload: {0}")]
    Payload(ProtocolError),
}

fn classify_io(e: std::io::Error) -> ReadError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        ReadError::Closed
    } else {
        ReadError::Io(e)
    }
}

/// Reads one length-prefixed message: 16-byte header, then exactly the
/// declared payload.
async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<ClassMessage, ReadError> {
    let mut header_buf = [0u8; HEADER_SIZE];
    reader
        .read_exact(&mut header_buf)
        .await
        .map_err(classify_io)?;
    let header = decode_header(&header_buf).map_err(ReadError::Header)?;

    let mut payload = vec![0u8; header.payload_length as usize];
    if !payload.is_empty() {
        reader.read_exact(&mut payload).await.map_err(classify_io)?;
    }
    decode_payload(header.kind, &payload).map_err(ReadError::Payload)
}

// ── Connection ────────────────────────────────────────────────────────────────

/// The authenticated control-channel connection from student to teacher.
pub struct TeacherConnection {
    participant_id: ParticipantId,
    session: SessionSnapshot,
    write_half: Arc<Mutex<Option<OwnedWriteHalf>>>,
    sequence: SequenceCounter,
    closed: Arc<Notify>,
}

impl TeacherConnection {
    /// Connects to the teacher and performs the Join handshake.
    ///
    /// On success the connection is authenticated, the read task is
    /// running, and the returned receiver delivers [`StudentEvent`]s until
    /// the link ends.
    ///
    /// # Errors
    ///
    /// Returns [`StudentNetworkError`] when the TCP connect fails, the
    /// handshake times out, or the teacher rejects the join.
    pub async fn join(
        config: JoinConfig,
    ) -> Result<(Self, mpsc::Receiver<StudentEvent>), StudentNetworkError> {
        let mut stream = TcpStream::connect(&config.teacher_addr)
            .await
            .map_err(|source| StudentNetworkError::ConnectFailed {
                addr: config.teacher_addr.clone(),
                source,
            })?;

        let sequence = SequenceCounter::new();
        let join = ClassMessage::Join(JoinMessage {
            code: config.code,
            password: config.password,
            display_name: config.display_name,
            role: Role::Observer,
        });
        let bytes = encode_message(&join, sequence.next())?;
        stream.write_all(&bytes).await?;

        let reply = match timeout(config.handshake_timeout, read_message(&mut stream)).await {
            Err(_) => {
                return Err(StudentNetworkError::HandshakeTimeout(
                    config.handshake_timeout,
                ))
            }
            Ok(Err(ReadError::Closed)) => return Err(StudentNetworkError::ClosedDuringHandshake),
            Ok(Err(ReadError::Io(e))) => return Err(StudentNetworkError::Io(e)),
            Ok(Err(ReadError::Header(e))) | Ok(Err(ReadError::Payload(e))) => {
                return Err(StudentNetworkError::Protocol(e))
            }
            Ok(Ok(message)) => message,
        };

        let welcome = match reply {
            ClassMessage::Welcome(welcome) => welcome,
            ClassMessage::Reject { reason } => return Err(StudentNetworkError::Rejected(reason)),
            _ => return Err(StudentNetworkError::UnexpectedReply),
        };
        info!(
            participant = %welcome.participant_id,
            code = %welcome.session.code,
            "joined session"
        );

        let (read_half, write_half) = stream.into_split();
        let closed = Arc::new(Notify::new());
        let (events_tx, events_rx) = mpsc::channel(128);
        tokio::spawn(read_loop(
            read_half,
            events_tx,
            Arc::clone(&closed),
            welcome.participant_id,
        ));

        Ok((
            Self {
                participant_id: welcome.participant_id,
                session: welcome.session,
                write_half: Arc::new(Mutex::new(Some(write_half))),
                sequence,
                closed,
            },
            events_rx,
        ))
    }

    /// The identity the teacher assigned during the handshake.
    pub fn participant_id(&self) -> ParticipantId {
        self.participant_id
    }

    /// The session snapshot carried by the `Welcome`.
    pub fn session(&self) -> &SessionSnapshot {
        &self.session
    }

    /// Encodes and sends a message on the control channel.
    pub async fn send_message(&self, message: &ClassMessage) {
        match encode_message(message, self.sequence.next()) {
            Ok(bytes) => {
                let mut guard = self.write_half.lock().await;
                if let Some(writer) = guard.as_mut() {
                    if let Err(e) = writer.write_all(&bytes).await {
                        error!("failed to send {:?}: {e}", message.kind());
                    }
                } else {
                    debug!("send after close dropped: {:?}", message.kind());
                }
            }
            Err(e) => error!("failed to encode outbound message: {e}"),
        }
    }

    /// Shuts the link down from this side.
    ///
    /// Wakes the read task and closes the write half; the event channel
    /// then closes without a [`StudentEvent::Disconnected`].
    pub async fn close(&self) {
        self.closed.notify_one();
        let mut guard = self.write_half.lock().await;
        if let Some(mut writer) = guard.take() {
            let _ = writer.shutdown().await;
        }
    }
}

#[async_trait]
impl TeacherLink for TeacherConnection {
    async fn send(&self, message: &ClassMessage) {
        self.send_message(message).await;
    }
}

/// Reads and dispatches messages until the link ends.
async fn read_loop(
    mut reader: OwnedReadHalf,
    events: mpsc::Sender<StudentEvent>,
    closed: Arc<Notify>,
    participant_id: ParticipantId,
) {
    let mut gate = FrameGate::new();
    loop {
        let message = tokio::select! {
            _ = closed.notified() => break,
            result = read_message(&mut reader) => match result {
                Ok(message) => message,
                Err(ReadError::Payload(e)) => {
                    warn!("skipping undecodable payload: {e}");
                    continue;
                }
                Err(ReadError::Closed) => {
                    let _ = events
                        .send(StudentEvent::Disconnected {
                            detail: "connection closed by teacher".to_string(),
                        })
                        .await;
                    break;
                }
                Err(e) => {
                    error!("control channel read failed: {e}");
                    let _ = events
                        .send(StudentEvent::Disconnected { detail: e.to_string() })
                        .await;
                    break;
                }
            },
        };

        let event = match message {
            ClassMessage::FocusMode(directive) => StudentEvent::FocusMode {
                enabled: directive.enabled,
                target: directive.target,
            },
            ClassMessage::ScreenSharing(notice) => StudentEvent::ScreenSharing(notice),
            ClassMessage::Frame(frame) => {
                if !gate.accept(frame.sequence) {
                    debug!(sequence = frame.sequence, "stale frame dropped");
                    continue;
                }
                StudentEvent::Frame(frame)
            }
            ClassMessage::ScreenRequest { target } => {
                if target != participant_id {
                    debug!(%target, "screen request for another participant ignored");
                    continue;
                }
                StudentEvent::ScreenRequested
            }
            ClassMessage::Kick {
                participant_id: target,
            } => {
                if target != participant_id {
                    debug!(%target, "kick for another participant ignored");
                    continue;
                }
                let _ = events.send(StudentEvent::Kicked).await;
                break;
            }
            ClassMessage::SessionEnded => {
                let _ = events.send(StudentEvent::SessionEnded).await;
                break;
            }
            other => {
                debug!(kind = ?other.kind(), "ignoring message not meant for students");
                continue;
            }
        };
        if events.send(event).await.is_err() {
            break;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
