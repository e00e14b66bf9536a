//! TCP control listener: accepts students, authenticates them, and runs one
//! reader and one writer task per connection.
//!
//! # Connection lifecycle
//!
//! 1. Accept loop hands the socket to `handle_connection`.
//! 2. The first message must arrive within the handshake deadline and must
//!    be a valid `Join` for the active session; anything else is rejected or
//!    silently closed.  Nothing enters the registry before this point.
//! 3. On success the participant is registered, a [`SendQueue`] and writer
//!    task are attached, and a `Welcome` goes out as the first stamped
//!    message on the connection.
//! 4. The read loop forwards every inbound message to the application layer
//!    and refreshes the participant's liveness clock, until the peer leaves
//!    or a shutdown request (kick, slow consumer, session end) arrives.
//! 5. Teardown drains the queue briefly so final notices actually reach the
//!    wire, then deregisters and reports the departure.
//!
//! The [`ConnectionHub`] is the one shared handle onto all live
//! connections: broadcast, directed send, and forced disconnect all go
//! through it, and it is the transport's implementation of the sharing
//! fan-out.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use focusclass_core::domain::participant::Participant;
use focusclass_core::protocol::codec::{decode_header, decode_payload, encode_message};
use focusclass_core::protocol::messages::{RejectReason, WelcomeMessage, HEADER_SIZE};
use focusclass_core::{ClassMessage, ParticipantId, ProtocolError, Role, SequenceCounter};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::application::events::DisconnectReason;
use crate::application::manage_session::SessionManager;
use crate::application::roster::ClientRegistry;
use crate::application::sharing::{DeliveryTarget, Fanout};
use crate::infrastructure::network::send_queue::{SendQueue, DEFAULT_QUEUE_CAPACITY};

/// How often the accept loop re-checks the shutdown flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// How long the stopping accept loop waits for connection tasks before
/// aborting them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Error type for the control transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Listener tunables.  Tests shrink the timeouts and bind port 0.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub bind_address: IpAddr,
    pub control_port: u16,
    /// Deadline for the first (join) message on a fresh connection.
    pub handshake_timeout: Duration,
    /// Depth of each per-connection outbound queue.
    pub queue_capacity: usize,
    /// How long teardown waits for the writer to flush final notices.
    pub drain_grace: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            control_port: 8765,
            handshake_timeout: Duration::from_secs(10),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            drain_grace: Duration::from_secs(2),
        }
    }
}

/// Events emitted by the transport to the application layer.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// A student authenticated and entered the registry.
    Joined {
        participant_id: ParticipantId,
        display_name: String,
        remote_addr: SocketAddr,
    },
    /// An authenticated student sent a message.
    Message {
        participant_id: ParticipantId,
        message: ClassMessage,
    },
    /// A student's connection ended; `participant` is their final state,
    /// already removed from the registry.
    Left {
        participant: Participant,
        reason: DisconnectReason,
    },
}

// ── Connection hub ────────────────────────────────────────────────────────────

struct PeerHandle {
    queue: Arc<SendQueue>,
    shutdown: mpsc::Sender<DisconnectReason>,
}

/// Shared handle onto every live, authenticated connection.
#[derive(Default)]
pub struct ConnectionHub {
    peers: tokio::sync::Mutex<HashMap<ParticipantId, PeerHandle>>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    async fn insert(
        &self,
        participant_id: ParticipantId,
        queue: Arc<SendQueue>,
        shutdown: mpsc::Sender<DisconnectReason>,
    ) {
        self.peers
            .lock()
            .await
            .insert(participant_id, PeerHandle { queue, shutdown });
    }

    async fn remove(&self, participant_id: ParticipantId) {
        self.peers.lock().await.remove(&participant_id);
    }

    pub async fn connected(&self) -> usize {
        self.peers.lock().await.len()
    }

    /// Enqueues for one participant.  Unknown ids are ignored; a saturated
    /// queue turns into a slow-consumer disconnect.
    pub async fn send_to(&self, participant_id: ParticipantId, message: ClassMessage) {
        let saturated = {
            let peers = self.peers.lock().await;
            match peers.get(&participant_id) {
                Some(peer) => peer.queue.push(message).is_err(),
                None => false,
            }
        };
        if saturated {
            self.request_disconnect(participant_id, DisconnectReason::SlowConsumer)
                .await;
        }
    }

    /// Enqueues for every connected participant.
    pub async fn broadcast(&self, message: ClassMessage) {
        let mut saturated = Vec::new();
        {
            let peers = self.peers.lock().await;
            for (id, peer) in peers.iter() {
                if peer.queue.push(message.clone()).is_err() {
                    saturated.push(*id);
                }
            }
        }
        for participant_id in saturated {
            self.request_disconnect(participant_id, DisconnectReason::SlowConsumer)
                .await;
        }
    }

    /// Asks one connection to tear itself down, optionally after a final
    /// notice (for example a `Kick`).
    pub async fn disconnect(
        &self,
        participant_id: ParticipantId,
        reason: DisconnectReason,
        notice: Option<ClassMessage>,
    ) {
        let peers = self.peers.lock().await;
        if let Some(peer) = peers.get(&participant_id) {
            if let Some(notice) = notice {
                let _ = peer.queue.push(notice);
            }
            let _ = peer.shutdown.try_send(reason);
        }
    }

    /// Asks every connection to tear down, each after the same notice.
    pub async fn shutdown_all(&self, notice: Option<ClassMessage>, reason: DisconnectReason) {
        let peers = self.peers.lock().await;
        for peer in peers.values() {
            if let Some(notice) = &notice {
                let _ = peer.queue.push(notice.clone());
            }
            let _ = peer.shutdown.try_send(reason);
        }
    }

    async fn request_disconnect(&self, participant_id: ParticipantId, reason: DisconnectReason) {
        warn!(participant = %participant_id, "requesting disconnect: {reason}");
        let peers = self.peers.lock().await;
        if let Some(peer) = peers.get(&participant_id) {
            let _ = peer.shutdown.try_send(reason);
        }
    }
}

#[async_trait]
impl Fanout for ConnectionHub {
    async fn deliver(&self, message: ClassMessage, target: DeliveryTarget) {
        match target {
            DeliveryTarget::AllObservers => self.broadcast(message).await,
            DeliveryTarget::One(participant_id) => self.send_to(participant_id, message).await,
        }
    }
}

// ── Framed reads ──────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
enum ReadError {
    /// The peer closed the stream.
    #[error("connection closed by peer")]
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

// ── Listener ──────────────────────────────────────────────────────────────────

/// Everything a connection task needs, cloned per connection.
#[derive(Clone)]
pub struct ListenerContext {
    pub manager: Arc<tokio::sync::Mutex<SessionManager>>,
    pub registry: Arc<tokio::sync::Mutex<ClientRegistry>>,
    pub hub: Arc<ConnectionHub>,
    pub events: mpsc::Sender<ConnectionEvent>,
    /// Mirrors the main share stream so `Welcome` snapshots are honest.
    pub sharing_active: Arc<AtomicBool>,
    pub config: TransportConfig,
}

/// Binds the control port and spawns the accept loop.
///
/// Returns the bound address (useful when the config asked for port 0) and
/// the accept task handle.
///
/// # Errors
///
/// Returns [`TransportError::BindFailed`] when the port cannot be bound.
pub async fn start_control_listener(
    ctx: ListenerContext,
    running: Arc<AtomicBool>,
) -> Result<(SocketAddr, JoinHandle<()>), TransportError> {
    let addr = SocketAddr::new(ctx.config.bind_address, ctx.config.control_port);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| TransportError::BindFailed { addr, source })?;
    let local_addr = listener
        .local_addr()
        .map_err(|source| TransportError::BindFailed { addr, source })?;

    info!("control listener on {local_addr}");
    let task = tokio::spawn(accept_loop(listener, ctx, running));
    Ok((local_addr, task))
}

async fn accept_loop(listener: TcpListener, ctx: ListenerContext, running: Arc<AtomicBool>) {
    let mut connections = JoinSet::new();

    while running.load(Ordering::Relaxed) {
        match timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
            Ok(Ok((stream, remote_addr))) => {
                debug!("inbound connection from {remote_addr}");
                connections.spawn(handle_connection(stream, remote_addr, ctx.clone()));
            }
            Ok(Err(e)) => {
                warn!("accept failed: {e}");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            Err(_) => {
                // Poll tick; loop around and re-check the running flag.
            }
        }
    }

    // Connections were already told to shut down; give them a moment.
    let deadline = tokio::time::sleep(SHUTDOWN_GRACE);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            joined = connections.join_next() => {
                if joined.is_none() {
                    break;
                }
            }
            _ = &mut deadline => {
                warn!("aborting {} lingering connection task(s)", connections.len());
                connections.abort_all();
                break;
            }
        }
    }
    info!("control listener stopped");
}

/// Writes a pre-auth `Reject` straight onto the socket; no queue exists yet.
async fn reject(writer: &mut OwnedWriteHalf, reason: RejectReason) {
    let message = ClassMessage::Reject { reason };
    match encode_message(&message, 0) {
        Ok(bytes) => {
            if let Err(e) = writer.write_all(&bytes).await {
                debug!("could not deliver reject: {e}");
            }
            let _ = writer.shutdown().await;
        }
        Err(e) => error!("failed to encode reject: {e}"),
    }
}

/// Drains the send queue onto the socket, stamping the per-connection
/// sequence at write time.
async fn writer_loop(
    queue: Arc<SendQueue>,
    mut writer: OwnedWriteHalf,
    shutdown: mpsc::Sender<DisconnectReason>,
) {
    let sequence = SequenceCounter::new();
    while let Some(message) = queue.pop().await {
        let bytes = match encode_message(&message, sequence.next()) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("failed to encode outbound {:?}: {e}", message.kind());
                continue;
            }
        };
        if let Err(e) = writer.write_all(&bytes).await {
            debug!("write failed: {e}");
            let _ = shutdown.try_send(DisconnectReason::IoError);
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn handle_connection(stream: TcpStream, remote_addr: SocketAddr, ctx: ListenerContext) {
    let (mut read_half, mut write_half) = stream.into_split();

    // Handshake: the first message, within the deadline, must be a Join.
    let join = match timeout(ctx.config.handshake_timeout, read_message(&mut read_half)).await {
        Err(_) => {
            info!("handshake timeout from {remote_addr}; closing");
            return;
        }
        Ok(Err(e)) => {
            debug!("connection from {remote_addr} ended before joining: {e}");
            return;
        }
        Ok(Ok(ClassMessage::Join(join))) => join,
        Ok(Ok(other)) => {
            debug!(
                "expected join from {remote_addr}, got {:?}; rejecting",
                other.kind()
            );
            reject(&mut write_half, RejectReason::InvalidCredentials).await;
            return;
        }
    };

    if join.role != Role::Observer {
        info!("join from {remote_addr} with non-observer role; rejecting");
        reject(&mut write_half, RejectReason::UnsupportedRole).await;
        return;
    }

    let verdict = {
        let manager = ctx.manager.lock().await;
        if !manager.is_active() {
            Err(RejectReason::NoActiveSession)
        } else if !manager.validate_join(&join.code, &join.password) {
            Err(RejectReason::InvalidCredentials)
        } else {
            Ok(())
        }
    };
    if let Err(reason) = verdict {
        info!("join '{}' from {remote_addr} rejected: {reason:?}", join.display_name);
        reject(&mut write_half, reason).await;
        return;
    }

    // Register, then greet through the queue like any other outbound message.
    let participant_id = {
        let mut registry = ctx.registry.lock().await;
        registry.register(join.display_name.clone(), remote_addr, Role::Observer)
    };
    let participant_count = ctx.registry.lock().await.len() as u32;
    let snapshot = {
        let manager = ctx.manager.lock().await;
        manager.snapshot(participant_count, ctx.sharing_active.load(Ordering::Relaxed))
    };
    let Some(snapshot) = snapshot else {
        // The session ended between validation and here.
        ctx.registry.lock().await.deregister(participant_id);
        reject(&mut write_half, RejectReason::NoActiveSession).await;
        return;
    };

    let queue = Arc::new(SendQueue::new(ctx.config.queue_capacity));
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
    ctx.hub
        .insert(participant_id, Arc::clone(&queue), shutdown_tx.clone())
        .await;
    let _ = queue.push(ClassMessage::Welcome(WelcomeMessage {
        participant_id,
        session: snapshot,
    }));
    let writer = tokio::spawn(writer_loop(Arc::clone(&queue), write_half, shutdown_tx));

    info!("student '{}' joined from {remote_addr}", join.display_name);
    let _ = ctx
        .events
        .send(ConnectionEvent::Joined {
            participant_id,
            display_name: join.display_name.clone(),
            remote_addr,
        })
        .await;

    // Read until the peer leaves or someone asks us to drop them.
    let reason = loop {
        tokio::select! {
            requested = shutdown_rx.recv() => {
                break requested.unwrap_or(DisconnectReason::SessionEnded);
            }
            result = read_message(&mut read_half) => match result {
                Ok(message) => {
                    ctx.registry.lock().await.touch_at(participant_id, Instant::now());
                    if ctx
                        .events
                        .send(ConnectionEvent::Message { participant_id, message })
                        .await
                        .is_err()
                    {
                        break DisconnectReason::SessionEnded;
                    }
                }
                Err(ReadError::Closed) => break DisconnectReason::PeerClosed,
                Err(ReadError::Io(e)) => {
                    warn!("read error from {remote_addr}: {e}");
                    break DisconnectReason::IoError;
                }
                Err(ReadError::Header(e)) => {
                    warn!("unreadable header from {remote_addr}: {e}; dropping connection");
                    break DisconnectReason::IoError;
                }
                Err(ReadError::Payload(e)) => {
                    // Framing survives a payload error; skip the message.
                    warn!("undecodable message from {remote_addr}: {e}");
                }
            }
        }
    };

    // Flush pending notices briefly, then tear down.
    let _ = timeout(ctx.config.drain_grace, queue.drained()).await;
    queue.close();
    let _ = writer.await;
    ctx.hub.remove(participant_id).await;
    let departed = ctx.registry.lock().await.deregister(participant_id);
    if let Some(participant) = departed {
        info!("student '{}' left ({reason})", participant.display_name);
        let _ = ctx
            .events
            .send(ConnectionEvent::Left {
                participant,
                reason,
            })
            .await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
