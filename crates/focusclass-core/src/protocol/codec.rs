//! Binary codec for encoding and decoding FocusClass protocol messages.
//!
//! Wire format:
//! ```text
//! [version:1][kind:1][reserved:2][payload_len:4][seq:8][payload:N]
//! ```
//! Total header size: 16 bytes. All multi-byte integers are big-endian.
//!
//! The header sequence is the per-connection counter stamped by whichever side
//! sends the message. Screen frames additionally carry their own stream
//! sequence inside the payload; receivers gate on that one.

use crate::domain::participant::{Role, TelemetryPatch, ViolationKind};
use crate::domain::quality::QualityPreset;
use crate::domain::session::{SessionSnapshot, SessionStatus};
use crate::protocol::messages::{
    ClassMessage, FocusModeMessage, FrameMessage, JoinMessage, MessageHeader, MessageKind,
    RejectReason, ScreenSharingMessage, SharingAction, ViolationMessage, WelcomeMessage,
    HEADER_SIZE, MAX_PAYLOAD_LEN, PROTOCOL_VERSION,
};
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the minimum required length.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The kind byte in the header is not a recognized value.
    #[error("unknown message kind: 0x{0:02X}")]
    UnknownMessageKind(u8),

    /// The protocol version in the header is not supported.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// The payload could not be parsed (field value out of range, UTF-8 error, etc.).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The encoded payload length field does not match the actual data available.
    #[error("payload length mismatch: header says {declared}, available is {available}")]
    PayloadLengthMismatch { declared: usize, available: usize },

    /// The declared payload length exceeds [`MAX_PAYLOAD_LEN`].
    #[error("payload too large: {declared} bytes (limit {limit})")]
    PayloadTooLarge { declared: usize, limit: usize },
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`ClassMessage`] into a byte vector including the 16-byte header.
///
/// The sequence number is **not** set by this function – pass a pre-incremented
/// value from a [`crate::protocol::SequenceCounter`].
///
/// # Errors
///
/// Returns [`ProtocolError`] if serialization fails.
///
/// # Examples
///
/// ```rust
/// use focusclass_core::protocol::{encode_message, decode_message};
/// use focusclass_core::protocol::messages::ClassMessage;
///
/// let msg = ClassMessage::Heartbeat { focus_active: true };
/// let bytes = encode_message(&msg, 0).unwrap();
/// let (decoded, consumed) = decode_message(&bytes).unwrap();
/// assert_eq!(decoded, msg);
/// assert_eq!(consumed, bytes.len());
/// ```
pub fn encode_message(msg: &ClassMessage, sequence_number: u64) -> Result<Vec<u8>, ProtocolError> {
    let payload = encode_payload(msg);
    let payload_len = payload.len() as u32;

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());

    // Header: version (1) + kind (1) + reserved (2) + payload_len (4) +
    //         seq (8) = 16 bytes
    buf.push(PROTOCOL_VERSION);
    buf.push(msg.kind() as u8);
    buf.push(0x00); // reserved
    buf.push(0x00); // reserved
    buf.extend_from_slice(&payload_len.to_be_bytes());
    buf.extend_from_slice(&sequence_number.to_be_bytes());

    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Decodes one [`ClassMessage`] from the beginning of `bytes`.
///
/// Returns the decoded message and the total number of bytes consumed
/// (header + payload), so the caller can advance their read cursor.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the bytes are malformed.
pub fn decode_message(bytes: &[u8]) -> Result<(ClassMessage, usize), ProtocolError> {
    let header = decode_header(bytes)?;
    let payload_len = header.payload_length as usize;

    let total_needed = HEADER_SIZE + payload_len;
    if bytes.len() < total_needed {
        return Err(ProtocolError::PayloadLengthMismatch {
            declared: payload_len,
            available: bytes.len() - HEADER_SIZE,
        });
    }

    let payload = &bytes[HEADER_SIZE..total_needed];
    let msg = decode_payload(header.kind, payload)?;
    Ok((msg, total_needed))
}

/// Decodes just the 16-byte header, validating version, kind, and length cap.
///
/// Connection read loops use this to learn how many payload bytes to pull off
/// the socket before calling [`decode_payload`].
pub fn decode_header(bytes: &[u8]) -> Result<MessageHeader, ProtocolError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let version = bytes[0];
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }

    let kind_byte = bytes[1];
    let kind =
        MessageKind::try_from(kind_byte).map_err(|_| ProtocolError::UnknownMessageKind(kind_byte))?;

    // bytes[2..4] are reserved – ignored on decode

    let payload_length = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if payload_length > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::PayloadTooLarge {
            declared: payload_length as usize,
            limit: MAX_PAYLOAD_LEN as usize,
        });
    }

    let sequence_number = u64::from_be_bytes([
        bytes[8], bytes[9], bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15],
    ]);

    Ok(MessageHeader {
        version,
        kind,
        payload_length,
        sequence_number,
    })
}

// ── Payload encoding ──────────────────────────────────────────────────────────

fn encode_payload(msg: &ClassMessage) -> Vec<u8> {
    let mut buf = Vec::new();
    match msg {
        ClassMessage::Join(m) => encode_join(&mut buf, m),
        ClassMessage::Welcome(m) => encode_welcome(&mut buf, m),
        ClassMessage::Reject { reason } => buf.push(*reason as u8),
        ClassMessage::Heartbeat { focus_active } => buf.push(u8::from(*focus_active)),
        ClassMessage::SessionEnded => {} // empty payload
        ClassMessage::FocusMode(m) => encode_focus_mode(&mut buf, m),
        ClassMessage::Kick { participant_id } => buf.extend_from_slice(participant_id.as_bytes()),
        ClassMessage::ScreenRequest { target } => buf.extend_from_slice(target.as_bytes()),
        ClassMessage::ScreenSharing(m) => encode_screen_sharing(&mut buf, m),
        ClassMessage::Violation(m) => encode_violation(&mut buf, m),
        ClassMessage::Telemetry(m) => encode_telemetry(&mut buf, m),
        ClassMessage::ScreenResponse { approved } => buf.push(u8::from(*approved)),
        ClassMessage::Frame(m) => encode_frame(&mut buf, m),
    }
    buf
}

/// Decodes a payload whose kind was already read from the header.
pub fn decode_payload(kind: MessageKind, payload: &[u8]) -> Result<ClassMessage, ProtocolError> {
    match kind {
        MessageKind::Join => decode_join(payload).map(ClassMessage::Join),
        MessageKind::Welcome => decode_welcome(payload).map(ClassMessage::Welcome),
        MessageKind::Reject => {
            require_len(payload, 1, "Reject")?;
            let reason = RejectReason::try_from(payload[0]).map_err(|_| {
                ProtocolError::MalformedPayload(format!("unknown reject reason: {}", payload[0]))
            })?;
            Ok(ClassMessage::Reject { reason })
        }
        MessageKind::Heartbeat => {
            require_len(payload, 1, "Heartbeat")?;
            Ok(ClassMessage::Heartbeat {
                focus_active: payload[0] != 0,
            })
        }
        MessageKind::SessionEnded => Ok(ClassMessage::SessionEnded),
        MessageKind::FocusMode => decode_focus_mode(payload).map(ClassMessage::FocusMode),
        MessageKind::Kick => {
            let participant_id = read_uuid(payload, 0)?;
            Ok(ClassMessage::Kick { participant_id })
        }
        MessageKind::ScreenRequest => {
            let target = read_uuid(payload, 0)?;
            Ok(ClassMessage::ScreenRequest { target })
        }
        MessageKind::ScreenSharing => {
            decode_screen_sharing(payload).map(ClassMessage::ScreenSharing)
        }
        MessageKind::Violation => decode_violation(payload).map(ClassMessage::Violation),
        MessageKind::Telemetry => decode_telemetry(payload).map(ClassMessage::Telemetry),
        MessageKind::ScreenResponse => {
            require_len(payload, 1, "ScreenResponse")?;
            Ok(ClassMessage::ScreenResponse {
                approved: payload[0] != 0,
            })
        }
        MessageKind::Frame => decode_frame(payload).map(ClassMessage::Frame),
    }
}

// ── Per-message encode helpers ────────────────────────────────────────────────

fn encode_join(buf: &mut Vec<u8>, m: &JoinMessage) {
    write_length_prefixed_string(buf, &m.code);
    write_length_prefixed_string(buf, &m.password);
    write_length_prefixed_string(buf, &m.display_name);
    buf.push(m.role as u8);
}

fn encode_welcome(buf: &mut Vec<u8>, m: &WelcomeMessage) {
    buf.extend_from_slice(m.participant_id.as_bytes());
    encode_snapshot(buf, &m.session);
}

fn encode_snapshot(buf: &mut Vec<u8>, s: &SessionSnapshot) {
    buf.extend_from_slice(s.session_id.as_bytes());
    write_length_prefixed_string(buf, &s.code);
    buf.push(s.status as u8);
    buf.push(u8::from(s.focus_mode));
    buf.push(u8::from(s.sharing_active));
    buf.extend_from_slice(&s.participant_count.to_be_bytes());
}

fn encode_focus_mode(buf: &mut Vec<u8>, m: &FocusModeMessage) {
    buf.push(u8::from(m.enabled));
    match &m.target {
        Some(id) => {
            buf.push(0x01);
            buf.extend_from_slice(id.as_bytes());
        }
        None => buf.push(0x00),
    }
}

fn encode_screen_sharing(buf: &mut Vec<u8>, m: &ScreenSharingMessage) {
    buf.push(m.action as u8);
    buf.push(m.monitor);
    buf.push(m.quality as u8);
}

fn encode_violation(buf: &mut Vec<u8>, m: &ViolationMessage) {
    write_length_prefixed_string(buf, m.kind.as_str());
    write_length_prefixed_string(buf, &m.detail);
    buf.extend_from_slice(&m.timestamp_ms.to_be_bytes());
}

fn encode_telemetry(buf: &mut Vec<u8>, m: &TelemetryPatch) {
    write_option_u8(buf, m.battery_percent);
    write_option_u8(buf, m.charging.map(u8::from));
    write_option_u8(buf, m.focus_compliant.map(u8::from));
    match m.keystroke_delta {
        Some(delta) => {
            buf.push(0x01);
            buf.extend_from_slice(&delta.to_be_bytes());
        }
        None => buf.push(0x00),
    }
}

fn encode_frame(buf: &mut Vec<u8>, m: &FrameMessage) {
    buf.extend_from_slice(&m.sequence.to_be_bytes());
    buf.push(m.monitor);
    buf.extend_from_slice(&m.width.to_be_bytes());
    buf.extend_from_slice(&m.height.to_be_bytes());
    buf.extend_from_slice(&(m.data.len() as u32).to_be_bytes());
    buf.extend_from_slice(&m.data);
}

// ── Per-message decode helpers ────────────────────────────────────────────────

fn decode_join(p: &[u8]) -> Result<JoinMessage, ProtocolError> {
    let (code, off) = read_length_prefixed_string(p, 0)?;
    let (password, off) = read_length_prefixed_string(p, off)?;
    let (display_name, off) = read_length_prefixed_string(p, off)?;
    require_len(p, off + 1, "Join.role")?;
    let role = Role::try_from(p[off])
        .map_err(|_| ProtocolError::MalformedPayload(format!("unknown role: {}", p[off])))?;
    Ok(JoinMessage {
        code,
        password,
        display_name,
        role,
    })
}

fn decode_welcome(p: &[u8]) -> Result<WelcomeMessage, ProtocolError> {
    let participant_id = read_uuid(p, 0)?;
    let session = decode_snapshot(p, 16)?;
    Ok(WelcomeMessage {
        participant_id,
        session,
    })
}

fn decode_snapshot(p: &[u8], offset: usize) -> Result<SessionSnapshot, ProtocolError> {
    let session_id = read_uuid(p, offset)?;
    let (code, off) = read_length_prefixed_string(p, offset + 16)?;
    require_len(p, off + 3 + 4, "SessionSnapshot")?;
    let status = SessionStatus::try_from(p[off]).map_err(|_| {
        ProtocolError::MalformedPayload(format!("unknown session status: {}", p[off]))
    })?;
    let focus_mode = p[off + 1] != 0;
    let sharing_active = p[off + 2] != 0;
    let participant_count =
        u32::from_be_bytes([p[off + 3], p[off + 4], p[off + 5], p[off + 6]]);
    Ok(SessionSnapshot {
        session_id,
        code,
        status,
        focus_mode,
        sharing_active,
        participant_count,
    })
}

fn decode_focus_mode(p: &[u8]) -> Result<FocusModeMessage, ProtocolError> {
    require_len(p, 2, "FocusMode")?;
    let enabled = p[0] != 0;
    let target = match p[1] {
        0x00 => None,
        0x01 => Some(read_uuid(p, 2)?),
        other => {
            return Err(ProtocolError::MalformedPayload(format!(
                "invalid option tag in FocusMode.target: {other}"
            )))
        }
    };
    Ok(FocusModeMessage { enabled, target })
}

fn decode_screen_sharing(p: &[u8]) -> Result<ScreenSharingMessage, ProtocolError> {
    require_len(p, 3, "ScreenSharing")?;
    let action = SharingAction::try_from(p[0]).map_err(|_| {
        ProtocolError::MalformedPayload(format!("unknown sharing action: {}", p[0]))
    })?;
    let monitor = p[1];
    let quality = QualityPreset::try_from(p[2])
        .map_err(|_| ProtocolError::MalformedPayload(format!("unknown quality preset: {}", p[2])))?;
    Ok(ScreenSharingMessage {
        action,
        monitor,
        quality,
    })
}

fn decode_violation(p: &[u8]) -> Result<ViolationMessage, ProtocolError> {
    let (kind_str, off) = read_length_prefixed_string(p, 0)?;
    let (detail, off) = read_length_prefixed_string(p, off)?;
    let timestamp_ms = read_u64(p, off)?;
    Ok(ViolationMessage {
        kind: ViolationKind::from_wire(&kind_str),
        detail,
        timestamp_ms,
    })
}

fn decode_telemetry(p: &[u8]) -> Result<TelemetryPatch, ProtocolError> {
    let (battery_percent, off) = read_option_u8(p, 0, "Telemetry.battery_percent")?;
    let (charging, off) = read_option_u8(p, off, "Telemetry.charging")?;
    let (focus_compliant, off) = read_option_u8(p, off, "Telemetry.focus_compliant")?;

    require_len(p, off + 1, "Telemetry.keystroke_delta")?;
    let keystroke_delta = match p[off] {
        0x00 => None,
        0x01 => {
            require_len(p, off + 5, "Telemetry.keystroke_delta")?;
            Some(u32::from_be_bytes([
                p[off + 1],
                p[off + 2],
                p[off + 3],
                p[off + 4],
            ]))
        }
        other => {
            return Err(ProtocolError::MalformedPayload(format!(
                "invalid option tag in Telemetry.keystroke_delta: {other}"
            )))
        }
    };

    Ok(TelemetryPatch {
        battery_percent,
        charging: charging.map(|v| v != 0),
        focus_compliant: focus_compliant.map(|v| v != 0),
        keystroke_delta,
    })
}

fn decode_frame(p: &[u8]) -> Result<FrameMessage, ProtocolError> {
    // 8 (seq) + 1 (monitor) + 4 (width) + 4 (height) + 4 (data_len) = 21
    require_len(p, 21, "Frame")?;
    let sequence = read_u64(p, 0)?;
    let monitor = p[8];
    let width = u32::from_be_bytes([p[9], p[10], p[11], p[12]]);
    let height = u32::from_be_bytes([p[13], p[14], p[15], p[16]]);
    let data_len = u32::from_be_bytes([p[17], p[18], p[19], p[20]]) as usize;
    require_len(p, 21 + data_len, "Frame.data")?;
    let data = p[21..21 + data_len].to_vec();
    Ok(FrameMessage {
        sequence,
        monitor,
        width,
        height,
        data,
    })
}

// ── Utility helpers ───────────────────────────────────────────────────────────

fn require_len(buf: &[u8], needed: usize, context: &str) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        Err(ProtocolError::MalformedPayload(format!(
            "{context}: need {needed} bytes, got {}",
            buf.len()
        )))
    } else {
        Ok(())
    }
}

fn read_u64(buf: &[u8], offset: usize) -> Result<u64, ProtocolError> {
    if buf.len() < offset + 8 {
        return Err(ProtocolError::InsufficientData {
            needed: offset + 8,
            available: buf.len(),
        });
    }
    Ok(u64::from_be_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
        buf[offset + 4],
        buf[offset + 5],
        buf[offset + 6],
        buf[offset + 7],
    ]))
}

fn read_uuid(buf: &[u8], offset: usize) -> Result<Uuid, ProtocolError> {
    if buf.len() < offset + 16 {
        return Err(ProtocolError::MalformedPayload(format!(
            "need 16 bytes for UUID at offset {offset}, got {}",
            buf.len().saturating_sub(offset)
        )));
    }
    let bytes: [u8; 16] = buf[offset..offset + 16]
        .try_into()
        .map_err(|_| ProtocolError::MalformedPayload("UUID slice conversion".to_string()))?;
    Ok(Uuid::from_bytes(bytes))
}

/// Writes a presence byte followed by the value when `Some`.
fn write_option_u8(buf: &mut Vec<u8>, value: Option<u8>) {
    match value {
        Some(v) => {
            buf.push(0x01);
            buf.push(v);
        }
        None => buf.push(0x00),
    }
}

/// Reads a presence byte and, when set, the following value byte.
/// Returns the value and the offset of the next unread byte.
fn read_option_u8(
    buf: &[u8],
    offset: usize,
    context: &str,
) -> Result<(Option<u8>, usize), ProtocolError> {
    require_len(buf, offset + 1, context)?;
    match buf[offset] {
        0x00 => Ok((None, offset + 1)),
        0x01 => {
            require_len(buf, offset + 2, context)?;
            Ok((Some(buf[offset + 1]), offset + 2))
        }
        other => Err(ProtocolError::MalformedPayload(format!(
            "invalid option tag in {context}: {other}"
        ))),
    }
}

/// Writes a 2-byte length prefix followed by the UTF-8 string bytes.
fn write_length_prefixed_string(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    let len = bytes.len().min(u16::MAX as usize) as u16;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&bytes[..len as usize]);
}

/// Reads a 2-byte length prefix and then that many UTF-8 bytes.
/// Returns the string and the offset of the byte after the string.
fn read_length_prefixed_string(buf: &[u8], offset: usize) -> Result<(String, usize), ProtocolError> {
    if buf.len() < offset + 2 {
        return Err(ProtocolError::MalformedPayload(format!(
            "need 2 bytes for string length at offset {offset}"
        )));
    }
    let len = u16::from_be_bytes([buf[offset], buf[offset + 1]]) as usize;
    let start = offset + 2;
    if buf.len() < start + len {
        return Err(ProtocolError::MalformedPayload(format!(
            "string of length {len} at offset {start} exceeds buffer"
        )));
    }
    let s = std::str::from_utf8(&buf[start..start + len])
        .map_err(|e| ProtocolError::MalformedPayload(format!("invalid UTF-8: {e}")))?
        .to_string();
    Ok((s, start + len))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
