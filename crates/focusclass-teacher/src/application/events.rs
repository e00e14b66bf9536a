//! Events the application layer emits towards the front end.
//!
//! There is no GUI in this build; the binary consumes these from an `mpsc`
//! channel and logs them.  A future UI would subscribe to the same channel,
//! which is why the variants carry full payloads (frames included) rather
//! than log lines.

use std::fmt;
use std::net::SocketAddr;

use focusclass_core::protocol::messages::FrameMessage;
use focusclass_core::{ParticipantId, Telemetry, ViolationEvent};

/// Why a participant's connection went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The peer closed the TCP stream.
    PeerClosed,
    /// A read or write failed mid-connection.
    IoError,
    /// No inbound traffic for longer than the heartbeat threshold.
    HeartbeatTimeout,
    /// The presenter removed the participant.
    Kicked,
    /// The outbound queue filled with control messages the peer would not
    /// drain.
    SlowConsumer,
    /// The session ended while the participant was connected.
    SessionEnded,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::PeerClosed => "peer_closed",
            DisconnectReason::IoError => "io_error",
            DisconnectReason::HeartbeatTimeout => "heartbeat_timeout",
            DisconnectReason::Kicked => "kicked",
            DisconnectReason::SlowConsumer => "slow_consumer",
            DisconnectReason::SessionEnded => "session_ended",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events surfaced to the presenter.
#[derive(Debug)]
pub enum TeacherEvent {
    /// An observer authenticated and joined the roster.
    StudentJoined {
        participant_id: ParticipantId,
        display_name: String,
        remote_addr: SocketAddr,
    },
    /// An observer left; `telemetry` is their final reported state.
    StudentLeft {
        participant_id: ParticipantId,
        display_name: String,
        reason: DisconnectReason,
        telemetry: Telemetry,
    },
    /// A violation passed the throttle and should be shown live.
    /// `display_count` is "occurrence N within the current window".
    ViolationObserved {
        event: ViolationEvent,
        display_count: u32,
    },
    /// A telemetry report was merged; carries the merged state for the
    /// class view.
    TelemetryUpdated {
        participant_id: ParticipantId,
        telemetry: Telemetry,
    },
    /// A student answered a screen request.  When approved, their frames
    /// follow as [`TeacherEvent::StudentFrame`].
    ScreenRequestAnswered {
        participant_id: ParticipantId,
        approved: bool,
    },
    /// A frame from a student's screen, already past the sequence gate.
    StudentFrame {
        participant_id: ParticipantId,
        frame: FrameMessage,
    },
    /// The outgoing share stream stopped itself after repeated capture or
    /// encode failures.
    SharingFault { monitor: u8, detail: String },
    /// The activity store failed; raised at most once per session.
    PersistenceFault { detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_reason_names_are_stable() {
        // These strings end up in logs and leave notifications; renaming one
        // is a breaking change for anything parsing them.
        assert_eq!(DisconnectReason::PeerClosed.as_str(), "peer_closed");
        assert_eq!(DisconnectReason::HeartbeatTimeout.as_str(), "heartbeat_timeout");
        assert_eq!(DisconnectReason::Kicked.as_str(), "kicked");
        assert_eq!(DisconnectReason::SlowConsumer.as_str(), "slow_consumer");
        assert_eq!(DisconnectReason::SessionEnded.as_str(), "session_ended");
        assert_eq!(format!("{}", DisconnectReason::IoError), "io_error");
    }
}
