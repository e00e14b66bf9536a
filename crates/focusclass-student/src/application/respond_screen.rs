//! Answering the teacher's request to view this student's screen.
//!
//! The teacher sends `ScreenRequest`; the student answers `ScreenResponse`
//! and, when the policy approves, streams its own frames back over the
//! same connection.  Approval is a flag rather than a prompt: a kiosk or
//! lab machine runs with auto-approve on, a personal laptop leaves it off
//! and every request is declined.
//!
//! The uplink is one spawned task ticking at the preset's frame interval:
//! capture, JPEG-encode, stamp a stream sequence, send.  Frame sequences
//! come from a counter that survives restarts, so the teacher's gate keeps
//! working when a stream is re-requested mid-session.

use std::sync::Arc;
use std::time::Duration;

use focusclass_core::media::produce_frame;
use focusclass_core::protocol::messages::FrameMessage;
use focusclass_core::{ClassMessage, FrameSource, QualityPreset, SequenceCounter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::application::link::TeacherLink;

/// Consecutive capture/encode failures tolerated before the uplink gives up.
const MAX_CONSECUTIVE_CODEC_FAILURES: u32 = 5;

/// How long a stop waits for the uplink task before aborting it.
const STOP_GRACE: Duration = Duration::from_secs(2);

struct UplinkHandle {
    stop: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

/// Handles `ScreenRequest` and owns the student-to-teacher frame stream.
pub struct ScreenShareResponder {
    link: Arc<dyn TeacherLink>,
    source: Arc<dyn FrameSource>,
    auto_approve: bool,
    monitor: u8,
    preset: QualityPreset,
    sequence: Arc<SequenceCounter>,
    uplink: Option<UplinkHandle>,
}

impl ScreenShareResponder {
    pub fn new(
        link: Arc<dyn TeacherLink>,
        source: Arc<dyn FrameSource>,
        auto_approve: bool,
        monitor: u8,
        preset: QualityPreset,
    ) -> Self {
        Self {
            link,
            source,
            auto_approve,
            monitor,
            preset,
            sequence: Arc::new(SequenceCounter::new()),
            uplink: None,
        }
    }

    /// Answers one `ScreenRequest`.
    ///
    /// Without auto-approve the request is declined.  With it, the response
    /// is affirmative and the uplink starts; a request arriving while a
    /// stream already runs restarts it on the same sequence counter.
    pub async fn handle_request(&mut self) {
        if !self.auto_approve {
            info!("screen request declined (auto-approve is off)");
            self.link
                .send(&ClassMessage::ScreenResponse { approved: false })
                .await;
            return;
        }

        self.stop().await;
        self.link
            .send(&ClassMessage::ScreenResponse { approved: true })
            .await;

        let (stop_tx, stop_rx) = mpsc::channel(1);
        let task = tokio::spawn(run_uplink(
            Arc::clone(&self.link),
            Arc::clone(&self.source),
            Arc::clone(&self.sequence),
            self.monitor,
            self.preset,
            stop_rx,
        ));
        self.uplink = Some(UplinkHandle {
            stop: stop_tx,
            task,
        });
        info!(
            monitor = self.monitor,
            quality = %self.preset,
            "screen uplink started"
        );
    }

    /// Stops the uplink if one is running.  Idempotent.
    pub async fn stop(&mut self) {
        if let Some(mut handle) = self.uplink.take() {
            let _ = handle.stop.send(()).await;
            if timeout(STOP_GRACE, &mut handle.task).await.is_err() {
                warn!("screen uplink ignored stop; aborting");
                handle.task.abort();
            }
            info!("screen uplink stopped");
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.uplink
            .as_ref()
            .is_some_and(|handle| !handle.task.is_finished())
    }
}

/// The uplink capture loop.  Ends on a stop signal or after
/// [`MAX_CONSECUTIVE_CODEC_FAILURES`] capture failures in a row.
async fn run_uplink(
    link: Arc<dyn TeacherLink>,
    source: Arc<dyn FrameSource>,
    sequence: Arc<SequenceCounter>,
    monitor: u8,
    preset: QualityPreset,
    mut stop: mpsc::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(preset.frame_interval());
    let mut consecutive_failures: u32 = 0;

    loop {
        tokio::select! {
            _ = stop.recv() => break,
            _ = ticker.tick() => {
                match produce_frame(source.as_ref(), monitor, preset).await {
                    Ok(encoded) => {
                        consecutive_failures = 0;
                        let frame = FrameMessage {
                            sequence: sequence.next(),
                            monitor,
                            width: encoded.width,
                            height: encoded.height,
                            data: encoded.data,
                        };
                        link.send(&ClassMessage::Frame(frame)).await;
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        warn!(
                            monitor,
                            failures = consecutive_failures,
                            "screen capture failed: {e}"
                        );
                        if consecutive_failures >= MAX_CONSECUTIVE_CODEC_FAILURES {
                            warn!("screen uplink giving up after repeated capture failures");
                            break;
                        }
                    }
                }
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
