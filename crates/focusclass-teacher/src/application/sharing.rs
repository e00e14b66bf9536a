//! SharingUseCase: the outgoing screen-frame streams.
//!
//! One main stream fans out to every authenticated observer; directed
//! streams carry the same pipeline to a single participant, independent of
//! whether the main stream is running.  All streams stamp sequence numbers
//! from one shared counter, so a participant receiving both streams can
//! still apply a single forward-only gate.
//!
//! A stream is a spawned task ticking at the preset's frame interval:
//! capture, JPEG-encode, stamp, deliver.  Delivery goes through the
//! [`Fanout`] trait so this module never touches sockets; the transport's
//! per-connection queues decide what to do under pressure.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use focusclass_core::protocol::messages::{FrameMessage, ScreenSharingMessage, SharingAction};
use focusclass_core::{ClassMessage, FrameSource, ParticipantId, QualityPreset, SequenceCounter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::application::events::TeacherEvent;

/// Consecutive capture/encode failures tolerated before a stream gives up.
const MAX_CONSECUTIVE_CODEC_FAILURES: u32 = 5;

/// How long a stop waits for the capture task before aborting it.
const STOP_GRACE: Duration = Duration::from_secs(2);

// ── Delivery seam ─────────────────────────────────────────────────────────────

/// Who a message is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryTarget {
    /// Every authenticated observer currently connected.
    AllObservers,
    /// Exactly one participant.
    One(ParticipantId),
}

/// Message delivery, implemented by the transport layer.
///
/// Delivery is fire-and-forget from the stream's point of view: a slow or
/// absent recipient is the transport's problem, never the capture loop's.
#[async_trait]
pub trait Fanout: Send + Sync {
    async fn deliver(&self, message: ClassMessage, target: DeliveryTarget);
}

// ── Stream plumbing ───────────────────────────────────────────────────────────

enum StreamCommand {
    SetQuality(QualityPreset),
    Stop,
}

struct StreamHandle {
    commands: mpsc::Sender<StreamCommand>,
    task: JoinHandle<()>,
}

impl StreamHandle {
    fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Everything one capture task needs, cloned in at spawn time.
struct StreamContext {
    source: Arc<dyn FrameSource>,
    fanout: Arc<dyn Fanout>,
    events: mpsc::Sender<TeacherEvent>,
    sequence: Arc<SequenceCounter>,
    target: DeliveryTarget,
    monitor: u8,
    /// Main stream only; directed streams do not affect the session flag.
    active_flag: Option<Arc<AtomicBool>>,
}

fn sharing_notice(action: SharingAction, monitor: u8, quality: QualityPreset) -> ClassMessage {
    ClassMessage::ScreenSharing(ScreenSharingMessage {
        action,
        monitor,
        quality,
    })
}

/// The capture loop.  Runs until told to stop or until the codec fails
/// [`MAX_CONSECUTIVE_CODEC_FAILURES`] times in a row.
async fn run_stream(
    ctx: StreamContext,
    mut preset: QualityPreset,
    mut commands: mpsc::Receiver<StreamCommand>,
) {
    if let Some(flag) = &ctx.active_flag {
        flag.store(true, Ordering::Relaxed);
    }
    ctx.fanout
        .deliver(
            sharing_notice(SharingAction::Start, ctx.monitor, preset),
            ctx.target,
        )
        .await;

    let mut consecutive_failures: u32 = 0;
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(StreamCommand::SetQuality(next)) => {
                    debug!(monitor = ctx.monitor, from = %preset, to = %next, "stream quality changed");
                    preset = next;
                }
                Some(StreamCommand::Stop) | None => break,
            },
            _ = tokio::time::sleep(preset.frame_interval()) => {
                match focusclass_core::media::produce_frame(ctx.source.as_ref(), ctx.monitor, preset).await {
                    Ok(encoded) => {
                        consecutive_failures = 0;
                        let frame = FrameMessage {
                            sequence: ctx.sequence.next(),
                            monitor: ctx.monitor,
                            width: encoded.width,
                            height: encoded.height,
                            data: encoded.data,
                        };
                        ctx.fanout.deliver(ClassMessage::Frame(frame), ctx.target).await;
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        warn!(
                            monitor = ctx.monitor,
                            failures = consecutive_failures,
                            "frame capture failed: {e}"
                        );
                        if consecutive_failures >= MAX_CONSECUTIVE_CODEC_FAILURES {
                            let _ = ctx
                                .events
                                .send(TeacherEvent::SharingFault {
                                    monitor: ctx.monitor,
                                    detail: e.to_string(),
                                })
                                .await;
                            break;
                        }
                    }
                }
            }
        }
    }

    // The stop notice follows the stream's actual lifecycle, so it also goes
    // out when the stream dies of codec failures rather than a command.
    ctx.fanout
        .deliver(
            sharing_notice(SharingAction::Stop, ctx.monitor, preset),
            ctx.target,
        )
        .await;
    if let Some(flag) = &ctx.active_flag {
        flag.store(false, Ordering::Relaxed);
    }
}

async fn stop_handle(mut handle: StreamHandle) {
    let _ = handle.commands.send(StreamCommand::Stop).await;
    if tokio::time::timeout(STOP_GRACE, &mut handle.task).await.is_err() {
        warn!("share stream ignored stop; aborting");
        handle.task.abort();
    }
}

// ── Broadcaster ───────────────────────────────────────────────────────────────

/// Owns every outgoing share stream of one session.
pub struct FrameBroadcaster {
    source: Arc<dyn FrameSource>,
    fanout: Arc<dyn Fanout>,
    events: mpsc::Sender<TeacherEvent>,
    sequence: Arc<SequenceCounter>,
    /// Mirrors whether the *main* stream is live; read by session snapshots.
    sharing_active: Arc<AtomicBool>,
    main: Option<StreamHandle>,
    directed: HashMap<ParticipantId, StreamHandle>,
}

impl FrameBroadcaster {
    pub fn new(
        source: Arc<dyn FrameSource>,
        fanout: Arc<dyn Fanout>,
        events: mpsc::Sender<TeacherEvent>,
        sharing_active: Arc<AtomicBool>,
    ) -> Self {
        Self {
            source,
            fanout,
            events,
            sequence: Arc::new(SequenceCounter::new()),
            sharing_active,
            main: None,
            directed: HashMap::new(),
        }
    }

    /// Starts the main stream.  A second start while running is a no-op;
    /// use [`FrameBroadcaster::set_quality`] to change a live stream.
    pub fn start(&mut self, monitor: u8, preset: QualityPreset) {
        if self.main.as_ref().is_some_and(StreamHandle::is_running) {
            debug!("main stream already running; start ignored");
            return;
        }
        let handle = self.spawn_stream(
            DeliveryTarget::AllObservers,
            monitor,
            preset,
            Some(Arc::clone(&self.sharing_active)),
        );
        self.main = Some(handle);
    }

    /// Stops the main stream; no-op when nothing is running.
    pub async fn stop(&mut self) {
        if let Some(handle) = self.main.take() {
            stop_handle(handle).await;
        }
    }

    /// Changes the main stream's preset; takes effect on its next tick.
    /// Returns false when no main stream is running.
    pub async fn set_quality(&mut self, preset: QualityPreset) -> bool {
        match &self.main {
            Some(handle) if handle.is_running() => {
                handle
                    .commands
                    .send(StreamCommand::SetQuality(preset))
                    .await
                    .is_ok()
            }
            _ => false,
        }
    }

    /// Starts a stream to a single participant, independent of the main
    /// stream.  Idempotent per target.
    pub fn start_directed(&mut self, target: ParticipantId, monitor: u8, preset: QualityPreset) {
        if self
            .directed
            .get(&target)
            .is_some_and(StreamHandle::is_running)
        {
            debug!(participant = %target, "directed stream already running; start ignored");
            return;
        }
        let handle = self.spawn_stream(DeliveryTarget::One(target), monitor, preset, None);
        self.directed.insert(target, handle);
    }

    /// Stops the directed stream for one participant, if any.  Called on an
    /// explicit stop and when the participant disconnects.
    pub async fn stop_directed(&mut self, target: ParticipantId) {
        if let Some(handle) = self.directed.remove(&target) {
            stop_handle(handle).await;
        }
    }

    /// Stops everything.  Used at session teardown.
    pub async fn stop_all(&mut self) {
        self.stop().await;
        let targets: Vec<ParticipantId> = self.directed.keys().copied().collect();
        for target in targets {
            self.stop_directed(target).await;
        }
    }

    /// Whether the main stream is currently live.
    pub fn is_streaming(&self) -> bool {
        self.main.as_ref().is_some_and(StreamHandle::is_running)
    }

    fn spawn_stream(
        &self,
        target: DeliveryTarget,
        monitor: u8,
        preset: QualityPreset,
        active_flag: Option<Arc<AtomicBool>>,
    ) -> StreamHandle {
        let (tx, rx) = mpsc::channel(4);
        let ctx = StreamContext {
            source: Arc::clone(&self.source),
            fanout: Arc::clone(&self.fanout),
            events: self.events.clone(),
            sequence: Arc::clone(&self.sequence),
            target,
            monitor,
            active_flag,
        };
        let task = tokio::spawn(run_stream(ctx, preset, rx));
        StreamHandle { commands: tx, task }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use focusclass_core::media::{CodecError, PixelBuffer, SyntheticSource};
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Test double that records every delivery.
    #[derive(Default)]
    struct RecordingFanout {
        deliveries: Mutex<Vec<(ClassMessage, DeliveryTarget)>>,
    }

    #[async_trait]
    impl Fanout for RecordingFanout {
        async fn deliver(&self, message: ClassMessage, target: DeliveryTarget) {
            self.deliveries.lock().unwrap().push((message, target));
        }
    }

    impl RecordingFanout {
        fn snapshot(&self) -> Vec<(ClassMessage, DeliveryTarget)> {
            self.deliveries.lock().unwrap().clone()
        }

        fn frame_count(&self) -> usize {
            self.deliveries
                .lock()
                .unwrap()
                .iter()
                .filter(|(m, _)| matches!(m, ClassMessage::Frame(_)))
                .count()
        }
    }

    /// Capture backend that always fails.
    struct FailingSource;

    #[async_trait]
    impl FrameSource for FailingSource {
        async fn capture(&self, _monitor: u8, _scale: u32) -> Result<PixelBuffer, CodecError> {
            Err(CodecError::Capture("backend offline".into()))
        }
    }

    /// Capture backend that fails four times, succeeds once, and repeats.
    struct FlakySource {
        inner: SyntheticSource,
        calls: AtomicU32,
    }

    impl FlakySource {
        fn new() -> Self {
            Self {
                inner: SyntheticSource::with_resolution(32, 32),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl FrameSource for FlakySource {
        async fn capture(&self, monitor: u8, scale: u32) -> Result<PixelBuffer, CodecError> {
            let call = self.calls.fetch_add(1, Ordering::Relaxed);
            if call % 5 == 4 {
                self.inner.capture(monitor, scale).await
            } else {
                Err(CodecError::Capture("intermittent".into()))
            }
        }
    }

    struct Fixture {
        broadcaster: FrameBroadcaster,
        fanout: Arc<RecordingFanout>,
        events: mpsc::Receiver<TeacherEvent>,
        sharing_active: Arc<AtomicBool>,
    }

    fn fixture_with_source(source: Arc<dyn FrameSource>) -> Fixture {
        let fanout = Arc::new(RecordingFanout::default());
        let (tx, rx) = mpsc::channel(16);
        let sharing_active = Arc::new(AtomicBool::new(false));
        let broadcaster = FrameBroadcaster::new(
            source,
            Arc::clone(&fanout) as Arc<dyn Fanout>,
            tx,
            Arc::clone(&sharing_active),
        );
        Fixture {
            broadcaster,
            fanout,
            events: rx,
            sharing_active,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_source(Arc::new(SyntheticSource::with_resolution(64, 40)))
    }

    /// Polls until `predicate` holds; panics after ~30 virtual seconds.
    async fn wait_until(mut predicate: impl FnMut() -> bool) {
        for _ in 0..3000 {
            if predicate() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_announces_then_streams_to_all_observers() {
        // Arrange
        let mut fx = fixture();

        // Act
        fx.broadcaster.start(0, QualityPreset::High);
        let fanout = Arc::clone(&fx.fanout);
        wait_until(move || fanout.frame_count() >= 3).await;

        // Assert – first delivery is the start notice, then frames, all broadcast
        let deliveries = fx.fanout.snapshot();
        match &deliveries[0] {
            (ClassMessage::ScreenSharing(notice), DeliveryTarget::AllObservers) => {
                assert_eq!(notice.action, SharingAction::Start);
                assert_eq!(notice.monitor, 0);
                assert_eq!(notice.quality, QualityPreset::High);
            }
            other => panic!("expected start notice first, got {other:?}"),
        }
        let sequences: Vec<u64> = deliveries
            .iter()
            .filter_map(|(m, _)| match m {
                ClassMessage::Frame(f) => Some(f.sequence),
                _ => None,
            })
            .collect();
        assert!(sequences.windows(2).all(|w| w[1] > w[0]));
        assert!(fx.broadcaster.is_streaming());
        assert!(fx.sharing_active.load(Ordering::Relaxed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_sends_stop_notice_and_is_idempotent() {
        // Arrange
        let mut fx = fixture();
        fx.broadcaster.start(1, QualityPreset::Medium);
        let fanout = Arc::clone(&fx.fanout);
        wait_until(move || fanout.frame_count() >= 1).await;

        // Act
        fx.broadcaster.stop().await;
        fx.broadcaster.stop().await;

        // Assert – exactly one stop notice, stream flag cleared
        let deliveries = fx.fanout.snapshot();
        let stops = deliveries
            .iter()
            .filter(|(m, _)| {
                matches!(
                    m,
                    ClassMessage::ScreenSharing(n) if n.action == SharingAction::Stop
                )
            })
            .count();
        assert_eq!(stops, 1);
        assert!(!fx.broadcaster.is_streaming());
        assert!(!fx.sharing_active.load(Ordering::Relaxed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_while_running_is_ignored() {
        // Arrange
        let mut fx = fixture();
        fx.broadcaster.start(0, QualityPreset::Medium);
        let fanout = Arc::clone(&fx.fanout);
        wait_until(move || fanout.frame_count() >= 1).await;

        // Act
        fx.broadcaster.start(0, QualityPreset::Medium);
        let fanout = Arc::clone(&fx.fanout);
        wait_until(move || fanout.frame_count() >= 2).await;

        // Assert – only one start notice despite two starts
        let starts = fx
            .fanout
            .snapshot()
            .iter()
            .filter(|(m, _)| {
                matches!(
                    m,
                    ClassMessage::ScreenSharing(n) if n.action == SharingAction::Start
                )
            })
            .count();
        assert_eq!(starts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_quality_applies_on_the_next_tick() {
        // Arrange – Low scales the 64-wide test panel to 32
        let mut fx = fixture();
        fx.broadcaster.start(0, QualityPreset::Low);
        let fanout = Arc::clone(&fx.fanout);
        wait_until(move || fanout.frame_count() >= 2).await;

        // Act – High scales back to the full 64
        assert!(fx.broadcaster.set_quality(QualityPreset::High).await);
        let fanout = Arc::clone(&fx.fanout);
        wait_until(move || {
            fanout.snapshot().iter().any(|(m, _)| {
                matches!(m, ClassMessage::Frame(f) if f.width == 64)
            })
        })
        .await;

        // Assert – earlier frames were half scale, later ones full
        let widths: Vec<u32> = fx
            .fanout
            .snapshot()
            .iter()
            .filter_map(|(m, _)| match m {
                ClassMessage::Frame(f) => Some(f.width),
                _ => None,
            })
            .collect();
        assert_eq!(widths[0], 32);
        assert_eq!(*widths.last().unwrap(), 64);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_quality_without_a_stream_reports_false() {
        let mut fx = fixture();
        assert!(!fx.broadcaster.set_quality(QualityPreset::High).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_five_consecutive_failures_stop_the_stream() {
        // Arrange
        let mut fx = fixture_with_source(Arc::new(FailingSource));

        // Act
        fx.broadcaster.start(2, QualityPreset::High);
        let fault = tokio::time::timeout(Duration::from_secs(60), fx.events.recv())
            .await
            .expect("fault event within the deadline")
            .expect("events channel open");

        // Assert
        match fault {
            TeacherEvent::SharingFault { monitor, detail } => {
                assert_eq!(monitor, 2);
                assert!(detail.contains("backend offline"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        // The dying stream still announces its stop to the class.
        let fanout = Arc::clone(&fx.fanout);
        wait_until(move || {
            fanout.snapshot().iter().any(|(m, _)| {
                matches!(
                    m,
                    ClassMessage::ScreenSharing(n) if n.action == SharingAction::Stop
                )
            })
        })
        .await;
        assert_eq!(fx.fanout.frame_count(), 0);
        wait_until(|| !fx.sharing_active.load(Ordering::Relaxed)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_a_single_success_resets_the_failure_counter() {
        // Arrange – fails four times then succeeds, repeatedly; never five in
        // a row
        let mut fx = fixture_with_source(Arc::new(FlakySource::new()));

        // Act – long enough for three success cycles
        fx.broadcaster.start(0, QualityPreset::High);
        let fanout = Arc::clone(&fx.fanout);
        wait_until(move || fanout.frame_count() >= 3).await;

        // Assert – stream alive, no fault surfaced
        assert!(fx.broadcaster.is_streaming());
        assert!(fx.events.try_recv().is_err());
        fx.broadcaster.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_directed_stream_reaches_only_its_target() {
        // Arrange
        let mut fx = fixture();
        let target = Uuid::new_v4();

        // Act
        fx.broadcaster.start_directed(target, 0, QualityPreset::High);
        let fanout = Arc::clone(&fx.fanout);
        wait_until(move || fanout.frame_count() >= 2).await;
        fx.broadcaster.stop_directed(target).await;

        // Assert – every delivery, notices included, addressed the target
        let deliveries = fx.fanout.snapshot();
        assert!(!deliveries.is_empty());
        assert!(deliveries
            .iter()
            .all(|(_, t)| *t == DeliveryTarget::One(target)));
        // The directed stream never claims the session-wide sharing flag.
        assert!(!fx.sharing_active.load(Ordering::Relaxed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_main_and_directed_streams_share_one_sequence_space() {
        // Arrange
        let mut fx = fixture();
        let target = Uuid::new_v4();

        // Act – run both streams at once
        fx.broadcaster.start(0, QualityPreset::High);
        fx.broadcaster.start_directed(target, 0, QualityPreset::High);
        let fanout = Arc::clone(&fx.fanout);
        wait_until(move || fanout.frame_count() >= 6).await;
        fx.broadcaster.stop_all().await;

        // Assert – no sequence number is ever issued twice
        let mut sequences: Vec<u64> = fx
            .fanout
            .snapshot()
            .iter()
            .filter_map(|(m, _)| match m {
                ClassMessage::Frame(f) => Some(f.sequence),
                _ => None,
            })
            .collect();
        let issued = sequences.len();
        sequences.sort_unstable();
        sequences.dedup();
        assert_eq!(sequences.len(), issued);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_all_tears_down_directed_streams() {
        // Arrange
        let mut fx = fixture();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        fx.broadcaster.start(0, QualityPreset::High);
        fx.broadcaster.start_directed(a, 0, QualityPreset::High);
        fx.broadcaster.start_directed(b, 1, QualityPreset::High);
        let fanout = Arc::clone(&fx.fanout);
        wait_until(move || fanout.frame_count() >= 3).await;

        // Act
        fx.broadcaster.stop_all().await;
        let count_after = fx.fanout.frame_count();
        tokio::time::sleep(Duration::from_secs(5)).await;

        // Assert – nothing streams after the teardown
        assert_eq!(fx.fanout.frame_count(), count_after);
        assert!(!fx.broadcaster.is_streaming());
    }
}
