//! FocusClass Student application entry point.
//!
//! Wires together the teacher connection, the focus enforcer, the periodic
//! reporter, and the screen-request responder, then runs the Tokio async
//! event loop.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ TeacherConnection::join()   -- TCP connect + Join handshake
//!  └─ start_reporting()           -- heartbeat / telemetry / violations
//!  └─ message dispatch loop
//!       ├─ FocusMode      -> enforcer enable/disable
//!       ├─ ScreenRequested-> ScreenShareResponder
//!       ├─ Frame / ScreenSharing -> log (no viewer surface)
//!       └─ Kick / SessionEnded / Disconnected -> shut down
//! ```
//!
//! # Message dispatch loop (for beginners)
//!
//! The `while let Some(event) = events.recv().await` loop is the heart of
//! the student.  It processes one network event at a time:
//!
//! - `FocusMode` – the teacher toggled enforcement; tell the enforcer.
//! - `ScreenRequested` – the teacher wants to see this screen; the
//!   responder answers per the auto-approve policy.
//! - `Kicked` / `SessionEnded` / `Disconnected` – terminal; the loop ends
//!   and the process exits.  There is deliberately no auto-rejoin: getting
//!   back into a session always takes a human with the code and password.
//!
//! # Enforcement
//!
//! The `PassiveEnforcer` used here observes nothing and always reports
//! compliance.  In a production build it is replaced by a platform watcher
//! (window-focus hooks, process scans) implementing the same trait, and
//! `FixedBatteryProbe` by a reader of the OS battery API.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use focusclass_core::media::SyntheticSource;
use focusclass_core::protocol::messages::SharingAction;
use focusclass_core::QualityPreset;
use focusclass_student::application::enforce_focus::FocusEnforcer;
use focusclass_student::application::link::TeacherLink;
use focusclass_student::application::reporting::{start_reporting, BatteryProbe, ReportingConfig};
use focusclass_student::application::respond_screen::ScreenShareResponder;
use focusclass_student::infrastructure::battery::FixedBatteryProbe;
use focusclass_student::infrastructure::enforcement::passive::PassiveEnforcer;
use focusclass_student::infrastructure::network::{JoinConfig, StudentEvent, TeacherConnection};

fn parse_quality(s: &str) -> Result<QualityPreset, String> {
    s.parse()
}

#[derive(Parser, Debug)]
#[command(name = "focusclass-student", version, about = "FocusClass classroom observer")]
struct StudentArgs {
    /// Teacher control endpoint as host:port.
    #[arg(long, env = "FOCUSCLASS_TEACHER", default_value = "127.0.0.1:8765")]
    teacher: String,
    /// Session code as shown on the classroom screen.
    #[arg(long, env = "FOCUSCLASS_CODE")]
    code: String,
    /// Session password distributed alongside the code.
    #[arg(long, env = "FOCUSCLASS_PASSWORD")]
    password: String,
    /// Name shown in the teacher's roster.
    #[arg(long, default_value = "Student")]
    name: String,
    /// Approve screen-view requests without asking.
    #[arg(long)]
    auto_approve: bool,
    /// Monitor offered when the teacher views this screen (zero-based).
    #[arg(long, default_value_t = 0)]
    monitor: u8,
    /// Uplink quality: low, medium, or high.
    #[arg(long, value_parser = parse_quality, default_value = "medium")]
    quality: QualityPreset,
    /// Seconds between liveness heartbeats.
    #[arg(long, default_value_t = 10)]
    heartbeat_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = StudentArgs::parse();
    info!("FocusClass Student starting");

    // Codes are displayed uppercase; accept them however they were typed.
    let config = JoinConfig {
        teacher_addr: args.teacher,
        code: args.code.trim().to_uppercase(),
        password: args.password,
        display_name: args.name,
        ..JoinConfig::default()
    };

    let (connection, mut events) = TeacherConnection::join(config).await?;
    let connection = Arc::new(connection);
    info!(
        "joined session {} as {}",
        connection.session().code,
        connection.participant_id()
    );

    // ── Enforcement and probes ────────────────────────────────────────────────
    // In production: replace PassiveEnforcer with a platform watcher and
    // FixedBatteryProbe with an OS battery reader.
    let enforcer: Arc<dyn FocusEnforcer> = Arc::new(PassiveEnforcer::new());
    let battery: Arc<dyn BatteryProbe> = Arc::new(FixedBatteryProbe::full());

    let reporter = start_reporting(
        Arc::clone(&connection) as Arc<dyn TeacherLink>,
        Arc::clone(&enforcer),
        battery,
        ReportingConfig {
            heartbeat_interval: Duration::from_secs(args.heartbeat_secs.max(1)),
            ..ReportingConfig::default()
        },
    );

    let mut responder = ScreenShareResponder::new(
        Arc::clone(&connection) as Arc<dyn TeacherLink>,
        Arc::new(SyntheticSource::new()),
        args.auto_approve,
        args.monitor,
        args.quality,
    );

    // ── Ctrl-C handler ────────────────────────────────────────────────────────
    // Closing the connection ends the read task, which closes the event
    // channel and lets the dispatch loop finish.
    let connection_for_signal = Arc::clone(&connection);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            connection_for_signal.close().await;
        }
    });

    // ── Main message dispatch loop ────────────────────────────────────────────
    while let Some(event) = events.recv().await {
        match event {
            StudentEvent::FocusMode { enabled, target } => {
                enforcer.set_enabled(enabled).await;
                match target {
                    Some(_) => info!(enabled, "focus directive addressed to this machine"),
                    None => info!(enabled, "focus mode changed for the class"),
                }
            }
            StudentEvent::ScreenSharing(notice) => match notice.action {
                SharingAction::Start => info!(
                    monitor = notice.monitor,
                    quality = %notice.quality,
                    "teacher started sharing"
                ),
                SharingAction::Stop => info!("teacher stopped sharing"),
            },
            StudentEvent::Frame(frame) => {
                // No viewer surface here; the stream is observable in logs.
                debug!(
                    sequence = frame.sequence,
                    bytes = frame.data.len(),
                    "broadcast frame received"
                );
            }
            StudentEvent::ScreenRequested => {
                info!("teacher asked to view this screen");
                responder.handle_request().await;
            }
            StudentEvent::Kicked => {
                warn!("removed from the session by the teacher");
                break;
            }
            StudentEvent::SessionEnded => {
                info!("session ended by the teacher");
                break;
            }
            StudentEvent::Disconnected { detail } => {
                warn!("connection lost: {detail}");
                break;
            }
        }
    }

    responder.stop().await;
    reporter.abort();
    connection.close().await;
    info!("FocusClass Student stopped");
    Ok(())
}
