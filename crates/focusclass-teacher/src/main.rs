//! FocusClass Teacher application entry point.
//!
//! Wires the service together and starts the Tokio async runtime.  Headless:
//! the presenter surface is the log stream, and the session credentials are
//! printed at startup for the class to copy.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ TeacherService::new()  -- config, registries, violation pipeline
//!  └─ start_session()
//!       ├─ control listener  (TCP, student connections)
//!       ├─ metadata endpoint (HTTP, GET /session/current)
//!       └─ sweep + dispatcher (Tokio tasks)
//!  └─ event pump             -- TeacherEvents -> log lines
//! ```

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use focusclass_core::media::SyntheticSource;
use focusclass_core::QualityPreset;
use focusclass_teacher::application::events::TeacherEvent;
use focusclass_teacher::infrastructure::storage::activity::MemoryActivityStore;
use focusclass_teacher::infrastructure::storage::config::{load_config, AppConfig};
use focusclass_teacher::service::TeacherService;

fn parse_quality(s: &str) -> Result<QualityPreset, String> {
    s.parse()
}

#[derive(Parser, Debug)]
#[command(name = "focusclass-teacher", version, about = "FocusClass session host")]
struct TeacherArgs {
    /// Session label shown to students.
    #[arg(long, default_value = "Class Session")]
    name: String,
    /// Override the configured bind address.
    #[arg(long, env = "FOCUSCLASS_BIND")]
    bind: Option<String>,
    /// Override the configured control port.
    #[arg(long)]
    control_port: Option<u16>,
    /// Override the configured metadata port.
    #[arg(long)]
    metadata_port: Option<u16>,
    /// Start sharing the screen as soon as the session is up.
    #[arg(long)]
    share: bool,
    /// Monitor to share (zero-based); defaults to the configured one.
    #[arg(long)]
    monitor: Option<u8>,
    /// Sharing quality: low, medium, or high.
    #[arg(long, value_parser = parse_quality)]
    quality: Option<QualityPreset>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = TeacherArgs::parse();
    info!("FocusClass Teacher starting");

    let mut config = load_config().unwrap_or_else(|e| {
        warn!("could not load config: {e}; using defaults");
        AppConfig::default()
    });
    if let Some(bind) = args.bind {
        config.network.bind_address = bind;
    }
    if let Some(port) = args.control_port {
        config.network.control_port = port;
    }
    if let Some(port) = args.metadata_port {
        config.network.metadata_port = port;
    }
    let monitor = args.monitor.unwrap_or(config.sharing.monitor_index);
    let quality = args.quality.unwrap_or(config.sharing.default_quality);

    let (mut service, mut events) = TeacherService::new(
        config,
        Arc::new(SyntheticSource::new()),
        Arc::new(MemoryActivityStore::new()),
    );

    let started = service.start_session(&args.name).await?;
    info!("session code:     {}", started.code);
    info!("session password: {}", started.password);
    info!("students connect to {}", started.control_addr);
    info!("metadata at http://{}/session/current", started.metadata_addr);

    if args.share {
        service.start_sharing(monitor, quality).await;
        info!("sharing monitor {monitor} at {quality} quality");
    }

    // ── Presenter event pump ──────────────────────────────────────────────────
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                TeacherEvent::StudentJoined {
                    display_name,
                    remote_addr,
                    ..
                } => info!("joined: {display_name} ({remote_addr})"),
                TeacherEvent::StudentLeft {
                    display_name,
                    reason,
                    ..
                } => info!("left: {display_name} ({reason})"),
                TeacherEvent::ViolationObserved {
                    event,
                    display_count,
                } => warn!(
                    "violation by {}: {} ({}) [{} in window]",
                    event.participant_id,
                    event.kind.as_str(),
                    event.detail,
                    display_count
                ),
                TeacherEvent::TelemetryUpdated {
                    participant_id,
                    telemetry,
                } => debug!(
                    "telemetry from {participant_id}: battery {}%, focus {}",
                    telemetry.battery_percent, telemetry.focus_compliant
                ),
                TeacherEvent::ScreenRequestAnswered {
                    participant_id,
                    approved,
                } => info!(
                    "screen request {} by {participant_id}",
                    if approved { "approved" } else { "declined" }
                ),
                TeacherEvent::StudentFrame {
                    participant_id,
                    frame,
                } => debug!(
                    "frame {}x{} from {participant_id}",
                    frame.width, frame.height
                ),
                TeacherEvent::SharingFault { monitor, detail } => {
                    error!("sharing stopped on monitor {monitor}: {detail}");
                }
                TeacherEvent::PersistenceFault { detail } => {
                    error!("activity store unavailable: {detail}");
                }
            }
        }
    });

    // ── Ctrl-C / SIGTERM handler ──────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            running_clone.store(false, Ordering::Relaxed);
        }
    });

    info!("FocusClass Teacher ready.  Press Ctrl-C to end the session.");
    loop {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if !running.load(Ordering::Relaxed) {
            break;
        }
    }

    service.stop_session().await;
    info!("FocusClass Teacher stopped");
    Ok(())
}
