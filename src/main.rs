use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use visit_scribe::{
    AppState, CaptureConfig, Config, ControllerConfig, HttpBackend, MemorySessionStore,
    SegmentRecorder, SessionController, WavCaptureDevice,
};

#[derive(Parser, Debug)]
#[command(name = "visit-scribe", about = "Appointment recording session service")]
struct Args {
    /// Path to the configuration file (without extension)
    #[arg(long, default_value = "config/visit-scribe")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;

    info!("{} starting", cfg.service.name);
    info!(
        "segments: {} ({}s rotation, {}s max session)",
        cfg.recording.segments_path, cfg.recording.segment_secs, cfg.recording.max_session_secs
    );

    let backend = Arc::new(HttpBackend::new(
        cfg.backend.base_url.clone(),
        Duration::from_secs(cfg.backend.request_timeout_secs),
    )?);
    let store = Arc::new(MemorySessionStore::new());

    let device = WavCaptureDevice::new(CaptureConfig {
        output_dir: PathBuf::from(&cfg.recording.segments_path),
        sample_rate: cfg.recording.sample_rate,
        channels: cfg.recording.channels,
    });
    // The platform capture feed attaches here; frames pushed into this
    // sender land in the active segment.
    let _frame_tx = device.frame_sender();

    let recorder = SegmentRecorder::new(Box::new(device));

    let controller = SessionController::spawn(
        ControllerConfig {
            segment_interval: Duration::from_secs(cfg.recording.segment_secs),
            max_session_duration: Duration::from_secs(cfg.recording.max_session_secs),
            error_dismiss_delay: Duration::from_secs(cfg.recording.error_dismiss_secs),
        },
        recorder,
        backend,
        store,
    );

    let router = visit_scribe::create_router(AppState::new(controller));

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    info!("listening on {}", addr);
    axum::serve(listener, router).await?;

    Ok(())
}
