use anyhow::{Context, Result};
use parking_lot::Mutex;
use rollcall_core::{FaceDetector, FaceRecognizer};
use rollcall_hw::CaptureSource;
use rollcall_store::Store;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod annotate;
mod config;
mod error;
mod export;
mod gateway;
mod http;
mod notify;
mod pipeline;
mod registry;
mod service;
mod session;
mod stream;
#[cfg(test)]
mod testing;

use annotate::Annotator;
use config::Config;
use export::CsvExporter;
use notify::{DisabledNotifier, NotificationSink, SmtpNotifier};
use pipeline::{FaceAnalyzer, PipelineSettings};
use service::Service;
use session::AttendanceSession;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "rollcalld starting");

    let config = Config::from_env();

    // Fail fast on anything the daemon cannot run without.
    let store = Store::open(&config.db_path)
        .with_context(|| format!("opening database {}", config.db_path.display()))?;
    tracing::info!(path = %config.db_path.display(), "database opened");

    let detector = FaceDetector::load(&config.scrfd_model_path())?;
    let recognizer = FaceRecognizer::load(&config.arcface_model_path())?;
    let analyzer = FaceAnalyzer::new(Box::new(detector), Box::new(recognizer));

    let capture = CaptureSource::for_device(&config.camera_device)
        .with_context(|| format!("capture device {}", config.camera_device))?;

    std::fs::create_dir_all(&config.export_dir)
        .with_context(|| format!("creating export dir {}", config.export_dir.display()))?;

    let annotator = Annotator::load(config.font_path.as_deref())?;

    let notifier: Arc<dyn NotificationSink> = match &config.smtp {
        Some(smtp) => Arc::new(SmtpNotifier::new(smtp)?),
        None => {
            tracing::info!("SMTP_USER/SMTP_PASS not set; notifications disabled");
            Arc::new(DisabledNotifier)
        }
    };

    let settings = PipelineSettings {
        scale: config.scale,
        process_every_n: config.process_every_n,
        threshold: config.match_threshold,
        metric: config.distance_metric,
        jpeg_quality: config.jpeg_quality,
    };
    tracing::info!(
        scale = settings.scale,
        every_n = settings.process_every_n,
        threshold = settings.threshold,
        metric = %settings.metric,
        "pipeline configured"
    );

    let service = Service {
        gateway: Arc::new(store),
        capture: Arc::new(capture),
        analyzer: Arc::new(Mutex::new(analyzer)),
        session: Arc::new(AttendanceSession::new()),
        exporter: Arc::new(CsvExporter::new(&config.export_dir)),
        notifier,
        annotator,
        settings,
        shutdown: Arc::new(AtomicBool::new(false)),
    };

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, device = %config.camera_device, "rollcalld ready");

    let app = http::router(service.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            tracing::info!("rollcalld shutting down");
            service.shutdown();
        })
        .await?;

    Ok(())
}
