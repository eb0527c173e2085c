//! Daemon operations behind the HTTP routes.
//!
//! Every method here may block (SQLite, capture, inference, SMTP); the HTTP
//! layer calls them from `spawn_blocking`.

use crate::annotate::Annotator;
use crate::error::SessionError;
use crate::export::CsvExporter;
use crate::gateway::Gateway;
use crate::notify::{self, NotificationSink};
use crate::pipeline::{FaceAnalyzer, FrameProcessor, PipelineSettings};
use crate::registry::Registry;
use crate::session::{AttendanceSession, FinalizeOutcome, SessionSnapshot};
use crate::stream::StreamDriver;
use axum::body::Bytes;
use parking_lot::Mutex;
use rollcall_core::UNKNOWN_LABEL;
use rollcall_hw::{CameraError, CaptureSource};
use rollcall_store::StoredIdentity;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct Service {
    pub gateway: Arc<dyn Gateway>,
    pub capture: Arc<CaptureSource>,
    pub analyzer: Arc<Mutex<FaceAnalyzer>>,
    pub session: Arc<AttendanceSession>,
    pub exporter: Arc<CsvExporter>,
    pub notifier: Arc<dyn NotificationSink>,
    pub annotator: Annotator,
    pub settings: PipelineSettings,
    pub shutdown: Arc<AtomicBool>,
}

/// A validated registration request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub name: String,
    pub age: i64,
    pub email: String,
}

impl Registration {
    pub fn parse(name: &str, age: &str, email: &str) -> Result<Self, SessionError> {
        let invalid = |msg: &str| SessionError::InvalidRegistration(msg.to_string());

        let name = name.trim();
        if name.is_empty() {
            return Err(invalid("name is required"));
        }
        if name.eq_ignore_ascii_case(UNKNOWN_LABEL) {
            return Err(invalid("name is reserved"));
        }

        let age: i64 = age.trim().parse().map_err(|_| invalid("age must be a whole number"))?;
        if !(0..=150).contains(&age) {
            return Err(invalid("age out of range"));
        }

        let email = email.trim();
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && domain.contains('.') => {}
            _ => return Err(invalid("email must be a valid address")),
        }

        Ok(Self {
            name: name.to_string(),
            age,
            email: email.to_string(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub version: &'static str,
    #[serde(flatten)]
    pub session: SessionSnapshot,
    pub capture_open: bool,
    pub capture_leases: usize,
}

impl Service {
    /// Reload the registry, take a capture lease, spawn a pipeline and start
    /// a new session for it. Nothing changes if the registry, the device or
    /// the pipeline thread is unavailable.
    pub fn open_stream(&self) -> Result<mpsc::Receiver<Bytes>, SessionError> {
        let registry = Registry::load(self.gateway.as_ref())?;
        let lease = self.capture.acquire()?;

        let processor = FrameProcessor::new(
            self.settings,
            Arc::clone(&self.analyzer),
            registry.clone(),
            self.annotator.clone(),
        );
        let (start, started) = std_mpsc::sync_channel(1);
        let rx = StreamDriver {
            lease,
            processor,
            session: Arc::clone(&self.session),
            shutdown: Arc::clone(&self.shutdown),
        }
        .spawn(started)
        .map_err(|e| SessionError::Worker(e.to_string()))?;

        let epoch = self.session.begin(registry);
        if start.send(epoch).is_err() {
            tracing::warn!(epoch, "pipeline exited before it was started");
        }
        Ok(rx)
    }

    /// Finalize the session. Notifications go out on a detached thread and
    /// never delay the result.
    pub fn stop_attendance(&self) -> Result<FinalizeOutcome, SessionError> {
        let outcome = self.session.finalize(self.gateway.as_ref(), &self.exporter)?;
        if let FinalizeOutcome::Saved(summary) = &outcome {
            notify::dispatch_detached(Arc::clone(&self.notifier), summary.clone());
        }
        Ok(outcome)
    }

    /// Capture one frame, embed its most confident face and upsert the
    /// identity. Visible to streams from the next session on.
    pub fn register(&self, registration: Registration) -> Result<(), SessionError> {
        let frame = {
            let mut lease = self.capture.acquire()?;
            lease.read()?.ok_or_else(|| {
                SessionError::CaptureUnavailable(CameraError::CaptureFailed(
                    "no frame available".into(),
                ))
            })?
        };

        let (face, embedding) = self
            .analyzer
            .lock()
            .embed_primary(&frame.image)?
            .ok_or(SessionError::NoFaceDetected)?;

        self.gateway
            .upsert_identity(&StoredIdentity {
                name: registration.name.clone(),
                age: registration.age,
                email: registration.email,
                encoding: embedding.values,
            })
            .map_err(SessionError::PersistenceFailure)?;

        tracing::info!(
            name = %registration.name,
            confidence = face.confidence,
            "identity registered"
        );
        Ok(())
    }

    pub fn status(&self) -> StatusReport {
        StatusReport {
            version: env!("CARGO_PKG_VERSION"),
            session: self.session.snapshot(),
            capture_open: self.capture.is_open(),
            capture_leases: self.capture.lease_count(),
        }
    }

    /// Ask running pipelines to stop at their next frame.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}
