//! Drives one recognition stream on a dedicated OS thread.
//!
//! The thread pulls frames from its capture lease, runs them through the
//! frame processor, applies recognized names to the session and hands the
//! encoded part to the HTTP body through a channel of capacity one. It exits
//! when capture ends, the consumer goes away, a newer session supersedes it
//! or the daemon shuts down. The lease, and with it the device, is released
//! as it exits.

use crate::pipeline::FrameProcessor;
use crate::session::AttendanceSession;
use axum::body::Bytes;
use rollcall_hw::CaptureLease;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use tokio::sync::mpsc;

pub const BOUNDARY: &str = "frame";

/// One `multipart/x-mixed-replace` part holding a JPEG.
pub fn multipart_part(jpeg: &[u8]) -> Bytes {
    let mut part = Vec::with_capacity(jpeg.len() + 64);
    part.extend_from_slice(b"--");
    part.extend_from_slice(BOUNDARY.as_bytes());
    part.extend_from_slice(b"\r\nContent-Type: image/jpeg\r\n\r\n");
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}

pub struct StreamDriver {
    pub lease: CaptureLease,
    pub processor: FrameProcessor,
    pub session: Arc<AttendanceSession>,
    pub shutdown: Arc<AtomicBool>,
}

impl StreamDriver {
    /// Start the pipeline thread and return the receiving end of its parts.
    ///
    /// The thread reads no frame until its session epoch arrives on `start`.
    /// If the sender is dropped instead, it exits and releases the lease.
    pub fn spawn(self, start: std_mpsc::Receiver<u64>) -> std::io::Result<mpsc::Receiver<Bytes>> {
        let (tx, rx) = mpsc::channel::<Bytes>(1);
        std::thread::Builder::new()
            .name("rollcall-pipeline".into())
            .spawn(move || match start.recv() {
                Ok(epoch) => self.run(epoch, tx),
                Err(_) => tracing::debug!("pipeline cancelled before start"),
            })?;
        Ok(rx)
    }

    fn run(mut self, epoch: u64, tx: mpsc::Sender<Bytes>) {
        tracing::info!(epoch, "pipeline thread started");
        let mut frames = 0u64;
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                tracing::info!(epoch, "pipeline stopping for shutdown");
                break;
            }
            if !self.session.is_current(epoch) {
                tracing::info!(epoch, frames, "pipeline superseded by a newer session");
                break;
            }

            let frame = match self.lease.read() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    tracing::info!(epoch, frames, "capture ended");
                    break;
                }
                Err(e) => {
                    tracing::warn!(epoch, error = %e, "capture failed; ending stream");
                    break;
                }
            };

            let processed = match self.processor.process(&frame) {
                Ok(processed) => processed,
                Err(e) => {
                    tracing::warn!(sequence = frame.sequence, error = %e, "frame encode failed; dropping frame");
                    continue;
                }
            };
            frames += 1;

            if !processed.recognized.is_empty() {
                self.session.record(epoch, &processed.recognized);
            }

            if tx.blocking_send(multipart_part(&processed.jpeg)).is_err() {
                tracing::info!(epoch, frames, "stream consumer detached");
                break;
            }
        }
        // Release the device before the consumer observes end-of-stream.
        drop(self);
    }
}
