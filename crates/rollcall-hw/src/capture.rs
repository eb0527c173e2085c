//! Singleton capture source with reference-counted leases.
//!
//! The device is opened lazily on the first `acquire()`. Concurrent acquires
//! share the one open handle; the handle is released when the last lease is
//! dropped, or as soon as the source reports end-of-stream or a read error.
//! The next `acquire()` after a release reopens the device.

use crate::camera::{Camera, CameraError};
use crate::frame::Frame;
use crate::synthetic::SyntheticSource;
use parking_lot::Mutex;
use std::sync::Arc;

/// Default requested capture resolution for V4L2 devices.
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;

/// A producer of RGB frames.
pub trait FrameSource: Send {
    /// Next frame, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

type Opener = Box<dyn Fn() -> Result<Box<dyn FrameSource>, CameraError> + Send + Sync>;

struct Slot {
    source: Option<Box<dyn FrameSource>>,
    leases: usize,
    opens: u64,
}

impl Slot {
    fn release(&mut self, reason: &str) {
        if let Some(source) = self.source.take() {
            tracing::info!(source = %source.describe(), reason, "capture released");
        }
    }
}

/// Owner of the single capture device handle.
pub struct CaptureSource {
    opener: Opener,
    slot: Arc<Mutex<Slot>>,
}

impl CaptureSource {
    /// Build a capture source from an arbitrary opener.
    pub fn new<F>(opener: F) -> Self
    where
        F: Fn() -> Result<Box<dyn FrameSource>, CameraError> + Send + Sync + 'static,
    {
        Self {
            opener: Box::new(opener),
            slot: Arc::new(Mutex::new(Slot {
                source: None,
                leases: 0,
                opens: 0,
            })),
        }
    }

    /// Capture source for a device spec: `/dev/videoN` or `stub://WxH[?frames=N]`.
    pub fn for_device(spec: &str) -> Result<Self, CameraError> {
        if spec.starts_with("stub://") {
            // Validate eagerly so a bad spec fails at startup, not at first stream.
            SyntheticSource::parse(spec)?;
            let spec = spec.to_string();
            Ok(Self::new(move || {
                Ok(Box::new(SyntheticSource::parse(&spec)?) as Box<dyn FrameSource>)
            }))
        } else {
            let path = spec.to_string();
            Ok(Self::new(move || {
                Ok(Box::new(Camera::open(&path, DEFAULT_WIDTH, DEFAULT_HEIGHT)?) as Box<dyn FrameSource>)
            }))
        }
    }

    /// Take a lease on the device, opening it if no handle is currently open.
    pub fn acquire(&self) -> Result<CaptureLease, CameraError> {
        let mut slot = self.slot.lock();
        if slot.source.is_none() {
            let source = (self.opener)()?;
            slot.opens += 1;
            tracing::info!(source = %source.describe(), opens = slot.opens, "capture opened");
            slot.source = Some(source);
        }
        slot.leases += 1;
        Ok(CaptureLease {
            slot: Arc::clone(&self.slot),
        })
    }

    /// Whether a device handle is currently open.
    pub fn is_open(&self) -> bool {
        self.slot.lock().source.is_some()
    }

    /// Number of outstanding leases.
    pub fn lease_count(&self) -> usize {
        self.slot.lock().leases
    }

    /// How many times the device has been opened since startup.
    pub fn open_count(&self) -> u64 {
        self.slot.lock().opens
    }
}

/// Shared access to the open capture device. Dropping the last lease
/// releases the device.
pub struct CaptureLease {
    slot: Arc<Mutex<Slot>>,
}

impl CaptureLease {
    /// Read the next frame. `Ok(None)` means the stream has ended.
    pub fn read(&mut self) -> Result<Option<Frame>, CameraError> {
        let mut slot = self.slot.lock();
        let Some(source) = slot.source.as_mut() else {
            return Ok(None);
        };
        match source.next_frame() {
            Ok(Some(frame)) => Ok(Some(frame)),
            Ok(None) => {
                slot.release("end of stream");
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(error = %e, "capture read failed");
                slot.release("read failure");
                Err(e)
            }
        }
    }
}

impl Drop for CaptureLease {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        slot.leases = slot.leases.saturating_sub(1);
        if slot.leases == 0 {
            slot.release("last lease dropped");
        }
    }
}
