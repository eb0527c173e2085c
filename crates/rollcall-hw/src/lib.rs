//! rollcall-hw: hardware abstraction for camera capture.
//!
//! Provides V4L2-based camera access converted to RGB, a synthetic source
//! for camera-less runs, and the process-wide capture source that hands out
//! shared leases on the one open device.

pub mod camera;
pub mod capture;
pub mod frame;
pub mod synthetic;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use capture::{CaptureLease, CaptureSource, FrameSource};
pub use frame::Frame;
pub use synthetic::SyntheticSource;
