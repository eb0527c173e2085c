//! Synthetic frame source for `stub://` device specs.
//!
//! Produces a deterministic moving gradient so the full pipeline can run
//! without a camera. Spec format: `stub://WIDTHxHEIGHT[?frames=N]`.

use crate::camera::CameraError;
use crate::capture::FrameSource;
use crate::frame::Frame;
use image::{Rgb, RgbImage};

pub struct SyntheticSource {
    width: u32,
    height: u32,
    /// Frames left before end-of-stream; `None` = endless.
    remaining: Option<u64>,
    sequence: u32,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, frames: Option<u64>) -> Self {
        Self {
            width,
            height,
            remaining: frames,
            sequence: 0,
        }
    }

    pub fn parse(spec: &str) -> Result<Self, CameraError> {
        let invalid = || CameraError::InvalidSpec(spec.to_string());

        let rest = spec.strip_prefix("stub://").ok_or_else(invalid)?;
        let (dims, query) = match rest.split_once('?') {
            Some((dims, query)) => (dims, Some(query)),
            None => (rest, None),
        };

        let (w, h) = dims.split_once('x').ok_or_else(invalid)?;
        let width: u32 = w.parse().map_err(|_| invalid())?;
        let height: u32 = h.parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }

        let mut frames = None;
        if let Some(query) = query {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                match pair.split_once('=') {
                    Some(("frames", n)) => frames = Some(n.parse().map_err(|_| invalid())?),
                    _ => return Err(invalid()),
                }
            }
        }

        Ok(Self::new(width, height, frames))
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return Ok(None);
            }
            *remaining -= 1;
        }

        let shift = self.sequence;
        let image = RgbImage::from_fn(self.width, self.height, |x, y| {
            Rgb([
                (x.wrapping_add(shift) % 256) as u8,
                (y % 256) as u8,
                (shift % 256) as u8,
            ])
        });
        let frame = Frame::new(image, self.sequence);
        self.sequence = self.sequence.wrapping_add(1);
        Ok(Some(frame))
    }

    fn describe(&self) -> String {
        format!("stub://{}x{}", self.width, self.height)
    }
}
