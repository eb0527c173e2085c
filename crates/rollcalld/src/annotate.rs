//! Draws recognition results onto outgoing frames.

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use rollcall_core::FaceMatch;
use std::path::{Path, PathBuf};
use thiserror::Error;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const LABEL_HEIGHT: u32 = 18;

/// DejaVu Sans Mono, used when no font path is configured.
static BUNDLED_FONT: &[u8] = include_bytes!("../assets/DejaVuSansMono.ttf");

#[derive(Error, Debug)]
pub enum AnnotateError {
    #[error("failed to read font {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid font {0}")]
    InvalidFont(PathBuf),
}

/// Box-and-label painter.
#[derive(Clone)]
pub struct Annotator {
    font: Option<FontArc>,
}

impl Default for Annotator {
    /// Labels in the bundled font.
    fn default() -> Self {
        let font = FontArc::try_from_slice(BUNDLED_FONT).ok();
        if font.is_none() {
            tracing::warn!("bundled label font is unreadable; drawing boxes only");
        }
        Self { font }
    }
}

impl Annotator {
    /// Load the label font from `font_path`, or fall back to the bundled one.
    pub fn load(font_path: Option<&Path>) -> Result<Self, AnnotateError> {
        let Some(path) = font_path else {
            return Ok(Self::default());
        };
        let bytes = std::fs::read(path).map_err(|source| AnnotateError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let font = FontArc::try_from_vec(bytes)
            .map_err(|_| AnnotateError::InvalidFont(path.to_path_buf()))?;
        tracing::info!(path = %path.display(), "label font loaded");
        Ok(Self { font: Some(font) })
    }

    /// Draw a 2px green box and a name label per face.
    pub fn draw(&self, image: &mut RgbImage, matches: &[FaceMatch]) {
        let (img_w, img_h) = image.dimensions();
        if img_w < 3 || img_h < 3 {
            return;
        }

        for m in matches {
            let x0 = (m.bbox.x.round() as i64).clamp(0, img_w as i64 - 1) as i32;
            let y0 = (m.bbox.y.round() as i64).clamp(0, img_h as i64 - 1) as i32;
            let x1 = ((m.bbox.x + m.bbox.width).round() as i64).clamp(0, img_w as i64 - 1) as i32;
            let y1 = ((m.bbox.y + m.bbox.height).round() as i64).clamp(0, img_h as i64 - 1) as i32;
            let w = ((x1 - x0).max(0) as u32 + 1).max(3);
            let h = ((y1 - y0).max(0) as u32 + 1).max(3);

            draw_hollow_rect_mut(image, Rect::at(x0, y0).of_size(w, h), BOX_COLOR);
            draw_hollow_rect_mut(image, Rect::at(x0 + 1, y0 + 1).of_size(w - 2, h - 2), BOX_COLOR);

            if let Some(font) = &self.font {
                let label = m.label();
                let label_w = (label.chars().count() as u32 * 9 + 6).max(w);
                // Above the box when there is room, otherwise inside its top edge.
                let ly = if y0 >= LABEL_HEIGHT as i32 { y0 - LABEL_HEIGHT as i32 } else { y0 };
                draw_filled_rect_mut(image, Rect::at(x0, ly).of_size(label_w, LABEL_HEIGHT), BOX_COLOR);
                draw_text_mut(image, TEXT_COLOR, x0 + 3, ly + 1, PxScale::from(16.0), font, label);
            }
        }
    }
}
