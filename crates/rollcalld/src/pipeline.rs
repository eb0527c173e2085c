//! Per-frame recognition: downscale, detect, embed, match, annotate, encode.
//!
//! `FrameProcessor::process` never touches session state. It reports the
//! accepted names and leaves applying them to the caller.

use crate::annotate::Annotator;
use crate::registry::Registry;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use parking_lot::Mutex;
use rollcall_core::detector::DetectorError;
use rollcall_core::recognizer::RecognizerError;
use rollcall_core::{BoundingBox, DistanceMetric, Embedding, FaceDetect, FaceEmbed, FaceMatch, Matcher};
use rollcall_hw::Frame;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Detector and embedder pair. One instance is shared by every stream and
/// by registration, behind a mutex.
pub struct FaceAnalyzer {
    detector: Box<dyn FaceDetect>,
    embedder: Box<dyn FaceEmbed>,
}

impl FaceAnalyzer {
    pub fn new(detector: Box<dyn FaceDetect>, embedder: Box<dyn FaceEmbed>) -> Self {
        Self { detector, embedder }
    }

    /// Faces in `image`, most confident first, each with its embedding.
    pub fn analyze(&mut self, image: &RgbImage) -> Result<Vec<(BoundingBox, Embedding)>, AnalysisError> {
        let faces = self.detector.detect(image)?;
        faces
            .into_iter()
            .map(|face| {
                let embedding = self.embedder.extract(image, &face)?;
                Ok((face, embedding))
            })
            .collect()
    }

    /// Embedding of the most confident face, if any.
    pub fn embed_primary(&mut self, image: &RgbImage) -> Result<Option<(BoundingBox, Embedding)>, AnalysisError> {
        let faces = self.detector.detect(image)?;
        let Some(face) = faces
            .into_iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
        else {
            return Ok(None);
        };
        let embedding = self.embedder.extract(image, &face)?;
        Ok(Some((face, embedding)))
    }
}

/// Throttling and matching knobs for a stream.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    /// Downscale factor before detection, in (0, 1].
    pub scale: f32,
    /// Analyze frames whose index is a multiple of this.
    pub process_every_n: u64,
    pub threshold: f32,
    pub metric: DistanceMetric,
    pub jpeg_quality: u8,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            scale: 0.5,
            process_every_n: 2,
            threshold: DistanceMetric::default().default_threshold(),
            metric: DistanceMetric::default(),
            jpeg_quality: 80,
        }
    }
}

/// Output of one pipeline iteration.
#[derive(Debug, Clone)]
pub struct ProcessedFrame {
    pub jpeg: Vec<u8>,
    /// Every face found, in original-frame coordinates. Empty on skipped frames.
    pub matches: Vec<FaceMatch>,
    /// Accepted identity names, deduplicated, in first-seen order.
    pub recognized: Vec<String>,
    /// Whether detection ran on this frame.
    pub analyzed: bool,
}

pub struct FrameProcessor {
    settings: PipelineSettings,
    analyzer: Arc<Mutex<FaceAnalyzer>>,
    registry: Registry,
    annotator: Annotator,
    frame_index: u64,
}

impl FrameProcessor {
    pub fn new(
        settings: PipelineSettings,
        analyzer: Arc<Mutex<FaceAnalyzer>>,
        registry: Registry,
        annotator: Annotator,
    ) -> Self {
        Self {
            settings,
            analyzer,
            registry,
            annotator,
            frame_index: 0,
        }
    }

    pub fn process(&mut self, frame: &Frame) -> Result<ProcessedFrame, image::ImageError> {
        let index = self.frame_index;
        self.frame_index += 1;
        let analyze = index % self.settings.process_every_n.max(1) == 0;

        let mut matches = Vec::new();
        if analyze {
            match self.recognize(frame) {
                Ok(found) => matches = found,
                Err(e) => tracing::warn!(frame = index, error = %e, "face analysis failed"),
            }
        }

        let mut recognized: Vec<String> = Vec::new();
        for name in matches.iter().filter_map(|m| m.name.as_ref()) {
            if !recognized.contains(name) {
                recognized.push(name.clone());
            }
        }

        let jpeg = if matches.is_empty() {
            encode_jpeg(&frame.image, self.settings.jpeg_quality)?
        } else {
            let mut annotated = frame.image.clone();
            self.annotator.draw(&mut annotated, &matches);
            encode_jpeg(&annotated, self.settings.jpeg_quality)?
        };

        if analyze {
            tracing::debug!(
                frame = index,
                faces = matches.len(),
                recognized = recognized.len(),
                "frame analyzed"
            );
        }

        Ok(ProcessedFrame {
            jpeg,
            matches,
            recognized,
            analyzed: analyze,
        })
    }

    fn recognize(&self, frame: &Frame) -> Result<Vec<FaceMatch>, AnalysisError> {
        let small = frame.downscaled(self.settings.scale);
        let back = frame.width() as f32 / small.width() as f32;

        let faces = self.analyzer.lock().analyze(&small)?;
        Ok(faces
            .into_iter()
            .map(|(bbox, embedding)| {
                let outcome = self.settings.metric.best_match(
                    &embedding,
                    self.registry.identities(),
                    self.settings.threshold,
                );
                tracing::trace!(name = ?outcome.name, distance = outcome.distance, "face matched");
                FaceMatch {
                    bbox: bbox.rescaled(back),
                    name: outcome.name,
                    distance: outcome.distance,
                }
            })
            .collect())
    }
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality).encode_image(image)?;
    Ok(jpeg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{analyzer, face_box, stored};
    use image::Rgb;
    use std::sync::atomic::Ordering;

    fn registry() -> Registry {
        Registry::from_stored(vec![stored("Alice", vec![1.0, 0.0]), stored("Bob", vec![0.0, 1.0])])
    }

    fn frame(seq: u32) -> Frame {
        Frame::new(RgbImage::from_pixel(64, 48, Rgb([40, 40, 40])), seq)
    }

    fn settings(every_n: u64) -> PipelineSettings {
        PipelineSettings {
            process_every_n: every_n,
            ..PipelineSettings::default()
        }
    }

    #[test]
    fn test_frame_skip_analyzes_one_in_n() {
        for n in [1u64, 2, 3] {
            let (shared, calls) = analyzer(vec![face_box(4.0, 4.0, 10.0, 10.0)], vec![vec![1.0, 0.0]]);
            let mut processor =
                FrameProcessor::new(settings(n), shared, registry(), Annotator::default());

            let analyzed: Vec<bool> = (0..9)
                .map(|i| processor.process(&frame(i)).unwrap().analyzed)
                .collect();
            let expected: Vec<bool> = (0..9u64).map(|i| i % n == 0).collect();
            assert_eq!(analyzed, expected, "n = {n}");
            assert_eq!(calls.load(Ordering::SeqCst) as u64, 9u64.div_ceil(n));
        }
    }

    #[test]
    fn test_recognized_names_and_unknowns() {
        // Alice exact, an unknown far away, Alice again.
        let (shared, _) = analyzer(
            vec![
                face_box(2.0, 2.0, 8.0, 8.0),
                face_box(12.0, 2.0, 8.0, 8.0),
                face_box(2.0, 12.0, 8.0, 8.0),
            ],
            vec![vec![1.0, 0.0], vec![-1.0, -1.0], vec![0.9, 0.1]],
        );
        let mut processor = FrameProcessor::new(settings(1), shared, registry(), Annotator::default());
        let out = processor.process(&frame(0)).unwrap();

        assert!(out.analyzed);
        assert_eq!(out.matches.len(), 3);
        assert_eq!(out.matches[1].label(), "Unknown");
        assert_eq!(out.recognized, vec!["Alice".to_string()]);
    }

    #[test]
    fn test_boxes_are_mapped_back_to_frame_coordinates() {
        let (shared, _) = analyzer(vec![face_box(4.0, 6.0, 10.0, 8.0)], vec![vec![0.0, 1.0]]);
        let mut processor = FrameProcessor::new(settings(1), shared, registry(), Annotator::default());
        let out = processor.process(&frame(0)).unwrap();

        let bbox = &out.matches[0].bbox;
        assert_eq!((bbox.x, bbox.y, bbox.width, bbox.height), (8.0, 12.0, 20.0, 16.0));
        assert_eq!(out.recognized, vec!["Bob".to_string()]);
    }

    #[test]
    fn test_empty_registry_matches_nobody() {
        let (shared, _) = analyzer(vec![face_box(4.0, 4.0, 10.0, 10.0)], vec![vec![1.0, 0.0]]);
        let mut processor =
            FrameProcessor::new(settings(1), shared, Registry::default(), Annotator::default());
        let out = processor.process(&frame(0)).unwrap();
        assert!(out.recognized.is_empty());
        assert_eq!(out.matches[0].distance, f32::INFINITY);
    }

    #[test]
    fn test_skipped_frames_are_still_encoded() {
        let (shared, _) = analyzer(vec![face_box(4.0, 4.0, 10.0, 10.0)], vec![vec![1.0, 0.0]]);
        let mut processor = FrameProcessor::new(settings(2), shared, registry(), Annotator::default());
        processor.process(&frame(0)).unwrap();
        let skipped = processor.process(&frame(1)).unwrap();

        assert!(!skipped.analyzed);
        assert!(skipped.matches.is_empty());
        let decoded = image::load_from_memory(&skipped.jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
    }

    #[test]
    fn test_embed_primary_picks_most_confident_face() {
        let mut weak = face_box(0.0, 0.0, 4.0, 4.0);
        weak.confidence = 0.3;
        let (shared, _) = analyzer(vec![weak, face_box(8.0, 8.0, 4.0, 4.0)], vec![vec![1.0, 0.0]]);
        let (bbox, _) = shared
            .lock()
            .embed_primary(&RgbImage::new(16, 16))
            .unwrap()
            .unwrap();
        assert_eq!(bbox.x, 8.0);

        let (shared, _) = analyzer(vec![], vec![vec![1.0, 0.0]]);
        assert!(shared.lock().embed_primary(&RgbImage::new(16, 16)).unwrap().is_none());
    }
}
