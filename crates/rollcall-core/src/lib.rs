//! rollcall-core: face detection, embedding and identity matching.
//!
//! Uses SCRFD for face detection and ArcFace for face embeddings, both
//! running via ONNX Runtime for CPU inference. Matching is a pure distance
//! search over an identity gallery.

mod alignment;
pub mod detector;
pub mod matcher;
pub mod recognizer;
pub mod types;

pub use detector::{FaceDetect, FaceDetector};
pub use matcher::{CosineMatcher, DistanceMetric, EuclideanMatcher, MatchOutcome, Matcher};
pub use recognizer::{FaceEmbed, FaceRecognizer};
pub use types::{BoundingBox, Embedding, FaceMatch, Identity, UNKNOWN_LABEL};
