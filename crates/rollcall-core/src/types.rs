use serde::{Deserialize, Serialize};

/// Label drawn on faces that matched no identity.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Map a box found on a downscaled frame back to original-frame coordinates.
    pub fn rescaled(&self, factor: f32) -> BoundingBox {
        BoundingBox {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
            confidence: self.confidence,
            landmarks: self
                .landmarks
                .map(|lms| lms.map(|(lx, ly)| (lx * factor, ly * factor))),
        }
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar. Embeddings of
    /// different dimension are unrelated and score 0.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        if self.dim() != other.dim() {
            return 0.0;
        }
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Compute Euclidean distance between two embeddings.
    ///
    /// Infinite when the dimensions differ.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        if self.dim() != other.dim() {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// A known person: the unit the registry holds and attendance is taken for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    /// Unique key.
    pub name: String,
    pub embedding: Embedding,
    pub age: i64,
    /// Where notifications go (an e-mail address). May be empty.
    pub contact: String,
}

/// One detected face on one analyzed frame.
#[derive(Debug, Clone)]
pub struct FaceMatch {
    /// Box in original-frame coordinates.
    pub bbox: BoundingBox,
    /// Accepted identity, `None` when no identity was within threshold.
    pub name: Option<String>,
    /// Distance to the closest identity (infinite for an empty registry).
    pub distance: f32,
}

impl FaceMatch {
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(UNKNOWN_LABEL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let a = Embedding::new(vec![1.0, 0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_euclidean_distance() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
        assert!((b.euclidean_distance(&a) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_dimension_mismatch_is_unrelated() {
        let short = Embedding::new(vec![1.0]);
        let long = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert!(short.euclidean_distance(&long).is_infinite());
        assert_eq!(short.similarity(&long), 0.0);
    }

    #[test]
    fn test_bbox_rescaled() {
        let bbox = BoundingBox {
            x: 10.0,
            y: 20.0,
            width: 30.0,
            height: 40.0,
            confidence: 0.9,
            landmarks: Some([(1.0, 2.0); 5]),
        };
        let big = bbox.rescaled(2.0);
        assert_eq!((big.x, big.y, big.width, big.height), (20.0, 40.0, 60.0, 80.0));
        assert_eq!(big.landmarks.unwrap()[0], (2.0, 4.0));
        assert_eq!(big.confidence, 0.9);
    }

    #[test]
    fn test_face_match_label() {
        let bbox = BoundingBox {
            x: 0.0, y: 0.0, width: 1.0, height: 1.0, confidence: 1.0, landmarks: None,
        };
        let unknown = FaceMatch { bbox: bbox.clone(), name: None, distance: 0.9 };
        let alice = FaceMatch { bbox, name: Some("Alice".into()), distance: 0.1 };
        assert_eq!(unknown.label(), UNKNOWN_LABEL);
        assert_eq!(alice.label(), "Alice");
    }
}
