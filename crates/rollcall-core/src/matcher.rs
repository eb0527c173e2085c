//! Nearest-identity matching over an embedding gallery.
//!
//! Lower distance means more similar. A probe is accepted as the identity
//! with the globally smallest distance, and only when that distance is
//! strictly below the threshold. When several identities share the minimum,
//! the first one in gallery order wins.

use crate::types::{Embedding, Identity};
use std::fmt;
use std::str::FromStr;

/// Outcome of matching one probe embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    /// Accepted identity name, if any was within threshold.
    pub name: Option<String>,
    /// Smallest distance seen (`f32::INFINITY` for an empty gallery).
    pub distance: f32,
}

/// Strategy for comparing a probe embedding against a gallery of identities.
pub trait Matcher {
    /// Non-negative, symmetric distance; zero for identical vectors.
    fn distance(&self, a: &Embedding, b: &Embedding) -> f32;

    fn best_match(&self, probe: &Embedding, gallery: &[Identity], threshold: f32) -> MatchOutcome {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        // Strict `<` keeps the earliest entry on ties and skips NaN.
        for (i, identity) in gallery.iter().enumerate() {
            if identity.embedding.dim() != probe.dim() {
                continue;
            }
            let dist = self.distance(probe, &identity.embedding);
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_dist < threshold => MatchOutcome {
                name: Some(gallery[idx].name.clone()),
                distance: best_dist,
            },
            _ => MatchOutcome {
                name: None,
                distance: best_dist,
            },
        }
    }
}

/// L2 distance between raw embedding vectors.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn distance(&self, a: &Embedding, b: &Embedding) -> f32 {
        a.euclidean_distance(b)
    }
}

/// Cosine distance, `1 - cos(a, b)`, floored at zero against rounding.
/// Infinite when the dimensions differ.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn distance(&self, a: &Embedding, b: &Embedding) -> f32 {
        if a.dim() != b.dim() {
            return f32::INFINITY;
        }
        (1.0 - a.similarity(b)).max(0.0)
    }
}

/// Runtime-selectable metric, parsed from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistanceMetric {
    Euclidean,
    #[default]
    Cosine,
}

impl DistanceMetric {
    /// Acceptance threshold calibrated for L2-normalised ArcFace embeddings.
    ///
    /// Both values accept at cosine similarity 0.40. For unit vectors
    /// `euclidean = sqrt(2 * cosine_distance)`, so 0.60 maps to ~1.095.
    pub fn default_threshold(self) -> f32 {
        match self {
            DistanceMetric::Euclidean => 1.095,
            DistanceMetric::Cosine => 0.6,
        }
    }
}

impl Matcher for DistanceMetric {
    fn distance(&self, a: &Embedding, b: &Embedding) -> f32 {
        match self {
            DistanceMetric::Euclidean => EuclideanMatcher.distance(a, b),
            DistanceMetric::Cosine => CosineMatcher.distance(a, b),
        }
    }
}

impl FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "euclidean" | "l2" => Ok(DistanceMetric::Euclidean),
            "cosine" => Ok(DistanceMetric::Cosine),
            other => Err(format!("unknown distance metric: {other}")),
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistanceMetric::Euclidean => f.write_str("euclidean"),
            DistanceMetric::Cosine => f.write_str("cosine"),
        }
    }
}
