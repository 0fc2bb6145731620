//! Nearest-neighbour identity matching against the gallery.

use crate::gallery::Gallery;
use crate::types::{DetectedFace, Embedding, MatchedFace, UNKNOWN_LABEL};

/// Default maximum Euclidean distance for a positive match.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Result of matching a query embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Matched label, or [`UNKNOWN_LABEL`].
    pub label: String,
    /// Distance to the nearest gallery embedding (`+inf` for an empty gallery).
    pub distance: f32,
}

impl MatchResult {
    pub fn unknown(distance: f32) -> Self {
        Self {
            label: UNKNOWN_LABEL.to_string(),
            distance,
        }
    }

    pub fn is_known(&self) -> bool {
        self.label != UNKNOWN_LABEL
    }

    pub fn confidence_percent(&self) -> i32 {
        confidence_percent(self.distance)
    }
}

/// `round((1 - distance) * 100)`, unclamped. Non-finite distances yield 0.
pub fn confidence_percent(distance: f32) -> i32 {
    if !distance.is_finite() {
        return 0;
    }
    ((1.0 - distance) * 100.0).round() as i32
}

/// Strategy for comparing a query embedding against a gallery of identities.
pub trait Matcher {
    fn find_best(&self, query: &Embedding, gallery: &Gallery) -> MatchResult;
}

/// Euclidean nearest-neighbour matcher with a hard distance cutoff.
///
/// Every embedding of every identity is compared; an identity's score is its
/// best embedding. Ties keep the identity seen first in gallery order.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    pub threshold: f32,
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
        }
    }
}

impl EuclideanMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    /// Label a detected face. Faces without an embedding are unknown.
    pub fn label_face(&self, face: DetectedFace, gallery: &Gallery) -> MatchedFace {
        let result = match &face.embedding {
            Some(embedding) => self.find_best(embedding, gallery),
            None => MatchResult::unknown(f32::INFINITY),
        };
        MatchedFace {
            confidence_percent: result.confidence_percent(),
            label: result.label,
            distance: result.distance,
            face,
        }
    }
}

impl Matcher for EuclideanMatcher {
    fn find_best(&self, query: &Embedding, gallery: &Gallery) -> MatchResult {
        let mut best_dist = f32::INFINITY;
        let mut best_label: Option<&str> = None;

        for identity in gallery.identities() {
            for reference in &identity.embeddings {
                let dist = query.euclidean_distance(reference);
                if dist < best_dist {
                    best_dist = dist;
                    best_label = Some(&identity.label);
                }
            }
        }

        match best_label {
            Some(label) if best_dist <= self.threshold => MatchResult {
                label: label.to_string(),
                distance: best_dist,
            },
            _ => MatchResult::unknown(best_dist),
        }
    }
}
