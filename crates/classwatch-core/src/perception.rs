//! Seams to the external perception models.
//!
//! Face localization, embedding extraction and object detection run outside
//! this crate; implementations adapt whatever backend is in use.

use crate::types::{Detections, Embedding, Frame, ObjectDetection};
use crate::types::{BoundingBox, Resolution};
use std::future::Future;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PerceptionError {
    #[error("perception backend unavailable: {0}")]
    Unavailable(String),
    #[error("perception call failed: {0}")]
    Failed(String),
    #[error("perception call timed out after {0} ms")]
    TimedOut(u64),
}

/// A face as reported by the backend, before identity matching.
#[derive(Debug, Clone, Default)]
pub struct RawFace {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub embedding: Option<Embedding>,
    pub landmarks: Option<Vec<(f32, f32)>>,
}

impl RawFace {
    /// Map box and landmarks from `from` into `to`. Same identity rule as
    /// [`BoundingBox::rescale`]: equal spaces or any zero side leave the
    /// face untouched.
    pub fn rescale(mut self, from: Resolution, to: Resolution) -> Self {
        if from == to || from.width == 0 || from.height == 0 {
            return self;
        }
        self.bbox = self.bbox.rescale(from, to);
        if let Some(points) = self.landmarks.as_mut() {
            let sx = to.width as f32 / from.width as f32;
            let sy = to.height as f32 / from.height as f32;
            for p in points.iter_mut() {
                *p = (p.0 * sx, p.1 * sy);
            }
        }
        self
    }
}

/// Per-frame detector pair.
pub trait PerceptionBackend: Send {
    /// Locate faces and extract their embeddings.
    fn detect_faces(
        &mut self,
        frame: &Frame,
    ) -> impl Future<Output = Result<Detections<RawFace>, PerceptionError>> + Send;

    /// Run the generic object detector.
    fn detect_objects(
        &mut self,
        frame: &Frame,
    ) -> impl Future<Output = Result<Detections<ObjectDetection>, PerceptionError>> + Send;
}

/// Single-face embedding extraction for enrollment photos.
pub trait FaceEmbedder {
    /// `Ok(None)` when the image contains no detectable face.
    fn embed_single(
        &mut self,
        image: &Frame,
    ) -> impl Future<Output = Result<Option<Embedding>, PerceptionError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_face_rescale_scales_landmarks() {
        let face = RawFace {
            bbox: BoundingBox::new(1.0, 1.0, 2.0, 2.0),
            confidence: 0.9,
            embedding: None,
            landmarks: Some(vec![(1.0, 2.0), (3.0, 4.0)]),
        };
        let scaled = face.rescale(Resolution::new(100, 100), Resolution::new(400, 200));
        assert_eq!(scaled.bbox, BoundingBox::new(4.0, 2.0, 8.0, 4.0));
        assert_eq!(scaled.landmarks, Some(vec![(4.0, 4.0), (12.0, 8.0)]));
    }

    #[test]
    fn test_raw_face_rescale_half_zero_space_is_identity() {
        let face = RawFace {
            bbox: BoundingBox::new(1.0, 1.0, 2.0, 2.0),
            landmarks: Some(vec![(1.5, 2.0)]),
            ..RawFace::default()
        };
        for from in [Resolution::new(0, 100), Resolution::new(100, 0)] {
            let scaled = face.clone().rescale(from, Resolution::new(400, 200));
            assert_eq!(scaled.bbox, face.bbox);
            assert_eq!(scaled.landmarks, face.landmarks);
        }
    }
}
