use serde::{Deserialize, Serialize};

/// Label assigned to a face whose nearest gallery distance exceeds the threshold.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Pixel dimensions of a frame or of the space a detector reported boxes in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Axis-aligned box in pixel coordinates (top-left origin).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Build from `[x0, y0, x1, y1]` corner coordinates.
    pub fn from_corners(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        }
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Map a box reported against `from` into the coordinate space of `to`.
    ///
    /// A zero-sized `from` leaves the box untouched.
    pub fn rescale(&self, from: Resolution, to: Resolution) -> Self {
        if from == to || from.width == 0 || from.height == 0 {
            return *self;
        }
        let sx = to.width as f32 / from.width as f32;
        let sy = to.height as f32 / from.height as f32;
        Self {
            x: self.x * sx,
            y: self.y * sy,
            width: self.width * sx,
            height: self.height * sy,
        }
    }
}

/// Face embedding vector (typically 128-dimensional).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// True when the vector has the expected length and every component is finite.
    pub fn has_shape(&self, dim: usize) -> bool {
        self.values.len() == dim && self.values.iter().all(|v| v.is_finite())
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// A captured camera frame as handed to the perception backend.
#[derive(Debug, Clone)]
pub struct Frame {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    /// Luma pixel data (width * height bytes). Empty when the backend
    /// delivers detections out-of-band.
    pub data: Vec<u8>,
}

impl Frame {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}

/// One face reported by the perception backend for the current cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedFace {
    pub id: String,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    /// Detector confidence, 0 when the backend did not report one.
    pub confidence: f32,
    pub embedding: Option<Embedding>,
    pub landmarks: Option<Vec<(f32, f32)>>,
}

/// A detected face after identity matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchedFace {
    #[serde(flatten)]
    pub face: DetectedFace,
    pub label: String,
    pub distance: f32,
    /// Raw `round((1 - distance) * 100)`; may fall outside 0..=100.
    pub confidence_percent: i32,
}

impl MatchedFace {
    pub fn is_registered(&self) -> bool {
        self.label != UNKNOWN_LABEL
    }

    /// Confidence clamped for display.
    pub fn display_confidence(&self) -> u8 {
        self.confidence_percent.clamp(0, 100) as u8
    }
}

/// A generic (non-face) object detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDetection {
    pub class: String,
    pub score: f32,
    /// `[x0, y0, x1, y1]`.
    #[serde(rename = "box")]
    pub bbox: [f32; 4],
}

impl ObjectDetection {
    pub fn center(&self) -> (f32, f32) {
        let [x0, y0, x1, y1] = self.bbox;
        ((x0 + x1) / 2.0, (y0 + y1) / 2.0)
    }

    pub fn rescale(&self, from: Resolution, to: Resolution) -> Self {
        let [x0, y0, x1, y1] = self.bbox;
        let b = BoundingBox::from_corners(x0, y0, x1, y1).rescale(from, to);
        Self {
            class: self.class.clone(),
            score: self.score,
            bbox: [b.x, b.y, b.x + b.width, b.y + b.height],
        }
    }
}

/// Detector output tagged with the resolution its boxes are expressed in.
#[derive(Debug, Clone)]
pub struct Detections<T> {
    pub space: Resolution,
    pub items: Vec<T>,
}

impl<T> Detections<T> {
    pub fn empty(space: Resolution) -> Self {
        Self {
            space,
            items: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance_identical() {
        let a = Embedding::new(vec![0.5, 0.25, 1.0]);
        assert_eq!(a.euclidean_distance(&a.clone()), 0.0);
    }

    #[test]
    fn test_euclidean_distance_345() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_has_shape_rejects_nan_and_wrong_len() {
        assert!(Embedding::new(vec![0.0; 4]).has_shape(4));
        assert!(!Embedding::new(vec![0.0; 3]).has_shape(4));
        assert!(!Embedding::new(vec![0.0, f32::NAN, 0.0, 0.0]).has_shape(4));
    }

    #[test]
    fn test_box_center_and_corners() {
        let b = BoundingBox::from_corners(10.0, 20.0, 30.0, 60.0);
        assert_eq!(b, BoundingBox::new(10.0, 20.0, 20.0, 40.0));
        assert_eq!(b.center(), (20.0, 40.0));
    }

    #[test]
    fn test_rescale_quarter_scale_to_native() {
        let b = BoundingBox::new(10.0, 5.0, 20.0, 25.0);
        let scaled = b.rescale(Resolution::new(180, 140), Resolution::new(720, 560));
        assert_eq!(scaled, BoundingBox::new(40.0, 20.0, 80.0, 100.0));
    }

    #[test]
    fn test_rescale_zero_source_is_identity() {
        let b = BoundingBox::new(1.0, 2.0, 3.0, 4.0);
        assert_eq!(b.rescale(Resolution::new(0, 0), Resolution::new(640, 480)), b);
    }

    #[test]
    fn test_object_center_and_rescale() {
        let o = ObjectDetection {
            class: "cell phone".into(),
            score: 0.9,
            bbox: [40.0, 40.0, 60.0, 60.0],
        };
        assert_eq!(o.center(), (50.0, 50.0));
        let r = o.rescale(Resolution::new(320, 240), Resolution::new(640, 480));
        assert_eq!(r.bbox, [80.0, 80.0, 120.0, 120.0]);
    }

    #[test]
    fn test_display_confidence_clamps() {
        let face = DetectedFace {
            id: "face-0".into(),
            bbox: BoundingBox::default(),
            confidence: 0.0,
            embedding: None,
            landmarks: None,
        };
        let m = MatchedFace {
            face,
            label: "A".into(),
            distance: -0.3,
            confidence_percent: 130,
        };
        assert_eq!(m.display_confidence(), 100);
        assert!(m.is_registered());
    }
}
