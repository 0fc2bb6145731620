//! Behavioral signals derived from the matched faces of one cycle.

use crate::types::{MatchedFace, ObjectDetection};
use serde::{Deserialize, Serialize};

/// Tunables for the proximity heuristics.
#[derive(Debug, Clone)]
pub struct HeuristicsConfig {
    /// Maximum box-origin distance (pixels, native frame space) for a pair.
    pub group_distance_px: f32,
    /// Object class counted as a personal device.
    pub device_class: String,
    /// Detections must score strictly above this.
    pub device_min_score: f32,
    /// Attributed user when no registered face is in view.
    pub unknown_device_user: String,
}

impl Default for HeuristicsConfig {
    fn default() -> Self {
        Self {
            group_distance_px: 400.0,
            device_class: "cell phone".to_string(),
            device_min_score: 0.5,
            unknown_device_user: "Unknown Student".to_string(),
        }
    }
}

/// Two registered faces flagged as talking to each other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscussionPair {
    pub first: String,
    pub second: String,
}

/// Per-cycle device-usage flags. Not cumulative.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceUsage {
    pub detected: bool,
    pub user: Option<String>,
}

/// Flag pairs of registered faces whose box origins are within
/// `max_distance` and whose origin order agrees with their center order.
///
/// The order check is a loose stand-in for "oriented toward each other";
/// in practice it mostly encodes which face is further left. Pairs are
/// returned in enumeration order (outer index first).
pub fn detect_group_discussions(faces: &[MatchedFace], max_distance: f32) -> Vec<DiscussionPair> {
    let registered: Vec<&MatchedFace> = faces.iter().filter(|f| f.is_registered()).collect();
    let mut pairs = Vec::new();

    for i in 0..registered.len() {
        for j in (i + 1)..registered.len() {
            let a = &registered[i].face.bbox;
            let b = &registered[j].face.bbox;

            let distance = ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt();
            if distance >= max_distance {
                continue;
            }

            let a_center = a.x + a.width / 2.0;
            let b_center = b.x + b.width / 2.0;
            let facing = (a_center < b_center && a.x < b.x) || (a_center > b_center && a.x > b.x);
            if facing {
                pairs.push(DiscussionPair {
                    first: registered[i].label.clone(),
                    second: registered[j].label.clone(),
                });
            }
        }
    }

    pairs
}

/// Attribute the first qualifying device detection to the nearest
/// registered face (center to center).
pub fn attribute_device(
    objects: &[ObjectDetection],
    faces: &[MatchedFace],
    config: &HeuristicsConfig,
) -> DeviceUsage {
    let Some(device) = objects
        .iter()
        .find(|o| o.class == config.device_class && o.score > config.device_min_score)
    else {
        return DeviceUsage::default();
    };

    let (dx, dy) = device.center();
    let mut user = config.unknown_device_user.as_str();
    let mut min_distance = f32::INFINITY;

    for face in faces.iter().filter(|f| f.is_registered()) {
        let (fx, fy) = face.face.bbox.center();
        let distance = ((fx - dx).powi(2) + (fy - dy).powi(2)).sqrt();
        if distance < min_distance {
            min_distance = distance;
            user = face.label.as_str();
        }
    }

    DeviceUsage {
        detected: true,
        user: Some(user.to_string()),
    }
}
