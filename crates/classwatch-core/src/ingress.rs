//! Normalization of loosely-shaped perception payloads.
//!
//! External backends emit JSON whose fields are frequently missing or come
//! in more than one shape. Everything is funnelled through
//! [`normalize_payload`]: missing confidences and scores become 0, missing
//! boxes become a zeroed rectangle, and embeddings of the wrong shape are
//! dropped so the face is treated as unidentified.

use crate::perception::RawFace;
use crate::types::{BoundingBox, Embedding, ObjectDetection, Resolution};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngressError {
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// One frame's worth of normalized detections.
#[derive(Debug, Clone, Default)]
pub struct FramePayload {
    /// Native frame resolution, if reported.
    pub resolution: Option<Resolution>,
    /// Space the face boxes are expressed in; defaults to `resolution`.
    pub face_space: Option<Resolution>,
    /// Space the object boxes are expressed in; defaults to `resolution`.
    pub object_space: Option<Resolution>,
    pub faces: Vec<RawFace>,
    pub objects: Vec<ObjectDetection>,
}

/// Parse and normalize one JSON text payload.
pub fn parse_payload(text: &str, dim: usize) -> Result<FramePayload, IngressError> {
    let value: Value = serde_json::from_str(text)?;
    normalize_payload(&value, dim)
}

/// Normalize a decoded payload. Only a non-object top level is rejected.
pub fn normalize_payload(value: &Value, dim: usize) -> Result<FramePayload, IngressError> {
    let obj = value.as_object().ok_or(IngressError::NotAnObject)?;

    let faces = obj
        .get("faces")
        .and_then(Value::as_array)
        .map(|list| list.iter().map(|f| normalize_face(f, dim)).collect())
        .unwrap_or_default();
    let objects = obj
        .get("objects")
        .and_then(Value::as_array)
        .map(|list| list.iter().map(normalize_object).collect())
        .unwrap_or_default();

    Ok(FramePayload {
        resolution: resolution_of(value),
        face_space: obj.get("face_space").and_then(resolution_of),
        object_space: obj.get("object_space").and_then(resolution_of),
        faces,
        objects,
    })
}

fn resolution_of(value: &Value) -> Option<Resolution> {
    let width = value.get("width")?.as_u64()?;
    let height = value.get("height")?.as_u64()?;
    Some(Resolution::new(
        u32::try_from(width).ok()?,
        u32::try_from(height).ok()?,
    ))
}

fn number(value: Option<&Value>) -> f32 {
    value.and_then(Value::as_f64).unwrap_or(0.0) as f32
}

fn corners(value: &Value) -> Option<[f32; 4]> {
    let arr = value.as_array()?;
    if arr.len() != 4 {
        return None;
    }
    let mut out = [0.0f32; 4];
    for (slot, v) in out.iter_mut().zip(arr) {
        *slot = v.as_f64()? as f32;
    }
    Some(out)
}

/// Face boxes arrive either as `{x, y, width, height}` or as
/// `[left, top, right, bottom]`.
fn face_box(value: Option<&Value>) -> BoundingBox {
    let Some(value) = value else {
        return BoundingBox::default();
    };
    if let Some([l, t, r, b]) = corners(value) {
        return BoundingBox::from_corners(l, t, r, b);
    }
    if value.is_object() {
        return BoundingBox::new(
            number(value.get("x")),
            number(value.get("y")),
            number(value.get("width")),
            number(value.get("height")),
        );
    }
    BoundingBox::default()
}

fn normalize_face(value: &Value, dim: usize) -> RawFace {
    let embedding = value
        .get("embedding")
        .and_then(Value::as_array)
        .and_then(|arr| {
            arr.iter()
                .map(|v| v.as_f64().map(|f| f as f32))
                .collect::<Option<Vec<f32>>>()
        })
        .map(Embedding::new)
        .filter(|e| {
            let ok = e.has_shape(dim);
            if !ok {
                tracing::debug!(dim = e.dim(), expected = dim, "dropping malformed face embedding");
            }
            ok
        });

    let landmarks = value.get("landmarks").and_then(Value::as_array).map(|pts| {
        pts.iter()
            .filter_map(|p| {
                let pair = p.as_array()?;
                Some((pair.first()?.as_f64()? as f32, pair.get(1)?.as_f64()? as f32))
            })
            .collect()
    });

    RawFace {
        bbox: face_box(value.get("box")),
        confidence: number(value.get("confidence")),
        embedding,
        landmarks,
    }
}

fn normalize_object(value: &Value) -> ObjectDetection {
    let bbox = value
        .get("box")
        .or_else(|| value.get("bbox"))
        .and_then(corners)
        .unwrap_or_default();
    ObjectDetection {
        class: value
            .get("class")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        score: number(value.get("score")),
        bbox,
    }
}
