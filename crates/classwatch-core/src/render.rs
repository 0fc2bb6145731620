//! Drawing instructions for whatever surface paints the overlay.

use crate::types::{BoundingBox, MatchedFace};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    /// Matched against the gallery.
    Registered,
    /// Gallery loaded but no match.
    Unknown,
    /// No gallery to match against yet.
    Pending,
}

impl Color {
    pub fn hex(&self) -> &'static str {
        match self {
            Color::Registered => "#22c55e",
            Color::Unknown => "#ef4444",
            Color::Pending => "#3b82f6",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawCommand {
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    pub label: String,
    pub color: Color,
}

pub fn draw_commands(faces: &[MatchedFace], gallery_empty: bool) -> Vec<DrawCommand> {
    faces
        .iter()
        .map(|f| {
            let (label, color) = if gallery_empty {
                ("Detecting...".to_string(), Color::Pending)
            } else if f.is_registered() {
                (format!("{} ({}%)", f.label, f.display_confidence()), Color::Registered)
            } else {
                ("Unknown".to_string(), Color::Unknown)
            };
            DrawCommand {
                bbox: f.face.bbox,
                label,
                color,
            }
        })
        .collect()
}
