//! classwatch-core: Detection correlation and behavioral alerting.
//!
//! Matches per-frame face embeddings against a labeled gallery, derives
//! proximity signals (group discussion, device usage) from the matched set,
//! and rate-limits the resulting alerts. Perception models are external and
//! plug in through the traits in [`perception`].

pub mod alerts;
pub mod clock;
pub mod correlator;
pub mod gallery;
pub mod heuristics;
pub mod ingress;
pub mod matcher;
pub mod perception;
pub mod render;
pub mod types;

pub use alerts::{Alert, AlertCandidate, AlertKind, AlertStore, CooldownStore, Severity};
pub use clock::{Clock, ManualClock, SystemClock};
pub use correlator::{Correlator, CycleInput, CycleReport};
pub use gallery::{build_gallery, Gallery, Identity, Registration, SeedIdentity, SeedSource};
pub use heuristics::{DeviceUsage, HeuristicsConfig};
pub use matcher::{EuclideanMatcher, MatchResult, Matcher};
pub use perception::{FaceEmbedder, PerceptionBackend, PerceptionError, RawFace};
pub use types::{
    BoundingBox, DetectedFace, Detections, Embedding, Frame, MatchedFace, ObjectDetection,
    Resolution, UNKNOWN_LABEL,
};
