//! One detection cycle: rescale, match, derive signals, rate-limit.

use crate::alerts::{Alert, AlertCandidate, AlertKind, AlertStore, Severity};
use crate::gallery::Gallery;
use crate::heuristics::{self, DeviceUsage, HeuristicsConfig};
use crate::matcher::EuclideanMatcher;
use crate::perception::RawFace;
use crate::render::{self, DrawCommand};
use crate::types::{DetectedFace, Detections, MatchedFace, ObjectDetection, Resolution};
use serde::Serialize;

/// Raw perception output for one frame.
#[derive(Debug, Clone)]
pub struct CycleInput {
    pub sequence: u64,
    /// Native frame resolution; all published boxes use this space.
    pub resolution: Resolution,
    pub faces: Detections<RawFace>,
    pub objects: Detections<ObjectDetection>,
}

/// Everything one cycle publishes.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub sequence: u64,
    pub resolution: Resolution,
    pub faces: Vec<MatchedFace>,
    pub objects: Vec<ObjectDetection>,
    pub device: DeviceUsage,
    pub draw: Vec<DrawCommand>,
    /// Alerts admitted during this cycle.
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Clone, Default)]
pub struct Correlator {
    pub matcher: EuclideanMatcher,
    pub heuristics: HeuristicsConfig,
}

impl Correlator {
    pub fn new(matcher: EuclideanMatcher, heuristics: HeuristicsConfig) -> Self {
        Self { matcher, heuristics }
    }

    /// Label every face, numbering them in detector order.
    pub fn label_faces(&self, raw: Vec<RawFace>, gallery: &Gallery) -> Vec<MatchedFace> {
        raw.into_iter()
            .enumerate()
            .map(|(i, f)| {
                let face = DetectedFace {
                    id: format!("face-{i}"),
                    bbox: f.bbox,
                    confidence: f.confidence,
                    embedding: f.embedding,
                    landmarks: f.landmarks,
                };
                self.matcher.label_face(face, gallery)
            })
            .collect()
    }

    /// Raw signals for the cycle, in the order unauthorized presence,
    /// group discussion, device usage.
    pub fn raw_signals(
        &self,
        faces: &[MatchedFace],
        objects: &[ObjectDetection],
        gallery: &Gallery,
    ) -> (Vec<AlertCandidate>, DeviceUsage) {
        let mut candidates = Vec::new();

        let unknown = faces.iter().filter(|f| !f.is_registered()).count();
        if !gallery.is_empty() && unknown > 0 {
            candidates.push(AlertCandidate {
                kind: AlertKind::UnauthorizedPresence,
                message: format!("Unauthorized presence: {unknown} unregistered face(s) in view"),
                severity: Severity::High,
                students: Vec::new(),
            });
        }

        for pair in heuristics::detect_group_discussions(faces, self.heuristics.group_distance_px) {
            candidates.push(AlertCandidate {
                kind: AlertKind::GroupDiscussion,
                message: format!("Group discussion: {} & {} talking", pair.first, pair.second),
                severity: Severity::Medium,
                students: vec![pair.first, pair.second],
            });
        }

        let device = heuristics::attribute_device(objects, faces, &self.heuristics);
        if let Some(user) = device.user.as_ref().filter(|_| device.detected) {
            candidates.push(AlertCandidate {
                kind: AlertKind::DeviceUsage,
                message: format!("Device usage: {user} using {}", self.heuristics.device_class),
                severity: Severity::High,
                students: vec![user.clone()],
            });
        }

        (candidates, device)
    }

    /// Run the full per-frame pipeline against the session's gallery and
    /// alert store.
    pub fn run_cycle(
        &self,
        input: CycleInput,
        gallery: &Gallery,
        alerts: &mut AlertStore,
        now_ms: i64,
    ) -> CycleReport {
        let native = input.resolution;
        let raw_faces: Vec<RawFace> = input
            .faces
            .items
            .into_iter()
            .map(|f| f.rescale(input.faces.space, native))
            .collect();
        let objects: Vec<ObjectDetection> = input
            .objects
            .items
            .iter()
            .map(|o| o.rescale(input.objects.space, native))
            .collect();

        let faces = self.label_faces(raw_faces, gallery);
        let (candidates, device) = self.raw_signals(&faces, &objects, gallery);
        let admitted: Vec<Alert> = candidates
            .into_iter()
            .filter_map(|c| alerts.admit(c, now_ms))
            .collect();

        tracing::debug!(
            sequence = input.sequence,
            faces = faces.len(),
            registered = faces.iter().filter(|f| f.is_registered()).count(),
            objects = objects.len(),
            device = device.detected,
            alerts = admitted.len(),
            "cycle processed"
        );

        CycleReport {
            sequence: input.sequence,
            resolution: native,
            draw: render::draw_commands(&faces, gallery.is_empty()),
            faces,
            objects,
            device,
            alerts: admitted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gallery::{build_gallery, Identity};
    use crate::types::{BoundingBox, Embedding};

    fn mohit_gallery() -> (Gallery, Vec<f32>) {
        let e = vec![0.0f32; 128];
        let gallery = build_gallery(
            &[Identity {
                label: "Mohit Singh".into(),
                embeddings: vec![Embedding::new(e.clone())],
            }],
            &[],
        );
        (gallery, e)
    }

    fn raw(bbox: BoundingBox, embedding: Option<Vec<f32>>) -> RawFace {
        RawFace {
            bbox,
            confidence: 0.9,
            embedding: embedding.map(Embedding::new),
            landmarks: None,
        }
    }

    fn input(faces: Vec<RawFace>, objects: Vec<ObjectDetection>) -> CycleInput {
        let res = Resolution::new(720, 560);
        CycleInput {
            sequence: 1,
            resolution: res,
            faces: Detections { space: res, items: faces },
            objects: Detections { space: res, items: objects },
        }
    }

    #[test]
    fn test_end_to_end_single_match() {
        let (gallery, mut e) = mohit_gallery();
        // distance 0.2 from the enrolled embedding
        e[0] = 0.2;
        let mut alerts = AlertStore::default();
        let report = Correlator::default().run_cycle(
            input(vec![raw(BoundingBox::new(10.0, 10.0, 50.0, 50.0), Some(e))], vec![]),
            &gallery,
            &mut alerts,
            1_000,
        );

        assert_eq!(report.faces.len(), 1);
        let face = &report.faces[0];
        assert_eq!(face.label, "Mohit Singh");
        assert_eq!(face.confidence_percent, 80);
        assert_eq!(face.face.id, "face-0");
        assert!(report.alerts.is_empty());
        assert_eq!(report.draw[0].label, "Mohit Singh (80%)");
    }

    #[test]
    fn test_unknown_face_raises_unauthorized_presence_once() {
        let (gallery, _) = mohit_gallery();
        let stranger = vec![5.0f32; 128];
        let mut alerts = AlertStore::default();
        let correlator = Correlator::default();

        let first = correlator.run_cycle(
            input(vec![raw(BoundingBox::default(), Some(stranger.clone()))], vec![]),
            &gallery,
            &mut alerts,
            0,
        );
        assert_eq!(first.alerts.len(), 1);
        assert_eq!(first.alerts[0].kind, AlertKind::UnauthorizedPresence);

        let second = correlator.run_cycle(
            input(vec![raw(BoundingBox::default(), Some(stranger))], vec![]),
            &gallery,
            &mut alerts,
            500,
        );
        assert!(second.alerts.is_empty());
        assert_eq!(alerts.len(), 1);
    }

    #[test]
    fn test_empty_gallery_raises_nothing() {
        let mut alerts = AlertStore::default();
        let report = Correlator::default().run_cycle(
            input(vec![raw(BoundingBox::default(), Some(vec![0.0; 128]))], vec![]),
            &Gallery::new(),
            &mut alerts,
            0,
        );
        assert!(report.alerts.is_empty());
        assert_eq!(report.draw[0].label, "Detecting...");
    }

    #[test]
    fn test_group_and_device_alerts() {
        let gallery = build_gallery(
            &[
                Identity { label: "A".into(), embeddings: vec![Embedding::new(vec![0.0; 128])] },
                Identity { label: "B".into(), embeddings: vec![Embedding::new(vec![1.0; 128])] },
            ],
            &[],
        );
        let faces = vec![
            raw(BoundingBox::new(100.0, 100.0, 50.0, 50.0), Some(vec![0.0; 128])),
            raw(BoundingBox::new(300.0, 100.0, 50.0, 50.0), Some(vec![1.0; 128])),
        ];
        let objects = vec![ObjectDetection {
            class: "cell phone".into(),
            score: 0.9,
            bbox: [300.0, 100.0, 350.0, 150.0],
        }];
        let mut alerts = AlertStore::default();
        let report = Correlator::default().run_cycle(input(faces, objects), &gallery, &mut alerts, 0);

        let kinds: Vec<_> = report.alerts.iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![AlertKind::GroupDiscussion, AlertKind::DeviceUsage]);
        assert_eq!(report.alerts[0].students, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(report.alerts[1].students, vec!["B".to_string()]);
        assert_eq!(report.device, DeviceUsage { detected: true, user: Some("B".into()) });
    }

    #[test]
    fn test_boxes_rescaled_to_native() {
        let (gallery, e) = mohit_gallery();
        let mut cycle = input(vec![raw(BoundingBox::new(10.0, 10.0, 20.0, 20.0), Some(e))], vec![]);
        cycle.faces.space = Resolution::new(180, 140);
        let mut alerts = AlertStore::default();
        let report = Correlator::default().run_cycle(cycle, &gallery, &mut alerts, 0);
        assert_eq!(report.faces[0].face.bbox, BoundingBox::new(40.0, 40.0, 80.0, 80.0));
    }
}
