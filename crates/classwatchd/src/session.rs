//! State owned by one monitoring session: gallery inputs, the built gallery,
//! the alert store and the latest cycle report.
//!
//! Writers are the detection loop and the D-Bus `Register` handler; both
//! go through the same mutex.

use classwatch_core::{
    build_gallery, AlertStore, Correlator, CycleInput, CycleReport, Gallery, Identity,
    Registration,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub type SharedSession = Arc<Mutex<Session>>;

/// Lock the session, recovering the guard if a previous holder panicked.
pub fn lock(session: &Mutex<Session>) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Session {
    seed: Vec<Identity>,
    registrations: Vec<Registration>,
    gallery: Gallery,
    alerts: AlertStore,
    latest: Option<CycleReport>,
}

impl Session {
    pub fn new(seed: Vec<Identity>, registrations: Vec<Registration>, alerts: AlertStore) -> Self {
        let gallery = build_gallery(&seed, &registrations);
        Self {
            seed,
            registrations,
            gallery,
            alerts,
            latest: None,
        }
    }

    pub fn shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    pub fn alerts(&self) -> &AlertStore {
        &self.alerts
    }

    pub fn latest(&self) -> Option<&CycleReport> {
        self.latest.as_ref()
    }

    /// Append a registration and rebuild the gallery. Returns the new
    /// number of identities.
    pub fn register(&mut self, registration: Registration) -> usize {
        tracing::info!(label = %registration.label, "registration added");
        self.registrations.push(registration);
        self.gallery = build_gallery(&self.seed, &self.registrations);
        self.gallery.len()
    }

    /// Run one cycle through the correlator and keep its report.
    pub fn record_cycle(
        &mut self,
        correlator: &Correlator,
        input: CycleInput,
        now_ms: i64,
    ) -> CycleReport {
        let report = correlator.run_cycle(input, &self.gallery, &mut self.alerts, now_ms);
        self.latest = Some(report.clone());
        report
    }

    /// Drop per-cycle state. Gallery and alert history survive.
    pub fn clear_cycle_state(&mut self) {
        self.latest = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use classwatch_core::{Detections, Embedding, RawFace, Resolution};

    fn input(embedding: Vec<f32>) -> CycleInput {
        let res = Resolution::new(640, 480);
        CycleInput {
            sequence: 7,
            resolution: res,
            faces: Detections {
                space: res,
                items: vec![RawFace {
                    embedding: Some(Embedding::new(embedding)),
                    ..RawFace::default()
                }],
            },
            objects: Detections::empty(res),
        }
    }

    #[test]
    fn test_register_rebuilds_gallery() {
        let seed = vec![Identity {
            label: "Seed".into(),
            embeddings: vec![Embedding::new(vec![0.0, 0.0])],
        }];
        let mut session = Session::new(seed, vec![], AlertStore::default());
        assert_eq!(session.gallery().len(), 1);

        let reg = Registration::new("New", vec![1.0, 1.0], 2).unwrap();
        assert_eq!(session.register(reg), 2);
        assert_eq!(session.gallery().identities()[1].label, "New");
    }

    #[test]
    fn test_clear_keeps_gallery_and_alerts() {
        let seed = vec![Identity {
            label: "Seed".into(),
            embeddings: vec![Embedding::new(vec![0.0, 0.0])],
        }];
        let mut session = Session::new(seed, vec![], AlertStore::default());
        let report = session.record_cycle(&Correlator::default(), input(vec![9.0, 9.0]), 0);
        assert_eq!(report.sequence, 7);
        assert!(session.latest().is_some());
        assert_eq!(session.alerts().len(), 1);

        session.clear_cycle_state();
        assert!(session.latest().is_none());
        assert_eq!(session.alerts().len(), 1);
        assert_eq!(session.gallery().len(), 1);
    }
}
