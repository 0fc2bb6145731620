//! Alert deduplication, rate-limiting and bounded history.
//!
//! Heuristics raise a raw candidate every cycle a condition holds (roughly
//! every 500 ms). The store turns those into events: a candidate is admitted
//! only if no alert with the same `(kind, students)` key was emitted within
//! the cooldown window.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

pub const DEFAULT_COOLDOWN_MS: i64 = 5_000;
pub const DEFAULT_HISTORY_CAPACITY: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    UnauthorizedPresence,
    GroupDiscussion,
    DeviceUsage,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::UnauthorizedPresence => "unauthorized_presence",
            AlertKind::GroupDiscussion => "group_discussion",
            AlertKind::DeviceUsage => "device_usage",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
}

/// A raw per-cycle signal, before rate-limiting.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertCandidate {
    pub kind: AlertKind,
    pub message: String,
    pub severity: Severity,
    pub students: Vec<String>,
}

impl AlertCandidate {
    pub fn key(&self) -> AlertKey {
        AlertKey {
            kind: self.kind,
            students: self.students.clone(),
        }
    }
}

/// Deduplication key. Student order is significant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlertKey {
    pub kind: AlertKind,
    pub students: Vec<String>,
}

/// An admitted alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub message: String,
    pub severity: Severity,
    pub timestamp_ms: i64,
    pub students: Vec<String>,
}

impl Alert {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp_ms).single()
    }
}

/// Last-emission times per key.
#[derive(Debug, Clone)]
pub struct CooldownStore {
    window_ms: i64,
    last_emitted: HashMap<AlertKey, i64>,
}

impl CooldownStore {
    pub fn new(window_ms: i64) -> Self {
        Self {
            window_ms,
            last_emitted: HashMap::new(),
        }
    }

    /// Record an emission for `key` at `now_ms` unless one happened less
    /// than the window ago. Returns whether the emission is allowed.
    pub fn admit(&mut self, key: &AlertKey, now_ms: i64) -> bool {
        if let Some(&last) = self.last_emitted.get(key) {
            if now_ms - last < self.window_ms {
                return false;
            }
        }
        // Entries past the window can no longer reject anything.
        let window = self.window_ms;
        self.last_emitted.retain(|_, &mut last| now_ms - last < window);
        self.last_emitted.insert(key.clone(), now_ms);
        true
    }

    pub fn len(&self) -> usize {
        self.last_emitted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_emitted.is_empty()
    }
}

/// Cooldown gate plus newest-first alert history.
#[derive(Debug, Clone)]
pub struct AlertStore {
    cooldown: CooldownStore,
    history: VecDeque<Alert>,
    capacity: usize,
}

impl Default for AlertStore {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN_MS, DEFAULT_HISTORY_CAPACITY)
    }
}

impl AlertStore {
    pub fn new(cooldown_ms: i64, capacity: usize) -> Self {
        Self {
            cooldown: CooldownStore::new(cooldown_ms),
            history: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Admit a candidate at `now_ms`, returning the stamped alert, or `None`
    /// if its key is still cooling down.
    pub fn admit(&mut self, candidate: AlertCandidate, now_ms: i64) -> Option<Alert> {
        if !self.cooldown.admit(&candidate.key(), now_ms) {
            tracing::trace!(kind = candidate.kind.as_str(), "alert suppressed by cooldown");
            return None;
        }

        let alert = Alert {
            id: format!("alert-{}", uuid::Uuid::new_v4()),
            kind: candidate.kind,
            message: candidate.message,
            severity: candidate.severity,
            timestamp_ms: now_ms,
            students: candidate.students,
        };
        tracing::debug!(
            id = %alert.id,
            kind = alert.kind.as_str(),
            students = ?alert.students,
            "alert raised"
        );

        self.history.push_front(alert.clone());
        self.history.truncate(self.capacity);
        Some(alert)
    }

    /// Retained alerts, newest first.
    pub fn history(&self) -> impl Iterator<Item = &Alert> {
        self.history.iter()
    }

    pub fn recent(&self) -> Vec<Alert> {
        self.history.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(kind: AlertKind, students: &[&str]) -> AlertCandidate {
        AlertCandidate {
            kind,
            message: "msg".into(),
            severity: Severity::Medium,
            students: students.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_cooldown_window() {
        let mut store = AlertStore::default();
        let t0 = 1_700_000_000_000;
        let c = candidate(AlertKind::GroupDiscussion, &["A", "B"]);

        assert!(store.admit(c.clone(), t0).is_some());
        assert!(store.admit(c.clone(), t0 + 4_999).is_none());
        assert!(store.admit(c, t0 + 5_001).is_some());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_cooldown_exact_window_admits() {
        let mut cooldown = CooldownStore::new(5_000);
        let key = candidate(AlertKind::DeviceUsage, &["A"]).key();
        assert!(cooldown.admit(&key, 10_000));
        assert!(cooldown.admit(&key, 15_000));
    }

    #[test]
    fn test_cooldown_keys_are_independent() {
        let mut store = AlertStore::default();
        assert!(store.admit(candidate(AlertKind::DeviceUsage, &["A"]), 0).is_some());
        assert!(store.admit(candidate(AlertKind::DeviceUsage, &["B"]), 1).is_some());
        assert!(store.admit(candidate(AlertKind::GroupDiscussion, &["A"]), 2).is_some());
        assert!(store.admit(candidate(AlertKind::DeviceUsage, &["A"]), 3).is_none());
    }

    #[test]
    fn test_cooldown_key_is_order_sensitive() {
        let mut store = AlertStore::default();
        assert!(store.admit(candidate(AlertKind::GroupDiscussion, &["A", "B"]), 0).is_some());
        assert!(store.admit(candidate(AlertKind::GroupDiscussion, &["B", "A"]), 1).is_some());
    }

    #[test]
    fn test_cooldown_prunes_expired_keys() {
        let mut cooldown = CooldownStore::new(5_000);
        for i in 0..10 {
            let key = candidate(AlertKind::DeviceUsage, &[&format!("S{i}")]).key();
            assert!(cooldown.admit(&key, i));
        }
        assert_eq!(cooldown.len(), 10);
        let key = candidate(AlertKind::DeviceUsage, &["late"]).key();
        assert!(cooldown.admit(&key, 20_000));
        assert_eq!(cooldown.len(), 1);
    }

    #[test]
    fn test_history_capped_newest_first() {
        let mut store = AlertStore::default();
        for i in 0..21 {
            let c = candidate(AlertKind::DeviceUsage, &[&format!("S{i}")]);
            assert!(store.admit(c, i as i64).is_some());
        }
        let recent = store.recent();
        assert_eq!(recent.len(), DEFAULT_HISTORY_CAPACITY);
        assert_eq!(recent[0].students, vec!["S20".to_string()]);
        assert_eq!(recent[19].students, vec!["S1".to_string()]);
        assert!(recent.iter().all(|a| a.students[0] != "S0"));
    }

    #[test]
    fn test_alert_ids_unique_within_same_ms() {
        let mut store = AlertStore::default();
        let a = store.admit(candidate(AlertKind::DeviceUsage, &["A"]), 42).unwrap();
        let b = store.admit(candidate(AlertKind::DeviceUsage, &["B"]), 42).unwrap();
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("alert-"));
        assert_eq!(a.timestamp_ms, 42);
    }

    #[test]
    fn test_alert_serializes_snake_case() {
        let mut store = AlertStore::default();
        let a = store
            .admit(candidate(AlertKind::UnauthorizedPresence, &[]), 1_000)
            .unwrap();
        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json["type"], "unauthorized_presence");
        assert_eq!(json["severity"], "medium");
        assert_eq!(a.timestamp().map(|t| t.timestamp_millis()), Some(1_000));
    }

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_admission_is_quiet_at_info() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let mut store = AlertStore::default();
            assert!(store
                .admit(candidate(AlertKind::DeviceUsage, &["A"]), 0)
                .is_some());
        });

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(!output.contains("alert raised"), "unexpected info log: {output}");
    }
}
