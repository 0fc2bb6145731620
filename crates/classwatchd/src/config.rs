use classwatch_core::alerts::{DEFAULT_COOLDOWN_MS, DEFAULT_HISTORY_CAPACITY};
use classwatch_core::matcher::DEFAULT_MATCH_THRESHOLD;
use classwatch_core::{Correlator, EuclideanMatcher, HeuristicsConfig};
use std::path::PathBuf;
use std::time::Duration;

/// Which D-Bus the service registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    Session,
    System,
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// JSON-lines perception feed (`-` reads stdin).
    pub feed_path: String,
    /// TOML seed roster of static identities.
    pub roster_path: Option<PathBuf>,
    /// Directory of enrollment photos named after the student.
    pub students_dir: Option<PathBuf>,
    /// JSON array of registrations captured by the enrollment flow.
    pub registrations_path: Option<PathBuf>,
    /// Command that turns an enrollment photo (PNG on stdin) into an
    /// embedding (JSON on stdout).
    pub embed_command: Option<String>,
    /// Upper bound on one embedding command run.
    pub embed_timeout: Duration,
    /// Euclidean distance threshold for a positive match.
    pub match_threshold: f32,
    /// Expected embedding length.
    pub embedding_dim: usize,
    /// Delay after each processed cycle.
    pub cycle_interval: Duration,
    /// Frame-ready tick of the feed source.
    pub frame_interval: Duration,
    /// Upper bound on a single perception call.
    pub perception_timeout: Duration,
    pub alert_cooldown_ms: i64,
    pub alert_history: usize,
    pub group_distance_px: f32,
    pub device_class: String,
    pub device_min_score: f32,
    pub bus: BusKind,
}

impl Config {
    /// Load configuration from `CLASSWATCH_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let heuristics = HeuristicsConfig::default();

        Self {
            feed_path: std::env::var("CLASSWATCH_FEED").unwrap_or_else(|_| "-".to_string()),
            roster_path: env_path("CLASSWATCH_ROSTER"),
            students_dir: env_path("CLASSWATCH_STUDENTS_DIR"),
            registrations_path: env_path("CLASSWATCH_REGISTRATIONS"),
            embed_command: std::env::var("CLASSWATCH_EMBED_CMD")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            embed_timeout: Duration::from_millis(env_parse("CLASSWATCH_EMBED_TIMEOUT_MS", 10_000)),
            match_threshold: env_parse("CLASSWATCH_MATCH_THRESHOLD", DEFAULT_MATCH_THRESHOLD),
            embedding_dim: env_parse("CLASSWATCH_EMBEDDING_DIM", 128),
            cycle_interval: Duration::from_millis(env_parse("CLASSWATCH_CYCLE_INTERVAL_MS", 500)),
            frame_interval: Duration::from_millis(env_parse("CLASSWATCH_FRAME_INTERVAL_MS", 33)),
            perception_timeout: Duration::from_millis(env_parse(
                "CLASSWATCH_PERCEPTION_TIMEOUT_MS",
                2_000,
            )),
            alert_cooldown_ms: env_parse("CLASSWATCH_ALERT_COOLDOWN_MS", DEFAULT_COOLDOWN_MS),
            alert_history: env_parse("CLASSWATCH_ALERT_HISTORY", DEFAULT_HISTORY_CAPACITY),
            group_distance_px: env_parse("CLASSWATCH_GROUP_DISTANCE_PX", heuristics.group_distance_px),
            device_class: std::env::var("CLASSWATCH_DEVICE_CLASS")
                .unwrap_or(heuristics.device_class),
            device_min_score: env_parse("CLASSWATCH_DEVICE_MIN_SCORE", heuristics.device_min_score),
            bus: match std::env::var("CLASSWATCH_BUS").as_deref() {
                Ok("system") => BusKind::System,
                _ => BusKind::Session,
            },
        }
    }

    /// Per-cycle pipeline configured from these settings.
    pub fn correlator(&self) -> Correlator {
        Correlator::new(
            EuclideanMatcher::new(self.match_threshold),
            HeuristicsConfig {
                group_distance_px: self.group_distance_px,
                device_class: self.device_class.clone(),
                device_min_score: self.device_min_score,
                ..HeuristicsConfig::default()
            },
        )
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
