use crate::feed::FeedOpener;
use crate::monitor::{Monitor, MonitorError};
use crate::roster;
use crate::session::{self, SharedSession};
use classwatch_core::Registration;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use zbus::interface;

pub const BUS_NAME: &str = "org.freedesktop.ClassWatch1";
pub const OBJECT_PATH: &str = "/org/freedesktop/ClassWatch1";

/// D-Bus interface for the ClassWatch monitoring daemon.
///
/// Bus name: org.freedesktop.ClassWatch1
/// Object path: /org/freedesktop/ClassWatch1
pub struct ClassWatchService {
    pub session: SharedSession,
    pub monitor: Arc<Mutex<Monitor>>,
    pub feed: FeedOpener,
    pub embedding_dim: usize,
    /// Where accepted registrations are appended, if configured.
    pub registrations_path: Option<PathBuf>,
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

#[interface(name = "org.freedesktop.ClassWatch1")]
impl ClassWatchService {
    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let running = self.monitor.lock().await.is_running();
        let session = session::lock(&self.session);
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "running": running,
            "feed": self.feed.path,
            "identities": session.gallery().len(),
            "embeddings": session.gallery().embedding_count(),
            "alerts": session.alerts().len(),
            "last_sequence": session.latest().map(|r| r.sequence),
        })
        .to_string())
    }

    /// Recent alerts, newest first.
    async fn alerts(&self) -> zbus::fdo::Result<String> {
        let recent = session::lock(&self.session).alerts().recent();
        to_json(&recent)
    }

    /// The latest cycle report, or `null` when idle.
    async fn faces(&self) -> zbus::fdo::Result<String> {
        let session = session::lock(&self.session);
        to_json(&session.latest())
    }

    /// Gallery labels with their embedding counts, in gallery order.
    async fn identities(&self) -> zbus::fdo::Result<String> {
        let session = session::lock(&self.session);
        let list: Vec<_> = session
            .gallery()
            .identities()
            .iter()
            .map(|i| serde_json::json!({ "label": i.label, "embeddings": i.embeddings.len() }))
            .collect();
        to_json(&list)
    }

    /// Add a registration and rebuild the gallery. Returns the new number
    /// of identities.
    async fn register(&self, label: &str, embedding_json: &str) -> zbus::fdo::Result<u32> {
        let values: Vec<f32> = serde_json::from_str(embedding_json)
            .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("embedding: {e}")))?;
        let registration = Registration::new(label, values, self.embedding_dim)
            .map_err(|e| zbus::fdo::Error::InvalidArgs(e.to_string()))?;

        if let Some(path) = &self.registrations_path {
            roster::persist_registration(path, &registration)
                .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        }

        let count = session::lock(&self.session).register(registration);
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    /// Start monitoring. Returns false if already running.
    async fn start(&self) -> zbus::fdo::Result<bool> {
        let (source, backend) = self.feed.open();
        match self.monitor.lock().await.start(source, backend).await {
            Ok(()) => Ok(true),
            Err(MonitorError::AlreadyRunning) => Ok(false),
            Err(e) => Err(zbus::fdo::Error::Failed(e.to_string())),
        }
    }

    /// Stop monitoring. Returns false if already idle.
    async fn stop(&self) -> zbus::fdo::Result<bool> {
        let mut monitor = self.monitor.lock().await;
        let was_running = monitor.is_running();
        monitor.stop().await;
        Ok(was_running)
    }
}
