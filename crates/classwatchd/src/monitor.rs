//! Detection loop scheduler.
//!
//! `idle -> running -> idle`. While running, each iteration waits for the
//! source's frame-ready signal, skips the cycle if no frame is available,
//! otherwise runs perception, correlation and alert admission, publishes the
//! report, then waits the inter-cycle delay. Only one cycle is ever in
//! flight. A stop requested during perception lets the call finish and
//! discards its result.

use crate::session::{self, SharedSession};
use classwatch_core::{
    Clock, Correlator, CycleInput, CycleReport, Detections, Frame, PerceptionBackend,
    PerceptionError, Resolution,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("frame source unavailable: {0}")]
    Unavailable(String),
    #[error("frame source permission denied: {0}")]
    PermissionDenied(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("monitor is already running")]
    AlreadyRunning,
    #[error("failed to acquire frame source: {0}")]
    Acquire(#[from] SourceError),
}

/// Where frames come from.
pub trait FrameSource: Send + 'static {
    /// Open the source. Failure is terminal for the session.
    fn acquire(&mut self) -> impl Future<Output = Result<Resolution, SourceError>> + Send;

    /// Resolve when the source may have a new frame.
    fn frame_ready(&mut self) -> impl Future<Output = ()> + Send;

    /// Take the current frame, or `None` if the source is not ready
    /// (paused, ended, not enough data buffered).
    fn poll_frame(&mut self) -> Option<Frame>;

    fn release(&mut self);
}

#[derive(Debug, Clone, Copy)]
pub struct MonitorSettings {
    /// Delay after each processed cycle.
    pub cycle_interval: Duration,
    /// Upper bound on a single perception call.
    pub perception_timeout: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_millis(500),
            perception_timeout: Duration::from_secs(2),
        }
    }
}

struct Running {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct Monitor {
    session: SharedSession,
    correlator: Arc<Correlator>,
    clock: Arc<dyn Clock>,
    settings: MonitorSettings,
    reports: broadcast::Sender<CycleReport>,
    running: Option<Running>,
}

impl Monitor {
    pub fn new(
        session: SharedSession,
        correlator: Correlator,
        clock: Arc<dyn Clock>,
        settings: MonitorSettings,
    ) -> Self {
        let (reports, _) = broadcast::channel(16);
        Self {
            session,
            correlator: Arc::new(correlator),
            clock,
            settings,
            reports,
            running: None,
        }
    }

    /// Receive every published cycle report.
    pub fn subscribe(&self) -> broadcast::Receiver<CycleReport> {
        self.reports.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.as_ref().is_some_and(|r| !r.task.is_finished())
    }

    /// Acquire `source` and spawn the detection loop.
    pub async fn start<S, P>(&mut self, mut source: S, backend: P) -> Result<(), MonitorError>
    where
        S: FrameSource,
        P: PerceptionBackend + 'static,
    {
        if self.is_running() {
            return Err(MonitorError::AlreadyRunning);
        }
        // A loop that ended by itself still needs its per-cycle state cleared.
        if self.running.is_some() {
            self.stop().await;
        }

        let resolution = source.acquire().await?;
        tracing::info!(
            width = resolution.width,
            height = resolution.height,
            "frame source acquired"
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let worker = Worker {
            source,
            backend,
            session: Arc::clone(&self.session),
            correlator: Arc::clone(&self.correlator),
            clock: Arc::clone(&self.clock),
            settings: self.settings,
            reports: self.reports.clone(),
            stop_rx,
        };
        let task = tokio::spawn(worker.run());
        self.running = Some(Running { stop_tx, task });
        tracing::info!("monitor started");
        Ok(())
    }

    /// Cancel the pending cycle, release the source and clear per-cycle
    /// state. Waits for an in-flight cycle to finish.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        let _ = running.stop_tx.send(true);
        if let Err(e) = running.task.await {
            tracing::error!(error = %e, "detection loop terminated abnormally");
        }
        session::lock(&self.session).clear_cycle_state();
        tracing::info!("monitor stopped");
    }
}

struct Worker<S, P> {
    source: S,
    backend: P,
    session: SharedSession,
    correlator: Arc<Correlator>,
    clock: Arc<dyn Clock>,
    settings: MonitorSettings,
    reports: broadcast::Sender<CycleReport>,
    stop_rx: watch::Receiver<bool>,
}

impl<S: FrameSource, P: PerceptionBackend> Worker<S, P> {
    async fn run(mut self) {
        tracing::debug!("detection loop running");
        loop {
            tokio::select! {
                biased;
                _ = self.stop_rx.changed() => break,
                _ = self.source.frame_ready() => {}
            }

            let Some(frame) = self.source.poll_frame() else {
                continue;
            };

            let input = self.perceive(&frame).await;
            if *self.stop_rx.borrow() {
                tracing::debug!(sequence = frame.sequence, "stop requested; discarding cycle");
                break;
            }

            let report = session::lock(&self.session).record_cycle(
                &self.correlator,
                input,
                self.clock.now_ms(),
            );
            // No subscribers is fine.
            let _ = self.reports.send(report);

            tokio::select! {
                biased;
                _ = self.stop_rx.changed() => break,
                _ = tokio::time::sleep(self.settings.cycle_interval) => {}
            }
        }
        self.source.release();
        tracing::debug!("detection loop exited");
    }

    /// Run both detectors in sequence. Failures and timeouts degrade to an
    /// empty result for this cycle.
    async fn perceive(&mut self, frame: &Frame) -> CycleInput {
        let native = frame.resolution();
        let timeout = self.settings.perception_timeout;
        let timeout_ms = timeout.as_millis() as u64;

        let faces = tokio::time::timeout(timeout, self.backend.detect_faces(frame))
            .await
            .unwrap_or(Err(PerceptionError::TimedOut(timeout_ms)))
            .unwrap_or_else(|e| {
                tracing::warn!(sequence = frame.sequence, error = %e, "face detection failed");
                Detections::empty(native)
            });

        let objects = tokio::time::timeout(timeout, self.backend.detect_objects(frame))
            .await
            .unwrap_or(Err(PerceptionError::TimedOut(timeout_ms)))
            .unwrap_or_else(|e| {
                tracing::warn!(sequence = frame.sequence, error = %e, "object detection failed");
                Detections::empty(native)
            });

        CycleInput {
            sequence: frame.sequence,
            resolution: native,
            faces,
            objects,
        }
    }
}
