//! JSON-lines perception feed.
//!
//! An external perception process writes one JSON payload per frame
//! (faces with embeddings, object detections, frame size). The feed plays
//! both roles the monitor needs: [`FeedSource`] is the frame source and
//! [`FeedBackend`] hands the served line's detections to the pipeline.
//!
//! A reader task consumes lines as fast as they arrive and keeps only the
//! newest parsed payload. At each frame-ready tick the source is ready if a
//! payload newer than the last served one exists; older unserved lines are
//! dropped.

use crate::monitor::{FrameSource, SourceError};
use classwatch_core::ingress::{self, FramePayload};
use classwatch_core::{
    Detections, Embedding, FaceEmbedder, Frame, ObjectDetection, PerceptionBackend,
    PerceptionError, RawFace, Resolution,
};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};

/// Assumed frame size until a payload reports one.
const DEFAULT_RESOLUTION: Resolution = Resolution {
    width: 640,
    height: 480,
};

type FeedReader = Box<dyn AsyncRead + Unpin + Send>;
type Slot = Arc<Mutex<Option<(u64, FramePayload)>>>;

/// What the reader task has seen so far.
#[derive(Debug, Default)]
struct FeedState {
    /// Number of payloads parsed; the newest one is `latest`.
    parsed: u64,
    latest: Option<FramePayload>,
    ended: bool,
}

/// Creates matched source/backend pairs for a feed location.
#[derive(Debug, Clone)]
pub struct FeedOpener {
    /// File path, or `-` for stdin.
    pub path: String,
    pub frame_interval: Duration,
    pub embedding_dim: usize,
}

impl FeedOpener {
    pub fn open(&self) -> (FeedSource, FeedBackend) {
        let slot: Slot = Arc::new(Mutex::new(None));
        let source = FeedSource {
            path: self.path.clone(),
            frame_interval: self.frame_interval,
            embedding_dim: self.embedding_dim,
            state: None,
            reader: None,
            ticker: None,
            served: 0,
            resolution: DEFAULT_RESOLUTION,
            sequence: 0,
            slot: Arc::clone(&slot),
        };
        (source, FeedBackend { slot })
    }
}

pub struct FeedSource {
    path: String,
    frame_interval: Duration,
    embedding_dim: usize,
    state: Option<watch::Receiver<FeedState>>,
    reader: Option<JoinHandle<()>>,
    ticker: Option<Interval>,
    /// `FeedState::parsed` at the last served frame.
    served: u64,
    resolution: Resolution,
    sequence: u64,
    slot: Slot,
}

async fn read_feed(reader: FeedReader, path: String, dim: usize, state: watch::Sender<FeedState>) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => match ingress::parse_payload(&line, dim) {
                Ok(payload) => state.send_modify(|s| {
                    s.parsed += 1;
                    s.latest = Some(payload);
                }),
                Err(e) => tracing::warn!(error = %e, "skipping malformed feed line"),
            },
            Ok(None) => {
                tracing::info!(path = %path, "feed ended");
                break;
            }
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "feed read failed; treating as ended");
                break;
            }
        }
    }
    state.send_modify(|s| s.ended = true);
}

impl FeedSource {
    /// Start the reader task over `reader` and reset the frame-ready tick.
    fn attach(&mut self, reader: FeedReader) {
        let mut ticker = tokio::time::interval(self.frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let (tx, rx) = watch::channel(FeedState::default());
        self.reader = Some(tokio::spawn(read_feed(
            reader,
            self.path.clone(),
            self.embedding_dim,
            tx,
        )));
        self.state = Some(rx);
        self.ticker = Some(ticker);
        self.served = 0;
    }
}

impl FrameSource for FeedSource {
    async fn acquire(&mut self) -> Result<Resolution, SourceError> {
        let reader: FeedReader = if self.path == "-" {
            Box::new(tokio::io::stdin())
        } else {
            let file = tokio::fs::File::open(&self.path).await.map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => SourceError::Unavailable(self.path.clone()),
                std::io::ErrorKind::PermissionDenied => {
                    SourceError::PermissionDenied(self.path.clone())
                }
                _ => SourceError::Io(e),
            })?;
            Box::new(file)
        };

        self.attach(reader);
        Ok(self.resolution)
    }

    async fn frame_ready(&mut self) {
        let exhausted = self
            .state
            .as_ref()
            .is_some_and(|rx| {
                let state = rx.borrow();
                state.ended && state.parsed <= self.served
            });
        if exhausted {
            // Nothing more will arrive; wait for the monitor to stop us.
            std::future::pending::<()>().await;
        }
        match self.ticker.as_mut() {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }

    fn poll_frame(&mut self) -> Option<Frame> {
        let state = self.state.as_ref()?.borrow();
        if state.parsed <= self.served {
            return None;
        }
        let payload = state.latest.clone()?;
        let skipped = state.parsed - self.served - 1;
        self.served = state.parsed;
        drop(state);

        if skipped > 0 {
            tracing::debug!(skipped, "dropped stale feed lines");
        }
        if let Some(res) = payload.resolution {
            self.resolution = res;
        }
        self.sequence += 1;
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some((self.sequence, payload));

        Some(Frame {
            sequence: self.sequence,
            width: self.resolution.width,
            height: self.resolution.height,
            data: Vec::new(),
        })
    }

    fn release(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.state = None;
        self.ticker = None;
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        tracing::info!(path = %self.path, frames = self.sequence, "feed released");
    }
}

/// Serves the detections carried by the current feed line.
pub struct FeedBackend {
    slot: Slot,
}

impl FeedBackend {
    fn missing(frame: &Frame) -> PerceptionError {
        PerceptionError::Unavailable(format!("no feed record for frame {}", frame.sequence))
    }
}

impl PerceptionBackend for FeedBackend {
    async fn detect_faces(&mut self, frame: &Frame) -> Result<Detections<RawFace>, PerceptionError> {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some((seq, payload)) if *seq == frame.sequence => Ok(Detections {
                space: payload
                    .face_space
                    .or(payload.resolution)
                    .unwrap_or(frame.resolution()),
                items: payload.faces.clone(),
            }),
            _ => Err(Self::missing(frame)),
        }
    }

    async fn detect_objects(
        &mut self,
        frame: &Frame,
    ) -> Result<Detections<ObjectDetection>, PerceptionError> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.take() {
            Some((seq, payload)) if seq == frame.sequence => Ok(Detections {
                space: payload
                    .object_space
                    .or(payload.resolution)
                    .unwrap_or(frame.resolution()),
                items: payload.objects,
            }),
            other => {
                *slot = other;
                Err(Self::missing(frame))
            }
        }
    }
}

impl FaceEmbedder for FeedBackend {
    async fn embed_single(&mut self, _image: &Frame) -> Result<Option<Embedding>, PerceptionError> {
        Err(PerceptionError::Unavailable(
            "feed backend cannot embed still images".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn write_feed(lines: &[String]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("classwatch-feed-{}.jsonl", uuid::Uuid::new_v4()));
        std::fs::write(&path, lines.join("\n")).unwrap();
        path
    }

    fn opener(path: &str) -> FeedOpener {
        FeedOpener {
            path: path.to_string(),
            frame_interval: Duration::from_millis(1),
            embedding_dim: 2,
        }
    }

    fn sized_line(width: u32) -> String {
        format!(r#"{{"width": {width}, "height": 100, "faces": []}}"#)
    }

    async fn wait_parsed(source: &FeedSource, count: u64) {
        let mut rx = source.state.clone().unwrap();
        rx.wait_for(|s| s.parsed >= count).await.unwrap();
    }

    #[tokio::test]
    async fn test_feed_frames_and_detections() {
        let path = write_feed(&[
            r#"{"width": 720, "height": 560, "face_space": {"width": 180, "height": 140}, "faces": [{"box": [1, 1, 11, 11], "embedding": [0.1, 0.2]}], "objects": [{"class": "cell phone", "score": 0.9, "box": [0, 0, 10, 10]}]}"#.to_string(),
        ]);
        let (mut source, mut backend) = opener(path.to_str().unwrap()).open();
        assert_eq!(source.acquire().await.unwrap(), DEFAULT_RESOLUTION);
        wait_parsed(&source, 1).await;

        source.frame_ready().await;
        let frame = source.poll_frame().expect("line is a frame");
        assert_eq!((frame.sequence, frame.width, frame.height), (1, 720, 560));

        let faces = backend.detect_faces(&frame).await.unwrap();
        assert_eq!(faces.space, Resolution::new(180, 140));
        assert_eq!(faces.items.len(), 1);
        let objects = backend.detect_objects(&frame).await.unwrap();
        assert_eq!(objects.space, Resolution::new(720, 560));
        assert_eq!(objects.items[0].class, "cell phone");

        // Served once only
        assert!(source.poll_frame().is_none());
        source.release();
        std::fs::remove_file(path).ok();
    }

    #[tokio::test]
    async fn test_cycle_gets_newest_buffered_line() {
        let lines: Vec<String> = (101..=110).map(sized_line).collect();
        let path = write_feed(&lines);
        let (mut source, _backend) = opener(path.to_str().unwrap()).open();
        source.acquire().await.unwrap();
        let mut rx = source.state.clone().unwrap();
        rx.wait_for(|s| s.ended).await.unwrap();

        source.frame_ready().await;
        let frame = source.poll_frame().expect("newest line");
        assert_eq!((frame.sequence, frame.width), (1, 110));
        assert!(source.poll_frame().is_none());

        source.release();
        std::fs::remove_file(path).ok();
    }

    #[tokio::test]
    async fn test_live_feed_keeps_up_with_producer() {
        let (mut source, _backend) = opener("live").open();
        let (mut writer, reader) = tokio::io::duplex(4096);
        source.attach(Box::new(reader));

        writer.write_all(format!("{}\n", sized_line(1)).as_bytes()).await.unwrap();
        wait_parsed(&source, 1).await;
        assert_eq!(source.poll_frame().unwrap().width, 1);
        assert!(source.poll_frame().is_none());

        for width in 2..=4 {
            writer.write_all(format!("{}\n", sized_line(width)).as_bytes()).await.unwrap();
        }
        wait_parsed(&source, 4).await;
        let frame = source.poll_frame().unwrap();
        assert_eq!((frame.sequence, frame.width), (2, 4));
        source.release();
    }

    #[tokio::test]
    async fn test_blank_and_malformed_lines_are_skipped() {
        let path = write_feed(&[sized_line(200), String::new(), "not json".to_string()]);
        let (mut source, _backend) = opener(path.to_str().unwrap()).open();
        source.acquire().await.unwrap();
        let mut rx = source.state.clone().unwrap();
        rx.wait_for(|s| s.ended).await.unwrap();
        assert_eq!(rx.borrow().parsed, 1);

        source.frame_ready().await;
        assert_eq!(source.poll_frame().unwrap().width, 200);
        assert!(source.poll_frame().is_none());

        // Ended and fully served: never ready again
        let waited =
            tokio::time::timeout(Duration::from_millis(50), source.frame_ready()).await;
        assert!(waited.is_err());
        source.release();
        std::fs::remove_file(path).ok();
    }

    #[tokio::test]
    async fn test_backend_rejects_stale_frame() {
        let path = write_feed(&[r#"{"faces": []}"#.to_string()]);
        let (mut source, mut backend) = opener(path.to_str().unwrap()).open();
        source.acquire().await.unwrap();
        wait_parsed(&source, 1).await;
        let frame = source.poll_frame().unwrap();

        let stale = Frame { sequence: 99, ..frame.clone() };
        assert!(backend.detect_faces(&stale).await.is_err());
        assert!(backend.detect_objects(&stale).await.is_err());
        // The real frame is still served after the stale request
        assert!(backend.detect_objects(&frame).await.is_ok());
        source.release();
        std::fs::remove_file(path).ok();
    }

    #[tokio::test]
    async fn test_missing_feed_is_unavailable() {
        let (mut source, _) = opener("/nonexistent/classwatch/feed.jsonl").open();
        let err = source.acquire().await.unwrap_err();
        assert!(matches!(err, SourceError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_feed_cannot_embed_images() {
        let (_, mut backend) = opener("-").open();
        let frame = Frame { sequence: 0, width: 1, height: 1, data: vec![0] };
        assert!(backend.embed_single(&frame).await.is_err());
    }
}
