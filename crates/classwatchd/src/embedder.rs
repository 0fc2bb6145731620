//! Enrollment-photo embedding through an external command.
//!
//! The command gets the photo as PNG on stdin and prints the embedding as
//! JSON on stdout: an array of numbers, an object with an `embedding`
//! array, or `null` when no face was found.

use classwatch_core::{Embedding, FaceEmbedder, Frame, PerceptionError};
use std::io::Cursor;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

pub struct CommandEmbedder {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandEmbedder {
    /// Build from a whitespace-separated command line. `None` when empty.
    pub fn from_command_line(line: &str, timeout: Duration) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
            timeout,
        })
    }

    async fn run(&self, png: Vec<u8>) -> Result<Vec<u8>, PerceptionError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PerceptionError::Unavailable(format!("{}: {e}", self.program)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&png)
                .await
                .map_err(|e| PerceptionError::Failed(format!("writing image: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| PerceptionError::Failed(e.to_string()))?;
        if !output.status.success() {
            return Err(PerceptionError::Failed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }
}

fn encode_png(image: &Frame) -> Result<Vec<u8>, PerceptionError> {
    let luma = image::GrayImage::from_raw(image.width, image.height, image.data.clone())
        .ok_or_else(|| PerceptionError::Failed("frame data does not match its size".into()))?;
    let mut png = Cursor::new(Vec::new());
    luma.write_to(&mut png, image::ImageFormat::Png)
        .map_err(|e| PerceptionError::Failed(format!("encoding image: {e}")))?;
    Ok(png.into_inner())
}

/// Parse the command's stdout.
fn parse_output(stdout: &[u8]) -> Result<Option<Embedding>, PerceptionError> {
    let value: serde_json::Value = serde_json::from_slice(stdout)
        .map_err(|e| PerceptionError::Failed(format!("embedder output is not JSON: {e}")))?;
    let array = match &value {
        serde_json::Value::Null => return Ok(None),
        serde_json::Value::Object(obj) => match obj.get("embedding") {
            None | Some(serde_json::Value::Null) => return Ok(None),
            Some(inner) => inner,
        },
        other => other,
    };
    let values: Vec<f32> = serde_json::from_value(array.clone())
        .map_err(|e| PerceptionError::Failed(format!("embedder output is not a vector: {e}")))?;
    Ok(Some(Embedding::new(values)))
}

impl FaceEmbedder for CommandEmbedder {
    async fn embed_single(&mut self, image: &Frame) -> Result<Option<Embedding>, PerceptionError> {
        let png = encode_png(image)?;
        let timeout_ms = self.timeout.as_millis() as u64;
        let stdout = tokio::time::timeout(self.timeout, self.run(png))
            .await
            .unwrap_or(Err(PerceptionError::TimedOut(timeout_ms)))?;
        parse_output(&stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster;
    use classwatch_core::build_gallery;
    use classwatch_core::gallery::resolve_seed;

    fn embedder(script: &str) -> CommandEmbedder {
        CommandEmbedder {
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
            timeout: Duration::from_secs(5),
        }
    }

    fn frame() -> Frame {
        Frame { sequence: 0, width: 2, height: 2, data: vec![0, 64, 128, 255] }
    }

    #[test]
    fn test_from_command_line() {
        let e = CommandEmbedder::from_command_line("face-embed --model m.onnx", Duration::ZERO)
            .unwrap();
        assert_eq!(e.program, "face-embed");
        assert_eq!(e.args, vec!["--model", "m.onnx"]);
        assert!(CommandEmbedder::from_command_line("   ", Duration::ZERO).is_none());
    }

    #[test]
    fn test_parse_output_layouts() {
        assert_eq!(parse_output(b"[0.5, 1]").unwrap(), Some(Embedding::new(vec![0.5, 1.0])));
        assert_eq!(
            parse_output(br#"{"embedding": [0.25]}"#).unwrap(),
            Some(Embedding::new(vec![0.25]))
        );
        assert_eq!(parse_output(b"null").unwrap(), None);
        assert_eq!(parse_output(br#"{"embedding": null}"#).unwrap(), None);
        assert!(parse_output(b"\"nope\"").is_err());
    }

    #[tokio::test]
    async fn test_command_receives_png() {
        // PNG signature starts with 0x89 'P' 'N' 'G'
        let mut e = embedder(r#"head -c 4 | tail -c 3 | grep -q PNG && echo "[1, 2]""#);
        let out = e.embed_single(&frame()).await.unwrap();
        assert_eq!(out, Some(Embedding::new(vec![1.0, 2.0])));
    }

    #[tokio::test]
    async fn test_command_failure_is_error() {
        let mut e = embedder("cat > /dev/null; echo broken >&2; exit 3");
        let err = e.embed_single(&frame()).await.unwrap_err();
        assert!(matches!(err, PerceptionError::Failed(_)));
    }

    #[tokio::test]
    async fn test_command_timeout() {
        let mut e = embedder("sleep 5");
        e.timeout = Duration::from_millis(100);
        let err = e.embed_single(&frame()).await.unwrap_err();
        assert!(matches!(err, PerceptionError::TimedOut(100)));
    }

    #[tokio::test]
    async fn test_students_dir_identity_reaches_gallery() {
        let dir = std::env::temp_dir().join(format!("classwatch-embed-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        image::GrayImage::from_pixel(4, 3, image::Luma([90u8]))
            .save(dir.join("aman-singh.png"))
            .unwrap();

        let seed = roster::scan_students_dir(&dir).unwrap();
        let mut e = embedder(r#"cat > /dev/null; echo "[0.5, 0.25]""#);
        let identities = resolve_seed(seed, &mut e, 2).await;
        let gallery = build_gallery(&identities, &[]);

        assert_eq!(gallery.len(), 1);
        assert_eq!(gallery.identities()[0].label, "Aman Singh");
        assert_eq!(gallery.identities()[0].embeddings, vec![Embedding::new(vec![0.5, 0.25])]);
        std::fs::remove_dir_all(dir).ok();
    }
}
