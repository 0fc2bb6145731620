//! Loading gallery inputs from disk: the TOML seed roster, a directory of
//! enrollment photos, and the stored registrations file.

use classwatch_core::gallery::parse_registrations;
use classwatch_core::{Frame, Registration, SeedIdentity, SeedSource};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid roster {path}: {source}")]
    Toml {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid registrations file {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("cannot decode image {path}: {source}")]
    Image {
        path: PathBuf,
        source: image::ImageError,
    },
}

#[derive(Debug, Deserialize)]
struct RosterFile {
    #[serde(default)]
    identity: Vec<RosterEntry>,
}

#[derive(Debug, Deserialize)]
struct RosterEntry {
    label: String,
    #[serde(default)]
    images: Vec<PathBuf>,
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

/// Parse a roster document. Relative image paths resolve against `base`.
/// Images that fail to decode are skipped with a warning.
pub fn parse_roster(text: &str, base: &Path, origin: &Path) -> Result<Vec<SeedIdentity>, RosterError> {
    let file: RosterFile = toml::from_str(text).map_err(|source| RosterError::Toml {
        path: origin.to_path_buf(),
        source,
    })?;

    let mut seed = Vec::with_capacity(file.identity.len());
    for entry in file.identity {
        let label = entry.label.trim().to_string();
        if label.is_empty() {
            tracing::warn!(roster = %origin.display(), "skipping roster entry without a label");
            continue;
        }

        let mut sources: Vec<SeedSource> =
            entry.embeddings.into_iter().map(SeedSource::Embedding).collect();
        for image in entry.images {
            let path = if image.is_absolute() { image } else { base.join(image) };
            match load_image(&path) {
                Ok(frame) => sources.push(SeedSource::Image(frame)),
                Err(e) => tracing::warn!(label = %label, error = %e, "skipping roster image"),
            }
        }
        seed.push(SeedIdentity { label, sources });
    }
    Ok(seed)
}

pub fn load_roster(path: &Path) -> Result<Vec<SeedIdentity>, RosterError> {
    let text = std::fs::read_to_string(path).map_err(|source| RosterError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let base = path.parent().unwrap_or(Path::new("."));
    parse_roster(&text, base, path)
}

/// Display name for an enrollment photo: `aman-singh.jpg` -> `Aman Singh`.
pub fn label_from_filename(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let words: Vec<String> = stem
        .split(['-', '_', ' '])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect();
    if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    }
}

/// One seed identity per image file in `dir`, sorted by file name.
pub fn scan_students_dir(dir: &Path) -> Result<Vec<SeedIdentity>, RosterError> {
    let io_err = |source| RosterError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
        if path.is_file() && is_image {
            paths.push(path);
        }
    }
    paths.sort();

    let mut seed = Vec::with_capacity(paths.len());
    for path in paths {
        let Some(label) = label_from_filename(&path) else {
            continue;
        };
        match load_image(&path) {
            Ok(frame) => seed.push(SeedIdentity {
                label,
                sources: vec![SeedSource::Image(frame)],
            }),
            Err(e) => tracing::warn!(error = %e, "skipping student photo"),
        }
    }
    tracing::info!(dir = %dir.display(), count = seed.len(), "scanned students directory");
    Ok(seed)
}

/// Decode an image file into a grayscale frame.
pub fn load_image(path: &Path) -> Result<Frame, RosterError> {
    let luma = image::open(path)
        .map_err(|source| RosterError::Image {
            path: path.to_path_buf(),
            source,
        })?
        .to_luma8();
    let (width, height) = luma.dimensions();
    Ok(Frame {
        sequence: 0,
        width,
        height,
        data: luma.into_raw(),
    })
}

/// Load stored registrations. A missing file means none yet.
pub fn load_registrations(path: &Path, dim: usize) -> Result<Vec<Registration>, RosterError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "no registrations file yet");
            return Ok(Vec::new());
        }
        Err(source) => {
            return Err(RosterError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let value: serde_json::Value = serde_json::from_str(&text).map_err(|source| RosterError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_registrations(&value, dim))
}

/// Append a registration to the stored file, keeping its array layout.
pub fn persist_registration(path: &Path, registration: &Registration) -> Result<(), RosterError> {
    let mut records: Vec<serde_json::Value> = match std::fs::read_to_string(path) {
        Ok(text) => serde_json::from_str::<serde_json::Value>(&text)
            .ok()
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default(),
        Err(_) => Vec::new(),
    };
    records.push(serde_json::json!({
        "label": registration.label,
        "embedding": registration.embedding.values,
    }));
    let text = serde_json::to_string_pretty(&records).map_err(|source| RosterError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    std::fs::write(path, text).map_err(|source| RosterError::Io {
        path: path.to_path_buf(),
        source,
    })
}
