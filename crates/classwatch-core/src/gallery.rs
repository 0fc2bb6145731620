//! Labeled reference embeddings and the two providers that feed them.
//!
//! Seed identities come from a static roster and may need face extraction
//! through a [`FaceEmbedder`]; dynamic registrations arrive as vectors and
//! are only checked for shape. [`build_gallery`] merges both.

use crate::perception::FaceEmbedder;
use crate::types::{Embedding, Frame};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum RegistrationError {
    #[error("registration has no label")]
    MissingLabel,
    #[error("registration for {0:?} has no embedding")]
    MissingEmbedding(String),
    #[error("embedding for {label:?} has {actual} dimensions, expected {expected}")]
    WrongShape {
        label: String,
        expected: usize,
        actual: usize,
    },
    #[error("embedding for {0:?} contains non-finite values")]
    NonFinite(String),
}

/// One known person and all of their enrollment embeddings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub label: String,
    pub embeddings: Vec<Embedding>,
}

/// The set of known identities, unique by label, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    identities: Vec<Identity>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an identity. An existing label absorbs the new embeddings and
    /// keeps its original position.
    pub fn insert(&mut self, identity: Identity) {
        match self
            .identities
            .iter_mut()
            .find(|i| i.label == identity.label)
        {
            Some(existing) => existing.embeddings.extend(identity.embeddings),
            None => self.identities.push(identity),
        }
    }

    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn embedding_count(&self) -> usize {
        self.identities.iter().map(|i| i.embeddings.len()).sum()
    }
}

/// Where a seed identity's reference embedding comes from.
#[derive(Debug, Clone)]
pub enum SeedSource {
    /// A decoded enrollment photo; needs face extraction.
    Image(Frame),
    /// A precomputed embedding.
    Embedding(Vec<f32>),
}

/// A statically configured identity before embedding extraction.
#[derive(Debug, Clone)]
pub struct SeedIdentity {
    pub label: String,
    pub sources: Vec<SeedSource>,
}

/// A runtime registration captured by an external enrollment flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub label: String,
    pub embedding: Embedding,
}

impl Registration {
    pub fn new(label: &str, values: Vec<f32>, dim: usize) -> Result<Self, RegistrationError> {
        let label = label.trim();
        if label.is_empty() {
            return Err(RegistrationError::MissingLabel);
        }
        if values.is_empty() {
            return Err(RegistrationError::MissingEmbedding(label.to_string()));
        }
        if values.len() != dim {
            return Err(RegistrationError::WrongShape {
                label: label.to_string(),
                expected: dim,
                actual: values.len(),
            });
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(RegistrationError::NonFinite(label.to_string()));
        }
        Ok(Self {
            label: label.to_string(),
            embedding: Embedding::new(values),
        })
    }

    /// Validate one stored registration record `{"label": .., "embedding": [..]}`.
    pub fn from_value(value: &serde_json::Value, dim: usize) -> Result<Self, RegistrationError> {
        let label = value
            .get("label")
            .and_then(|v| v.as_str())
            .ok_or(RegistrationError::MissingLabel)?;
        let raw = value
            .get("embedding")
            .and_then(|v| v.as_array())
            .ok_or_else(|| RegistrationError::MissingEmbedding(label.to_string()))?;
        let mut values = Vec::with_capacity(raw.len());
        for v in raw {
            let Some(f) = v.as_f64() else {
                return Err(RegistrationError::NonFinite(label.to_string()));
            };
            values.push(f as f32);
        }
        Self::new(label, values, dim)
    }
}

/// Parse a JSON array of registrations, skipping malformed entries.
pub fn parse_registrations(value: &serde_json::Value, dim: usize) -> Vec<Registration> {
    let Some(entries) = value.as_array() else {
        tracing::warn!("registration data is not an array; ignoring");
        return Vec::new();
    };
    entries
        .iter()
        .enumerate()
        .filter_map(|(idx, entry)| match Registration::from_value(entry, dim) {
            Ok(reg) => Some(reg),
            Err(e) => {
                tracing::warn!(index = idx, error = %e, "skipping malformed registration");
                None
            }
        })
        .collect()
}

/// Turn seed identities into gallery identities, extracting embeddings from
/// images one at a time. An identity that yields no usable embedding is
/// omitted; the rest still load.
pub async fn resolve_seed<E: FaceEmbedder>(
    seed: Vec<SeedIdentity>,
    embedder: &mut E,
    dim: usize,
) -> Vec<Identity> {
    let mut resolved = Vec::with_capacity(seed.len());

    for identity in seed {
        let mut embeddings = Vec::new();
        for source in identity.sources {
            match source {
                SeedSource::Embedding(values) => {
                    let emb = Embedding::new(values);
                    if emb.has_shape(dim) {
                        embeddings.push(emb);
                    } else {
                        tracing::warn!(
                            label = %identity.label,
                            dim = emb.dim(),
                            expected = dim,
                            "seed embedding has wrong shape"
                        );
                    }
                }
                SeedSource::Image(frame) => match embedder.embed_single(&frame).await {
                    Ok(Some(emb)) if emb.has_shape(dim) => embeddings.push(emb),
                    Ok(Some(emb)) => tracing::warn!(
                        label = %identity.label,
                        dim = emb.dim(),
                        expected = dim,
                        "extracted embedding has wrong shape"
                    ),
                    Ok(None) => {
                        tracing::warn!(label = %identity.label, "no face found in enrollment image")
                    }
                    Err(e) => tracing::warn!(
                        label = %identity.label,
                        error = %e,
                        "face extraction failed for enrollment image"
                    ),
                },
            }
        }

        if embeddings.is_empty() {
            tracing::warn!(label = %identity.label, "omitting identity with no usable embedding");
            continue;
        }
        tracing::info!(label = %identity.label, count = embeddings.len(), "loaded seed identity");
        resolved.push(Identity {
            label: identity.label,
            embeddings,
        });
    }

    resolved
}

/// Merge resolved seed identities and dynamic registrations into one gallery.
/// Seed identities come first.
pub fn build_gallery(seed: &[Identity], dynamic: &[Registration]) -> Gallery {
    let mut gallery = Gallery::new();
    for identity in seed {
        gallery.insert(identity.clone());
    }
    for reg in dynamic {
        gallery.insert(Identity {
            label: reg.label.clone(),
            embeddings: vec![reg.embedding.clone()],
        });
    }
    tracing::info!(
        identities = gallery.len(),
        embeddings = gallery.embedding_count(),
        "gallery built"
    );
    gallery
}
