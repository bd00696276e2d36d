//! Index Store
//!
//! Holds the segmented units, one cached embedding per unit, and the part
//! groups used by the hierarchical filter. An index is built once offline,
//! loaded once per process, and read-only afterwards; re-segmenting the
//! document replaces the file wholesale.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

use super::embeddings::{Embedder, Embedding, EmbeddingError};
use super::segmenter::RetrievalUnit;

/// On-disk format version.
pub const INDEX_FORMAT_VERSION: u32 = 1;

/// Characters taken from each unit for a part's representative text.
const PART_SNIPPET_CHARS: usize = 100;
/// Leading units of a part that contribute to its representative text.
const PART_SNIPPET_UNITS: usize = 5;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Index not found: {0}")]
    NotFound(String),
    #[error("Unsupported index version {0} (expected {INDEX_FORMAT_VERSION})")]
    UnsupportedVersion(u32),
    #[error("No units to index")]
    Empty,
    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),
    #[error("Index is inconsistent: {0}")]
    Corrupt(String),
}

/// Units sharing a `part`, with the embedding of their representative text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PartGroup {
    pub part: String,
    /// Store positions of the part's units, in document order
    pub positions: Vec<usize>,
    pub representative: String,
    pub embedding: Embedding,
}

/// Summary for status reporting
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStatus {
    pub ready: bool,
    pub model: Option<String>,
    pub dims: Option<usize>,
    pub units: usize,
    pub parts: usize,
    pub oversized: usize,
    pub built_at: Option<DateTime<Utc>>,
}

impl IndexStatus {
    pub fn not_ready() -> Self {
        Self {
            ready: false,
            model: None,
            dims: None,
            units: 0,
            parts: 0,
            oversized: 0,
            built_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStore {
    version: u32,
    model: String,
    dims: usize,
    built_at: DateTime<Utc>,
    units: Vec<RetrievalUnit>,
    /// Parallel to `units`
    embeddings: Vec<Embedding>,
    parts: Vec<PartGroup>,
}

impl IndexStore {
    /// Embed every unit and every part representative.
    pub fn build(units: Vec<RetrievalUnit>, embedder: &dyn Embedder) -> Result<Self, IndexError> {
        if units.is_empty() {
            return Err(IndexError::Empty);
        }

        info!(units = units.len(), model = embedder.model_id(), "Embedding units");
        let texts: Vec<&str> = units.iter().map(|u| u.text.as_str()).collect();
        let embeddings = embedder.embed_batch(&texts)?;
        if embeddings.len() != units.len() {
            return Err(IndexError::Corrupt(format!(
                "embedder returned {} vectors for {} units",
                embeddings.len(),
                units.len()
            )));
        }
        let dims = embeddings[0].len();

        let groups = group_parts(&units);
        let reps: Vec<&str> = groups.iter().map(|(_, _, rep)| rep.as_str()).collect();
        let part_embeddings = if reps.is_empty() {
            Vec::new()
        } else {
            embedder.embed_batch(&reps)?
        };
        if part_embeddings.len() != groups.len() {
            return Err(IndexError::Corrupt(format!(
                "embedder returned {} vectors for {} parts",
                part_embeddings.len(),
                groups.len()
            )));
        }

        let parts = groups
            .into_iter()
            .zip(part_embeddings)
            .map(|((part, positions, representative), embedding)| PartGroup {
                part,
                positions,
                representative,
                embedding,
            })
            .collect();

        let store = Self {
            version: INDEX_FORMAT_VERSION,
            model: embedder.model_id().to_string(),
            dims,
            built_at: Utc::now(),
            units,
            embeddings,
            parts,
        };
        store.validate()?;
        info!(units = store.units.len(), parts = store.parts.len(), dims, "Index built");
        Ok(store)
    }

    pub fn load(path: &Path) -> Result<Self, IndexError> {
        if !path.exists() {
            return Err(IndexError::NotFound(path.display().to_string()));
        }
        let bytes = fs::read(path)?;
        let store: IndexStore = serde_json::from_slice(&bytes)?;
        if store.version != INDEX_FORMAT_VERSION {
            return Err(IndexError::UnsupportedVersion(store.version));
        }
        store.validate()?;
        info!(
            path = %path.display(),
            units = store.units.len(),
            model = %store.model,
            "Loaded index"
        );
        Ok(store)
    }

    /// Write the index (tmp file, then rename).
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        let json = serde_json::to_vec(self)?;
        fs::write(&tmp, &json)?;
        fs::rename(&tmp, path)?;
        debug!(path = %path.display(), bytes = json.len(), "Index written");
        Ok(())
    }

    fn validate(&self) -> Result<(), IndexError> {
        if self.embeddings.len() != self.units.len() {
            return Err(IndexError::Corrupt(format!(
                "{} embeddings for {} units",
                self.embeddings.len(),
                self.units.len()
            )));
        }
        let vectors = self.embeddings.iter().chain(self.parts.iter().map(|p| &p.embedding));
        for v in vectors {
            if v.len() != self.dims {
                return Err(IndexError::Corrupt(format!(
                    "vector of {} dims in a {}-dim index",
                    v.len(),
                    self.dims
                )));
            }
        }
        for group in &self.parts {
            if let Some(&bad) = group.positions.iter().find(|&&p| p >= self.units.len()) {
                return Err(IndexError::Corrupt(format!(
                    "part {} references unit {} of {}",
                    group.part,
                    bad,
                    self.units.len()
                )));
            }
        }
        Ok(())
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn units(&self) -> &[RetrievalUnit] {
        &self.units
    }

    pub fn unit(&self, position: usize) -> Option<&RetrievalUnit> {
        self.units.get(position)
    }

    pub fn embeddings(&self) -> &[Embedding] {
        &self.embeddings
    }

    pub fn parts(&self) -> &[PartGroup] {
        &self.parts
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn status(&self) -> IndexStatus {
        IndexStatus {
            ready: true,
            model: Some(self.model.clone()),
            dims: Some(self.dims),
            units: self.units.len(),
            parts: self.parts.len(),
            oversized: self.units.iter().filter(|u| u.oversized).count(),
            built_at: Some(self.built_at),
        }
    }
}

/// Group units by part in order of first appearance, returning
/// `(part, positions, representative text)`. Units without a part are left out.
fn group_parts(units: &[RetrievalUnit]) -> Vec<(String, Vec<usize>, String)> {
    let mut order: Vec<(String, Vec<usize>)> = Vec::new();
    let mut slot: HashMap<&str, usize> = HashMap::new();

    for (pos, unit) in units.iter().enumerate() {
        let Some(part) = unit.part.as_deref() else {
            continue;
        };
        let i = *slot.entry(part).or_insert_with(|| {
            order.push((part.to_string(), Vec::new()));
            order.len() - 1
        });
        order[i].1.push(pos);
    }

    order
        .into_iter()
        .map(|(part, positions)| {
            let representative = positions
                .iter()
                .take(PART_SNIPPET_UNITS)
                .map(|&p| units[p].text.chars().take(PART_SNIPPET_CHARS).collect::<String>())
                .collect::<Vec<_>>()
                .join(" ");
            (part, positions, representative)
        })
        .collect()
}
