//! Document Retrieval
//!
//! Ranks index units for a free-text query in three tiers:
//!
//! 1. units of articles the query names explicitly ("Article 21"), scored 2.0;
//! 2. every unit of the best-matching parts, scored with the part's similarity;
//! 3. the individually most similar units, scored with their own similarity.
//!
//! Each tier only fills what the earlier tiers left of `max_chunks`. When the
//! first tier alone fills it, no embedding is computed.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use super::embeddings::{cosine_similarity, find_similar, Embedder, EmbeddingError};
use super::index::{IndexError, IndexStore};
use super::references::extract_article_references;
use super::segmenter::RetrievalUnit;
use crate::config::Config;

/// Score given to units of explicitly referenced articles, above any cosine similarity.
pub const DIRECT_MATCH_SCORE: f32 = 2.0;

/// Extra candidates requested from the semantic matcher, since some of the
/// top hits are usually already selected.
const TOP_K_MARGIN: usize = 10;

/// Process-wide retriever, installed once at startup
static RETRIEVER: RwLock<Option<Arc<Retriever>>> = RwLock::new(None);

#[derive(Error, Debug)]
pub enum RetrieverError {
    #[error("Retriever not initialized")]
    NotInitialized,
    #[error("Query is empty")]
    EmptyQuery,
    #[error("Index was built with model {index}, but the embedder is {embedder}")]
    ModelMismatch { index: String, embedder: String },
    #[error("Query embedding has {got} dims, index has {expected}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),
    #[error("Index error: {0}")]
    Index(#[from] IndexError),
}

impl Serialize for RetrieverError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Which tier selected a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    DirectArticleMatch,
    PartMatch,
    IndividualMatch,
}

/// A retrieved unit with its score
#[derive(Debug, Clone, Serialize)]
pub struct ScoredUnit {
    #[serde(flatten)]
    pub unit: RetrievalUnit,
    /// Position of the unit in the index
    pub position: usize,
    pub score: f32,
    pub source: MatchSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrieveOptions {
    /// Minimum part similarity for the hierarchical tier
    pub part_threshold: f32,
    pub max_parts: usize,
    pub max_chunks: usize,
    /// Individual matches below this similarity are not returned
    pub min_similarity: Option<f32>,
}

impl Default for RetrieveOptions {
    fn default() -> Self {
        Self {
            part_threshold: 0.75,
            max_parts: 2,
            max_chunks: 20,
            min_similarity: None,
        }
    }
}

/// Units picked so far, deduplicated by position.
struct Selection<'a> {
    index: &'a IndexStore,
    max: usize,
    picked: Vec<ScoredUnit>,
    seen: HashSet<usize>,
}

impl<'a> Selection<'a> {
    fn new(index: &'a IndexStore, max: usize) -> Self {
        Self {
            index,
            max,
            picked: Vec::with_capacity(max),
            seen: HashSet::with_capacity(max),
        }
    }

    fn is_full(&self) -> bool {
        self.picked.len() >= self.max
    }

    fn remaining(&self) -> usize {
        self.max.saturating_sub(self.picked.len())
    }

    fn push(&mut self, position: usize, score: f32, source: MatchSource) {
        if self.is_full() || !self.seen.insert(position) {
            return;
        }
        if let Some(unit) = self.index.unit(position) {
            self.picked.push(ScoredUnit {
                unit: unit.clone(),
                position,
                score,
                source,
            });
        }
    }

    fn count(&self, source: MatchSource) -> usize {
        self.picked.iter().filter(|s| s.source == source).count()
    }

    /// Highest score first; equal scores keep selection order.
    fn finish(mut self) -> Vec<ScoredUnit> {
        self.picked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        self.picked.truncate(self.max);
        self.picked
    }
}

/// Read-only retrieval over a loaded index.
pub struct Retriever {
    index: Arc<IndexStore>,
    embedder: Arc<dyn Embedder>,
}

impl Retriever {
    /// Pair an index with the embedder that built it.
    pub fn new(
        index: Arc<IndexStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, RetrieverError> {
        if index.model() != embedder.model_id() {
            return Err(RetrieverError::ModelMismatch {
                index: index.model().to_string(),
                embedder: embedder.model_id().to_string(),
            });
        }
        Ok(Self { index, embedder })
    }

    /// Load the configured index and construct the configured embedder.
    pub fn from_config(config: &Config) -> Result<Self, RetrieverError> {
        let index = IndexStore::load(&config.index_path)?;
        let embedder = config.embedder.build()?;
        Self::new(Arc::new(index), embedder)
    }

    pub fn index(&self) -> &IndexStore {
        &self.index
    }

    pub fn retrieve(
        &self,
        query: &str,
        options: &RetrieveOptions,
    ) -> Result<Vec<ScoredUnit>, RetrieverError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RetrieverError::EmptyQuery);
        }
        if options.max_chunks == 0 {
            return Ok(Vec::new());
        }

        let mut selection = Selection::new(&self.index, options.max_chunks);

        let references = extract_article_references(query);
        if !references.is_empty() {
            self.direct_matches(&references, &mut selection);
            debug!(
                references = ?references,
                matched = selection.count(MatchSource::DirectArticleMatch),
                "Direct article matches"
            );
        }
        if selection.is_full() {
            debug!("Direct matches fill the budget, skipping semantic tiers");
            return Ok(selection.finish());
        }

        let query_embedding = self.embedder.embed(query)?;
        if query_embedding.len() != self.index.dims() {
            return Err(RetrieverError::DimensionMismatch {
                expected: self.index.dims(),
                got: query_embedding.len(),
            });
        }

        self.part_matches(&query_embedding, options, &mut selection);
        if !selection.is_full() {
            self.individual_matches(&query_embedding, options, &mut selection);
        }

        info!(
            direct = selection.count(MatchSource::DirectArticleMatch),
            part = selection.count(MatchSource::PartMatch),
            individual = selection.count(MatchSource::IndividualMatch),
            "Retrieved units"
        );
        Ok(selection.finish())
    }

    /// Parts whose representative similarity is at least the threshold, best
    /// first, at most `max_parts`. Returned as `(part index, similarity)`.
    pub fn rank_parts(
        &self,
        query_embedding: &[f32],
        options: &RetrieveOptions,
    ) -> Vec<(usize, f32)> {
        let mut ranked: Vec<(usize, f32)> = self
            .index
            .parts()
            .iter()
            .enumerate()
            .map(|(i, group)| (i, cosine_similarity(query_embedding, &group.embedding)))
            .filter(|&(_, score)| score >= options.part_threshold)
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(options.max_parts);
        ranked
    }

    fn direct_matches(&self, references: &BTreeSet<String>, selection: &mut Selection) {
        for (position, unit) in self.index.units().iter().enumerate() {
            if selection.is_full() {
                break;
            }
            let referenced = unit
                .article
                .as_ref()
                .is_some_and(|article| references.contains(article));
            if referenced {
                selection.push(position, DIRECT_MATCH_SCORE, MatchSource::DirectArticleMatch);
            }
        }
    }

    fn part_matches(
        &self,
        query_embedding: &[f32],
        options: &RetrieveOptions,
        selection: &mut Selection,
    ) {
        let parts = self.index.parts();
        for (i, score) in self.rank_parts(query_embedding, options) {
            let group = &parts[i];
            debug!(part = %group.part, score, "Part selected");
            for &position in &group.positions {
                if selection.is_full() {
                    return;
                }
                selection.push(position, score, MatchSource::PartMatch);
            }
        }
    }

    fn individual_matches(
        &self,
        query_embedding: &[f32],
        options: &RetrieveOptions,
        selection: &mut Selection,
    ) {
        let k = (selection.remaining() + TOP_K_MARGIN).max(1).min(self.index.len());
        for (position, score) in find_similar(query_embedding, self.index.embeddings(), k) {
            if selection.is_full() {
                break;
            }
            if options.min_similarity.is_some_and(|floor| score < floor) {
                break;
            }
            selection.push(position, score, MatchSource::IndividualMatch);
        }
    }
}

/// Install the process-wide retriever, replacing any previous one.
pub fn install_retriever(retriever: Retriever) -> Arc<Retriever> {
    let retriever = Arc::new(retriever);
    *RETRIEVER.write() = Some(retriever.clone());
    retriever
}

pub fn get_retriever() -> Result<Arc<Retriever>, RetrieverError> {
    RETRIEVER.read().clone().ok_or(RetrieverError::NotInitialized)
}

/// Retrieve with the process-wide retriever.
pub fn retrieve(query: &str, options: &RetrieveOptions) -> Result<Vec<ScoredUnit>, RetrieverError> {
    get_retriever()?.retrieve(query, options)
}
