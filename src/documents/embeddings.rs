//! Embeddings
//!
//! Backends that turn passage text into vectors, plus the similarity helpers
//! used for ranking. Two backends ship:
//!
//! - [`HashingEmbedder`]: local feature hashing. Each token is hashed with xxh3
//!   to a fixed bucket and the term-frequency vector is L2-normalised. Vectors
//!   are persisted in the index, so the hash must not change between builds;
//!   the algorithm is part of the model id.
//! - [`HttpEmbedder`]: an Ollama-compatible `/api/embed` endpoint, for real
//!   sentence-embedding models.

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

/// Default dimensionality of hashed embeddings.
pub const DEFAULT_HASH_DIMS: usize = 256;

/// Texts per request sent to the HTTP backend.
const HTTP_BATCH_SIZE: usize = 64;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Embedding request failed: {0}")]
    Http(String),
    #[error("Embedding endpoint returned status {0}")]
    Status(u16),
    #[error("Malformed embedding response: {0}")]
    BadResponse(String),
    #[error("Embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

impl From<reqwest::Error> for EmbeddingError {
    fn from(e: reqwest::Error) -> Self {
        EmbeddingError::Http(e.to_string())
    }
}

/// Embedding vector
pub type Embedding = Vec<f32>;

/// A text embedding model.
pub trait Embedder: Send + Sync {
    /// Identifier stored with an index. Vectors from different models are not comparable.
    fn model_id(&self) -> &str;

    /// Embed many texts in one call, preserving order.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>, EmbeddingError>;

    fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        self.embed_batch(&[text])?
            .pop()
            .ok_or_else(|| EmbeddingError::BadResponse("no vector returned".to_string()))
    }
}

/// Feature-hashing embedder.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dims: usize,
    model_id: String,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_DIMS)
    }
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        let dims = dims.max(1);
        Self {
            dims,
            model_id: format!("feature-hash-xxh3-{dims}"),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    fn bucket(&self, token: &str) -> usize {
        (xxh3_64(token.as_bytes()) % self.dims as u64) as usize
    }

    fn embed_one(&self, text: &str) -> Embedding {
        let mut tf = vec![0.0f32; self.dims];

        let tokens = text
            .split_whitespace()
            .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|t| !t.is_empty());
        for token in tokens {
            tf[self.bucket(&token.to_lowercase())] += 1.0;
        }

        let norm = l2_norm(&tf);
        if norm > 0.0 {
            for x in &mut tf {
                *x /= norm;
            }
        }
        tf
    }
}

impl Embedder for HashingEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Embedding>,
}

/// Client for an Ollama-compatible embeddings endpoint.
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    http: Client,
    base_url: String,
    model: String,
}

impl HttpEmbedder {
    pub fn new(base_url: &str, model: &str) -> Result<Self, EmbeddingError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>, EmbeddingError> {
        debug!(model = %self.model, count = texts.len(), "Requesting embeddings");
        let resp = self
            .http
            .post(format!("{}/api/embed", self.base_url))
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()?;

        if !resp.status().is_success() {
            return Err(EmbeddingError::Status(resp.status().as_u16()));
        }

        let body: EmbedResponse = resp
            .json()
            .map_err(|e| EmbeddingError::BadResponse(e.to_string()))?;
        if body.embeddings.len() != texts.len() {
            return Err(EmbeddingError::BadResponse(format!(
                "expected {} vectors, got {}",
                texts.len(),
                body.embeddings.len()
            )));
        }
        Ok(body.embeddings)
    }
}

impl Embedder for HttpEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>, EmbeddingError> {
        let mut out: Vec<Embedding> = Vec::with_capacity(texts.len());
        for batch in texts.chunks(HTTP_BATCH_SIZE) {
            let vectors = self.post_batch(batch)?;
            if let Some(expected) = out.first().map(Vec::len) {
                if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
                    return Err(EmbeddingError::DimensionMismatch {
                        expected,
                        got: bad.len(),
                    });
                }
            }
            out.extend(vectors);
        }
        Ok(out)
    }
}

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity in [-1, 1]. Mismatched or zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    dot / (norm_a * norm_b)
}

/// Score every candidate against `query` and return the `top_k` best as
/// `(position, score)`, highest first. Equal scores keep position order.
pub fn find_similar(query: &[f32], candidates: &[Embedding], top_k: usize) -> Vec<(usize, f32)> {
    let mut scored: Vec<(usize, f32)> = candidates
        .iter()
        .enumerate()
        .map(|(i, emb)| (i, cosine_similarity(query, emb)))
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    scored.truncate(top_k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hashing_embedding_dims() {
        let embedder = HashingEmbedder::default();
        let embedding = embedder.embed("Equality before law").unwrap();
        assert_eq!(embedding.len(), DEFAULT_HASH_DIMS);
        assert!((l2_norm(&embedding) - 1.0).abs() < 1e-5);
        assert_eq!(embedder.model_id(), "feature-hash-xxh3-256");
    }

    #[test]
    fn test_hashing_buckets_are_pinned() {
        let embedder = HashingEmbedder::new(64);
        let expected = (xxh3_64(b"liberty") % 64) as usize;
        assert_eq!(embedder.bucket("liberty"), expected);

        let v = embedder.embed("Liberty").unwrap();
        let hot: Vec<usize> = (0..64).filter(|&i| v[i] != 0.0).collect();
        assert_eq!(hot, vec![expected]);
        assert_eq!(v[expected], 1.0);
    }

    #[test]
    fn test_hashing_embedding_stability() {
        let embedder = HashingEmbedder::new(64);
        let first = embedder.embed("freedom of speech and expression").unwrap();
        let _ = embedder.embed("completely unrelated words about taxation").unwrap();
        let again = embedder.embed("freedom of speech and expression").unwrap();
        assert_eq!(first, again);
    }

    #[test]
    fn test_hashing_ignores_case_and_punctuation() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed("Personal Liberty.").unwrap();
        let b = embedder.embed("personal liberty").unwrap();
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let embedder = HashingEmbedder::new(8);
        let v = embedder.embed("   ").unwrap();
        assert_eq!(v, vec![0.0; 8]);
    }

    #[test]
    fn test_batch_preserves_order() {
        let embedder = HashingEmbedder::new(32);
        let batch = embedder.embed_batch(&["alpha", "beta"]).unwrap();
        assert_eq!(batch[0], embedder.embed("alpha").unwrap());
        assert_eq!(batch[1], embedder.embed("beta").unwrap());
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 0.001);
    }

    #[test]
    fn test_cosine_similarity_degenerate() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_find_similar() {
        let query = vec![1.0, 0.0, 0.0];
        let candidates = vec![
            vec![0.0, 1.0, 0.0],
            vec![1.0, 0.0, 0.0],
            vec![0.7, 0.7, 0.0],
        ];
        let results = find_similar(&query, &candidates, 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, 1);
        assert_eq!(results[1].0, 2);
    }

    #[test]
    fn test_find_similar_ties_by_position() {
        let query = vec![1.0, 0.0];
        let candidates = vec![vec![1.0, 0.0], vec![2.0, 0.0], vec![0.0, 1.0]];
        let results = find_similar(&query, &candidates, 3);
        assert_eq!(results.iter().map(|r| r.0).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn test_http_embedder_trims_base_url() {
        let embedder = HttpEmbedder::new("http://127.0.0.1:11434/", "all-minilm").unwrap();
        assert_eq!(embedder.base_url(), "http://127.0.0.1:11434");
        assert_eq!(embedder.model_id(), "all-minilm");
    }
}
