//! Document Segmentation and Retrieval
//!
//! Splits the source document into hierarchy-aware units, indexes them with
//! cached embeddings, and retrieves units for free-text queries.

pub mod embeddings;
pub mod index;
pub mod references;
pub mod retriever;
pub mod segmenter;

// Re-export key public types
pub use embeddings::{
    cosine_similarity, find_similar, Embedder, Embedding, EmbeddingError, HashingEmbedder,
    HttpEmbedder,
};
pub use index::{IndexError, IndexStatus, IndexStore, PartGroup};
pub use references::extract_article_references;
pub use retriever::{
    get_retriever, install_retriever, retrieve, MatchSource, RetrieveOptions, Retriever,
    RetrieverError, ScoredUnit, DIRECT_MATCH_SCORE,
};
pub use segmenter::{
    load_units, save_units, segment_file, RetrievalUnit, SegmentStats, Segmentation, Segmenter,
    SegmenterError, MAX_TOKENS,
};
