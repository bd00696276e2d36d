// Constino Library
// Exports core modules for use by the CLI binary and embedding applications

pub mod config;
pub mod context;
pub mod documents;
pub mod logging;

// Re-export commonly used types for CLI
pub use config::{Config, ConfigError, EmbedderConfig};
pub use context::tokens::{
    count_tokens, count_tokens_batch, estimate_tokens_quick, exceeds_token_limit,
};
pub use documents::{
    extract_article_references, get_retriever, install_retriever, load_units, retrieve, save_units,
    segment_file, Embedder, HashingEmbedder, HttpEmbedder, IndexError, IndexStatus, IndexStore,
    MatchSource, RetrievalUnit, RetrieveOptions, Retriever, RetrieverError, ScoredUnit,
    SegmentStats, Segmentation, Segmenter, SegmenterError,
};
pub use logging::init_tracing;
