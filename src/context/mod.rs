//! Context sizing.
//!
//! Token measurement shared by the segmenter and the CLI.

pub mod tokens;

pub use tokens::{
    count_tokens, count_tokens_batch, estimate_tokens_quick, exceeds_token_limit, get_cache_stats,
    TokenCountFn,
};
