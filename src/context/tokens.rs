//! Token counting with tiktoken-rs.
//!
//! Passages are measured in cl100k_base tokens. The BPE tables are loaded once
//! per process and counts are cached by content hash, since the segmenter
//! re-measures a growing candidate chunk for every clause it considers.

use lazy_static::lazy_static;
use parking_lot::RwLock;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use tiktoken_rs::{cl100k_base, CoreBPE};

/// Signature shared by every token counter the segmenter can be given.
pub type TokenCountFn = fn(&str) -> u32;

/// Maximum number of cached counts before eviction kicks in.
const CACHE_CAPACITY: usize = 10_000;

lazy_static! {
    static ref CL100K: Option<CoreBPE> = match cl100k_base() {
        Ok(bpe) => Some(bpe),
        Err(e) => {
            tracing::warn!(error = %e, "cl100k_base unavailable, falling back to byte estimate");
            None
        }
    };
}

static TOKEN_CACHE: RwLock<Option<TokenCache>> = RwLock::new(None);

/// Token counts keyed by content hash.
struct TokenCache {
    counts: HashMap<u64, u32>,
    max_size: usize,
}

impl TokenCache {
    fn new(max_size: usize) -> Self {
        Self {
            counts: HashMap::with_capacity(max_size),
            max_size,
        }
    }

    fn get(&self, hash: u64) -> Option<u32> {
        self.counts.get(&hash).copied()
    }

    fn insert(&mut self, hash: u64, count: u32) {
        // At capacity: drop half the entries rather than tracking recency.
        if self.counts.len() >= self.max_size {
            let evict: Vec<u64> = self.counts.keys().take(self.max_size / 2).copied().collect();
            for key in evict {
                self.counts.remove(&key);
            }
        }
        self.counts.insert(hash, count);
    }
}

fn hash_content(content: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}

/// Count cl100k_base tokens in `text`.
pub fn count_tokens(text: &str) -> u32 {
    if text.is_empty() {
        return 0;
    }

    let key = hash_content(text);
    if let Some(count) = TOKEN_CACHE.read().as_ref().and_then(|c| c.get(key)) {
        return count;
    }

    let count = match CL100K.as_ref() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len() as u32,
        None => estimate_tokens_quick(text),
    };

    let mut cache = TOKEN_CACHE.write();
    cache
        .get_or_insert_with(|| TokenCache::new(CACHE_CAPACITY))
        .insert(key, count);

    count
}

pub fn count_tokens_batch(texts: &[&str]) -> Vec<u32> {
    texts.iter().map(|t| count_tokens(t)).collect()
}

/// Whether `text` is over `limit` tokens. Short texts are decided by byte
/// length alone, since a token is never shorter than one byte.
pub fn exceeds_token_limit(text: &str, limit: u32) -> bool {
    if text.len() as u64 <= limit as u64 {
        return false;
    }
    count_tokens(text) > limit
}

/// Rough estimate (~4 bytes per token) used when the BPE cannot be loaded.
pub fn estimate_tokens_quick(text: &str) -> u32 {
    (text.len() as f64 / 4.0).ceil() as u32
}

/// `(cached entries, capacity)`
pub fn get_cache_stats() -> (usize, usize) {
    let cache = TOKEN_CACHE.read();
    match cache.as_ref() {
        Some(c) => (c.counts.len(), c.max_size),
        None => (0, CACHE_CAPACITY),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_tokens_empty() {
        assert_eq!(count_tokens(""), 0);
    }

    #[test]
    fn test_count_tokens_simple() {
        let count = count_tokens("Protection of life and personal liberty.");
        assert!(count > 0);
        assert!(count < 15);
    }

    #[test]
    fn test_count_tokens_cached() {
        let text = "No person shall be deprived of his life or personal liberty.";
        let first = count_tokens(text);
        assert!(get_cache_stats().0 > 0);
        assert_eq!(count_tokens(text), first);
    }

    #[test]
    fn test_repeated_word_counts_per_word() {
        // " word" is a single cl100k token, so n words come out close to n tokens.
        let text = vec!["word"; 600].join(" ");
        let count = count_tokens(&text);
        assert!((590..=610).contains(&count), "got {count}");
    }

    #[test]
    fn test_count_tokens_batch() {
        let counts = count_tokens_batch(&["", "Equality before law."]);
        assert_eq!(counts[0], 0);
        assert_eq!(counts[1], count_tokens("Equality before law."));
    }

    #[test]
    fn test_exceeds_token_limit() {
        assert!(!exceeds_token_limit("short", 512));
        let long = vec!["word"; 600].join(" ");
        assert!(exceeds_token_limit(&long, 512));
        assert!(!exceeds_token_limit(&long, 1000));
    }

    #[test]
    fn test_estimate_within_factor_of_two() {
        let text = "The State shall not deny to any person equality before the law";
        let estimate = estimate_tokens_quick(text);
        let actual = count_tokens(text);
        assert!(estimate <= actual * 2);
        assert!(estimate >= actual / 2);
    }

    #[test]
    fn test_cache_eviction_keeps_bound() {
        let mut cache = TokenCache::new(4);
        for i in 0..10u64 {
            cache.insert(i, i as u32);
        }
        assert!(cache.counts.len() <= 4);
        assert_eq!(cache.get(9), Some(9));
    }
}
