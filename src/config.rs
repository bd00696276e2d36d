//! Runtime configuration, read from `CONSTINO_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

use crate::documents::embeddings::{
    Embedder, EmbeddingError, HashingEmbedder, HttpEmbedder, DEFAULT_HASH_DIMS,
};
use crate::documents::retriever::RetrieveOptions;
use crate::documents::segmenter::MAX_TOKENS;

pub const ENV_HOME: &str = "CONSTINO_HOME";
pub const ENV_INDEX: &str = "CONSTINO_INDEX";
pub const ENV_MAX_TOKENS: &str = "CONSTINO_MAX_TOKENS";
pub const ENV_EMBED_URL: &str = "CONSTINO_EMBED_URL";
pub const ENV_EMBED_MODEL: &str = "CONSTINO_EMBED_MODEL";
pub const ENV_HASH_DIMS: &str = "CONSTINO_HASH_DIMS";
pub const ENV_PART_THRESHOLD: &str = "CONSTINO_PART_THRESHOLD";
pub const ENV_MAX_PARTS: &str = "CONSTINO_MAX_PARTS";
pub const ENV_MAX_CHUNKS: &str = "CONSTINO_MAX_CHUNKS";

const DATA_DIR_NAME: &str = ".constino";
const INDEX_FILE_NAME: &str = "index.json";
/// Model requested from the HTTP endpoint when only a URL is given
pub const DEFAULT_EMBED_MODEL: &str = "all-minilm";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not determine home directory; set {ENV_HOME}")]
    NoHomeDir,
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

/// Which embedding backend to construct
#[derive(Debug, Clone, PartialEq)]
pub enum EmbedderConfig {
    Hashing { dims: usize },
    Http { url: String, model: String },
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        EmbedderConfig::Hashing {
            dims: DEFAULT_HASH_DIMS,
        }
    }
}

impl EmbedderConfig {
    pub fn build(&self) -> Result<Arc<dyn Embedder>, EmbeddingError> {
        Ok(match self {
            EmbedderConfig::Hashing { dims } => Arc::new(HashingEmbedder::new(*dims)),
            EmbedderConfig::Http { url, model } => Arc::new(HttpEmbedder::new(url, model)?),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub index_path: PathBuf,
    pub max_tokens: u32,
    pub embedder: EmbedderConfig,
    pub retrieve: RetrieveOptions,
}

impl Config {
    /// Defaults rooted at `data_dir`.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            index_path: data_dir.join(INDEX_FILE_NAME),
            data_dir,
            max_tokens: MAX_TOKENS,
            embedder: EmbedderConfig::default(),
            retrieve: RetrieveOptions::default(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset and blank values fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let data_dir = match get(ENV_HOME) {
            Some(dir) => PathBuf::from(dir),
            None => dirs::home_dir().ok_or(ConfigError::NoHomeDir)?.join(DATA_DIR_NAME),
        };
        let mut config = Self::with_data_dir(data_dir);

        if let Some(path) = get(ENV_INDEX) {
            config.index_path = PathBuf::from(path);
        }
        config.max_tokens = parse_or(get(ENV_MAX_TOKENS), ENV_MAX_TOKENS, config.max_tokens)?;
        if config.max_tokens == 0 {
            return Err(invalid(ENV_MAX_TOKENS, "0"));
        }

        config.embedder = match get(ENV_EMBED_URL) {
            Some(url) => EmbedderConfig::Http {
                url,
                model: get(ENV_EMBED_MODEL).unwrap_or_else(|| DEFAULT_EMBED_MODEL.to_string()),
            },
            None => {
                let dims: usize = parse_or(get(ENV_HASH_DIMS), ENV_HASH_DIMS, DEFAULT_HASH_DIMS)?;
                if dims == 0 {
                    return Err(invalid(ENV_HASH_DIMS, "0"));
                }
                EmbedderConfig::Hashing { dims }
            }
        };

        let options = &mut config.retrieve;
        options.part_threshold =
            parse_or(get(ENV_PART_THRESHOLD), ENV_PART_THRESHOLD, options.part_threshold)?;
        if !options.part_threshold.is_finite() {
            return Err(invalid(ENV_PART_THRESHOLD, &options.part_threshold.to_string()));
        }
        options.max_parts = parse_or(get(ENV_MAX_PARTS), ENV_MAX_PARTS, options.max_parts)?;
        options.max_chunks = parse_or(get(ENV_MAX_CHUNKS), ENV_MAX_CHUNKS, options.max_chunks)?;

        Ok(config)
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse_or<T: FromStr>(raw: Option<String>, key: &str, default: T) -> Result<T, ConfigError> {
    match raw {
        Some(value) => value.parse().map_err(|_| invalid(key, &value)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_under_home() {
        let config = config_from(&[(ENV_HOME, "/tmp/constino-test")]).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/constino-test"));
        assert_eq!(config.index_path, PathBuf::from("/tmp/constino-test/index.json"));
        assert_eq!(config.max_tokens, 512);
        assert_eq!(config.embedder, EmbedderConfig::Hashing { dims: 256 });
        assert_eq!(config.retrieve, RetrieveOptions::default());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            (ENV_HOME, "/data"),
            (ENV_INDEX, "/elsewhere/idx.json"),
            (ENV_MAX_TOKENS, "256"),
            (ENV_PART_THRESHOLD, "0.6"),
            (ENV_MAX_PARTS, "3"),
            (ENV_MAX_CHUNKS, " 10 "),
        ])
        .unwrap();
        assert_eq!(config.index_path, PathBuf::from("/elsewhere/idx.json"));
        assert_eq!(config.max_tokens, 256);
        assert_eq!(config.retrieve.part_threshold, 0.6);
        assert_eq!(config.retrieve.max_parts, 3);
        assert_eq!(config.retrieve.max_chunks, 10);
    }

    #[test]
    fn test_http_embedder_selected_by_url() {
        let config =
            config_from(&[(ENV_HOME, "/data"), (ENV_EMBED_URL, "http://localhost:11434")]).unwrap();
        assert_eq!(
            config.embedder,
            EmbedderConfig::Http {
                url: "http://localhost:11434".to_string(),
                model: DEFAULT_EMBED_MODEL.to_string(),
            }
        );
    }

    #[test]
    fn test_invalid_values() {
        let err = config_from(&[(ENV_HOME, "/data"), (ENV_MAX_CHUNKS, "many")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == ENV_MAX_CHUNKS));
        assert!(config_from(&[(ENV_HOME, "/data"), (ENV_MAX_TOKENS, "0")]).is_err());
        assert!(config_from(&[(ENV_HOME, "/data"), (ENV_PART_THRESHOLD, "NaN")]).is_err());
    }

    #[test]
    fn test_build_hashing_embedder() {
        let embedder = EmbedderConfig::Hashing { dims: 16 }.build().unwrap();
        assert_eq!(embedder.model_id(), "feature-hash-xxh3-16");
    }
}
