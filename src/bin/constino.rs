//! Constino CLI
//!
//! Segment a constitution, build its retrieval index, and query it.
//! Every command prints JSON on stdout; failures print `{"error": ...}` and exit 1.

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeSet;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use constino_lib::{
    // Config
    init_tracing, Config,
    // Segmentation
    save_units, segment_file, SegmentStats, Segmenter,
    // Index and retrieval
    extract_article_references, install_retriever, retrieve, IndexError, IndexStatus, IndexStore,
    RetrieveOptions, Retriever, ScoredUnit,
    // Tokens
    count_tokens,
};

#[derive(Parser)]
#[command(name = "constino")]
#[command(
    about = "Constino CLI - hierarchical retrieval over the Constitution of India",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split a document into retrieval units
    Segment {
        /// Source document (UTF-8 text)
        input: PathBuf,
        /// Write unit records here instead of printing them
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Token budget per unit (default: CONSTINO_MAX_TOKENS or 512)
        #[arg(long)]
        max_tokens: Option<u32>,
    },
    /// Segment a document, embed it, and write the index
    Build {
        /// Source document (UTF-8 text)
        input: PathBuf,
        #[arg(long)]
        max_tokens: Option<u32>,
    },
    /// Retrieve ranked units for a query
    Retrieve {
        query: String,
        #[arg(long)]
        part_threshold: Option<f32>,
        #[arg(long)]
        max_parts: Option<usize>,
        #[arg(long)]
        max_chunks: Option<usize>,
        /// Drop individual matches below this similarity
        #[arg(long)]
        min_similarity: Option<f32>,
    },
    /// List the article numbers a query refers to
    Refs { query: String },
    /// Token counting commands
    Tokens {
        #[command(subcommand)]
        action: TokensAction,
    },
    /// Show index status
    Status,
}

#[derive(Subcommand)]
enum TokensAction {
    /// Count tokens in text
    Count {
        /// Text to count (or - to read from stdin)
        text: String,
    },
}

// ============ Output Types ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SegmentOutput {
    stats: SegmentStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    units: Option<Vec<constino_lib::RetrievalUnit>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BuildOutput {
    index_path: String,
    stats: SegmentStats,
    status: IndexStatus,
}

#[derive(Serialize)]
struct RetrieveOutput {
    query: String,
    count: usize,
    results: Vec<ScoredUnit>,
}

#[derive(Serialize)]
struct RefsOutput {
    articles: BTreeSet<String>,
}

#[derive(Serialize)]
struct TokenOutput {
    tokens: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusOutput {
    index_path: String,
    #[serde(flatten)]
    status: IndexStatus,
}

#[derive(Serialize)]
struct ErrorOutput {
    error: String,
}

// ============ Main ============

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Segment {
            input,
            output,
            max_tokens,
        } => handle_segment(input, output, max_tokens),
        Commands::Build { input, max_tokens } => handle_build(input, max_tokens),
        Commands::Retrieve {
            query,
            part_threshold,
            max_parts,
            max_chunks,
            min_similarity,
        } => handle_retrieve(query, part_threshold, max_parts, max_chunks, min_similarity),
        Commands::Refs { query } => to_json(&RefsOutput {
            articles: extract_article_references(&query),
        }),
        Commands::Tokens { action } => handle_tokens(action),
        Commands::Status => handle_status(),
    };

    match result {
        Ok(json) => println!("{}", json),
        Err(e) => {
            let error = ErrorOutput { error: format!("{:#}", e) };
            println!("{}", serde_json::to_string(&error).unwrap_or_else(|_| "{}".to_string()));
            std::process::exit(1);
        }
    }
}

// ============ Handlers ============

fn to_json<T: Serialize>(value: &T) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn segmenter_for(config: &Config, max_tokens: Option<u32>) -> Segmenter {
    Segmenter::new(max_tokens.unwrap_or(config.max_tokens))
}

fn handle_segment(
    input: PathBuf,
    output: Option<PathBuf>,
    max_tokens: Option<u32>,
) -> anyhow::Result<String> {
    let config = Config::from_env()?;
    let segmentation = segment_file(&input, &segmenter_for(&config, max_tokens))
        .with_context(|| format!("segmenting {}", input.display()))?;

    match output {
        Some(path) => {
            save_units(&path, &segmentation.units)
                .with_context(|| format!("writing {}", path.display()))?;
            to_json(&SegmentOutput {
                stats: segmentation.stats,
                output: Some(path.display().to_string()),
                units: None,
            })
        }
        None => to_json(&SegmentOutput {
            stats: segmentation.stats,
            output: None,
            units: Some(segmentation.units),
        }),
    }
}

fn handle_build(input: PathBuf, max_tokens: Option<u32>) -> anyhow::Result<String> {
    let config = Config::from_env()?;
    let segmentation = segment_file(&input, &segmenter_for(&config, max_tokens))
        .with_context(|| format!("segmenting {}", input.display()))?;

    let embedder = config.embedder.build()?;
    let index = IndexStore::build(segmentation.units, embedder.as_ref())?;
    index
        .save(&config.index_path)
        .with_context(|| format!("writing {}", config.index_path.display()))?;

    to_json(&BuildOutput {
        index_path: config.index_path.display().to_string(),
        stats: segmentation.stats,
        status: index.status(),
    })
}

fn handle_retrieve(
    query: String,
    part_threshold: Option<f32>,
    max_parts: Option<usize>,
    max_chunks: Option<usize>,
    min_similarity: Option<f32>,
) -> anyhow::Result<String> {
    let config = Config::from_env()?;
    let defaults = config.retrieve;
    let options = RetrieveOptions {
        part_threshold: part_threshold.unwrap_or(defaults.part_threshold),
        max_parts: max_parts.unwrap_or(defaults.max_parts),
        max_chunks: max_chunks.unwrap_or(defaults.max_chunks),
        min_similarity: min_similarity.or(defaults.min_similarity),
    };

    let retriever: Arc<Retriever> = install_retriever(Retriever::from_config(&config)?);
    tracing::debug!(units = retriever.index().len(), "Retriever ready");

    let results = retrieve(&query, &options)?;
    to_json(&RetrieveOutput {
        query,
        count: results.len(),
        results,
    })
}

fn handle_tokens(action: TokensAction) -> anyhow::Result<String> {
    match action {
        TokensAction::Count { text } => {
            let content = if text == "-" {
                // Read from stdin
                let mut buffer = String::new();
                std::io::stdin().read_to_string(&mut buffer)?;
                buffer
            } else {
                text
            };
            to_json(&TokenOutput {
                tokens: count_tokens(&content),
            })
        }
    }
}

fn handle_status() -> anyhow::Result<String> {
    let config = Config::from_env()?;
    let status = match IndexStore::load(&config.index_path) {
        Ok(index) => index.status(),
        Err(IndexError::NotFound(_)) => IndexStatus::not_ready(),
        Err(e) => return Err(e.into()),
    };
    to_json(&StatusOutput {
        index_path: config.index_path.display().to_string(),
        status,
    })
}
