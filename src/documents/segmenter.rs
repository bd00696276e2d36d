//! Document Segmentation
//!
//! Splits a constitution-style document into retrieval units that follow its
//! Part → Chapter → Article → Clause hierarchy and fit a token budget.
//!
//! Parsing is line oriented: a structural marker is only recognised at the
//! start of a line, and an article marker must also read as a heading
//! ("Article 21 Protection of life", "**Article 21**"). In-text references such
//! as "subject to article 19", including ones a hard wrap moves to the start of
//! a line, never open a new article.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::context::tokens::{count_tokens, TokenCountFn};

/// Default token budget per retrieval unit.
pub const MAX_TOKENS: u32 = 512;

/// Maximum source document size (50 MB) accepted for segmentation.
const MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

lazy_static! {
    static ref PART_MARKER: Regex =
        Regex::new(r"^\s*\*{0,2}\s*(PART\s+[IVXLCDM]+[A-Z]?)\b\*{0,2}(.*)$")
            .expect("part marker");
    static ref CHAPTER_MARKER: Regex =
        Regex::new(r"^\s*\*{0,2}\s*(CHAPTER\s+[IVXLCDM]+[A-Z]?)\b\*{0,2}(.*)$")
            .expect("chapter marker");
    // Capitalised, and followed by nothing, punctuation or a capitalised heading;
    // "article 21 and the law" at the start of a wrapped line is running text.
    static ref ARTICLE_MARKER: Regex =
        Regex::new(r"^\s*\*{0,2}\s*Article\s+(\d+[A-Za-z]{0,2})\b\*{0,2}(\s*(?:[.*A-Z-].*)?)$")
            .expect("article marker");
    // Lower case only counts when emphasised as a heading.
    static ref EMPHASISED_ARTICLE_MARKER: Regex =
        Regex::new(r"^\s*\*\*\s*[Aa]rticle\s+(\d+[A-Za-z]{0,2})\b\s*\*\*(.*)$")
            .expect("emphasised article marker");
    // A clause label opens a line or follows the end of a sentence; "clause (2) of"
    // inside running text is not a boundary.
    static ref CLAUSE_MARKER: Regex =
        Regex::new(r"(?m)(?:^[ \t]*|[.;:]\s+)(\((\d+[A-Z]?)\))\s").expect("clause marker");
}

#[derive(Error, Debug)]
pub enum SegmenterError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("File too large: {0} bytes (max {1} bytes)")]
    FileTooLarge(u64, u64),
}

/// The atomic retrievable passage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalUnit {
    pub part: Option<String>,
    pub chapter: Option<String>,
    pub article: Option<String>,
    /// Label of the last clause merged into this unit
    pub clause: Option<String>,
    /// Every clause label merged into this unit, in document order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clauses: Vec<String>,
    pub text: String,
    #[serde(default)]
    pub token_count: u32,
    /// Single clause kept whole even though it exceeds the budget
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub oversized: bool,
}

/// Parser position in the document hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    None,
    InPart,
    InChapter,
    InArticle,
}

/// Counters collected during one segmentation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentStats {
    pub parts: u32,
    pub chapters: u32,
    pub articles: u32,
    pub units: u32,
    pub oversized: u32,
    /// Non-blank lines outside any article
    pub skipped_lines: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Segmentation {
    pub units: Vec<RetrievalUnit>,
    pub stats: SegmentStats,
}

/// Article being collected
#[derive(Debug)]
struct ArticleSpan {
    id: String,
    heading: String,
    body: String,
}

/// A clause, or the article text preceding the first clause.
#[derive(Debug, PartialEq)]
struct Piece<'a> {
    label: Option<&'a str>,
    text: &'a str,
}

#[derive(Default)]
struct PendingChunk {
    text: String,
    labels: Vec<String>,
    last_label: Option<String>,
}

impl PendingChunk {
    fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    fn start(piece: &Piece<'_>) -> Self {
        let mut chunk = PendingChunk::default();
        chunk.accept(piece.text.to_string(), piece);
        chunk
    }

    fn accept(&mut self, text: String, piece: &Piece<'_>) {
        self.text = text;
        self.last_label = piece.label.map(str::to_string);
        if let Some(label) = piece.label {
            self.labels.push(label.to_string());
        }
    }
}

/// Splits documents into [`RetrievalUnit`]s under a token budget.
#[derive(Clone, Copy)]
pub struct Segmenter {
    max_tokens: u32,
    counter: TokenCountFn,
}

impl Default for Segmenter {
    fn default() -> Self {
        Self::new(MAX_TOKENS)
    }
}

impl Segmenter {
    pub fn new(max_tokens: u32) -> Self {
        Self {
            max_tokens,
            counter: count_tokens,
        }
    }

    /// Measure passages with a different tokenizer.
    pub fn with_counter(mut self, counter: TokenCountFn) -> Self {
        self.counter = counter;
        self
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    /// Segment a whole document, in document order.
    pub fn segment(&self, document: &str) -> Segmentation {
        let mut parser = Parser::new(self);
        for line in document.lines() {
            parser.feed_line(line);
        }
        let segmentation = parser.finish();
        info!(
            parts = segmentation.stats.parts,
            chapters = segmentation.stats.chapters,
            articles = segmentation.stats.articles,
            units = segmentation.stats.units,
            oversized = segmentation.stats.oversized,
            "Segmented document"
        );
        segmentation
    }

    /// Greedily pack an article's pieces into units without crossing the budget.
    fn pack_article(
        &self,
        article: &ArticleSpan,
        part: Option<&String>,
        chapter: Option<&String>,
        stats: &mut SegmentStats,
        out: &mut Vec<RetrievalUnit>,
    ) {
        let pieces = split_clauses(&article.body);
        if pieces.is_empty() {
            debug!(article = %article.id, "Article has no body text, skipping");
            return;
        }

        let mut current = PendingChunk::default();
        for piece in &pieces {
            if current.is_empty() {
                current = PendingChunk::start(piece);
                continue;
            }

            let candidate = format!("{} {}", current.text, piece.text);
            if (self.counter)(&candidate) <= self.max_tokens {
                current.accept(candidate, piece);
            } else {
                let done = std::mem::replace(&mut current, PendingChunk::start(piece));
                out.push(self.close_unit(done, article, part, chapter, stats));
            }
        }
        if !current.is_empty() {
            out.push(self.close_unit(current, article, part, chapter, stats));
        }
    }

    fn close_unit(
        &self,
        chunk: PendingChunk,
        article: &ArticleSpan,
        part: Option<&String>,
        chapter: Option<&String>,
        stats: &mut SegmentStats,
    ) -> RetrievalUnit {
        let token_count = (self.counter)(&chunk.text);
        let oversized = token_count > self.max_tokens;
        if oversized {
            let preview: String = chunk.text.chars().take(50).collect();
            warn!(
                article = %article.id,
                clause = chunk.last_label.as_deref().unwrap_or("-"),
                tokens = token_count,
                max_tokens = self.max_tokens,
                "Single clause '{}...' exceeds the token budget, keeping it whole",
                preview
            );
            stats.oversized += 1;
        }
        stats.units += 1;

        RetrievalUnit {
            part: part.cloned(),
            chapter: chapter.cloned(),
            article: Some(article.id.clone()),
            clause: chunk.last_label,
            clauses: chunk.labels,
            text: chunk.text,
            token_count,
            oversized,
        }
    }
}

/// Line-by-line hierarchy tracker.
struct Parser<'s> {
    segmenter: &'s Segmenter,
    state: ParseState,
    part: Option<String>,
    chapter: Option<String>,
    article: Option<ArticleSpan>,
    units: Vec<RetrievalUnit>,
    stats: SegmentStats,
}

impl<'s> Parser<'s> {
    fn new(segmenter: &'s Segmenter) -> Self {
        Self {
            segmenter,
            state: ParseState::None,
            part: None,
            chapter: None,
            article: None,
            units: Vec::new(),
            stats: SegmentStats::default(),
        }
    }

    fn feed_line(&mut self, line: &str) {
        if let Some((id, title)) = match_marker(&PART_MARKER, line) {
            self.close_article();
            debug!(part = %id, title = %title, "Entering part");
            self.part = Some(id);
            self.chapter = None;
            self.state = ParseState::InPart;
            self.stats.parts += 1;
        } else if let Some((id, title)) = match_marker(&CHAPTER_MARKER, line) {
            self.close_article();
            debug!(part = ?self.part, chapter = %id, title = %title, "Entering chapter");
            self.chapter = Some(id);
            self.state = ParseState::InChapter;
            self.stats.chapters += 1;
        } else if let Some((id, heading)) = match_article(line) {
            self.close_article();
            self.article = Some(ArticleSpan {
                id,
                heading,
                body: String::new(),
            });
            self.state = ParseState::InArticle;
            self.stats.articles += 1;
        } else if self.state == ParseState::InArticle {
            if let Some(article) = self.article.as_mut() {
                if !article.body.is_empty() {
                    article.body.push('\n');
                }
                article.body.push_str(line);
            }
        } else if !line.trim().is_empty() {
            self.stats.skipped_lines += 1;
        }
    }

    fn close_article(&mut self) {
        if let Some(article) = self.article.take() {
            debug!(article = %article.id, heading = %article.heading, "Closing article");
            self.segmenter.pack_article(
                &article,
                self.part.as_ref(),
                self.chapter.as_ref(),
                &mut self.stats,
                &mut self.units,
            );
        }
    }

    fn finish(mut self) -> Segmentation {
        self.close_article();
        if self.stats.skipped_lines > 0 {
            debug!(lines = self.stats.skipped_lines, "Skipped text outside any article");
        }
        Segmentation {
            units: self.units,
            stats: self.stats,
        }
    }
}

/// Returns the normalised marker identifier and the rest of the line.
fn match_marker(marker: &Regex, line: &str) -> Option<(String, String)> {
    let caps = marker.captures(line)?;
    let id = caps[1].split_whitespace().collect::<Vec<_>>().join(" ");
    let rest = caps
        .get(2)
        .map(|m| {
            m.as_str()
                .trim_matches(|c: char| c == '*' || c == '.' || c == '-' || c.is_whitespace())
                .to_string()
        })
        .unwrap_or_default();
    Some((id, rest))
}

/// Article marker with its identifier upper-cased (`21a` → `21A`).
fn match_article(line: &str) -> Option<(String, String)> {
    match_marker(&ARTICLE_MARKER, line)
        .or_else(|| match_marker(&EMPHASISED_ARTICLE_MARKER, line))
        .map(|(id, heading)| (id.to_uppercase(), heading))
}

/// Split an article body into its leading text and numbered clauses.
/// Each clause keeps its `(n)` label in its text.
fn split_clauses(body: &str) -> Vec<Piece<'_>> {
    let mut pieces = Vec::new();
    let mut cursor = 0usize;
    let mut label: Option<&str> = None;

    for caps in CLAUSE_MARKER.captures_iter(body) {
        let (Some(open), Some(num)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        push_piece(&mut pieces, label, &body[cursor..open.start()]);
        cursor = open.start();
        label = Some(num.as_str());
    }
    push_piece(&mut pieces, label, &body[cursor..]);

    pieces
}

fn push_piece<'a>(pieces: &mut Vec<Piece<'a>>, label: Option<&'a str>, raw: &'a str) {
    let text = raw.trim();
    if !text.is_empty() {
        pieces.push(Piece { label, text });
    }
}

/// Read and segment a document from disk.
pub fn segment_file(path: &Path, segmenter: &Segmenter) -> Result<Segmentation, SegmenterError> {
    let file_size = fs::metadata(path)?.len();
    if file_size > MAX_FILE_SIZE {
        return Err(SegmenterError::FileTooLarge(file_size, MAX_FILE_SIZE));
    }
    let content = fs::read_to_string(path)?;
    info!(path = %path.display(), bytes = file_size, "Segmenting document");
    Ok(segmenter.segment(&content))
}

/// Write units as a JSON array of records (tmp file, then rename).
pub fn save_units(path: &Path, units: &[RetrievalUnit]) -> Result<(), SegmenterError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    let json = serde_json::to_string_pretty(units)?;
    fs::write(&tmp, json.as_bytes())?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn load_units(path: &Path) -> Result<Vec<RetrievalUnit>, SegmenterError> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}
