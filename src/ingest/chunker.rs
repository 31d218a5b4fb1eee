//! Page-aware chunking.
//!
//! Segments page-tagged text into retrieval chunks while preserving page
//! provenance. Paragraphs merge until a chunk reaches the minimum size;
//! chunks close at page boundaries unless the trailing text is too short to
//! stand alone (a spillover), in which case it is absorbed across the
//! boundary. Oversized chunks are truncated at the nearest sentence
//! boundary and the remainder starts a new chunk.
//!
//! Every chunk records `page_start`, `page_end`, and `page_anchor` (the page
//! holding the largest share of its characters; ties break toward the lower
//! page) so that downstream citations are verifiable.

use crate::error::{IngestError, Result};
use crate::extract::PageText;
use regex::Regex;
use std::sync::LazyLock;
use unicode_segmentation::UnicodeSegmentation;

/// Default maximum chunk size in characters.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 1_200;

/// Default minimum chunk size in characters.
pub const DEFAULT_MIN_CHUNK_SIZE: usize = 200;

/// Enumerated heading like `4.` or `4.2` or `4.2.1 Naslov`.
static ENUMERATED_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)] // pattern is a compile-time constant
    Regex::new(r"^\s*\d+(\.\d+)*\.?\s+\S").unwrap()
});

/// Configuration for the page-aware chunker.
#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    /// Upper bound on chunk size; longer chunks are truncated at a sentence
    /// boundary.
    pub max_chunk_size: usize,
    /// Lower bound under which paragraphs keep merging.
    pub min_chunk_size: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            min_chunk_size: DEFAULT_MIN_CHUNK_SIZE,
        }
    }
}

impl ChunkerConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::InvalidConfig`] when the bounds are zero or
    /// inverted.
    pub fn validate(&self) -> Result<()> {
        if self.max_chunk_size == 0 || self.min_chunk_size == 0 {
            return Err(IngestError::InvalidConfig {
                reason: "chunk sizes must be > 0".to_string(),
            }
            .into());
        }
        if self.min_chunk_size >= self.max_chunk_size {
            return Err(IngestError::InvalidConfig {
                reason: format!(
                    "min_chunk_size {} must be below max_chunk_size {}",
                    self.min_chunk_size, self.max_chunk_size
                ),
            }
            .into());
        }
        Ok(())
    }
}

/// A chunk fresh out of the chunker, before embedding and typing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChunk {
    /// Chunk text.
    pub content: String,
    /// First source page contributing characters (1-based).
    pub page_start: u32,
    /// Canonical citation page.
    pub page_anchor: u32,
    /// Last source page contributing characters.
    pub page_end: u32,
    /// Most recent heading line preceding the chunk, if any.
    pub section_title: Option<String>,
}

/// Page span within the concatenated text, in byte offsets.
#[derive(Debug, Clone, Copy)]
struct PageSpan {
    page_number: u32,
    start: usize,
    end: usize,
}

/// Page-aware chunker.
#[derive(Debug, Clone, Default)]
pub struct PageAwareChunker {
    config: ChunkerConfig,
}

impl PageAwareChunker {
    /// Creates a chunker with the operational defaults (1200 / 200).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a chunker with a custom configuration.
    #[must_use]
    pub const fn with_config(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Returns the active configuration.
    #[must_use]
    pub const fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Chunks page-tagged text units into page-anchored raw chunks.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::InvalidConfig`] for invalid bounds.
    pub fn chunk_pages(&self, pages: &[PageText]) -> Result<Vec<RawChunk>> {
        self.config.validate()?;

        if pages.is_empty() {
            return Ok(Vec::new());
        }

        // Concatenate pages, tracking each page's byte span.
        let (joined, spans) = concatenate(pages);
        if joined.trim().is_empty() {
            return Ok(Vec::new());
        }

        let headings = index_headings(&joined);
        let paragraphs = paragraph_spans(&joined);

        // Merge paragraphs into candidate ranges.
        let candidates = self.assemble(&joined, &paragraphs, &spans);

        // Truncate oversized candidates at sentence boundaries.
        let mut ranges = Vec::new();
        for range in candidates {
            self.truncate_range(&joined, range, &mut ranges);
        }

        // Absorb a too-short trailing range into its predecessor.
        if ranges.len() >= 2 {
            let last = ranges[ranges.len() - 1];
            let prev = ranges[ranges.len() - 2];
            if last.1 - last.0 < self.config.min_chunk_size
                && (last.1 - prev.0) <= self.config.max_chunk_size + self.config.min_chunk_size
            {
                ranges.pop();
                ranges.pop();
                ranges.push((prev.0, last.1));
            }
        }

        Ok(ranges
            .into_iter()
            .filter_map(|(start, end)| {
                let content = joined[start..end].trim();
                if content.is_empty() {
                    return None;
                }
                let (page_start, page_anchor, page_end) = page_attribution(&spans, start, end);
                Some(RawChunk {
                    content: content.to_string(),
                    page_start,
                    page_anchor,
                    page_end,
                    section_title: preceding_heading(&headings, start),
                })
            })
            .collect())
    }

    /// Merges paragraph spans into chunk ranges.
    ///
    /// A range closes when it has reached the minimum size and either the
    /// next paragraph starts on a later page or appending it would exceed
    /// the maximum size. A range still below the minimum keeps absorbing
    /// paragraphs across page boundaries (spillover).
    fn assemble(
        &self,
        joined: &str,
        paragraphs: &[(usize, usize)],
        spans: &[PageSpan],
    ) -> Vec<(usize, usize)> {
        let mut ranges: Vec<(usize, usize)> = Vec::new();
        let mut current: Option<(usize, usize)> = None;

        for &(p_start, p_end) in paragraphs {
            let Some((c_start, c_end)) = current else {
                current = Some((p_start, p_end));
                continue;
            };

            let size = joined[c_start..c_end].trim().len();
            let crosses_page = page_of(spans, p_start) > page_of(spans, c_end.saturating_sub(1));
            let would_overflow = p_end - c_start > self.config.max_chunk_size;

            if size >= self.config.min_chunk_size && (crosses_page || would_overflow) {
                ranges.push((c_start, c_end));
                current = Some((p_start, p_end));
            } else {
                current = Some((c_start, p_end));
            }
        }

        if let Some(range) = current {
            ranges.push(range);
        }
        ranges
    }

    /// Splits an oversized range at sentence boundaries, pushing the pieces.
    fn truncate_range(&self, joined: &str, range: (usize, usize), out: &mut Vec<(usize, usize)>) {
        let (mut start, end) = range;
        while end - start > self.config.max_chunk_size {
            let cut = start
                + sentence_cut(
                    &joined[start..end],
                    self.config.max_chunk_size,
                    self.config.min_chunk_size,
                );
            if cut <= start || cut >= end {
                break;
            }
            out.push((start, cut));
            start = cut;
        }
        out.push((start, end));
    }
}

/// Concatenates page texts with a paragraph separator, recording byte spans.
fn concatenate(pages: &[PageText]) -> (String, Vec<PageSpan>) {
    let mut joined = String::new();
    let mut spans = Vec::with_capacity(pages.len());

    for page in pages {
        let start = joined.len();
        joined.push_str(&page.text);
        if !page.text.ends_with('\n') {
            joined.push_str("\n\n");
        }
        spans.push(PageSpan {
            page_number: page.page_number,
            start,
            end: joined.len(),
        });
    }
    (joined, spans)
}

/// Returns non-empty paragraph spans (split on blank lines).
fn paragraph_spans(text: &str) -> Vec<(usize, usize)> {
    let mut paragraphs = Vec::new();
    let mut offset = 0;
    for piece in text.split("\n\n") {
        let end = offset + piece.len();
        if !piece.trim().is_empty() {
            paragraphs.push((offset, end));
        }
        offset = end + 2; // account for the separator
    }
    paragraphs
}

/// Page number owning a byte offset.
fn page_of(spans: &[PageSpan], offset: usize) -> u32 {
    spans
        .iter()
        .find(|s| offset < s.end)
        .map_or_else(|| spans.last().map_or(1, |s| s.page_number), |s| s.page_number)
}

/// Computes (`page_start`, `page_anchor`, `page_end`) for a byte range.
///
/// The anchor is the page with the largest byte overlap; ties break toward
/// the lower page number.
fn page_attribution(spans: &[PageSpan], start: usize, end: usize) -> (u32, u32, u32) {
    let mut page_start = None;
    let mut page_end = None;
    let mut anchor = None;
    let mut best_share = 0usize;

    for span in spans {
        let overlap_start = start.max(span.start);
        let overlap_end = end.min(span.end);
        if overlap_start >= overlap_end {
            continue;
        }
        let share = overlap_end - overlap_start;
        if page_start.is_none() {
            page_start = Some(span.page_number);
        }
        page_end = Some(span.page_number);
        if share > best_share {
            best_share = share;
            anchor = Some(span.page_number);
        }
    }

    let ps = page_start.unwrap_or(1);
    (ps, anchor.unwrap_or(ps), page_end.unwrap_or(ps))
}

/// Finds a sentence-boundary cut point in `text` at or below `max`, not
/// before `min`. Falls back to a word boundary, then a character boundary.
fn sentence_cut(text: &str, max: usize, min: usize) -> usize {
    let limit = char_boundary(text, max);

    let mut best = 0;
    for (offset, _) in text.split_sentence_bound_indices() {
        if offset > limit {
            break;
        }
        if offset >= min {
            best = offset;
        }
    }
    if best > 0 {
        return best;
    }

    // No sentence boundary in the window; cut at the last space
    if let Some(pos) = text[..limit].rfind(' ')
        && pos >= min
    {
        return pos + 1;
    }

    limit
}

/// Largest valid char boundary at or below `pos`.
fn char_boundary(text: &str, pos: usize) -> usize {
    if pos >= text.len() {
        return text.len();
    }
    let mut boundary = pos;
    while !text.is_char_boundary(boundary) && boundary > 0 {
        boundary -= 1;
    }
    boundary
}

/// Indexes heading lines: (byte offset of line start, heading text).
fn index_headings(text: &str) -> Vec<(usize, String)> {
    let mut headings = Vec::new();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim();
        if is_heading(trimmed) {
            headings.push((offset, trimmed.to_string()));
        }
        offset += line.len();
    }
    headings
}

/// Heuristic heading test: enumerated (`N.N`), ALL-CAPS, or a short
/// title-case line without terminal punctuation.
fn is_heading(line: &str) -> bool {
    if line.is_empty() || line.len() > 80 {
        return false;
    }
    if ENUMERATED_HEADING.is_match(line) {
        return true;
    }
    let has_upper = line.chars().any(char::is_uppercase);
    let has_lower = line.chars().any(char::is_lowercase);
    if has_upper && !has_lower {
        return true;
    }
    // Short title-case line: starts uppercase, few words, no sentence end
    let word_count = line.unicode_words().count();
    line.chars().next().is_some_and(char::is_uppercase)
        && word_count <= 8
        && !line.ends_with(['.', '!', '?', ':', ','])
}

/// Most recent heading at or before `offset`. A heading line that opens a
/// chunk titles that chunk.
fn preceding_heading(headings: &[(usize, String)], offset: usize) -> Option<String> {
    headings
        .iter()
        .take_while(|(h_offset, _)| *h_offset <= offset)
        .last()
        .map(|(_, title)| title.clone())
}
