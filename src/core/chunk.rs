//! Retrieval chunks.
//!
//! A [`DocumentChunk`] is the unit of retrieval: a page-anchored slice of a
//! processed document carrying its control-ID set, provenance class, section
//! title, and language. Chunks are created only by the ingestion chunker and
//! destroyed only with their parent document.

use crate::core::document::DocType;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// Compiled control-ID pattern: three or four capital letters, a dash, and
/// exactly three digits (e.g. `POL-001`, `NADZ-014`).
pub static CONTROL_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)] // pattern is a compile-time constant
    Regex::new(r"\b[A-Z]{3,4}-\d{3}\b").unwrap()
});

/// Extracts the distinct set of control IDs from text, sorted.
#[must_use]
pub fn extract_control_ids(text: &str) -> Vec<String> {
    let set: BTreeSet<String> = CONTROL_ID_PATTERN
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect();
    set.into_iter().collect()
}

/// Chunk language, detected per chunk at ingestion time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Croatian (the corpus default).
    #[default]
    Hr,
    /// English.
    En,
}

impl Language {
    /// Returns the ISO 639-1 code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hr => "hr",
            Self::En => "en",
        }
    }

    /// Parses an ISO 639-1 code; anything unknown falls back to Croatian.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "en" => Self::En,
            _ => Self::Hr,
        }
    }
}

/// Metadata bag attached to a chunk.
///
/// The engine reads only the named fields; unknown keys arriving through
/// `custom` are preserved on round-trip and otherwise ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkMetadata {
    /// Detected chunk language.
    pub language: Language,
    /// Source document title.
    pub source: Option<String>,
    /// Scope string copied from the parent document ("global"/"organization").
    pub scope: Option<String>,
    /// Identity of the embedding model that produced the vector.
    pub embedding_model: Option<String>,
    /// Forward-compatible extension bag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<serde_json::Value>,
}

/// A page-anchored retrieval chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// Unique identifier (assigned by the store).
    pub id: Option<i64>,
    /// Parent document id.
    pub document_id: i64,
    /// Sequential index within the document (0-based).
    pub chunk_index: usize,
    /// Chunk text.
    pub content: String,
    /// Unit-normalized embedding vector; empty until the embedding pass runs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
    /// Distinct control IDs appearing in the content.
    pub control_ids: Vec<String>,
    /// Provenance class of the parent document.
    pub doc_type: DocType,
    /// Most recent heading preceding the chunk, if any.
    pub section_title: Option<String>,
    /// First source page contributing characters to this chunk (1-based).
    pub page_start: u32,
    /// Last source page contributing characters to this chunk.
    pub page_end: u32,
    /// The canonical citation page: the page holding the largest share of
    /// the chunk's characters (ties break toward the lower page).
    pub page_anchor: u32,
    /// Metadata bag.
    pub metadata: ChunkMetadata,
}

impl DocumentChunk {
    /// Creates a chunk with the given page span; `control_ids` are extracted
    /// from the content, `doc_type` defaults to custom.
    #[must_use]
    pub fn new(
        document_id: i64,
        chunk_index: usize,
        content: String,
        page_start: u32,
        page_anchor: u32,
        page_end: u32,
    ) -> Self {
        let control_ids = extract_control_ids(&content);
        Self {
            id: None,
            document_id,
            chunk_index,
            content,
            embedding: Vec::new(),
            control_ids,
            doc_type: DocType::Custom,
            section_title: None,
            page_start,
            page_end,
            page_anchor,
            metadata: ChunkMetadata::default(),
        }
    }

    /// Returns the chunk size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.content.len()
    }

    /// Checks whether the chunk carries the given control ID.
    #[must_use]
    pub fn has_control(&self, control_id: &str) -> bool {
        self.control_ids.iter().any(|c| c == control_id)
    }

    /// Returns a preview of the chunk content (first `max_len` bytes,
    /// clamped to a character boundary).
    #[must_use]
    pub fn preview(&self, max_len: usize) -> &str {
        if self.content.len() <= max_len {
            &self.content
        } else {
            let mut end = max_len;
            while !self.content.is_char_boundary(end) && end > 0 {
                end -= 1;
            }
            &self.content[..end]
        }
    }

    /// Checks the page invariant `page_start <= page_anchor <= page_end` and
    /// the control-ID shape invariant.
    #[must_use]
    pub fn invariants_hold(&self) -> bool {
        self.page_start <= self.page_anchor
            && self.page_anchor <= self.page_end
            && self
                .control_ids
                .iter()
                .all(|c| CONTROL_ID_PATTERN.is_match(c))
    }
}
