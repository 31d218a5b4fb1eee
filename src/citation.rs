//! Citation extraction and validation.
//!
//! Generated answers cite sources as `[Source: <title>, p. <n>]` (or the
//! Croatian `[Izvor: <title>, str. <n>]`). The validator checks each cited
//! page against the source chunks actually used, tolerating one page of
//! drift, and rewrites accepted citations to the chunk's canonical page
//! anchor. It never fabricates a source: corrections only move a citation
//! onto a chunk that was really retrieved.

use crate::retrieval::SearchHit;
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

/// Citation markers in generated text, English and Croatian forms.
static CITATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)] // pattern is a compile-time constant
    Regex::new(r"\[(?:Izvor|Source|Ref):\s*([^,\]]+?)(?:,\s*(?:str\.|p\.)\s*(\d+))?\]").unwrap()
});

/// A citation extracted from generated text.
#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    /// Chunk backing the citation, when resolved.
    pub chunk_id: Option<i64>,
    /// Cited document title as written.
    pub document_title: String,
    /// Cited (possibly corrected) page.
    pub page: u32,
    /// Control IDs of the backing chunk.
    pub control_ids: Vec<String>,
    /// Retrieval score of the backing chunk.
    pub confidence: f64,
    /// Leading excerpt of the backing chunk.
    pub excerpt: String,
    /// Whether the citation survived validation.
    pub valid: bool,
}

/// Validation verdict for one citation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationOutcome {
    /// Whether the citation is acceptable.
    pub valid: bool,
    /// Canonical page to use instead of the cited one, when known.
    pub corrected_page: Option<u32>,
    /// Human-readable explanation.
    pub message: String,
}

/// Validates citations against retrieved source chunks.
#[derive(Debug, Clone, Copy)]
pub struct CitationValidator {
    /// Allowed page variance around a chunk's page range.
    page_tolerance: u32,
}

impl Default for CitationValidator {
    fn default() -> Self {
        Self { page_tolerance: 1 }
    }
}

impl CitationValidator {
    /// Creates a validator with the default tolerance of one page.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a validator with a custom tolerance.
    #[must_use]
    pub const fn with_tolerance(page_tolerance: u32) -> Self {
        Self { page_tolerance }
    }

    /// Validates a cited (title, page) pair against the source chunks.
    ///
    /// A citation is valid when some title-matching chunk's page range,
    /// widened by the tolerance, covers the cited page; the corrected page
    /// is that chunk's anchor. A page miss is still accepted when the
    /// citation's context shares a control ID with a matching chunk.
    #[must_use]
    pub fn validate(
        &self,
        document_title: &str,
        cited_page: u32,
        context_control_ids: &[String],
        sources: &[SearchHit],
    ) -> ValidationOutcome {
        let matching: Vec<&SearchHit> = sources
            .iter()
            .filter(|s| title_matches(&s.doc_title, document_title))
            .collect();

        if matching.is_empty() {
            return ValidationOutcome {
                valid: false,
                corrected_page: None,
                message: format!("document '{document_title}' not found in sources"),
            };
        }

        // Anchors of chunks whose widened page range covers the cited page
        let mut candidate_anchors: Vec<u32> = Vec::new();
        for chunk in &matching {
            let low = chunk.page_start.saturating_sub(self.page_tolerance);
            let high = chunk.page_end + self.page_tolerance;
            if (low..=high).contains(&cited_page) {
                candidate_anchors.push(chunk.page_anchor);
            }
        }

        if let Some(anchor) = candidate_anchors
            .iter()
            .min_by_key(|a| a.abs_diff(cited_page))
        {
            let message = if *anchor == cited_page {
                format!("valid citation at page {anchor}")
            } else {
                format!("citation adjusted from page {cited_page} to {anchor}")
            };
            return ValidationOutcome {
                valid: true,
                corrected_page: Some(*anchor),
                message,
            };
        }

        // Page miss: rescue via shared control IDs
        if !context_control_ids.is_empty() {
            for chunk in &matching {
                if chunk
                    .control_ids
                    .iter()
                    .any(|c| context_control_ids.contains(c))
                {
                    return ValidationOutcome {
                        valid: true,
                        corrected_page: Some(chunk.page_anchor),
                        message: format!(
                            "content found at page {}, not page {cited_page}",
                            chunk.page_anchor
                        ),
                    };
                }
            }
        }

        ValidationOutcome {
            valid: false,
            corrected_page: matching.first().map(|c| c.page_anchor),
            message: format!("content not found near page {cited_page}"),
        }
    }

    /// Extracts citations from generated text, validating and correcting
    /// each against the source chunks.
    #[must_use]
    pub fn extract(&self, response: &str, sources: &[SearchHit]) -> Vec<Citation> {
        let mut citations = Vec::new();

        for captures in CITATION_PATTERN.captures_iter(response) {
            let title = captures
                .get(1)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            let backing = sources
                .iter()
                .find(|s| title_matches(&s.doc_title, &title));

            let Some(backing) = backing else {
                continue;
            };

            let cited_page = captures
                .get(2)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(backing.page_anchor);

            let outcome = self.validate(&title, cited_page, &backing.control_ids, sources);

            citations.push(Citation {
                chunk_id: Some(backing.chunk_id),
                document_title: title,
                page: outcome.corrected_page.unwrap_or(cited_page),
                control_ids: backing.control_ids.clone(),
                confidence: backing.score,
                excerpt: backing.content.chars().take(200).collect(),
                valid: outcome.valid,
            });
        }

        citations
    }

    /// Formats validated citations for display, in Croatian or English.
    #[must_use]
    pub fn format(citations: &[Citation], language: crate::core::Language) -> String {
        if citations.is_empty() {
            return String::new();
        }

        let croatian = language == crate::core::Language::Hr;
        let mut lines = vec![if croatian { "Izvori:" } else { "Sources:" }.to_string()];

        for (i, citation) in citations.iter().enumerate() {
            let page_text = if croatian {
                format!("str. {}", citation.page)
            } else {
                format!("p. {}", citation.page)
            };
            lines.push(format!(
                "{}. {}, {}",
                i + 1,
                citation.document_title,
                page_text
            ));
            if !citation.control_ids.is_empty() {
                let shown: Vec<&str> = citation
                    .control_ids
                    .iter()
                    .take(3)
                    .map(String::as_str)
                    .collect();
                let suffix = if citation.control_ids.len() > 3 { "..." } else { "" };
                lines.push(format!("   Kontrole: {}{suffix}", shown.join(", ")));
            }
        }

        lines.join("\n")
    }
}

/// Case-insensitive containment in either direction.
fn title_matches(chunk_title: &str, cited_title: &str) -> bool {
    let chunk = chunk_title.to_lowercase();
    let cited = cited_title.to_lowercase();
    chunk.contains(&cited) || cited.contains(&chunk)
}
