//! Tier 1: exact lexical retrieval.
//!
//! Control-ID mode when the query (or caller) names a control, ranked
//! full-text mode otherwise. Exact matches score 1.0; the configured
//! near-miss score exists as an expansion knob but the candidate set is
//! containment-filtered, so only exact IDs surface.

use crate::core::CONTROL_ID_PATTERN;
use crate::error::Result;
use crate::retrieval::{Candidate, RetrievalConfig};
use crate::storage::SqliteStore;
use tracing::debug;

/// Which mode produced the tier-1 list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tier1Mode {
    /// Exact control-ID containment search.
    ControlId(String),
    /// Ranked full-text fallback.
    FullText,
}

/// Tier-1 search outcome.
#[derive(Debug, Clone)]
pub struct Tier1Result {
    /// Ranked candidates (best first).
    pub candidates: Vec<Candidate>,
    /// Mode that produced them.
    pub mode: Tier1Mode,
}

impl Tier1Result {
    /// Number of exact control-ID matches in the list.
    #[must_use]
    pub fn exact_control_matches(&self) -> usize {
        match &self.mode {
            Tier1Mode::ControlId(_) => self.candidates.len(),
            Tier1Mode::FullText => 0,
        }
    }
}

/// Extracts the first control ID mentioned in a query, if any.
#[must_use]
pub fn control_id_in_query(query: &str) -> Option<String> {
    CONTROL_ID_PATTERN
        .find(query)
        .map(|m| m.as_str().to_string())
}

/// Runs tier-1 retrieval: control-ID mode when an ID is supplied or found
/// in the query, otherwise full-text mode. An empty control-ID result
/// falls back to full-text.
///
/// # Errors
///
/// Returns an error on store failures.
pub fn tier1_search(
    store: &SqliteStore,
    organization_id: i64,
    query: &str,
    control_id: Option<&str>,
    config: &RetrievalConfig,
) -> Result<Tier1Result> {
    let control_id = control_id
        .map(ToString::to_string)
        .or_else(|| control_id_in_query(query));

    if let Some(ref id) = control_id {
        let records = store.search_chunks_by_control(organization_id, id, config.tier1_limit)?;
        debug!(control_id = %id, hits = records.len(), "tier1 control search");
        if !records.is_empty() {
            let candidates = records
                .into_iter()
                .map(|record| Candidate {
                    chunk_id: record.chunk.id.unwrap_or_default(),
                    page_anchor: record.chunk.page_anchor,
                    score: 1.0,
                    record,
                })
                .collect();
            return Ok(Tier1Result {
                candidates,
                mode: Tier1Mode::ControlId(id.clone()),
            });
        }
    }

    let hits = store.search_chunks_fulltext(organization_id, query, config.tier1_limit)?;
    debug!(hits = hits.len(), "tier1 fulltext search");
    let candidates = hits
        .into_iter()
        .map(|(record, score)| Candidate {
            chunk_id: record.chunk.id.unwrap_or_default(),
            page_anchor: record.chunk.page_anchor,
            score,
            record,
        })
        .collect();

    Ok(Tier1Result {
        candidates,
        mode: Tier1Mode::FullText,
    })
}
