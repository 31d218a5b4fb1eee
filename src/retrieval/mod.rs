//! Two-layer hybrid retrieval.
//!
//! Tier 1 (exact control-ID / full-text) and Tier 2 (semantic with
//! provenance boosting) run over the tenant-scoped corpus, fuse via
//! weighted Reciprocal Rank Fusion keyed on `(chunk_id, page_anchor)`, and
//! a heuristic reranker picks the final context set. Deterministic given
//! fixed inputs; a short-TTL cache may serve fused results, never reranked
//! ones.

pub mod cache;
pub mod rerank;
pub mod rrf;
pub mod tier1;
pub mod tier2;

pub use cache::{CacheKey, DEFAULT_CACHE_TTL, SearchCache};
pub use rerank::rerank;
pub use rrf::{FusedChunk, RrfConfig, TierSource, fuse};
pub use tier1::{Tier1Mode, Tier1Result, control_id_in_query, tier1_search};
pub use tier2::tier2_search;

use crate::core::DocType;
use crate::embedding::Embedder;
use crate::error::Result;
use crate::storage::{ChunkRecord, SqliteStore};
use serde::Serialize;
use std::collections::HashSet;
use tracing::info;

/// A ranked candidate inside the pipeline, before fusion.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Chunk id.
    pub chunk_id: i64,
    /// Canonical citation page (part of the fusion key).
    pub page_anchor: u32,
    /// Tier-native score (1.0 for exact control hits, BM25-derived for
    /// full-text, boosted cosine for semantic).
    pub score: f64,
    /// The chunk with its document title.
    pub record: ChunkRecord,
}

/// Configuration for the two-layer pipeline.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalConfig {
    /// RRF k parameter.
    pub rrf_k: u32,
    /// Weight of the tier-1 list in the fusion.
    pub tier1_weight: f64,
    /// Tier-1 result cap.
    pub tier1_limit: usize,
    /// Tier-2 result cap.
    pub tier2_limit: usize,
    /// Fused results entering the reranker.
    pub rerank_top_n: usize,
    /// Final context size.
    pub final_k: usize,
    /// Score for configurable near-miss control matches (the candidate set
    /// is exact-only; this is the expansion knob).
    pub near_miss_score: f64,
    /// Exact tier-1 control hits at which tier 2 switches to framework
    /// context (ZKS filter).
    pub control_focus_threshold: usize,
    /// Tier-1 leaders excluded from tier 2 for diversity.
    pub tier1_exclusion_depth: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rrf_k: 60,
            tier1_weight: 0.6,
            tier1_limit: 20,
            tier2_limit: 30,
            rerank_top_n: 30,
            final_k: 8,
            near_miss_score: 0.5,
            control_focus_threshold: 4,
            tier1_exclusion_depth: 10,
        }
    }
}

/// Fixed provenance boost applied to tier-2 similarities.
#[must_use]
pub const fn doc_type_boost(doc_type: DocType) -> f64 {
    match doc_type {
        DocType::Zks => 1.20,
        DocType::Nis2 => 1.10,
        DocType::Uks => 1.00,
        DocType::PrilogB | DocType::PrilogC => 0.90,
        DocType::Regulation => 0.85,
        DocType::Iso | DocType::Nist => 0.80,
        DocType::Standard => 0.70,
        DocType::Custom => 0.60,
    }
}

/// Which tiers contributed to a result set.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TierAnalysis {
    /// Any result came from tier 1 (or both).
    pub tier1_used: bool,
    /// Any result came from tier 2 (or both).
    pub tier2_used: bool,
    /// Tier 1 ran in control-ID mode.
    pub control_focused: bool,
}

/// One search result as returned over the API surface.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    /// Chunk id.
    pub chunk_id: i64,
    /// Full chunk content.
    pub content: String,
    /// Canonical citation page.
    pub page_anchor: u32,
    /// First page of the chunk.
    pub page_start: u32,
    /// Last page of the chunk.
    pub page_end: u32,
    /// Final (reranked) score.
    pub score: f64,
    /// Parent document title.
    pub doc_title: String,
    /// Provenance class.
    pub doc_type: String,
    /// Control IDs in the chunk.
    pub control_ids: Vec<String>,
    /// Section heading, if known.
    pub section_title: Option<String>,
    /// Which tier(s) surfaced the chunk.
    pub tier_source: String,
}

impl SearchHit {
    /// Projects a fused chunk into the API result shape.
    #[must_use]
    pub fn from_fused(fused: &FusedChunk) -> Self {
        let chunk = &fused.record.chunk;
        Self {
            chunk_id: chunk.id.unwrap_or_default(),
            content: chunk.content.clone(),
            page_anchor: chunk.page_anchor,
            page_start: chunk.page_start,
            page_end: chunk.page_end,
            score: fused.score,
            doc_title: fused.record.doc_title.clone(),
            doc_type: chunk.doc_type.as_str().to_string(),
            control_ids: chunk.control_ids.clone(),
            section_title: chunk.section_title.clone(),
            tier_source: fused.tier_source.as_str().to_string(),
        }
    }
}

/// The two-layer retrieval pipeline over a store and an embedding client.
pub struct TwoLayerRetrieval<'a> {
    store: &'a SqliteStore,
    embedder: &'a dyn Embedder,
    config: RetrievalConfig,
    cache: SearchCache,
}

impl<'a> TwoLayerRetrieval<'a> {
    /// Creates a pipeline with the default configuration.
    #[must_use]
    pub fn new(store: &'a SqliteStore, embedder: &'a dyn Embedder) -> Self {
        Self::with_config(store, embedder, RetrievalConfig::default())
    }

    /// Creates a pipeline with a custom configuration.
    #[must_use]
    pub fn with_config(
        store: &'a SqliteStore,
        embedder: &'a dyn Embedder,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
            cache: SearchCache::default(),
        }
    }

    /// Returns the active configuration.
    #[must_use]
    pub const fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Runs both tiers and the fusion, serving the fused list from the
    /// cache when possible. The reranker is never cached.
    ///
    /// # Errors
    ///
    /// Returns an error on store or embedding failures.
    pub fn search_fused(
        &self,
        query: &str,
        organization_id: i64,
        k: usize,
        control_id: Option<&str>,
    ) -> Result<(Vec<FusedChunk>, TierAnalysis)> {
        let cache_key = CacheKey::new(query, organization_id, k, control_id);
        if let Some(cached) = self.cache.get(&cache_key) {
            let analysis = analyze(&cached, control_id.is_some() || control_id_in_query(query).is_some());
            return Ok((cached, analysis));
        }

        // Tier 1: exact retrieval
        let tier1 = tier1_search(
            self.store,
            organization_id,
            query,
            control_id,
            &self.config,
        )?;
        let control_focused = matches!(tier1.mode, Tier1Mode::ControlId(_));

        // Exclude tier-1 leaders from tier 2 for diversity
        let exclude: HashSet<i64> = tier1
            .candidates
            .iter()
            .take(self.config.tier1_exclusion_depth)
            .map(|c| c.chunk_id)
            .collect();

        // With enough exact control hits, tier 2 contributes framework
        // context instead of duplicating the control catalog
        let doc_type_filter =
            if tier1.exact_control_matches() >= self.config.control_focus_threshold {
                Some(DocType::Zks)
            } else {
                None
            };

        // Tier 2: semantic retrieval
        let tier2 = tier2_search(
            self.store,
            self.embedder,
            organization_id,
            query,
            doc_type_filter,
            &exclude,
            &self.config,
        )?;

        let rrf_config = RrfConfig {
            k: self.config.rrf_k,
            tier1_weight: self.config.tier1_weight,
        };
        let fused = fuse(tier1.candidates, tier2, &rrf_config);
        info!(
            query_len = query.len(),
            organization_id,
            fused = fused.len(),
            control_focused,
            "two-layer retrieval"
        );

        self.cache.put(cache_key, fused.clone());
        let analysis = analyze(&fused, control_focused);
        Ok((fused, analysis))
    }

    /// Full pipeline: both tiers, fusion, reranking, top-k hits.
    ///
    /// # Errors
    ///
    /// Returns an error on store or embedding failures.
    pub fn search(
        &self,
        query: &str,
        organization_id: i64,
        k: usize,
        control_id: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        let (fused, _) = self.search_fused(query, organization_id, k, control_id)?;
        let reranked = rerank(query, fused, self.config.rerank_top_n, k);
        Ok(reranked.iter().map(SearchHit::from_fused).collect())
    }

    /// Pipeline variant returning reranked fused chunks plus the tier
    /// analysis (the answer pipeline consumes this form).
    ///
    /// # Errors
    ///
    /// Returns an error on store or embedding failures.
    pub fn retrieve_context(
        &self,
        query: &str,
        organization_id: i64,
        k: usize,
        control_id: Option<&str>,
    ) -> Result<(Vec<FusedChunk>, TierAnalysis)> {
        let (fused, analysis) = self.search_fused(query, organization_id, k, control_id)?;
        let reranked = rerank(query, fused, self.config.rerank_top_n, k);
        Ok((reranked, analysis))
    }
}

fn analyze(fused: &[FusedChunk], control_focused: bool) -> TierAnalysis {
    TierAnalysis {
        tier1_used: fused
            .iter()
            .any(|f| matches!(f.tier_source, TierSource::Tier1 | TierSource::Both)),
        tier2_used: fused
            .iter()
            .any(|f| matches!(f.tier_source, TierSource::Tier2 | TierSource::Both)),
        control_focused,
    }
}
