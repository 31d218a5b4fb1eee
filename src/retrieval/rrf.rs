//! Reciprocal Rank Fusion of the two retrieval tiers.
//!
//! Based on: Cormack, Clarke, Buettcher (2009) - "Reciprocal Rank Fusion
//! outperforms Condorcet and individual Rank Learning Methods". Each rank
//! `r` (0-based) contributes `1 / (k + r)`; the tiers are combined with a
//! fixed weight: `combined = w1 * rrf(rank_t1) + (1 - w1) * rrf(rank_t2)`.
//!
//! Entries are keyed by `(chunk_id, page_anchor)` so a chunk surfaced by
//! both tiers fuses into one result tagged `both`.

use crate::retrieval::Candidate;
use serde::Serialize;
use std::collections::HashMap;

/// Configuration for the weighted RRF combination.
#[derive(Debug, Clone, Copy)]
pub struct RrfConfig {
    /// The k parameter; higher values flatten the rank contribution curve.
    /// 60 is the value recommended in the original paper.
    pub k: u32,
    /// Weight of the tier-1 (lexical) list; tier 2 gets the complement.
    pub tier1_weight: f64,
}

impl Default for RrfConfig {
    fn default() -> Self {
        Self {
            k: 60,
            tier1_weight: 0.6,
        }
    }
}

/// Which tier(s) surfaced a fused chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TierSource {
    /// Lexical tier only.
    Tier1,
    /// Semantic tier only.
    Tier2,
    /// Surfaced by both tiers.
    Both,
}

impl TierSource {
    /// Returns the canonical string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tier1 => "tier1",
            Self::Tier2 => "tier2",
            Self::Both => "both",
        }
    }
}

/// A fused retrieval result.
#[derive(Debug, Clone)]
pub struct FusedChunk {
    /// The underlying chunk with its document title.
    pub record: crate::storage::ChunkRecord,
    /// Fusion key page (the chunk's canonical citation page).
    pub page_anchor: u32,
    /// Combined RRF score (later multiplied by the reranker).
    pub score: f64,
    /// Which tier(s) produced this chunk.
    pub tier_source: TierSource,
    /// Raw tier-1 score, when present.
    pub tier1_score: Option<f64>,
    /// Raw tier-2 score, when present.
    pub tier2_score: Option<f64>,
}

/// Fuses the two tier result lists with weighted RRF.
///
/// Chunks present in only one list contribute only that term. Output is
/// sorted by combined score descending with a deterministic tie-break on
/// `(chunk_id, page_anchor)`.
#[must_use]
pub fn fuse(tier1: Vec<Candidate>, tier2: Vec<Candidate>, config: &RrfConfig) -> Vec<FusedChunk> {
    let rrf = |rank: usize| 1.0 / (f64::from(config.k) + rank as f64);

    let mut fused: HashMap<(i64, u32), FusedChunk> = HashMap::new();

    for (rank, candidate) in tier1.into_iter().enumerate() {
        let key = (candidate.chunk_id, candidate.page_anchor);
        fused.insert(
            key,
            FusedChunk {
                page_anchor: candidate.page_anchor,
                score: config.tier1_weight * rrf(rank),
                tier_source: TierSource::Tier1,
                tier1_score: Some(candidate.score),
                tier2_score: None,
                record: candidate.record,
            },
        );
    }

    for (rank, candidate) in tier2.into_iter().enumerate() {
        let key = (candidate.chunk_id, candidate.page_anchor);
        let contribution = (1.0 - config.tier1_weight) * rrf(rank);
        match fused.get_mut(&key) {
            Some(existing) => {
                existing.score += contribution;
                existing.tier_source = TierSource::Both;
                existing.tier2_score = Some(candidate.score);
            }
            None => {
                fused.insert(
                    key,
                    FusedChunk {
                        page_anchor: candidate.page_anchor,
                        score: contribution,
                        tier_source: TierSource::Tier2,
                        tier1_score: None,
                        tier2_score: Some(candidate.score),
                        record: candidate.record,
                    },
                );
            }
        }
    }

    let mut results: Vec<FusedChunk> = fused.into_values().collect();
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.record.chunk.id.cmp(&b.record.chunk.id))
            .then_with(|| a.page_anchor.cmp(&b.page_anchor))
    });
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DocumentChunk;
    use crate::storage::ChunkRecord;

    fn candidate(chunk_id: i64, page: u32, score: f64) -> Candidate {
        let mut chunk = DocumentChunk::new(1, 0, format!("chunk {chunk_id}"), page, page, page);
        chunk.id = Some(chunk_id);
        Candidate {
            chunk_id,
            page_anchor: page,
            score,
            record: ChunkRecord {
                chunk,
                doc_title: "Doc".to_string(),
            },
        }
    }

    #[test]
    fn test_fuse_single_list_preserves_order() {
        let tier1 = vec![candidate(1, 1, 1.0), candidate(2, 2, 1.0)];
        let fused = fuse(tier1, vec![], &RrfConfig::default());
        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].record.chunk.id, Some(1));
        assert!(fused[0].score > fused[1].score);
        assert_eq!(fused[0].tier_source, TierSource::Tier1);
    }

    // RRF symmetry law: with tier 2 empty, fused ranking equals tier 1
    #[test]
    fn test_empty_tier2_preserves_tier1_ranking() {
        let tier1: Vec<Candidate> = (1..=10).map(|i| candidate(i, i as u32, 1.0)).collect();
        let order: Vec<i64> = tier1.iter().map(|c| c.chunk_id).collect();
        let fused = fuse(tier1, vec![], &RrfConfig::default());
        let fused_order: Vec<i64> = fused.iter().filter_map(|f| f.record.chunk.id).collect();
        assert_eq!(order, fused_order);
    }

    #[test]
    fn test_both_tiers_merge_on_key() {
        let tier1 = vec![candidate(1, 5, 1.0)];
        let tier2 = vec![candidate(1, 5, 0.8)];
        let config = RrfConfig::default();
        let fused = fuse(tier1, tier2, &config);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].tier_source, TierSource::Both);
        // w1/60 + (1-w1)/60
        let expected = 0.6 / 60.0 + 0.4 / 60.0;
        assert!((fused[0].score - expected).abs() < 1e-12);
        assert_eq!(fused[0].tier1_score, Some(1.0));
        assert_eq!(fused[0].tier2_score, Some(0.8));
    }

    #[test]
    fn test_weighting_favors_tier1_at_equal_rank() {
        let fused = fuse(
            vec![candidate(1, 1, 1.0)],
            vec![candidate(2, 2, 0.9)],
            &RrfConfig::default(),
        );
        assert_eq!(fused[0].record.chunk.id, Some(1));
        assert_eq!(fused[0].tier_source, TierSource::Tier1);
    }

    #[test]
    fn test_same_chunk_different_pages_stay_separate() {
        let tier1 = vec![candidate(1, 5, 1.0)];
        let tier2 = vec![candidate(1, 6, 0.8)];
        let fused = fuse(tier1, tier2, &RrfConfig::default());
        assert_eq!(fused.len(), 2);
    }

    #[test]
    fn test_fuse_empty_lists() {
        let fused = fuse(vec![], vec![], &RrfConfig::default());
        assert!(fused.is_empty());
    }

    #[test]
    fn test_rank_decay() {
        let tier2: Vec<Candidate> = (1..=3).map(|i| candidate(i, 1, 0.9)).collect();
        let fused = fuse(vec![], tier2, &RrfConfig::default());
        // 0.4/60 > 0.4/61 > 0.4/62
        assert!(fused[0].score > fused[1].score);
        assert!(fused[1].score > fused[2].score);
    }

    #[test]
    fn test_deterministic_tie_break() {
        // Same rank position in separate calls, equal scores
        let a = fuse(
            vec![candidate(7, 1, 1.0), candidate(3, 1, 1.0)],
            vec![],
            &RrfConfig::default(),
        );
        let b = fuse(
            vec![candidate(7, 1, 1.0), candidate(3, 1, 1.0)],
            vec![],
            &RrfConfig::default(),
        );
        let ids_a: Vec<i64> = a.iter().filter_map(|f| f.record.chunk.id).collect();
        let ids_b: Vec<i64> = b.iter().filter_map(|f| f.record.chunk.id).collect();
        assert_eq!(ids_a, ids_b);
    }
}
