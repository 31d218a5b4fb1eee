//! Heuristic reranking of fused results.
//!
//! Multiplies each fused score by fixed relevance signals: exact
//! control-ID hits, tier provenance, and document-class/query affinity.
//! Deterministic given fixed inputs.

use crate::retrieval::rrf::{FusedChunk, TierSource};
use crate::retrieval::tier1::control_id_in_query;

/// Reranks the top `top_n` fused results and returns the best `final_k`.
#[must_use]
pub fn rerank(
    query: &str,
    mut fused: Vec<FusedChunk>,
    top_n: usize,
    final_k: usize,
) -> Vec<FusedChunk> {
    if fused.len() <= final_k {
        return fused;
    }
    fused.truncate(top_n);

    let query_lower = query.to_lowercase();
    let query_control = control_id_in_query(query);

    for item in &mut fused {
        let chunk = &item.record.chunk;

        // Exact control-ID token in both query and chunk
        if let Some(ref id) = query_control
            && chunk.has_control(id)
        {
            item.score *= 2.0;
        }

        // Tier provenance
        match item.tier_source {
            TierSource::Tier1 => item.score *= 1.5,
            TierSource::Both => item.score *= 1.3,
            TierSource::Tier2 => {}
        }

        // Framework texts answer framework questions
        if chunk.doc_type.is_framework() && query_lower.contains("framework") {
            item.score *= 1.2;
        }

        // Annex catalogs answer control/measure questions
        if chunk.doc_type.is_control_catalog()
            && ["kontrola", "control", "mjera", "measure"]
                .iter()
                .any(|kw| query_lower.contains(kw))
        {
            item.score *= 1.2;
        }
    }

    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.record.chunk.id.cmp(&b.record.chunk.id))
    });
    fused.truncate(final_k);
    fused
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DocType, DocumentChunk};
    use crate::storage::ChunkRecord;

    fn fused_chunk(
        id: i64,
        score: f64,
        tier_source: TierSource,
        doc_type: DocType,
        control: Option<&str>,
    ) -> FusedChunk {
        let content = control.map_or_else(
            || "sadrzaj bez kontrole".to_string(),
            |c| format!("kontrola {c} u tekstu"),
        );
        let mut chunk = DocumentChunk::new(1, 0, content, 1, 1, 1);
        chunk.id = Some(id);
        chunk.doc_type = doc_type;
        FusedChunk {
            record: ChunkRecord {
                chunk,
                doc_title: "Doc".to_string(),
            },
            page_anchor: 1,
            score,
            tier_source,
            tier1_score: None,
            tier2_score: None,
        }
    }

    fn many(n: usize) -> Vec<FusedChunk> {
        (0..n)
            .map(|i| {
                fused_chunk(
                    i as i64,
                    1.0 / (i as f64 + 1.0),
                    TierSource::Tier2,
                    DocType::Custom,
                    None,
                )
            })
            .collect()
    }

    #[test]
    fn test_small_input_passthrough() {
        let fused = many(3);
        let out = rerank("query", fused, 30, 8);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_truncates_to_final_k() {
        let out = rerank("query", many(40), 30, 8);
        assert_eq!(out.len(), 8);
    }

    #[test]
    fn test_exact_control_boost_dominates() {
        let mut fused = many(10);
        // Low-ranked chunk carrying the queried control
        fused.push(fused_chunk(
            99,
            0.05,
            TierSource::Tier1,
            DocType::Zks,
            Some("POL-001"),
        ));
        let out = rerank("Kako zadovoljiti POL-001?", fused, 30, 8);
        // x2.0 (control) * x1.5 (tier1) lifts it to the top
        assert_eq!(out[0].record.chunk.id, Some(99));
    }

    #[test]
    fn test_tier1_beats_tier2_at_equal_score() {
        let mut fused = many(9);
        fused.push(fused_chunk(
            50,
            1.0,
            TierSource::Tier1,
            DocType::Custom,
            None,
        ));
        let out = rerank("general query", fused, 30, 8);
        assert_eq!(out[0].record.chunk.id, Some(50));
    }

    #[test]
    fn test_framework_keyword_boost() {
        let mut fused = many(9);
        fused.push(fused_chunk(
            60,
            1.0,
            TierSource::Tier2,
            DocType::Nis2,
            None,
        ));
        let out = rerank("what does the framework require", fused, 30, 8);
        assert_eq!(out[0].record.chunk.id, Some(60));
    }

    #[test]
    fn test_catalog_keyword_boost() {
        let mut fused = many(9);
        fused.push(fused_chunk(
            70,
            1.0,
            TierSource::Tier2,
            DocType::PrilogB,
            None,
        ));
        let out = rerank("koja mjera se primjenjuje", fused, 30, 8);
        assert_eq!(out[0].record.chunk.id, Some(70));
    }

    #[test]
    fn test_deterministic() {
        let build = || {
            let mut f = many(20);
            f.push(fused_chunk(
                99,
                0.2,
                TierSource::Both,
                DocType::Zks,
                Some("POL-001"),
            ));
            rerank("POL-001 control measure framework", f, 30, 8)
        };
        let a: Vec<Option<i64>> = build().iter().map(|f| f.record.chunk.id).collect();
        let b: Vec<Option<i64>> = build().iter().map(|f| f.record.chunk.id).collect();
        assert_eq!(a, b);
    }
}
