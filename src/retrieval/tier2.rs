//! Tier 2: semantic vector retrieval.
//!
//! Embeds the query, scores the tenant-scoped candidate set by cosine
//! similarity (an inner product, since stored vectors are unit-normalized),
//! applies the provenance boost table, and returns the top candidates.

use crate::embedding::{Embedder, cosine_similarity};
use crate::error::Result;
use crate::retrieval::{Candidate, RetrievalConfig, doc_type_boost};
use crate::storage::SqliteStore;
use std::collections::HashSet;
use tracing::debug;

/// Runs tier-2 retrieval.
///
/// `doc_type_filter` narrows the candidate set (used to pull framework
/// context when tier 1 already nailed the control catalog);
/// `exclude_chunk_ids` removes chunks tier 1 already surfaced so the
/// semantic list contributes diversity.
///
/// # Errors
///
/// Returns an error on embedding or store failures.
pub fn tier2_search(
    store: &SqliteStore,
    embedder: &dyn Embedder,
    organization_id: i64,
    query: &str,
    doc_type_filter: Option<crate::core::DocType>,
    exclude_chunk_ids: &HashSet<i64>,
    config: &RetrievalConfig,
) -> Result<Vec<Candidate>> {
    let query_embedding = embedder.embed(query)?;

    let candidates = store.scoped_embeddings(organization_id, doc_type_filter)?;
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    // Cosine similarity, then the provenance boost
    let mut scored: Vec<(i64, f64)> = candidates
        .into_iter()
        .filter(|(id, _, _)| !exclude_chunk_ids.contains(id))
        .map(|(id, doc_type, embedding)| {
            let similarity = f64::from(cosine_similarity(&query_embedding, &embedding));
            (id, similarity * doc_type_boost(doc_type))
        })
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    scored.truncate(config.tier2_limit);

    debug!(hits = scored.len(), "tier2 semantic search");

    // Load content and titles for the survivors, preserving rank order
    let ids: Vec<i64> = scored.iter().map(|(id, _)| *id).collect();
    let mut records: std::collections::HashMap<i64, _> = store
        .chunks_with_titles(&ids)?
        .into_iter()
        .filter_map(|r| r.chunk.id.map(|id| (id, r)))
        .collect();

    Ok(scored
        .into_iter()
        .filter_map(|(chunk_id, score)| {
            records.remove(&chunk_id).map(|record| Candidate {
                chunk_id,
                page_anchor: record.chunk.page_anchor,
                score,
                record,
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DocType, DocumentChunk, ProcessedDocument};
    use crate::embedding::{DEFAULT_DIMENSIONS, HashEmbedder};
    use crate::storage::Store;

    fn seeded_store(embedder: &HashEmbedder) -> SqliteStore {
        let mut s = SqliteStore::in_memory().unwrap();
        s.init().unwrap();
        let doc =
            ProcessedDocument::organization(1, "Korpus".to_string(), "k.pdf".to_string(), 10);
        let id = s.add_document(&doc).unwrap();

        let entries = [
            ("upravljanje sigurnosnim rizicima organizacije", DocType::Zks),
            ("plan oporavka od katastrofe i kontinuitet", DocType::Custom),
            ("upravljanje rizicima dobavljaca", DocType::Custom),
        ];
        let chunks: Vec<DocumentChunk> = entries
            .iter()
            .enumerate()
            .map(|(i, (text, doc_type))| {
                let mut c = DocumentChunk::new(id, i, (*text).to_string(), 1, 1, 1);
                c.doc_type = *doc_type;
                c.embedding = embedder.embed(text).unwrap();
                c
            })
            .collect();
        s.replace_chunks(id, &chunks).unwrap();
        s
    }

    #[test]
    fn test_semantic_ranking() {
        let embedder = HashEmbedder::new(DEFAULT_DIMENSIONS);
        let s = seeded_store(&embedder);

        let results = tier2_search(
            &s,
            &embedder,
            1,
            "upravljanje rizicima",
            None,
            &HashSet::new(),
            &RetrievalConfig::default(),
        )
        .unwrap();

        assert!(!results.is_empty());
        // Vocabulary overlap plus the ZKS boost puts the framework chunk first
        assert!(results[0].record.chunk.content.contains("rizicima"));
    }

    #[test]
    fn test_doc_type_filter() {
        let embedder = HashEmbedder::new(DEFAULT_DIMENSIONS);
        let s = seeded_store(&embedder);

        let results = tier2_search(
            &s,
            &embedder,
            1,
            "upravljanje rizicima",
            Some(DocType::Zks),
            &HashSet::new(),
            &RetrievalConfig::default(),
        )
        .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].record.chunk.doc_type, DocType::Zks);
    }

    #[test]
    fn test_exclusions_respected() {
        let embedder = HashEmbedder::new(DEFAULT_DIMENSIONS);
        let s = seeded_store(&embedder);

        let all = tier2_search(
            &s,
            &embedder,
            1,
            "upravljanje rizicima",
            None,
            &HashSet::new(),
            &RetrievalConfig::default(),
        )
        .unwrap();
        let top_id = all[0].chunk_id;

        let excluded: HashSet<i64> = [top_id].into_iter().collect();
        let rest = tier2_search(
            &s,
            &embedder,
            1,
            "upravljanje rizicima",
            None,
            &excluded,
            &RetrievalConfig::default(),
        )
        .unwrap();
        assert!(rest.iter().all(|c| c.chunk_id != top_id));
    }

    #[test]
    fn test_empty_corpus() {
        let embedder = HashEmbedder::new(DEFAULT_DIMENSIONS);
        let mut s = SqliteStore::in_memory().unwrap();
        s.init().unwrap();
        let results = tier2_search(
            &s,
            &embedder,
            1,
            "bilo sto",
            None,
            &HashSet::new(),
            &RetrievalConfig::default(),
        )
        .unwrap();
        assert!(results.is_empty());
    }
}
