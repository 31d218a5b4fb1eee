//! Document ingestion pipeline.
//!
//! bytes -> extraction -> page-aware chunking -> embedding -> storage.
//! Processing is idempotent per document: a completed document's chunks are
//! replaced in one transaction, never duplicated, so at-least-once queue
//! redelivery is safe. Failures mark the document `failed` and preserve its
//! metadata; no partial chunk set is ever visible.

pub mod chunker;
pub mod doctype;
pub mod language;
pub mod queue;

pub use chunker::{ChunkerConfig, PageAwareChunker, RawChunk};
pub use doctype::detect_doc_type;
pub use language::detect_language;
pub use queue::{IngestJob, IngestQueue, QueueConfig};

use crate::core::{ChunkMetadata, DocumentChunk, DocumentStatus, extract_control_ids};
use crate::embedding::{DEFAULT_BATCH_SIZE, Embedder};
use crate::error::{IngestError, Result};
use crate::extract;
use crate::storage::{SqliteStore, Store};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Summary of one processed document.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    /// Document that was processed.
    pub document_id: i64,
    /// Chunks stored.
    pub chunks_created: usize,
    /// Distinct control IDs found across the chunks.
    pub control_ids_found: Vec<String>,
    /// Detected document type.
    pub doc_type: String,
    /// Pages extracted.
    pub pages: usize,
}

/// Processes a document's bytes into stored, embedded chunks.
///
/// The document must already exist (status `pending` or a redelivered
/// `processing`/`completed`/`failed`). On success its status becomes
/// `completed`; on failure `failed`, with diagnostics merged into the
/// processing metadata and any previous chunk set left untouched.
///
/// # Errors
///
/// Returns the underlying extraction, chunking, embedding, or storage
/// error after recording the failure on the document row.
pub fn process_document(
    store: &mut SqliteStore,
    embedder: &dyn Embedder,
    document_id: i64,
    bytes: &[u8],
) -> Result<IngestReport> {
    let document = store.get_document(document_id)?;
    store.update_document_status(document_id, DocumentStatus::Processing, None)?;

    match run_pipeline(store, embedder, document_id, bytes) {
        Ok(report) => {
            let metadata = serde_json::json!({
                "chunks_created": report.chunks_created,
                "control_ids_found": report.control_ids_found,
                "doc_type": report.doc_type,
                "pages_processed": report.pages,
                "embedding_model": embedder.model_name(),
            });
            store.update_document_status(
                document_id,
                DocumentStatus::Completed,
                Some(&metadata),
            )?;
            info!(
                document_id,
                chunks = report.chunks_created,
                pages = report.pages,
                "document processed"
            );
            Ok(report)
        }
        Err(e) => {
            // Merge the error into existing metadata rather than replacing it
            let mut metadata = document
                .processing_metadata
                .clone()
                .unwrap_or_else(|| serde_json::json!({}));
            if let Some(map) = metadata.as_object_mut() {
                map.insert("error".to_string(), serde_json::json!(e.to_string()));
                map.insert(
                    "failed_at".to_string(),
                    serde_json::json!(chrono::Utc::now().to_rfc3339()),
                );
            }
            store.update_document_status(document_id, DocumentStatus::Failed, Some(&metadata))?;
            warn!(document_id, error = %e, "document processing failed");
            Err(e)
        }
    }
}

/// The fallible middle of the pipeline; chunks reach the store only at the
/// end, in one transaction.
fn run_pipeline(
    store: &mut SqliteStore,
    embedder: &dyn Embedder,
    document_id: i64,
    bytes: &[u8],
) -> Result<IngestReport> {
    let document = store.get_document(document_id)?;
    let mime = document.mime_type.as_deref().ok_or_else(|| {
        crate::error::Error::from(IngestError::UnsupportedFormat {
            mime: "<missing>".to_string(),
        })
    })?;

    let pages = extract::extract(bytes, mime)?;
    let doc_type = detect_doc_type(
        &document.file_name,
        pages.first().map_or("", |p| p.text.as_str()),
    );

    let chunker = PageAwareChunker::new();
    let raw_chunks = chunker.chunk_pages(&pages)?;

    let mut chunks: Vec<DocumentChunk> = raw_chunks
        .into_iter()
        .enumerate()
        .map(|(index, raw)| {
            let language = detect_language(&raw.content);
            let control_ids = extract_control_ids(&raw.content);
            DocumentChunk {
                id: None,
                document_id,
                chunk_index: index,
                content: raw.content,
                embedding: Vec::new(),
                control_ids,
                doc_type,
                section_title: raw.section_title,
                page_start: raw.page_start,
                page_end: raw.page_end,
                page_anchor: raw.page_anchor,
                metadata: ChunkMetadata {
                    language,
                    source: Some(document.title.clone()),
                    scope: Some(document.scope.as_str().to_string()),
                    embedding_model: Some(embedder.model_name().to_string()),
                    custom: None,
                },
            }
        })
        .collect();

    // Embed in model-sized batches
    for batch in chunks.chunks_mut(DEFAULT_BATCH_SIZE) {
        let texts: Vec<&str> = batch.iter().map(|c| c.content.as_str()).collect();
        let embeddings = embedder.embed_batch(&texts)?;
        for (chunk, embedding) in batch.iter_mut().zip(embeddings) {
            chunk.embedding = embedding;
        }
    }

    // Idempotence point: replace, never append
    store.replace_chunks(document_id, &chunks)?;

    let control_ids_found: BTreeSet<String> = chunks
        .iter()
        .flat_map(|c| c.control_ids.iter().cloned())
        .collect();

    Ok(IngestReport {
        document_id,
        chunks_created: chunks.len(),
        control_ids_found: control_ids_found.into_iter().collect(),
        doc_type: doc_type.as_str().to_string(),
        pages: pages.len(),
    })
}
