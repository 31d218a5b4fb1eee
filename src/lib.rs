//! # procjena
//!
//! Compliance self-assessment core for the Croatian ZKS/NIS2 framework.
//!
//! Three tightly coupled subsystems around one `SQLite` store:
//!
//! - **Two-layer retrieval**: exact lexical search (control IDs,
//!   full-text) fused with semantic vector search via weighted Reciprocal
//!   Rank Fusion, provenance boosting, and heuristic reranking.
//! - **Page-aware ingestion**: PDF/DOCX/TXT extraction, chunking that
//!   preserves page anchors and extracts control identifiers, multilingual
//!   embeddings.
//! - **Deterministic scoring**: control, submeasure, measure, and overall
//!   compliance under the dual-condition pass criterion with
//!   level-dependent thresholds and the maturity trend check.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![warn(unsafe_code)]

pub mod answer;
pub mod assessment;
pub mod catalog;
pub mod citation;
pub mod cli;
pub mod core;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod retrieval;
pub mod scoring;
pub mod storage;

// Re-export commonly used types at crate root
pub use error::{Error, Result};

// Re-export core domain types
pub use core::{
    Assessment, AssessmentAnswer, AssessmentStatus, Control, DocType, DocumentChunk,
    ProcessedDocument, SecurityLevel,
};

// Re-export storage types
pub use storage::{DEFAULT_DB_PATH, SqliteStore, Store};

// Re-export retrieval types
pub use retrieval::{RetrievalConfig, SearchHit, TwoLayerRetrieval};

// Re-export ingestion types
pub use ingest::{IngestQueue, PageAwareChunker, process_document};

// Re-export embedding types
#[cfg(feature = "fastembed-embeddings")]
pub use embedding::FastEmbedEmbedder;
pub use embedding::{DEFAULT_DIMENSIONS, Embedder, HashEmbedder, cosine_similarity, create_embedder};

// Re-export scoring types
pub use scoring::{OverallCompliance, calculate_overall};

// Re-export citation types
pub use citation::{Citation, CitationValidator};

// Re-export CLI types
pub use cli::{Cli, Commands, OutputFormat};
