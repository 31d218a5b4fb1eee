//! Error types for the assessment core.
//!
//! This module provides a comprehensive error hierarchy using `thiserror` for
//! all subsystems: storage, ingestion, retrieval, scoring, assessment
//! lifecycle, and CLI commands.

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for the assessment core.
#[derive(Error, Debug)]
pub enum Error {
    /// Storage-related errors (database operations).
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Ingestion errors (extraction and chunking).
    #[error("ingest error: {0}")]
    Ingest(#[from] IngestError),

    /// Retrieval errors (search pipeline).
    #[error("retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    /// Scoring errors (compliance computation).
    #[error("scoring error: {0}")]
    Scoring(#[from] ScoringError),

    /// Assessment lifecycle errors.
    #[error("assessment error: {0}")]
    Assessment(#[from] AssessmentError),

    /// CLI command errors.
    #[error("command error: {0}")]
    Command(#[from] CommandError),

    /// Configuration errors.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },
}

/// Storage-specific errors for database operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Database connection or query error.
    #[error("database error: {0}")]
    Database(String),

    /// Storage not initialized (init command not run).
    #[error("store not initialized. Run: procjena init")]
    NotInitialized,

    /// Document not found by id.
    #[error("document not found: {id}")]
    DocumentNotFound {
        /// Document id that was not found.
        id: i64,
    },

    /// Chunk not found by id.
    #[error("chunk not found: {id}")]
    ChunkNotFound {
        /// Chunk id that was not found.
        id: i64,
    },

    /// Assessment not found by id.
    #[error("assessment not found: {id}")]
    AssessmentNotFound {
        /// Assessment id that was not found.
        id: i64,
    },

    /// Catalog row not found (measure, submeasure, control, requirement).
    #[error("catalog entry not found: {entity} {identifier}")]
    CatalogNotFound {
        /// Entity kind ("measure", "submeasure", "control", ...).
        entity: &'static str,
        /// Identifier that was not found.
        identifier: String,
    },

    /// No active questionnaire version.
    #[error("no active questionnaire version. Run: procjena import")]
    NoActiveVersion,

    /// Schema migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// Transaction error.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Tenant/scope invariant violation. Never mutates state partially.
    #[error("scope violation: {message}")]
    ScopeViolation {
        /// Description of the violated invariant.
        message: String,
    },
}

/// Ingestion-specific errors for extraction and chunking.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Unsupported document format.
    #[error("unsupported format: {mime}")]
    UnsupportedFormat {
        /// MIME type that was rejected.
        mime: String,
    },

    /// Document bytes could not be parsed at all.
    #[error("corrupt document: {reason}")]
    CorruptDocument {
        /// Reason the document was deemed corrupt.
        reason: String,
    },

    /// Extraction started but failed partway.
    #[error("extraction failed: {reason}")]
    ExtractionFailed {
        /// Reason for the failure.
        reason: String,
    },

    /// Invalid chunker configuration.
    #[error("invalid chunker configuration: {reason}")]
    InvalidConfig {
        /// Reason the configuration is invalid.
        reason: String,
    },

    /// Ingestion queue is at capacity.
    #[error("ingestion queue full ({capacity} jobs in flight)")]
    QueueFull {
        /// Configured queue capacity.
        capacity: usize,
    },

    /// Ingestion job exceeded its wall-clock budget.
    #[error("ingestion timed out after {seconds}s")]
    Timeout {
        /// Budget that was exceeded, in seconds.
        seconds: u64,
    },

    /// Regex compilation error.
    #[error("regex error: {0}")]
    Regex(String),
}

/// Retrieval-specific errors for the search pipeline.
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// Embedding generation failed.
    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    /// Query/stored embedding dimensions disagree.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimensionality.
        expected: usize,
        /// Actual dimensionality.
        actual: usize,
    },

    /// Generation backend unavailable or failed.
    #[error("generation failed: {0}")]
    GenerationFailed(String),
}

/// Scoring-specific errors for compliance computation.
#[derive(Error, Debug)]
pub enum ScoringError {
    /// Unknown security level string.
    #[error("invalid security level: {level}")]
    InvalidSecurityLevel {
        /// The rejected level string.
        level: String,
    },

    /// Score outside the 1..=5 range.
    #[error("invalid score {value}: must be between 1 and 5")]
    InvalidScore {
        /// The rejected score value.
        value: i64,
    },
}

/// Assessment lifecycle errors.
#[derive(Error, Debug)]
pub enum AssessmentError {
    /// Status transition not allowed by the state machine.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// Answer written for a (control, submeasure) pair with no mapping.
    #[error("control {control_code} is not mapped to submeasure {submeasure_id}")]
    InvalidContext {
        /// Control code in the rejected write.
        control_code: String,
        /// Submeasure id in the rejected write.
        submeasure_id: i64,
    },

    /// Submission blocked by validation errors.
    #[error("assessment cannot be submitted: {reason}")]
    CannotSubmit {
        /// First blocking validation error.
        reason: String,
    },

    /// Recommendation supersession would create a cycle.
    #[error("recommendation {id} would supersede its own ancestor")]
    RecommendationCycle {
        /// Recommendation id in the rejected update.
        id: i64,
    },
}

/// CLI command-specific errors.
#[derive(Error, Debug)]
pub enum CommandError {
    /// Invalid argument provided.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Missing required argument.
    #[error("missing required argument: {0}")]
    MissingArgument(String),

    /// Command execution failed.
    #[error("command execution failed: {0}")]
    ExecutionFailed(String),

    /// User cancelled operation.
    #[error("operation cancelled by user")]
    Cancelled,

    /// Output format error.
    #[error("output format error: {0}")]
    OutputFormat(String),
}

// Implement From traits for standard library and dependency errors

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Ingest(IngestError::ExtractionFailed {
            reason: err.to_string(),
        })
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(StorageError::Database(err.to_string()))
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<regex::Error> for IngestError {
    fn from(err: regex::Error) -> Self {
        Self::Regex(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Config {
            message: "bad config".to_string(),
        };
        assert_eq!(err.to_string(), "configuration error: bad config");
    }

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::NotInitialized;
        assert_eq!(err.to_string(), "store not initialized. Run: procjena init");

        let err = StorageError::DocumentNotFound { id: 42 };
        assert_eq!(err.to_string(), "document not found: 42");

        let err = StorageError::CatalogNotFound {
            entity: "control",
            identifier: "POL-001".to_string(),
        };
        assert!(err.to_string().contains("POL-001"));
    }

    #[test]
    fn test_ingest_error_display() {
        let err = IngestError::UnsupportedFormat {
            mime: "image/png".to_string(),
        };
        assert_eq!(err.to_string(), "unsupported format: image/png");

        let err = IngestError::Timeout { seconds: 600 };
        assert!(err.to_string().contains("600"));
    }

    #[test]
    fn test_assessment_error_display() {
        let err = AssessmentError::InvalidTransition {
            from: "archived".to_string(),
            to: "draft".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid status transition: archived -> draft"
        );

        let err = AssessmentError::InvalidContext {
            control_code: "POL-001".to_string(),
            submeasure_id: 7,
        };
        assert!(err.to_string().contains("POL-001"));
        assert!(err.to_string().contains('7'));
    }

    #[test]
    fn test_scoring_error_display() {
        let err = ScoringError::InvalidSecurityLevel {
            level: "extreme".to_string(),
        };
        assert!(err.to_string().contains("extreme"));

        let err = ScoringError::InvalidScore { value: 9 };
        assert!(err.to_string().contains('9'));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Ingest(_)));
    }

    #[test]
    fn test_error_from_storage() {
        let storage_err = StorageError::NotInitialized;
        let err: Error = storage_err.into();
        assert!(matches!(err, Error::Storage(_)));
    }

    #[test]
    fn test_error_from_rusqlite() {
        let rusqlite_err = rusqlite::Error::InvalidQuery;
        let err: Error = rusqlite_err.into();
        assert!(matches!(err, Error::Storage(StorageError::Database(_))));
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err: serde_json::Error = serde_json::from_str::<i32>("invalid").unwrap_err();
        let err: StorageError = json_err.into();
        assert!(matches!(err, StorageError::Serialization(_)));
    }

    #[test]
    fn test_command_error_variants() {
        let err = CommandError::InvalidArgument("--bad".to_string());
        assert!(err.to_string().contains("invalid argument"));

        let err = CommandError::Cancelled;
        assert!(err.to_string().contains("cancelled"));
    }

    #[test]
    fn test_retrieval_error_display() {
        let err = RetrievalError::DimensionMismatch {
            expected: 768,
            actual: 384,
        };
        assert!(err.to_string().contains("768"));
        assert!(err.to_string().contains("384"));
    }
}
