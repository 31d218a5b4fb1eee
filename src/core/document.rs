//! Processed compliance documents.
//!
//! A [`ProcessedDocument`] is an uploaded source (PDF, DOCX, TXT) that the
//! ingestion pipeline turns into retrieval chunks. Documents are either
//! private to an organization or global (shared corpus); the two states are
//! mutually exclusive and enforced both here and as a storage check.

use crate::error::{Error, StorageError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Visibility scope of a processed document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentScope {
    /// Private to the owning organization.
    Organization,
    /// Shared corpus, visible to every tenant.
    Global,
}

impl DocumentScope {
    /// Returns the canonical string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Organization => "organization",
            Self::Global => "global",
        }
    }

    /// Parses the canonical string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "organization" => Some(Self::Organization),
            "global" => Some(Self::Global),
            _ => None,
        }
    }
}

/// Processing lifecycle of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    /// Uploaded, waiting for a worker.
    Pending,
    /// A worker is extracting and chunking.
    Processing,
    /// Chunks stored and indexed.
    Completed,
    /// Processing failed; diagnostic metadata preserved.
    Failed,
}

impl DocumentStatus {
    /// Returns the canonical string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parses the canonical string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Provenance class of a document, derived at ingestion time.
///
/// Drives the tier-2 boost table and the reranker heuristics: framework
/// texts (ZKS, NIS2) outrank control catalogs, which outrank generic
/// standards and custom uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocType {
    /// Croatian Cybersecurity Act (Zakon o kibernetickoj sigurnosti).
    Zks,
    /// EU NIS2 directive text.
    Nis2,
    /// Regulation on cybersecurity measures (Uredba).
    Uks,
    /// Annex B control catalog.
    PrilogB,
    /// Annex C control catalog.
    PrilogC,
    /// ISO-family standard.
    Iso,
    /// NIST-family standard.
    Nist,
    /// Other named standard.
    Standard,
    /// Other regulation.
    Regulation,
    /// Anything else (default).
    Custom,
}

impl DocType {
    /// Returns the canonical string form used in storage and metadata.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Zks => "ZKS",
            Self::Nis2 => "NIS2",
            Self::Uks => "UKS",
            Self::PrilogB => "PRILOG_B",
            Self::PrilogC => "PRILOG_C",
            Self::Iso => "ISO",
            Self::Nist => "NIST",
            Self::Standard => "standard",
            Self::Regulation => "regulation",
            Self::Custom => "custom",
        }
    }

    /// Parses the canonical string form; unknown tags map to `Custom`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "ZKS" => Self::Zks,
            "NIS2" => Self::Nis2,
            "UKS" => Self::Uks,
            "PRILOG_B" => Self::PrilogB,
            "PRILOG_C" => Self::PrilogC,
            "ISO" => Self::Iso,
            "NIST" => Self::Nist,
            "standard" => Self::Standard,
            "regulation" => Self::Regulation,
            _ => Self::Custom,
        }
    }

    /// True for framework texts (ZKS, NIS2).
    #[must_use]
    pub const fn is_framework(self) -> bool {
        matches!(self, Self::Zks | Self::Nis2)
    }

    /// True for annex control catalogs.
    #[must_use]
    pub const fn is_control_catalog(self) -> bool {
        matches!(self, Self::PrilogB | Self::PrilogC)
    }
}

/// An uploaded compliance document and its processing state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedDocument {
    /// Unique identifier (assigned by the store).
    pub id: Option<i64>,
    /// Owning organization; `None` only for global documents.
    pub organization_id: Option<i64>,
    /// Visibility scope.
    pub scope: DocumentScope,
    /// Global-corpus marker; redundant with `scope` but persisted for the
    /// storage check constraint.
    pub is_global: bool,
    /// Uploader identity (subject claim), when known.
    pub uploaded_by: Option<String>,
    /// Free-form document category ("standard", "regulation", "policy", ...).
    pub document_type: Option<String>,
    /// Source authority for global documents ("ZKS", "ISO", ...).
    pub source: Option<String>,
    /// Display title.
    pub title: String,
    /// Original file name.
    pub file_name: String,
    /// Original file size in bytes.
    pub file_size: u64,
    /// MIME type as uploaded.
    pub mime_type: Option<String>,
    /// Processing status.
    pub status: DocumentStatus,
    /// Upload timestamp.
    pub upload_date: DateTime<Utc>,
    /// Completion timestamp, when processing finished.
    pub processed_date: Option<DateTime<Utc>>,
    /// Opaque processing metadata (chunk counts, errors, model identity).
    /// Unknown keys round-trip untouched.
    pub processing_metadata: Option<serde_json::Value>,
}

impl ProcessedDocument {
    /// Creates an organization-scoped document in `pending` state.
    #[must_use]
    pub fn organization(
        organization_id: i64,
        title: String,
        file_name: String,
        file_size: u64,
    ) -> Self {
        Self {
            id: None,
            organization_id: Some(organization_id),
            scope: DocumentScope::Organization,
            is_global: false,
            uploaded_by: None,
            document_type: None,
            source: None,
            title,
            file_name,
            file_size,
            mime_type: None,
            status: DocumentStatus::Pending,
            upload_date: Utc::now(),
            processed_date: None,
            processing_metadata: None,
        }
    }

    /// Creates a global document in `pending` state.
    #[must_use]
    pub fn global(title: String, file_name: String, file_size: u64) -> Self {
        Self {
            id: None,
            organization_id: None,
            scope: DocumentScope::Global,
            is_global: true,
            uploaded_by: None,
            document_type: None,
            source: None,
            title,
            file_name,
            file_size,
            mime_type: None,
            status: DocumentStatus::Pending,
            upload_date: Utc::now(),
            processed_date: None,
            processing_metadata: None,
        }
    }

    /// Sets the MIME type.
    #[must_use]
    pub fn with_mime_type(mut self, mime_type: &str) -> Self {
        self.mime_type = Some(mime_type.to_string());
        self
    }

    /// Sets the uploader identity.
    #[must_use]
    pub fn with_uploader(mut self, uploaded_by: &str) -> Self {
        self.uploaded_by = Some(uploaded_by.to_string());
        self
    }

    /// Checks the scope-consistency invariant:
    /// `scope = global` iff `organization_id` is absent and `is_global` set.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ScopeViolation`] when the invariant is broken.
    pub fn validate_scope(&self) -> crate::error::Result<()> {
        let consistent = match self.scope {
            DocumentScope::Global => self.organization_id.is_none() && self.is_global,
            DocumentScope::Organization => self.organization_id.is_some() && !self.is_global,
        };
        if consistent {
            Ok(())
        } else {
            Err(Error::Storage(StorageError::ScopeViolation {
                message: format!(
                    "document '{}': scope={} organization_id={:?} is_global={}",
                    self.title,
                    self.scope.as_str(),
                    self.organization_id,
                    self.is_global
                ),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_roundtrip() {
        assert_eq!(
            DocumentScope::parse(DocumentScope::Global.as_str()),
            Some(DocumentScope::Global)
        );
        assert_eq!(
            DocumentScope::parse(DocumentScope::Organization.as_str()),
            Some(DocumentScope::Organization)
        );
        assert_eq!(DocumentScope::parse("tenant"), None);
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            DocumentStatus::Pending,
            DocumentStatus::Processing,
            DocumentStatus::Completed,
            DocumentStatus::Failed,
        ] {
            assert_eq!(DocumentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(DocumentStatus::parse("queued"), None);
    }

    #[test]
    fn test_doc_type_roundtrip() {
        for tag in [
            "ZKS",
            "NIS2",
            "UKS",
            "PRILOG_B",
            "PRILOG_C",
            "ISO",
            "NIST",
            "standard",
            "regulation",
            "custom",
        ] {
            assert_eq!(DocType::parse(tag).as_str(), tag);
        }
        // Unknown tags map to custom
        assert_eq!(DocType::parse("whatever"), DocType::Custom);
    }

    #[test]
    fn test_doc_type_classes() {
        assert!(DocType::Zks.is_framework());
        assert!(DocType::Nis2.is_framework());
        assert!(!DocType::Uks.is_framework());
        assert!(DocType::PrilogB.is_control_catalog());
        assert!(DocType::PrilogC.is_control_catalog());
        assert!(!DocType::Iso.is_control_catalog());
    }

    #[test]
    fn test_org_document_scope_valid() {
        let doc =
            ProcessedDocument::organization(7, "Policy".to_string(), "policy.pdf".to_string(), 10);
        assert!(doc.validate_scope().is_ok());
        assert_eq!(doc.scope, DocumentScope::Organization);
        assert!(!doc.is_global);
    }

    #[test]
    fn test_global_document_scope_valid() {
        let doc = ProcessedDocument::global("ZKS Guide".to_string(), "zks.pdf".to_string(), 10);
        assert!(doc.validate_scope().is_ok());
        assert!(doc.is_global);
        assert!(doc.organization_id.is_none());
    }

    #[test]
    fn test_scope_violation_detected() {
        let mut doc = ProcessedDocument::global("ZKS Guide".to_string(), "zks.pdf".to_string(), 10);
        doc.organization_id = Some(3);
        assert!(doc.validate_scope().is_err());

        let mut doc =
            ProcessedDocument::organization(7, "Policy".to_string(), "p.pdf".to_string(), 10);
        doc.is_global = true;
        assert!(doc.validate_scope().is_err());
    }

    #[test]
    fn test_builders() {
        let doc = ProcessedDocument::organization(1, "T".to_string(), "t.txt".to_string(), 5)
            .with_mime_type("text/plain")
            .with_uploader("user@example.com");
        assert_eq!(doc.mime_type.as_deref(), Some("text/plain"));
        assert_eq!(doc.uploaded_by.as_deref(), Some("user@example.com"));
    }
}
