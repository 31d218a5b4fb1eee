//! Core domain types.
//!
//! Documents and chunks (the retrieval corpus), the questionnaire catalog
//! (measures, submeasures, controls, requirements), and assessments with
//! their answers, audit trail, and derived artifacts.

mod assessment;
mod catalog;
mod chunk;
mod document;

pub use assessment::{
    Assessment, AssessmentAnswer, AssessmentInsights, AssessmentStatus, AuditAction, AuditLog,
    ComplianceStatus, Recommendation,
};
pub use catalog::{
    Control, ControlRequirement, ControlSubmeasureMapping, Measure, QuestionnaireVersion,
    SecurityLevel, Submeasure,
};
pub use chunk::{CONTROL_ID_PATTERN, ChunkMetadata, DocumentChunk, Language, extract_control_ids};
pub use document::{DocType, DocumentScope, DocumentStatus, ProcessedDocument};
