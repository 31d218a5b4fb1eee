//! Storage trait definition.
//!
//! Defines the interface for the persistent store: documents and chunks,
//! the questionnaire catalog, assessments with answers and scores, the
//! audit trail, and derived artifacts. All operations are atomic where
//! appropriate; every chunk read applies the tenancy predicate
//! `organization_id = :org OR is_global = true`.

use crate::core::{
    Assessment, AssessmentAnswer, AssessmentInsights, AssessmentStatus, AuditLog, ComplianceStatus,
    Control, ControlRequirement, ControlSubmeasureMapping, DocumentChunk, DocumentStatus, Measure,
    ProcessedDocument, QuestionnaireVersion, Recommendation, SecurityLevel, Submeasure,
};
use crate::error::Result;
use crate::scoring::{MeasureControlCounts, MeasureScoreSummary};
use rust_decimal::Decimal;
use serde::Serialize;

/// A chunk together with its parent document's title, as returned by
/// retrieval reads.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    /// The chunk.
    pub chunk: DocumentChunk,
    /// Parent document title (the citation target).
    pub doc_title: String,
}

/// Distinct progress counters for an assessment.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ProgressCounts {
    /// Distinct applicable controls at the assessment's level.
    pub total_controls: u32,
    /// Distinct answered controls.
    pub answered_controls: u32,
    /// Distinct mandatory controls.
    pub mandatory_controls: u32,
    /// Distinct answered mandatory controls.
    pub mandatory_answered: u32,
}

/// Trait for the persistent store.
pub trait Store: Send {
    /// Initializes storage (creates schema, runs migrations).
    ///
    /// Idempotent - safe to call multiple times.
    ///
    /// # Errors
    ///
    /// Returns an error if schema creation or migration fails.
    fn init(&mut self) -> Result<()>;

    /// Checks if storage is initialized.
    ///
    /// # Errors
    ///
    /// Returns an error if the check cannot be performed.
    fn is_initialized(&self) -> Result<bool>;

    /// Deletes all data but preserves the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if deletion fails.
    fn reset(&mut self) -> Result<()>;

    /// Gets storage statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if statistics cannot be gathered.
    fn stats(&self) -> Result<StoreStats>;

    // ==================== Organizations ====================

    /// Creates an organization if its code is new, returning its id.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    fn upsert_organization(&mut self, code: &str, name: &str) -> Result<i64>;

    /// Looks up an organization id by code.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    fn organization_id(&self, code: &str) -> Result<Option<i64>>;

    // ==================== Questionnaire catalog ====================

    /// Inserts a questionnaire version, returning its id.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    fn insert_version(&mut self, version: &QuestionnaireVersion) -> Result<i64>;

    /// Finds a version by content hash.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    fn find_version_by_hash(&self, content_hash: &str) -> Result<Option<QuestionnaireVersion>>;

    /// Returns the active version, if any.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    fn active_version(&self) -> Result<Option<QuestionnaireVersion>>;

    /// Activates a version and deactivates every other, atomically.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    fn activate_version(&mut self, version_id: i64) -> Result<()>;

    /// Inserts a measure, returning its id.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    fn insert_measure(&mut self, measure: &Measure) -> Result<i64>;

    /// Inserts a submeasure, returning its id.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    fn insert_submeasure(&mut self, submeasure: &Submeasure) -> Result<i64>;

    /// Creates a control if its code is new, returning its id.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    fn upsert_control(&mut self, control: &Control) -> Result<i64>;

    /// Inserts a control-submeasure mapping.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    fn insert_mapping(&mut self, mapping: &ControlSubmeasureMapping) -> Result<()>;

    /// Inserts or replaces a requirement record.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    fn upsert_requirement(&mut self, requirement: &ControlRequirement) -> Result<()>;

    /// Measures of a version, ordered by `order_index`.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    fn measures_for_version(&self, version_id: i64) -> Result<Vec<Measure>>;

    /// Submeasures of a measure, ordered by `order_index`.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    fn submeasures_for_measure(&self, measure_id: i64) -> Result<Vec<Submeasure>>;

    /// Controls mapped to a submeasure, in mapping order.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    fn controls_for_submeasure(&self, submeasure_id: i64) -> Result<Vec<Control>>;

    /// Looks up a control by code.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    fn control_by_code(&self, code: &str) -> Result<Option<Control>>;

    /// Fetches a measure by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the measure does not exist.
    fn get_measure(&self, id: i64) -> Result<Measure>;

    /// Fetches a submeasure by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the submeasure does not exist.
    fn get_submeasure(&self, id: i64) -> Result<Submeasure>;

    /// Requirement record for `(control, submeasure, level)`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    fn requirement_for(
        &self,
        control_id: i64,
        submeasure_id: i64,
        level: SecurityLevel,
    ) -> Result<Option<ControlRequirement>>;

    /// Whether a control-submeasure mapping exists.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    fn mapping_exists(&self, control_id: i64, submeasure_id: i64) -> Result<bool>;

    /// Number of measures in a version.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    fn count_measures(&self, version_id: i64) -> Result<u32>;

    // ==================== Documents & chunks ====================

    /// Adds a document after checking the scope invariant, returning its id.
    ///
    /// # Errors
    ///
    /// Returns an error on scope violation or database failure.
    fn add_document(&mut self, document: &ProcessedDocument) -> Result<i64>;

    /// Fetches a document by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the document does not exist.
    fn get_document(&self, id: i64) -> Result<ProcessedDocument>;

    /// Lists documents visible to an organization (own plus global).
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    fn list_documents(&self, organization_id: Option<i64>) -> Result<Vec<ProcessedDocument>>;

    /// Updates a document's processing status and metadata. Sets
    /// `processed_date` when the status is `completed`.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    fn update_document_status(
        &mut self,
        id: i64,
        status: DocumentStatus,
        metadata: Option<&serde_json::Value>,
    ) -> Result<()>;

    /// Deletes a document and its chunks.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    fn delete_document(&mut self, id: i64) -> Result<()>;

    /// Replaces all chunks of a document in one transaction. This is the
    /// idempotence point for reprocessing: completed chunks are replaced,
    /// never duplicated.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure; no partial replacement.
    fn replace_chunks(&mut self, document_id: i64, chunks: &[DocumentChunk]) -> Result<()>;

    /// Chunks of a document, in chunk order.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    fn chunks_for_document(&self, document_id: i64) -> Result<Vec<DocumentChunk>>;

    /// Fetches a chunk by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the chunk does not exist.
    fn get_chunk(&self, id: i64) -> Result<DocumentChunk>;

    /// Number of chunks of a document.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    fn chunk_count(&self, document_id: i64) -> Result<usize>;

    // ==================== Assessments ====================

    /// Adds an assessment, returning its id.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    fn add_assessment(&mut self, assessment: &Assessment) -> Result<i64>;

    /// Fetches an assessment by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the assessment does not exist.
    fn get_assessment(&self, id: i64) -> Result<Assessment>;

    /// Writes the cached progress counters.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    fn update_assessment_progress(&mut self, id: i64, counts: &ProgressCounts) -> Result<()>;

    /// Writes the cached compliance verdict.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    fn update_assessment_compliance(
        &mut self,
        id: i64,
        percentage: Decimal,
        status: Option<ComplianceStatus>,
    ) -> Result<()>;

    /// Writes a status transition, stamping `started_at`/`completed_at`
    /// as appropriate.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    fn update_assessment_status(&mut self, id: i64, status: AssessmentStatus) -> Result<()>;

    // ==================== Answers ====================

    /// Upserts an answer on its unique key, merging on conflict.
    /// Returns the merged row.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    fn upsert_answer(&mut self, answer: &AssessmentAnswer) -> Result<AssessmentAnswer>;

    /// Fetches the answer for `(assessment, control, submeasure)`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    fn get_answer(
        &self,
        assessment_id: i64,
        control_id: i64,
        submeasure_id: i64,
    ) -> Result<Option<AssessmentAnswer>>;

    /// All answers of an assessment.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    fn answers_for_assessment(&self, assessment_id: i64) -> Result<Vec<AssessmentAnswer>>;

    /// Distinct progress counters for an assessment (a control mapped to
    /// several submeasures counts once).
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    fn assessment_distinct_counts(&self, assessment_id: i64) -> Result<ProgressCounts>;

    // ==================== Scores ====================

    /// Distinct control counts for one measure of an assessment.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    fn measure_distinct_counts(
        &self,
        assessment_id: i64,
        measure_id: i64,
        level: SecurityLevel,
    ) -> Result<MeasureControlCounts>;

    /// Cached measure score rows for the incremental overall summary.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    fn measure_score_summaries(&self, assessment_id: i64) -> Result<Vec<MeasureScoreSummary>>;

    // ==================== Audit trail ====================

    /// Appends an audit row. Rows are never updated or deleted.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    fn append_audit(&mut self, log: &AuditLog) -> Result<i64>;

    /// Audit rows of an assessment, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    fn audit_for_assessment(&self, assessment_id: i64) -> Result<Vec<AuditLog>>;

    // ==================== Insights ====================

    /// Upserts the insights artifact for an assessment.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    fn upsert_insights(&mut self, insights: &AssessmentInsights) -> Result<()>;

    /// Fetches the insights artifact, if computed.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    fn get_insights(&self, assessment_id: i64) -> Result<Option<AssessmentInsights>>;

    /// Marks the insights artifact stale (after an answer write).
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    fn mark_insights_stale(&mut self, assessment_id: i64) -> Result<()>;

    // ==================== Recommendations ====================

    /// Fetches a recommendation by id.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    fn get_recommendation(&self, id: i64) -> Result<Option<Recommendation>>;

    /// The active recommendation for `(assessment, control)`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    fn active_recommendation(
        &self,
        assessment_id: i64,
        control_id: i64,
    ) -> Result<Option<Recommendation>>;

    /// Inserts a recommendation; any previously active row for the pair is
    /// deactivated and linked to the new one. The superseding chain stays a
    /// DAG: an update that would make a recommendation its own ancestor is
    /// rejected.
    ///
    /// # Errors
    ///
    /// Returns an error on cycle detection or database failure.
    fn add_recommendation(&mut self, recommendation: &Recommendation) -> Result<i64>;
}

/// Storage statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    /// Number of organizations.
    pub organization_count: usize,
    /// Number of processed documents.
    pub document_count: usize,
    /// Total number of retrieval chunks.
    pub chunk_count: usize,
    /// Number of assessments.
    pub assessment_count: usize,
    /// Number of answers.
    pub answer_count: usize,
    /// Number of audit rows.
    pub audit_count: usize,
    /// Schema version.
    pub schema_version: u32,
    /// Database file size in bytes (if applicable).
    pub db_size: Option<u64>,
}
