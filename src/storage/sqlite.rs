//! `SQLite` store implementation.
//!
//! One database file holds the retrieval corpus, the questionnaire catalog,
//! and all assessment state, with WAL journaling and foreign keys on.
//! Retrieval reads always apply the tenancy predicate; score persistence is
//! transactional across the three layers.

// SQLite stores all integers as i64. These casts are intentional and safe
// because we only store non-negative values that fit the target types.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]

use crate::core::{
    Assessment, AssessmentAnswer, AssessmentInsights, AssessmentStatus, AuditAction, AuditLog,
    ComplianceStatus, Control, ControlRequirement, ControlSubmeasureMapping, DocType,
    DocumentChunk, DocumentScope, DocumentStatus, Measure, ProcessedDocument,
    QuestionnaireVersion, Recommendation, SecurityLevel, Submeasure,
};
use crate::error::{AssessmentError, Error, Result, StorageError};
use crate::scoring::{
    MeasureCompliance, MeasureControlCounts, MeasureScoreSummary, OverallCompliance,
    OverallSummary, SubmeasureCompliance, detailed_results_json,
};
use crate::storage::schema::{
    CHECK_SCHEMA_SQL, CURRENT_SCHEMA_VERSION, GET_VERSION_SQL, SCHEMA_SQL, SET_VERSION_SQL,
};
use crate::storage::traits::{ChunkRecord, ProgressCounts, Store, StoreStats};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default database path, relative to the working directory.
pub const DEFAULT_DB_PATH: &str = ".procjena/state.db";

/// SQLite-based store.
///
/// # Examples
///
/// ```no_run
/// use procjena::storage::{SqliteStore, Store};
///
/// let mut store = SqliteStore::open(".procjena/state.db").unwrap();
/// store.init().unwrap();
/// ```
pub struct SqliteStore {
    /// `SQLite` connection.
    conn: Connection,
    /// Path to the database file (None for in-memory).
    path: Option<PathBuf>,
}

// ==================== SQL <-> domain conversions ====================

fn now_str() -> String {
    Utc::now().to_rfc3339()
}

fn ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_ts(idx: usize, s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.map(|v| ts(idx, &v)).transpose()
}

fn dec(idx: usize, s: &str) -> rusqlite::Result<Decimal> {
    Decimal::from_str(s)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_dec(idx: usize, s: Option<String>) -> rusqlite::Result<Option<Decimal>> {
    s.map(|v| dec(idx, &v)).transpose()
}

fn json<T: serde::de::DeserializeOwned>(idx: usize, s: &str) -> rusqlite::Result<T> {
    serde_json::from_str(s)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_json(s: Option<String>) -> Option<serde_json::Value> {
    s.and_then(|v| serde_json::from_str(&v).ok())
}

/// Encodes an embedding as little-endian f32 bytes.
fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// Decodes little-endian f32 bytes back into an embedding.
fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Sanitizes user text into an FTS5 match expression: each token quoted,
/// joined with OR, so punctuation and dashes never break query syntax.
fn fts_query(query: &str) -> Option<String> {
    let tokens: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .collect();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" OR "))
    }
}

fn map_document(row: &Row<'_>) -> rusqlite::Result<ProcessedDocument> {
    Ok(ProcessedDocument {
        id: Some(row.get(0)?),
        organization_id: row.get(1)?,
        scope: DocumentScope::parse(&row.get::<_, String>(2)?)
            .unwrap_or(DocumentScope::Organization),
        is_global: row.get(3)?,
        uploaded_by: row.get(4)?,
        document_type: row.get(5)?,
        source: row.get(6)?,
        title: row.get(7)?,
        file_name: row.get(8)?,
        file_size: row.get::<_, i64>(9)? as u64,
        mime_type: row.get(10)?,
        status: DocumentStatus::parse(&row.get::<_, String>(11)?)
            .unwrap_or(DocumentStatus::Pending),
        upload_date: ts(12, &row.get::<_, String>(12)?)?,
        processed_date: opt_ts(13, row.get(13)?)?,
        processing_metadata: opt_json(row.get(14)?),
    })
}

const DOCUMENT_COLUMNS: &str = "id, organization_id, scope, is_global, uploaded_by, \
     document_type, source, title, file_name, file_size, mime_type, status, \
     upload_date, processed_date, processing_metadata";

fn map_chunk(row: &Row<'_>) -> rusqlite::Result<DocumentChunk> {
    let embedding: Option<Vec<u8>> = row.get(4)?;
    Ok(DocumentChunk {
        id: Some(row.get(0)?),
        document_id: row.get(1)?,
        chunk_index: row.get::<_, i64>(2)? as usize,
        content: row.get(3)?,
        embedding: embedding.map(|b| blob_to_embedding(&b)).unwrap_or_default(),
        control_ids: json(5, &row.get::<_, String>(5)?)?,
        doc_type: DocType::parse(&row.get::<_, String>(6)?),
        section_title: row.get(7)?,
        page_start: row.get::<_, i64>(8)? as u32,
        page_end: row.get::<_, i64>(9)? as u32,
        page_anchor: row.get::<_, i64>(10)? as u32,
        metadata: json(11, &row.get::<_, String>(11)?)?,
    })
}

const CHUNK_COLUMNS: &str = "id, document_id, chunk_index, content, embedding, control_ids, \
     doc_type, section_title, page_start, page_end, page_anchor, chunk_metadata";

fn map_assessment(row: &Row<'_>) -> rusqlite::Result<Assessment> {
    let level: String = row.get(3)?;
    Ok(Assessment {
        id: Some(row.get(0)?),
        organization_id: row.get(1)?,
        version_id: row.get(2)?,
        security_level: SecurityLevel::parse(&level).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e))
        })?,
        title: row.get(4)?,
        status: AssessmentStatus::parse(&row.get::<_, String>(5)?)
            .unwrap_or(AssessmentStatus::Draft),
        total_controls: row.get::<_, i64>(6)? as u32,
        answered_controls: row.get::<_, i64>(7)? as u32,
        mandatory_controls: row.get::<_, i64>(8)? as u32,
        mandatory_answered: row.get::<_, i64>(9)? as u32,
        compliance_percentage: opt_dec(10, row.get(10)?)?,
        compliance_status: row
            .get::<_, Option<String>>(11)?
            .and_then(|s| ComplianceStatus::parse(&s)),
        created_at: ts(12, &row.get::<_, String>(12)?)?,
        started_at: opt_ts(13, row.get(13)?)?,
        completed_at: opt_ts(14, row.get(14)?)?,
    })
}

const ASSESSMENT_COLUMNS: &str = "id, organization_id, version_id, security_level, title, \
     status, total_controls, answered_controls, mandatory_controls, mandatory_answered, \
     compliance_percentage, compliance_status, created_at, started_at, completed_at";

fn map_answer(row: &Row<'_>) -> rusqlite::Result<AssessmentAnswer> {
    Ok(AssessmentAnswer {
        id: Some(row.get(0)?),
        assessment_id: row.get(1)?,
        control_id: row.get(2)?,
        submeasure_id: row.get(3)?,
        documentation_score: row.get::<_, Option<i64>>(4)?.map(|v| v as u8),
        implementation_score: row.get::<_, Option<i64>>(5)?.map(|v| v as u8),
        comments: row.get(6)?,
        evidence_files: json(7, &row.get::<_, String>(7)?)?,
        answered_by: row.get(8)?,
        ip_address: row.get(9)?,
        user_agent: row.get(10)?,
        answered_at: ts(11, &row.get::<_, String>(11)?)?,
    })
}

const ANSWER_COLUMNS: &str = "id, assessment_id, control_id, submeasure_id, \
     documentation_score, implementation_score, comments, evidence_files, answered_by, \
     ip_address, user_agent, answered_at";

impl SqliteStore {
    /// Opens or creates a `SQLite` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Database(e.to_string()))?;
        }

        let conn = Connection::open(&path).map_err(StorageError::from)?;

        conn.execute("PRAGMA foreign_keys = ON;", [])
            .map_err(StorageError::from)?;

        // WAL mode for concurrent readers (returns a row, use query_row)
        let _: String = conn
            .query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))
            .map_err(StorageError::from)?;

        Ok(Self {
            conn,
            path: Some(path),
        })
    }

    /// Creates an in-memory database. Useful for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(StorageError::from)?;
        conn.execute("PRAGMA foreign_keys = ON;", [])
            .map_err(StorageError::from)?;

        Ok(Self { conn, path: None })
    }

    /// Returns the database path (None for in-memory).
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn get_schema_version(&self) -> Result<Option<u32>> {
        let version: Option<String> = self
            .conn
            .query_row(GET_VERSION_SQL, [], |row| row.get(0))
            .optional()
            .map_err(StorageError::from)?;

        Ok(version.and_then(|v| v.parse().ok()))
    }

    fn set_schema_version(&self, version: u32) -> Result<()> {
        self.conn
            .execute(SET_VERSION_SQL, params![version.to_string()])
            .map_err(StorageError::from)?;
        Ok(())
    }

    fn count(&self, sql: &str) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row(sql, [], |row| row.get(0))
            .map_err(StorageError::from)?;
        Ok(count as usize)
    }

    // ==================== Retrieval reads ====================

    /// Chunks carrying the given control ID, visible to the organization,
    /// ordered by page anchor. Applies the tenancy predicate.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn search_chunks_by_control(
        &self,
        organization_id: i64,
        control_id: &str,
        limit: usize,
    ) -> Result<Vec<ChunkRecord>> {
        let needle = format!("%\"{control_id}\"%");
        let sql = format!(
            "SELECT {cols}, pd.title FROM document_chunks dc \
             JOIN processed_documents pd ON pd.id = dc.document_id \
             WHERE (pd.organization_id = ?1 OR pd.is_global = 1) \
               AND dc.control_ids LIKE ?2 \
             ORDER BY dc.page_anchor ASC, dc.id ASC LIMIT ?3",
            cols = CHUNK_COLUMNS
                .split(", ")
                .map(|c| format!("dc.{c}"))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let mut stmt = self.conn.prepare(&sql).map_err(StorageError::from)?;
        let rows = stmt
            .query_map(params![organization_id, needle, limit as i64], |row| {
                Ok(ChunkRecord {
                    chunk: map_chunk(row)?,
                    doc_title: row.get(12)?,
                })
            })
            .map_err(StorageError::from)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StorageError::from)?;

        // The LIKE needle can match a superset (substring IDs are excluded
        // by the quoted form, but keep the exact check authoritative)
        Ok(rows
            .into_iter()
            .filter(|r| r.chunk.has_control(control_id))
            .collect())
    }

    /// Ranked full-text search over chunk content, visible to the
    /// organization. Returns records with their BM25-derived score
    /// (higher is better).
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn search_chunks_fulltext(
        &self,
        organization_id: i64,
        query: &str,
        limit: usize,
    ) -> Result<Vec<(ChunkRecord, f64)>> {
        let Some(match_expr) = fts_query(query) else {
            return Ok(Vec::new());
        };

        let sql = format!(
            "SELECT {cols}, pd.title, bm25(chunks_fts) AS rank \
             FROM chunks_fts \
             JOIN document_chunks dc ON dc.id = chunks_fts.rowid \
             JOIN processed_documents pd ON pd.id = dc.document_id \
             WHERE chunks_fts MATCH ?2 AND (pd.organization_id = ?1 OR pd.is_global = 1) \
             ORDER BY rank ASC LIMIT ?3",
            cols = CHUNK_COLUMNS
                .split(", ")
                .map(|c| format!("dc.{c}"))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let mut stmt = self.conn.prepare(&sql).map_err(StorageError::from)?;
        let rows = stmt
            .query_map(params![organization_id, match_expr, limit as i64], |row| {
                let record = ChunkRecord {
                    chunk: map_chunk(row)?,
                    doc_title: row.get(12)?,
                };
                let rank: f64 = row.get(13)?;
                // bm25() returns lower-is-better; negate for a score
                Ok((record, -rank))
            })
            .map_err(StorageError::from)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StorageError::from)?;
        Ok(rows)
    }

    /// Embedded chunk candidates visible to the organization:
    /// `(chunk_id, doc_type, embedding)`, optionally filtered by doc type.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn scoped_embeddings(
        &self,
        organization_id: i64,
        doc_type_filter: Option<DocType>,
    ) -> Result<Vec<(i64, DocType, Vec<f32>)>> {
        let mut sql = "SELECT dc.id, dc.doc_type, dc.embedding \
             FROM document_chunks dc \
             JOIN processed_documents pd ON pd.id = dc.document_id \
             WHERE (pd.organization_id = ?1 OR pd.is_global = 1) \
               AND dc.embedding IS NOT NULL"
            .to_string();
        if doc_type_filter.is_some() {
            sql.push_str(" AND dc.doc_type = ?2");
        }

        let mut stmt = self.conn.prepare(&sql).map_err(StorageError::from)?;
        let mapper = |row: &Row<'_>| -> rusqlite::Result<(i64, DocType, Vec<f32>)> {
            let blob: Vec<u8> = row.get(2)?;
            Ok((
                row.get(0)?,
                DocType::parse(&row.get::<_, String>(1)?),
                blob_to_embedding(&blob),
            ))
        };
        let rows = if let Some(filter) = doc_type_filter {
            stmt.query_map(params![organization_id, filter.as_str()], mapper)
                .map_err(StorageError::from)?
                .collect::<rusqlite::Result<Vec<_>>>()
        } else {
            stmt.query_map(params![organization_id], mapper)
                .map_err(StorageError::from)?
                .collect::<rusqlite::Result<Vec<_>>>()
        }
        .map_err(StorageError::from)?;
        Ok(rows)
    }

    /// Fetches chunks with document titles by id, preserving input order.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn chunks_with_titles(&self, ids: &[i64]) -> Result<Vec<ChunkRecord>> {
        let mut out = Vec::with_capacity(ids.len());
        let sql = format!(
            "SELECT {cols}, pd.title FROM document_chunks dc \
             JOIN processed_documents pd ON pd.id = dc.document_id WHERE dc.id = ?1",
            cols = CHUNK_COLUMNS
                .split(", ")
                .map(|c| format!("dc.{c}"))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let mut stmt = self.conn.prepare(&sql).map_err(StorageError::from)?;
        for id in ids {
            let record = stmt
                .query_row(params![id], |row| {
                    Ok(ChunkRecord {
                        chunk: map_chunk(row)?,
                        doc_title: row.get(12)?,
                    })
                })
                .optional()
                .map_err(StorageError::from)?;
            if let Some(record) = record {
                out.push(record);
            }
        }
        Ok(out)
    }

    // ==================== Score persistence ====================

    fn upsert_submeasure_score_tx(
        tx: &rusqlite::Transaction<'_>,
        assessment_id: i64,
        s: &SubmeasureCompliance,
    ) -> Result<()> {
        tx.execute(
            "INSERT INTO submeasure_scores (
                assessment_id, submeasure_id, documentation_avg, implementation_avg,
                overall_score, passes_individual, passes_average, passes_overall,
                total_controls, answered_controls, mandatory_controls, mandatory_answered,
                failed_controls, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(assessment_id, submeasure_id) DO UPDATE SET
                documentation_avg = excluded.documentation_avg,
                implementation_avg = excluded.implementation_avg,
                overall_score = excluded.overall_score,
                passes_individual = excluded.passes_individual,
                passes_average = excluded.passes_average,
                passes_overall = excluded.passes_overall,
                total_controls = excluded.total_controls,
                answered_controls = excluded.answered_controls,
                mandatory_controls = excluded.mandatory_controls,
                mandatory_answered = excluded.mandatory_answered,
                failed_controls = excluded.failed_controls,
                updated_at = excluded.updated_at",
            params![
                assessment_id,
                s.submeasure_id,
                s.documentation_avg.map(|d| d.to_string()),
                s.implementation_avg.map(|d| d.to_string()),
                s.overall_score.map(|d| d.to_string()),
                s.passes_individual,
                s.passes_average,
                s.passes_overall,
                s.total_controls,
                s.answered_controls,
                s.mandatory_controls,
                s.mandatory_answered,
                serde_json::to_string(&s.failed_controls)
                    .map_err(StorageError::from)?,
                now_str(),
            ],
        )
        .map_err(StorageError::from)?;
        Ok(())
    }

    fn upsert_measure_score_tx(
        tx: &rusqlite::Transaction<'_>,
        assessment_id: i64,
        m: &MeasureCompliance,
    ) -> Result<()> {
        tx.execute(
            "INSERT INTO measure_scores (
                assessment_id, measure_id, documentation_avg, implementation_avg,
                overall_score, passes_compliance, total_submeasures, passed_submeasures,
                critical_failures, total_controls, answered_controls,
                mandatory_controls, mandatory_answered, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(assessment_id, measure_id) DO UPDATE SET
                documentation_avg = excluded.documentation_avg,
                implementation_avg = excluded.implementation_avg,
                overall_score = excluded.overall_score,
                passes_compliance = excluded.passes_compliance,
                total_submeasures = excluded.total_submeasures,
                passed_submeasures = excluded.passed_submeasures,
                critical_failures = excluded.critical_failures,
                total_controls = excluded.total_controls,
                answered_controls = excluded.answered_controls,
                mandatory_controls = excluded.mandatory_controls,
                mandatory_answered = excluded.mandatory_answered,
                updated_at = excluded.updated_at",
            params![
                assessment_id,
                m.measure_id,
                m.documentation_avg.map(|d| d.to_string()),
                m.implementation_avg.map(|d| d.to_string()),
                m.overall_score.map(|d| d.to_string()),
                m.passes_compliance,
                m.total_submeasures,
                m.passed_submeasures,
                serde_json::to_string(&m.critical_failures)
                    .map_err(StorageError::from)?,
                m.counts.total_controls,
                m.counts.answered_controls,
                m.counts.mandatory_controls,
                m.counts.mandatory_answered,
                now_str(),
            ],
        )
        .map_err(StorageError::from)?;
        Ok(())
    }

    /// Persists all three score layers of a full computation atomically.
    ///
    /// # Errors
    ///
    /// Returns an error when the transaction fails; no partial persistence.
    pub fn persist_compliance(&mut self, compliance: &OverallCompliance) -> Result<()> {
        let detailed = serde_json::to_string(&detailed_results_json(compliance))
            .map_err(StorageError::from)?;
        let tx = self
            .conn
            .transaction()
            .map_err(|e| StorageError::Transaction(e.to_string()))?;

        for measure in &compliance.measures {
            for submeasure in &measure.submeasures {
                if submeasure.overall_score.is_some() {
                    Self::upsert_submeasure_score_tx(&tx, compliance.assessment_id, submeasure)?;
                }
            }
            if measure.overall_score.is_some() {
                Self::upsert_measure_score_tx(&tx, compliance.assessment_id, measure)?;
            }
        }

        tx.execute(
            "INSERT INTO compliance_scores (
                assessment_id, overall_score, compliance_percentage, passes_compliance,
                total_measures, passed_measures, maturity_score, maturity_threshold,
                meets_maturity_trend, security_level, individual_threshold,
                average_threshold, detailed_results, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(assessment_id) DO UPDATE SET
                overall_score = excluded.overall_score,
                compliance_percentage = excluded.compliance_percentage,
                passes_compliance = excluded.passes_compliance,
                total_measures = excluded.total_measures,
                passed_measures = excluded.passed_measures,
                maturity_score = excluded.maturity_score,
                maturity_threshold = excluded.maturity_threshold,
                meets_maturity_trend = excluded.meets_maturity_trend,
                security_level = excluded.security_level,
                individual_threshold = excluded.individual_threshold,
                average_threshold = excluded.average_threshold,
                detailed_results = excluded.detailed_results,
                updated_at = excluded.updated_at",
            params![
                compliance.assessment_id,
                compliance.overall_score.map(|d| d.to_string()),
                compliance.compliance_percentage.to_string(),
                compliance.passes_compliance,
                compliance.total_measures,
                compliance.passed_measures,
                compliance.maturity_score,
                compliance.maturity_threshold,
                compliance.meets_maturity_trend,
                compliance.security_level.as_str(),
                compliance.individual_threshold.to_string(),
                compliance.average_threshold.to_string(),
                detailed,
                now_str(),
            ],
        )
        .map_err(StorageError::from)?;

        tx.commit()
            .map_err(|e| StorageError::Transaction(e.to_string()))?;
        Ok(())
    }

    /// Persists one recomputed measure branch (its submeasure rows plus the
    /// measure row) atomically.
    ///
    /// # Errors
    ///
    /// Returns an error when the transaction fails.
    pub fn persist_measure_branch(
        &mut self,
        assessment_id: i64,
        measure: &MeasureCompliance,
    ) -> Result<()> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| StorageError::Transaction(e.to_string()))?;
        for submeasure in &measure.submeasures {
            if submeasure.overall_score.is_some() {
                Self::upsert_submeasure_score_tx(&tx, assessment_id, submeasure)?;
            }
        }
        if measure.overall_score.is_some() {
            Self::upsert_measure_score_tx(&tx, assessment_id, measure)?;
        }
        tx.commit()
            .map_err(|e| StorageError::Transaction(e.to_string()))?;
        Ok(())
    }

    /// Persists the incremental overall summary (leaves `detailed_results`
    /// from the last full computation untouched).
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn persist_overall_summary(
        &mut self,
        assessment: &Assessment,
        summary: &OverallSummary,
    ) -> Result<()> {
        let thresholds = crate::scoring::thresholds_for(assessment.security_level);
        self.conn
            .execute(
                "INSERT INTO compliance_scores (
                    assessment_id, overall_score, compliance_percentage, passes_compliance,
                    total_measures, passed_measures, maturity_score, maturity_threshold,
                    meets_maturity_trend, security_level, individual_threshold,
                    average_threshold, detailed_results, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, NULL, ?13)
                 ON CONFLICT(assessment_id) DO UPDATE SET
                    overall_score = excluded.overall_score,
                    compliance_percentage = excluded.compliance_percentage,
                    passes_compliance = excluded.passes_compliance,
                    total_measures = excluded.total_measures,
                    passed_measures = excluded.passed_measures,
                    maturity_score = excluded.maturity_score,
                    maturity_threshold = excluded.maturity_threshold,
                    meets_maturity_trend = excluded.meets_maturity_trend,
                    updated_at = excluded.updated_at",
                params![
                    assessment.id,
                    summary.overall_score.map(|d| d.to_string()),
                    summary.compliance_percentage.to_string(),
                    summary.passes_compliance,
                    summary.total_measures,
                    summary.passed_measures,
                    summary.maturity_score,
                    summary.maturity_threshold,
                    summary.meets_maturity_trend,
                    assessment.security_level.as_str(),
                    thresholds.individual.to_string(),
                    thresholds.average.to_string(),
                    now_str(),
                ],
            )
            .map_err(StorageError::from)?;
        Ok(())
    }

    /// Checks whether linking `predecessor -> successor` would close a
    /// cycle, i.e. whether the chain starting at `successor` already
    /// reaches `predecessor`.
    fn would_cycle(&self, predecessor: i64, successor: i64) -> Result<bool> {
        let mut current = Some(successor);
        // The chain is finite; a bound guards against corrupted data
        for _ in 0..10_000 {
            let Some(id) = current else {
                return Ok(false);
            };
            if id == predecessor {
                return Ok(true);
            }
            current = self
                .conn
                .query_row(
                    "SELECT superseded_by_id FROM recommendations WHERE id = ?1",
                    params![id],
                    |row| row.get::<_, Option<i64>>(0),
                )
                .optional()
                .map_err(StorageError::from)?
                .flatten();
        }
        Ok(true)
    }
}

impl Store for SqliteStore {
    fn init(&mut self) -> Result<()> {
        let is_init: i64 = self
            .conn
            .query_row(CHECK_SCHEMA_SQL, [], |row| row.get(0))
            .map_err(StorageError::from)?;

        if is_init == 0 {
            self.conn
                .execute_batch(SCHEMA_SQL)
                .map_err(StorageError::from)?;
            self.set_schema_version(CURRENT_SCHEMA_VERSION)?;
        } else if let Some(current) = self.get_schema_version()?
            && current < CURRENT_SCHEMA_VERSION
        {
            let migrations = crate::storage::schema::get_migrations_from(current);
            for migration in migrations {
                self.conn
                    .execute_batch(migration.sql)
                    .map_err(|e| StorageError::Migration(e.to_string()))?;
            }
            self.set_schema_version(CURRENT_SCHEMA_VERSION)?;
        }

        Ok(())
    }

    fn is_initialized(&self) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row(CHECK_SCHEMA_SQL, [], |row| row.get(0))
            .map_err(StorageError::from)?;
        Ok(count > 0)
    }

    fn reset(&mut self) -> Result<()> {
        self.conn
            .execute_batch(
                r"
            DELETE FROM recommendations;
            DELETE FROM assessment_insights;
            DELETE FROM audit_logs;
            DELETE FROM compliance_scores;
            DELETE FROM measure_scores;
            DELETE FROM submeasure_scores;
            DELETE FROM assessment_answers;
            DELETE FROM assessments;
            DELETE FROM document_chunks;
            DELETE FROM processed_documents;
            DELETE FROM control_requirements;
            DELETE FROM control_submeasure_mappings;
            DELETE FROM controls;
            DELETE FROM submeasures;
            DELETE FROM measures;
            DELETE FROM questionnaire_versions;
            DELETE FROM organizations;
        ",
            )
            .map_err(StorageError::from)?;
        Ok(())
    }

    fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            organization_count: self.count("SELECT COUNT(*) FROM organizations")?,
            document_count: self.count("SELECT COUNT(*) FROM processed_documents")?,
            chunk_count: self.count("SELECT COUNT(*) FROM document_chunks")?,
            assessment_count: self.count("SELECT COUNT(*) FROM assessments")?,
            answer_count: self.count("SELECT COUNT(*) FROM assessment_answers")?,
            audit_count: self.count("SELECT COUNT(*) FROM audit_logs")?,
            schema_version: self.get_schema_version()?.unwrap_or(0),
            db_size: self
                .path
                .as_ref()
                .and_then(|p| std::fs::metadata(p).ok())
                .map(|m| m.len()),
        })
    }

    // ==================== Organizations ====================

    fn upsert_organization(&mut self, code: &str, name: &str) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO organizations (code, name, active, created_at)
                 VALUES (?1, ?2, 1, ?3)
                 ON CONFLICT(code) DO UPDATE SET name = excluded.name",
                params![code, name, now_str()],
            )
            .map_err(StorageError::from)?;
        let id: i64 = self
            .conn
            .query_row(
                "SELECT id FROM organizations WHERE code = ?1",
                params![code],
                |row| row.get(0),
            )
            .map_err(StorageError::from)?;
        Ok(id)
    }

    fn organization_id(&self, code: &str) -> Result<Option<i64>> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM organizations WHERE code = ?1",
                params![code],
                |row| row.get(0),
            )
            .optional()
            .map_err(StorageError::from)?;
        Ok(id)
    }

    // ==================== Questionnaire catalog ====================

    fn insert_version(&mut self, version: &QuestionnaireVersion) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO questionnaire_versions (content_hash, description, is_active, imported_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    version.content_hash,
                    version.description,
                    version.is_active,
                    version.imported_at.to_rfc3339(),
                ],
            )
            .map_err(StorageError::from)?;
        Ok(self.conn.last_insert_rowid())
    }

    fn find_version_by_hash(&self, content_hash: &str) -> Result<Option<QuestionnaireVersion>> {
        let version = self
            .conn
            .query_row(
                "SELECT id, content_hash, description, is_active, imported_at
                 FROM questionnaire_versions WHERE content_hash = ?1
                 ORDER BY id DESC LIMIT 1",
                params![content_hash],
                |row| {
                    Ok(QuestionnaireVersion {
                        id: Some(row.get(0)?),
                        content_hash: row.get(1)?,
                        description: row.get(2)?,
                        is_active: row.get(3)?,
                        imported_at: ts(4, &row.get::<_, String>(4)?)?,
                    })
                },
            )
            .optional()
            .map_err(StorageError::from)?;
        Ok(version)
    }

    fn active_version(&self) -> Result<Option<QuestionnaireVersion>> {
        let version = self
            .conn
            .query_row(
                "SELECT id, content_hash, description, is_active, imported_at
                 FROM questionnaire_versions WHERE is_active = 1",
                [],
                |row| {
                    Ok(QuestionnaireVersion {
                        id: Some(row.get(0)?),
                        content_hash: row.get(1)?,
                        description: row.get(2)?,
                        is_active: row.get(3)?,
                        imported_at: ts(4, &row.get::<_, String>(4)?)?,
                    })
                },
            )
            .optional()
            .map_err(StorageError::from)?;
        Ok(version)
    }

    fn activate_version(&mut self, version_id: i64) -> Result<()> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| StorageError::Transaction(e.to_string()))?;
        tx.execute("UPDATE questionnaire_versions SET is_active = 0", [])
            .map_err(StorageError::from)?;
        tx.execute(
            "UPDATE questionnaire_versions SET is_active = 1 WHERE id = ?1",
            params![version_id],
        )
        .map_err(StorageError::from)?;
        tx.commit()
            .map_err(|e| StorageError::Transaction(e.to_string()))?;
        Ok(())
    }

    fn insert_measure(&mut self, measure: &Measure) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO measures (version_id, code, title, order_index)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    measure.version_id,
                    measure.code,
                    measure.title,
                    measure.order_index
                ],
            )
            .map_err(StorageError::from)?;
        Ok(self.conn.last_insert_rowid())
    }

    fn insert_submeasure(&mut self, submeasure: &Submeasure) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO submeasures (measure_id, code, title, order_index)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    submeasure.measure_id,
                    submeasure.code,
                    submeasure.title,
                    submeasure.order_index
                ],
            )
            .map_err(StorageError::from)?;
        Ok(self.conn.last_insert_rowid())
    }

    fn upsert_control(&mut self, control: &Control) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO controls (code, title, description)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(code) DO UPDATE SET
                    title = excluded.title,
                    description = COALESCE(excluded.description, description)",
                params![control.code, control.title, control.description],
            )
            .map_err(StorageError::from)?;
        let id: i64 = self
            .conn
            .query_row(
                "SELECT id FROM controls WHERE code = ?1",
                params![control.code],
                |row| row.get(0),
            )
            .map_err(StorageError::from)?;
        Ok(id)
    }

    fn insert_mapping(&mut self, mapping: &ControlSubmeasureMapping) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO control_submeasure_mappings
                    (control_id, submeasure_id, order_index)
                 VALUES (?1, ?2, ?3)",
                params![
                    mapping.control_id,
                    mapping.submeasure_id,
                    mapping.order_index
                ],
            )
            .map_err(StorageError::from)?;
        Ok(())
    }

    fn upsert_requirement(&mut self, requirement: &ControlRequirement) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO control_requirements
                    (control_id, submeasure_id, level, is_mandatory, is_applicable, minimum_score)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    requirement.control_id,
                    requirement.submeasure_id,
                    requirement.level.as_str(),
                    requirement.is_mandatory,
                    requirement.is_applicable,
                    requirement.minimum_score.map(|d| d.to_string()),
                ],
            )
            .map_err(StorageError::from)?;
        Ok(())
    }

    fn measures_for_version(&self, version_id: i64) -> Result<Vec<Measure>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, version_id, code, title, order_index FROM measures
                 WHERE version_id = ?1 ORDER BY order_index, id",
            )
            .map_err(StorageError::from)?;
        let measures = stmt
            .query_map(params![version_id], |row| {
                Ok(Measure {
                    id: Some(row.get(0)?),
                    version_id: row.get(1)?,
                    code: row.get(2)?,
                    title: row.get(3)?,
                    order_index: row.get::<_, i64>(4)? as u32,
                })
            })
            .map_err(StorageError::from)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StorageError::from)?;
        Ok(measures)
    }

    fn submeasures_for_measure(&self, measure_id: i64) -> Result<Vec<Submeasure>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, measure_id, code, title, order_index FROM submeasures
                 WHERE measure_id = ?1 ORDER BY order_index, id",
            )
            .map_err(StorageError::from)?;
        let submeasures = stmt
            .query_map(params![measure_id], |row| {
                Ok(Submeasure {
                    id: Some(row.get(0)?),
                    measure_id: row.get(1)?,
                    code: row.get(2)?,
                    title: row.get(3)?,
                    order_index: row.get::<_, i64>(4)? as u32,
                })
            })
            .map_err(StorageError::from)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StorageError::from)?;
        Ok(submeasures)
    }

    fn controls_for_submeasure(&self, submeasure_id: i64) -> Result<Vec<Control>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT c.id, c.code, c.title, c.description
                 FROM controls c
                 JOIN control_submeasure_mappings m ON m.control_id = c.id
                 WHERE m.submeasure_id = ?1
                 ORDER BY m.order_index, c.code",
            )
            .map_err(StorageError::from)?;
        let controls = stmt
            .query_map(params![submeasure_id], |row| {
                Ok(Control {
                    id: Some(row.get(0)?),
                    code: row.get(1)?,
                    title: row.get(2)?,
                    description: row.get(3)?,
                })
            })
            .map_err(StorageError::from)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StorageError::from)?;
        Ok(controls)
    }

    fn control_by_code(&self, code: &str) -> Result<Option<Control>> {
        let control = self
            .conn
            .query_row(
                "SELECT id, code, title, description FROM controls WHERE code = ?1",
                params![code],
                |row| {
                    Ok(Control {
                        id: Some(row.get(0)?),
                        code: row.get(1)?,
                        title: row.get(2)?,
                        description: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(StorageError::from)?;
        Ok(control)
    }

    fn get_measure(&self, id: i64) -> Result<Measure> {
        self.conn
            .query_row(
                "SELECT id, version_id, code, title, order_index FROM measures WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Measure {
                        id: Some(row.get(0)?),
                        version_id: row.get(1)?,
                        code: row.get(2)?,
                        title: row.get(3)?,
                        order_index: row.get::<_, i64>(4)? as u32,
                    })
                },
            )
            .optional()
            .map_err(StorageError::from)?
            .ok_or_else(|| {
                Error::Storage(StorageError::CatalogNotFound {
                    entity: "measure",
                    identifier: id.to_string(),
                })
            })
    }

    fn get_submeasure(&self, id: i64) -> Result<Submeasure> {
        self.conn
            .query_row(
                "SELECT id, measure_id, code, title, order_index FROM submeasures WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Submeasure {
                        id: Some(row.get(0)?),
                        measure_id: row.get(1)?,
                        code: row.get(2)?,
                        title: row.get(3)?,
                        order_index: row.get::<_, i64>(4)? as u32,
                    })
                },
            )
            .optional()
            .map_err(StorageError::from)?
            .ok_or_else(|| {
                Error::Storage(StorageError::CatalogNotFound {
                    entity: "submeasure",
                    identifier: id.to_string(),
                })
            })
    }

    fn requirement_for(
        &self,
        control_id: i64,
        submeasure_id: i64,
        level: SecurityLevel,
    ) -> Result<Option<ControlRequirement>> {
        let requirement = self
            .conn
            .query_row(
                "SELECT control_id, submeasure_id, level, is_mandatory, is_applicable, minimum_score
                 FROM control_requirements
                 WHERE control_id = ?1 AND submeasure_id = ?2 AND level = ?3",
                params![control_id, submeasure_id, level.as_str()],
                |row| {
                    Ok(ControlRequirement {
                        control_id: row.get(0)?,
                        submeasure_id: row.get(1)?,
                        level,
                        is_mandatory: row.get(3)?,
                        is_applicable: row.get(4)?,
                        minimum_score: opt_dec(5, row.get(5)?)?,
                    })
                },
            )
            .optional()
            .map_err(StorageError::from)?;
        Ok(requirement)
    }

    fn mapping_exists(&self, control_id: i64, submeasure_id: i64) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM control_submeasure_mappings
                 WHERE control_id = ?1 AND submeasure_id = ?2",
                params![control_id, submeasure_id],
                |row| row.get(0),
            )
            .map_err(StorageError::from)?;
        Ok(count > 0)
    }

    fn count_measures(&self, version_id: i64) -> Result<u32> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM measures WHERE version_id = ?1",
                params![version_id],
                |row| row.get(0),
            )
            .map_err(StorageError::from)?;
        Ok(count as u32)
    }

    // ==================== Documents & chunks ====================

    fn add_document(&mut self, document: &ProcessedDocument) -> Result<i64> {
        document.validate_scope()?;
        self.conn
            .execute(
                "INSERT INTO processed_documents (
                    organization_id, scope, is_global, uploaded_by, document_type, source,
                    title, file_name, file_size, mime_type, status, upload_date,
                    processed_date, processing_metadata
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    document.organization_id,
                    document.scope.as_str(),
                    document.is_global,
                    document.uploaded_by,
                    document.document_type,
                    document.source,
                    document.title,
                    document.file_name,
                    document.file_size as i64,
                    document.mime_type,
                    document.status.as_str(),
                    document.upload_date.to_rfc3339(),
                    document.processed_date.map(|d| d.to_rfc3339()),
                    document
                        .processing_metadata
                        .as_ref()
                        .map(|m| m.to_string()),
                ],
            )
            .map_err(StorageError::from)?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_document(&self, id: i64) -> Result<ProcessedDocument> {
        self.conn
            .query_row(
                &format!("SELECT {DOCUMENT_COLUMNS} FROM processed_documents WHERE id = ?1"),
                params![id],
                map_document,
            )
            .optional()
            .map_err(StorageError::from)?
            .ok_or_else(|| Error::Storage(StorageError::DocumentNotFound { id }))
    }

    fn list_documents(&self, organization_id: Option<i64>) -> Result<Vec<ProcessedDocument>> {
        let sql = format!(
            "SELECT {DOCUMENT_COLUMNS} FROM processed_documents
             WHERE (?1 IS NULL AND is_global = 1)
                OR (?1 IS NOT NULL AND (organization_id = ?1 OR is_global = 1))
             ORDER BY id"
        );
        let mut stmt = self.conn.prepare(&sql).map_err(StorageError::from)?;
        let documents = stmt
            .query_map(params![organization_id], map_document)
            .map_err(StorageError::from)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StorageError::from)?;
        Ok(documents)
    }

    fn update_document_status(
        &mut self,
        id: i64,
        status: DocumentStatus,
        metadata: Option<&serde_json::Value>,
    ) -> Result<()> {
        let processed = if status == DocumentStatus::Completed {
            Some(now_str())
        } else {
            None
        };
        let updated = self
            .conn
            .execute(
                "UPDATE processed_documents SET
                    status = ?2,
                    processed_date = COALESCE(?3, processed_date),
                    processing_metadata = COALESCE(?4, processing_metadata)
                 WHERE id = ?1",
                params![
                    id,
                    status.as_str(),
                    processed,
                    metadata.map(std::string::ToString::to_string)
                ],
            )
            .map_err(StorageError::from)?;
        if updated == 0 {
            return Err(StorageError::DocumentNotFound { id }.into());
        }
        Ok(())
    }

    fn delete_document(&mut self, id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM processed_documents WHERE id = ?1", params![id])
            .map_err(StorageError::from)?;
        Ok(())
    }

    fn replace_chunks(&mut self, document_id: i64, chunks: &[DocumentChunk]) -> Result<()> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| StorageError::Transaction(e.to_string()))?;

        tx.execute(
            "DELETE FROM document_chunks WHERE document_id = ?1",
            params![document_id],
        )
        .map_err(StorageError::from)?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO document_chunks (
                        document_id, chunk_index, content, embedding, control_ids, doc_type,
                        section_title, page_start, page_end, page_anchor, chunk_metadata,
                        created_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                )
                .map_err(StorageError::from)?;

            for chunk in chunks {
                let embedding = if chunk.embedding.is_empty() {
                    None
                } else {
                    Some(embedding_to_blob(&chunk.embedding))
                };
                stmt.execute(params![
                    document_id,
                    chunk.chunk_index as i64,
                    chunk.content,
                    embedding,
                    serde_json::to_string(&chunk.control_ids).map_err(StorageError::from)?,
                    chunk.doc_type.as_str(),
                    chunk.section_title,
                    chunk.page_start,
                    chunk.page_end,
                    chunk.page_anchor,
                    serde_json::to_string(&chunk.metadata).map_err(StorageError::from)?,
                    now_str(),
                ])
                .map_err(StorageError::from)?;
            }
        }

        tx.commit()
            .map_err(|e| StorageError::Transaction(e.to_string()))?;
        Ok(())
    }

    fn chunks_for_document(&self, document_id: i64) -> Result<Vec<DocumentChunk>> {
        let sql = format!(
            "SELECT {CHUNK_COLUMNS} FROM document_chunks
             WHERE document_id = ?1 ORDER BY chunk_index"
        );
        let mut stmt = self.conn.prepare(&sql).map_err(StorageError::from)?;
        let chunks = stmt
            .query_map(params![document_id], map_chunk)
            .map_err(StorageError::from)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StorageError::from)?;
        Ok(chunks)
    }

    fn get_chunk(&self, id: i64) -> Result<DocumentChunk> {
        self.conn
            .query_row(
                &format!("SELECT {CHUNK_COLUMNS} FROM document_chunks WHERE id = ?1"),
                params![id],
                map_chunk,
            )
            .optional()
            .map_err(StorageError::from)?
            .ok_or_else(|| Error::Storage(StorageError::ChunkNotFound { id }))
    }

    fn chunk_count(&self, document_id: i64) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM document_chunks WHERE document_id = ?1",
                params![document_id],
                |row| row.get(0),
            )
            .map_err(StorageError::from)?;
        Ok(count as usize)
    }

    // ==================== Assessments ====================

    fn add_assessment(&mut self, assessment: &Assessment) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO assessments (
                    organization_id, version_id, security_level, title, status,
                    total_controls, answered_controls, mandatory_controls, mandatory_answered,
                    compliance_percentage, compliance_status, created_at, started_at, completed_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    assessment.organization_id,
                    assessment.version_id,
                    assessment.security_level.as_str(),
                    assessment.title,
                    assessment.status.as_str(),
                    assessment.total_controls,
                    assessment.answered_controls,
                    assessment.mandatory_controls,
                    assessment.mandatory_answered,
                    assessment.compliance_percentage.map(|d| d.to_string()),
                    assessment.compliance_status.map(ComplianceStatus::as_str),
                    assessment.created_at.to_rfc3339(),
                    assessment.started_at.map(|d| d.to_rfc3339()),
                    assessment.completed_at.map(|d| d.to_rfc3339()),
                ],
            )
            .map_err(StorageError::from)?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_assessment(&self, id: i64) -> Result<Assessment> {
        self.conn
            .query_row(
                &format!("SELECT {ASSESSMENT_COLUMNS} FROM assessments WHERE id = ?1"),
                params![id],
                map_assessment,
            )
            .optional()
            .map_err(StorageError::from)?
            .ok_or_else(|| Error::Storage(StorageError::AssessmentNotFound { id }))
    }

    fn update_assessment_progress(&mut self, id: i64, counts: &ProgressCounts) -> Result<()> {
        self.conn
            .execute(
                "UPDATE assessments SET
                    total_controls = ?2,
                    answered_controls = ?3,
                    mandatory_controls = ?4,
                    mandatory_answered = ?5
                 WHERE id = ?1",
                params![
                    id,
                    counts.total_controls,
                    counts.answered_controls,
                    counts.mandatory_controls,
                    counts.mandatory_answered,
                ],
            )
            .map_err(StorageError::from)?;
        Ok(())
    }

    fn update_assessment_compliance(
        &mut self,
        id: i64,
        percentage: Decimal,
        status: Option<ComplianceStatus>,
    ) -> Result<()> {
        self.conn
            .execute(
                "UPDATE assessments SET
                    compliance_percentage = ?2,
                    compliance_status = ?3
                 WHERE id = ?1",
                params![
                    id,
                    percentage.to_string(),
                    status.map(ComplianceStatus::as_str)
                ],
            )
            .map_err(StorageError::from)?;
        Ok(())
    }

    fn update_assessment_status(&mut self, id: i64, status: AssessmentStatus) -> Result<()> {
        self.conn
            .execute(
                "UPDATE assessments SET
                    status = ?2,
                    started_at = CASE
                        WHEN ?2 = 'in_progress' AND started_at IS NULL THEN ?3
                        ELSE started_at END,
                    completed_at = CASE
                        WHEN ?2 = 'completed' THEN ?3
                        ELSE completed_at END
                 WHERE id = ?1",
                params![id, status.as_str(), now_str()],
            )
            .map_err(StorageError::from)?;
        Ok(())
    }

    // ==================== Answers ====================

    fn upsert_answer(&mut self, answer: &AssessmentAnswer) -> Result<AssessmentAnswer> {
        self.conn
            .execute(
                "INSERT INTO assessment_answers (
                    assessment_id, control_id, submeasure_id, documentation_score,
                    implementation_score, comments, evidence_files, answered_by,
                    ip_address, user_agent, answered_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(assessment_id, control_id, submeasure_id) DO UPDATE SET
                    documentation_score =
                        COALESCE(excluded.documentation_score, documentation_score),
                    implementation_score =
                        COALESCE(excluded.implementation_score, implementation_score),
                    comments = COALESCE(excluded.comments, comments),
                    evidence_files = CASE WHEN excluded.evidence_files = '[]'
                        THEN evidence_files ELSE excluded.evidence_files END,
                    answered_by = COALESCE(excluded.answered_by, answered_by),
                    ip_address = COALESCE(excluded.ip_address, ip_address),
                    user_agent = COALESCE(excluded.user_agent, user_agent),
                    answered_at = excluded.answered_at",
                params![
                    answer.assessment_id,
                    answer.control_id,
                    answer.submeasure_id,
                    answer.documentation_score,
                    answer.implementation_score,
                    answer.comments,
                    serde_json::to_string(&answer.evidence_files).map_err(StorageError::from)?,
                    answer.answered_by,
                    answer.ip_address,
                    answer.user_agent,
                    answer.answered_at.to_rfc3339(),
                ],
            )
            .map_err(StorageError::from)?;

        self.get_answer(answer.assessment_id, answer.control_id, answer.submeasure_id)?
            .ok_or_else(|| {
                Error::Storage(StorageError::Database(
                    "answer vanished after upsert".to_string(),
                ))
            })
    }

    fn get_answer(
        &self,
        assessment_id: i64,
        control_id: i64,
        submeasure_id: i64,
    ) -> Result<Option<AssessmentAnswer>> {
        let answer = self
            .conn
            .query_row(
                &format!(
                    "SELECT {ANSWER_COLUMNS} FROM assessment_answers
                     WHERE assessment_id = ?1 AND control_id = ?2 AND submeasure_id = ?3"
                ),
                params![assessment_id, control_id, submeasure_id],
                map_answer,
            )
            .optional()
            .map_err(StorageError::from)?;
        Ok(answer)
    }

    fn answers_for_assessment(&self, assessment_id: i64) -> Result<Vec<AssessmentAnswer>> {
        let sql = format!(
            "SELECT {ANSWER_COLUMNS} FROM assessment_answers
             WHERE assessment_id = ?1 ORDER BY id"
        );
        let mut stmt = self.conn.prepare(&sql).map_err(StorageError::from)?;
        let answers = stmt
            .query_map(params![assessment_id], map_answer)
            .map_err(StorageError::from)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StorageError::from)?;
        Ok(answers)
    }

    fn assessment_distinct_counts(&self, assessment_id: i64) -> Result<ProgressCounts> {
        let assessment = self.get_assessment(assessment_id)?;
        let level = assessment.security_level.as_str();
        let version_id = assessment.version_id;

        let scalar = |sql: &str, p: &[&dyn rusqlite::ToSql]| -> Result<u32> {
            let count: i64 = self
                .conn
                .query_row(sql, p, |row| row.get(0))
                .map_err(StorageError::from)?;
            Ok(count as u32)
        };

        let total_controls = scalar(
            "SELECT COUNT(DISTINCT cr.control_id)
             FROM control_requirements cr
             JOIN submeasures s ON s.id = cr.submeasure_id
             JOIN measures m ON m.id = s.measure_id
             WHERE m.version_id = ?1 AND cr.level = ?2 AND cr.is_applicable = 1",
            &[&version_id, &level],
        )?;

        let mandatory_controls = scalar(
            "SELECT COUNT(DISTINCT cr.control_id)
             FROM control_requirements cr
             JOIN submeasures s ON s.id = cr.submeasure_id
             JOIN measures m ON m.id = s.measure_id
             WHERE m.version_id = ?1 AND cr.level = ?2
               AND cr.is_applicable = 1 AND cr.is_mandatory = 1",
            &[&version_id, &level],
        )?;

        let answered_controls = scalar(
            "SELECT COUNT(DISTINCT aa.control_id)
             FROM assessment_answers aa
             JOIN control_requirements cr ON cr.control_id = aa.control_id
               AND cr.submeasure_id = aa.submeasure_id
               AND cr.level = ?2 AND cr.is_applicable = 1
             WHERE aa.assessment_id = ?1
               AND aa.documentation_score IS NOT NULL
               AND aa.implementation_score IS NOT NULL",
            &[&assessment_id, &level],
        )?;

        let mandatory_answered = scalar(
            "SELECT COUNT(DISTINCT aa.control_id)
             FROM assessment_answers aa
             JOIN control_requirements cr ON cr.control_id = aa.control_id
               AND cr.submeasure_id = aa.submeasure_id
               AND cr.level = ?2 AND cr.is_applicable = 1 AND cr.is_mandatory = 1
             WHERE aa.assessment_id = ?1
               AND aa.documentation_score IS NOT NULL
               AND aa.implementation_score IS NOT NULL",
            &[&assessment_id, &level],
        )?;

        Ok(ProgressCounts {
            total_controls,
            answered_controls,
            mandatory_controls,
            mandatory_answered,
        })
    }

    // ==================== Scores ====================

    fn measure_distinct_counts(
        &self,
        assessment_id: i64,
        measure_id: i64,
        level: SecurityLevel,
    ) -> Result<MeasureControlCounts> {
        let level = level.as_str();
        let scalar = |sql: &str, p: &[&dyn rusqlite::ToSql]| -> Result<u32> {
            let count: i64 = self
                .conn
                .query_row(sql, p, |row| row.get(0))
                .map_err(StorageError::from)?;
            Ok(count as u32)
        };

        let total_controls = scalar(
            "SELECT COUNT(DISTINCT cr.control_id)
             FROM control_requirements cr
             JOIN submeasures s ON s.id = cr.submeasure_id
             WHERE s.measure_id = ?1 AND cr.level = ?2 AND cr.is_applicable = 1",
            &[&measure_id, &level],
        )?;

        let mandatory_controls = scalar(
            "SELECT COUNT(DISTINCT cr.control_id)
             FROM control_requirements cr
             JOIN submeasures s ON s.id = cr.submeasure_id
             WHERE s.measure_id = ?1 AND cr.level = ?2
               AND cr.is_applicable = 1 AND cr.is_mandatory = 1",
            &[&measure_id, &level],
        )?;

        let answered_controls = scalar(
            "SELECT COUNT(DISTINCT aa.control_id)
             FROM assessment_answers aa
             JOIN submeasures s ON s.id = aa.submeasure_id
             JOIN control_requirements cr ON cr.control_id = aa.control_id
               AND cr.submeasure_id = aa.submeasure_id
               AND cr.level = ?3 AND cr.is_applicable = 1
             WHERE aa.assessment_id = ?1 AND s.measure_id = ?2
               AND aa.documentation_score IS NOT NULL
               AND aa.implementation_score IS NOT NULL",
            &[&assessment_id, &measure_id, &level],
        )?;

        let mandatory_answered = scalar(
            "SELECT COUNT(DISTINCT aa.control_id)
             FROM assessment_answers aa
             JOIN submeasures s ON s.id = aa.submeasure_id
             JOIN control_requirements cr ON cr.control_id = aa.control_id
               AND cr.submeasure_id = aa.submeasure_id
               AND cr.level = ?3 AND cr.is_applicable = 1 AND cr.is_mandatory = 1
             WHERE aa.assessment_id = ?1 AND s.measure_id = ?2
               AND aa.documentation_score IS NOT NULL
               AND aa.implementation_score IS NOT NULL",
            &[&assessment_id, &measure_id, &level],
        )?;

        Ok(MeasureControlCounts {
            total_controls,
            answered_controls,
            mandatory_controls,
            mandatory_answered,
        })
    }

    fn measure_score_summaries(&self, assessment_id: i64) -> Result<Vec<MeasureScoreSummary>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT measure_id, overall_score, passes_compliance, passed_submeasures,
                        answered_controls
                 FROM measure_scores WHERE assessment_id = ?1 ORDER BY measure_id",
            )
            .map_err(StorageError::from)?;
        let summaries = stmt
            .query_map(params![assessment_id], |row| {
                Ok(MeasureScoreSummary {
                    measure_id: row.get(0)?,
                    overall_score: opt_dec(1, row.get(1)?)?,
                    passes_compliance: row.get(2)?,
                    passed_submeasures: row.get::<_, i64>(3)? as u32,
                    answered_controls: row.get::<_, i64>(4)? as u32,
                })
            })
            .map_err(StorageError::from)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StorageError::from)?;
        Ok(summaries)
    }

    // ==================== Audit trail ====================

    fn append_audit(&mut self, log: &AuditLog) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO audit_logs (
                    assessment_id, user_id, action, entity_type, entity_id,
                    old_values, new_values, change_summary, ip_address, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    log.assessment_id,
                    log.user_id,
                    log.action.as_str(),
                    log.entity_type,
                    log.entity_id,
                    log.old_values.as_ref().map(ToString::to_string),
                    log.new_values.as_ref().map(ToString::to_string),
                    log.change_summary,
                    log.ip_address,
                    log.created_at.to_rfc3339(),
                ],
            )
            .map_err(StorageError::from)?;
        Ok(self.conn.last_insert_rowid())
    }

    fn audit_for_assessment(&self, assessment_id: i64) -> Result<Vec<AuditLog>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, assessment_id, user_id, action, entity_type, entity_id,
                        old_values, new_values, change_summary, ip_address, created_at
                 FROM audit_logs WHERE assessment_id = ?1 ORDER BY id",
            )
            .map_err(StorageError::from)?;
        let logs = stmt
            .query_map(params![assessment_id], |row| {
                let action: String = row.get(3)?;
                Ok(AuditLog {
                    id: Some(row.get(0)?),
                    assessment_id: row.get(1)?,
                    user_id: row.get(2)?,
                    action: match action.as_str() {
                        "created" => AuditAction::Created,
                        "status_changed" => AuditAction::StatusChanged,
                        "answer_written" => AuditAction::AnswerWritten,
                        "deleted" => AuditAction::Deleted,
                        "imported" => AuditAction::Imported,
                        _ => AuditAction::Updated,
                    },
                    entity_type: row.get(4)?,
                    entity_id: row.get(5)?,
                    old_values: opt_json(row.get(6)?),
                    new_values: opt_json(row.get(7)?),
                    change_summary: row.get(8)?,
                    ip_address: row.get(9)?,
                    created_at: ts(10, &row.get::<_, String>(10)?)?,
                })
            })
            .map_err(StorageError::from)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StorageError::from)?;
        Ok(logs)
    }

    // ==================== Insights ====================

    fn upsert_insights(&mut self, insights: &AssessmentInsights) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO assessment_insights
                    (assessment_id, gaps, roadmap, summary, stale, computed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(assessment_id) DO UPDATE SET
                    gaps = excluded.gaps,
                    roadmap = excluded.roadmap,
                    summary = excluded.summary,
                    stale = excluded.stale,
                    computed_at = excluded.computed_at",
                params![
                    insights.assessment_id,
                    insights.gaps.to_string(),
                    insights.roadmap.to_string(),
                    insights.summary,
                    insights.stale,
                    insights.computed_at.to_rfc3339(),
                ],
            )
            .map_err(StorageError::from)?;
        Ok(())
    }

    fn get_insights(&self, assessment_id: i64) -> Result<Option<AssessmentInsights>> {
        let insights = self
            .conn
            .query_row(
                "SELECT assessment_id, gaps, roadmap, summary, stale, computed_at
                 FROM assessment_insights WHERE assessment_id = ?1",
                params![assessment_id],
                |row| {
                    Ok(AssessmentInsights {
                        assessment_id: row.get(0)?,
                        gaps: json(1, &row.get::<_, String>(1)?)?,
                        roadmap: json(2, &row.get::<_, String>(2)?)?,
                        summary: row.get(3)?,
                        stale: row.get(4)?,
                        computed_at: ts(5, &row.get::<_, String>(5)?)?,
                    })
                },
            )
            .optional()
            .map_err(StorageError::from)?;
        Ok(insights)
    }

    fn mark_insights_stale(&mut self, assessment_id: i64) -> Result<()> {
        self.conn
            .execute(
                "UPDATE assessment_insights SET stale = 1 WHERE assessment_id = ?1",
                params![assessment_id],
            )
            .map_err(StorageError::from)?;
        Ok(())
    }

    // ==================== Recommendations ====================

    fn get_recommendation(&self, id: i64) -> Result<Option<Recommendation>> {
        let rec = self
            .conn
            .query_row(
                "SELECT id, assessment_id, control_id, content, is_active,
                        superseded_by_id, created_at
                 FROM recommendations WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Recommendation {
                        id: Some(row.get(0)?),
                        assessment_id: row.get(1)?,
                        control_id: row.get(2)?,
                        content: row.get(3)?,
                        is_active: row.get(4)?,
                        superseded_by_id: row.get(5)?,
                        created_at: ts(6, &row.get::<_, String>(6)?)?,
                    })
                },
            )
            .optional()
            .map_err(StorageError::from)?;
        Ok(rec)
    }

    fn active_recommendation(
        &self,
        assessment_id: i64,
        control_id: i64,
    ) -> Result<Option<Recommendation>> {
        let rec = self
            .conn
            .query_row(
                "SELECT id, assessment_id, control_id, content, is_active,
                        superseded_by_id, created_at
                 FROM recommendations
                 WHERE assessment_id = ?1 AND control_id = ?2 AND is_active = 1",
                params![assessment_id, control_id],
                |row| {
                    Ok(Recommendation {
                        id: Some(row.get(0)?),
                        assessment_id: row.get(1)?,
                        control_id: row.get(2)?,
                        content: row.get(3)?,
                        is_active: row.get(4)?,
                        superseded_by_id: row.get(5)?,
                        created_at: ts(6, &row.get::<_, String>(6)?)?,
                    })
                },
            )
            .optional()
            .map_err(StorageError::from)?;
        Ok(rec)
    }

    fn add_recommendation(&mut self, recommendation: &Recommendation) -> Result<i64> {
        let predecessor =
            self.active_recommendation(recommendation.assessment_id, recommendation.control_id)?;

        // A fresh successor cannot be its own ancestor, but an explicit
        // superseded_by on the incoming row could close a loop; refuse it.
        if let (Some(prev), Some(link)) =
            (predecessor.as_ref().and_then(|p| p.id), recommendation.superseded_by_id)
            && self.would_cycle(link, prev)?
        {
            return Err(AssessmentError::RecommendationCycle { id: link }.into());
        }

        let tx = self
            .conn
            .transaction()
            .map_err(|e| StorageError::Transaction(e.to_string()))?;

        if let Some(ref prev) = predecessor {
            tx.execute(
                "UPDATE recommendations SET is_active = 0 WHERE id = ?1",
                params![prev.id],
            )
            .map_err(StorageError::from)?;
        }

        tx.execute(
            "INSERT INTO recommendations
                (assessment_id, control_id, content, is_active, superseded_by_id, created_at)
             VALUES (?1, ?2, ?3, 1, NULL, ?4)",
            params![
                recommendation.assessment_id,
                recommendation.control_id,
                recommendation.content,
                recommendation.created_at.to_rfc3339(),
            ],
        )
        .map_err(StorageError::from)?;
        let new_id = tx.last_insert_rowid();

        if let Some(prev) = predecessor {
            tx.execute(
                "UPDATE recommendations SET superseded_by_id = ?2 WHERE id = ?1",
                params![prev.id, new_id],
            )
            .map_err(StorageError::from)?;
        }

        tx.commit()
            .map_err(|e| StorageError::Transaction(e.to_string()))?;

        Ok(new_id)
    }
}
