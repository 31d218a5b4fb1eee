//! Answer writes.
//!
//! An answer targets `(assessment, control, submeasure)`; the mapping
//! between control and submeasure must exist or the write is rejected with
//! `InvalidContext`. Writes upsert on the unique key (concurrent writers
//! merge), refresh the cached progress counters, recompute the affected
//! score branch, invalidate insights, and may auto-promote the assessment.

use crate::core::{AssessmentAnswer, AssessmentStatus, AuditAction, AuditLog, ComplianceStatus};
use crate::error::{AssessmentError, Result, ScoringError};
use crate::scoring::{self, ControlScore, OverallSummary, SubmeasureCompliance};
use crate::storage::{ProgressCounts, SqliteStore, Store};
use serde::Serialize;
use tracing::info;

/// An incoming answer write.
#[derive(Debug, Clone, Default)]
pub struct AnswerWrite {
    /// Target assessment.
    pub assessment_id: i64,
    /// Answered control.
    pub control_id: i64,
    /// Submeasure context.
    pub submeasure_id: i64,
    /// Documentation maturity score (1..=5).
    pub documentation_score: Option<u8>,
    /// Implementation maturity score (1..=5).
    pub implementation_score: Option<u8>,
    /// Assessor comments.
    pub comments: Option<String>,
    /// Evidence file references.
    pub evidence_files: Vec<String>,
    /// Acting user (subject claim).
    pub answered_by: Option<String>,
    /// Client address.
    pub ip_address: Option<String>,
    /// Client user agent.
    pub user_agent: Option<String>,
}

/// Everything a caller needs back from an answer write.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerResult {
    /// The merged answer row.
    pub answer: AssessmentAnswer,
    /// The written control's score in its submeasure context.
    pub control_score: Option<ControlScore>,
    /// Recomputed compliance of the affected submeasure.
    pub submeasure_compliance: SubmeasureCompliance,
    /// Recomputed overall summary.
    pub overall: OverallSummary,
    /// Refreshed progress counters.
    pub progress: ProgressCounts,
    /// Status transition triggered by this write, if any.
    pub status_transition: Option<(AssessmentStatus, AssessmentStatus)>,
}

fn validate_score(value: Option<u8>) -> Result<()> {
    if let Some(v) = value
        && !(1..=5).contains(&v)
    {
        return Err(ScoringError::InvalidScore { value: i64::from(v) }.into());
    }
    Ok(())
}

/// Writes an answer and propagates its effects: scores, progress, cached
/// compliance, insights staleness, audit, and auto-transitions.
///
/// # Errors
///
/// Returns `InvalidContext` when the control is not mapped to the
/// submeasure, `InvalidScore` for out-of-range scores, and store errors
/// otherwise.
pub fn update_answer(store: &mut SqliteStore, write: &AnswerWrite) -> Result<AnswerResult> {
    validate_score(write.documentation_score)?;
    validate_score(write.implementation_score)?;

    // Existence check up front so unknown assessments fail before any write
    store.get_assessment(write.assessment_id)?;

    // The mapping is the only path from a control to its submeasure context
    if !store.mapping_exists(write.control_id, write.submeasure_id)? {
        let control_code = store
            .controls_for_submeasure(write.submeasure_id)?
            .into_iter()
            .find(|c| c.id == Some(write.control_id))
            .map_or_else(|| write.control_id.to_string(), |c| c.code);
        return Err(AssessmentError::InvalidContext {
            control_code,
            submeasure_id: write.submeasure_id,
        }
        .into());
    }

    let mut answer = AssessmentAnswer::new(
        write.assessment_id,
        write.control_id,
        write.submeasure_id,
        write.documentation_score,
        write.implementation_score,
    );
    answer.comments = write.comments.clone();
    answer.evidence_files = write.evidence_files.clone();
    answer.answered_by = write.answered_by.clone();
    answer.ip_address = write.ip_address.clone();
    answer.user_agent = write.user_agent.clone();

    let merged = store.upsert_answer(&answer)?;

    let mut audit = AuditLog::for_assessment(write.assessment_id, AuditAction::AnswerWritten)
        .with_values(
            None,
            Some(serde_json::json!({
                "control_id": write.control_id,
                "submeasure_id": write.submeasure_id,
                "documentation_score": merged.documentation_score,
                "implementation_score": merged.implementation_score,
            })),
        );
    audit.entity_type = "answer".to_string();
    audit.entity_id = merged.id;
    audit.user_id = write.answered_by.clone();
    audit.ip_address = write.ip_address.clone();
    store.append_audit(&audit)?;

    // Recompute the affected branch and the overall summary
    let (submeasure_compliance, overall) =
        scoring::recompute_affected(store, write.assessment_id, write.submeasure_id)?;

    // Refresh cached progress and compliance on the assessment row
    let progress = store.assessment_distinct_counts(write.assessment_id)?;
    store.update_assessment_progress(write.assessment_id, &progress)?;

    let mandatory_complete = progress.mandatory_answered >= progress.mandatory_controls;
    let compliance_status = if mandatory_complete {
        Some(if overall.passes_compliance {
            ComplianceStatus::Compliant
        } else {
            ComplianceStatus::NonCompliant
        })
    } else {
        None
    };
    store.update_assessment_compliance(
        write.assessment_id,
        overall.compliance_percentage,
        compliance_status,
    )?;

    // Any answer update invalidates the cached insights
    store.mark_insights_stale(write.assessment_id)?;

    let status_transition = super::orchestrator::check_auto_transition(
        store,
        write.assessment_id,
        &progress,
        overall.passes_compliance,
    )?;

    let control_score = submeasure_compliance
        .controls
        .iter()
        .find(|c| c.control_id == write.control_id)
        .cloned();

    info!(
        assessment_id = write.assessment_id,
        control_id = write.control_id,
        submeasure_id = write.submeasure_id,
        answered = progress.answered_controls,
        total = progress.total_controls,
        "answer written"
    );

    Ok(AnswerResult {
        answer: merged,
        control_score,
        submeasure_compliance,
        overall,
        progress,
        status_transition,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assessment::testutil::seed_catalog;
    use crate::core::SecurityLevel;

    #[test]
    fn test_update_answer_happy_path() {
        let (mut store, catalog) = seed_catalog(SecurityLevel::Srednja);
        let write = AnswerWrite {
            assessment_id: catalog.assessment_id,
            control_id: catalog.control_ids[0],
            submeasure_id: catalog.submeasure_ids[0],
            documentation_score: Some(4),
            implementation_score: Some(4),
            answered_by: Some("tester".to_string()),
            ..AnswerWrite::default()
        };

        let result = update_answer(&mut store, &write).unwrap();
        assert!(result.answer.is_scored());
        assert_eq!(result.progress.answered_controls, 1);
        let cs = result.control_score.unwrap();
        assert_eq!(cs.overall_score.map(|d| d.to_string()), Some("4.00".to_string()));

        // Audit row appended
        let audit = store.audit_for_assessment(catalog.assessment_id).unwrap();
        assert!(
            audit
                .iter()
                .any(|l| l.action == crate::core::AuditAction::AnswerWritten)
        );
    }

    #[test]
    fn test_invalid_context_rejected() {
        let (mut store, catalog) = seed_catalog(SecurityLevel::Srednja);
        // Control 0 is not mapped to submeasure 1
        let write = AnswerWrite {
            assessment_id: catalog.assessment_id,
            control_id: catalog.control_ids[0],
            submeasure_id: catalog.submeasure_ids[1],
            documentation_score: Some(3),
            implementation_score: Some(3),
            ..AnswerWrite::default()
        };
        let err = update_answer(&mut store, &write).unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Assessment(AssessmentError::InvalidContext { .. })
        ));
    }

    #[test]
    fn test_invalid_score_rejected() {
        let (mut store, catalog) = seed_catalog(SecurityLevel::Srednja);
        let write = AnswerWrite {
            assessment_id: catalog.assessment_id,
            control_id: catalog.control_ids[0],
            submeasure_id: catalog.submeasure_ids[0],
            documentation_score: Some(6),
            implementation_score: Some(3),
            ..AnswerWrite::default()
        };
        assert!(update_answer(&mut store, &write).is_err());
    }

    #[test]
    fn test_auto_promotes_draft_to_in_progress() {
        let (mut store, catalog) = seed_catalog(SecurityLevel::Srednja);
        let write = AnswerWrite {
            assessment_id: catalog.assessment_id,
            control_id: catalog.control_ids[0],
            submeasure_id: catalog.submeasure_ids[0],
            documentation_score: Some(3),
            implementation_score: Some(3),
            ..AnswerWrite::default()
        };
        let result = update_answer(&mut store, &write).unwrap();
        assert_eq!(
            result.status_transition,
            Some((AssessmentStatus::Draft, AssessmentStatus::InProgress))
        );
        let assessment = store.get_assessment(catalog.assessment_id).unwrap();
        assert_eq!(assessment.status, AssessmentStatus::InProgress);
        assert!(assessment.started_at.is_some());
    }

    #[test]
    fn test_concurrent_key_merge_keeps_single_row() {
        let (mut store, catalog) = seed_catalog(SecurityLevel::Srednja);
        let base = AnswerWrite {
            assessment_id: catalog.assessment_id,
            control_id: catalog.control_ids[0],
            submeasure_id: catalog.submeasure_ids[0],
            documentation_score: Some(2),
            implementation_score: Some(2),
            ..AnswerWrite::default()
        };
        update_answer(&mut store, &base).unwrap();

        let second = AnswerWrite {
            documentation_score: Some(5),
            implementation_score: None,
            ..base.clone()
        };
        let result = update_answer(&mut store, &second).unwrap();
        // Merge: new documentation, retained implementation
        assert_eq!(result.answer.documentation_score, Some(5));
        assert_eq!(result.answer.implementation_score, Some(2));
        assert_eq!(
            store
                .answers_for_assessment(catalog.assessment_id)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_insights_marked_stale() {
        let (mut store, catalog) = seed_catalog(SecurityLevel::Srednja);
        // Seed an insights row
        let insights = crate::core::AssessmentInsights {
            assessment_id: catalog.assessment_id,
            gaps: serde_json::json!([]),
            roadmap: serde_json::json!({}),
            summary: None,
            stale: false,
            computed_at: chrono::Utc::now(),
        };
        store.upsert_insights(&insights).unwrap();

        let write = AnswerWrite {
            assessment_id: catalog.assessment_id,
            control_id: catalog.control_ids[0],
            submeasure_id: catalog.submeasure_ids[0],
            documentation_score: Some(3),
            implementation_score: Some(3),
            ..AnswerWrite::default()
        };
        update_answer(&mut store, &write).unwrap();

        assert!(store.get_insights(catalog.assessment_id).unwrap().unwrap().stale);
    }
}
