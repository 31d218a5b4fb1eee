//! Assessment lifecycle orchestration.
//!
//! Status machine with validated (and audited) transitions, auto-promotion
//! rules, progress bookkeeping, submission validation, soft deletion, and
//! the cached insights artifact. Every mutation appends an audit row;
//! audit rows are never updated.

use crate::core::{
    Assessment, AssessmentInsights, AssessmentStatus, AuditAction, AuditLog, SecurityLevel,
};
use crate::error::{AssessmentError, Result, StorageError};
use crate::scoring::{self, OverallCompliance};
use crate::storage::{ProgressCounts, SqliteStore, Store};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

/// Minimum overall completion (percent) required for submission.
pub const SUBMISSION_COMPLETION_FLOOR: u32 = 90;

/// Creates a draft assessment pinned to the active questionnaire version,
/// with its control counters pre-computed for the chosen level.
///
/// # Errors
///
/// Returns `NoActiveVersion` when no questionnaire has been imported, and
/// store errors otherwise.
pub fn create_assessment(
    store: &mut SqliteStore,
    organization_id: i64,
    security_level: SecurityLevel,
    title: &str,
) -> Result<Assessment> {
    let version = store
        .active_version()?
        .ok_or(StorageError::NoActiveVersion)?;
    let version_id = version.id.unwrap_or_default();

    let assessment = Assessment::new(
        organization_id,
        version_id,
        security_level,
        title.to_string(),
    );
    let id = store.add_assessment(&assessment)?;

    // Seed the cached counters for the pinned version and level
    let counts = store.assessment_distinct_counts(id)?;
    store.update_assessment_progress(id, &counts)?;

    store.append_audit(
        &AuditLog::for_assessment(id, AuditAction::Created)
            .with_values(
                None,
                Some(serde_json::json!({
                    "security_level": security_level.as_str(),
                    "version_id": version_id,
                    "title": title,
                })),
            )
            .with_summary(&format!("Assessment created at level {}", security_level.as_str())),
    )?;

    info!(assessment_id = id, level = security_level.as_str(), "assessment created");
    store.get_assessment(id)
}

/// Applies a status transition.
///
/// Invalid transitions fail with `InvalidTransition` unless `force` is set
/// (an operator action, recorded as forced in the audit trail).
///
/// # Errors
///
/// Returns `InvalidTransition` or store errors.
pub fn update_status(
    store: &mut SqliteStore,
    assessment_id: i64,
    new_status: AssessmentStatus,
    force: bool,
    user_id: Option<&str>,
    reason: Option<&str>,
) -> Result<Assessment> {
    let assessment = store.get_assessment(assessment_id)?;
    let old_status = assessment.status;

    if !force {
        old_status.validate_transition(new_status)?;
    }

    store.update_assessment_status(assessment_id, new_status)?;

    let mut summary = format!(
        "Status changed from {} to {}",
        old_status.as_str(),
        new_status.as_str()
    );
    if force {
        summary.push_str(" (forced)");
    }
    if let Some(reason) = reason {
        summary.push_str(": ");
        summary.push_str(reason);
    }

    let mut audit = AuditLog::for_assessment(assessment_id, AuditAction::StatusChanged)
        .with_values(
            Some(serde_json::json!({"status": old_status.as_str()})),
            Some(serde_json::json!({"status": new_status.as_str()})),
        )
        .with_summary(&summary);
    audit.user_id = user_id.map(ToString::to_string);
    store.append_audit(&audit)?;

    info!(
        assessment_id,
        from = old_status.as_str(),
        to = new_status.as_str(),
        force,
        "status transition"
    );
    store.get_assessment(assessment_id)
}

/// Checks the auto-promotion rules after an answer write and applies at
/// most one transition:
/// - draft -> `in_progress` on the first answer
/// - `in_progress` -> completed when every mandatory control is answered
///   and overall compliance passes
///
/// # Errors
///
/// Returns store errors.
pub fn check_auto_transition(
    store: &mut SqliteStore,
    assessment_id: i64,
    progress: &ProgressCounts,
    passes_compliance: bool,
) -> Result<Option<(AssessmentStatus, AssessmentStatus)>> {
    let assessment = store.get_assessment(assessment_id)?;
    if !assessment.status.allows_auto_transition() {
        return Ok(None);
    }

    let next = match assessment.status {
        AssessmentStatus::Draft if progress.answered_controls > 0 => AssessmentStatus::InProgress,
        AssessmentStatus::InProgress
            if progress.mandatory_controls > 0
                && progress.mandatory_answered >= progress.mandatory_controls
                && passes_compliance =>
        {
            AssessmentStatus::Completed
        }
        _ => return Ok(None),
    };

    store.update_assessment_status(assessment_id, next)?;
    store.append_audit(
        &AuditLog::for_assessment(assessment_id, AuditAction::StatusChanged)
            .with_values(
                Some(serde_json::json!({"status": assessment.status.as_str()})),
                Some(serde_json::json!({"status": next.as_str()})),
            )
            .with_summary(&format!(
                "Auto-transition from {} to {}",
                assessment.status.as_str(),
                next.as_str()
            )),
    )?;

    info!(
        assessment_id,
        from = assessment.status.as_str(),
        to = next.as_str(),
        "auto-transition"
    );
    Ok(Some((assessment.status, next)))
}

/// One submission validation finding.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationIssue {
    /// Stable issue code.
    pub code: String,
    /// Human-readable description.
    pub message: String,
}

/// Submission validation result: errors block, warnings advise.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionValidation {
    /// True when no blocking errors remain.
    pub can_submit: bool,
    /// Blocking findings.
    pub errors: Vec<ValidationIssue>,
    /// Advisory findings (non-compliance is a warning, not an error).
    pub warnings: Vec<ValidationIssue>,
}

/// Validates an assessment for submission: every mandatory control must be
/// answered and overall completion must reach the floor. Non-compliance
/// only warns.
///
/// # Errors
///
/// Returns store errors.
pub fn validate_submission(
    store: &SqliteStore,
    assessment_id: i64,
) -> Result<SubmissionValidation> {
    let progress = store.assessment_distinct_counts(assessment_id)?;
    let compliance = scoring::calculate_overall(store, assessment_id)?;

    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if progress.mandatory_answered < progress.mandatory_controls {
        errors.push(ValidationIssue {
            code: "mandatory_incomplete".to_string(),
            message: format!(
                "{} of {} mandatory controls answered",
                progress.mandatory_answered, progress.mandatory_controls
            ),
        });
    }

    let completion = if progress.total_controls == 0 {
        Decimal::ZERO
    } else {
        Decimal::from(progress.answered_controls) * Decimal::from(100)
            / Decimal::from(progress.total_controls)
    };
    if completion < Decimal::from(SUBMISSION_COMPLETION_FLOOR) {
        errors.push(ValidationIssue {
            code: "completion_below_floor".to_string(),
            message: format!(
                "assessment is {completion:.1}% complete; at least {SUBMISSION_COMPLETION_FLOOR}% of controls must be answered"
            ),
        });
    }

    if !compliance.passes_compliance {
        warnings.push(ValidationIssue {
            code: "non_compliant".to_string(),
            message: "overall compliance does not pass; submission is allowed but the result will be non-compliant".to_string(),
        });
    }
    for measure in &compliance.measures {
        for submeasure in &measure.submeasures {
            if !submeasure.failed_controls.is_empty() {
                warnings.push(ValidationIssue {
                    code: "controls_below_threshold".to_string(),
                    message: format!(
                        "submeasure {}: controls below threshold: {}",
                        submeasure.submeasure_code,
                        submeasure.failed_controls.join(", ")
                    ),
                });
            }
        }
    }

    Ok(SubmissionValidation {
        can_submit: errors.is_empty(),
        errors,
        warnings,
    })
}

/// Submits an assessment for review after validation.
///
/// # Errors
///
/// Returns `CannotSubmit` carrying the first blocking error, or store
/// errors.
pub fn submit(
    store: &mut SqliteStore,
    assessment_id: i64,
    user_id: Option<&str>,
) -> Result<(Assessment, SubmissionValidation)> {
    let validation = validate_submission(store, assessment_id)?;
    if !validation.can_submit {
        let reason = validation
            .errors
            .first()
            .map_or_else(|| "validation failed".to_string(), |e| e.message.clone());
        return Err(AssessmentError::CannotSubmit { reason }.into());
    }

    let assessment = update_status(
        store,
        assessment_id,
        AssessmentStatus::Review,
        false,
        user_id,
        Some("submitted for review"),
    )?;
    Ok((assessment, validation))
}

/// Soft-deletes an assessment: the row is archived, never removed, and the
/// audit trail always survives.
///
/// # Errors
///
/// Returns store errors.
pub fn delete_assessment(
    store: &mut SqliteStore,
    assessment_id: i64,
    user_id: Option<&str>,
) -> Result<()> {
    let assessment = store.get_assessment(assessment_id)?;
    store.update_assessment_status(assessment_id, AssessmentStatus::Archived)?;

    let mut audit = AuditLog::for_assessment(assessment_id, AuditAction::Deleted)
        .with_values(
            Some(serde_json::json!({"status": assessment.status.as_str()})),
            Some(serde_json::json!({"status": "archived"})),
        )
        .with_summary("Assessment archived (soft delete)");
    audit.user_id = user_id.map(ToString::to_string);
    store.append_audit(&audit)?;
    Ok(())
}

/// Full compliance read: computes all three layers, persists them, and
/// refreshes the assessment's cached percentage.
///
/// # Errors
///
/// Returns store errors.
pub fn get_compliance(store: &mut SqliteStore, assessment_id: i64) -> Result<OverallCompliance> {
    let compliance = scoring::calculate_overall(store, assessment_id)?;
    scoring::persist_overall(store, &compliance)?;
    store.update_assessment_compliance(
        assessment_id,
        compliance.compliance_percentage,
        None,
    )?;
    Ok(compliance)
}

/// Recomputes the cached insights artifact from the current scores: a gap
/// list of failing controls, a phased roadmap, and a short narrative.
///
/// # Errors
///
/// Returns store errors.
pub fn compute_insights(
    store: &mut SqliteStore,
    assessment_id: i64,
) -> Result<AssessmentInsights> {
    let compliance = scoring::calculate_overall(store, assessment_id)?;
    let thresholds = scoring::thresholds_for(compliance.security_level);

    let mut gaps = Vec::new();
    for measure in &compliance.measures {
        for submeasure in &measure.submeasures {
            for control in &submeasure.controls {
                let Some(score) = control.overall_score else {
                    continue;
                };
                let below_floor = score < thresholds.individual;
                let below_minimum = !control.passes_threshold;
                if below_floor || below_minimum {
                    gaps.push(serde_json::json!({
                        "control_code": control.control_code,
                        "submeasure_code": submeasure.submeasure_code,
                        "measure_code": measure.measure_code,
                        "score": score.to_string(),
                        "required": control
                            .minimum_required
                            .unwrap_or(thresholds.individual)
                            .to_string(),
                        "priority": gap_priority(control.is_mandatory, below_minimum),
                    }));
                }
            }
        }
    }

    let critical: Vec<&serde_json::Value> =
        gaps.iter().filter(|g| g["priority"] == "critical").collect();
    let high: Vec<&serde_json::Value> = gaps.iter().filter(|g| g["priority"] == "high").collect();

    let roadmap = serde_json::json!({
        "phases": [
            {"name": "immediate", "gaps": critical.len()},
            {"name": "short_term", "gaps": high.len()},
            {"name": "continuous", "gaps": gaps.len() - critical.len() - high.len()},
        ],
    });

    let summary = format!(
        "{} of {} measures pass; maturity {} of {} required submeasures; {} control gaps",
        compliance.passed_measures,
        compliance.total_measures,
        compliance.maturity_score,
        compliance.maturity_threshold,
        gaps.len()
    );

    let insights = AssessmentInsights {
        assessment_id,
        gaps: serde_json::Value::Array(gaps),
        roadmap,
        summary: Some(summary),
        stale: false,
        computed_at: chrono::Utc::now(),
    };
    store.upsert_insights(&insights)?;
    Ok(insights)
}

/// Gap priority: mandatory controls below their explicit floor are
/// critical; other mandatory gaps are high; the rest medium.
fn gap_priority(is_mandatory: bool, below_minimum: bool) -> &'static str {
    match (is_mandatory, below_minimum) {
        (true, true) => "critical",
        (true, false) => "high",
        _ => "medium",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assessment::answers::{AnswerWrite, update_answer};
    use crate::assessment::testutil::seed_catalog;
    use crate::core::SecurityLevel;

    fn answer(
        store: &mut SqliteStore,
        assessment_id: i64,
        control_id: i64,
        submeasure_id: i64,
        score: u8,
    ) {
        update_answer(
            store,
            &AnswerWrite {
                assessment_id,
                control_id,
                submeasure_id,
                documentation_score: Some(score),
                implementation_score: Some(score),
                ..AnswerWrite::default()
            },
        )
        .unwrap();
    }

    #[test]
    fn test_manual_transition_validated() {
        let (mut store, catalog) = seed_catalog(SecurityLevel::Srednja);
        // draft -> completed is not allowed
        let err = update_status(
            &mut store,
            catalog.assessment_id,
            AssessmentStatus::Completed,
            false,
            None,
            None,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Assessment(AssessmentError::InvalidTransition { .. })
        ));

        // but force bypasses, audited
        let assessment = update_status(
            &mut store,
            catalog.assessment_id,
            AssessmentStatus::Completed,
            true,
            Some("operator"),
            Some("migration"),
        )
        .unwrap();
        assert_eq!(assessment.status, AssessmentStatus::Completed);
        let audit = store.audit_for_assessment(catalog.assessment_id).unwrap();
        assert!(audit.iter().any(|l| {
            l.change_summary
                .as_deref()
                .is_some_and(|s| s.contains("(forced)"))
        }));
    }

    // Scenario S4: answering all mandatory controls with passing scores
    // auto-completes the assessment
    #[test]
    fn test_auto_completion() {
        let (mut store, catalog) = seed_catalog(SecurityLevel::Srednja);
        let a = catalog.assessment_id;

        // Submeasure 1.1: three mandatory controls
        answer(&mut store, a, catalog.control_ids[0], catalog.submeasure_ids[0], 4);
        answer(&mut store, a, catalog.control_ids[1], catalog.submeasure_ids[0], 4);
        answer(&mut store, a, catalog.control_ids[2], catalog.submeasure_ids[0], 4);
        // Submeasure 1.2: remaining mandatory control plus the shared one
        answer(&mut store, a, catalog.control_ids[3], catalog.submeasure_ids[1], 4);
        answer(&mut store, a, catalog.control_ids[2], catalog.submeasure_ids[1], 4);

        let assessment = store.get_assessment(a).unwrap();
        assert_eq!(assessment.status, AssessmentStatus::Completed);
        assert!(assessment.completed_at.is_some());

        let audit = store.audit_for_assessment(a).unwrap();
        assert!(audit.iter().any(|l| {
            l.action == AuditAction::StatusChanged
                && l.new_values
                    .as_ref()
                    .is_some_and(|v| v["status"] == "completed")
        }));
    }

    #[test]
    fn test_no_auto_completion_when_failing() {
        let (mut store, catalog) = seed_catalog(SecurityLevel::Srednja);
        let a = catalog.assessment_id;

        // Low scores: mandatory complete but compliance fails
        answer(&mut store, a, catalog.control_ids[0], catalog.submeasure_ids[0], 1);
        answer(&mut store, a, catalog.control_ids[1], catalog.submeasure_ids[0], 1);
        answer(&mut store, a, catalog.control_ids[2], catalog.submeasure_ids[0], 1);
        answer(&mut store, a, catalog.control_ids[3], catalog.submeasure_ids[1], 1);
        answer(&mut store, a, catalog.control_ids[2], catalog.submeasure_ids[1], 1);

        let assessment = store.get_assessment(a).unwrap();
        assert_eq!(assessment.status, AssessmentStatus::InProgress);
    }

    #[test]
    fn test_submission_validation_blocks_incomplete() {
        let (mut store, catalog) = seed_catalog(SecurityLevel::Srednja);
        let validation = validate_submission(&store, catalog.assessment_id).unwrap();
        assert!(!validation.can_submit);
        assert!(
            validation
                .errors
                .iter()
                .any(|e| e.code == "mandatory_incomplete")
        );

        let err = submit(&mut store, catalog.assessment_id, None).unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Assessment(AssessmentError::CannotSubmit { .. })
        ));
    }

    #[test]
    fn test_non_compliance_is_warning_not_error() {
        let (mut store, catalog) = seed_catalog(SecurityLevel::Srednja);
        let a = catalog.assessment_id;
        // Answer everything, but at failing scores
        answer(&mut store, a, catalog.control_ids[0], catalog.submeasure_ids[0], 2);
        answer(&mut store, a, catalog.control_ids[1], catalog.submeasure_ids[0], 2);
        answer(&mut store, a, catalog.control_ids[2], catalog.submeasure_ids[0], 2);
        answer(&mut store, a, catalog.control_ids[3], catalog.submeasure_ids[1], 2);
        answer(&mut store, a, catalog.control_ids[2], catalog.submeasure_ids[1], 2);

        let validation = validate_submission(&store, a).unwrap();
        assert!(validation.can_submit, "errors: {:?}", validation.errors);
        assert!(
            validation
                .warnings
                .iter()
                .any(|w| w.code == "non_compliant")
        );
    }

    #[test]
    fn test_soft_delete_preserves_audit() {
        let (mut store, catalog) = seed_catalog(SecurityLevel::Srednja);
        let before = store
            .audit_for_assessment(catalog.assessment_id)
            .unwrap()
            .len();
        delete_assessment(&mut store, catalog.assessment_id, Some("admin")).unwrap();

        let assessment = store.get_assessment(catalog.assessment_id).unwrap();
        assert_eq!(assessment.status, AssessmentStatus::Archived);
        let audit = store.audit_for_assessment(catalog.assessment_id).unwrap();
        assert_eq!(audit.len(), before + 1);
    }

    #[test]
    fn test_insights_computed_and_fresh() {
        let (mut store, catalog) = seed_catalog(SecurityLevel::Srednja);
        let a = catalog.assessment_id;
        // One failing mandatory control (K = 2.0 < Pi = 2.5)
        answer(&mut store, a, catalog.control_ids[0], catalog.submeasure_ids[0], 2);

        let insights = compute_insights(&mut store, a).unwrap();
        assert!(!insights.stale);
        let gaps = insights.gaps.as_array().unwrap();
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0]["control_code"], "POL-001");
        assert_eq!(gaps[0]["priority"], "high");
        assert!(insights.summary.unwrap().contains("control gaps"));
    }

    #[test]
    fn test_get_compliance_persists() {
        let (mut store, catalog) = seed_catalog(SecurityLevel::Srednja);
        let a = catalog.assessment_id;
        answer(&mut store, a, catalog.control_ids[0], catalog.submeasure_ids[0], 4);

        let compliance = get_compliance(&mut store, a).unwrap();
        assert_eq!(compliance.assessment_id, a);

        // Cached percentage lands on the assessment row
        let assessment = store.get_assessment(a).unwrap();
        assert!(assessment.compliance_percentage.is_some());
    }
}
