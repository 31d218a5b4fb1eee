//! Three-level compliance computation.
//!
//! Implements the official methodology:
//! - Control score: `K = (D + I) / 2`, rounded half-up to 0.01.
//! - Submeasure pass: every answered control meets the individual criterion
//!   AND the mean of answered controls reaches the level threshold T.
//! - Measure pass: every submeasure with at least one answered control
//!   passes.
//! - Overall: mean of scored measures, percentage of passed measures, and
//!   the maturity trend (count of passed submeasures against the level
//!   minimum).
//!
//! The computation layer is pure: it maps loaded rows to results with no
//! store access, so identical inputs produce byte-identical outputs. The
//! orchestration layer loads rows, runs the computation, and persists the
//! three score layers in one transaction.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::core::{
    Assessment, AssessmentAnswer, Control, ControlRequirement, Measure, SecurityLevel, Submeasure,
};
use crate::error::Result;
use crate::scoring::thresholds::{Thresholds, maturity_threshold_for, round_score, thresholds_for};
use crate::storage::{SqliteStore, Store};

/// Individual control scoring data within its submeasure context.
#[derive(Debug, Clone, Serialize)]
pub struct ControlScore {
    /// Control id.
    pub control_id: i64,
    /// Control code (e.g. "POL-001").
    pub control_code: String,
    /// Submeasure context.
    pub submeasure_id: i64,
    /// Documentation score from the answer.
    pub documentation_score: Option<u8>,
    /// Implementation score from the answer.
    pub implementation_score: Option<u8>,
    /// `K = (D + I) / 2`, rounded, when answered.
    pub overall_score: Option<Decimal>,
    /// Per-control floor from the requirement record.
    pub minimum_required: Option<Decimal>,
    /// Whether the requirement marks the control mandatory.
    pub is_mandatory: bool,
    /// Whether the requirement marks the control applicable.
    pub is_applicable: bool,
    /// Whether K clears the per-control floor (true when no floor).
    pub passes_threshold: bool,
    /// Whether both score parts are present.
    pub has_answer: bool,
}

/// Submeasure-level compliance result.
#[derive(Debug, Clone, Serialize)]
pub struct SubmeasureCompliance {
    /// Submeasure id.
    pub submeasure_id: i64,
    /// Submeasure code.
    pub submeasure_code: String,
    /// Applicable controls with their scores.
    pub controls: Vec<ControlScore>,
    /// Mean documentation score over answered controls.
    pub documentation_avg: Option<Decimal>,
    /// Mean implementation score over answered controls.
    pub implementation_avg: Option<Decimal>,
    /// Mean K over answered controls.
    pub overall_score: Option<Decimal>,
    /// Every answered control meets the individual criterion.
    pub passes_individual: bool,
    /// The mean reaches the level threshold T.
    pub passes_average: bool,
    /// Both conditions hold.
    pub passes_overall: bool,
    /// Applicable controls in this submeasure.
    pub total_controls: u32,
    /// Answered applicable controls.
    pub answered_controls: u32,
    /// Mandatory applicable controls.
    pub mandatory_controls: u32,
    /// Answered mandatory controls.
    pub mandatory_answered: u32,
    /// Codes of controls violating the individual criterion.
    pub failed_controls: Vec<String>,
}

/// DISTINCT control counts for a measure (a control mapped to several
/// submeasures counts once at the measure level).
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MeasureControlCounts {
    /// Distinct applicable controls.
    pub total_controls: u32,
    /// Distinct answered controls.
    pub answered_controls: u32,
    /// Distinct mandatory controls.
    pub mandatory_controls: u32,
    /// Distinct answered mandatory controls.
    pub mandatory_answered: u32,
}

/// Measure-level compliance result.
#[derive(Debug, Clone, Serialize)]
pub struct MeasureCompliance {
    /// Measure id.
    pub measure_id: i64,
    /// Measure code.
    pub measure_code: String,
    /// Submeasures with applicable controls at this level.
    pub submeasures: Vec<SubmeasureCompliance>,
    /// Mean of submeasure documentation averages.
    pub documentation_avg: Option<Decimal>,
    /// Mean of submeasure implementation averages.
    pub implementation_avg: Option<Decimal>,
    /// Mean of submeasure overall scores.
    pub overall_score: Option<Decimal>,
    /// Every submeasure with answers passes.
    pub passes_compliance: bool,
    /// Submeasures with applicable controls.
    pub total_submeasures: u32,
    /// Submeasures passing both conditions.
    pub passed_submeasures: u32,
    /// Codes of failing submeasures that have answers.
    pub critical_failures: Vec<String>,
    /// DISTINCT control counts.
    pub counts: MeasureControlCounts,
}

/// Overall assessment compliance result.
#[derive(Debug, Clone, Serialize)]
pub struct OverallCompliance {
    /// Assessment id.
    pub assessment_id: i64,
    /// Security level of the assessment.
    pub security_level: SecurityLevel,
    /// Per-measure results.
    pub measures: Vec<MeasureCompliance>,
    /// Mean of scored measures' overall scores.
    pub overall_score: Option<Decimal>,
    /// `100 * passed_measures / total_measures`, to 0.01.
    pub compliance_percentage: Decimal,
    /// Every measure with any answered control passes.
    pub passes_compliance: bool,
    /// All measures in the pinned version.
    pub total_measures: u32,
    /// Measures passing compliance.
    pub passed_measures: u32,
    /// Count of passed submeasures across all measures.
    pub maturity_score: u32,
    /// Level minimum for the maturity trend.
    pub maturity_threshold: u32,
    /// Whether the maturity score reaches the minimum.
    pub meets_maturity_trend: bool,
    /// Pi used for the computation.
    pub individual_threshold: Decimal,
    /// T used for the computation.
    pub average_threshold: Decimal,
    /// Computation timestamp.
    pub calculated_at: DateTime<Utc>,
}

/// Condensed overall result returned from incremental recomputation.
#[derive(Debug, Clone, Serialize)]
pub struct OverallSummary {
    /// Mean of scored measures' overall scores.
    pub overall_score: Option<Decimal>,
    /// `100 * passed_measures / total_measures`, to 0.01.
    pub compliance_percentage: Decimal,
    /// Every measure with any answered control passes.
    pub passes_compliance: bool,
    /// Measures passing compliance.
    pub passed_measures: u32,
    /// All measures in the pinned version.
    pub total_measures: u32,
    /// Count of passed submeasures.
    pub maturity_score: u32,
    /// Level minimum for the maturity trend.
    pub maturity_threshold: u32,
    /// Whether the maturity score reaches the minimum.
    pub meets_maturity_trend: bool,
}

// ==================== Pure computation ====================

/// Scores one control within its submeasure context.
///
/// The answer contributes only when both parts are present. The control
/// clears its own threshold when `K >= minimum_score`, or trivially when no
/// floor is defined.
#[must_use]
pub fn score_control(
    control: &Control,
    submeasure_id: i64,
    answer: Option<&AssessmentAnswer>,
    requirement: Option<&ControlRequirement>,
) -> ControlScore {
    let (is_mandatory, is_applicable, minimum_required) = requirement.map_or(
        (false, true, None),
        |r| (r.is_mandatory, r.is_applicable, r.minimum_score),
    );

    let scores = answer.and_then(|a| match (a.documentation_score, a.implementation_score) {
        (Some(d), Some(i)) => Some((d, i)),
        _ => None,
    });

    let mut overall_score = None;
    let mut passes_threshold = true;
    let has_answer = scores.is_some();

    if let Some((d, i)) = scores {
        let k = round_score((Decimal::from(d) + Decimal::from(i)) / Decimal::from(2_u8));
        if let Some(min) = minimum_required {
            passes_threshold = k >= min;
        }
        overall_score = Some(k);
    }

    ControlScore {
        control_id: control.id.unwrap_or_default(),
        control_code: control.code.clone(),
        submeasure_id,
        documentation_score: scores.map(|(d, _)| d),
        implementation_score: scores.map(|(_, i)| i),
        overall_score,
        minimum_required,
        is_mandatory,
        is_applicable,
        passes_threshold,
        has_answer,
    }
}

/// Computes submeasure compliance under the dual-condition criterion.
///
/// A control fails the individual criterion when its K falls below the
/// level floor Pi or below its own `minimum_score`. The average criterion
/// compares the mean K of answered controls against T. Both must hold.
#[must_use]
pub fn compute_submeasure(
    submeasure: &Submeasure,
    controls: Vec<ControlScore>,
    thresholds: &Thresholds,
) -> SubmeasureCompliance {
    // Only applicable controls participate
    let controls: Vec<ControlScore> = controls.into_iter().filter(|c| c.is_applicable).collect();

    let total_controls = controls.len() as u32;
    let answered: Vec<&ControlScore> = controls.iter().filter(|c| c.has_answer).collect();
    let answered_controls = answered.len() as u32;
    let mandatory_controls = controls.iter().filter(|c| c.is_mandatory).count() as u32;
    let mandatory_answered = controls
        .iter()
        .filter(|c| c.is_mandatory && c.has_answer)
        .count() as u32;

    let mut documentation_avg = None;
    let mut implementation_avg = None;
    let mut overall_score = None;
    let mut passes_individual = true;
    let mut passes_average = false;
    let mut failed_controls = Vec::new();

    if answered_controls > 0 {
        let n = Decimal::from(answered_controls);
        let total_doc: Decimal = answered
            .iter()
            .filter_map(|c| c.documentation_score)
            .map(Decimal::from)
            .sum();
        let total_impl: Decimal = answered
            .iter()
            .filter_map(|c| c.implementation_score)
            .map(Decimal::from)
            .sum();
        let total_overall: Decimal = answered.iter().filter_map(|c| c.overall_score).sum();

        documentation_avg = Some(round_score(total_doc / n));
        implementation_avg = Some(round_score(total_impl / n));
        let mean = round_score(total_overall / n);

        for c in &answered {
            let below_floor = c.overall_score.is_some_and(|k| k < thresholds.individual);
            if below_floor || !c.passes_threshold {
                passes_individual = false;
                failed_controls.push(c.control_code.clone());
            }
        }

        passes_average = mean >= thresholds.average;
        overall_score = Some(mean);
    }

    let passes_overall = answered_controls > 0 && passes_individual && passes_average;

    SubmeasureCompliance {
        submeasure_id: submeasure.id.unwrap_or_default(),
        submeasure_code: submeasure.code.clone(),
        controls,
        documentation_avg,
        implementation_avg,
        overall_score,
        passes_individual,
        passes_average,
        passes_overall,
        total_controls,
        answered_controls,
        mandatory_controls,
        mandatory_answered,
        failed_controls,
    }
}

/// Computes measure compliance from its submeasure results.
///
/// Submeasures without applicable controls are dropped; the measure passes
/// when every remaining submeasure with answers passes (vacuously true when
/// none have answers).
#[must_use]
pub fn compute_measure(
    measure: &Measure,
    submeasures: Vec<SubmeasureCompliance>,
    counts: MeasureControlCounts,
) -> MeasureCompliance {
    let submeasures: Vec<SubmeasureCompliance> = submeasures
        .into_iter()
        .filter(|s| s.total_controls > 0)
        .collect();

    let scored: Vec<&SubmeasureCompliance> = submeasures
        .iter()
        .filter(|s| s.overall_score.is_some())
        .collect();

    let mean_of = |values: Vec<Decimal>| {
        if values.is_empty() {
            None
        } else {
            let n = Decimal::from(values.len() as u32);
            Some(round_score(values.iter().sum::<Decimal>() / n))
        }
    };

    let overall_score = mean_of(scored.iter().filter_map(|s| s.overall_score).collect());
    let documentation_avg = mean_of(
        submeasures
            .iter()
            .filter_map(|s| s.documentation_avg)
            .collect(),
    );
    let implementation_avg = mean_of(
        submeasures
            .iter()
            .filter_map(|s| s.implementation_avg)
            .collect(),
    );

    let passed_submeasures = submeasures.iter().filter(|s| s.passes_overall).count() as u32;
    let passes_compliance = submeasures
        .iter()
        .filter(|s| s.answered_controls > 0)
        .all(|s| s.passes_overall);
    let critical_failures: Vec<String> = submeasures
        .iter()
        .filter(|s| !s.passes_overall && s.answered_controls > 0)
        .map(|s| s.submeasure_code.clone())
        .collect();

    MeasureCompliance {
        measure_id: measure.id.unwrap_or_default(),
        measure_code: measure.code.clone(),
        total_submeasures: submeasures.len() as u32,
        submeasures,
        documentation_avg,
        implementation_avg,
        overall_score,
        passes_compliance,
        passed_submeasures,
        critical_failures,
        counts,
    }
}

/// Computes the overall result from per-measure results.
#[must_use]
pub fn compute_overall(
    assessment: &Assessment,
    measures: Vec<MeasureCompliance>,
) -> OverallCompliance {
    let thresholds = thresholds_for(assessment.security_level);
    let maturity_threshold = maturity_threshold_for(assessment.security_level);

    let scored: Vec<Decimal> = measures.iter().filter_map(|m| m.overall_score).collect();
    let overall_score = if scored.is_empty() {
        None
    } else {
        let n = Decimal::from(scored.len() as u32);
        Some(round_score(scored.iter().sum::<Decimal>() / n))
    };

    let total_measures = measures.len() as u32;
    let passed_measures = measures.iter().filter(|m| m.passes_compliance).count() as u32;
    let passes_compliance = measures
        .iter()
        .filter(|m| m.submeasures.iter().any(|s| s.answered_controls > 0))
        .all(|m| m.passes_compliance);

    let compliance_percentage = if total_measures == 0 {
        Decimal::ZERO
    } else {
        round_score(
            Decimal::from(passed_measures) * Decimal::from(100_u32) / Decimal::from(total_measures),
        )
    };

    let maturity_score: u32 = measures.iter().map(|m| m.passed_submeasures).sum();

    OverallCompliance {
        assessment_id: assessment.id.unwrap_or_default(),
        security_level: assessment.security_level,
        measures,
        overall_score,
        compliance_percentage,
        passes_compliance,
        total_measures,
        passed_measures,
        maturity_score,
        maturity_threshold,
        meets_maturity_trend: maturity_score >= maturity_threshold,
        individual_threshold: thresholds.individual,
        average_threshold: thresholds.average,
        calculated_at: Utc::now(),
    }
}

// ==================== Store orchestration ====================

/// Loads and scores one submeasure for an assessment.
///
/// # Errors
///
/// Returns an error on store failures or missing catalog rows.
pub fn calculate_submeasure(
    store: &SqliteStore,
    assessment: &Assessment,
    submeasure: &Submeasure,
) -> Result<SubmeasureCompliance> {
    let assessment_id = assessment.id.unwrap_or_default();
    let submeasure_id = submeasure.id.unwrap_or_default();
    let thresholds = thresholds_for(assessment.security_level);

    let mut control_scores = Vec::new();
    for control in store.controls_for_submeasure(submeasure_id)? {
        let control_id = control.id.unwrap_or_default();
        let requirement =
            store.requirement_for(control_id, submeasure_id, assessment.security_level)?;
        // No requirement record means not applicable at this level
        let Some(requirement) = requirement else {
            continue;
        };
        let answer = store.get_answer(assessment_id, control_id, submeasure_id)?;
        control_scores.push(score_control(
            &control,
            submeasure_id,
            answer.as_ref(),
            Some(&requirement),
        ));
    }

    Ok(compute_submeasure(submeasure, control_scores, &thresholds))
}

/// Loads and scores one measure for an assessment.
///
/// # Errors
///
/// Returns an error on store failures or missing catalog rows.
pub fn calculate_measure(
    store: &SqliteStore,
    assessment: &Assessment,
    measure: &Measure,
) -> Result<MeasureCompliance> {
    let measure_id = measure.id.unwrap_or_default();

    let mut submeasure_results = Vec::new();
    for submeasure in store.submeasures_for_measure(measure_id)? {
        submeasure_results.push(calculate_submeasure(store, assessment, &submeasure)?);
    }

    let counts = store.measure_distinct_counts(
        assessment.id.unwrap_or_default(),
        measure_id,
        assessment.security_level,
    )?;

    Ok(compute_measure(measure, submeasure_results, counts))
}

/// Loads and scores the whole assessment.
///
/// # Errors
///
/// Returns an error on store failures or missing catalog rows.
pub fn calculate_overall(store: &SqliteStore, assessment_id: i64) -> Result<OverallCompliance> {
    let assessment = store.get_assessment(assessment_id)?;

    let mut measure_results = Vec::new();
    for measure in store.measures_for_version(assessment.version_id)? {
        measure_results.push(calculate_measure(store, &assessment, &measure)?);
    }

    Ok(compute_overall(&assessment, measure_results))
}

/// Persists all three score layers atomically.
///
/// # Errors
///
/// Returns an error when the transaction fails.
pub fn persist_overall(store: &mut SqliteStore, compliance: &OverallCompliance) -> Result<()> {
    store.persist_compliance(compliance)
}

/// Recomputes scores after an answer write, limiting work to the affected
/// submeasure, its measure, and the overall summary (other measures are
/// read from their cached score rows).
///
/// # Errors
///
/// Returns an error on store failures or missing catalog rows.
pub fn recompute_affected(
    store: &mut SqliteStore,
    assessment_id: i64,
    submeasure_id: i64,
) -> Result<(SubmeasureCompliance, OverallSummary)> {
    let assessment = store.get_assessment(assessment_id)?;
    let submeasure = store.get_submeasure(submeasure_id)?;
    let measure = store.get_measure(submeasure.measure_id)?;

    // Fresh results for the touched branch
    let measure_result = calculate_measure(store, &assessment, &measure)?;
    let submeasure_result = measure_result
        .submeasures
        .iter()
        .find(|s| s.submeasure_id == submeasure_id)
        .cloned()
        .unwrap_or_else(|| {
            // Submeasure had no applicable controls; score it standalone
            compute_submeasure(
                &submeasure,
                Vec::new(),
                &thresholds_for(assessment.security_level),
            )
        });

    store.persist_measure_branch(assessment_id, &measure_result)?;

    // Overall summary over cached measure rows plus the fresh branch
    let summary = overall_from_cache(store, &assessment)?;
    store.persist_overall_summary(&assessment, &summary)?;

    Ok((submeasure_result, summary))
}

/// Builds the overall summary from cached measure score rows.
///
/// Measures without a cached row have no answers yet and pass vacuously,
/// matching the full-compute path.
fn overall_from_cache(store: &SqliteStore, assessment: &Assessment) -> Result<OverallSummary> {
    let assessment_id = assessment.id.unwrap_or_default();
    let rows = store.measure_score_summaries(assessment_id)?;
    let total_measures = store.count_measures(assessment.version_id)?;
    let maturity_threshold = maturity_threshold_for(assessment.security_level);

    let scored: Vec<Decimal> = rows.iter().filter_map(|r| r.overall_score).collect();
    let overall_score = if scored.is_empty() {
        None
    } else {
        let n = Decimal::from(scored.len() as u32);
        Some(round_score(scored.iter().sum::<Decimal>() / n))
    };

    let passed_rows = rows.iter().filter(|r| r.passes_compliance).count() as u32;
    // Measures without a cached row pass vacuously (no answers yet)
    let passed_measures = passed_rows + total_measures.saturating_sub(rows.len() as u32);
    let passes_compliance = rows
        .iter()
        .filter(|r| r.answered_controls > 0)
        .all(|r| r.passes_compliance);
    let maturity_score: u32 = rows.iter().map(|r| r.passed_submeasures).sum();

    let compliance_percentage = if total_measures == 0 {
        Decimal::ZERO
    } else {
        round_score(
            Decimal::from(passed_measures) * Decimal::from(100_u32) / Decimal::from(total_measures),
        )
    };

    Ok(OverallSummary {
        overall_score,
        compliance_percentage,
        passes_compliance,
        passed_measures,
        total_measures,
        maturity_score,
        maturity_threshold,
        meets_maturity_trend: maturity_score >= maturity_threshold,
    })
}

/// Cached measure score row used by the incremental overall summary.
#[derive(Debug, Clone)]
pub struct MeasureScoreSummary {
    /// Measure id.
    pub measure_id: i64,
    /// Cached overall score.
    pub overall_score: Option<Decimal>,
    /// Cached pass flag.
    pub passes_compliance: bool,
    /// Cached count of passed submeasures.
    pub passed_submeasures: u32,
    /// Cached count of answered controls (distinct).
    pub answered_controls: u32,
}

/// Serializes the nested results for the `detailed_results` column.
#[must_use]
pub fn detailed_results_json(compliance: &OverallCompliance) -> serde_json::Value {
    serde_json::json!({
        "measures": compliance
            .measures
            .iter()
            .map(|m| {
                serde_json::json!({
                    "code": m.measure_code,
                    "score": m.overall_score.map(|s| s.to_string()),
                    "passes": m.passes_compliance,
                    "submeasures": m
                        .submeasures
                        .iter()
                        .map(|s| {
                            serde_json::json!({
                                "code": s.submeasure_code,
                                "score": s.overall_score.map(|v| v.to_string()),
                                "passes": s.passes_overall,
                                "failed_controls": s.failed_controls,
                            })
                        })
                        .collect::<Vec<_>>(),
                })
            })
            .collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn control(id: i64, code: &str) -> Control {
        Control {
            id: Some(id),
            code: code.to_string(),
            title: format!("Control {code}"),
            description: None,
        }
    }

    fn submeasure(id: i64, code: &str) -> Submeasure {
        Submeasure {
            id: Some(id),
            measure_id: 1,
            code: code.to_string(),
            title: format!("Submeasure {code}"),
            order_index: 0,
        }
    }

    fn measure(id: i64, code: &str) -> Measure {
        Measure {
            id: Some(id),
            version_id: 1,
            code: code.to_string(),
            title: format!("Measure {code}"),
            order_index: 0,
        }
    }

    fn requirement(min: Option<Decimal>) -> ControlRequirement {
        ControlRequirement {
            control_id: 1,
            submeasure_id: 1,
            level: SecurityLevel::Srednja,
            is_mandatory: true,
            is_applicable: true,
            minimum_score: min,
        }
    }

    fn answered(d: u8, i: u8) -> AssessmentAnswer {
        AssessmentAnswer::new(1, 1, 1, Some(d), Some(i))
    }

    fn scored_control(code: &str, d: u8, i: u8, min: Option<Decimal>) -> ControlScore {
        score_control(
            &control(1, code),
            1,
            Some(&answered(d, i)),
            Some(&requirement(min)),
        )
    }

    #[test]
    fn test_control_score_rounding() {
        let cs = scored_control("POL-001", 3, 4, None);
        assert_eq!(cs.overall_score, Some(dec!(3.50)));
        assert!(cs.has_answer);
        assert!(cs.passes_threshold);
    }

    #[test]
    fn test_control_score_threshold() {
        let cs = scored_control("POL-001", 2, 3, Some(dec!(3.0)));
        assert_eq!(cs.overall_score, Some(dec!(2.50)));
        assert!(!cs.passes_threshold);

        let cs = scored_control("POL-001", 3, 3, Some(dec!(3.0)));
        assert!(cs.passes_threshold);
    }

    #[test]
    fn test_control_no_floor_passes_by_definition() {
        let cs = scored_control("POL-001", 1, 1, None);
        assert_eq!(cs.overall_score, Some(dec!(1.00)));
        assert!(cs.passes_threshold);
    }

    #[test]
    fn test_control_partial_answer_not_scored() {
        let mut a = answered(3, 3);
        a.implementation_score = None;
        let cs = score_control(&control(1, "POL-001"), 1, Some(&a), Some(&requirement(None)));
        assert!(!cs.has_answer);
        assert_eq!(cs.overall_score, None);
    }

    #[test]
    fn test_control_without_requirement_defaults() {
        let cs = score_control(&control(1, "POL-001"), 1, Some(&answered(4, 4)), None);
        assert!(cs.is_applicable);
        assert!(!cs.is_mandatory);
        assert_eq!(cs.minimum_required, None);
    }

    // Scenario S2: srednja level, K in {3.0, 3.0, 2.5}
    #[test]
    fn test_submeasure_dual_condition_fail_then_pass() {
        let thresholds = thresholds_for(SecurityLevel::Srednja);
        let controls = vec![
            scored_control("C-001", 3, 3, None),
            scored_control("C-002", 3, 3, None),
            scored_control("C-003", 2, 3, None),
        ];
        let result = compute_submeasure(&submeasure(1, "1.1"), controls, &thresholds);

        assert!(result.passes_individual); // all K >= Pi = 2.5
        assert_eq!(result.overall_score, Some(dec!(2.83)));
        assert!(!result.passes_average); // 2.83 < 3.0
        assert!(!result.passes_overall);

        // Raise the last control to K = 3.5
        let controls = vec![
            scored_control("C-001", 3, 3, None),
            scored_control("C-002", 3, 3, None),
            scored_control("C-003", 3, 4, None),
        ];
        let result = compute_submeasure(&submeasure(1, "1.1"), controls, &thresholds);
        assert_eq!(result.overall_score, Some(dec!(3.17)));
        assert!(result.passes_average);
        assert!(result.passes_overall);
    }

    #[test]
    fn test_submeasure_individual_violation_listed() {
        let thresholds = thresholds_for(SecurityLevel::Srednja);
        // K = 2.0 < Pi = 2.5
        let controls = vec![
            scored_control("C-001", 2, 2, None),
            scored_control("C-002", 5, 5, None),
        ];
        let result = compute_submeasure(&submeasure(1, "1.1"), controls, &thresholds);
        assert!(!result.passes_individual);
        assert_eq!(result.failed_controls, vec!["C-001".to_string()]);
        // Mean 3.5 >= 3.0, but the conjunction fails
        assert!(result.passes_average);
        assert!(!result.passes_overall);
    }

    #[test]
    fn test_submeasure_minimum_score_violation_listed() {
        let thresholds = thresholds_for(SecurityLevel::Osnovna);
        // K = 3.0 clears Pi = 2.0 but not the per-control floor of 4.0
        let controls = vec![scored_control("C-001", 3, 3, Some(dec!(4.0)))];
        let result = compute_submeasure(&submeasure(1, "1.1"), controls, &thresholds);
        assert!(!result.passes_individual);
        assert_eq!(result.failed_controls, vec!["C-001".to_string()]);
    }

    #[test]
    fn test_submeasure_empty_does_not_pass() {
        let thresholds = thresholds_for(SecurityLevel::Osnovna);
        let result = compute_submeasure(&submeasure(1, "1.1"), vec![], &thresholds);
        assert_eq!(result.total_controls, 0);
        assert_eq!(result.overall_score, None);
        assert!(!result.passes_overall);
    }

    #[test]
    fn test_submeasure_inapplicable_filtered() {
        let thresholds = thresholds_for(SecurityLevel::Osnovna);
        let mut inapplicable = scored_control("C-001", 1, 1, None);
        inapplicable.is_applicable = false;
        let controls = vec![inapplicable, scored_control("C-002", 4, 4, None)];
        let result = compute_submeasure(&submeasure(1, "1.1"), controls, &thresholds);
        assert_eq!(result.total_controls, 1);
        assert_eq!(result.overall_score, Some(dec!(4.00)));
        assert!(result.passes_overall);
    }

    #[test]
    fn test_submeasure_averages_answered_only() {
        let thresholds = thresholds_for(SecurityLevel::Osnovna);
        let unanswered = score_control(&control(9, "C-009"), 1, None, Some(&requirement(None)));
        let controls = vec![unanswered, scored_control("C-002", 4, 2, None)];
        let result = compute_submeasure(&submeasure(1, "1.1"), controls, &thresholds);
        assert_eq!(result.answered_controls, 1);
        assert_eq!(result.documentation_avg, Some(dec!(4.00)));
        assert_eq!(result.implementation_avg, Some(dec!(2.00)));
        assert_eq!(result.overall_score, Some(dec!(3.00)));
    }

    fn passing_submeasure(id: i64, code: &str, level: SecurityLevel) -> SubmeasureCompliance {
        let thresholds = thresholds_for(level);
        compute_submeasure(
            &submeasure(id, code),
            vec![scored_control("C-100", 4, 4, None)],
            &thresholds,
        )
    }

    fn failing_submeasure(id: i64, code: &str, level: SecurityLevel) -> SubmeasureCompliance {
        let thresholds = thresholds_for(level);
        compute_submeasure(
            &submeasure(id, code),
            vec![scored_control("C-200", 1, 1, None)],
            &thresholds,
        )
    }

    #[test]
    fn test_measure_passes_only_when_answered_submeasures_pass() {
        let level = SecurityLevel::Osnovna;
        let m = measure(1, "M.1");

        let result = compute_measure(
            &m,
            vec![
                passing_submeasure(1, "1.1", level),
                failing_submeasure(2, "1.2", level),
            ],
            MeasureControlCounts::default(),
        );
        assert!(!result.passes_compliance);
        assert_eq!(result.passed_submeasures, 1);
        assert_eq!(result.critical_failures, vec!["1.2".to_string()]);

        let result = compute_measure(
            &m,
            vec![passing_submeasure(1, "1.1", level)],
            MeasureControlCounts::default(),
        );
        assert!(result.passes_compliance);
    }

    #[test]
    fn test_measure_unanswered_submeasure_ignored_for_pass() {
        let level = SecurityLevel::Osnovna;
        let thresholds = thresholds_for(level);
        // One passing answered submeasure, one applicable-but-unanswered
        let unanswered = compute_submeasure(
            &submeasure(2, "1.2"),
            vec![score_control(
                &control(9, "C-009"),
                2,
                None,
                Some(&requirement(None)),
            )],
            &thresholds,
        );
        let result = compute_measure(
            &measure(1, "M.1"),
            vec![passing_submeasure(1, "1.1", level), unanswered],
            MeasureControlCounts::default(),
        );
        assert!(result.passes_compliance);
        assert_eq!(result.total_submeasures, 2);
    }

    #[test]
    fn test_measure_score_is_mean_of_scored() {
        let level = SecurityLevel::Osnovna;
        let s1 = passing_submeasure(1, "1.1", level); // 4.00
        let s2 = failing_submeasure(2, "1.2", level); // 1.00
        let result = compute_measure(
            &measure(1, "M.1"),
            vec![s1, s2],
            MeasureControlCounts::default(),
        );
        assert_eq!(result.overall_score, Some(dec!(2.50)));
    }

    fn assessment(level: SecurityLevel) -> Assessment {
        let mut a = Assessment::new(1, 1, level, "Test".to_string());
        a.id = Some(1);
        a
    }

    #[test]
    fn test_overall_percentage_and_maturity() {
        let level = SecurityLevel::Napredna;
        let m1 = compute_measure(
            &measure(1, "M.1"),
            vec![passing_submeasure(1, "1.1", level)],
            MeasureControlCounts::default(),
        );
        let m2 = compute_measure(
            &measure(2, "M.2"),
            vec![failing_submeasure(2, "2.1", level)],
            MeasureControlCounts::default(),
        );

        let overall = compute_overall(&assessment(level), vec![m1, m2]);
        assert_eq!(overall.total_measures, 2);
        assert_eq!(overall.passed_measures, 1);
        assert_eq!(overall.compliance_percentage, dec!(50.00));
        assert!(!overall.passes_compliance);
        assert_eq!(overall.maturity_score, 1);
        assert_eq!(overall.maturity_threshold, 15);
        assert!(!overall.meets_maturity_trend);
        assert_eq!(overall.individual_threshold, dec!(3.0));
        assert_eq!(overall.average_threshold, dec!(3.5));
    }

    #[test]
    fn test_overall_deterministic() {
        let level = SecurityLevel::Srednja;
        let build = || {
            let m1 = compute_measure(
                &measure(1, "M.1"),
                vec![
                    passing_submeasure(1, "1.1", level),
                    failing_submeasure(2, "1.2", level),
                ],
                MeasureControlCounts::default(),
            );
            compute_overall(&assessment(level), vec![m1])
        };
        let a = build();
        let b = build();
        assert_eq!(a.overall_score, b.overall_score);
        assert_eq!(a.compliance_percentage, b.compliance_percentage);
        assert_eq!(a.passes_compliance, b.passes_compliance);
        assert_eq!(a.maturity_score, b.maturity_score);
        assert_eq!(
            serde_json::to_string(&detailed_results_json(&a)).unwrap(),
            serde_json::to_string(&detailed_results_json(&b)).unwrap()
        );
    }

    #[test]
    fn test_overall_empty_assessment() {
        let overall = compute_overall(&assessment(SecurityLevel::Osnovna), vec![]);
        assert_eq!(overall.overall_score, None);
        assert_eq!(overall.compliance_percentage, Decimal::ZERO);
        assert_eq!(overall.maturity_score, 0);
        assert!(!overall.meets_maturity_trend);
    }
}
