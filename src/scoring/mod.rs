//! Deterministic compliance scoring.
//!
//! Three computed layers (submeasure, measure, overall) under the
//! dual-condition pass criterion, with level-dependent thresholds and the
//! maturity trend check. See [`engine`] for the methodology.

pub mod engine;
pub mod thresholds;

pub use engine::{
    ControlScore, MeasureCompliance, MeasureControlCounts, MeasureScoreSummary, OverallCompliance,
    OverallSummary, SubmeasureCompliance, calculate_measure, calculate_overall,
    calculate_submeasure, compute_measure, compute_overall, compute_submeasure,
    detailed_results_json, persist_overall, recompute_affected, score_control,
};
pub use thresholds::{Thresholds, maturity_threshold_for, round_score, thresholds_for};
