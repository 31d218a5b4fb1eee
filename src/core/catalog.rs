//! Questionnaire catalog types.
//!
//! The catalog is a versioned hierarchy: a [`QuestionnaireVersion`] owns
//! measures, measures own submeasures, and controls attach to submeasures
//! through an M:N mapping. A [`ControlRequirement`] records whether a
//! control applies (and how strictly) at a given security level within a
//! given submeasure context.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ScoringError;

/// Security level of an assessment, governing thresholds and applicability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    /// Basic level.
    Osnovna,
    /// Medium level.
    Srednja,
    /// Advanced level.
    Napredna,
}

impl SecurityLevel {
    /// Returns the canonical (Croatian) string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Osnovna => "osnovna",
            Self::Srednja => "srednja",
            Self::Napredna => "napredna",
        }
    }

    /// Parses a level string (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns [`ScoringError::InvalidSecurityLevel`] for unknown levels.
    pub fn parse(s: &str) -> Result<Self, ScoringError> {
        match s.to_lowercase().as_str() {
            "osnovna" => Ok(Self::Osnovna),
            "srednja" => Ok(Self::Srednja),
            "napredna" => Ok(Self::Napredna),
            _ => Err(ScoringError::InvalidSecurityLevel {
                level: s.to_string(),
            }),
        }
    }

    /// All levels, low to high.
    #[must_use]
    pub const fn all() -> [Self; 3] {
        [Self::Osnovna, Self::Srednja, Self::Napredna]
    }
}

/// An immutable snapshot of the imported questionnaire.
///
/// Exactly one version is active at any time; assessments pin the version
/// active at their creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionnaireVersion {
    /// Unique identifier (assigned by the store).
    pub id: Option<i64>,
    /// Hash of the imported content; identical reimports are no-ops.
    pub content_hash: String,
    /// Operator-facing description of the import.
    pub description: Option<String>,
    /// Whether this is the active version.
    pub is_active: bool,
    /// Import timestamp.
    pub imported_at: chrono::DateTime<chrono::Utc>,
}

/// Top grouping level of the framework.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Measure {
    /// Unique identifier (assigned by the store).
    pub id: Option<i64>,
    /// Owning questionnaire version.
    pub version_id: i64,
    /// Code, unique within the version (e.g. "M.1").
    pub code: String,
    /// Display title.
    pub title: String,
    /// Display order.
    pub order_index: u32,
}

/// Second grouping level, owned by a measure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submeasure {
    /// Unique identifier (assigned by the store).
    pub id: Option<i64>,
    /// Owning measure.
    pub measure_id: i64,
    /// Code, unique within the measure (e.g. "1.2").
    pub code: String,
    /// Display title.
    pub title: String,
    /// Display order.
    pub order_index: u32,
}

/// An atomic requirement of the framework, globally unique by code.
///
/// A control participates in many submeasures through
/// [`ControlSubmeasureMapping`]; the mapping is the only path from a control
/// to its submeasure context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Control {
    /// Unique identifier (assigned by the store).
    pub id: Option<i64>,
    /// Globally unique code (e.g. "POL-001").
    pub code: String,
    /// Display title.
    pub title: String,
    /// Long-form requirement text.
    pub description: Option<String>,
}

/// M:N edge between controls and submeasures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlSubmeasureMapping {
    /// Control side of the edge.
    pub control_id: i64,
    /// Submeasure side of the edge.
    pub submeasure_id: i64,
    /// Display order of the control within the submeasure.
    pub order_index: u32,
}

/// Applicability record for `(control, submeasure, level)`.
///
/// Absence of a record means the control is not applicable at that level in
/// that submeasure context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlRequirement {
    /// Control the requirement applies to.
    pub control_id: i64,
    /// Submeasure context.
    pub submeasure_id: i64,
    /// Security level the record governs.
    pub level: SecurityLevel,
    /// Whether the control must be answered before submission.
    pub is_mandatory: bool,
    /// Whether the control counts at this level at all.
    pub is_applicable: bool,
    /// Per-control floor for the combined score, when defined.
    /// `None` means no floor (the individual criterion passes by definition).
    pub minimum_score: Option<Decimal>,
}

/// The minimum-score values the framework allows.
pub const ALLOWED_MINIMUM_SCORES: [&str; 6] = ["2.0", "2.5", "3.0", "3.5", "4.0", "5.0"];

impl ControlRequirement {
    /// Checks that `minimum_score`, when present, is one of the allowed
    /// framework values.
    #[must_use]
    pub fn minimum_score_allowed(&self) -> bool {
        self.minimum_score.is_none_or(|m| {
            ALLOWED_MINIMUM_SCORES
                .iter()
                .any(|s| s.parse::<Decimal>().is_ok_and(|d| d == m))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_security_level_roundtrip() {
        for level in SecurityLevel::all() {
            assert_eq!(SecurityLevel::parse(level.as_str()).unwrap(), level);
        }
    }

    #[test]
    fn test_security_level_case_insensitive() {
        assert_eq!(
            SecurityLevel::parse("SREDNJA").unwrap(),
            SecurityLevel::Srednja
        );
    }

    #[test]
    fn test_security_level_invalid() {
        assert!(SecurityLevel::parse("extreme").is_err());
    }

    #[test]
    fn test_minimum_score_allowed() {
        let mut req = ControlRequirement {
            control_id: 1,
            submeasure_id: 1,
            level: SecurityLevel::Osnovna,
            is_mandatory: true,
            is_applicable: true,
            minimum_score: Some(dec!(2.5)),
        };
        assert!(req.minimum_score_allowed());

        req.minimum_score = Some(dec!(4.5));
        assert!(!req.minimum_score_allowed());

        req.minimum_score = None;
        assert!(req.minimum_score_allowed());
    }

    #[test]
    fn test_serde_level_lowercase() {
        let json = serde_json::to_string(&SecurityLevel::Napredna).unwrap();
        assert_eq!(json, "\"napredna\"");
    }
}
