//! Assessments, answers, audit records, and derived artifacts.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core::catalog::SecurityLevel;
use crate::error::AssessmentError;

/// Lifecycle status of an assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentStatus {
    /// Created, no answers yet.
    Draft,
    /// At least one answer written.
    InProgress,
    /// Under internal review.
    Review,
    /// All mandatory controls answered and compliance passed.
    Completed,
    /// Abandoned by the organization.
    Abandoned,
    /// Terminal, read-only.
    Archived,
}

impl AssessmentStatus {
    /// Returns the canonical string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::InProgress => "in_progress",
            Self::Review => "review",
            Self::Completed => "completed",
            Self::Abandoned => "abandoned",
            Self::Archived => "archived",
        }
    }

    /// Parses the canonical string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "in_progress" => Some(Self::InProgress),
            "review" => Some(Self::Review),
            "completed" => Some(Self::Completed),
            "abandoned" => Some(Self::Abandoned),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }

    /// Statuses reachable from this one by a manual transition.
    #[must_use]
    pub const fn allowed_transitions(self) -> &'static [Self] {
        match self {
            Self::Draft => &[Self::InProgress, Self::Abandoned],
            Self::InProgress => &[Self::Review, Self::Completed, Self::Abandoned],
            Self::Review => &[Self::InProgress, Self::Completed, Self::Abandoned],
            Self::Completed => &[Self::Archived],
            Self::Abandoned => &[Self::Draft, Self::Archived],
            Self::Archived => &[],
        }
    }

    /// Checks whether a transition to `target` is allowed.
    #[must_use]
    pub fn can_transition_to(self, target: Self) -> bool {
        self.allowed_transitions().contains(&target)
    }

    /// Validates a transition, returning the lifecycle error on refusal.
    ///
    /// # Errors
    ///
    /// Returns [`AssessmentError::InvalidTransition`] when the state machine
    /// forbids the move.
    pub fn validate_transition(self, target: Self) -> Result<(), AssessmentError> {
        if self.can_transition_to(target) {
            Ok(())
        } else {
            Err(AssessmentError::InvalidTransition {
                from: self.as_str().to_string(),
                to: target.as_str().to_string(),
            })
        }
    }

    /// Whether auto-transitions may fire from this status.
    #[must_use]
    pub const fn allows_auto_transition(self) -> bool {
        matches!(self, Self::Draft | Self::InProgress)
    }
}

/// Cached compliance verdict on the assessment row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
    /// All measures with answers pass.
    Compliant,
    /// At least one measure with answers fails.
    NonCompliant,
}

impl ComplianceStatus {
    /// Returns the canonical string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Compliant => "compliant",
            Self::NonCompliant => "non_compliant",
        }
    }

    /// Parses the canonical string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "compliant" => Some(Self::Compliant),
            "non_compliant" => Some(Self::NonCompliant),
            _ => None,
        }
    }
}

/// An organization's assessment attempt at a fixed security level.
///
/// Pinned to the questionnaire version active at creation; the cached
/// counters are refreshed after every answer write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assessment {
    /// Unique identifier (assigned by the store).
    pub id: Option<i64>,
    /// Owning organization.
    pub organization_id: i64,
    /// Pinned questionnaire version.
    pub version_id: i64,
    /// Security level the assessment is conducted at.
    pub security_level: SecurityLevel,
    /// Display title.
    pub title: String,
    /// Lifecycle status.
    pub status: AssessmentStatus,
    /// Applicable controls at this level (cached).
    pub total_controls: u32,
    /// Answered controls (cached).
    pub answered_controls: u32,
    /// Mandatory controls at this level (cached).
    pub mandatory_controls: u32,
    /// Answered mandatory controls (cached).
    pub mandatory_answered: u32,
    /// Percentage of passed measures (cached, 0..=100).
    pub compliance_percentage: Option<Decimal>,
    /// Cached compliance verdict, when computed.
    pub compliance_status: Option<ComplianceStatus>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Set on the draft -> `in_progress` transition.
    pub started_at: Option<DateTime<Utc>>,
    /// Set on the transition into completed.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Assessment {
    /// Creates a draft assessment.
    #[must_use]
    pub fn new(
        organization_id: i64,
        version_id: i64,
        security_level: SecurityLevel,
        title: String,
    ) -> Self {
        Self {
            id: None,
            organization_id,
            version_id,
            security_level,
            title,
            status: AssessmentStatus::Draft,
            total_controls: 0,
            answered_controls: 0,
            mandatory_controls: 0,
            mandatory_answered: 0,
            compliance_percentage: None,
            compliance_status: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Completion percentage over all applicable controls, capped at 100.
    #[must_use]
    pub fn completion_percentage(&self) -> Decimal {
        if self.total_controls == 0 {
            return Decimal::ZERO;
        }
        let pct = Decimal::from(self.answered_controls) * Decimal::from(100)
            / Decimal::from(self.total_controls);
        pct.min(Decimal::from(100))
    }

    /// Whether every mandatory control has an answer.
    #[must_use]
    pub const fn mandatory_complete(&self) -> bool {
        self.mandatory_answered >= self.mandatory_controls
    }
}

/// A scored answer for a control within its submeasure context.
///
/// Unique per `(assessment, control, submeasure)`; concurrent writes on the
/// same key merge via upsert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentAnswer {
    /// Unique identifier (assigned by the store).
    pub id: Option<i64>,
    /// Owning assessment.
    pub assessment_id: i64,
    /// Answered control.
    pub control_id: i64,
    /// Submeasure context of the answer.
    pub submeasure_id: i64,
    /// Documentation maturity score (1..=5).
    pub documentation_score: Option<u8>,
    /// Implementation maturity score (1..=5).
    pub implementation_score: Option<u8>,
    /// Free-form assessor comments.
    pub comments: Option<String>,
    /// Evidence file references.
    pub evidence_files: Vec<String>,
    /// Answering user (subject claim).
    pub answered_by: Option<String>,
    /// Client address of the write.
    pub ip_address: Option<String>,
    /// Client user agent of the write.
    pub user_agent: Option<String>,
    /// Timestamp of the latest write.
    pub answered_at: DateTime<Utc>,
}

impl AssessmentAnswer {
    /// Creates an answer with both scores.
    #[must_use]
    pub fn new(
        assessment_id: i64,
        control_id: i64,
        submeasure_id: i64,
        documentation_score: Option<u8>,
        implementation_score: Option<u8>,
    ) -> Self {
        Self {
            id: None,
            assessment_id,
            control_id,
            submeasure_id,
            documentation_score,
            implementation_score,
            comments: None,
            evidence_files: Vec::new(),
            answered_by: None,
            ip_address: None,
            user_agent: None,
            answered_at: Utc::now(),
        }
    }

    /// Whether both scores are present.
    #[must_use]
    pub const fn is_scored(&self) -> bool {
        self.documentation_score.is_some() && self.implementation_score.is_some()
    }

    /// Combined score `(D + I) / 2`, when both parts are present.
    /// Rounding to 0.01 happens in the scoring engine.
    #[must_use]
    pub fn average_score(&self) -> Option<Decimal> {
        match (self.documentation_score, self.implementation_score) {
            (Some(d), Some(i)) => {
                Some((Decimal::from(d) + Decimal::from(i)) / Decimal::from(2_u8))
            }
            _ => None,
        }
    }
}

/// Auditable actions, one per mutation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Assessment created.
    Created,
    /// Assessment fields updated.
    Updated,
    /// Status transition (manual, auto, or forced).
    StatusChanged,
    /// Answer written or merged.
    AnswerWritten,
    /// Assessment soft-deleted (archived).
    Deleted,
    /// Questionnaire version imported.
    Imported,
}

impl AuditAction {
    /// Returns the canonical string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::StatusChanged => "status_changed",
            Self::AnswerWritten => "answer_written",
            Self::Deleted => "deleted",
            Self::Imported => "imported",
        }
    }
}

/// Append-only audit record. Rows are never updated or deleted, and survive
/// assessment deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    /// Unique identifier (assigned by the store).
    pub id: Option<i64>,
    /// Assessment the action touched, when applicable.
    pub assessment_id: Option<i64>,
    /// Acting user, when known.
    pub user_id: Option<String>,
    /// What happened.
    pub action: AuditAction,
    /// Entity kind ("assessment", "answer", "version", ...).
    pub entity_type: String,
    /// Entity id within its kind.
    pub entity_id: Option<i64>,
    /// JSON snapshot before the mutation.
    pub old_values: Option<serde_json::Value>,
    /// JSON snapshot after the mutation.
    pub new_values: Option<serde_json::Value>,
    /// Human-readable summary.
    pub change_summary: Option<String>,
    /// Client address, when known.
    pub ip_address: Option<String>,
    /// Record timestamp.
    pub created_at: DateTime<Utc>,
}

impl AuditLog {
    /// Creates an audit record for an assessment-level action.
    #[must_use]
    pub fn for_assessment(assessment_id: i64, action: AuditAction) -> Self {
        Self {
            id: None,
            assessment_id: Some(assessment_id),
            user_id: None,
            action,
            entity_type: "assessment".to_string(),
            entity_id: Some(assessment_id),
            old_values: None,
            new_values: None,
            change_summary: None,
            ip_address: None,
            created_at: Utc::now(),
        }
    }

    /// Attaches before/after snapshots.
    #[must_use]
    pub fn with_values(
        mut self,
        old_values: Option<serde_json::Value>,
        new_values: Option<serde_json::Value>,
    ) -> Self {
        self.old_values = old_values;
        self.new_values = new_values;
        self
    }

    /// Attaches a summary line.
    #[must_use]
    pub fn with_summary(mut self, summary: &str) -> Self {
        self.change_summary = Some(summary.to_string());
        self
    }
}

/// Cached AI-derived insight artifact for an assessment.
///
/// Marked stale on any answer write; recomputed on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentInsights {
    /// Owning assessment.
    pub assessment_id: i64,
    /// Gap list (failing controls with context).
    pub gaps: serde_json::Value,
    /// Improvement roadmap object.
    pub roadmap: serde_json::Value,
    /// Narrative summary.
    pub summary: Option<String>,
    /// Whether an answer write invalidated the artifact.
    pub stale: bool,
    /// Computation timestamp.
    pub computed_at: DateTime<Utc>,
}

/// Persisted recommendation for `(assessment, control)`.
///
/// At most one active row per pair; regeneration supersedes the predecessor
/// and the superseding chain stays acyclic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    /// Unique identifier (assigned by the store).
    pub id: Option<i64>,
    /// Owning assessment.
    pub assessment_id: i64,
    /// Target control.
    pub control_id: i64,
    /// Recommendation text.
    pub content: String,
    /// Whether this is the live recommendation for the pair.
    pub is_active: bool,
    /// Successor that replaced this row, if any.
    pub superseded_by_id: Option<i64>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}
