//! Assessment lifecycle: answers, status machine, progress, submission,
//! audit, and derived artifacts.

pub mod answers;
pub mod orchestrator;

#[cfg(test)]
pub(crate) mod testutil;

pub use answers::{AnswerResult, AnswerWrite, update_answer};
pub use orchestrator::{
    SUBMISSION_COMPLETION_FLOOR, SubmissionValidation, ValidationIssue, check_auto_transition,
    compute_insights, create_assessment, delete_assessment, get_compliance, submit, update_status,
    validate_submission,
};
