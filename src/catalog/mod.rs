//! Questionnaire catalog import and versioning.

pub mod import;

pub use import::{
    ImportOutcome, ImportRow, LevelRequirement, import_questionnaire, rows_from_json,
};
