//! Versioned questionnaire import.
//!
//! The canonical spreadsheet is parsed upstream; this module receives flat
//! rows (measure / submeasure / control / per-level requirement flags) and
//! materializes them as an immutable questionnaire version. Imports are
//! keyed by a content hash: reimporting identical content is a no-op
//! unless forced, and a changed import creates a new version and
//! deactivates the previous one. Running assessments keep the version they
//! pinned at creation.

use crate::core::{
    AuditAction, AuditLog, Control, ControlRequirement, ControlSubmeasureMapping, Measure,
    QuestionnaireVersion, SecurityLevel, Submeasure,
};
use crate::error::{Result, StorageError};
use crate::storage::{SqliteStore, Store};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

/// Per-level requirement flags of one control row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelRequirement {
    /// Security level the flags apply to.
    pub level: SecurityLevel,
    /// Whether the control is mandatory at this level.
    pub is_mandatory: bool,
    /// Whether the control applies at all at this level.
    #[serde(default = "default_applicable")]
    pub is_applicable: bool,
    /// Optional per-control score floor.
    #[serde(default)]
    pub minimum_score: Option<Decimal>,
}

const fn default_applicable() -> bool {
    true
}

/// One flat row of the canonical questionnaire content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRow {
    /// Measure code (e.g. "M.1").
    pub measure_code: String,
    /// Measure title.
    pub measure_title: String,
    /// Submeasure code (e.g. "1.1").
    pub submeasure_code: String,
    /// Submeasure title.
    pub submeasure_title: String,
    /// Control code (e.g. "POL-001").
    pub control_code: String,
    /// Control title.
    pub control_title: String,
    /// Long-form control text.
    #[serde(default)]
    pub control_description: Option<String>,
    /// Per-level obligation flags.
    pub requirements: Vec<LevelRequirement>,
}

/// Import result.
#[derive(Debug, Clone, Serialize)]
pub struct ImportOutcome {
    /// Version the content now lives under.
    pub version_id: i64,
    /// False when the import was a no-op (identical content).
    pub created: bool,
    /// Content hash of the import.
    pub content_hash: String,
    /// Measures in the version.
    pub measures: usize,
    /// Submeasures in the version.
    pub submeasures: usize,
    /// Distinct controls referenced.
    pub controls: usize,
}

/// Stable FNV-1a hash of the canonical serialization of the rows.
fn content_hash(rows: &[ImportRow]) -> Result<String> {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let canonical = serde_json::to_vec(rows).map_err(StorageError::from)?;
    let mut hash = OFFSET;
    for b in canonical {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(PRIME);
    }
    Ok(format!("{hash:016x}"))
}

/// Parses import rows from their JSON form.
///
/// # Errors
///
/// Returns a serialization error for malformed input.
pub fn rows_from_json(json: &str) -> Result<Vec<ImportRow>> {
    serde_json::from_str(json).map_err(|e| StorageError::Serialization(e.to_string()).into())
}

/// Imports questionnaire content as a new active version.
///
/// Identical content (by hash) is a no-op unless `force` is set. A changed
/// import creates a new version, fills the hierarchy, activates it, and
/// deactivates the previous active version.
///
/// # Errors
///
/// Returns store errors; nothing is activated on failure.
pub fn import_questionnaire(
    store: &mut SqliteStore,
    rows: &[ImportRow],
    description: Option<&str>,
    force: bool,
) -> Result<ImportOutcome> {
    let hash = content_hash(rows)?;

    if !force
        && let Some(existing) = store.find_version_by_hash(&hash)?
    {
        info!(content_hash = %hash, version_id = existing.id, "identical questionnaire content; import skipped");
        return Ok(ImportOutcome {
            version_id: existing.id.unwrap_or_default(),
            created: false,
            content_hash: hash,
            measures: 0,
            submeasures: 0,
            controls: 0,
        });
    }

    let version_id = store.insert_version(&QuestionnaireVersion {
        id: None,
        content_hash: hash.clone(),
        description: description.map(ToString::to_string),
        is_active: false,
        imported_at: chrono::Utc::now(),
    })?;

    let mut measure_ids: HashMap<String, i64> = HashMap::new();
    let mut submeasure_ids: HashMap<(String, String), i64> = HashMap::new();
    let mut control_ids: HashMap<String, i64> = HashMap::new();
    let mut mapping_order: HashMap<i64, u32> = HashMap::new();

    for row in rows {
        let measure_id = match measure_ids.get(&row.measure_code) {
            Some(id) => *id,
            None => {
                let id = store.insert_measure(&Measure {
                    id: None,
                    version_id,
                    code: row.measure_code.clone(),
                    title: row.measure_title.clone(),
                    order_index: measure_ids.len() as u32,
                })?;
                measure_ids.insert(row.measure_code.clone(), id);
                id
            }
        };

        let submeasure_key = (row.measure_code.clone(), row.submeasure_code.clone());
        let submeasure_id = match submeasure_ids.get(&submeasure_key) {
            Some(id) => *id,
            None => {
                let order = submeasure_ids
                    .keys()
                    .filter(|(m, _)| *m == row.measure_code)
                    .count() as u32;
                let id = store.insert_submeasure(&Submeasure {
                    id: None,
                    measure_id,
                    code: row.submeasure_code.clone(),
                    title: row.submeasure_title.clone(),
                    order_index: order,
                })?;
                submeasure_ids.insert(submeasure_key, id);
                id
            }
        };

        let control_id = match control_ids.get(&row.control_code) {
            Some(id) => *id,
            None => {
                let id = store.upsert_control(&Control {
                    id: None,
                    code: row.control_code.clone(),
                    title: row.control_title.clone(),
                    description: row.control_description.clone(),
                })?;
                control_ids.insert(row.control_code.clone(), id);
                id
            }
        };

        let order = mapping_order.entry(submeasure_id).or_insert(0);
        store.insert_mapping(&ControlSubmeasureMapping {
            control_id,
            submeasure_id,
            order_index: *order,
        })?;
        *order += 1;

        for req in &row.requirements {
            store.upsert_requirement(&ControlRequirement {
                control_id,
                submeasure_id,
                level: req.level,
                is_mandatory: req.is_mandatory,
                is_applicable: req.is_applicable,
                minimum_score: req.minimum_score,
            })?;
        }
    }

    store.activate_version(version_id)?;

    let mut audit = AuditLog {
        id: None,
        assessment_id: None,
        user_id: None,
        action: AuditAction::Imported,
        entity_type: "questionnaire_version".to_string(),
        entity_id: Some(version_id),
        old_values: None,
        new_values: Some(serde_json::json!({
            "content_hash": hash,
            "measures": measure_ids.len(),
            "controls": control_ids.len(),
        })),
        change_summary: None,
        ip_address: None,
        created_at: chrono::Utc::now(),
    };
    audit.change_summary = Some(format!(
        "Questionnaire imported: {} measures, {} submeasures, {} controls",
        measure_ids.len(),
        submeasure_ids.len(),
        control_ids.len()
    ));
    store.append_audit(&audit)?;

    info!(
        version_id,
        measures = measure_ids.len(),
        submeasures = submeasure_ids.len(),
        controls = control_ids.len(),
        "questionnaire version imported"
    );

    Ok(ImportOutcome {
        version_id,
        created: true,
        content_hash: hash,
        measures: measure_ids.len(),
        submeasures: submeasure_ids.len(),
        controls: control_ids.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn rows() -> Vec<ImportRow> {
        vec![
            ImportRow {
                measure_code: "M.1".to_string(),
                measure_title: "Upravljanje".to_string(),
                submeasure_code: "1.1".to_string(),
                submeasure_title: "Politike".to_string(),
                control_code: "POL-001".to_string(),
                control_title: "Sigurnosna politika".to_string(),
                control_description: None,
                requirements: vec![
                    LevelRequirement {
                        level: SecurityLevel::Osnovna,
                        is_mandatory: true,
                        is_applicable: true,
                        minimum_score: None,
                    },
                    LevelRequirement {
                        level: SecurityLevel::Napredna,
                        is_mandatory: true,
                        is_applicable: true,
                        minimum_score: Some(dec!(4.0)),
                    },
                ],
            },
            ImportRow {
                measure_code: "M.1".to_string(),
                measure_title: "Upravljanje".to_string(),
                submeasure_code: "1.2".to_string(),
                submeasure_title: "Nadzor".to_string(),
                control_code: "NADZ-001".to_string(),
                control_title: "Nadzor pristupa".to_string(),
                control_description: Some("Nadzirati pristup sustavima.".to_string()),
                requirements: vec![LevelRequirement {
                    level: SecurityLevel::Osnovna,
                    is_mandatory: false,
                    is_applicable: true,
                    minimum_score: None,
                }],
            },
        ]
    }

    fn store() -> SqliteStore {
        let mut s = SqliteStore::in_memory().unwrap();
        s.init().unwrap();
        s
    }

    #[test]
    fn test_import_creates_active_version() {
        let mut s = store();
        let outcome = import_questionnaire(&mut s, &rows(), Some("v1"), false).unwrap();
        assert!(outcome.created);
        assert_eq!(outcome.measures, 1);
        assert_eq!(outcome.submeasures, 2);
        assert_eq!(outcome.controls, 2);

        let active = s.active_version().unwrap().unwrap();
        assert_eq!(active.id, Some(outcome.version_id));
        assert_eq!(active.content_hash, outcome.content_hash);

        let measures = s.measures_for_version(outcome.version_id).unwrap();
        assert_eq!(measures.len(), 1);
        let submeasures = s
            .submeasures_for_measure(measures[0].id.unwrap())
            .unwrap();
        assert_eq!(submeasures.len(), 2);
    }

    #[test]
    fn test_identical_reimport_is_noop() {
        let mut s = store();
        let first = import_questionnaire(&mut s, &rows(), None, false).unwrap();
        let second = import_questionnaire(&mut s, &rows(), None, false).unwrap();
        assert!(!second.created);
        assert_eq!(second.version_id, first.version_id);
        assert_eq!(second.content_hash, first.content_hash);
    }

    #[test]
    fn test_forced_reimport_creates_new_version() {
        let mut s = store();
        let first = import_questionnaire(&mut s, &rows(), None, false).unwrap();
        let second = import_questionnaire(&mut s, &rows(), None, true).unwrap();
        assert!(second.created);
        assert_ne!(second.version_id, first.version_id);

        // Only the new version is active
        let active = s.active_version().unwrap().unwrap();
        assert_eq!(active.id, Some(second.version_id));
    }

    #[test]
    fn test_changed_content_new_version_deactivates_old() {
        let mut s = store();
        let first = import_questionnaire(&mut s, &rows(), None, false).unwrap();

        let mut changed = rows();
        changed[0].control_title = "Azurirana politika".to_string();
        let second = import_questionnaire(&mut s, &changed, None, false).unwrap();

        assert!(second.created);
        assert_ne!(second.content_hash, first.content_hash);
        let active = s.active_version().unwrap().unwrap();
        assert_eq!(active.id, Some(second.version_id));
    }

    #[test]
    fn test_requirements_materialized() {
        let mut s = store();
        let outcome = import_questionnaire(&mut s, &rows(), None, false).unwrap();
        let control = s.control_by_code("POL-001").unwrap().unwrap();
        let measures = s.measures_for_version(outcome.version_id).unwrap();
        let submeasures = s
            .submeasures_for_measure(measures[0].id.unwrap())
            .unwrap();

        let req = s
            .requirement_for(
                control.id.unwrap(),
                submeasures[0].id.unwrap(),
                SecurityLevel::Napredna,
            )
            .unwrap()
            .unwrap();
        assert_eq!(req.minimum_score, Some(dec!(4.0)));
        assert!(req.is_mandatory);

        // Absence of a record means not applicable at that level
        let missing = s
            .requirement_for(
                control.id.unwrap(),
                submeasures[0].id.unwrap(),
                SecurityLevel::Srednja,
            )
            .unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_rows_from_json() {
        let json = serde_json::to_string(&rows()).unwrap();
        let parsed = rows_from_json(&json).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].control_code, "POL-001");

        assert!(rows_from_json("not json").is_err());
    }
}
