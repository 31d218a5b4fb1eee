//! Shared test fixtures: a small seeded catalog and a draft assessment.

use crate::core::{
    Assessment, Control, ControlRequirement, ControlSubmeasureMapping, Measure,
    QuestionnaireVersion, SecurityLevel, Submeasure,
};
use crate::storage::{SqliteStore, Store};

/// Handles to the seeded rows.
pub struct Catalog {
    /// The imported version.
    pub version_id: i64,
    /// One measure.
    pub measure_id: i64,
    /// Two submeasures of the measure.
    pub submeasure_ids: Vec<i64>,
    /// POL-001, POL-002, POL-003, NADZ-001. POL-003 is mapped to both
    /// submeasures (the shared control exercising DISTINCT counting).
    pub control_ids: Vec<i64>,
    /// A draft assessment at the requested level.
    pub assessment_id: i64,
}

/// Seeds one measure with two submeasures and four controls:
/// - submeasure 1.1: POL-001, POL-002, POL-003 (all mandatory)
/// - submeasure 1.2: NADZ-001 (mandatory), POL-003 (shared, not mandatory)
#[allow(clippy::unwrap_used)]
pub fn seed_catalog(level: SecurityLevel) -> (SqliteStore, Catalog) {
    {
        let mut store = SqliteStore::in_memory().unwrap();
        store.init().unwrap();

        let version_id = store
            .insert_version(&QuestionnaireVersion {
                id: None,
                content_hash: "seed".to_string(),
                description: Some("test catalog".to_string()),
                is_active: true,
                imported_at: chrono::Utc::now(),
            })
            .unwrap();

        let measure_id = store
            .insert_measure(&Measure {
                id: None,
                version_id,
                code: "M.1".to_string(),
                title: "Upravljanje sigurnoscu".to_string(),
                order_index: 0,
            })
            .unwrap();

        let submeasure_ids: Vec<i64> = ["1.1", "1.2"]
            .iter()
            .enumerate()
            .map(|(i, code)| {
                store
                    .insert_submeasure(&Submeasure {
                        id: None,
                        measure_id,
                        code: (*code).to_string(),
                        title: format!("Podmjera {code}"),
                        order_index: i as u32,
                    })
                    .unwrap()
            })
            .collect();

        let control_ids: Vec<i64> = ["POL-001", "POL-002", "POL-003", "NADZ-001"]
            .iter()
            .map(|code| {
                store
                    .upsert_control(&Control {
                        id: None,
                        code: (*code).to_string(),
                        title: format!("Kontrola {code}"),
                        description: None,
                    })
                    .unwrap()
            })
            .collect();

        // (control index, submeasure index, mandatory)
        let edges = [
            (0, 0, true),
            (1, 0, true),
            (2, 0, true),
            (3, 1, true),
            (2, 1, false),
        ];
        for (order, (c, s, mandatory)) in edges.iter().enumerate() {
            store
                .insert_mapping(&ControlSubmeasureMapping {
                    control_id: control_ids[*c],
                    submeasure_id: submeasure_ids[*s],
                    order_index: order as u32,
                })
                .unwrap();
            store
                .upsert_requirement(&ControlRequirement {
                    control_id: control_ids[*c],
                    submeasure_id: submeasure_ids[*s],
                    level,
                    is_mandatory: *mandatory,
                    is_applicable: true,
                    minimum_score: None,
                })
                .unwrap();
        }

        let assessment_id = store
            .add_assessment(&Assessment::new(
                1,
                version_id,
                level,
                "Testna procjena".to_string(),
            ))
            .unwrap();
        let counts = store.assessment_distinct_counts(assessment_id).unwrap();
        store
            .update_assessment_progress(assessment_id, &counts)
            .unwrap();

        (
            store,
            Catalog {
                version_id,
                measure_id,
                submeasure_ids,
                control_ids,
                assessment_id,
            },
        )
    }
}
