//! Database schema definitions.
//!
//! Contains SQL schema and migration logic for the `SQLite` store. One
//! database holds the retrieval corpus (documents, chunks, full-text
//! index), the questionnaire catalog, and all assessment state.

/// Current schema version.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// SQL schema for initial database setup.
pub const SCHEMA_SQL: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_info (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Tenant roots
CREATE TABLE IF NOT EXISTS organizations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

-- Immutable questionnaire snapshots; exactly one active at a time
CREATE TABLE IF NOT EXISTS questionnaire_versions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    content_hash TEXT NOT NULL,
    description TEXT,
    is_active INTEGER NOT NULL DEFAULT 0,
    imported_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_versions_hash ON questionnaire_versions(content_hash);

-- Catalog hierarchy
CREATE TABLE IF NOT EXISTS measures (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    version_id INTEGER NOT NULL,
    code TEXT NOT NULL,
    title TEXT NOT NULL,
    order_index INTEGER NOT NULL DEFAULT 0,
    UNIQUE (version_id, code),
    FOREIGN KEY (version_id) REFERENCES questionnaire_versions(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS submeasures (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    measure_id INTEGER NOT NULL,
    code TEXT NOT NULL,
    title TEXT NOT NULL,
    order_index INTEGER NOT NULL DEFAULT 0,
    UNIQUE (measure_id, code),
    FOREIGN KEY (measure_id) REFERENCES measures(id) ON DELETE CASCADE
);

-- Controls are global by code; versions reach them through mappings
CREATE TABLE IF NOT EXISTS controls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    description TEXT
);

-- The only path from a control to its submeasure context
CREATE TABLE IF NOT EXISTS control_submeasure_mappings (
    control_id INTEGER NOT NULL,
    submeasure_id INTEGER NOT NULL,
    order_index INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (control_id, submeasure_id),
    FOREIGN KEY (control_id) REFERENCES controls(id) ON DELETE CASCADE,
    FOREIGN KEY (submeasure_id) REFERENCES submeasures(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_mappings_submeasure ON control_submeasure_mappings(submeasure_id);

-- Applicability per (control, submeasure, level); absence = not applicable
CREATE TABLE IF NOT EXISTS control_requirements (
    control_id INTEGER NOT NULL,
    submeasure_id INTEGER NOT NULL,
    level TEXT NOT NULL,
    is_mandatory INTEGER NOT NULL DEFAULT 0,
    is_applicable INTEGER NOT NULL DEFAULT 1,
    minimum_score TEXT,
    PRIMARY KEY (control_id, submeasure_id, level),
    FOREIGN KEY (control_id) REFERENCES controls(id) ON DELETE CASCADE,
    FOREIGN KEY (submeasure_id) REFERENCES submeasures(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_requirements_level ON control_requirements(level);

-- Uploaded compliance documents (organization-private or global corpus)
CREATE TABLE IF NOT EXISTS processed_documents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    organization_id INTEGER,
    scope TEXT NOT NULL DEFAULT 'organization',
    is_global INTEGER NOT NULL DEFAULT 0,
    uploaded_by TEXT,
    document_type TEXT,
    source TEXT,
    title TEXT NOT NULL,
    file_name TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    mime_type TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    upload_date TEXT NOT NULL,
    processed_date TEXT,
    processing_metadata TEXT,
    CHECK (
        (scope = 'global' AND organization_id IS NULL AND is_global = 1) OR
        (scope = 'organization' AND organization_id IS NOT NULL AND is_global = 0)
    )
);

CREATE INDEX IF NOT EXISTS idx_documents_org_scope_status
    ON processed_documents(organization_id, scope, status);
CREATE INDEX IF NOT EXISTS idx_documents_global ON processed_documents(is_global, status);

-- Retrieval chunks; created only by ingestion, destroyed with their parent
CREATE TABLE IF NOT EXISTS document_chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id INTEGER NOT NULL,
    chunk_index INTEGER NOT NULL,
    content TEXT NOT NULL,
    embedding BLOB,
    control_ids TEXT NOT NULL DEFAULT '[]',
    doc_type TEXT NOT NULL DEFAULT 'custom',
    section_title TEXT,
    page_start INTEGER NOT NULL,
    page_end INTEGER NOT NULL,
    page_anchor INTEGER NOT NULL,
    chunk_metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    CHECK (page_start <= page_anchor AND page_anchor <= page_end),
    FOREIGN KEY (document_id) REFERENCES processed_documents(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_chunks_document ON document_chunks(document_id, chunk_index);
CREATE INDEX IF NOT EXISTS idx_chunks_doc_type ON document_chunks(doc_type);
-- Containment scans over control_ids go through this covering index
CREATE INDEX IF NOT EXISTS idx_chunks_control_ids ON document_chunks(control_ids);

-- FTS5 virtual table for ranked full-text search over chunk content.
-- unicode61 with diacritic folding keeps hr/en queries language-agnostic.
CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
    content,
    content='document_chunks',
    content_rowid='id',
    tokenize='unicode61 remove_diacritics 2'
);

-- Triggers to keep the FTS index in sync with document_chunks
CREATE TRIGGER IF NOT EXISTS chunks_ai AFTER INSERT ON document_chunks BEGIN
    INSERT INTO chunks_fts(rowid, content) VALUES (new.id, new.content);
END;

CREATE TRIGGER IF NOT EXISTS chunks_ad AFTER DELETE ON document_chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, content) VALUES('delete', old.id, old.content);
END;

CREATE TRIGGER IF NOT EXISTS chunks_au AFTER UPDATE ON document_chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, content) VALUES('delete', old.id, old.content);
    INSERT INTO chunks_fts(chunks_fts, rowid, content) VALUES (new.id, new.content);
END;

-- Assessments pin the questionnaire version active at creation
CREATE TABLE IF NOT EXISTS assessments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    organization_id INTEGER NOT NULL,
    version_id INTEGER NOT NULL,
    security_level TEXT NOT NULL,
    title TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'draft',
    total_controls INTEGER NOT NULL DEFAULT 0,
    answered_controls INTEGER NOT NULL DEFAULT 0,
    mandatory_controls INTEGER NOT NULL DEFAULT 0,
    mandatory_answered INTEGER NOT NULL DEFAULT 0,
    compliance_percentage TEXT,
    compliance_status TEXT,
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    FOREIGN KEY (version_id) REFERENCES questionnaire_versions(id)
);

CREATE INDEX IF NOT EXISTS idx_assessments_org ON assessments(organization_id, status);

-- Answers are unique per (assessment, control, submeasure); concurrent
-- writes on the same key merge via upsert
CREATE TABLE IF NOT EXISTS assessment_answers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    assessment_id INTEGER NOT NULL,
    control_id INTEGER NOT NULL,
    submeasure_id INTEGER NOT NULL,
    documentation_score INTEGER,
    implementation_score INTEGER,
    comments TEXT,
    evidence_files TEXT NOT NULL DEFAULT '[]',
    answered_by TEXT,
    ip_address TEXT,
    user_agent TEXT,
    answered_at TEXT NOT NULL,
    UNIQUE (assessment_id, control_id, submeasure_id),
    FOREIGN KEY (assessment_id) REFERENCES assessments(id) ON DELETE CASCADE,
    CHECK (documentation_score IS NULL OR (documentation_score BETWEEN 1 AND 5)),
    CHECK (implementation_score IS NULL OR (implementation_score BETWEEN 1 AND 5))
);

CREATE INDEX IF NOT EXISTS idx_answers_assessment ON assessment_answers(assessment_id);
CREATE INDEX IF NOT EXISTS idx_answers_submeasure ON assessment_answers(assessment_id, submeasure_id);

-- Computed score layers; exactly one current row per key, updated in place
CREATE TABLE IF NOT EXISTS submeasure_scores (
    assessment_id INTEGER NOT NULL,
    submeasure_id INTEGER NOT NULL,
    documentation_avg TEXT,
    implementation_avg TEXT,
    overall_score TEXT,
    passes_individual INTEGER NOT NULL DEFAULT 0,
    passes_average INTEGER NOT NULL DEFAULT 0,
    passes_overall INTEGER NOT NULL DEFAULT 0,
    total_controls INTEGER NOT NULL DEFAULT 0,
    answered_controls INTEGER NOT NULL DEFAULT 0,
    mandatory_controls INTEGER NOT NULL DEFAULT 0,
    mandatory_answered INTEGER NOT NULL DEFAULT 0,
    failed_controls TEXT NOT NULL DEFAULT '[]',
    updated_at TEXT NOT NULL,
    PRIMARY KEY (assessment_id, submeasure_id),
    FOREIGN KEY (assessment_id) REFERENCES assessments(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS measure_scores (
    assessment_id INTEGER NOT NULL,
    measure_id INTEGER NOT NULL,
    documentation_avg TEXT,
    implementation_avg TEXT,
    overall_score TEXT,
    passes_compliance INTEGER NOT NULL DEFAULT 0,
    total_submeasures INTEGER NOT NULL DEFAULT 0,
    passed_submeasures INTEGER NOT NULL DEFAULT 0,
    critical_failures TEXT NOT NULL DEFAULT '[]',
    total_controls INTEGER NOT NULL DEFAULT 0,
    answered_controls INTEGER NOT NULL DEFAULT 0,
    mandatory_controls INTEGER NOT NULL DEFAULT 0,
    mandatory_answered INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (assessment_id, measure_id),
    FOREIGN KEY (assessment_id) REFERENCES assessments(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS compliance_scores (
    assessment_id INTEGER PRIMARY KEY,
    overall_score TEXT,
    compliance_percentage TEXT NOT NULL DEFAULT '0',
    passes_compliance INTEGER NOT NULL DEFAULT 0,
    total_measures INTEGER NOT NULL DEFAULT 0,
    passed_measures INTEGER NOT NULL DEFAULT 0,
    maturity_score INTEGER NOT NULL DEFAULT 0,
    maturity_threshold INTEGER NOT NULL DEFAULT 0,
    meets_maturity_trend INTEGER NOT NULL DEFAULT 0,
    security_level TEXT NOT NULL,
    individual_threshold TEXT NOT NULL,
    average_threshold TEXT NOT NULL,
    detailed_results TEXT,
    updated_at TEXT NOT NULL,
    FOREIGN KEY (assessment_id) REFERENCES assessments(id) ON DELETE CASCADE
);

-- Append-only; no foreign key so rows survive assessment deletion
CREATE TABLE IF NOT EXISTS audit_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    assessment_id INTEGER,
    user_id TEXT,
    action TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    entity_id INTEGER,
    old_values TEXT,
    new_values TEXT,
    change_summary TEXT,
    ip_address TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_assessment ON audit_logs(assessment_id, created_at);

-- Cached AI-derived artifact; stale flips on any answer write
CREATE TABLE IF NOT EXISTS assessment_insights (
    assessment_id INTEGER PRIMARY KEY,
    gaps TEXT NOT NULL DEFAULT '[]',
    roadmap TEXT NOT NULL DEFAULT '{}',
    summary TEXT,
    stale INTEGER NOT NULL DEFAULT 0,
    computed_at TEXT NOT NULL,
    FOREIGN KEY (assessment_id) REFERENCES assessments(id) ON DELETE CASCADE
);

-- Recommendations; at most one active per (assessment, control)
CREATE TABLE IF NOT EXISTS recommendations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    assessment_id INTEGER NOT NULL,
    control_id INTEGER NOT NULL,
    content TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    superseded_by_id INTEGER,
    created_at TEXT NOT NULL,
    FOREIGN KEY (assessment_id) REFERENCES assessments(id) ON DELETE CASCADE
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_recommendations_active
    ON recommendations(assessment_id, control_id) WHERE is_active = 1;
"#;

/// SQL to check if schema is initialized.
pub const CHECK_SCHEMA_SQL: &str = r"
SELECT COUNT(*) FROM sqlite_master
WHERE type='table' AND name='schema_info';
";

/// SQL to get schema version.
pub const GET_VERSION_SQL: &str = r"
SELECT value FROM schema_info WHERE key = 'version';
";

/// SQL to set schema version.
pub const SET_VERSION_SQL: &str = r"
INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?);
";

/// Migrations from older schema versions.
pub struct Migration {
    /// Version this migration upgrades from.
    pub from_version: u32,
    /// Version this migration upgrades to.
    pub to_version: u32,
    /// SQL statements to execute.
    pub sql: &'static str,
}

/// Available migrations.
pub const MIGRATIONS: &[Migration] = &[];

/// Gets migrations needed to upgrade from a version.
#[must_use]
pub fn get_migrations_from(current_version: u32) -> Vec<&'static Migration> {
    MIGRATIONS
        .iter()
        .filter(|m| m.from_version >= current_version && m.to_version <= CURRENT_SCHEMA_VERSION)
        .collect()
}
