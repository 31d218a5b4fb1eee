//! Command execution.
//!
//! Dispatches parsed CLI commands against the store, the ingestion
//! pipeline, the retrieval engine, and the scoring/assessment layers.

use crate::answer::{ExtractiveGenerator, answer_with_citations};
use crate::assessment::{self, AnswerWrite};
use crate::catalog;
use crate::cli::output::{
    OutputFormat, format_answer, format_compliance, format_hits, format_json, format_status,
};
use crate::cli::parser::{Cli, Commands};
use crate::core::{
    Control, Language, ProcessedDocument, SecurityLevel, Submeasure,
};
use crate::embedding::create_embedder;
use crate::error::{CommandError, Error, Result, StorageError};
use crate::extract::{MIME_DOC, MIME_DOCX, MIME_PDF, MIME_TXT};
use crate::ingest;
use crate::retrieval::TwoLayerRetrieval;
use crate::storage::{DEFAULT_DB_PATH, SqliteStore, Store};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Executes a parsed CLI invocation, returning the formatted output.
///
/// # Errors
///
/// Returns any underlying subsystem error; the binary maps these to exit
/// codes and formatted messages.
pub fn execute(cli: &Cli) -> Result<String> {
    let format = OutputFormat::parse(&cli.format);
    let db_path = cli
        .db_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));

    match &cli.command {
        Commands::Init { force } => init(&db_path, *force, format),
        command => {
            let mut store = SqliteStore::open(&db_path)?;
            if !store.is_initialized()? {
                return Err(StorageError::NotInitialized.into());
            }
            dispatch(&mut store, command, format)
        }
    }
}

fn init(db_path: &Path, force: bool, format: OutputFormat) -> Result<String> {
    let mut store = SqliteStore::open(db_path)?;
    if force && store.is_initialized()? {
        store.reset()?;
    }
    store.init()?;
    Ok(match format {
        OutputFormat::Text => format!("Initialized store at {}\n", db_path.display()),
        OutputFormat::Json | OutputFormat::Ndjson => {
            format_json(&serde_json::json!({"initialized": db_path.display().to_string()}))
        }
    })
}

#[allow(clippy::too_many_lines)]
fn dispatch(store: &mut SqliteStore, command: &Commands, format: OutputFormat) -> Result<String> {
    match command {
        Commands::Init { .. } => unreachable!("handled by execute"),

        Commands::Status => Ok(format_status(&store.stats()?, format)),

        Commands::Reset { yes } => {
            if !yes {
                return Err(CommandError::Cancelled.into());
            }
            store.reset()?;
            Ok("State reset.\n".to_string())
        }

        Commands::Import {
            file,
            description,
            force,
        } => {
            let json = std::fs::read_to_string(file)?;
            let rows = catalog::rows_from_json(&json)?;
            let outcome =
                catalog::import_questionnaire(store, &rows, description.as_deref(), *force)?;
            Ok(match format {
                OutputFormat::Text => {
                    if outcome.created {
                        format!(
                            "Imported version {} ({} measures, {} submeasures, {} controls)\n",
                            outcome.version_id,
                            outcome.measures,
                            outcome.submeasures,
                            outcome.controls
                        )
                    } else {
                        format!(
                            "Content unchanged; version {} already active\n",
                            outcome.version_id
                        )
                    }
                }
                OutputFormat::Json | OutputFormat::Ndjson => format_json(&outcome),
            })
        }

        Commands::Ingest {
            file,
            org,
            global,
            title,
        } => {
            let bytes = std::fs::read(file)?;
            let mime = mime_for(file)?;
            let file_name = file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let title = title.clone().unwrap_or_else(|| {
                file.file_stem()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| file_name.clone())
            });

            let document = if *global {
                ProcessedDocument::global(title, file_name, bytes.len() as u64)
            } else {
                let code = org.as_deref().ok_or_else(|| {
                    Error::from(CommandError::MissingArgument("--org or --global".to_string()))
                })?;
                let org_id = store.upsert_organization(code, code)?;
                ProcessedDocument::organization(org_id, title, file_name, bytes.len() as u64)
            }
            .with_mime_type(mime);

            let document_id = store.add_document(&document)?;
            let embedder = create_embedder()?;
            let report = ingest::process_document(store, embedder.as_ref(), document_id, &bytes)?;
            Ok(match format {
                OutputFormat::Text => format!(
                    "Ingested document {} ({} chunks, {} pages, type {}, controls: {})\n",
                    report.document_id,
                    report.chunks_created,
                    report.pages,
                    report.doc_type,
                    if report.control_ids_found.is_empty() {
                        "-".to_string()
                    } else {
                        report.control_ids_found.join(", ")
                    }
                ),
                OutputFormat::Json | OutputFormat::Ndjson => format_json(&report),
            })
        }

        Commands::Search {
            query,
            org,
            k,
            control,
        } => {
            let org_id = resolve_org(store, org)?;
            let embedder = create_embedder()?;
            let retrieval = TwoLayerRetrieval::new(store, embedder.as_ref());
            let hits = retrieval.search(query, org_id, *k, control.as_deref())?;
            Ok(format_hits(&hits, format))
        }

        Commands::Ask {
            query,
            org,
            language,
            max_sources,
            control,
        } => {
            let org_id = resolve_org(store, org)?;
            let embedder = create_embedder()?;
            let generator = ExtractiveGenerator::new();
            let outcome = answer_with_citations(
                store,
                embedder.as_ref(),
                &generator,
                query,
                org_id,
                Language::parse(language),
                *max_sources,
                control.as_deref(),
            )?;
            Ok(format_answer(&outcome, format))
        }

        Commands::CreateAssessment { org, level, title } => {
            let org_id = store.upsert_organization(org, org)?;
            let level = SecurityLevel::parse(level).map_err(Error::Scoring)?;
            let assessment = assessment::create_assessment(store, org_id, level, title)?;
            Ok(match format {
                OutputFormat::Text => format!(
                    "Created assessment {} ({}, {} controls, {} mandatory)\n",
                    assessment.id.unwrap_or_default(),
                    level.as_str(),
                    assessment.total_controls,
                    assessment.mandatory_controls
                ),
                OutputFormat::Json | OutputFormat::Ndjson => format_json(&assessment),
            })
        }

        Commands::Answer {
            assessment,
            control,
            submeasure,
            doc,
            implementation,
            comment,
        } => {
            let row = store.get_assessment(*assessment)?;
            let control = resolve_control(store, control)?;
            let submeasure = resolve_submeasure(store, row.version_id, submeasure)?;

            let result = assessment::update_answer(
                store,
                &AnswerWrite {
                    assessment_id: *assessment,
                    control_id: control.id.unwrap_or_default(),
                    submeasure_id: submeasure.id.unwrap_or_default(),
                    documentation_score: *doc,
                    implementation_score: *implementation,
                    comments: comment.clone(),
                    ..AnswerWrite::default()
                },
            )?;

            Ok(match format {
                OutputFormat::Text => {
                    let mut out = String::new();
                    let _ = writeln!(
                        out,
                        "Answer saved for {} in {} (K = {})",
                        control.code,
                        submeasure.code,
                        result
                            .control_score
                            .as_ref()
                            .and_then(|c| c.overall_score)
                            .map_or_else(|| "-".to_string(), |d| d.to_string())
                    );
                    let _ = writeln!(
                        out,
                        "Progress: {}/{} answered, {}/{} mandatory",
                        result.progress.answered_controls,
                        result.progress.total_controls,
                        result.progress.mandatory_answered,
                        result.progress.mandatory_controls
                    );
                    if let Some((from, to)) = result.status_transition {
                        let _ = writeln!(out, "Status: {} -> {}", from.as_str(), to.as_str());
                    }
                    out
                }
                OutputFormat::Json | OutputFormat::Ndjson => format_json(&result),
            })
        }

        Commands::Score { assessment } => {
            let compliance = assessment::get_compliance(store, *assessment)?;
            Ok(format_compliance(&compliance, format))
        }

        Commands::Progress { assessment } => {
            let row = store.get_assessment(*assessment)?;
            let counts = store.assessment_distinct_counts(*assessment)?;
            Ok(match format {
                OutputFormat::Text => {
                    let mut out = String::new();
                    let _ = writeln!(out, "Assessment {} - {}", *assessment, row.title);
                    let _ = writeln!(out, "  Status:    {}", row.status.as_str());
                    let _ = writeln!(out, "  Level:     {}", row.security_level.as_str());
                    let _ = writeln!(
                        out,
                        "  Answered:  {}/{} ({}%)",
                        counts.answered_controls,
                        counts.total_controls,
                        row.completion_percentage().round_dp(1)
                    );
                    let _ = writeln!(
                        out,
                        "  Mandatory: {}/{}",
                        counts.mandatory_answered, counts.mandatory_controls
                    );
                    out
                }
                OutputFormat::Json | OutputFormat::Ndjson => format_json(&serde_json::json!({
                    "assessment": row,
                    "progress": counts,
                })),
            })
        }

        Commands::Submit { assessment } => {
            match assessment::submit(store, *assessment, None) {
                Ok((row, validation)) => Ok(match format {
                    OutputFormat::Text => {
                        let mut out =
                            format!("Submitted; status is now {}\n", row.status.as_str());
                        for warning in &validation.warnings {
                            let _ = writeln!(out, "  warning: {}", warning.message);
                        }
                        out
                    }
                    OutputFormat::Json | OutputFormat::Ndjson => format_json(&serde_json::json!({
                        "assessment": row,
                        "validation": validation,
                    })),
                }),
                Err(e) => {
                    // Show the full validation report alongside the refusal
                    let validation = assessment::validate_submission(store, *assessment)?;
                    match format {
                        OutputFormat::Text => {
                            let mut out = format!("{e}\n");
                            for issue in &validation.errors {
                                let _ = writeln!(out, "  error: {}", issue.message);
                            }
                            for issue in &validation.warnings {
                                let _ = writeln!(out, "  warning: {}", issue.message);
                            }
                            Err(Error::from(CommandError::ExecutionFailed(out)))
                        }
                        OutputFormat::Json | OutputFormat::Ndjson => {
                            Err(Error::from(CommandError::ExecutionFailed(format_json(
                                &serde_json::json!({
                                    "error": e.to_string(),
                                    "validation": validation,
                                }),
                            ))))
                        }
                    }
                }
            }
        }

        Commands::Insights { assessment } => {
            let insights = assessment::compute_insights(store, *assessment)?;
            Ok(match format {
                OutputFormat::Text => {
                    let mut out = String::new();
                    if let Some(summary) = &insights.summary {
                        let _ = writeln!(out, "{summary}");
                    }
                    let gaps = insights.gaps.as_array().map_or(0, Vec::len);
                    let _ = writeln!(out, "Gaps: {gaps}");
                    out
                }
                OutputFormat::Json | OutputFormat::Ndjson => format_json(&insights),
            })
        }
    }
}

fn resolve_org(store: &SqliteStore, code: &str) -> Result<i64> {
    store.organization_id(code)?.ok_or_else(|| {
        Error::from(CommandError::InvalidArgument(format!(
            "unknown organization: {code}"
        )))
    })
}

fn resolve_control(store: &SqliteStore, code: &str) -> Result<Control> {
    store.control_by_code(code)?.ok_or_else(|| {
        Error::Storage(StorageError::CatalogNotFound {
            entity: "control",
            identifier: code.to_string(),
        })
    })
}

fn resolve_submeasure(store: &SqliteStore, version_id: i64, code: &str) -> Result<Submeasure> {
    for measure in store.measures_for_version(version_id)? {
        for submeasure in store.submeasures_for_measure(measure.id.unwrap_or_default())? {
            if submeasure.code == code {
                return Ok(submeasure);
            }
        }
    }
    Err(Error::Storage(StorageError::CatalogNotFound {
        entity: "submeasure",
        identifier: code.to_string(),
    }))
}

/// Maps a file extension to its MIME type.
///
/// # Errors
///
/// Returns an error for unsupported extensions.
pub fn mime_for(path: &Path) -> Result<&'static str> {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "pdf" => Ok(MIME_PDF),
        "docx" => Ok(MIME_DOCX),
        "doc" => Ok(MIME_DOC),
        "txt" | "md" => Ok(MIME_TXT),
        other => Err(crate::error::IngestError::UnsupportedFormat {
            mime: format!(".{other}"),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_for() {
        assert_eq!(mime_for(Path::new("a.pdf")).unwrap(), MIME_PDF);
        assert_eq!(mime_for(Path::new("a.docx")).unwrap(), MIME_DOCX);
        assert_eq!(mime_for(Path::new("a.txt")).unwrap(), MIME_TXT);
        assert_eq!(mime_for(Path::new("a.md")).unwrap(), MIME_TXT);
        assert!(mime_for(Path::new("a.png")).is_err());
        assert!(mime_for(Path::new("noext")).is_err());
    }
}
