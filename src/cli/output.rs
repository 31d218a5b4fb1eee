//! Output formatting for CLI commands.
//!
//! Supports text, JSON, and newline-delimited JSON output.

use crate::answer::AnswerOutcome;
use crate::retrieval::SearchHit;
use crate::scoring::OverallCompliance;
use crate::storage::StoreStats;
use serde::Serialize;
use std::fmt::Write;

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// JSON output.
    Json,
    /// Newline-delimited JSON (NDJSON) for streaming consumers.
    Ndjson,
}

impl OutputFormat {
    /// Parses format from string.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "ndjson" | "jsonl" | "stream" => Self::Ndjson,
            _ => Self::Text,
        }
    }
}

/// Serializes any value as (pretty) JSON.
pub fn format_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
}

/// Formats an error for the chosen output format.
#[must_use]
pub fn format_error(error: &crate::error::Error, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => error.to_string(),
        OutputFormat::Json | OutputFormat::Ndjson => {
            serde_json::json!({"error": error.to_string()}).to_string()
        }
    }
}

/// Formats store statistics.
#[must_use]
pub fn format_status(stats: &StoreStats, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => {
            let mut out = String::new();
            out.push_str("procjena status\n");
            out.push_str("===============\n\n");
            let _ = writeln!(out, "  Organizations: {}", stats.organization_count);
            let _ = writeln!(out, "  Documents:     {}", stats.document_count);
            let _ = writeln!(out, "  Chunks:        {}", stats.chunk_count);
            let _ = writeln!(out, "  Assessments:   {}", stats.assessment_count);
            let _ = writeln!(out, "  Answers:       {}", stats.answer_count);
            let _ = writeln!(out, "  Audit rows:    {}", stats.audit_count);
            let _ = writeln!(out, "  Schema:        v{}", stats.schema_version);
            if let Some(size) = stats.db_size {
                let _ = writeln!(out, "  DB size:       {size} bytes");
            }
            out
        }
        OutputFormat::Json | OutputFormat::Ndjson => format_json(stats),
    }
}

/// Formats search hits.
#[must_use]
pub fn format_hits(hits: &[SearchHit], format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => {
            if hits.is_empty() {
                return "No results.\n".to_string();
            }
            let mut out = String::new();
            for (i, hit) in hits.iter().enumerate() {
                let _ = writeln!(
                    out,
                    "{}. [{}] {} (p. {}, {}, score {:.4})",
                    i + 1,
                    hit.doc_type,
                    hit.doc_title,
                    hit.page_anchor,
                    hit.tier_source,
                    hit.score
                );
                if !hit.control_ids.is_empty() {
                    let _ = writeln!(out, "   Controls: {}", hit.control_ids.join(", "));
                }
                let preview: String = hit.content.chars().take(160).collect();
                let _ = writeln!(out, "   {preview}");
            }
            out
        }
        OutputFormat::Json => format_json(&hits),
        OutputFormat::Ndjson => {
            let mut out = String::new();
            for hit in hits {
                let _ = writeln!(
                    out,
                    "{}",
                    serde_json::to_string(hit).unwrap_or_default()
                );
            }
            out
        }
    }
}

/// Formats a grounded answer.
#[must_use]
pub fn format_answer(outcome: &AnswerOutcome, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => {
            let mut out = String::new();
            out.push_str(&outcome.response);
            out.push('\n');
            if !outcome.citations.is_empty() {
                let _ = writeln!(out, "\nCitations ({}):", outcome.citations.len());
                for citation in &outcome.citations {
                    let marker = if citation.valid { "ok" } else { "??" };
                    let _ = writeln!(
                        out,
                        "  [{marker}] {}, p. {}",
                        citation.document_title, citation.page
                    );
                }
            }
            let _ = writeln!(out, "\nStatus: {}", outcome.validation_status.as_str());
            out
        }
        OutputFormat::Json | OutputFormat::Ndjson => format_json(outcome),
    }
}

/// Formats the nested compliance result.
#[must_use]
pub fn format_compliance(compliance: &OverallCompliance, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => {
            let mut out = String::new();
            let _ = writeln!(
                out,
                "Assessment {} ({})",
                compliance.assessment_id,
                compliance.security_level.as_str()
            );
            let _ = writeln!(
                out,
                "  Overall score:  {}",
                compliance
                    .overall_score
                    .map_or_else(|| "-".to_string(), |d| d.to_string())
            );
            let _ = writeln!(
                out,
                "  Compliance:     {}% ({}/{} measures), {}",
                compliance.compliance_percentage,
                compliance.passed_measures,
                compliance.total_measures,
                if compliance.passes_compliance {
                    "PASS"
                } else {
                    "FAIL"
                }
            );
            let _ = writeln!(
                out,
                "  Maturity:       {} / {} ({})",
                compliance.maturity_score,
                compliance.maturity_threshold,
                if compliance.meets_maturity_trend {
                    "met"
                } else {
                    "not met"
                }
            );
            for measure in &compliance.measures {
                let _ = writeln!(
                    out,
                    "  {} {}: {} ({} of {} submeasures pass)",
                    if measure.passes_compliance { "+" } else { "-" },
                    measure.measure_code,
                    measure
                        .overall_score
                        .map_or_else(|| "-".to_string(), |d| d.to_string()),
                    measure.passed_submeasures,
                    measure.total_submeasures
                );
                for submeasure in &measure.submeasures {
                    if !submeasure.failed_controls.is_empty() {
                        let _ = writeln!(
                            out,
                            "      {} failing: {}",
                            submeasure.submeasure_code,
                            submeasure.failed_controls.join(", ")
                        );
                    }
                }
            }
            out
        }
        OutputFormat::Json | OutputFormat::Ndjson => format_json(compliance),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parse() {
        assert_eq!(OutputFormat::parse("json"), OutputFormat::Json);
        assert_eq!(OutputFormat::parse("JSON"), OutputFormat::Json);
        assert_eq!(OutputFormat::parse("ndjson"), OutputFormat::Ndjson);
        assert_eq!(OutputFormat::parse("jsonl"), OutputFormat::Ndjson);
        assert_eq!(OutputFormat::parse("text"), OutputFormat::Text);
        assert_eq!(OutputFormat::parse("anything"), OutputFormat::Text);
    }

    #[test]
    fn test_format_status_text() {
        let stats = StoreStats {
            document_count: 3,
            chunk_count: 42,
            schema_version: 1,
            ..StoreStats::default()
        };
        let out = format_status(&stats, OutputFormat::Text);
        assert!(out.contains("Documents:     3"));
        assert!(out.contains("Chunks:        42"));
    }

    #[test]
    fn test_format_status_json() {
        let stats = StoreStats::default();
        let out = format_status(&stats, OutputFormat::Json);
        assert!(serde_json::from_str::<serde_json::Value>(&out).is_ok());
    }

    #[test]
    fn test_format_error_json() {
        let err = crate::error::Error::Config {
            message: "bad".to_string(),
        };
        let out = format_error(&err, OutputFormat::Json);
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert!(value["error"].as_str().unwrap().contains("bad"));
    }

    #[test]
    fn test_format_hits_empty() {
        assert_eq!(format_hits(&[], OutputFormat::Text), "No results.\n");
    }
}
