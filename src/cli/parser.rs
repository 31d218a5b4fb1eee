//! Command-line argument parsing.
//!
//! Defines the CLI structure using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// procjena: ZKS/NIS2 compliance self-assessment core.
///
/// Ingests compliance documents into a page-anchored retrieval corpus,
/// answers questions with validated citations, and scores assessments
/// under the official methodology.
#[derive(Parser, Debug)]
#[command(name = "procjena")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the state database file.
    ///
    /// Defaults to `.procjena/state.db` in the current directory.
    #[arg(short, long, env = "PROCJENA_DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json, ndjson).
    #[arg(long, default_value = "text", global = true)]
    pub format: String,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize the state database.
    ///
    /// Creates the database file and schema if they don't exist.
    Init {
        /// Force re-initialization (destroys existing data).
        #[arg(short, long)]
        force: bool,
    },

    /// Show store statistics.
    Status,

    /// Reset all state (delete all data).
    Reset {
        /// Skip confirmation prompt.
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Import questionnaire content (JSON rows) as a new version.
    Import {
        /// Path to the parsed questionnaire rows (JSON).
        file: PathBuf,

        /// Description recorded on the version.
        #[arg(short, long)]
        description: Option<String>,

        /// Import even when the content hash matches an existing version.
        #[arg(short, long)]
        force: bool,
    },

    /// Ingest a compliance document into the retrieval corpus.
    Ingest {
        /// Path to the document (pdf, docx, txt).
        file: PathBuf,

        /// Owning organization code (omit with --global).
        #[arg(short, long)]
        org: Option<String>,

        /// Ingest into the shared global corpus.
        #[arg(short, long)]
        global: bool,

        /// Document title (defaults to the file stem).
        #[arg(short, long)]
        title: Option<String>,
    },

    /// Two-layer retrieval over the corpus.
    Search {
        /// Query text.
        query: String,

        /// Organization code scoping the search.
        #[arg(short, long)]
        org: String,

        /// Number of results.
        #[arg(short, long, default_value = "8")]
        k: usize,

        /// Restrict to a control ID (e.g. POL-001).
        #[arg(short, long)]
        control: Option<String>,
    },

    /// Answer a compliance question with validated citations.
    Ask {
        /// Question text.
        query: String,

        /// Organization code scoping retrieval.
        #[arg(short, long)]
        org: String,

        /// Answer language (hr, en).
        #[arg(short, long, default_value = "hr")]
        language: String,

        /// Maximum source chunks.
        #[arg(short, long, default_value = "5")]
        max_sources: usize,

        /// Restrict to a control ID.
        #[arg(short, long)]
        control: Option<String>,
    },

    /// Create an assessment at a security level.
    #[command(name = "create-assessment")]
    CreateAssessment {
        /// Organization code.
        #[arg(short, long)]
        org: String,

        /// Security level (osnovna, srednja, napredna).
        #[arg(short, long)]
        level: String,

        /// Assessment title.
        #[arg(short, long)]
        title: String,
    },

    /// Write an answer for a control within a submeasure.
    Answer {
        /// Assessment id.
        #[arg(short, long)]
        assessment: i64,

        /// Control code (e.g. POL-001).
        #[arg(short, long)]
        control: String,

        /// Submeasure code (e.g. 1.1).
        #[arg(short, long)]
        submeasure: String,

        /// Documentation maturity score (1-5).
        #[arg(short, long)]
        doc: Option<u8>,

        /// Implementation maturity score (1-5).
        #[arg(short, long)]
        implementation: Option<u8>,

        /// Assessor comment.
        #[arg(long)]
        comment: Option<String>,
    },

    /// Compute and show compliance for an assessment.
    Score {
        /// Assessment id.
        assessment: i64,
    },

    /// Show assessment progress and status.
    Progress {
        /// Assessment id.
        assessment: i64,
    },

    /// Validate and submit an assessment for review.
    Submit {
        /// Assessment id.
        assessment: i64,
    },

    /// Compute gap insights for an assessment.
    Insights {
        /// Assessment id.
        assessment: i64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_structure_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_search() {
        let cli = Cli::parse_from([
            "procjena", "search", "POL-001", "--org", "acme", "--k", "5",
        ]);
        match cli.command {
            Commands::Search { query, org, k, .. } => {
                assert_eq!(query, "POL-001");
                assert_eq!(org, "acme");
                assert_eq!(k, 5);
            }
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn test_parse_answer() {
        let cli = Cli::parse_from([
            "procjena",
            "answer",
            "--assessment",
            "1",
            "--control",
            "POL-001",
            "--submeasure",
            "1.1",
            "--doc",
            "4",
            "--implementation",
            "3",
        ]);
        match cli.command {
            Commands::Answer {
                assessment,
                control,
                submeasure,
                doc,
                implementation,
                ..
            } => {
                assert_eq!(assessment, 1);
                assert_eq!(control, "POL-001");
                assert_eq!(submeasure, "1.1");
                assert_eq!(doc, Some(4));
                assert_eq!(implementation, Some(3));
            }
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn test_default_format() {
        let cli = Cli::parse_from(["procjena", "status"]);
        assert_eq!(cli.format, "text");
    }
}
