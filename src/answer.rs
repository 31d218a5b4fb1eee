//! Grounded answer generation.
//!
//! The generative model sits behind the [`Generator`] seam; a
//! deterministic extractive fallback keeps the pipeline fully testable
//! offline. `answer_with_citations` retrieves context through the
//! two-layer pipeline, prompts the generator, validates every citation
//! against the retrieved chunks, and reports which tiers contributed.
//! The streaming variant emits typed events over a channel, consumed by
//! whatever writes the response out.

use crate::citation::{Citation, CitationValidator};
use crate::core::Language;
use crate::embedding::Embedder;
use crate::error::{Result, RetrievalError};
use crate::retrieval::{SearchHit, TierAnalysis, TwoLayerRetrieval};
use crate::storage::SqliteStore;
use serde::Serialize;
use std::sync::mpsc::Sender;
use tracing::{info, warn};

/// Options passed through to the generator.
#[derive(Debug, Clone, Copy)]
pub struct GenerateOptions {
    /// Answer language.
    pub language: Language,
    /// Soft cap on answer length, in characters.
    pub max_length: usize,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            language: Language::Hr,
            max_length: 4_000,
        }
    }
}

/// Seam to the generative model.
///
/// Implementations must be thread-safe; the client is shared across
/// request threads and callers bound concurrent generations.
pub trait Generator: Send + Sync {
    /// Model identity, for logging and metadata.
    fn model_name(&self) -> &str;

    /// Generates an answer for a fully assembled prompt.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend fails or is unavailable.
    fn generate(&self, prompt: &str, opts: &GenerateOptions) -> Result<String>;
}

/// Deterministic extractive generator.
///
/// Takes the first sentence of each context block and cites it, yielding a
/// grounded (if dry) answer with no model dependency. This is NOT abstractive
/// generation - it is the offline fallback and the test double.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractiveGenerator;

impl ExtractiveGenerator {
    /// Creates the extractive generator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Generator for ExtractiveGenerator {
    fn model_name(&self) -> &str {
        "extractive-fallback"
    }

    fn generate(&self, prompt: &str, opts: &GenerateOptions) -> Result<String> {
        let mut lines = Vec::new();

        for block in parse_context_blocks(prompt) {
            let sentence = first_sentence(&block.content);
            if sentence.is_empty() {
                continue;
            }
            let marker = match opts.language {
                Language::Hr => format!("[Izvor: {}, str. {}]", block.title, block.page),
                Language::En => format!("[Source: {}, p. {}]", block.title, block.page),
            };
            lines.push(format!("{sentence} {marker}"));
        }

        if lines.is_empty() {
            return Ok(match opts.language {
                Language::Hr => "Nema dostupnih izvora za ovo pitanje.".to_string(),
                Language::En => "No sources available for this question.".to_string(),
            });
        }

        let mut answer = lines.join("\n");
        if answer.len() > opts.max_length {
            answer.truncate(
                (0..=opts.max_length)
                    .rev()
                    .find(|i| answer.is_char_boundary(*i))
                    .unwrap_or(0),
            );
        }
        Ok(answer)
    }
}

/// One `[n] title, p. N` context block inside a prompt.
struct ContextBlock {
    title: String,
    page: u32,
    content: String,
}

/// Builds the generation prompt from retrieved context.
#[must_use]
pub fn build_prompt(query: &str, sources: &[SearchHit], language: Language) -> String {
    let mut prompt = String::new();
    let header = match language {
        Language::Hr => "Odgovori na pitanje koristeci iskljucivo navedene izvore i citiraj ih.",
        Language::En => "Answer the question using only the sources below, citing them.",
    };
    prompt.push_str(header);
    prompt.push_str("\n\n");

    for (i, hit) in sources.iter().enumerate() {
        prompt.push_str(&format!(
            "[{}] {}, p. {}\n{}\n\n",
            i + 1,
            hit.doc_title,
            hit.page_anchor,
            hit.content
        ));
    }

    let question = match language {
        Language::Hr => "Pitanje",
        Language::En => "Question",
    };
    prompt.push_str(&format!("{question}: {query}\n"));
    prompt
}

fn parse_context_blocks(prompt: &str) -> Vec<ContextBlock> {
    let header = regex_for_block_header();
    let mut blocks: Vec<ContextBlock> = Vec::new();
    let mut current: Option<ContextBlock> = None;

    for line in prompt.lines() {
        if let Some(captures) = header.captures(line) {
            if let Some(block) = current.take() {
                blocks.push(block);
            }
            current = Some(ContextBlock {
                title: captures
                    .get(1)
                    .map(|m| m.as_str().trim().to_string())
                    .unwrap_or_default(),
                page: captures
                    .get(2)
                    .and_then(|m| m.as_str().parse().ok())
                    .unwrap_or(1),
                content: String::new(),
            });
        } else if line.is_empty() {
            if let Some(block) = current.take() {
                blocks.push(block);
            }
        } else if let Some(ref mut block) = current {
            if !block.content.is_empty() {
                block.content.push(' ');
            }
            block.content.push_str(line);
        }
    }
    if let Some(block) = current.take() {
        blocks.push(block);
    }
    blocks.retain(|b| !b.title.is_empty());
    blocks
}

fn regex_for_block_header() -> &'static regex::Regex {
    static HEADER: std::sync::LazyLock<regex::Regex> = std::sync::LazyLock::new(|| {
        #[allow(clippy::unwrap_used)] // pattern is a compile-time constant
        regex::Regex::new(r"^\[\d+\]\s+(.+?),\s+p\.\s+(\d+)$").unwrap()
    });
    &HEADER
}

fn first_sentence(text: &str) -> String {
    use unicode_segmentation::UnicodeSegmentation;
    text.split_sentence_bounds()
        .next()
        .unwrap_or("")
        .trim()
        .to_string()
}

/// How the answer's citations fared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    /// Citations extracted and checked.
    Validated,
    /// Retrieval found nothing; the answer says so.
    NoSources,
    /// Generation failed; the outcome carries the error text.
    Error,
}

impl ValidationStatus {
    /// Returns the canonical string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validated => "validated",
            Self::NoSources => "no_sources",
            Self::Error => "error",
        }
    }
}

/// The full grounded-answer result.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerOutcome {
    /// Generated (or fallback) response text.
    pub response: String,
    /// Validated citations, pages corrected to anchors.
    pub citations: Vec<Citation>,
    /// The retrieved context actually used.
    pub source_chunks: Vec<SearchHit>,
    /// Overall citation status.
    pub validation_status: ValidationStatus,
    /// Which retrieval tiers contributed.
    pub tier_analysis: TierAnalysis,
}

/// Typed chunks of a streamed answer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnswerEvent {
    /// A piece of the response text.
    Content {
        /// Text fragment.
        text: String,
    },
    /// Citations and tier analysis, sent after the content.
    Metadata {
        /// Serialized citations and tier analysis.
        value: serde_json::Value,
    },
    /// Generation or retrieval failed.
    Error {
        /// Error description.
        message: String,
    },
    /// End of stream.
    Done,
}

/// Retrieves context, generates an answer, and validates its citations.
///
/// # Errors
///
/// Returns an error on retrieval failures; generation failures are
/// reported in-band with `validation_status = error`.
pub fn answer_with_citations(
    store: &SqliteStore,
    embedder: &dyn Embedder,
    generator: &dyn Generator,
    query: &str,
    organization_id: i64,
    language: Language,
    max_sources: usize,
    control_id: Option<&str>,
) -> Result<AnswerOutcome> {
    let retrieval = TwoLayerRetrieval::new(store, embedder);
    let (reranked, tier_analysis) =
        retrieval.retrieve_context(query, organization_id, max_sources, control_id)?;
    let source_chunks: Vec<SearchHit> = reranked.iter().map(SearchHit::from_fused).collect();

    if source_chunks.is_empty() {
        let response = match language {
            Language::Hr => "Nema dostupnih izvora za ovo pitanje.".to_string(),
            Language::En => "No sources available for this question.".to_string(),
        };
        return Ok(AnswerOutcome {
            response,
            citations: Vec::new(),
            source_chunks,
            validation_status: ValidationStatus::NoSources,
            tier_analysis,
        });
    }

    let prompt = build_prompt(query, &source_chunks, language);
    let opts = GenerateOptions {
        language,
        ..GenerateOptions::default()
    };

    match generator.generate(&prompt, &opts) {
        Ok(response) => {
            let validator = CitationValidator::new();
            let citations = validator.extract(&response, &source_chunks);
            info!(
                citations = citations.len(),
                sources = source_chunks.len(),
                model = generator.model_name(),
                "answer generated"
            );
            Ok(AnswerOutcome {
                response,
                citations,
                source_chunks,
                validation_status: ValidationStatus::Validated,
                tier_analysis,
            })
        }
        Err(e) => {
            warn!(error = %e, "generation failed");
            Ok(AnswerOutcome {
                response: RetrievalError::GenerationFailed(e.to_string()).to_string(),
                citations: Vec::new(),
                source_chunks,
                validation_status: ValidationStatus::Error,
                tier_analysis,
            })
        }
    }
}

/// Streaming variant: produces [`AnswerEvent`]s on the channel. Content
/// arrives first, then metadata, then `Done`; failures yield an `Error`
/// event before `Done`.
pub fn stream_answer(
    store: &SqliteStore,
    embedder: &dyn Embedder,
    generator: &dyn Generator,
    query: &str,
    organization_id: i64,
    language: Language,
    max_sources: usize,
    control_id: Option<&str>,
    events: &Sender<AnswerEvent>,
) {
    let outcome = answer_with_citations(
        store,
        embedder,
        generator,
        query,
        organization_id,
        language,
        max_sources,
        control_id,
    );

    match outcome {
        Ok(outcome) => {
            if outcome.validation_status == ValidationStatus::Error {
                let _ = events.send(AnswerEvent::Error {
                    message: outcome.response.clone(),
                });
            } else {
                // Emit content line by line so consumers can flush early
                for line in outcome.response.lines() {
                    let _ = events.send(AnswerEvent::Content {
                        text: line.to_string(),
                    });
                }
                let _ = events.send(AnswerEvent::Metadata {
                    value: serde_json::json!({
                        "citations": outcome.citations,
                        "tier_analysis": outcome.tier_analysis,
                        "validation_status": outcome.validation_status.as_str(),
                    }),
                });
            }
        }
        Err(e) => {
            let _ = events.send(AnswerEvent::Error {
                message: e.to_string(),
            });
        }
    }
    let _ = events.send(AnswerEvent::Done);
}
