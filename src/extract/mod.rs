//! Text extraction from uploaded document formats.
//!
//! Converts raw bytes into an ordered sequence of page-tagged text units.
//! PDF pages map 1:1 onto source pages; formats without intrinsic pagination
//! (DOCX, TXT) get synthetic pages of roughly [`SYNTHETIC_PAGE_SIZE`]
//! characters so downstream page anchors stay meaningful.

mod docx;
mod pdf;

use crate::error::{IngestError, Result};

/// MIME type for PDF documents.
pub const MIME_PDF: &str = "application/pdf";
/// MIME type for modern Word documents.
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
/// MIME type for legacy Word documents (accepted, parsed as DOCX).
pub const MIME_DOC: &str = "application/msword";
/// MIME type for plain text.
pub const MIME_TXT: &str = "text/plain";

/// Target size of a synthetic page, in characters.
pub const SYNTHETIC_PAGE_SIZE: usize = 2_500;

/// A page-tagged unit of extracted text. Pages are 1-indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    /// Source page number (1-based; synthetic for DOCX/TXT).
    pub page_number: u32,
    /// Extracted text of the page.
    pub text: String,
}

/// Extracts page-tagged text from document bytes.
///
/// # Errors
///
/// Returns [`IngestError::UnsupportedFormat`] for unknown MIME types,
/// [`IngestError::CorruptDocument`] when the bytes cannot be parsed or yield
/// no text, and [`IngestError::ExtractionFailed`] for partial failures.
pub fn extract(bytes: &[u8], mime_type: &str) -> Result<Vec<PageText>> {
    let pages = match mime_type {
        MIME_PDF => pdf::extract_pages(bytes)?,
        MIME_DOCX | MIME_DOC => synthesize_pages(&docx::extract_text(bytes)?),
        MIME_TXT => synthesize_pages(&String::from_utf8_lossy(bytes)),
        other => {
            return Err(IngestError::UnsupportedFormat {
                mime: other.to_string(),
            }
            .into());
        }
    };

    if pages.iter().all(|p| p.text.trim().is_empty()) {
        return Err(IngestError::CorruptDocument {
            reason: "document contains no extractable text".to_string(),
        }
        .into());
    }

    Ok(pages)
}

/// Splits unpaginated text into synthetic pages of roughly
/// [`SYNTHETIC_PAGE_SIZE`] characters, preferring paragraph boundaries.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn synthesize_pages(text: &str) -> Vec<PageText> {
    if text.is_empty() {
        return Vec::new();
    }
    if text.chars().count() <= SYNTHETIC_PAGE_SIZE {
        return vec![PageText {
            page_number: 1,
            text: text.to_string(),
        }];
    }

    let mut pages = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for paragraph in text.split_inclusive("\n\n") {
        let para_len = paragraph.chars().count();
        if current_len > 0 && current_len + para_len > SYNTHETIC_PAGE_SIZE {
            pages.push(std::mem::take(&mut current));
            current_len = 0;
        }
        // A single paragraph longer than a page is split hard
        if para_len > SYNTHETIC_PAGE_SIZE {
            let mut buf = String::new();
            let mut buf_len = 0usize;
            for ch in paragraph.chars() {
                buf.push(ch);
                buf_len += 1;
                if buf_len == SYNTHETIC_PAGE_SIZE {
                    pages.push(std::mem::take(&mut buf));
                    buf_len = 0;
                }
            }
            if !buf.is_empty() {
                current = buf;
                current_len = buf_len;
            }
        } else {
            current.push_str(paragraph);
            current_len += para_len;
        }
    }
    if !current.is_empty() {
        pages.push(current);
    }

    pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| PageText {
            page_number: i as u32 + 1,
            text,
        })
        .collect()
}
