//! DOCX text extraction.
//!
//! A DOCX file is a zip archive; the body lives in `word/document.xml` as
//! paragraph (`w:p`) elements containing text runs (`w:t`). Extraction
//! walks the XML once, emitting a newline per paragraph end so the chunker
//! sees paragraph boundaries.

use crate::error::{IngestError, Result};
use quick_xml::Reader;
use quick_xml::events::Event;
use std::io::{Cursor, Read};

/// Extracts the full document text with paragraph breaks preserved.
///
/// # Errors
///
/// Returns [`IngestError::CorruptDocument`] when the archive or the
/// document XML cannot be read.
pub fn extract_text(bytes: &[u8]) -> Result<String> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| IngestError::CorruptDocument {
            reason: format!("docx archive unreadable: {e}"),
        })?;

    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| IngestError::CorruptDocument {
            reason: format!("word/document.xml missing: {e}"),
        })?
        .read_to_string(&mut xml)
        .map_err(|e| IngestError::ExtractionFailed {
            reason: format!("document.xml read failed: {e}"),
        })?;

    parse_document_xml(&xml)
}

/// Pulls text runs out of the document XML.
fn parse_document_xml(xml: &str) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(false);

    let mut text = String::new();
    let mut in_text_run = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"t" => {
                in_text_run = true;
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"t" => in_text_run = false,
                // Paragraph end; double newline marks a boundary for the chunker
                b"p" => text.push_str("\n\n"),
                _ => {}
            },
            Ok(Event::Text(t)) if in_text_run => {
                let fragment = t.unescape().map_err(|e| IngestError::ExtractionFailed {
                    reason: format!("xml unescape failed: {e}"),
                })?;
                text.push_str(&fragment);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(IngestError::CorruptDocument {
                    reason: format!("document.xml malformed: {e}"),
                }
                .into());
            }
        }
    }

    Ok(text)
}
