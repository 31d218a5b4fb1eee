//! PDF page extraction via `pdf-extract`.

use crate::error::{IngestError, Result};
use crate::extract::PageText;

/// Extracts one text unit per PDF page.
///
/// # Errors
///
/// Returns [`IngestError::CorruptDocument`] when the bytes are not a
/// readable PDF.
#[allow(clippy::cast_possible_truncation)]
pub fn extract_pages(bytes: &[u8]) -> Result<Vec<PageText>> {
    let pages =
        pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|e| {
            IngestError::CorruptDocument {
                reason: format!("pdf parse failed: {e}"),
            }
        })?;

    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| PageText {
            page_number: i as u32 + 1,
            text,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_garbage_bytes_are_corrupt() {
        let err = extract_pages(b"definitely not a pdf").unwrap_err();
        assert!(err.to_string().contains("corrupt document"));
    }
}
