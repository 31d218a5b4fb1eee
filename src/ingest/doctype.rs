//! Document type detection.
//!
//! Derives the provenance class of a document from its filename and
//! first-page content via a fixed keyword table. The class drives the
//! tier-2 boost table, so detection is deliberately conservative: anything
//! unrecognized stays `custom`.

use crate::core::DocType;

/// Keyword table, checked in order; the first hit wins. Annex catalogs come
/// before the framework texts because annex pages routinely cite them.
const KEYWORD_TABLE: &[(DocType, &[&str])] = &[
    (DocType::PrilogB, &["prilog b", "prilog_b", "annex b"]),
    (DocType::PrilogC, &["prilog c", "prilog_c", "annex c"]),
    (
        DocType::Zks,
        &[
            "zakon o kiberneti",
            "zks",
            "kiberneticka sigurnost",
            "kibernetička sigurnost",
        ],
    ),
    (DocType::Nis2, &["nis2", "nis 2", "2022/2555"]),
    (
        DocType::Uks,
        &["uredba o kiberneti", "uks", "uredba o mjerama"],
    ),
    (DocType::Iso, &["iso/iec", "iso 27", "iso27"]),
    (DocType::Nist, &["nist", "cybersecurity framework"]),
    (
        DocType::Regulation,
        &["uredba", "direktiva", "regulation", "directive", "pravilnik"],
    ),
    (DocType::Standard, &["standard", "norma", "hrn en"]),
];

/// Detects the document type from a filename and first-page content.
///
/// The filename is checked first (uploads are usually well named), then the
/// first page. Defaults to [`DocType::Custom`].
#[must_use]
pub fn detect_doc_type(file_name: &str, first_page: &str) -> DocType {
    let name = file_name.to_lowercase();
    let page = first_page.to_lowercase();

    for (doc_type, keywords) in KEYWORD_TABLE {
        if keywords.iter().any(|kw| name.contains(kw)) {
            return *doc_type;
        }
    }
    for (doc_type, keywords) in KEYWORD_TABLE {
        if keywords.iter().any(|kw| page.contains(kw)) {
            return *doc_type;
        }
    }
    DocType::Custom
}
