//! Per-chunk language detection.
//!
//! The corpus is Croatian with occasional English standards material, so the
//! detector only needs to separate those two. Evidence: Croatian diacritics
//! (a strong signal) and small stopword sets for each language. Anything
//! ambiguous falls back to Croatian.

use crate::core::Language;

const HR_STOPWORDS: &[&str] = &[
    "i", "u", "je", "se", "na", "za", "da", "su", "od", "ili", "koji", "koja", "koje", "nije",
    "kako", "mora", "biti", "ove", "te", "pri",
];

const EN_STOPWORDS: &[&str] = &[
    "the", "and", "of", "to", "in", "is", "that", "for", "with", "are", "this", "be", "as", "on",
    "it", "by", "shall", "must", "may", "an",
];

/// Detects the language of a chunk of text.
///
/// Croatian diacritics count double; otherwise the larger stopword count
/// wins, with ties and empty input defaulting to Croatian.
#[must_use]
pub fn detect_language(text: &str) -> Language {
    let mut hr_score = 2 * text
        .chars()
        .filter(|c| matches!(c, 'č' | 'ć' | 'ž' | 'š' | 'đ' | 'Č' | 'Ć' | 'Ž' | 'Š' | 'Đ'))
        .count();
    let mut en_score = 0;

    for word in text.split_whitespace() {
        let w: String = word
            .chars()
            .filter(|c| c.is_alphabetic())
            .collect::<String>()
            .to_lowercase();
        if w.is_empty() {
            continue;
        }
        if HR_STOPWORDS.contains(&w.as_str()) {
            hr_score += 1;
        }
        if EN_STOPWORDS.contains(&w.as_str()) {
            en_score += 1;
        }
    }

    if en_score > hr_score {
        Language::En
    } else {
        Language::Hr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_croatian_detected() {
        let text = "Organizacija mora uspostaviti mjere za upravljanje rizicima koje su primjerene prijetnjama.";
        assert_eq!(detect_language(text), Language::Hr);
    }

    #[test]
    fn test_english_detected() {
        let text = "The organization shall establish measures for the management of risks that are appropriate to the threats.";
        assert_eq!(detect_language(text), Language::En);
    }

    #[test]
    fn test_diacritics_weigh_heavily() {
        // Short text, no stopwords, but clearly Croatian
        assert_eq!(detect_language("Sigurnosne značajke"), Language::Hr);
    }

    #[test]
    fn test_empty_falls_back_to_croatian() {
        assert_eq!(detect_language(""), Language::Hr);
    }

    #[test]
    fn test_ambiguous_falls_back_to_croatian() {
        assert_eq!(detect_language("POL-001"), Language::Hr);
    }
}
