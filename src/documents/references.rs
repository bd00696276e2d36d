//! Explicit article references in free-text queries ("Article 21",
//! "Articles 14, 15 and 16").

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeSet;

lazy_static! {
    static ref ARTICLE_REFERENCE: Regex =
        Regex::new(r"(?i)\barticles?\s+((?:\d+[a-z]?\b\s*(?:(?:,|and)\s*)?)+)")
            .expect("article reference");
    static ref ARTICLE_NUMBER: Regex = Regex::new(r"(?i)\d+[a-z]?").expect("article number");
}

/// Article identifiers named in `query`, upper-cased (`"21a"` → `"21A"`).
/// Every occurrence is scanned; nothing recognisable yields an empty set.
pub fn extract_article_references(query: &str) -> BTreeSet<String> {
    ARTICLE_REFERENCE
        .captures_iter(query)
        .filter_map(|caps| caps.get(1))
        .flat_map(|run| ARTICLE_NUMBER.find_iter(run.as_str()))
        .map(|m| m.as_str().to_uppercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refs(query: &str) -> Vec<String> {
        extract_article_references(query).into_iter().collect()
    }

    #[test]
    fn test_single_article() {
        assert_eq!(refs("What does Article 21 guarantee?"), vec!["21"]);
    }

    #[test]
    fn test_list_with_commas_and_and() {
        assert_eq!(refs("Compare Articles 14, 15 and 16"), vec!["14", "15", "16"]);
        assert_eq!(refs("articles 14,15"), vec!["14", "15"]);
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(refs("ARTICLE 32 remedies"), vec!["32"]);
    }

    #[test]
    fn test_letter_suffix() {
        assert_eq!(refs("Is article 21a enforceable?"), vec!["21A"]);
    }

    #[test]
    fn test_every_occurrence_is_scanned() {
        assert_eq!(
            refs("How does Article 19 interact with Article 21?"),
            vec!["19", "21"]
        );
    }

    #[test]
    fn test_trailing_words_are_not_numbers() {
        assert_eq!(refs("Article 21 and the right to privacy"), vec!["21"]);
    }

    #[test]
    fn test_no_reference() {
        assert!(extract_article_references("What are the fundamental rights?").is_empty());
        assert!(extract_article_references("article about rights").is_empty());
        assert!(extract_article_references("Article XIV").is_empty());
        assert!(extract_article_references("subarticle 5").is_empty());
    }
}
