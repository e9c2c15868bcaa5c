// src/store/trigram.rs
// Padded character trigrams over canonical names, pg_trgm style: each word
// is padded with two leading and one trailing space, similarity is the
// Jaccard ratio of the two trigram sets.

use std::collections::HashSet;

pub fn extract_trigrams(canonical: &str) -> HashSet<String> {
    let mut grams = HashSet::new();
    for word in canonical.split_whitespace() {
        let padded: Vec<char> = std::iter::repeat(' ')
            .take(2)
            .chain(word.chars())
            .chain(std::iter::once(' '))
            .collect();
        for window in padded.windows(3) {
            grams.insert(window.iter().collect());
        }
    }
    grams
}

pub fn similarity(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count();
    let union = a.len() + b.len() - shared;
    if union == 0 {
        return 0.0;
    }
    shared as f32 / union as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_strings_have_similarity_one() {
        let a = extract_trigrams("microsoft");
        assert!((similarity(&a, &a) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn disjoint_strings_have_similarity_zero() {
        let a = extract_trigrams("microsoft");
        let b = extract_trigrams("zzyzx");
        assert_eq!(similarity(&a, &b), 0.0);
    }

    #[test]
    fn close_variants_score_high() {
        let a = extract_trigrams("amazon");
        let b = extract_trigrams("amazone");
        let s = similarity(&a, &b);
        assert!(s > 0.5, "expected > 0.5, got {}", s);
        assert!(s < 1.0);
    }

    #[test]
    fn single_char_word_produces_two_trigrams() {
        let grams = extract_trigrams("7");
        assert_eq!(grams.len(), 2);
        assert!(grams.contains("  7"));
        assert!(grams.contains(" 7 "));
    }

    #[test]
    fn words_are_padded_independently() {
        let joined = extract_trigrams("home depot");
        assert!(joined.contains("  h"));
        assert!(joined.contains("  d"));
        // no trigram spans the word boundary
        assert!(!joined.contains("e d"));
    }

    #[test]
    fn empty_input_yields_no_trigrams() {
        assert!(extract_trigrams("").is_empty());
        let empty = extract_trigrams("");
        let full = extract_trigrams("acme");
        assert_eq!(similarity(&empty, &full), 0.0);
    }
}
