// src/canonical/mod.rs
// Deterministic name canonicalization. One code path serves both the
// indexing side and the query side so the two can never disagree.

use once_cell::sync::Lazy;
use rphonetic::{DoubleMetaphone, Encoder};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Legal-entity suffixes stripped from the tail of a name. Ordered longest
/// first so multi-word forms win before their single-token tails. The leading
/// space enforces a whole-token boundary.
const LEGAL_SUFFIXES: [&str; 26] = [
    " limited liability partnership",
    " limited liability company",
    " limited partnership",
    " incorporated",
    " corporation",
    " cooperative",
    " company",
    " limited",
    " pllc",
    " sarl",
    " gmbh",
    " corp",
    " llc",
    " llp",
    " ltd",
    " inc",
    " plc",
    " pty",
    " srl",
    " co",
    " lp",
    " pc",
    " ag",
    " bv",
    " nv",
    " sa",
];

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["the", "of", "and", "for", "in", "at", "a", "an", "de", "la"]
        .into_iter()
        .collect()
});

static DOUBLE_METAPHONE: Lazy<DoubleMetaphone> = Lazy::new(DoubleMetaphone::default);

/// Canonical form of a payee name, derived once and stored alongside it.
///
/// `tokens` and `phonetic_codes` are sorted and deduplicated so equality and
/// serialization are stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalName {
    pub canonical: String,
    pub tokens: Vec<String>,
    pub phonetic_codes: Vec<String>,
}

impl CanonicalName {
    pub fn is_empty(&self) -> bool {
        self.canonical.is_empty()
    }

    pub fn token_set(&self) -> HashSet<&str> {
        self.tokens.iter().map(String::as_str).collect()
    }

    pub fn code_set(&self) -> HashSet<&str> {
        self.phonetic_codes.iter().map(String::as_str).collect()
    }
}

/// Canonicalizes a raw payee name.
///
/// Pure and idempotent: feeding the canonical string back in reproduces it.
pub fn canonicalize(raw: &str) -> CanonicalName {
    let canonical = canonical_string(raw);
    let tokens = significant_tokens(&canonical);
    let phonetic_codes = phonetic_codes(&tokens);
    CanonicalName {
        canonical,
        tokens,
        phonetic_codes,
    }
}

fn canonical_string(raw: &str) -> String {
    let mut name = raw.to_lowercase();

    // Decompose accented characters and drop the combining marks.
    name = name.nfkd().filter(|c| !is_combining_mark(*c)).collect();

    let char_substitutions = [("&", " and "), ("+", " plus "), ("'", "")];
    for (pattern, replacement) in &char_substitutions {
        name = name.replace(pattern, replacement);
    }

    // Remaining punctuation becomes a token boundary.
    name = name
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    name = name.split_whitespace().collect::<Vec<_>>().join(" ");

    // Repeated articles must all go in one pass, or re-canonicalizing the
    // output would keep shrinking it. "the" alone never matches "the ".
    while let Some(rest) = name.strip_prefix("the ") {
        name = rest.to_string();
    }

    strip_legal_suffixes(&name)
}

/// Strips trailing legal suffixes until none match, but never down to an
/// empty name: a payee literally named "LLC" keeps its one token.
fn strip_legal_suffixes(name: &str) -> String {
    let mut current = name.to_string();
    loop {
        let mut stripped = false;
        for suffix in LEGAL_SUFFIXES {
            if let Some(rest) = current.strip_suffix(suffix) {
                let rest = rest.trim_end();
                if rest.is_empty() {
                    return current;
                }
                current = rest.to_string();
                stripped = true;
                break;
            }
        }
        if !stripped {
            return current;
        }
    }
}

/// Whitespace tokens minus stopwords. Falls back to the full token list when
/// filtering would leave nothing, so names like "The And" stay comparable.
fn significant_tokens(canonical: &str) -> Vec<String> {
    let all: Vec<&str> = canonical.split_whitespace().collect();
    let mut filtered: Vec<String> = all
        .iter()
        .filter(|t| !STOPWORDS.contains(**t))
        .map(|t| t.to_string())
        .collect();
    if filtered.is_empty() {
        filtered = all.iter().map(|t| t.to_string()).collect();
    }
    filtered.sort();
    filtered.dedup();
    filtered
}

fn phonetic_codes(tokens: &[String]) -> Vec<String> {
    let mut codes = Vec::new();
    for token in tokens {
        // Digit-only tokens carry no phonetic signal.
        if !token.chars().any(|c| c.is_alphabetic()) {
            continue;
        }
        let primary = DOUBLE_METAPHONE.encode(token);
        if !primary.is_empty() {
            codes.push(primary.clone());
        }
        let alternate = DOUBLE_METAPHONE.encode_alternate(token);
        if !alternate.is_empty() && alternate != primary {
            codes.push(alternate);
        }
    }
    codes.sort();
    codes.dedup();
    codes
}
