//! Name normalization and similarity primitives.
//!
//! [`normalize`] produces the canonical comparison key used everywhere two
//! names are compared for identity: accent-folded, lower-cased, stripped of
//! punctuation, whitespace-collapsed. Two names with the same normalized
//! form are the same product as far as exact matching is concerned.
//!
//! [`similarity`] scores two strings in `[0, 1]` from Levenshtein distance
//! relative to the longer string. Both are pure functions with no I/O; the
//! store-facing modules call them on values fetched through parametrized
//! queries.

use unicode_normalization::UnicodeNormalization;

/// Normalize a product name into its canonical comparison key.
///
/// Deterministic, total, and idempotent: NFD decomposition, combining-mark
/// removal, lowercase, punctuation stripped, internal whitespace collapsed
/// to single spaces, trimmed.
///
/// # Examples
///
/// ```
/// use folheto::normalize::normalize;
///
/// assert_eq!(normalize("Abóbora Cabotiá"), "abobora cabotia");
/// assert_eq!(normalize("  COCA-COLA   2L "), "coca cola 2l");
/// ```
pub fn normalize(text: &str) -> String {
    text.nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<&str>>()
        .join(" ")
}

/// Unicode combining marks (category Mn) left behind by NFD decomposition.
fn is_combining_mark(c: char) -> bool {
    matches!(c, '\u{0300}'..='\u{036F}' | '\u{1AB0}'..='\u{1AFF}' | '\u{1DC0}'..='\u{1DFF}' | '\u{20D0}'..='\u{20FF}' | '\u{FE20}'..='\u{FE2F}')
}

/// Levenshtein distance in characters.
pub fn edit_distance(a: &str, b: &str) -> usize {
    strsim::levenshtein(a, b)
}

/// Similarity in `[0, 1]`: `1 - distance / max(len)` over characters.
///
/// Two empty strings are identical (1.0); an empty string against a
/// non-empty one scores 0.0.
pub fn similarity(a: &str, b: &str) -> f64 {
    let len_a = a.chars().count();
    let len_b = b.chars().count();
    let max_len = len_a.max(len_b);
    if max_len == 0 {
        return 1.0;
    }
    1.0 - edit_distance(a, b) as f64 / max_len as f64
}

/// Threshold predicate over [`similarity`].
pub fn above_threshold(a: &str, b: &str, threshold: f64) -> bool {
    similarity(a, b) >= threshold
}
