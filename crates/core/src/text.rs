//! Character-offset helpers for positional text.
//!
//! Column membership in the statement layout is decided by character
//! offset, and the text carries accented characters, so byte offsets from
//! `str::find`/`str::rfind` cannot be compared against column positions
//! directly.

/// Character offset of the leftmost occurrence of `needle` in `haystack`.
pub fn find_chars(haystack: &str, needle: &str) -> Option<usize> {
    haystack
        .find(needle)
        .map(|byte| haystack[..byte].chars().count())
}

/// Character offset of the rightmost occurrence of `needle` in `haystack`.
pub fn rfind_chars(haystack: &str, needle: &str) -> Option<usize> {
    haystack
        .rfind(needle)
        .map(|byte| haystack[..byte].chars().count())
}

/// Number of characters in `s`.
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// The first `n` characters of `s` (the whole string if shorter).
pub fn prefix_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((byte, _)) => &s[..byte],
        None => s,
    }
}

/// Everything from character `n` onward (empty if `s` is shorter).
pub fn suffix_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((byte, _)) => &s[byte..],
        None => "",
    }
}
