use std::collections::HashSet;

use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Transliterations applied before NFKD, which would otherwise drop these
/// symbols or leave them non-ASCII. Common in dosing and statistics text.
fn transliterate(c: char) -> Option<&'static str> {
    let s = match c {
        'α' | 'Α' => "alpha",
        'β' | 'Β' => "beta",
        'γ' | 'Γ' => "gamma",
        'δ' | 'Δ' => "delta",
        'ε' | 'Ε' => "epsilon",
        'κ' | 'Κ' => "kappa",
        'λ' | 'Λ' => "lambda",
        'μ' | 'µ' | 'Μ' => "mu",
        'π' | 'Π' => "pi",
        'σ' | 'ς' | 'Σ' => "sigma",
        'τ' | 'Τ' => "tau",
        'χ' | 'Χ' => "chi",
        'ω' | 'Ω' => "omega",
        '≤' => "leq",
        '≥' => "geq",
        '±' => "pm",
        '×' => "times",
        _ => return None,
    };
    Some(s)
}

/// Fold one source character into zero or more normalized characters.
///
/// Lowercases, strips accents and drops anything that is not alphanumeric.
fn fold_into(c: char, buf: &mut Vec<char>) {
    buf.clear();
    if c.is_ascii() {
        if c.is_ascii_alphanumeric() {
            buf.push(c.to_ascii_lowercase());
        }
        return;
    }
    if let Some(name) = transliterate(c) {
        buf.extend(name.chars());
        return;
    }
    buf.extend(
        c.nfkd()
            .filter(|d| !is_combining_mark(*d))
            .flat_map(char::to_lowercase)
            .filter(|d| d.is_alphanumeric()),
    );
}

/// Normalized text plus a map from each normalized character back to the
/// source character it came from.
#[derive(Debug, Clone, Default)]
pub struct NormalizedText {
    pub text: String,
    origin: Vec<usize>,
}

impl NormalizedText {
    /// Length in characters.
    pub fn len(&self) -> usize {
        self.origin.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origin.is_empty()
    }

    /// Map a normalized character range `[start, end)` back to the source
    /// character range it covers.
    pub fn source_range(&self, start: usize, end: usize) -> Option<(usize, usize)> {
        if start >= end || end > self.origin.len() {
            return None;
        }
        Some((self.origin[start], self.origin[end - 1] + 1))
    }
}

/// Normalize text for matching and keep the offset map.
///
/// Pipeline:
/// 1. Transliterate Greek letters and common math symbols
/// 2. NFKD, drop combining marks (accents)
/// 3. Lowercase
/// 4. Drop punctuation and symbols
/// 5. Collapse whitespace runs to one space, trim both ends
pub fn normalize_with_map(s: &str) -> NormalizedText {
    let mut out = NormalizedText {
        text: String::with_capacity(s.len()),
        origin: Vec::with_capacity(s.len()),
    };
    let mut pending_space: Option<usize> = None;
    let mut buf = Vec::with_capacity(8);

    for (idx, c) in s.chars().enumerate() {
        if c.is_whitespace() {
            if !out.origin.is_empty() && pending_space.is_none() {
                pending_space = Some(idx);
            }
            continue;
        }
        fold_into(c, &mut buf);
        for &f in &buf {
            if let Some(space_idx) = pending_space.take() {
                out.text.push(' ');
                out.origin.push(space_idx);
            }
            out.text.push(f);
            out.origin.push(idx);
        }
    }
    out
}

/// Normalize text for matching (lowercase, no punctuation, single spaces).
pub fn normalize(s: &str) -> String {
    normalize_with_map(s).text
}

/// Find every occurrence of `needle` in `haystack`, as character ranges.
///
/// After each hit the scan resumes one character past the hit's start, not
/// past its end, so overlapping occurrences are all reported.
pub fn find_all(haystack: &str, needle: &str) -> Vec<(usize, usize)> {
    let mut hits = Vec::new();
    if needle.is_empty() {
        return hits;
    }
    let needle_chars = needle.chars().count();

    let mut from = 0usize;
    let mut chars_before = 0usize;
    while let Some(rel) = haystack[from..].find(needle) {
        let at = from + rel;
        let start = chars_before + haystack[from..at].chars().count();
        hits.push((start, start + needle_chars));

        let step = haystack[at..].chars().next().map_or(1, char::len_utf8);
        from = at + step;
        chars_before = start + 1;
    }
    hits
}

/// Slice `s` by character offsets, clamping to its length.
pub fn char_slice(s: &str, start: usize, end: usize) -> &str {
    let byte_at = |n: usize| s.char_indices().nth(n).map(|(b, _)| b).unwrap_or(s.len());
    let start_b = byte_at(start);
    let end_b = byte_at(end.max(start));
    &s[start_b..end_b]
}

/// Fraction of the query's distinct tokens that also occur in `candidate`.
///
/// Both inputs are expected to be normalized already.
pub fn token_overlap(query: &str, candidate: &str) -> f64 {
    let query_tokens: HashSet<&str> = query.split_whitespace().collect();
    if query_tokens.is_empty() {
        return 0.0;
    }
    let candidate_tokens: HashSet<&str> = candidate.split_whitespace().collect();
    let shared = query_tokens
        .iter()
        .filter(|t| candidate_tokens.contains(*t))
        .count();
    shared as f64 / query_tokens.len() as f64
}

/// Similarity in [0, 1] between two normalized strings.
///
/// Blends the normalized edit-distance ratio with token overlap so that word
/// reordering and light paraphrase still score well.
pub fn similarity(query: &str, candidate: &str) -> f64 {
    if query.is_empty() || candidate.is_empty() {
        return 0.0;
    }
    let ratio = rapidfuzz::fuzz::ratio(query.chars(), candidate.chars());
    let overlap = token_overlap(query, candidate);
    (0.6 * ratio + 0.4 * overlap).clamp(0.0, 1.0)
}
