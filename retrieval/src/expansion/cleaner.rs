//! Cleanup of model-generated query variants.
//!
//! Generators tend to wrap the actual query in quotes, list markers, or
//! announcement phrases ("Here is a rephrased query: ..."). The cleaner
//! strips that wrapping and keeps the first sentence of what remains.

use once_cell::sync::Lazy;
use regex::Regex;

/// Announcement phrases and list markers stripped from the front.
static PREFIX_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)^here\s+(?:is|are|'s)\s+(?:a|an|the|some)?\s*(?:rephrased|rewritten|alternative|expanded|simplified|new)?\s*(?:query|question|version|variant|phrasing)s?\s*[:\-]\s*",
        r"(?i)^(?:rephrased|rewritten|alternative|expanded|simplified)\s+(?:query|question|version|variant)\s*[:\-]\s*",
        r"(?i)^(?:query|question|variant|answer|output)\s*[:\-]\s*",
        r"^\d+[.)]\s*",
        r"^[-*•]\s*",
    ]
    .into_iter()
    .map(|pattern| Regex::new(pattern).expect("invalid regex"))
    .collect()
});

/// Sentence terminator followed by whitespace.
static SENTENCE_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?]\s").expect("invalid regex"));

/// Reduce raw generator output to a single usable query string.
///
/// Takes the first non-empty line, peels announcement prefixes and
/// wrapping quotes until stable, cuts at the first sentence boundary, and
/// collapses internal whitespace. Returns an empty string when nothing
/// usable remains.
pub fn clean_variant(raw: &str) -> String {
    let first_line = raw
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("");

    let mut current = first_line;
    loop {
        let next = strip_wrapping_quotes(strip_known_prefixes(current));
        if next == current {
            break;
        }
        current = next;
    }

    normalize_whitespace(first_sentence(current))
}

fn strip_known_prefixes(text: &str) -> &str {
    let mut current = text;
    loop {
        let mut changed = false;
        for pattern in PREFIX_PATTERNS.iter() {
            if let Some(found) = pattern.find(current) {
                current = current[found.end()..].trim_start();
                changed = true;
            }
        }
        if !changed {
            return current;
        }
    }
}

fn strip_wrapping_quotes(text: &str) -> &str {
    const PAIRS: [(char, char); 4] = [
        ('"', '"'),
        ('\u{201c}', '\u{201d}'),
        ('\'', '\''),
        ('`', '`'),
    ];

    let mut current = text.trim();
    loop {
        let mut stripped = false;
        for (open, close) in PAIRS {
            if current.chars().count() >= 2
                && current.starts_with(open)
                && current.ends_with(close)
            {
                current = current[open.len_utf8()..current.len() - close.len_utf8()].trim();
                stripped = true;
            }
        }
        if !stripped {
            return current;
        }
    }
}

fn first_sentence(text: &str) -> &str {
    match SENTENCE_BREAK.find(text) {
        // The terminator itself is a single ASCII byte.
        Some(found) => &text[..found.start() + 1],
        None => text,
    }
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
