//! Tokenization for the lexical index.
//!
//! Lowercase, whitespace-split, minimum-length filtered. Punctuation is
//! retained inside tokens: citation markers like "§1782" or "28(b)" must
//! match exactly as written, so tokens are never stripped down to
//! alphanumerics.

/// Split text into lexical tokens.
///
/// Tokens shorter than `min_token_len` characters are dropped. Length is
/// measured in characters, not bytes, so multi-byte symbols count as one.
pub fn tokenize(text: &str, min_token_len: usize) -> Vec<String> {
    text.split_whitespace()
        .map(str::to_lowercase)
        .filter(|token| token.chars().count() >= min_token_len)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowercases_and_splits_on_whitespace() {
        assert_eq!(
            tokenize("Cats AND\tDogs\nhere", 2),
            vec!["cats", "and", "dogs", "here"]
        );
    }

    #[test]
    fn test_drops_tokens_below_min_length() {
        assert_eq!(tokenize("a an the I x ok", 2), vec!["an", "the", "ok"]);
    }

    #[test]
    fn test_retains_punctuation_inside_tokens() {
        assert_eq!(
            tokenize("damages under §1782 (see 28(b)).", 2),
            vec!["damages", "under", "§1782", "(see", "28(b))."]
        );
    }

    #[test]
    fn test_min_length_counts_characters_not_bytes() {
        // "§§" is four bytes but two characters.
        assert_eq!(tokenize("§ §§", 2), vec!["§§"]);
    }

    #[test]
    fn test_empty_and_whitespace_input() {
        assert!(tokenize("", 2).is_empty());
        assert!(tokenize("   \n\t  ", 2).is_empty());
    }
}
