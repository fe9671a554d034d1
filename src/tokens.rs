//! Deterministic token estimation.
//!
//! No tokenizer dependency: the estimator is `ceil(chars / 4)`, which is
//! intentionally conservative for news prose. The same function drives
//! truncation, chunking, and budget reservation so every decision made
//! from a count is reproducible.

/// Estimated token count for a text.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Truncate `text` to approximately `max_tokens`, appending a visible
/// marker when anything was dropped. Cuts on a char boundary.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> (String, bool) {
    if estimate_tokens(text) <= max_tokens {
        return (text.to_string(), false);
    }
    let keep_chars = max_tokens.saturating_mul(4);
    let truncated: String = text.chars().take(keep_chars).collect();
    (format!("{truncated}\n[TRUNCATED]"), true)
}

/// Split into chunks of at most `chunk_tokens` estimated tokens each.
pub fn chunk_by_tokens(text: &str, chunk_tokens: usize) -> Vec<String> {
    let chunk_chars = chunk_tokens.max(1) * 4;
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(chunk_chars)
        .map(|c| c.iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimator_is_ceiling_of_quarters() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens(&"x".repeat(400)), 100);
    }

    #[test]
    fn truncation_marks_and_bounds() {
        let text = "z".repeat(1000);
        let (kept, truncated) = truncate_to_tokens(&text, 50);
        assert!(truncated);
        assert!(kept.ends_with("[TRUNCATED]"));
        assert!(kept.len() <= 200 + "\n[TRUNCATED]".len());

        let (same, untouched) = truncate_to_tokens("short", 50);
        assert!(!untouched);
        assert_eq!(same, "short");
    }

    #[test]
    fn chunks_cover_input() {
        let text = "q".repeat(1000);
        let chunks = chunk_by_tokens(&text, 60);
        assert_eq!(chunks.iter().map(String::len).sum::<usize>(), 1000);
        assert!(chunks.iter().all(|c| estimate_tokens(c) <= 60));
    }
}
