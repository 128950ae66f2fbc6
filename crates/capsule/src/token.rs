//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token. Good enough
//! for budget reports and for sizing the context block; no tokenizer is
//! loaded.

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    tokens_for_chars(text.len())
}

/// Approximate tokens for a known character count.
pub fn tokens_for_chars(chars: usize) -> usize {
    chars.div_ceil(4)
}

/// Approximate number of characters that fit in `tokens`.
pub fn chars_for_tokens(tokens: usize) -> usize {
    tokens.saturating_mul(4)
}
