//! Compressed session context block.
//!
//! Renders prior-turn context into a short, budgeted text block appended to
//! the envelope. The session context is only ever borrowed.

use claimcache_core::capsule::SessionContext;

use crate::token::{chars_for_tokens, estimate_tokens};

/// Number of recent turns considered, newest last.
const RECENT_TURNS: usize = 3;

/// Render `context` into at most `budget_tokens` (approximate).
///
/// Returns `None` for an empty context or a zero budget. Oversized blocks
/// are cut at the last sentence boundary that fits, else the last word.
pub fn compress_context(context: &SessionContext, budget_tokens: usize) -> Option<String> {
    if context.is_empty() || budget_tokens == 0 {
        return None;
    }

    let mut lines: Vec<String> = Vec::new();
    let summary = context.summary.trim();
    if !summary.is_empty() {
        lines.push(format!("Summary: {summary}"));
    }
    if !context.preferences.is_empty() {
        lines.push(format!("Preferences: {}", context.preferences.join("; ")));
    }
    let skip = context.recent_turns.len().saturating_sub(RECENT_TURNS);
    for turn in &context.recent_turns[skip..] {
        let turn = turn.trim();
        if !turn.is_empty() {
            lines.push(format!("Recent: {turn}"));
        }
    }

    let block = lines.join("\n");
    if estimate_tokens(&block) <= budget_tokens {
        return Some(block);
    }
    let truncated = truncate_to_chars(&block, chars_for_tokens(budget_tokens));
    (!truncated.is_empty()).then_some(truncated)
}

/// Cut `text` to at most `max_chars` bytes.
///
/// Prefers ending on a sentence terminator (or line break); falls back to a
/// word boundary, then to a hard cut.
pub fn truncate_to_chars(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        return text.to_string();
    }
    let mut end = max_chars;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let head = &text[..end];

    if let Some(i) = head.rfind(['.', '!', '?', '\n']) {
        let cut = head[..=i].trim_end();
        if !cut.is_empty() {
            return cut.to_string();
        }
    }
    if let Some(i) = head.rfind(char::is_whitespace) {
        let cut = head[..i].trim_end();
        if !cut.is_empty() {
            return cut.to_string();
        }
    }
    head.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(summary: &str) -> SessionContext {
        SessionContext {
            summary: summary.into(),
            recent_turns: vec![],
            preferences: vec![],
        }
    }

    #[test]
    fn empty_context_renders_nothing() {
        assert!(compress_context(&SessionContext::default(), 200).is_none());
        assert!(compress_context(&ctx("hello"), 0).is_none());
    }

    #[test]
    fn small_context_is_verbatim() {
        let mut c = ctx("User is comparing phones.");
        c.preferences = vec!["metric units".into(), "no refurbished".into()];
        c.recent_turns = vec!["t1".into(), "t2".into(), "t3".into(), "t4".into()];
        let block = compress_context(&c, 200).unwrap();
        assert_eq!(
            block,
            "Summary: User is comparing phones.\nPreferences: metric units; no refurbished\nRecent: t2\nRecent: t3\nRecent: t4"
        );
    }

    #[test]
    fn oversized_context_fits_budget() {
        let long = "The user wants a laptop. ".repeat(100);
        let c = ctx(&long);
        let block = compress_context(&c, 50).unwrap();
        assert!(estimate_tokens(&block) <= 50);
        assert!(block.ends_with('.'));
        assert_eq!(c.summary, long, "context untouched");
    }

    #[test]
    fn truncation_prefers_sentence_then_word() {
        assert_eq!(truncate_to_chars("One two. Three four five", 16), "One two.");
        assert_eq!(truncate_to_chars("alpha beta gamma", 12), "alpha beta");
        assert_eq!(truncate_to_chars("abcdefgh", 4), "abcd");
    }
}
