//! Deterministic text normalization applied before every embedding call.
//!
//! Index-time and query-time text must go through the same function, or
//! query vectors drift away from stored ones.

use once_cell::sync::Lazy;
use regex::Regex;

/// Budget for texts carrying structural markers.
pub const STRUCTURED_BUDGET: usize = 8000;

/// Budget for plain texts.
pub const PLAIN_BUDGET: usize = 6000;

/// Texts shorter than this are never truncated.
pub const MIN_TRUNCATE_LEN: usize = 1000;

/// How far back from the budget a sentence terminator may be.
const TERMINATOR_WINDOW: usize = 200;

/// How far back from the budget a space may be.
const SPACE_WINDOW: usize = 100;

const STRUCTURE_MARKERS: [&str; 2] = ["主要内容：", "详细描述："];

const SENTENCE_TERMINATORS: [char; 6] = ['。', '！', '？', '.', '!', '?'];

static EXCESS_NEWLINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n{3,}").expect("valid newline pattern"));

static SPACE_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r" {2,}").expect("valid space pattern"));

static SPACE_AFTER_CJK_PUNCT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([。，！？]) +").expect("valid punctuation pattern"));

/// Normalize and truncate `text` for embedding.
pub fn preprocess(text: &str) -> String {
    let text = text.trim().replace("\r\n", "\n").replace('\r', "\n");

    let text = EXCESS_NEWLINES.replace_all(&text, "\n\n");
    let text = text
        .split("\n\n")
        .map(|paragraph| paragraph.replace('\n', " "))
        .collect::<Vec<_>>()
        .join("\n\n");

    let text = text.replace('\t', " ");
    let text = SPACE_RUNS.replace_all(&text, " ");
    let text = SPACE_AFTER_CJK_PUNCT.replace_all(&text, "$1");

    truncate(text.trim(), length_budget(&text)).to_string()
}

/// Character budget for `text`.
pub fn length_budget(text: &str) -> usize {
    if STRUCTURE_MARKERS.iter().any(|m| text.contains(m)) {
        STRUCTURED_BUDGET
    } else {
        PLAIN_BUDGET
    }
}

/// Cut `text` to at most `budget` characters at the nicest nearby boundary.
fn truncate(text: &str, budget: usize) -> &str {
    let char_count = text.chars().count();
    if char_count < MIN_TRUNCATE_LEN || char_count <= budget {
        return text;
    }

    // Byte offset of every char boundary up to the budget.
    let boundaries: Vec<(usize, char)> = text.char_indices().take(budget).collect();
    let end_of = |i: usize| boundaries[i].0 + boundaries[i].1.len_utf8();

    let terminator_floor = budget.saturating_sub(TERMINATOR_WINDOW);
    if let Some(i) = (terminator_floor..budget)
        .rev()
        .find(|&i| SENTENCE_TERMINATORS.contains(&boundaries[i].1))
    {
        return &text[..end_of(i)];
    }

    let space_floor = budget.saturating_sub(SPACE_WINDOW);
    if let Some(i) = (space_floor..budget)
        .rev()
        .find(|&i| boundaries[i].1 == ' ')
    {
        return text[..boundaries[i].0].trim_end();
    }

    &text[..end_of(budget - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trims_and_normalizes_line_endings() {
        assert_eq!(preprocess("  a\r\nb\rc  "), "a b c");
    }

    #[test]
    fn test_collapses_blank_lines_and_joins_paragraph_lines() {
        let out = preprocess("line one\nline two\n\n\n\nnext para");
        assert_eq!(out, "line one line two\n\nnext para");
    }

    #[test]
    fn test_tabs_and_space_runs() {
        assert_eq!(preprocess("a\t\tb    c"), "a b c");
    }

    #[test]
    fn test_removes_space_after_cjk_punctuation() {
        assert_eq!(preprocess("你好， 世界。 再见！  好？ 吗"), "你好，世界。再见！好？吗");
    }

    #[test]
    fn test_short_text_untouched() {
        let text = "x".repeat(999);
        assert_eq!(preprocess(&text), text);
    }

    #[test]
    fn test_budget_selection() {
        assert_eq!(length_budget("plain"), PLAIN_BUDGET);
        assert_eq!(length_budget("主要内容：猫"), STRUCTURED_BUDGET);
        assert_eq!(length_budget("详细描述：狗"), STRUCTURED_BUDGET);
    }

    #[test]
    fn test_truncates_at_sentence_terminator() {
        // Terminator 50 chars before the budget.
        let mut text = "a".repeat(PLAIN_BUDGET - 50);
        text.push('。');
        text.push_str(&"b".repeat(500));
        let out = preprocess(&text);
        assert_eq!(out.chars().count(), PLAIN_BUDGET - 49);
        assert!(out.ends_with('。'));
    }

    #[test]
    fn test_truncates_at_space_when_no_terminator() {
        let mut text = "a".repeat(PLAIN_BUDGET - 30);
        text.push(' ');
        text.push_str(&"b".repeat(500));
        let out = preprocess(&text);
        assert_eq!(out.chars().count(), PLAIN_BUDGET - 30);
        assert!(out.chars().all(|c| c == 'a'));
    }

    #[test]
    fn test_hard_truncate() {
        let text = "字".repeat(PLAIN_BUDGET + 500);
        let out = preprocess(&text);
        assert_eq!(out.chars().count(), PLAIN_BUDGET);
    }

    #[test]
    fn test_terminator_outside_window_is_ignored() {
        let mut text = "a".repeat(PLAIN_BUDGET - 300);
        text.push('.');
        text.push_str(&"b".repeat(1000));
        let out = preprocess(&text);
        assert_eq!(out.chars().count(), PLAIN_BUDGET);
    }

    #[test]
    fn test_structured_budget_applies() {
        let mut text = String::from("主要内容：");
        text.push_str(&"猫".repeat(STRUCTURED_BUDGET + 100));
        let out = preprocess(&text);
        assert_eq!(out.chars().count(), STRUCTURED_BUDGET);
    }

    #[test]
    fn test_is_deterministic() {
        let text = "Hello\tworld。 More\n\n\n\ntext";
        assert_eq!(preprocess(text), preprocess(text));
        assert_eq!(preprocess(&preprocess(text)), preprocess(text));
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(preprocess("   \n\n\t "), "");
    }
}
