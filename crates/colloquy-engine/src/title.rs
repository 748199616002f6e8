//! Conversation title generation helpers

use colloquy_ai::ChatEntry;

const TITLE_INSTRUCTIONS: &str = "\
Write a short title for the conversation below. Use at most six words, in the \
same language as the user. Reply with the title only, without quotes or \
punctuation at the end.";

/// Characters of each side of the exchange given to the title call
const MAX_EXCERPT_CHARS: usize = 1000;

/// Entries for the quick completion that names a conversation
pub fn title_entries(question: &str, answer: &str) -> Vec<ChatEntry> {
    let excerpt = |text: &str| text.chars().take(MAX_EXCERPT_CHARS).collect::<String>();
    vec![
        ChatEntry::system(TITLE_INSTRUCTIONS),
        ChatEntry::user(format!(
            "User: {}\n\nAssistant: {}",
            excerpt(question),
            excerpt(answer)
        )),
    ]
}

/// Reduce a model reply to a bare title of at most `max_chars` characters
pub fn clean_title(raw: &str, max_chars: usize) -> String {
    let line = raw
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default();
    let line = line.trim_start_matches('#').trim();
    let line = match line.split_once(':') {
        Some((label, rest)) if label.trim().eq_ignore_ascii_case("title") => rest.trim(),
        _ => line,
    };
    let line = line
        .trim_end_matches(['.', '。'])
        .trim_matches(|c| matches!(c, '"' | '\'' | '*' | '`' | '“' | '”' | '「' | '」'))
        .trim_end_matches(['.', '。'])
        .trim();
    line.chars().take(max_chars).collect::<String>().trim_end().to_string()
}
