//! Token estimation
//!
//! Backends count tokens with their own tokenizers; budgeting only needs a
//! stable approximation. Latin text is estimated at four characters per token,
//! CJK ideographs, kana and hangul at one token per character.

use colloquy_ai::ChatEntry;

/// Fixed cost charged for every image attached to a prompt
pub const IMAGE_TOKENS: u32 = 1200;

/// Estimate the token count of a piece of text
pub fn estimate(text: &str) -> u32 {
    let mut wide = 0u32;
    let mut narrow = 0u32;
    for c in text.chars() {
        if is_wide(c) {
            wide += 1;
        } else {
            narrow += 1;
        }
    }
    wide + narrow.div_ceil(4)
}

/// Estimate the token count of prompt entries, including image costs
pub fn estimate_entries(entries: &[ChatEntry]) -> u32 {
    entries
        .iter()
        .map(|e| estimate(&e.content.text()) + e.content.image_count() as u32 * IMAGE_TOKENS)
        .sum()
}

fn is_wide(c: char) -> bool {
    matches!(c as u32,
        0x3040..=0x30FF      // hiragana, katakana
        | 0x3400..=0x4DBF    // CJK extension A
        | 0x4E00..=0x9FFF    // CJK unified ideographs
        | 0xAC00..=0xD7AF    // hangul syllables
        | 0xF900..=0xFAFF    // CJK compatibility ideographs
        | 0x20000..=0x2FA1F) // CJK extensions B-F
}
