//! Terminal rendering of streamed content blocks

use colloquy_engine::{BlockKind, BlockStatus, ContentBlock};

use crate::utils::truncate_chars;

/// Append-only text view of a block list.
///
/// The search block is left out: it changes in place and is reported
/// through [`search_line`] instead.
pub fn transcript(blocks: &[ContentBlock]) -> String {
    let mut out = String::new();
    for block in blocks {
        let piece = match &block.kind {
            BlockKind::Search { .. } => continue,
            BlockKind::Content { content } => content.clone(),
            BlockKind::ReasoningContent { content } => format!("[thinking] {}", content),
            BlockKind::ToolCall { name, params, .. } => {
                format!("[tool {} {}]", name, truncate_chars(params, 60))
            }
            BlockKind::Image { image } => format!("[image {}]", image.mime_type),
            BlockKind::Action { action, .. } => {
                format!("[paused before {}, /continue to resume]", action.name)
            }
            BlockKind::Error { message, .. } => format!("[{}]", message),
        };
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&piece);
    }
    out
}

/// Status line for the search block, if any
pub fn search_line(block: &ContentBlock) -> Option<String> {
    let BlockKind::Search {
        total,
        query,
        error,
        ..
    } = &block.kind
    else {
        return None;
    };
    let query = query.as_deref().unwrap_or_default();
    Some(match block.status {
        BlockStatus::Loading if *total == 0 => "searching...".to_string(),
        BlockStatus::Optimizing => "optimizing query...".to_string(),
        BlockStatus::Reading => format!("searching for \"{}\"...", query),
        BlockStatus::Loading => format!("reading {} results...", total),
        BlockStatus::Success => format!("found {} results for \"{}\"", total, query),
        BlockStatus::Error => format!(
            "search failed: {}",
            error.as_deref().unwrap_or("unknown error")
        ),
        BlockStatus::Cancel => "search cancelled".to_string(),
    })
}

/// Tracks what has been printed for one streaming message
pub struct StreamPrinter {
    printed: usize,
    search: Option<String>,
}

impl StreamPrinter {
    /// Create a printer that skips the first `skip` characters of the transcript
    pub fn new(skip: usize) -> Self {
        Self {
            printed: skip,
            search: None,
        }
    }

    /// New transcript text and a changed search status line, if any
    pub fn update(&mut self, blocks: &[ContentBlock]) -> (String, Option<String>) {
        let text = transcript(blocks);
        let chars: Vec<char> = text.chars().collect();
        let fresh = if chars.len() > self.printed {
            let fresh: String = chars[self.printed..].iter().collect();
            self.printed = chars.len();
            fresh
        } else {
            String::new()
        };

        let line = blocks.first().and_then(search_line);
        let changed = if line.is_some() && line != self.search {
            self.search = line.clone();
            line
        } else {
            None
        };
        (fresh, changed)
    }
}
