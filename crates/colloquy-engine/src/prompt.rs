//! Prompt builder
//!
//! Assembles the role-tagged entries sent to a backend and keeps them within
//! the conversation's token budget. History is selected newest first and
//! dropped as a whole once a message no longer fits.

use std::collections::HashMap;

use colloquy_ai::{ChatEntry, ContentPart, EntryContent, Role};

use crate::model::{ConversationSettings, Message, MessageBody, MessageStatus, render_blocks};
use crate::tokens;

/// Instructions appended to the system prompt when artifacts are enabled
pub const ARTIFACTS_PROMPT: &str = "\
When the answer contains substantial self-contained content the user is likely \
to reuse or edit, such as a document, a program, an SVG image or a diagram, wrap \
it in an <artifact> element with a unique `identifier`, a `type` (for example \
\"application/code\", \"text/markdown\", \"image/svg+xml\" or \"text/html\") and a \
short `title`. Keep explanations outside the artifact. Use at most one artifact \
per response unless the user asks for more, and do not use artifacts for short \
snippets or conversational replies.";

/// Inputs of a single prompt build
#[derive(Debug, Clone)]
pub struct PromptInput<'a> {
    /// Complete system prompt, artifacts instructions included
    pub system_prompt: Option<&'a str>,
    /// Chronological history preceding the user turn
    pub history: &'a [Message],
    /// The user turn being answered
    pub user: &'a crate::model::UserPayload,
    /// Replaces the raw user text when search produced results
    pub search_prompt: Option<&'a str>,
    /// Partial assistant answer when continuing a paused generation
    pub partial: Option<&'a str>,
    /// Prompt token budget
    pub budget: u32,
    /// Whether the model accepts image parts
    pub vision: bool,
}

/// A built prompt
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub entries: Vec<ChatEntry>,
    /// Estimated tokens of the merged entries
    pub prompt_tokens: u32,
    /// Number of history messages that fit the budget
    pub history_used: usize,
}

/// The system prompt of a conversation, with artifact instructions if enabled
pub fn system_prompt(settings: &ConversationSettings) -> Option<String> {
    let base = settings
        .system_prompt
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    match (base, settings.artifacts) {
        (Some(base), true) => Some(format!("{}\n\n{}", base, ARTIFACTS_PROMPT)),
        (Some(base), false) => Some(base.to_string()),
        (None, true) => Some(ARTIFACTS_PROMPT.to_string()),
        (None, false) => None,
    }
}

/// Messages usable as history for the user message at `user_seq`.
///
/// Only messages before the user turn are kept; pending messages are skipped
/// and each user message keeps only its latest assistant variant.
pub fn visible_history(messages: &[Message], user_seq: u64) -> Vec<Message> {
    let mut latest: HashMap<&str, u64> = HashMap::new();
    for message in messages {
        if let (MessageBody::Assistant(_), Some(parent)) = (&message.body, &message.parent_id) {
            if message.seq < user_seq && message.status != MessageStatus::Pending {
                let seq = latest.entry(parent.as_str()).or_insert(message.seq);
                *seq = (*seq).max(message.seq);
            }
        }
    }

    messages
        .iter()
        .filter(|m| m.seq < user_seq && m.status != MessageStatus::Pending)
        .filter(|m| match (&m.body, &m.parent_id) {
            (MessageBody::Assistant(_), Some(parent)) => {
                latest.get(parent.as_str()) == Some(&m.seq)
            }
            _ => true,
        })
        .cloned()
        .collect()
}

/// Estimated tokens a history message contributes
pub fn message_tokens(message: &Message) -> u32 {
    match &message.body {
        MessageBody::User(payload) => {
            tokens::estimate(&payload.text) + tokens::estimate(&payload.file_context())
        }
        MessageBody::Assistant(blocks) => tokens::estimate(&render_blocks(blocks)),
    }
}

/// Select the longest newest-first run of history that fits `remaining`,
/// returned in chronological order
pub fn select_history(history: &[Message], remaining: u32) -> Vec<&Message> {
    let mut used = 0u32;
    let mut selected = Vec::new();
    for message in history.iter().rev() {
        let cost = message_tokens(message);
        if used + cost > remaining {
            break;
        }
        used += cost;
        selected.push(message);
    }
    selected.reverse();
    selected
}

/// Text of the final user entry
fn user_text(input: &PromptInput<'_>) -> String {
    let mut text = match input.search_prompt {
        Some(prompt) => prompt.to_string(),
        None => input.user.text_with_files(),
    };
    if let Some(url) = input.user.url_context.as_deref().filter(|u| !u.is_empty()) {
        if !text.is_empty() {
            text.push_str("\n\n");
        }
        text.push_str(url);
    }
    text
}

/// Build the prompt for one generation
pub fn build(input: &PromptInput<'_>) -> Prompt {
    let system = input.system_prompt.filter(|s| !s.is_empty());

    let mut reserve = tokens::estimate(&input.user.text_with_files());
    if let Some(search) = input.search_prompt {
        reserve += tokens::estimate(search);
    }
    if let Some(system) = system {
        reserve += tokens::estimate(system);
    }
    if let Some(url) = input.user.url_context.as_deref() {
        reserve += tokens::estimate(url);
    }
    let remaining = input.budget.saturating_sub(reserve);

    let history = if remaining == 0 {
        Vec::new()
    } else {
        select_history(input.history, remaining)
    };

    let mut entries = Vec::with_capacity(history.len() + 3);
    if let Some(system) = system {
        entries.push(ChatEntry::system(system));
    }
    for message in &history {
        match &message.body {
            MessageBody::User(payload) => entries.push(ChatEntry::user(payload.text_with_files())),
            MessageBody::Assistant(blocks) => {
                let text = render_blocks(blocks);
                if !text.is_empty() {
                    entries.push(ChatEntry::assistant(text));
                }
            }
        }
    }

    let text = user_text(input);
    let images: Vec<ContentPart> = if input.vision {
        input
            .user
            .images()
            .filter_map(|f| f.url.as_deref())
            .map(ContentPart::image_url)
            .collect()
    } else {
        Vec::new()
    };
    if images.is_empty() {
        entries.push(ChatEntry::user(text));
    } else {
        let mut parts = images;
        if !text.is_empty() {
            parts.push(ContentPart::text(text));
        }
        entries.push(ChatEntry::with_parts(Role::User, parts));
    }

    if let Some(partial) = input.partial.filter(|p| !p.is_empty()) {
        entries.push(ChatEntry::assistant(partial));
    }

    let entries = merge_adjacent(entries);
    let prompt_tokens = tokens::estimate_entries(&entries);

    Prompt {
        entries,
        prompt_tokens,
        history_used: history.len(),
    }
}

/// Merge consecutive entries that share a role
pub fn merge_adjacent(entries: Vec<ChatEntry>) -> Vec<ChatEntry> {
    let mut merged: Vec<ChatEntry> = Vec::with_capacity(entries.len());
    for entry in entries {
        match merged.last_mut() {
            Some(last) if last.role == entry.role => {
                let previous = std::mem::replace(&mut last.content, EntryContent::Text(String::new()));
                last.content = merge_content(previous, entry.content);
            }
            _ => merged.push(entry),
        }
    }
    merged
}

fn merge_content(a: EntryContent, b: EntryContent) -> EntryContent {
    if let (EntryContent::Text(a), EntryContent::Text(b)) = (&a, &b) {
        return EntryContent::Text(join_text(a, b));
    }

    let mut others = Vec::new();
    let mut text = String::new();
    for part in a.into_parts().into_iter().chain(b.into_parts()) {
        match part {
            ContentPart::Text { text: t } => text = join_text(&text, &t),
            other => others.push(other),
        }
    }
    if others.is_empty() {
        return EntryContent::Text(text);
    }
    if !text.is_empty() {
        others.push(ContentPart::Text { text });
    }
    EntryContent::Parts(others)
}

fn join_text(a: &str, b: &str) -> String {
    match (a.is_empty(), b.is_empty()) {
        (true, _) => b.to_string(),
        (_, true) => a.to_string(),
        _ => format!("{}\n\n{}", a, b),
    }
}
