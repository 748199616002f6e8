//! Web search support
//!
//! The search engine itself is an external collaborator. This module holds
//! its trait, the query rewrite prompt, cleaning of the rewritten query and
//! the prompt that carries results to the backend.

use std::sync::LazyLock;

use async_trait::async_trait;
use colloquy_ai::ChatEntry;
use regex::Regex;

use crate::error::Result;
use crate::model::{Message, MessageBody, SearchResult, render_blocks};

/// Characters of page content kept per result in the search prompt
const MAX_RESULT_CHARS: usize = 2000;

/// Characters kept per history message in the rewrite context
const MAX_CONTEXT_CHARS: usize = 500;

const REWRITE_INSTRUCTIONS: &str = "\
You turn the user's latest question into a single web search query. Use the \
conversation only to resolve references such as pronouns or follow-ups. Write \
the query in the same language as the question. Reply with the query wrapped \
in <query></query> tags and nothing else.";

static QUERY_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<query>\s*(.*?)\s*</query>").unwrap());

static QUERY_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(?:search\s+)?query\s*[:：]\s*").unwrap());

/// A web search engine
#[async_trait]
pub trait SearchEngine: Send + Sync {
    /// Run a search on behalf of a conversation
    async fn search(&self, conversation_id: &str, query: &str) -> Result<Vec<SearchResult>>;

    /// Abort any search running for a conversation
    async fn stop(&self, conversation_id: &str);
}

/// Recent history rendered as plain text for the rewrite call
pub fn history_context(history: &[Message], limit: usize) -> String {
    let start = history.len().saturating_sub(limit);
    history[start..]
        .iter()
        .filter_map(|m| {
            let (role, text) = match &m.body {
                MessageBody::User(payload) => ("user", payload.text.clone()),
                MessageBody::Assistant(blocks) => ("assistant", render_blocks(blocks)),
            };
            let text = text.trim();
            if text.is_empty() {
                return None;
            }
            Some(format!("{}: {}", role, truncate(text, MAX_CONTEXT_CHARS)))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Entries for the quick completion that rewrites a question into a query
pub fn rewrite_entries(context: &str, question: &str) -> Vec<ChatEntry> {
    let user = if context.is_empty() {
        format!("Question: {}", question)
    } else {
        format!("Conversation:\n{}\n\nQuestion: {}", context, question)
    };
    vec![ChatEntry::system(REWRITE_INSTRUCTIONS), ChatEntry::user(user)]
}

/// Extract a usable query from a rewrite response.
///
/// Returns `None` when nothing usable remains.
pub fn clean_query(raw: &str) -> Option<String> {
    let inner = QUERY_TAG
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(raw);
    let inner = QUERY_LABEL.replace(inner, "");
    let query = inner
        .trim()
        .trim_matches(|c| matches!(c, '"' | '\'' | '`' | '“' | '”' | '「' | '」'))
        .trim();
    if query.is_empty() {
        None
    } else {
        Some(query.to_string())
    }
}

/// The user turn that replaces the raw question when results exist
pub fn search_prompt(results: &[SearchResult], question: &str, date: &str) -> String {
    let sources = results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let body = if r.content.trim().is_empty() {
                r.description.trim()
            } else {
                r.content.trim()
            };
            format!(
                "[{}] {}\nURL: {}\n{}",
                i + 1,
                r.title,
                r.url,
                truncate(body, MAX_RESULT_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Answer the question using the web search results below. Today is {date}.\n\n\
         {sources}\n\n\
         Cite the results you rely on inline with their numbers in square brackets, \
         for example [1] or [2][3]. Do not cite results that do not support the \
         statement. If the results are not relevant, answer from your own knowledge \
         and say so. Answer in the same language as the question.\n\n\
         Question: {question}"
    )
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
