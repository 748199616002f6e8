//! Stream event processor
//!
//! Folds backend events into the content-block list of a [`GenerationState`].
//! Blocks keep arrival order, except the search block which always sits at
//! index 0. At most one block is open at a time, except for back-to-back
//! tool-call starts, which stay `loading` together until their end or error
//! events pair with them. Any other block closes pending tool calls.

use colloquy_ai::{StreamEvent, ToolResponse, Usage};

use crate::model::{AttachmentRecord, BlockKind, BlockStatus, ContentBlock, SearchResult};
use crate::state::GenerationState;

/// What the orchestrator should do after an event was applied
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Keep reading. `pages` are web pages found in a tool response that
    /// still need to be persisted as attachments.
    Continue { pages: Vec<SearchResult> },
    /// The stream ended normally
    Finished,
    /// The stream ended with an upstream error
    Failed(String),
}

impl Step {
    fn next() -> Self {
        Step::Continue { pages: Vec::new() }
    }
}

#[derive(Clone, Copy)]
enum TextKind {
    Content,
    Reasoning,
}

/// Apply one event to the state at time `now`
pub fn apply(state: &mut GenerationState, event: StreamEvent, now: i64) -> Step {
    match event {
        StreamEvent::ContentDelta { delta } => {
            state.first_token_time.get_or_insert(now);
            append_text(&mut state.blocks, TextKind::Content, &delta, now);
            Step::next()
        }
        StreamEvent::ReasoningDelta { delta } => {
            state.first_token_time.get_or_insert(now);
            state.reasoning_start_time.get_or_insert(now);
            state.last_reasoning_time = Some(now);
            append_text(&mut state.blocks, TextKind::Reasoning, &delta, now);
            Step::next()
        }
        StreamEvent::ToolCallStart {
            id,
            name,
            arguments,
            server,
        } => {
            close_tail(&mut state.blocks, true);
            state.blocks.push(ContentBlock::new(
                BlockKind::ToolCall {
                    id,
                    name,
                    params: arguments,
                    server,
                    response: None,
                },
                BlockStatus::Loading,
                now,
            ));
            Step::next()
        }
        StreamEvent::ToolCallEnd { id, name, response } => {
            let pages = response.web_pages();
            if !finish_tool_call(state, &id, &name, response, BlockStatus::Success) {
                return Step::next();
            }
            if !pages.is_empty() {
                merge_search(&mut state.blocks, pages.len(), now);
            }
            Step::Continue { pages }
        }
        StreamEvent::ToolCallError { id, name, response } => {
            finish_tool_call(state, &id, &name, response, BlockStatus::Error);
            Step::next()
        }
        StreamEvent::ToolCallLimitReached { pending } => {
            close_tail(&mut state.blocks, false);
            state.blocks.push(ContentBlock::new(
                BlockKind::Action {
                    action: pending,
                    resumable: true,
                },
                BlockStatus::Success,
                now,
            ));
            Step::next()
        }
        StreamEvent::ImageData { image } => {
            close_tail(&mut state.blocks, false);
            state.blocks.push(ContentBlock::new(
                BlockKind::Image { image },
                BlockStatus::Success,
                now,
            ));
            Step::next()
        }
        StreamEvent::UsageTotals { usage } => {
            apply_usage(state, usage);
            Step::next()
        }
        StreamEvent::Done { usage } => {
            if let Some(usage) = usage {
                apply_usage(state, usage);
            }
            Step::Finished
        }
        StreamEvent::Error { message } => Step::Failed(message),
    }
}

/// Link persisted attachment records into the leading search block
pub fn link_attachments(state: &mut GenerationState, records: Vec<AttachmentRecord>) {
    if let Some(ContentBlock {
        kind: BlockKind::Search { attachments, .. },
        ..
    }) = state.blocks.first_mut()
    {
        attachments.extend(records);
    }
}

fn apply_usage(state: &mut GenerationState, usage: Usage) {
    if usage.input > 0 {
        state.prompt_tokens = usage.input;
    }
    state.usage = Some(usage);
}

fn append_text(blocks: &mut Vec<ContentBlock>, kind: TextKind, delta: &str, now: i64) {
    if let Some(last) = blocks.last_mut() {
        if !last.status.is_terminal() {
            match (&mut last.kind, kind) {
                (BlockKind::Content { content }, TextKind::Content)
                | (BlockKind::ReasoningContent { content }, TextKind::Reasoning) => {
                    content.push_str(delta);
                    return;
                }
                _ => {}
            }
        }
    }

    close_tail(blocks, false);
    let content = delta.to_string();
    let kind = match kind {
        TextKind::Content => BlockKind::Content { content },
        TextKind::Reasoning => BlockKind::ReasoningContent { content },
    };
    blocks.push(ContentBlock::new(kind, BlockStatus::Loading, now));
}

/// Close open blocks before a new one is pushed. Pending tool calls stay
/// open only when another tool call follows.
fn close_tail(blocks: &mut [ContentBlock], opening_tool_call: bool) {
    for block in blocks.iter_mut().filter(|b| !b.status.is_terminal()) {
        match block.kind {
            BlockKind::Search { .. } => {}
            BlockKind::ToolCall { .. } if opening_tool_call => {}
            _ => block.status = BlockStatus::Success,
        }
    }
}

/// Pair a tool result with its unanswered call block, by id first and name
/// second. A call closed early by later output still pairs. Returns false
/// when nothing matched.
fn finish_tool_call(
    state: &mut GenerationState,
    id: &str,
    name: &str,
    result: ToolResponse,
    status: BlockStatus,
) -> bool {
    let loading_call = |b: &ContentBlock, by_id: bool| {
        b.status != BlockStatus::Error
            && match &b.kind {
                BlockKind::ToolCall {
                    id: call_id,
                    name: call_name,
                    response: None,
                    ..
                } => {
                    if by_id {
                        !id.is_empty() && call_id == id
                    } else {
                        call_name == name
                    }
                }
                _ => false,
            }
    };

    let index = state
        .blocks
        .iter()
        .rposition(|b| loading_call(b, true))
        .or_else(|| state.blocks.iter().rposition(|b| loading_call(b, false)));

    let Some(index) = index else {
        tracing::debug!(
            message_id = %state.message_id,
            tool_call_id = id,
            tool_name = name,
            "tool result without a matching call"
        );
        return false;
    };

    let block = &mut state.blocks[index];
    block.status = status;
    if let BlockKind::ToolCall { response, .. } = &mut block.kind {
        *response = Some(result);
    }
    true
}

fn merge_search(blocks: &mut Vec<ContentBlock>, found: usize, now: i64) {
    if let Some(ContentBlock {
        kind: BlockKind::Search { total, .. },
        ..
    }) = blocks.first_mut()
    {
        *total += found;
        return;
    }
    blocks.insert(
        0,
        ContentBlock::new(
            BlockKind::Search {
                total: found,
                query: None,
                attachments: Vec::new(),
                error: None,
            },
            BlockStatus::Success,
            now,
        ),
    );
}
