//! Transient per-generation state

use colloquy_ai::Usage;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::model::{BlockKind, BlockStatus, ContentBlock, ConversationId, MessageId, MessageMetadata};
use crate::tokens;

/// Phase of a generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Preparing,
    Searching,
    Streaming,
    Finalizing,
    Cancelling,
    Failing,
}

/// In-memory state of one assistant message being generated.
///
/// Only the generation's own flow mutates it; other callers get clones.
#[derive(Debug, Clone)]
pub struct GenerationState {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    /// The user message being answered
    pub parent_id: MessageId,
    pub blocks: Vec<ContentBlock>,
    pub phase: Phase,
    pub start_time: i64,
    pub first_token_time: Option<i64>,
    pub prompt_tokens: u32,
    pub reasoning_start_time: Option<i64>,
    pub last_reasoning_time: Option<i64>,
    pub is_searching: bool,
    /// Running totals reported by the backend
    pub usage: Option<Usage>,
    pub cancel: CancellationToken,
}

impl GenerationState {
    pub fn new(
        message_id: impl Into<MessageId>,
        conversation_id: impl Into<ConversationId>,
        parent_id: impl Into<MessageId>,
        blocks: Vec<ContentBlock>,
        now: i64,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            conversation_id: conversation_id.into(),
            parent_id: parent_id.into(),
            blocks,
            phase: Phase::Preparing,
            start_time: now,
            first_token_time: None,
            prompt_tokens: 0,
            reasoning_start_time: None,
            last_reasoning_time: None,
            is_searching: false,
            usage: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Suspension-point check
    pub fn ensure_active(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Close every non-terminal block to `success`
    pub fn close_open_blocks(&mut self) {
        for block in &mut self.blocks {
            if !block.status.is_terminal() {
                block.status = BlockStatus::Success;
            }
        }
    }

    /// Whether any content, reasoning, tool or image block was produced
    pub fn has_output(&self) -> bool {
        self.blocks.iter().any(|b| b.kind.is_output())
    }

    /// Number of blocks not yet in a terminal status
    pub fn open_block_count(&self) -> usize {
        self.blocks
            .iter()
            .filter(|b| !b.status.is_terminal())
            .count()
    }

    /// Completion tokens: backend-reported when available, else estimated
    pub fn completion_tokens(&self) -> u32 {
        if let Some(ref usage) = self.usage {
            return usage.output;
        }
        self.blocks
            .iter()
            .map(|b| match &b.kind {
                BlockKind::Content { content } | BlockKind::ReasoningContent { content } => {
                    tokens::estimate(content)
                }
                BlockKind::ToolCall { params, .. } => tokens::estimate(params),
                _ => 0,
            })
            .sum()
    }

    /// Derive the persisted metadata at time `now`
    pub fn metadata(&self, now: i64) -> MessageMetadata {
        let completion = self.completion_tokens();
        let since = self.first_token_time.unwrap_or(self.start_time);
        let generation_time_ms = now.saturating_sub(since).max(0) as u64;
        let tokens_per_second = if generation_time_ms > 0 {
            completion as f64 / (generation_time_ms as f64 / 1000.0)
        } else {
            0.0
        };
        let offset = |t: i64| t.saturating_sub(self.start_time).max(0) as u64;

        MessageMetadata {
            total_tokens: self.prompt_tokens + completion,
            input_tokens: self.prompt_tokens,
            output_tokens: completion,
            generation_time_ms,
            first_token_latency_ms: self.first_token_time.map(offset),
            tokens_per_second,
            reasoning_start_ms: self.reasoning_start_time.map(offset),
            reasoning_end_ms: self.last_reasoning_time.map(offset),
        }
    }
}
