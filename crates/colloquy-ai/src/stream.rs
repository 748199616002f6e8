//! Streaming event types

use crate::types::{ImagePayload, PendingToolCall, ToolResponse, ToolServer, Usage};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

/// Events emitted by a backend during a streaming completion.
///
/// Backends must emit events in the order they were produced and finish with
/// exactly one terminal event (`Done` or `Error`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Answer text delta
    ContentDelta { delta: String },
    /// Reasoning text delta
    ReasoningDelta { delta: String },
    /// A tool call was dispatched
    ToolCallStart {
        id: String,
        name: String,
        /// Serialized JSON arguments
        arguments: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        server: Option<ToolServer>,
    },
    /// A tool call returned
    ToolCallEnd {
        id: String,
        name: String,
        response: ToolResponse,
    },
    /// A tool call failed
    ToolCallError {
        id: String,
        name: String,
        response: ToolResponse,
    },
    /// The backend stopped calling tools because of its per-turn limit
    ToolCallLimitReached { pending: PendingToolCall },
    /// Generated image
    ImageData { image: ImagePayload },
    /// Running usage totals
    UsageTotals { usage: Usage },
    /// Stream finished
    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
    /// Stream failed
    Error { message: String },
}

impl StreamEvent {
    pub fn content(delta: impl Into<String>) -> Self {
        Self::ContentDelta {
            delta: delta.into(),
        }
    }

    pub fn reasoning(delta: impl Into<String>) -> Self {
        Self::ReasoningDelta {
            delta: delta.into(),
        }
    }
}

/// A stream of backend events
pub type StreamEventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;
