//! Generation event types

use serde::{Deserialize, Serialize};

use crate::model::{ContentBlock, ConversationId, MessageId, MessageMetadata, MessageStatus};

/// Events emitted to subscribers while generations run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerationEvent {
    /// An assistant message started generating
    GenerationStart {
        conversation_id: ConversationId,
        message_id: MessageId,
    },

    /// The content blocks of a message changed
    ContentUpdated {
        conversation_id: ConversationId,
        message_id: MessageId,
        blocks: Vec<ContentBlock>,
    },

    /// A generation reached its final status
    GenerationEnd {
        conversation_id: ConversationId,
        message_id: MessageId,
        status: MessageStatus,
        metadata: MessageMetadata,
        cancelled: bool,
    },

    /// A conversation received a generated title
    TitleUpdated {
        conversation_id: ConversationId,
        title: String,
    },

    /// A generation failed
    Error {
        conversation_id: ConversationId,
        message_id: MessageId,
        message: String,
    },
}
