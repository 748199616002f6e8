//! Conversation, message and content-block data model

use colloquy_ai::{ImagePayload, PendingToolCall, ToolResponse, ToolServer, WebPage};
use serde::{Deserialize, Serialize};

pub type ConversationId = String;
pub type MessageId = String;

/// A search result as returned by a search engine
pub type SearchResult = WebPage;

/// Per-conversation generation settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationSettings {
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Prompt token budget
    pub context_length: Option<u32>,
    pub backend_id: String,
    pub model_id: String,
    /// Append artifact instructions to the system prompt
    pub artifacts: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub title: String,
    pub settings: ConversationSettings,
    pub created_at: i64,
    pub updated_at: i64,
    pub pinned: bool,
    /// Cleared after the first completed exchange
    pub is_new: bool,
}

impl Conversation {
    pub fn new(title: impl Into<String>, settings: ConversationSettings) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            settings,
            created_at: now,
            updated_at: now,
            pinned: false,
            is_new: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Sent,
    Error,
}

/// A file attached to a user message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileRef {
    pub name: String,
    pub mime_type: String,
    /// Extracted text for documents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Remote URL or `data:` URI for images
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl FileRef {
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/") && self.url.is_some()
    }
}

/// Structured content of a user message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserPayload {
    pub text: String,
    pub files: Vec<FileRef>,
    /// Run the search subflow for this turn
    pub search: bool,
    /// Ask for reasoning output
    pub think: bool,
    /// Text fetched from URLs mentioned in the message
    pub url_context: Option<String>,
}

impl UserPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Concatenated text of every non-image file
    pub fn file_context(&self) -> String {
        self.files
            .iter()
            .filter(|f| !f.is_image())
            .filter_map(|f| {
                f.text
                    .as_ref()
                    .map(|text| format!("<file name=\"{}\">\n{}\n</file>", f.name, text))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Text plus file context, as sent to the backend
    pub fn text_with_files(&self) -> String {
        let files = self.file_context();
        if files.is_empty() {
            self.text.clone()
        } else if self.text.is_empty() {
            files
        } else {
            format!("{}\n\n{}", self.text, files)
        }
    }

    pub fn images(&self) -> impl Iterator<Item = &FileRef> {
        self.files.iter().filter(|f| f.is_image())
    }
}

/// Lifecycle status of a content block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockStatus {
    Loading,
    Optimizing,
    Reading,
    Success,
    Error,
    Cancel,
}

impl BlockStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BlockStatus::Success | BlockStatus::Error | BlockStatus::Cancel
        )
    }
}

/// Why an error block was appended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    Cancelled,
    NoResponse,
    Backend,
    Interrupted,
}

/// A persisted search result linked to an assistant message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentRecord {
    pub id: String,
    pub message_id: MessageId,
    pub created_at: i64,
    pub page: WebPage,
}

/// The typed payload of a content block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockKind {
    Content {
        content: String,
    },
    ReasoningContent {
        content: String,
    },
    ToolCall {
        id: String,
        name: String,
        /// Serialized JSON arguments
        params: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        server: Option<ToolServer>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response: Option<ToolResponse>,
    },
    Image {
        image: ImagePayload,
    },
    Search {
        total: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        query: Option<String>,
        #[serde(default)]
        attachments: Vec<AttachmentRecord>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Action {
        action: PendingToolCall,
        /// Generation can be continued from this point
        resumable: bool,
    },
    Error {
        reason: ErrorReason,
        message: String,
    },
}

impl BlockKind {
    /// Whether this kind counts as model output
    pub fn is_output(&self) -> bool {
        matches!(
            self,
            BlockKind::Content { .. }
                | BlockKind::ReasoningContent { .. }
                | BlockKind::ToolCall { .. }
                | BlockKind::Image { .. }
        )
    }
}

/// One typed, status-tagged unit of assistant output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlock {
    pub status: BlockStatus,
    pub created_at: i64,
    #[serde(flatten)]
    pub kind: BlockKind,
}

impl ContentBlock {
    pub fn new(kind: BlockKind, status: BlockStatus, created_at: i64) -> Self {
        Self {
            status,
            created_at,
            kind,
        }
    }

    pub fn error(reason: ErrorReason, message: impl Into<String>, created_at: i64) -> Self {
        let status = match reason {
            ErrorReason::Cancelled => BlockStatus::Cancel,
            _ => BlockStatus::Error,
        };
        Self::new(
            BlockKind::Error {
                reason,
                message: message.into(),
            },
            status,
            created_at,
        )
    }
}

/// Render the answer text of a block list, as used for history entries
pub fn render_blocks(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .filter_map(|b| match &b.kind {
            BlockKind::Content { content } => Some(content.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("")
}

/// Body of a message, by role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", content = "data", rename_all = "lowercase")]
pub enum MessageBody {
    User(UserPayload),
    Assistant(Vec<ContentBlock>),
}

/// Derived generation statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageMetadata {
    pub total_tokens: u32,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub generation_time_ms: u64,
    pub first_token_latency_ms: Option<u64>,
    pub tokens_per_second: f64,
    /// Offsets relative to generation start
    pub reasoning_start_ms: Option<u64>,
    pub reasoning_end_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    /// The user message an assistant message answers
    pub parent_id: Option<MessageId>,
    pub seq: u64,
    pub created_at: i64,
    pub status: MessageStatus,
    pub body: MessageBody,
    #[serde(default)]
    pub metadata: MessageMetadata,
}

impl Message {
    pub fn user_payload(&self) -> Option<&UserPayload> {
        match &self.body {
            MessageBody::User(payload) => Some(payload),
            MessageBody::Assistant(_) => None,
        }
    }

    /// Content blocks of an assistant message (empty for user messages)
    pub fn blocks(&self) -> &[ContentBlock] {
        match &self.body {
            MessageBody::Assistant(blocks) => blocks,
            MessageBody::User(_) => &[],
        }
    }
}

/// Fields supplied when creating a message; the store assigns the rest
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub parent_id: Option<MessageId>,
    pub status: MessageStatus,
    pub body: MessageBody,
}
