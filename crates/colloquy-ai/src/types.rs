//! Core types for LLM interactions

use serde::{Deserialize, Serialize};

/// Role of a chat entry sent to a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One segment of a composite entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text
    Text { text: String },
    /// Image reference (remote URL or `data:` URI)
    ImageUrl { url: String },
}

impl ContentPart {
    /// Create a text part
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create an image part
    pub fn image_url(url: impl Into<String>) -> Self {
        Self::ImageUrl { url: url.into() }
    }

    /// Get text if this is a text part
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::ImageUrl { .. } => None,
        }
    }
}

/// Content of a chat entry: a plain string or a list of parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl EntryContent {
    /// Concatenated text of this content, ignoring non-text parts
    pub fn text(&self) -> String {
        match self {
            EntryContent::Text(text) => text.clone(),
            EntryContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| p.as_text())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Number of image parts
    pub fn image_count(&self) -> usize {
        match self {
            EntryContent::Text(_) => 0,
            EntryContent::Parts(parts) => parts
                .iter()
                .filter(|p| matches!(p, ContentPart::ImageUrl { .. }))
                .count(),
        }
    }

    /// Convert into a list of parts
    pub fn into_parts(self) -> Vec<ContentPart> {
        match self {
            EntryContent::Text(text) if text.is_empty() => vec![],
            EntryContent::Text(text) => vec![ContentPart::Text { text }],
            EntryContent::Parts(parts) => parts,
        }
    }
}

/// A role-tagged entry of the prompt sent to a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub role: Role,
    pub content: EntryContent,
}

impl ChatEntry {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: EntryContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: EntryContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: EntryContent::Text(text.into()),
        }
    }

    /// Create a composite entry
    pub fn with_parts(role: Role, parts: Vec<ContentPart>) -> Self {
        Self {
            role,
            content: EntryContent::Parts(parts),
        }
    }
}

/// Supported input types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Text,
    Image,
}

/// Model capabilities as reported by a backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    /// Model identifier
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Whether the model emits reasoning content
    pub reasoning: bool,
    /// Supported input types
    pub input_types: Vec<InputType>,
    /// Context window size in tokens
    pub context_window: u32,
    /// Maximum output tokens
    pub max_tokens: u32,
}

impl Model {
    /// Whether the model accepts image input
    pub fn supports_vision(&self) -> bool {
        self.input_types.contains(&InputType::Image)
    }
}

/// Token usage totals reported by a backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input: u32,
    pub output: u32,
    pub cache_read: u32,
    /// Reasoning tokens, when the backend separates them
    pub thinking: u32,
}

/// Identity of the tool server a call was dispatched to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolServer {
    pub id: String,
    pub name: String,
}

/// A tool call the backend wanted to make but did not execute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingToolCall {
    pub id: String,
    pub name: String,
    /// Serialized JSON arguments
    pub arguments: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<ToolServer>,
}

/// A web page returned by a search engine or embedded in a tool result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebPage {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: String,
}

/// An image payload carried inline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePayload {
    pub mime_type: String,
    /// Base64-encoded bytes or a URL
    pub data: String,
}

/// One item of a tool response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolOutput {
    Text { text: String },
    Image { image: ImagePayload },
    /// Structured web-page resource
    WebPage { page: WebPage },
}

/// Response payload of a tool call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub content: Vec<ToolOutput>,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResponse {
    /// Create a text response
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolOutput::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// Create an error response
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolOutput::Text {
                text: message.into(),
            }],
            is_error: true,
        }
    }

    /// Web pages embedded in this response
    pub fn web_pages(&self) -> Vec<WebPage> {
        self.content
            .iter()
            .filter_map(|c| match c {
                ToolOutput::WebPage { page } => Some(page.clone()),
                _ => None,
            })
            .collect()
    }

    /// Get the text content as a single string
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ToolOutput::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Request for a streaming completion
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Assistant message being generated (used as the stop key)
    pub message_id: String,
    pub entries: Vec<ChatEntry>,
    pub model_id: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Tool call to resume after a tool-call limit pause
    pub resume: Option<PendingToolCall>,
    /// Ask the model for reasoning output
    pub reasoning: bool,
}
