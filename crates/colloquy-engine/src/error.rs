//! Error types for colloquy-engine

use thiserror::Error;

/// Result type alias using colloquy-engine Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while orchestrating a generation
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the backend layer
    #[error(transparent)]
    Backend(#[from] colloquy_ai::Error),

    /// The backend stream ended with an error event
    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// The referenced message is not a user message
    #[error("Not a user message: {0}")]
    NotAUserMessage(String),

    #[error("Backend not found: {0}")]
    BackendNotFound(String),

    /// `continue_generation` found no paused assistant message
    #[error("Nothing to continue for message {0}")]
    NothingToContinue(String),

    /// The search engine failed
    #[error("Search error: {0}")]
    Search(String),

    /// The message store failed
    #[error("Store error: {0}")]
    Store(String),

    /// Cancellation observed at a suspension point
    #[error("Generation cancelled")]
    Cancelled,
}

impl Error {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
