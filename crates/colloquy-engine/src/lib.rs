//! colloquy-engine: Generation orchestrator
//!
//! This crate turns a user turn into a streamed, persisted assistant message:
//! prompt budgeting, optional web search, stream event processing,
//! cancellation and final metadata.

pub mod config;
pub mod error;
pub mod events;
pub mod model;
pub mod orchestrator;
pub mod processor;
pub mod prompt;
pub mod registry;
pub mod search;
pub mod state;
pub mod store;
pub mod title;
pub mod tokens;

pub use config::OrchestratorConfig;
pub use error::{Error, Result};
pub use events::GenerationEvent;
pub use model::{
    BlockKind, BlockStatus, ContentBlock, Conversation, ConversationSettings, ErrorReason,
    FileRef, Message, MessageBody, MessageStatus, NewMessage, SearchResult, UserPayload,
};
pub use orchestrator::Orchestrator;
pub use registry::GenerationRegistry;
pub use search::SearchEngine;
pub use state::{GenerationState, Phase};
pub use store::{InMemoryStore, MessageStore};
