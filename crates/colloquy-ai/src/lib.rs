//! colloquy-ai: LLM backend contract
//!
//! This crate defines what the generation orchestrator expects from a backend:
//! role-tagged prompt entries in, an ordered stream of typed events out. It
//! also ships an OpenAI-compatible streaming adapter.

pub mod error;
pub mod providers;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use providers::LlmBackend;
pub use stream::{StreamEvent, StreamEventStream};
pub use types::*;
