//! Orchestrator configuration

/// Default prompt budget for conversations without a context length
pub const DEFAULT_CONTEXT_LENGTH: u32 = 4096;

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Capacity of the broadcast event channel
    pub event_capacity: usize,
    /// Number of recent messages given to the query rewrite as context
    pub search_history: usize,
    /// Prompt budget used when the conversation sets none
    pub default_context_length: u32,
    /// Maximum number of characters kept from a generated title
    pub title_max_chars: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            event_capacity: 256,
            search_history: 6,
            default_context_length: DEFAULT_CONTEXT_LENGTH,
            title_max_chars: 50,
        }
    }
}
