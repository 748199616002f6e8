//! The set of in-flight generations

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::model::MessageId;
use crate::state::GenerationState;

/// Shared handle to one generation's state
pub type StateHandle = Arc<Mutex<GenerationState>>;

/// A cloneable map of active generations keyed by assistant message id.
///
/// Insertion and removal are the only structural mutations. Locks are never
/// held across an `.await`.
#[derive(Clone, Default)]
pub struct GenerationRegistry {
    states: Arc<Mutex<HashMap<MessageId, StateHandle>>>,
}

impl GenerationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a generation, returning its shared handle
    pub fn insert(&self, state: GenerationState) -> StateHandle {
        let id = state.message_id.clone();
        let handle = Arc::new(Mutex::new(state));
        self.states.lock().insert(id, Arc::clone(&handle));
        handle
    }

    pub fn remove(&self, message_id: &str) -> Option<StateHandle> {
        self.states.lock().remove(message_id)
    }

    pub fn get(&self, message_id: &str) -> Option<StateHandle> {
        self.states.lock().get(message_id).cloned()
    }

    /// A snapshot of a generation's state
    pub fn snapshot(&self, message_id: &str) -> Option<GenerationState> {
        self.get(message_id).map(|h| h.lock().clone())
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.states.lock().contains_key(message_id)
    }

    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.lock().is_empty()
    }

    /// Request cancellation of one generation. Returns false if it is not active.
    pub fn cancel(&self, message_id: &str) -> bool {
        match self.get(message_id) {
            Some(handle) => {
                handle.lock().cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Request cancellation of every generation of a conversation.
    /// Returns the ids of the generations that were signalled.
    pub fn cancel_conversation(&self, conversation_id: &str) -> Vec<MessageId> {
        let handles: Vec<StateHandle> = self.states.lock().values().cloned().collect();
        let mut cancelled = Vec::new();
        for handle in handles {
            let state = handle.lock();
            if state.conversation_id == conversation_id {
                state.cancel.cancel();
                cancelled.push(state.message_id.clone());
            }
        }
        cancelled
    }
}
