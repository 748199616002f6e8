//! Message store adapter
//!
//! Persistence is owned by the host application. The orchestrator only talks
//! to it through [`MessageStore`]. [`InMemoryStore`] backs tests and the CLI.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::model::{
    AttachmentRecord, ContentBlock, Conversation, ConversationId, Message, MessageBody,
    MessageId, MessageMetadata, MessageStatus, NewMessage, SearchResult,
};

/// Store setting holding the model id used for rewrites and titles
pub const SETTING_QUICK_MODEL: &str = "quick_model";
/// Store setting toggling automatic titles (`"false"` disables)
pub const SETTING_AUTO_TITLE: &str = "auto_title";

/// CRUD access to conversations, messages and attachments
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>>;

    async fn update_conversation(&self, conversation: &Conversation) -> Result<()>;

    /// Create a message, assigning id, sequence number and timestamp
    async fn create_message(&self, message: NewMessage) -> Result<Message>;

    async fn get_message(&self, id: &str) -> Result<Option<Message>>;

    /// Replace the content blocks of an assistant message
    async fn update_content(&self, id: &str, blocks: &[ContentBlock]) -> Result<()>;

    async fn update_status(&self, id: &str, status: MessageStatus) -> Result<()>;

    async fn update_metadata(&self, id: &str, metadata: &MessageMetadata) -> Result<()>;

    /// Persist a search result linked to a message
    async fn add_attachment(&self, message_id: &str, page: &SearchResult)
    -> Result<AttachmentRecord>;

    /// All messages of a conversation ordered by sequence number
    async fn query_history(&self, conversation_id: &str) -> Result<Vec<Message>>;

    /// Messages in a given status across all conversations
    async fn messages_with_status(&self, status: MessageStatus) -> Result<Vec<Message>>;

    async fn get_setting(&self, key: &str) -> Result<Option<String>>;
}

#[derive(Default)]
struct Tables {
    conversations: HashMap<ConversationId, Conversation>,
    messages: HashMap<MessageId, Message>,
    attachments: Vec<AttachmentRecord>,
    settings: HashMap<String, String>,
    next_seq: u64,
}

/// Process-local store
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_conversation(&self, conversation: Conversation) {
        self.tables
            .lock()
            .conversations
            .insert(conversation.id.clone(), conversation);
    }

    pub fn set_setting(&self, key: impl Into<String>, value: impl Into<String>) {
        self.tables.lock().settings.insert(key.into(), value.into());
    }

    /// Attachments recorded for a message
    pub fn attachments(&self, message_id: &str) -> Vec<AttachmentRecord> {
        self.tables
            .lock()
            .attachments
            .iter()
            .filter(|a| a.message_id == message_id)
            .cloned()
            .collect()
    }

    fn with_message<F>(&self, id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut Message),
    {
        let mut tables = self.tables.lock();
        let message = tables
            .messages
            .get_mut(id)
            .ok_or_else(|| Error::MessageNotFound(id.to_string()))?;
        f(message);
        Ok(())
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        Ok(self.tables.lock().conversations.get(id).cloned())
    }

    async fn update_conversation(&self, conversation: &Conversation) -> Result<()> {
        let mut tables = self.tables.lock();
        if !tables.conversations.contains_key(&conversation.id) {
            return Err(Error::ConversationNotFound(conversation.id.clone()));
        }
        let mut updated = conversation.clone();
        updated.updated_at = chrono::Utc::now().timestamp_millis();
        tables.conversations.insert(updated.id.clone(), updated);
        Ok(())
    }

    async fn create_message(&self, message: NewMessage) -> Result<Message> {
        let mut tables = self.tables.lock();
        if !tables.conversations.contains_key(&message.conversation_id) {
            return Err(Error::ConversationNotFound(message.conversation_id));
        }
        let seq = tables.next_seq;
        tables.next_seq += 1;
        let created = Message {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: message.conversation_id,
            parent_id: message.parent_id,
            seq,
            created_at: chrono::Utc::now().timestamp_millis(),
            status: message.status,
            body: message.body,
            metadata: MessageMetadata::default(),
        };
        tables.messages.insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn get_message(&self, id: &str) -> Result<Option<Message>> {
        Ok(self.tables.lock().messages.get(id).cloned())
    }

    async fn update_content(&self, id: &str, blocks: &[ContentBlock]) -> Result<()> {
        self.with_message(id, |m| m.body = MessageBody::Assistant(blocks.to_vec()))
    }

    async fn update_status(&self, id: &str, status: MessageStatus) -> Result<()> {
        self.with_message(id, |m| m.status = status)
    }

    async fn update_metadata(&self, id: &str, metadata: &MessageMetadata) -> Result<()> {
        self.with_message(id, |m| m.metadata = metadata.clone())
    }

    async fn add_attachment(
        &self,
        message_id: &str,
        page: &SearchResult,
    ) -> Result<AttachmentRecord> {
        let record = AttachmentRecord {
            id: uuid::Uuid::new_v4().to_string(),
            message_id: message_id.to_string(),
            created_at: chrono::Utc::now().timestamp_millis(),
            page: page.clone(),
        };
        self.tables.lock().attachments.push(record.clone());
        Ok(record)
    }

    async fn query_history(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let tables = self.tables.lock();
        let mut messages: Vec<Message> = tables
            .messages
            .values()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.seq);
        Ok(messages)
    }

    async fn messages_with_status(&self, status: MessageStatus) -> Result<Vec<Message>> {
        let tables = self.tables.lock();
        let mut messages: Vec<Message> = tables
            .messages
            .values()
            .filter(|m| m.status == status)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.seq);
        Ok(messages)
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        Ok(self.tables.lock().settings.get(key).cloned())
    }
}
