//! Generation orchestration
//!
//! One call to [`Orchestrator::start_generation`] drives a single assistant
//! message from preparation through streaming to a persisted final state.
//! Cancellation is cooperative: the token on the generation state is checked
//! at every suspension point and unwinds into the cancel path.

use std::collections::HashMap;
use std::sync::Arc;

use colloquy_ai::{CompletionRequest, LlmBackend, PendingToolCall};
use futures::StreamExt;
use tokio::sync::broadcast;

use crate::config::OrchestratorConfig;
use crate::error::{Error, Result};
use crate::events::GenerationEvent;
use crate::model::{
    BlockKind, BlockStatus, ContentBlock, Conversation, ConversationSettings, ErrorReason,
    Message, MessageBody, MessageId, MessageStatus, NewMessage, UserPayload, render_blocks,
};
use crate::processor::{self, Step};
use crate::prompt::{self, PromptInput};
use crate::registry::{GenerationRegistry, StateHandle};
use crate::search::{self, SearchEngine};
use crate::state::{GenerationState, Phase};
use crate::store::{MessageStore, SETTING_AUTO_TITLE, SETTING_QUICK_MODEL};
use crate::title;

fn now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Everything resolved before a generation starts
struct Job {
    conversation: Conversation,
    user: Message,
    payload: UserPayload,
    history: Vec<Message>,
    backend: Arc<dyn LlmBackend>,
    resume: Option<PendingToolCall>,
    partial: Option<String>,
}

/// Drives generations for any number of conversations
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn MessageStore>,
    backends: HashMap<String, Arc<dyn LlmBackend>>,
    search: Option<Arc<dyn SearchEngine>>,
    registry: GenerationRegistry,
    config: OrchestratorConfig,
    event_tx: broadcast::Sender<GenerationEvent>,
}

impl Orchestrator {
    /// Create an orchestrator over a message store
    pub fn new(store: Arc<dyn MessageStore>, config: OrchestratorConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            store,
            backends: HashMap::new(),
            search: None,
            registry: GenerationRegistry::new(),
            config,
            event_tx,
        }
    }

    /// Register a backend under the id conversations refer to
    pub fn with_backend(mut self, id: impl Into<String>, backend: Arc<dyn LlmBackend>) -> Self {
        self.backends.insert(id.into(), backend);
        self
    }

    /// Enable the search subflow
    pub fn with_search(mut self, engine: Arc<dyn SearchEngine>) -> Self {
        self.search = Some(engine);
        self
    }

    /// Subscribe to generation events
    pub fn subscribe(&self) -> broadcast::Receiver<GenerationEvent> {
        self.event_tx.subscribe()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Snapshot of an in-flight generation
    pub fn get_active_state(&self, message_id: &str) -> Option<GenerationState> {
        self.registry.snapshot(message_id)
    }

    /// Request cancellation of one generation. Returns false if it is not active.
    pub fn stop_generation(&self, message_id: &str) -> bool {
        let found = self.registry.cancel(message_id);
        tracing::debug!(message_id, found, "stop requested");
        found
    }

    /// Request cancellation of every generation of a conversation
    pub fn stop_all_generations(&self, conversation_id: &str) -> Vec<MessageId> {
        let stopped = self.registry.cancel_conversation(conversation_id);
        tracing::debug!(conversation_id, count = stopped.len(), "stop all requested");
        stopped
    }

    /// Generate an assistant message for a user turn.
    ///
    /// Without `query_message_id` the latest user message of the conversation
    /// is answered. With it, a new variant is created for that message.
    /// Returns the id of the assistant message.
    pub async fn start_generation(
        &self,
        conversation_id: &str,
        query_message_id: Option<&str>,
    ) -> Result<MessageId> {
        let conversation = self.conversation(conversation_id).await?;
        let history = self.store.query_history(conversation_id).await?;
        let user = match query_message_id {
            Some(id) => self.user_message(conversation_id, id).await?,
            None => history
                .iter()
                .rev()
                .find(|m| matches!(m.body, MessageBody::User(_)))
                .cloned()
                .ok_or_else(|| Error::MessageNotFound(format!("user message in {}", conversation_id)))?,
        };
        let payload = user_payload(&user)?;
        let backend = self.backend(&conversation.settings)?;

        let message = self
            .store
            .create_message(NewMessage {
                conversation_id: conversation_id.to_string(),
                parent_id: Some(user.id.clone()),
                status: MessageStatus::Pending,
                body: MessageBody::Assistant(Vec::new()),
            })
            .await?;

        let state = GenerationState::new(
            message.id.clone(),
            conversation_id,
            user.id.clone(),
            Vec::new(),
            now(),
        );
        let job = Job {
            conversation,
            user,
            payload,
            history,
            backend,
            resume: None,
            partial: None,
        };
        self.drive(state, job).await
    }

    /// Resume an assistant message paused by the backend's tool-call limit
    pub async fn continue_generation(
        &self,
        conversation_id: &str,
        query_message_id: &str,
    ) -> Result<MessageId> {
        let conversation = self.conversation(conversation_id).await?;
        let user = self.user_message(conversation_id, query_message_id).await?;
        let payload = user_payload(&user)?;
        let history = self.store.query_history(conversation_id).await?;
        let backend = self.backend(&conversation.settings)?;

        let paused = history
            .iter()
            .filter(|m| m.parent_id.as_deref() == Some(query_message_id))
            .filter(|m| matches!(m.body, MessageBody::Assistant(_)))
            .max_by_key(|m| m.seq)
            .ok_or_else(|| Error::NothingToContinue(query_message_id.to_string()))?;

        let mut blocks = paused.blocks().to_vec();
        let resume = match blocks.last_mut() {
            Some(ContentBlock {
                kind: BlockKind::Action { action, resumable },
                ..
            }) if *resumable => {
                *resumable = false;
                action.clone()
            }
            _ => return Err(Error::NothingToContinue(query_message_id.to_string())),
        };
        let partial = render_blocks(&blocks);

        self.store.update_content(&paused.id, &blocks).await?;
        self.store
            .update_status(&paused.id, MessageStatus::Pending)
            .await?;

        let state = GenerationState::new(
            paused.id.clone(),
            conversation_id,
            user.id.clone(),
            blocks,
            now(),
        );
        let job = Job {
            conversation,
            user,
            payload,
            history,
            backend,
            resume: Some(resume),
            partial: Some(partial),
        };
        self.drive(state, job).await
    }

    /// Mark messages left `pending` by a previous process as interrupted.
    /// Returns the number of messages recovered.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let pending = self.store.messages_with_status(MessageStatus::Pending).await?;
        let mut recovered = 0;
        for message in pending {
            if self.registry.contains(&message.id) {
                continue;
            }
            if let MessageBody::Assistant(blocks) = &message.body {
                let mut blocks = blocks.clone();
                for block in &mut blocks {
                    if !block.status.is_terminal() {
                        block.status = BlockStatus::Success;
                    }
                }
                blocks.push(ContentBlock::error(
                    ErrorReason::Interrupted,
                    "session interrupted",
                    now(),
                ));
                self.store.update_content(&message.id, &blocks).await?;
            }
            self.store
                .update_status(&message.id, MessageStatus::Error)
                .await?;
            tracing::debug!(message_id = %message.id, "recovered interrupted message");
            recovered += 1;
        }
        Ok(recovered)
    }

    async fn conversation(&self, id: &str) -> Result<Conversation> {
        self.store
            .get_conversation(id)
            .await?
            .ok_or_else(|| Error::ConversationNotFound(id.to_string()))
    }

    async fn user_message(&self, conversation_id: &str, id: &str) -> Result<Message> {
        let message = self
            .store
            .get_message(id)
            .await?
            .filter(|m| m.conversation_id == conversation_id)
            .ok_or_else(|| Error::MessageNotFound(id.to_string()))?;
        if !matches!(message.body, MessageBody::User(_)) {
            return Err(Error::NotAUserMessage(id.to_string()));
        }
        Ok(message)
    }

    fn backend(&self, settings: &ConversationSettings) -> Result<Arc<dyn LlmBackend>> {
        self.backends
            .get(&settings.backend_id)
            .cloned()
            .ok_or_else(|| Error::BackendNotFound(settings.backend_id.clone()))
    }

    async fn quick_model(&self, settings: &ConversationSettings) -> Result<String> {
        Ok(self
            .store
            .get_setting(SETTING_QUICK_MODEL)
            .await?
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| settings.model_id.clone()))
    }

    /// Register the state, run it and settle the outcome
    async fn drive(&self, state: GenerationState, job: Job) -> Result<MessageId> {
        let message_id = state.message_id.clone();
        let conversation_id = state.conversation_id.clone();
        let handle = self.registry.insert(state);
        let _ = self.event_tx.send(GenerationEvent::GenerationStart {
            conversation_id: conversation_id.clone(),
            message_id: message_id.clone(),
        });
        tracing::debug!(message_id = %message_id, conversation_id = %conversation_id, "generation started");

        let backend = Arc::clone(&job.backend);
        let result = match self.run(&handle, &job).await {
            Ok(()) => self.finalize(&handle).await,
            Err(e) if e.is_cancelled() => self.cancelled(&handle, backend.as_ref()).await,
            Err(e) => self.fail(&handle, e).await,
        };
        self.registry.remove(&message_id);

        if result.is_ok() && !handle.lock().is_cancelled() {
            self.generate_title(&job).await;
        }
        result.map(|()| message_id)
    }

    /// Preparing and streaming
    async fn run(&self, handle: &StateHandle, job: &Job) -> Result<()> {
        let (message_id, cancel) = {
            let state = handle.lock();
            state.ensure_active()?;
            (state.message_id.clone(), state.cancel.clone())
        };
        let settings = &job.conversation.settings;
        let history = prompt::visible_history(&job.history, job.user.seq);

        let search_prompt = match &self.search {
            Some(engine) if job.payload.search && job.resume.is_none() => {
                self.run_search(handle, engine.as_ref(), job, &history)
                    .await?
            }
            _ => None,
        };
        self.check(handle)?;

        let model = job.backend.model(&settings.model_id);
        let budget = settings
            .context_length
            .or_else(|| model.as_ref().map(|m| m.context_window).filter(|w| *w > 0))
            .unwrap_or(self.config.default_context_length);
        let system = prompt::system_prompt(settings);
        let built = prompt::build(&PromptInput {
            system_prompt: system.as_deref(),
            history: &history,
            user: &job.payload,
            search_prompt: search_prompt.as_deref(),
            partial: job.partial.as_deref(),
            budget,
            vision: model.as_ref().is_some_and(|m| m.supports_vision()),
        });
        tracing::debug!(
            message_id = %message_id,
            prompt_tokens = built.prompt_tokens,
            history = built.history_used,
            budget,
            "prompt built"
        );

        {
            let mut state = handle.lock();
            state.ensure_active()?;
            state.prompt_tokens = built.prompt_tokens;
            state.phase = Phase::Streaming;
        }

        let reasoning = job.payload.think && model.as_ref().is_none_or(|m| m.reasoning);
        if job.payload.think && !reasoning {
            tracing::debug!(
                message_id = %message_id,
                model = %settings.model_id,
                "model does not support reasoning, sending a plain request"
            );
        }
        let request = CompletionRequest {
            message_id: message_id.clone(),
            entries: built.entries,
            model_id: settings.model_id.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            resume: job.resume.clone(),
            reasoning,
        };
        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            stream = job.backend.stream_completion(request, cancel.clone()) => stream?,
        };

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                event = stream.next() => event,
            };
            let Some(event) = event else {
                break;
            };

            let step = processor::apply(&mut handle.lock(), event, now());
            match step {
                Step::Continue { pages } => {
                    if !pages.is_empty() {
                        let mut records = Vec::with_capacity(pages.len());
                        for page in &pages {
                            records.push(self.store.add_attachment(&message_id, page).await?);
                        }
                        processor::link_attachments(&mut handle.lock(), records);
                    }
                    self.flush(handle).await?;
                }
                Step::Finished => break,
                Step::Failed(message) => return Err(Error::Stream(message)),
            }
        }
        Ok(())
    }

    /// The search subflow. Returns the search prompt when results were found.
    async fn run_search(
        &self,
        handle: &StateHandle,
        engine: &dyn SearchEngine,
        job: &Job,
        history: &[Message],
    ) -> Result<Option<String>> {
        let (message_id, conversation_id) = {
            let mut state = handle.lock();
            state.ensure_active()?;
            state.phase = Phase::Searching;
            state.is_searching = true;
            let block = ContentBlock::new(
                BlockKind::Search {
                    total: 0,
                    query: None,
                    attachments: Vec::new(),
                    error: None,
                },
                BlockStatus::Loading,
                now(),
            );
            state.blocks.insert(0, block);
            (state.message_id.clone(), state.conversation_id.clone())
        };
        self.flush(handle).await?;

        let outcome = self.search_steps(handle, engine, job, history).await;
        handle.lock().is_searching = false;

        match outcome {
            Ok(Ok(prompt)) => Ok(prompt),
            Ok(Err(e)) => {
                tracing::warn!(
                    message_id = %message_id,
                    conversation_id = %conversation_id,
                    "search failed, continuing without results: {}",
                    e
                );
                update_search_block(handle, |status, _, _, error| {
                    *status = BlockStatus::Error;
                    *error = Some(e.to_string());
                });
                self.flush(handle).await?;
                Ok(None)
            }
            Err(e) if e.is_cancelled() => {
                handle.lock().cancel.cancel();
                engine.stop(&conversation_id).await;
                update_search_block(handle, |status, _, _, error| {
                    *status = BlockStatus::Error;
                    *error = Some("search cancelled".to_string());
                });
                self.flush(handle).await?;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Rewrite, search, persist. The inner error is a recoverable engine failure.
    async fn search_steps(
        &self,
        handle: &StateHandle,
        engine: &dyn SearchEngine,
        job: &Job,
        history: &[Message],
    ) -> Result<std::result::Result<Option<String>, Error>> {
        let (message_id, conversation_id, cancel) = {
            let state = handle.lock();
            (
                state.message_id.clone(),
                state.conversation_id.clone(),
                state.cancel.clone(),
            )
        };
        let question = job.payload.text.clone();

        self.check(handle)?;
        let context = search::history_context(history, self.config.search_history);
        update_search_block(handle, |status, _, _, _| *status = BlockStatus::Optimizing);
        self.flush(handle).await?;

        self.check(handle)?;
        let quick_model = self.quick_model(&job.conversation.settings).await?;
        let rewrite = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            r = job.backend.quick_completion(search::rewrite_entries(&context, &question), &quick_model) => r,
        };
        let query = match rewrite {
            Ok(raw) => search::clean_query(&raw).unwrap_or_else(|| question.clone()),
            Err(e) => {
                tracing::warn!(message_id = %message_id, "query rewrite failed: {}", e);
                question.clone()
            }
        };
        update_search_block(handle, |status, _, q, _| {
            *status = BlockStatus::Reading;
            *q = Some(query.clone());
        });
        self.flush(handle).await?;

        self.check(handle)?;
        let results = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            r = engine.search(&conversation_id, &query) => r,
        };
        let results = match results {
            Ok(results) => results,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => return Ok(Err(e)),
        };
        update_search_block(handle, |status, total, _, _| {
            *status = BlockStatus::Loading;
            *total = results.len();
        });
        self.flush(handle).await?;

        self.check(handle)?;
        let mut records = Vec::with_capacity(results.len());
        for result in &results {
            records.push(self.store.add_attachment(&message_id, result).await?);
        }
        processor::link_attachments(&mut handle.lock(), records);
        update_search_block(handle, |status, _, _, _| *status = BlockStatus::Success);
        self.flush(handle).await?;

        tracing::debug!(message_id = %message_id, query = %query, results = results.len(), "search finished");
        if results.is_empty() {
            return Ok(Ok(None));
        }
        let date = chrono::Utc::now().format("%Y-%m-%d").to_string();
        Ok(Ok(Some(search::search_prompt(&results, &question, &date))))
    }

    fn check(&self, handle: &StateHandle) -> Result<()> {
        handle.lock().ensure_active()
    }

    /// Persist the current blocks and notify subscribers
    async fn flush(&self, handle: &StateHandle) -> Result<()> {
        let (message_id, conversation_id, blocks) = {
            let state = handle.lock();
            (
                state.message_id.clone(),
                state.conversation_id.clone(),
                state.blocks.clone(),
            )
        };
        self.store.update_content(&message_id, &blocks).await?;
        let _ = self.event_tx.send(GenerationEvent::ContentUpdated {
            conversation_id,
            message_id,
            blocks,
        });
        Ok(())
    }

    async fn finalize(&self, handle: &StateHandle) -> Result<()> {
        let now = now();
        let (message_id, conversation_id, metadata) = {
            let mut state = handle.lock();
            state.phase = Phase::Finalizing;
            state.close_open_blocks();
            if !state.has_output() {
                state.blocks.push(ContentBlock::error(
                    ErrorReason::NoResponse,
                    "the model returned no response",
                    now,
                ));
            }
            (
                state.message_id.clone(),
                state.conversation_id.clone(),
                state.metadata(now),
            )
        };

        self.flush(handle).await?;
        self.store.update_metadata(&message_id, &metadata).await?;
        self.store
            .update_status(&message_id, MessageStatus::Sent)
            .await?;

        tracing::debug!(
            message_id = %message_id,
            output_tokens = metadata.output_tokens,
            generation_time_ms = metadata.generation_time_ms,
            "generation finished"
        );
        let _ = self.event_tx.send(GenerationEvent::GenerationEnd {
            conversation_id,
            message_id,
            status: MessageStatus::Sent,
            metadata,
            cancelled: false,
        });
        Ok(())
    }

    async fn cancelled(&self, handle: &StateHandle, backend: &dyn LlmBackend) -> Result<()> {
        let now = now();
        let (message_id, conversation_id, metadata) = {
            let mut state = handle.lock();
            state.phase = Phase::Cancelling;
            state.close_open_blocks();
            state.blocks.push(ContentBlock::error(
                ErrorReason::Cancelled,
                "generation cancelled",
                now,
            ));
            (
                state.message_id.clone(),
                state.conversation_id.clone(),
                state.metadata(now),
            )
        };

        backend.stop_stream(&message_id).await;
        self.flush(handle).await?;
        self.store.update_metadata(&message_id, &metadata).await?;
        self.store
            .update_status(&message_id, MessageStatus::Sent)
            .await?;

        tracing::debug!(message_id = %message_id, "generation cancelled");
        let _ = self.event_tx.send(GenerationEvent::GenerationEnd {
            conversation_id,
            message_id,
            status: MessageStatus::Sent,
            metadata,
            cancelled: true,
        });
        Ok(())
    }

    async fn fail(&self, handle: &StateHandle, error: Error) -> Result<()> {
        let now = now();
        let (message_id, conversation_id, metadata) = {
            let mut state = handle.lock();
            state.phase = Phase::Failing;
            state.close_open_blocks();
            state.blocks.push(ContentBlock::error(
                ErrorReason::Backend,
                error.to_string(),
                now,
            ));
            (
                state.message_id.clone(),
                state.conversation_id.clone(),
                state.metadata(now),
            )
        };

        tracing::error!(
            message_id = %message_id,
            conversation_id = %conversation_id,
            "generation failed: {}",
            error
        );
        let persisted = async {
            self.flush(handle).await?;
            self.store.update_metadata(&message_id, &metadata).await?;
            self.store
                .update_status(&message_id, MessageStatus::Error)
                .await
        };
        if let Err(e) = persisted.await {
            tracing::error!(message_id = %message_id, "failed to record generation error: {}", e);
        }

        let _ = self.event_tx.send(GenerationEvent::Error {
            conversation_id,
            message_id,
            message: error.to_string(),
        });
        Err(error)
    }

    /// Name a new conversation after its first exchange. Failures are logged.
    async fn generate_title(&self, job: &Job) {
        if let Err(e) = self.try_generate_title(job).await {
            tracing::warn!(
                conversation_id = %job.conversation.id,
                "title generation failed: {}",
                e
            );
        }
    }

    async fn try_generate_title(&self, job: &Job) -> Result<()> {
        let mut conversation = self.conversation(&job.conversation.id).await?;
        if !conversation.is_new {
            return Ok(());
        }

        let enabled = self
            .store
            .get_setting(SETTING_AUTO_TITLE)
            .await?
            .map(|v| v.trim() != "false")
            .unwrap_or(true);
        if enabled {
            let history = self.store.query_history(&conversation.id).await?;
            let answer = history
                .iter()
                .rev()
                .find(|m| m.parent_id.as_deref() == Some(job.user.id.as_str()))
                .map(|m| render_blocks(m.blocks()))
                .unwrap_or_default();
            let quick_model = self.quick_model(&conversation.settings).await?;
            let raw = job
                .backend
                .quick_completion(title::title_entries(&job.payload.text, &answer), &quick_model)
                .await?;
            let title = title::clean_title(&raw, self.config.title_max_chars);
            if !title.is_empty() {
                conversation.title = title.clone();
                let _ = self.event_tx.send(GenerationEvent::TitleUpdated {
                    conversation_id: conversation.id.clone(),
                    title,
                });
            }
        }

        conversation.is_new = false;
        self.store.update_conversation(&conversation).await
    }
}

fn user_payload(message: &Message) -> Result<UserPayload> {
    message
        .user_payload()
        .cloned()
        .ok_or_else(|| Error::NotAUserMessage(message.id.clone()))
}

/// Mutate the leading search block, if any
fn update_search_block<F>(handle: &StateHandle, f: F)
where
    F: FnOnce(&mut BlockStatus, &mut usize, &mut Option<String>, &mut Option<String>),
{
    let mut state = handle.lock();
    if let Some(ContentBlock {
        status,
        kind: BlockKind::Search {
            total, query, error, ..
        },
        ..
    }) = state.blocks.first_mut()
    {
        f(status, total, query, error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConversationSettings, MessageMetadata, SearchResult};
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use colloquy_ai::{
        ChatEntry, Model, Role, StreamEvent, StreamEventStream, ToolOutput, ToolResponse, Usage,
        WebPage,
    };
    use parking_lot::Mutex;
    use tokio_util::sync::CancellationToken;

    /// A backend that replays scripted event sequences, one per call
    #[derive(Default)]
    struct MockBackend {
        scripts: Mutex<Vec<Vec<StreamEvent>>>,
        requests: Mutex<Vec<CompletionRequest>>,
        stopped: Mutex<Vec<String>>,
        quick_reply: Option<String>,
        quick_calls: Mutex<Vec<Vec<ChatEntry>>>,
        /// Wait for cancellation after the script instead of ending
        hang: bool,
        /// Cancel the generation from inside the call
        cancel_on_call: bool,
        model: Option<Model>,
    }

    impl MockBackend {
        fn scripted(scripts: Vec<Vec<StreamEvent>>) -> Self {
            Self {
                scripts: Mutex::new(scripts),
                quick_reply: Some("Title: \"Greeting\"".into()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl LlmBackend for MockBackend {
        async fn stream_completion(
            &self,
            request: CompletionRequest,
            cancel: CancellationToken,
        ) -> colloquy_ai::Result<StreamEventStream> {
            self.requests.lock().push(request);
            if self.cancel_on_call {
                cancel.cancel();
            }
            let events = {
                let mut scripts = self.scripts.lock();
                if scripts.is_empty() {
                    vec![StreamEvent::Done { usage: None }]
                } else {
                    scripts.remove(0)
                }
            };
            let hang = self.hang;
            let stream: StreamEventStream = Box::pin(async_stream::stream! {
                for event in events {
                    yield event;
                }
                if hang {
                    cancel.cancelled().await;
                }
            });
            Ok(stream)
        }

        async fn stop_stream(&self, message_id: &str) {
            self.stopped.lock().push(message_id.to_string());
        }

        async fn quick_completion(
            &self,
            entries: Vec<ChatEntry>,
            _model_id: &str,
        ) -> colloquy_ai::Result<String> {
            self.quick_calls.lock().push(entries);
            self.quick_reply
                .clone()
                .ok_or_else(|| colloquy_ai::Error::api("server_error", "quick model down"))
        }

        fn model(&self, _model_id: &str) -> Option<Model> {
            self.model.clone()
        }
    }

    #[derive(Default)]
    struct MockSearch {
        results: Option<Vec<SearchResult>>,
        queries: Mutex<Vec<String>>,
        stopped: Mutex<Vec<String>>,
        /// Never return from `search`
        hang: bool,
        /// Report the search itself as cancelled
        cancelled: bool,
    }

    #[async_trait]
    impl SearchEngine for MockSearch {
        async fn search(&self, _conversation_id: &str, query: &str) -> Result<Vec<SearchResult>> {
            self.queries.lock().push(query.to_string());
            if self.hang {
                std::future::pending::<()>().await;
            }
            if self.cancelled {
                return Err(Error::Cancelled);
            }
            self.results
                .clone()
                .ok_or_else(|| Error::Search("engine unavailable".into()))
        }

        async fn stop(&self, conversation_id: &str) {
            self.stopped.lock().push(conversation_id.to_string());
        }
    }

    struct Fixture {
        orchestrator: Orchestrator,
        store: Arc<InMemoryStore>,
        backend: Arc<MockBackend>,
        conversation_id: String,
        user_id: String,
    }

    async fn fixture(backend: MockBackend, payload: UserPayload) -> Fixture {
        fixture_with(backend, payload, None).await
    }

    async fn fixture_with(
        backend: MockBackend,
        payload: UserPayload,
        search: Option<Arc<MockSearch>>,
    ) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let conversation = Conversation::new(
            "New chat",
            ConversationSettings {
                system_prompt: Some("You are helpful.".into()),
                backend_id: "mock".into(),
                model_id: "test-model".into(),
                context_length: Some(2000),
                ..Default::default()
            },
        );
        let conversation_id = conversation.id.clone();
        store.insert_conversation(conversation);
        let user = store
            .create_message(NewMessage {
                conversation_id: conversation_id.clone(),
                parent_id: None,
                status: MessageStatus::Sent,
                body: MessageBody::User(payload),
            })
            .await
            .unwrap();

        let backend = Arc::new(backend);
        let mut orchestrator = Orchestrator::new(store.clone(), OrchestratorConfig::default())
            .with_backend("mock", backend.clone());
        if let Some(search) = search {
            orchestrator = orchestrator.with_search(search);
        }
        Fixture {
            orchestrator,
            store,
            backend,
            conversation_id,
            user_id: user.id,
        }
    }

    async fn message(store: &InMemoryStore, id: &str) -> Message {
        store.get_message(id).await.unwrap().unwrap()
    }

    fn content_of(block: &ContentBlock) -> Option<&str> {
        match &block.kind {
            BlockKind::Content { content } | BlockKind::ReasoningContent { content } => {
                Some(content)
            }
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_generation_streams_and_finalizes() {
        let backend = MockBackend::scripted(vec![vec![
            StreamEvent::reasoning("thinking"),
            StreamEvent::content("Hel"),
            StreamEvent::content("lo"),
            StreamEvent::UsageTotals {
                usage: Usage {
                    input: 30,
                    output: 5,
                    ..Default::default()
                },
            },
            StreamEvent::Done { usage: None },
        ]]);
        let f = fixture(backend, UserPayload::text("hi there")).await;
        let mut rx = f.orchestrator.subscribe();

        let id = f
            .orchestrator
            .start_generation(&f.conversation_id, None)
            .await
            .unwrap();

        let msg = message(&f.store, &id).await;
        assert_eq!(msg.status, MessageStatus::Sent);
        assert_eq!(msg.parent_id.as_deref(), Some(f.user_id.as_str()));
        let blocks = msg.blocks();
        assert_eq!(blocks.len(), 2);
        assert_eq!(content_of(&blocks[0]), Some("thinking"));
        assert_eq!(content_of(&blocks[1]), Some("Hello"));
        assert!(blocks.iter().all(|b| b.status == BlockStatus::Success));
        assert_eq!(msg.metadata.input_tokens, 30);
        assert_eq!(msg.metadata.output_tokens, 5);
        assert_eq!(msg.metadata.total_tokens, 35);
        assert!(f.orchestrator.get_active_state(&id).is_none());

        let request = f.backend.requests.lock()[0].clone();
        assert_eq!(request.entries[0], ChatEntry::system("You are helpful."));
        assert_eq!(request.entries.last(), Some(&ChatEntry::user("hi there")));
        assert_eq!(request.message_id, id);

        let conversation = f
            .store
            .get_conversation(&f.conversation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(conversation.title, "Greeting");
        assert!(!conversation.is_new);

        let mut saw_start = false;
        let mut saw_end = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                GenerationEvent::GenerationStart { .. } => saw_start = true,
                GenerationEvent::GenerationEnd { cancelled, .. } => {
                    assert!(!cancelled);
                    saw_end = true;
                }
                _ => {}
            }
        }
        assert!(saw_start && saw_end);
    }

    #[tokio::test]
    async fn test_empty_response_appends_no_response_block() {
        let backend = MockBackend::scripted(vec![vec![StreamEvent::Done { usage: None }]]);
        let f = fixture(backend, UserPayload::text("hello?")).await;

        let id = f
            .orchestrator
            .start_generation(&f.conversation_id, None)
            .await
            .unwrap();

        let msg = message(&f.store, &id).await;
        assert_eq!(msg.status, MessageStatus::Sent);
        assert!(matches!(
            msg.blocks(),
            [ContentBlock {
                kind: BlockKind::Error {
                    reason: ErrorReason::NoResponse,
                    ..
                },
                status: BlockStatus::Error,
                ..
            }]
        ));
    }

    #[tokio::test]
    async fn test_stream_error_marks_message_error() {
        let backend = MockBackend::scripted(vec![vec![
            StreamEvent::content("partial"),
            StreamEvent::Error {
                message: "overloaded".into(),
            },
        ]]);
        let f = fixture(backend, UserPayload::text("hi")).await;

        let err = f
            .orchestrator
            .start_generation(&f.conversation_id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Stream(ref m) if m == "overloaded"));

        let history = f.store.query_history(&f.conversation_id).await.unwrap();
        let msg = history.last().unwrap();
        assert_eq!(msg.status, MessageStatus::Error);
        let blocks = msg.blocks();
        assert_eq!(blocks[0].status, BlockStatus::Success);
        assert!(matches!(
            blocks[1].kind,
            BlockKind::Error {
                reason: ErrorReason::Backend,
                ..
            }
        ));
        assert!(f.orchestrator.registry.is_empty());

        // failed generations keep the conversation untitled
        let conversation = f
            .store
            .get_conversation(&f.conversation_id)
            .await
            .unwrap()
            .unwrap();
        assert!(conversation.is_new);
    }

    #[tokio::test]
    async fn test_cancel_before_streaming_yields_single_cancel_block() {
        let mut backend = MockBackend::scripted(vec![vec![
            StreamEvent::content("never applied"),
            StreamEvent::Done { usage: None },
        ]]);
        backend.cancel_on_call = true;
        let f = fixture(backend, UserPayload::text("hi")).await;

        let id = f
            .orchestrator
            .start_generation(&f.conversation_id, None)
            .await
            .unwrap();

        let msg = message(&f.store, &id).await;
        assert_eq!(msg.status, MessageStatus::Sent);
        assert_eq!(msg.blocks().len(), 1);
        assert_eq!(msg.blocks()[0].status, BlockStatus::Cancel);
        assert!(matches!(
            msg.blocks()[0].kind,
            BlockKind::Error {
                reason: ErrorReason::Cancelled,
                ..
            }
        ));
        assert_eq!(*f.backend.stopped.lock(), vec![id.clone()]);

        // cancelled generations do not trigger a title
        assert!(f.backend.quick_calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_stop_generation_mid_stream() {
        let mut backend = MockBackend::scripted(vec![vec![StreamEvent::content("first words")]]);
        backend.hang = true;
        let f = fixture(backend, UserPayload::text("tell me a story")).await;
        let mut rx = f.orchestrator.subscribe();

        let orchestrator = f.orchestrator.clone();
        let conversation_id = f.conversation_id.clone();
        let task = tokio::spawn(async move {
            orchestrator.start_generation(&conversation_id, None).await
        });

        loop {
            match rx.recv().await.unwrap() {
                GenerationEvent::ContentUpdated {
                    message_id, blocks, ..
                } if !blocks.is_empty() => {
                    let active = f.orchestrator.get_active_state(&message_id).unwrap();
                    assert_eq!(active.phase, Phase::Streaming);
                    assert!(f.orchestrator.stop_generation(&message_id));
                    break;
                }
                _ => {}
            }
        }

        let id = task.await.unwrap().unwrap();
        let msg = message(&f.store, &id).await;
        let blocks = msg.blocks();
        assert_eq!(blocks.len(), 2);
        assert_eq!(content_of(&blocks[0]), Some("first words"));
        assert_eq!(blocks[0].status, BlockStatus::Success);
        assert_eq!(blocks[1].status, BlockStatus::Cancel);
        assert_eq!(
            blocks
                .iter()
                .filter(|b| b.status == BlockStatus::Cancel)
                .count(),
            1
        );
        assert!(!f.orchestrator.stop_generation(&id));
    }

    #[tokio::test]
    async fn test_missing_conversation_is_fatal() {
        let f = fixture(MockBackend::default(), UserPayload::text("hi")).await;
        let err = f
            .orchestrator
            .start_generation("missing", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConversationNotFound(_)));
        assert!(f.backend.requests.lock().is_empty());
        assert_eq!(
            f.store.query_history(&f.conversation_id).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_retry_creates_variant() {
        let backend = MockBackend::scripted(vec![
            vec![StreamEvent::content("first"), StreamEvent::Done { usage: None }],
            vec![StreamEvent::content("second"), StreamEvent::Done { usage: None }],
        ]);
        let f = fixture(backend, UserPayload::text("pick a color")).await;

        let first = f
            .orchestrator
            .start_generation(&f.conversation_id, Some(&f.user_id))
            .await
            .unwrap();
        let second = f
            .orchestrator
            .start_generation(&f.conversation_id, Some(&f.user_id))
            .await
            .unwrap();
        assert_ne!(first, second);

        let variants: Vec<Message> = f
            .store
            .query_history(&f.conversation_id)
            .await
            .unwrap()
            .into_iter()
            .filter(|m| m.parent_id.as_deref() == Some(f.user_id.as_str()))
            .collect();
        assert_eq!(variants.len(), 2);

        // the retry prompt does not include the earlier variant
        let requests = f.backend.requests.lock();
        assert_eq!(requests[1].entries.len(), 2);
    }

    #[tokio::test]
    async fn test_start_with_assistant_message_is_rejected() {
        let backend = MockBackend::scripted(vec![vec![
            StreamEvent::content("answer"),
            StreamEvent::Done { usage: None },
        ]]);
        let f = fixture(backend, UserPayload::text("q")).await;
        let id = f
            .orchestrator
            .start_generation(&f.conversation_id, None)
            .await
            .unwrap();
        let err = f
            .orchestrator
            .start_generation(&f.conversation_id, Some(&id))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotAUserMessage(_)));
    }

    fn search_payload() -> UserPayload {
        UserPayload {
            search: true,
            ..UserPayload::text("latest rust release")
        }
    }

    fn results() -> Vec<SearchResult> {
        vec![
            SearchResult {
                title: "Rust 1.90".into(),
                url: "https://blog.rust-lang.org".into(),
                content: "Rust 1.90 is out".into(),
                ..Default::default()
            },
            SearchResult {
                title: "Changelog".into(),
                url: "https://github.com/rust-lang/rust".into(),
                description: "Release notes".into(),
                ..Default::default()
            },
        ]
    }

    #[tokio::test]
    async fn test_search_results_feed_the_prompt() {
        let mut backend = MockBackend::scripted(vec![vec![
            StreamEvent::content("Rust 1.90 [1]"),
            StreamEvent::Done { usage: None },
        ]]);
        backend.quick_reply = Some("<query>rust release 2026</query>".into());
        let search = Arc::new(MockSearch {
            results: Some(results()),
            ..Default::default()
        });
        let f = fixture_with(backend, search_payload(), Some(search.clone())).await;
        f.store.set_setting(SETTING_AUTO_TITLE, "false");

        let id = f
            .orchestrator
            .start_generation(&f.conversation_id, None)
            .await
            .unwrap();

        assert_eq!(*search.queries.lock(), vec!["rust release 2026".to_string()]);
        let msg = message(&f.store, &id).await;
        match &msg.blocks()[0] {
            ContentBlock {
                status: BlockStatus::Success,
                kind:
                    BlockKind::Search {
                        total,
                        query,
                        attachments,
                        error,
                    },
                ..
            } => {
                assert_eq!(*total, 2);
                assert_eq!(query.as_deref(), Some("rust release 2026"));
                assert_eq!(attachments.len(), 2);
                assert!(error.is_none());
            }
            other => panic!("unexpected first block {:?}", other),
        }
        assert_eq!(f.store.attachments(&id).len(), 2);

        let request = f.backend.requests.lock()[0].clone();
        let last = request.entries.last().unwrap();
        assert_eq!(last.role, Role::User);
        assert!(last.content.text().contains("[1] Rust 1.90"));
        assert!(last.content.text().ends_with("Question: latest rust release"));

        // auto titles are disabled, so only the rewrite used the quick model
        assert_eq!(f.backend.quick_calls.lock().len(), 1);
        let conversation = f
            .store
            .get_conversation(&f.conversation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(conversation.title, "New chat");
        assert!(!conversation.is_new);
    }

    #[tokio::test]
    async fn test_search_failure_is_recovered() {
        let mut backend = MockBackend::scripted(vec![vec![
            StreamEvent::content("from memory"),
            StreamEvent::Done { usage: None },
        ]]);
        backend.quick_reply = None;
        let search = Arc::new(MockSearch::default());
        let f = fixture_with(backend, search_payload(), Some(search.clone())).await;

        let id = f
            .orchestrator
            .start_generation(&f.conversation_id, None)
            .await
            .unwrap();

        // rewrite failed, so the original question was searched
        assert_eq!(*search.queries.lock(), vec!["latest rust release".to_string()]);

        let msg = message(&f.store, &id).await;
        assert_eq!(msg.status, MessageStatus::Sent);
        match &msg.blocks()[0].kind {
            BlockKind::Search { error, .. } => {
                assert_eq!(error.as_deref(), Some("Search error: engine unavailable"))
            }
            other => panic!("unexpected first block {:?}", other),
        }
        assert_eq!(msg.blocks()[0].status, BlockStatus::Error);
        assert_eq!(content_of(&msg.blocks()[1]), Some("from memory"));

        let request = f.backend.requests.lock()[0].clone();
        assert_eq!(
            request.entries.last(),
            Some(&ChatEntry::user("latest rust release"))
        );
    }

    #[tokio::test]
    async fn test_tool_web_pages_become_attachments() {
        let page = WebPage {
            title: "Docs".into(),
            url: "https://docs.rs".into(),
            ..Default::default()
        };
        let backend = MockBackend::scripted(vec![vec![
            StreamEvent::ToolCallStart {
                id: "T1".into(),
                name: "web_search".into(),
                arguments: "{\"q\":\"docs\"}".into(),
                server: None,
            },
            StreamEvent::ToolCallEnd {
                id: "T1".into(),
                name: "web_search".into(),
                response: ToolResponse {
                    content: vec![ToolOutput::WebPage { page }],
                    is_error: false,
                },
            },
            StreamEvent::content("See docs.rs"),
            StreamEvent::Done { usage: None },
        ]]);
        let f = fixture(backend, UserPayload::text("where are the docs")).await;

        let id = f
            .orchestrator
            .start_generation(&f.conversation_id, None)
            .await
            .unwrap();

        let msg = message(&f.store, &id).await;
        let blocks = msg.blocks();
        assert!(matches!(
            &blocks[0].kind,
            BlockKind::Search { total: 1, attachments, .. } if attachments.len() == 1
        ));
        assert!(matches!(blocks[1].kind, BlockKind::ToolCall { .. }));
        assert_eq!(blocks[1].status, BlockStatus::Success);
        assert_eq!(f.store.attachments(&id).len(), 1);
    }

    #[tokio::test]
    async fn test_continue_after_tool_limit() {
        let pending = PendingToolCall {
            id: "T9".into(),
            name: "fetch".into(),
            arguments: "{}".into(),
            server: None,
        };
        let backend = MockBackend::scripted(vec![
            vec![
                StreamEvent::content("working"),
                StreamEvent::ToolCallLimitReached {
                    pending: pending.clone(),
                },
                StreamEvent::Done { usage: None },
            ],
            vec![StreamEvent::content("done"), StreamEvent::Done { usage: None }],
        ]);
        let f = fixture(backend, UserPayload::text("do the task")).await;

        let first = f
            .orchestrator
            .start_generation(&f.conversation_id, None)
            .await
            .unwrap();
        let second = f
            .orchestrator
            .continue_generation(&f.conversation_id, &f.user_id)
            .await
            .unwrap();
        assert_eq!(first, second);

        let msg = message(&f.store, &first).await;
        let blocks = msg.blocks();
        assert_eq!(blocks.len(), 3);
        assert_eq!(content_of(&blocks[0]), Some("working"));
        assert!(matches!(
            blocks[1].kind,
            BlockKind::Action {
                resumable: false,
                ..
            }
        ));
        assert_eq!(content_of(&blocks[2]), Some("done"));
        assert_eq!(msg.status, MessageStatus::Sent);

        let request = f.backend.requests.lock()[1].clone();
        assert_eq!(request.resume, Some(pending));
        assert_eq!(request.entries.last(), Some(&ChatEntry::assistant("working")));

        let err = f
            .orchestrator
            .continue_generation(&f.conversation_id, &f.user_id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NothingToContinue(_)));
    }

    #[tokio::test]
    async fn test_vision_model_receives_images() {
        let mut backend = MockBackend::scripted(vec![vec![
            StreamEvent::content("a cat"),
            StreamEvent::Done { usage: None },
        ]]);
        backend.model = Some(Model {
            id: "test-model".into(),
            name: "Test".into(),
            reasoning: false,
            input_types: vec![colloquy_ai::InputType::Text, colloquy_ai::InputType::Image],
            context_window: 8000,
            max_tokens: 1000,
        });
        let payload = UserPayload {
            files: vec![crate::model::FileRef {
                name: "cat.png".into(),
                mime_type: "image/png".into(),
                text: None,
                url: Some("data:image/png;base64,AAAA".into()),
            }],
            ..UserPayload::text("what is this")
        };
        let f = fixture(backend, payload).await;

        f.orchestrator
            .start_generation(&f.conversation_id, None)
            .await
            .unwrap();

        let request = f.backend.requests.lock()[0].clone();
        let last = request.entries.last().unwrap();
        assert_eq!(last.content.image_count(), 1);
    }

    #[tokio::test]
    async fn test_recover_interrupted_messages() {
        let f = fixture(MockBackend::default(), UserPayload::text("hi")).await;
        let pending = f
            .store
            .create_message(NewMessage {
                conversation_id: f.conversation_id.clone(),
                parent_id: Some(f.user_id.clone()),
                status: MessageStatus::Pending,
                body: MessageBody::Assistant(vec![ContentBlock::new(
                    BlockKind::Content {
                        content: "half an ans".into(),
                    },
                    BlockStatus::Loading,
                    0,
                )]),
            })
            .await
            .unwrap();
        f.store
            .update_metadata(&pending.id, &MessageMetadata::default())
            .await
            .unwrap();

        assert_eq!(f.orchestrator.recover_interrupted().await.unwrap(), 1);

        let msg = message(&f.store, &pending.id).await;
        assert_eq!(msg.status, MessageStatus::Error);
        assert_eq!(msg.blocks()[0].status, BlockStatus::Success);
        assert!(matches!(
            msg.blocks()[1].kind,
            BlockKind::Error {
                reason: ErrorReason::Interrupted,
                ..
            }
        ));
        assert_eq!(f.orchestrator.recover_interrupted().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stop_all_generations_for_conversation() {
        let mut backend = MockBackend::scripted(vec![vec![StreamEvent::content("x")]]);
        backend.hang = true;
        let f = fixture(backend, UserPayload::text("go")).await;
        let mut rx = f.orchestrator.subscribe();

        let orchestrator = f.orchestrator.clone();
        let conversation_id = f.conversation_id.clone();
        let task = tokio::spawn(async move {
            orchestrator.start_generation(&conversation_id, None).await
        });

        loop {
            if let GenerationEvent::ContentUpdated { .. } = rx.recv().await.unwrap() {
                break;
            }
        }
        assert_eq!(f.orchestrator.stop_all_generations("other").len(), 0);
        assert_eq!(f.orchestrator.stop_all_generations(&f.conversation_id).len(), 1);
        let id = task.await.unwrap().unwrap();
        assert_eq!(message(&f.store, &id).await.status, MessageStatus::Sent);
    }

    fn assert_search_cancelled(msg: &Message) {
        let blocks = msg.blocks();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].status, BlockStatus::Error);
        match &blocks[0].kind {
            BlockKind::Search { error, .. } => {
                assert_eq!(error.as_deref(), Some("search cancelled"))
            }
            other => panic!("unexpected first block {:?}", other),
        }
        assert_eq!(blocks[1].status, BlockStatus::Cancel);
        assert!(matches!(
            blocks[1].kind,
            BlockKind::Error {
                reason: ErrorReason::Cancelled,
                ..
            }
        ));
        assert_eq!(msg.status, MessageStatus::Sent);
    }

    #[tokio::test]
    async fn test_stop_during_search_stops_engine() {
        let search = Arc::new(MockSearch {
            hang: true,
            ..Default::default()
        });
        let f = fixture_with(
            MockBackend::scripted(vec![]),
            search_payload(),
            Some(search.clone()),
        )
        .await;
        let mut rx = f.orchestrator.subscribe();

        let orchestrator = f.orchestrator.clone();
        let conversation_id = f.conversation_id.clone();
        let task = tokio::spawn(async move {
            orchestrator.start_generation(&conversation_id, None).await
        });

        loop {
            match rx.recv().await.unwrap() {
                GenerationEvent::ContentUpdated { blocks, .. }
                    if blocks.first().map(|b| b.status) == Some(BlockStatus::Reading) =>
                {
                    break;
                }
                _ => {}
            }
        }
        assert_eq!(f.orchestrator.stop_all_generations(&f.conversation_id).len(), 1);

        let id = task.await.unwrap().unwrap();
        assert_search_cancelled(&message(&f.store, &id).await);
        assert_eq!(*search.stopped.lock(), vec![f.conversation_id.clone()]);
        assert!(f.backend.requests.lock().is_empty());
        // only the query rewrite reached the quick model, no title
        assert_eq!(f.backend.quick_calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_search_result_is_not_a_search_failure() {
        let search = Arc::new(MockSearch {
            cancelled: true,
            ..Default::default()
        });
        let f = fixture_with(
            MockBackend::scripted(vec![vec![
                StreamEvent::content("should not stream"),
                StreamEvent::Done { usage: None },
            ]]),
            search_payload(),
            Some(search.clone()),
        )
        .await;

        let id = f
            .orchestrator
            .start_generation(&f.conversation_id, None)
            .await
            .unwrap();

        assert_search_cancelled(&message(&f.store, &id).await);
        assert_eq!(*search.stopped.lock(), vec![f.conversation_id.clone()]);
        assert!(f.backend.requests.lock().is_empty());
        assert_eq!(f.backend.quick_calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_think_flag_requests_reasoning() {
        let payload = UserPayload {
            text: "why is the sky blue?".into(),
            think: true,
            ..Default::default()
        };
        let f = fixture(MockBackend::scripted(vec![]), payload.clone()).await;
        f.orchestrator
            .start_generation(&f.conversation_id, None)
            .await
            .unwrap();
        assert!(f.backend.requests.lock()[0].reasoning);

        let mut backend = MockBackend::scripted(vec![]);
        backend.model = Some(Model {
            id: "test-model".into(),
            name: "Test".into(),
            reasoning: false,
            input_types: vec![colloquy_ai::InputType::Text],
            context_window: 8000,
            max_tokens: 1000,
        });
        let f = fixture(backend, payload).await;
        f.orchestrator
            .start_generation(&f.conversation_id, None)
            .await
            .unwrap();
        assert!(!f.backend.requests.lock()[0].reasoning);

        let f = fixture(MockBackend::scripted(vec![]), UserPayload::text("hi")).await;
        f.orchestrator
            .start_generation(&f.conversation_id, None)
            .await
            .unwrap();
        assert!(!f.backend.requests.lock()[0].reasoning);
    }

    #[tokio::test]
    async fn test_two_conversations_generate_independently() {
        let mut slow = MockBackend::scripted(vec![vec![StreamEvent::content("part of A")]]);
        slow.hang = true;
        let f = fixture(slow, UserPayload::text("question A")).await;

        let fast = Arc::new(MockBackend::scripted(vec![vec![
            StreamEvent::content("answer B"),
            StreamEvent::Done { usage: None },
        ]]));
        let orchestrator = f.orchestrator.clone().with_backend("second", fast.clone());

        let conversation = Conversation::new(
            "New chat",
            ConversationSettings {
                backend_id: "second".into(),
                model_id: "test-model".into(),
                context_length: Some(2000),
                ..Default::default()
            },
        );
        let second_id = conversation.id.clone();
        f.store.insert_conversation(conversation);
        f.store
            .create_message(NewMessage {
                conversation_id: second_id.clone(),
                parent_id: None,
                status: MessageStatus::Sent,
                body: MessageBody::User(UserPayload::text("question B")),
            })
            .await
            .unwrap();

        let mut rx = orchestrator.subscribe();
        let first = {
            let orchestrator = orchestrator.clone();
            let conversation_id = f.conversation_id.clone();
            tokio::spawn(async move { orchestrator.start_generation(&conversation_id, None).await })
        };
        let first_message = loop {
            match rx.recv().await.unwrap() {
                GenerationEvent::ContentUpdated {
                    message_id, blocks, ..
                } if !blocks.is_empty() => break message_id,
                _ => {}
            }
        };

        // B runs to completion while A is still streaming
        let second_message = orchestrator.start_generation(&second_id, None).await.unwrap();
        assert!(orchestrator.get_active_state(&first_message).is_some());
        assert!(orchestrator.get_active_state(&second_message).is_none());

        let second = message(&f.store, &second_message).await;
        assert_eq!(second.status, MessageStatus::Sent);
        assert_eq!(second.blocks().len(), 1);
        assert_eq!(content_of(&second.blocks()[0]), Some("answer B"));
        assert!(fast.stopped.lock().is_empty());

        assert!(orchestrator.stop_generation(&first_message));
        assert_eq!(first.await.unwrap().unwrap(), first_message);
        let first = message(&f.store, &first_message).await;
        assert_eq!(first.status, MessageStatus::Sent);
        assert_eq!(content_of(&first.blocks()[0]), Some("part of A"));
        assert_eq!(first.blocks()[1].status, BlockStatus::Cancel);
        assert_eq!(*f.backend.stopped.lock(), vec![first_message.clone()]);

        // the conversations did not leak into each other
        let second_request = fast.requests.lock()[0].clone();
        assert!(!second_request.entries.iter().any(|e| e.content.text().contains("question A")));
        assert!(orchestrator.get_active_state(&first_message).is_none());
    }
}
