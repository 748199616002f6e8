//! OpenAI-compatible Chat Completions backend

use std::collections::HashMap;
use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    providers::LlmBackend,
    stream::{StreamEvent, StreamEventStream},
    types::{ChatEntry, CompletionRequest, ContentPart, EntryContent, Model, Usage},
};

/// Default endpoint used when no base URL is configured
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// `reasoning_effort` sent when a request asks for reasoning
const REASONING_EFFORT: &str = "medium";

type ActiveStreams = Arc<Mutex<HashMap<String, CancellationToken>>>;

/// Backend for any server speaking the OpenAI Chat Completions protocol
pub struct OpenAIBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    models: Vec<Model>,
    active: ActiveStreams,
}

impl OpenAIBackend {
    /// Create a new backend with an API key and base URL
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            models: Vec::new(),
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register known model capabilities
    pub fn with_models(mut self, models: Vec<Model>) -> Self {
        self.models = models;
        self
    }

    fn build_request(&self, request: &CompletionRequest, stream: bool) -> OpenAIRequest {
        OpenAIRequest {
            model: request.model_id.clone(),
            messages: request.entries.iter().map(convert_entry).collect(),
            stream,
            stream_options: stream.then_some(StreamOptions {
                include_usage: true,
            }),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            reasoning_effort: request.reasoning.then_some(REASONING_EFFORT),
        }
    }
}

#[async_trait]
impl LlmBackend for OpenAIBackend {
    async fn stream_completion(
        &self,
        request: CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<StreamEventStream> {
        if request.resume.is_some() {
            tracing::debug!(
                message_id = %request.message_id,
                "chat completions has no tool runtime, resuming as plain continuation"
            );
        }

        let body = self.build_request(&request, true);
        let url = format!("{}/chat/completions", self.base_url);
        let request_builder = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body);

        let event_source = EventSource::new(request_builder)
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;

        let token = cancel.child_token();
        self.active
            .lock()
            .insert(request.message_id.clone(), token.clone());
        let guard = ActiveGuard {
            active: Arc::clone(&self.active),
            message_id: request.message_id,
        };

        Ok(Box::pin(create_stream(event_source, token, guard)))
    }

    async fn stop_stream(&self, message_id: &str) {
        if let Some(token) = self.active.lock().get(message_id) {
            token.cancel();
        }
    }

    async fn quick_completion(&self, entries: Vec<ChatEntry>, model_id: &str) -> Result<String> {
        let request = CompletionRequest {
            message_id: String::new(),
            entries,
            model_id: model_id.to_string(),
            temperature: None,
            max_tokens: None,
            resume: None,
            reasoning: false,
        };
        let body = self.build_request(&request, false);
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16().to_string();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::api(status, text));
        }

        let completion: CompletionResponse = response.json().await?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::UnexpectedResponse("completion without content".to_string()))
    }

    fn model(&self, model_id: &str) -> Option<Model> {
        self.models.iter().find(|m| m.id == model_id).cloned()
    }
}

/// Removes the stop token for a message once its stream is dropped
struct ActiveGuard {
    active: ActiveStreams,
    message_id: String,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.lock().remove(&self.message_id);
    }
}

fn convert_entry(entry: &ChatEntry) -> OpenAIMessage {
    let content = match &entry.content {
        EntryContent::Text(text) => MessageContent::Text(text.clone()),
        EntryContent::Parts(parts) => MessageContent::Parts(
            parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => OpenAIPart::Text { text: text.clone() },
                    ContentPart::ImageUrl { url } => OpenAIPart::ImageUrl {
                        image_url: ImageUrl { url: url.clone() },
                    },
                })
                .collect(),
        ),
    };
    OpenAIMessage {
        role: entry.role.as_str().to_string(),
        content,
    }
}

/// Translate one streamed chunk into backend events
fn chunk_events(chunk: &StreamChunk) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    for choice in &chunk.choices {
        let reasoning = choice
            .delta
            .reasoning_content
            .as_ref()
            .or(choice.delta.reasoning.as_ref());
        if let Some(delta) = reasoning.filter(|d| !d.is_empty()) {
            events.push(StreamEvent::reasoning(delta.clone()));
        }
        if let Some(delta) = choice.delta.content.as_ref().filter(|d| !d.is_empty()) {
            events.push(StreamEvent::content(delta.clone()));
        }
    }
    if let Some(ref usage) = chunk.usage {
        events.push(StreamEvent::UsageTotals {
            usage: usage.into(),
        });
    }
    events
}

fn create_stream(
    mut event_source: EventSource,
    cancel: CancellationToken,
    guard: ActiveGuard,
) -> impl futures::Stream<Item = StreamEvent> {
    stream! {
        let _guard = guard;
        let mut usage: Option<Usage> = None;

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    event_source.close();
                    return;
                }
                event = event_source.next() => event,
            };

            match event {
                None => break,
                Some(Ok(Event::Open)) => {}
                Some(Ok(Event::Message(msg))) => {
                    if msg.data == "[DONE]" {
                        break;
                    }

                    match serde_json::from_str::<StreamChunk>(&msg.data) {
                        Ok(chunk) => {
                            if let Some(ref u) = chunk.usage {
                                usage = Some(u.into());
                            }
                            for event in chunk_events(&chunk) {
                                yield event;
                            }
                        }
                        Err(e) => {
                            event_source.close();
                            yield StreamEvent::Error {
                                message: format!("Failed to parse chunk: {}", e),
                            };
                            return;
                        }
                    }
                }
                Some(Err(reqwest_eventsource::Error::StreamEnded)) => break,
                Some(Err(e)) => {
                    event_source.close();
                    yield StreamEvent::Error {
                        message: format!("SSE error: {}", e),
                    };
                    return;
                }
            }
        }

        event_source.close();
        yield StreamEvent::Done { usage };
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    content: MessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<OpenAIPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OpenAIPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

// Streaming response types

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<StreamUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
    /// DeepSeek-style reasoning field
    reasoning_content: Option<String>,
    /// OpenRouter-style reasoning field
    reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    #[serde(default)]
    completion_tokens_details: Option<CompletionTokensDetails>,
}

#[derive(Debug, Deserialize)]
struct CompletionTokensDetails {
    #[serde(default)]
    reasoning_tokens: u32,
}

impl From<&StreamUsage> for Usage {
    fn from(u: &StreamUsage) -> Self {
        Usage {
            input: u.prompt_tokens,
            output: u.completion_tokens,
            cache_read: 0,
            thinking: u
                .completion_tokens_details
                .as_ref()
                .map(|d| d.reasoning_tokens)
                .unwrap_or(0),
        }
    }
}
