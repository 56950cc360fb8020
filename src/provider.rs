//! LLM provider abstraction and implementations.
//!
//! Defines the [`CompletionProvider`] trait and two concrete adapters:
//! - **[`OpenAiProvider`]** — chat-completions API; role-tagged messages are
//!   passed through uniformly.
//! - **[`AnthropicProvider`]** — messages API; the system instruction travels
//!   in its own field and user/assistant turns are interleaved by position.
//!
//! Providers expose both a full completion call and a token stream. A stream
//! holds the underlying HTTP connection only as long as it is alive: dropping
//! it cancels the transfer, so callers can stop consumption at any point
//! without leaking the connection.
//!
//! Model names are routed to providers through the [`ProviderRegistry`]. A
//! model whose provider has no credentials fails at resolve time with a
//! configuration error, before any network attempt.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde_json::{json, Value};

use crate::error::GenerationError;
use crate::models::{ChatMessage, Role};

/// Lazy, finite, non-restartable sequence of answer-text increments.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, GenerationError>> + Send>>;

/// One provider call, fully specified by the caller.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

/// Capability set every LLM vendor adapter implements.
#[async_trait]
pub trait CompletionProvider: Send + Sync + std::fmt::Debug {
    /// Short vendor identifier (e.g. `"openai"`).
    fn name(&self) -> &'static str;

    /// Whether credentials for this provider are present.
    fn is_configured(&self) -> bool {
        true
    }

    /// Perform the call and return the completed answer text.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, GenerationError>;

    /// Perform the call in streaming mode and return the token stream.
    async fn stream(&self, request: &CompletionRequest) -> Result<TokenStream, GenerationError>;
}

// ============ SSE plumbing ============

enum SseEvent {
    Token(String),
    Done,
    Ignore,
}

/// Turn a streaming response body into a token stream using a
/// provider-specific line parser. The response (and with it the connection)
/// is owned by the stream and released when the stream is dropped.
fn sse_token_stream<F>(response: reqwest::Response, parse_line: F) -> TokenStream
where
    F: Fn(&str) -> Result<SseEvent, GenerationError> + Send + 'static,
{
    let stream = async_stream::try_stream! {
        let mut body = response.bytes_stream();
        let mut buffer = String::new();
        let mut done = false;

        while !done {
            let Some(chunk) = body.next().await else { break };
            let chunk = chunk.map_err(|e| GenerationError::Transport(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = buffer.find('\n') {
                let line: String = buffer.drain(..=pos).collect();
                match parse_line(line.trim())? {
                    SseEvent::Token(text) => {
                        if !text.is_empty() {
                            yield text;
                        }
                    }
                    SseEvent::Done => {
                        done = true;
                        break;
                    }
                    SseEvent::Ignore => {}
                }
            }
        }
    };
    Box::pin(stream)
}

// ============ OpenAI ============

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Adapter for the OpenAI chat-completions API.
#[derive(Debug)]
pub struct OpenAiProvider {
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn from_env() -> Self {
        Self::new(std::env::var("OPENAI_API_KEY").ok())
    }

    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key,
            base_url: OPENAI_API_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Point the adapter at a different endpoint (proxies, test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn request_body(&self, request: &CompletionRequest, stream: bool) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|m| json!({ "role": m.role, "content": m.content }))
            .collect();
        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "temperature": request.temperature,
            "stream": stream,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response, GenerationError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            GenerationError::Configuration("OPENAI_API_KEY not set".to_string())
        })?;

        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GenerationError::Transport(format!(
                "openai returned {status}: {text}"
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, GenerationError> {
        let response = self.send(&self.request_body(request, false)).await?;
        let value: Value = response
            .json()
            .await
            .map_err(|e| GenerationError::MalformedResponse(e.to_string()))?;

        value["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                GenerationError::MalformedResponse("missing choices[0].message.content".to_string())
            })
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<TokenStream, GenerationError> {
        let response = self.send(&self.request_body(request, true)).await?;
        Ok(sse_token_stream(response, parse_openai_sse))
    }
}

fn parse_openai_sse(line: &str) -> Result<SseEvent, GenerationError> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseEvent::Ignore);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseEvent::Done);
    }
    let value: Value = serde_json::from_str(data)
        .map_err(|e| GenerationError::MalformedResponse(format!("bad stream event: {e}")))?;
    Ok(match value["choices"][0]["delta"]["content"].as_str() {
        Some(text) => SseEvent::Token(text.to_string()),
        None => SseEvent::Ignore,
    })
}

// ============ Anthropic ============

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
/// The messages API requires max_tokens; used when the caller sets none.
const ANTHROPIC_DEFAULT_MAX_TOKENS: u32 = 1024;

/// Adapter for the Anthropic messages API.
#[derive(Debug)]
pub struct AnthropicProvider {
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn from_env() -> Self {
        Self::new(std::env::var("ANTHROPIC_API_KEY").ok())
    }

    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key,
            base_url: ANTHROPIC_API_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn request_body(&self, request: &CompletionRequest, stream: bool) -> Value {
        let (system, conversation) = reshape_messages(&request.messages);
        let mut body = json!({
            "model": request.model,
            "messages": conversation,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens.unwrap_or(ANTHROPIC_DEFAULT_MAX_TOKENS),
            "stream": stream,
        });
        if let Some(system) = system {
            body["system"] = json!(system);
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response, GenerationError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            GenerationError::Configuration("ANTHROPIC_API_KEY not set".to_string())
        })?;

        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GenerationError::Transport(format!(
                "anthropic returned {status}: {text}"
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl CompletionProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, GenerationError> {
        let response = self.send(&self.request_body(request, false)).await?;
        let value: Value = response
            .json()
            .await
            .map_err(|e| GenerationError::MalformedResponse(e.to_string()))?;

        value["content"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                GenerationError::MalformedResponse("missing content[0].text".to_string())
            })
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<TokenStream, GenerationError> {
        let response = self.send(&self.request_body(request, true)).await?;
        Ok(sse_token_stream(response, parse_anthropic_sse))
    }
}

/// Split role-tagged messages into the Anthropic shape: the system
/// instruction (if any) is extracted, and user/assistant turns are
/// interleaved by position. No message is dropped.
fn reshape_messages(messages: &[ChatMessage]) -> (Option<String>, Vec<Value>) {
    let system = messages
        .iter()
        .find(|m| m.role == Role::System)
        .map(|m| m.content.clone());

    let users: Vec<&ChatMessage> = messages.iter().filter(|m| m.role == Role::User).collect();
    let assistants: Vec<&ChatMessage> = messages
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .collect();

    let mut conversation = Vec::new();
    for i in 0..users.len().max(assistants.len()) {
        if let Some(user) = users.get(i) {
            conversation.push(json!({ "role": "user", "content": user.content }));
        }
        if let Some(assistant) = assistants.get(i) {
            conversation.push(json!({ "role": "assistant", "content": assistant.content }));
        }
    }

    (system, conversation)
}

fn parse_anthropic_sse(line: &str) -> Result<SseEvent, GenerationError> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseEvent::Ignore);
    };
    let value: Value = serde_json::from_str(data.trim())
        .map_err(|e| GenerationError::MalformedResponse(format!("bad stream event: {e}")))?;
    Ok(match value["type"].as_str() {
        Some("content_block_delta") => match value["delta"]["text"].as_str() {
            Some(text) => SseEvent::Token(text.to_string()),
            None => SseEvent::Ignore,
        },
        Some("message_stop") => SseEvent::Done,
        _ => SseEvent::Ignore,
    })
}

// ============ Registry ============

/// Explicit model-to-provider routing table.
pub struct ProviderRegistry {
    routes: Vec<(String, Arc<dyn CompletionProvider>)>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Register a provider for models starting with `prefix`. Routes are
    /// consulted in registration order; an empty prefix is a catch-all.
    pub fn register(&mut self, prefix: impl Into<String>, provider: Arc<dyn CompletionProvider>) {
        self.routes.push((prefix.into(), provider));
    }

    /// Build the standard registry: Anthropic for `claude*` models, OpenAI
    /// for everything else. Credentials are read from the environment once;
    /// a missing key only surfaces when a model routed to that provider is
    /// resolved.
    pub fn from_env() -> Self {
        let mut registry = Self::new();
        registry.register("claude", Arc::new(AnthropicProvider::from_env()));
        registry.register("", Arc::new(OpenAiProvider::from_env()));
        registry
    }

    /// Select the provider for a model name. A model with no matching route,
    /// or whose provider lacks credentials, fails with a configuration error
    /// — fatal, never retried.
    pub fn resolve(&self, model: &str) -> Result<Arc<dyn CompletionProvider>, GenerationError> {
        let (_, provider) = self
            .routes
            .iter()
            .find(|(prefix, _)| model.starts_with(prefix.as_str()))
            .ok_or_else(|| {
                GenerationError::Configuration(format!("no provider registered for model {model}"))
            })?;

        if !provider.is_configured() {
            return Err(GenerationError::Configuration(format!(
                "{} API key not configured",
                provider.name()
            )));
        }
        Ok(provider.clone())
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
