//! Prompt construction, retry, and provider dispatch.
//!
//! The gateway owns everything between "ordered messages plus retrieved
//! context" and "answer text or token stream": it prepends the system
//! instruction, injects the context block into the first user message,
//! resolves the provider from the model name, and runs the call under an
//! explicit retry policy with a per-attempt deadline.

use std::future::Future;
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::error::GenerationError;
use crate::models::{ChatMessage, Role, SearchHit};
use crate::provider::{CompletionRequest, ProviderRegistry, TokenStream};

/// Fixed assistant persona and formatting rules, prepended when the caller
/// supplies no system message.
pub const SYSTEM_PROMPT: &str = "You are a documentation assistant for the thinkscript charting \
language. Answer questions using only the provided context passages. Quote parameter names and \
function signatures exactly as they appear, put code in fenced code blocks, and keep answers \
concise. If the context does not cover the question, say so instead of guessing.";

/// Caller-facing knobs for one generation call. Defaults come from
/// `[generation]` config; every field is overridable per call.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub stream: bool,
    /// Per-attempt deadline.
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl GenerateOptions {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            stream: false,
            timeout: Duration::from_secs(config.timeout_secs),
            retry: RetryPolicy {
                max_attempts: config.max_attempts,
                backoff: Duration::from_secs(config.backoff_secs),
            },
        }
    }
}

/// Bounded retry with a fixed pause between attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first call.
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

/// Run `op` under `policy`. Non-retryable errors abort immediately; once the
/// attempt budget is exhausted the last error is returned to the caller.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, GenerationError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GenerationError>>,
{
    let mut last_err = None;

    for attempt in 1..=policy.max_attempts {
        if attempt > 1 {
            tokio::time::sleep(policy.backoff).await;
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() => {
                tracing::warn!(attempt, error = %err, "generation attempt failed");
                last_err = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_err
        .unwrap_or_else(|| GenerationError::Transport("no generation attempts made".to_string())))
}

/// Assemble the prompt: ensure a system instruction is present, then inject
/// the retrieved passages as a labeled context block ahead of the question in
/// the first user message. Later messages pass through untouched.
pub fn build_prompt(messages: &[ChatMessage], hits: &[SearchHit]) -> Vec<ChatMessage> {
    let mut prompt = Vec::with_capacity(messages.len() + 1);

    if !messages.iter().any(|m| m.role == Role::System) {
        prompt.push(ChatMessage::system(SYSTEM_PROMPT));
    }

    let context = hits
        .iter()
        .map(|hit| format!("Title: {}\n{}", hit.title, hit.content))
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut injected = false;
    for message in messages {
        if message.role == Role::User && !injected && !context.is_empty() {
            prompt.push(ChatMessage::user(format!(
                "Context:\n\n{context}\n\nQuestion: {}",
                message.content
            )));
            injected = true;
        } else {
            prompt.push(message.clone());
        }
    }

    prompt
}

/// Result of a generation call: the full answer text, or a lazy stream of
/// text increments.
pub enum Completion {
    Full(String),
    Streaming(TokenStream),
}

/// Resolve the provider for `options.model` and perform the call under the
/// retry policy. A per-attempt timeout bounds each completion call and, in
/// streaming mode, the stream establishment; exhausting the budget re-raises
/// the last error.
pub async fn generate(
    registry: &ProviderRegistry,
    messages: Vec<ChatMessage>,
    options: &GenerateOptions,
) -> Result<Completion, GenerationError> {
    let provider = registry.resolve(&options.model)?;

    let request = CompletionRequest {
        model: options.model.clone(),
        messages,
        temperature: options.temperature,
        max_tokens: options.max_tokens,
    };

    if options.stream {
        let stream = with_retry(&options.retry, || {
            let provider = provider.clone();
            let request = request.clone();
            async move {
                tokio::time::timeout(options.timeout, provider.stream(&request))
                    .await
                    .map_err(|_| GenerationError::Timeout(options.timeout))?
            }
        })
        .await?;
        Ok(Completion::Streaming(stream))
    } else {
        let text = with_retry(&options.retry, || {
            let provider = provider.clone();
            let request = request.clone();
            async move {
                tokio::time::timeout(options.timeout, provider.complete(&request))
                    .await
                    .map_err(|_| GenerationError::Timeout(options.timeout))?
            }
        })
        .await?;
        Ok(Completion::Full(text))
    }
}
