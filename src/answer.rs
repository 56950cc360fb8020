//! Answer assembly.
//!
//! Glues retrieval and generation into the single pipeline the CLI and HTTP
//! surfaces consume, and owns the error translation at that boundary: store
//! failures propagate untouched, while gateway failures are logged and
//! replaced with user-safe text.

use anyhow::{bail, Result};
use serde::Serialize;

use crate::error::GenerationError;
use crate::generate::{self, Completion, GenerateOptions};
use crate::models::{ChatMessage, Role, SearchHit};
use crate::provider::TokenStream;
use crate::retrieve;
use crate::AppContext;

/// One retrieved passage attributed in the answer.
#[derive(Debug, Clone, Serialize)]
pub struct Source {
    pub name: String,
    pub content: String,
}

/// Either the finished answer text or a lazy token stream.
pub enum AnswerBody {
    Text(String),
    Stream(TokenStream),
}

/// Pipeline output: answer plus the passages it was grounded on.
pub struct Answer {
    pub content: AnswerBody,
    pub sources: Vec<Source>,
}

const APOLOGY: &str =
    "Sorry, something went wrong while generating an answer. Please try again.";
const TIMEOUT_APOLOGY: &str =
    "The answer took too long to generate. Please try again, or shorten your question.";

/// Canned response for questions with no matching knowledge base entries.
pub fn no_knowledge_message(query: &str) -> String {
    format!("I have no knowledge base entries for query with text {query}")
}

fn last_user_message(messages: &[ChatMessage]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
}

/// Answer the conversation's last user question from freshly retrieved
/// context.
///
/// Zero retrieval hits short-circuit to a canned response without calling the
/// gateway. Gateway errors become an apology (timeouts get their own wording)
/// with the raw cause logged, never surfaced. Store failures bubble up as-is.
pub async fn answer(
    ctx: &AppContext,
    messages: &[ChatMessage],
    options: &GenerateOptions,
) -> Result<Answer> {
    let Some(question) = last_user_message(messages) else {
        bail!("no user message found");
    };

    let hits =
        retrieve::find_relevant(&ctx.pool, question, ctx.config.retrieval.max_hits).await?;

    if hits.is_empty() {
        return Ok(Answer {
            content: AnswerBody::Text(no_knowledge_message(question)),
            sources: Vec::new(),
        });
    }

    let sources = sources_from_hits(&hits);
    let prompt = generate::build_prompt(messages, &hits);

    match generate::generate(&ctx.providers, prompt, options).await {
        Ok(Completion::Full(text)) => Ok(Answer {
            content: AnswerBody::Text(text),
            sources,
        }),
        Ok(Completion::Streaming(stream)) => Ok(Answer {
            content: AnswerBody::Stream(stream),
            sources,
        }),
        Err(err) => {
            tracing::error!(error = %err, "generation failed; returning fallback answer");
            Ok(Answer {
                content: AnswerBody::Text(apology_for(&err).to_string()),
                sources,
            })
        }
    }
}

fn sources_from_hits(hits: &[SearchHit]) -> Vec<Source> {
    hits.iter()
        .map(|hit| Source {
            name: hit.title.clone(),
            content: hit.content.clone(),
        })
        .collect()
}

/// User-safe replacement text for a gateway failure. Timeouts get wording
/// that suggests retrying or shortening the question.
pub fn apology_for(err: &GenerationError) -> &'static str {
    if err.is_timeout() {
        TIMEOUT_APOLOGY
    } else {
        APOLOGY
    }
}
