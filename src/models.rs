//! Core data models used throughout kbase.
//!
//! These types represent the documents, chunks, and search hits that flow
//! through the ingestion and retrieval pipeline, plus the chat message shape
//! shared with the HTTP API and the generation gateway.

use serde::{Deserialize, Serialize};

/// Normalized document stored in SQLite.
///
/// Titles are unique within the corpus; re-ingesting a title replaces the
/// document wholesale.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub content: String,
    pub source_url: Option<String>,
    pub content_hash: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A sentence-aligned fragment of a document's content.
///
/// Chunks are derived data: regenerated whole whenever a document is
/// re-chunked, never edited in place. Concatenating a document's chunks in
/// index order reconstructs the whitespace-normalized content.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
}

/// Transient result of a retrieval query. Lives only for the duration of one
/// question; never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub title: String,
    pub content: String,
    pub score: f64,
}

/// Message role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single role-tagged message. An ordered sequence of these forms a prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One corpus record as produced by the crawler/loader side.
#[derive(Debug, Clone, Deserialize)]
pub struct CorpusRecord {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub url: Option<String>,
}
