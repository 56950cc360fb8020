//! # kbase
//!
//! A retrieval-augmented question answering service for documentation corpora.
//!
//! kbase ingests a documentation corpus (title + content records), splits each
//! document into sentence-aligned chunks, indexes the chunks in SQLite with an
//! FTS5 lexical index, and answers natural-language questions by retrieving
//! relevant passages and feeding them as context to an LLM provider — with the
//! answer optionally streamed back token by token.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌───────────┐
//! │  Loader  │──▶│   Chunker    │──▶│  SQLite    │
//! │  (JSON)  │   │ (sentences) │   │ FTS5+title │
//! └──────────┘   └─────────────┘   └────┬──────┘
//!                                       │
//!      question ──▶ Retriever ──────────┘
//!                       │ hits
//!                       ▼
//!                  Generation Gateway ──▶ OpenAI / Anthropic
//!                       │
//!                       ▼
//!                  Answer + sources (CLI or HTTP)
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kb init                        # create database
//! kb load corpus.json            # ingest {title, content, url?} records
//! kb rechunk                     # materialize chunks for all documents
//! kb search "moving average"     # lexical retrieval only
//! kb ask "What is a crossover?"  # retrieve + generate
//! kb serve                       # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`chunk`] | Sentence-aligned text chunking |
//! | [`store`] | Document and chunk persistence + lexical search |
//! | [`retrieve`] | Two-stage relevance retrieval |
//! | [`provider`] | LLM provider abstraction (complete + stream) |
//! | [`generate`] | Prompt construction, retry, provider dispatch |
//! | [`answer`] | Answer assembly and error translation |
//! | [`load`] | Corpus ingestion and chunk materialization |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod answer;
pub mod chunk;
pub mod config;
pub mod db;
pub mod error;
pub mod generate;
pub mod load;
pub mod migrate;
pub mod models;
pub mod provider;
pub mod retrieve;
pub mod server;
pub mod store;

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::provider::ProviderRegistry;

/// Process-wide application context.
///
/// Holds the configuration, database pool, and provider registry. Constructed
/// once at startup and passed explicitly to every component; there is no
/// global client state.
pub struct AppContext {
    pub config: Config,
    pub pool: SqlitePool,
    pub providers: ProviderRegistry,
}

impl AppContext {
    /// Connect the database and build the provider registry from the
    /// environment. Provider credentials are read once here; a missing key
    /// only becomes an error when a model routed to that provider is used.
    pub async fn init(config: Config) -> Result<Self> {
        let pool = db::connect(&config).await?;
        let providers = ProviderRegistry::from_env();
        Ok(Self {
            config,
            pool,
            providers,
        })
    }

    /// Release the database pool. Call at process shutdown.
    pub async fn close(self) {
        self.pool.close().await;
    }
}
