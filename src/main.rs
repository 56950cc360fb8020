//! # kbase CLI (`kb`)
//!
//! The `kb` binary is the primary interface for kbase. It provides commands
//! for database initialization, corpus ingestion, chunk materialization,
//! retrieval, question answering, and starting the HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! kb --config ./config/kb.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kb init` | Create the SQLite database and run schema migrations |
//! | `kb load <file>` | Ingest a JSON corpus of `{title, content, url?}` records |
//! | `kb rechunk` | (Re)materialize chunks for every document |
//! | `kb search "<query>"` | Run retrieval only and show the hits |
//! | `kb ask "<question>"` | Retrieve context and generate an answer |
//! | `kb serve` | Start the HTTP API |

use anyhow::Result;
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use std::io::Write;
use std::path::PathBuf;

use kbase::answer::{self, AnswerBody};
use kbase::generate::GenerateOptions;
use kbase::models::ChatMessage;
use kbase::{config, load, migrate, retrieve, server, AppContext};

/// kbase — a retrieval-augmented question answering service for
/// documentation corpora.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/kb.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "kb",
    about = "kbase — retrieval-augmented question answering for documentation corpora",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kb.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables (documents,
    /// chunks, chunks_fts). Idempotent — running it multiple times is safe.
    Init,

    /// Ingest a JSON corpus file.
    ///
    /// The file is a JSON array of `{title, content, url?}` records.
    /// Re-ingesting a title replaces the document; unchanged content is a
    /// no-op. Chunks are not generated here — run `kb rechunk` afterwards.
    Load {
        /// Path to the corpus JSON file.
        file: PathBuf,
    },

    /// (Re)materialize chunks for every document.
    ///
    /// Splits each document into sentence-aligned chunks with the configured
    /// word budget and replaces any prior chunks. Run after `load` or after
    /// changing `[chunking]` settings.
    Rechunk,

    /// Run retrieval for a query and print the hits.
    Search {
        /// The search query string.
        query: String,
    },

    /// Ask a question and print the generated answer with its sources.
    Ask {
        /// The question to answer.
        question: String,

        /// Model to use (overrides `[generation].model`).
        #[arg(long)]
        model: Option<String>,

        /// Stream the answer token by token instead of waiting for the
        /// complete text.
        #[arg(long)]
        stream: bool,
    },

    /// Start the HTTP API server.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Load { file } => {
            let ctx = AppContext::init(cfg).await?;
            load::run_load(&ctx, &file).await?;
            ctx.close().await;
        }
        Commands::Rechunk => {
            let ctx = AppContext::init(cfg).await?;
            load::run_rechunk(&ctx).await?;
            ctx.close().await;
        }
        Commands::Search { query } => {
            let ctx = AppContext::init(cfg).await?;
            run_search(&ctx, &query).await?;
            ctx.close().await;
        }
        Commands::Ask {
            question,
            model,
            stream,
        } => {
            let ctx = AppContext::init(cfg).await?;
            run_ask(&ctx, &question, model, stream).await?;
            ctx.close().await;
        }
        Commands::Serve => {
            let ctx = AppContext::init(cfg).await?;
            server::run_server(ctx).await?;
        }
    }

    Ok(())
}

async fn run_search(ctx: &AppContext, query: &str) -> Result<()> {
    let hits = retrieve::find_relevant(&ctx.pool, query, ctx.config.retrieval.max_hits).await?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        let excerpt: String = hit.content.chars().take(160).collect();
        println!("{}. [{:.0}] {}", i + 1, hit.score, hit.title);
        println!("    excerpt: \"{}\"", excerpt.replace('\n', " "));
        println!();
    }

    Ok(())
}

async fn run_ask(
    ctx: &AppContext,
    question: &str,
    model: Option<String>,
    stream: bool,
) -> Result<()> {
    let mut options = GenerateOptions::from_config(&ctx.config.generation);
    if let Some(model) = model {
        options.model = model;
    }
    options.stream = stream;

    let messages = vec![ChatMessage::user(question)];
    let answer = answer::answer(ctx, &messages, &options).await?;

    match answer.content {
        AnswerBody::Text(text) => println!("{text}"),
        AnswerBody::Stream(mut tokens) => {
            let mut stdout = std::io::stdout();
            while let Some(item) = tokens.next().await {
                match item {
                    Ok(token) => {
                        print!("{token}");
                        stdout.flush()?;
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "stream interrupted");
                        println!();
                        println!("{}", answer::apology_for(&err));
                        break;
                    }
                }
            }
            println!();
        }
    }

    if !answer.sources.is_empty() {
        println!();
        println!("Sources:");
        for source in &answer.sources {
            println!("  - {}", source.name);
        }
    }

    Ok(())
}
