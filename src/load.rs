//! Corpus ingestion and chunk materialization.
//!
//! `run_load` ingests crawler output — a JSON array of `{title, content,
//! url?}` records — into the document table. Chunks are not touched here:
//! `run_rechunk` is the separate, explicit pass that (re)materializes every
//! document's chunks with the current chunking parameters.

use anyhow::{Context, Result};
use sqlx::Row;
use std::path::Path;

use crate::chunk::chunk_text;
use crate::models::CorpusRecord;
use crate::store;
use crate::AppContext;

pub async fn run_load(ctx: &AppContext, path: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read corpus file: {}", path.display()))?;
    let records: Vec<CorpusRecord> =
        serde_json::from_str(&raw).with_context(|| "Failed to parse corpus file")?;

    println!("Found {} records in {}", records.len(), path.display());

    let mut loaded = 0u64;
    for record in &records {
        store::upsert_document(
            &ctx.pool,
            &record.title,
            &record.content,
            record.url.as_deref(),
        )
        .await?;
        loaded += 1;
    }

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(&ctx.pool)
        .await?;

    println!("load {}", path.display());
    println!("  records ingested: {loaded}");
    println!("  documents in corpus: {count}");

    let samples = sqlx::query("SELECT title FROM documents ORDER BY title LIMIT 5")
        .fetch_all(&ctx.pool)
        .await?;
    if !samples.is_empty() {
        println!("  sample titles:");
        for row in &samples {
            let title: String = row.get("title");
            println!("    - {title}");
        }
    }
    println!("ok");

    Ok(())
}

/// Rechunk every document with the configured word budget. Prior chunks are
/// replaced wholesale; run after `load` or after changing `[chunking]`.
pub async fn run_rechunk(ctx: &AppContext) -> Result<()> {
    let rows = sqlx::query("SELECT title, content FROM documents ORDER BY title")
        .fetch_all(&ctx.pool)
        .await?;

    let target_words = ctx.config.chunking.target_words;
    let mut documents = 0u64;
    let mut chunks_written = 0u64;

    for row in &rows {
        let title: String = row.get("title");
        let content: String = row.get("content");

        let chunks = chunk_text(&content, target_words);
        store::replace_chunks(&ctx.pool, &title, &chunks).await?;

        tracing::debug!(title = %title, chunks = chunks.len(), "rechunked document");
        documents += 1;
        chunks_written += chunks.len() as u64;
    }

    println!("rechunk");
    println!("  documents processed: {documents}");
    println!("  chunks written: {chunks_written}");
    println!("ok");

    Ok(())
}
