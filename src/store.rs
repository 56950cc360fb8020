//! Document and chunk persistence over SQLite.
//!
//! The corpus is a set of title-unique documents, each owning an ordered run
//! of chunks mirrored into an FTS5 index. Two query shapes are served: exact
//! title lookup (unique index on `documents.title`) and lexical search over
//! chunk text (FTS5 token containment), grouped by parent document.

use anyhow::{bail, Result};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{Chunk, Document};

/// All matching chunks of one document, in chunk-index order.
#[derive(Debug, Clone)]
pub struct DocMatches {
    pub title: String,
    pub chunks: Vec<String>,
}

/// Insert or replace the document with this title. Returns the document id.
///
/// Re-ingesting identical content is a no-op (detected via a SHA-256 content
/// hash). When the content does change, the document's chunks are dropped in
/// the same transaction — they derive from the old content and must be
/// rematerialized explicitly.
pub async fn upsert_document(
    pool: &SqlitePool,
    title: &str,
    content: &str,
    source_url: Option<&str>,
) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let content_hash = format!("{:x}", hasher.finalize());

    let existing = sqlx::query("SELECT id, content_hash FROM documents WHERE title = ?")
        .bind(title)
        .fetch_optional(pool)
        .await?;

    let now = chrono::Utc::now().timestamp();

    if let Some(row) = existing {
        let doc_id: String = row.get("id");
        let old_hash: String = row.get("content_hash");
        if old_hash == content_hash {
            return Ok(doc_id);
        }

        let mut tx = pool.begin().await?;
        sqlx::query(
            "UPDATE documents SET content = ?, source_url = ?, content_hash = ?, updated_at = ? WHERE id = ?",
        )
        .bind(content)
        .bind(source_url)
        .bind(&content_hash)
        .bind(now)
        .bind(&doc_id)
        .execute(&mut *tx)
        .await?;
        delete_chunks_tx(&mut tx, &doc_id).await?;
        tx.commit().await?;
        return Ok(doc_id);
    }

    let doc_id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO documents (id, title, content, source_url, content_hash, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&doc_id)
    .bind(title)
    .bind(content)
    .bind(source_url)
    .bind(&content_hash)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(doc_id)
}

/// Replace all chunks of the document with this title.
///
/// Old chunks and their FTS rows are deleted and the new run inserted with
/// indices `0..n-1` inside one transaction, so orphan chunks cannot exist.
pub async fn replace_chunks(pool: &SqlitePool, title: &str, chunks: &[String]) -> Result<()> {
    let doc_id: Option<String> = sqlx::query_scalar("SELECT id FROM documents WHERE title = ?")
        .bind(title)
        .fetch_optional(pool)
        .await?;

    let Some(doc_id) = doc_id else {
        bail!("document not found: {}", title);
    };

    let mut tx = pool.begin().await?;
    delete_chunks_tx(&mut tx, &doc_id).await?;

    for (index, text) in chunks.iter().enumerate() {
        let chunk_id = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO chunks (id, document_id, chunk_index, text) VALUES (?, ?, ?, ?)")
            .bind(&chunk_id)
            .bind(&doc_id)
            .bind(index as i64)
            .bind(text)
            .execute(&mut *tx)
            .await?;

        sqlx::query("INSERT INTO chunks_fts (chunk_id, document_id, text) VALUES (?, ?, ?)")
            .bind(&chunk_id)
            .bind(&doc_id)
            .bind(text)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

async fn delete_chunks_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    doc_id: &str,
) -> Result<()> {
    sqlx::query("DELETE FROM chunks_fts WHERE document_id = ?")
        .bind(doc_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(doc_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Fetch a document's chunks in index order.
pub async fn chunks_for_document(pool: &SqlitePool, title: &str) -> Result<Vec<Chunk>> {
    let rows = sqlx::query(
        r#"
        SELECT c.id AS id, c.document_id AS document_id, c.chunk_index AS chunk_index, c.text AS text
        FROM chunks c
        JOIN documents d ON d.id = c.document_id
        WHERE d.title = ?
        ORDER BY c.chunk_index ASC
        "#,
    )
    .bind(title)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| Chunk {
            id: row.get("id"),
            document_id: row.get("document_id"),
            chunk_index: row.get("chunk_index"),
            text: row.get("text"),
        })
        .collect())
}

/// Case-sensitive exact title lookup.
pub async fn exact_title_lookup(pool: &SqlitePool, query: &str) -> Result<Option<Document>> {
    let row = sqlx::query(
        "SELECT id, title, content, source_url, content_hash, created_at, updated_at FROM documents WHERE title = ?",
    )
    .bind(query)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| Document {
        id: row.get("id"),
        title: row.get("title"),
        content: row.get("content"),
        source_url: row.get("source_url"),
        content_hash: row.get("content_hash"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }))
}

/// Find documents whose chunks contain any of the given terms, grouped by
/// parent document with each group's matching chunks in chunk-index order.
///
/// Groups are ranked by matching-chunk count descending, ties broken by title
/// ascending, so results are deterministic regardless of store internals.
///
/// The term set is passed as one bound FTS5 MATCH parameter; terms are quoted
/// so user text can never alter the query shape.
pub async fn lexical_search(pool: &SqlitePool, terms: &[String]) -> Result<Vec<DocMatches>> {
    if terms.is_empty() {
        return Ok(Vec::new());
    }

    let match_expr = terms
        .iter()
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" OR ");

    let rows = sqlx::query(
        r#"
        SELECT d.title AS title, c.chunk_index AS chunk_index, c.text AS text
        FROM chunks_fts
        JOIN chunks c ON c.id = chunks_fts.chunk_id
        JOIN documents d ON d.id = c.document_id
        WHERE chunks_fts MATCH ?
        ORDER BY d.title ASC, c.chunk_index ASC
        "#,
    )
    .bind(&match_expr)
    .fetch_all(pool)
    .await?;

    let mut groups: Vec<DocMatches> = Vec::new();
    for row in rows {
        let title: String = row.get("title");
        let text: String = row.get("text");
        if let Some(group) = groups.last_mut() {
            if group.title == title {
                group.chunks.push(text);
                continue;
            }
        }
        groups.push(DocMatches {
            title,
            chunks: vec![text],
        });
    }

    groups.sort_by(|a, b| {
        b.chunks
            .len()
            .cmp(&a.chunks.len())
            .then_with(|| a.title.cmp(&b.title))
    });

    Ok(groups)
}
