//! End-to-end pipeline tests against a temporary SQLite database: ingestion,
//! chunk materialization, retrieval, and answer assembly with mock providers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tempfile::TempDir;

use kbase::answer::{self, AnswerBody};
use kbase::chunk::chunk_text;
use kbase::config::{Config, DbConfig, ServerConfig};
use kbase::error::GenerationError;
use kbase::generate::{GenerateOptions, RetryPolicy};
use kbase::models::ChatMessage;
use kbase::provider::{
    CompletionProvider, CompletionRequest, ProviderRegistry, TokenStream,
};
use kbase::{migrate, retrieve, store, AppContext};

fn test_config(tmp: &TempDir) -> Config {
    Config {
        db: DbConfig {
            path: tmp.path().join("kb.sqlite"),
        },
        chunking: Default::default(),
        retrieval: Default::default(),
        generation: Default::default(),
        server: ServerConfig {
            bind: "127.0.0.1:0".to_string(),
        },
    }
}

async fn setup() -> (TempDir, AppContext) {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    migrate::run_migrations(&config).await.unwrap();
    let ctx = AppContext::init(config).await.unwrap();
    (tmp, ctx)
}

async fn ingest(ctx: &AppContext, title: &str, content: &str) {
    store::upsert_document(&ctx.pool, title, content, None)
        .await
        .unwrap();
    let chunks = chunk_text(content, ctx.config.chunking.target_words);
    store::replace_chunks(&ctx.pool, title, &chunks)
        .await
        .unwrap();
}

async fn seed_corpus(ctx: &AppContext) {
    ingest(
        ctx,
        "Moving Average",
        "A moving average smooths price data. The simple moving average sums the close over length bars. Crossovers of two averages are a common signal.",
    )
    .await;
    ingest(
        ctx,
        "Crosses",
        "The crosses function detects when one plot crosses another. It fires a signal on the crossing bar.",
    )
    .await;
    ingest(
        ctx,
        "Volume",
        "Volume counts shares traded per bar. High volume confirms a move.",
    )
    .await;
}

// ============ Store ============

#[tokio::test]
async fn upsert_replaces_by_title_and_cascades_chunks() {
    let (_tmp, ctx) = setup().await;
    ingest(&ctx, "Doc", "Old content lives here. It has two sentences.").await;

    let before: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(&ctx.pool)
        .await
        .unwrap();
    assert!(before > 0);

    // New content for the same title replaces the document and drops the
    // now-stale chunks until the next rechunk.
    store::upsert_document(&ctx.pool, "Doc", "Entirely new content.", None)
        .await
        .unwrap();

    let docs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(&ctx.pool)
        .await
        .unwrap();
    assert_eq!(docs, 1);

    let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(&ctx.pool)
        .await
        .unwrap();
    assert_eq!(chunks, 0);

    let doc = store::exact_title_lookup(&ctx.pool, "Doc")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(doc.content, "Entirely new content.");

    ctx.close().await;
}

#[tokio::test]
async fn reingesting_identical_content_keeps_chunks() {
    let (_tmp, ctx) = setup().await;
    let content = "Stable content. Nothing changes here.";
    ingest(&ctx, "Doc", content).await;

    store::upsert_document(&ctx.pool, "Doc", content, None)
        .await
        .unwrap();

    let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(&ctx.pool)
        .await
        .unwrap();
    assert!(chunks > 0, "no-op upsert must not drop chunks");

    ctx.close().await;
}

#[tokio::test]
async fn chunks_reconstruct_document_content() {
    let (_tmp, mut ctx) = setup().await;
    // Small budget so the document spans several chunks.
    ctx.config.chunking.target_words = 6;
    let content = "First sentence here. Second sentence follows! Third one asks a question? Fourth closes it out.";
    ingest(&ctx, "Doc", content).await;

    let chunks = store::chunks_for_document(&ctx.pool, "Doc").await.unwrap();

    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.chunk_index, i as i64);
    }

    let joined = chunks
        .iter()
        .map(|chunk| chunk.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let normalize = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
    assert_eq!(normalize(&joined), normalize(content));

    ctx.close().await;
}

// ============ Retriever ============

#[tokio::test]
async fn exact_title_match_short_circuits() {
    let (_tmp, ctx) = setup().await;
    seed_corpus(&ctx).await;

    let hits = retrieve::find_relevant(&ctx.pool, "Moving Average", 5)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].title, "Moving Average");
    assert!(hits[0].content.contains("smooths price data"));

    ctx.close().await;
}

#[tokio::test]
async fn term_expansion_finds_related_documents() {
    let (_tmp, ctx) = setup().await;
    seed_corpus(&ctx).await;

    let hits = retrieve::find_relevant(&ctx.pool, "What is a crossover signal?", 5)
        .await
        .unwrap();
    assert!(!hits.is_empty());
    assert!(hits.len() <= 5);

    let titles: Vec<&str> = hits.iter().map(|h| h.title.as_str()).collect();
    assert!(titles.contains(&"Crosses"), "hits were {titles:?}");
    assert!(titles.contains(&"Moving Average"), "hits were {titles:?}");
    assert!(!titles.contains(&"Volume"), "hits were {titles:?}");

    ctx.close().await;
}

#[tokio::test]
async fn empty_query_returns_no_hits() {
    let (_tmp, ctx) = setup().await;
    seed_corpus(&ctx).await;

    let hits = retrieve::find_relevant(&ctx.pool, "", 5).await.unwrap();
    assert!(hits.is_empty());

    ctx.close().await;
}

#[tokio::test]
async fn hit_cap_is_enforced() {
    let (_tmp, ctx) = setup().await;
    for i in 0..8 {
        ingest(
            &ctx,
            &format!("Signal Doc {i}"),
            "Every one of these documents mentions a signal somewhere.",
        )
        .await;
    }

    let hits = retrieve::find_relevant(&ctx.pool, "signal", 5).await.unwrap();
    assert_eq!(hits.len(), 5);

    ctx.close().await;
}

// ============ Mock providers ============

#[derive(Debug)]
struct CannedProvider {
    reply: String,
}

#[async_trait]
impl CompletionProvider for CannedProvider {
    fn name(&self) -> &'static str {
        "canned"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<String, GenerationError> {
        Ok(self.reply.clone())
    }

    async fn stream(&self, _request: &CompletionRequest) -> Result<TokenStream, GenerationError> {
        let tokens: Vec<String> = self
            .reply
            .split_whitespace()
            .map(|w| format!("{w} "))
            .collect();
        let stream = futures_util::stream::iter(tokens.into_iter().map(Ok));
        Ok(Box::pin(stream))
    }
}

/// Provider that must never be reached; panics on any call.
#[derive(Debug)]
struct UnreachableProvider;

#[async_trait]
impl CompletionProvider for UnreachableProvider {
    fn name(&self) -> &'static str {
        "unreachable"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<String, GenerationError> {
        panic!("gateway must not be called");
    }

    async fn stream(&self, _request: &CompletionRequest) -> Result<TokenStream, GenerationError> {
        panic!("gateway must not be called");
    }
}

#[derive(Debug)]
struct FailingProvider;

#[async_trait]
impl CompletionProvider for FailingProvider {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<String, GenerationError> {
        Err(GenerationError::Transport("connection refused".to_string()))
    }

    async fn stream(&self, _request: &CompletionRequest) -> Result<TokenStream, GenerationError> {
        Err(GenerationError::Transport("connection refused".to_string()))
    }
}

/// Streams tokens forever and counts connection releases via a drop guard.
#[derive(Debug)]
struct EndlessStreamProvider {
    closed: Arc<AtomicUsize>,
}

struct CloseGuard(Arc<AtomicUsize>);

impl Drop for CloseGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CompletionProvider for EndlessStreamProvider {
    fn name(&self) -> &'static str {
        "endless"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<String, GenerationError> {
        Err(GenerationError::Transport("streaming only".to_string()))
    }

    async fn stream(&self, _request: &CompletionRequest) -> Result<TokenStream, GenerationError> {
        let guard = CloseGuard(self.closed.clone());
        let stream = async_stream::stream! {
            let _guard = guard;
            let mut i = 0u64;
            loop {
                yield Ok(format!("tok{i} "));
                i += 1;
                tokio::task::yield_now().await;
            }
        };
        Ok(Box::pin(stream))
    }
}

fn options_with(registry: &mut ProviderRegistry, provider: Arc<dyn CompletionProvider>) -> GenerateOptions {
    registry.register("", provider);
    GenerateOptions {
        model: "test-model".to_string(),
        temperature: 0.7,
        max_tokens: None,
        stream: false,
        timeout: Duration::from_secs(5),
        retry: RetryPolicy {
            max_attempts: 3,
            backoff: Duration::ZERO,
        },
    }
}

// ============ Answer assembly ============

#[tokio::test]
async fn zero_hits_skips_gateway_and_returns_canned_text() {
    let (_tmp, mut ctx) = setup().await;
    seed_corpus(&ctx).await;

    let mut registry = ProviderRegistry::new();
    let options = options_with(&mut registry, Arc::new(UnreachableProvider));
    ctx.providers = registry;

    let messages = vec![ChatMessage::user("qqqqzzzz")];
    let answer = answer::answer(&ctx, &messages, &options).await.unwrap();

    assert!(answer.sources.is_empty());
    match answer.content {
        AnswerBody::Text(text) => {
            assert_eq!(
                text,
                "I have no knowledge base entries for query with text qqqqzzzz"
            );
        }
        AnswerBody::Stream(_) => panic!("expected canned text"),
    }

    ctx.close().await;
}

#[tokio::test]
async fn answer_carries_generated_text_and_sources() {
    let (_tmp, mut ctx) = setup().await;
    seed_corpus(&ctx).await;

    let mut registry = ProviderRegistry::new();
    let options = options_with(
        &mut registry,
        Arc::new(CannedProvider {
            reply: "A crossover fires when plots cross.".to_string(),
        }),
    );
    ctx.providers = registry;

    let messages = vec![ChatMessage::user("What is a crossover signal?")];
    let answer = answer::answer(&ctx, &messages, &options).await.unwrap();

    assert!(!answer.sources.is_empty());
    match answer.content {
        AnswerBody::Text(text) => assert_eq!(text, "A crossover fires when plots cross."),
        AnswerBody::Stream(_) => panic!("expected full text"),
    }

    ctx.close().await;
}

#[tokio::test]
async fn gateway_failure_becomes_apology_not_error() {
    let (_tmp, mut ctx) = setup().await;
    seed_corpus(&ctx).await;

    let mut registry = ProviderRegistry::new();
    let options = options_with(&mut registry, Arc::new(FailingProvider));
    ctx.providers = registry;

    let messages = vec![ChatMessage::user("What is a crossover signal?")];
    let answer = answer::answer(&ctx, &messages, &options).await.unwrap();

    match answer.content {
        AnswerBody::Text(text) => {
            assert!(text.contains("Sorry"), "got: {text}");
            assert!(
                !text.contains("connection refused"),
                "raw provider error leaked: {text}"
            );
        }
        AnswerBody::Stream(_) => panic!("expected apology text"),
    }
    // Sources still accompany the apology.
    assert!(!answer.sources.is_empty());

    ctx.close().await;
}

// ============ Streaming ============

#[tokio::test]
async fn streamed_answer_delivers_tokens_in_order() {
    let (_tmp, mut ctx) = setup().await;
    seed_corpus(&ctx).await;

    let mut registry = ProviderRegistry::new();
    let mut options = options_with(
        &mut registry,
        Arc::new(CannedProvider {
            reply: "one two three".to_string(),
        }),
    );
    options.stream = true;
    ctx.providers = registry;

    let messages = vec![ChatMessage::user("What is a crossover signal?")];
    let answer = answer::answer(&ctx, &messages, &options).await.unwrap();

    let AnswerBody::Stream(stream) = answer.content else {
        panic!("expected stream");
    };
    let tokens: Vec<String> = stream.map(|item| item.unwrap()).collect().await;
    assert_eq!(tokens, ["one ", "two ", "three "]);

    ctx.close().await;
}

#[tokio::test]
async fn dropping_stream_releases_connection() {
    let closed = Arc::new(AtomicUsize::new(0));
    let provider = Arc::new(EndlessStreamProvider {
        closed: closed.clone(),
    });

    let mut registry = ProviderRegistry::new();
    let mut options = options_with(&mut registry, provider);
    options.stream = true;

    let stream = match kbase::generate::generate(
        &registry,
        vec![ChatMessage::user("hi")],
        &options,
    )
    .await
    .unwrap()
    {
        kbase::generate::Completion::Streaming(stream) => stream,
        kbase::generate::Completion::Full(_) => panic!("expected stream"),
    };

    let mut stream = stream;
    let first = stream.next().await.unwrap().unwrap();
    let second = stream.next().await.unwrap().unwrap();
    assert_eq!(first, "tok0 ");
    assert_eq!(second, "tok1 ");
    assert_eq!(closed.load(Ordering::SeqCst), 0);

    // Cancelling consumption must release the underlying connection.
    drop(stream);
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}
