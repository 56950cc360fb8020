//! HTTP API.
//!
//! Exposes the question answering pipeline to the web frontend.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/chat` | Answer a question; JSON body, JSON or SSE reply |
//! | `GET`  | `/api/health` | Health check (returns version) |
//!
//! `POST /api/chat` takes `{messages, model?, stream?}`. Without `stream` the
//! reply is `{content, sources}`. With `stream: true` the reply is an SSE
//! stream: one `sources` event, then a `data` event per token; a client that
//! disconnects mid-stream tears the provider connection down with it.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::answer::{self, Answer, AnswerBody, Source};
use crate::generate::GenerateOptions;
use crate::models::ChatMessage;
use crate::AppContext;

/// Starts the HTTP server on the configured bind address. Runs until the
/// process is terminated.
pub async fn run_server(ctx: AppContext) -> anyhow::Result<()> {
    let bind_addr = ctx.config.server.bind.clone();
    let state = Arc::new(ctx);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/chat", post(handle_chat))
        .route("/api/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    println!("kbase API listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

// ============ GET /api/health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /api/chat ============

#[derive(Deserialize)]
struct ChatRequest {
    messages: Vec<ChatMessage>,
    model: Option<String>,
    #[serde(default)]
    stream: bool,
}

#[derive(Serialize)]
struct ChatResponse {
    content: String,
    sources: Vec<Source>,
}

async fn handle_chat(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, AppError> {
    if request.messages.is_empty() {
        return Err(bad_request("messages must not be empty"));
    }

    let mut options = GenerateOptions::from_config(&ctx.config.generation);
    if let Some(model) = request.model {
        options.model = model;
    }
    options.stream = request.stream;

    let answer = answer::answer(&ctx, &request.messages, &options)
        .await
        .map_err(|err| {
            let message = err.to_string();
            if message.contains("no user message") {
                bad_request(message)
            } else {
                tracing::error!(error = %err, "chat pipeline failed");
                internal(message)
            }
        })?;

    Ok(match answer.content {
        AnswerBody::Text(content) => Json(ChatResponse {
            content,
            sources: answer.sources,
        })
        .into_response(),
        AnswerBody::Stream(_) => sse_response(answer),
    })
}

/// Stream the answer as SSE: a `sources` event first, then one event per
/// token. Provider errors mid-stream are logged and replaced with a terminal
/// `error` event carrying user-safe text.
fn sse_response(answer: Answer) -> Response {
    let Answer { content, sources } = answer;
    let AnswerBody::Stream(tokens) = content else {
        unreachable!("sse_response called with a non-streaming answer");
    };

    let sources_json = serde_json::to_string(&sources).unwrap_or_else(|_| "[]".to_string());
    let head = futures_util::stream::once(async move {
        Ok::<Event, Infallible>(Event::default().event("sources").data(sources_json))
    });

    let body = tokens.map(|item| {
        Ok::<Event, Infallible>(match item {
            Ok(token) => Event::default().data(token),
            Err(err) => {
                tracing::error!(error = %err, "stream interrupted");
                Event::default()
                    .event("error")
                    .data(answer::apology_for(&err))
            }
        })
    });

    Sse::new(head.chain(body)).into_response()
}
