use crate::backend::BackendClient;
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::logging::{LogLevel, RequestLogger, SharedLogger};
use crate::models::ModelCatalog;
use crate::proxy::{self, SseStream, Upstream};
use crate::translate::anthropic_types::{
    CountTokensRequest, CountTokensResponse, ErrorResponse, MessagesRequest,
};
use crate::translate::openai_types::{
    ChatCompletionRequest, ChatErrorResponse, ModelList, ResponsesRequest,
};
use crate::translate::request::count_input_tokens;
use crate::translate::responses::passthrough_error;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

const DEFAULT_LOG_LIMIT: usize = 100;

pub struct AppState {
    pub config: GatewayConfig,
    pub backend: BackendClient,
    pub catalog: ModelCatalog,
    pub logger: SharedLogger,
}

impl AppState {
    fn upstream(&self) -> Upstream<'_> {
        Upstream {
            config: &self.config,
            backend: &self.backend,
            catalog: &self.catalog,
        }
    }

    fn request_logger(&self) -> RequestLogger {
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.logger.for_request(format!("req_{}", &id[..12]))
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/models", get(handle_models))
        .route("/v1/models/:model_id", get(handle_model))
        .route("/v1/chat/completions", post(handle_chat_completions))
        .route("/v1/responses", post(handle_responses))
        .route("/v1/messages", post(handle_messages))
        .route("/v1/messages/count_tokens", post(handle_count_tokens))
        .route("/health", get(handle_health))
        .route("/debug/logs", get(handle_debug_logs))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Error rendering
// ---------------------------------------------------------------------------

fn status_code(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY)
}

fn openai_error(status: u16, message: impl Into<String>) -> Response {
    let body = ChatErrorResponse::new(status, message);
    (status_code(status), Json(body)).into_response()
}

fn claude_error(status: u16, message: impl Into<String>) -> Response {
    let body = ErrorResponse::for_status(status, message);
    (status_code(status), Json(body)).into_response()
}

fn log_failure(log: &RequestLogger, err: &GatewayError) {
    if err.http_status() >= 500 {
        log.error("server", err.to_string());
    } else {
        log.warn("server", err.to_string());
    }
}

fn openai_failure(log: &RequestLogger, err: &GatewayError) -> Response {
    log_failure(log, err);
    openai_error(err.http_status(), err.client_message())
}

fn claude_failure(log: &RequestLogger, err: &GatewayError) -> Response {
    log_failure(log, err);
    claude_error(err.http_status(), err.client_message())
}

fn sse_response(stream: SseStream) -> Response {
    let event_stream = stream.map(|result| -> std::result::Result<Event, Infallible> {
        match result {
            Ok(sse_event) => {
                let event = Event::default().data(sse_event.data);
                Ok(match sse_event.event {
                    Some(name) => event.event(name),
                    None => event,
                })
            }
            Err(_) => Ok(Event::default().event("error").data("{}")),
        }
    });

    Sse::new(event_stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

// ---------------------------------------------------------------------------
// OpenAI-compatible surface
// ---------------------------------------------------------------------------

async fn handle_chat_completions(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let req: ChatCompletionRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            state.logger.warn("server", format!("Failed to parse chat request: {}", e));
            return openai_error(400, "invalid request body");
        }
    };

    let log = state.request_logger();
    log.info(
        "server",
        format!(
            "chat: model={} streaming={} messages={} tools={}",
            req.model,
            req.stream,
            req.messages.len(),
            req.tools.len()
        ),
    );

    if req.stream {
        match proxy::chat_streaming(&req, state.upstream(), &log).await {
            Ok(stream) => sse_response(stream),
            Err(e) => openai_failure(&log, &e),
        }
    } else {
        match proxy::chat_completion(&req, state.upstream(), &log).await {
            Ok(resp) => Json(resp).into_response(),
            Err(e) => openai_failure(&log, &e),
        }
    }
}

async fn handle_responses(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let req: ResponsesRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            state.logger.warn("server", format!("Failed to parse responses request: {}", e));
            return openai_error(400, "invalid request body");
        }
    };

    let log = state.request_logger();
    log.info(
        "server",
        format!("responses: model={} streaming={}", req.model, req.stream),
    );

    let result = if req.stream {
        proxy::responses_streaming(&req, state.upstream(), &log)
            .await
            .map(sse_response)
    } else {
        proxy::responses_completion(&req, state.upstream(), &log)
            .await
            .map(|resp| Json(resp).into_response())
    };
    result.unwrap_or_else(|e| {
        log_failure(&log, &e);
        let (status, message) = passthrough_error(&e);
        openai_error(status, message)
    })
}

// ---------------------------------------------------------------------------
// Anthropic-compatible surface
// ---------------------------------------------------------------------------

async fn handle_messages(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let req: MessagesRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            state.logger.warn("server", format!("Failed to parse messages request: {}", e));
            return claude_error(400, "invalid request body");
        }
    };

    let log = state.request_logger();
    log.with_context(
        LogLevel::Info,
        "server",
        format!("messages: model={} streaming={}", req.model, req.stream),
        serde_json::json!({
            "messages": req.messages.len(),
            "max_tokens": req.max_tokens,
            "tools": req.tools.len(),
            "stop_sequences": req.stop_sequences.len(),
        }),
    );

    if req.stream {
        match proxy::messages_streaming(&req, state.upstream(), &log).await {
            Ok(stream) => sse_response(stream),
            Err(e) => claude_failure(&log, &e),
        }
    } else {
        match proxy::messages_completion(&req, state.upstream(), &log).await {
            Ok(resp) => Json(resp).into_response(),
            Err(e) => claude_failure(&log, &e),
        }
    }
}

async fn handle_count_tokens(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let req: CountTokensRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            state.logger.warn("server", format!("Failed to parse count_tokens request: {}", e));
            return claude_error(400, "invalid request body");
        }
    };

    match count_input_tokens(&req, &state.catalog) {
        Ok(input_tokens) => Json(CountTokensResponse { input_tokens }).into_response(),
        Err(e) => claude_error(e.http_status(), e.client_message()),
    }
}

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

/// Anthropic clients identify themselves by header or user agent.
fn is_claude_request(headers: &HeaderMap) -> bool {
    let non_blank = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| !v.trim().is_empty())
    };
    if non_blank("anthropic-version") || non_blank("anthropic-beta") || non_blank("x-api-key") {
        return true;
    }
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ua| ua.to_ascii_lowercase().contains("claude"))
}

async fn handle_models(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if is_claude_request(&headers) {
        return Json(state.catalog.claude_models()).into_response();
    }
    let ids = state.catalog.presets().into_iter().map(|(id, _)| id);
    Json(ModelList::new(ids, chrono::Utc::now().timestamp())).into_response()
}

async fn handle_model(
    State(state): State<Arc<AppState>>,
    Path(model_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !is_claude_request(&headers) {
        return (StatusCode::NOT_FOUND, "404 page not found").into_response();
    }
    let model_id = model_id.trim();
    if model_id.is_empty() {
        return claude_error(400, "model_id is required");
    }
    if state.catalog.resolve_claude_model(model_id).is_none() {
        return claude_error(404, "model not found");
    }
    Json(state.catalog.claude_model_info(model_id)).into_response()
}

// ---------------------------------------------------------------------------
// Operational endpoints
// ---------------------------------------------------------------------------

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    limit: Option<usize>,
}

async fn handle_debug_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogsQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    Json(state.logger.recent(limit)).into_response()
}
