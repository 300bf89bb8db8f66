//! Per-request pipelines: validate, call upstream, translate back.
//!
//! Each protocol has a streaming and a whole-response form. Streaming forms
//! return an [`SseStream`] once the upstream has accepted the request, so
//! rejections still surface as plain HTTP errors.

use crate::backend::frames::{body_reader, FrameReader};
use crate::backend::tools::tool_definitions;
use crate::backend::{
    build_payload, BackendClient, BackendStream, PayloadOptions, RequestPayload, StreamItem,
};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::logging::RequestLogger;
use crate::models::ModelCatalog;
use crate::translate::anthropic_types::{MessagesRequest, MessagesResponse, StreamEvent};
use crate::translate::chunks::{new_chat_id, ChunkTranslator, DONE};
use crate::translate::openai_types::{
    ChatCompletionRequest, ChatCompletionResponse, ResponsesRequest,
};
use crate::translate::request::{plan_chat_request, plan_messages_request, MessagesPlan};
use crate::translate::responses::{
    passthrough_event_name, plan_responses_request, CompletedCapture, ResponsesDefaults,
};
use crate::translate::streaming::{complete_message, MessageStreamTranslator, StreamOptions};

use futures::stream::Stream;
use serde::Serialize;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// Outcome of proxying a streaming request: a stream of SSE events.
pub type SseStream =
    Pin<Box<dyn Stream<Item = std::result::Result<SseEvent, std::io::Error>> + Send>>;

#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    /// `event:` line; chat chunks go out unnamed.
    pub event: Option<String>,
    /// Payload; embedded newlines become separate `data:` lines.
    pub data: String,
}

impl SseEvent {
    pub fn named(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: data.into(),
        }
    }

    pub fn data(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }
}

fn json_event<T: Serialize>(
    event: Option<&str>,
    value: &T,
) -> std::result::Result<SseEvent, std::io::Error> {
    let data = serde_json::to_string(value)?;
    Ok(SseEvent {
        event: event.map(str::to_string),
        data,
    })
}

fn message_event(event: &StreamEvent) -> std::result::Result<SseEvent, std::io::Error> {
    json_event(Some(event.event_name()), event)
}

/// Components every pipeline needs.
#[derive(Clone, Copy)]
pub struct Upstream<'a> {
    pub config: &'a GatewayConfig,
    pub backend: &'a BackendClient,
    pub catalog: &'a ModelCatalog,
}

impl Upstream<'_> {
    fn options(&self, model: String) -> PayloadOptions {
        PayloadOptions {
            model,
            instructions: self.config.instructions.clone(),
            reasoning_effort: self.config.reasoning_effort.clone(),
            ..PayloadOptions::default()
        }
    }
}

/// Log a worker outcome once the stream has been consumed.
async fn settle(upstream: BackendStream, log: &RequestLogger) {
    let dropped = upstream.dropped_tool_calls();
    if dropped > 0 {
        log.warn("stream", format!("{dropped} tool-call notifications dropped"));
    }
    match upstream.finish().await {
        Ok(text) => log.info("stream", format!("stream completed text_len={}", text.len())),
        Err(GatewayError::Cancelled) => log.info("stream", "stream cancelled"),
        Err(e) => {
            tracing::warn!(request_id = log.request_id(), error = %e, "upstream failed mid-stream");
            log.error("stream", format!("upstream failed mid-stream: {e}"));
        }
    }
}

// ---------------------------------------------------------------------------
// Chat completions
// ---------------------------------------------------------------------------

fn chat_payload(req: &ChatCompletionRequest, up: Upstream<'_>) -> Result<RequestPayload> {
    let plan = plan_chat_request(req, up.catalog)?;
    let options = PayloadOptions {
        tools: tool_definitions(&plan.tools),
        temperature: req.temperature,
        top_p: req.top_p,
        ..up.options(plan.backend_model)
    };
    build_payload(&plan.messages, options)
}

pub async fn chat_completion(
    req: &ChatCompletionRequest,
    up: Upstream<'_>,
    log: &RequestLogger,
) -> Result<ChatCompletionResponse> {
    let payload = chat_payload(req, up)?;
    let generation = up.backend.generate(payload, log).await?;
    let mut translator =
        ChunkTranslator::new(new_chat_id(), req.model.trim(), &up.config.system_fingerprint);
    Ok(translator.completion(generation.text, generation.tool_calls))
}

pub async fn chat_streaming(
    req: &ChatCompletionRequest,
    up: Upstream<'_>,
    log: &RequestLogger,
) -> Result<SseStream> {
    let payload = chat_payload(req, up)?;
    let upstream = up.backend.stream(payload, log).await?;
    let translator =
        ChunkTranslator::new(new_chat_id(), req.model.trim(), &up.config.system_fingerprint);
    Ok(Box::pin(chat_event_stream(upstream, translator, log.clone())))
}

fn chat_event_stream(
    mut upstream: BackendStream,
    mut translator: ChunkTranslator,
    log: RequestLogger,
) -> impl Stream<Item = std::result::Result<SseEvent, std::io::Error>> + Send + 'static {
    async_stream::stream! {
        while let Some(item) = upstream.next().await {
            match item {
                StreamItem::Text(text) => {
                    if let Some(chunk) = translator.text(&text) {
                        yield json_event(None, &chunk);
                    }
                }
                StreamItem::ToolCalls(calls) => {
                    for chunk in translator.tool_calls(calls) {
                        yield json_event(None, &chunk);
                    }
                }
            }
        }
        settle(upstream, &log).await;

        yield json_event(None, &translator.finish());
        yield Ok(SseEvent::data(DONE));
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

fn messages_payload(
    req: &MessagesRequest,
    plan: &MessagesPlan,
    up: Upstream<'_>,
) -> Result<RequestPayload> {
    let options = PayloadOptions {
        tools: tool_definitions(&plan.tools),
        temperature: req.temperature,
        top_p: req.top_p,
        ..up.options(plan.backend_model.clone())
    };
    build_payload(&plan.messages, options)
}

fn stream_options(plan: &MessagesPlan) -> StreamOptions {
    StreamOptions {
        stop_sequences: plan.stop_sequences.clone(),
        max_tokens: plan.max_tokens,
        disable_parallel_tool_use: plan.disable_parallel_tool_use,
    }
}

pub async fn messages_completion(
    req: &MessagesRequest,
    up: Upstream<'_>,
    log: &RequestLogger,
) -> Result<MessagesResponse> {
    let plan = plan_messages_request(req, up.catalog)?;
    let payload = messages_payload(req, &plan, up)?;
    let generation = up.backend.generate(payload, log).await?;
    let response = complete_message(
        &req.model,
        plan.input_tokens,
        &generation.text,
        generation.tool_calls,
        &stream_options(&plan),
    );
    log.info(
        "proxy",
        format!(
            "completed in={} out={} stop={}",
            response.usage.input_tokens,
            response.usage.output_tokens,
            response.stop_reason.as_deref().unwrap_or_default()
        ),
    );
    Ok(response)
}

pub async fn messages_streaming(
    req: &MessagesRequest,
    up: Upstream<'_>,
    log: &RequestLogger,
) -> Result<SseStream> {
    let plan = plan_messages_request(req, up.catalog)?;
    let payload = messages_payload(req, &plan, up)?;
    let upstream = up.backend.stream(payload, log).await?;
    let translator =
        MessageStreamTranslator::new(&req.model, plan.input_tokens, stream_options(&plan));
    Ok(Box::pin(message_event_stream(upstream, translator, log.clone())))
}

fn message_event_stream(
    mut upstream: BackendStream,
    mut translator: MessageStreamTranslator,
    log: RequestLogger,
) -> impl Stream<Item = std::result::Result<SseEvent, std::io::Error>> + Send + 'static {
    async_stream::stream! {
        yield message_event(&translator.start());

        let mut truncated = false;
        while let Some(item) = upstream.next().await {
            let events = match item {
                StreamItem::Text(text) => translator.text(&text),
                StreamItem::ToolCalls(calls) => translator.tool_calls(calls),
            };
            for event in &events {
                yield message_event(event);
            }
            if translator.is_stopped() {
                truncated = true;
                break;
            }
        }

        if truncated {
            upstream.cancel();
            log.info("stream", "output truncated, cancelling upstream");
        }
        settle(upstream, &log).await;

        for event in &translator.finish() {
            yield message_event(event);
        }
    }
}

// ---------------------------------------------------------------------------
// Responses passthrough
// ---------------------------------------------------------------------------

fn responses_payload(req: &ResponsesRequest, up: Upstream<'_>) -> Result<RequestPayload> {
    let defaults = ResponsesDefaults {
        instructions: up.config.instructions.clone(),
        reasoning_effort: up.config.reasoning_effort.clone(),
    };
    plan_responses_request(req, up.catalog, &defaults)
}

/// The `response` object of the upstream `response.completed` event.
pub async fn responses_completion(
    req: &ResponsesRequest,
    up: Upstream<'_>,
    log: &RequestLogger,
) -> Result<serde_json::Value> {
    let payload = responses_payload(req, up)?;
    let response = up.backend.open(payload, log).await?;
    let mut frames = FrameReader::new(body_reader(response), CancellationToken::new());
    let mut capture = CompletedCapture::default();
    while let Some(frame) = frames.next_frame().await? {
        if capture.observe(&frame)? {
            break;
        }
    }
    capture.into_response()
}

/// Re-emit every typed upstream frame under its own event name.
pub async fn responses_streaming(
    req: &ResponsesRequest,
    up: Upstream<'_>,
    log: &RequestLogger,
) -> Result<SseStream> {
    let payload = responses_payload(req, up)?;
    let response = up.backend.open(payload, log).await?;
    let frames = FrameReader::new(body_reader(response), CancellationToken::new());
    Ok(Box::pin(passthrough_stream(frames, log.clone())))
}

fn passthrough_stream<R>(
    mut frames: FrameReader<R>,
    log: RequestLogger,
) -> impl Stream<Item = std::result::Result<SseEvent, std::io::Error>> + Send + 'static
where
    R: tokio::io::AsyncBufRead + Unpin + Send + 'static,
{
    async_stream::stream! {
        let mut forwarded = 0usize;
        loop {
            let frame = match frames.next_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    log.error("stream", format!("passthrough read failed: {e}"));
                    break;
                }
            };
            match passthrough_event_name(&frame) {
                Some(name) => {
                    forwarded += 1;
                    yield Ok(SseEvent::named(name, frame));
                }
                None => log.debug("stream", "skipping untyped frame"),
            }
        }
        log.info("stream", format!("passthrough completed events={forwarded}"));
    }
}
