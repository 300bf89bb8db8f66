//! Upstream request orchestration: send, repair-and-retry on classified
//! rejections, then run the frame read loop.

use std::fmt;
use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use tokio::io::AsyncBufRead;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

use super::events::EventInterpreter;
use super::frames::{body_reader, FrameReader};
use super::payload::{Reasoning, RequestPayload};
use super::reasoning::{
    fallback_reasoning_effort, is_unsupported_reasoning_effort_error, reasoning_error_text,
};
use super::tool_calls::{ToolCall, ToolCallQueue};
use super::tools::{is_unsupported_tool_type_error, remove_tool_type, TOOL_TYPE_CODE_INTERPRETER};
use crate::auth::{Credentials, SharedAuth};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::logging::RequestLogger;

const MAX_ERROR_BODY_BYTES: usize = 8 << 10;
const TEXT_CHANNEL_CAPACITY: usize = 64;

/// A mutation applied to the payload before retrying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Repair {
    StripTool(&'static str),
    DowngradeEffort { from: String, to: &'static str },
}

impl fmt::Display for Repair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StripTool(tool) => write!(f, "removed unsupported tool {tool}"),
            Self::DowngradeEffort { from, to } => {
                write!(f, "downgraded reasoning effort {from} -> {to}")
            }
        }
    }
}

/// Which repairs have already been spent for one logical request.
#[derive(Debug, Default)]
pub struct RetryState {
    stripped_code_interpreter: bool,
    downgraded_effort: bool,
}

impl RetryState {
    /// Mutate `payload` in response to `err` if an unspent repair applies.
    pub fn repair(&mut self, payload: &mut RequestPayload, err: &GatewayError) -> Option<Repair> {
        let GatewayError::BackendStatus {
            status: 400,
            message,
        } = err
        else {
            return None;
        };

        if !self.stripped_code_interpreter
            && is_unsupported_tool_type_error(message, TOOL_TYPE_CODE_INTERPRETER)
        {
            let (tools, removed) = remove_tool_type(&payload.tools, TOOL_TYPE_CODE_INTERPRETER);
            if removed {
                payload.tools = tools;
                self.stripped_code_interpreter = true;
                return Some(Repair::StripTool(TOOL_TYPE_CODE_INTERPRETER));
            }
        }

        if !self.downgraded_effort {
            let effort = payload.reasoning_effort()?.to_string();
            let fallback = fallback_reasoning_effort(&effort)?;
            if is_unsupported_reasoning_effort_error(&reasoning_error_text(message), &effort) {
                payload.reasoning = Some(Reasoning {
                    effort: fallback.to_string(),
                });
                self.downgraded_effort = true;
                return Some(Repair::DowngradeEffort {
                    from: effort,
                    to: fallback,
                });
            }
        }

        None
    }
}

/// HTTP client for the upstream responses endpoint.
#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    backend_url: String,
    originator: String,
    auth: SharedAuth,
    queue_capacity: usize,
}

impl BackendClient {
    pub fn new(config: &GatewayConfig, auth: SharedAuth) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            backend_url: config.backend_url.clone(),
            originator: config.effective_originator().to_string(),
            auth,
            queue_capacity: config.tool_call_queue_capacity,
        })
    }

    fn credentials(&self) -> Result<Credentials> {
        self.auth.credentials().map_err(|e| match e {
            GatewayError::Auth { .. } => e,
            other => GatewayError::auth(other.to_string()),
        })
    }

    async fn send_once(
        &self,
        creds: &Credentials,
        payload: &RequestPayload,
    ) -> Result<reqwest::Response> {
        let mut request = self
            .http
            .post(&self.backend_url)
            .bearer_auth(&creds.access_token)
            .header(CONTENT_TYPE, "application/json")
            .header("Originator", &self.originator)
            .header(USER_AGENT, &self.originator)
            .header(ACCEPT, "text/event-stream")
            .json(payload);
        if let Some(account) = creds
            .account_id
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
        {
            request = request.header("ChatGPT-Account-Id", account);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        if !(200..400).contains(&status) {
            let message = read_error_body(response).await;
            return Err(GatewayError::backend_status(status, message));
        }
        Ok(response)
    }

    /// Send `payload`, applying each repair at most once, and return the
    /// accepted streaming response.
    pub async fn open(
        &self,
        mut payload: RequestPayload,
        log: &RequestLogger,
    ) -> Result<reqwest::Response> {
        let creds = self.credentials()?;
        let mut retry = RetryState::default();

        loop {
            log.info(
                "backend",
                format!(
                    "POST {} model={} items={} tools={}",
                    self.backend_url,
                    payload.model,
                    payload.input.len(),
                    payload.tools.len()
                ),
            );

            let err = match self.send_once(&creds, &payload).await {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };

            match retry.repair(&mut payload, &err) {
                Some(repair) => {
                    tracing::warn!(
                        request_id = log.request_id(),
                        %repair,
                        "retrying rejected request"
                    );
                    log.warn("backend", format!("{err}; retrying: {repair}"));
                }
                None => {
                    log.error("backend", err.to_string());
                    return Err(err);
                }
            }
        }
    }

    /// Open the upstream stream and read it on a spawned task.
    pub async fn stream(
        &self,
        payload: RequestPayload,
        log: &RequestLogger,
    ) -> Result<BackendStream> {
        let response = self.open(payload, log).await?;
        Ok(BackendStream::spawn(
            body_reader(response),
            self.queue_capacity,
            log.clone(),
        ))
    }

    /// Read the whole upstream response in place.
    pub async fn generate(
        &self,
        payload: RequestPayload,
        log: &RequestLogger,
    ) -> Result<Generation> {
        let response = self.open(payload, log).await?;
        let frames = FrameReader::new(body_reader(response), CancellationToken::new());
        let generation = collect_events(frames).await?;
        log.info(
            "backend",
            format!(
                "completed text_len={} tool_calls={}",
                generation.text.len(),
                generation.tool_calls.len()
            ),
        );
        Ok(generation)
    }
}

async fn read_error_body(mut response: reqwest::Response) -> String {
    let mut body = Vec::new();
    while body.len() < MAX_ERROR_BODY_BYTES {
        match response.chunk().await {
            Ok(Some(chunk)) => body.extend_from_slice(&chunk),
            _ => break,
        }
    }
    body.truncate(MAX_ERROR_BODY_BYTES);
    String::from_utf8_lossy(&body).trim().to_string()
}

/// Result of reading a response to completion.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    /// Every tool-call notification in arrival order, duplicates included.
    pub tool_calls: Vec<ToolCall>,
}

/// Drive the interpreter over every frame without a worker task.
pub async fn collect_events<R: AsyncBufRead + Unpin>(
    mut frames: FrameReader<R>,
) -> Result<Generation> {
    let mut interpreter = EventInterpreter::new();
    let mut tool_calls = Vec::new();
    while let Some(frame) = frames.next_frame().await? {
        let step = interpreter.handle(&frame)?;
        tool_calls.extend(step.tool_calls);
        if step.done {
            break;
        }
    }
    Ok(Generation {
        text: interpreter.into_text(),
        tool_calls,
    })
}

/// Worker body: interpret frames, forward text, queue tool calls.
///
/// Text is awaited and never dropped; tool calls go through the lossy queue.
/// The queue is closed on every exit path.
pub async fn pump_events<R: AsyncBufRead + Unpin>(
    mut frames: FrameReader<R>,
    text: mpsc::Sender<String>,
    calls: ToolCallQueue,
    log: RequestLogger,
) -> Result<String> {
    let mut interpreter = EventInterpreter::new();
    let mut sent: u64 = 0;

    let outcome = loop {
        let frame = match frames.next_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        };
        let step = match interpreter.handle(&frame) {
            Ok(step) => step,
            Err(e) => break Err(e),
        };

        for call in step.tool_calls {
            if let Some(evicted) = calls.push_after(call, sent) {
                log.warn(
                    "backend",
                    format!("tool-call queue full, dropped notification for {}", evicted.id),
                );
            }
        }
        if let Some(delta) = step.delta {
            if text.send(delta).await.is_err() {
                break Ok(());
            }
            sent += 1;
        }
        if step.done {
            break Ok(());
        }
    };

    calls.close();
    outcome.map(|()| interpreter.into_text())
}

/// What the consumer sees from a running upstream stream.
#[derive(Debug, PartialEq)]
pub enum StreamItem {
    Text(String),
    ToolCalls(Vec<ToolCall>),
}

/// Handle to an upstream read running on its own task.
///
/// Dropping the handle cancels the read.
pub struct BackendStream {
    text: mpsc::Receiver<String>,
    text_closed: bool,
    /// Text increments taken off the channel so far.
    received: u64,
    /// Received text held back until earlier tool calls are delivered.
    pending: Option<String>,
    calls: ToolCallQueue,
    cancel: CancellationToken,
    worker: JoinHandle<Result<String>>,
    _guard: DropGuard,
}

impl BackendStream {
    pub fn spawn<R>(reader: R, queue_capacity: usize, log: RequestLogger) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let calls = ToolCallQueue::bounded(queue_capacity);
        let (tx, rx) = mpsc::channel(TEXT_CHANNEL_CAPACITY);
        let frames = FrameReader::new(reader, cancel.clone());
        let worker = tokio::spawn(pump_events(frames, tx, calls.clone(), log));

        Self {
            text: rx,
            text_closed: false,
            received: 0,
            pending: None,
            calls,
            _guard: cancel.clone().drop_guard(),
            cancel,
            worker,
        }
    }

    /// Next text increment or batch of tool calls, in upstream arrival
    /// order; `None` once the worker has finished and the queue is empty.
    pub async fn next(&mut self) -> Option<StreamItem> {
        loop {
            // A call queued before the held text was sent goes out first.
            let delivered = self.received - u64::from(self.pending.is_some());
            let ready = self.calls.drain_through(delivered);
            if !ready.is_empty() {
                return Some(StreamItem::ToolCalls(ready));
            }
            if let Some(text) = self.pending.take() {
                return Some(StreamItem::Text(text));
            }
            if self.text_closed {
                let rest = self.calls.drain();
                return (!rest.is_empty()).then_some(StreamItem::ToolCalls(rest));
            }

            tokio::select! {
                text = self.text.recv() => match text {
                    Some(text) => {
                        self.received += 1;
                        self.pending = Some(text);
                    }
                    None => self.text_closed = true,
                },
                _ = self.calls.notified() => {}
            }
        }
    }

    /// Abandon the upstream read. Closing the text channel also releases a
    /// worker parked on a full channel, so [`finish`](Self::finish) returns.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.text.close();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn dropped_tool_calls(&self) -> usize {
        self.calls.dropped()
    }

    /// Wait for the worker and return the full text, or its failure.
    pub async fn finish(self) -> Result<String> {
        match self.worker.await {
            Ok(result) => result,
            Err(join) => Err(GatewayError::other(format!("backend worker failed: {join}"))),
        }
    }
}
