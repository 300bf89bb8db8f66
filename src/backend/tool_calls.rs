//! Tool-call reconstruction across upstream events, plus the lossy queue that
//! carries finished notifications to the downstream translator.

use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Notify;

use super::events::{str_field, EventKind};

pub const WEB_SEARCH_TOOL_NAME: &str = "native.web_search";
pub const PYTHON_RUNNER_TOOL_NAME: &str = "native.python_runner";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CallStatus {
    InProgress,
    Searching,
    Completed,
    /// Any other status string reported on the item, lowercased.
    Other(String),
    #[default]
    Unknown,
}

impl CallStatus {
    fn from_item_status(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "" => None,
            "in_progress" => Some(Self::InProgress),
            "searching" => Some(Self::Searching),
            "completed" => Some(Self::Completed),
            _ => Some(Self::Other(normalized)),
        }
    }

    pub fn from_event(kind: &EventKind) -> Self {
        match kind {
            EventKind::OutputItemAdded => Self::InProgress,
            EventKind::OutputItemDone => Self::Completed,
            EventKind::BuiltinCall { phase, .. } => phase.status(),
            _ => Self::Unknown,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::InProgress => "in_progress",
            Self::Searching => "searching",
            Self::Completed => "completed",
            Self::Other(s) => s,
            Self::Unknown => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON text; may be empty or partial until the call completes.
    pub arguments: String,
    pub status: CallStatus,
}

/// Built-in capabilities the backend runs itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinTool {
    WebSearch,
    CodeInterpreter,
}

impl BuiltinTool {
    pub fn from_item_type(item_type: &str) -> Option<Self> {
        match item_type {
            "web_search_call" => Some(Self::WebSearch),
            "code_interpreter_call" => Some(Self::CodeInterpreter),
            _ => None,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::WebSearch => WEB_SEARCH_TOOL_NAME,
            Self::CodeInterpreter => PYTHON_RUNNER_TOOL_NAME,
        }
    }
}

#[derive(Debug, Clone)]
struct CallMeta {
    call_id: String,
    name: String,
}

/// Per-response state keyed by the upstream item id.
#[derive(Debug, Default)]
pub struct FunctionCallState {
    item_meta: HashMap<String, CallMeta>,
    args: HashMap<String, String>,
}

impl FunctionCallState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tool calls carried by one event. Argument deltas only update state.
    pub fn extract(&mut self, kind: &EventKind, raw: &Map<String, Value>) -> Vec<ToolCall> {
        match kind {
            EventKind::OutputItemAdded | EventKind::OutputItemDone => raw
                .get("item")
                .and_then(Value::as_object)
                .and_then(|item| self.from_item(kind, item))
                .into_iter()
                .collect(),
            EventKind::Completed => self.from_completed(raw),
            EventKind::FunctionCallArgumentsDelta => {
                self.apply_arguments_delta(raw);
                Vec::new()
            }
            EventKind::FunctionCallArgumentsDone => {
                self.finish_arguments(raw).into_iter().collect()
            }
            EventKind::BuiltinCall { tool, phase } => str_field(raw, "item_id")
                .filter(|id| !id.is_empty())
                .map(|id| ToolCall {
                    id: id.to_string(),
                    name: tool.display_name().to_string(),
                    arguments: String::new(),
                    status: phase.status(),
                })
                .into_iter()
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Re-walk the final snapshot as if each output item had just finished.
    fn from_completed(&mut self, raw: &Map<String, Value>) -> Vec<ToolCall> {
        let Some(output) = raw
            .get("response")
            .and_then(|r| r.get("output"))
            .and_then(Value::as_array)
        else {
            return Vec::new();
        };

        output
            .iter()
            .filter_map(Value::as_object)
            .filter_map(|item| self.from_item(&EventKind::OutputItemDone, item))
            .collect()
    }

    fn from_item(&mut self, kind: &EventKind, item: &Map<String, Value>) -> Option<ToolCall> {
        let mut call = call_from_item(kind, item)?;

        if str_field(item, "type") == Some("function_call") {
            if let Some(item_id) = str_field(item, "id").filter(|id| !id.is_empty()) {
                let meta = CallMeta {
                    call_id: call.id.trim().to_string(),
                    name: call.name.trim().to_string(),
                };
                if !meta.call_id.is_empty() && !meta.name.is_empty() {
                    self.item_meta.insert(item_id.to_string(), meta);
                }

                let args = call.arguments.trim();
                if !args.is_empty() {
                    self.args.insert(item_id.to_string(), args.to_string());
                } else if let Some(cached) = self
                    .args
                    .get(item_id)
                    .map(|a| a.trim())
                    .filter(|a| !a.is_empty())
                {
                    call.arguments = cached.to_string();
                }
            }
        }

        Some(call)
    }

    fn apply_arguments_delta(&mut self, raw: &Map<String, Value>) {
        let Some(item_id) = str_field(raw, "item_id").map(str::trim).filter(|id| !id.is_empty())
        else {
            return;
        };
        let fragment = str_field(raw, "delta")
            .or_else(|| str_field(raw, "arguments_delta"))
            .unwrap_or_default();
        if fragment.is_empty() {
            return;
        }
        self.args
            .entry(item_id.to_string())
            .or_default()
            .push_str(fragment);
    }

    fn finish_arguments(&mut self, raw: &Map<String, Value>) -> Option<ToolCall> {
        let item_id = str_field(raw, "item_id")
            .map(str::trim)
            .filter(|id| !id.is_empty())?;

        let mut arguments = str_field(raw, "arguments")
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        if arguments.is_empty() {
            arguments = self
                .args
                .get(item_id)
                .map(|a| a.trim().to_string())
                .unwrap_or_default();
        }
        if !arguments.is_empty() {
            self.args.insert(item_id.to_string(), arguments.clone());
        }

        let meta = self.item_meta.get(item_id)?;
        let name = meta.name.trim();
        if name.is_empty() {
            return None;
        }
        let call_id = match meta.call_id.trim() {
            "" => item_id,
            id => id,
        };

        Some(ToolCall {
            id: call_id.to_string(),
            name: name.to_string(),
            arguments,
            status: CallStatus::Completed,
        })
    }
}

fn call_from_item(kind: &EventKind, item: &Map<String, Value>) -> Option<ToolCall> {
    let item_type = str_field(item, "type").unwrap_or_default();
    let status = str_field(item, "status")
        .and_then(CallStatus::from_item_status)
        .unwrap_or_else(|| CallStatus::from_event(kind));

    if item_type == "function_call" {
        let name = str_field(item, "name").map(str::trim).unwrap_or_default();
        if name.is_empty() {
            return None;
        }
        let call_id = str_field(item, "call_id")
            .filter(|id| !id.is_empty())
            .or_else(|| str_field(item, "id"))
            .filter(|id| !id.is_empty())?;

        let arguments = match item.get("arguments") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => serde_json::to_string(other).unwrap_or_default(),
        };

        return Some(ToolCall {
            id: call_id.to_string(),
            name: name.to_string(),
            arguments,
            status,
        });
    }

    let tool = BuiltinTool::from_item_type(item_type)?;
    let call_id = str_field(item, "id").filter(|id| !id.is_empty())?;
    let arguments = item
        .get("action")
        .and_then(Value::as_object)
        .filter(|action| !action.is_empty())
        .and_then(|action| serde_json::to_string(action).ok())
        .unwrap_or_default();

    Some(ToolCall {
        id: call_id.to_string(),
        name: tool.display_name().to_string(),
        arguments,
        status,
    })
}

struct Queued {
    /// Text increments the worker had sent when this call was queued.
    after_text: u64,
    call: ToolCall,
}

struct QueueInner {
    calls: VecDeque<Queued>,
    closed: bool,
    dropped: usize,
}

/// Bounded tool-call queue shared by the upstream worker and one translator.
///
/// Pushing never blocks: when full, the oldest pending notification is
/// discarded. The consumer is woken through a [`Notify`].
#[derive(Clone)]
pub struct ToolCallQueue {
    inner: Arc<Mutex<QueueInner>>,
    notify: Arc<Notify>,
    capacity: Option<usize>,
}

impl ToolCallQueue {
    pub fn bounded(capacity: usize) -> Self {
        Self::with_capacity(Some(capacity.max(1)))
    }

    /// Keeps every notification; used when the whole response is buffered.
    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueInner {
                calls: VecDeque::new(),
                closed: false,
                dropped: 0,
            })),
            notify: Arc::new(Notify::new()),
            capacity,
        }
    }

    /// Enqueue a call. Returns the notification that was evicted, if any.
    pub fn push(&self, call: ToolCall) -> Option<ToolCall> {
        self.push_after(call, 0)
    }

    /// Enqueue a call that arrived after `after_text` text increments.
    pub fn push_after(&self, call: ToolCall, after_text: u64) -> Option<ToolCall> {
        let evicted = {
            let mut inner = self.inner.lock();
            let evicted = match self.capacity {
                Some(cap) if inner.calls.len() >= cap => {
                    inner.dropped += 1;
                    inner.calls.pop_front().map(|queued| queued.call)
                }
                _ => None,
            };
            inner.calls.push_back(Queued { after_text, call });
            evicted
        };
        self.notify.notify_one();
        evicted
    }

    pub fn drain(&self) -> Vec<ToolCall> {
        self.inner.lock().calls.drain(..).map(|queued| queued.call).collect()
    }

    /// Take the calls queued after at most `texts` text increments.
    pub fn drain_through(&self, texts: u64) -> Vec<ToolCall> {
        let mut inner = self.inner.lock();
        let ready = inner
            .calls
            .iter()
            .take_while(|queued| queued.after_text <= texts)
            .count();
        inner.calls.drain(..ready).map(|queued| queued.call).collect()
    }

    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn dropped(&self) -> usize {
        self.inner.lock().dropped
    }

    /// Resolves once something was pushed or the queue was closed.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}
