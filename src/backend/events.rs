//! Interpretation of upstream event payloads.
//!
//! Every payload is a loosely shaped JSON object whose `type` field selects
//! the handling. Fields are read through optional lookups only; nothing is
//! deserialized into a fixed per-event struct.

use serde_json::{Map, Value};

use super::tool_calls::{BuiltinTool, CallStatus, FunctionCallState, ToolCall};
use crate::error::{GatewayError, Result};

/// Progress marker carried by built-in tool events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinPhase {
    InProgress,
    Searching,
    Completed,
}

impl BuiltinPhase {
    pub fn status(self) -> CallStatus {
        match self {
            Self::InProgress => CallStatus::InProgress,
            Self::Searching => CallStatus::Searching,
            Self::Completed => CallStatus::Completed,
        }
    }
}

/// Discriminant of an upstream event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Created,
    OutputTextDelta,
    OutputTextDone,
    ContentPartAdded,
    ContentPartDone,
    OutputItemAdded,
    OutputItemDone,
    FunctionCallArgumentsDelta,
    FunctionCallArgumentsDone,
    BuiltinCall {
        tool: BuiltinTool,
        phase: BuiltinPhase,
    },
    Completed,
    Failed,
    Error,
    Other(String),
}

impl EventKind {
    pub fn parse(discriminant: &str) -> Self {
        match discriminant {
            "response.created" => Self::Created,
            "response.output_text.delta" => Self::OutputTextDelta,
            "response.output_text.done" => Self::OutputTextDone,
            "response.content_part.added" => Self::ContentPartAdded,
            "response.content_part.done" => Self::ContentPartDone,
            "response.output_item.added" => Self::OutputItemAdded,
            "response.output_item.done" => Self::OutputItemDone,
            "response.function_call_arguments.delta" => Self::FunctionCallArgumentsDelta,
            "response.function_call_arguments.done" => Self::FunctionCallArgumentsDone,
            "response.web_search_call.in_progress" => {
                Self::builtin(BuiltinTool::WebSearch, BuiltinPhase::InProgress)
            }
            "response.web_search_call.searching" => {
                Self::builtin(BuiltinTool::WebSearch, BuiltinPhase::Searching)
            }
            "response.web_search_call.completed" => {
                Self::builtin(BuiltinTool::WebSearch, BuiltinPhase::Completed)
            }
            "response.code_interpreter_call.in_progress" => {
                Self::builtin(BuiltinTool::CodeInterpreter, BuiltinPhase::InProgress)
            }
            "response.code_interpreter_call.completed" => {
                Self::builtin(BuiltinTool::CodeInterpreter, BuiltinPhase::Completed)
            }
            "response.completed" => Self::Completed,
            "response.failed" => Self::Failed,
            "error" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }

    fn builtin(tool: BuiltinTool, phase: BuiltinPhase) -> Self {
        Self::BuiltinCall { tool, phase }
    }
}

/// A decoded event: its kind plus the untouched field map.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub kind: EventKind,
    pub raw: Map<String, Value>,
}

impl Envelope {
    /// `None` when the payload is not a JSON object.
    pub fn decode(payload: &str) -> Option<Self> {
        let raw = match serde_json::from_str::<Value>(payload).ok()? {
            Value::Object(map) => map,
            _ => return None,
        };
        let kind = EventKind::parse(str_field(&raw, "type").unwrap_or_default());
        Some(Self { kind, raw })
    }

    /// `delta` as text or `{text}`, else a flat `text` field.
    pub fn delta_text(&self) -> &str {
        match self.raw.get("delta") {
            None | Some(Value::Null) => str_field(&self.raw, "text").unwrap_or_default(),
            Some(Value::String(s)) => s.as_str(),
            Some(Value::Object(obj)) => str_field(obj, "text").unwrap_or_default(),
            Some(_) => "",
        }
    }

    /// Concatenated `output_text` parts of the embedded response snapshot.
    pub fn response_text(&self) -> String {
        self.raw
            .get("response")
            .and_then(|r| r.get("output"))
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get("content").and_then(Value::as_array))
                    .map(|content| output_text(content))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Text of `part` when it is an `output_text` part.
    pub fn content_part_text(&self) -> &str {
        let Some(part) = self.raw.get("part").and_then(Value::as_object) else {
            return "";
        };
        if str_field(part, "type") != Some("output_text") {
            return "";
        }
        str_field(part, "text")
            .or_else(|| str_field(part, "delta"))
            .unwrap_or_default()
    }

    /// Text of `item` when it is a plain message.
    pub fn output_item_text(&self) -> String {
        let Some(item) = self.raw.get("item").and_then(Value::as_object) else {
            return String::new();
        };
        if str_field(item, "type") != Some("message") {
            return String::new();
        }
        item.get("content")
            .and_then(Value::as_array)
            .map(|content| output_text(content))
            .unwrap_or_default()
    }

    pub fn error_message(&self) -> String {
        self.raw
            .get("error")
            .and_then(Value::as_object)
            .and_then(|e| str_field(e, "message"))
            .or_else(|| str_field(&self.raw, "message"))
            .filter(|m| !m.is_empty())
            .unwrap_or("unknown error")
            .to_string()
    }
}

pub(crate) fn str_field<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key).and_then(Value::as_str)
}

fn output_text(content: &[Value]) -> String {
    content
        .iter()
        .filter(|part| part.get("type").and_then(Value::as_str) == Some("output_text"))
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect()
}

/// Text received so far for one response.
#[derive(Debug, Default)]
pub struct ContentAccumulator {
    text: String,
    has_delta: bool,
}

impl ContentAccumulator {
    /// Append a non-empty increment and return it.
    fn append(&mut self, delta: &str) -> Option<String> {
        if delta.is_empty() {
            return None;
        }
        self.has_delta = true;
        self.text.push_str(delta);
        Some(delta.to_string())
    }

    pub fn has_delta(&self) -> bool {
        self.has_delta
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

/// What one frame produced.
#[derive(Debug, Default, PartialEq)]
pub struct Step {
    pub delta: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub done: bool,
}

/// Folds upstream frames into text and tool-call notifications.
#[derive(Debug, Default)]
pub struct EventInterpreter {
    content: ContentAccumulator,
    calls: FunctionCallState,
}

impl EventInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle one frame payload. Undecodable payloads yield an empty step;
    /// failure events are the only source of errors.
    pub fn handle(&mut self, payload: &str) -> Result<Step> {
        let Some(envelope) = Envelope::decode(payload) else {
            tracing::debug!(len = payload.len(), "skipping non-JSON frame");
            return Ok(Step::default());
        };

        let mut step = Step {
            tool_calls: self.calls.extract(&envelope.kind, &envelope.raw),
            ..Step::default()
        };
        let seen_delta = self.content.has_delta();

        let text = match &envelope.kind {
            EventKind::OutputTextDelta => envelope.delta_text().to_string(),
            EventKind::OutputTextDone if !seen_delta => {
                match envelope.delta_text() {
                    "" => envelope.response_text(),
                    delta => delta.to_string(),
                }
            }
            EventKind::ContentPartAdded => envelope.content_part_text().to_string(),
            EventKind::ContentPartDone if !seen_delta => match envelope.content_part_text() {
                "" => envelope.response_text(),
                part => part.to_string(),
            },
            EventKind::OutputItemDone if !seen_delta => envelope.output_item_text(),
            EventKind::Created if !seen_delta => envelope.response_text(),
            EventKind::Completed => {
                step.done = true;
                if seen_delta {
                    String::new()
                } else {
                    envelope.response_text()
                }
            }
            EventKind::Failed | EventKind::Error => {
                return Err(GatewayError::backend_event(envelope.error_message()));
            }
            _ => String::new(),
        };

        step.delta = self.content.append(&text);
        Ok(step)
    }

    pub fn content(&self) -> &ContentAccumulator {
        &self.content
    }

    pub fn into_text(self) -> String {
        self.content.into_text()
    }
}
