//! `/v1/responses` passthrough: request shaping on the way in, event
//! re-emission and completed-response capture on the way out.

use serde_json::Value;

use super::openai_types::ResponsesRequest;
use super::request::content_to_text;
use crate::backend::events::{str_field, Envelope, EventKind};
use crate::backend::payload::RequestItem;
use crate::backend::reasoning::{normalize_placeholder, normalize_reasoning_effort};
use crate::backend::tools::{tool_definitions, FunctionSpec};
use crate::backend::RequestPayload;
use crate::error::{GatewayError, Result};
use crate::models::ModelCatalog;

/// Join two instruction blocks with a blank line, skipping blank ones.
pub fn merge_instructions(first: &str, second: &str) -> String {
    match (first.trim(), second.trim()) {
        ("", b) => b.to_string(),
        (a, "") => a.to_string(),
        (a, b) => format!("{a}\n\n{b}"),
    }
}

fn input_required() -> GatewayError {
    GatewayError::invalid_request("input is required")
}

/// Split `input` into upstream message items and the instructions carried
/// by `system`/`developer` messages.
pub fn parse_responses_input(input: &Value) -> Result<(Vec<RequestItem>, String)> {
    let messages = match input {
        Value::Null => return Err(input_required()),
        Value::String(text) => {
            let text = text.trim();
            if text.is_empty() {
                return Err(input_required());
            }
            return Ok((vec![RequestItem::message("user", text)], String::new()));
        }
        Value::Array(messages) if messages.is_empty() => return Err(input_required()),
        Value::Array(messages) => messages,
        _ => return Err(GatewayError::invalid_request("unsupported input type")),
    };

    let mut items = Vec::with_capacity(messages.len());
    let mut system = String::new();
    for message in messages {
        let role = message
            .get("role")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();
        if role.is_empty() {
            return Err(GatewayError::invalid_request("message role is required"));
        }
        let content = content_to_text(message.get("content").unwrap_or(&Value::Null))?;
        let content = content.trim();
        if content.is_empty() {
            continue;
        }
        match role {
            "system" | "developer" => system = merge_instructions(&system, content),
            _ => items.push(RequestItem::message(role, content)),
        }
    }

    if items.is_empty() {
        return Err(GatewayError::invalid_request(
            "no valid input messages to send",
        ));
    }
    Ok((items, system))
}

/// Settings used when the request leaves a field unset.
#[derive(Debug, Clone, Default)]
pub struct ResponsesDefaults {
    pub instructions: Option<String>,
    pub reasoning_effort: Option<String>,
}

/// Validate a passthrough request and build the upstream payload.
pub fn plan_responses_request(
    req: &ResponsesRequest,
    catalog: &ModelCatalog,
    defaults: &ResponsesDefaults,
) -> Result<RequestPayload> {
    let model = req.model.trim();
    if model.is_empty() {
        return Err(GatewayError::invalid_request("model is required"));
    }
    if !catalog.is_supported(model) {
        return Err(GatewayError::unsupported_model(model));
    }
    let (items, system) = parse_responses_input(&req.input)?;

    let requested = normalize_placeholder(req.instructions.as_deref().unwrap_or_default());
    let mut instructions = merge_instructions(&requested, &normalize_placeholder(&system));
    if instructions.is_empty() {
        instructions = defaults.instructions.clone().unwrap_or_default();
    }

    let mut effort = req
        .reasoning
        .as_ref()
        .and_then(|r| r.effort.as_deref())
        .map(normalize_reasoning_effort)
        .unwrap_or_default();
    if effort.is_empty() {
        effort = defaults.reasoning_effort.clone().unwrap_or_default();
    }

    let specs: Vec<FunctionSpec> = req.tools.iter().map(|t| t.to_spec()).collect();
    Ok(RequestPayload::new(
        catalog.normalize(model),
        items,
        &instructions,
        Some(effort.as_str()),
    )
    .with_tools(tool_definitions(&specs)))
}

/// Event name to re-emit a frame under, or `None` for frames that are not
/// typed JSON objects.
pub fn passthrough_event_name(frame: &str) -> Option<String> {
    let envelope = Envelope::decode(frame)?;
    let name = str_field(&envelope.raw, "type")?.trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Watches frames for the first `response.completed` snapshot.
#[derive(Debug, Default)]
pub struct CompletedCapture {
    response: Option<Value>,
}

impl CompletedCapture {
    /// Inspect one frame. Returns `true` once the snapshot is captured;
    /// in-band failures become errors.
    pub fn observe(&mut self, frame: &str) -> Result<bool> {
        if self.response.is_some() {
            return Ok(true);
        }
        let Some(mut envelope) = Envelope::decode(frame) else {
            return Ok(false);
        };
        match envelope.kind {
            EventKind::Completed => match envelope.raw.remove("response") {
                None | Some(Value::Null) => Err(GatewayError::backend_event(
                    "response.completed without response field",
                )),
                Some(response) => {
                    self.response = Some(response);
                    Ok(true)
                }
            },
            EventKind::Failed | EventKind::Error => {
                Err(GatewayError::backend_event(envelope.error_message()))
            }
            _ => Ok(false),
        }
    }

    pub fn into_response(self) -> Result<Value> {
        self.response.ok_or_else(|| {
            GatewayError::backend_event("missing response.completed.response from backend stream")
        })
    }
}

/// Status and message for a passthrough failure. Upstream rejections keep
/// their status unless it is a server error, which becomes 502.
pub fn passthrough_error(err: &GatewayError) -> (u16, String) {
    match err {
        GatewayError::BackendStatus { status, message } => {
            let status = if *status >= 500 { 502 } else { *status };
            let message = match message.trim() {
                "" => "backend request failed".to_string(),
                m => m.to_string(),
            };
            (status, message)
        }
        other => (other.http_status(), other.client_message()),
    }
}
