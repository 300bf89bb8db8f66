//! Inbound request conversion.
//!
//! Chat-completions and Messages requests are validated and flattened into
//! the protocol-neutral [`ChatMessage`] list the upstream payload is built
//! from. A single Anthropic message can expand into several neutral messages
//! (a user turn carrying `tool_result` blocks becomes separate tool results).

use serde_json::Value;
use std::collections::HashSet;

use super::anthropic_types::{ContentBlock, CountTokensRequest, Message, MessagesRequest, Tool};
use super::openai_types::{self, ChatCompletionRequest};
use super::stop::normalize_stop_sequences;
use crate::backend::tools::FunctionSpec;
use crate::backend::{ChatMessage, MessageToolCall};
use crate::error::{GatewayError, Result};
use crate::models::ModelCatalog;

fn unsupported_content() -> GatewayError {
    GatewayError::invalid_request("unsupported message content")
}

// ---------------------------------------------------------------------------
// OpenAI-style content
// ---------------------------------------------------------------------------

/// Flatten chat/responses content: a string, or the text of `text` and
/// `input_text` parts. Part text may be a string or `{"value": ...}`.
pub fn content_to_text(content: &Value) -> Result<String> {
    let parts = match content {
        Value::Null => return Ok(String::new()),
        Value::String(text) => return Ok(text.clone()),
        Value::Array(parts) => parts,
        _ => return Err(unsupported_content()),
    };

    let mut text = String::new();
    for part in parts.iter().filter_map(Value::as_object) {
        let part_type = part.get("type").and_then(Value::as_str).unwrap_or_default();
        if part_type != "text" && part_type != "input_text" {
            continue;
        }
        match part.get("text") {
            Some(Value::String(s)) => text.push_str(s),
            Some(Value::Object(obj)) => {
                if let Some(value) = obj.get("value").and_then(Value::as_str) {
                    text.push_str(value);
                }
            }
            _ => {}
        }
    }
    Ok(text)
}

/// Convert chat-completions messages into neutral messages.
pub fn openai_messages(messages: &[openai_types::ChatMessage]) -> Result<Vec<ChatMessage>> {
    if messages.is_empty() {
        return Err(GatewayError::invalid_request("messages is required"));
    }

    let mut result = Vec::with_capacity(messages.len());
    for msg in messages {
        let role = msg.role.trim();
        if role.is_empty() {
            return Err(GatewayError::invalid_request("message role is required"));
        }
        let content = content_to_text(&msg.content)?;

        match role {
            "system" => result.push(ChatMessage::system(content)),
            "user" => result.push(ChatMessage::user(content)),
            "assistant" => {
                let calls: Vec<MessageToolCall> = msg
                    .tool_calls
                    .iter()
                    .filter(|tc| !tc.id.trim().is_empty())
                    .map(|tc| MessageToolCall {
                        id: tc.id.trim().to_string(),
                        name: tc.function.name.trim().to_string(),
                        arguments: tc.function.arguments.clone(),
                    })
                    .collect();
                if content.is_empty() && calls.is_empty() {
                    continue;
                }
                result.push(ChatMessage::assistant(content, calls));
            }
            "tool" => {
                let call_id = msg.tool_call_id.as_deref().unwrap_or_default();
                if call_id.trim().is_empty() {
                    return Err(GatewayError::invalid_request(
                        "tool message requires tool_call_id",
                    ));
                }
                if content.trim().is_empty() {
                    tracing::debug!(tool_call_id = call_id, "skipping empty tool content");
                    continue;
                }
                result.push(ChatMessage::tool_result(call_id, content));
            }
            other => {
                return Err(GatewayError::invalid_request(format!(
                    "unsupported role: {other}"
                )))
            }
        }
    }

    if result.is_empty() {
        return Err(GatewayError::invalid_request("no valid messages to send"));
    }
    Ok(result)
}

/// Validated chat-completions request.
#[derive(Debug, Clone)]
pub struct ChatPlan {
    /// Upstream model id, namespace stripped.
    pub backend_model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<FunctionSpec>,
}

pub fn plan_chat_request(req: &ChatCompletionRequest, catalog: &ModelCatalog) -> Result<ChatPlan> {
    let model = req.model.trim();
    if model.is_empty() {
        return Err(GatewayError::invalid_request("model is required"));
    }
    if !catalog.is_supported(model) {
        return Err(GatewayError::unsupported_model(model));
    }
    let messages = openai_messages(&req.messages)?;
    Ok(ChatPlan {
        backend_model: catalog.normalize(model).to_string(),
        messages,
        tools: req.tools.iter().map(|t| t.to_spec()).collect(),
    })
}

// ---------------------------------------------------------------------------
// Anthropic-style content
// ---------------------------------------------------------------------------

/// Interpret Messages content as blocks: `null` is empty, a string is one
/// text block, an object is a single block.
pub fn content_blocks(content: &Value) -> Result<Vec<ContentBlock>> {
    match content {
        Value::Null => Ok(Vec::new()),
        Value::String(text) if text.is_empty() => Ok(Vec::new()),
        Value::String(text) => Ok(vec![ContentBlock::text(text.clone())]),
        Value::Object(_) => serde_json::from_value(content.clone())
            .map(|block| vec![block])
            .map_err(|_| unsupported_content()),
        Value::Array(_) => {
            serde_json::from_value(content.clone()).map_err(|_| unsupported_content())
        }
        _ => Err(unsupported_content()),
    }
}

fn blocks_text(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .filter(|b| b.is_text())
        .map(|b| b.text.as_str())
        .collect()
}

/// Text of a `system` field or `tool_result` content.
pub fn block_content_to_text(content: &Value) -> Result<String> {
    match content {
        Value::Null => Ok(String::new()),
        Value::String(text) => Ok(text.clone()),
        Value::Array(_) => serde_json::from_value::<Vec<ContentBlock>>(content.clone())
            .map(|blocks| blocks_text(&blocks))
            .map_err(|_| unsupported_content()),
        Value::Object(obj) => {
            let is_text = obj
                .get("type")
                .and_then(Value::as_str)
                .is_some_and(|t| t.trim().eq_ignore_ascii_case("text"));
            match obj.get("text").and_then(Value::as_str) {
                Some(text) if is_text => Ok(text.to_string()),
                _ => Err(unsupported_content()),
            }
        }
        _ => Err(unsupported_content()),
    }
}

fn push_user_blocks(result: &mut Vec<ChatMessage>, blocks: Vec<ContentBlock>) -> Result<()> {
    let mut text = String::new();
    let flush = |result: &mut Vec<ChatMessage>, text: &mut String| {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            result.push(ChatMessage::user(trimmed));
        }
        text.clear();
    };

    for block in blocks {
        match block.block_type.trim().to_ascii_lowercase().as_str() {
            "" | "text" => text.push_str(&block.text),
            "tool_result" => {
                flush(result, &mut text);
                let tool_use_id = block.tool_use_id.trim();
                if tool_use_id.is_empty() {
                    return Err(GatewayError::invalid_request(
                        "tool_result.tool_use_id is required",
                    ));
                }
                let output = match &block.content {
                    Some(content) => block_content_to_text(content)?,
                    None => String::new(),
                };
                let output = match output.trim() {
                    "" => "{}",
                    trimmed => trimmed,
                };
                result.push(ChatMessage::tool_result(tool_use_id, output));
            }
            // images and other media have no upstream text form
            _ => {}
        }
    }
    flush(result, &mut text);
    Ok(())
}

fn push_assistant_blocks(result: &mut Vec<ChatMessage>, blocks: Vec<ContentBlock>) -> Result<()> {
    let mut text = String::new();
    let mut calls = Vec::new();

    for block in blocks {
        match block.block_type.trim().to_ascii_lowercase().as_str() {
            "" | "text" => text.push_str(&block.text),
            "tool_use" => {
                let id = block.id.trim();
                let name = block.name.trim();
                if id.is_empty() || name.is_empty() {
                    continue;
                }
                let arguments = match &block.input {
                    None | Some(Value::Null) => "{}".to_string(),
                    Some(input) => serde_json::to_string(input)
                        .map_err(|_| GatewayError::invalid_request("invalid tool_use input"))?,
                };
                calls.push(MessageToolCall {
                    id: id.to_string(),
                    name: name.to_string(),
                    arguments,
                });
            }
            _ => {}
        }
    }

    let text = text.trim();
    if text.is_empty() && calls.is_empty() {
        return Ok(());
    }
    result.push(ChatMessage::assistant(text, calls));
    Ok(())
}

/// Convert a Messages conversation (plus its `system` field) into neutral
/// messages.
pub fn claude_messages(system: Option<&Value>, messages: &[Message]) -> Result<Vec<ChatMessage>> {
    let mut result = Vec::with_capacity(messages.len() + 1);

    if let Some(system) = system {
        let text = block_content_to_text(system)?;
        if !text.trim().is_empty() {
            result.push(ChatMessage::system(text));
        }
    }

    for msg in messages {
        let role = msg.role.trim().to_ascii_lowercase();
        if role.is_empty() {
            return Err(GatewayError::invalid_request("message role is required"));
        }
        let blocks = content_blocks(&msg.content)?;
        match role.as_str() {
            "system" => {
                let text = blocks_text(&blocks);
                if !text.trim().is_empty() {
                    result.push(ChatMessage::system(text));
                }
            }
            "user" => push_user_blocks(&mut result, blocks)?,
            "assistant" => push_assistant_blocks(&mut result, blocks)?,
            other => {
                return Err(GatewayError::invalid_request(format!(
                    "unsupported role: {other}"
                )))
            }
        }
    }

    if result.is_empty() {
        return Err(GatewayError::invalid_request("no valid messages to send"));
    }
    Ok(result)
}

/// Messages tools as function specs, de-duplicated by case-insensitive name.
pub fn claude_tools(tools: &[Tool]) -> Result<Vec<FunctionSpec>> {
    let mut seen = HashSet::new();
    let mut specs = Vec::with_capacity(tools.len());
    for tool in tools {
        let name = tool.name.trim();
        if name.is_empty() {
            return Err(GatewayError::invalid_request("tool name is required"));
        }
        if !seen.insert(name.to_ascii_lowercase()) {
            continue;
        }
        specs.push(FunctionSpec::function(
            name,
            tool.description.clone(),
            tool.input_schema.clone(),
        ));
    }
    Ok(specs)
}

/// Apply `tool_choice` to the declared tools.
fn select_tools<'a>(req: &'a MessagesRequest) -> Result<&'a [Tool]> {
    let Some(choice) = &req.tool_choice else {
        return Ok(&req.tools);
    };
    match choice.choice_type.trim().to_ascii_lowercase().as_str() {
        "" | "auto" => Ok(&req.tools),
        "none" => Ok(&[]),
        "any" => {
            if req.tools.is_empty() {
                return Err(GatewayError::invalid_request(
                    "tools is required when tool_choice.type=any",
                ));
            }
            Ok(&req.tools)
        }
        "tool" => {
            let name = choice.name.as_deref().unwrap_or_default().trim();
            if name.is_empty() {
                return Err(GatewayError::invalid_request(
                    "tool_choice.name is required when tool_choice.type=tool",
                ));
            }
            if req.tools.is_empty() {
                return Err(GatewayError::invalid_request(
                    "tools is required when tool_choice.type=tool",
                ));
            }
            // Duplicate names collapse later, so the first match is enough.
            match req
                .tools
                .iter()
                .position(|t| t.name.trim().eq_ignore_ascii_case(name))
            {
                Some(idx) => Ok(&req.tools[idx..=idx]),
                None => Err(GatewayError::invalid_request(
                    "tool_choice.name not found in tools",
                )),
            }
        }
        _ => Err(GatewayError::invalid_request("invalid tool_choice.type")),
    }
}

fn validate_sampling(req: &MessagesRequest) -> Result<()> {
    if req.temperature.is_some() && req.top_p.is_some() {
        return Err(GatewayError::invalid_request(
            "temperature and top_p cannot both be set",
        ));
    }
    if req.temperature.is_some_and(|t| !(0.0..=1.0).contains(&t)) {
        return Err(GatewayError::invalid_request(
            "temperature must be between 0 and 1",
        ));
    }
    if req.top_p.is_some_and(|p| !(0.0..=1.0).contains(&p)) {
        return Err(GatewayError::invalid_request("top_p must be between 0 and 1"));
    }
    if req.top_k.is_some_and(|k| k < 0) {
        return Err(GatewayError::invalid_request("top_k must be >= 0"));
    }
    Ok(())
}

fn resolve_model(model: &str, catalog: &ModelCatalog) -> Result<String> {
    if model.trim().is_empty() {
        return Err(GatewayError::invalid_request("model is required"));
    }
    catalog
        .resolve_claude_model(model)
        .ok_or_else(|| GatewayError::unsupported_model(model.trim()))
}

/// Validated Messages request, ready for the pipeline.
#[derive(Debug, Clone)]
pub struct MessagesPlan {
    pub backend_model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<FunctionSpec>,
    pub stop_sequences: Vec<String>,
    pub max_tokens: u64,
    pub disable_parallel_tool_use: bool,
    pub input_tokens: u64,
}

pub fn plan_messages_request(
    req: &MessagesRequest,
    catalog: &ModelCatalog,
) -> Result<MessagesPlan> {
    if req.model.trim().is_empty() {
        return Err(GatewayError::invalid_request("model is required"));
    }
    if req.max_tokens <= 0 {
        return Err(GatewayError::invalid_request("max_tokens is required"));
    }
    if req.messages.is_empty() {
        return Err(GatewayError::invalid_request("messages is required"));
    }
    validate_sampling(req)?;
    let stop_sequences = normalize_stop_sequences(&req.stop_sequences);
    let selected = select_tools(req)?;
    let backend_model = resolve_model(&req.model, catalog)?;
    let tools = claude_tools(selected)?;
    let messages = claude_messages(req.system.as_ref(), &req.messages)?;
    let input_tokens = estimate_input_tokens(&messages, &tools);

    Ok(MessagesPlan {
        backend_model,
        messages,
        tools,
        stop_sequences,
        max_tokens: req.max_tokens.unsigned_abs(),
        disable_parallel_tool_use: req
            .tool_choice
            .as_ref()
            .is_some_and(|c| c.disable_parallel_tool_use),
        input_tokens,
    })
}

/// Validate a `count_tokens` body and estimate its input size.
pub fn count_input_tokens(req: &CountTokensRequest, catalog: &ModelCatalog) -> Result<u64> {
    if req.model.trim().is_empty() {
        return Err(GatewayError::invalid_request("model is required"));
    }
    if req.messages.is_empty() {
        return Err(GatewayError::invalid_request("messages is required"));
    }
    resolve_model(&req.model, catalog)?;
    let tools = claude_tools(&req.tools)?;
    let messages = claude_messages(req.system.as_ref(), &req.messages)?;
    Ok(estimate_input_tokens(&messages, &tools))
}

// ---------------------------------------------------------------------------
// Token estimates
// ---------------------------------------------------------------------------

/// ceil(chars / 4), never below 1.
pub fn tokens_from_chars(chars: usize) -> u64 {
    (chars.div_ceil(4) as u64).max(1)
}

pub fn estimate_input_tokens(messages: &[ChatMessage], tools: &[FunctionSpec]) -> u64 {
    let message_chars: usize = messages
        .iter()
        .map(|msg| {
            msg.content.len()
                + msg.tool_call_id.as_deref().map_or(0, str::len)
                + msg.role.as_str().len()
                + msg
                    .tool_calls
                    .iter()
                    .map(|tc| tc.id.len() + tc.name.len() + tc.arguments.len())
                    .sum::<usize>()
        })
        .sum();
    let tool_chars: usize = tools
        .iter()
        .map(|tool| {
            let params = serde_json::to_string(tool.parameters.as_ref().unwrap_or(&Value::Null))
                .map_or(0, |s| s.len());
            tool.kind.len()
                + tool.name.len()
                + tool.description.as_deref().map_or(0, str::len)
                + params
        })
        .sum();
    tokens_from_chars(message_chars + tool_chars)
}
