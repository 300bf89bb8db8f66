//! Outbound request body for the responses endpoint.

use serde::{Deserialize, Serialize};

use super::reasoning::normalize_reasoning_effort;
use super::tools::ToolDefinition;
use crate::error::{GatewayError, Result};

pub const DEFAULT_INSTRUCTIONS: &str = "You are a helpful assistant.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// A function call previously made by the assistant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Protocol-neutral conversation message produced by the inbound converters.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub tool_calls: Vec<MessageToolCall>,
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<MessageToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::new(Role::Assistant, content)
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::new(Role::Tool, content)
        }
    }
}

/// One element of the upstream `input` array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestItem {
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub role: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub call_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub arguments: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,
}

impl RequestItem {
    pub fn message(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            item_type: "message".to_string(),
            role: role.into(),
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn function_call(call_id: &str, name: &str, arguments: &str) -> Self {
        Self {
            item_type: "function_call".to_string(),
            call_id: call_id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
            ..Self::default()
        }
    }

    pub fn function_call_output(call_id: &str, output: &str) -> Self {
        Self {
            item_type: "function_call_output".to_string(),
            call_id: call_id.to_string(),
            output: output.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reasoning {
    pub effort: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestPayload {
    pub model: String,
    pub input: Vec<RequestItem>,
    pub instructions: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<Reasoning>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    pub store: bool,
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
}

impl RequestPayload {
    /// Assemble a payload around pre-built items. Blank instructions fall back
    /// to the default and placeholder efforts are dropped.
    pub fn new(
        model: impl Into<String>,
        input: Vec<RequestItem>,
        instructions: &str,
        reasoning_effort: Option<&str>,
    ) -> Self {
        let instructions = match instructions.trim() {
            "" => DEFAULT_INSTRUCTIONS.to_string(),
            text => text.to_string(),
        };
        let reasoning = reasoning_effort
            .map(normalize_reasoning_effort)
            .filter(|effort| !effort.is_empty())
            .map(|effort| Reasoning { effort });
        Self {
            model: model.into(),
            input,
            instructions,
            reasoning,
            tools: Vec::new(),
            store: false,
            stream: true,
            temperature: None,
            top_p: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_sampling(mut self, temperature: Option<f32>, top_p: Option<f32>) -> Self {
        self.temperature = temperature;
        self.top_p = top_p;
        self
    }

    pub fn reasoning_effort(&self) -> Option<&str> {
        self.reasoning.as_ref().map(|r| r.effort.trim())
    }
}

/// Per-request settings that are not part of the conversation itself.
#[derive(Debug, Clone, Default)]
pub struct PayloadOptions {
    pub model: String,
    pub instructions: Option<String>,
    pub reasoning_effort: Option<String>,
    pub tools: Vec<ToolDefinition>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
}

/// Build the upstream body from a neutral message list.
///
/// System messages fold into `instructions`; tool results whose id and
/// output look swapped are put back in order.
pub fn build_payload(messages: &[ChatMessage], options: PayloadOptions) -> Result<RequestPayload> {
    let mut instructions = options
        .instructions
        .as_deref()
        .map(str::trim)
        .unwrap_or_default()
        .to_string();
    let mut items = Vec::with_capacity(messages.len());

    for msg in messages {
        match msg.role {
            Role::Tool => {
                let raw_id = msg.tool_call_id.as_deref().unwrap_or_default();
                if raw_id.is_empty() || msg.content.is_empty() {
                    continue;
                }
                let (call_id, output) = if should_swap_tool_output(raw_id, &msg.content) {
                    (msg.content.trim(), raw_id)
                } else {
                    (raw_id.trim(), msg.content.as_str())
                };
                if call_id.is_empty() {
                    continue;
                }
                items.push(RequestItem::function_call_output(call_id, output));
            }
            Role::System => {
                if msg.content.is_empty() {
                    continue;
                }
                if instructions.is_empty() {
                    instructions = msg.content.clone();
                } else {
                    instructions.push_str("\n\n");
                    instructions.push_str(&msg.content);
                }
            }
            Role::User | Role::Assistant => {
                if !msg.content.is_empty() {
                    items.push(RequestItem::message(msg.role.as_str(), msg.content.as_str()));
                }
                for call in &msg.tool_calls {
                    let call_id = call.id.trim();
                    if call_id.is_empty() {
                        continue;
                    }
                    items.push(RequestItem::function_call(
                        call_id,
                        call.name.trim(),
                        &call.arguments,
                    ));
                }
            }
        }
    }

    if items.is_empty() {
        return Err(GatewayError::invalid_request("no valid messages to send"));
    }

    Ok(RequestPayload::new(
        options.model,
        items,
        &instructions,
        options.reasoning_effort.as_deref(),
    )
    .with_tools(options.tools)
    .with_sampling(options.temperature, options.top_p))
}

fn should_swap_tool_output(call_id: &str, output: &str) -> bool {
    !looks_like_call_id(call_id) && looks_like_call_id(output)
}

/// Upstream call ids are short, whitespace-free and prefixed `call_` or `fc_`.
pub fn looks_like_call_id(value: &str) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.len() > 64 {
        return false;
    }
    if trimmed.contains([' ', '\t', '\r', '\n']) {
        return false;
    }
    trimmed.starts_with("call_") || trimmed.starts_with("fc_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options() -> PayloadOptions {
        PayloadOptions {
            model: "gpt-5.1-codex".to_string(),
            ..PayloadOptions::default()
        }
    }

    #[test]
    fn test_system_messages_merge_into_instructions() {
        let payload = build_payload(
            &[
                ChatMessage::system("be brief"),
                ChatMessage::user("hi"),
                ChatMessage::system("no emoji"),
            ],
            PayloadOptions {
                instructions: Some("  base  ".to_string()),
                ..options()
            },
        )
        .unwrap();
        assert_eq!(payload.instructions, "base\n\nbe brief\n\nno emoji");
        assert_eq!(payload.input, vec![RequestItem::message("user", "hi")]);
    }

    #[test]
    fn test_default_instructions_and_flags() {
        let payload = build_payload(&[ChatMessage::user("hi")], options()).unwrap();
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            value,
            json!({
                "model": "gpt-5.1-codex",
                "input": [{"type":"message","role":"user","content":"hi"}],
                "instructions": DEFAULT_INSTRUCTIONS,
                "store": false,
                "stream": true
            })
        );
    }

    #[test]
    fn test_reasoning_effort_placeholders_are_dropped() {
        let payload = build_payload(
            &[ChatMessage::user("hi")],
            PayloadOptions {
                reasoning_effort: Some("[undefined]".to_string()),
                ..options()
            },
        )
        .unwrap();
        assert!(payload.reasoning.is_none());

        let payload = build_payload(
            &[ChatMessage::user("hi")],
            PayloadOptions {
                reasoning_effort: Some(" xhigh ".to_string()),
                ..options()
            },
        )
        .unwrap();
        assert_eq!(payload.reasoning_effort(), Some("xhigh"));
    }

    #[test]
    fn test_assistant_tool_calls_and_results() {
        let payload = build_payload(
            &[
                ChatMessage::user("weather?"),
                ChatMessage::assistant(
                    "",
                    vec![
                        MessageToolCall {
                            id: " call_1 ".to_string(),
                            name: "weather".to_string(),
                            arguments: r#"{"city":"Oslo"}"#.to_string(),
                        },
                        MessageToolCall::default(),
                    ],
                ),
                ChatMessage::tool_result("call_1", "sunny"),
                ChatMessage::tool_result("", "orphan"),
                ChatMessage::tool_result("call_2", ""),
            ],
            options(),
        )
        .unwrap();
        assert_eq!(
            payload.input,
            vec![
                RequestItem::message("user", "weather?"),
                RequestItem::function_call("call_1", "weather", r#"{"city":"Oslo"}"#),
                RequestItem::function_call_output("call_1", "sunny"),
            ]
        );
    }

    #[test]
    fn test_swapped_tool_output_is_repaired() {
        let payload = build_payload(
            &[ChatMessage::tool_result("the result", " call_abc ")],
            options(),
        )
        .unwrap();
        assert_eq!(
            payload.input,
            vec![RequestItem::function_call_output("call_abc", "the result")]
        );
    }

    #[test]
    fn test_empty_conversation_is_rejected() {
        let err = build_payload(&[ChatMessage::system("only system")], options()).unwrap_err();
        assert_eq!(err.to_string(), "no valid messages to send");
    }

    #[test]
    fn test_looks_like_call_id() {
        assert!(looks_like_call_id("call_123"));
        assert!(looks_like_call_id(" fc_abc "));
        assert!(!looks_like_call_id("toolu_1"));
        assert!(!looks_like_call_id("call_ with space"));
        assert!(!looks_like_call_id(&format!("call_{}", "x".repeat(64))));
    }
}
