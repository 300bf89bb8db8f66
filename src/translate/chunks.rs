//! Chat-completion chunk construction for protocol A streams.

use std::collections::HashMap;

use super::openai_types::{
    ChatCompletionChunk, ChatCompletionResponse, ChatToolCall, ChatToolCallFunction, ChatUsage,
    Choice, ChoiceMessage, ChunkChoice, ChunkDelta, ChunkToolCall,
};
use super::tool_args::ArgumentGate;
use crate::backend::ToolCall;

/// Literal sent as the last `data:` line of a chat stream.
pub const DONE: &str = "[DONE]";

pub fn new_chat_id() -> String {
    let id = uuid::Uuid::new_v4().to_string();
    format!("chatcmpl-{}", &id[..8])
}

/// Turns upstream text and tool-call notifications into chat chunks.
///
/// Tool calls get a stable `index` in first-seen order; repeated reports of
/// the same arguments are suppressed by the [`ArgumentGate`].
#[derive(Debug)]
pub struct ChunkTranslator {
    id: String,
    model: String,
    system_fingerprint: String,
    created: i64,
    indexes: HashMap<String, usize>,
    gate: ArgumentGate,
    emitted_tool_calls: usize,
}

impl ChunkTranslator {
    pub fn new(
        id: impl Into<String>,
        model: impl Into<String>,
        system_fingerprint: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            system_fingerprint: system_fingerprint.into(),
            created: chrono::Utc::now().timestamp(),
            indexes: HashMap::new(),
            gate: ArgumentGate::default(),
            emitted_tool_calls: 0,
        }
    }

    fn chunk(&self, delta: ChunkDelta, finish_reason: Option<String>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            system_fingerprint: self.system_fingerprint.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
        }
    }

    /// Content chunk for a text increment; `None` for empty text.
    pub fn text(&self, text: &str) -> Option<ChatCompletionChunk> {
        if text.is_empty() {
            return None;
        }
        Some(self.chunk(
            ChunkDelta {
                role: Some("assistant".to_string()),
                content: Some(text.to_string()),
                tool_calls: None,
            },
            None,
        ))
    }

    /// Index for `id`, allocating the next one on first sight.
    fn index_for(&mut self, id: &str) -> usize {
        let next = self.indexes.len();
        *self.indexes.entry(id.to_string()).or_insert(next)
    }

    /// Gate a call and return it with its allocated index and final
    /// arguments. Calls without an id are named `call_<n>`.
    fn admit(&mut self, mut call: ToolCall) -> Option<(usize, ToolCall)> {
        if call.id.trim().is_empty() {
            call.id = format!("call_{}", self.indexes.len());
        }
        // allocated even when the arguments are held back
        let index = self.index_for(&call.id);
        call.arguments = self.gate.admit(&call)?;
        self.emitted_tool_calls += 1;
        Some((index, call))
    }

    /// One chunk per call that passes the gate.
    pub fn tool_calls(&mut self, calls: Vec<ToolCall>) -> Vec<ChatCompletionChunk> {
        let mut chunks = Vec::new();
        for call in calls {
            let Some((index, call)) = self.admit(call) else {
                continue;
            };
            let delta = ChunkDelta {
                role: None,
                content: None,
                tool_calls: Some(vec![ChunkToolCall {
                    index,
                    function: function_for(&call.name, &call.arguments),
                    id: call.id,
                    call_type: "function".to_string(),
                }]),
            };
            chunks.push(self.chunk(delta, None));
        }
        chunks
    }

    pub fn finish_reason(&self) -> &'static str {
        if self.emitted_tool_calls > 0 {
            "tool_calls"
        } else {
            "stop"
        }
    }

    /// Final chunk carrying the finish reason.
    pub fn finish(&self) -> ChatCompletionChunk {
        self.chunk(
            ChunkDelta {
                role: Some("assistant".to_string()),
                content: None,
                tool_calls: None,
            },
            Some(self.finish_reason().to_string()),
        )
    }

    /// Whole-response form used when the client did not ask to stream.
    pub fn completion(&mut self, text: String, calls: Vec<ToolCall>) -> ChatCompletionResponse {
        let mut tool_calls: Vec<ChatToolCall> = Vec::new();
        for (_, call) in calls.into_iter().filter_map(|call| self.admit(call)) {
            let function = function_for(&call.name, &call.arguments);
            // a later, changed report replaces the earlier one
            match tool_calls.iter_mut().find(|tc| tc.id == call.id) {
                Some(existing) => existing.function = function,
                None => tool_calls.push(ChatToolCall {
                    id: call.id,
                    call_type: "function".to_string(),
                    function,
                }),
            }
        }

        ChatCompletionResponse {
            id: self.id.clone(),
            object: "chat.completion".to_string(),
            created: self.created,
            model: self.model.clone(),
            system_fingerprint: self.system_fingerprint.clone(),
            choices: vec![Choice {
                index: 0,
                message: ChoiceMessage {
                    role: "assistant".to_string(),
                    content: text,
                    tool_calls,
                },
                finish_reason: Some(self.finish_reason().to_string()),
            }],
            usage: ChatUsage::default(),
        }
    }
}

fn function_for(name: &str, arguments: &str) -> ChatToolCallFunction {
    let name = match name.trim() {
        "" => "native",
        name => name,
    };
    let arguments = match arguments.trim() {
        "" => "{}",
        _ => arguments,
    };
    ChatToolCallFunction {
        name: name.to_string(),
        arguments: arguments.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CallStatus;

    fn translator() -> ChunkTranslator {
        ChunkTranslator::new("chatcmpl-test", "chatgpt/codex/gpt-5.1", "fp_test")
    }

    fn call(id: &str, name: &str, args: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments: args.to_string(),
            status: CallStatus::Completed,
        }
    }

    #[test]
    fn test_chat_id_shape() {
        let id = new_chat_id();
        assert!(id.starts_with("chatcmpl-"));
        assert_eq!(id.len(), "chatcmpl-".len() + 8);
    }

    #[test]
    fn test_text_chunks() {
        let t = translator();
        let chunks: Vec<ChatCompletionChunk> =
            ["hel", "", "lo"].into_iter().filter_map(|s| t.text(s)).collect();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].choices[0].delta.content.as_deref(), Some("hel"));
        assert_eq!(chunks[1].choices[0].delta.content.as_deref(), Some("lo"));
        assert_eq!(chunks[0].choices[0].delta.role.as_deref(), Some("assistant"));
        assert_eq!(chunks[0].object, "chat.completion.chunk");
        assert_eq!(chunks[0].system_fingerprint, "fp_test");
        assert!(chunks[0].choices[0].finish_reason.is_none());
    }

    #[test]
    fn test_tool_call_indexes_and_dedupe() {
        let mut t = translator();
        let chunks = t.tool_calls(vec![
            call("call_a", "lookup", r#"{"q":"x","n":1}"#),
            call("call_b", "", ""),
            call("call_a", "lookup", r#"{"n":1,"q":"x"}"#),
        ]);
        assert_eq!(chunks.len(), 2);

        let first = &chunks[0].choices[0].delta.tool_calls.as_ref().unwrap()[0];
        assert_eq!(first.index, 0);
        assert_eq!(first.id, "call_a");
        assert_eq!(first.function.arguments, r#"{"n":1,"q":"x"}"#);
        assert!(chunks[0].choices[0].delta.role.is_none());

        let second = &chunks[1].choices[0].delta.tool_calls.as_ref().unwrap()[0];
        assert_eq!(second.index, 1);
        assert_eq!(second.function.name, "native");
        assert_eq!(second.function.arguments, "{}");
    }

    #[test]
    fn test_missing_id_gets_positional_name() {
        let mut t = translator();
        let mut held = call("call_x", "Task", "{}");
        held.status = CallStatus::InProgress;
        assert!(t.tool_calls(vec![held]).is_empty());

        let chunks = t.tool_calls(vec![call("", "f", r#"{"a":1}"#)]);
        let tc = &chunks[0].choices[0].delta.tool_calls.as_ref().unwrap()[0];
        assert_eq!(tc.id, "call_1");
        assert_eq!(tc.index, 1);
    }

    #[test]
    fn test_finish_reason() {
        let mut t = translator();
        assert_eq!(t.finish().choices[0].finish_reason.as_deref(), Some("stop"));
        t.tool_calls(vec![call("call_a", "f", "{}")]);
        let finish = t.finish();
        assert_eq!(finish.choices[0].finish_reason.as_deref(), Some("tool_calls"));
        assert!(finish.choices[0].delta.content.is_none());
    }

    #[test]
    fn test_completion_collects_calls() {
        let mut t = translator();
        let response = t.completion(
            "hello".to_string(),
            vec![
                call("call_a", "f", r#"{"a":1}"#),
                call("call_a", "f", r#"{"a":1}"#),
                call("call_a", "f", r#"{"a":2}"#),
            ],
        );
        let choice = &response.choices[0];
        assert_eq!(response.object, "chat.completion");
        assert_eq!(choice.message.content, "hello");
        assert_eq!(choice.message.tool_calls.len(), 1);
        assert_eq!(choice.message.tool_calls[0].function.arguments, r#"{"a":2}"#);
        assert_eq!(choice.finish_reason.as_deref(), Some("tool_calls"));

        let plain = translator().completion("hi".to_string(), Vec::new());
        assert_eq!(plain.choices[0].finish_reason.as_deref(), Some("stop"));
        assert!(plain.choices[0].message.tool_calls.is_empty());
    }
}
