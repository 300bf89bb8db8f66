//! State machine for translating upstream text and tool calls into Anthropic
//! SSE events.
//!
//! The [`MessageStreamTranslator`] is fed text increments and tool-call
//! batches in arrival order and returns the Anthropic events (`message_start`,
//! `content_block_delta`, ...) to send for each. Text passes through a
//! [`StopScanner`]; once it reports a stop the caller is expected to cancel
//! the upstream read.

use serde_json::{json, Map, Value};

use super::anthropic_types::{
    Delta, DeltaUsage, MessageDeltaBody, MessagesResponse, ResponseContentBlock, StreamEvent, Usage,
};
use super::request::tokens_from_chars;
use super::stop::{limit_text, StopReason, StopScanner};
use super::tool_args::ArgumentGate;
use crate::backend::ToolCall;

/// Options taken from the validated request.
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    pub stop_sequences: Vec<String>,
    pub max_tokens: u64,
    pub disable_parallel_tool_use: bool,
}

/// Usage:
///   let mut translator = MessageStreamTranslator::new("sonnet", input_tokens, options);
///   send(translator.start());
///   for item in upstream {
///       send(translator.text(&delta));   // or translator.tool_calls(calls)
///       if translator.is_stopped() { cancel upstream; break }
///   }
///   send(translator.finish());
#[derive(Debug)]
pub struct MessageStreamTranslator {
    model: String,
    msg_id: String,
    input_tokens: u64,
    scanner: StopScanner,
    gate: ArgumentGate,
    disable_parallel_tool_use: bool,
    next_index: usize,
    /// Index of the open text block, if any.
    text_block: Option<usize>,
    emitted_block: bool,
    emitted_tool_use: bool,
    finished: bool,
}

impl MessageStreamTranslator {
    pub fn new(model: &str, input_tokens: u64, options: StreamOptions) -> Self {
        Self {
            model: model.to_string(),
            msg_id: super::anthropic_types::new_message_id(),
            input_tokens,
            scanner: StopScanner::new(options.stop_sequences, options.max_tokens),
            gate: ArgumentGate::default(),
            disable_parallel_tool_use: options.disable_parallel_tool_use,
            next_index: 0,
            text_block: None,
            emitted_block: false,
            emitted_tool_use: false,
            finished: false,
        }
    }

    /// `message_start`, sent before any upstream output.
    pub fn start(&self) -> StreamEvent {
        StreamEvent::MessageStart {
            message: MessagesResponse {
                id: self.msg_id.clone(),
                usage: Usage {
                    input_tokens: self.input_tokens,
                    output_tokens: 0,
                },
                ..MessagesResponse::new(self.model.clone(), Vec::new(), Usage::default())
            },
        }
    }

    /// Whether a stop sequence or the token budget cut the output.
    pub fn is_stopped(&self) -> bool {
        self.scanner.is_stopped()
    }

    fn emit_text(&mut self, text: String, events: &mut Vec<StreamEvent>) {
        if text.is_empty() {
            return;
        }
        let index = match self.text_block {
            Some(index) => index,
            None => {
                let index = self.open_block();
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: ResponseContentBlock::Text {
                        text: String::new(),
                    },
                });
                self.text_block = Some(index);
                index
            }
        };
        events.push(StreamEvent::ContentBlockDelta {
            index,
            delta: Delta::TextDelta { text },
        });
    }

    fn open_block(&mut self) -> usize {
        let index = self.next_index;
        self.next_index += 1;
        self.emitted_block = true;
        index
    }

    fn close_text_block(&mut self, events: &mut Vec<StreamEvent>) {
        if let Some(index) = self.text_block.take() {
            events.push(StreamEvent::ContentBlockStop { index });
        }
    }

    /// Feed one text increment. Whitespace-only text is real output.
    pub fn text(&mut self, delta: &str) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        let safe = self.scanner.push(delta);
        self.emit_text(safe, &mut events);
        events
    }

    /// Emit each admissible call as a complete start/delta/stop triplet.
    pub fn tool_calls(&mut self, calls: Vec<ToolCall>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        for call in calls {
            if self.finished || self.scanner.is_stopped() {
                break;
            }
            if self.disable_parallel_tool_use && self.emitted_tool_use {
                break;
            }
            let (id, name) = (call.id.trim(), call.name.trim());
            if id.is_empty() || name.is_empty() {
                continue;
            }
            let Some(args) = self.gate.admit_object(&call) else {
                continue;
            };

            let held = self.scanner.flush();
            self.emit_text(held, &mut events);
            self.close_text_block(&mut events);

            let index = self.open_block();
            events.push(StreamEvent::ContentBlockStart {
                index,
                content_block: ResponseContentBlock::ToolUse {
                    id: id.to_string(),
                    name: name.to_string(),
                    input: Value::Object(Map::new()),
                },
            });
            self.scanner.record_output(args.len());
            events.push(StreamEvent::ContentBlockDelta {
                index,
                delta: Delta::InputJsonDelta { partial_json: args },
            });
            events.push(StreamEvent::ContentBlockStop { index });
            self.emitted_tool_use = true;
        }
        events
    }

    /// Flush held text, close blocks and send the terminal events. Safe to
    /// call after a failure; later calls return nothing.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        self.finished = true;

        let held = self.scanner.flush();
        self.emit_text(held, &mut events);
        self.close_text_block(&mut events);

        if !self.emitted_block {
            let index = self.open_block();
            events.push(StreamEvent::ContentBlockStart {
                index,
                content_block: ResponseContentBlock::Text {
                    text: String::new(),
                },
            });
            events.push(StreamEvent::ContentBlockStop { index });
        }

        let (reason, sequence) = if self.emitted_tool_use {
            (StopReason::ToolUse, None)
        } else {
            match self.scanner.truncation() {
                Some(t) => (t.reason, t.sequence.clone()),
                None => (StopReason::EndTurn, None),
            }
        };

        events.push(StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: Some(reason.as_str().to_string()),
                stop_sequence: sequence,
            },
            usage: DeltaUsage {
                output_tokens: tokens_from_chars(self.scanner.emitted_bytes()),
            },
        });
        events.push(StreamEvent::MessageStop);
        events
    }
}

/// Decode emitted arguments into a `tool_use` input object. Non-object JSON
/// is wrapped as `{"value": ..}` and unparseable text as `{"raw": ..}`.
pub fn tool_input(args: &str) -> Value {
    let args = args.trim();
    if args.is_empty() {
        return Value::Object(Map::new());
    }
    match serde_json::from_str::<Value>(args) {
        Ok(Value::Object(obj)) => Value::Object(obj),
        Ok(other) => json!({ "value": other }),
        Err(_) => json!({ "raw": args }),
    }
}

fn output_tokens(content: &[ResponseContentBlock]) -> u64 {
    let chars = content
        .iter()
        .map(|block| match block {
            ResponseContentBlock::Text { text } => text.len(),
            ResponseContentBlock::ToolUse { id, name, input } => {
                id.len() + name.len() + serde_json::to_string(input).map_or(0, |s| s.len())
            }
        })
        .sum();
    tokens_from_chars(chars)
}

/// Whole-message form of a finished generation.
///
/// Text is cut by the stop sequences and budget in one pass; completed,
/// object-valued calls follow as `tool_use` blocks and take precedence for
/// the stop reason.
pub fn complete_message(
    model: &str,
    input_tokens: u64,
    text: &str,
    calls: Vec<ToolCall>,
    options: &StreamOptions,
) -> MessagesResponse {
    let (text, truncation) = limit_text(text, &options.stop_sequences, options.max_tokens);

    let mut content = Vec::new();
    if !text.trim().is_empty() {
        content.push(ResponseContentBlock::Text {
            text: text.to_string(),
        });
    }
    let mut gate = ArgumentGate::default();
    let mut has_tool_use = false;
    for call in calls {
        let (id, name) = (call.id.trim(), call.name.trim());
        if id.is_empty() || name.is_empty() {
            continue;
        }
        let Some(args) = gate.admit_object(&call) else {
            continue;
        };
        content.push(ResponseContentBlock::ToolUse {
            id: id.to_string(),
            name: name.to_string(),
            input: tool_input(&args),
        });
        has_tool_use = true;
    }

    let (reason, sequence) = match (has_tool_use, truncation) {
        (true, _) => (StopReason::ToolUse, None),
        (false, Some(t)) => (t.reason, t.sequence),
        (false, None) => (StopReason::EndTurn, None),
    };
    if content.is_empty() {
        content.push(ResponseContentBlock::Text {
            text: String::new(),
        });
    }

    let usage = Usage {
        input_tokens,
        output_tokens: output_tokens(&content),
    };
    MessagesResponse {
        stop_reason: Some(reason.as_str().to_string()),
        stop_sequence: sequence,
        ..MessagesResponse::new(model, content, usage)
    }
}
