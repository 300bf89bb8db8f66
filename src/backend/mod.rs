//! Upstream side of the gateway: the responses event stream and the
//! request orchestration around it.

pub mod client;
pub mod events;
pub mod frames;
pub mod payload;
pub mod reasoning;
pub mod tool_calls;
pub mod tools;

pub use client::{BackendClient, BackendStream, Generation, StreamItem};
pub use payload::{
    build_payload, ChatMessage, MessageToolCall, PayloadOptions, RequestPayload, Role,
};
pub use tool_calls::{CallStatus, ToolCall};
