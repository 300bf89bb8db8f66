//! Protocol translation between the client-facing APIs and the upstream
//! responses stream.
//!
//! Requests are validated and flattened here, and upstream text and tool
//! calls are turned back into chat chunks or Anthropic events. Nothing in
//! this module performs I/O.

pub mod anthropic_types;
pub mod chunks;
pub mod openai_types;
pub mod request;
pub mod responses;
pub mod stop;
pub mod streaming;
pub mod tool_args;
