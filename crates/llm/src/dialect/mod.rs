//! Bidirectional adapters between client dialects and the IR.
//!
//! Each submodule owns one dialect's wire types plus `parse_request`
//! (dialect -> [`crate::ir::Request`]) and `render_response` ([`crate::ir::Response`]
//! -> dialect), and exposes its streaming-chunk builders for
//! [`crate::streaming`] to drive.

pub mod anthropic;
pub mod openai_chat;
pub mod openai_responses;
