//! The dialect-neutral intermediate representation (IR).
//!
//! Every client dialect (OpenAI Chat Completions, OpenAI Responses,
//! Anthropic Messages) is parsed into [`Request`] and every provider
//! response is parsed into [`Response`]. Transforms, the ensure-tool-call
//! subsystem, and the streaming synthesizer all operate on these types;
//! nothing downstream of the client adapters knows which dialect the
//! request originally arrived in except through [`Metadata::dialect`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which client dialect a request/response pair is round-tripping through.
///
/// `operation` on [`Request`] always matches this: `Chat` only ever comes
/// from `OpenAiChat`, etc. The pair is kept separate because `operation`
/// is also the field name providers key dispatch off of (`/v1/chat/completions`
/// vs `/v1/messages` vs `/v1/responses`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dialect {
    OpenAiChat,
    OpenAiResponses,
    AnthropicMessages,
}

/// Which of the three client operations this request represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// OpenAI Chat Completions.
    Chat,
    /// Anthropic Messages.
    Messages,
    /// OpenAI Responses.
    Responses,
}

impl Operation {
    /// The dialect that originates this operation tag.
    pub fn dialect(self) -> Dialect {
        match self {
            Operation::Chat => Dialect::OpenAiChat,
            Operation::Messages => Dialect::AnthropicMessages,
            Operation::Responses => Dialect::OpenAiResponses,
        }
    }
}

/// Message sender role.
///
/// `Other` preserves a role string a client dialect sends that we don't
/// otherwise interpret, so round-tripping an unfamiliar role doesn't lose it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Developer,
    User,
    Assistant,
    Tool,
    #[serde(untagged)]
    Other(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::System => "system",
            Role::Developer => "developer",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
            Role::Other(s) => s,
        }
    }
}

/// A single content block within a message or output item.
///
/// Tagged variants rather than a class hierarchy: a `type` discriminator,
/// matched exhaustively wherever content is inspected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text. Ingress normalization coerces an absent `text` to `""`
    /// rather than dropping the block.
    Text { text: String },

    /// An image reference. `url` is `None` when the originating dialect
    /// provided a source the parser could not resolve to a URL (e.g. a
    /// malformed Anthropic image source); normalization drops such blocks.
    ImageUrl { url: Option<String>, mime: Option<String> },

    /// An arbitrary JSON payload carried verbatim (e.g. a Responses API
    /// `file_*` reference, or other structured content with no simpler
    /// representation).
    Json { value: Value },

    /// Model "thinking"/reasoning text. `signature` holds provider-specific
    /// reattachment metadata (e.g. a Gemini thought signature, looked up
    /// from the signature cache).
    Reasoning { text: String, signature: Option<String> },

    /// Non-content metadata attached to a turn (rare; preserved for
    /// round-tripping provider-specific annotations).
    Metadata { value: Value },

    /// Opaque binary-ish content that doesn't fit the other variants.
    Blob { data: String, mime: Option<String> },
}

impl ContentBlock {
    /// Non-empty-trimmed text, non-empty image, or JSON with non-null data.
    ///
    /// Used by the ensure-tool-call subsystem's "meaningful non-reasoning
    /// content" test.
    pub fn is_meaningful(&self) -> bool {
        match self {
            ContentBlock::Text { text } => !text.trim().is_empty(),
            ContentBlock::ImageUrl { url, .. } => url.as_deref().is_some_and(|u| !u.is_empty()),
            ContentBlock::Json { value } => !value.is_null(),
            ContentBlock::Reasoning { .. } | ContentBlock::Metadata { .. } | ContentBlock::Blob { .. } => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A tool call made by the assistant.
///
/// Post-normalization, `arguments` is always valid JSON text: either the
/// model's own (possibly re-encoded) arguments, or the literal
/// `{"_raw": "<original>"}` escape hatch when repair fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    /// Reserialize `arguments` through a JSON round trip, falling back to
    /// the `_raw` escape hatch on parse failure (used by the
    /// normalize-response transform).
    pub fn reserialize_arguments(&mut self) {
        self.arguments = match serde_json::from_str::<Value>(&self.arguments) {
            Ok(value) => serde_json::to_string(&value).unwrap_or_else(|_| self.arguments.clone()),
            Err(_) => serde_json::to_string(&serde_json::json!({ "_raw": self.arguments })).unwrap(),
        };
    }

    /// Parse `arguments` as JSON, defaulting to an empty object on failure.
    pub fn arguments_value(&self) -> Value {
        serde_json::from_str(&self.arguments).unwrap_or_else(|_| Value::Object(Default::default()))
    }
}

/// A single conversational turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,

    /// Meaningful only when `role == Tool`: the id of the tool call this
    /// message's content is the result of.
    pub tool_call_id: Option<String>,

    pub content: Vec<ContentBlock>,

    /// Meaningful only when `role == Assistant`.
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl Message {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            tool_call_id: None,
            content: vec![ContentBlock::Text { text: text.into() }],
            tool_calls: None,
        }
    }

    /// Concatenation of all text blocks, in order, joined with no
    /// separator (used for `tool`-role "one logical result" flattening and
    /// for rendering).
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("")
    }

    /// Whether this message's content carries meaningful non-reasoning
    /// content.
    pub fn has_meaningful_content(&self) -> bool {
        self.content.iter().any(ContentBlock::is_meaningful)
    }
}

/// A tool/function definition offered to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema with any top-level `$schema` key stripped.
    pub parameters: Value,
    pub strict: Option<bool>,
}

impl ToolDefinition {
    /// Strip a top-level `$schema` key, matching the parse-time
    /// normalization both dialects apply to tool definitions.
    pub fn strip_schema_meta(mut parameters: Value) -> Value {
        if let Value::Object(map) = &mut parameters {
            map.remove("$schema");
        }
        parameters
    }
}

/// Sampling and generation parameters, shared across dialects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Parameters {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub max_tokens: Option<u32>,
    /// Opaque `thinking`/`thinking_config` payload, passed through
    /// untouched to whichever provider understands it.
    pub thinking: Option<Value>,
}

/// Request-scoped state carried across ingress/egress transforms and
/// pipeline retries.
///
/// Modeled as a typed struct behind a closed field set rather than a
/// stringly-typed map: the key set here is the full enumeration of what
/// a transform or the pipeline driver can stash between iterations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct State {
    /// Set by a transform to request another pipeline iteration.
    pub retry: bool,

    /// Set by an ingress transform to skip the upstream call and return a
    /// canned completed response.
    pub synthetic_response: bool,

    /// Bound on pipeline iterations for this request (default 3, clamped
    /// to `[1, 5]`).
    pub max_attempts: u8,

    /// Present only when the ensure-tool-call subsystem is engaged for
    /// this request's resolved variant.
    pub ensure_tool_call: Option<EnsureToolCallState>,

    /// The client's originally requested `stream` value, stashed before
    /// the driver forces `Request.stream` to `false` for the upstream leg.
    pub original_stream: bool,
}

/// Ensure-tool-call subsystem state. Lives for the duration of one
/// client request, including its retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsureToolCallState {
    /// Name of the synthetic termination tool. Defaults to `"finish"`.
    pub termination_tool: String,
    pub pending_reminder: bool,
    pub reminder_count: u32,
    pub final_answer_required: bool,
    pub reminder_history: Vec<String>,
    /// Set once the termination tool has been called and its final-answer
    /// text extracted; the next ingress pass short-circuits to a synthetic
    /// response instead of calling the provider again (the skip heuristic).
    pub final_answer: Option<String>,
}

impl Default for EnsureToolCallState {
    fn default() -> Self {
        Self {
            termination_tool: "finish".to_string(),
            pending_reminder: false,
            reminder_count: 0,
            final_answer_required: false,
            reminder_history: Vec::new(),
            final_answer: None,
        }
    }
}

/// Metadata about the request's origin, preserved for response rendering
/// and logging.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub dialect: Option<Dialect>,
    pub headers: HashMap<String, String>,
}

/// The canonical request all client dialects normalize into and all
/// provider adapters consume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: String,

    /// Logical model name, pre-resolution (see `registry::resolve`).
    pub model: String,

    /// Named subset of variants to route within, if any.
    pub profile: Option<String>,

    pub operation: Operation,

    pub system: Option<Vec<String>>,

    pub messages: Vec<Message>,

    pub tools: Option<Vec<ToolDefinition>>,

    pub stream: Option<bool>,

    pub state: State,

    pub params: Parameters,

    pub metadata: Metadata,
}

impl Request {
    /// System prompt joined as the dialects that use a single string field
    /// expect it.
    pub fn system_joined(&self) -> Option<String> {
        self.system.as_ref().map(|parts| parts.join("\n"))
    }
}

/// Status of a generated message or tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    Completed,
    Incomplete,
}

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ContentFilter => "content_filter",
            FinishReason::ToolCalls => "tool_calls",
        };
        write!(f, "{s}")
    }
}

/// One unit of generated output. Sum type over message/tool-call/reasoning/
/// delta, matching the provider-agnostic shapes all three dialects can
/// render from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputBlock {
    Message {
        role: Role,
        content: Vec<ContentBlock>,
        tool_calls: Option<Vec<ToolCall>>,
        status: BlockStatus,
    },
    ToolCall {
        call_id: String,
        name: String,
        arguments: String,
        status: BlockStatus,
    },
    Reasoning {
        content: Vec<ContentBlock>,
        summary: Vec<String>,
    },
    Delta {
        content: Vec<ContentBlock>,
    },
}

/// Token usage, passed through from the provider with no further
/// accounting.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

/// An error surfaced as part of an IR response rather than a hard
/// provider-adapter failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseError {
    pub message: String,
    pub code: Option<String>,
}

/// Response-side metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMetadata {
    /// True when the driver fabricated this response without calling the
    /// provider (the ensure-tool-call ingress skip heuristic).
    pub synthetic: bool,
    /// Name of the provider that produced this response, if any.
    pub provider: Option<String>,
    /// Set by the ensure-tool-call egress transform when this response's
    /// message block was the termination tool call, already promoted to
    /// plain text.
    pub ensure_tool_call_terminated: bool,
}

/// The canonical response all provider adapters produce and all client
/// dialects render from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub model: String,
    pub operation: Operation,
    pub output: Vec<OutputBlock>,
    pub usage: Option<Usage>,
    pub finish_reason: Option<FinishReason>,
    pub error: Option<ResponseError>,
    pub metadata: ResponseMetadata,
}

impl Response {
    /// The first `message`-kind output block, if any.
    pub fn message_block(&self) -> Option<(&Role, &[ContentBlock], Option<&[ToolCall]>, BlockStatus)> {
        self.output.iter().find_map(|block| match block {
            OutputBlock::Message {
                role,
                content,
                tool_calls,
                status,
            } => Some((role, content.as_slice(), tool_calls.as_deref(), *status)),
            _ => None,
        })
    }

    /// Mutable access to the first `message`-kind output block.
    pub fn message_block_mut(
        &mut self,
    ) -> Option<(
        &mut Role,
        &mut Vec<ContentBlock>,
        &mut Option<Vec<ToolCall>>,
        &mut BlockStatus,
    )> {
        self.output.iter_mut().find_map(|block| match block {
            OutputBlock::Message {
                role,
                content,
                tool_calls,
                status,
            } => Some((role, content, tool_calls, status)),
            _ => None,
        })
    }

    /// Concatenation of all text content blocks across all output blocks,
    /// in order (used by streaming-order invariants and simple renders).
    pub fn joined_text(&self) -> String {
        self.output
            .iter()
            .flat_map(|block| match block {
                OutputBlock::Message { content, .. }
                | OutputBlock::Reasoning { content, .. }
                | OutputBlock::Delta { content } => content.iter().filter_map(ContentBlock::as_text),
                OutputBlock::ToolCall { .. } => [].iter().filter_map(ContentBlock::as_text),
            })
            .collect::<Vec<_>>()
            .join("")
    }
}
