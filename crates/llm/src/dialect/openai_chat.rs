//! OpenAI Chat Completions wire types and IR conversions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LlmError, LlmResult};
use crate::ir;

#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub tools: Option<Vec<ChatTool>>,
    #[serde(default)]
    pub stream: Option<bool>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default, rename = "max_completion_tokens")]
    pub max_completion_tokens: Option<u32>,
    /// Legacy top-level function definitions, superseded by `tools`.
    #[serde(default)]
    pub functions: Option<Vec<ChatFunctionDef>>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<ChatContent>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    /// Legacy single-call form, superseded by `tool_calls`.
    #[serde(default)]
    pub function_call: Option<ChatFunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(untagged)]
pub enum ChatContent {
    Text(String),
    Parts(Vec<ChatContentPart>),
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatContentPart {
    Text { text: String },
    ImageUrl { image_url: ChatImageUrl },
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChatImageUrl {
    pub url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChatTool {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: ChatFunctionDef,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChatFunctionDef {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Option<Value>,
    #[serde(default)]
    pub strict: Option<bool>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChatToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: ChatFunctionCall,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChatFunctionCall {
    pub name: String,
    pub arguments: ChatArguments,
}

/// Tool-call arguments as they arrive on the wire: almost always a JSON
/// string, but some clients send the object directly.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(untagged)]
pub enum ChatArguments {
    Text(String),
    Json(Value),
}

impl ChatArguments {
    fn into_string(self) -> String {
        match self {
            ChatArguments::Text(s) => s,
            ChatArguments::Json(v) => v.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: &'static str,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    pub usage: Option<ChatUsage>,
}

#[derive(Debug, Serialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Streaming chunk (`chat.completion.chunk`), built by [`crate::streaming`].
#[derive(Debug, Serialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: &'static str,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChatChunkChoice>,
}

#[derive(Debug, Serialize)]
pub struct ChatChunkChoice {
    pub index: u32,
    pub delta: ChatDelta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct ChatDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ChatToolCallDelta>>,
}

#[derive(Debug, Serialize)]
pub struct ChatToolCallDelta {
    pub index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<ChatFunctionCallDelta>,
}

#[derive(Debug, Serialize)]
pub struct ChatFunctionCallDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

pub(crate) fn role_from_str(s: &str) -> ir::Role {
    match s {
        "system" => ir::Role::System,
        "developer" => ir::Role::Developer,
        "user" => ir::Role::User,
        "assistant" => ir::Role::Assistant,
        "tool" => ir::Role::Tool,
        other => ir::Role::Other(other.to_string()),
    }
}

pub(crate) fn content_to_blocks(content: Option<ChatContent>) -> Vec<ir::ContentBlock> {
    match content {
        None => Vec::new(),
        Some(ChatContent::Text(text)) => vec![ir::ContentBlock::Text { text }],
        Some(ChatContent::Parts(parts)) => parts
            .into_iter()
            .map(|part| match part {
                ChatContentPart::Text { text } => ir::ContentBlock::Text { text },
                ChatContentPart::ImageUrl { image_url } => ir::ContentBlock::ImageUrl {
                    url: Some(image_url.url),
                    mime: None,
                },
            })
            .collect(),
    }
}

pub(crate) fn tool_calls_to_ir(calls: Option<Vec<ChatToolCall>>, legacy_function_call: Option<ChatFunctionCall>) -> Option<Vec<ir::ToolCall>> {
    if let Some(calls) = calls {
        return Some(
            calls
                .into_iter()
                .map(|c| ir::ToolCall {
                    id: c.id,
                    name: c.function.name,
                    arguments: c.function.arguments.into_string(),
                })
                .collect(),
        );
    }

    // Legacy single-call form: id isn't present on the wire, so the
    // function name stands in for it.
    legacy_function_call.map(|call| {
        vec![ir::ToolCall {
            id: call.name.clone(),
            name: call.name,
            arguments: call.arguments.into_string(),
        }]
    })
}

/// Parse a Chat Completions request body into the IR.
pub fn parse_request(body: Value, request_id: String) -> LlmResult<ir::Request> {
    let parsed: ChatCompletionRequest =
        serde_json::from_value(body).map_err(|e| LlmError::InvalidRequest(e.to_string()))?;

    let mut system = Vec::new();
    let mut messages = Vec::new();

    for msg in parsed.messages {
        let role = role_from_str(&msg.role);
        if role == ir::Role::System {
            if let Some(text) = msg.content.as_ref().and_then(|c| match c {
                ChatContent::Text(t) => Some(t.clone()),
                ChatContent::Parts(_) => None,
            }) {
                system.push(text);
                continue;
            }
        }

        messages.push(ir::Message {
            role,
            tool_call_id: msg.tool_call_id,
            content: content_to_blocks(msg.content),
            tool_calls: tool_calls_to_ir(msg.tool_calls, msg.function_call),
        });
    }

    let tools = parsed.tools.or(parsed.functions.map(|functions| {
        functions
            .into_iter()
            .map(|f| ChatTool {
                kind: "function".to_string(),
                function: f,
            })
            .collect()
    }));
    let tools = tools.map(|tools| {
        tools
            .into_iter()
            .map(|t| ir::ToolDefinition {
                name: t.function.name,
                description: t.function.description.unwrap_or_default(),
                parameters: ir::ToolDefinition::strip_schema_meta(
                    t.function.parameters.unwrap_or_else(|| Value::Object(Default::default())),
                ),
                strict: t.function.strict,
            })
            .collect()
    });

    Ok(ir::Request {
        id: request_id,
        model: parsed.model,
        profile: None,
        operation: ir::Operation::Chat,
        system: if system.is_empty() { None } else { Some(system) },
        messages,
        tools,
        stream: parsed.stream,
        state: ir::State::default(),
        params: ir::Parameters {
            temperature: parsed.temperature,
            top_p: parsed.top_p,
            top_k: None,
            max_tokens: parsed.max_completion_tokens.or(parsed.max_tokens),
            thinking: None,
        },
        metadata: ir::Metadata {
            dialect: Some(ir::Dialect::OpenAiChat),
            headers: Default::default(),
        },
    })
}

fn blocks_to_content(blocks: &[ir::ContentBlock]) -> Option<ChatContent> {
    let text: String = blocks.iter().filter_map(ir::ContentBlock::as_text).collect();
    if text.is_empty() { None } else { Some(ChatContent::Text(text)) }
}

fn tool_calls_to_wire(calls: &[ir::ToolCall]) -> Vec<ChatToolCall> {
    calls
        .iter()
        .map(|c| ChatToolCall {
            id: c.id.clone(),
            kind: "function".to_string(),
            function: ChatFunctionCall {
                name: c.name.clone(),
                arguments: ChatArguments::Text(c.arguments.clone()),
            },
        })
        .collect()
}

/// Render an IR response as a `chat.completion` object.
pub fn render_response(response: &ir::Response, created: u64) -> ChatCompletionResponse {
    let (content, tool_calls) = match response.message_block() {
        Some((_, content, tool_calls, _)) => (
            blocks_to_content(content),
            tool_calls.map(tool_calls_to_wire).filter(|v| !v.is_empty()),
        ),
        None => (None, None),
    };

    let finish_reason = response.finish_reason.map(|r| r.to_string());

    let reasoning_content: String = response
        .output
        .iter()
        .filter_map(|block| match block {
            ir::OutputBlock::Reasoning { content, .. } => Some(content.iter().filter_map(ir::ContentBlock::as_text).collect::<String>()),
            _ => None,
        })
        .collect();

    ChatCompletionResponse {
        id: response.id.clone(),
        object: "chat.completion",
        created,
        model: response.model.clone(),
        choices: vec![ChatChoice {
            index: 0,
            message: ChatMessage {
                role: "assistant".to_string(),
                content,
                tool_calls,
                tool_call_id: None,
                function_call: None,
                reasoning_content: (!reasoning_content.is_empty()).then_some(reasoning_content),
            },
            finish_reason,
        }],
        usage: response.usage.map(|u| ChatUsage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            total_tokens: u.total_tokens,
        }),
    }
}
