//! Anthropic Messages wire types and IR conversions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LlmError;
use crate::ir;

#[derive(Debug, Deserialize)]
pub struct MessagesRequest {
    pub model: String,
    #[serde(default)]
    pub system: Option<SystemField>,
    pub messages: Vec<AnthropicMessage>,
    #[serde(default)]
    pub tools: Option<Vec<AnthropicTool>>,
    #[serde(default)]
    pub stream: Option<bool>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub top_k: Option<u32>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_max_tokens() -> u32 {
    4096
}

#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
pub enum SystemField {
    Text(String),
    Blocks(Vec<AnthropicTextBlock>),
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AnthropicTextBlock {
    pub text: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AnthropicMessage {
    pub role: String,
    pub content: AnthropicContent,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(untagged)]
pub enum AnthropicContent {
    Text(String),
    Blocks(Vec<AnthropicBlock>),
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicBlock {
    Text {
        text: String,
    },
    Image {
        source: AnthropicImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Option<AnthropicContent>,
        #[serde(default)]
        is_error: bool,
    },
    Thinking {
        thinking: String,
        #[serde(default)]
        signature: Option<String>,
    },
    RedactedThinking {
        #[serde(default)]
        data: String,
    },
    /// Catch-all for block types this adapter doesn't otherwise interpret
    /// (future additions to the Messages API), dropped from content same
    /// as `thinking`/`redacted_thinking`.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicImageSource {
    Base64 {
        media_type: String,
        data: String,
    },
    Url {
        url: String,
    },
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AnthropicTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub input_schema: Value,
}

#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub role: &'static str,
    pub model: String,
    pub content: Vec<AnthropicBlock>,
    pub stop_reason: Option<String>,
    pub stop_sequence: Option<String>,
    pub usage: AnthropicUsage,
}

#[derive(Debug, Serialize)]
pub struct AnthropicUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Anthropic-shaped error envelope (used for both `/v1/messages` errors and
/// errors reported mid-stream as an `error` SSE event).
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

impl From<&LlmError> for ErrorResponse {
    fn from(error: &LlmError) -> Self {
        Self {
            kind: "error",
            error: ErrorBody {
                kind: error.error_type().to_string(),
                message: error.client_message(),
            },
        }
    }
}

fn role_from_str(s: &str) -> ir::Role {
    match s {
        "user" => ir::Role::User,
        "assistant" => ir::Role::Assistant,
        other => ir::Role::Other(other.to_string()),
    }
}

fn stop_reason_to_finish_reason(stop_reason: &str) -> ir::FinishReason {
    match stop_reason {
        "end_turn" | "stop_sequence" => ir::FinishReason::Stop,
        "max_tokens" => ir::FinishReason::Length,
        "tool_use" => ir::FinishReason::ToolCalls,
        _ => ir::FinishReason::Stop,
    }
}

fn finish_reason_to_stop_reason(reason: ir::FinishReason) -> &'static str {
    match reason {
        ir::FinishReason::Stop => "end_turn",
        ir::FinishReason::Length => "max_tokens",
        ir::FinishReason::ContentFilter => "end_turn",
        ir::FinishReason::ToolCalls => "tool_use",
    }
}

fn content_to_blocks(content: AnthropicContent, tool_calls: &mut Vec<ir::ToolCall>) -> Vec<ir::ContentBlock> {
    match content {
        AnthropicContent::Text(text) => vec![ir::ContentBlock::Text { text }],
        AnthropicContent::Blocks(blocks) => blocks
            .into_iter()
            .filter_map(|block| match block {
                AnthropicBlock::Text { text } => Some(ir::ContentBlock::Text { text }),
                AnthropicBlock::Image { source } => Some(match source {
                    AnthropicImageSource::Url { url } => ir::ContentBlock::ImageUrl {
                        url: Some(url),
                        mime: None,
                    },
                    AnthropicImageSource::Base64 { media_type, data } => ir::ContentBlock::ImageUrl {
                        url: Some(format!("data:{media_type};base64,{data}")),
                        mime: Some(media_type),
                    },
                }),
                AnthropicBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ir::ToolCall {
                        id,
                        name,
                        arguments: serde_json::to_string(&input).unwrap_or_default(),
                    });
                    None
                }
                AnthropicBlock::ToolResult { content, .. } => {
                    let text = match content {
                        Some(AnthropicContent::Text(t)) => t,
                        Some(AnthropicContent::Blocks(blocks)) => blocks
                            .into_iter()
                            .filter_map(|b| match b {
                                AnthropicBlock::Text { text } => Some(text),
                                _ => None,
                            })
                            .collect::<Vec<_>>()
                            .join(""),
                        None => String::new(),
                    };
                    Some(ir::ContentBlock::Text { text })
                }
                // thinking/redacted_thinking blocks, and anything this
                // adapter doesn't recognize, are dropped from content.
                AnthropicBlock::Thinking { .. } | AnthropicBlock::RedactedThinking { .. } | AnthropicBlock::Unknown => None,
            })
            .collect(),
    }
}

fn tool_result_text(content: Option<AnthropicContent>) -> String {
    match content {
        Some(AnthropicContent::Text(t)) => t,
        Some(AnthropicContent::Blocks(blocks)) => blocks
            .into_iter()
            .filter_map(|b| match b {
                AnthropicBlock::Text { text } => Some(text),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(""),
        None => String::new(),
    }
}

/// Anthropic lets one message carry several `tool_result` blocks (the
/// shape a parallel tool-call turn takes); the IR's tool-role message
/// carries exactly one result, so a message like that fans out into one
/// IR message per result, plus one more for any non-tool-result content
/// the same message also carries.
fn split_message(msg: AnthropicMessage) -> Vec<ir::Message> {
    let role = role_from_str(&msg.role);

    let AnthropicContent::Blocks(blocks) = msg.content else {
        let mut tool_calls = Vec::new();
        let content = content_to_blocks(msg.content, &mut tool_calls);
        return vec![ir::Message {
            role,
            tool_call_id: None,
            content,
            tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
        }];
    };

    let mut messages = Vec::new();
    let mut rest = Vec::new();

    for block in blocks {
        match block {
            AnthropicBlock::ToolResult { tool_use_id, content, .. } => {
                messages.push(ir::Message {
                    role: role.clone(),
                    tool_call_id: Some(tool_use_id),
                    content: vec![ir::ContentBlock::Text { text: tool_result_text(content) }],
                    tool_calls: None,
                });
            }
            other => rest.push(other),
        }
    }

    if !rest.is_empty() || messages.is_empty() {
        let mut tool_calls = Vec::new();
        let content = content_to_blocks(AnthropicContent::Blocks(rest), &mut tool_calls);
        messages.push(ir::Message {
            role,
            tool_call_id: None,
            content,
            tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
        });
    }

    messages
}

/// Parse a Messages request body into the IR.
pub fn parse_request(body: Value, request_id: String) -> Result<ir::Request, LlmError> {
    let parsed: MessagesRequest = serde_json::from_value(body).map_err(|e| LlmError::InvalidRequest(e.to_string()))?;

    let system = match parsed.system {
        None => None,
        Some(SystemField::Text(t)) => Some(vec![t]),
        Some(SystemField::Blocks(blocks)) => Some(blocks.into_iter().map(|b| b.text).collect()),
    };

    let messages = parsed.messages.into_iter().flat_map(split_message).collect();

    let tools = parsed.tools.map(|tools| {
        tools
            .into_iter()
            .map(|t| ir::ToolDefinition {
                name: t.name,
                description: t.description.unwrap_or_default(),
                parameters: ir::ToolDefinition::strip_schema_meta(t.input_schema),
                strict: None,
            })
            .collect()
    });

    Ok(ir::Request {
        id: request_id,
        model: parsed.model,
        profile: None,
        operation: ir::Operation::Messages,
        system,
        messages,
        tools,
        stream: parsed.stream,
        state: ir::State::default(),
        params: ir::Parameters {
            temperature: parsed.temperature,
            top_p: parsed.top_p,
            top_k: parsed.top_k,
            max_tokens: Some(parsed.max_tokens),
            thinking: None,
        },
        metadata: ir::Metadata {
            dialect: Some(ir::Dialect::AnthropicMessages),
            headers: Default::default(),
        },
    })
}

/// Render an IR response as a Messages API response object.
pub fn render_response(response: &ir::Response) -> MessagesResponse {
    let mut content = Vec::new();

    if let Some((_, blocks, tool_calls, _)) = response.message_block() {
        for block in blocks {
            match block {
                ir::ContentBlock::Text { text } => content.push(AnthropicBlock::Text { text: text.clone() }),
                ir::ContentBlock::Reasoning { text, signature } => content.push(AnthropicBlock::Thinking {
                    thinking: text.clone(),
                    signature: signature.clone(),
                }),
                ir::ContentBlock::ImageUrl { .. }
                | ir::ContentBlock::Json { .. }
                | ir::ContentBlock::Metadata { .. }
                | ir::ContentBlock::Blob { .. } => {}
            }
        }
        if let Some(tool_calls) = tool_calls {
            for call in tool_calls {
                content.push(AnthropicBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.arguments_value(),
                });
            }
        }
    }

    MessagesResponse {
        id: response.id.clone(),
        kind: "message",
        role: "assistant",
        model: response.model.clone(),
        content,
        stop_reason: response.finish_reason.map(finish_reason_to_stop_reason).map(str::to_string),
        stop_sequence: None,
        usage: AnthropicUsage {
            input_tokens: response.usage.map(|u| u.input_tokens).unwrap_or_default(),
            output_tokens: response.usage.map(|u| u.output_tokens).unwrap_or_default(),
        },
    }
}

pub(crate) fn parse_stop_reason(s: &str) -> ir::FinishReason {
    stop_reason_to_finish_reason(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_system_string_and_tool_use() {
        let req = parse_request(
            json!({
                "model": "claude-3-7-sonnet-20250219",
                "system": "be terse",
                "max_tokens": 100,
                "messages": [{
                    "role": "assistant",
                    "content": [{"type": "tool_use", "id": "t1", "name": "lookup", "input": {"q": "x"}}]
                }]
            }),
            "req_1".to_string(),
        )
        .unwrap();

        assert_eq!(req.system, Some(vec!["be terse".to_string()]));
        let calls = req.messages[0].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].name, "lookup");
    }

    #[test]
    fn parses_tool_result_message_with_tool_call_id() {
        let req = parse_request(
            json!({
                "model": "claude-3-7-sonnet-20250219",
                "max_tokens": 100,
                "messages": [{
                    "role": "user",
                    "content": [{"type": "tool_result", "tool_use_id": "t1", "content": "42"}]
                }]
            }),
            "req_2".to_string(),
        )
        .unwrap();

        assert_eq!(req.messages[0].tool_call_id.as_deref(), Some("t1"));
    }

    #[test]
    fn renders_tool_use_block_from_ir_tool_call() {
        let response = ir::Response {
            id: "resp_1".to_string(),
            model: "claude-3-7-sonnet-20250219".to_string(),
            operation: ir::Operation::Messages,
            output: vec![ir::OutputBlock::Message {
                role: ir::Role::Assistant,
                content: vec![],
                tool_calls: Some(vec![ir::ToolCall {
                    id: "t1".to_string(),
                    name: "lookup".to_string(),
                    arguments: "{\"q\":\"x\"}".to_string(),
                }]),
                status: ir::BlockStatus::Completed,
            }],
            usage: None,
            finish_reason: Some(ir::FinishReason::ToolCalls),
            error: None,
            metadata: Default::default(),
        };

        let rendered = render_response(&response);
        assert_eq!(rendered.stop_reason.as_deref(), Some("tool_use"));
        assert!(matches!(rendered.content[0], AnthropicBlock::ToolUse { ref name, .. } if name == "lookup"));
    }

    #[test]
    fn redacted_thinking_block_does_not_fail_deserialization_and_is_dropped() {
        let req = parse_request(
            json!({
                "model": "claude-3-7-sonnet-20250219",
                "max_tokens": 100,
                "messages": [{
                    "role": "assistant",
                    "content": [
                        {"type": "redacted_thinking", "data": "opaque"},
                        {"type": "text", "text": "hello"}
                    ]
                }]
            }),
            "req_3".to_string(),
        )
        .unwrap();

        assert_eq!(req.messages[0].content, vec![ir::ContentBlock::Text { text: "hello".to_string() }]);
    }

    #[test]
    fn unrecognized_block_type_does_not_fail_deserialization() {
        let req = parse_request(
            json!({
                "model": "claude-3-7-sonnet-20250219",
                "max_tokens": 100,
                "messages": [{
                    "role": "assistant",
                    "content": [{"type": "some_future_block", "whatever": 1}]
                }]
            }),
            "req_4".to_string(),
        )
        .unwrap();

        assert!(req.messages[0].content.is_empty());
    }

    #[test]
    fn thinking_block_is_dropped_from_content_not_kept() {
        let req = parse_request(
            json!({
                "model": "claude-3-7-sonnet-20250219",
                "max_tokens": 100,
                "messages": [{
                    "role": "assistant",
                    "content": [
                        {"type": "thinking", "thinking": "reasoning...", "signature": "sig"},
                        {"type": "text", "text": "answer"}
                    ]
                }]
            }),
            "req_5".to_string(),
        )
        .unwrap();

        assert_eq!(req.messages[0].content, vec![ir::ContentBlock::Text { text: "answer".to_string() }]);
    }

    #[test]
    fn multiple_tool_results_in_one_message_split_into_separate_ir_messages() {
        let req = parse_request(
            json!({
                "model": "claude-3-7-sonnet-20250219",
                "max_tokens": 100,
                "messages": [{
                    "role": "user",
                    "content": [
                        {"type": "tool_result", "tool_use_id": "call_1", "content": "result one"},
                        {"type": "tool_result", "tool_use_id": "call_2", "content": "result two"}
                    ]
                }]
            }),
            "req_6".to_string(),
        )
        .unwrap();

        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.messages[0].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(req.messages[0].content, vec![ir::ContentBlock::Text { text: "result one".to_string() }]);
        assert_eq!(req.messages[1].tool_call_id.as_deref(), Some("call_2"));
        assert_eq!(req.messages[1].content, vec![ir::ContentBlock::Text { text: "result two".to_string() }]);
    }

    #[test]
    fn tool_results_mixed_with_text_keep_text_as_its_own_message() {
        let req = parse_request(
            json!({
                "model": "claude-3-7-sonnet-20250219",
                "max_tokens": 100,
                "messages": [{
                    "role": "user",
                    "content": [
                        {"type": "tool_result", "tool_use_id": "call_1", "content": "result"},
                        {"type": "text", "text": "also this"}
                    ]
                }]
            }),
            "req_7".to_string(),
        )
        .unwrap();

        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.messages[0].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(req.messages[1].tool_call_id, None);
        assert_eq!(req.messages[1].content, vec![ir::ContentBlock::Text { text: "also this".to_string() }]);
    }
}
