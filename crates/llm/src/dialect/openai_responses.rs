//! OpenAI Responses API wire types and IR conversions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dialect::openai_chat;
use crate::dialect::openai_chat::ChatMessage;
use crate::error::LlmError;
use crate::ir;

#[derive(Debug, Deserialize)]
pub struct ResponsesRequest {
    pub model: String,
    /// The top-level `messages` array, treated as plain chat messages when
    /// present instead of `input`.
    #[serde(default)]
    pub messages: Option<Vec<ChatMessage>>,
    #[serde(default)]
    pub input: Option<ResponsesInput>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub tools: Option<Vec<ResponsesTool>>,
    #[serde(default)]
    pub stream: Option<bool>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ResponsesInput {
    Text(String),
    Items(Vec<ResponsesArrayElement>),
    Object(ResponsesSingleMessage),
}

/// An element of the `input` array: a plain string, a tagged item, or a
/// bare `{role, content}`/`{text}` object carrying no `type` tag.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(untagged)]
pub enum ResponsesArrayElement {
    Text(String),
    Item(ResponsesItem),
    Message(ResponsesSingleMessage),
    TextLike(ResponsesTextPart),
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ResponsesSingleMessage {
    pub role: String,
    pub content: ResponsesContent,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsesItem {
    Message {
        role: String,
        content: ResponsesContent,
    },
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    FunctionCallOutput {
        #[serde(alias = "callId")]
        call_id: String,
        output: String,
    },
    Reasoning {
        #[serde(default)]
        content: Vec<ResponsesTextPart>,
        #[serde(default)]
        summary: Vec<ResponsesTextPart>,
    },
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(untagged)]
pub enum ResponsesContent {
    Text(String),
    Parts(Vec<ResponsesContentPart>),
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsesContentPart {
    InputText { text: String },
    OutputText { text: String },
    InputImage { image_url: String },
    InputFile {
        #[serde(default)]
        file_url: Option<String>,
        #[serde(default)]
        file_id: Option<String>,
        #[serde(default)]
        file_data: Option<String>,
    },
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ResponsesTextPart {
    pub text: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ResponsesTool {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Option<Value>,
    #[serde(default)]
    pub strict: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ResponsesResponse {
    pub id: String,
    pub object: &'static str,
    pub created_at: u64,
    pub model: String,
    pub status: &'static str,
    pub output: Vec<ResponsesOutputItem>,
    pub usage: Option<ResponsesUsage>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsesOutputItem {
    Message {
        id: String,
        role: &'static str,
        status: &'static str,
        content: Vec<ResponsesContentPart>,
    },
    FunctionCall {
        id: String,
        call_id: String,
        name: String,
        arguments: String,
        status: &'static str,
    },
    Reasoning {
        id: String,
        content: Vec<ResponsesTextPart>,
        summary: Vec<ResponsesTextPart>,
    },
}

#[derive(Debug, Serialize)]
pub struct ResponsesUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

fn role_from_str(s: &str) -> ir::Role {
    match s {
        "system" => ir::Role::System,
        "developer" => ir::Role::Developer,
        "user" => ir::Role::User,
        "assistant" => ir::Role::Assistant,
        other => ir::Role::Other(other.to_string()),
    }
}

fn content_to_blocks(content: ResponsesContent) -> Vec<ir::ContentBlock> {
    match content {
        ResponsesContent::Text(text) => vec![ir::ContentBlock::Text { text }],
        ResponsesContent::Parts(parts) => parts
            .into_iter()
            .map(|part| match part {
                ResponsesContentPart::InputText { text } | ResponsesContentPart::OutputText { text } => {
                    ir::ContentBlock::Text { text }
                }
                ResponsesContentPart::InputImage { image_url } => ir::ContentBlock::ImageUrl {
                    url: Some(image_url),
                    mime: None,
                },
                ResponsesContentPart::InputFile { file_url, file_id, file_data } => ir::ContentBlock::Text {
                    text: format!(
                        "[file: {}]",
                        file_url.or(file_id).or(file_data).unwrap_or_else(|| "unknown".to_string())
                    ),
                },
            })
            .collect(),
    }
}

/// Fold a walked `input` item list into IR messages. `function_call`/
/// `function_call_output` items arrive as separate input items rather
/// than nested in a message the way Chat Completions nests `tool_calls`;
/// they're folded back onto the nearest assistant/tool message here so
/// the rest of the pipeline only ever sees the unified `Message.tool_calls`
/// shape.
fn build_messages_from_items(items: Vec<ResponsesItem>) -> Vec<ir::Message> {
    let mut messages: Vec<ir::Message> = Vec::new();

    for item in items {
        match item {
            ResponsesItem::Message { role, content } => {
                messages.push(ir::Message {
                    role: role_from_str(&role),
                    tool_call_id: None,
                    content: content_to_blocks(content),
                    tool_calls: None,
                });
            }
            ResponsesItem::FunctionCall { call_id, name, arguments } => {
                let call = ir::ToolCall {
                    id: call_id,
                    name,
                    arguments,
                };
                match messages.last_mut() {
                    Some(ir::Message {
                        role: ir::Role::Assistant,
                        tool_calls: tool_calls @ Some(_),
                        ..
                    }) => tool_calls.as_mut().unwrap().push(call),
                    Some(ir::Message {
                        role: ir::Role::Assistant,
                        tool_calls,
                        ..
                    }) if tool_calls.is_none() => *tool_calls = Some(vec![call]),
                    _ => messages.push(ir::Message {
                        role: ir::Role::Assistant,
                        tool_call_id: None,
                        content: Vec::new(),
                        tool_calls: Some(vec![call]),
                    }),
                }
            }
            ResponsesItem::FunctionCallOutput { call_id, output } => {
                messages.push(ir::Message {
                    role: ir::Role::Tool,
                    tool_call_id: Some(call_id),
                    content: vec![ir::ContentBlock::Text { text: output }],
                    tool_calls: None,
                });
            }
            ResponsesItem::Reasoning { content, .. } => {
                let text = content.into_iter().map(|p| p.text).collect::<Vec<_>>().join("");
                messages.push(ir::Message {
                    role: ir::Role::Assistant,
                    tool_call_id: None,
                    content: vec![ir::ContentBlock::Reasoning { text, signature: None }],
                    tool_calls: None,
                });
            }
        }
    }

    messages
}

/// Parse a Responses API request body into the IR.
pub fn parse_request(body: Value, request_id: String) -> Result<ir::Request, LlmError> {
    let parsed: ResponsesRequest = serde_json::from_value(body).map_err(|e| LlmError::InvalidRequest(e.to_string()))?;

    let system = parsed.instructions.map(|i| vec![i]);

    let messages: Vec<ir::Message> = if let Some(chat_messages) = parsed.messages {
        chat_messages
            .into_iter()
            .map(|msg| ir::Message {
                role: openai_chat::role_from_str(&msg.role),
                tool_call_id: msg.tool_call_id,
                content: openai_chat::content_to_blocks(msg.content),
                tool_calls: openai_chat::tool_calls_to_ir(msg.tool_calls, msg.function_call),
            })
            .collect()
    } else {
        let items: Vec<ResponsesItem> = match parsed.input {
            None => Vec::new(),
            Some(ResponsesInput::Text(text)) => vec![ResponsesItem::Message {
                role: "user".to_string(),
                content: ResponsesContent::Text(text),
            }],
            Some(ResponsesInput::Object(ResponsesSingleMessage { role, content })) => {
                vec![ResponsesItem::Message { role, content }]
            }
            Some(ResponsesInput::Items(elements)) => elements
                .into_iter()
                .map(|element| match element {
                    ResponsesArrayElement::Text(text) => ResponsesItem::Message {
                        role: "user".to_string(),
                        content: ResponsesContent::Text(text),
                    },
                    ResponsesArrayElement::Item(item) => item,
                    ResponsesArrayElement::Message(ResponsesSingleMessage { role, content }) => {
                        ResponsesItem::Message { role, content }
                    }
                    ResponsesArrayElement::TextLike(part) => ResponsesItem::Message {
                        role: "user".to_string(),
                        content: ResponsesContent::Text(part.text),
                    },
                })
                .collect(),
        };

        build_messages_from_items(items)
    };

    let tools = parsed.tools.map(|tools| {
        tools
            .into_iter()
            .map(|t| ir::ToolDefinition {
                name: t.name,
                description: t.description.unwrap_or_default(),
                parameters: ir::ToolDefinition::strip_schema_meta(t.parameters.unwrap_or_else(|| Value::Object(Default::default()))),
                strict: t.strict,
            })
            .collect()
    });

    Ok(ir::Request {
        id: request_id,
        model: parsed.model,
        profile: None,
        operation: ir::Operation::Responses,
        system,
        messages,
        tools,
        stream: parsed.stream,
        state: ir::State::default(),
        params: ir::Parameters {
            temperature: parsed.temperature,
            top_p: parsed.top_p,
            top_k: None,
            max_tokens: parsed.max_output_tokens,
            thinking: None,
        },
        metadata: ir::Metadata {
            dialect: Some(ir::Dialect::OpenAiResponses),
            headers: Default::default(),
        },
    })
}

/// Render an IR response as a Responses API response object.
pub fn render_response(response: &ir::Response, created_at: u64) -> ResponsesResponse {
    let mut output = Vec::new();

    for block in &response.output {
        match block {
            ir::OutputBlock::Message {
                role: _,
                content,
                tool_calls,
                status,
            } => {
                let reasoning: Vec<ResponsesTextPart> = content
                    .iter()
                    .filter_map(|c| match c {
                        ir::ContentBlock::Reasoning { text, .. } => Some(ResponsesTextPart { text: text.clone() }),
                        _ => None,
                    })
                    .collect();
                if !reasoning.is_empty() {
                    output.push(ResponsesOutputItem::Reasoning {
                        id: format!("{}-reasoning", response.id),
                        content: reasoning,
                        summary: Vec::new(),
                    });
                }

                let parts = content
                    .iter()
                    .filter_map(|c| c.as_text())
                    .map(|text| ResponsesContentPart::OutputText { text: text.to_string() })
                    .collect();
                output.push(ResponsesOutputItem::Message {
                    id: format!("{}-msg", response.id),
                    role: "assistant",
                    status: block_status_str(*status),
                    content: parts,
                });
                if let Some(calls) = tool_calls {
                    for call in calls {
                        output.push(ResponsesOutputItem::FunctionCall {
                            id: format!("{}-call-{}", response.id, call.id),
                            call_id: call.id.clone(),
                            name: call.name.clone(),
                            arguments: call.arguments.clone(),
                            status: "completed",
                        });
                    }
                }
            }
            ir::OutputBlock::ToolCall {
                call_id,
                name,
                arguments,
                status,
            } => output.push(ResponsesOutputItem::FunctionCall {
                id: format!("{}-call-{call_id}", response.id),
                call_id: call_id.clone(),
                name: name.clone(),
                arguments: arguments.clone(),
                status: block_status_str(*status),
            }),
            ir::OutputBlock::Reasoning { content, summary } => output.push(ResponsesOutputItem::Reasoning {
                id: format!("{}-reasoning", response.id),
                content: content
                    .iter()
                    .filter_map(|c| c.as_text())
                    .map(|t| ResponsesTextPart { text: t.to_string() })
                    .collect(),
                summary: summary.iter().map(|s| ResponsesTextPart { text: s.clone() }).collect(),
            }),
            ir::OutputBlock::Delta { .. } => {}
        }
    }

    ResponsesResponse {
        id: response.id.clone(),
        object: "response",
        created_at,
        model: response.model.clone(),
        status: if response.error.is_some() {
            "failed"
        } else if response.finish_reason == Some(ir::FinishReason::Length) {
            "incomplete"
        } else {
            "completed"
        },
        output,
        usage: response.usage.map(|u| ResponsesUsage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
            total_tokens: u.total_tokens,
        }),
    }
}

fn block_status_str(status: ir::BlockStatus) -> &'static str {
    match status {
        ir::BlockStatus::Completed => "completed",
        ir::BlockStatus::Incomplete => "incomplete",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_plain_string_input_as_single_user_message() {
        let req = parse_request(json!({"model": "gpt-4o-mini", "input": "hello"}), "req_1".to_string()).unwrap();
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.messages[0].role, ir::Role::User);
    }

    #[test]
    fn folds_function_call_output_into_tool_message() {
        let req = parse_request(
            json!({
                "model": "gpt-4o-mini",
                "input": [
                    {"type": "function_call", "call_id": "c1", "name": "lookup", "arguments": "{}"},
                    {"type": "function_call_output", "call_id": "c1", "output": "42"}
                ]
            }),
            "req_2".to_string(),
        )
        .unwrap();

        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.messages[1].tool_call_id.as_deref(), Some("c1"));
    }

    #[test]
    fn parses_top_level_messages_array_as_chat_messages() {
        let req = parse_request(
            json!({
                "model": "gpt-4o-mini",
                "messages": [{"role": "user", "content": "hi"}]
            }),
            "req_3".to_string(),
        )
        .unwrap();

        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.messages[0].role, ir::Role::User);
    }

    #[test]
    fn parses_bare_object_input_as_single_message() {
        let req = parse_request(
            json!({
                "model": "gpt-4o-mini",
                "input": {"role": "user", "content": "hi"}
            }),
            "req_4".to_string(),
        )
        .unwrap();

        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.messages[0].role, ir::Role::User);
    }

    #[test]
    fn parses_plain_string_and_text_like_array_elements() {
        let req = parse_request(
            json!({
                "model": "gpt-4o-mini",
                "input": ["hello", {"text": "world"}]
            }),
            "req_5".to_string(),
        )
        .unwrap();

        assert_eq!(req.messages.len(), 2);
        assert!(req.messages.iter().all(|m| m.role == ir::Role::User));
    }

    #[test]
    fn accepts_camelcase_call_id_alias_on_function_call_output() {
        let req = parse_request(
            json!({
                "model": "gpt-4o-mini",
                "input": [
                    {"type": "function_call", "call_id": "c1", "name": "lookup", "arguments": "{}"},
                    {"type": "function_call_output", "callId": "c1", "output": "42"}
                ]
            }),
            "req_6".to_string(),
        )
        .unwrap();

        assert_eq!(req.messages[1].tool_call_id.as_deref(), Some("c1"));
    }

    #[test]
    fn status_is_incomplete_when_finish_reason_is_length() {
        let response = ir::Response {
            id: "resp_2".to_string(),
            model: "gpt-4o-mini".to_string(),
            operation: ir::Operation::Responses,
            output: vec![],
            usage: None,
            finish_reason: Some(ir::FinishReason::Length),
            error: None,
            metadata: Default::default(),
        };

        assert_eq!(render_response(&response, 0).status, "incomplete");
    }

    #[test]
    fn renders_function_call_output_item_for_ir_tool_call() {
        let response = ir::Response {
            id: "resp_1".to_string(),
            model: "gpt-4o-mini".to_string(),
            operation: ir::Operation::Responses,
            output: vec![ir::OutputBlock::ToolCall {
                call_id: "c1".to_string(),
                name: "lookup".to_string(),
                arguments: "{}".to_string(),
                status: ir::BlockStatus::Completed,
            }],
            usage: None,
            finish_reason: Some(ir::FinishReason::ToolCalls),
            error: None,
            metadata: Default::default(),
        };

        let rendered = render_response(&response, 0);
        assert!(matches!(rendered.output[0], ResponsesOutputItem::FunctionCall { ref name, .. } if name == "lookup"));
    }
}
