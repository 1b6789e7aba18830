//! The native Anthropic Messages API provider.

use async_trait::async_trait;
use config::ModelVariantConfig;
use secrecy::ExposeSecret;
use serde_json::{Value, json};

use crate::error::{LlmError, LlmResult};
use crate::http_client::http_client;
use crate::ir;
use crate::provider::{Provider, expanded_provider_config, map_http_error, map_transport_error, secret_config, string_config};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider;

#[async_trait]
impl Provider for AnthropicProvider {
    async fn complete(&self, request: &ir::Request, variant: &ModelVariantConfig) -> LlmResult<ir::Response> {
        let cfg = expanded_provider_config(variant)?;
        let base_url = string_config(&cfg, "base_url").unwrap_or_else(|| "https://api.anthropic.com".to_string());
        let api_key = secret_config(&cfg, "api_key")
            .ok_or_else(|| LlmError::ProviderNotConfigured("missing Anthropic API key".to_string()))?;

        let body = build_request_body(request, &variant.model);

        let response = http_client()
            .post(format!("{}/v1/messages", base_url.trim_end_matches('/')))
            .header("x-api-key", api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(map_transport_error)?;

        if !status.is_success() {
            return Err(map_http_error(status, text));
        }

        let wire: Value = serde_json::from_str(&text).map_err(|e| LlmError::InvalidUpstreamResponse(e.to_string()))?;
        parse_response(wire, request)
    }
}

fn build_request_body(request: &ir::Request, model: &str) -> Value {
    let messages: Vec<Value> = request
        .messages
        .iter()
        .filter(|m| m.role != ir::Role::System)
        .map(|message| {
            let mut blocks = Vec::new();

            if let Some(tool_call_id) = &message.tool_call_id {
                let text: String = message.content.iter().filter_map(ir::ContentBlock::as_text).collect();
                blocks.push(json!({ "type": "tool_result", "tool_use_id": tool_call_id, "content": text }));
            } else {
                for block in &message.content {
                    match block {
                        ir::ContentBlock::Text { text } => blocks.push(json!({ "type": "text", "text": text })),
                        ir::ContentBlock::Reasoning { text, signature } => {
                            blocks.push(json!({ "type": "thinking", "thinking": text, "signature": signature }))
                        }
                        ir::ContentBlock::ImageUrl { url: Some(url), .. } => {
                            blocks.push(json!({ "type": "image", "source": { "type": "url", "url": url } }))
                        }
                        _ => {}
                    }
                }
                if let Some(tool_calls) = &message.tool_calls {
                    for call in tool_calls {
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": call.id,
                            "name": call.name,
                            "input": call.arguments_value(),
                        }));
                    }
                }
            }

            let role = match message.role {
                ir::Role::Tool => "user",
                ir::Role::Assistant => "assistant",
                _ => "user",
            };

            json!({ "role": role, "content": blocks })
        })
        .collect();

    let mut body = serde_json::Map::new();
    body.insert("model".to_string(), json!(model));
    body.insert("messages".to_string(), json!(messages));
    body.insert("max_tokens".to_string(), json!(request.params.max_tokens.unwrap_or(4096)));
    body.insert("stream".to_string(), json!(false));

    if let Some(system) = request.system_joined() {
        body.insert("system".to_string(), json!(system));
    }
    if let Some(v) = request.params.temperature {
        body.insert("temperature".to_string(), json!(v));
    }
    if let Some(v) = request.params.top_p {
        body.insert("top_p".to_string(), json!(v));
    }
    if let Some(v) = request.params.top_k {
        body.insert("top_k".to_string(), json!(v));
    }

    if let Some(tools) = &request.tools {
        body.insert(
            "tools".to_string(),
            json!(
                tools
                    .iter()
                    .map(|t| json!({ "name": t.name, "description": t.description, "input_schema": t.parameters }))
                    .collect::<Vec<_>>()
            ),
        );
    }

    Value::Object(body)
}

fn parse_response(wire: Value, request: &ir::Request) -> LlmResult<ir::Response> {
    let id = wire.get("id").and_then(Value::as_str).unwrap_or(&request.id).to_string();
    let model = wire
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or(&request.model)
        .to_string();

    let content_blocks = wire
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| LlmError::InvalidUpstreamResponse("missing content".to_string()))?;

    let mut content = Vec::new();
    let mut tool_calls = Vec::new();

    for block in content_blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    content.push(ir::ContentBlock::Text { text: text.to_string() });
                }
            }
            Some("thinking") => {
                if let Some(text) = block.get("thinking").and_then(Value::as_str) {
                    content.push(ir::ContentBlock::Reasoning {
                        text: text.to_string(),
                        signature: block.get("signature").and_then(Value::as_str).map(str::to_string),
                    });
                }
            }
            Some("tool_use") => {
                if let (Some(id), Some(name)) = (
                    block.get("id").and_then(Value::as_str),
                    block.get("name").and_then(Value::as_str),
                ) {
                    tool_calls.push(ir::ToolCall {
                        id: id.to_string(),
                        name: name.to_string(),
                        arguments: serde_json::to_string(block.get("input").unwrap_or(&Value::Null)).unwrap_or_default(),
                    });
                }
            }
            _ => {}
        }
    }

    let finish_reason = wire
        .get("stop_reason")
        .and_then(Value::as_str)
        .map(crate::dialect::anthropic::parse_stop_reason);

    let usage = wire.get("usage").map(|u| ir::Usage {
        input_tokens: u.get("input_tokens").and_then(Value::as_u64).unwrap_or_default() as u32,
        output_tokens: u.get("output_tokens").and_then(Value::as_u64).unwrap_or_default() as u32,
        total_tokens: u.get("input_tokens").and_then(Value::as_u64).unwrap_or_default() as u32
            + u.get("output_tokens").and_then(Value::as_u64).unwrap_or_default() as u32,
    });

    Ok(ir::Response {
        id,
        model,
        operation: request.operation,
        output: vec![ir::OutputBlock::Message {
            role: ir::Role::Assistant,
            content,
            tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
            status: ir::BlockStatus::Completed,
        }],
        usage,
        finish_reason,
        error: None,
        metadata: ir::ResponseMetadata {
            provider: Some("anthropic".to_string()),
            ..Default::default()
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ir::Request {
        ir::Request {
            id: "req_1".to_string(),
            model: "claude-3-7-sonnet-20250219".to_string(),
            profile: None,
            operation: ir::Operation::Messages,
            system: Some(vec!["be terse".to_string()]),
            messages: vec![ir::Message::text(ir::Role::User, "hi")],
            tools: None,
            stream: Some(false),
            state: ir::State::default(),
            params: ir::Parameters::default(),
            metadata: ir::Metadata::default(),
        }
    }

    #[test]
    fn builds_system_as_top_level_field_not_a_message() {
        let body = build_request_body(&request(), "claude-3-7-sonnet-20250219");
        assert_eq!(body["system"], serde_json::json!("be terse"));
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn parses_tool_use_block_into_ir_tool_call() {
        let wire = serde_json::json!({
            "id": "msg_1",
            "model": "claude-3-7-sonnet-20250219",
            "content": [{"type": "tool_use", "id": "t1", "name": "lookup", "input": {"q": "x"}}],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 10, "output_tokens": 5}
        });

        let response = parse_response(wire, &request()).unwrap();
        assert_eq!(response.finish_reason, Some(ir::FinishReason::ToolCalls));
        assert_eq!(response.usage.unwrap().total_tokens, 15);
    }
}
