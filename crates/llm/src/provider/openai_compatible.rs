//! Any OpenAI-compatible Chat Completions HTTP endpoint: the default
//! `openai` provider kind, and the base the `openrouter` and Vertex-MaaS
//! adapters build on.

use async_trait::async_trait;
use config::ModelVariantConfig;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};

use crate::error::{LlmError, LlmResult};
use crate::http_client::http_client;
use crate::ir;
use crate::provider::{Provider, expanded_provider_config, map_http_error, map_transport_error, secret_config, string_config};

pub struct OpenAiCompatibleProvider;

#[async_trait]
impl Provider for OpenAiCompatibleProvider {
    async fn complete(&self, request: &ir::Request, variant: &ModelVariantConfig) -> LlmResult<ir::Response> {
        let cfg = expanded_provider_config(variant)?;
        let base_url = string_config(&cfg, "base_url")
            .or_else(config::env::openai_base_url)
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let api_key = secret_config(&cfg, "api_key")
            .or_else(|| config::env::openai_api_key().map(SecretString::from))
            .ok_or_else(|| LlmError::ProviderNotConfigured("missing OpenAI API key".to_string()))?;

        let body = build_request_body(request, &variant.model);

        let response = http_client()
            .post(format!("{}/chat/completions", base_url.trim_end_matches('/')))
            .bearer_auth(api_key.expose_secret())
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

/// Build an upstream `chat.completions` request body from the IR. Always
/// forces `stream: false` regardless of `request.stream`: the gateway
/// never asks upstream for a provider-side stream.
pub(crate) fn build_request_body(request: &ir::Request, model: &str) -> Value {
    let mut messages = Vec::new();

    if let Some(system) = request.system_joined() {
        messages.push(json!({ "role": "system", "content": system }));
    }

    for message in &request.messages {
        let mut entry = serde_json::Map::new();
        entry.insert("role".to_string(), json!(message.role.as_str()));

        let text: String = message
            .content
            .iter()
            .filter_map(ir::ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("");
        if !text.is_empty() || message.tool_calls.is_none() {
            entry.insert("content".to_string(), json!(text));
        }

        if let Some(tool_call_id) = &message.tool_call_id {
            entry.insert("tool_call_id".to_string(), json!(tool_call_id));
        }

        if let Some(tool_calls) = &message.tool_calls {
            entry.insert(
                "tool_calls".to_string(),
                json!(
                    tool_calls
                        .iter()
                        .map(|c| json!({
                            "id": c.id,
                            "type": "function",
                            "function": { "name": c.name, "arguments": c.arguments },
                        }))
                        .collect::<Vec<_>>()
                ),
            );
        }

        messages.push(Value::Object(entry));
    }

    let mut body = serde_json::Map::new();
    body.insert("model".to_string(), json!(model));
    body.insert("messages".to_string(), json!(messages));
    body.insert("stream".to_string(), json!(false));

    if let Some(tools) = &request.tools {
        body.insert(
            "tools".to_string(),
            json!(
                tools
                    .iter()
                    .map(|t| json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                            "strict": t.strict,
                        },
                    }))
                    .collect::<Vec<_>>()
            ),
        );
    }

    if let Some(v) = request.params.temperature {
        body.insert("temperature".to_string(), json!(v));
    }
    if let Some(v) = request.params.top_p {
        body.insert("top_p".to_string(), json!(v));
    }
    if let Some(v) = request.params.max_tokens {
        body.insert("max_tokens".to_string(), json!(v));
    }

    Value::Object(body)
}

/// Parse an upstream `chat.completion` response object into the IR.
pub(crate) fn parse_response(wire: Value, request: &ir::Request) -> LlmResult<ir::Response> {
    let id = wire.get("id").and_then(Value::as_str).unwrap_or(&request.id).to_string();
    let model = wire
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or(&request.model)
        .to_string();

    let choice = wire
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .ok_or_else(|| LlmError::InvalidUpstreamResponse("missing choices[0]".to_string()))?;

    let message = choice
        .get("message")
        .ok_or_else(|| LlmError::InvalidUpstreamResponse("missing choices[0].message".to_string()))?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(|text| vec![ir::ContentBlock::Text { text: text.to_string() }])
        .unwrap_or_default();

    let tool_calls = message.get("tool_calls").and_then(Value::as_array).map(|calls| {
        calls
            .iter()
            .filter_map(|c| {
                Some(ir::ToolCall {
                    id: c.get("id")?.as_str()?.to_string(),
                    name: c.get("function")?.get("name")?.as_str()?.to_string(),
                    arguments: c.get("function")?.get("arguments")?.as_str()?.to_string(),
                })
            })
            .collect::<Vec<_>>()
    });

    let finish_reason = choice.get("finish_reason").and_then(Value::as_str).map(finish_reason_from_str);

    let usage = wire.get("usage").map(|u| ir::Usage {
        input_tokens: u.get("prompt_tokens").and_then(Value::as_u64).unwrap_or_default() as u32,
        output_tokens: u.get("completion_tokens").and_then(Value::as_u64).unwrap_or_default() as u32,
        total_tokens: u.get("total_tokens").and_then(Value::as_u64).unwrap_or_default() as u32,
    });

    Ok(ir::Response {
        id,
        model,
        operation: request.operation,
        output: vec![ir::OutputBlock::Message {
            role: ir::Role::Assistant,
            content,
            tool_calls,
            status: ir::BlockStatus::Completed,
        }],
        usage,
        finish_reason,
        error: None,
        metadata: ir::ResponseMetadata {
            provider: Some("openai".to_string()),
            ..Default::default()
        },
    })
}

fn finish_reason_from_str(s: &str) -> ir::FinishReason {
    match s {
        "length" => ir::FinishReason::Length,
        "content_filter" => ir::FinishReason::ContentFilter,
        "tool_calls" | "function_call" => ir::FinishReason::ToolCalls,
        _ => ir::FinishReason::Stop,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> ir::Request {
        ir::Request {
            id: "req_1".to_string(),
            model: "gpt-4o-mini".to_string(),
            profile: None,
            operation: ir::Operation::Chat,
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
    fn request_body_always_disables_streaming() {
        let body = build_request_body(&request(), "gpt-4o-mini");
        assert_eq!(body["stream"], json!(false));
        assert_eq!(body["messages"][0]["role"], json!("system"));
    }

    #[test]
    fn parses_tool_calls_from_wire_response() {
        let wire = json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o-mini",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{"id": "t1", "type": "function", "function": {"name": "lookup", "arguments": "{}"}}]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        });

        let response = parse_response(wire, &request()).unwrap();
        assert_eq!(response.finish_reason, Some(ir::FinishReason::ToolCalls));
        assert_eq!(response.usage.unwrap().total_tokens, 15);
    }
}
