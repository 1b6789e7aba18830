//! Native Gemini protocol, used for `google/gemini-*` variants.

use config::ModelVariantConfig;
use secrecy::ExposeSecret;
use serde_json::{Value, json};

use crate::error::{LlmError, LlmResult};
use crate::http_client::http_client;
use crate::ir;
use crate::provider::vertex::{access_token, model_resource_path, resolve_location};
use crate::provider::{expanded_provider_config, map_http_error, map_transport_error, string_config};
use crate::signature_cache;

pub(super) async fn complete(request: &ir::Request, variant: &ModelVariantConfig) -> LlmResult<ir::Response> {
    let cfg = expanded_provider_config(variant)?;
    let project = string_config(&cfg, "project")
        .or_else(config::env::vertex_project_id)
        .ok_or_else(|| LlmError::ProviderNotConfigured("missing Vertex project id".to_string()))?;
    let location = resolve_location(&variant.model, string_config(&cfg, "location").or_else(config::env::vertex_location).as_deref());
    let token = access_token()?;

    let host = if location == "global" {
        "aiplatform.googleapis.com".to_string()
    } else {
        format!("{location}-aiplatform.googleapis.com")
    };
    let model_path = model_resource_path(&project, &location, &variant.model);
    let url = format!("https://{host}/v1/{model_path}:generateContent");

    let body = build_request_body(request);

    let response = http_client()
        .post(url)
        .bearer_auth(token.expose_secret())
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

/// Whether the Gemini thought-signature reattachment dance applies to
/// this model: Gemini 3 requires it to continue a reasoning chain across
/// turns, but the image-preview SKUs don't emit or expect one.
fn applies_thought_signature(model: &str) -> bool {
    let model = model.to_ascii_lowercase();
    model.contains("gemini-3") && !model.contains("image")
}

/// Group consecutive same-role messages into a single Gemini `Content`,
/// and render tool calls/results as `functionCall`/`functionResponse`
/// parts.
fn build_request_body(request: &ir::Request) -> Value {
    let mut contents: Vec<Value> = Vec::new();
    let mut call_names: std::collections::HashMap<String, String> = std::collections::HashMap::new();
    let reattach_signature = applies_thought_signature(&request.model);
    let mut signature_attached = false;

    for message in &request.messages {
        if message.role == ir::Role::System {
            continue;
        }

        let role = match message.role {
            ir::Role::Assistant => "model",
            _ => "user",
        };

        let mut parts = Vec::new();

        if let Some(tool_call_id) = &message.tool_call_id {
            let text: String = message.content.iter().filter_map(ir::ContentBlock::as_text).collect();
            let name = call_names.get(tool_call_id).cloned().unwrap_or_else(|| tool_call_id.clone());
            parts.push(json!({
                "functionResponse": { "name": name, "response": { "result": text } }
            }));
        } else {
            for block in &message.content {
                match block {
                    ir::ContentBlock::Text { text } => parts.push(json!({ "text": text })),
                    ir::ContentBlock::Reasoning { text, signature: _ } => {
                        parts.push(json!({ "text": text, "thought": true }))
                    }
                    ir::ContentBlock::ImageUrl { url: Some(url), mime } => parts.push(json!({
                        "fileData": { "fileUri": url, "mimeType": mime.clone().unwrap_or_else(|| "image/png".to_string()) }
                    })),
                    _ => {}
                }
            }

            if let Some(tool_calls) = &message.tool_calls {
                for call in tool_calls {
                    call_names.insert(call.id.clone(), call.name.clone());

                    let mut function_call = json!({ "functionCall": { "name": call.name, "args": call.arguments_value() } });

                    if reattach_signature && !signature_attached {
                        signature_attached = true;
                        let signature = signature_cache::global().get(&call.id).unwrap_or_else(|| {
                            log::warn!("no cached thought signature for tool call {}; using skip-validator sentinel", call.id);
                            signature_cache::SKIP_VALIDATOR_SENTINEL.to_string()
                        });
                        function_call["thoughtSignature"] = json!(signature);
                    }

                    parts.push(function_call);
                }
            }
        }

        if parts.is_empty() {
            continue;
        }

        // Merge into the previous Content if it shares the same role (role grouping).
        if let Some(last) = contents.last_mut() {
            if last["role"] == json!(role) {
                last["parts"].as_array_mut().unwrap().extend(parts);
                continue;
            }
        }
        contents.push(json!({ "role": role, "parts": parts }));
    }

    let mut body = serde_json::Map::new();
    body.insert("contents".to_string(), json!(contents));

    if let Some(system) = request.system_joined() {
        body.insert("systemInstruction".to_string(), json!({ "parts": [{ "text": system }] }));
    }

    if let Some(tools) = &request.tools {
        body.insert(
            "tools".to_string(),
            json!([{
                "functionDeclarations": tools.iter().map(|t| json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                })).collect::<Vec<_>>(),
            }]),
        );
    }

    let mut generation_config = serde_json::Map::new();
    if let Some(v) = request.params.temperature {
        generation_config.insert("temperature".to_string(), json!(v));
    }
    if let Some(v) = request.params.top_p {
        generation_config.insert("topP".to_string(), json!(v));
    }
    if let Some(v) = request.params.top_k {
        generation_config.insert("topK".to_string(), json!(v));
    }
    if let Some(v) = request.params.max_tokens {
        generation_config.insert("maxOutputTokens".to_string(), json!(v));
    }
    if let Some(thinking) = &request.params.thinking {
        generation_config.insert("thinkingConfig".to_string(), thinking.clone());
    }
    if !generation_config.is_empty() {
        body.insert("generationConfig".to_string(), Value::Object(generation_config));
    }

    Value::Object(body)
}

fn finish_reason_from_gemini(s: &str) -> ir::FinishReason {
    match s {
        "MAX_TOKENS" => ir::FinishReason::Length,
        "SAFETY" | "PROHIBITED_CONTENT" | "BLOCKLIST" => ir::FinishReason::ContentFilter,
        _ => ir::FinishReason::Stop,
    }
}

fn parse_response(wire: Value, request: &ir::Request) -> LlmResult<ir::Response> {
    let candidate = wire
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .ok_or_else(|| LlmError::InvalidUpstreamResponse("missing candidates[0]".to_string()))?;

    let parts = candidate
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut content = Vec::new();
    let mut tool_calls = Vec::new();

    for part in parts {
        if let Some(function_call) = part.get("functionCall") {
            let name = function_call.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
            let args = function_call.get("args").cloned().unwrap_or(Value::Null);
            let call_id = format!("call_{}_{}", request.id, tool_calls.len());

            if applies_thought_signature(&request.model) {
                if let Some(signature) = part.get("thoughtSignature").and_then(Value::as_str) {
                    signature_cache::global().put(call_id.clone(), signature.to_string());
                }
            }

            tool_calls.push(ir::ToolCall {
                id: call_id,
                name,
                arguments: serde_json::to_string(&args).unwrap_or_default(),
            });
            continue;
        }

        let Some(text) = part.get("text").and_then(Value::as_str) else {
            continue;
        };

        if part.get("thought").and_then(Value::as_bool).unwrap_or(false) {
            content.push(ir::ContentBlock::Reasoning {
                text: text.to_string(),
                signature: part.get("thoughtSignature").and_then(Value::as_str).map(str::to_string),
            });
        } else {
            content.push(ir::ContentBlock::Text { text: text.to_string() });
        }
    }

    let finish_reason = candidate
        .get("finishReason")
        .and_then(Value::as_str)
        .map(finish_reason_from_gemini)
        .or(Some(if tool_calls.is_empty() { ir::FinishReason::Stop } else { ir::FinishReason::ToolCalls }));

    let usage = wire.get("usageMetadata").map(|u| ir::Usage {
        input_tokens: u.get("promptTokenCount").and_then(Value::as_u64).unwrap_or_default() as u32,
        output_tokens: u.get("candidatesTokenCount").and_then(Value::as_u64).unwrap_or_default() as u32,
        total_tokens: u.get("totalTokenCount").and_then(Value::as_u64).unwrap_or_default() as u32,
    });

    Ok(ir::Response {
        id: request.id.clone(),
        model: request.model.clone(),
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
            provider: Some("vertex-gemini".to_string()),
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
            model: "google/gemini-2.5-pro".to_string(),
            profile: None,
            operation: ir::Operation::Chat,
            system: None,
            messages: vec![
                ir::Message::text(ir::Role::User, "hi"),
                ir::Message::text(ir::Role::User, "there"),
            ],
            tools: None,
            stream: Some(false),
            state: ir::State::default(),
            params: ir::Parameters::default(),
            metadata: ir::Metadata::default(),
        }
    }

    #[test]
    fn groups_consecutive_same_role_messages_into_one_content() {
        let body = build_request_body(&request());
        assert_eq!(body["contents"].as_array().unwrap().len(), 1);
        assert_eq!(body["contents"][0]["parts"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn function_response_part_uses_original_tool_name_not_call_id() {
        let mut req = request();
        req.messages = vec![
            ir::Message {
                role: ir::Role::Assistant,
                tool_call_id: None,
                content: vec![],
                tool_calls: Some(vec![ir::ToolCall {
                    id: "call_1".to_string(),
                    name: "lookup".to_string(),
                    arguments: "{}".to_string(),
                }]),
            },
            ir::Message {
                role: ir::Role::Tool,
                tool_call_id: Some("call_1".to_string()),
                content: vec![ir::ContentBlock::Text { text: "42".to_string() }],
                tool_calls: None,
            },
        ];

        let body = build_request_body(&req);
        let contents = body["contents"].as_array().unwrap();
        let function_response = contents.iter().find_map(|c| {
            c["parts"].as_array().unwrap().iter().find(|p| p.get("functionResponse").is_some())
        });
        assert_eq!(function_response.unwrap()["functionResponse"]["name"], json!("lookup"));
    }

    #[test]
    fn reattaches_thought_signature_only_for_gemini_3_non_image_models() {
        let mut req = request();
        req.model = "google/gemini-2.5-pro".to_string();
        req.messages = vec![ir::Message {
            role: ir::Role::Assistant,
            tool_call_id: None,
            content: vec![],
            tool_calls: Some(vec![ir::ToolCall {
                id: "call_1".to_string(),
                name: "lookup".to_string(),
                arguments: "{}".to_string(),
            }]),
        }];

        let body = build_request_body(&req);
        let part = &body["contents"][0]["parts"][0];
        assert!(part.get("thoughtSignature").is_none());
    }

    #[test]
    fn parses_function_call_part_into_ir_tool_call() {
        let wire = serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "functionCall": { "name": "lookup", "args": { "q": "x" } }, "thoughtSignature": "sig-1" }] },
                "finishReason": "STOP"
            }],
            "usageMetadata": { "promptTokenCount": 10, "candidatesTokenCount": 5, "totalTokenCount": 15 }
        });

        let response = parse_response(wire, &request()).unwrap();
        let calls = response.message_block().unwrap().2.unwrap();
        assert_eq!(calls[0].name, "lookup");
    }
}
