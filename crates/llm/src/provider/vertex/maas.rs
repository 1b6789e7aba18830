//! Vertex AI Model-as-a-Service: an OpenAI-compatible `chat/completions`
//! surface Vertex exposes for partner models (e.g. Llama, Mistral).

use config::ModelVariantConfig;
use secrecy::ExposeSecret;
use serde_json::Value;

use crate::error::{LlmError, LlmResult};
use crate::http_client::http_client;
use crate::ir;
use crate::provider::openai_compatible::{build_request_body, parse_response};
use crate::provider::vertex::{access_token, resolve_location};
use crate::provider::{expanded_provider_config, map_http_error, map_transport_error, string_config};

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

    let url = string_config(&cfg, "chat_endpoint").or_else(config::env::vertex_chat_endpoint).unwrap_or_else(|| {
        format!("https://{host}/v1/projects/{project}/locations/{location}/endpoints/openapi/chat/completions")
    });

    let model_for_body = variant.model.strip_suffix("-maas").unwrap_or(&variant.model);
    let body = build_request_body(request, model_for_body);

    let response = http_client()
        .post(url)
        .bearer_auth(token.expose_secret())
        .header("X-Goog-User-Project", &project)
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
    let mut parsed = parse_response(wire, request)?;
    parsed.metadata.provider = Some("vertex-maas".to_string());
    Ok(parsed)
}
