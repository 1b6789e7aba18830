//! OpenRouter: OpenAI-compatible Chat Completions wire format plus an
//! OpenRouter-specific `provider` routing object built from environment
//! configuration.

use async_trait::async_trait;
use config::ModelVariantConfig;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};

use crate::error::{LlmError, LlmResult};
use crate::http_client::http_client;
use crate::ir;
use crate::provider::openai_compatible::{build_request_body, parse_response};
use crate::provider::{Provider, expanded_provider_config, map_http_error, map_transport_error, secret_config, string_config};

pub struct OpenRouterProvider;

#[async_trait]
impl Provider for OpenRouterProvider {
    async fn complete(&self, request: &ir::Request, variant: &ModelVariantConfig) -> LlmResult<ir::Response> {
        let cfg = expanded_provider_config(variant)?;
        let base_url = string_config(&cfg, "base_url")
            .or_else(config::env::openrouter_base_url)
            .unwrap_or_else(|| "https://openrouter.ai/api/v1".to_string());
        let api_key = secret_config(&cfg, "api_key")
            .or_else(|| config::env::openrouter_api_key().map(SecretString::from))
            .ok_or_else(|| LlmError::ProviderNotConfigured("missing OpenRouter API key".to_string()))?;

        let model = match config::env::openrouter_model_shortcut() {
            Some(shortcut) => format!("{}:{shortcut}", variant.model),
            None => variant.model.clone(),
        };
        let mut body = build_request_body(request, &model);
        if let Some(routing) = provider_routing_object() {
            body.as_object_mut().unwrap().insert("provider".to_string(), routing);
        }

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
        let mut parsed = parse_response(wire, request)?;
        parsed.metadata.provider = Some("openrouter".to_string());
        Ok(parsed)
    }
}

/// Build the OpenRouter `provider` routing object from
/// `OPENROUTER_ORDER`/`OPENROUTER_PROVIDERS`/`OPENROUTER_SORT`/
/// `OPENROUTER_ALLOW_FALLBACKS`, or `None` when none are set.
fn provider_routing_object() -> Option<Value> {
    let order = config::env::openrouter_order();
    let providers = order.clone().or_else(config::env::openrouter_providers);
    let sort = config::env::openrouter_sort();
    let allow_fallbacks = config::env::openrouter_allow_fallbacks();

    if order.is_none() && providers.is_none() && sort.is_none() && allow_fallbacks.is_none() {
        return None;
    }

    let mut routing = serde_json::Map::new();
    if let Some(order) = order {
        routing.insert("order".to_string(), json!(order));
    } else if let Some(providers) = providers {
        routing.insert("only".to_string(), json!(providers));
    }
    if let Some(sort) = sort {
        routing.insert("sort".to_string(), json!(sort));
    }
    if let Some(allow_fallbacks) = allow_fallbacks {
        routing.insert("allow_fallbacks".to_string(), json!(allow_fallbacks));
    }

    Some(Value::Object(routing))
}
