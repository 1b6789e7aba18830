//! Provider adapters: translate an [`ir::Request`] into an upstream HTTP
//! call and the upstream's JSON response back into an [`ir::Response`].
//!
//! Every adapter always calls upstream non-streaming, even when the
//! client asked for a stream — the driver forces `request.stream` to
//! `false` before a provider ever sees the request, and
//! [`crate::streaming`] synthesizes the client-facing SSE sequence from
//! the completed response afterward. No adapter here implements upstream
//! SSE consumption.

pub mod anthropic;
pub mod openai_compatible;
pub mod openrouter;
pub mod vertex;

use std::collections::HashMap;

use async_trait::async_trait;
use config::ModelVariantConfig;
use secrecy::SecretString;
use serde_json::Value;

use crate::error::LlmResult;
use crate::ir;

#[async_trait]
pub trait Provider: Send + Sync {
    async fn complete(&self, request: &ir::Request, variant: &ModelVariantConfig) -> LlmResult<ir::Response>;
}

/// Expand every `$NAME` placeholder in a variant's `provider_config` against
/// the current environment. This happens at variant-resolution time, not
/// at config-load time, so a rotated secret takes effect without a restart.
pub(crate) fn expanded_provider_config(variant: &ModelVariantConfig) -> LlmResult<HashMap<String, Value>> {
    variant
        .provider_config
        .iter()
        .map(|(k, v)| Ok((k.clone(), config::env::expand(v)?)))
        .collect::<Result<HashMap<_, _>, config::env::MissingEnvVar>>()
        .map_err(Into::into)
}

pub(crate) fn string_config(cfg: &HashMap<String, Value>, key: &str) -> Option<String> {
    cfg.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Like [`string_config`], but wraps the value so it doesn't linger in a
/// `Debug`/log line on its way to an auth header.
pub(crate) fn secret_config(cfg: &HashMap<String, Value>, key: &str) -> Option<SecretString> {
    string_config(cfg, key).map(SecretString::from)
}

/// Map a non-2xx upstream HTTP response to the gateway's error taxonomy,
/// trying to pull a `{error: {message, code}}` shape out of the body first
/// (OpenAI, Anthropic, and OpenRouter all nest their error detail this way).
/// Bodies that don't parse into that shape are passed through verbatim.
pub(crate) fn map_http_error(status: reqwest::StatusCode, body: String) -> crate::error::LlmError {
    crate::error::LlmError::UpstreamHttp {
        status: status.as_u16(),
        message: extract_error_message(&body).unwrap_or(body),
    }
}

/// Try to extract `error.message` (optionally prefixed with `error.code`)
/// from an upstream error body shaped like `{"error": {"message": "...",
/// "code": "..."}}`. Returns `None` when the body isn't JSON or doesn't
/// have that shape, so the caller can fall back to the raw body text.
fn extract_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let error = value.get("error")?;

    let message = error
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| error.as_str())?;

    let code = error.get("code").and_then(|c| c.as_str().map(str::to_string).or_else(|| c.as_i64().map(|n| n.to_string())));

    Some(match code {
        Some(code) => format!("{message} ({code})"),
        None => message.to_string(),
    })
}

/// Map a `reqwest` transport-level error (no HTTP response at all).
pub(crate) fn map_transport_error(err: reqwest::Error) -> crate::error::LlmError {
    if err.is_timeout() {
        crate::error::LlmError::UpstreamTimeout
    } else {
        crate::error::LlmError::UpstreamConnection(err.to_string())
    }
}

/// Return a [`Provider`] instance for the variant's configured kind.
pub fn for_kind(kind: config::ProviderKind) -> Box<dyn Provider> {
    match kind {
        config::ProviderKind::Openai => Box::new(openai_compatible::OpenAiCompatibleProvider),
        config::ProviderKind::Anthropic => Box::new(anthropic::AnthropicProvider),
        config::ProviderKind::Vertex => Box::new(vertex::VertexProvider),
        config::ProviderKind::Openrouter => Box::new(openrouter::OpenRouterProvider),
    }
}
