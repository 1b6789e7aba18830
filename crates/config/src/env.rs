//! Recognized environment variables and `$NAME` expansion for
//! `provider_config` maps.
//!
//! `provider_config` values are expanded at variant-*resolution* time, not at
//! config-load time, so that a long-lived process always picks up the
//! current environment (e.g. a rotated API key) without a restart.

use std::env::VarError;

use serde_json::Value;

/// An environment variable named in a `"$NAME"` placeholder was not set.
#[derive(Debug, thiserror::Error)]
#[error("environment variable '{0}' is not set")]
pub struct MissingEnvVar(pub String);

/// Recursively replace every `"$NAME"` string leaf in `value` with the
/// current value of the `NAME` environment variable.
///
/// Only whole-string placeholders are recognized (`"$OPENAI_API_KEY"`), not
/// interpolation inside a larger string; this matches the narrow `$NAME`
/// convention described in the model-config format.
pub fn expand(value: &Value) -> Result<Value, MissingEnvVar> {
    match value {
        Value::String(s) => {
            if let Some(name) = s.strip_prefix('$') {
                match std::env::var(name) {
                    Ok(v) => Ok(Value::String(v)),
                    Err(VarError::NotPresent) => Err(MissingEnvVar(name.to_string())),
                    Err(VarError::NotUnicode(_)) => Err(MissingEnvVar(name.to_string())),
                }
            } else {
                Ok(value.clone())
            }
        }
        Value::Array(items) => {
            let expanded = items.iter().map(expand).collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Array(expanded))
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), expand(v)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

/// Read an environment variable, returning `None` when unset or empty.
pub fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// `OPENAI_BASE_URL`
pub fn openai_base_url() -> Option<String> {
    var("OPENAI_BASE_URL")
}

/// `OPENAI_API_KEY`
pub fn openai_api_key() -> Option<String> {
    var("OPENAI_API_KEY")
}

/// `OPENROUTER_API_KEY`
pub fn openrouter_api_key() -> Option<String> {
    var("OPENROUTER_API_KEY")
}

/// `OPENROUTER_BASE_URL`
pub fn openrouter_base_url() -> Option<String> {
    var("OPENROUTER_BASE_URL")
}

/// `OPENROUTER_PROVIDERS` — comma-separated provider name list.
pub fn openrouter_providers() -> Option<Vec<String>> {
    var("OPENROUTER_PROVIDERS").map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
}

/// `OPENROUTER_ORDER` — comma-separated, takes precedence over `OPENROUTER_PROVIDERS`.
pub fn openrouter_order() -> Option<Vec<String>> {
    var("OPENROUTER_ORDER").map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
}

/// `OPENROUTER_SORT`
pub fn openrouter_sort() -> Option<String> {
    var("OPENROUTER_SORT")
}

/// `OPENROUTER_ALLOW_FALLBACKS`
pub fn openrouter_allow_fallbacks() -> Option<bool> {
    var("OPENROUTER_ALLOW_FALLBACKS").and_then(|v| v.parse().ok())
}

/// `OPENROUTER_MODEL_SHORTCUT`
pub fn openrouter_model_shortcut() -> Option<String> {
    var("OPENROUTER_MODEL_SHORTCUT")
}

/// `VERTEX_PROJECT_ID`
pub fn vertex_project_id() -> Option<String> {
    var("VERTEX_PROJECT_ID")
}

/// `VERTEX_LOCATION`
pub fn vertex_location() -> Option<String> {
    var("VERTEX_LOCATION")
}

/// `VERTEX_CHAT_ENDPOINT`
pub fn vertex_chat_endpoint() -> Option<String> {
    var("VERTEX_CHAT_ENDPOINT")
}

/// `GOOGLE_APPLICATION_CREDENTIALS` — path to a service-account JSON file, or
/// the inline JSON document itself.
pub fn google_application_credentials() -> Option<String> {
    var("GOOGLE_APPLICATION_CREDENTIALS")
}

/// `MODEL_CONFIG` — inline YAML document for the model registry.
pub fn model_config_inline() -> Option<String> {
    var("MODEL_CONFIG")
}

/// `MODEL_CONFIG_PATH` — path to the model registry YAML document.
pub fn model_config_path() -> Option<String> {
    var("MODEL_CONFIG_PATH")
}

/// `ENSURE_TOOL_CALL_MAX_ATTEMPTS` — default retry budget, clamped to `[1, 5]`.
pub fn ensure_tool_call_max_attempts() -> Option<u8> {
    var("ENSURE_TOOL_CALL_MAX_ATTEMPTS")
        .and_then(|v| v.parse::<u8>().ok())
        .map(|v| v.clamp(1, 5))
}

/// `CACHE_DIR` — directory holding the signature cache database.
pub fn cache_dir() -> Option<String> {
    var("CACHE_DIR")
}
