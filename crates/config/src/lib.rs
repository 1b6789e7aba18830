//! Configuration loading for the LLM gateway: the model-config YAML format,
//! recognized environment variables, and `$NAME` expansion for
//! `provider_config` maps.

pub mod env;
mod error;
mod model;

pub use error::ConfigError;
pub use model::{ModelConfigFile, ModelVariantConfig, ProviderKind, SelectionStrategy};

/// Load the model-config document.
///
/// Resolution order:
/// 1. an explicit `path`, if given;
/// 2. `MODEL_CONFIG` (the YAML document inline);
/// 3. `MODEL_CONFIG_PATH` (a path to the YAML document).
pub fn load(path: Option<&str>) -> Result<ModelConfigFile, ConfigError> {
    if let Some(path) = path {
        return load_from_path(path);
    }

    if let Some(inline) = env::model_config_inline() {
        return ModelConfigFile::from_yaml(&inline);
    }

    if let Some(path) = env::model_config_path() {
        return load_from_path(&path);
    }

    Err(ConfigError::NoSource)
}

fn load_from_path(path: &str) -> Result<ModelConfigFile, ConfigError> {
    let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_string(),
        source,
    })?;

    ModelConfigFile::from_yaml(&source)
}

/// Directory holding the signature-cache database.
///
/// Defaults to `~/.cache/gemini-proxy` when `CACHE_DIR` is unset and the
/// platform has a home directory; falls back to `./.cache/gemini-proxy`
/// otherwise.
pub fn cache_dir() -> std::path::PathBuf {
    if let Some(dir) = env::cache_dir() {
        return std::path::PathBuf::from(dir);
    }

    if let Some(home) = std::env::var_os("HOME") {
        return std::path::PathBuf::from(home).join(".cache").join("gemini-proxy");
    }

    std::path::PathBuf::from(".cache").join("gemini-proxy")
}

/// Default retry budget for the ensure-tool-call subsystem,
/// overridable via `ENSURE_TOOL_CALL_MAX_ATTEMPTS` and clamped to `[1, 5]`.
pub fn default_max_attempts() -> u8 {
    env::ensure_tool_call_max_attempts().unwrap_or(3)
}
