//! Errors raised while locating, reading, or parsing the model-config
//! document.

/// Failure modes for [`crate::load`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Neither `MODEL_CONFIG` nor `MODEL_CONFIG_PATH` is set and no path was
    /// given explicitly.
    #[error("no model config source: set MODEL_CONFIG, MODEL_CONFIG_PATH, or pass an explicit path")]
    NoSource,

    /// The configured path could not be read.
    #[error("failed to read model config at '{path}': {source}")]
    Io {
        /// Path that failed to read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The document did not parse as valid YAML against the expected shape.
    #[error("invalid model config YAML: {0}")]
    InvalidYaml(#[source] serde_yaml::Error),
}
