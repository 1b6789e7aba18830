//! The model-config YAML document: a logical model name maps to
//! one or more provider-backed variants, selected at request time by a
//! load-balancing strategy.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

/// Selection strategy for a logical model name with multiple variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Always the first configured variant.
    First,
    /// Cycle through variants in configuration order.
    RoundRobin,
    /// Uniformly random variant.
    Random,
    /// Random variant, weighted by `weight`.
    #[default]
    WeightedRandom,
}

/// Upstream provider kind a variant is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    /// Any OpenAI-compatible HTTP endpoint.
    Openai,
    /// Anthropic Messages API.
    Anthropic,
    /// Google Vertex AI (MaaS OpenAI-compatible surface or native Gemini).
    Vertex,
    /// OpenRouter (OpenAI-compatible, with a `provider` routing object).
    Openrouter,
}

/// One concrete `(provider, upstream-model, config)` realization of a
/// logical model name.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelVariantConfig {
    /// Logical name clients request (e.g. `"gpt-4"`, `"default"`).
    pub name: String,

    /// Upstream provider this variant is routed to.
    pub provider: ProviderKind,

    /// The upstream model string sent to the provider (e.g.
    /// `"gpt-4o-mini"`, `"claude-3-7-sonnet-20250219"`,
    /// `"google/gemini-2.5-pro"`).
    pub model: String,

    /// Relative weight for `weighted_random` selection. Defaults to 1.
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Per-variant strategy override. When unset, the registry default or
    /// the first variant's strategy applies.
    #[serde(default)]
    pub strategy: Option<SelectionStrategy>,

    /// Whether the ensure-tool-call subsystem is engaged for this variant.
    #[serde(default)]
    pub ensure_tool_call: bool,

    /// Routing profile this variant belongs to. Selectable by URL prefix.
    #[serde(default)]
    pub profile: Option<String>,

    /// Opaque provider-specific configuration. Values of the form
    /// `"$NAME"` are environment-variable placeholders, expanded at
    /// resolution time, not at load time.
    #[serde(default)]
    pub provider_config: HashMap<String, Value>,
}

fn default_weight() -> u32 {
    1
}

/// Top-level model-config YAML document.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfigFile {
    /// Strategy used when a variant has no explicit override and it is the
    /// first variant for its logical name.
    #[serde(default)]
    pub default_strategy: SelectionStrategy,

    /// All configured variants, across all logical names.
    #[serde(default)]
    pub models: Vec<ModelVariantConfig>,
}

impl ModelConfigFile {
    /// Parse a YAML document into a model-config file.
    pub fn from_yaml(source: &str) -> Result<Self, crate::ConfigError> {
        serde_yaml::from_str(source).map_err(crate::ConfigError::InvalidYaml)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn parses_minimal_document() {
        let doc = ModelConfigFile::from_yaml(indoc! {r#"
            default_strategy: weighted_random
            models:
              - name: default
                provider: openai
                model: gpt-4o-mini
                weight: 3
              - name: default
                provider: anthropic
                model: claude-3-7-sonnet-20250219
                weight: 1
                profile: eval
        "#})
        .unwrap();

        assert_eq!(doc.default_strategy, SelectionStrategy::WeightedRandom);
        assert_eq!(doc.models.len(), 2);
        assert_eq!(doc.models[0].weight, 3);
        assert_eq!(doc.models[1].profile.as_deref(), Some("eval"));
    }

    #[test]
    fn defaults_weight_and_ensure_tool_call() {
        let doc = ModelConfigFile::from_yaml(indoc! {r#"
            models:
              - name: default
                provider: openai
                model: gpt-4o-mini
        "#})
        .unwrap();

        let variant = &doc.models[0];
        assert_eq!(variant.weight, 1);
        assert!(!variant.ensure_tool_call);
        assert!(variant.strategy.is_none());
    }

    #[test]
    fn provider_config_accepts_env_placeholders() {
        let doc = ModelConfigFile::from_yaml(indoc! {r#"
            models:
              - name: default
                provider: vertex
                model: google/gemini-2.5-pro
                provider_config:
                  project: "$VERTEX_PROJECT_ID"
                  location: us-central1
        "#})
        .unwrap();

        let cfg = &doc.models[0].provider_config;
        assert_eq!(cfg["project"], Value::String("$VERTEX_PROJECT_ID".to_string()));
        assert_eq!(cfg["location"], Value::String("us-central1".to_string()));
    }
}
