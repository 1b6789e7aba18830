//! Google Vertex AI: a MaaS OpenAI-compatible surface for third-party
//! models, and the native Gemini protocol for `google/gemini-*` models.

mod maas;
mod native;

use async_trait::async_trait;
use config::ModelVariantConfig;
use regex::Regex;
use secrecy::SecretString;
use std::sync::OnceLock;

use crate::error::LlmResult;
use crate::ir;
use crate::provider::Provider;

fn maas_model_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r".*-maas$").expect("valid regex"))
}

pub struct VertexProvider;

#[async_trait]
impl Provider for VertexProvider {
    async fn complete(&self, request: &ir::Request, variant: &ModelVariantConfig) -> LlmResult<ir::Response> {
        if maas_model_pattern().is_match(&variant.model) {
            maas::complete(request, variant).await
        } else {
            native::complete(request, variant).await
        }
    }
}

/// Location to address Vertex at for a given upstream model name.
///
/// `google/gemini-*` and bare `gemini-*` names are only ever served from
/// the `global` endpoint regardless of the variant's configured location
/// any other non-Gemini model keeps its configured/default location; see
/// DESIGN.md for the reasoning.
pub(crate) fn resolve_location(model: &str, configured: Option<&str>) -> String {
    let lower = model.to_ascii_lowercase();
    if lower.starts_with("google/") || lower.starts_with("gemini") {
        return "global".to_string();
    }
    configured.map(str::to_string).unwrap_or_else(|| "us-central1".to_string())
}

/// Normalize an upstream model string into a Vertex model resource path:
/// `projects/{project}/locations/{location}/publishers/google/models/{model}`.
/// Strips a leading `google/` prefix and any `-maas` suffix first.
pub(crate) fn model_resource_path(project: &str, location: &str, model: &str) -> String {
    let model = model.strip_prefix("google/").unwrap_or(model);
    let model = model.strip_suffix("-maas").unwrap_or(model);
    format!("projects/{project}/locations/{location}/publishers/google/models/{model}")
}

/// Read a bearer token for Vertex from `GOOGLE_APPLICATION_CREDENTIALS`.
///
/// The gateway does not implement the full Application Default
/// Credentials flow (service-account JWT signing and token refresh): spec
/// Non-goals exclude a client-auth subsystem, and no OAuth2/JWT crate is
/// part of the dependency stack this crate draws from. The environment
/// variable is expected to already hold a valid bearer token, refreshed
/// by whatever process manages the gateway's credentials.
pub(crate) fn access_token() -> crate::error::LlmResult<SecretString> {
    config::env::google_application_credentials()
        .map(SecretString::from)
        .ok_or_else(|| crate::error::LlmError::ProviderNotConfigured("missing GOOGLE_APPLICATION_CREDENTIALS".to_string()))
}
