//! Error taxonomy: every failure mode the gateway can produce,
//! mapped to an HTTP status and an error-type string, with a render for
//! each of the two client error envelopes (OpenAI-shaped and
//! Anthropic-shaped).

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::dialect::anthropic;

pub type LlmResult<T> = std::result::Result<T, LlmError>;

/// Gateway-wide error type.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The request body didn't parse into the requested dialect's shape.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The requested logical model name has no configured variants.
    #[error("unknown model '{0}'")]
    UnknownModel(String),

    /// A variant resolved to a provider, but a required piece of its
    /// configuration (API key, project id, ...) was not set.
    #[error("provider not configured: {0}")]
    ProviderNotConfigured(String),

    /// A `$NAME` placeholder in `provider_config` referenced an unset
    /// environment variable.
    #[error("{0}")]
    MissingEnvVar(#[from] config::env::MissingEnvVar),

    /// The upstream provider returned a non-2xx HTTP response.
    #[error("upstream provider error ({status}): {message}")]
    UpstreamHttp { status: u16, message: String },

    /// The upstream request could not be sent at all (DNS, TCP, TLS).
    #[error("upstream connection error: {0}")]
    UpstreamConnection(String),

    /// The upstream request exceeded its deadline.
    #[error("upstream request timed out")]
    UpstreamTimeout,

    /// The upstream response did not parse into the expected shape.
    #[error("invalid upstream response: {0}")]
    InvalidUpstreamResponse(String),

    /// The ensure-tool-call subsystem exhausted its reminder/retry budget
    /// without obtaining a terminating tool call.
    #[error("ensure-tool-call budget exhausted after {0} attempts")]
    EnsureToolCallExhausted(u8),

    /// Anything else; message is never shown to clients.
    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

impl LlmError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::UnknownModel(_) => StatusCode::NOT_FOUND,
            Self::ProviderNotConfigured(_) | Self::MissingEnvVar(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::UpstreamHttp { status, .. } => StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
            Self::UpstreamConnection(_) => StatusCode::BAD_GATEWAY,
            Self::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::InvalidUpstreamResponse(_) => StatusCode::BAD_GATEWAY,
            Self::EnsureToolCallExhausted(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_type(&self) -> &str {
        match self {
            Self::InvalidRequest(_) => "invalid_request_error",
            Self::UnknownModel(_) => "not_found_error",
            Self::ProviderNotConfigured(_) | Self::MissingEnvVar(_) => "configuration_error",
            Self::UpstreamHttp { .. } | Self::UpstreamConnection(_) | Self::UpstreamTimeout => "api_error",
            Self::InvalidUpstreamResponse(_) => "api_error",
            Self::EnsureToolCallExhausted(_) => "invalid_response",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Message safe to return to API consumers; internal errors never leak
    /// their source.
    pub fn client_message(&self) -> String {
        match self {
            Self::Internal(_) => "internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorDetails,
}

#[derive(Debug, Serialize)]
struct ErrorDetails {
    message: String,
    r#type: String,
    code: u16,
}

impl IntoResponse for LlmError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorDetails {
                message: self.client_message(),
                r#type: self.error_type().to_string(),
                code: status.as_u16(),
            },
        };
        (status, Json(body)).into_response()
    }
}

/// Anthropic-shaped error envelope, used by the `/v1/messages` handler.
pub struct AnthropicErrorResponse {
    status: StatusCode,
    body: anthropic::ErrorResponse,
}

impl From<LlmError> for AnthropicErrorResponse {
    fn from(error: LlmError) -> Self {
        let status = error.status_code();
        let body = anthropic::ErrorResponse::from(&error);
        Self { status, body }
    }
}

impl IntoResponse for AnthropicErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

pub type AnthropicResult<T> = std::result::Result<T, AnthropicErrorResponse>;
