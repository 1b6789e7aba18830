//! The LLM gateway core: a dialect-neutral IR, bidirectional client
//! dialect adapters, a transform pipeline, provider adapters, a model
//! registry, and a streaming synthesizer.
//!
//! [`router`] wires the three client-facing surfaces — OpenAI Chat
//! Completions, Anthropic Messages, OpenAI Responses — onto one
//! [`Pipeline`].

pub mod dialect;
pub mod error;
mod http_client;
pub mod ir;
pub mod pipeline;
pub mod provider;
pub mod registry;
pub mod signature_cache;
pub mod streaming;
pub mod transform;

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::StreamExt;
use serde_json::{Value, json};
use uuid::Uuid;

use error::{AnthropicErrorResponse, AnthropicResult, LlmResult};
use pipeline::Pipeline;

#[derive(Clone)]
pub struct LlmState {
    pipeline: Arc<Pipeline>,
}

impl LlmState {
    pub fn new(registry: registry::Registry) -> Self {
        Self {
            pipeline: Arc::new(Pipeline::new(registry)),
        }
    }
}

/// The gateway's axum router: `/v1/chat/completions`, `/v1/messages`,
/// `/v1/responses`, a `/v1/models` listing, and profile-prefixed
/// variants of the three POST routes (`/{profile}/v1/...`) that route to
/// the same handlers with the path segment threaded through as
/// [`ir::Request::profile`].
pub fn router(state: LlmState) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/messages", post(anthropic_messages))
        .route("/v1/responses", post(responses))
        .route("/{profile}/v1/chat/completions", post(chat_completions_with_profile))
        .route("/{profile}/v1/messages", post(anthropic_messages_with_profile))
        .route("/{profile}/v1/responses", post(responses_with_profile))
        .route("/v1/models", get(list_models))
        .with_state(state)
}

fn now_epoch() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default()
}

fn new_request_id() -> String {
    format!("req_{}", Uuid::new_v4())
}

async fn list_models(State(state): State<LlmState>) -> Json<Value> {
    let models = state.pipeline.model_names();
    Json(json!({
        "object": "list",
        "data": models.into_iter().map(|id| json!({ "id": id, "object": "model" })).collect::<Vec<_>>(),
    }))
}

async fn chat_completions(State(state): State<LlmState>, Json(body): Json<Value>) -> Response {
    chat_completions_inner(state, None, body).await
}

async fn chat_completions_with_profile(
    State(state): State<LlmState>,
    axum::extract::Path(profile): axum::extract::Path<String>,
    Json(body): Json<Value>,
) -> Response {
    chat_completions_inner(state, Some(profile), body).await
}

async fn chat_completions_inner(state: LlmState, profile: Option<String>, body: Value) -> Response {
    let wants_stream = body.get("stream").and_then(Value::as_bool).unwrap_or(false);

    let mut request = match dialect::openai_chat::parse_request(body, new_request_id()) {
        Ok(request) => request,
        Err(err) => return err.into_response(),
    };
    request.profile = profile;

    match state.pipeline.run(request).await {
        Ok(response) => {
            if wants_stream {
                let created = now_epoch();
                let stream = streaming::openai_chat_stream(response, created).map(Ok::<_, Infallible>);
                Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
            } else {
                Json(dialect::openai_chat::render_response(&response, now_epoch())).into_response()
            }
        }
        Err(err) => err.into_response(),
    }
}

async fn anthropic_messages(State(state): State<LlmState>, Json(body): Json<Value>) -> Response {
    match anthropic_messages_inner(state, None, body).await {
        Ok(response) => response,
        Err(err) => AnthropicErrorResponse::from(err).into_response(),
    }
}

async fn anthropic_messages_with_profile(
    State(state): State<LlmState>,
    axum::extract::Path(profile): axum::extract::Path<String>,
    Json(body): Json<Value>,
) -> Response {
    match anthropic_messages_inner(state, Some(profile), body).await {
        Ok(response) => response,
        Err(err) => AnthropicErrorResponse::from(err).into_response(),
    }
}

async fn anthropic_messages_inner(state: LlmState, profile: Option<String>, body: Value) -> AnthropicResult<Response> {
    let wants_stream = body.get("stream").and_then(Value::as_bool).unwrap_or(false);
    let mut request = dialect::anthropic::parse_request(body, new_request_id()).map_err(AnthropicErrorResponse::from)?;
    request.profile = profile;

    let response = state.pipeline.run(request).await.map_err(AnthropicErrorResponse::from)?;

    Ok(if wants_stream {
        let stream = streaming::anthropic_stream(response).map(Ok::<_, Infallible>);
        Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
    } else {
        Json(dialect::anthropic::render_response(&response)).into_response()
    })
}

async fn responses(State(state): State<LlmState>, Json(body): Json<Value>) -> Response {
    responses_inner(state, None, body).await
}

async fn responses_with_profile(
    State(state): State<LlmState>,
    axum::extract::Path(profile): axum::extract::Path<String>,
    Json(body): Json<Value>,
) -> Response {
    responses_inner(state, Some(profile), body).await
}

async fn responses_inner(state: LlmState, profile: Option<String>, body: Value) -> Response {
    let wants_stream = body.get("stream").and_then(Value::as_bool).unwrap_or(false);

    let mut request = match dialect::openai_responses::parse_request(body, new_request_id()) {
        Ok(request) => request,
        Err(err) => return err.into_response(),
    };
    request.profile = profile;

    match state.pipeline.run(request).await {
        Ok(response) => {
            if wants_stream {
                let created = now_epoch();
                let stream = streaming::openai_responses_stream(response, created).map(Ok::<_, Infallible>);
                Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
            } else {
                Json(dialect::openai_responses::render_response(&response, now_epoch())).into_response()
            }
        }
        Err(err) => err.into_response(),
    }
}

/// Run one IR request end to end without going through axum, for use by
/// the binary crate's CLI health checks and by integration tests.
pub async fn run(state: &LlmState, request: ir::Request) -> LlmResult<ir::Response> {
    state.pipeline.run(request).await
}
