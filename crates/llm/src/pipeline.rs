//! The pipeline driver: resolves a variant, forces the
//! upstream call non-streaming, runs the ingress chain, calls the
//! provider (or serves a synthetic response), runs the egress chain, and
//! loops for the ensure-tool-call subsystem's reminder retries up to
//! `max_attempts`.

use uuid::Uuid;

use crate::error::{LlmError, LlmResult};
use crate::ir;
use crate::provider;
use crate::registry::Registry;
use crate::transform::ensure_tool_call::{self, RetryDecision};
use crate::transform::{run_egress, run_ingress};

pub struct Pipeline {
    registry: Registry,
}

impl Pipeline {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    pub fn model_names(&self) -> Vec<String> {
        self.registry.model_names()
    }

    /// Run one client request through to a completed IR response.
    ///
    /// The caller (the axum handler) decides whether to render this as a
    /// single JSON body or synthesize an SSE stream from it — the driver
    /// itself always produces a single, complete [`ir::Response`].
    pub async fn run(&self, mut request: ir::Request) -> LlmResult<ir::Response> {
        if request.id.is_empty() {
            request.id = format!("req_{}", Uuid::new_v4());
        }

        request.state.original_stream = request.stream.unwrap_or(false);
        request.stream = Some(false);

        if request.state.max_attempts == 0 {
            request.state.max_attempts = config::default_max_attempts();
        }

        let variant = self.registry.resolve(&request.model, request.profile.as_deref())?.clone();

        if variant.ensure_tool_call && request.state.ensure_tool_call.is_none() {
            request.state.ensure_tool_call = Some(ir::EnsureToolCallState::default());
        }

        let provider = provider::for_kind(variant.provider);

        loop {
            request.state.retry = false;
            run_ingress(&mut request);

            let mut response = if request.state.synthetic_response {
                synthesize_from_stashed_answer(&request)
            } else {
                provider.complete(&request, &variant).await?
            };

            run_egress(&request, &mut response);

            if request.state.ensure_tool_call.is_some() {
                match ensure_tool_call::decide_retry(&mut request, &response) {
                    RetryDecision::Done => return Ok(response),
                    RetryDecision::Exhausted => {
                        return Err(LlmError::EnsureToolCallExhausted(request.state.max_attempts));
                    }
                    RetryDecision::Retry => continue,
                }
            }

            if request.state.retry {
                continue;
            }

            return Ok(response);
        }
    }
}

/// Build the short-circuit response for the ensure-tool-call skip
/// heuristic: a turn the driver already terminated on a prior iteration.
fn synthesize_from_stashed_answer(request: &ir::Request) -> ir::Response {
    let final_answer = request
        .state
        .ensure_tool_call
        .as_ref()
        .and_then(|s| s.final_answer.clone())
        .unwrap_or_default();

    ir::Response {
        id: request.id.clone(),
        model: request.model.clone(),
        operation: request.operation,
        output: vec![ir::OutputBlock::Message {
            role: ir::Role::Assistant,
            content: vec![ir::ContentBlock::Text { text: final_answer }],
            tool_calls: None,
            status: ir::BlockStatus::Completed,
        }],
        usage: None,
        finish_reason: Some(ir::FinishReason::Stop),
        error: None,
        metadata: ir::ResponseMetadata {
            synthetic: true,
            ..Default::default()
        },
    }
}
