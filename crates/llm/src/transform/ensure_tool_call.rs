//! The ensure-tool-call subsystem: for variants configured
//! with `ensure_tool_call: true`, every turn must end in either a tool
//! call (to keep an agent loop going) or a clearly marked final answer
//! carried by a synthetic termination tool, so that a model's bare-text
//! reply mid-task can't pass for a finished turn. A model that answers in
//! plain text instead gets a reminder and another attempt, up to the
//! request's `max_attempts` budget.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Value, json};

use crate::ir;
use crate::transform::{EgressTransform, IngressTransform};

const REMINDER_TEXT: &str = "You have not called a tool yet this turn. Reply with a tool call, or call the termination tool if the task is complete.";
const FINAL_ANSWER_REQUIRED_TEXT: &str =
    "Your termination call carried no final answer and no prior reply covers one. Call the termination tool again with a `final_answer` (or `summary`) argument.";

fn termination_tool_description() -> &'static str {
    "Call this exactly once, with your final answer, to end the turn."
}

fn termination_tool_parameters() -> Value {
    json!({
        "type": "object",
        "properties": {
            "final_answer": { "type": "string" },
            "summary": { "type": "string" },
        },
    })
}

fn system_instruction(tool_name: &str) -> String {
    format!("Always reply with at least one tool call; call `{tool_name}` only when the task is fully complete.")
}

fn answer_field_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)^(final[_-]?answer|final|answer|summary)$").expect("valid regex"))
}

/// `Final` and `^(call_*)?[0-9]+$` cover anonymous-terminator call names some
/// models emit in place of the configured tool name; see DESIGN.md for why
/// this stays permissive despite the risk of colliding with a legitimate
/// tool name.
fn anonymous_terminator_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(call_*)?[0-9]+$").expect("valid regex"))
}

fn is_termination_call(call_name: &str, configured: &str) -> bool {
    call_name.eq_ignore_ascii_case(configured) || call_name.eq_ignore_ascii_case("final") || anonymous_terminator_pattern().is_match(call_name)
}

fn is_kimi_model(model: &str) -> bool {
    model.to_ascii_lowercase().contains("kimi")
}

fn todo_write_keyword_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)summary|changes").expect("valid regex"))
}

/// Whether a kimi-family model's single `TodoWrite` call narrating a
/// summary/changes update stands in for a termination call.
fn satisfies_kimi_todo_write(model: &str, tool_calls: &[ir::ToolCall], text: &str) -> bool {
    is_kimi_model(model)
        && matches!(tool_calls, [call] if call.name.eq_ignore_ascii_case("TodoWrite"))
        && todo_write_keyword_pattern().is_match(text)
}

/// First string-valued JSON field whose key looks like an answer field.
fn extract_answer_field(arguments: &Value) -> Option<String> {
    let object = arguments.as_object()?;
    object.iter().find(|(key, _)| answer_field_pattern().is_match(key)).and_then(|(_, v)| v.as_str()).map(str::to_string)
}

/// Whether `message` alone, taken in isolation, already satisfies a
/// termination pattern: a zero-`tool_calls` assistant turn, or the kimi
/// `TodoWrite` heuristic.
fn message_satisfies_termination(message: &ir::Message, model: &str) -> bool {
    match message.tool_calls.as_deref() {
        None | Some([]) => true,
        Some(calls) => satisfies_kimi_todo_write(model, calls, &message.joined_text()),
    }
}

/// Injects the termination tool and its system instruction, appends a
/// pending reminder, and implements the skip heuristic for turns the
/// client's own history already shows as terminated.
pub struct EnsureToolCallIngress;

impl IngressTransform for EnsureToolCallIngress {
    fn priority(&self) -> i32 {
        100
    }

    fn applies(&self, request: &ir::Request) -> bool {
        request.state.ensure_tool_call.is_some()
    }

    fn apply(&self, request: &mut ir::Request) {
        let Some(state) = request.state.ensure_tool_call.clone() else {
            return;
        };
        let tool_name = state.termination_tool.clone();

        let already_injected = request.tools.as_ref().is_some_and(|tools| tools.iter().any(|t| t.name == tool_name));
        if !already_injected {
            request.tools.get_or_insert_with(Vec::new).push(ir::ToolDefinition {
                name: tool_name.clone(),
                description: termination_tool_description().to_string(),
                parameters: termination_tool_parameters(),
                strict: None,
            });
        }

        let instruction = system_instruction(&tool_name);
        let system = request.system.get_or_insert_with(Vec::new);
        if !system.iter().any(|s| s == &instruction) {
            system.insert(0, instruction);
        }

        if state.pending_reminder {
            let reminder = if state.final_answer_required { FINAL_ANSWER_REQUIRED_TEXT } else { REMINDER_TEXT }.to_string();

            request.messages.push(ir::Message::text(ir::Role::User, reminder.clone()));

            if let Some(state) = &mut request.state.ensure_tool_call {
                state.pending_reminder = false;
                state.final_answer_required = false;
                state.reminder_count += 1;
                if !state.reminder_history.contains(&reminder) {
                    state.reminder_history.push(reminder);
                }
            }
        }

        // Skip heuristic: scan messages after the last user message for one
        // that, alone, already satisfies a termination pattern — the
        // client is replaying a conversation this subsystem already closed
        // out on a prior turn. Bypass the upstream call entirely rather
        // than forcing the model to terminate twice.
        let scan_from = request.messages.iter().rposition(|m| m.role == ir::Role::User).map_or(0, |i| i + 1);
        let model = request.model.clone();
        let satisfied = request.messages[scan_from..].iter().filter(|m| m.role == ir::Role::Assistant).find(|m| message_satisfies_termination(m, &model));

        if let Some(message) = satisfied {
            let answer = message.joined_text();
            if let Some(state) = &mut request.state.ensure_tool_call {
                state.final_answer = Some(answer);
            }
            request.state.synthetic_response = true;
        }
    }
}

/// Resolves a termination-tool call in the provider's response: promotes
/// its extracted answer to plain assistant text and drops the call, or
/// leaves the response untouched for [`decide_retry`] to request a
/// stronger reminder when no answer can be found anywhere.
pub struct EnsureToolCallEgress;

impl EgressTransform for EnsureToolCallEgress {
    fn priority(&self) -> i32 {
        50
    }

    fn applies(&self, request: &ir::Request, _response: &ir::Response) -> bool {
        request.state.ensure_tool_call.is_some()
    }

    fn apply(&self, request: &ir::Request, response: &mut ir::Response) {
        if response.metadata.synthetic {
            return;
        }

        let Some(state) = &request.state.ensure_tool_call else {
            return;
        };
        let tool_name = state.termination_tool.clone();

        let Some((_, content, Some(tool_calls), _)) = response.message_block() else {
            return;
        };

        let Some(index) = tool_calls.iter().position(|c| is_termination_call(&c.name, &tool_name)) else {
            return;
        };

        let has_meaningful_content = content.iter().any(ir::ContentBlock::is_meaningful);
        let extracted = extract_answer_field(&tool_calls[index].arguments_value());

        if extracted.is_none() && !has_meaningful_content {
            // Leave the call in place; decide_retry re-derives this same
            // condition to request a final-answer-required reminder.
            return;
        }

        let mut strip_reasoning = false;

        if let Some((_, content, tool_calls, status)) = response.message_block_mut() {
            if let Some(calls) = tool_calls {
                calls.remove(index);
                if calls.is_empty() {
                    *tool_calls = None;
                }
            }

            if let Some(answer) = extracted.filter(|a| !a.is_empty()) {
                content.push(ir::ContentBlock::Text { text: answer });
            }

            if tool_calls.is_none() && !content.iter().any(ir::ContentBlock::is_meaningful) {
                content.clear();
                strip_reasoning = true;
            }

            *status = ir::BlockStatus::Completed;
        }

        if strip_reasoning {
            response.output.retain(|block| !matches!(block, ir::OutputBlock::Reasoning { .. }));
        }

        if response.message_block().is_some_and(|(_, _, tc, _)| tc.is_none()) && response.finish_reason == Some(ir::FinishReason::ToolCalls) {
            response.finish_reason = Some(ir::FinishReason::Stop);
        }

        response.metadata.ensure_tool_call_terminated = true;
    }
}

/// What the driver should do after running the egress chain for a turn
/// with ensure-tool-call engaged.
pub enum RetryDecision {
    /// The turn is done; return the response as-is.
    Done,
    /// Budget exhausted without a termination call.
    Exhausted,
    /// `request.state` has been marked for retry; the next ingress pass
    /// appends the reminder message.
    Retry,
}

fn request_reminder(request: &mut ir::Request, final_answer_required: bool) -> RetryDecision {
    let max_attempts = request.state.max_attempts as u32;

    let Some(state) = &mut request.state.ensure_tool_call else {
        return RetryDecision::Done;
    };

    if state.reminder_count + 1 >= max_attempts {
        return RetryDecision::Exhausted;
    }

    state.pending_reminder = true;
    state.final_answer_required = final_answer_required;
    request.state.retry = true;

    RetryDecision::Retry
}

fn clear_pending_reminder(request: &mut ir::Request) {
    if let Some(state) = &mut request.state.ensure_tool_call {
        state.pending_reminder = false;
        state.final_answer_required = false;
    }
}

/// Decide whether this turn needs a reminder-and-retry, mutating
/// `request.state` in place when it does.
///
/// Called by the pipeline driver after the egress chain has run, not
/// wired in as an [`EgressTransform`] itself: it needs to decide whether
/// to loop the driver at all, which the egress trait intentionally
/// doesn't grant a transform.
pub fn decide_retry(request: &mut ir::Request, response: &ir::Response) -> RetryDecision {
    if response.metadata.ensure_tool_call_terminated {
        clear_pending_reminder(request);
        return RetryDecision::Done;
    }

    let Some((_, content, tool_calls, _)) = response.message_block() else {
        return request_reminder(request, false);
    };

    let has_tool_calls = tool_calls.is_some_and(|calls| !calls.is_empty());
    if !has_tool_calls {
        return request_reminder(request, false);
    }
    let tool_calls = tool_calls.unwrap_or_default();

    if satisfies_kimi_todo_write(&request.model, tool_calls, &response.joined_text()) {
        clear_pending_reminder(request);
        return RetryDecision::Done;
    }

    let tool_name = request.state.ensure_tool_call.as_ref().map(|s| s.termination_tool.clone()).unwrap_or_default();

    if let Some(call) = tool_calls.iter().find(|c| is_termination_call(&c.name, &tool_name)) {
        let has_meaningful_content = content.iter().any(ir::ContentBlock::is_meaningful);
        let extracted = extract_answer_field(&call.arguments_value());

        if extracted.is_none() && !has_meaningful_content {
            return request_reminder(request, true);
        }
    }

    // Either a legitimate non-termination tool call, or the egress
    // transform already promoted a resolved termination call (in which
    // case `ensure_tool_call_terminated` would have returned `Done`
    // above) — either way this turn is complete.
    clear_pending_reminder(request);
    RetryDecision::Done
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with_ensure_tool_call() -> ir::Request {
        ir::Request {
            id: "req_1".to_string(),
            model: "default".to_string(),
            profile: None,
            operation: ir::Operation::Chat,
            system: None,
            messages: vec![ir::Message::text(ir::Role::User, "hi")],
            tools: None,
            stream: None,
            state: ir::State {
                max_attempts: 3,
                ensure_tool_call: Some(ir::EnsureToolCallState::default()),
                ..Default::default()
            },
            params: ir::Parameters::default(),
            metadata: ir::Metadata::default(),
        }
    }

    fn response_with_tool_call(name: &str, arguments: &str) -> ir::Response {
        ir::Response {
            id: "resp_1".to_string(),
            model: "default".to_string(),
            operation: ir::Operation::Chat,
            output: vec![ir::OutputBlock::Message {
                role: ir::Role::Assistant,
                content: vec![],
                tool_calls: Some(vec![ir::ToolCall {
                    id: "t1".to_string(),
                    name: name.to_string(),
                    arguments: arguments.to_string(),
                }]),
                status: ir::BlockStatus::Completed,
            }],
            usage: None,
            finish_reason: Some(ir::FinishReason::ToolCalls),
            error: None,
            metadata: Default::default(),
        }
    }

    #[test]
    fn ingress_injects_termination_tool_and_instruction_once() {
        let mut request = request_with_ensure_tool_call();
        EnsureToolCallIngress.apply(&mut request);
        EnsureToolCallIngress.apply(&mut request);

        assert_eq!(request.tools.as_ref().unwrap().len(), 1);
        assert_eq!(request.system.as_ref().unwrap().len(), 1);
        assert!(request.tools.as_ref().unwrap()[0].parameters["properties"].get("final_answer").is_some());
        assert!(request.tools.as_ref().unwrap()[0].parameters["properties"].get("summary").is_some());
    }

    #[test]
    fn ingress_appends_pending_reminder_and_tracks_history() {
        let mut request = request_with_ensure_tool_call();
        request.state.ensure_tool_call.as_mut().unwrap().pending_reminder = true;

        EnsureToolCallIngress.apply(&mut request);

        let state = request.state.ensure_tool_call.as_ref().unwrap();
        assert_eq!(state.reminder_count, 1);
        assert!(!state.pending_reminder);
        assert_eq!(state.reminder_history.len(), 1);
        assert_eq!(request.messages.last().unwrap().role, ir::Role::User);
    }

    #[test]
    fn ingress_skip_heuristic_fires_for_zero_tool_call_assistant_turn() {
        let mut request = request_with_ensure_tool_call();
        request.messages.push(ir::Message::text(ir::Role::Assistant, "already answered in plain text"));

        EnsureToolCallIngress.apply(&mut request);

        assert!(request.state.synthetic_response);
        assert_eq!(request.state.ensure_tool_call.as_ref().unwrap().final_answer.as_deref(), Some("already answered in plain text"));
    }

    #[test]
    fn ingress_skip_heuristic_fires_for_kimi_todo_write_summary() {
        let mut request = request_with_ensure_tool_call();
        request.model = "kimi-k2".to_string();
        request.messages.push(ir::Message {
            role: ir::Role::Assistant,
            tool_call_id: None,
            content: vec![ir::ContentBlock::Text { text: "posting a summary of changes".to_string() }],
            tool_calls: Some(vec![ir::ToolCall { id: "t1".to_string(), name: "TodoWrite".to_string(), arguments: "{}".to_string() }]),
        });

        EnsureToolCallIngress.apply(&mut request);

        assert!(request.state.synthetic_response);
    }

    #[test]
    fn ingress_skip_heuristic_ignores_messages_before_last_user_message() {
        let mut request = request_with_ensure_tool_call();
        // An earlier plain-text assistant turn predates the latest user
        // message, so it must not trigger the skip heuristic.
        request.messages = vec![
            ir::Message::text(ir::Role::User, "first"),
            ir::Message::text(ir::Role::Assistant, "plain answer"),
            ir::Message::text(ir::Role::User, "second"),
        ];

        EnsureToolCallIngress.apply(&mut request);

        assert!(!request.state.synthetic_response);
    }

    #[test]
    fn egress_promotes_termination_call_to_text() {
        let request = request_with_ensure_tool_call();
        let mut response = response_with_tool_call("finish", "{\"final_answer\": \"done\"}");

        EnsureToolCallEgress.apply(&request, &mut response);

        assert!(response.metadata.ensure_tool_call_terminated);
        assert_eq!(response.joined_text(), "done");
        assert_eq!(response.finish_reason, Some(ir::FinishReason::Stop));
    }

    #[test]
    fn egress_accepts_summary_field_and_final_name_variant() {
        let request = request_with_ensure_tool_call();
        let mut response = response_with_tool_call("Final", "{\"summary\": \"wrapped up\"}");

        EnsureToolCallEgress.apply(&request, &mut response);

        assert!(response.metadata.ensure_tool_call_terminated);
        assert_eq!(response.joined_text(), "wrapped up");
    }

    #[test]
    fn egress_accepts_anonymous_numeric_terminator_name() {
        let request = request_with_ensure_tool_call();
        let mut response = response_with_tool_call("call_00001", "{\"answer\": \"42\"}");

        EnsureToolCallEgress.apply(&request, &mut response);

        assert!(response.metadata.ensure_tool_call_terminated);
        assert_eq!(response.joined_text(), "42");
    }

    #[test]
    fn egress_leaves_unresolved_termination_call_for_retry() {
        let request = request_with_ensure_tool_call();
        let mut response = response_with_tool_call("finish", "{}");

        EnsureToolCallEgress.apply(&request, &mut response);

        assert!(!response.metadata.ensure_tool_call_terminated);
        assert!(response.message_block().unwrap().2.is_some());
    }

    #[test]
    fn egress_drops_termination_call_with_no_field_when_content_already_meaningful() {
        let request = request_with_ensure_tool_call();
        let mut response = response_with_tool_call("finish", "{}");
        if let ir::OutputBlock::Message { content, .. } = &mut response.output[0] {
            content.push(ir::ContentBlock::Text { text: "here's the answer already".to_string() });
        }

        EnsureToolCallEgress.apply(&request, &mut response);

        assert!(response.metadata.ensure_tool_call_terminated);
        assert_eq!(response.message_block().unwrap().2, None);
    }

    #[test]
    fn decide_retry_requests_reminder_for_zero_tool_call_reply() {
        let mut request = request_with_ensure_tool_call();
        let response = ir::Response {
            id: "resp_1".to_string(),
            model: "default".to_string(),
            operation: ir::Operation::Chat,
            output: vec![ir::OutputBlock::Message {
                role: ir::Role::Assistant,
                content: vec![ir::ContentBlock::Text { text: "here's my answer".to_string() }],
                tool_calls: None,
                status: ir::BlockStatus::Completed,
            }],
            usage: None,
            finish_reason: None,
            error: None,
            metadata: Default::default(),
        };

        match decide_retry(&mut request, &response) {
            RetryDecision::Retry => {}
            _ => panic!("expected retry"),
        }

        assert!(request.state.retry);
        assert!(request.state.ensure_tool_call.as_ref().unwrap().pending_reminder);
        assert!(!request.state.ensure_tool_call.as_ref().unwrap().final_answer_required);
    }

    #[test]
    fn decide_retry_requests_stronger_reminder_for_unresolved_termination_call() {
        let mut request = request_with_ensure_tool_call();
        let response = response_with_tool_call("finish", "{}");

        match decide_retry(&mut request, &response) {
            RetryDecision::Retry => {}
            _ => panic!("expected retry"),
        }

        assert!(request.state.ensure_tool_call.as_ref().unwrap().final_answer_required);
    }

    #[test]
    fn decide_retry_passes_through_non_termination_tool_calls() {
        let mut request = request_with_ensure_tool_call();
        let response = response_with_tool_call("lookup", "{}");

        match decide_retry(&mut request, &response) {
            RetryDecision::Done => {}
            _ => panic!("expected done"),
        }
    }

    #[test]
    fn decide_retry_exhausts_budget_after_max_attempts() {
        let mut request = request_with_ensure_tool_call();
        request.state.max_attempts = 1;
        let response = ir::Response {
            id: "resp_1".to_string(),
            model: "default".to_string(),
            operation: ir::Operation::Chat,
            output: vec![ir::OutputBlock::Message {
                role: ir::Role::Assistant,
                content: vec![ir::ContentBlock::Text { text: "still thinking".to_string() }],
                tool_calls: None,
                status: ir::BlockStatus::Completed,
            }],
            usage: None,
            finish_reason: None,
            error: None,
            metadata: Default::default(),
        };

        match decide_retry(&mut request, &response) {
            RetryDecision::Exhausted => {}
            _ => panic!("expected exhausted"),
        }
    }
}
