//! `PropagateFinishReasons` egress transform (priority 100):
//! the last transform to run. Derives a top-level `finish_reason` when a
//! provider adapter didn't set one, from the shape of the output itself.

use crate::ir;
use crate::transform::EgressTransform;

pub struct PropagateFinishReasons;

impl EgressTransform for PropagateFinishReasons {
    fn priority(&self) -> i32 {
        100
    }

    fn applies(&self, _request: &ir::Request, response: &ir::Response) -> bool {
        response.finish_reason.is_none()
    }

    fn apply(&self, _request: &ir::Request, response: &mut ir::Response) {
        let has_tool_calls = response
            .message_block()
            .and_then(|(_, _, tool_calls, _)| tool_calls)
            .is_some_and(|calls| !calls.is_empty());

        let is_incomplete = response.message_block().is_some_and(|(.., status)| status == ir::BlockStatus::Incomplete);

        response.finish_reason = Some(if has_tool_calls {
            ir::FinishReason::ToolCalls
        } else if is_incomplete {
            ir::FinishReason::Length
        } else {
            ir::FinishReason::Stop
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ir::Request {
        ir::Request {
            id: "req_1".to_string(),
            model: "default".to_string(),
            profile: None,
            operation: ir::Operation::Chat,
            system: None,
            messages: vec![],
            tools: None,
            stream: None,
            state: ir::State::default(),
            params: ir::Parameters::default(),
            metadata: ir::Metadata::default(),
        }
    }

    #[test]
    fn defaults_to_tool_calls_when_tool_calls_present() {
        let mut response = ir::Response {
            id: "resp_1".to_string(),
            model: "default".to_string(),
            operation: ir::Operation::Chat,
            output: vec![ir::OutputBlock::Message {
                role: ir::Role::Assistant,
                content: vec![],
                tool_calls: Some(vec![ir::ToolCall {
                    id: "t1".to_string(),
                    name: "lookup".to_string(),
                    arguments: "{}".to_string(),
                }]),
                status: ir::BlockStatus::Completed,
            }],
            usage: None,
            finish_reason: None,
            error: None,
            metadata: Default::default(),
        };

        PropagateFinishReasons.apply(&request(), &mut response);
        assert_eq!(response.finish_reason, Some(ir::FinishReason::ToolCalls));
    }

    #[test]
    fn leaves_provider_supplied_finish_reason_untouched() {
        let mut response = ir::Response {
            id: "resp_1".to_string(),
            model: "default".to_string(),
            operation: ir::Operation::Chat,
            output: vec![],
            usage: None,
            finish_reason: Some(ir::FinishReason::ContentFilter),
            error: None,
            metadata: Default::default(),
        };

        PropagateFinishReasons.apply(&request(), &mut response);
        assert_eq!(response.finish_reason, Some(ir::FinishReason::ContentFilter));
    }
}
