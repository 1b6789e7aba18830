//! `Normalize` ingress/egress transforms (priority 0 on both
//! sides): the only transforms that always run, regardless of variant
//! configuration.

use crate::ir;
use crate::transform::{EgressTransform, IngressTransform};

/// Drops image blocks with no resolvable URL and strips empty system
/// entries left over from dialect parsing.
pub struct NormalizeIngress;

impl IngressTransform for NormalizeIngress {
    fn priority(&self) -> i32 {
        0
    }

    fn applies(&self, _request: &ir::Request) -> bool {
        true
    }

    fn apply(&self, request: &mut ir::Request) {
        for message in &mut request.messages {
            message
                .content
                .retain(|block| !matches!(block, ir::ContentBlock::ImageUrl { url: None, .. }));
        }

        if let Some(system) = &mut request.system {
            system.retain(|s| !s.trim().is_empty());
            if system.is_empty() {
                request.system = None;
            }
        }
    }
}

/// Reserializes every tool call's `arguments` through a JSON round trip
/// (the `_raw` escape hatch on parse failure).
pub struct NormalizeEgress;

impl EgressTransform for NormalizeEgress {
    fn priority(&self) -> i32 {
        0
    }

    fn applies(&self, _request: &ir::Request, _response: &ir::Response) -> bool {
        true
    }

    fn apply(&self, _request: &ir::Request, response: &mut ir::Response) {
        for block in &mut response.output {
            match block {
                ir::OutputBlock::Message { tool_calls: Some(calls), .. } => {
                    for call in calls {
                        call.reserialize_arguments();
                    }
                }
                ir::OutputBlock::ToolCall { arguments, .. } => {
                    let mut call = ir::ToolCall {
                        id: String::new(),
                        name: String::new(),
                        arguments: std::mem::take(arguments),
                    };
                    call.reserialize_arguments();
                    *arguments = call.arguments;
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request() -> ir::Request {
        ir::Request {
            id: "req_1".to_string(),
            model: "default".to_string(),
            profile: None,
            operation: ir::Operation::Chat,
            system: Some(vec!["  ".to_string(), "be terse".to_string()]),
            messages: vec![ir::Message {
                role: ir::Role::User,
                tool_call_id: None,
                content: vec![
                    ir::ContentBlock::Text { text: "hi".to_string() },
                    ir::ContentBlock::ImageUrl { url: None, mime: None },
                ],
                tool_calls: None,
            }],
            tools: None,
            stream: None,
            state: ir::State::default(),
            params: ir::Parameters::default(),
            metadata: ir::Metadata::default(),
        }
    }

    #[test]
    fn drops_unresolved_image_blocks_and_blank_system_entries() {
        let mut request = base_request();
        NormalizeIngress.apply(&mut request);

        assert_eq!(request.messages[0].content.len(), 1);
        assert_eq!(request.system, Some(vec!["be terse".to_string()]));
    }

    #[test]
    fn reserializes_malformed_tool_arguments_into_raw_escape_hatch() {
        let request = base_request();
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
                    arguments: "not json".to_string(),
                }]),
                status: ir::BlockStatus::Completed,
            }],
            usage: None,
            finish_reason: None,
            error: None,
            metadata: Default::default(),
        };

        NormalizeEgress.apply(&request, &mut response);

        let ir::OutputBlock::Message { tool_calls: Some(calls), .. } = &response.output[0] else {
            panic!("expected message block");
        };
        assert!(calls[0].arguments.contains("_raw"));
    }
}
