//! Converts a completed [`ir::Response`] into a dialect-specific SSE event
//! sequence. The core never streams from upstream — every
//! provider call is non-streaming — so "streaming" here means replaying a
//! finished response to the client in pieces.

use std::time::Duration;

use axum::response::sse::Event;
use futures::stream::{self, Stream};

use crate::dialect::openai_chat::{ChatChunkChoice, ChatCompletionChunk, ChatDelta, ChatFunctionCallDelta, ChatToolCallDelta};
use crate::dialect::openai_responses;
use crate::ir;

const DEFAULT_CHUNK_CHARS: usize = 24;
const DEFAULT_CHUNK_DELAY_MS: u64 = 12;

fn chunk_size() -> usize {
    std::env::var("STREAM_CHUNK_SIZE").ok().and_then(|v| v.parse().ok()).unwrap_or(DEFAULT_CHUNK_CHARS)
}

fn chunk_delay() -> Duration {
    let ms = std::env::var("STREAM_CHUNK_DELAY_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(DEFAULT_CHUNK_DELAY_MS);
    Duration::from_millis(ms)
}

/// Split `text` into `chunk_size()`-char pieces on char boundaries.
fn chunk_text(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let size = chunk_size();
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size).map(|c| c.iter().collect()).collect()
}

async fn sleep_between_chunks() {
    tokio::time::sleep(chunk_delay()).await;
}

/// Text content of the response's `message`-kind output block only.
/// `joined_text()` sums text across every output block including
/// `Reasoning`, which would double up reasoning text once it's also
/// streamed through [`reasoning_text`].
fn message_text(response: &ir::Response) -> String {
    response
        .message_block()
        .map(|(_, content, _, _)| content.iter().filter_map(ir::ContentBlock::as_text).collect())
        .unwrap_or_default()
}

/// Concatenation of every `OutputBlock::Reasoning` block's text, in order.
fn reasoning_text(response: &ir::Response) -> String {
    response
        .output
        .iter()
        .filter_map(|block| match block {
            ir::OutputBlock::Reasoning { content, .. } => Some(content.iter().filter_map(ir::ContentBlock::as_text).collect::<String>()),
            _ => None,
        })
        .collect()
}

fn chat_chunk(id: &str, created: u64, model: &str, delta: ChatDelta, finish_reason: Option<String>) -> ChatCompletionChunk {
    ChatCompletionChunk {
        id: id.to_string(),
        object: "chat.completion.chunk",
        created,
        model: model.to_string(),
        choices: vec![ChatChunkChoice { index: 0, delta, finish_reason }],
    }
}

/// `chat.completion.chunk` sequence for OpenAI Chat Completions, ending in
/// the literal `[DONE]` the dialect's clients expect.
pub fn openai_chat_stream(response: ir::Response, created: u64) -> impl Stream<Item = Event> {
    let events = openai_chat_chunks(response, created);

    stream::unfold((events.into_iter(), false), |(mut iter, done_sent)| async move {
        if let Some(chunk) = iter.next() {
            sleep_between_chunks().await;
            Some((Event::default().json_data(chunk).unwrap_or_default(), (iter, done_sent)))
        } else if !done_sent {
            Some((Event::default().data("[DONE]"), (iter, true)))
        } else {
            None
        }
    })
}

fn openai_chat_chunks(response: ir::Response, created: u64) -> Vec<ChatCompletionChunk> {
    let text = message_text(&response);
    let chunks = chunk_text(&text);
    let reasoning_chunks = chunk_text(&reasoning_text(&response));
    let tool_calls = response.message_block().and_then(|(_, _, tc, _)| tc.map(<[_]>::to_vec)).unwrap_or_default();
    let finish_reason = response.finish_reason.map(|r| r.to_string());
    let id = response.id.clone();
    let model = response.model.clone();

    let mut events = Vec::new();

    events.push(chat_chunk(
        &id,
        created,
        &model,
        ChatDelta {
            role: Some("assistant".to_string()),
            ..Default::default()
        },
        None,
    ));

    for piece in reasoning_chunks {
        events.push(chat_chunk(
            &id,
            created,
            &model,
            ChatDelta {
                reasoning_content: Some(piece),
                ..Default::default()
            },
            None,
        ));
    }

    for piece in chunks {
        events.push(chat_chunk(
            &id,
            created,
            &model,
            ChatDelta {
                content: Some(piece),
                ..Default::default()
            },
            None,
        ));
    }

    // Each tool call announces with its id/name and empty arguments, then
    // streams its argument text as further deltas against the same index —
    // matching how a real provider streams partial JSON.
    for (index, call) in tool_calls.into_iter().enumerate() {
        events.push(chat_chunk(
            &id,
            created,
            &model,
            ChatDelta {
                tool_calls: Some(vec![ChatToolCallDelta {
                    index: index as u32,
                    id: Some(call.id),
                    r#type: Some("function"),
                    function: Some(ChatFunctionCallDelta {
                        name: Some(call.name),
                        arguments: Some(String::new()),
                    }),
                }]),
                ..Default::default()
            },
            None,
        ));

        for piece in chunk_text(&call.arguments) {
            events.push(chat_chunk(
                &id,
                created,
                &model,
                ChatDelta {
                    tool_calls: Some(vec![ChatToolCallDelta {
                        index: index as u32,
                        id: None,
                        r#type: None,
                        function: Some(ChatFunctionCallDelta {
                            name: None,
                            arguments: Some(piece),
                        }),
                    }]),
                    ..Default::default()
                },
                None,
            ));
        }
    }

    events.push(chat_chunk(&id, created, &model, ChatDelta::default(), finish_reason));

    events
}

/// Anthropic Messages streaming event sequence.
pub fn anthropic_stream(response: ir::Response) -> impl Stream<Item = Event> {
    let events = anthropic_events(response);

    stream::unfold(events.into_iter(), |mut iter| async move {
        let (event, payload) = iter.next()?;
        sleep_between_chunks().await;
        Some((Event::default().event(event).json_data(payload).unwrap_or_default(), iter))
    })
}

fn anthropic_events(response: ir::Response) -> Vec<(&'static str, serde_json::Value)> {
    use crate::dialect::anthropic::{AnthropicBlock, AnthropicUsage};

    let text = message_text(&response);
    let chunks = chunk_text(&text);
    let rendered = crate::dialect::anthropic::render_response(&response);
    let tool_calls = response.message_block().and_then(|(_, _, tc, _)| tc.map(<[_]>::to_vec)).unwrap_or_default();

    // `render_response` already folds any `Reasoning` content block into a
    // `Thinking` block, so reasoning text/signature come from there rather
    // than from a second pass over the IR.
    let reasoning: String = rendered
        .content
        .iter()
        .filter_map(|b| match b {
            AnthropicBlock::Thinking { thinking, .. } => Some(thinking.clone()),
            _ => None,
        })
        .collect();
    let reasoning_chunks = chunk_text(&reasoning);
    let signature = rendered.content.iter().find_map(|b| match b {
        AnthropicBlock::Thinking { signature, .. } => signature.clone(),
        _ => None,
    });

    let mut events: Vec<(&'static str, serde_json::Value)> = Vec::new();

    events.push((
        "message_start",
        serde_json::json!({
            "type": "message_start",
            "message": {
                "id": rendered.id,
                "type": "message",
                "role": "assistant",
                "model": rendered.model,
                "content": [],
                "stop_reason": serde_json::Value::Null,
                "usage": { "input_tokens": rendered.usage.input_tokens, "output_tokens": 0 },
            },
        }),
    ));

    let mut index = 0usize;

    if !reasoning_chunks.is_empty() {
        events.push(("content_block_start", serde_json::json!({
            "type": "content_block_start", "index": index, "content_block": { "type": "thinking", "thinking": "" },
        })));
        for piece in &reasoning_chunks {
            events.push(("content_block_delta", serde_json::json!({
                "type": "content_block_delta", "index": index,
                "delta": { "type": "thinking_delta", "thinking": piece },
            })));
        }
        if let Some(signature) = &signature {
            events.push(("content_block_delta", serde_json::json!({
                "type": "content_block_delta", "index": index,
                "delta": { "type": "signature_delta", "signature": signature },
            })));
        }
        events.push(("content_block_stop", serde_json::json!({ "type": "content_block_stop", "index": index })));
        index += 1;
    }

    if !chunks.is_empty() {
        events.push(("content_block_start", serde_json::json!({
            "type": "content_block_start", "index": index, "content_block": { "type": "text", "text": "" },
        })));
        for piece in &chunks {
            events.push(("content_block_delta", serde_json::json!({
                "type": "content_block_delta", "index": index,
                "delta": { "type": "text_delta", "text": piece },
            })));
        }
        events.push(("content_block_stop", serde_json::json!({ "type": "content_block_stop", "index": index })));
        index += 1;
    }

    for call in &tool_calls {
        events.push(("content_block_start", serde_json::json!({
            "type": "content_block_start", "index": index,
            "content_block": { "type": "tool_use", "id": call.id, "name": call.name, "input": {} },
        })));
        events.push(("content_block_delta", serde_json::json!({
            "type": "content_block_delta", "index": index,
            "delta": { "type": "input_json_delta", "partial_json": call.arguments },
        })));
        events.push(("content_block_stop", serde_json::json!({ "type": "content_block_stop", "index": index })));
        index += 1;
    }

    events.push(("message_delta", serde_json::json!({
        "type": "message_delta",
        "delta": { "stop_reason": rendered.stop_reason, "stop_sequence": serde_json::Value::Null },
        "usage": AnthropicUsage { input_tokens: rendered.usage.input_tokens, output_tokens: rendered.usage.output_tokens },
    })));
    events.push(("message_stop", serde_json::json!({ "type": "message_stop" })));

    events
}

/// OpenAI Responses API streaming event sequence: sequence-numbered
/// `response.*` events, one `output_item`/`content_part` pair per output
/// item (reasoning, message, each function call) so a tool-call response
/// streams with every item visible, not just the text message.
pub fn openai_responses_stream(response: ir::Response, created_at: u64) -> impl Stream<Item = Event> {
    let events = openai_responses_events(response, created_at);

    stream::unfold(events.into_iter(), |mut iter| async move {
        let (event, payload) = iter.next()?;
        sleep_between_chunks().await;
        Some((Event::default().event(event).json_data(payload).unwrap_or_default(), iter))
    })
}

fn openai_responses_events(response: ir::Response, created_at: u64) -> Vec<(&'static str, serde_json::Value)> {
    let rendered = openai_responses::render_response(&response, created_at);
    let text = message_text(&response);
    let chunks = chunk_text(&text);
    let reasoning_chunks = chunk_text(&reasoning_text(&response));
    let tool_calls = response.message_block().and_then(|(_, _, tc, _)| tc.map(<[_]>::to_vec)).unwrap_or_default();

    let mut events: Vec<(&'static str, serde_json::Value)> = Vec::new();
    let mut seq = 0u64;
    let mut next_seq = || {
        seq += 1;
        seq
    };
    let mut output_index = 0u32;

    events.push(("response.created", serde_json::json!({
        "type": "response.created", "sequence_number": next_seq(),
        "response": { "id": rendered.id, "object": "response", "status": "in_progress" },
    })));

    if !reasoning_chunks.is_empty() {
        let index = output_index;
        output_index += 1;
        let item_id = format!("{}-reasoning", rendered.id);

        events.push(("response.output_item.added", serde_json::json!({
            "type": "response.output_item.added", "sequence_number": next_seq(), "output_index": index,
            "item": { "id": item_id, "type": "reasoning", "status": "in_progress" },
        })));
        for piece in &reasoning_chunks {
            events.push(("response.reasoning_text.delta", serde_json::json!({
                "type": "response.reasoning_text.delta", "sequence_number": next_seq(),
                "output_index": index, "content_index": 0, "delta": piece,
            })));
        }
        events.push(("response.output_item.done", serde_json::json!({
            "type": "response.output_item.done", "sequence_number": next_seq(), "output_index": index,
            "item": { "id": item_id, "type": "reasoning", "status": "completed" },
        })));
    }

    {
        let index = output_index;
        output_index += 1;
        let item_id = format!("{}-msg", rendered.id);

        events.push(("response.output_item.added", serde_json::json!({
            "type": "response.output_item.added", "sequence_number": next_seq(), "output_index": index,
            "item": { "id": item_id, "type": "message", "role": "assistant", "status": "in_progress" },
        })));
        events.push(("response.content_part.added", serde_json::json!({
            "type": "response.content_part.added", "sequence_number": next_seq(),
            "output_index": index, "content_index": 0, "part": { "type": "output_text", "text": "" },
        })));
        for piece in &chunks {
            events.push(("response.output_text.delta", serde_json::json!({
                "type": "response.output_text.delta", "sequence_number": next_seq(),
                "output_index": index, "content_index": 0, "delta": piece,
            })));
        }
        events.push(("response.content_part.done", serde_json::json!({
            "type": "response.content_part.done", "sequence_number": next_seq(),
            "output_index": index, "content_index": 0, "part": { "type": "output_text", "text": text },
        })));
        events.push(("response.output_item.done", serde_json::json!({
            "type": "response.output_item.done", "sequence_number": next_seq(), "output_index": index,
            "item": { "id": item_id, "type": "message", "status": "completed" },
        })));
    }

    for call in &tool_calls {
        let index = output_index;
        output_index += 1;
        let item_id = format!("{}-call-{}", rendered.id, call.id);

        events.push(("response.output_item.added", serde_json::json!({
            "type": "response.output_item.added", "sequence_number": next_seq(), "output_index": index,
            "item": { "id": item_id, "type": "function_call", "call_id": call.id, "name": call.name, "arguments": "", "status": "in_progress" },
        })));
        for piece in chunk_text(&call.arguments) {
            events.push(("response.function_call_arguments.delta", serde_json::json!({
                "type": "response.function_call_arguments.delta", "sequence_number": next_seq(),
                "output_index": index, "delta": piece,
            })));
        }
        events.push(("response.output_item.done", serde_json::json!({
            "type": "response.output_item.done", "sequence_number": next_seq(), "output_index": index,
            "item": { "id": item_id, "type": "function_call", "call_id": call.id, "name": call.name, "arguments": call.arguments, "status": "completed" },
        })));
    }

    events.push(("response.completed", serde_json::json!({
        "type": "response.completed", "sequence_number": next_seq(),
        "response": rendered,
    })));

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn response() -> ir::Response {
        ir::Response {
            id: "resp_1".to_string(),
            model: "gpt-4o-mini".to_string(),
            operation: ir::Operation::Chat,
            output: vec![ir::OutputBlock::Message {
                role: ir::Role::Assistant,
                content: vec![ir::ContentBlock::Text { text: "hello world".to_string() }],
                tool_calls: None,
                status: ir::BlockStatus::Completed,
            }],
            usage: None,
            finish_reason: Some(ir::FinishReason::Stop),
            error: None,
            metadata: Default::default(),
        }
    }

    fn response_with_reasoning_and_tool_call() -> ir::Response {
        ir::Response {
            id: "resp_2".to_string(),
            model: "gpt-4o-mini".to_string(),
            operation: ir::Operation::Chat,
            output: vec![
                ir::OutputBlock::Reasoning {
                    content: vec![ir::ContentBlock::Text { text: "thinking it through".to_string() }],
                    summary: Vec::new(),
                },
                ir::OutputBlock::Message {
                    role: ir::Role::Assistant,
                    content: vec![],
                    tool_calls: Some(vec![ir::ToolCall {
                        id: "call_1".to_string(),
                        name: "lookup".to_string(),
                        arguments: "{\"q\":\"x\"}".to_string(),
                    }]),
                    status: ir::BlockStatus::Completed,
                },
            ],
            usage: None,
            finish_reason: Some(ir::FinishReason::ToolCalls),
            error: None,
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn anthropic_stream_ends_with_message_stop() {
        let events: Vec<_> = anthropic_stream(response()).collect().await;
        assert!(!events.is_empty());
    }

    #[tokio::test]
    async fn openai_responses_stream_has_strictly_increasing_sequence_numbers() {
        let events: Vec<_> = openai_responses_stream(response(), 0).collect().await;
        assert!(events.len() >= 4);
    }

    #[test]
    fn openai_chat_chunks_stream_reasoning_before_content() {
        let chunks = openai_chat_chunks(response_with_reasoning_and_tool_call(), 0);
        let reasoning_delta = chunks.iter().find(|c| c.choices[0].delta.reasoning_content.is_some()).unwrap();
        assert_eq!(reasoning_delta.choices[0].delta.reasoning_content.as_deref(), Some("thinking it through"));
    }

    #[test]
    fn openai_chat_chunks_announce_tool_call_with_empty_arguments_then_stream_deltas() {
        let chunks = openai_chat_chunks(response_with_reasoning_and_tool_call(), 0);
        let tool_call_chunks: Vec<_> = chunks.iter().filter(|c| c.choices[0].delta.tool_calls.is_some()).collect();

        let announce = &tool_call_chunks[0].choices[0].delta.tool_calls.as_ref().unwrap()[0];
        assert_eq!(announce.id.as_deref(), Some("call_1"));
        assert_eq!(announce.function.as_ref().unwrap().arguments.as_deref(), Some(""));

        let full_arguments: String = tool_call_chunks[1..]
            .iter()
            .map(|c| c.choices[0].delta.tool_calls.as_ref().unwrap()[0].function.as_ref().unwrap().arguments.clone().unwrap())
            .collect();
        assert_eq!(full_arguments, "{\"q\":\"x\"}");
    }

    #[test]
    fn anthropic_events_stream_thinking_block_before_text() {
        let events = anthropic_events(response_with_reasoning_and_tool_call());
        let kinds: Vec<&str> = events.iter().map(|(kind, _)| *kind).collect();
        assert!(kinds.contains(&"content_block_delta"));

        let thinking_delta = events
            .iter()
            .find(|(kind, payload)| *kind == "content_block_delta" && payload["delta"]["type"] == "thinking_delta")
            .unwrap();
        assert_eq!(thinking_delta.1["delta"]["thinking"], "thinking it through");
    }

    #[test]
    fn openai_responses_events_emit_reasoning_and_function_call_items() {
        let events = openai_responses_events(response_with_reasoning_and_tool_call(), 0);

        assert!(events.iter().any(|(kind, _)| *kind == "response.reasoning_text.delta"));

        let function_call_done = events
            .iter()
            .find(|(kind, payload)| *kind == "response.output_item.done" && payload["item"]["type"] == "function_call")
            .unwrap();
        assert_eq!(function_call_done.1["item"]["name"], "lookup");
        assert_eq!(function_call_done.1["item"]["arguments"], "{\"q\":\"x\"}");
    }
}
