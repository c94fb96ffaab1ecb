//! Synthesized streams for cached responses
//!
//! A cached body is always a complete JSON response. When the caller asked for
//! a stream it is replayed as canonical chunks, so a cache hit looks the same
//! on the wire as a live stream of the same content.

use crate::protocol::function::Function;
use crate::protocol::types::{
    ChatResponse, ChatStreamChunk, FunctionCallDelta, MessageDelta, MessageRole, StreamChoice,
    ToolCallDelta,
};
use crate::providers::adapter::sse_line;
use crate::response::stream::DONE_LINE;
use serde_json::{json, Value};

/// Characters per synthesized content delta
pub const DELTA_CHARS: usize = 32;

/// Replay a cached body as canonical SSE lines, `[DONE]` included
pub fn simulate_stream(function: Function, body: &Value, fallback_id: &str) -> Vec<String> {
    let mut lines = match function {
        Function::ChatComplete => match serde_json::from_value::<ChatResponse>(body.clone()) {
            Ok(response) => chat_lines(&response, fallback_id),
            Err(_) => vec![sse_line(body.to_string())],
        },
        Function::Complete => completion_lines(body, fallback_id),
        _ => vec![sse_line(body.to_string())],
    };
    lines.push(DONE_LINE.to_string());
    lines
}

/// Split `text` into pieces of at most [`DELTA_CHARS`] characters
pub fn split_deltas(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(DELTA_CHARS)
        .map(|piece| piece.iter().collect())
        .collect()
}

fn chat_lines(response: &ChatResponse, fallback_id: &str) -> Vec<String> {
    let id = if response.id.is_empty() {
        fallback_id.to_string()
    } else {
        response.id.clone()
    };
    let chunk = |delta: MessageDelta, index: usize, finish_reason: Option<String>| ChatStreamChunk {
        id: id.clone(),
        object: "chat.completion.chunk".to_string(),
        created: response.created,
        model: response.model.clone(),
        provider: response.provider.clone(),
        choices: vec![StreamChoice {
            index,
            delta,
            finish_reason,
            logprobs: None,
        }],
        usage: None,
    };

    let mut chunks = Vec::new();
    for choice in &response.choices {
        let text = choice.message.text_content();
        let mut pieces = split_deltas(&text).into_iter();

        chunks.push(chunk(
            MessageDelta {
                role: Some(MessageRole::Assistant),
                content: pieces.next(),
                tool_calls: None,
            },
            choice.index,
            None,
        ));
        for piece in pieces {
            chunks.push(chunk(
                MessageDelta {
                    content: Some(piece),
                    ..Default::default()
                },
                choice.index,
                None,
            ));
        }

        for (tool_index, call) in choice.message.tool_calls.iter().flatten().enumerate() {
            chunks.push(chunk(
                MessageDelta {
                    tool_calls: Some(vec![ToolCallDelta {
                        index: tool_index,
                        id: Some(call.id.clone()),
                        tool_type: Some(call.tool_type.clone()),
                        function: Some(FunctionCallDelta {
                            name: Some(call.function.name.clone()),
                            arguments: Some(String::new()),
                        }),
                    }]),
                    ..Default::default()
                },
                choice.index,
                None,
            ));
            for piece in split_deltas(&call.function.arguments) {
                chunks.push(chunk(
                    MessageDelta {
                        tool_calls: Some(vec![ToolCallDelta {
                            index: tool_index,
                            id: None,
                            tool_type: None,
                            function: Some(FunctionCallDelta {
                                name: None,
                                arguments: Some(piece),
                            }),
                        }]),
                        ..Default::default()
                    },
                    choice.index,
                    None,
                ));
            }
        }

        chunks.push(chunk(
            MessageDelta::default(),
            choice.index,
            Some(
                choice
                    .finish_reason
                    .clone()
                    .unwrap_or_else(|| "stop".to_string()),
            ),
        ));
    }

    if let Some(last) = chunks.last_mut() {
        last.usage = response.usage.clone();
    }

    chunks
        .iter()
        .filter_map(|c| serde_json::to_string(c).ok())
        .map(sse_line)
        .collect()
}

fn completion_lines(body: &Value, fallback_id: &str) -> Vec<String> {
    let id = body
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or(fallback_id);
    let created = body.get("created").cloned().unwrap_or(json!(0));
    let model = body.get("model").cloned().unwrap_or(json!(""));
    let provider = body.get("provider").cloned();

    let line = |index: &Value, text: &str, finish_reason: Value, usage: Option<&Value>| {
        let mut chunk = json!({
            "id": id,
            "object": "text_completion",
            "created": created,
            "model": model,
            "choices": [{"text": text, "index": index, "logprobs": null, "finish_reason": finish_reason}],
        });
        if let Some(provider) = &provider {
            chunk["provider"] = provider.clone();
        }
        if let Some(usage) = usage {
            chunk["usage"] = usage.clone();
        }
        sse_line(chunk.to_string())
    };

    let choices = body
        .get("choices")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut lines = Vec::new();
    for (position, choice) in choices.iter().enumerate() {
        let index = choice.get("index").cloned().unwrap_or(json!(position));
        let text = choice.get("text").and_then(Value::as_str).unwrap_or_default();
        for piece in split_deltas(text) {
            lines.push(line(&index, &piece, Value::Null, None));
        }
        let finish = choice
            .get("finish_reason")
            .cloned()
            .filter(|f| !f.is_null())
            .unwrap_or(json!("stop"));
        let usage = if position + 1 == choices.len() {
            body.get("usage").filter(|u| !u.is_null())
        } else {
            None
        };
        lines.push(line(&index, "", finish, usage));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat_body(content: &str) -> Value {
        json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1700000000,
            "model": "gpt-4o-mini",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop",
                "logprobs": null
            }],
            "usage": {"prompt_tokens": 3, "completion_tokens": 5, "total_tokens": 8}
        })
    }

    #[test]
    fn test_split_respects_char_boundaries() {
        let text = "é".repeat(40);
        let pieces = split_deltas(&text);
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].chars().count(), 32);
        assert_eq!(pieces.concat(), text);
    }

    #[test]
    fn test_chat_simulation_shape() {
        let content = "a".repeat(70);
        let lines = simulate_stream(Function::ChatComplete, &chat_body(&content), "fb");
        // 3 content chunks, finish chunk, [DONE]
        assert_eq!(lines.len(), 5);
        assert!(lines[0].contains("\"role\":\"assistant\""));
        assert!(lines[3].contains("\"finish_reason\":\"stop\""));
        assert!(lines[3].contains("\"total_tokens\":8"));
        assert_eq!(lines[4], DONE_LINE);
    }

    #[test]
    fn test_tool_call_name_then_arguments() {
        let body = json!({
            "id": "x", "object": "chat.completion", "created": 1, "model": "m",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{"id": "call_1", "type": "function",
                        "function": {"name": "lookup", "arguments": "{\"city\":\"Paris\"}"}}]
                },
                "finish_reason": "tool_calls"
            }]
        });
        let lines = simulate_stream(Function::ChatComplete, &body, "fb");
        assert!(lines[1].contains("\"name\":\"lookup\""));
        assert!(lines[2].contains("Paris"));
        assert!(!lines[2].contains("lookup"));
        assert!(lines[3].contains("\"finish_reason\":\"tool_calls\""));
    }

    #[test]
    fn test_completion_simulation() {
        let body = json!({
            "id": "cmpl-1", "object": "text_completion", "created": 1, "model": "m",
            "choices": [{"text": "hello", "index": 0, "finish_reason": "length"}]
        });
        let lines = simulate_stream(Function::Complete, &body, "fb");
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("\"text\":\"hello\""));
        assert!(lines[1].contains("\"finish_reason\":\"length\""));
    }

    #[test]
    fn test_unmodelled_body_replayed_whole() {
        let lines = simulate_stream(Function::CreateModelResponse, &json!({"id": "resp_1"}), "fb");
        assert_eq!(lines, vec!["data: {\"id\":\"resp_1\"}\n\n".to_string(), DONE_LINE.to_string()]);
    }
}
