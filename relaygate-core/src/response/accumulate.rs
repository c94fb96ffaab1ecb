//! Fold a canonical chunk stream back into a buffered chat response

use crate::error::GatewayError;
use crate::protocol::response::ChunkStream;
use crate::protocol::types::{
    ChatResponse, ChatStreamChunk, CompletionUsage, FunctionCall, Message, MessageContent,
    MessageRole, ResponseChoice, ToolCall,
};
use crate::providers::adapter::frame_data;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
struct ChoiceState {
    role: Option<MessageRole>,
    content: Option<String>,
    tool_calls: BTreeMap<usize, ToolCall>,
    finish_reason: Option<String>,
}

/// Incrementally rebuilds a [`ChatResponse`] from `chat.completion.chunk`s
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    id: Option<String>,
    model: Option<String>,
    provider: Option<String>,
    created: i64,
    usage: Option<CompletionUsage>,
    choices: BTreeMap<usize, ChoiceState>,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_chunk(&mut self, chunk: &ChatStreamChunk) {
        if self.id.is_none() && !chunk.id.is_empty() {
            self.id = Some(chunk.id.clone());
            self.created = chunk.created;
        }
        if self.model.is_none() && !chunk.model.is_empty() {
            self.model = Some(chunk.model.clone());
        }
        if chunk.provider.is_some() {
            self.provider = chunk.provider.clone();
        }
        if chunk.usage.is_some() {
            self.usage = chunk.usage.clone();
        }

        for choice in &chunk.choices {
            let state = self.choices.entry(choice.index).or_default();
            let delta = &choice.delta;
            if delta.role.is_some() {
                state.role = delta.role;
            }
            if let Some(text) = &delta.content {
                state.content.get_or_insert_with(String::new).push_str(text);
            }
            for call in delta.tool_calls.iter().flatten() {
                let entry = state.tool_calls.entry(call.index).or_insert_with(|| ToolCall {
                    id: String::new(),
                    tool_type: "function".to_string(),
                    function: FunctionCall {
                        name: String::new(),
                        arguments: String::new(),
                    },
                });
                if let Some(id) = &call.id {
                    entry.id = id.clone();
                }
                if let Some(tool_type) = &call.tool_type {
                    entry.tool_type = tool_type.clone();
                }
                if let Some(function) = &call.function {
                    if let Some(name) = &function.name {
                        entry.function.name.push_str(name);
                    }
                    if let Some(arguments) = &function.arguments {
                        entry.function.arguments.push_str(arguments);
                    }
                }
            }
            if choice.finish_reason.is_some() {
                state.finish_reason = choice.finish_reason.clone();
            }
        }
    }

    /// Feed one canonical SSE frame; `[DONE]` and non-chunk payloads are ignored
    pub fn push_line(&mut self, line: &str) {
        let Some(payload) = frame_data(line) else {
            return;
        };
        if payload == "[DONE]" {
            return;
        }
        if let Ok(chunk) = serde_json::from_str::<ChatStreamChunk>(&payload) {
            self.push_chunk(&chunk);
        }
    }

    pub fn finish(self) -> ChatResponse {
        let choices = self
            .choices
            .into_iter()
            .map(|(index, state)| {
                let tool_calls: Vec<ToolCall> = state.tool_calls.into_values().collect();
                ResponseChoice {
                    index,
                    message: Message {
                        role: state.role.unwrap_or(MessageRole::Assistant),
                        content: state.content.map(MessageContent::Text),
                        name: None,
                        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                        tool_call_id: None,
                        extra: HashMap::new(),
                    },
                    finish_reason: state.finish_reason,
                    logprobs: None,
                }
            })
            .collect();

        ChatResponse {
            id: self.id.unwrap_or_default(),
            object: "chat.completion".to_string(),
            created: self.created,
            model: self.model.unwrap_or_default(),
            provider: self.provider,
            choices,
            usage: self.usage,
            system_fingerprint: None,
        }
    }
}

/// Rebuild a chat response from concatenated canonical SSE text
pub fn accumulate_sse(text: &str) -> ChatResponse {
    let mut acc = StreamAccumulator::new();
    for frame in text.split("\n\n") {
        acc.push_line(frame);
    }
    acc.finish()
}

/// Drain a chunk stream into a chat response
pub async fn accumulate_stream(stream: ChunkStream) -> Result<ChatResponse, GatewayError> {
    Ok(accumulate_sse(&stream.collect_text().await?))
}
