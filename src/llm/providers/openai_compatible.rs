use std::collections::BTreeMap;

use async_trait::async_trait;
use futures_util::StreamExt;

use crate::agent_engine::event_bus::TurnEmitter;
use crate::errors::{DeskAgentError, DeskAgentResult};
use crate::llm::provider::LlmProvider;
use crate::llm::sse_parser;
use crate::llm::types::{
    CallConfig, ChatMessage, FunctionCall, LlmResponse, StreamChunk, StreamChunkKind, ToolCall,
    ToolDef,
};

/// Chat-completions client for OpenAI-compatible servers (OpenAI, Ollama, vLLM, ...).
pub struct OpenAiCompatibleProvider {
    id: String,
    api_base: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(id: String, api_base: String, api_key: String) -> Self {
        Self {
            id,
            api_base,
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.id
    }

    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolDef>,
        cfg: &CallConfig,
        emitter: Option<&TurnEmitter>,
    ) -> DeskAgentResult<LlmResponse> {
        let body = build_request_body(&messages, &tools, cfg)?;

        tracing::debug!(
            provider = %self.id,
            model = %cfg.model,
            stream = cfg.stream,
            messages = messages.len(),
            "sending LLM request"
        );
        tracing::trace!(body = %redact_images(&body), "request body (base64 omitted)");

        let response = self
            .client
            .post(&self.api_base)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(DeskAgentError::LlmProvider(format!("{status}: {err_body}")));
        }

        if cfg.stream {
            self.handle_stream(response, emitter).await
        } else {
            self.handle_json(response, emitter).await
        }
    }
}

impl OpenAiCompatibleProvider {
    /// Reads the SSE body, forwarding chunks to the emitter while accumulating the reply.
    async fn handle_stream(
        &self,
        response: reqwest::Response,
        emitter: Option<&TurnEmitter>,
    ) -> DeskAgentResult<LlmResponse> {
        let mut byte_stream = response.bytes_stream();
        let mut line_buf: Vec<u8> = Vec::new();
        let mut acc = StreamAccumulator::default();

        'stream: while let Some(result) = byte_stream.next().await {
            let bytes = result?;
            for &b in bytes.iter() {
                if b != b'\n' {
                    line_buf.push(b);
                    continue;
                }
                let line = String::from_utf8_lossy(&line_buf).trim().to_string();
                line_buf.clear();
                if let Some(chunk) = acc.push_line(&line) {
                    if let Some(em) = emitter {
                        em.chunk(&chunk);
                    }
                }
                if acc.is_done() {
                    break 'stream;
                }
            }
        }

        if !line_buf.is_empty() && !acc.is_done() {
            let line = String::from_utf8_lossy(&line_buf).trim().to_string();
            if let Some(chunk) = acc.push_line(&line) {
                if let Some(em) = emitter {
                    em.chunk(&chunk);
                }
            }
        }

        // Fallback Done in case the stream ended without a [DONE] marker
        if !acc.is_done() {
            if let Some(em) = emitter {
                em.chunk(&StreamChunk {
                    kind: StreamChunkKind::Done,
                    content: String::new(),
                });
            }
        }

        let response = acc.finish()?;
        tracing::info!(
            content_len = response.content.len(),
            reasoning_len = response.reasoning.len(),
            tool_calls = response.tool_calls.len(),
            tools = ?response.tool_calls.iter().map(|tc| tc.function.name.as_str()).collect::<Vec<_>>(),
            "LLM stream complete"
        );
        Ok(response)
    }

    async fn handle_json(
        &self,
        response: reqwest::Response,
        emitter: Option<&TurnEmitter>,
    ) -> DeskAgentResult<LlmResponse> {
        let json: serde_json::Value = response.json().await?;
        let parsed = parse_completion(&json)?;

        tracing::info!(
            content_len = parsed.content.len(),
            tool_calls = parsed.tool_calls.len(),
            "LLM JSON response received"
        );

        if let Some(em) = emitter {
            if !parsed.content.is_empty() {
                em.chunk(&StreamChunk {
                    kind: StreamChunkKind::Content,
                    content: parsed.content.clone(),
                });
            }
            em.chunk(&StreamChunk {
                kind: StreamChunkKind::Done,
                content: String::new(),
            });
        }
        Ok(parsed)
    }
}

pub(crate) fn build_request_body(
    messages: &[ChatMessage],
    tools: &[ToolDef],
    cfg: &CallConfig,
) -> DeskAgentResult<serde_json::Value> {
    let mut body = serde_json::json!({
        "model": cfg.model,
        "messages": messages,
        "stream": cfg.stream,
        "temperature": cfg.temperature,
    });
    if let Some(max_tokens) = cfg.max_tokens {
        body["max_tokens"] = serde_json::json!(max_tokens);
    }
    if !tools.is_empty() {
        body["tools"] = serde_json::to_value(tools)?;
        body["tool_choice"] = serde_json::json!("auto");
    }
    Ok(body)
}

/// Copy of the body with every `image_url.url` replaced, for logging only.
fn redact_images(body: &serde_json::Value) -> String {
    let mut log_body = body.clone();
    if let Some(msgs) = log_body.get_mut("messages").and_then(|m| m.as_array_mut()) {
        for msg in msgs {
            let Some(parts) = msg.get_mut("content").and_then(|c| c.as_array_mut()) else {
                continue;
            };
            for part in parts {
                if part["type"] == "image_url" {
                    part["image_url"]["url"] =
                        serde_json::Value::String("<omitted_base64_image>".to_string());
                }
            }
        }
    }
    serde_json::to_string(&log_body).unwrap_or_default()
}

/// Parses a non-streaming chat-completions body.
pub(crate) fn parse_completion(json: &serde_json::Value) -> DeskAgentResult<LlmResponse> {
    if let Some(err) = json.get("error") {
        return Err(DeskAgentError::LlmProvider(err.to_string()));
    }
    let message = &json["choices"][0]["message"];
    let content = message["content"].as_str().unwrap_or("").to_string();
    let reasoning = message["reasoning_content"].as_str().unwrap_or("").to_string();

    let tool_calls: Vec<ToolCall> = message["tool_calls"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .map(|tc| ToolCall {
                    id: tc["id"].as_str().unwrap_or("").to_string(),
                    call_type: tc["type"].as_str().unwrap_or("function").to_string(),
                    function: FunctionCall {
                        name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                        arguments: tc["function"]["arguments"]
                            .as_str()
                            .unwrap_or("{}")
                            .to_string(),
                    },
                })
                .filter(|tc| !tc.function.name.is_empty())
                .collect()
        })
        .unwrap_or_default();

    Ok(LlmResponse {
        content,
        reasoning,
        tool_calls,
    })
}

/// Tool call under construction: (id, type, name, accumulated arguments).
type ToolCallBuilder = (String, String, String, String);

/// Folds SSE lines into an `LlmResponse`.
#[derive(Default)]
pub(crate) struct StreamAccumulator {
    content: String,
    reasoning: String,
    tool_calls: BTreeMap<usize, ToolCallBuilder>,
    error: Option<String>,
    done: bool,
}

impl StreamAccumulator {
    /// Feeds one line; returns the parsed chunk so the caller can forward it.
    pub(crate) fn push_line(&mut self, line: &str) -> Option<StreamChunk> {
        if line.is_empty() || self.done {
            return None;
        }
        let chunk = match sse_parser::parse_sse_line(line) {
            Ok(Some(chunk)) => chunk,
            Ok(None) => return None,
            Err(e) => {
                tracing::debug!("SSE parse skipped: {e}");
                return None;
            }
        };
        match chunk.kind {
            StreamChunkKind::Reasoning => self.reasoning.push_str(&chunk.content),
            StreamChunkKind::Content => self.content.push_str(&chunk.content),
            StreamChunkKind::ToolCall => merge_tool_call_deltas(&chunk.content, &mut self.tool_calls),
            StreamChunkKind::Error => {
                self.error = Some(chunk.content.clone());
                self.done = true;
            }
            StreamChunkKind::Done => self.done = true,
        }
        Some(chunk)
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done
    }

    pub(crate) fn finish(self) -> DeskAgentResult<LlmResponse> {
        if let Some(err) = self.error {
            return Err(DeskAgentError::LlmProvider(err));
        }
        Ok(LlmResponse {
            content: self.content,
            reasoning: self.reasoning,
            tool_calls: build_tool_calls(self.tool_calls),
        })
    }
}

/// Merge streaming tool-call delta fragments into the accumulator map (keyed by delta index).
fn merge_tool_call_deltas(chunk_content: &str, builders: &mut BTreeMap<usize, ToolCallBuilder>) {
    let Ok(deltas) = serde_json::from_str::<Vec<serde_json::Value>>(chunk_content) else {
        return;
    };
    for delta in deltas {
        let idx = delta["index"].as_u64().unwrap_or(0) as usize;
        let entry = builders.entry(idx).or_default();

        if let Some(id) = delta["id"].as_str().filter(|s| !s.is_empty()) {
            entry.0 = id.to_string();
        }
        if let Some(t) = delta["type"].as_str().filter(|s| !s.is_empty()) {
            entry.1 = t.to_string();
        }
        if let Some(name) = delta["function"]["name"].as_str() {
            entry.2.push_str(name);
        }
        if let Some(args) = delta["function"]["arguments"].as_str() {
            entry.3.push_str(args);
        }
    }
}

fn build_tool_calls(builders: BTreeMap<usize, ToolCallBuilder>) -> Vec<ToolCall> {
    builders
        .into_values()
        .filter(|(_, _, name, _)| !name.is_empty())
        .map(|(id, call_type, name, arguments)| ToolCall {
            id,
            call_type: if call_type.is_empty() {
                "function".to_string()
            } else {
                call_type
            },
            function: FunctionCall { name, arguments },
        })
        .collect()
}
