use async_trait::async_trait;

use crate::agent_engine::event_bus::TurnEmitter;
use crate::errors::DeskAgentResult;
use crate::llm::types::{CallConfig, ChatMessage, LlmResponse, ToolDef};

/// Unified LLM provider trait. All providers implement this trait.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Returns the provider's identifier (matches config.toml key).
    fn name(&self) -> &str;

    /// Runs one chat completion. When an emitter is given, stream chunks are
    /// forwarded to it as they arrive; the accumulated response is returned either way.
    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolDef>,
        cfg: &CallConfig,
        emitter: Option<&TurnEmitter>,
    ) -> DeskAgentResult<LlmResponse>;
}
