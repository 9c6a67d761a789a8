//! Conversation transcript as exchanged with the chat transport.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::llm::tools::{BASH_TOOL, COMPUTER_TOOL};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default)]
    pub id: String,
    pub role: Role,
    /// Flattened text, kept for transports that only read this field.
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

impl Message {
    pub fn new(role: Role) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: String::new(),
            created_at: Some(Utc::now()),
            parts: Vec::new(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        let mut msg = Self::new(Role::User);
        msg.push_text(text);
        msg
    }

    pub fn assistant() -> Self {
        Self::new(Role::Assistant)
    }

    pub fn push_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        if !self.content.is_empty() {
            self.content.push('\n');
        }
        self.content.push_str(&text);
        self.parts.push(MessagePart::Text { text });
    }

    /// Text parts joined by newlines, falling back to `content` when there are none.
    pub fn text(&self) -> String {
        let texts: Vec<&str> = self
            .parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        if texts.is_empty() {
            self.content.clone()
        } else {
            texts.join("\n")
        }
    }

    pub fn tool_invocations(&self) -> impl Iterator<Item = &ToolInvocation> {
        self.parts.iter().filter_map(|p| match p {
            MessagePart::ToolInvocation { tool_invocation } => Some(tool_invocation),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MessagePart {
    Text {
        text: String,
    },
    Reasoning {
        reasoning: String,
    },
    ToolInvocation {
        #[serde(rename = "toolInvocation")]
        tool_invocation: ToolInvocation,
    },
    StepStart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolState {
    PartialCall,
    Call,
    Result,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub state: ToolState,
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u32>,
}

impl ToolInvocation {
    /// A freshly issued call; the only way the engine creates invocations.
    pub fn call(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        args: serde_json::Value,
        step: u32,
    ) -> Self {
        Self {
            state: ToolState::Call,
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            args,
            result: None,
            step: Some(step),
        }
    }

    /// Moves the invocation from `call` to `result`.
    pub fn resolve(&mut self, result: serde_json::Value) {
        debug_assert_ne!(self.state, ToolState::Result, "tool invocation resolved twice");
        self.state = ToolState::Result;
        self.result = Some(result);
    }

    pub fn is_pending(&self) -> bool {
        self.state != ToolState::Result
    }

    /// The `computer` action named in the arguments, if any.
    pub fn action(&self) -> Option<&str> {
        self.args.get("action").and_then(|a| a.as_str())
    }
}

/// Transport-level request state, as reported by the chat client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatStatus {
    Ready,
    Submitted,
    Streaming,
    Error,
}

/// Coarse activity label for a status indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentStatus {
    Idle,
    Thinking,
    Browsing,
    Clicking,
    Typing,
    Screenshot,
    Scrolling,
    RunningCommand,
    Waiting,
}

impl AgentStatus {
    pub fn derive(status: ChatStatus, messages: &[Message]) -> Self {
        match status {
            ChatStatus::Ready => return Self::Idle,
            ChatStatus::Submitted => return Self::Thinking,
            ChatStatus::Streaming | ChatStatus::Error => {}
        }
        let last_tool = messages
            .last()
            .filter(|m| m.role == Role::Assistant)
            .and_then(|m| m.parts.last())
            .and_then(|p| match p {
                MessagePart::ToolInvocation { tool_invocation } => Some(tool_invocation),
                _ => None,
            });
        let Some(tool) = last_tool else {
            return Self::Thinking;
        };

        match tool.tool_name.as_str() {
            BASH_TOOL => Self::RunningCommand,
            COMPUTER_TOOL => match tool.action() {
                Some("screenshot") => Self::Screenshot,
                Some("left_click" | "right_click" | "double_click" | "mouse_move" | "left_click_drag") => {
                    Self::Clicking
                }
                Some("type" | "key") => Self::Typing,
                Some("scroll") => Self::Scrolling,
                Some("wait") => Self::Waiting,
                _ => Self::Browsing,
            },
            _ => Self::Thinking,
        }
    }
}
