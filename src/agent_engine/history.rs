//! Transcript hygiene applied before each model call.
use serde_json::{json, Value};

use crate::agent_engine::state::{Message, MessagePart, Role, ToolInvocation};
use crate::llm::tools::COMPUTER_TOOL;

pub const IMAGE_REDACTED: &str = "Image redacted to save input tokens";
pub const ABORTED: &str = "User aborted";

/// Replaces every image payload of a resolved screenshot call with
/// `{"type":"text","text":IMAGE_REDACTED}`, whatever observation it carried.
///
/// Nothing else in the transcript changes, and a transcript whose last message
/// is from the assistant is returned as-is.
pub fn sanitize(mut messages: Vec<Message>) -> Vec<Message> {
    if messages.last().map(|m| m.role) == Some(Role::Assistant) {
        return messages;
    }

    let mut rewritten = 0usize;
    for msg in messages.iter_mut().filter(|m| m.role == Role::Assistant) {
        for part in msg.parts.iter_mut() {
            let MessagePart::ToolInvocation { tool_invocation } = part else {
                continue;
            };
            if carries_screenshot_image(tool_invocation) {
                tool_invocation.result = Some(json!({ "type": "text", "text": IMAGE_REDACTED }));
                rewritten += 1;
            }
        }
    }
    if rewritten > 0 {
        tracing::debug!(rewritten, "screenshot payloads stripped from transcript");
    }
    messages
}

fn carries_screenshot_image(inv: &ToolInvocation) -> bool {
    inv.tool_name == COMPUTER_TOOL
        && inv.action() == Some("screenshot")
        && inv.result.as_ref().map_or(false, is_image_payload)
}

fn is_image_payload(result: &Value) -> bool {
    result.get("type").and_then(Value::as_str) == Some("image")
        && result.get("data").map_or(false, Value::is_string)
}

/// Resolves a dangling call at the end of the transcript with [`ABORTED`].
///
/// Returns whether anything changed.
pub fn mark_aborted(messages: &mut [Message]) -> bool {
    let Some(last) = messages.last_mut() else {
        return false;
    };
    if last.role != Role::Assistant {
        return false;
    }
    match last.parts.last_mut() {
        Some(MessagePart::ToolInvocation { tool_invocation }) if tool_invocation.is_pending() => {
            tracing::info!(
                tool_call_id = %tool_invocation.tool_call_id,
                tool = %tool_invocation.tool_name,
                "marking pending tool call as aborted"
            );
            tool_invocation.resolve(Value::String(ABORTED.into()));
            true
        }
        _ => false,
    }
}
