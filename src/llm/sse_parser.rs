use crate::errors::{DeskAgentError, DeskAgentResult};
use crate::llm::types::{StreamChunk, StreamChunkKind};

/// Parses one SSE line from an OpenAI-compatible stream into a chunk.
///
/// Returns `None` for keep-alives, comments, non-data fields and deltas that carry
/// nothing the turn cares about (e.g. a bare role announcement).
pub fn parse_sse_line(line: &str) -> DeskAgentResult<Option<StreamChunk>> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim();
    if data.is_empty() {
        return Ok(None);
    }
    if data == "[DONE]" {
        return Ok(Some(chunk(StreamChunkKind::Done, String::new())));
    }

    let json: serde_json::Value =
        serde_json::from_str(data).map_err(|e| DeskAgentError::SseParsing(e.to_string()))?;

    // Ollama and some proxies report failures in-band instead of with an HTTP status.
    if let Some(err) = json.get("error") {
        let message = err["message"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return Ok(Some(chunk(StreamChunkKind::Error, message)));
    }

    let Some(first) = json["choices"].as_array().and_then(|c| c.first()) else {
        return Ok(None);
    };
    let delta = &first["delta"];

    if let Some(reasoning) = non_empty(&delta["reasoning_content"]) {
        return Ok(Some(chunk(StreamChunkKind::Reasoning, reasoning)));
    }
    if let Some(tool_calls) = delta["tool_calls"].as_array().filter(|t| !t.is_empty()) {
        let content = serde_json::to_string(tool_calls)
            .map_err(|e| DeskAgentError::SseParsing(e.to_string()))?;
        return Ok(Some(chunk(StreamChunkKind::ToolCall, content)));
    }
    if let Some(content) = non_empty(&delta["content"]) {
        return Ok(Some(chunk(StreamChunkKind::Content, content)));
    }
    if first["finish_reason"].is_string() {
        return Ok(Some(chunk(StreamChunkKind::Done, String::new())));
    }
    Ok(None)
}

fn chunk(kind: StreamChunkKind, content: String) -> StreamChunk {
    StreamChunk { kind, content }
}

fn non_empty(value: &serde_json::Value) -> Option<String> {
    value.as_str().filter(|s| !s.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_keepalive_and_non_data_lines() {
        assert!(parse_sse_line("").unwrap().is_none());
        assert!(parse_sse_line(": ping").unwrap().is_none());
        assert!(parse_sse_line("event: message").unwrap().is_none());
    }

    #[test]
    fn done_marker_ends_stream() {
        let chunk = parse_sse_line("data: [DONE]").unwrap().unwrap();
        assert_eq!(chunk.kind, StreamChunkKind::Done);
    }

    #[test]
    fn content_delta() {
        let line = r#"data: {"choices":[{"delta":{"content":"Opening the browser"}}]}"#;
        let chunk = parse_sse_line(line).unwrap().unwrap();
        assert_eq!(chunk.kind, StreamChunkKind::Content);
        assert_eq!(chunk.content, "Opening the browser");
    }

    #[test]
    fn tool_call_delta_is_forwarded_as_json() {
        let line = r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"computer","arguments":""}}]}}]}"#;
        let chunk = parse_sse_line(line).unwrap().unwrap();
        assert_eq!(chunk.kind, StreamChunkKind::ToolCall);
        let deltas: Vec<serde_json::Value> = serde_json::from_str(&chunk.content).unwrap();
        assert_eq!(deltas[0]["function"]["name"], "computer");
    }

    #[test]
    fn finish_reason_without_content_is_done() {
        let line = r#"data: {"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#;
        let chunk = parse_sse_line(line).unwrap().unwrap();
        assert_eq!(chunk.kind, StreamChunkKind::Done);
    }

    #[test]
    fn in_band_error_object() {
        let line = r#"data: {"error":{"message":"model 'llava' not found"}}"#;
        let chunk = parse_sse_line(line).unwrap().unwrap();
        assert_eq!(chunk.kind, StreamChunkKind::Error);
        assert_eq!(chunk.content, "model 'llava' not found");
    }

    #[test]
    fn role_only_delta_is_ignored() {
        let line = r#"data: {"choices":[{"delta":{"role":"assistant","content":""}}]}"#;
        assert!(parse_sse_line(line).unwrap().is_none());
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(
            parse_sse_line("data: {not json"),
            Err(DeskAgentError::SseParsing(_))
        ));
    }
}
