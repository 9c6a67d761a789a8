use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeskAgentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM provider error: {0}")]
    LlmProvider(String),

    #[error("SSE parsing error: {0}")]
    SseParsing(String),

    /// A required argument for the requested action is missing or malformed.
    #[error("{0}")]
    Validation(String),

    #[error("Unsupported action: {0}")]
    UnsupportedAction(String),

    /// The desktop behind a session id could not be reached.
    #[error("Desktop unavailable for session '{session_id}': {reason}")]
    DesktopUnavailable { session_id: String, reason: String },

    /// A desktop primitive (move, click, capture...) failed on a resolved handle.
    #[error("Desktop error: {0}")]
    Desktop(String),

    #[error("Observation extraction error: {0}")]
    ObservationExtraction(String),

    #[error("Command execution error: {0}")]
    CommandExecution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

impl DeskAgentError {
    /// `"<Field> required for <action> action"`, the message the model sees.
    pub fn missing(field: &str, action: &str) -> Self {
        Self::Validation(format!("{field} required for {action} action"))
    }

    /// Errors the model can correct on its next call. They are reported as tool
    /// output instead of ending the turn.
    pub fn is_model_correctable(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::UnsupportedAction(_) | Self::Desktop(_)
        )
    }

    /// Only an unreachable desktop aborts the turn and tears the session down.
    pub fn is_fatal_for_session(&self) -> bool {
        matches!(self, Self::DesktopUnavailable { .. })
    }
}

impl serde::Serialize for DeskAgentError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

/// Fixed-shape body handed back to the transport when a turn fails unrecoverably.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPayload {
    pub error: String,
}

impl ErrorPayload {
    pub const INTERNAL: &'static str = "Internal Server Error";

    pub fn internal() -> Self {
        Self {
            error: Self::INTERNAL.to_string(),
        }
    }
}

impl From<&DeskAgentError> for ErrorPayload {
    fn from(err: &DeskAgentError) -> Self {
        match err {
            DeskAgentError::Config(msg) => Self { error: msg.clone() },
            _ => Self::internal(),
        }
    }
}

pub type DeskAgentResult<T> = Result<T, DeskAgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_names_field_and_action() {
        let err = DeskAgentError::missing("Coordinate", "left click");
        assert_eq!(err.to_string(), "Coordinate required for left click action");
        assert!(err.is_model_correctable());
        assert!(!err.is_fatal_for_session());
    }

    #[test]
    fn only_unavailable_desktop_is_fatal() {
        let err = DeskAgentError::DesktopUnavailable {
            session_id: "s1".into(),
            reason: "gone".into(),
        };
        assert!(err.is_fatal_for_session());
        assert!(!err.is_model_correctable());
        assert!(!DeskAgentError::CommandExecution("x".into()).is_fatal_for_session());
    }

    #[test]
    fn error_payload_hides_internal_details() {
        let err = DeskAgentError::DesktopUnavailable {
            session_id: "s1".into(),
            reason: "sandbox expired".into(),
        };
        let payload = ErrorPayload::from(&err);
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            serde_json::json!({ "error": "Internal Server Error" })
        );
    }
}
