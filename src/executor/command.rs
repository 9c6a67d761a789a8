use std::sync::Arc;

use serde::Deserialize;

use crate::errors::{DeskAgentError, DeskAgentResult};
use crate::executor::sessions::DesktopSessions;

pub const NO_OUTPUT: &str = "(Command executed successfully with no output)";

#[derive(Debug, Clone, Deserialize)]
struct BashArgs {
    #[serde(default)]
    command: String,
}

/// Runs `bash` tool calls. Execution failures come back as text, never as errors.
pub struct CommandDispatcher {
    sessions: Arc<DesktopSessions>,
}

impl CommandDispatcher {
    pub fn new(sessions: Arc<DesktopSessions>) -> Self {
        Self { sessions }
    }

    pub async fn run_args(&self, session_id: &str, args: &serde_json::Value) -> DeskAgentResult<String> {
        let args: BashArgs = serde_json::from_value(args.clone())
            .map_err(|e| DeskAgentError::Validation(format!("Invalid bash arguments: {e}")))?;
        self.run(session_id, &args.command).await
    }

    pub async fn run(&self, session_id: &str, command: &str) -> DeskAgentResult<String> {
        if command.trim().is_empty() {
            return Err(DeskAgentError::missing("Command", "bash"));
        }
        let lease = self.sessions.acquire(session_id).await?;
        tracing::info!(session = %session_id, command = %command, "running command");

        match lease.handle.run_command(command).await {
            Ok(output) if output.stdout.is_empty() => Ok(NO_OUTPUT.to_string()),
            Ok(output) => Ok(output.stdout),
            Err(e) => {
                tracing::warn!(session = %session_id, error = %e, "command failed");
                let description = match e {
                    DeskAgentError::CommandExecution(msg) | DeskAgentError::Desktop(msg) => msg,
                    other => other.to_string(),
                };
                Ok(format!("Error executing command: {description}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::executor::handle::testing::FakeResolver;
    use crate::executor::handle::CommandOutput;

    fn dispatcher() -> (Arc<FakeResolver>, CommandDispatcher) {
        let resolver = Arc::new(FakeResolver::new());
        let sessions = Arc::new(DesktopSessions::new(resolver.clone()));
        (resolver, CommandDispatcher::new(sessions))
    }

    #[tokio::test]
    async fn returns_stdout() {
        let (resolver, d) = dispatcher();
        resolver.desktop.set_command_result(Ok(CommandOutput {
            stdout: "notes.txt\n".into(),
            stderr: String::new(),
        }));
        let out = d.run_args("sbx", &json!({ "command": "ls ~" })).await.unwrap();
        assert_eq!(out, "notes.txt\n");
        assert_eq!(resolver.desktop.calls(), ["run ls ~"]);
    }

    #[tokio::test]
    async fn empty_stdout_gets_placeholder() {
        let (resolver, d) = dispatcher();
        resolver.desktop.set_command_result(Ok(CommandOutput {
            stdout: String::new(),
            stderr: "warning: something".into(),
        }));
        assert_eq!(d.run("sbx", "mkdir -p /tmp/x").await.unwrap(), NO_OUTPUT);
    }

    #[tokio::test]
    async fn failures_become_text() {
        let (resolver, d) = dispatcher();
        resolver
            .desktop
            .set_command_result(Err(DeskAgentError::CommandExecution("exit status 127: foo: not found".into())));
        assert_eq!(
            d.run("sbx", "foo").await.unwrap(),
            "Error executing command: exit status 127: foo: not found"
        );
    }

    #[tokio::test]
    async fn blank_command_is_rejected_before_resolving() {
        let (resolver, d) = dispatcher();
        assert!(matches!(
            d.run_args("sbx", &json!({})).await,
            Err(DeskAgentError::Validation(_))
        ));
        assert!(matches!(d.run("sbx", "   ").await, Err(DeskAgentError::Validation(_))));
        assert_eq!(resolver.resolve_count(), 0);
    }

    #[tokio::test]
    async fn unreachable_desktop_propagates() {
        let sessions = Arc::new(DesktopSessions::new(Arc::new(FakeResolver::unavailable())));
        let err = CommandDispatcher::new(sessions).run("sbx", "ls").await.unwrap_err();
        assert!(err.is_fatal_for_session());
    }
}
