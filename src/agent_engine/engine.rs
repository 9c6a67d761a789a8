use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::agent_engine::event_bus::{FinishReason, StopSignal, TurnEmitter, TurnEvent};
use crate::agent_engine::history::{sanitize, ABORTED};
use crate::agent_engine::loop_control::LoopController;
use crate::agent_engine::state::{Message, MessagePart, Role, ToolInvocation};
use crate::config::{AgentConfig, AppConfig};
use crate::errors::{DeskAgentError, DeskAgentResult};
use crate::executor::action::{result_to_model_text, ActionDispatcher};
use crate::executor::command::CommandDispatcher;
use crate::executor::handle::DesktopResolver;
use crate::executor::sessions::DesktopSessions;
use crate::llm::provider::LlmProvider;
use crate::llm::registry::ProviderRegistry;
use crate::llm::tools::{load_builtin_tools, BASH_TOOL, COMPUTER_TOOL};
use crate::llm::types::{
    CallConfig, ChatMessage, FunctionCall, LlmResponse, MessageContent, ToolCall, ToolDef,
};
use crate::perception::observation::ObservationExtractor;

const SYSTEM_PROMPT: &str = "\
You are a helpful assistant with access to a computer. \
Use the computer tool to help the user with their requests. \
For action=screenshot, the tool returns OCR + a layout description of the screen. \
Use the bash tool to execute commands on the computer. \
You can create files and folders using the bash tool. \
Always prefer the bash tool where it is viable for the task. \
Be sure to advise the user when waiting is necessary. \
If the browser opens with a setup wizard, YOU MUST IGNORE IT and move straight to the next step \
(e.g. input the url in the search bar).";

/// One chat request from the transport.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRequest {
    pub messages: Vec<Message>,
    #[serde(alias = "sandboxId")]
    pub session_id: String,
}

/// Model text and transcript value produced by one tool execution.
struct ToolOutcome {
    transcript: Value,
    model_text: String,
}

pub struct TurnEngine {
    provider: Arc<dyn LlmProvider>,
    cfg: CallConfig,
    sessions: Arc<DesktopSessions>,
    actions: ActionDispatcher,
    commands: CommandDispatcher,
    agent: AgentConfig,
}

impl TurnEngine {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        cfg: CallConfig,
        sessions: Arc<DesktopSessions>,
        observer: ObservationExtractor,
        agent: AgentConfig,
    ) -> Self {
        let actions =
            ActionDispatcher::new(sessions.clone(), observer).with_max_wait(agent.max_wait_seconds);
        let commands = CommandDispatcher::new(sessions.clone());
        Self {
            provider,
            cfg,
            sessions,
            actions,
            commands,
            agent,
        }
    }

    pub fn from_config(
        config: &AppConfig,
        registry: &ProviderRegistry,
        resolver: Arc<dyn DesktopResolver>,
    ) -> DeskAgentResult<Self> {
        let (provider, cfg) = registry.automation()?;
        let observer = ObservationExtractor::from_registry(registry)?;
        tracing::info!(
            provider = %provider.name(),
            model = %cfg.model,
            ocr = observer.is_enabled(),
            "turn engine ready"
        );
        let sessions = Arc::new(DesktopSessions::new(resolver));
        Ok(Self::new(provider, cfg, sessions, observer, config.agent.clone()))
    }

    /// Runs model steps until the model stops calling tools, a limit is hit, or
    /// `stop` fires. Returns the assistant message produced by the turn.
    pub async fn run_turn(
        &self,
        request: TurnRequest,
        emitter: &TurnEmitter,
        mut stop: StopSignal,
    ) -> DeskAgentResult<Message> {
        let session_id = request.session_id;
        let history = sanitize(request.messages);
        let tools = load_builtin_tools()?;

        let mut chat = vec![ChatMessage::system(SYSTEM_PROMPT)];
        chat.extend(to_chat_messages(&history));

        let mut ctrl = LoopController::new(&self.agent);
        let mut reply = Message::assistant();
        tracing::info!(session = %session_id, messages = history.len(), "turn started");

        let reason = 'turn: loop {
            if stop.is_stopped() {
                break FinishReason::Aborted;
            }
            if let Some(reason) = ctrl.limit_reached() {
                break reason;
            }
            let step = ctrl.record_step() - 1;
            reply.parts.push(MessagePart::StepStart);

            let budget = ctrl.remaining();
            let response = tokio::select! {
                biased;
                _ = stop.stopped() => break FinishReason::Aborted,
                r = tokio::time::timeout(budget, self.call_model(chat.clone(), tools.clone(), emitter)) => r,
            };
            let response = match response {
                Ok(Ok(r)) => r,
                Err(_) => {
                    tracing::warn!(session = %session_id, step, "model call outlived the turn budget");
                    break FinishReason::TimeLimit;
                }
                Ok(Err(e)) => {
                    tracing::error!(session = %session_id, step, error = %e, "model call failed");
                    emitter.emit(TurnEvent::Error {
                        message: e.to_string(),
                    });
                    return Err(e);
                }
            };

            if !response.reasoning.is_empty() {
                reply.parts.push(MessagePart::Reasoning {
                    reasoning: response.reasoning.clone(),
                });
            }
            if !response.content.is_empty() {
                reply.push_text(response.content.clone());
            }
            if response.tool_calls.is_empty() {
                break FinishReason::Stop;
            }

            let calls: Vec<ToolCall> = response
                .tool_calls
                .into_iter()
                .map(|mut tc| {
                    if tc.id.is_empty() {
                        tc.id = format!("call_{}", uuid::Uuid::new_v4().simple());
                    }
                    tc
                })
                .collect();
            chat.push(ChatMessage {
                role: "assistant".into(),
                content: MessageContent::Text(response.content),
                tool_call_id: None,
                tool_calls: Some(calls.clone()),
            });

            for tc in calls {
                let args = parse_arguments(&tc.function.arguments);
                let mut inv = ToolInvocation::call(&tc.id, &tc.function.name, args, step);
                tracing::info!(
                    session = %session_id,
                    step,
                    tool = %inv.tool_name,
                    args = %inv.args,
                    "tool call"
                );
                emitter.emit(TurnEvent::ToolCall {
                    invocation: inv.clone(),
                });

                let outcome = tokio::select! {
                    biased;
                    _ = stop.stopped() => None,
                    r = self.execute_tool(&session_id, &inv) => Some(r),
                };

                let model_text = match outcome {
                    None => {
                        tracing::info!(session = %session_id, tool = %inv.tool_name, "tool call aborted");
                        inv.resolve(Value::String(ABORTED.into()));
                        self.record_result(&mut reply, inv, emitter);
                        break 'turn FinishReason::Aborted;
                    }
                    Some(Ok(out)) => {
                        inv.resolve(out.transcript);
                        out.model_text
                    }
                    Some(Err(e)) if e.is_fatal_for_session() => {
                        tracing::error!(session = %session_id, error = %e, "desktop unavailable, ending turn");
                        self.sessions.teardown(&session_id).await;
                        emitter.emit(TurnEvent::Error {
                            message: e.to_string(),
                        });
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        if e.is_model_correctable() {
                            tracing::warn!(session = %session_id, tool = %inv.tool_name, error = %e, "tool call rejected");
                        } else {
                            tracing::error!(session = %session_id, tool = %inv.tool_name, error = %e, "tool call failed");
                        }
                        let text = e.to_string();
                        inv.resolve(Value::String(text.clone()));
                        text
                    }
                };
                chat.push(ChatMessage::tool_result(&tc.id, model_text));
                self.record_result(&mut reply, inv, emitter);
            }
        };

        tracing::info!(session = %session_id, steps = ctrl.steps(), reason = ?reason, "turn finished");
        emitter.emit(TurnEvent::Finish {
            reason,
            steps: ctrl.steps(),
        });
        Ok(reply)
    }

    async fn call_model(
        &self,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolDef>,
        emitter: &TurnEmitter,
    ) -> DeskAgentResult<LlmResponse> {
        self.provider
            .chat(messages, tools, &self.cfg, Some(emitter))
            .await
    }

    async fn execute_tool(&self, session_id: &str, inv: &ToolInvocation) -> DeskAgentResult<ToolOutcome> {
        match inv.tool_name.as_str() {
            COMPUTER_TOOL => {
                let out = self.actions.dispatch_args(session_id, &inv.args).await?;
                Ok(ToolOutcome {
                    transcript: out.to_transcript(),
                    model_text: out.to_model_text(),
                })
            }
            BASH_TOOL => {
                let text = self.commands.run_args(session_id, &inv.args).await?;
                Ok(ToolOutcome {
                    transcript: Value::String(text.clone()),
                    model_text: text,
                })
            }
            other => Err(DeskAgentError::UnsupportedAction(format!("unknown tool '{other}'"))),
        }
    }

    fn record_result(&self, reply: &mut Message, inv: ToolInvocation, emitter: &TurnEmitter) {
        emitter.emit(TurnEvent::ToolResult {
            invocation: inv.clone(),
        });
        reply.parts.push(MessagePart::ToolInvocation {
            tool_invocation: inv,
        });
    }
}

/// Models occasionally emit malformed arguments; validation then names the missing field.
fn parse_arguments(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ Value::Object(_)) => v,
        Ok(_) | Err(_) => {
            tracing::warn!(arguments = %raw, "tool arguments are not a JSON object");
            Value::Object(Default::default())
        }
    }
}

/// Flattens the transcript into chat-completion messages.
///
/// Each resolved invocation becomes an assistant `tool_calls` message followed by
/// a `tool` message with the model-facing result text. Unresolved invocations are
/// dropped since the API rejects calls without results.
pub fn to_chat_messages(messages: &[Message]) -> Vec<ChatMessage> {
    let mut out = Vec::new();
    for msg in messages {
        match msg.role {
            Role::System => {
                let text = msg.text();
                if !text.is_empty() {
                    out.push(ChatMessage::system(text));
                }
            }
            Role::User => {
                let text = msg.text();
                if !text.is_empty() {
                    out.push(ChatMessage::user(text));
                }
            }
            Role::Assistant => push_assistant(msg, &mut out),
        }
    }
    out
}

fn push_assistant(msg: &Message, out: &mut Vec<ChatMessage>) {
    let mut pending = String::new();
    let mut saw_parts = false;
    for part in &msg.parts {
        match part {
            MessagePart::Text { text } => {
                saw_parts = true;
                if !pending.is_empty() {
                    pending.push('\n');
                }
                pending.push_str(text);
            }
            MessagePart::ToolInvocation { tool_invocation: inv } => {
                saw_parts = true;
                let Some(result) = inv.result.as_ref().filter(|_| !inv.is_pending()) else {
                    tracing::debug!(tool_call_id = %inv.tool_call_id, "skipping unresolved tool call");
                    continue;
                };
                out.push(ChatMessage {
                    role: "assistant".into(),
                    content: MessageContent::Text(std::mem::take(&mut pending)),
                    tool_call_id: None,
                    tool_calls: Some(vec![ToolCall {
                        id: inv.tool_call_id.clone(),
                        call_type: "function".into(),
                        function: FunctionCall {
                            name: inv.tool_name.clone(),
                            arguments: inv.args.to_string(),
                        },
                    }]),
                });
                out.push(ChatMessage::tool_result(
                    inv.tool_call_id.clone(),
                    result_to_model_text(result),
                ));
            }
            MessagePart::Reasoning { .. } | MessagePart::StepStart => {}
        }
    }
    if !saw_parts {
        pending = msg.content.clone();
    }
    if !pending.is_empty() {
        out.push(ChatMessage::text("assistant", pending));
    }
}
