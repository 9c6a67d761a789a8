use serde::Serialize;
use tokio::sync::{mpsc, watch};

use crate::agent_engine::state::ToolInvocation;
use crate::llm::types::StreamChunk;

/// Why a turn stopped producing steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The model answered without calling a tool.
    Stop,
    StepLimit,
    TimeLimit,
    Aborted,
}

/// Incremental output of a turn, in emission order.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    Chunk { chunk: StreamChunk },
    ToolCall { invocation: ToolInvocation },
    ToolResult { invocation: ToolInvocation },
    Error { message: String },
    Finish { reason: FinishReason, steps: u32 },
}

#[derive(Clone)]
pub struct TurnEmitter {
    tx: mpsc::UnboundedSender<TurnEvent>,
}

impl TurnEmitter {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TurnEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// A disconnected client does not stop the turn.
    pub fn emit(&self, event: TurnEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("turn event dropped: receiver closed");
        }
    }

    pub fn chunk(&self, chunk: &StreamChunk) {
        self.emit(TurnEvent::Chunk {
            chunk: chunk.clone(),
        });
    }
}

/// Client side of the stop signal.
pub struct StopHandle {
    tx: watch::Sender<bool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }
}

/// Engine side of the stop signal.
#[derive(Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once stop was requested. Never resolves if the handle is dropped first.
    pub async fn stopped(&mut self) {
        let outcome = self.rx.wait_for(|stopped| *stopped).await.map(|_| ());
        if outcome.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

pub fn stop_signal() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx }, StopSignal { rx })
}
