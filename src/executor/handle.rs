use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::DeskAgentResult;

/// Logical desktop resolution every coordinate is expressed in.
pub const SCREEN_WIDTH: i32 = 1024;
pub const SCREEN_HEIGHT: i32 = 768;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: i32,
    pub y: i32,
}

impl Coordinate {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl From<(i32, i32)> for Coordinate {
    fn from((x, y): (i32, i32)) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Up,
    Down,
}

impl ScrollDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

impl fmt::Display for ScrollDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Primitive operations of one remote desktop.
///
/// Implementations are shared behind `Arc` and may be called from any task; callers
/// serialize access per session through [`DesktopSessions`](super::sessions::DesktopSessions).
#[async_trait]
pub trait DesktopHandle: Send + Sync {
    /// PNG (or other encoded image) bytes of the current frame.
    async fn screenshot(&self) -> DeskAgentResult<Vec<u8>>;
    async fn move_mouse(&self, x: i32, y: i32) -> DeskAgentResult<()>;
    async fn left_click(&self) -> DeskAgentResult<()>;
    async fn right_click(&self) -> DeskAgentResult<()>;
    async fn double_click(&self) -> DeskAgentResult<()>;
    async fn write(&self, text: &str) -> DeskAgentResult<()>;
    async fn press(&self, key: &str) -> DeskAgentResult<()>;
    async fn scroll(&self, direction: ScrollDirection, amount: u32) -> DeskAgentResult<()>;
    async fn drag(&self, from: Coordinate, to: Coordinate) -> DeskAgentResult<()>;
    /// Runs a shell command. A failing command is an `Err`, not a non-empty stderr.
    async fn run_command(&self, command: &str) -> DeskAgentResult<CommandOutput>;
}

/// Looks up (never creates) the desktop behind a session id.
#[async_trait]
pub trait DesktopResolver: Send + Sync {
    async fn resolve(&self, session_id: &str) -> DeskAgentResult<Arc<dyn DesktopHandle>>;

    /// Releases the remote desktop. Called after an unrecoverable turn failure.
    async fn teardown(&self, session_id: &str) -> DeskAgentResult<()>;
}
