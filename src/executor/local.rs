// Desktop handle for the machine this process runs on.
use std::sync::Arc;

use async_trait::async_trait;
use enigo::Button;
use tokio::sync::OnceCell;

use crate::errors::{DeskAgentError, DeskAgentResult};
use crate::executor::coordinator::logical_to_physical;
use crate::executor::handle::{
    CommandOutput, Coordinate, DesktopHandle, DesktopResolver, ScrollDirection,
};
use crate::executor::input;
use crate::perception::screenshot::{capture_primary, primary_meta};
use crate::perception::types::ScreenshotMeta;

#[derive(Default)]
pub struct LocalDesktop {
    meta: OnceCell<ScreenshotMeta>,
}

impl LocalDesktop {
    pub fn new() -> Self {
        Self::default()
    }

    async fn meta(&self) -> DeskAgentResult<&ScreenshotMeta> {
        self.meta.get_or_try_init(primary_meta).await
    }

    async fn physical(&self, at: Coordinate) -> DeskAgentResult<(i32, i32)> {
        Ok(logical_to_physical(at, self.meta().await?))
    }
}

#[async_trait]
impl DesktopHandle for LocalDesktop {
    async fn screenshot(&self) -> DeskAgentResult<Vec<u8>> {
        let shot = capture_primary().await?;
        let _ = self.meta.set(shot.meta);
        Ok(shot.image_bytes)
    }

    async fn move_mouse(&self, x: i32, y: i32) -> DeskAgentResult<()> {
        let (px, py) = self.physical(Coordinate::new(x, y)).await?;
        tracing::debug!(x, y, px, py, "move pointer");
        input::move_mouse(px, py).await
    }

    async fn left_click(&self) -> DeskAgentResult<()> {
        input::click(Button::Left, 1).await
    }

    async fn right_click(&self) -> DeskAgentResult<()> {
        input::click(Button::Right, 1).await
    }

    async fn double_click(&self) -> DeskAgentResult<()> {
        input::click(Button::Left, 2).await
    }

    async fn write(&self, text: &str) -> DeskAgentResult<()> {
        input::type_text(text.to_string()).await
    }

    async fn press(&self, key: &str) -> DeskAgentResult<()> {
        input::press_key(key.to_string()).await
    }

    async fn scroll(&self, direction: ScrollDirection, amount: u32) -> DeskAgentResult<()> {
        input::scroll(direction, amount).await
    }

    async fn drag(&self, from: Coordinate, to: Coordinate) -> DeskAgentResult<()> {
        let from = self.physical(from).await?;
        let to = self.physical(to).await?;
        input::drag(from, to).await
    }

    async fn run_command(&self, command: &str) -> DeskAgentResult<CommandOutput> {
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .output()
            .await
            .map_err(|e| DeskAgentError::CommandExecution(e.to_string()))?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(DeskAgentError::CommandExecution(format!(
                "{}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(CommandOutput { stdout, stderr })
    }
}

/// Every session id maps onto the one local desktop.
pub struct LocalResolver {
    desktop: Arc<LocalDesktop>,
}

impl LocalResolver {
    pub fn new() -> Self {
        Self {
            desktop: Arc::new(LocalDesktop::new()),
        }
    }
}

impl Default for LocalResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DesktopResolver for LocalResolver {
    async fn resolve(&self, _session_id: &str) -> DeskAgentResult<Arc<dyn DesktopHandle>> {
        Ok(self.desktop.clone())
    }

    async fn teardown(&self, session_id: &str) -> DeskAgentResult<()> {
        tracing::info!(session = %session_id, "local desktop has nothing to tear down");
        Ok(())
    }
}
