use serde::{Deserialize, Serialize};

use crate::executor::handle::{SCREEN_HEIGHT, SCREEN_WIDTH};

/// Geometry of a captured frame: the monitor's physical size and the logical
/// size the frame was scaled to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenshotMeta {
    pub physical_width: u32,
    pub physical_height: u32,
    pub logical_width: u32,
    pub logical_height: u32,
}

impl ScreenshotMeta {
    /// Meta for a monitor whose frames are scaled to the 1024x768 action space.
    pub fn for_monitor(physical_width: u32, physical_height: u32) -> Self {
        Self {
            physical_width,
            physical_height,
            logical_width: SCREEN_WIDTH as u32,
            logical_height: SCREEN_HEIGHT as u32,
        }
    }
}
