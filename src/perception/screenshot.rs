// Frame capture for the local backend: primary monitor -> 1024x768 PNG.
use std::io::Cursor;

use image::{imageops::FilterType, ImageFormat, RgbaImage};

use crate::errors::{DeskAgentError, DeskAgentResult};
use crate::perception::types::ScreenshotMeta;

pub struct ScreenshotResult {
    pub image_bytes: Vec<u8>,
    pub meta: ScreenshotMeta,
}

/// Scales a raw monitor frame into the action space and PNG-encodes it.
pub fn normalize_frame(frame: &RgbaImage) -> DeskAgentResult<ScreenshotResult> {
    let meta = ScreenshotMeta::for_monitor(frame.width(), frame.height());
    let scaled = if frame.dimensions() == (meta.logical_width, meta.logical_height) {
        frame.clone()
    } else {
        image::imageops::resize(frame, meta.logical_width, meta.logical_height, FilterType::Triangle)
    };
    let mut image_bytes = Vec::new();
    scaled
        .write_to(&mut Cursor::new(&mut image_bytes), ImageFormat::Png)
        .map_err(|e| DeskAgentError::Desktop(format!("PNG encode failed: {e}")))?;
    Ok(ScreenshotResult { image_bytes, meta })
}

#[cfg(feature = "local")]
fn primary_monitor() -> DeskAgentResult<xcap::Monitor> {
    let monitors =
        xcap::Monitor::all().map_err(|e| DeskAgentError::Desktop(format!("monitor enumeration: {e}")))?;
    let index = monitors.iter().position(|m| m.is_primary()).unwrap_or(0);
    monitors
        .into_iter()
        .nth(index)
        .ok_or_else(|| DeskAgentError::Desktop("no monitor found".into()))
}

/// Physical size of the primary monitor.
#[cfg(feature = "local")]
pub async fn primary_meta() -> DeskAgentResult<ScreenshotMeta> {
    tokio::task::spawn_blocking(|| {
        let monitor = primary_monitor()?;
        Ok(ScreenshotMeta::for_monitor(monitor.width(), monitor.height()))
    })
    .await
    .map_err(|e| DeskAgentError::Desktop(format!("join: {e}")))?
}

/// Captures the primary monitor.
#[cfg(feature = "local")]
pub async fn capture_primary() -> DeskAgentResult<ScreenshotResult> {
    tokio::task::spawn_blocking(|| {
        let monitor = primary_monitor()?;
        let frame = monitor
            .capture_image()
            .map_err(|e| DeskAgentError::Desktop(format!("capture failed: {e}")))?;
        let shot = normalize_frame(&frame)?;
        tracing::debug!(
            phys = %format!("{}x{}", shot.meta.physical_width, shot.meta.physical_height),
            bytes = shot.image_bytes.len(),
            "primary monitor captured"
        );
        Ok(shot)
    })
    .await
    .map_err(|e| DeskAgentError::Desktop(format!("join: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_are_scaled_to_action_space_png() {
        let frame = RgbaImage::from_pixel(1920, 1080, image::Rgba([10, 20, 30, 255]));
        let shot = normalize_frame(&frame).unwrap();
        assert_eq!(shot.meta.physical_width, 1920);
        assert_eq!(shot.meta.physical_height, 1080);
        assert_eq!(image::guess_format(&shot.image_bytes).unwrap(), ImageFormat::Png);
        let decoded = image::load_from_memory(&shot.image_bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (1024, 768));
    }
}
