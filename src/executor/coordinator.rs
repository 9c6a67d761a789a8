// Logical (action space) to physical (monitor) pointer mapping for the local backend.
use crate::executor::handle::Coordinate;
use crate::perception::types::ScreenshotMeta;

/// Scales a logical coordinate onto the monitor, clamped to its last pixel.
pub fn logical_to_physical(at: Coordinate, meta: &ScreenshotMeta) -> (i32, i32) {
    let scale = |v: i32, logical: u32, physical: u32| -> i32 {
        if logical == 0 || physical == 0 {
            return 0;
        }
        let scaled = (v as f64 * physical as f64 / logical as f64).round() as i64;
        scaled.clamp(0, physical as i64 - 1) as i32
    };
    (
        scale(at.x, meta.logical_width, meta.physical_width),
        scale(at.y, meta.logical_height, meta.physical_height),
    )
}
