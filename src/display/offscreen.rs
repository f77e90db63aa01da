//! In-memory display backend used by tests and by the testable-properties
//! suite; never touches a real DRM device.

use crate::error::DisplayError;
use crate::geometry::Rect;

use super::{DisplayBackend, ScreenInfo};

pub struct OffscreenBackend {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    cursor: (i32, i32),
}

impl OffscreenBackend {
    pub fn new() -> Self {
        Self { pixels: Vec::new(), width: 0, height: 0, cursor: (0, 0) }
    }

    pub fn cursor_position(&self) -> (i32, i32) {
        self.cursor
    }
}

impl Default for OffscreenBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplayBackend for OffscreenBackend {
    fn init(&mut self, preferred: (u32, u32)) -> Result<ScreenInfo, DisplayError> {
        let (width, height) = preferred;
        self.width = width;
        self.height = height;
        self.pixels = vec![0u8; width as usize * height as usize * 4];
        Ok(ScreenInfo { width, height, depth: 32 })
    }

    fn scanout(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    fn present(&mut self, _rect: Rect) {}

    fn has_hardware_cursor(&self) -> bool {
        false
    }

    fn move_cursor(&mut self, x: i32, y: i32) {
        self.cursor = (x, y);
    }

    fn shutdown(&mut self) {
        self.pixels.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_allocates_zeroed_scanout() {
        let mut backend = OffscreenBackend::new();
        let info = backend.init((4, 3)).unwrap();
        assert_eq!(info, ScreenInfo { width: 4, height: 3, depth: 32 });
        assert_eq!(backend.scanout().len(), 4 * 3 * 4);
        assert!(backend.scanout().iter().all(|&b| b == 0));
    }

    #[test]
    fn move_cursor_updates_position() {
        let mut backend = OffscreenBackend::new();
        backend.init((100, 100)).unwrap();
        backend.move_cursor(42, 7);
        assert_eq!(backend.cursor_position(), (42, 7));
    }
}
