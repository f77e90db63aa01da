//! Abstract display backend: scanout + hardware cursor, with a real DRM/KMS
//! implementation and an in-memory one for tests.

pub mod drm;
pub mod offscreen;

use crate::error::DisplayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenInfo {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

/// Owns the physical (or virtual) scanout surface and, if available, a
/// hardware cursor plane.
pub trait DisplayBackend {
    fn init(&mut self, preferred: (u32, u32)) -> Result<ScreenInfo, DisplayError>;

    /// Mutable access to the raw ARGB8888 scanout pixels.
    fn scanout(&mut self) -> &mut [u8];

    /// Flushes `rect` of the scanout to the physical display, if the backend
    /// needs an explicit present step (a no-op for backends that scan out
    /// directly from the mapped buffer).
    fn present(&mut self, rect: crate::geometry::Rect);

    /// True if this backend owns a hardware cursor plane.
    fn has_hardware_cursor(&self) -> bool;

    /// Moves the hardware cursor. Only meaningful if `has_hardware_cursor`.
    fn move_cursor(&mut self, x: i32, y: i32);

    fn shutdown(&mut self);
}

pub use self::drm::DrmBackend;
pub use self::offscreen::OffscreenBackend;
