//! Direct kernel mode-setting backend: dumb-buffer scanout plus an optional
//! hardware cursor plane, with no GPU acceleration and no GBM dependency.

use std::fs::{File, OpenOptions};
use std::os::unix::io::{AsFd, BorrowedFd};

use drm::control::{connector, crtc, dumbbuffer::DumbBuffer, Device as ControlDevice, Mode};
use drm::Device;

use crate::error::DisplayError;
use crate::geometry::Rect;

use super::{DisplayBackend, ScreenInfo};

struct Card(File);

impl AsFd for Card {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl Device for Card {}
impl ControlDevice for Card {}

/// A cursor sized to the common hardware minimum of 64x64 ARGB8888.
const CURSOR_SIZE: u32 = 64;

pub struct DrmBackend {
    card: Option<Card>,
    crtc: Option<crtc::Handle>,
    saved_crtc: Option<crtc::Info>,
    scanout_fb: Option<drm::control::framebuffer::Handle>,
    scanout_buf: Option<DumbBuffer>,
    scanout_mapping: Option<Vec<u8>>,
    cursor_buf: Option<DumbBuffer>,
    has_cursor_plane: bool,
    width: u32,
    height: u32,
}

impl DrmBackend {
    pub fn new() -> Self {
        Self {
            card: None,
            crtc: None,
            saved_crtc: None,
            scanout_fb: None,
            scanout_buf: None,
            scanout_mapping: None,
            cursor_buf: None,
            has_cursor_plane: false,
            width: 0,
            height: 0,
        }
    }

    fn open_card() -> Result<Card, DisplayError> {
        for n in 0..4 {
            let path = format!("/dev/dri/card{n}");
            if let Ok(file) = OpenOptions::new().read(true).write(true).open(&path) {
                return Ok(Card(file));
            }
        }
        Err(DisplayError::NoDisplay)
    }

    /// Picks the first connected connector, its current (or first available)
    /// mode, and the encoder/CRTC pair backing it.
    fn pick_connector_mode_crtc(
        card: &Card,
    ) -> Result<(connector::Handle, Mode, crtc::Handle), DisplayError> {
        let resources = card.resource_handles().map_err(|e| DisplayError::Drm(e.to_string()))?;

        for &conn_handle in resources.connectors() {
            let info =
                card.get_connector(conn_handle, false).map_err(|e| DisplayError::Drm(e.to_string()))?;
            if info.state() != connector::State::Connected {
                continue;
            }
            let Some(&mode) = info.modes().first() else { continue };
            let Some(encoder_handle) = info.current_encoder().or_else(|| info.encoders().first().copied())
            else {
                continue;
            };
            let encoder = card
                .get_encoder(encoder_handle)
                .map_err(|e| DisplayError::Drm(e.to_string()))?;
            let Some(crtc_handle) = encoder.crtc().or_else(|| resources.filter_crtcs(encoder.possible_crtcs()).first().copied())
            else {
                continue;
            };
            return Ok((conn_handle, mode, crtc_handle));
        }
        Err(DisplayError::NoDisplay)
    }
}

impl Default for DrmBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplayBackend for DrmBackend {
    fn init(&mut self, _preferred: (u32, u32)) -> Result<ScreenInfo, DisplayError> {
        let card = Self::open_card()?;
        let (connector, mode, crtc_handle) = Self::pick_connector_mode_crtc(&card)?;
        let (width, height) = mode.size();
        let (width, height) = (width as u32, height as u32);

        let saved_crtc = card.get_crtc(crtc_handle).ok();

        let mut scanout_buf = card
            .create_dumb_buffer((width, height), drm::buffer::DrmFourcc::Argb8888, 32)
            .map_err(|e| DisplayError::Drm(e.to_string()))?;
        let scanout_fb = card
            .add_framebuffer(&scanout_buf, 32, 32)
            .map_err(|e| DisplayError::Drm(e.to_string()))?;

        {
            let mut mapping = card
                .map_dumb_buffer(&mut scanout_buf)
                .map_err(|e| DisplayError::Drm(e.to_string()))?;
            mapping.as_mut().fill(0);
        }

        card.set_crtc(crtc_handle, Some(scanout_fb), (0, 0), &[connector], Some(mode))
            .map_err(|e| DisplayError::Drm(e.to_string()))?;

        let cursor_buf = card
            .create_dumb_buffer((CURSOR_SIZE, CURSOR_SIZE), drm::buffer::DrmFourcc::Argb8888, 32)
            .ok();
        let has_cursor_plane = cursor_buf.is_some()
            && card
                .set_cursor2(crtc_handle, cursor_buf.as_ref().map(|b| b.handle()), (0, 0), (CURSOR_SIZE, CURSOR_SIZE))
                .is_ok();

        self.crtc = Some(crtc_handle);
        self.saved_crtc = saved_crtc;
        self.scanout_fb = Some(scanout_fb);
        self.scanout_buf = Some(scanout_buf);
        self.cursor_buf = cursor_buf;
        self.has_cursor_plane = has_cursor_plane;
        self.width = width;
        self.height = height;
        self.card = Some(card);
        self.scanout_mapping = Some(vec![0u8; width as usize * height as usize * 4]);

        Ok(ScreenInfo { width, height, depth: 32 })
    }

    fn scanout(&mut self) -> &mut [u8] {
        // the shadow buffer is flushed to the mapped dumb buffer in `present`
        self.scanout_mapping.as_deref_mut().unwrap_or(&mut [])
    }

    fn present(&mut self, _rect: Rect) {
        let (Some(card), Some(buf), Some(shadow)) =
            (self.card.as_ref(), self.scanout_buf.as_mut(), self.scanout_mapping.as_ref())
        else {
            return;
        };
        if let Ok(mut mapping) = card.map_dumb_buffer(buf) {
            let len = mapping.as_mut().len().min(shadow.len());
            mapping.as_mut()[..len].copy_from_slice(&shadow[..len]);
        }
    }

    fn has_hardware_cursor(&self) -> bool {
        self.has_cursor_plane
    }

    fn move_cursor(&mut self, x: i32, y: i32) {
        if !self.has_cursor_plane {
            return;
        }
        if let (Some(card), Some(crtc_handle)) = (self.card.as_ref(), self.crtc) {
            let _ = card.move_cursor(crtc_handle, (x, y));
        }
    }

    fn shutdown(&mut self) {
        if let Some(card) = self.card.as_ref() {
            if let Some(crtc_handle) = self.crtc {
                let _ = card.set_cursor2(crtc_handle, None, (0, 0), (0, 0));
                if let Some(saved) = &self.saved_crtc {
                    let _ = card.set_crtc(
                        crtc_handle,
                        saved.framebuffer(),
                        saved.position(),
                        &saved.connectors(),
                        saved.mode(),
                    );
                }
            }
            if let Some(cursor_buf) = self.cursor_buf.take() {
                let _ = card.destroy_dumb_buffer(cursor_buf);
            }
            if let Some(fb) = self.scanout_fb.take() {
                let _ = card.destroy_framebuffer(fb);
            }
            if let Some(scanout_buf) = self.scanout_buf.take() {
                let _ = card.destroy_dumb_buffer(scanout_buf);
            }
        }
        self.card = None;
        self.scanout_mapping = None;
    }
}
