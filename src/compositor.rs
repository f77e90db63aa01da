//! Clipped blit and damage/exposure redraw, ported from the original
//! display server's `draw`/`redraw_region`/`redraw_from_resize` routines.

use crate::geometry::Rect;
use crate::registry::{WindowId, WindowRegistry};

/// A mutable borrow of the scanout surface the compositor draws into.
pub struct Scanout<'a> {
    pub pixels: &'a mut [u8],
    pub width: u32,
    pub height: u32,
}

impl<'a> Scanout<'a> {
    fn pitch(&self) -> usize {
        self.width as usize * 4
    }
}

/// Copies `window`'s buffer into `scanout` at its current position, clipped
/// to the screen bounds. A window fully off-screen, or with a zero-area
/// visible region, is a no-op.
pub fn draw(scanout: &mut Scanout<'_>, registry: &WindowRegistry, window: WindowId) {
    let Some(win) = registry.get(window) else { return };
    let Some(buf) = win.buffer() else { return };
    let screen = Rect::new(0, 0, scanout.width, scanout.height);
    let visible = win.rect().intersect(&screen);
    if visible.is_empty() {
        return;
    }

    let (wx, wy) = win.position();
    let src_pitch = buf.width() as usize * 4;
    let dst_pitch = scanout.pitch();
    let src_bytes = buf.as_bytes();
    let copy_w = visible.width as usize * 4;

    for row in 0..visible.height as usize {
        let src_row = (visible.y - wy) as usize + row;
        let dst_row = visible.y as usize + row;
        let src_col = (visible.x - wx) as usize * 4;
        let dst_col = visible.x as usize * 4;

        let src_off = src_row * src_pitch + src_col;
        let dst_off = dst_row * dst_pitch + dst_col;
        if src_off + copy_w > src_bytes.len() || dst_off + copy_w > scanout.pixels.len() {
            continue;
        }
        scanout.pixels[dst_off..dst_off + copy_w]
            .copy_from_slice(&src_bytes[src_off..src_off + copy_w]);
    }
}

/// Redraws the two rectangles exposed when `window` moves by `(dx, dy)`
/// from its previous position `(old_x, old_y)`, compositing the background
/// and every window strictly below `window` in Z order into the exposed
/// area, then re-drawing `window` itself at its new position.
///
/// Mirrors the original's two-rectangle exposure algorithm: a horizontal
/// strip of height `|dy|` on the leading vertical edge, and a vertical
/// strip of width `|dx|` on the leading horizontal edge.
pub fn redraw_region(
    scanout: &mut Scanout<'_>,
    registry: &WindowRegistry,
    window: WindowId,
    old_x: i32,
    old_y: i32,
    dx: i32,
    dy: i32,
) {
    let Some(win) = registry.get(window) else { return };
    let (w, h) = match win.buffer() {
        Some(b) => (b.width(), b.height()),
        None => return,
    };
    let screen = Rect::new(0, 0, scanout.width, scanout.height);

    let rect_a = if dy != 0 {
        let y = if dy > 0 { old_y } else { old_y + h as i32 + dy };
        Rect::new(old_x, y, w, dy.unsigned_abs())
    } else {
        Rect::new(0, 0, 0, 0)
    };

    let rect_b = if dx != 0 {
        let x = if dx > 0 { old_x } else { old_x + w as i32 + dx };
        Rect::new(x, old_y, dx.unsigned_abs(), h)
    } else {
        Rect::new(0, 0, 0, 0)
    };

    for rect in [rect_a, rect_b] {
        let clipped = rect.intersect(&screen);
        if clipped.is_empty() {
            continue;
        }
        redraw_exposed_rect(scanout, registry, window, clipped);
    }

    draw(scanout, registry, window);
}

/// Redraws the strip exposed when `window` shrinks by `(dx, dy)` (only
/// negative deltas expose anything): a right-edge strip when `dx < 0`, a
/// bottom-edge strip when `dy < 0`.
pub fn redraw_from_resize(
    scanout: &mut Scanout<'_>,
    registry: &WindowRegistry,
    window: WindowId,
    dx: i32,
    dy: i32,
) {
    let Some(win) = registry.get(window) else { return };
    let (x, y) = win.position();
    let (w, h) = match win.buffer() {
        Some(b) => (b.width(), b.height()),
        None => return,
    };
    let screen = Rect::new(0, 0, scanout.width, scanout.height);

    if dx < 0 {
        let strip = Rect::new(x + w as i32, y, dx.unsigned_abs(), h);
        let clipped = strip.intersect(&screen);
        if !clipped.is_empty() {
            redraw_exposed_rect(scanout, registry, window, clipped);
        }
    }
    if dy < 0 {
        let strip = Rect::new(x, y + h as i32, w, dy.unsigned_abs());
        let clipped = strip.intersect(&screen);
        if !clipped.is_empty() {
            redraw_exposed_rect(scanout, registry, window, clipped);
        }
    }
}

/// Composites the background and every window strictly below `above` in Z
/// order into `rect`, each clipped to its own overlap with `rect`.
fn redraw_exposed_rect(
    scanout: &mut Scanout<'_>,
    registry: &WindowRegistry,
    above: WindowId,
    rect: Rect,
) {
    draw_clipped(scanout, registry, registry.background_id(), rect);
    for below in registry.windows_below(above) {
        draw_clipped(scanout, registry, below, rect);
    }
}

fn draw_clipped(scanout: &mut Scanout<'_>, registry: &WindowRegistry, window: WindowId, rect: Rect) {
    let Some(win) = registry.get(window) else { return };
    let Some(buf) = win.buffer() else { return };
    let overlap = win.rect().intersect(&rect);
    if overlap.is_empty() {
        return;
    }
    let (wx, wy) = win.position();
    let src_pitch = buf.width() as usize * 4;
    let dst_pitch = scanout.pitch();
    let src_bytes = buf.as_bytes();
    let copy_w = overlap.width as usize * 4;

    for row in 0..overlap.height as usize {
        let src_row = (overlap.y - wy) as usize + row;
        let dst_row = overlap.y as usize + row;
        let src_col = (overlap.x - wx) as usize * 4;
        let dst_col = overlap.x as usize * 4;

        let src_off = src_row * src_pitch + src_col;
        let dst_off = dst_row * dst_pitch + dst_col;
        if src_off + copy_w > src_bytes.len() || dst_off + copy_w > scanout.pixels.len() {
            continue;
        }
        scanout.pixels[dst_off..dst_off + copy_w]
            .copy_from_slice(&src_bytes[src_off..src_off + copy_w]);
    }
}

/// Composites a small cursor sprite at `(x, y)` when the display backend has
/// no hardware cursor plane.
pub fn draw_cursor_overlay(scanout: &mut Scanout<'_>, sprite: &[u8], sprite_w: u32, sprite_h: u32, x: i32, y: i32) {
    let cursor_rect = Rect::new(x, y, sprite_w, sprite_h);
    let screen = Rect::new(0, 0, scanout.width, scanout.height);
    let visible = cursor_rect.intersect(&screen);
    if visible.is_empty() {
        return;
    }
    let src_pitch = sprite_w as usize * 4;
    let dst_pitch = scanout.pitch();
    let copy_w = visible.width as usize * 4;

    for row in 0..visible.height as usize {
        let src_row = (visible.y - y) as usize + row;
        let dst_row = visible.y as usize + row;
        let src_col = (visible.x - x) as usize * 4;
        let dst_col = visible.x as usize * 4;
        let src_off = src_row * src_pitch + src_col;
        let dst_off = dst_row * dst_pitch + dst_col;
        if src_off + copy_w > sprite.len() || dst_off + copy_w > scanout.pixels.len() {
            continue;
        }
        // simple alpha-blend so the underlying pixels still show through
        for i in 0..visible.width as usize {
            let s = src_off + i * 4;
            let d = dst_off + i * 4;
            let alpha = sprite[s + 3] as u32;
            if alpha == 0 {
                continue;
            }
            for c in 0..3 {
                let src_c = sprite[s + c] as u32;
                let dst_c = scanout.pixels[d + c] as u32;
                scanout.pixels[d + c] = ((src_c * alpha + dst_c * (255 - alpha)) / 255) as u8;
            }
            scanout.pixels[d + 3] = 255;
        }
    }
}

/// Edge length of the procedurally-generated software cursor sprite.
pub const CURSOR_SPRITE_SIZE: u32 = 16;

/// Builds a small opaque arrow-shaped ARGB8888 sprite used as the cursor
/// overlay when the display backend has no hardware cursor plane.
pub fn default_cursor_sprite() -> Vec<u8> {
    let n = CURSOR_SPRITE_SIZE as i32;
    let mut pixels = vec![0u8; (CURSOR_SPRITE_SIZE * CURSOR_SPRITE_SIZE * 4) as usize];
    for y in 0..n {
        for x in 0..n {
            if x <= y && x + y <= n {
                let idx = ((y * n + x) * 4) as usize;
                pixels[idx] = 0xFF; // B
                pixels[idx + 1] = 0xFF; // G
                pixels[idx + 2] = 0xFF; // R
                pixels[idx + 3] = 0xFF; // A
            }
        }
    }
    pixels
}
