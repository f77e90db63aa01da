//! Input multiplexer: global shortcuts, drag-to-move/resize, and routing of
//! raw device events to the focused window.

pub mod device;

use crate::buffer::BufferAllocator;
use crate::compositor::{self, Scanout};
use crate::registry::{ConnectionId, WindowId, WindowRegistry};
use crate::wire::{BufferReplyPayload, BufferStatus, DeviceId, Push, RawInputEvent};

pub const KEY_LEFTCTRL: u16 = 29;
pub const KEY_RIGHTCTRL: u16 = 97;
pub const KEY_LEFTALT: u16 = 56;
pub const KEY_RIGHTALT: u16 = 100;
pub const KEY_Q: u16 = 16;
pub const KEY_SYSRQ: u16 = 99;
pub const BTN_LEFT: u16 = 0x110;
pub const BTN_RIGHT: u16 = 0x111;

const MIN_WINDOW_SIZE: u32 = 10;

pub const REL_X_CODE: u16 = 0x00;
pub const REL_Y_CODE: u16 = 0x01;

#[derive(Debug, Clone, Copy)]
pub enum RawEvent {
    Key { code: u16, pressed: bool },
    Motion { code: u16, dx: i32, dy: i32 },
}

enum DragKind {
    Move,
    Resize,
}

struct DragState {
    window: WindowId,
    kind: DragKind,
    start_window: (i32, i32),
    start_size: (u32, u32),
    /// Accumulated motion since the drag began. For `Move` this is advisory
    /// (the window position is updated live instead); for `Resize` this is
    /// the only record of how far the drag has gone, since the window's
    /// buffer itself isn't replaced until the drag commits.
    accum_dx: i32,
    accum_dy: i32,
}

/// What the orchestrator/session layer must do in reaction to one input event.
#[derive(Default)]
pub struct EventOutcome {
    pub quit: bool,
    pub screenshot: bool,
    /// Unsolicited messages to deliver to specific connections.
    pub notifications: Vec<(ConnectionId, Push)>,
    /// Set to the new cursor position whenever a motion event moved it, so
    /// the caller can update the display backend's cursor (hardware or
    /// software-overlay) outside the scanout borrow.
    pub cursor_moved: Option<(i32, i32)>,
}

pub struct InputMultiplexer {
    cursor_x: i32,
    cursor_y: i32,
    screen_width: u32,
    screen_height: u32,
    ctrl: bool,
    alt: bool,
    drag: Option<DragState>,
}

impl InputMultiplexer {
    pub fn new(screen_width: u32, screen_height: u32) -> Self {
        Self {
            cursor_x: 0,
            cursor_y: 0,
            screen_width,
            screen_height,
            ctrl: false,
            alt: false,
            drag: None,
        }
    }

    pub fn cursor(&self) -> (i32, i32) {
        (self.cursor_x, self.cursor_y)
    }

    /// Whether `window` currently has an in-progress move/resize drag. Used
    /// by the session loop to make `Move` advisory: it only applies when no
    /// drag is in flight for that window.
    pub fn is_dragging(&self, window: WindowId) -> bool {
        matches!(&self.drag, Some(d) if d.window == window)
    }

    /// Drops any drag referencing `window` (e.g. because it was destroyed
    /// mid-drag).
    pub fn cancel_drag_on(&mut self, window: WindowId) {
        if matches!(&self.drag, Some(d) if d.window == window) {
            self.drag = None;
        }
    }

    pub fn handle_event(
        &mut self,
        event: RawEvent,
        device: DeviceId,
        registry: &mut WindowRegistry,
        scanout: &mut Scanout<'_>,
        alloc: &BufferAllocator,
    ) -> EventOutcome {
        match event {
            RawEvent::Key { code, pressed } => self.handle_key(device, code, pressed, registry, scanout, alloc),
            RawEvent::Motion { code, dx, dy } => self.handle_motion(device, code, dx, dy, registry, scanout),
        }
    }

    fn handle_key(
        &mut self,
        device: DeviceId,
        code: u16,
        pressed: bool,
        registry: &mut WindowRegistry,
        scanout: &mut Scanout<'_>,
        alloc: &BufferAllocator,
    ) -> EventOutcome {
        let mut outcome = EventOutcome::default();

        match code {
            KEY_LEFTCTRL | KEY_RIGHTCTRL => self.ctrl = pressed,
            KEY_LEFTALT | KEY_RIGHTALT => self.alt = pressed,
            KEY_Q if pressed && self.ctrl && self.alt => outcome.quit = true,
            KEY_SYSRQ if pressed => outcome.screenshot = true,
            BTN_LEFT => {
                if pressed {
                    if self.alt {
                        outcome.notifications.extend(self.begin_drag(registry, DragKind::Move));
                    } else if let Some(hit) = registry.hit_test(self.cursor_x, self.cursor_y) {
                        registry.raise(hit);
                        registry.set_focus(hit);
                        outcome.notifications.extend(self.focus_notifications(registry));
                    }
                } else {
                    self.commit_drag(registry, scanout, alloc, &mut outcome);
                }
            }
            BTN_RIGHT => {
                if pressed && self.alt {
                    outcome.notifications.extend(self.begin_drag(registry, DragKind::Resize));
                } else if !pressed {
                    self.commit_drag(registry, scanout, alloc, &mut outcome);
                }
            }
            _ => {}
        }
        // the mouse buttons are always consumed by the shortcut layer above
        // (raise/focus, or drag begin/commit), so they are never forwarded
        // on to the focused client as a routed key event.
        if code != BTN_LEFT && code != BTN_RIGHT {
            self.route_to_focused(registry, device, code, pressed as i32, &mut outcome);
        }
        outcome
    }

    /// Raises and focuses the hit window, starts tracking a drag on it, and
    /// returns the resulting focus-change notifications.
    fn begin_drag(&mut self, registry: &mut WindowRegistry, kind: DragKind) -> Vec<(ConnectionId, Push)> {
        let Some(window) = registry.hit_test(self.cursor_x, self.cursor_y) else { return Vec::new() };
        registry.raise(window);
        registry.set_focus(window);
        let Some(win) = registry.get(window) else { return Vec::new() };
        let size = win.buffer().map(|b| (b.width(), b.height())).unwrap_or((0, 0));
        self.drag = Some(DragState {
            window,
            kind,
            start_window: win.position(),
            start_size: size,
            accum_dx: 0,
            accum_dy: 0,
        });
        self.focus_notifications(registry)
    }

    fn commit_drag(
        &mut self,
        registry: &mut WindowRegistry,
        scanout: &mut Scanout<'_>,
        alloc: &BufferAllocator,
        outcome: &mut EventOutcome,
    ) {
        let Some(drag) = self.drag.take() else { return };
        match drag.kind {
            DragKind::Resize => {
                if drag.accum_dx != 0 || drag.accum_dy != 0 {
                    let new_w = (drag.start_size.0 as i32 + drag.accum_dx)
                        .clamp(MIN_WINDOW_SIZE as i32, self.screen_width as i32)
                        as u32;
                    let new_h = (drag.start_size.1 as i32 + drag.accum_dy)
                        .clamp(MIN_WINDOW_SIZE as i32, self.screen_height as i32)
                        as u32;
                    if let Ok(buf) = alloc.replace(new_w, new_h) {
                        let reply = BufferReplyPayload {
                            status: BufferStatus::Ok,
                            shm_name: buf.name().to_string(),
                            width: buf.width(),
                            height: buf.height(),
                        };
                        if let Some(win) = registry.get_mut(drag.window) {
                            win.set_buffer(buf);
                        }
                        let dx = new_w as i32 - drag.start_size.0 as i32;
                        let dy = new_h as i32 - drag.start_size.1 as i32;
                        compositor::redraw_from_resize(scanout, registry, drag.window, dx, dy);
                        compositor::draw(scanout, registry, drag.window);
                        if let Some(conn) = registry.get(drag.window).and_then(|w| w.connection()) {
                            outcome.notifications.push((conn, Push::BufferChange(reply)));
                        }
                    }
                }
            }
            DragKind::Move => {}
        }
    }

    fn handle_motion(
        &mut self,
        device: DeviceId,
        code: u16,
        dx: i32,
        dy: i32,
        registry: &mut WindowRegistry,
        scanout: &mut Scanout<'_>,
    ) -> EventOutcome {
        let mut outcome = EventOutcome::default();
        self.cursor_x = (self.cursor_x + dx).clamp(0, self.screen_width as i32);
        self.cursor_y = (self.cursor_y + dy).clamp(0, self.screen_height as i32);
        outcome.cursor_moved = Some((self.cursor_x, self.cursor_y));

        if let Some(drag) = &mut self.drag {
            match drag.kind {
                DragKind::Move => {
                    let window = drag.window;
                    let Some(win) = registry.get(window) else { return outcome };
                    let (old_x, old_y) = win.position();
                    let new_x = old_x + dx;
                    let new_y = old_y + dy;
                    if let Some(w) = registry.get_mut(window) {
                        w.set_position(new_x, new_y);
                    }
                    compositor::redraw_region(scanout, registry, window, old_x, old_y, dx, dy);
                }
                DragKind::Resize => {
                    // the buffer swap happens on release in `commit_drag`;
                    // track how far the drag has gone so commit knows the
                    // target size
                    drag.accum_dx += dx;
                    drag.accum_dy += dy;
                }
            }
        }
        let value = if dx != 0 { dx } else { dy };
        // motion is only routed to the focused client when the cursor is
        // actually over that window; otherwise it's purely a cursor move.
        if registry
            .focused()
            .and_then(|id| registry.get(id))
            .is_some_and(|w| w.rect().contains_point(self.cursor_x, self.cursor_y))
        {
            self.route_to_focused(registry, device, code, value, &mut outcome);
        }
        outcome
    }

    /// Forwards `(device, code, value)` to the focused window's connection,
    /// if any, converting the current absolute cursor position to a
    /// coordinate local to that window.
    fn route_to_focused(
        &self,
        registry: &WindowRegistry,
        device: DeviceId,
        code: u16,
        value: i32,
        outcome: &mut EventOutcome,
    ) {
        if let Some(focused) = registry.focused() {
            if let Some(win) = registry.get(focused) {
                if let Some(conn) = win.connection() {
                    let (win_x, win_y) = win.position();
                    let (x, y) = (self.cursor_x - win_x, self.cursor_y - win_y);
                    outcome
                        .notifications
                        .push((conn, Push::InputEvent(RawInputEvent { device, code: code as u32, value, x, y })));
                }
            }
        }
    }

    fn focus_notifications(&self, registry: &WindowRegistry) -> Vec<(ConnectionId, Push)> {
        let mut out = Vec::new();
        for win in registry.iter_top_to_bottom() {
            if let Some(conn) = win.connection() {
                let focused = registry.focused() == Some(win.id());
                out.push((conn, Push::FocusChange { focused }));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferAllocator;
    use crate::registry::ConnectionId;

    fn scanout_buf(w: u32, h: u32) -> Vec<u8> {
        vec![0u8; w as usize * h as usize * 4]
    }

    #[test]
    fn cursor_clamps_to_screen_bounds() {
        let mut mux = InputMultiplexer::new(10, 10);
        let alloc = BufferAllocator::new();
        let mut registry = WindowRegistry::new();
        let mut pixels = scanout_buf(10, 10);
        let mut scanout = Scanout { pixels: &mut pixels, width: 10, height: 10 };
        mux.handle_event(RawEvent::Motion { code: REL_X_CODE, dx: -100, dy: -100 }, DeviceId(0), &mut registry, &mut scanout, &alloc);
        assert_eq!(mux.cursor(), (0, 0));
        mux.handle_event(RawEvent::Motion { code: REL_X_CODE, dx: 1000, dy: 1000 }, DeviceId(0), &mut registry, &mut scanout, &alloc);
        assert_eq!(mux.cursor(), (10, 10));
    }

    #[test]
    fn ctrl_alt_q_triggers_quit() {
        let mut mux = InputMultiplexer::new(100, 100);
        let alloc = BufferAllocator::new();
        let mut registry = WindowRegistry::new();
        let mut pixels = scanout_buf(10, 10);
        let mut scanout = Scanout { pixels: &mut pixels, width: 10, height: 10 };
        mux.handle_event(RawEvent::Key { code: KEY_LEFTCTRL, pressed: true }, DeviceId(0), &mut registry, &mut scanout, &alloc);
        mux.handle_event(RawEvent::Key { code: KEY_LEFTALT, pressed: true }, DeviceId(0), &mut registry, &mut scanout, &alloc);
        let outcome = mux.handle_event(RawEvent::Key { code: KEY_Q, pressed: true }, DeviceId(0), &mut registry, &mut scanout, &alloc);
        assert!(outcome.quit);
    }

    #[test]
    fn click_raises_and_focuses_hit_window() {
        let mut mux = InputMultiplexer::new(100, 100);
        let alloc = BufferAllocator::new();
        let mut registry = WindowRegistry::new();
        let a = registry.insert(ConnectionId(1));
        let buf = alloc.create(20, 20).unwrap();
        registry.get_mut(a).unwrap().set_buffer(buf);
        registry.get_mut(a).unwrap().set_position(0, 0);

        let mut pixels = scanout_buf(100, 100);
        let mut scanout = Scanout { pixels: &mut pixels, width: 100, height: 100 };

        mux.handle_event(RawEvent::Motion { code: REL_X_CODE, dx: 5, dy: 5 }, DeviceId(0), &mut registry, &mut scanout, &alloc);
        let outcome = mux.handle_event(RawEvent::Key { code: BTN_LEFT, pressed: true }, DeviceId(0), &mut registry, &mut scanout, &alloc);
        assert_eq!(registry.focused(), Some(a));
        assert!(!outcome.notifications.is_empty());
    }

    #[test]
    fn drag_cancelled_on_destroyed_window_is_silent() {
        let mut mux = InputMultiplexer::new(100, 100);
        let alloc = BufferAllocator::new();
        let mut registry = WindowRegistry::new();
        let a = registry.insert(ConnectionId(1));
        let buf = alloc.create(20, 20).unwrap();
        registry.get_mut(a).unwrap().set_buffer(buf);

        mux.begin_drag(&mut registry, DragKind::Move);
        registry.remove(a);
        mux.cancel_drag_on(a);

        let mut pixels = scanout_buf(100, 100);
        let mut scanout = Scanout { pixels: &mut pixels, width: 100, height: 100 };
        // should not panic even though the dragged window no longer exists
        mux.handle_event(RawEvent::Motion { code: REL_X_CODE, dx: 1, dy: 1 }, DeviceId(0), &mut registry, &mut scanout, &alloc);
    }

    #[test]
    fn alt_left_button_drag_raises_and_focuses() {
        let mut mux = InputMultiplexer::new(100, 100);
        let alloc = BufferAllocator::new();
        let mut registry = WindowRegistry::new();
        let a = registry.insert(ConnectionId(1));
        let b = registry.insert(ConnectionId(2));
        for id in [a, b] {
            let buf = alloc.create(50, 50).unwrap();
            registry.get_mut(id).unwrap().set_buffer(buf);
            registry.get_mut(id).unwrap().set_position(0, 0);
        }
        // b is topmost after insertion; now raise a via an alt-drag over it
        let mut pixels = scanout_buf(100, 100);
        let mut scanout = Scanout { pixels: &mut pixels, width: 100, height: 100 };
        mux.handle_event(RawEvent::Key { code: KEY_LEFTALT, pressed: true }, DeviceId(0), &mut registry, &mut scanout, &alloc);
        let outcome = mux.handle_event(RawEvent::Key { code: BTN_LEFT, pressed: true }, DeviceId(0), &mut registry, &mut scanout, &alloc);
        assert_eq!(registry.focused(), Some(a));
        assert!(registry.get(a).unwrap().z() > registry.get(b).unwrap().z());
        assert!(!outcome.notifications.is_empty());
    }

    #[test]
    fn resize_drag_commits_new_size_on_release() {
        let mut mux = InputMultiplexer::new(200, 200);
        let alloc = BufferAllocator::new();
        let mut registry = WindowRegistry::new();
        let a = registry.insert(ConnectionId(1));
        let buf = alloc.create(50, 50).unwrap();
        registry.get_mut(a).unwrap().set_buffer(buf);
        registry.get_mut(a).unwrap().set_position(0, 0);

        let mut pixels = scanout_buf(200, 200);
        let mut scanout = Scanout { pixels: &mut pixels, width: 200, height: 200 };

        mux.handle_event(RawEvent::Key { code: KEY_LEFTALT, pressed: true }, DeviceId(0), &mut registry, &mut scanout, &alloc);
        mux.handle_event(RawEvent::Key { code: BTN_RIGHT, pressed: true }, DeviceId(0), &mut registry, &mut scanout, &alloc);
        mux.handle_event(RawEvent::Motion { code: REL_X_CODE, dx: 50, dy: 0 }, DeviceId(0), &mut registry, &mut scanout, &alloc);
        mux.handle_event(RawEvent::Motion { code: REL_Y_CODE, dx: 0, dy: 50 }, DeviceId(0), &mut registry, &mut scanout, &alloc);
        let outcome = mux.handle_event(RawEvent::Key { code: BTN_RIGHT, pressed: false }, DeviceId(0), &mut registry, &mut scanout, &alloc);

        let buf = registry.get(a).unwrap().buffer().unwrap();
        assert_eq!((buf.width(), buf.height()), (100, 100));
        assert!(outcome.notifications.iter().any(|(_, p)| matches!(p, Push::BufferChange(_))));
    }

    #[test]
    fn resize_drag_clamps_to_minimum_window_size() {
        let mut mux = InputMultiplexer::new(200, 200);
        let alloc = BufferAllocator::new();
        let mut registry = WindowRegistry::new();
        let a = registry.insert(ConnectionId(1));
        let buf = alloc.create(20, 20).unwrap();
        registry.get_mut(a).unwrap().set_buffer(buf);
        registry.get_mut(a).unwrap().set_position(0, 0);

        let mut pixels = scanout_buf(200, 200);
        let mut scanout = Scanout { pixels: &mut pixels, width: 200, height: 200 };

        mux.handle_event(RawEvent::Key { code: KEY_LEFTALT, pressed: true }, DeviceId(0), &mut registry, &mut scanout, &alloc);
        mux.handle_event(RawEvent::Key { code: BTN_RIGHT, pressed: true }, DeviceId(0), &mut registry, &mut scanout, &alloc);
        mux.handle_event(RawEvent::Motion { code: REL_X_CODE, dx: -100, dy: 0 }, DeviceId(0), &mut registry, &mut scanout, &alloc);
        mux.handle_event(RawEvent::Motion { code: REL_Y_CODE, dx: 0, dy: -100 }, DeviceId(0), &mut registry, &mut scanout, &alloc);
        mux.handle_event(RawEvent::Key { code: BTN_RIGHT, pressed: false }, DeviceId(0), &mut registry, &mut scanout, &alloc);

        let buf = registry.get(a).unwrap().buffer().unwrap();
        assert_eq!((buf.width(), buf.height()), (MIN_WINDOW_SIZE, MIN_WINDOW_SIZE));
    }

    #[test]
    fn key_event_routes_to_focused_connection() {
        let mut mux = InputMultiplexer::new(100, 100);
        let alloc = BufferAllocator::new();
        let mut registry = WindowRegistry::new();
        let a = registry.insert(ConnectionId(7));
        let mut pixels = scanout_buf(100, 100);
        let mut scanout = Scanout { pixels: &mut pixels, width: 100, height: 100 };
        let _ = a;

        let outcome = mux.handle_event(
            RawEvent::Key { code: KEY_Q, pressed: true },
            DeviceId(3),
            &mut registry,
            &mut scanout,
            &alloc,
        );
        assert!(outcome
            .notifications
            .iter()
            .any(|(conn, p)| *conn == ConnectionId(7) && matches!(p, Push::InputEvent(ev) if ev.device == DeviceId(3))));
    }

    #[test]
    fn routed_event_uses_window_local_coordinates() {
        let mut mux = InputMultiplexer::new(100, 100);
        let alloc = BufferAllocator::new();
        let mut registry = WindowRegistry::new();
        let a = registry.insert(ConnectionId(7));
        let buf = alloc.create(50, 50).unwrap();
        registry.get_mut(a).unwrap().set_buffer(buf);
        registry.get_mut(a).unwrap().set_position(20, 30);

        let mut pixels = scanout_buf(100, 100);
        let mut scanout = Scanout { pixels: &mut pixels, width: 100, height: 100 };

        // move the absolute cursor to (40, 50), inside the window's rect
        mux.handle_event(RawEvent::Motion { code: REL_X_CODE, dx: 40, dy: 0 }, DeviceId(0), &mut registry, &mut scanout, &alloc);
        mux.handle_event(RawEvent::Motion { code: REL_Y_CODE, dx: 0, dy: 50 }, DeviceId(0), &mut registry, &mut scanout, &alloc);

        let outcome = mux.handle_event(
            RawEvent::Key { code: KEY_Q, pressed: true },
            DeviceId(3),
            &mut registry,
            &mut scanout,
            &alloc,
        );
        let ev = outcome
            .notifications
            .iter()
            .find_map(|(conn, p)| match p {
                Push::InputEvent(ev) if *conn == ConnectionId(7) => Some(*ev),
                _ => None,
            })
            .expect("expected a routed input event");
        assert_eq!((ev.x, ev.y), (20, 20));
    }

    #[test]
    fn resize_drag_clamps_growth_to_screen_size() {
        let mut mux = InputMultiplexer::new(200, 200);
        let alloc = BufferAllocator::new();
        let mut registry = WindowRegistry::new();
        let a = registry.insert(ConnectionId(1));
        let buf = alloc.create(50, 50).unwrap();
        registry.get_mut(a).unwrap().set_buffer(buf);
        registry.get_mut(a).unwrap().set_position(0, 0);

        let mut pixels = scanout_buf(200, 200);
        let mut scanout = Scanout { pixels: &mut pixels, width: 200, height: 200 };

        mux.handle_event(RawEvent::Key { code: KEY_LEFTALT, pressed: true }, DeviceId(0), &mut registry, &mut scanout, &alloc);
        mux.handle_event(RawEvent::Key { code: BTN_RIGHT, pressed: true }, DeviceId(0), &mut registry, &mut scanout, &alloc);
        mux.handle_event(RawEvent::Motion { code: REL_X_CODE, dx: 1000, dy: 0 }, DeviceId(0), &mut registry, &mut scanout, &alloc);
        mux.handle_event(RawEvent::Motion { code: REL_Y_CODE, dx: 0, dy: 1000 }, DeviceId(0), &mut registry, &mut scanout, &alloc);
        mux.handle_event(RawEvent::Key { code: BTN_RIGHT, pressed: false }, DeviceId(0), &mut registry, &mut scanout, &alloc);

        let buf = registry.get(a).unwrap().buffer().unwrap();
        assert_eq!((buf.width(), buf.height()), (200, 200));
    }
}
