//! Per-connection session state machine: one thread per client, exactly the
//! request sequence the original session loop handled (`GetServerInfo`,
//! `GetBuffer`, `Draw`, `Move`), plus delivery of server-pushed events.

use std::collections::VecDeque;
use std::io::{BufWriter, Write as _};
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Condvar, Mutex};

use log::{debug, warn};

use crate::buffer::BufferAllocator;
use crate::compositor::{self, Scanout};
use crate::display::{DisplayBackend, ScreenInfo};
use crate::registry::{ConnectionId, WindowId, WindowRegistry};
use crate::wire::{
    BufferReplyPayload, BufferStatus, DeviceInfo, Push, Request, Response,
};
use crate::input::InputMultiplexer;

const OUTGOING_QUEUE_CAPACITY: usize = 64;

/// Everything guarded by the single lock described in the concurrency model:
/// the window registry, the scanout surface, and the input multiplexer's
/// drag state (queried, never mutated, by session threads).
pub struct Desktop {
    pub registry: WindowRegistry,
    pub backend: Box<dyn DisplayBackend + Send>,
    pub multiplexer: InputMultiplexer,
    pub screen: ScreenInfo,
}

/// A bounded outgoing-message queue for one connection's writer thread. When
/// full, the oldest queued message is dropped rather than blocking the
/// thread that produced it (input routing or another session thread).
pub struct OutgoingQueue {
    state: Mutex<(VecDeque<Push>, bool)>,
    condvar: Condvar,
}

impl OutgoingQueue {
    pub fn new() -> Self {
        Self { state: Mutex::new((VecDeque::new(), false)), condvar: Condvar::new() }
    }

    pub fn push(&self, msg: Push) {
        let mut guard = self.state.lock().unwrap();
        if guard.0.len() >= OUTGOING_QUEUE_CAPACITY {
            guard.0.pop_front();
        }
        guard.0.push_back(msg);
        self.condvar.notify_one();
    }

    pub fn close(&self) {
        let mut guard = self.state.lock().unwrap();
        guard.1 = true;
        self.condvar.notify_all();
    }

    fn recv_blocking(&self) -> Option<Push> {
        let mut guard = self.state.lock().unwrap();
        loop {
            if let Some(msg) = guard.0.pop_front() {
                return Some(msg);
            }
            if guard.1 {
                return None;
            }
            guard = self.condvar.wait(guard).unwrap();
        }
    }
}

impl Default for OutgoingQueue {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SessionContext {
    pub desktop: Arc<Mutex<Desktop>>,
    pub allocator: Arc<BufferAllocator>,
    pub devices: Vec<DeviceInfo>,
    pub screen_width: u32,
    pub screen_height: u32,
    /// Lets the input thread deliver `Push` notifications to a connection
    /// without taking the desktop lock.
    pub connections: Mutex<std::collections::HashMap<ConnectionId, Arc<OutgoingQueue>>>,
    /// Software cursor sprite composited when the display backend has no
    /// hardware cursor plane, built once at startup.
    pub cursor_sprite: Vec<u8>,
    pub cursor_sprite_size: u32,
}

impl SessionContext {
    pub fn register_connection(&self, connection: ConnectionId, outgoing: Arc<OutgoingQueue>) {
        self.connections.lock().unwrap().insert(connection, outgoing);
    }

    pub fn unregister_connection(&self, connection: ConnectionId) {
        self.connections.lock().unwrap().remove(&connection);
    }

    pub fn deliver(&self, connection: ConnectionId, push: Push) {
        if let Some(queue) = self.connections.lock().unwrap().get(&connection) {
            queue.push(push);
        }
    }
}

/// Runs one client connection to completion: reads requests until EOF or a
/// protocol error, then tears down the connection's window and buffer.
pub fn run_session(
    mut stream: UnixStream,
    connection: ConnectionId,
    window: WindowId,
    ctx: Arc<SessionContext>,
    outgoing: Arc<OutgoingQueue>,
) {
    ctx.register_connection(connection, Arc::clone(&outgoing));
    let writer_stream = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            warn!("connection {connection:?}: failed to clone stream: {e}");
            ctx.unregister_connection(connection);
            teardown(&ctx, window);
            return;
        }
    };
    let writer_outgoing = Arc::clone(&outgoing);
    let writer = std::thread::spawn(move || writer_loop(writer_stream, writer_outgoing));

    loop {
        let request = match Request::read_from(&mut stream) {
            Ok(req) => req,
            Err(crate::error::WireError::Closed) => {
                debug!("connection {connection:?} closed");
                break;
            }
            Err(e) => {
                warn!("connection {connection:?}: malformed request: {e}");
                break;
            }
        };

        match request {
            Request::GetServerInfo => {
                let reply = Response::ServerInfo {
                    width: ctx.screen_width,
                    height: ctx.screen_height,
                    depth: 32,
                    devices: ctx.devices.clone(),
                };
                if reply.write_to(&mut stream).is_err() {
                    break;
                }
            }
            Request::GetBuffer { width, height } => {
                let reply = handle_get_buffer(&ctx, window, width, height);
                if Response::BufferReply(reply).write_to(&mut stream).is_err() {
                    break;
                }
            }
            Request::Draw => handle_draw(&ctx, connection, window),
            Request::Move { x, y } => handle_move(&ctx, window, x, y),
        }
    }

    outgoing.close();
    let _ = writer.join();
    ctx.unregister_connection(connection);
    teardown(&ctx, window);
}

fn handle_get_buffer(ctx: &SessionContext, window: WindowId, width: u32, height: u32) -> BufferReplyPayload {
    match ctx.allocator.create(width, height) {
        Ok(buf) => {
            let reply = BufferReplyPayload {
                status: BufferStatus::Ok,
                shm_name: buf.name().to_string(),
                width: buf.width(),
                height: buf.height(),
            };
            let mut desktop = ctx.desktop.lock().unwrap();
            if let Some(w) = desktop.registry.get_mut(window) {
                w.set_buffer(buf);
            }
            let rect = desktop.registry.get(window).map(|w| w.rect());
            let width = ctx.screen_width;
            let height = ctx.screen_height;
            let pixels = desktop.backend.scanout();
            let mut scanout = Scanout { pixels, width, height };
            compositor::draw(&mut scanout, &desktop.registry, window);
            if let Some(rect) = rect {
                desktop.backend.present(rect);
            }
            reply
        }
        Err(e) => {
            warn!("buffer allocation failed: {e}");
            BufferReplyPayload { status: BufferStatus::Failed, shm_name: String::new(), width: 0, height: 0 }
        }
    }
}

fn handle_draw(ctx: &SessionContext, connection: ConnectionId, window: WindowId) {
    let mut desktop = ctx.desktop.lock().unwrap();
    if desktop.registry.focused() != Some(window) {
        debug!("ignoring Draw from unfocused connection {connection:?}");
        return;
    }
    let rect = desktop.registry.get(window).map(|w| w.rect());
    let width = ctx.screen_width;
    let height = ctx.screen_height;
    let pixels = desktop.backend.scanout();
    let mut scanout = Scanout { pixels, width, height };
    compositor::draw(&mut scanout, &desktop.registry, window);
    if let Some(rect) = rect {
        desktop.backend.present(rect);
    }
}

fn handle_move(ctx: &SessionContext, window: WindowId, x: i32, y: i32) {
    let mut desktop = ctx.desktop.lock().unwrap();
    if desktop.multiplexer.is_dragging(window) {
        // a drag is already authoritative over this window's position
        return;
    }
    // Move only updates coordinates; the new position is reflected on the
    // scanout by the client's next Draw, not redrawn here.
    if let Some(w) = desktop.registry.get_mut(window) {
        w.set_position(x, y);
    }
}

fn teardown(ctx: &SessionContext, window: WindowId) {
    let mut desktop = ctx.desktop.lock().unwrap();
    desktop.multiplexer.cancel_drag_on(window);
    desktop.registry.remove(window);
}

fn writer_loop(stream: UnixStream, outgoing: Arc<OutgoingQueue>) {
    let mut writer = BufWriter::new(stream);
    while let Some(msg) = outgoing.recv_blocking() {
        if msg.write_to(&mut writer).is_err() {
            break;
        }
        if writer.flush().is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outgoing_queue_drops_oldest_when_full() {
        let queue = OutgoingQueue::new();
        for i in 0..OUTGOING_QUEUE_CAPACITY + 10 {
            queue.push(Push::FocusChange { focused: i % 2 == 0 });
        }
        queue.close();
        let mut count = 0;
        while queue.recv_blocking().is_some() {
            count += 1;
        }
        assert_eq!(count, OUTGOING_QUEUE_CAPACITY);
    }
}
