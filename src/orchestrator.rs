//! Server bootstrap: init display, paint the background, start the input
//! multiplexer, accept client connections, and shut everything down cleanly
//! on `SIGINT` or a `Ctrl+Alt+Q` shortcut.

use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{error, info, warn};

use crate::buffer::BufferAllocator;
use crate::compositor::{self, Scanout};
use crate::config::{BackgroundKind, Config};
use crate::display::DisplayBackend;
use crate::error::BgceError;
use crate::input::{self, InputMultiplexer, RawEvent, REL_X_CODE, REL_Y_CODE};
use crate::registry::ConnectionId;
use crate::session::{Desktop, OutgoingQueue, SessionContext};
use crate::wire::{DeviceId, DeviceInfo};

pub struct ServerOptions {
    pub socket_path: PathBuf,
    pub preferred_width: u32,
    pub preferred_height: u32,
    pub config: Config,
}

/// Runs the server until shut down. `backend` is injected so tests (and the
/// binary) can choose between the real DRM backend and the offscreen one.
pub fn run(options: ServerOptions, mut backend: Box<dyn DisplayBackend + Send>) -> Result<(), BgceError> {
    let screen = backend.init((options.preferred_width, options.preferred_height))?;
    info!("display initialized at {}x{}", screen.width, screen.height);

    let allocator = Arc::new(BufferAllocator::new());
    let mut registry = crate::registry::WindowRegistry::new();
    paint_background(&mut backend, &mut registry, &allocator, &options.config.background, screen);

    let devices = match input::device::enumerate() {
        Ok(devs) => devs
            .iter()
            .map(|d| DeviceInfo { id: crate::wire::DeviceId(d.id), name: d.name.clone() })
            .collect::<Vec<_>>(),
        Err(e) => {
            warn!("input device enumeration found nothing: {e}");
            Vec::new()
        }
    };

    let multiplexer = InputMultiplexer::new(screen.width, screen.height);
    let desktop = Arc::new(Mutex::new(Desktop { registry, backend, multiplexer, screen }));

    let shutdown = Arc::new(AtomicBool::new(false));
    install_signal_handler(Arc::clone(&shutdown));

    let ctx = Arc::new(SessionContext {
        desktop: Arc::clone(&desktop),
        allocator: Arc::clone(&allocator),
        devices,
        screen_width: screen.width,
        screen_height: screen.height,
        connections: Mutex::new(std::collections::HashMap::new()),
        cursor_sprite: compositor::default_cursor_sprite(),
        cursor_sprite_size: compositor::CURSOR_SPRITE_SIZE,
    });

    let input_thread = {
        let desktop = Arc::clone(&desktop);
        let allocator = Arc::clone(&allocator);
        let shutdown = Arc::clone(&shutdown);
        let ctx = Arc::clone(&ctx);
        std::thread::spawn(move || input_loop(desktop, allocator, shutdown, ctx))
    };

    let result = accept_loop(&options.socket_path, Arc::clone(&ctx), Arc::clone(&shutdown));

    shutdown.store(true, Ordering::SeqCst);
    let _ = input_thread.join();
    desktop.lock().unwrap().backend.shutdown();
    let _ = std::fs::remove_file(&options.socket_path);

    result
}

fn paint_background(
    backend: &mut Box<dyn DisplayBackend + Send>,
    registry: &mut crate::registry::WindowRegistry,
    allocator: &BufferAllocator,
    kind: &BackgroundKind,
    screen: crate::display::ScreenInfo,
) {
    let Ok(mut buf) = allocator.create(screen.width, screen.height) else { return };
    fill_background(buf.as_bytes_mut(), screen.width, screen.height, kind);
    registry.set_background_buffer(buf);

    let pixels = backend.scanout();
    let mut scanout = Scanout { pixels, width: screen.width, height: screen.height };
    compositor::draw(&mut scanout, registry, registry.background_id());
    backend.present(crate::geometry::Rect::new(0, 0, screen.width, screen.height));
}

fn fill_background(pixels: &mut [u8], width: u32, height: u32, kind: &BackgroundKind) {
    match kind {
        BackgroundKind::Color(argb) => fill_solid_color(pixels, *argb),
        BackgroundKind::Image { path, scaled } => match crate::image_decoder::decode(path) {
            Ok(img) if img.width == 0 || img.height == 0 => {
                warn!("background image {path:?} has zero dimension, falling back to default color");
                fill_solid_color(pixels, 0xFF33_3333);
            }
            Ok(img) => {
                if *scaled {
                    scale_image_into(pixels, width, height, &img);
                } else {
                    tile_image_into(pixels, width, height, &img);
                }
            }
            Err(e) => {
                warn!("failed to decode background image {path:?}: {e}, falling back to default color");
                fill_solid_color(pixels, 0xFF33_3333);
            }
        },
    }
}

fn fill_solid_color(pixels: &mut [u8], argb: u32) {
    let a = (argb >> 24) as u8;
    let r = (argb >> 16) as u8;
    let g = (argb >> 8) as u8;
    let b = argb as u8;
    for px in pixels.chunks_exact_mut(4) {
        px[0] = b;
        px[1] = g;
        px[2] = r;
        px[3] = a;
    }
}

/// Repeats `img` across `pixels` with `x % img.width, y % img.height`
/// indexing, matching `config.c`'s `apply_background`'s `IMAGE_TILED` mode.
fn tile_image_into(pixels: &mut [u8], width: u32, height: u32, img: &crate::image_decoder::DecodedImage) {
    for y in 0..height {
        let img_y = y % img.height;
        for x in 0..width {
            let img_x = x % img.width;
            copy_pixel(pixels, width, x, y, &img.pixels, img.width, img_x, img_y);
        }
    }
}

/// Nearest-neighbor scale of `img` to fill `pixels`, matching `config.c`'s
/// `apply_background`'s `IMAGE_SCALED` mode.
fn scale_image_into(pixels: &mut [u8], width: u32, height: u32, img: &crate::image_decoder::DecodedImage) {
    let x_ratio = img.width as f32 / width as f32;
    let y_ratio = img.height as f32 / height as f32;
    for y in 0..height {
        let img_y = ((y as f32 * y_ratio) as u32).min(img.height - 1);
        for x in 0..width {
            let img_x = ((x as f32 * x_ratio) as u32).min(img.width - 1);
            copy_pixel(pixels, width, x, y, &img.pixels, img.width, img_x, img_y);
        }
    }
}

fn copy_pixel(
    dst: &mut [u8],
    dst_width: u32,
    dst_x: u32,
    dst_y: u32,
    src: &[u8],
    src_width: u32,
    src_x: u32,
    src_y: u32,
) {
    let dst_off = (dst_y as usize * dst_width as usize + dst_x as usize) * 4;
    let src_off = (src_y as usize * src_width as usize + src_x as usize) * 4;
    if dst_off + 4 <= dst.len() && src_off + 4 <= src.len() {
        dst[dst_off..dst_off + 4].copy_from_slice(&src[src_off..src_off + 4]);
    }
}

fn accept_loop(
    socket_path: &Path,
    ctx: Arc<SessionContext>,
    shutdown: Arc<AtomicBool>,
) -> Result<(), BgceError> {
    let _ = std::fs::remove_file(socket_path);
    let listener = UnixListener::bind(socket_path).map_err(|e| BgceError::SocketBind {
        path: socket_path.display().to_string(),
        source: e,
    })?;
    listener.set_nonblocking(true).map_err(BgceError::SocketListen)?;

    let mut next_connection = 0u32;
    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _addr)) => {
                let connection = ConnectionId(next_connection);
                next_connection += 1;
                spawn_session(stream, connection, Arc::clone(&ctx));
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(e) => {
                error!("accept failed: {e}");
                break;
            }
        }
    }
    Ok(())
}

fn spawn_session(stream: UnixStream, connection: ConnectionId, ctx: Arc<SessionContext>) {
    let window = ctx.desktop.lock().unwrap().registry.insert(connection);
    let outgoing = Arc::new(OutgoingQueue::new());
    std::thread::spawn(move || {
        crate::session::run_session(stream, connection, window, ctx, outgoing);
    });
}

fn input_loop(
    desktop: Arc<Mutex<Desktop>>,
    allocator: Arc<BufferAllocator>,
    shutdown: Arc<AtomicBool>,
    ctx: Arc<SessionContext>,
) {
    let mut devices = match input::device::enumerate() {
        Ok(devs) => devs,
        Err(_) => return,
    };
    let mut fds: Vec<(u32, evdev::Device)> = devices.drain(..).map(|d| (d.id, d.device)).collect();

    while !shutdown.load(Ordering::SeqCst) {
        for (id, device) in fds.iter_mut() {
            let events = match device.fetch_events() {
                Ok(evs) => evs,
                Err(_) => continue,
            };
            for ev in events {
                let raw = translate(ev);
                if let Some(raw) = raw {
                    process_input_event(&desktop, &allocator, DeviceId(*id), raw, &shutdown, &ctx);
                }
            }
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn translate(ev: evdev::InputEvent) -> Option<RawEvent> {
    use evdev::EventSummary;
    match ev.destructure() {
        EventSummary::Key(_, _, value) => Some(RawEvent::Key { code: ev.code(), pressed: value != 0 }),
        EventSummary::RelativeAxis(_, axis, value) => match axis {
            evdev::RelativeAxisCode::REL_X => Some(RawEvent::Motion { code: REL_X_CODE, dx: value, dy: 0 }),
            evdev::RelativeAxisCode::REL_Y => Some(RawEvent::Motion { code: REL_Y_CODE, dx: 0, dy: value }),
            _ => None,
        },
        _ => None,
    }
}

fn process_input_event(
    desktop: &Arc<Mutex<Desktop>>,
    allocator: &Arc<BufferAllocator>,
    device: DeviceId,
    event: RawEvent,
    shutdown: &Arc<AtomicBool>,
    ctx: &Arc<SessionContext>,
) {
    let mut desktop = desktop.lock().unwrap();
    let Desktop { registry, backend, multiplexer, screen } = &mut *desktop;
    let (width, height) = (screen.width, screen.height);
    let outcome = {
        let pixels = backend.scanout();
        let mut scanout = Scanout { pixels, width, height };
        multiplexer.handle_event(event, device, registry, &mut scanout, allocator)
    };
    if let Some((cx, cy)) = outcome.cursor_moved {
        backend.move_cursor(cx, cy);
        if !backend.has_hardware_cursor() {
            let sprite = ctx.cursor_sprite.as_slice();
            let pixels = backend.scanout();
            let mut scanout = Scanout { pixels, width, height };
            compositor::draw_cursor_overlay(&mut scanout, sprite, ctx.cursor_sprite_size, ctx.cursor_sprite_size, cx, cy);
            backend.present(crate::geometry::Rect::new(cx, cy, ctx.cursor_sprite_size, ctx.cursor_sprite_size));
        }
    }
    if outcome.quit {
        shutdown.store(true, Ordering::SeqCst);
    }
    if outcome.screenshot {
        take_screenshot(backend, width, height);
    }
    for (connection, push) in outcome.notifications {
        ctx.deliver(connection, push);
    }
}

fn take_screenshot(backend: &mut Box<dyn DisplayBackend + Send>, width: u32, height: u32) {
    let pixels = backend.scanout().to_vec();
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let path = std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(format!("bgce-screenshot-{timestamp}.png"));
    if let Err(e) = crate::image_decoder::write_screenshot(&path, width, height, &pixels) {
        warn!("screenshot failed: {e}");
    } else {
        info!("screenshot saved to {path:?}");
    }
}

fn install_signal_handler(shutdown: Arc<AtomicBool>) {
    if let Err(e) = ctrlc::set_handler(move || {
        shutdown.store(true, Ordering::SeqCst);
    }) {
        warn!("failed to install SIGINT handler: {e}");
    }
}
