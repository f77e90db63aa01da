//! Error types for every bgce subsystem, following the teacher's one-enum-per-concern pattern.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("connection closed")]
    Closed,
    #[error("malformed message")]
    Malformed,
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("out of memory allocating shared buffer")]
    OutOfMemory,
    #[error("buffer name collision: {0}")]
    NameCollision(String),
    #[error("failed to map shared buffer: {0}")]
    MappingFailed(io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum DisplayError {
    #[error("no usable display found")]
    NoDisplay,
    #[error("drm error: {0}")]
    Drm(String),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("no input devices found")]
    NoInputDevices,
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("i/o error reading config: {0}")]
    Io(#[from] io::Error),
    #[error("invalid color value: {0}")]
    InvalidColor(String),
}

/// Top-level error returned by the orchestrator for conditions that are fatal
/// to the whole process (display init, socket bind/listen).
#[derive(Debug, thiserror::Error)]
pub enum BgceError {
    #[error("display initialization failed: {0}")]
    DisplayInit(#[from] DisplayError),
    #[error("failed to bind socket at {path}: {source}")]
    SocketBind { path: String, source: io::Error },
    #[error("failed to listen on socket: {0}")]
    SocketListen(io::Error),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}
