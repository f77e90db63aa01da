//! Fixed-layout wire codec for the client/server protocol.
//!
//! Every message is a 4-byte little-endian tag followed by a fixed-size
//! payload for that tag. All multi-byte integers are written in native
//! (host) endianness for everything after the tag, since the protocol only
//! ever runs over a local Unix stream socket between processes on the same
//! machine and byte order can never mismatch.

use std::io::{self, Read, Write};

use crate::error::WireError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(pub u32);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferStatus {
    Ok,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferReplyPayload {
    pub status: BufferStatus,
    pub shm_name: String,
    pub width: u32,
    pub height: u32,
}

/// Messages sent by a client to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    GetServerInfo,
    GetBuffer { width: u32, height: u32 },
    Draw,
    Move { x: i32, y: i32 },
}

/// Replies sent by the server in direct response to a `Request`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    ServerInfo {
        width: u32,
        height: u32,
        depth: u32,
        devices: Vec<DeviceInfo>,
    },
    BufferReply(BufferReplyPayload),
}

/// Messages the server pushes to a client without being asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawInputEvent {
    pub device: DeviceId,
    pub code: u32,
    pub value: i32,
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Push {
    InputEvent(RawInputEvent),
    BufferChange(BufferReplyPayload),
    FocusChange { focused: bool },
}

const TAG_GET_SERVER_INFO: u32 = 1;
const TAG_GET_BUFFER: u32 = 2;
const TAG_DRAW: u32 = 3;
const TAG_MOVE: u32 = 4;

const TAG_SERVER_INFO: u32 = 100;
const TAG_BUFFER_REPLY: u32 = 101;

const TAG_INPUT_EVENT: u32 = 200;
const TAG_BUFFER_CHANGE: u32 = 201;
const TAG_FOCUS_CHANGE: u32 = 202;

fn write_u32<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_ne_bytes())
}

fn write_i32<W: Write>(w: &mut W, v: i32) -> io::Result<()> {
    w.write_all(&v.to_ne_bytes())
}

fn read_u32<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_ne_bytes(buf))
}

fn read_i32<R: Read>(r: &mut R) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_ne_bytes(buf))
}

fn write_string<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    let bytes = s.as_bytes();
    write_u32(w, bytes.len() as u32)?;
    w.write_all(bytes)
}

fn read_string<R: Read>(r: &mut R) -> Result<String, WireError> {
    let len = read_u32(r)? as usize;
    if len > 4096 {
        return Err(WireError::Malformed);
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| WireError::Malformed)
}

fn write_buffer_reply<W: Write>(w: &mut W, payload: &BufferReplyPayload) -> io::Result<()> {
    write_u32(w, matches!(payload.status, BufferStatus::Ok) as u32)?;
    write_string(w, &payload.shm_name)?;
    write_u32(w, payload.width)?;
    write_u32(w, payload.height)
}

fn read_buffer_reply<R: Read>(r: &mut R) -> Result<BufferReplyPayload, WireError> {
    let status = if read_u32(r)? != 0 { BufferStatus::Ok } else { BufferStatus::Failed };
    let shm_name = read_string(r)?;
    let width = read_u32(r)?;
    let height = read_u32(r)?;
    Ok(BufferReplyPayload { status, shm_name, width, height })
}

impl Request {
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), WireError> {
        match self {
            Request::GetServerInfo => write_u32(w, TAG_GET_SERVER_INFO)?,
            Request::GetBuffer { width, height } => {
                write_u32(w, TAG_GET_BUFFER)?;
                write_u32(w, *width)?;
                write_u32(w, *height)?;
            }
            Request::Draw => write_u32(w, TAG_DRAW)?,
            Request::Move { x, y } => {
                write_u32(w, TAG_MOVE)?;
                write_i32(w, *x)?;
                write_i32(w, *y)?;
            }
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Request, WireError> {
        let tag = match read_u32(r) {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(WireError::Closed),
            Err(e) => return Err(e.into()),
        };
        match tag {
            TAG_GET_SERVER_INFO => Ok(Request::GetServerInfo),
            TAG_GET_BUFFER => {
                let width = read_u32(r)?;
                let height = read_u32(r)?;
                Ok(Request::GetBuffer { width, height })
            }
            TAG_DRAW => Ok(Request::Draw),
            TAG_MOVE => {
                let x = read_i32(r)?;
                let y = read_i32(r)?;
                Ok(Request::Move { x, y })
            }
            _ => Err(WireError::Malformed),
        }
    }
}

impl Response {
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), WireError> {
        match self {
            Response::ServerInfo { width, height, depth, devices } => {
                write_u32(w, TAG_SERVER_INFO)?;
                write_u32(w, *width)?;
                write_u32(w, *height)?;
                write_u32(w, *depth)?;
                write_u32(w, devices.len() as u32)?;
                for dev in devices {
                    write_u32(w, dev.id.0)?;
                    write_string(w, &dev.name)?;
                }
            }
            Response::BufferReply(payload) => {
                write_u32(w, TAG_BUFFER_REPLY)?;
                write_buffer_reply(w, payload)?;
            }
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Response, WireError> {
        let tag = match read_u32(r) {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(WireError::Closed),
            Err(e) => return Err(e.into()),
        };
        match tag {
            TAG_SERVER_INFO => {
                let width = read_u32(r)?;
                let height = read_u32(r)?;
                let depth = read_u32(r)?;
                let count = read_u32(r)?;
                if count > 64 {
                    return Err(WireError::Malformed);
                }
                let mut devices = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let id = DeviceId(read_u32(r)?);
                    let name = read_string(r)?;
                    devices.push(DeviceInfo { id, name });
                }
                Ok(Response::ServerInfo { width, height, depth, devices })
            }
            TAG_BUFFER_REPLY => Ok(Response::BufferReply(read_buffer_reply(r)?)),
            _ => Err(WireError::Malformed),
        }
    }
}

impl Push {
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), WireError> {
        match self {
            Push::InputEvent(ev) => {
                write_u32(w, TAG_INPUT_EVENT)?;
                write_u32(w, ev.device.0)?;
                write_u32(w, ev.code)?;
                write_i32(w, ev.value)?;
                write_i32(w, ev.x)?;
                write_i32(w, ev.y)?;
            }
            Push::BufferChange(payload) => {
                write_u32(w, TAG_BUFFER_CHANGE)?;
                write_buffer_reply(w, payload)?;
            }
            Push::FocusChange { focused } => {
                write_u32(w, TAG_FOCUS_CHANGE)?;
                write_u32(w, *focused as u32)?;
            }
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Push, WireError> {
        let tag = match read_u32(r) {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(WireError::Closed),
            Err(e) => return Err(e.into()),
        };
        match tag {
            TAG_INPUT_EVENT => {
                let device = DeviceId(read_u32(r)?);
                let code = read_u32(r)?;
                let value = read_i32(r)?;
                let x = read_i32(r)?;
                let y = read_i32(r)?;
                Ok(Push::InputEvent(RawInputEvent { device, code, value, x, y }))
            }
            TAG_BUFFER_CHANGE => Ok(Push::BufferChange(read_buffer_reply(r)?)),
            TAG_FOCUS_CHANGE => {
                let focused = read_u32(r)? != 0;
                Ok(Push::FocusChange { focused })
            }
            _ => Err(WireError::Malformed),
        }
    }
}
