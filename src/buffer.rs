//! POSIX shared-memory buffer allocator for client pixel buffers.
//!
//! Mirrors the allocation strategy of a `wl_shm` pool implementation: a
//! named POSIX shared memory object is created, truncated to size, mapped
//! with `memmap2`, and unlinked from the filesystem namespace once it has
//! been handed to the client (the fd itself keeps the memory alive).

use std::ffi::CString;
use std::fs::File;
use std::os::fd::OwnedFd;
use std::sync::atomic::{AtomicU64, Ordering};

use memmap2::MmapMut;

use crate::error::BufferError;

/// A shared pixel buffer owned by the server side of a connection.
pub struct SharedBuffer {
    name: String,
    width: u32,
    height: u32,
    // kept alive alongside `mmap`; the kernel mapping survives fd closure on
    // Linux but we hold it anyway to mirror the allocator's actual lifetime.
    _file: File,
    mmap: MmapMut,
}

impl SharedBuffer {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pitch(&self) -> usize {
        self.width as usize * 4
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.mmap
    }
}

impl Drop for SharedBuffer {
    fn drop(&mut self) {
        if let Ok(cname) = CString::new(format!("/{}", self.name)) {
            let _ = rustix::shm::unlink(&cname);
        }
    }
}

/// Allocates fresh, collision-free shared buffers for one server process.
///
/// Names are `bgce_buf_<pid>_<counter>`, where `counter` strictly increases
/// for the lifetime of the process, so no two buffers this allocator
/// creates can ever collide (unlike naming by wall-clock time).
pub struct BufferAllocator {
    pid: u32,
    counter: AtomicU64,
}

impl BufferAllocator {
    pub fn new() -> Self {
        Self { pid: std::process::id(), counter: AtomicU64::new(0) }
    }

    fn next_name(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("bgce_buf_{}_{}", self.pid, n)
    }

    /// Creates a new zero-filled ARGB8888 shared buffer of `width` x `height`.
    pub fn create(&self, width: u32, height: u32) -> Result<SharedBuffer, BufferError> {
        let name = self.next_name();
        let len = (width as usize) * (height as usize) * 4;
        let (fd, shm_name) = open_shm(&name)?;
        let file = File::from(fd);
        file.set_len(len as u64).map_err(BufferError::MappingFailed)?;
        let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(BufferError::MappingFailed)?;
        // left linked until `Drop`: the client still needs to `shm_open` this
        // name itself before the server's reply reaches it
        Ok(SharedBuffer {
            name: shm_name.to_string_lossy().into_owned(),
            width,
            height,
            _file: file,
            mmap,
        })
    }

    /// Allocates a replacement buffer, discarding the old one. Used when a
    /// client resizes its window.
    pub fn replace(&self, width: u32, height: u32) -> Result<SharedBuffer, BufferError> {
        self.create(width, height)
    }
}

impl Default for BufferAllocator {
    fn default() -> Self {
        Self::new()
    }
}

fn open_shm(base_name: &str) -> Result<(OwnedFd, CString), BufferError> {
    let mut attempt = 0u32;
    loop {
        let candidate = if attempt == 0 {
            format!("/{base_name}")
        } else {
            format!("/{base_name}_{attempt}")
        };
        let cname = CString::new(candidate.clone()).expect("shm name has no interior NUL");
        let flags = rustix::fs::Mode::RUSR | rustix::fs::Mode::WUSR;
        match rustix::shm::open(
            &cname,
            rustix::shm::OFlags::CREATE | rustix::shm::OFlags::EXCL | rustix::shm::OFlags::RDWR,
            flags,
        ) {
            Ok(fd) => return Ok((fd, cname)),
            Err(rustix::io::Errno::EXIST) => {
                attempt += 1;
                if attempt > 16 {
                    return Err(BufferError::NameCollision(candidate));
                }
                continue;
            }
            Err(rustix::io::Errno::INTR) => continue,
            Err(_) => return Err(BufferError::OutOfMemory),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_zero_fills_and_sizes_correctly() {
        let alloc = BufferAllocator::new();
        let buf = alloc.create(4, 4).expect("create should succeed");
        assert_eq!(buf.as_bytes().len(), 4 * 4 * 4);
        assert!(buf.as_bytes().iter().all(|&b| b == 0));
        assert_eq!(buf.pitch(), 16);
    }

    #[test]
    fn names_never_collide_within_one_allocator() {
        let alloc = BufferAllocator::new();
        let a = alloc.create(2, 2).unwrap();
        let b = alloc.create(2, 2).unwrap();
        assert_ne!(a.name(), b.name());
    }
}
