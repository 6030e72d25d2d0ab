//! Temp Buffer Pool
//!
//! Dynamic vertex buffers for geometry that is regenerated every frame (UI,
//! sprite batches, particles). Buffers are never freed between frames: a
//! buffer acquired in one frame becomes available again after
//! [`TempBufferPool::release`] and is reused by the next request it fits.
//!
//! ```text
//! acquire(80, 20) ──► first free entry with stride 20 and capacity >= 128
//!                       └─ miss: alloc_vertex_buffer(128 * 20, 20), append
//! release()       ──► clear every in-use flag, sort by capacity
//! ```

use crate::foundation::math::utils;
use crate::render::handle::Handle;
use crate::render::resources::ResourceManager;
use crate::render::{RenderError, RenderResult};

/// A vertex buffer borrowed for the current frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TempBuffer {
    /// Vertex buffer
    pub handle: Handle,
    /// Capacity in vertices (a power of two)
    pub capacity: u32,
    /// Bytes per vertex
    pub stride: u16,
}

#[derive(Debug)]
struct TempEntry {
    buffer: TempBuffer,
    in_use: bool,
}

/// Frame-scoped pool of reusable dynamic vertex buffers
#[derive(Debug, Default)]
pub struct TempBufferPool {
    entries: Vec<TempEntry>,
}

impl TempBufferPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrow a buffer holding at least `vertices` vertices of `stride` bytes
    pub fn acquire(&mut self, resources: &mut ResourceManager, vertices: u32, stride: u16) -> RenderResult<TempBuffer> {
        let capacity = utils::next_power_of_two(vertices).ok_or_else(|| {
            log::warn!("Temp buffer of {} vertices exceeds the addressable size", vertices);
            RenderError::InvalidArgument(format!("temp buffer of {} vertices", vertices))
        })?;

        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| !e.in_use && e.buffer.stride == stride && e.buffer.capacity >= capacity)
        {
            entry.in_use = true;
            return Ok(entry.buffer);
        }

        let size = capacity
            .checked_mul(u32::from(stride))
            .ok_or_else(|| RenderError::InvalidArgument(format!("temp buffer of {} x {} bytes", capacity, stride)))?;
        let handle = resources.alloc_vertex_buffer(None, size, stride)?;
        let buffer = TempBuffer { handle, capacity, stride };
        log::debug!("New temp buffer {} ({} vertices, stride {})", handle, capacity, stride);
        self.entries.push(TempEntry { buffer, in_use: true });
        Ok(buffer)
    }

    /// Return every buffer to the pool, smallest capacity first
    pub fn release(&mut self) {
        for entry in &mut self.entries {
            entry.in_use = false;
        }
        self.entries.sort_by_key(|e| e.buffer.capacity);
    }

    /// Free every buffer
    pub fn destroy(&mut self, resources: &mut ResourceManager) {
        for entry in self.entries.drain(..) {
            resources.free(entry.buffer.handle);
        }
    }

    /// Buffers owned by the pool
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the pool owns no buffer
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Buffers borrowed this frame
    pub fn in_use(&self) -> usize {
        self.entries.iter().filter(|e| e.in_use).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::PoolLimits;
    use crate::render::device::HeadlessDevice;

    fn resources() -> ResourceManager {
        ResourceManager::new(Box::new(HeadlessDevice::new()), &PoolLimits::default()).unwrap()
    }

    #[test]
    fn test_capacity_rounds_up() {
        let mut rm = resources();
        let mut pool = TempBufferPool::new();
        let buffer = pool.acquire(&mut rm, 80, 20).unwrap();
        assert_eq!(buffer.capacity, 128);
        assert_eq!(rm.vertex_buffer(buffer.handle).unwrap().size, 128 * 20);
    }

    #[test]
    fn test_oversized_request_is_rejected() {
        let mut rm = resources();
        let mut pool = TempBufferPool::new();
        let small = pool.acquire(&mut rm, 4, 4).unwrap();
        pool.release();

        let err = pool.acquire(&mut rm, 0x8000_0001, 4).unwrap_err();
        assert!(matches!(err, RenderError::InvalidArgument(_)));
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.acquire(&mut rm, 4, 4).unwrap(), small);
    }

    #[test]
    fn test_reuse_across_frames() {
        let mut rm = resources();
        let mut pool = TempBufferPool::new();
        let first = pool.acquire(&mut rm, 80, 20).unwrap();
        pool.release();

        let second = pool.acquire(&mut rm, 80, 20).unwrap();
        assert_eq!(second, first);
        assert_eq!(pool.len(), 1);
        assert_eq!(rm.stats().vertex_buffers.live, 1);
    }

    #[test]
    fn test_in_use_buffer_is_not_shared() {
        let mut rm = resources();
        let mut pool = TempBufferPool::new();
        let a = pool.acquire(&mut rm, 16, 8).unwrap();
        let b = pool.acquire(&mut rm, 16, 8).unwrap();
        assert_ne!(a.handle, b.handle);
        assert_eq!(pool.in_use(), 2);
    }

    #[test]
    fn test_stride_must_match() {
        let mut rm = resources();
        let mut pool = TempBufferPool::new();
        let a = pool.acquire(&mut rm, 16, 8).unwrap();
        pool.release();
        let b = pool.acquire(&mut rm, 16, 12).unwrap();
        assert_ne!(a.handle, b.handle);
    }

    #[test]
    fn test_release_prefers_smallest_fit() {
        let mut rm = resources();
        let mut pool = TempBufferPool::new();
        let large = pool.acquire(&mut rm, 500, 4).unwrap();
        let small = pool.acquire(&mut rm, 10, 4).unwrap();
        pool.release();

        // Sorted by capacity, so the small buffer is found first
        assert_eq!(pool.acquire(&mut rm, 10, 4).unwrap(), small);
        assert_eq!(pool.acquire(&mut rm, 10, 4).unwrap(), large);
        assert_eq!(pool.in_use(), 2);
    }

    #[test]
    fn test_destroy_frees_buffers() {
        let mut rm = resources();
        let mut pool = TempBufferPool::new();
        pool.acquire(&mut rm, 4, 4).unwrap();
        pool.acquire(&mut rm, 4, 4).unwrap();
        pool.destroy(&mut rm);
        assert!(pool.is_empty());
        assert_eq!(rm.stats().vertex_buffers.live, 0);
    }
}
