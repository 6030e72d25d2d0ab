//! Frame stack
//!
//! CPU bump allocator for vertex data that only lives until the end of the
//! frame, typically staged here and then uploaded into a temp buffer.

use std::mem::{align_of, size_of};

use bytemuck::Pod;

use crate::foundation::math::utils;

/// Fixed-size scratch allocator reset once per frame
///
/// Backed by 8-byte words so every allocation of a type aligned to 8 or less
/// starts without padding at the front of the stack.
#[derive(Debug)]
pub struct FrameStack {
    buffer: Box<[u64]>,
    cursor: usize,
    peak: usize,
}

impl FrameStack {
    /// Create a stack of `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0u64; capacity.div_ceil(8)].into_boxed_slice(),
            cursor: 0,
            peak: 0,
        }
    }

    /// Total size in bytes
    pub fn capacity(&self) -> usize {
        self.buffer.len() * 8
    }

    /// Bytes handed out this frame, including alignment padding
    pub const fn used(&self) -> usize {
        self.cursor
    }

    /// Highest [`FrameStack::used`] seen since creation
    pub const fn peak(&self) -> usize {
        self.peak
    }

    /// Hand out `count` zeroed values of `T`, or `None` if the stack is exhausted
    pub fn alloc<T: Pod>(&mut self, count: usize) -> Option<&mut [T]> {
        if count == 0 {
            return Some(&mut []);
        }
        let capacity = self.capacity();
        let base = self.buffer.as_ptr() as usize;
        let start = utils::align_up(base + self.cursor, align_of::<T>()) - base;
        let end = size_of::<T>()
            .checked_mul(count)
            .and_then(|len| start.checked_add(len))
            .filter(|&end| end <= capacity);
        let Some(end) = end else {
            log::warn!(
                "Frame stack exhausted: {} x {} bytes requested, {} of {} used",
                count,
                size_of::<T>(),
                self.cursor,
                capacity
            );
            return None;
        };

        self.cursor = end;
        self.peak = self.peak.max(end);
        let bytes = &mut bytemuck::cast_slice_mut::<u64, u8>(&mut self.buffer)[start..end];
        bytes.fill(0);
        match bytemuck::try_cast_slice_mut(bytes) {
            Ok(values) => Some(values),
            Err(e) => {
                log::warn!("Frame stack cast failed: {}", e);
                None
            }
        }
    }

    /// Reset the cursor for the next frame
    pub fn release(&mut self) {
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C)]
    #[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
    struct SpriteVertex {
        position: [f32; 2],
        uv: [f32; 2],
        color: u32,
    }

    #[test]
    fn test_alloc_is_zeroed_and_writable() {
        let mut stack = FrameStack::new(1024);
        let vertices = stack.alloc::<SpriteVertex>(4).unwrap();
        assert_eq!(vertices.len(), 4);
        assert!(vertices.iter().all(|v| v.color == 0));
        vertices[0].color = 0xFFFF_FFFF;
        assert_eq!(stack.used(), 4 * size_of::<SpriteVertex>());
    }

    #[test]
    fn test_alignment_padding() {
        let mut stack = FrameStack::new(64);
        stack.alloc::<u8>(1).unwrap();
        let words = stack.alloc::<u32>(2).unwrap();
        assert_eq!(words.as_ptr() as usize % align_of::<u32>(), 0);
        assert!(stack.used() >= 9);
    }

    #[test]
    fn test_exhaustion_returns_none() {
        let mut stack = FrameStack::new(16);
        assert!(stack.alloc::<u32>(4).is_some());
        assert!(stack.alloc::<u32>(1).is_none());
        assert_eq!(stack.used(), 16);
    }

    #[test]
    fn test_release_resets_cursor() {
        let mut stack = FrameStack::new(32);
        stack.alloc::<u16>(8).unwrap();
        stack.release();
        assert_eq!(stack.used(), 0);
        assert_eq!(stack.peak(), 16);
        assert_eq!(stack.alloc::<u8>(32).map(|b| b.len()), Some(32));
    }
}
