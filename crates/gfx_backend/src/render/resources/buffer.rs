//! Index and vertex buffer pool entries

use crate::render::device::NativeId;

/// Element buffer of 16-bit indices
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexBuffer {
    /// Native buffer
    pub buffer: NativeId,
    /// Size in bytes
    pub size: u32,
}

impl IndexBuffer {
    /// Number of `u16` indices the buffer holds
    pub const fn index_count(&self) -> u32 {
        self.size / 2
    }
}

/// Vertex buffer with a fixed stride
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexBuffer {
    /// Native buffer
    pub buffer: NativeId,
    /// Size in bytes
    pub size: u32,
    /// Bytes per vertex
    pub stride: u16,
}

impl VertexBuffer {
    /// Number of whole vertices the buffer holds
    pub const fn vertex_count(&self) -> u32 {
        if self.stride == 0 {
            0
        } else {
            self.size / self.stride as u32
        }
    }
}
