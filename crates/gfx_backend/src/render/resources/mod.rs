//! GPU resource pools
//!
//! Fixed-capacity pools of index buffers, vertex buffers, textures, uniforms
//! and shaders, addressed by packed [`Handle`](crate::render::Handle)s.

pub mod buffer;
pub mod manager;
pub mod pool;
pub mod shader;
pub mod texture;

pub use buffer::{IndexBuffer, VertexBuffer};
pub use manager::{ResourceManager, ResourceStats};
pub use pool::{FreeList, Pool, PoolStats};
pub use shader::{Shader, Uniform, UniformType};
pub use texture::{SubTexture, Texture2D};

/// Index buffer slots
pub const MAX_INDEX_BUFFERS: u16 = 2 << 10;

/// Vertex buffer slots
pub const MAX_VERTEX_BUFFERS: u16 = 2 << 10;

/// Texture slots
pub const MAX_TEXTURES: u16 = 1 << 10;

/// Uniform slots
pub const MAX_UNIFORMS: u16 = 32 * 8;

/// Shader slots
pub const MAX_SHADERS: u16 = 32;
