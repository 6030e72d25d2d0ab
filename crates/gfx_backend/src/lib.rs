//! # GFX Backend
//!
//! A low-level rendering backend: a handle-based GPU resource manager paired
//! with a deferred, sort-key ordered render queue.
//!
//! ## Features
//!
//! - **Packed Handles**: 16-bit type-tagged slot references with free-list recycling
//! - **Sort Keys**: 64-bit keys ordering draws by view, depth, shader and texture
//! - **Frame Arenas**: Uniform payloads and transient vertex data reset every frame
//! - **Temp Buffers**: Reusable dynamic vertex buffers for UI, sprites and particles
//! - **Devices**: An in-memory recording device, and a `wgpu` device behind the `gpu` feature
//!
//! ## Quick Start
//!
//! ```rust
//! use gfx_backend::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut gfx = Graphics::init(BackendConfig::default(), Box::new(HeadlessDevice::new()))?;
//!
//!     let shader = gfx.resources.alloc_shader(
//!         "uniform mat4 proj;\nvoid main() {}",
//!         "void main() {}",
//!     )?;
//!     let vertices = [0u8; 4 * 20];
//!     let vb = gfx.resources.alloc_vertex_buffer(Some(&vertices), vertices.len() as u32, 20)?;
//!
//!     gfx.queue.set_vertex_buffer(0, vb, 0, 4);
//!     gfx.queue.submit(0, shader, 0)?;
//!     assert_eq!(gfx.flush(), 1);
//!
//!     gfx.shutdown();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

// Core configuration
pub mod core;
pub mod config;

pub mod foundation;
pub mod render;

/// Common imports for backend users
pub mod prelude {
    pub use crate::{
        config::{Config, ConfigError},
        core::config::{BackendConfig, FrameConfig, PoolLimits, QueueConfig},
        foundation::math::{Mat4, Rect, Vec2},
        render::{
            device::{GraphicsDevice, HeadlessDevice},
            BlendMode, ClearFlags, DepthTest, Graphics, Handle, Primitive, RenderError,
            RenderQueue, RenderResult, RenderState, ResourceManager, ResourceType, SortKey,
            SortMode, SubTexture, TempBuffer, UniformType, ViewClear, WriteMask,
        },
    };

    #[cfg(feature = "gpu")]
    pub use crate::render::device::WgpuDevice;
}
