//! # Rendering System
//!
//! Handle-based GPU resources and a deferred, sort-key ordered draw queue.
//!
//! ## Architecture
//!
//! - **ResourceManager**: Fixed-capacity pools of GPU objects behind packed [`Handle`]s
//! - **RenderQueue**: Per-draw accumulator, sort keys and per-view state
//! - **UniformArena**: Frame-scoped byte store for uniform opcodes and payloads
//! - **RenderContext**: Executes the sorted draw list with redundant-state elimination
//! - **TempBufferPool / FrameStack**: Frame-scoped transient geometry
//! - **Graphics**: Owns all of the above, with explicit init/flush/shutdown
//!
//! ## Frame Flow
//!
//! ```text
//! alloc_*  ──►  set_* ... submit  ──►  flush  ──►  sort  ──►  RenderContext  ──►  device
//!                    (repeat per draw)           (once per frame, then reset)
//! ```

pub mod context;
pub mod device;
pub mod frame_stack;
pub mod graphics;
pub mod handle;
pub mod queue;
pub mod resources;
pub mod sort_key;
pub mod state;
pub mod temp_buffers;
pub mod uniform_arena;
pub mod view;

#[cfg(test)]
mod frame_tests;

pub use context::RenderContext;
pub use frame_stack::FrameStack;
pub use graphics::Graphics;
pub use handle::{Handle, ResourceType};
pub use queue::{RenderDraw, RenderQueue, SortMode};
pub use resources::{ResourceManager, SubTexture, UniformType};
pub use sort_key::SortKey;
pub use state::{BlendMode, DepthTest, Primitive, RenderState, WriteMask};
pub use temp_buffers::{TempBuffer, TempBufferPool};
pub use uniform_arena::UniformArena;
pub use view::{ClearFlags, ViewClear};

use thiserror::Error;

use crate::config::ConfigError;

/// Errors reported by the rendering backend
///
/// Every variant is recoverable: the failing operation is skipped, the error
/// is logged at the call site, and the frame continues.
#[derive(Error, Debug)]
pub enum RenderError {
    /// A resource pool is at its fixed capacity
    #[error("{kind} pool exhausted (capacity {capacity})")]
    PoolExhausted {
        /// Pool that is full
        kind: ResourceType,
        /// Its capacity
        capacity: u16,
    },

    /// Handle does not refer to a live resource of the expected type
    #[error("invalid handle {0}")]
    InvalidHandle(Handle),

    /// The named uniform does not exist in the compiled program
    #[error("uniform '{name}' not found in shader {shader}")]
    UniformNotFound {
        /// Requested uniform name
        name: String,
        /// Shader that was searched
        shader: Handle,
    },

    /// The per-frame draw capacity was reached; the draw was dropped
    #[error("render queue full ({capacity} draws)")]
    QueueFull {
        /// Queue capacity
        capacity: usize,
    },

    /// The uniform arena cannot hold the write; it was skipped
    #[error("uniform arena overflow: {requested} bytes requested, {remaining} remaining")]
    UniformArenaOverflow {
        /// Bytes needed
        requested: usize,
        /// Bytes left this frame
        remaining: usize,
    },

    /// Vertex stream index out of range
    #[error("invalid vertex stream {0}")]
    InvalidStream(u8),

    /// Texture stage index out of range
    #[error("invalid texture stage {0}")]
    InvalidStage(u8),

    /// View id out of range
    #[error("invalid view {0}")]
    InvalidView(u8),

    /// Uniform payload shorter than its declaration
    #[error("uniform payload of {actual} bytes, expected {expected}")]
    UniformSizeMismatch {
        /// Declared payload size
        expected: usize,
        /// Supplied payload size
        actual: usize,
    },

    /// Argument rejected before reaching the device
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration rejected at init
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Native device failure
    #[error("backend error: {0}")]
    Backend(String),
}

/// Result type for rendering operations
pub type RenderResult<T> = Result<T, RenderError>;
