//! # Graphics Context
//!
//! Owns the resource manager, render queue, temp buffer pool and frame stack
//! behind an explicit `init`/`flush`/`shutdown` lifecycle.
//!
//! ## Usage
//!
//! ```rust
//! use gfx_backend::prelude::*;
//!
//! let mut gfx = Graphics::init(BackendConfig::default(), Box::new(HeadlessDevice::new())).unwrap();
//! let (quads, indices) = gfx.shared_index_buffer().unwrap();
//! assert_eq!(indices, 65532);
//! assert!(gfx.resources.index_buffer(quads).is_some());
//! gfx.shutdown();
//! ```

use crate::core::config::BackendConfig;
use crate::render::device::GraphicsDevice;
use crate::render::frame_stack::FrameStack;
use crate::render::handle::Handle;
use crate::render::queue::RenderQueue;
use crate::render::resources::ResourceManager;
use crate::render::temp_buffers::{TempBuffer, TempBufferPool};
use crate::render::RenderResult;

/// Indices in the shared quad index buffer (whole quads that fit in 16 bits)
pub const SHARED_INDEX_COUNT: usize = (u16::MAX as usize / 6) * 6;

const QUAD_PATTERN: [u16; 6] = [3, 0, 1, 3, 1, 2];

/// Index data for `count` indices of consecutive quads `{3,0,1,3,1,2} + 4k`
pub fn quad_indices(count: usize) -> Vec<u16> {
    (0..count)
        .map(|i| QUAD_PATTERN[i % 6] + (i / 6 * 4) as u16)
        .collect()
}

/// Process-wide rendering context
#[derive(Debug)]
pub struct Graphics {
    /// GPU resource pools
    pub resources: ResourceManager,
    /// Per-frame draw queue
    pub queue: RenderQueue,
    /// Reusable dynamic vertex buffers
    pub temps: TempBufferPool,
    /// Per-frame CPU scratch
    pub stack: FrameStack,
    shared_index: Option<(Handle, u32)>,
    frame: u64,
}

impl Graphics {
    /// Validate `config` and create every subsystem on top of `device`
    pub fn init(config: BackendConfig, device: Box<dyn GraphicsDevice>) -> RenderResult<Self> {
        config.validate()?;

        let resources = ResourceManager::new(device, &config.pools)?;
        let mut queue = RenderQueue::new(&config.queue)?;
        queue.reset(config.frame.width, config.frame.height, config.frame.pixel_ratio);

        log::info!(
            "Graphics initialized: {} draws/frame, {} byte uniform arena, {} byte frame stack, {:?} sort",
            config.queue.max_draws,
            config.queue.uniform_arena_bytes,
            config.frame.stack_bytes,
            config.queue.sort_mode
        );

        Ok(Self {
            resources,
            queue,
            temps: TempBufferPool::new(),
            stack: FrameStack::new(config.frame.stack_bytes),
            shared_index: None,
            frame: 0,
        })
    }

    /// Frames flushed so far
    pub const fn frame_count(&self) -> u64 {
        self.frame
    }

    /// Borrow a dynamic vertex buffer until the end of the frame
    pub fn temp_vertex_buffer(&mut self, vertices: u32, stride: u16) -> RenderResult<TempBuffer> {
        self.temps.acquire(&mut self.resources, vertices, stride)
    }

    /// The shared quad index buffer and its index count, created on first use
    pub fn shared_index_buffer(&mut self) -> RenderResult<(Handle, u32)> {
        if let Some(shared) = self.shared_index {
            return Ok(shared);
        }
        let indices = quad_indices(SHARED_INDEX_COUNT);
        let handle = self.resources.alloc_index_buffer_u16(&indices)?;
        let shared = (handle, indices.len() as u32);
        self.shared_index = Some(shared);
        log::debug!("Shared quad index buffer {} with {} indices", handle, shared.1);
        Ok(shared)
    }

    /// Execute the frame, then recycle temp buffers and frame scratch
    ///
    /// Returns the number of draws submitted this frame.
    pub fn flush(&mut self) -> usize {
        let count = self.queue.flush(&mut self.resources);
        self.temps.release();
        self.stack.release();
        self.frame += 1;
        count
    }

    /// Free temp buffers, the shared index buffer and every remaining resource
    pub fn shutdown(&mut self) {
        self.temps.destroy(&mut self.resources);
        if let Some((handle, _)) = self.shared_index.take() {
            self.resources.free(handle);
        }
        self.resources.shutdown();
        log::info!("Graphics shutdown after {} frames", self.frame);
    }
}
