//! # Render Queue
//!
//! Collects draws for one frame and executes them in sort-key order.
//!
//! ## Architecture
//!
//! - **RenderDraw**: Snapshot of one pending draw (buffers, textures, uniform range, state)
//! - **Accumulator**: The draw being built by the `set_*` calls, committed by [`RenderQueue::submit`]
//! - **Sort list**: `(key, index)` pairs, sorted at flush according to [`SortMode`]
//! - **Views**: Up to [`MAX_VIEWS`] viewport/clear/transform contexts, applied at flush
//!
//! Draws that compare equal keep their submission order in every mode.

use std::ops::Range;

use bytemuck::Pod;
use serde::{Deserialize, Serialize};

use crate::core::config::QueueConfig;
use crate::foundation::math::{Mat4, Rect};
use crate::render::context::{FrameStats, RenderContext};
use crate::render::handle::Handle;
use crate::render::resources::ResourceManager;
use crate::render::sort_key::SortKey;
use crate::render::state::RenderState;
use crate::render::uniform_arena::{UniformArena, UniformOpcode};
use crate::render::view::{View, ViewClear, ViewTransform, MAX_VIEWS};
use crate::render::{RenderError, RenderResult};

/// Default per-frame draw capacity (~8000 draw calls)
pub const MAX_QUEUE_SIZE: usize = 8 << 10;

/// Vertex streams per draw
pub const MAX_STREAMS: usize = 2;

/// Texture stages per draw
pub const MAX_TEXTURE_STAGES: usize = 2;

/// Ordering applied to the draw list at flush
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortMode {
    /// Submission order
    Sequential,
    /// Stable sort by key, low to high
    #[default]
    Ascending,
    /// Stable sort by key, high to low
    Descending,
}

/// One vertex stream binding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stream {
    /// Vertex buffer
    pub vertex_buffer: Handle,
    /// First vertex
    pub first_vertex: u16,
    /// Vertex count, 0 means "to the end of the buffer"
    pub vertex_count: u16,
}

/// Snapshot of one pending draw
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderDraw {
    /// Target view
    pub view: u8,
    /// Program
    pub shader: Handle,
    /// Index buffer, [`Handle::INVALID`] for non-indexed draws
    pub index_buffer: Handle,
    /// First index
    pub first_index: u16,
    /// Index count, 0 means "to the end of the buffer"
    pub index_count: u16,
    /// Vertex streams
    pub streams: [Stream; MAX_STREAMS],
    /// Texture stages
    pub textures: [Handle; MAX_TEXTURE_STAGES],
    /// Start of this draw's records in the uniform arena
    pub uniform_begin: u32,
    /// End of this draw's records in the uniform arena
    pub uniform_end: u32,
    /// Stencil reference word
    pub stencil: u32,
    /// Clip rectangle id, 0 uses the view scissor
    pub scissor: u16,
    /// Packed [`RenderState`]
    pub state: u64,
}

impl RenderDraw {
    /// Uniform arena range of this draw
    pub fn uniform_range(&self) -> Range<usize> {
        self.uniform_begin as usize..self.uniform_end as usize
    }
}

impl Default for RenderDraw {
    fn default() -> Self {
        Self {
            view: 0,
            shader: Handle::INVALID,
            index_buffer: Handle::INVALID,
            first_index: 0,
            index_count: 0,
            streams: [Stream::default(); MAX_STREAMS],
            textures: [Handle::INVALID; MAX_TEXTURE_STAGES],
            uniform_begin: 0,
            uniform_end: 0,
            stencil: 0,
            scissor: 0,
            state: RenderState::new().encode(),
        }
    }
}

/// Deferred, sort-key ordered draw list for one frame
#[derive(Debug)]
pub struct RenderQueue {
    sort_mode: SortMode,
    capacity: usize,
    sort_list: Vec<(u64, u16)>,
    draws: Vec<RenderDraw>,

    // per-draw accumulator
    draw: RenderDraw,
    uniform_begin: usize,

    // per-frame state
    views: [View; MAX_VIEWS],
    arena: UniformArena,
    context: RenderContext,
    last_frame: FrameStats,
}

impl RenderQueue {
    /// Create a queue sized by `config`
    ///
    /// Fails with [`RenderError::Config`] when draw indices would not fit
    /// the 16-bit sort list.
    pub fn new(config: &QueueConfig) -> RenderResult<Self> {
        config.validate()?;
        Ok(Self {
            sort_mode: config.sort_mode,
            capacity: config.max_draws,
            sort_list: Vec::with_capacity(config.max_draws),
            draws: Vec::with_capacity(config.max_draws),
            draw: RenderDraw::default(),
            uniform_begin: 0,
            views: [View::default(); MAX_VIEWS],
            arena: UniformArena::new(config.uniform_arena_bytes as usize),
            context: RenderContext::new(config.max_clip_rects),
            last_frame: FrameStats::default(),
        })
    }

    /// Current sort mode
    pub const fn sort_mode(&self) -> SortMode {
        self.sort_mode
    }

    /// Change the ordering applied at the next flush
    pub fn set_sort_mode(&mut self, sort_mode: SortMode) {
        self.sort_mode = sort_mode;
    }

    /// Maximum draws per frame
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Draws submitted since the last flush
    pub fn draw_count(&self) -> usize {
        self.draws.len()
    }

    /// Pending draws in submission order
    pub fn draws(&self) -> &[RenderDraw] {
        &self.draws
    }

    /// Pending sort keys in submission order
    pub fn sort_keys(&self) -> impl Iterator<Item = u64> + '_ {
        self.sort_list.iter().map(|&(key, _)| key)
    }

    /// The draw being accumulated
    pub const fn current(&self) -> &RenderDraw {
        &self.draw
    }

    /// This frame's uniform arena
    pub const fn arena(&self) -> &UniformArena {
        &self.arena
    }

    /// The render context executing flushes
    pub const fn context(&self) -> &RenderContext {
        &self.context
    }

    /// Counters of the most recent flush
    pub const fn last_frame(&self) -> &FrameStats {
        &self.last_frame
    }

    /// State of a view
    pub fn view(&self, id: u8) -> Option<&View> {
        self.views.get(usize::from(id))
    }

    /// Set the back-buffer size in points and the display pixel ratio
    pub fn reset(&mut self, width: u16, height: u16, pixel_ratio: f32) {
        log::debug!("Render queue reset to {}x{} @{}", width, height, pixel_ratio);
        self.context.set_surface(width, height, pixel_ratio);
    }

    // Per-draw state

    /// Set the render state of the current draw
    pub fn set_state(&mut self, state: RenderState) {
        self.draw.state = state.encode();
    }

    /// Set the index buffer range of the current draw
    pub fn set_index_buffer(&mut self, handle: Handle, first_index: u16, index_count: u16) {
        self.draw.index_buffer = handle;
        self.draw.first_index = first_index;
        self.draw.index_count = index_count;
    }

    /// Bind a vertex buffer range to stream 0 or 1 of the current draw
    pub fn set_vertex_buffer(&mut self, stream: u8, handle: Handle, first_vertex: u16, vertex_count: u16) {
        let Some(slot) = self.draw.streams.get_mut(usize::from(stream)) else {
            log::warn!("{}", RenderError::InvalidStream(stream));
            return;
        };
        *slot = Stream {
            vertex_buffer: handle,
            first_vertex,
            vertex_count,
        };
    }

    /// Bind a texture to stage 0 or 1 of the current draw
    pub fn set_texture(&mut self, stage: u8, handle: Handle) {
        let Some(slot) = self.draw.textures.get_mut(usize::from(stage)) else {
            log::warn!("{}", RenderError::InvalidStage(stage));
            return;
        };
        *slot = handle;
    }

    /// Record a uniform update for the current draw
    ///
    /// `bytes` must hold at least the declared `size * count` bytes; any
    /// excess is ignored.
    pub fn set_uniform(&mut self, resources: &ResourceManager, handle: Handle, bytes: &[u8]) -> RenderResult<()> {
        let Some(uniform) = resources.uniform(handle) else {
            log::warn!("set_uniform with invalid handle {}", handle);
            return Err(RenderError::InvalidHandle(handle));
        };
        let expected = uniform.payload_size();
        if bytes.len() < expected {
            let error = RenderError::UniformSizeMismatch { expected, actual: bytes.len() };
            log::warn!("uniform '{}': {}", uniform.name, error);
            return Err(error);
        }
        let opcode = UniformOpcode::new(uniform.kind, uniform.location, uniform.count);
        self.arena.write_record(&opcode, &bytes[..expected]).inspect_err(|e| {
            log::warn!("uniform '{}' dropped: {}", uniform.name, e);
        })
    }

    /// Record a uniform update from a plain-old-data value
    pub fn set_uniform_value<T: Pod>(&mut self, resources: &ResourceManager, handle: Handle, value: &T) -> RenderResult<()> {
        self.set_uniform(resources, handle, bytemuck::bytes_of(value))
    }

    /// Record a uniform array update from a slice of plain-old-data values
    pub fn set_uniform_slice<T: Pod>(&mut self, resources: &ResourceManager, handle: Handle, values: &[T]) -> RenderResult<()> {
        self.set_uniform(resources, handle, bytemuck::cast_slice(values))
    }

    /// Set the stencil reference of the current draw
    pub fn set_stencil(&mut self, stencil: u32) {
        self.draw.stencil = stencil;
    }

    /// Register a clip rectangle and use it for the current draw
    ///
    /// Returns the id for [`RenderQueue::set_scissor_cached`], or 0 when the
    /// clip table is full (the draw then uses the view scissor).
    pub fn set_scissor(&mut self, x: u16, y: u16, width: u16, height: u16) -> u16 {
        let id = self.context.add_clip_rect(Rect::new(x, y, width, height));
        self.draw.scissor = id;
        id
    }

    /// Reuse a clip rectangle registered earlier this frame
    pub fn set_scissor_cached(&mut self, id: u16) {
        self.draw.scissor = id;
    }

    // View state

    fn view_mut(&mut self, id: u8) -> Option<&mut View> {
        let view = self.views.get_mut(usize::from(id));
        if view.is_none() {
            log::warn!("{}", RenderError::InvalidView(id));
        }
        view
    }

    /// Set a view's viewport in points; a zero rectangle covers the back-buffer
    pub fn set_view_viewport(&mut self, id: u8, x: u16, y: u16, width: u16, height: u16) {
        if let Some(view) = self.view_mut(id) {
            view.viewport = Rect::new(x, y, width, height);
        }
    }

    /// Set a view-wide scissor in points; a zero rectangle disables it
    pub fn set_view_scissor(&mut self, id: u8, x: u16, y: u16, width: u16, height: u16) {
        if let Some(view) = self.view_mut(id) {
            view.scissor = Rect::new(x, y, width, height);
        }
    }

    /// Set what a view clears when it begins
    pub fn set_view_clear(&mut self, id: u8, clear: ViewClear) {
        if let Some(view) = self.view_mut(id) {
            view.clear = clear;
        }
    }

    /// Set a view's view and projection matrices
    pub fn set_view_transform(&mut self, id: u8, view_matrix: &Mat4, projection: &Mat4) {
        if let Some(view) = self.view_mut(id) {
            view.transform = Some(ViewTransform {
                view: *view_matrix,
                projection: *projection,
            });
        }
    }

    // Submission

    fn reset_accumulator(&mut self) {
        self.draw = RenderDraw::default();
        self.uniform_begin = self.arena.position();
    }

    /// Commit the current draw to `view` with `shader` at signed `depth`
    ///
    /// Returns the draw's index within this frame. The accumulator is reset
    /// whether or not the draw was accepted.
    pub fn submit(&mut self, view: u8, shader: Handle, depth: i16) -> RenderResult<u16> {
        if usize::from(view) >= MAX_VIEWS {
            log::warn!("submit dropped: {}", RenderError::InvalidView(view));
            self.reset_accumulator();
            return Err(RenderError::InvalidView(view));
        }
        if self.draws.len() >= self.capacity {
            let error = RenderError::QueueFull { capacity: self.capacity };
            log::warn!("submit dropped: {}", error);
            self.reset_accumulator();
            return Err(error);
        }

        let key = SortKey {
            layer: u16::from(view),
            order: SortKey::order_from_depth(depth),
            shader: shader.slot(),
            texture: self.draw.textures[0].slot(),
            blend: RenderState::blend_bucket(self.draw.state),
        };
        let index = self.draws.len() as u16;

        let mut draw = std::mem::take(&mut self.draw);
        draw.view = view;
        draw.shader = shader;
        draw.uniform_begin = self.uniform_begin as u32;
        draw.uniform_end = self.arena.position() as u32;

        log::trace!("submit #{} view={} shader={} key=0x{:016X}", index, view, shader, key.encode());
        self.sort_list.push((key.encode(), index));
        self.draws.push(draw);
        self.reset_accumulator();
        Ok(index)
    }

    /// Sort and execute this frame's draws, then reset all per-frame state
    ///
    /// Returns the number of draws submitted this frame.
    pub fn flush(&mut self, resources: &mut ResourceManager) -> usize {
        let count = self.draws.len();

        match self.sort_mode {
            SortMode::Sequential => {}
            SortMode::Ascending => self.sort_list.sort_by(|a, b| a.0.cmp(&b.0)),
            SortMode::Descending => self.sort_list.sort_by(|a, b| b.0.cmp(&a.0)),
        }

        self.last_frame = self
            .context
            .draw(resources, &self.arena, &self.views, &self.sort_list, &self.draws);

        self.sort_list.clear();
        self.draws.clear();
        self.arena.reset();
        self.context.reset();
        self.reset_accumulator();

        log::trace!("flush: {} draws, {:?}", count, self.last_frame);
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::PoolLimits;
    use crate::render::device::HeadlessDevice;
    use crate::render::resources::UniformType;
    use crate::render::state::BlendMode;

    fn queue() -> RenderQueue {
        RenderQueue::new(&QueueConfig::default()).unwrap()
    }

    fn resources() -> ResourceManager {
        ResourceManager::new(Box::new(HeadlessDevice::new()), &PoolLimits::default()).unwrap()
    }

    #[test]
    fn test_render_queue_creation() {
        let queue = queue();
        assert_eq!(queue.draw_count(), 0);
        assert_eq!(queue.capacity(), MAX_QUEUE_SIZE);
        assert_eq!(queue.sort_mode(), SortMode::Ascending);
    }

    #[test]
    fn test_setters_only_touch_accumulator() {
        let mut queue = queue();
        let vb = Handle::from_raw(0x1001);
        queue.set_vertex_buffer(1, vb, 4, 8);
        queue.set_stencil(0xFF);
        assert_eq!(queue.draw_count(), 0);
        assert_eq!(queue.current().streams[1].vertex_buffer, vb);
        assert_eq!(queue.current().stencil, 0xFF);
    }

    #[test]
    fn test_out_of_range_setters_are_noops() {
        let mut queue = queue();
        queue.set_vertex_buffer(2, Handle::from_raw(0x1001), 0, 4);
        queue.set_texture(5, Handle::from_raw(0x2001));
        queue.set_view_viewport(4, 0, 0, 10, 10);
        assert_eq!(queue.current(), &RenderDraw::default());
        assert!(queue.view(4).is_none());
    }

    #[test]
    fn test_submit_resets_accumulator() {
        let mut queue = queue();
        queue.set_texture(0, Handle::from_raw(0x2003));
        queue.set_index_buffer(Handle::from_raw(0x0001), 0, 6);
        let index = queue.submit(0, Handle::from_raw(0x5001), 0).unwrap();
        assert_eq!(index, 0);
        assert_eq!(queue.current(), &RenderDraw::default());

        let draw = &queue.draws()[0];
        assert_eq!(draw.textures[0].raw(), 0x2003);
        assert_eq!(draw.index_count, 6);
    }

    #[test]
    fn test_sort_key_fields() {
        let mut queue = queue();
        queue.set_texture(0, Handle::from_raw(0x2007));
        queue.set_state(RenderState::new().with_blend(BlendMode::Additive));
        queue.submit(2, Handle::from_raw(0x5003), -1).unwrap();

        let key = SortKey::decode(queue.sort_keys().next().unwrap());
        assert_eq!(key.layer, 2);
        assert_eq!(key.order, 0x7FFF);
        assert_eq!(key.shader, 3);
        assert_eq!(key.texture, 7);
        assert_eq!(key.blend, BlendMode::Additive.bucket());
    }

    #[test]
    fn test_queue_full_drops_draw() {
        let mut queue = RenderQueue::new(&QueueConfig::default().with_max_draws(2)).unwrap();
        let shader = Handle::from_raw(0x5001);
        queue.submit(0, shader, 0).unwrap();
        queue.submit(0, shader, 0).unwrap();

        queue.set_stencil(1);
        let err = queue.submit(0, shader, 0).unwrap_err();
        assert!(matches!(err, RenderError::QueueFull { capacity: 2 }));
        assert_eq!(queue.draw_count(), 2);
        assert_eq!(queue.current().stencil, 0);
    }

    #[test]
    fn test_oversized_queue_config_is_rejected() {
        let result = RenderQueue::new(&QueueConfig::default().with_max_draws(70_000));
        assert!(matches!(result, Err(RenderError::Config(_))));
        assert!(RenderQueue::new(&QueueConfig::default().with_max_draws(0)).is_err());
    }

    #[test]
    fn test_invalid_view_is_rejected() {
        let mut queue = queue();
        let err = queue.submit(4, Handle::from_raw(0x5001), 0).unwrap_err();
        assert!(matches!(err, RenderError::InvalidView(4)));
        assert_eq!(queue.draw_count(), 0);
    }

    #[test]
    fn test_uniform_ranges_are_contiguous() {
        let mut rm = resources();
        let shader = rm.alloc_shader("uniform vec4 tint;\nuniform float time;", "void main() {}").unwrap();
        let tint = rm.alloc_uniform(shader, "tint", UniformType::Vec4, 1).unwrap();
        let time = rm.alloc_uniform(shader, "time", UniformType::Float, 1).unwrap();

        let mut queue = queue();
        queue.set_uniform_value(&rm, tint, &[1.0f32, 0.5, 0.25, 1.0]).unwrap();
        queue.submit(0, shader, 0).unwrap();
        queue.submit(0, shader, 0).unwrap();
        queue.set_uniform_value(&rm, time, &2.0f32).unwrap();
        queue.set_uniform_value(&rm, tint, &[0.0f32; 4]).unwrap();
        queue.submit(0, shader, 0).unwrap();

        let ranges: Vec<_> = queue.draws().iter().map(RenderDraw::uniform_range).collect();
        assert_eq!(ranges, vec![0..20, 20..20, 20..48]);

        let records: Vec<_> = queue.arena().read(ranges[2].clone()).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].opcode.location, 1);
        assert_eq!(records[0].payload, bytemuck::bytes_of(&2.0f32));
        assert_eq!(records[1].opcode.kind, UniformType::Vec4);
    }

    #[test]
    fn test_short_uniform_payload_is_rejected() {
        let mut rm = resources();
        let shader = rm.alloc_shader("uniform mat4 proj;", "void main() {}").unwrap();
        let proj = rm.alloc_uniform(shader, "proj", UniformType::Mat4, 1).unwrap();

        let mut queue = queue();
        let err = queue.set_uniform_value(&rm, proj, &[0.0f32; 4]).unwrap_err();
        assert!(matches!(err, RenderError::UniformSizeMismatch { expected: 64, actual: 16 }));
        assert_eq!(queue.arena().position(), 0);
    }

    #[test]
    fn test_uniform_arena_overflow_skips_write() {
        let mut rm = resources();
        let shader = rm.alloc_shader("uniform mat4 proj;", "void main() {}").unwrap();
        let proj = rm.alloc_uniform(shader, "proj", UniformType::Mat4, 1).unwrap();

        let mut queue = RenderQueue::new(&QueueConfig::default().with_uniform_arena_bytes(100)).unwrap();
        let identity = Mat4::identity();
        queue.set_uniform_slice(&rm, proj, identity.as_slice()).unwrap();
        let err = queue.set_uniform_slice(&rm, proj, identity.as_slice()).unwrap_err();
        assert!(matches!(err, RenderError::UniformArenaOverflow { requested: 68, remaining: 32 }));
        assert_eq!(queue.arena().position(), 68);
    }

    #[test]
    fn test_flush_resets_frame_state() {
        let mut rm = resources();
        let mut queue = queue();
        queue.set_scissor(0, 0, 8, 8);
        queue.submit(0, Handle::from_raw(0x5001), 0).unwrap();
        assert_eq!(queue.context().clip_rect_count(), 1);

        assert_eq!(queue.flush(&mut rm), 1);
        assert_eq!(queue.draw_count(), 0);
        assert_eq!(queue.sort_keys().count(), 0);
        assert_eq!(queue.arena().position(), 0);
        assert_eq!(queue.context().clip_rect_count(), 0);
        assert_eq!(queue.flush(&mut rm), 0);
    }

    #[test]
    fn test_view_state_persists_across_flush() {
        let mut rm = resources();
        let mut queue = queue();
        queue.set_view_viewport(1, 0, 0, 100, 50);
        queue.flush(&mut rm);
        assert_eq!(queue.view(1).unwrap().viewport, Rect::new(0, 0, 100, 50));
    }
}
