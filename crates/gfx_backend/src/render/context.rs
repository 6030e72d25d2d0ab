//! Render context
//!
//! Walks the sorted draw list and turns it into device calls. State that did
//! not change since the previous draw (render state, program, stencil,
//! scissor) is not re-sent; view state is applied whenever the list crosses
//! into a new view.

use crate::foundation::math::Rect;
use crate::render::device::{GraphicsDevice, NativeId};
use crate::render::handle::Handle;
use crate::render::queue::{RenderDraw, MAX_STREAMS, MAX_TEXTURE_STAGES};
use crate::render::resources::ResourceManager;
use crate::render::state::RenderState;
use crate::render::uniform_arena::UniformArena;
use crate::render::view::View;

/// Counters of one executed frame
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    /// Draw calls issued to the device
    pub draws: usize,
    /// Draws skipped because they referenced missing resources
    pub skipped: usize,
    /// Views entered
    pub view_changes: usize,
    /// Render state words applied
    pub state_changes: usize,
    /// Program switches
    pub program_changes: usize,
    /// Uniform records uploaded
    pub uniform_uploads: usize,
}

#[derive(Debug, Clone, Copy)]
struct BoundStream {
    buffer: NativeId,
    stride: u16,
    first_vertex: u16,
    vertex_count: u32,
}

/// Native objects of one draw, resolved before touching the device
#[derive(Debug)]
struct ResolvedDraw {
    program: NativeId,
    index_buffer: Option<(NativeId, u32)>,
    streams: [Option<BoundStream>; MAX_STREAMS],
    textures: [Option<NativeId>; MAX_TEXTURE_STAGES],
}

/// Executes sorted draw lists and owns the per-frame clip rectangles
#[derive(Debug)]
pub struct RenderContext {
    clip_rects: Vec<Rect>,
    max_clip_rects: u16,
    surface: Rect,
    pixel_ratio: f32,
}

impl RenderContext {
    /// Create a context with room for `max_clip_rects` clip rectangles per frame
    pub fn new(max_clip_rects: u16) -> Self {
        Self {
            clip_rects: Vec::with_capacity(usize::from(max_clip_rects)),
            max_clip_rects,
            surface: Rect::default(),
            pixel_ratio: 1.0,
        }
    }

    /// Set the back-buffer size in points and the display pixel ratio
    pub fn set_surface(&mut self, width: u16, height: u16, pixel_ratio: f32) {
        self.surface = Rect::new(0, 0, width, height);
        self.pixel_ratio = pixel_ratio;
    }

    /// Back-buffer rectangle in pixels
    pub fn surface_pixels(&self) -> Rect {
        self.surface.scaled(self.pixel_ratio)
    }

    /// Register a clip rectangle in points; ids start at 1, 0 means "table full"
    pub fn add_clip_rect(&mut self, rect: Rect) -> u16 {
        if self.clip_rects.len() >= usize::from(self.max_clip_rects) {
            log::warn!("Clip rect table full ({}), scissor ignored", self.max_clip_rects);
            return 0;
        }
        self.clip_rects.push(rect);
        self.clip_rects.len() as u16
    }

    /// Clip rectangle registered under `id`
    pub fn clip_rect(&self, id: u16) -> Option<Rect> {
        let index = usize::from(id).checked_sub(1)?;
        self.clip_rects.get(index).copied()
    }

    /// Clip rectangles registered this frame
    pub fn clip_rect_count(&self) -> usize {
        self.clip_rects.len()
    }

    /// Drop per-frame clip rectangles
    pub fn reset(&mut self) {
        self.clip_rects.clear();
    }

    fn apply_view(&self, device: &mut dyn GraphicsDevice, view: &View) {
        let viewport = if view.viewport.is_zero() {
            self.surface_pixels()
        } else {
            view.viewport.scaled(self.pixel_ratio)
        };
        device.set_viewport(viewport);
        device.set_scissor((!view.scissor.is_zero()).then(|| view.scissor.scaled(self.pixel_ratio)));
        if !view.clear.flags.is_empty() {
            device.clear(&view.clear);
        }
        if let Some(transform) = &view.transform {
            device.set_view_transform(&transform.view, &transform.projection);
        }
    }

    fn scissor_for(&self, id: u16, view: &View) -> Option<Rect> {
        let rect = if id == 0 {
            view.scissor
        } else {
            self.clip_rect(id).unwrap_or_else(|| {
                log::warn!("Unknown clip rect id {}, using view scissor", id);
                view.scissor
            })
        };
        (!rect.is_zero()).then(|| rect.scaled(self.pixel_ratio))
    }

    /// Element count of `[first, first + count)` inside a buffer of `len`
    /// elements, where a count of 0 runs to the end; `None` if it overruns
    fn range_count(first: u16, count: u16, len: u32) -> Option<u32> {
        let first = u32::from(first);
        let count = match count {
            0 => len.checked_sub(first)?,
            n => u32::from(n),
        };
        (first + count <= len).then_some(count)
    }

    fn resolve(resources: &ResourceManager, draw: &RenderDraw) -> Result<ResolvedDraw, Handle> {
        let program = resources.shader(draw.shader).ok_or(draw.shader)?.program;

        let index_buffer = if draw.index_buffer == Handle::INVALID {
            None
        } else {
            let ib = resources.index_buffer(draw.index_buffer).ok_or(draw.index_buffer)?;
            let count = Self::range_count(draw.first_index, draw.index_count, ib.index_count()).ok_or(draw.index_buffer)?;
            Some((ib.buffer, count))
        };

        let mut streams = [None; MAX_STREAMS];
        for (slot, stream) in streams.iter_mut().zip(&draw.streams) {
            if stream.vertex_buffer == Handle::INVALID {
                continue;
            }
            let vb = resources.vertex_buffer(stream.vertex_buffer).ok_or(stream.vertex_buffer)?;
            let vertex_count = Self::range_count(stream.first_vertex, stream.vertex_count, vb.vertex_count())
                .ok_or(stream.vertex_buffer)?;
            *slot = Some(BoundStream {
                buffer: vb.buffer,
                stride: vb.stride,
                first_vertex: stream.first_vertex,
                vertex_count,
            });
        }

        let mut textures = [None; MAX_TEXTURE_STAGES];
        for (slot, &texture) in textures.iter_mut().zip(&draw.textures) {
            if texture != Handle::INVALID {
                *slot = Some(resources.texture(texture).ok_or(texture)?.texture);
            }
        }

        Ok(ResolvedDraw {
            program,
            index_buffer,
            streams,
            textures,
        })
    }

    /// Execute `sort_list` (pairs of key and index into `draws`) in order
    pub fn draw(
        &self,
        resources: &mut ResourceManager,
        arena: &UniformArena,
        views: &[View],
        sort_list: &[(u64, u16)],
        draws: &[RenderDraw],
    ) -> FrameStats {
        let mut stats = FrameStats::default();
        resources.device_mut().begin_frame();

        let mut current_view: Option<u8> = None;
        let mut current_state: Option<u64> = None;
        let mut current_program: Option<NativeId> = None;
        let mut current_stencil: Option<u32> = None;
        let mut current_scissor: Option<u16> = None;

        for &(_, index) in sort_list {
            let Some(draw) = draws.get(usize::from(index)) else {
                continue;
            };
            let Some(view) = views.get(usize::from(draw.view)) else {
                stats.skipped += 1;
                continue;
            };

            let resolved = match Self::resolve(resources, draw) {
                Ok(resolved) => resolved,
                Err(handle) => {
                    log::warn!("Skipping draw #{}: invalid resource or range in {}", index, handle);
                    stats.skipped += 1;
                    continue;
                }
            };
            if resolved.index_buffer.is_none() && resolved.streams[0].is_none() {
                log::warn!("Skipping draw #{}: no vertex stream bound", index);
                stats.skipped += 1;
                continue;
            }

            let device = resources.device_mut();

            if current_view != Some(draw.view) {
                self.apply_view(device, view);
                current_view = Some(draw.view);
                current_scissor = None;
                stats.view_changes += 1;
            }

            if current_state != Some(draw.state) {
                device.apply_state(&RenderState::decode(draw.state));
                current_state = Some(draw.state);
                stats.state_changes += 1;
            }

            if current_program != Some(resolved.program) {
                device.use_program(resolved.program);
                current_program = Some(resolved.program);
                stats.program_changes += 1;
            }

            for record in arena.read(draw.uniform_range()) {
                let opcode = record.opcode;
                device.upload_uniform(opcode.location, opcode.kind, opcode.count, record.payload);
                stats.uniform_uploads += 1;
            }

            if current_stencil != Some(draw.stencil) {
                device.set_stencil(draw.stencil);
                current_stencil = Some(draw.stencil);
            }

            if current_scissor != Some(draw.scissor) {
                device.set_scissor(self.scissor_for(draw.scissor, view));
                current_scissor = Some(draw.scissor);
            }

            for (stage, texture) in resolved.textures.iter().enumerate() {
                if let Some(texture) = texture {
                    device.bind_texture(stage as u8, *texture);
                }
            }
            for (stream, bound) in resolved.streams.iter().enumerate() {
                if let Some(bound) = bound {
                    device.bind_vertex_buffer(stream as u8, bound.buffer, bound.stride, bound.first_vertex);
                }
            }

            let primitive = RenderState::decode(draw.state).primitive;
            match (resolved.index_buffer, resolved.streams[0]) {
                (Some((buffer, count)), _) => {
                    device.bind_index_buffer(Some(buffer));
                    device.draw_indexed(primitive, u32::from(draw.first_index), count);
                }
                (None, Some(stream)) => {
                    device.bind_index_buffer(None);
                    device.draw_arrays(primitive, stream.vertex_count);
                }
                (None, None) => continue,
            }
            stats.draws += 1;
        }

        resources.device_mut().end_frame();
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_count() {
        assert_eq!(RenderContext::range_count(0, 0, 6), Some(6));
        assert_eq!(RenderContext::range_count(4, 0, 6), Some(2));
        assert_eq!(RenderContext::range_count(6, 0, 6), Some(0));
        assert_eq!(RenderContext::range_count(7, 0, 6), None);
        assert_eq!(RenderContext::range_count(0, 6, 6), Some(6));
        assert_eq!(RenderContext::range_count(4, 6, 6), None);
        assert_eq!(RenderContext::range_count(u16::MAX, u16::MAX, 6), None);
    }

    #[test]
    fn test_clip_rect_ids_start_at_one() {
        let mut ctx = RenderContext::new(4);
        assert_eq!(ctx.add_clip_rect(Rect::new(0, 0, 10, 10)), 1);
        assert_eq!(ctx.add_clip_rect(Rect::new(5, 5, 10, 10)), 2);
        assert_eq!(ctx.clip_rect(2), Some(Rect::new(5, 5, 10, 10)));
        assert_eq!(ctx.clip_rect(0), None);
        assert_eq!(ctx.clip_rect(3), None);
    }

    #[test]
    fn test_clip_rect_table_full() {
        let mut ctx = RenderContext::new(1);
        assert_eq!(ctx.add_clip_rect(Rect::new(0, 0, 1, 1)), 1);
        assert_eq!(ctx.add_clip_rect(Rect::new(0, 0, 2, 2)), 0);
        ctx.reset();
        assert_eq!(ctx.clip_rect_count(), 0);
        assert_eq!(ctx.add_clip_rect(Rect::new(0, 0, 2, 2)), 1);
    }

    #[test]
    fn test_surface_scaled_by_pixel_ratio() {
        let mut ctx = RenderContext::new(1);
        ctx.set_surface(480, 320, 2.0);
        assert_eq!(ctx.surface_pixels(), Rect::new(0, 0, 960, 640));
    }

    #[test]
    fn test_scissor_selection() {
        let mut ctx = RenderContext::new(4);
        ctx.set_surface(100, 100, 2.0);
        let id = ctx.add_clip_rect(Rect::new(1, 2, 3, 4));
        let view = View { scissor: Rect::new(0, 0, 50, 50), ..View::default() };

        assert_eq!(ctx.scissor_for(id, &view), Some(Rect::new(2, 4, 6, 8)));
        assert_eq!(ctx.scissor_for(0, &view), Some(Rect::new(0, 0, 100, 100)));
        assert_eq!(ctx.scissor_for(0, &View::default()), None);
        assert_eq!(ctx.scissor_for(99, &view), Some(Rect::new(0, 0, 100, 100)));
    }
}
