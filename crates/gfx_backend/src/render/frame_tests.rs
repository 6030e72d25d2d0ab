//! End-to-end frame tests
//!
//! Allocate resources, submit draws and flush through [`Graphics`] against
//! the [`HeadlessDevice`], then inspect the recorded device commands.

use approx::assert_relative_eq;

use crate::core::config::{BackendConfig, FrameConfig, QueueConfig};
use crate::foundation::math::{Mat4, Rect};
use crate::render::device::{DeviceCommand, DrawRecord, HeadlessDevice};
use crate::render::view::{ClearFlags, ViewClear};
use crate::render::{
    BlendMode, DepthTest, Graphics, Handle, Primitive, RenderState, SortMode, UniformType,
};

const SPRITE_VS: &str = "\
uniform mat4 proj;
uniform vec4 tint;
void main() {}";

const SPRITE_FS: &str = "\
uniform sampler2D tex;
void main() {}";

const STRIDE: u16 = 20;

struct Scene {
    gfx: Graphics,
    shader: Handle,
    vb: Handle,
    ib: Handle,
}

fn scene_with(config: BackendConfig) -> Scene {
    let mut gfx = Graphics::init(config, Box::new(HeadlessDevice::new())).unwrap();
    let shader = gfx.resources.alloc_shader(SPRITE_VS, SPRITE_FS).unwrap();
    let vertices = [0u8; 4 * STRIDE as usize];
    let vb = gfx
        .resources
        .alloc_vertex_buffer(Some(&vertices), vertices.len() as u32, STRIDE)
        .unwrap();
    let ib = gfx.resources.alloc_index_buffer_u16(&[0, 1, 2, 2, 3, 0]).unwrap();
    gfx.device_mut().clear_commands();
    Scene { gfx, shader, vb, ib }
}

fn scene() -> Scene {
    scene_with(BackendConfig::default())
}

impl Scene {
    fn quad(&mut self, view: u8, depth: i16) {
        self.gfx.queue.set_index_buffer(self.ib, 0, 6);
        self.gfx.queue.set_vertex_buffer(0, self.vb, 0, 4);
        self.gfx.queue.submit(view, self.shader, depth).unwrap();
    }

    fn device(&self) -> &HeadlessDevice {
        self.gfx.resources.device_as::<HeadlessDevice>().unwrap()
    }

    fn draws(&self) -> Vec<DrawRecord> {
        self.device().draws().into_iter().cloned().collect()
    }
}

impl Graphics {
    fn device_mut(&mut self) -> &mut HeadlessDevice {
        self.resources.device_as_mut::<HeadlessDevice>().unwrap()
    }
}

#[test]
fn test_single_quad_frame() {
    let mut s = scene();
    s.quad(0, 0);
    assert_eq!(s.gfx.flush(), 1);

    let draws = s.draws();
    assert_eq!(draws.len(), 1);
    let native_vb = s.gfx.resources.vertex_buffer(s.vb).unwrap().buffer;
    let native_ib = s.gfx.resources.index_buffer(s.ib).unwrap().buffer;
    let program = s.gfx.resources.shader(s.shader).unwrap().program;
    assert_eq!(draws[0].index_buffer, Some(native_ib));
    assert_eq!(draws[0].vertex_buffers[0], Some(native_vb));
    assert_eq!(draws[0].program, Some(program));
    assert_eq!(draws[0].count, 6);
    assert_eq!(draws[0].primitive, Primitive::Triangles);

    let commands = s.device().commands();
    assert_eq!(commands.first(), Some(&DeviceCommand::BeginFrame));
    assert_eq!(commands.last(), Some(&DeviceCommand::EndFrame));
}

#[test]
fn test_layer_dominates_depth() {
    let mut s = scene();
    let other = s.gfx.resources.alloc_vertex_buffer(None, 80, STRIDE).unwrap();
    s.gfx.queue.set_vertex_buffer(0, other, 0, 4);
    s.gfx.queue.submit(1, s.shader, -100).unwrap();
    s.quad(0, 100);
    s.gfx.flush();

    let first_view0 = s.gfx.resources.vertex_buffer(s.vb).unwrap().buffer;
    let draws = s.draws();
    assert_eq!(draws[0].vertex_buffers[0], Some(first_view0));
}

#[test]
fn test_depth_orders_within_view() {
    let mut s = scene();
    let far = s.gfx.resources.alloc_vertex_buffer(None, 80, STRIDE).unwrap();
    s.gfx.queue.set_vertex_buffer(0, far, 0, 4);
    s.gfx.queue.submit(0, s.shader, 10).unwrap();
    s.quad(0, -10);
    s.gfx.flush();

    let near = s.gfx.resources.vertex_buffer(s.vb).unwrap().buffer;
    let far = s.gfx.resources.vertex_buffer(far).unwrap().buffer;
    let order: Vec<_> = s.draws().iter().map(|d| d.vertex_buffers[0]).collect();
    assert_eq!(order, vec![Some(near), Some(far)]);
}

#[test]
fn test_equal_keys_keep_submission_order() {
    for mode in [SortMode::Ascending, SortMode::Descending, SortMode::Sequential] {
        let mut s = scene();
        s.gfx.queue.set_sort_mode(mode);
        for stencil in 0..5 {
            s.gfx.queue.set_stencil(stencil);
            s.quad(0, 0);
        }
        s.gfx.flush();

        let stencils: Vec<u32> = s
            .device()
            .commands()
            .iter()
            .filter_map(|c| match c {
                DeviceCommand::Stencil(v) => Some(*v),
                _ => None,
            })
            .collect();
        assert_eq!(stencils, vec![0, 1, 2, 3, 4], "{:?}", mode);
    }
}

#[test]
fn test_descending_reverses_views() {
    let config = BackendConfig::default()
        .with_queue(QueueConfig::default().with_sort_mode(SortMode::Descending));
    let mut s = scene_with(config);
    for view in 0..3 {
        s.gfx.queue.set_view_viewport(view, 0, 0, 10 + u16::from(view), 10);
        s.quad(view, 0);
    }
    s.gfx.flush();

    let widths: Vec<u16> = s
        .device()
        .commands()
        .iter()
        .filter_map(|c| match c {
            DeviceCommand::Viewport(rect) => Some(rect.w),
            _ => None,
        })
        .collect();
    assert_eq!(widths, vec![12, 11, 10]);
}

#[test]
fn test_uniforms_upload_after_program() {
    let mut s = scene();
    let tint = s.gfx.resources.alloc_uniform(s.shader, "tint", UniformType::Vec4, 1).unwrap();
    s.gfx
        .queue
        .set_uniform_value(&s.gfx.resources, tint, &[1.0f32, 0.5, 0.25, 1.0])
        .unwrap();
    s.quad(0, 0);
    s.gfx.flush();

    let commands = s.device().commands();
    let program_at = commands.iter().position(|c| matches!(c, DeviceCommand::UseProgram(_))).unwrap();
    let uniform_at = commands.iter().position(|c| matches!(c, DeviceCommand::Uniform { .. })).unwrap();
    let draw_at = commands.iter().position(|c| matches!(c, DeviceCommand::Draw(_))).unwrap();
    assert!(program_at < uniform_at && uniform_at < draw_at);

    let DeviceCommand::Uniform { location, kind, count, data } = &commands[uniform_at] else {
        unreachable!();
    };
    assert_eq!((*location, *kind, *count), (1, UniformType::Vec4, 1));
    let green: f32 = bytemuck::pod_read_unaligned(&data[4..8]);
    assert_relative_eq!(green, 0.5);
}

#[test]
fn test_redundant_state_is_not_resent() {
    let mut s = scene();
    for _ in 0..3 {
        s.gfx.queue.set_state(RenderState::sprite());
        s.quad(0, 0);
    }
    s.gfx.queue.set_state(RenderState::sprite().with_depth_test(DepthTest::Less));
    s.quad(0, 1);
    s.gfx.flush();

    let stats = *s.gfx.queue.last_frame();
    assert_eq!(stats.draws, 4);
    assert_eq!(stats.state_changes, 2);
    assert_eq!(stats.program_changes, 1);
    assert_eq!(stats.view_changes, 1);

    let programs = s
        .device()
        .commands()
        .iter()
        .filter(|c| matches!(c, DeviceCommand::UseProgram(_)))
        .count();
    assert_eq!(programs, 1);
}

#[test]
fn test_blend_bucket_groups_draws() {
    let mut s = scene();
    s.gfx.queue.set_state(RenderState::new().with_blend(BlendMode::Additive));
    s.quad(0, 0);
    s.gfx.queue.set_state(RenderState::new().with_blend(BlendMode::Disable));
    s.quad(0, 0);
    s.gfx.flush();

    let blends: Vec<_> = s
        .device()
        .commands()
        .iter()
        .filter_map(|c| match c {
            DeviceCommand::State(state) => state.blend,
            _ => None,
        })
        .collect();
    assert_eq!(blends, vec![BlendMode::Disable, BlendMode::Additive]);
}

#[test]
fn test_freed_resource_draw_is_skipped() {
    let mut s = scene();
    s.quad(0, 0);
    s.gfx.resources.free(s.ib);
    s.quad(0, 1);
    assert_eq!(s.gfx.flush(), 2);

    assert!(s.draws().is_empty());
    assert_eq!(s.gfx.queue.last_frame().skipped, 2);
}

#[test]
fn test_out_of_range_draws_are_skipped() {
    let mut s = scene();
    s.gfx.queue.set_index_buffer(s.ib, 4, 6);
    s.gfx.queue.set_vertex_buffer(0, s.vb, 0, 4);
    s.gfx.queue.submit(0, s.shader, 0).unwrap();

    s.gfx.queue.set_index_buffer(s.ib, 0, 6);
    s.gfx.queue.set_vertex_buffer(0, s.vb, 2, 100);
    s.gfx.queue.submit(0, s.shader, 1).unwrap();

    s.gfx.queue.set_vertex_buffer(0, s.vb, 5, 0);
    s.gfx.queue.submit(0, s.shader, 2).unwrap();

    s.gfx.queue.set_index_buffer(s.ib, 4, 2);
    s.gfx.queue.set_vertex_buffer(0, s.vb, 0, 0);
    s.gfx.queue.submit(0, s.shader, 3).unwrap();
    assert_eq!(s.gfx.flush(), 4);

    let draws = s.draws();
    assert_eq!(draws.len(), 1);
    assert_eq!(draws[0].first_index, 4);
    assert_eq!(draws[0].count, 2);
    assert_eq!(s.gfx.queue.last_frame().skipped, 3);
}

#[test]
fn test_non_indexed_draw_uses_stream_range() {
    let mut s = scene();
    s.gfx.queue.set_state(RenderState::new().with_primitive(Primitive::TriangleStrip));
    s.gfx.queue.set_vertex_buffer(0, s.vb, 1, 3);
    s.gfx.queue.submit(0, s.shader, 0).unwrap();
    s.gfx.flush();

    let draws = s.draws();
    assert_eq!(draws[0].index_buffer, None);
    assert_eq!(draws[0].first_vertex, 1);
    assert_eq!(draws[0].count, 3);
    assert_eq!(draws[0].primitive, Primitive::TriangleStrip);
}

#[test]
fn test_texture_binding() {
    let mut s = scene();
    let image = image::DynamicImage::new_rgba8(4, 4);
    let tex = s.gfx.resources.alloc_texture(&image).unwrap();
    s.gfx.queue.set_texture(0, tex);
    s.quad(0, 0);
    s.gfx.flush();

    let native = s.gfx.resources.texture(tex).unwrap().texture;
    assert_eq!(s.draws()[0].textures[0], Some(native));
}

#[test]
fn test_view_state_applied_with_pixel_ratio() {
    let config = BackendConfig::default().with_frame(FrameConfig::default().with_surface(400, 300, 2.0));
    let mut s = scene_with(config);
    let clear = ViewClear {
        flags: ClearFlags::COLOR | ClearFlags::DEPTH,
        rgba: 0x3030_30FF,
        depth: 1.0,
        stencil: 0,
    };
    s.gfx.queue.set_view_clear(0, clear);
    s.gfx.queue.set_view_scissor(1, 10, 10, 50, 50);
    s.gfx.queue.set_view_viewport(1, 0, 0, 100, 100);
    s.gfx.queue.set_view_transform(1, &Mat4::identity(), &Mat4::new_scaling(0.5));
    s.quad(0, 0);
    s.quad(1, 0);
    s.gfx.flush();

    let commands = s.device().commands();
    let viewports: Vec<Rect> = commands
        .iter()
        .filter_map(|c| match c {
            DeviceCommand::Viewport(rect) => Some(*rect),
            _ => None,
        })
        .collect();
    assert_eq!(viewports, vec![Rect::new(0, 0, 800, 600), Rect::new(0, 0, 200, 200)]);
    assert!(commands.contains(&DeviceCommand::Clear(clear)));
    assert!(commands.contains(&DeviceCommand::Scissor(Some(Rect::new(20, 20, 100, 100)))));

    let projection = commands
        .iter()
        .find_map(|c| match c {
            DeviceCommand::ViewTransform { projection, .. } => Some(*projection),
            _ => None,
        })
        .unwrap();
    assert_relative_eq!(projection[(0, 0)], 0.5);
}

#[test]
fn test_clip_rect_per_draw() {
    let mut s = scene();
    let id = s.gfx.queue.set_scissor(5, 5, 20, 20);
    s.quad(0, 0);
    s.gfx.queue.set_scissor_cached(id);
    s.quad(0, 1);
    s.quad(0, 2);
    s.gfx.flush();

    let scissors: Vec<_> = s
        .device()
        .commands()
        .iter()
        .filter_map(|c| match c {
            DeviceCommand::Scissor(rect) => Some(*rect),
            _ => None,
        })
        .collect();
    // View scissor off, then clip rect, then back to the view scissor
    assert_eq!(scissors, vec![None, Some(Rect::new(5, 5, 20, 20)), None]);
}

#[test]
fn test_frames_are_independent() {
    let mut s = scene();
    s.quad(0, 0);
    s.quad(0, 0);
    assert_eq!(s.gfx.flush(), 2);
    s.gfx.device_mut().clear_commands();

    s.quad(0, 0);
    assert_eq!(s.gfx.flush(), 1);
    assert_eq!(s.draws().len(), 1);
    assert_eq!(s.gfx.queue.arena().position(), 0);
}

#[test]
fn test_batched_quads_through_temp_buffer() {
    let mut s = scene();
    let (quads, _) = s.gfx.shared_index_buffer().unwrap();
    let temp = s.gfx.temp_vertex_buffer(40, STRIDE).unwrap();

    let staged = s.gfx.stack.alloc::<u8>(40 * STRIDE as usize).unwrap();
    staged[0] = 0xAB;
    let bytes = staged.to_vec();
    s.gfx.resources.update_vertex_buffer(temp.handle, 0, &bytes).unwrap();

    s.gfx.queue.set_index_buffer(quads, 0, 60);
    s.gfx.queue.set_vertex_buffer(0, temp.handle, 0, 40);
    s.gfx.queue.submit(0, s.shader, 0).unwrap();
    s.gfx.flush();

    let draws = s.draws();
    assert_eq!(draws[0].count, 60);
    let native = s.gfx.resources.vertex_buffer(temp.handle).unwrap().buffer;
    assert_eq!(s.device().buffer_data(native).unwrap()[0], 0xAB);
}
