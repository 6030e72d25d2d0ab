//! Sprite demo application
//!
//! Drives the backend for a few frames: a batch of animated sprites from a
//! texture atlas, plus a clipped UI panel in a second view. Geometry is staged
//! on the frame stack, uploaded into temp buffers and drawn with the shared
//! quad index buffer.
//!
//! Runs on the recording device by default; build with `--features gpu` to
//! render offscreen through `wgpu`.
//!
//! Usage: `sprite_demo [config.toml|config.ron] [frames]`

use gfx_backend::foundation::logging;
use gfx_backend::prelude::*;
use gfx_backend::render::resources::ResourceStats;
use image::{DynamicImage, Rgba, RgbaImage};
use thiserror::Error;

const SPRITE_VS: &str = "
struct VertexInput {
    @location(0) position: vec2<f32>,
    @location(1) uv: vec2<f32>,
    @location(2) color: u32,
};
struct VertexOutput {
    @builtin(position) clip: vec4<f32>,
    @location(0) uv: vec2<f32>,
    @location(1) color: vec4<f32>,
};
@group(0) @binding(0) var<uniform> proj: mat4x4<f32>;
@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.clip = proj * vec4<f32>(input.position, 0.0, 1.0);
    out.uv = input.uv;
    out.color = unpack4x8unorm(input.color);
    return out;
}";

const SPRITE_FS: &str = "
@group(0) @binding(1) var<uniform> tint: vec4<f32>;
@group(1) @binding(0) var tex: texture_2d<f32>;
@group(1) @binding(1) var tex_sampler: sampler;
@fragment
fn fs_main(@location(0) uv: vec2<f32>, @location(1) color: vec4<f32>) -> @location(0) vec4<f32> {
    return textureSample(tex, tex_sampler, uv) * color * tint;
}";

const DEFAULT_FRAMES: u32 = 3;
const SPRITE_COUNT: usize = 24;
const ATLAS_SIZE: u32 = 64;
const CELL_SIZE: f32 = 32.0;

/// Vertex layout shared by sprites and UI quads
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, bytemuck::Pod, bytemuck::Zeroable)]
struct SpriteVertex {
    position: [f32; 2],
    uv: [f32; 2],
    color: u32,
}

const STRIDE: u16 = std::mem::size_of::<SpriteVertex>() as u16;

#[derive(Debug, Error)]
enum DemoError {
    #[error("render: {0}")]
    Render(#[from] RenderError),

    #[error("frame stack exhausted staging {0} vertices")]
    FrameStackExhausted(usize),

    #[error("atlas region {0} is outside the texture")]
    AtlasRegion(usize),
}

#[derive(Debug, Clone, Copy)]
struct Sprite {
    position: Vec2,
    velocity: Vec2,
    size: f32,
    region: SubTexture,
    color: u32,
}

struct SpriteApp {
    gfx: Graphics,
    shader: Handle,
    u_proj: Handle,
    u_tint: Handle,
    u_tex: Handle,
    atlas: Handle,
    sprites: Vec<Sprite>,
    projection: Mat4,
}

#[cfg(feature = "gpu")]
fn open_device(config: &BackendConfig) -> Result<Box<dyn GraphicsDevice>, DemoError> {
    let surface = Rect::new(0, 0, config.frame.width, config.frame.height).scaled(config.frame.pixel_ratio);
    let device = WgpuDevice::new(u32::from(surface.w), u32::from(surface.h))?;
    Ok(Box::new(device))
}

#[cfg(not(feature = "gpu"))]
#[allow(clippy::unnecessary_wraps)]
fn open_device(_config: &BackendConfig) -> Result<Box<dyn GraphicsDevice>, DemoError> {
    Ok(Box::new(HeadlessDevice::new()))
}

fn checker_atlas() -> DynamicImage {
    let palette = [
        Rgba([230, 80, 60, 255]),
        Rgba([60, 200, 90, 255]),
        Rgba([70, 110, 230, 255]),
        Rgba([240, 210, 70, 255]),
    ];
    let cell = ATLAS_SIZE / 2;
    DynamicImage::ImageRgba8(RgbaImage::from_fn(ATLAS_SIZE, ATLAS_SIZE, |x, y| {
        palette[((y / cell) * 2 + x / cell) as usize]
    }))
}

fn quad(out: &mut [SpriteVertex], x: f32, y: f32, w: f32, h: f32, uv: [f32; 4], color: u32) {
    let [u0, v0, u1, v1] = uv;
    let corners = [
        ([x, y], [u0, v0]),
        ([x + w, y], [u1, v0]),
        ([x + w, y + h], [u1, v1]),
        ([x, y + h], [u0, v1]),
    ];
    for (vertex, (position, uv)) in out.iter_mut().zip(corners) {
        *vertex = SpriteVertex { position, uv, color };
    }
}

impl SpriteApp {
    fn new(config: BackendConfig) -> Result<Self, DemoError> {
        let width = f32::from(config.frame.width);
        let height = f32::from(config.frame.height);
        let device = open_device(&config)?;
        let mut gfx = Graphics::init(config, device)?;

        log::info!("Allocating sprite resources...");
        let shader = gfx.resources.alloc_shader(SPRITE_VS, SPRITE_FS)?;
        let u_proj = gfx.resources.alloc_uniform(shader, "proj", UniformType::Mat4, 1)?;
        let u_tint = gfx.resources.alloc_uniform(shader, "tint", UniformType::Vec4, 1)?;
        let u_tex = gfx.resources.alloc_uniform(shader, "tex", UniformType::Sampler, 1)?;
        let atlas = gfx.resources.alloc_texture(&checker_atlas())?;

        let regions = (0..4)
            .map(|i| {
                let x = (i % 2) as f32 * CELL_SIZE;
                let y = (i / 2) as f32 * CELL_SIZE;
                gfx.resources
                    .sub_texture(atlas, x, y, CELL_SIZE, CELL_SIZE)
                    .ok_or(DemoError::AtlasRegion(i))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let sprites = (0..SPRITE_COUNT)
            .map(|i| Sprite {
                position: Vec2::new((i % 6) as f32 * 70.0 + 20.0, (i / 6) as f32 * 70.0 + 20.0),
                velocity: Vec2::new(((i % 3) as f32 - 1.0) * 4.0, ((i % 5) as f32 - 2.0) * 3.0),
                size: 24.0 + (i % 4) as f32 * 8.0,
                region: regions[i % regions.len()],
                color: 0xFFFF_FFFF,
            })
            .collect();

        gfx.queue.set_view_clear(
            0,
            ViewClear {
                flags: ClearFlags::COLOR | ClearFlags::DEPTH,
                rgba: 0x1020_30FF,
                depth: 1.0,
                stencil: 0,
            },
        );
        let projection = Mat4::new_orthographic(0.0, width, height, 0.0, -1.0, 1.0);
        gfx.queue.set_view_transform(0, &Mat4::identity(), &projection);
        gfx.queue.set_view_viewport(1, 0, 0, width as u16, 40);

        Ok(Self {
            gfx,
            shader,
            u_proj,
            u_tint,
            u_tex,
            atlas,
            sprites,
            projection,
        })
    }

    fn update(&mut self, dt: f32) {
        for sprite in &mut self.sprites {
            sprite.position += sprite.velocity * dt;
            if sprite.position.x < 0.0 || sprite.position.x > 440.0 {
                sprite.velocity.x = -sprite.velocity.x;
            }
            if sprite.position.y < 0.0 || sprite.position.y > 280.0 {
                sprite.velocity.y = -sprite.velocity.y;
            }
        }
    }

    fn set_uniforms(&mut self, tint: [f32; 4]) -> Result<(), DemoError> {
        let queue = &mut self.gfx.queue;
        let resources = &self.gfx.resources;
        queue.set_uniform_slice(resources, self.u_proj, self.projection.as_slice())?;
        queue.set_uniform_value(resources, self.u_tint, &tint)?;
        queue.set_uniform_value(resources, self.u_tex, &0i32)?;
        Ok(())
    }

    /// Stage `sprites` into a temp buffer and submit them as one draw
    fn draw_sprites(&mut self, range: std::ops::Range<usize>, depth: i16) -> Result<(), DemoError> {
        let (quads, _) = self.gfx.shared_index_buffer()?;
        let count = range.len();
        let temp = self.gfx.temp_vertex_buffer((count * 4) as u32, STRIDE)?;

        let staging = self
            .gfx
            .stack
            .alloc::<SpriteVertex>(count * 4)
            .ok_or(DemoError::FrameStackExhausted(count * 4))?;
        let mut live = 0;
        for sprite in &self.sprites[range] {
            if !sprite.region.is_valid(&self.gfx.resources) {
                log::warn!("Sprite region lost its texture, skipping");
                continue;
            }
            let out = &mut staging[live * 4..live * 4 + 4];
            let p = sprite.position;
            quad(out, p.x, p.y, sprite.size, sprite.size, sprite.region.uv(), sprite.color);
            live += 1;
        }
        if live == 0 {
            return Ok(());
        }
        self.gfx
            .resources
            .update_vertex_buffer(temp.handle, 0, bytemuck::cast_slice(&staging[..live * 4]))?;

        self.gfx.queue.set_state(RenderState::sprite());
        self.gfx.queue.set_texture(0, self.atlas);
        self.set_uniforms([1.0, 1.0, 1.0, 1.0])?;
        self.gfx.queue.set_index_buffer(quads, 0, (live * 6) as u16);
        self.gfx.queue.set_vertex_buffer(0, temp.handle, 0, (live * 4) as u16);
        self.gfx.queue.submit(0, self.shader, depth)?;
        Ok(())
    }

    /// A translucent status bar clipped to the left half of view 1
    fn draw_panel(&mut self, frame: u32) -> Result<(), DemoError> {
        let (quads, _) = self.gfx.shared_index_buffer()?;
        let temp = self.gfx.temp_vertex_buffer(4, STRIDE)?;

        let mut vertices = [SpriteVertex::default(); 4];
        let fill = (frame % 10) as f32 * 24.0 + 24.0;
        quad(&mut vertices, 0.0, 0.0, fill, 40.0, [0.0; 4], 0x80FF_FFFF);
        self.gfx
            .resources
            .update_vertex_buffer(temp.handle, 0, bytemuck::cast_slice(&vertices))?;

        self.gfx.queue.set_state(RenderState::new().with_blend(BlendMode::AlphaPremultiplied));
        self.set_uniforms([0.2, 0.2, 0.2, 0.8])?;
        self.gfx.queue.set_scissor(0, 0, 240, 40);
        self.gfx.queue.set_index_buffer(quads, 0, 6);
        self.gfx.queue.set_vertex_buffer(0, temp.handle, 0, 4);
        self.gfx.queue.submit(1, self.shader, 0)?;
        Ok(())
    }

    fn frame(&mut self, frame: u32) -> Result<usize, DemoError> {
        self.update(1.0);

        // Foreground first on purpose: the sort key puts the background (lower depth) ahead
        let half = self.sprites.len() / 2;
        self.draw_sprites(half..self.sprites.len(), 1)?;
        self.draw_sprites(0..half, -1)?;
        self.draw_panel(frame)?;

        let stack_used = self.gfx.stack.used();
        let submitted = self.gfx.flush();
        let stats = self.gfx.queue.last_frame();
        log::info!(
            "frame {}: {} submitted, {} drawn, {} skipped, {} state / {} program changes, {} uniforms, {} bytes staged",
            frame,
            submitted,
            stats.draws,
            stats.skipped,
            stats.state_changes,
            stats.program_changes,
            stats.uniform_uploads,
            stack_used
        );
        Ok(submitted)
    }

    fn report(stats: &ResourceStats) {
        log::info!(
            "resources: {} index / {} vertex buffers, {} textures, {} uniforms, {} shaders",
            stats.index_buffers.live,
            stats.vertex_buffers.live,
            stats.textures.live,
            stats.uniforms.live,
            stats.shaders.live
        );
    }

    fn run(&mut self, frames: u32) -> Result<(), DemoError> {
        for frame in 0..frames {
            self.frame(frame)?;
        }
        Self::report(&self.gfx.resources.stats());
        log::info!("temp buffers: {}, frame stack peak: {} bytes", self.gfx.temps.len(), self.gfx.stack.peak());
        self.gfx.shutdown();
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => BackendConfig::load_from_file(&path)?,
        None => BackendConfig::default(),
    };
    let frames = match args.next() {
        Some(value) => value.parse()?,
        None => DEFAULT_FRAMES,
    };

    logging::init_with_filter(&config.log_level);
    log::info!("Starting sprite demo ({} frames)", frames);

    let mut app = SpriteApp::new(config)?;
    app.run(frames)?;

    log::info!("Sprite demo finished");
    Ok(())
}

#[cfg(all(test, not(feature = "gpu")))]
mod tests {
    use super::*;

    #[test]
    fn test_batch_without_live_sprites_is_not_submitted() {
        let mut app = SpriteApp::new(BackendConfig::default()).unwrap();
        assert!(app.gfx.resources.free(app.atlas));

        let count = app.sprites.len();
        app.draw_sprites(0..count, 0).unwrap();
        assert_eq!(app.gfx.queue.draw_count(), 0);
    }
}
