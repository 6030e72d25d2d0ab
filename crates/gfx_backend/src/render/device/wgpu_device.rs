//! wgpu device
//!
//! Drives a real GPU through `wgpu`, rendering into an offscreen color and
//! depth-stencil target. The immediate-mode device calls made by the render
//! context are recorded into a frame list; `end_frame` resolves pipelines and
//! bind groups, then encodes one render pass per view clear and submits.
//!
//! Programs follow the binding convention of [`super::reflect`]. The uniforms
//! named `u_view` and `u_proj` are filled from the current view transform.
//!
//! Clears apply to the whole target, not just the viewport.

use std::collections::HashMap;
use std::num::NonZeroU64;
use std::ops::Range;

use wgpu::util::DeviceExt;

use super::reflect::{self, Reflection, TEXTURE_LOCATION_BASE};
use super::{BufferKind, GraphicsDevice, NativeId};
use crate::foundation::math::{Mat4, Rect};
use crate::render::resources::UniformType;
use crate::render::state::{BlendFactor, BlendMode, DepthTest, Primitive, RenderState, WriteMask};
use crate::render::view::{ClearFlags, ViewClear};
use crate::render::{RenderError, RenderResult};

/// Color format of the offscreen target
pub const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Depth-stencil format of the offscreen target
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24PlusStencil8;

const VIEW_UNIFORM: &str = "u_view";
const PROJECTION_UNIFORM: &str = "u_proj";

#[derive(Debug)]
struct GpuBuffer {
    buffer: wgpu::Buffer,
    shadow: Vec<u8>,
}

#[derive(Debug)]
struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

#[derive(Debug)]
struct GpuProgram {
    vertex: wgpu::ShaderModule,
    fragment: wgpu::ShaderModule,
    uniform_layout: wgpu::BindGroupLayout,
    texture_layout: wgpu::BindGroupLayout,
    layout: wgpu::PipelineLayout,
    reflection: Reflection,
    values: HashMap<u32, Vec<u8>>,
}

/// Everything that selects a distinct render pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: NativeId,
    state: u64,
    strides: [u16; 2],
    stencil_test: bool,
}

#[derive(Debug)]
struct PendingDraw {
    key: PipelineKey,
    viewport: Rect,
    scissor: Option<Rect>,
    stencil: u32,
    uniforms: Vec<(u32, u64, u64)>,
    textures: Vec<(u8, Option<NativeId>)>,
    streams: [Option<(NativeId, u64)>; 2],
    index_buffer: Option<NativeId>,
    range: Range<u32>,
}

#[derive(Debug)]
enum FrameOp {
    Clear(ViewClear),
    Draw(PendingDraw),
}

#[derive(Debug, Default)]
struct Bindings {
    viewport: Rect,
    scissor: Option<Rect>,
    state: RenderState,
    stencil: u32,
    program: Option<NativeId>,
    textures: [Option<NativeId>; 2],
    streams: [Option<(NativeId, u16, u16)>; 2],
    index_buffer: Option<NativeId>,
    view_transform: Option<(Mat4, Mat4)>,
}

/// Device backed by `wgpu`
#[derive(Debug)]
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    target: wgpu::Texture,
    target_view: wgpu::TextureView,
    depth: wgpu::Texture,
    depth_view: wgpu::TextureView,
    width: u32,
    height: u32,
    uniform_alignment: u64,
    sampler: wgpu::Sampler,
    blank_texture: GpuTexture,
    next_id: NativeId,
    buffers: HashMap<NativeId, GpuBuffer>,
    textures: HashMap<NativeId, GpuTexture>,
    programs: HashMap<NativeId, GpuProgram>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    bindings: Bindings,
    ops: Vec<FrameOp>,
    uniform_data: Vec<u8>,
}

impl WgpuDevice {
    /// Open the default adapter and create a `width` x `height` offscreen target
    pub fn new(width: u32, height: u32) -> RenderResult<Self> {
        pollster::block_on(Self::init(width, height))
    }

    async fn init(width: u32, height: u32) -> RenderResult<Self> {
        if width == 0 || height == 0 {
            return Err(RenderError::InvalidArgument(format!("target size {}x{}", width, height)));
        }
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| RenderError::Backend(format!("no GPU adapter: {}", e)))?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("gfx_backend device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: Default::default(),
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|e| RenderError::Backend(format!("failed to open device: {}", e)))?;
        device.on_uncaptured_error(Box::new(|error: wgpu::Error| log::error!("wgpu: {}", error)));

        let info = adapter.get_info();
        log::info!("wgpu device on {} ({:?})", info.name, info.backend);

        let color_usage = wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::TEXTURE_BINDING;
        let (target, target_view) = Self::attachment(&device, width, height, TARGET_FORMAT, color_usage);
        let (depth, depth_view) =
            Self::attachment(&device, width, height, DEPTH_FORMAT, wgpu::TextureUsages::RENDER_ATTACHMENT);
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("texture sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        let blank_texture = Self::upload_texture(&device, &queue, 1, 1, &[0xFF; 4]);
        let uniform_alignment = u64::from(device.limits().min_uniform_buffer_offset_alignment);

        Ok(Self {
            device,
            queue,
            target,
            target_view,
            depth,
            depth_view,
            width,
            height,
            uniform_alignment,
            sampler,
            blank_texture,
            next_id: 1,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            programs: HashMap::new(),
            pipelines: HashMap::new(),
            bindings: Bindings::default(),
            ops: Vec::new(),
            uniform_data: Vec::new(),
        })
    }

    /// The `wgpu` device, for applications that add their own passes
    pub const fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// The `wgpu` queue
    pub const fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Offscreen color target every frame renders into
    pub const fn target(&self) -> &wgpu::Texture {
        &self.target
    }

    /// Depth-stencil attachment paired with [`WgpuDevice::target`]
    pub const fn depth_target(&self) -> &wgpu::Texture {
        &self.depth
    }

    /// Target size in pixels
    pub const fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Number of render pipelines built so far
    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    fn attachment(
        device: &wgpu::Device,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
    ) -> (wgpu::Texture, wgpu::TextureView) {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("render target"),
            size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        (texture, view)
    }

    fn upload_texture(device: &wgpu::Device, queue: &wgpu::Queue, width: u32, height: u32, rgba: &[u8]) -> GpuTexture {
        let size = wgpu::Extent3d { width, height, depth_or_array_layers: 1 };
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("texture"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        Self::write_region(queue, &texture, 0, 0, width, height, rgba);
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        GpuTexture { texture, view, width, height }
    }

    fn write_region(queue: &wgpu::Queue, texture: &wgpu::Texture, x: u32, y: u32, width: u32, height: u32, rgba: &[u8]) {
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x, y, z: 0 },
                aspect: wgpu::TextureAspect::All,
            },
            rgba,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        );
    }

    fn issue_id(&mut self) -> NativeId {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }

    /// Run `create` inside a validation error scope
    fn validated<T>(&self, what: &str, create: impl FnOnce(&wgpu::Device) -> T) -> RenderResult<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create(&self.device);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(error) => Err(RenderError::Backend(format!("{}: {}", what, error))),
            None => Ok(value),
        }
    }

    fn build_program(&self, vertex_src: &str, fragment_src: &str) -> RenderResult<GpuProgram> {
        let reflection = Reflection::parse(vertex_src, fragment_src)?;
        let (vertex, fragment) = self.validated("shader compilation", |device| {
            let module = |label: &str, source: &str| {
                device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(label),
                    source: wgpu::ShaderSource::Wgsl(source.to_owned().into()),
                })
            };
            (module("vertex shader", vertex_src), module("fragment shader", fragment_src))
        })?;

        let visibility = wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT;
        let uniform_entries: Vec<_> = reflection
            .uniforms
            .iter()
            .map(|uniform| wgpu::BindGroupLayoutEntry {
                binding: uniform.binding,
                visibility,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: NonZeroU64::new(uniform.size),
                },
                count: None,
            })
            .collect();
        let texture_entries: Vec<_> = reflection
            .textures
            .iter()
            .flat_map(|texture| {
                let binding = u32::from(texture.stage) * 2;
                [
                    wgpu::BindGroupLayoutEntry {
                        binding,
                        visibility,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: binding + 1,
                        visibility,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                ]
            })
            .collect();

        let (uniform_layout, texture_layout, layout) = self.validated("program layout", |device| {
            let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("uniform layout"),
                entries: &uniform_entries,
            });
            let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("texture layout"),
                entries: &texture_entries,
            });
            let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("program layout"),
                bind_group_layouts: &[&uniform_layout, &texture_layout],
                push_constant_ranges: &[],
            });
            (uniform_layout, texture_layout, layout)
        })?;

        let values = reflection
            .uniforms
            .iter()
            .map(|uniform| (uniform.binding, vec![0u8; uniform.size as usize]))
            .collect();

        Ok(GpuProgram {
            vertex,
            fragment,
            uniform_layout,
            texture_layout,
            layout,
            reflection,
            values,
        })
    }

    fn build_pipeline(&self, key: &PipelineKey) -> RenderResult<wgpu::RenderPipeline> {
        let program = self
            .programs
            .get(&key.program)
            .ok_or_else(|| RenderError::Backend(format!("no program {}", key.program)))?;
        let state = RenderState::decode(key.state);

        let attributes: [Vec<wgpu::VertexAttribute>; 2] = [0u8, 1].map(|stream| {
            program
                .reflection
                .attributes
                .iter()
                .filter(|a| a.stream == stream)
                .map(|a| wgpu::VertexAttribute {
                    format: vertex_format(a.kind),
                    offset: a.offset,
                    shader_location: a.location,
                })
                .collect()
        });
        let buffers: Vec<_> = attributes
            .iter()
            .zip(key.strides)
            .take_while(|(attributes, _)| !attributes.is_empty())
            .map(|(attributes, stride)| wgpu::VertexBufferLayout {
                array_stride: u64::from(stride),
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes,
            })
            .collect();

        let stencil_face = if key.stencil_test {
            wgpu::StencilFaceState {
                compare: wgpu::CompareFunction::Equal,
                fail_op: wgpu::StencilOperation::Keep,
                depth_fail_op: wgpu::StencilOperation::Keep,
                pass_op: wgpu::StencilOperation::Keep,
            }
        } else {
            wgpu::StencilFaceState::IGNORE
        };
        let topology = topology(state.primitive);
        let strip_index_format = matches!(
            topology,
            wgpu::PrimitiveTopology::TriangleStrip | wgpu::PrimitiveTopology::LineStrip
        )
        .then_some(wgpu::IndexFormat::Uint16);

        self.validated("render pipeline", |device| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("draw pipeline"),
                layout: Some(&program.layout),
                vertex: wgpu::VertexState {
                    module: &program.vertex,
                    entry_point: Some("vs_main"),
                    buffers: &buffers,
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &program.fragment,
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: TARGET_FORMAT,
                        blend: state.blend.and_then(blend_state),
                        write_mask: color_writes(state.write),
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology,
                    strip_index_format,
                    ..Default::default()
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: state.write.contains(WriteMask::DEPTH),
                    depth_compare: state.depth_test.map_or(wgpu::CompareFunction::Always, compare_function),
                    stencil: wgpu::StencilState {
                        front: stencil_face,
                        back: stencil_face,
                        read_mask: 0xFF,
                        write_mask: 0x00,
                    },
                    bias: Default::default(),
                }),
                multisample: Default::default(),
                multiview: None,
                cache: None,
            })
        })
    }

    /// Snapshot the bound state into a pending draw
    fn record(&mut self, range: Range<u32>, indexed: bool) {
        let Some(program_id) = self.bindings.program else {
            log::warn!("Draw without a program, dropped");
            return;
        };
        let Some(program) = self.programs.get(&program_id) else {
            log::warn!("Draw with unknown program {}, dropped", program_id);
            return;
        };

        let mut strides = [0u16; 2];
        let mut streams = [None; 2];
        for stream in 0..2u8 {
            let needed = program.reflection.stream_size(stream);
            if needed == 0 {
                continue;
            }
            let Some((buffer, stride, first_vertex)) = self.bindings.streams[usize::from(stream)] else {
                log::warn!("Program {} reads vertex stream {} but none is bound, dropped", program_id, stream);
                return;
            };
            if u64::from(stride) < needed {
                log::warn!("Stream {} stride {} is smaller than the {} byte vertex input", stream, stride, needed);
                return;
            }
            strides[usize::from(stream)] = stride;
            streams[usize::from(stream)] = Some((buffer, u64::from(first_vertex) * u64::from(stride)));
        }

        let (view, projection) = self.bindings.view_transform.unzip();
        let mut uniforms = Vec::with_capacity(program.reflection.uniforms.len());
        for uniform in &program.reflection.uniforms {
            let offset = reflect::round_up(self.uniform_data.len() as u64, self.uniform_alignment);
            self.uniform_data.resize(offset as usize, 0);
            let matrix = match uniform.name.as_str() {
                VIEW_UNIFORM => view.as_ref(),
                PROJECTION_UNIFORM => projection.as_ref(),
                _ => None,
            };
            match (matrix, program.values.get(&uniform.binding)) {
                (Some(matrix), _) => {
                    let mut bytes = bytemuck::cast_slice::<f32, u8>(matrix.as_slice()).to_vec();
                    bytes.resize(uniform.size as usize, 0);
                    self.uniform_data.extend_from_slice(&bytes);
                }
                (None, Some(value)) => self.uniform_data.extend_from_slice(value),
                (None, None) => self.uniform_data.resize((offset + uniform.size) as usize, 0),
            }
            uniforms.push((uniform.binding, offset, uniform.size));
        }

        let textures = program
            .reflection
            .textures
            .iter()
            .map(|t| (t.stage, self.bindings.textures.get(usize::from(t.stage)).copied().flatten()))
            .collect();

        self.ops.push(FrameOp::Draw(PendingDraw {
            key: PipelineKey {
                program: program_id,
                state: self.bindings.state.encode(),
                strides,
                stencil_test: self.bindings.stencil != 0,
            },
            viewport: self.bindings.viewport,
            scissor: self.bindings.scissor,
            stencil: self.bindings.stencil,
            uniforms,
            textures,
            streams,
            index_buffer: if indexed { self.bindings.index_buffer } else { None },
            range,
        }));
    }

    fn bind_groups(&self, draw: &PendingDraw, uniform_buffer: Option<&wgpu::Buffer>) -> Option<[wgpu::BindGroup; 2]> {
        let program = self.programs.get(&draw.key.program)?;

        let mut uniform_entries = Vec::with_capacity(draw.uniforms.len());
        for &(binding, offset, size) in &draw.uniforms {
            uniform_entries.push(wgpu::BindGroupEntry {
                binding,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: uniform_buffer?,
                    offset,
                    size: NonZeroU64::new(size),
                }),
            });
        }

        let mut texture_entries = Vec::with_capacity(draw.textures.len() * 2);
        for &(stage, texture) in &draw.textures {
            let view = texture
                .and_then(|id| self.textures.get(&id))
                .map_or(&self.blank_texture.view, |texture| &texture.view);
            let binding = u32::from(stage) * 2;
            texture_entries.push(wgpu::BindGroupEntry {
                binding,
                resource: wgpu::BindingResource::TextureView(view),
            });
            texture_entries.push(wgpu::BindGroupEntry {
                binding: binding + 1,
                resource: wgpu::BindingResource::Sampler(&self.sampler),
            });
        }

        let uniforms = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("uniform bind group"),
            layout: &program.uniform_layout,
            entries: &uniform_entries,
        });
        let textures = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("texture bind group"),
            layout: &program.texture_layout,
            entries: &texture_entries,
        });
        Some([uniforms, textures])
    }

    fn clamp_rect(&self, rect: Rect) -> (u32, u32, u32, u32) {
        let x = u32::from(rect.x).min(self.width);
        let y = u32::from(rect.y).min(self.height);
        let w = u32::from(rect.w).min(self.width - x);
        let h = u32::from(rect.h).min(self.height - y);
        (x, y, w, h)
    }

    fn submit_frame(&mut self) {
        let ops = std::mem::take(&mut self.ops);
        let uniform_data = std::mem::take(&mut self.uniform_data);
        if ops.is_empty() {
            return;
        }

        for op in &ops {
            let FrameOp::Draw(draw) = op else { continue };
            if self.pipelines.contains_key(&draw.key) {
                continue;
            }
            match self.build_pipeline(&draw.key) {
                Ok(pipeline) => {
                    self.pipelines.insert(draw.key, pipeline);
                }
                Err(e) => log::warn!("Pipeline for program {} failed: {}", draw.key.program, e),
            }
        }

        let uniform_buffer = (!uniform_data.is_empty()).then(|| {
            self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("frame uniforms"),
                contents: &uniform_data,
                usage: wgpu::BufferUsages::UNIFORM,
            })
        });
        let bind_groups: Vec<_> = ops
            .iter()
            .map(|op| match op {
                FrameOp::Draw(draw) => self.bind_groups(draw, uniform_buffer.as_ref()),
                FrameOp::Clear(_) => None,
            })
            .collect();

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("frame encoder") });

        let mut start = 0;
        while start < ops.len() {
            let (clear, first_draw) = match &ops[start] {
                FrameOp::Clear(clear) => (Some(*clear), start + 1),
                FrameOp::Draw(_) => (None, start),
            };
            let end = ops[first_draw..]
                .iter()
                .position(|op| matches!(op, FrameOp::Clear(_)))
                .map_or(ops.len(), |offset| first_draw + offset);

            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("view pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.target_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: color_load(clear.as_ref()),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: depth_load(clear.as_ref()),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: Some(wgpu::Operations {
                        load: stencil_load(clear.as_ref()),
                        store: wgpu::StoreOp::Store,
                    }),
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            for (op, groups) in ops[first_draw..end].iter().zip(&bind_groups[first_draw..end]) {
                let (FrameOp::Draw(draw), Some(groups)) = (op, groups) else {
                    continue;
                };
                let Some(pipeline) = self.pipelines.get(&draw.key) else {
                    continue;
                };
                let (x, y, w, h) = self.clamp_rect(if draw.viewport.is_zero() {
                    Rect::new(0, 0, u16::MAX, u16::MAX)
                } else {
                    draw.viewport
                });
                if w == 0 || h == 0 {
                    continue;
                }

                pass.set_pipeline(pipeline);
                pass.set_viewport(x as f32, y as f32, w as f32, h as f32, 0.0, 1.0);
                let (sx, sy, sw, sh) = draw.scissor.map_or((0, 0, self.width, self.height), |r| self.clamp_rect(r));
                pass.set_scissor_rect(sx, sy, sw, sh);
                pass.set_stencil_reference(draw.stencil & 0xFF);
                pass.set_bind_group(0, &groups[0], &[]);
                pass.set_bind_group(1, &groups[1], &[]);

                let mut complete = true;
                for (slot, stream) in draw.streams.iter().enumerate() {
                    if let Some((id, offset)) = stream {
                        match self.buffers.get(id) {
                            Some(buffer) if *offset < buffer.buffer.size() => {
                                pass.set_vertex_buffer(slot as u32, buffer.buffer.slice(*offset..));
                            }
                            _ => complete = false,
                        }
                    }
                }
                if !complete {
                    log::warn!("Draw references a missing vertex buffer, dropped");
                    continue;
                }

                match draw.index_buffer {
                    Some(id) => {
                        let Some(buffer) = self.buffers.get(&id) else {
                            log::warn!("Draw references missing index buffer {}, dropped", id);
                            continue;
                        };
                        pass.set_index_buffer(buffer.buffer.slice(..), wgpu::IndexFormat::Uint16);
                        pass.draw_indexed(draw.range.clone(), 0, 0..1);
                    }
                    None => pass.draw(draw.range.clone(), 0..1),
                }
            }
            drop(pass);
            start = end;
        }

        self.queue.submit(std::iter::once(encoder.finish()));
    }
}

impl GraphicsDevice for WgpuDevice {
    fn create_buffer(&mut self, kind: BufferKind, size: u32, data: Option<&[u8]>) -> RenderResult<NativeId> {
        let mut shadow = vec![0u8; reflect::round_up(u64::from(size.max(4)), 4) as usize];
        if let Some(data) = data {
            if data.len() > size as usize {
                return Err(RenderError::Backend(format!(
                    "initial data of {} bytes exceeds buffer size {}",
                    data.len(),
                    size
                )));
            }
            shadow[..data.len()].copy_from_slice(data);
        }
        let usage = match kind {
            BufferKind::Index => wgpu::BufferUsages::INDEX,
            BufferKind::Vertex => wgpu::BufferUsages::VERTEX,
        } | wgpu::BufferUsages::COPY_DST;
        let buffer = self.validated("buffer allocation", |device| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(match kind {
                    BufferKind::Index => "index buffer",
                    BufferKind::Vertex => "vertex buffer",
                }),
                contents: &shadow,
                usage,
            })
        })?;
        let id = self.issue_id();
        self.buffers.insert(id, GpuBuffer { buffer, shadow });
        Ok(id)
    }

    fn update_buffer(&mut self, buffer: NativeId, offset: u32, data: &[u8]) -> RenderResult<()> {
        let object = self
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| RenderError::Backend(format!("no buffer {}", buffer)))?;
        let start = offset as usize;
        let end = start
            .checked_add(data.len())
            .filter(|&end| end <= object.shadow.len())
            .ok_or_else(|| RenderError::Backend(format!("update at {} exceeds buffer size {}", start, object.shadow.len())))?;
        object.shadow[start..end].copy_from_slice(data);

        // Queue writes must be 4-byte aligned; widen to the enclosing words
        let aligned_start = start & !3;
        let aligned_end = (reflect::round_up(end as u64, 4) as usize).min(object.shadow.len());
        self.queue
            .write_buffer(&object.buffer, aligned_start as u64, &object.shadow[aligned_start..aligned_end]);
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: NativeId) {
        if let Some(object) = self.buffers.remove(&buffer) {
            object.buffer.destroy();
        }
    }

    fn create_texture(&mut self, width: u32, height: u32, rgba: &[u8]) -> RenderResult<NativeId> {
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 || rgba.len() != expected {
            return Err(RenderError::Backend(format!(
                "texture {}x{} expects {} bytes, got {}",
                width,
                height,
                expected,
                rgba.len()
            )));
        }
        let texture = self.validated("texture allocation", |device| {
            Self::upload_texture(device, &self.queue, width, height, rgba)
        })?;
        let id = self.issue_id();
        self.textures.insert(id, texture);
        Ok(id)
    }

    fn update_texture(&mut self, texture: NativeId, x: u32, y: u32, width: u32, height: u32, rgba: &[u8]) -> RenderResult<()> {
        let object = self
            .textures
            .get(&texture)
            .ok_or_else(|| RenderError::Backend(format!("no texture {}", texture)))?;
        let outside = |start: u32, extent: u32, limit: u32| start.checked_add(extent).map_or(true, |end| end > limit);
        if outside(x, width, object.width) || outside(y, height, object.height) {
            return Err(RenderError::Backend(format!(
                "region {}x{} at ({}, {}) exceeds texture {}x{}",
                width, height, x, y, object.width, object.height
            )));
        }
        if rgba.len() != width as usize * height as usize * 4 {
            return Err(RenderError::Backend("texel data does not match region".to_string()));
        }
        Self::write_region(&self.queue, &object.texture, x, y, width, height, rgba);
        Ok(())
    }

    fn destroy_texture(&mut self, texture: NativeId) {
        if let Some(object) = self.textures.remove(&texture) {
            object.texture.destroy();
        }
    }

    fn create_program(&mut self, vertex_src: &str, fragment_src: &str) -> RenderResult<NativeId> {
        let program = self.build_program(vertex_src, fragment_src)?;
        let id = self.issue_id();
        self.programs.insert(id, program);
        Ok(id)
    }

    fn destroy_program(&mut self, program: NativeId) {
        self.programs.remove(&program);
        self.pipelines.retain(|key, _| key.program != program);
    }

    fn uniform_location(&self, program: NativeId, name: &str) -> Option<u16> {
        self.programs.get(&program)?.reflection.location(name)
    }

    fn begin_frame(&mut self) {
        self.bindings = Bindings::default();
        self.ops.clear();
        self.uniform_data.clear();
    }

    fn end_frame(&mut self) {
        self.submit_frame();
    }

    fn set_viewport(&mut self, rect: Rect) {
        self.bindings.viewport = rect;
    }

    fn set_scissor(&mut self, rect: Option<Rect>) {
        self.bindings.scissor = rect;
    }

    fn clear(&mut self, clear: &ViewClear) {
        self.ops.push(FrameOp::Clear(*clear));
    }

    fn set_view_transform(&mut self, view: &Mat4, projection: &Mat4) {
        self.bindings.view_transform = Some((*view, *projection));
    }

    fn apply_state(&mut self, state: &RenderState) {
        self.bindings.state = *state;
    }

    fn set_stencil(&mut self, stencil: u32) {
        self.bindings.stencil = stencil;
    }

    fn use_program(&mut self, program: NativeId) {
        self.bindings.program = Some(program);
    }

    fn upload_uniform(&mut self, location: u16, kind: UniformType, count: u8, data: &[u8]) {
        if location >= TEXTURE_LOCATION_BASE {
            // Texture stages are fixed by their binding
            log::trace!("Ignoring sampler unit upload for location {:#x}", location);
            return;
        }
        let Some(program) = self.bindings.program.and_then(|id| self.programs.get_mut(&id)) else {
            log::warn!("Uniform upload without a program");
            return;
        };
        let Some(value) = program.values.get_mut(&u32::from(location)) else {
            log::warn!("Uniform location {} not in program", location);
            return;
        };
        let bytes = reflect::uniform_layout(kind, count, data);
        let len = bytes.len().min(value.len());
        value[..len].copy_from_slice(&bytes[..len]);
    }

    fn bind_texture(&mut self, stage: u8, texture: NativeId) {
        if let Some(slot) = self.bindings.textures.get_mut(usize::from(stage)) {
            *slot = Some(texture);
        }
    }

    fn bind_vertex_buffer(&mut self, stream: u8, buffer: NativeId, stride: u16, first_vertex: u16) {
        if let Some(slot) = self.bindings.streams.get_mut(usize::from(stream)) {
            *slot = Some((buffer, stride, first_vertex));
        }
    }

    fn bind_index_buffer(&mut self, buffer: Option<NativeId>) {
        self.bindings.index_buffer = buffer;
    }

    fn draw_indexed(&mut self, _primitive: Primitive, first_index: u32, count: u32) {
        self.record(first_index..first_index.saturating_add(count), true);
    }

    fn draw_arrays(&mut self, _primitive: Primitive, count: u32) {
        self.record(0..count, false);
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

fn vertex_format(kind: reflect::AttributeKind) -> wgpu::VertexFormat {
    use reflect::AttributeKind;
    match kind {
        AttributeKind::Float => wgpu::VertexFormat::Float32,
        AttributeKind::Float2 => wgpu::VertexFormat::Float32x2,
        AttributeKind::Float3 => wgpu::VertexFormat::Float32x3,
        AttributeKind::Float4 => wgpu::VertexFormat::Float32x4,
        AttributeKind::Uint => wgpu::VertexFormat::Uint32,
        AttributeKind::Uint2 => wgpu::VertexFormat::Uint32x2,
        AttributeKind::Uint4 => wgpu::VertexFormat::Uint32x4,
        AttributeKind::Sint => wgpu::VertexFormat::Sint32,
    }
}

const fn topology(primitive: Primitive) -> wgpu::PrimitiveTopology {
    match primitive {
        Primitive::Triangles => wgpu::PrimitiveTopology::TriangleList,
        Primitive::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
        Primitive::Lines => wgpu::PrimitiveTopology::LineList,
        Primitive::LineStrip => wgpu::PrimitiveTopology::LineStrip,
        Primitive::Points => wgpu::PrimitiveTopology::PointList,
    }
}

const fn compare_function(test: DepthTest) -> wgpu::CompareFunction {
    match test {
        DepthTest::Less => wgpu::CompareFunction::Less,
        DepthTest::LessEqual => wgpu::CompareFunction::LessEqual,
        DepthTest::Equal => wgpu::CompareFunction::Equal,
        DepthTest::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
        DepthTest::Greater => wgpu::CompareFunction::Greater,
        DepthTest::NotEqual => wgpu::CompareFunction::NotEqual,
        DepthTest::Never => wgpu::CompareFunction::Never,
        DepthTest::Always => wgpu::CompareFunction::Always,
    }
}

const fn blend_factor(factor: BlendFactor) -> wgpu::BlendFactor {
    match factor {
        BlendFactor::Zero => wgpu::BlendFactor::Zero,
        BlendFactor::One => wgpu::BlendFactor::One,
        BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
        BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
    }
}

fn blend_state(mode: BlendMode) -> Option<wgpu::BlendState> {
    if mode == BlendMode::Disable {
        return None;
    }
    let (src, dst) = mode.factors();
    let component = wgpu::BlendComponent {
        src_factor: blend_factor(src),
        dst_factor: blend_factor(dst),
        operation: wgpu::BlendOperation::Add,
    };
    Some(wgpu::BlendState { color: component, alpha: component })
}

fn color_writes(mask: WriteMask) -> wgpu::ColorWrites {
    let mut writes = wgpu::ColorWrites::empty();
    if mask.contains(WriteMask::RGB) {
        writes |= wgpu::ColorWrites::COLOR;
    }
    if mask.contains(WriteMask::ALPHA) {
        writes |= wgpu::ColorWrites::ALPHA;
    }
    writes
}

fn color_load(clear: Option<&ViewClear>) -> wgpu::LoadOp<wgpu::Color> {
    match clear {
        Some(clear) if clear.flags.contains(ClearFlags::COLOR) => {
            let [r, g, b, a] = clear.color().map(f64::from);
            wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a })
        }
        _ => wgpu::LoadOp::Load,
    }
}

fn depth_load(clear: Option<&ViewClear>) -> wgpu::LoadOp<f32> {
    match clear {
        Some(clear) if clear.flags.contains(ClearFlags::DEPTH) => wgpu::LoadOp::Clear(clear.depth),
        _ => wgpu::LoadOp::Load,
    }
}

fn stencil_load(clear: Option<&ViewClear>) -> wgpu::LoadOp<u32> {
    match clear {
        Some(clear) if clear.flags.contains(ClearFlags::STENCIL) => wgpu::LoadOp::Clear(u32::from(clear.stencil)),
        _ => wgpu::LoadOp::Load,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VS: &str = "
struct VertexInput {
    @location(0) position: vec2<f32>,
    @location(1) uv: vec2<f32>,
    @location(2) color: u32,
};
struct VertexOutput {
    @builtin(position) clip: vec4<f32>,
    @location(0) uv: vec2<f32>,
};
@group(0) @binding(0) var<uniform> u_proj: mat4x4<f32>;
@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.clip = u_proj * vec4<f32>(input.position, 0.0, 1.0);
    out.uv = input.uv;
    return out;
}";

    const FS: &str = "
@group(0) @binding(1) var<uniform> tint: vec4<f32>;
@group(1) @binding(0) var tex: texture_2d<f32>;
@group(1) @binding(1) var tex_sampler: sampler;
@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    return textureSample(tex, tex_sampler, uv) * tint;
}";

    /// Opens a device, or `None` on machines without a usable adapter
    fn device() -> Option<WgpuDevice> {
        WgpuDevice::new(64, 64).ok()
    }

    #[test]
    fn test_blend_presets() {
        assert_eq!(blend_state(BlendMode::Disable), None);
        assert_eq!(
            blend_state(BlendMode::AlphaPremultiplied),
            Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING)
        );
        let additive = blend_state(BlendMode::Additive).unwrap();
        assert_eq!(additive.color.dst_factor, wgpu::BlendFactor::One);
    }

    #[test]
    fn test_state_conversions() {
        assert_eq!(color_writes(WriteMask::RGB | WriteMask::ALPHA), wgpu::ColorWrites::ALL);
        assert_eq!(color_writes(WriteMask::DEPTH), wgpu::ColorWrites::empty());
        assert_eq!(topology(Primitive::LineStrip), wgpu::PrimitiveTopology::LineStrip);
        assert_eq!(compare_function(DepthTest::LessEqual), wgpu::CompareFunction::LessEqual);
    }

    #[test]
    fn test_clear_load_ops() {
        let clear = ViewClear { flags: ClearFlags::DEPTH, rgba: 0xFF00_00FF, depth: 0.5, stencil: 3 };
        assert_eq!(color_load(Some(&clear)), wgpu::LoadOp::Load);
        assert_eq!(depth_load(Some(&clear)), wgpu::LoadOp::Clear(0.5));
        assert_eq!(stencil_load(None), wgpu::LoadOp::Load);
    }

    #[test]
    fn test_program_reflection_on_gpu() {
        let Some(mut device) = device() else { return };
        let program = device.create_program(VS, FS).unwrap();
        assert_eq!(device.uniform_location(program, "u_proj"), Some(0));
        assert_eq!(device.uniform_location(program, "tint"), Some(1));
        assert_eq!(device.uniform_location(program, "tex"), Some(TEXTURE_LOCATION_BASE));
        assert!(device.create_program("fn broken(", FS).is_err());
    }

    #[test]
    fn test_frame_builds_one_pipeline() {
        let Some(mut device) = device() else { return };
        let program = device.create_program(VS, FS).unwrap();
        let vertices = device.create_buffer(BufferKind::Vertex, 80, Some(&[0; 80])).unwrap();
        let indices = device
            .create_buffer(BufferKind::Index, 12, Some(bytemuck::cast_slice(&[0u16, 1, 2, 0, 2, 3])))
            .unwrap();
        device.update_buffer(indices, 2, &[1, 0]).unwrap();

        device.begin_frame();
        device.clear(&ViewClear { flags: ClearFlags::COLOR, rgba: 0x0000_00FF, depth: 1.0, stencil: 0 });
        device.apply_state(&RenderState::sprite());
        device.use_program(program);
        device.upload_uniform(1, UniformType::Vec4, 1, &[0; 16]);
        device.bind_vertex_buffer(0, vertices, 20, 0);
        device.bind_index_buffer(Some(indices));
        device.draw_indexed(Primitive::Triangles, 0, 6);
        device.draw_indexed(Primitive::Triangles, 0, 3);
        device.end_frame();

        assert_eq!(device.pipeline_count(), 1);
        device.destroy_program(program);
        assert_eq!(device.pipeline_count(), 0);
    }
}
