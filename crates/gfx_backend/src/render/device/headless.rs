//! In-memory device
//!
//! Emulates a device without a GPU: objects live in hash maps, shader sources
//! are scanned for uniform declarations, and every per-frame call is appended
//! to a command log that tests and tools can inspect.

use std::collections::HashMap;

use super::{reflect, BufferKind, GraphicsDevice, NativeId};
use crate::foundation::math::{Mat4, Rect};
use crate::render::resources::UniformType;
use crate::render::state::{Primitive, RenderState};
use crate::render::view::ViewClear;
use crate::render::{RenderError, RenderResult};

/// Bound state captured at the moment of a draw
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawRecord {
    /// Current program
    pub program: Option<NativeId>,
    /// Bound element buffer, `None` for non-indexed draws
    pub index_buffer: Option<NativeId>,
    /// Bound vertex streams
    pub vertex_buffers: [Option<NativeId>; 2],
    /// First vertex of stream 0
    pub first_vertex: u16,
    /// Bound texture stages
    pub textures: [Option<NativeId>; 2],
    /// Topology
    pub primitive: Primitive,
    /// First index (indexed draws only)
    pub first_index: u32,
    /// Index or vertex count
    pub count: u32,
}

/// One recorded device call
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    /// `begin_frame`
    BeginFrame,
    /// `end_frame`
    EndFrame,
    /// `set_viewport`
    Viewport(Rect),
    /// `set_scissor`
    Scissor(Option<Rect>),
    /// `clear`
    Clear(ViewClear),
    /// `set_view_transform`
    ViewTransform {
        /// View matrix
        view: Mat4,
        /// Projection matrix
        projection: Mat4,
    },
    /// `apply_state`
    State(RenderState),
    /// `set_stencil`
    Stencil(u32),
    /// `use_program`
    UseProgram(NativeId),
    /// `upload_uniform`
    Uniform {
        /// Location in the current program
        location: u16,
        /// Value type
        kind: UniformType,
        /// Element count
        count: u8,
        /// Raw payload
        data: Vec<u8>,
    },
    /// A draw call with the state bound at that time
    Draw(DrawRecord),
}

#[derive(Debug)]
struct BufferObject {
    kind: BufferKind,
    data: Vec<u8>,
}

#[derive(Debug)]
struct TextureObject {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

#[derive(Debug)]
struct ProgramObject {
    uniforms: Vec<String>,
}

#[derive(Debug, Default)]
struct Bindings {
    program: Option<NativeId>,
    index_buffer: Option<NativeId>,
    vertex_buffers: [Option<NativeId>; 2],
    first_vertex: u16,
    textures: [Option<NativeId>; 2],
}

/// Device that keeps every object in memory and logs every command
#[derive(Debug)]
pub struct HeadlessDevice {
    next_id: NativeId,
    buffers: HashMap<NativeId, BufferObject>,
    textures: HashMap<NativeId, TextureObject>,
    programs: HashMap<NativeId, ProgramObject>,
    bindings: Bindings,
    commands: Vec<DeviceCommand>,
    fail_allocations: bool,
}

impl HeadlessDevice {
    /// Create an empty device
    pub fn new() -> Self {
        Self {
            next_id: 1,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            programs: HashMap::new(),
            bindings: Bindings::default(),
            commands: Vec::new(),
            fail_allocations: false,
        }
    }

    /// Make every subsequent object creation fail, simulating device memory exhaustion
    pub fn set_fail_allocations(&mut self, fail: bool) {
        self.fail_allocations = fail;
    }

    /// Every command recorded since the last [`HeadlessDevice::clear_commands`]
    pub fn commands(&self) -> &[DeviceCommand] {
        &self.commands
    }

    /// Drop the command log
    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Recorded draws in execution order
    pub fn draws(&self) -> Vec<&DrawRecord> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                DeviceCommand::Draw(record) => Some(record),
                _ => None,
            })
            .collect()
    }

    /// Contents of a live buffer
    pub fn buffer_data(&self, buffer: NativeId) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(|b| b.data.as_slice())
    }

    /// Binding target of a live buffer
    pub fn buffer_kind(&self, buffer: NativeId) -> Option<BufferKind> {
        self.buffers.get(&buffer).map(|b| b.kind)
    }

    /// Texels of a live texture
    pub fn texture_pixels(&self, texture: NativeId) -> Option<&[u8]> {
        self.textures.get(&texture).map(|t| t.pixels.as_slice())
    }

    /// Number of live buffers
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Number of live textures
    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    /// Number of live programs
    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    fn issue_id(&mut self) -> RenderResult<NativeId> {
        if self.fail_allocations {
            return Err(RenderError::Backend("out of device memory".to_string()));
        }
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        Ok(id)
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphicsDevice for HeadlessDevice {
    fn create_buffer(&mut self, kind: BufferKind, size: u32, data: Option<&[u8]>) -> RenderResult<NativeId> {
        let mut contents = vec![0u8; size as usize];
        if let Some(data) = data {
            if data.len() > contents.len() {
                return Err(RenderError::Backend(format!(
                    "initial data of {} bytes exceeds buffer size {}",
                    data.len(),
                    size
                )));
            }
            contents[..data.len()].copy_from_slice(data);
        }
        let id = self.issue_id()?;
        self.buffers.insert(id, BufferObject { kind, data: contents });
        Ok(id)
    }

    fn update_buffer(&mut self, buffer: NativeId, offset: u32, data: &[u8]) -> RenderResult<()> {
        let object = self
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| RenderError::Backend(format!("no buffer {}", buffer)))?;
        let start = offset as usize;
        let end = start + data.len();
        if end > object.data.len() {
            return Err(RenderError::Backend(format!(
                "update [{}, {}) exceeds buffer size {}",
                start,
                end,
                object.data.len()
            )));
        }
        object.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: NativeId) {
        self.buffers.remove(&buffer);
    }

    fn create_texture(&mut self, width: u32, height: u32, rgba: &[u8]) -> RenderResult<NativeId> {
        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected {
            return Err(RenderError::Backend(format!(
                "texture {}x{} expects {} bytes, got {}",
                width,
                height,
                expected,
                rgba.len()
            )));
        }
        let id = self.issue_id()?;
        self.textures.insert(id, TextureObject { width, height, pixels: rgba.to_vec() });
        Ok(id)
    }

    fn update_texture(&mut self, texture: NativeId, x: u32, y: u32, width: u32, height: u32, rgba: &[u8]) -> RenderResult<()> {
        let object = self
            .textures
            .get_mut(&texture)
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
        let row_bytes = width as usize * 4;
        for row in 0..height as usize {
            let dst = ((y as usize + row) * object.width as usize + x as usize) * 4;
            let src = row * row_bytes;
            object.pixels[dst..dst + row_bytes].copy_from_slice(&rgba[src..src + row_bytes]);
        }
        Ok(())
    }

    fn destroy_texture(&mut self, texture: NativeId) {
        self.textures.remove(&texture);
    }

    fn create_program(&mut self, vertex_src: &str, fragment_src: &str) -> RenderResult<NativeId> {
        if vertex_src.trim().is_empty() || fragment_src.trim().is_empty() {
            return Err(RenderError::Backend("empty shader source".to_string()));
        }
        let mut uniforms = reflect::uniform_names(vertex_src);
        for name in reflect::uniform_names(fragment_src) {
            if !uniforms.contains(&name) {
                uniforms.push(name);
            }
        }
        let id = self.issue_id()?;
        self.programs.insert(id, ProgramObject { uniforms });
        Ok(id)
    }

    fn destroy_program(&mut self, program: NativeId) {
        self.programs.remove(&program);
    }

    fn uniform_location(&self, program: NativeId, name: &str) -> Option<u16> {
        self.programs
            .get(&program)?
            .uniforms
            .iter()
            .position(|u| u == name)
            .map(|index| index as u16)
    }

    fn begin_frame(&mut self) {
        self.bindings = Bindings::default();
        self.commands.push(DeviceCommand::BeginFrame);
    }

    fn end_frame(&mut self) {
        self.commands.push(DeviceCommand::EndFrame);
    }

    fn set_viewport(&mut self, rect: Rect) {
        self.commands.push(DeviceCommand::Viewport(rect));
    }

    fn set_scissor(&mut self, rect: Option<Rect>) {
        self.commands.push(DeviceCommand::Scissor(rect));
    }

    fn clear(&mut self, clear: &ViewClear) {
        self.commands.push(DeviceCommand::Clear(*clear));
    }

    fn set_view_transform(&mut self, view: &Mat4, projection: &Mat4) {
        self.commands.push(DeviceCommand::ViewTransform { view: *view, projection: *projection });
    }

    fn apply_state(&mut self, state: &RenderState) {
        self.commands.push(DeviceCommand::State(*state));
    }

    fn set_stencil(&mut self, stencil: u32) {
        self.commands.push(DeviceCommand::Stencil(stencil));
    }

    fn use_program(&mut self, program: NativeId) {
        self.bindings.program = Some(program);
        self.commands.push(DeviceCommand::UseProgram(program));
    }

    fn upload_uniform(&mut self, location: u16, kind: UniformType, count: u8, data: &[u8]) {
        self.commands.push(DeviceCommand::Uniform { location, kind, count, data: data.to_vec() });
    }

    fn bind_texture(&mut self, stage: u8, texture: NativeId) {
        if let Some(slot) = self.bindings.textures.get_mut(stage as usize) {
            *slot = Some(texture);
        }
    }

    fn bind_vertex_buffer(&mut self, stream: u8, buffer: NativeId, _stride: u16, first_vertex: u16) {
        if let Some(slot) = self.bindings.vertex_buffers.get_mut(stream as usize) {
            *slot = Some(buffer);
        }
        if stream == 0 {
            self.bindings.first_vertex = first_vertex;
        }
    }

    fn bind_index_buffer(&mut self, buffer: Option<NativeId>) {
        self.bindings.index_buffer = buffer;
    }

    fn draw_indexed(&mut self, primitive: Primitive, first_index: u32, count: u32) {
        let record = self.record(primitive, first_index, count);
        self.commands.push(DeviceCommand::Draw(record));
    }

    fn draw_arrays(&mut self, primitive: Primitive, count: u32) {
        let mut record = self.record(primitive, 0, count);
        record.index_buffer = None;
        self.commands.push(DeviceCommand::Draw(record));
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

impl HeadlessDevice {
    fn record(&self, primitive: Primitive, first_index: u32, count: u32) -> DrawRecord {
        DrawRecord {
            program: self.bindings.program,
            index_buffer: self.bindings.index_buffer,
            vertex_buffers: self.bindings.vertex_buffers,
            first_vertex: self.bindings.first_vertex,
            textures: self.bindings.textures,
            primitive,
            first_index,
            count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_scanning() {
        let mut device = HeadlessDevice::new();
        let program = device
            .create_program(
                "uniform mat4 proj;\nuniform vec4 tint[4];\nvoid main() {}",
                "  uniform sampler2D tex;\nvoid main() {}",
            )
            .unwrap();
        assert_eq!(device.uniform_location(program, "proj"), Some(0));
        assert_eq!(device.uniform_location(program, "tint"), Some(1));
        assert_eq!(device.uniform_location(program, "tex"), Some(2));
        assert_eq!(device.uniform_location(program, "missing"), None);
    }

    #[test]
    fn test_empty_shader_fails_to_compile() {
        let mut device = HeadlessDevice::new();
        assert!(device.create_program("", "void main() {}").is_err());
        assert_eq!(device.live_programs(), 0);
    }

    #[test]
    fn test_buffer_update_bounds() {
        let mut device = HeadlessDevice::new();
        let buffer = device.create_buffer(BufferKind::Vertex, 8, Some(&[1, 2])).unwrap();
        assert_eq!(device.buffer_data(buffer), Some(&[1, 2, 0, 0, 0, 0, 0, 0][..]));

        device.update_buffer(buffer, 6, &[9, 9]).unwrap();
        assert_eq!(device.buffer_data(buffer).unwrap()[6..], [9, 9]);
        assert!(device.update_buffer(buffer, 7, &[1, 1]).is_err());
    }

    #[test]
    fn test_texture_region_update() {
        let mut device = HeadlessDevice::new();
        let texture = device.create_texture(2, 2, &[0u8; 16]).unwrap();
        device.update_texture(texture, 1, 1, 1, 1, &[255, 0, 0, 255]).unwrap();
        let pixels = device.texture_pixels(texture).unwrap();
        assert_eq!(&pixels[12..16], &[255, 0, 0, 255]);
        assert!(device.update_texture(texture, 2, 0, 1, 1, &[0; 4]).is_err());
    }

    #[test]
    fn test_texture_region_overflow_is_rejected() {
        let mut device = HeadlessDevice::new();
        let texture = device.create_texture(2, 2, &[0u8; 16]).unwrap();
        assert!(device.update_texture(texture, u32::MAX, 0, 2, 1, &[0; 8]).is_err());
        assert!(device.update_texture(texture, 0, u32::MAX, 1, 2, &[0; 8]).is_err());
        assert_eq!(device.texture_pixels(texture), Some(&[0u8; 16][..]));
    }

    #[test]
    fn test_binding_declarations_resolve() {
        let mut device = HeadlessDevice::new();
        let program = device
            .create_program(
                "@group(0) @binding(0) var<uniform> proj: mat4x4<f32>;",
                "@group(1) @binding(0) var tex: texture_2d<f32>;\n@group(1) @binding(1) var tex_sampler: sampler;",
            )
            .unwrap();
        assert_eq!(device.uniform_location(program, "proj"), Some(0));
        assert_eq!(device.uniform_location(program, "tex"), Some(1));
        assert_eq!(device.uniform_location(program, "tex_sampler"), None);
    }

    #[test]
    fn test_failed_allocation_issues_nothing() {
        let mut device = HeadlessDevice::new();
        device.set_fail_allocations(true);
        assert!(device.create_texture(1, 1, &[0; 4]).is_err());
        assert_eq!(device.live_textures(), 0);
    }
}
