//! Graphics device abstraction
//!
//! This module defines the trait the backend drives to create native GPU
//! objects and to execute the sorted draw list. The resource manager owns the
//! device; the render context borrows it during flush.
//!
//! [`HeadlessDevice`] records commands in memory. With the `gpu` feature,
//! `WgpuDevice` renders through `wgpu`.

mod headless;
pub mod reflect;
#[cfg(feature = "gpu")]
mod wgpu_device;

pub use headless::{DeviceCommand, DrawRecord, HeadlessDevice};
#[cfg(feature = "gpu")]
pub use wgpu_device::{WgpuDevice, DEPTH_FORMAT, TARGET_FORMAT};

use crate::foundation::math::{Mat4, Rect};
use crate::render::resources::UniformType;
use crate::render::state::{Primitive, RenderState};
use crate::render::view::ViewClear;
use crate::render::RenderResult;

/// Native object name issued by the device (0 is never issued)
pub type NativeId = u32;

/// Buffer binding target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// Element array
    Index,
    /// Vertex array
    Vertex,
}

/// Native graphics device
///
/// Resource creation returns [`RenderResult`]; per-draw commands are
/// infallible, a device that loses state reports it on the next frame.
pub trait GraphicsDevice {
    /// Create a buffer of `size` bytes, optionally initialised from `data`
    fn create_buffer(&mut self, kind: BufferKind, size: u32, data: Option<&[u8]>) -> RenderResult<NativeId>;

    /// Overwrite part of a buffer
    fn update_buffer(&mut self, buffer: NativeId, offset: u32, data: &[u8]) -> RenderResult<()>;

    /// Release a buffer
    fn destroy_buffer(&mut self, buffer: NativeId);

    /// Upload an RGBA8 texture
    fn create_texture(&mut self, width: u32, height: u32, rgba: &[u8]) -> RenderResult<NativeId>;

    /// Overwrite a region of a texture with RGBA8 texels
    fn update_texture(&mut self, texture: NativeId, x: u32, y: u32, width: u32, height: u32, rgba: &[u8]) -> RenderResult<()>;

    /// Release a texture
    fn destroy_texture(&mut self, texture: NativeId);

    /// Compile and link a program from vertex and fragment source
    fn create_program(&mut self, vertex_src: &str, fragment_src: &str) -> RenderResult<NativeId>;

    /// Release a program
    fn destroy_program(&mut self, program: NativeId);

    /// Location of a named uniform in a linked program
    fn uniform_location(&self, program: NativeId, name: &str) -> Option<u16>;

    /// Called once before the first draw of a flush
    fn begin_frame(&mut self) {}

    /// Called once after the last draw of a flush
    fn end_frame(&mut self) {}

    /// Set the viewport in pixels
    fn set_viewport(&mut self, rect: Rect);

    /// Enable a scissor rectangle in pixels, or disable scissoring
    fn set_scissor(&mut self, rect: Option<Rect>);

    /// Clear the current viewport
    fn clear(&mut self, clear: &ViewClear);

    /// Set the view and projection matrices for subsequent draws
    fn set_view_transform(&mut self, view: &Mat4, projection: &Mat4);

    /// Apply blend, depth, write-mask and topology state
    fn apply_state(&mut self, state: &RenderState);

    /// Set the stencil reference word
    fn set_stencil(&mut self, stencil: u32);

    /// Make a program current
    fn use_program(&mut self, program: NativeId);

    /// Upload `count` values of `kind` to a uniform location of the current program
    fn upload_uniform(&mut self, location: u16, kind: UniformType, count: u8, data: &[u8]);

    /// Bind a texture to a sampler stage
    fn bind_texture(&mut self, stage: u8, texture: NativeId);

    /// Bind a vertex stream starting at `first_vertex`
    fn bind_vertex_buffer(&mut self, stream: u8, buffer: NativeId, stride: u16, first_vertex: u16);

    /// Bind or unbind the element buffer
    fn bind_index_buffer(&mut self, buffer: Option<NativeId>);

    /// Draw `count` indices starting at `first_index`
    fn draw_indexed(&mut self, primitive: Primitive, first_index: u32, count: u32);

    /// Draw `count` vertices from the bound streams
    fn draw_arrays(&mut self, primitive: Primitive, count: u32);

    /// Downcast to the concrete device type
    fn as_any(&self) -> &dyn std::any::Any;

    /// Downcast to the mutable concrete device type
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}
