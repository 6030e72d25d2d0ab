//! Resource manager
//!
//! Owns the graphics device and one pool per resource type. Collaborators
//! allocate through the `alloc_*` methods, keep the returned [`Handle`], and
//! release with [`ResourceManager::free`]. Capacity and device failures are
//! logged and returned; nothing here panics.

use image::DynamicImage;

use super::{
    IndexBuffer, Pool, PoolStats, Shader, SubTexture, Texture2D, Uniform, UniformType,
    VertexBuffer,
};
use crate::core::config::PoolLimits;
use crate::render::device::{BufferKind, GraphicsDevice};
use crate::render::handle::{Handle, ResourceType};
use crate::render::{RenderError, RenderResult};

/// Usage counters for every pool
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResourceStats {
    /// Index buffers
    pub index_buffers: PoolStats,
    /// Vertex buffers
    pub vertex_buffers: PoolStats,
    /// Textures
    pub textures: PoolStats,
    /// Uniforms
    pub uniforms: PoolStats,
    /// Shaders
    pub shaders: PoolStats,
}

/// Handle-based owner of every GPU resource
pub struct ResourceManager {
    device: Box<dyn GraphicsDevice>,
    index_buffers: Pool<IndexBuffer>,
    vertex_buffers: Pool<VertexBuffer>,
    textures: Pool<Texture2D>,
    uniforms: Pool<Uniform>,
    shaders: Pool<Shader>,
}

fn reserve<T>(pool: &mut Pool<T>) -> RenderResult<u16> {
    pool.reserve().ok_or_else(|| {
        let error = RenderError::PoolExhausted {
            kind: pool.kind(),
            capacity: pool.capacity(),
        };
        log::warn!("{}", error);
        error
    })
}

impl ResourceManager {
    /// Create empty pools sized by `limits`
    ///
    /// Fails with [`RenderError::Config`] when a pool would not fit the
    /// 12-bit handle slot space.
    pub fn new(device: Box<dyn GraphicsDevice>, limits: &PoolLimits) -> RenderResult<Self> {
        limits.validate()?;
        log::debug!("Creating ResourceManager with limits {:?}", limits);
        Ok(Self {
            device,
            index_buffers: Pool::new(ResourceType::Index, limits.index_buffers),
            vertex_buffers: Pool::new(ResourceType::Vertex, limits.vertex_buffers),
            textures: Pool::new(ResourceType::Texture, limits.textures),
            uniforms: Pool::new(ResourceType::Uniform, limits.uniforms),
            shaders: Pool::new(ResourceType::Shader, limits.shaders),
        })
    }

    /// The underlying device
    pub fn device(&self) -> &dyn GraphicsDevice {
        self.device.as_ref()
    }

    /// The underlying device, mutably
    pub fn device_mut(&mut self) -> &mut dyn GraphicsDevice {
        self.device.as_mut()
    }

    /// Downcast the device to its concrete type
    pub fn device_as<D: GraphicsDevice + 'static>(&self) -> Option<&D> {
        self.device.as_any().downcast_ref::<D>()
    }

    /// Downcast the device to its concrete type, mutably
    pub fn device_as_mut<D: GraphicsDevice + 'static>(&mut self) -> Option<&mut D> {
        self.device.as_any_mut().downcast_mut::<D>()
    }

    /// Allocate an index buffer of `size` bytes, optionally filled from `data`
    pub fn alloc_index_buffer(&mut self, data: Option<&[u8]>, size: u32) -> RenderResult<Handle> {
        let slot = reserve(&mut self.index_buffers)?;
        match self.device.create_buffer(BufferKind::Index, size, data) {
            Ok(buffer) => {
                let handle = self.index_buffers.fill(slot, IndexBuffer { buffer, size });
                log::debug!("alloc index-buffer: ({}, {})", slot, buffer);
                Ok(handle)
            }
            Err(e) => {
                self.index_buffers.release(slot);
                log::warn!("fail to alloc index-buffer: {}", e);
                Err(e)
            }
        }
    }

    /// Allocate an index buffer holding exactly `indices`
    pub fn alloc_index_buffer_u16(&mut self, indices: &[u16]) -> RenderResult<Handle> {
        let bytes: &[u8] = bytemuck::cast_slice(indices);
        self.alloc_index_buffer(Some(bytes), bytes.len() as u32)
    }

    /// Allocate a vertex buffer of `size` bytes with the given stride
    pub fn alloc_vertex_buffer(&mut self, data: Option<&[u8]>, size: u32, stride: u16) -> RenderResult<Handle> {
        if stride == 0 {
            log::warn!("fail to alloc vertex-buffer: zero stride");
            return Err(RenderError::InvalidArgument("vertex stride must be non-zero".to_string()));
        }
        let slot = reserve(&mut self.vertex_buffers)?;
        match self.device.create_buffer(BufferKind::Vertex, size, data) {
            Ok(buffer) => {
                let handle = self.vertex_buffers.fill(slot, VertexBuffer { buffer, size, stride });
                log::debug!("alloc vertex-buffer: ({}, {})", slot, buffer);
                Ok(handle)
            }
            Err(e) => {
                self.vertex_buffers.release(slot);
                log::warn!("fail to alloc vertex-buffer: {}", e);
                Err(e)
            }
        }
    }

    /// Upload an image as an RGBA8 texture
    pub fn alloc_texture(&mut self, image: &DynamicImage) -> RenderResult<Handle> {
        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();
        let slot = reserve(&mut self.textures)?;
        match self.device.create_texture(width, height, rgba.as_raw()) {
            Ok(texture) => {
                let handle = self.textures.fill(slot, Texture2D { texture, width, height });
                log::debug!("alloc texture id: ({}, {}) {}x{}", slot, texture, width, height);
                Ok(handle)
            }
            Err(e) => {
                self.textures.release(slot);
                log::warn!("fail to alloc texture: {}", e);
                Err(e)
            }
        }
    }

    /// Resolve a named uniform of an existing shader
    pub fn alloc_uniform(&mut self, shader: Handle, name: &str, kind: UniformType, count: u8) -> RenderResult<Handle> {
        let Some(program) = self.shaders.get(shader).map(|s| s.program) else {
            log::warn!("fail to alloc uniform '{}': invalid shader {}", name, shader);
            return Err(RenderError::InvalidHandle(shader));
        };
        if count == 0 {
            return Err(RenderError::InvalidArgument(format!("uniform '{}' with zero count", name)));
        }
        let slot = reserve(&mut self.uniforms)?;
        let Some(location) = self.device.uniform_location(program, name) else {
            self.uniforms.release(slot);
            log::warn!("fail to alloc uniform - {}, make sure shader {} in use", name, shader.slot());
            return Err(RenderError::UniformNotFound {
                name: name.to_string(),
                shader,
            });
        };
        let handle = self.uniforms.fill(
            slot,
            Uniform {
                shader,
                program,
                location,
                kind,
                count,
                name: name.to_string(),
            },
        );
        log::debug!("alloc uniform: ({}, {}) => {}", slot, location, name);
        Ok(handle)
    }

    /// Compile and link a shader program
    pub fn alloc_shader(&mut self, vertex_src: &str, fragment_src: &str) -> RenderResult<Handle> {
        let slot = reserve(&mut self.shaders)?;
        match self.device.create_program(vertex_src, fragment_src) {
            Ok(program) => {
                let handle = self.shaders.fill(slot, Shader { program });
                log::debug!("alloc shader id: ({}, {})", slot, program);
                Ok(handle)
            }
            Err(e) => {
                self.shaders.release(slot);
                log::warn!("fail to alloc shader: {}", e);
                Err(e)
            }
        }
    }

    /// Destroy the resource behind `handle` and recycle its slot
    ///
    /// Returns `false` (and logs) for invalid, stale or mismatched handles.
    pub fn free(&mut self, handle: Handle) -> bool {
        let freed = match handle.kind() {
            Some(ResourceType::Index) => self
                .index_buffers
                .take(handle)
                .map(|ib| self.device.destroy_buffer(ib.buffer)),
            Some(ResourceType::Vertex) => self
                .vertex_buffers
                .take(handle)
                .map(|vb| self.device.destroy_buffer(vb.buffer)),
            Some(ResourceType::Texture) => self
                .textures
                .take(handle)
                .map(|tex| self.device.destroy_texture(tex.texture)),
            Some(ResourceType::Uniform) => self.uniforms.take(handle).map(|_| ()),
            Some(ResourceType::Shader) => self
                .shaders
                .take(handle)
                .map(|sh| self.device.destroy_program(sh.program)),
            Some(ResourceType::Layout) | None => None,
        };
        if freed.is_some() {
            log::debug!("free {}", handle);
            true
        } else {
            log::warn!("free of invalid handle {}", handle);
            false
        }
    }

    /// Index buffer behind a handle
    pub fn index_buffer(&self, handle: Handle) -> Option<&IndexBuffer> {
        self.index_buffers.get(handle)
    }

    /// Vertex buffer behind a handle
    pub fn vertex_buffer(&self, handle: Handle) -> Option<&VertexBuffer> {
        self.vertex_buffers.get(handle)
    }

    /// Texture behind a handle
    pub fn texture(&self, handle: Handle) -> Option<&Texture2D> {
        self.textures.get(handle)
    }

    /// Uniform behind a handle
    pub fn uniform(&self, handle: Handle) -> Option<&Uniform> {
        self.uniforms.get(handle)
    }

    /// Shader behind a handle
    pub fn shader(&self, handle: Handle) -> Option<&Shader> {
        let shader = self.shaders.get(handle);
        if shader.is_none() {
            log::trace!("Invalid shader id: {}", handle);
        }
        shader
    }

    /// Overwrite part of an index buffer
    pub fn update_index_buffer(&mut self, handle: Handle, offset: u32, data: &[u8]) -> RenderResult<()> {
        let buffer = self
            .index_buffers
            .get(handle)
            .map(|ib| ib.buffer)
            .ok_or(RenderError::InvalidHandle(handle))?;
        self.device.update_buffer(buffer, offset, data)
    }

    /// Overwrite part of a vertex buffer
    pub fn update_vertex_buffer(&mut self, handle: Handle, offset: u32, data: &[u8]) -> RenderResult<()> {
        let buffer = self
            .vertex_buffers
            .get(handle)
            .map(|vb| vb.buffer)
            .ok_or(RenderError::InvalidHandle(handle))?;
        self.device.update_buffer(buffer, offset, data)
    }

    /// Overwrite a region of a texture, with `image` placed at `(x, y)`
    pub fn update_texture(&mut self, handle: Handle, image: &DynamicImage, x: u32, y: u32) -> RenderResult<()> {
        let texture = self
            .textures
            .get(handle)
            .map(|tex| tex.texture)
            .ok_or(RenderError::InvalidHandle(handle))?;
        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();
        self.device.update_texture(texture, x, y, width, height, rgba.as_raw())
    }

    /// Cut a region out of a texture
    pub fn sub_texture(&self, handle: Handle, x: f32, y: f32, width: f32, height: f32) -> Option<SubTexture> {
        self.textures
            .get(handle)
            .map(|owner| SubTexture::new(handle, owner, x, y, width, height))
    }

    /// Usage counters for every pool
    pub fn stats(&self) -> ResourceStats {
        ResourceStats {
            index_buffers: self.index_buffers.stats(),
            vertex_buffers: self.vertex_buffers.stats(),
            textures: self.textures.stats(),
            uniforms: self.uniforms.stats(),
            shaders: self.shaders.stats(),
        }
    }

    /// Destroy every live resource; the manager stays usable afterwards
    pub fn shutdown(&mut self) {
        let mut destroyed = 0;
        for ib in self.index_buffers.drain() {
            self.device.destroy_buffer(ib.buffer);
            destroyed += 1;
        }
        for vb in self.vertex_buffers.drain() {
            self.device.destroy_buffer(vb.buffer);
            destroyed += 1;
        }
        for tex in self.textures.drain() {
            self.device.destroy_texture(tex.texture);
            destroyed += 1;
        }
        destroyed += self.uniforms.drain().len();
        for sh in self.shaders.drain() {
            self.device.destroy_program(sh.program);
            destroyed += 1;
        }
        if destroyed > 0 {
            log::info!("ResourceManager shutdown released {} resources", destroyed);
        }
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceManager").field("stats", &self.stats()).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::device::HeadlessDevice;
    use image::{Rgba, RgbaImage};

    const VS: &str = "uniform mat4 proj;\nuniform vec4 tint;\nvoid main() {}";
    const FS: &str = "uniform sampler2D tex;\nvoid main() {}";

    fn manager() -> ResourceManager {
        ResourceManager::new(Box::new(HeadlessDevice::new()), &PoolLimits::default()).unwrap()
    }

    fn small_manager(limits: PoolLimits) -> ResourceManager {
        ResourceManager::new(Box::new(HeadlessDevice::new()), &limits).unwrap()
    }

    fn image(width: u32, height: u32, color: [u8; 4]) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba(color)))
    }

    #[test]
    fn test_limits_outside_slot_space_are_rejected() {
        let too_many = PoolLimits { textures: 5000, ..PoolLimits::default() };
        let result = ResourceManager::new(Box::new(HeadlessDevice::new()), &too_many);
        assert!(matches!(result, Err(RenderError::Config(_))));

        let too_few = PoolLimits { shaders: 1, ..PoolLimits::default() };
        assert!(ResourceManager::new(Box::new(HeadlessDevice::new()), &too_few).is_err());
    }

    #[test]
    fn test_alloc_and_access_every_type() {
        let mut rm = manager();
        let ib = rm.alloc_index_buffer_u16(&[0, 1, 2, 2, 3, 0]).unwrap();
        let vb = rm.alloc_vertex_buffer(None, 80, 20).unwrap();
        let tex = rm.alloc_texture(&image(4, 2, [255, 0, 0, 255])).unwrap();
        let sh = rm.alloc_shader(VS, FS).unwrap();
        let um = rm.alloc_uniform(sh, "tint", UniformType::Vec4, 1).unwrap();

        assert_eq!(rm.index_buffer(ib).unwrap().index_count(), 6);
        assert_eq!(rm.vertex_buffer(vb).unwrap().vertex_count(), 4);
        let texture = rm.texture(tex).unwrap();
        assert_eq!((texture.width, texture.height), (4, 2));
        let uniform = rm.uniform(um).unwrap();
        assert_eq!(uniform.location, 1);
        assert_eq!(uniform.payload_size(), 16);
        assert!(rm.shader(sh).is_some());

        assert_eq!(ib.kind(), Some(ResourceType::Index));
        assert_eq!(um.kind(), Some(ResourceType::Uniform));
        assert_eq!(ib.slot(), 1);
    }

    #[test]
    fn test_accessor_returns_none_after_free() {
        let mut rm = manager();
        let vb = rm.alloc_vertex_buffer(None, 64, 16).unwrap();
        assert!(rm.free(vb));
        assert!(rm.vertex_buffer(vb).is_none());
        assert!(!rm.free(vb), "double free is a no-op");
    }

    #[test]
    fn test_free_then_alloc_reuses_slot() {
        let mut rm = manager();
        let _a = rm.alloc_texture(&image(1, 1, [0; 4])).unwrap();
        let b = rm.alloc_texture(&image(1, 1, [0; 4])).unwrap();
        let high_water = rm.stats().textures.high_water;

        rm.free(b);
        let c = rm.alloc_texture(&image(2, 2, [0; 4])).unwrap();
        assert_eq!(c.slot(), b.slot());
        assert_eq!(rm.stats().textures.high_water, high_water);
    }

    #[test]
    fn test_free_destroys_native_object() {
        let mut rm = manager();
        let ib = rm.alloc_index_buffer(None, 12).unwrap();
        assert_eq!(rm.device_as::<HeadlessDevice>().unwrap().live_buffers(), 1);
        rm.free(ib);
        assert_eq!(rm.device_as::<HeadlessDevice>().unwrap().live_buffers(), 0);
    }

    #[test]
    fn test_mismatched_and_unknown_handles_are_noops() {
        let mut rm = manager();
        let vb = rm.alloc_vertex_buffer(None, 64, 16).unwrap();
        let as_index = Handle::new(ResourceType::Index, vb.slot());
        assert!(!rm.free(as_index));
        assert!(!rm.free(Handle::new(ResourceType::Layout, 1)));
        assert!(!rm.free(Handle::from_raw(0xF001)));
        assert!(!rm.free(Handle::INVALID));
        assert!(rm.index_buffer(as_index).is_none());
        assert!(rm.vertex_buffer(vb).is_some());
    }

    #[test]
    fn test_pool_exhaustion_is_reported() {
        let mut rm = small_manager(PoolLimits { shaders: 3, ..PoolLimits::default() });
        rm.alloc_shader(VS, FS).unwrap();
        rm.alloc_shader(VS, FS).unwrap();
        let err = rm.alloc_shader(VS, FS).unwrap_err();
        assert!(matches!(
            err,
            RenderError::PoolExhausted { kind: ResourceType::Shader, capacity: 3 }
        ));
    }

    #[test]
    fn test_default_shader_capacity() {
        let mut rm = manager();
        for _ in 0..31 {
            rm.alloc_shader(VS, FS).unwrap();
        }
        assert!(rm.alloc_shader(VS, FS).is_err());
        assert_eq!(rm.stats().shaders.live, 31);
    }

    #[test]
    fn test_missing_uniform_reclaims_slot() {
        let mut rm = manager();
        let sh = rm.alloc_shader(VS, FS).unwrap();
        let err = rm.alloc_uniform(sh, "nope", UniformType::Float, 1).unwrap_err();
        assert!(matches!(err, RenderError::UniformNotFound { .. }));

        let um = rm.alloc_uniform(sh, "proj", UniformType::Mat4, 1).unwrap();
        assert_eq!(um.slot(), 1);
    }

    #[test]
    fn test_uniform_requires_live_shader() {
        let mut rm = manager();
        let sh = rm.alloc_shader(VS, FS).unwrap();
        rm.free(sh);
        let err = rm.alloc_uniform(sh, "proj", UniformType::Mat4, 1).unwrap_err();
        assert!(matches!(err, RenderError::InvalidHandle(h) if h == sh));
        assert_eq!(rm.stats().uniforms.high_water, 1);
    }

    #[test]
    fn test_device_failure_returns_slot() {
        let mut rm = manager();
        rm.device_as_mut::<HeadlessDevice>().unwrap().set_fail_allocations(true);
        assert!(matches!(rm.alloc_vertex_buffer(None, 16, 4), Err(RenderError::Backend(_))));
        rm.device_as_mut::<HeadlessDevice>().unwrap().set_fail_allocations(false);

        let vb = rm.alloc_vertex_buffer(None, 16, 4).unwrap();
        assert_eq!(vb.slot(), 1);
        assert_eq!(rm.stats().vertex_buffers.high_water, 2);
    }

    #[test]
    fn test_zero_stride_is_rejected() {
        let mut rm = manager();
        assert!(matches!(
            rm.alloc_vertex_buffer(None, 16, 0),
            Err(RenderError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_buffer_and_texture_updates() {
        let mut rm = manager();
        let vb = rm.alloc_vertex_buffer(None, 8, 4).unwrap();
        rm.update_vertex_buffer(vb, 4, &[1, 2, 3, 4]).unwrap();
        let native = rm.vertex_buffer(vb).unwrap().buffer;
        let device = rm.device_as::<HeadlessDevice>().unwrap();
        assert_eq!(device.buffer_data(native).unwrap(), &[0, 0, 0, 0, 1, 2, 3, 4]);

        let tex = rm.alloc_texture(&image(2, 2, [0; 4])).unwrap();
        rm.update_texture(tex, &image(1, 1, [9, 9, 9, 9]), 1, 0).unwrap();
        let native = rm.texture(tex).unwrap().texture;
        let pixels = rm.device_as::<HeadlessDevice>().unwrap().texture_pixels(native).unwrap();
        assert_eq!(&pixels[4..8], &[9, 9, 9, 9]);

        rm.free(vb);
        assert!(matches!(
            rm.update_vertex_buffer(vb, 0, &[0]),
            Err(RenderError::InvalidHandle(_))
        ));
    }

    #[test]
    fn test_sub_texture_tracks_owner_lifetime() {
        let mut rm = manager();
        let tex = rm.alloc_texture(&image(64, 32, [0; 4])).unwrap();
        let region = rm.sub_texture(tex, 16.0, 8.0, 16.0, 8.0).unwrap();
        assert!(region.is_valid(&rm));
        assert_eq!(region.uv(), [0.25, 0.25, 0.5, 0.5]);

        rm.free(tex);
        assert!(!region.is_valid(&rm));

        // Slot reused by a different texture: the region must not follow it
        let other = rm.alloc_texture(&image(64, 32, [0; 4])).unwrap();
        assert_eq!(other.slot(), tex.slot());
        assert!(!region.is_valid(&rm));
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let mut rm = manager();
        rm.alloc_index_buffer(None, 4).unwrap();
        rm.alloc_vertex_buffer(None, 4, 4).unwrap();
        rm.alloc_texture(&image(1, 1, [0; 4])).unwrap();
        let sh = rm.alloc_shader(VS, FS).unwrap();
        rm.alloc_uniform(sh, "tex", UniformType::Sampler, 1).unwrap();

        rm.shutdown();
        let device = rm.device_as::<HeadlessDevice>().unwrap();
        assert_eq!(device.live_buffers(), 0);
        assert_eq!(device.live_textures(), 0);
        assert_eq!(device.live_programs(), 0);
        assert_eq!(rm.stats(), ResourceStats {
            index_buffers: PoolStats { live: 0, high_water: 1, capacity: 2048 },
            vertex_buffers: PoolStats { live: 0, high_water: 1, capacity: 2048 },
            textures: PoolStats { live: 0, high_water: 1, capacity: 1024 },
            uniforms: PoolStats { live: 0, high_water: 1, capacity: 256 },
            shaders: PoolStats { live: 0, high_water: 1, capacity: 32 },
        });
    }
}
