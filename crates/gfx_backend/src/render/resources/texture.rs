//! Textures and sub-texture regions

use crate::foundation::math::Vec2;
use crate::render::device::NativeId;
use crate::render::handle::Handle;

use super::ResourceManager;

/// RGBA8 2D texture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Texture2D {
    /// Native texture
    pub texture: NativeId,
    /// Width in texels
    pub width: u32,
    /// Height in texels
    pub height: u32,
}

/// Region of a texture, e.g. one frame of a sprite sheet
///
/// Holds the owner's handle plus the native id observed when the region was
/// cut, so a region whose texture was freed (or whose slot was reused by
/// another texture) reports itself invalid instead of sampling the wrong image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubTexture {
    /// Owning texture
    pub texture: Handle,
    native: NativeId,
    /// Top-left corner in texels
    pub min: Vec2,
    /// Bottom-right corner in texels
    pub max: Vec2,
    size: Vec2,
}

impl SubTexture {
    pub(crate) fn new(texture: Handle, owner: &Texture2D, x: f32, y: f32, w: f32, h: f32) -> Self {
        Self {
            texture,
            native: owner.texture,
            min: Vec2::new(x, y),
            max: Vec2::new(x + w, y + h),
            size: Vec2::new(owner.width as f32, owner.height as f32),
        }
    }

    /// True while the owning texture is still the one this region was cut from
    pub fn is_valid(&self, resources: &ResourceManager) -> bool {
        resources
            .texture(self.texture)
            .is_some_and(|owner| owner.texture == self.native)
    }

    /// Region size in texels
    pub fn size(&self) -> Vec2 {
        self.max - self.min
    }

    /// Normalized texture coordinates `(u0, v0, u1, v1)`
    pub fn uv(&self) -> [f32; 4] {
        if self.size.x <= 0.0 || self.size.y <= 0.0 {
            return [0.0; 4];
        }
        [
            self.min.x / self.size.x,
            self.min.y / self.size.y,
            self.max.x / self.size.x,
            self.max.y / self.size.y,
        ]
    }
}
