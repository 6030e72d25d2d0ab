//! Shader programs and their uniform slots

use crate::render::device::NativeId;
use crate::render::handle::Handle;

/// Value type of a uniform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformType {
    /// Single `int` (also used for sampler units)
    Int = 0,
    /// Single `float`
    Float = 1,
    /// `vec2`
    Vec2 = 2,
    /// `vec3`
    Vec3 = 3,
    /// `vec4`
    Vec4 = 4,
    /// `mat3`
    Mat3 = 5,
    /// `mat4`
    Mat4 = 6,
    /// `sampler2D` unit
    Sampler = 7,
}

impl UniformType {
    /// Size of one element in bytes
    pub const fn size(self) -> u8 {
        match self {
            Self::Int | Self::Float | Self::Sampler => 4,
            Self::Vec2 => 8,
            Self::Vec3 => 12,
            Self::Vec4 => 16,
            Self::Mat3 => 36,
            Self::Mat4 => 64,
        }
    }

    /// Decode a 4-bit type code
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Int),
            1 => Some(Self::Float),
            2 => Some(Self::Vec2),
            3 => Some(Self::Vec3),
            4 => Some(Self::Vec4),
            5 => Some(Self::Mat3),
            6 => Some(Self::Mat4),
            7 => Some(Self::Sampler),
            _ => None,
        }
    }
}

/// Linked shader program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shader {
    /// Native program
    pub program: NativeId,
}

/// A named uniform resolved inside a program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uniform {
    /// Owning shader
    pub shader: Handle,
    /// Native program the location belongs to
    pub program: NativeId,
    /// Location inside the program
    pub location: u16,
    /// Value type
    pub kind: UniformType,
    /// Array length
    pub count: u8,
    /// Declared name
    pub name: String,
}

impl Uniform {
    /// Payload size in bytes
    pub fn payload_size(&self) -> usize {
        usize::from(self.kind.size()) * usize::from(self.count)
    }
}
