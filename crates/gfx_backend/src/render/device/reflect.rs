//! Shader source reflection
//!
//! Programs are written as a vertex and a fragment source following a small
//! binding convention:
//!
//! ```text
//! struct VertexInput {                 // vertex attributes, packed in location order
//!     @location(0) position: vec2<f32>, // locations 0..8 read stream 0, 8..16 stream 1
//! }
//! @group(0) @binding(N) var<uniform> name: type;     // one buffer per uniform
//! @group(1) @binding(2s) var name: texture_2d<f32>;  // texture of stage s
//! @group(1) @binding(2s + 1) var name_sampler: sampler;
//! ```
//!
//! Line-based GL declarations (`uniform mat4 proj;`) are also recognised so
//! devices that only need names can reuse [`uniform_names`].

use crate::render::resources::UniformType;
use crate::render::{RenderError, RenderResult};

/// Uniform locations at or above this value name a texture stage
pub const TEXTURE_LOCATION_BASE: u16 = 0x100;

/// First attribute location read from vertex stream 1
pub const STREAM_LOCATION_SPLIT: u32 = 8;

/// Bind group of value uniforms
pub const UNIFORM_GROUP: u32 = 0;

/// Bind group of textures and samplers
pub const TEXTURE_GROUP: u32 = 1;

/// A `var<uniform>` declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformBinding {
    /// Binding index inside [`UNIFORM_GROUP`]
    pub binding: u32,
    /// Declared name
    pub name: String,
    /// Size in the uniform address space, rounded to 16 bytes
    pub size: u64,
}

/// A sampled texture declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureBinding {
    /// Texture stage (`binding / 2`)
    pub stage: u8,
    /// Declared name
    pub name: String,
}

/// Scalar layout of one vertex attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    /// `f32`
    Float,
    /// `vec2<f32>`
    Float2,
    /// `vec3<f32>`
    Float3,
    /// `vec4<f32>`
    Float4,
    /// `u32`
    Uint,
    /// `vec2<u32>`
    Uint2,
    /// `vec4<u32>`
    Uint4,
    /// `i32`
    Sint,
}

impl AttributeKind {
    fn parse(ty: &str) -> Option<Self> {
        match ty {
            "f32" => Some(Self::Float),
            "vec2<f32>" | "vec2f" => Some(Self::Float2),
            "vec3<f32>" | "vec3f" => Some(Self::Float3),
            "vec4<f32>" | "vec4f" => Some(Self::Float4),
            "u32" => Some(Self::Uint),
            "vec2<u32>" | "vec2u" => Some(Self::Uint2),
            "vec4<u32>" | "vec4u" => Some(Self::Uint4),
            "i32" => Some(Self::Sint),
            _ => None,
        }
    }

    /// Bytes the attribute occupies in a vertex
    pub const fn size(self) -> u64 {
        match self {
            Self::Float | Self::Uint | Self::Sint => 4,
            Self::Float2 | Self::Uint2 => 8,
            Self::Float3 => 12,
            Self::Float4 | Self::Uint4 => 16,
        }
    }
}

/// A vertex attribute with its packed offset inside its stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    /// Shader location
    pub location: u32,
    /// Value layout
    pub kind: AttributeKind,
    /// Vertex stream the attribute is read from
    pub stream: u8,
    /// Byte offset inside the stream's vertex
    pub offset: u64,
}

/// Everything a device needs to know about a program's interface
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reflection {
    /// Value uniforms, sorted by binding
    pub uniforms: Vec<UniformBinding>,
    /// Sampled textures, sorted by stage
    pub textures: Vec<TextureBinding>,
    /// Vertex inputs, sorted by location
    pub attributes: Vec<VertexAttribute>,
}

impl Reflection {
    /// Reflect a program from its vertex and fragment sources
    pub fn parse(vertex_src: &str, fragment_src: &str) -> RenderResult<Self> {
        let mut reflection = Self::default();
        for source in [vertex_src, fragment_src] {
            for line in source.lines() {
                reflection.parse_binding(line.trim())?;
            }
        }
        reflection.attributes = parse_vertex_input(vertex_src)?;
        reflection.uniforms.sort_by_key(|u| u.binding);
        reflection.textures.sort_by_key(|t| t.stage);
        Ok(reflection)
    }

    /// Location of a named uniform or texture
    pub fn location(&self, name: &str) -> Option<u16> {
        if let Some(uniform) = self.uniforms.iter().find(|u| u.name == name) {
            return u16::try_from(uniform.binding).ok();
        }
        self.textures
            .iter()
            .find(|t| t.name == name)
            .map(|t| TEXTURE_LOCATION_BASE | u16::from(t.stage))
    }

    /// Stride of a stream as implied by its attributes, 0 when unused
    pub fn stream_size(&self, stream: u8) -> u64 {
        self.attributes
            .iter()
            .filter(|a| a.stream == stream)
            .map(|a| a.offset + a.kind.size())
            .max()
            .unwrap_or(0)
    }

    fn parse_binding(&mut self, line: &str) -> RenderResult<()> {
        let (Some(group), Some(binding)) = (attribute_arg(line, "@group("), attribute_arg(line, "@binding(")) else {
            return Ok(());
        };
        let Some((qualifier, name, ty)) = parse_var(line) else {
            return Ok(());
        };

        match (group, qualifier) {
            (UNIFORM_GROUP, Some("uniform")) => {
                if self.uniforms.iter().any(|u| u.binding == binding) {
                    return Ok(());
                }
                let size = uniform_type_size(ty)
                    .ok_or_else(|| RenderError::Backend(format!("unsupported uniform type '{}' for '{}'", ty, name)))?;
                self.uniforms.push(UniformBinding {
                    binding,
                    name: name.to_string(),
                    size: round_up(size, 16),
                });
            }
            (TEXTURE_GROUP, None) if ty.starts_with("texture_2d") => {
                if binding % 2 != 0 {
                    return Err(RenderError::Backend(format!("texture '{}' must use an even binding", name)));
                }
                let stage = u8::try_from(binding / 2)
                    .map_err(|_| RenderError::Backend(format!("texture binding {} out of range", binding)))?;
                if !self.textures.iter().any(|t| t.stage == stage) {
                    self.textures.push(TextureBinding { stage, name: name.to_string() });
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Names of every uniform declared in `source`, in declaration order
///
/// Understands both `uniform <type> <name>;` lines and the binding
/// convention of [`Reflection`]; array suffixes are dropped.
pub fn uniform_names(source: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for line in source.lines() {
        let line = line.trim();
        let name = if let Some(rest) = line.strip_prefix("uniform ") {
            let mut tokens = rest.split_whitespace();
            match (tokens.next(), tokens.next()) {
                (Some(_ty), Some(name)) => {
                    let name = name.trim_end_matches(';');
                    name.split('[').next().unwrap_or(name)
                }
                _ => continue,
            }
        } else if line.contains("@binding(") {
            match parse_var(line) {
                Some((Some("uniform"), name, _)) => name,
                Some((None, name, ty)) if ty.starts_with("texture_2d") => name,
                _ => continue,
            }
        } else {
            continue;
        };
        if !name.is_empty() && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Repack a tightly packed uniform payload into uniform address space layout
///
/// `mat3` columns and the elements of arrays are padded to 16 bytes.
pub fn uniform_layout(kind: UniformType, count: u8, data: &[u8]) -> Vec<u8> {
    let element = usize::from(kind.size());
    let count = usize::from(count.max(1));
    let padded = if kind == UniformType::Mat3 { 48 } else { element };
    let stride = if count > 1 { round_up(padded as u64, 16) as usize } else { padded };

    let mut out = vec![0u8; stride * count];
    for (index, value) in data.chunks(element).take(count).enumerate() {
        let dst = &mut out[index * stride..];
        if kind == UniformType::Mat3 {
            for (column, bytes) in value.chunks(12).enumerate() {
                dst[column * 16..column * 16 + bytes.len()].copy_from_slice(bytes);
            }
        } else {
            dst[..value.len()].copy_from_slice(value);
        }
    }
    out
}

/// Round `value` up to a multiple of `align` (a power of two)
pub const fn round_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

/// Size of a host-shareable type in the uniform address space
fn uniform_type_size(ty: &str) -> Option<u64> {
    let ty = ty.trim();
    if let Some(inner) = ty.strip_prefix("array<").and_then(|t| t.strip_suffix('>')) {
        let (element, length) = inner.rsplit_once(',')?;
        let length: u64 = length.trim().parse().ok()?;
        return Some(round_up(uniform_type_size(element)?, 16) * length);
    }
    match ty {
        "f32" | "i32" | "u32" => Some(4),
        "vec2<f32>" | "vec2f" | "vec2<i32>" | "vec2i" | "vec2<u32>" | "vec2u" => Some(8),
        "vec3<f32>" | "vec3f" | "vec3<i32>" | "vec3i" | "vec3<u32>" | "vec3u" => Some(12),
        "vec4<f32>" | "vec4f" | "vec4<i32>" | "vec4i" | "vec4<u32>" | "vec4u" => Some(16),
        "mat3x3<f32>" | "mat3x3f" => Some(48),
        "mat4x4<f32>" | "mat4x4f" => Some(64),
        _ => None,
    }
}

/// Numeric argument of an attribute such as `@binding(3)`
fn attribute_arg(line: &str, prefix: &str) -> Option<u32> {
    let start = line.find(prefix)? + prefix.len();
    let rest = &line[start..];
    rest[..rest.find(')')?].trim().parse().ok()
}

/// Split `var<qualifier> name: type;` into its parts
fn parse_var(line: &str) -> Option<(Option<&str>, &str, &str)> {
    let rest = &line[line.find("var")? + 3..];
    let (qualifier, rest) = match rest.strip_prefix('<') {
        Some(rest) => {
            let end = rest.find('>')?;
            (Some(rest[..end].trim()), &rest[end + 1..])
        }
        None => (None, rest),
    };
    let (name, ty) = rest.split_once(':')?;
    let ty = ty.trim().trim_end_matches(';').trim();
    Some((qualifier, name.trim(), ty))
}

/// Attributes of `struct VertexInput`, with offsets packed per stream
fn parse_vertex_input(source: &str) -> RenderResult<Vec<VertexAttribute>> {
    let Some(start) = source.find("struct VertexInput") else {
        return Ok(Vec::new());
    };
    let body = &source[start..];
    let body = match (body.find('{'), body.find('}')) {
        (Some(open), Some(close)) if open < close => &body[open + 1..close],
        _ => return Err(RenderError::Backend("unterminated struct VertexInput".to_string())),
    };

    let mut attributes = Vec::new();
    for field in body.split(',') {
        let field = field.trim();
        let Some(location) = attribute_arg(field, "@location(") else {
            continue;
        };
        let declaration = field[field.find(')').map_or(0, |end| end + 1)..].trim();
        let Some((name, ty)) = declaration.split_once(':') else {
            continue;
        };
        let kind = AttributeKind::parse(ty.trim()).ok_or_else(|| {
            RenderError::Backend(format!("unsupported vertex attribute type '{}' for '{}'", ty.trim(), name.trim()))
        })?;
        let stream = if location < STREAM_LOCATION_SPLIT { 0 } else { 1 };
        attributes.push(VertexAttribute { location, kind, stream, offset: 0 });
    }

    attributes.sort_by_key(|a| a.location);
    let mut offsets = [0u64; 2];
    for attribute in &mut attributes {
        let offset = &mut offsets[usize::from(attribute.stream)];
        attribute.offset = *offset;
        *offset += attribute.kind.size();
    }
    Ok(attributes)
}
