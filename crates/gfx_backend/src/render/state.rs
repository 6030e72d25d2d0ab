//! Packed render state
//!
//! The state word keeps a fixed bit layout so it can be stored per draw and
//! compared cheaply:
//!
//! ```text
//! bits  0..3   write mask (rgb | alpha | depth)
//! bits  4..8   depth test function, 0 = disabled
//! bits  8..12  blend mode, 0 = unset
//! bits 12..16  primitive type
//! ```

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

const DEPTH_TEST_SHIFT: u64 = 4;
const DEPTH_TEST_MASK: u64 = 0x0000_0000_0000_00F0;
const BLEND_SHIFT: u64 = 8;
const BLEND_MASK: u64 = 0x0000_0000_0000_0F00;
const PRIMITIVE_SHIFT: u64 = 12;
const PRIMITIVE_MASK: u64 = 0x0000_0000_0000_F000;

bitflags! {
    /// Framebuffer channels written by a draw
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct WriteMask: u64 {
        /// Color channels
        const RGB = 0x1;
        /// Alpha channel
        const ALPHA = 0x2;
        /// Depth buffer
        const DEPTH = 0x4;
    }
}

/// Depth comparison function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DepthTest {
    /// Pass if incoming < stored
    Less = 1,
    /// Pass if incoming <= stored
    LessEqual = 2,
    /// Pass if equal
    Equal = 3,
    /// Pass if incoming >= stored
    GreaterEqual = 4,
    /// Pass if incoming > stored
    Greater = 5,
    /// Pass if not equal
    NotEqual = 6,
    /// Never pass
    Never = 7,
    /// Always pass
    Always = 8,
}

impl DepthTest {
    const fn from_bits(bits: u64) -> Option<Self> {
        match bits {
            1 => Some(Self::Less),
            2 => Some(Self::LessEqual),
            3 => Some(Self::Equal),
            4 => Some(Self::GreaterEqual),
            5 => Some(Self::Greater),
            6 => Some(Self::NotEqual),
            7 => Some(Self::Never),
            8 => Some(Self::Always),
            _ => None,
        }
    }
}

/// Blend factor understood by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    /// 0
    Zero,
    /// 1
    One,
    /// Source alpha
    SrcAlpha,
    /// 1 - source alpha
    OneMinusSrcAlpha,
}

/// Blend equation preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlendMode {
    /// Blending disabled: source replaces destination
    Disable = 1,
    /// Premultiplied alpha
    AlphaPremultiplied = 2,
    /// Straight alpha
    AlphaNonPremultiplied = 3,
    /// Additive, for particles and glows
    Additive = 4,
}

impl BlendMode {
    const fn from_bits(bits: u64) -> Option<Self> {
        match bits {
            1 => Some(Self::Disable),
            2 => Some(Self::AlphaPremultiplied),
            3 => Some(Self::AlphaNonPremultiplied),
            4 => Some(Self::Additive),
            _ => None,
        }
    }

    /// Source and destination factors
    pub const fn factors(self) -> (BlendFactor, BlendFactor) {
        match self {
            Self::Disable => (BlendFactor::One, BlendFactor::Zero),
            Self::AlphaPremultiplied => (BlendFactor::One, BlendFactor::OneMinusSrcAlpha),
            Self::AlphaNonPremultiplied => (BlendFactor::SrcAlpha, BlendFactor::OneMinusSrcAlpha),
            Self::Additive => (BlendFactor::SrcAlpha, BlendFactor::One),
        }
    }

    /// Bucket value used by the sort key
    pub const fn bucket(self) -> u8 {
        self as u8
    }
}

/// Primitive topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Primitive {
    /// Triangle list
    #[default]
    Triangles = 0,
    /// Triangle strip
    TriangleStrip = 1,
    /// Line list
    Lines = 2,
    /// Line strip
    LineStrip = 3,
    /// Point list
    Points = 4,
}

impl Primitive {
    const fn from_bits(bits: u64) -> Option<Self> {
        match bits {
            0 => Some(Self::Triangles),
            1 => Some(Self::TriangleStrip),
            2 => Some(Self::Lines),
            3 => Some(Self::LineStrip),
            4 => Some(Self::Points),
            _ => None,
        }
    }
}

/// Decoded render state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderState {
    /// Channels written
    pub write: WriteMask,
    /// Depth test, `None` disables it
    pub depth_test: Option<DepthTest>,
    /// Blend preset, `None` leaves blending off
    pub blend: Option<BlendMode>,
    /// Topology
    pub primitive: Primitive,
}

impl RenderState {
    /// Color writes, no depth, no blending, triangles
    pub const fn new() -> Self {
        Self {
            write: WriteMask::RGB.union(WriteMask::ALPHA),
            depth_test: None,
            blend: None,
            primitive: Primitive::Triangles,
        }
    }

    /// Typical 2D sprite state: color writes with straight alpha blending
    pub const fn sprite() -> Self {
        Self::new().with_blend(BlendMode::AlphaNonPremultiplied)
    }

    /// Set the write mask
    pub const fn with_write(mut self, write: WriteMask) -> Self {
        self.write = write;
        self
    }

    /// Enable depth testing
    pub const fn with_depth_test(mut self, depth_test: DepthTest) -> Self {
        self.depth_test = Some(depth_test);
        self
    }

    /// Set the blend preset
    pub const fn with_blend(mut self, blend: BlendMode) -> Self {
        self.blend = Some(blend);
        self
    }

    /// Set the primitive topology
    pub const fn with_primitive(mut self, primitive: Primitive) -> Self {
        self.primitive = primitive;
        self
    }

    /// Pack into the 64-bit state word
    pub const fn encode(&self) -> u64 {
        let mut bits = self.write.bits();
        if let Some(depth) = self.depth_test {
            bits |= (depth as u64) << DEPTH_TEST_SHIFT;
        }
        if let Some(blend) = self.blend {
            bits |= (blend as u64) << BLEND_SHIFT;
        }
        bits | (self.primitive as u64) << PRIMITIVE_SHIFT
    }

    /// Unpack a state word; unknown field values fall back to "disabled"/triangles
    pub fn decode(bits: u64) -> Self {
        let primitive = Primitive::from_bits((bits & PRIMITIVE_MASK) >> PRIMITIVE_SHIFT)
            .unwrap_or_else(|| {
                log::warn!("Unknown primitive bits in render state 0x{:016X}", bits);
                Primitive::Triangles
            });
        Self {
            write: WriteMask::from_bits_truncate(bits),
            depth_test: DepthTest::from_bits((bits & DEPTH_TEST_MASK) >> DEPTH_TEST_SHIFT),
            blend: BlendMode::from_bits((bits & BLEND_MASK) >> BLEND_SHIFT),
            primitive,
        }
    }

    /// Blend bucket of a packed state word, 0 when unset
    pub const fn blend_bucket(bits: u64) -> u8 {
        ((bits & BLEND_MASK) >> BLEND_SHIFT) as u8
    }
}

impl Default for RenderState {
    fn default() -> Self {
        Self::new()
    }
}
