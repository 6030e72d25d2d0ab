//! 64-bit draw ordering key
//!
//! ```text
//! 63        48 47        32 31    20 19     8 7     0
//! +-----------+------------+--------+--------+-------+
//! |   layer   |   order    | shader | texture| blend |
//! +-----------+------------+--------+--------+-------+
//! ```
//!
//! Higher fields dominate, so comparing the packed words as unsigned integers
//! orders draws by view, then depth, then program, then texture.

use crate::render::handle::SLOT_MASK;

const LAYER_SHIFT: u64 = 48;
const ORDER_SHIFT: u64 = 32;
const SHADER_SHIFT: u64 = 20;
const TEXTURE_SHIFT: u64 = 8;

const ORDER_MASK: u64 = 0xFFFF;
const ID_MASK: u64 = SLOT_MASK as u64;
const BLEND_MASK: u64 = 0xFF;

/// Unpacked sort key fields
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SortKey {
    /// View id
    pub layer: u16,
    /// Depth rebiased into unsigned space
    pub order: u16,
    /// Shader slot (12 bits)
    pub shader: u16,
    /// Primary texture slot (12 bits)
    pub texture: u16,
    /// Blend bucket
    pub blend: u8,
}

impl SortKey {
    /// Map a signed depth onto `0..=u16::MAX` preserving order
    pub const fn order_from_depth(depth: i16) -> u16 {
        (depth as i32 + 0x8000) as u16
    }

    /// Inverse of [`SortKey::order_from_depth`]
    pub const fn depth_from_order(order: u16) -> i16 {
        (order as i32 - 0x8000) as i16
    }

    /// Pack into a 64-bit key
    pub const fn encode(&self) -> u64 {
        ((self.layer as u64) << LAYER_SHIFT)
            | ((self.order as u64) << ORDER_SHIFT)
            | (((self.shader as u64) & ID_MASK) << SHADER_SHIFT)
            | (((self.texture as u64) & ID_MASK) << TEXTURE_SHIFT)
            | ((self.blend as u64) & BLEND_MASK)
    }

    /// Unpack a key; diagnostics only
    pub const fn decode(key: u64) -> Self {
        Self {
            layer: (key >> LAYER_SHIFT) as u16,
            order: ((key >> ORDER_SHIFT) & ORDER_MASK) as u16,
            shader: ((key >> SHADER_SHIFT) & ID_MASK) as u16,
            texture: ((key >> TEXTURE_SHIFT) & ID_MASK) as u16,
            blend: (key & BLEND_MASK) as u8,
        }
    }
}
