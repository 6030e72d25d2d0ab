//! Packed resource handles
//!
//! ```text
//! 0x F   FFF
//!    ^    ^
//!    |    +---- slot index in the type's pool
//!    +--------- resource type tag
//! ```
//!
//! Slot 0 is never issued, so the all-zero value is invalid for every type.

use std::fmt;

/// Mask selecting the slot bits of a handle
pub const SLOT_MASK: u16 = 0x0FFF;

/// Shift of the type tag
pub const TYPE_SHIFT: u16 = 12;

/// Number of addressable slots per pool
pub const MAX_SLOTS: u16 = SLOT_MASK + 1;

/// Kind of GPU resource a handle refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ResourceType {
    /// Index buffer
    Index = 0,
    /// Vertex buffer
    Vertex = 1,
    /// 2D texture
    Texture = 2,
    /// Vertex layout (reserved, no pool)
    Layout = 3,
    /// Shader uniform slot
    Uniform = 4,
    /// Linked shader program
    Shader = 5,
}

impl ResourceType {
    /// Decode a 4-bit type tag
    pub const fn from_tag(tag: u16) -> Option<Self> {
        match tag {
            0 => Some(Self::Index),
            1 => Some(Self::Vertex),
            2 => Some(Self::Texture),
            3 => Some(Self::Layout),
            4 => Some(Self::Uniform),
            5 => Some(Self::Shader),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Index => "index-buffer",
            Self::Vertex => "vertex-buffer",
            Self::Texture => "texture",
            Self::Layout => "layout",
            Self::Uniform => "uniform",
            Self::Shader => "shader",
        };
        f.write_str(name)
    }
}

/// 16-bit type-tagged slot reference to a pooled GPU resource
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Handle(u16);

impl Handle {
    /// The reserved invalid handle
    pub const INVALID: Self = Self(0);

    /// Pack a type tag and slot; the slot is truncated to 12 bits
    pub const fn new(kind: ResourceType, slot: u16) -> Self {
        Self(((kind as u16) << TYPE_SHIFT) | (slot & SLOT_MASK))
    }

    /// Reinterpret a raw 16-bit value
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    /// Raw packed value
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Slot index within the type's pool
    pub const fn slot(self) -> u16 {
        self.0 & SLOT_MASK
    }

    /// Raw 4-bit type tag
    pub const fn tag(self) -> u16 {
        self.0 >> TYPE_SHIFT
    }

    /// Decoded resource type, `None` for unknown tags
    pub const fn kind(self) -> Option<ResourceType> {
        ResourceType::from_tag(self.tag())
    }

    /// True if the handle carries the given type tag and a non-zero slot
    pub const fn is(self, kind: ResourceType) -> bool {
        self.tag() == kind as u16 && self.slot() != 0
    }

    /// Slot 0 is reserved in every pool
    pub const fn is_valid(self) -> bool {
        self.slot() != 0
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            Some(kind) => write!(f, "Handle({}:{})", kind, self.slot()),
            None => write!(f, "Handle(0x{:04X})", self.0),
        }
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_layout() {
        let handle = Handle::new(ResourceType::Texture, 0x123);
        assert_eq!(handle.raw(), 0x2123);
        assert_eq!(handle.slot(), 0x123);
        assert_eq!(handle.kind(), Some(ResourceType::Texture));
        assert!(handle.is(ResourceType::Texture));
        assert!(!handle.is(ResourceType::Shader));
    }

    #[test]
    fn test_zero_slot_is_invalid_for_every_type() {
        assert!(!Handle::INVALID.is_valid());
        assert!(!Handle::new(ResourceType::Shader, 0).is_valid());
        assert!(!Handle::new(ResourceType::Index, 0).is(ResourceType::Index));
    }

    #[test]
    fn test_slot_is_truncated_to_twelve_bits() {
        let handle = Handle::new(ResourceType::Vertex, 0x1FFF);
        assert_eq!(handle.slot(), 0x0FFF);
        assert_eq!(handle.kind(), Some(ResourceType::Vertex));
    }

    #[test]
    fn test_unknown_tag() {
        let handle = Handle::from_raw(0xF001);
        assert_eq!(handle.kind(), None);
        assert_eq!(format!("{:?}", handle), "Handle(0xF001)");
    }
}
