//! Math utilities and types
//!
//! Provides the math types used for view transforms and texture regions.

use serde::{Deserialize, Serialize};

pub use nalgebra::{Matrix4, Vector2};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// Integer screen-space rectangle in pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge
    pub x: u16,
    /// Top edge
    pub y: u16,
    /// Width in pixels
    pub w: u16,
    /// Height in pixels
    pub h: u16,
}

impl Rect {
    /// Create a new rectangle
    pub const fn new(x: u16, y: u16, w: u16, h: u16) -> Self {
        Self { x, y, w, h }
    }

    /// A zero rectangle means "unset" for viewports and scissors
    pub const fn is_zero(&self) -> bool {
        self.x == 0 && self.y == 0 && self.w == 0 && self.h == 0
    }

    /// Scale every edge by a display pixel ratio, saturating at `u16::MAX`
    pub fn scaled(&self, pixel_ratio: f32) -> Self {
        let scale = |v: u16| (f32::from(v) * pixel_ratio).round().clamp(0.0, f32::from(u16::MAX)) as u16;
        Self {
            x: scale(self.x),
            y: scale(self.y),
            w: scale(self.w),
            h: scale(self.h),
        }
    }
}

/// Utility functions for common math operations
pub mod utils {
    /// Round up to the next power of two (`0` and `1` both map to `1`)
    ///
    /// Returns `None` when the result does not fit in a `u32`.
    pub const fn next_power_of_two(value: u32) -> Option<u32> {
        if value == 0 {
            return Some(1);
        }
        value.checked_next_power_of_two()
    }

    /// Round `value` up to a multiple of `align` (which must be a power of two)
    pub const fn align_up(value: usize, align: usize) -> usize {
        (value + align - 1) & !(align - 1)
    }
}
