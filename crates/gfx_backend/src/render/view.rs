//! Per-view state
//!
//! A view is one of [`MAX_VIEWS`] independent viewport/clear/transform
//! contexts. Its state is set once per frame and applied by the render context
//! whenever the draw stream crosses into the view.

use bitflags::bitflags;

use crate::foundation::math::{Mat4, Rect};

/// Number of concurrent views
pub const MAX_VIEWS: usize = 4;

bitflags! {
    /// Buffers cleared when a view begins
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ClearFlags: u16 {
        /// Color buffer
        const COLOR = 0x1;
        /// Depth buffer
        const DEPTH = 0x2;
        /// Stencil buffer
        const STENCIL = 0x4;
    }
}

/// Clear parameters of a view
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ViewClear {
    /// Which buffers to clear
    pub flags: ClearFlags,
    /// Clear color as 0xRRGGBBAA
    pub rgba: u32,
    /// Depth clear value
    pub depth: f32,
    /// Stencil clear value
    pub stencil: u8,
}

impl ViewClear {
    /// Clear color as normalized floats
    pub fn color(&self) -> [f32; 4] {
        let [r, g, b, a] = self.rgba.to_be_bytes();
        [r, g, b, a].map(|c| f32::from(c) / 255.0)
    }
}

/// View and projection matrices
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewTransform {
    /// World to view
    pub view: Mat4,
    /// View to clip
    pub projection: Mat4,
}

/// Complete state of one view
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct View {
    /// Viewport in points; zero means the whole back-buffer
    pub viewport: Rect,
    /// View-wide scissor in points; zero disables it
    pub scissor: Rect,
    /// Clear parameters
    pub clear: ViewClear,
    /// Optional transform, `None` leaves the device's matrices untouched
    pub transform: Option<ViewTransform>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_clear_color_unpacking() {
        let clear = ViewClear { rgba: 0xFF80_00FF, ..ViewClear::default() };
        let [r, g, b, a] = clear.color();
        assert_relative_eq!(r, 1.0);
        assert_relative_eq!(g, 128.0 / 255.0);
        assert_relative_eq!(b, 0.0);
        assert_relative_eq!(a, 1.0);
    }

    #[test]
    fn test_default_view_is_unset() {
        let view = View::default();
        assert!(view.viewport.is_zero());
        assert!(view.clear.flags.is_empty());
        assert!(view.transform.is_none());
    }
}
