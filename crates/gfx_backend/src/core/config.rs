//! # Unified Configuration System
//!
//! This module consolidates all configuration structures for the backend.
//!
//! ## Configuration Categories
//!
//! - **Pool Limits**: Fixed capacities of the GPU resource pools
//! - **Queue Config**: Draw capacity, uniform arena size, clip rects, sort mode
//! - **Frame Config**: Frame scratch sizing and back-buffer dimensions
//! - **Logging**: Default `env_logger` filter used by applications

use serde::{Serialize, Deserialize};

// Re-export from the config module for compatibility
pub use crate::config::{Config, ConfigError};

use crate::render::handle::MAX_SLOTS;
use crate::render::queue::{SortMode, MAX_QUEUE_SIZE};
use crate::render::resources::{
    MAX_INDEX_BUFFERS, MAX_SHADERS, MAX_TEXTURES, MAX_UNIFORMS, MAX_VERTEX_BUFFERS,
};

/// Default uniform arena capacity in bytes
pub const DEFAULT_UNIFORM_ARENA_BYTES: u32 = 64 * 1024;

/// Default number of clip rectangles per frame
pub const DEFAULT_MAX_CLIP_RECTS: u16 = 1024;

/// Default frame stack capacity in bytes (~100K)
pub const DEFAULT_FRAME_STACK_BYTES: usize = 100 * 1024;

/// # Pool Limits
///
/// Capacity of each resource pool. Slot 0 is reserved, so a pool of capacity
/// `n` holds at most `n - 1` live resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolLimits {
    /// Index buffer slots
    pub index_buffers: u16,
    /// Vertex buffer slots
    pub vertex_buffers: u16,
    /// Texture slots
    pub textures: u16,
    /// Uniform slots
    pub uniforms: u16,
    /// Shader program slots
    pub shaders: u16,
}

impl PoolLimits {
    /// Validate every pool fits the 12-bit slot space and can hold at least one resource
    pub fn validate(&self) -> Result<(), ConfigError> {
        let pools = [
            ("index_buffers", self.index_buffers),
            ("vertex_buffers", self.vertex_buffers),
            ("textures", self.textures),
            ("uniforms", self.uniforms),
            ("shaders", self.shaders),
        ];
        for (name, capacity) in pools {
            if capacity < 2 {
                return Err(ConfigError::Invalid(format!(
                    "pool '{}' needs at least 2 slots (slot 0 is reserved), got {}",
                    name, capacity
                )));
            }
            if capacity > MAX_SLOTS {
                return Err(ConfigError::Invalid(format!(
                    "pool '{}' capacity {} exceeds the handle slot space of {}",
                    name, capacity, MAX_SLOTS
                )));
            }
        }
        Ok(())
    }
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            index_buffers: MAX_INDEX_BUFFERS,
            vertex_buffers: MAX_VERTEX_BUFFERS,
            textures: MAX_TEXTURES,
            uniforms: MAX_UNIFORMS,
            shaders: MAX_SHADERS,
        }
    }
}

/// # Queue Configuration
///
/// Sizing of the per-frame render queue and its uniform arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum draws submitted per frame
    pub max_draws: usize,
    /// Uniform arena capacity in bytes
    pub uniform_arena_bytes: u32,
    /// Maximum scissor rectangles registered per frame
    pub max_clip_rects: u16,
    /// Ordering applied at flush
    pub sort_mode: SortMode,
}

impl QueueConfig {
    /// Set the sort mode
    pub fn with_sort_mode(mut self, sort_mode: SortMode) -> Self {
        self.sort_mode = sort_mode;
        self
    }

    /// Set the draw capacity
    pub fn with_max_draws(mut self, max_draws: usize) -> Self {
        self.max_draws = max_draws;
        self
    }

    /// Set the uniform arena size
    pub fn with_uniform_arena_bytes(mut self, bytes: u32) -> Self {
        self.uniform_arena_bytes = bytes;
        self
    }

    /// Validate queue sizing
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_draws == 0 {
            return Err(ConfigError::Invalid("max_draws must be at least 1".to_string()));
        }
        // Draw indices are stored as u16 in the sort list
        if self.max_draws > usize::from(u16::MAX) + 1 {
            return Err(ConfigError::Invalid(format!(
                "max_draws {} exceeds the 16-bit draw index space",
                self.max_draws
            )));
        }
        if self.uniform_arena_bytes < 4 {
            return Err(ConfigError::Invalid(
                "uniform_arena_bytes must hold at least one opcode".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_draws: MAX_QUEUE_SIZE,
            uniform_arena_bytes: DEFAULT_UNIFORM_ARENA_BYTES,
            max_clip_rects: DEFAULT_MAX_CLIP_RECTS,
            sort_mode: SortMode::Ascending,
        }
    }
}

/// # Frame Configuration
///
/// Per-frame CPU scratch and back-buffer description.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// Frame stack capacity in bytes
    pub stack_bytes: usize,
    /// Back-buffer width in points
    pub width: u16,
    /// Back-buffer height in points
    pub height: u16,
    /// Display pixel ratio applied to view rectangles
    pub pixel_ratio: f32,
}

impl FrameConfig {
    /// Set the back-buffer size and pixel ratio
    pub fn with_surface(mut self, width: u16, height: u16, pixel_ratio: f32) -> Self {
        self.width = width;
        self.height = height;
        self.pixel_ratio = pixel_ratio;
        self
    }

    /// Validate frame sizing
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.pixel_ratio.is_finite() && self.pixel_ratio > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "pixel_ratio must be positive, got {}",
                self.pixel_ratio
            )));
        }
        Ok(())
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            stack_bytes: DEFAULT_FRAME_STACK_BYTES,
            width: 480,
            height: 320,
            pixel_ratio: 1.0,
        }
    }
}

/// # Backend Configuration
///
/// Top-level configuration consumed by [`crate::render::Graphics::init`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Log filter applications pass to `env_logger`
    pub log_level: String,
    /// Resource pool capacities
    pub pools: PoolLimits,
    /// Render queue sizing
    pub queue: QueueConfig,
    /// Frame scratch and surface
    pub frame: FrameConfig,
}

impl BackendConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self {
            log_level: "info".to_string(),
            pools: PoolLimits::default(),
            queue: QueueConfig::default(),
            frame: FrameConfig::default(),
        }
    }

    /// Set log level
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Set pool limits
    pub fn with_pools(mut self, pools: PoolLimits) -> Self {
        self.pools = pools;
        self
    }

    /// Set queue configuration
    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    /// Set frame configuration
    pub fn with_frame(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pools.validate()?;
        self.queue.validate()?;
        self.frame.validate()?;
        Ok(())
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl Config for BackendConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = BackendConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pools.index_buffers, 2048);
        assert_eq!(config.pools.vertex_buffers, 2048);
        assert_eq!(config.pools.textures, 1024);
        assert_eq!(config.pools.uniforms, 256);
        assert_eq!(config.pools.shaders, 32);
        assert_eq!(config.queue.max_draws, 8192);
    }

    #[test]
    fn test_pool_limit_validation() {
        let too_big = PoolLimits { textures: 5000, ..PoolLimits::default() };
        assert!(matches!(too_big.validate(), Err(ConfigError::Invalid(_))));

        let too_small = PoolLimits { shaders: 1, ..PoolLimits::default() };
        assert!(too_small.validate().is_err());
    }

    #[test]
    fn test_queue_validation() {
        assert!(QueueConfig::default().with_max_draws(0).validate().is_err());
        assert!(QueueConfig::default().with_max_draws(70_000).validate().is_err());
        assert!(QueueConfig::default().with_uniform_arena_bytes(2).validate().is_err());
    }

    #[test]
    fn test_frame_validation() {
        let frame = FrameConfig::default().with_surface(800, 600, 0.0);
        assert!(frame.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let text = r#"
            log_level = "debug"

            [queue]
            sort_mode = "Descending"
            max_draws = 16
        "#;
        let config = BackendConfig::from_str_with_format(text, "backend.toml").unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.queue.sort_mode, SortMode::Descending);
        assert_eq!(config.queue.max_draws, 16);
        assert_eq!(config.queue.uniform_arena_bytes, DEFAULT_UNIFORM_ARENA_BYTES);
        assert_eq!(config.pools, PoolLimits::default());
    }

    #[test]
    fn test_ron_round_trip_through_file() {
        let path = std::env::temp_dir().join("gfx_backend_config_test.ron");
        let path = path.to_str().unwrap();
        let config = BackendConfig::new()
            .with_queue(QueueConfig::default().with_sort_mode(SortMode::Sequential));
        config.save_to_file(path).unwrap();

        let loaded = BackendConfig::load_from_file(path).unwrap();
        assert_eq!(loaded, config);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_unsupported_format() {
        let result = BackendConfig::from_str_with_format("", "backend.yaml");
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }
}
