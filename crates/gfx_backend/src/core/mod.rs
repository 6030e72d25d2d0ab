//! # Core Backend Module
//!
//! Shared configuration used by every part of the backend.
//!
//! ## Organization
//!
//! - **Config**: Pool limits, queue sizing, frame scratch sizing and logging

pub mod config;

// Re-export foundation modules for convenience
pub use crate::foundation;

// Re-export commonly used config types
pub use config::{
    BackendConfig,
    PoolLimits,
    QueueConfig,
    FrameConfig,
    Config,
    ConfigError,
};
