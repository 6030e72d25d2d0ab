//! Foundation module - Core utilities and types
//!
//! This module provides fundamental utilities used throughout the backend:
//! - Math types and screen rectangles
//! - Logging utilities

pub mod math;
pub mod logging;
