//! Core runtime infrastructure.
//!
//! - [`config`] - Configuration parsing and validation
//! - [`runtime`] - Per-member runtime orchestration
//! - [`time`] - Logical tick timing
//! - [`error`] - Error types and adapter-specific mapping

pub mod config;
pub mod error;
pub mod runtime;
pub mod time;
