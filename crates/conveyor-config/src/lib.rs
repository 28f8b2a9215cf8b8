//! # Conveyor Config
//!
//! Layered configuration for Conveyor: defaults, environment-specific
//! files, local overrides, and `CONVEYOR__`-prefixed environment
//! variables, with runtime refresh support.

mod app_config;
mod loader;

pub use app_config::*;
pub use loader::*;
