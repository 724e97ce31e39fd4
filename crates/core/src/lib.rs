//! Core utilities for the kiln frame engine.
//!
//! This crate provides foundational types and utilities used across the engine:
//! - Error types and result aliases
//! - Logging initialization
//! - Frame timing state

mod error;
mod logging;
mod timing;

pub use error::{Error, Result};
pub use logging::init_logging;
pub use timing::{FrameTiming, UpdateArgs};
