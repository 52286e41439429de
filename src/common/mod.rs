//! Shared utilities used across layers.

pub mod clock;
pub mod logger;
