//! CLI command implementations.

pub mod backends;
pub mod common;
pub mod rm;
pub mod submit;
pub mod version;
