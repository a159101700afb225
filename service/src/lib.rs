//! Ambient configuration and logging shared by the workspace binaries.

pub mod config;
pub mod logging;
