//! Application services: plugin discovery and the override rendering pipeline.

pub mod error;
pub mod plugins;
pub mod registry;
pub mod render;
