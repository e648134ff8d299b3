//! Domain layer types and invariants.

pub mod node;
pub mod plugin;
