//! mdrelay renders markdown to HTML and lets discovered plugin services override how individual
//! document nodes are rendered.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
