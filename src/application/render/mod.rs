//! Markdown rendering with plugin-provided node overrides.
//!
//! Parsing and default HTML emission stay inside a synchronous planning stage so the comrak arena
//! never crosses an await point. Plugin calls happen afterwards, against owned per-leaf plans, and
//! their results are spliced back into the formatted document.

mod service;
mod types;

pub use service::{
    METRIC_PLUGIN_FAILURES, METRIC_PLUGIN_INVOCATIONS, METRIC_PLUGIN_LATENCY,
    OverrideRenderService, default_options,
};
pub use types::RenderError;
