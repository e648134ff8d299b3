use thiserror::Error;

/// Structured errors surfaced by the rendering pipeline. Plugin failures are not among them: a
/// failing plugin degrades the affected node to its default rendering instead.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("markdown formatting failed: {message}")]
    Markdown { message: String },
}
