use std::sync::Arc;

use axum::{
    Form, Router,
    extract::State,
    http::StatusCode,
    middleware,
    response::Html,
    routing::{get, post},
};
use serde::Deserialize;
use tracing::debug;

use crate::application::{
    error::AppError, registry::PluginRegistry, render::OverrideRenderService,
};

use super::{
    allow_any_origin,
    middleware::{log_responses, set_request_context},
};

#[derive(Clone)]
pub struct HttpState {
    pub registry: Arc<PluginRegistry>,
    pub renderer: Arc<OverrideRenderService>,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/", post(render_document))
        .route("/_health", get(health))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
        .layer(middleware::from_fn(allow_any_origin))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RenderForm {
    text: String,
}

/// Discover plugins for this request and render the posted markdown through them.
async fn render_document(
    State(state): State<HttpState>,
    Form(form): Form<RenderForm>,
) -> Result<Html<String>, AppError> {
    let plugins = state.registry.discover().await?;
    debug!(
        target = "mdrelay::http",
        plugins = plugins.len(),
        bytes = form.text.len(),
        "rendering document"
    );
    let html = state.renderer.render(&form.text, &plugins).await?;
    Ok(Html(html))
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}
