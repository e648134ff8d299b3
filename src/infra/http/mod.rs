mod middleware;
mod public;

pub use middleware::REQUEST_ID_HEADER;
pub use public::{HttpState, build_router};

use axum::{
    body::Body,
    http::{HeaderValue, Request, header::ACCESS_CONTROL_ALLOW_ORIGIN},
    middleware::Next,
    response::Response,
};

/// Browser editors post documents from arbitrary origins, so every response is readable
/// cross-origin.
async fn allow_any_origin(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}
