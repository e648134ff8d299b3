mod common;

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use mdrelay::infra::http::{REQUEST_ID_HEADER, build_router};
use tower::ServiceExt;

use common::{FakeNetwork, encode_routes, http_state};

fn form_request(body: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .expect("request")
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

fn upper(text: &str) -> String {
    text.to_uppercase()
}

#[tokio::test]
async fn renders_posted_markdown_without_plugins() {
    let network = Arc::new(FakeNetwork::default());
    let router = build_router(http_state(&network, None));

    let response = router
        .oneshot(form_request("text=**bold**+text"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "*"
    );
    assert!(
        response.headers()[header::CONTENT_TYPE]
            .to_str()
            .expect("content type")
            .starts_with("text/html")
    );
    assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    insta::assert_snapshot!(body_text(response).await, @"<p><strong>bold</strong> text</p>");
    assert!(network.invocations().is_empty());
}

#[tokio::test]
async fn missing_text_renders_empty_document() {
    let network = Arc::new(FakeNetwork::default());
    let router = build_router(http_state(&network, None));

    let response = router.oneshot(form_request("")).await.expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "");
}

#[tokio::test]
async fn discovered_plugins_override_matching_nodes() {
    let network = Arc::new(FakeNetwork::default().plugin(
        "https://shout/",
        r#"{"name":"shout","type":"Emph"}"#,
        upper,
    ));
    let routes = encode_routes(r#"{"https://shout/":{"type":"upstream"}}"#);
    let router = build_router(http_state(&network, Some(routes)));

    let response = router
        .oneshot(form_request("text=say+*hello*"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "<p>say <em>HELLO</em></p>\n");
}

#[tokio::test]
async fn malformed_route_table_is_a_server_error() {
    let network = Arc::new(FakeNetwork::default());
    let router = build_router(http_state(&network, Some("not base64!".to_string())));

    let response = router
        .oneshot(form_request("text=hi"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "*"
    );
    assert_eq!(body_text(response).await, "Service misconfigured");
}

#[tokio::test]
async fn get_on_render_endpoint_is_not_allowed() {
    let network = Arc::new(FakeNetwork::default());
    let router = build_router(http_state(&network, None));

    let response = router
        .oneshot(Request::get("/").body(Body::empty()).expect("request"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "*"
    );
}

#[tokio::test]
async fn non_form_bodies_are_rejected() {
    let network = Arc::new(FakeNetwork::default());
    let router = build_router(http_state(&network, None));

    let request = Request::builder()
        .method(Method::POST)
        .uri("/")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"text":"hi"}"#))
        .expect("request");
    let response = router.oneshot(request).await.expect("response");

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn health_endpoint_has_no_content() {
    let network = Arc::new(FakeNetwork::default());
    let router = build_router(http_state(&network, None));

    let response = router
        .oneshot(Request::get("/_health").body(Body::empty()).expect("request"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}
