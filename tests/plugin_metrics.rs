mod common;

use std::{collections::HashSet, sync::Arc};

use mdrelay::application::{
    registry::METRIC_DISCOVERY_SKIPPED,
    render::{METRIC_PLUGIN_FAILURES, METRIC_PLUGIN_INVOCATIONS, METRIC_PLUGIN_LATENCY},
};
use metrics_util::debugging::DebuggingRecorder;

use common::{FakeNetwork, encode_routes, http_state};

fn upper(text: &str) -> String {
    text.to_uppercase()
}

#[tokio::test]
async fn dispatch_and_discovery_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let mut network = FakeNetwork::default().plugin(
        "https://shout/",
        r#"{"name":"shout","type":"emph"}"#,
        upper,
    );
    network.descriptors.insert(
        "https://dead/discover".to_string(),
        r#"{"name":"dead","type":"code"}"#.to_string(),
    );
    let network = Arc::new(network);
    let routes = encode_routes(r#"{"https://shout/":1,"https://dead/":1,"https://gone/":1}"#);
    let state = http_state(&network, Some(routes));

    let plugins = state.registry.discover().await.expect("discover");
    assert_eq!(plugins.len(), 2);

    let html = state
        .renderer
        .render("*hi* and `code`", &plugins)
        .await
        .expect("render");
    assert_eq!(html, "<p><em>HI</em> and <code>code</code></p>\n");

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    for metric in [
        METRIC_PLUGIN_INVOCATIONS,
        METRIC_PLUGIN_FAILURES,
        METRIC_PLUGIN_LATENCY,
        METRIC_DISCOVERY_SKIPPED,
    ] {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
