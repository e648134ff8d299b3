//! Plugin discovery over the configured route table.

use std::{sync::Arc, time::Duration};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use futures::stream::{self, StreamExt};
use metrics::counter;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    application::plugins::{PluginClient, PluginClientError},
    config::DiscoverySettings,
    domain::{
        node::UnknownNodeKind,
        plugin::{PluginDescriptor, PluginList},
    },
};

pub const METRIC_DISCOVERY_SKIPPED: &str = "mdrelay_discovery_skipped_total";

/// The route table could not be decoded. No plugin universe exists without it, so this fails the
/// whole request.
#[derive(Debug, Error)]
pub enum RouteTableError {
    #[error("route table is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("route table is not a JSON object: {0}")]
    Json(#[from] serde_json::Error),
}

/// A single candidate could not be turned into a plugin; discovery of the others continues.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("invalid candidate url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error(transparent)]
    Client(#[from] PluginClientError),
    #[error("discovery timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    NodeKind(#[from] UnknownNodeKind),
}

impl DiscoveryError {
    fn reason(&self) -> &'static str {
        match self {
            DiscoveryError::InvalidUrl(_) => "invalid_url",
            DiscoveryError::Client(PluginClientError::Transport { .. }) => "transport",
            DiscoveryError::Client(PluginClientError::Status { .. }) => "status",
            DiscoveryError::Client(PluginClientError::Decode { .. }) => "decode",
            DiscoveryError::Timeout(_) => "timeout",
            DiscoveryError::NodeKind(_) => "node_kind",
        }
    }
}

/// Candidate service URLs keyed in the order they appear in the encoded document.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: serde_json::Map<String, serde_json::Value>,
}

impl RouteTable {
    /// Decode a base64-encoded JSON object. Only the keys are used.
    pub fn decode(encoded: &str) -> Result<Self, RouteTableError> {
        let bytes = STANDARD.decode(encoded.trim())?;
        let routes = serde_json::from_slice(&bytes)?;
        Ok(Self { routes })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Routes served over the secure prefix, excluding this service's own routes.
    pub fn candidates<'a>(
        &'a self,
        secure_prefix: &'a str,
        self_prefix: &'a str,
    ) -> impl Iterator<Item = &'a str> + 'a {
        self.routes.keys().map(String::as_str).filter(move |route| {
            route.starts_with(secure_prefix) && !route.starts_with(self_prefix)
        })
    }
}

/// Builds the per-request plugin list by querying every candidate route.
pub struct PluginRegistry {
    client: Arc<dyn PluginClient>,
    settings: DiscoverySettings,
}

impl PluginRegistry {
    pub fn new(client: Arc<dyn PluginClient>, settings: DiscoverySettings) -> Self {
        Self { client, settings }
    }

    pub fn settings(&self) -> &DiscoverySettings {
        &self.settings
    }

    pub async fn discover(&self) -> Result<PluginList, RouteTableError> {
        let table = match self.settings.routes.as_deref() {
            Some(encoded) => RouteTable::decode(encoded)?,
            None => RouteTable::default(),
        };

        let candidates: Vec<String> = table
            .candidates(&self.settings.secure_prefix, &self.settings.self_prefix)
            .map(str::to_string)
            .collect();
        debug!(
            target = "mdrelay::discovery",
            routes = table.len(),
            candidates = candidates.len(),
            "discovering plugins"
        );

        let results: Vec<_> = stream::iter(candidates.iter().cloned())
            .map(|candidate: String| async move { self.discover_one(&candidate).await })
            .buffered(self.settings.concurrency.get())
            .collect()
            .await;

        let mut discovered = Vec::with_capacity(results.len());
        for (candidate, result) in candidates.iter().zip(results) {
            match result {
                Ok(plugin) => {
                    info!(
                        target = "mdrelay::discovery",
                        plugin = %plugin.name,
                        route = %plugin.route,
                        node_kind = %plugin.node_kind,
                        composable = plugin.is_composable(),
                        "plugin discovered"
                    );
                    discovered.push(plugin);
                }
                Err(err) => {
                    counter!(METRIC_DISCOVERY_SKIPPED, "reason" => err.reason()).increment(1);
                    warn!(
                        target = "mdrelay::discovery",
                        route = %candidate,
                        error = %err,
                        "skipping candidate"
                    );
                }
            }
        }

        Ok(PluginList::new(discovered))
    }

    async fn discover_one(&self, candidate: &str) -> Result<PluginDescriptor, DiscoveryError> {
        let url = discovery_url(candidate)?;
        let payload = tokio::time::timeout(
            self.settings.timeout,
            self.client.fetch_descriptor(url.as_str()),
        )
        .await
        .map_err(|_| DiscoveryError::Timeout(self.settings.timeout))??;

        Ok(PluginDescriptor::from_payload(candidate, payload)?)
    }
}

/// `<candidate>/discover`, keeping any path the candidate already has.
pub fn discovery_url(candidate: &str) -> Result<Url, url::ParseError> {
    let mut base = Url::parse(candidate)?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join("discover")
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, num::NonZeroUsize, sync::Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::domain::{node::NodeKind, plugin::DiscoveryPayload};

    #[derive(Default)]
    struct ScriptedClient {
        bodies: HashMap<String, String>,
        stalled: Vec<String>,
        requested: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        fn with(mut self, url: &str, body: &str) -> Self {
            self.bodies.insert(url.to_string(), body.to_string());
            self
        }

        fn requested(&self) -> Vec<String> {
            self.requested.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl PluginClient for ScriptedClient {
        async fn fetch_descriptor(
            &self,
            url: &str,
        ) -> Result<DiscoveryPayload, PluginClientError> {
            self.requested.lock().expect("lock").push(url.to_string());
            if self.stalled.iter().any(|stalled| stalled == url) {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            let body = self.bodies.get(url).ok_or_else(|| PluginClientError::Status {
                url: url.to_string(),
                status: 404,
            })?;
            serde_json::from_str(body).map_err(|source| PluginClientError::Decode {
                url: url.to_string(),
                source,
            })
        }

        async fn invoke(
            &self,
            route: &str,
            _form: &[(String, String)],
        ) -> Result<String, PluginClientError> {
            Err(PluginClientError::transport(route, "not scripted"))
        }
    }

    fn settings(routes: Option<&str>) -> DiscoverySettings {
        DiscoverySettings {
            routes: routes.map(|json| STANDARD.encode(json)),
            self_prefix: "https://controller".to_string(),
            secure_prefix: "https://".to_string(),
            timeout: Duration::from_millis(100),
            concurrency: NonZeroUsize::new(4).expect("non-zero"),
        }
    }

    fn registry(client: &Arc<ScriptedClient>, routes: Option<&str>) -> PluginRegistry {
        let client: Arc<dyn PluginClient> = client.clone();
        PluginRegistry::new(client, settings(routes))
    }

    #[tokio::test]
    async fn only_secure_foreign_routes_are_queried() {
        let client = Arc::new(
            ScriptedClient::default()
                .with("https://plugin-a/discover", r#"{"name":"a","type":"text"}"#),
        );
        let routes = r#"{
            "https://controller-x/": {"type": "upstream"},
            "https://plugin-a/": {"type": "upstream"},
            "http://plain/": {"type": "upstream"}
        }"#;

        let plugins = registry(&client, Some(routes)).discover().await.expect("discover");

        assert_eq!(client.requested(), ["https://plugin-a/discover"]);
        assert_eq!(plugins.len(), 1);
        let plugin = plugins.get(0).expect("plugin");
        assert_eq!(plugin.route, "https://plugin-a/");
        assert_eq!(plugin.node_kind, NodeKind::Text);
    }

    #[tokio::test]
    async fn failing_candidates_are_skipped() {
        let client = Arc::new(
            ScriptedClient::default()
                .with("https://broken/discover", "not json")
                .with("https://unknown-kind/discover", r#"{"type":"*ast.Aside"}"#)
                .with("https://good/discover", r#"{"name":"good","type":"*ast.CodeBlock"}"#),
        );
        let routes = r#"{
            "https://missing/": null,
            "https://broken/": null,
            "https://unknown-kind/": null,
            "https://good/": null
        }"#;

        let plugins = registry(&client, Some(routes)).discover().await.expect("discover");

        assert_eq!(client.requested().len(), 4);
        let names: Vec<_> = plugins.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["good"]);
    }

    #[tokio::test]
    async fn discovery_order_follows_route_table_then_partitions() {
        let client = Arc::new(
            ScriptedClient::default()
                .with("https://zeta/discover", r#"{"name":"zeta","type":"text"}"#)
                .with(
                    "https://beta/discover",
                    r#"{"name":"beta","type":"text","flags":{"composable":true}}"#,
                )
                .with("https://alpha/discover", r#"{"name":"alpha","type":"text"}"#)
                .with(
                    "https://gamma/discover",
                    r#"{"name":"gamma","type":"text","flags":{"composable":true}}"#,
                ),
        );
        let routes = r#"{"https://zeta/":1,"https://beta/":1,"https://alpha/":1,"https://gamma/":1}"#;

        let plugins = registry(&client, Some(routes)).discover().await.expect("discover");

        let names: Vec<_> = plugins.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["beta", "gamma", "zeta", "alpha"]);
    }

    #[tokio::test]
    async fn slow_candidates_time_out() {
        let mut scripted = ScriptedClient::default()
            .with("https://slow/discover", r#"{"name":"slow","type":"text"}"#)
            .with("https://fast/discover", r#"{"name":"fast","type":"text"}"#);
        scripted.stalled.push("https://slow/discover".to_string());
        let client = Arc::new(scripted);
        let routes = r#"{"https://slow/":1,"https://fast/":1}"#;

        let plugins = registry(&client, Some(routes)).discover().await.expect("discover");

        let names: Vec<_> = plugins.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["fast"]);
    }

    #[tokio::test]
    async fn malformed_route_tables_fail_the_request() {
        let client = Arc::new(ScriptedClient::default());
        let client_dyn: Arc<dyn PluginClient> = client.clone();

        let mut bad_base64 = settings(None);
        bad_base64.routes = Some("%%% not base64 %%%".to_string());
        let err = PluginRegistry::new(client_dyn.clone(), bad_base64)
            .discover()
            .await
            .unwrap_err();
        assert!(matches!(err, RouteTableError::Base64(_)));

        let err = registry(&client, Some("[1, 2, 3]")).discover().await.unwrap_err();
        assert!(matches!(err, RouteTableError::Json(_)));

        let err = registry(&client, Some("{ nope")).discover().await.unwrap_err();
        assert!(matches!(err, RouteTableError::Json(_)));
        assert!(client.requested().is_empty());
    }

    #[tokio::test]
    async fn missing_route_table_yields_no_plugins() {
        let client = Arc::new(ScriptedClient::default());
        let plugins = registry(&client, None).discover().await.expect("discover");
        assert!(plugins.is_empty());
        assert!(client.requested().is_empty());
    }

    #[tokio::test]
    async fn discovery_runs_on_a_spawned_task() {
        let client = Arc::new(
            ScriptedClient::default()
                .with("https://one/discover", r#"{"name":"one","type":"text"}"#)
                .with("https://two/discover", r#"{"name":"two","type":"emph"}"#),
        );
        let routes = r#"{"https://one/": null, "https://two/": null}"#;
        let registry = Arc::new(registry(&client, Some(routes)));

        let plugins = tokio::spawn(async move { registry.discover().await })
            .await
            .expect("join")
            .expect("discover");

        let names: Vec<_> = plugins.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["one", "two"]);
    }

    #[test]
    fn discovery_url_appends_segment() {
        assert_eq!(
            discovery_url("https://svg.example.com").unwrap().as_str(),
            "https://svg.example.com/discover"
        );
        assert_eq!(
            discovery_url("https://svg.example.com/").unwrap().as_str(),
            "https://svg.example.com/discover"
        );
        assert_eq!(
            discovery_url("https://example.com/svg").unwrap().as_str(),
            "https://example.com/svg/discover"
        );
        assert!(discovery_url("not a url").is_err());
    }
}
