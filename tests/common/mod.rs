#![allow(dead_code)]

use std::{
    collections::HashMap,
    num::NonZeroUsize,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use mdrelay::{
    application::{
        plugins::{PluginClient, PluginClientError},
        registry::PluginRegistry,
        render::OverrideRenderService,
    },
    config::DiscoverySettings,
    domain::plugin::DiscoveryPayload,
    infra::http::HttpState,
};

/// In-memory plugin network: discovery documents by URL and an uppercase-or-wrap transform per
/// invocation route.
#[derive(Default)]
pub struct FakeNetwork {
    pub descriptors: HashMap<String, String>,
    pub transforms: HashMap<String, fn(&str) -> String>,
    pub invocations: Mutex<Vec<(String, Vec<(String, String)>)>>,
}

impl FakeNetwork {
    pub fn plugin(
        mut self,
        base: &str,
        descriptor: &str,
        transform: fn(&str) -> String,
    ) -> Self {
        self.descriptors
            .insert(format!("{base}discover"), descriptor.to_string());
        self.transforms.insert(base.to_string(), transform);
        self
    }

    pub fn invocations(&self) -> Vec<(String, Vec<(String, String)>)> {
        self.invocations.lock().expect("lock").clone()
    }
}

#[async_trait]
impl PluginClient for FakeNetwork {
    async fn fetch_descriptor(&self, url: &str) -> Result<DiscoveryPayload, PluginClientError> {
        let body = self
            .descriptors
            .get(url)
            .ok_or_else(|| PluginClientError::Status {
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
        form: &[(String, String)],
    ) -> Result<String, PluginClientError> {
        self.invocations
            .lock()
            .expect("lock")
            .push((route.to_string(), form.to_vec()));
        let transform = self
            .transforms
            .get(route)
            .ok_or_else(|| PluginClientError::transport(route, "connection refused"))?;
        Ok(transform(&form[0].1))
    }
}

pub fn encode_routes(json: &str) -> String {
    STANDARD.encode(json)
}

pub fn discovery_settings(routes: Option<String>) -> DiscoverySettings {
    DiscoverySettings {
        routes,
        self_prefix: "https://controller".to_string(),
        secure_prefix: "https://".to_string(),
        timeout: Duration::from_millis(500),
        concurrency: NonZeroUsize::new(4).expect("non-zero"),
    }
}

pub fn http_state(network: &Arc<FakeNetwork>, routes: Option<String>) -> HttpState {
    let client: Arc<dyn PluginClient> = network.clone();
    HttpState {
        registry: Arc::new(PluginRegistry::new(
            client.clone(),
            discovery_settings(routes),
        )),
        renderer: Arc::new(OverrideRenderService::new(
            client,
            Duration::from_millis(500),
        )),
    }
}
