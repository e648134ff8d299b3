use std::{collections::BTreeMap, time::Duration};

use metrics::{counter, histogram};
use thiserror::Error;
use tokio::time::{Instant, timeout};
use tracing::{debug, warn};

use crate::{
    application::plugins::{PluginClient, PluginClientError},
    domain::plugin::{PluginDescriptor, PluginList},
};

use super::rewrite::LeafPlan;

pub const METRIC_PLUGIN_INVOCATIONS: &str = "mdrelay_plugin_invocations_total";
pub const METRIC_PLUGIN_FAILURES: &str = "mdrelay_plugin_invocation_failures_total";
pub const METRIC_PLUGIN_LATENCY: &str = "mdrelay_plugin_invocation_ms";

const CONTENT_FIELD: &str = "text";

#[derive(Debug, Error)]
pub(crate) enum InvocationError {
    #[error(transparent)]
    Client(#[from] PluginClientError),
    #[error("plugin did not respond within {0:?}")]
    Timeout(Duration),
}

impl InvocationError {
    fn reason(&self) -> &'static str {
        match self {
            InvocationError::Client(PluginClientError::Transport { .. }) => "transport",
            InvocationError::Client(PluginClientError::Status { .. }) => "status",
            InvocationError::Client(PluginClientError::Decode { .. }) => "decode",
            InvocationError::Timeout(_) => "timeout",
        }
    }
}

/// Runs the plugin chain planned for each leaf.
pub(crate) struct Dispatcher<'a> {
    client: &'a dyn PluginClient,
    plugins: &'a PluginList,
    timeout: Duration,
}

impl<'a> Dispatcher<'a> {
    pub(crate) fn new(client: &'a dyn PluginClient, plugins: &'a PluginList, timeout: Duration) -> Self {
        Self {
            client,
            plugins,
            timeout,
        }
    }

    /// HTML that replaces the leaf's placeholder.
    ///
    /// Each matching plugin receives the output of the previous one. A non-composable plugin ends
    /// the chain. Any failure abandons the chain and yields the leaf's default rendering.
    pub(crate) async fn resolve(&self, leaf: &LeafPlan) -> String {
        let mut content = leaf.content.clone();
        let mut matched = false;

        for candidate in &leaf.candidates {
            let Some(plugin) = self.plugins.get(candidate.plugin) else {
                continue;
            };

            match self.invoke(plugin, &content, &candidate.params).await {
                Ok(body) => {
                    content = body;
                    matched = true;
                }
                Err(err) => {
                    counter!(METRIC_PLUGIN_FAILURES, "reason" => err.reason()).increment(1);
                    warn!(
                        target = "mdrelay::render::dispatch",
                        plugin = %plugin.name,
                        route = %plugin.route,
                        node_kind = %leaf.kind,
                        error = %err,
                        "plugin invocation failed, using default rendering"
                    );
                    return leaf.default_html.clone();
                }
            }

            if !plugin.is_composable() {
                break;
            }
        }

        if matched {
            leaf.replacement(content)
        } else {
            leaf.default_html.clone()
        }
    }

    async fn invoke(
        &self,
        plugin: &PluginDescriptor,
        content: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<String, InvocationError> {
        let form = invocation_form(content, params);
        let started = Instant::now();
        let result = timeout(self.timeout, self.client.invoke(&plugin.route, &form))
            .await
            .map_err(|_| InvocationError::Timeout(self.timeout))
            .and_then(|response| response.map_err(InvocationError::from));

        let elapsed = started.elapsed();
        let outcome = if result.is_ok() { "ok" } else { "error" };
        counter!(
            METRIC_PLUGIN_INVOCATIONS,
            "plugin" => plugin.name.clone(),
            "outcome" => outcome
        )
        .increment(1);
        histogram!(METRIC_PLUGIN_LATENCY, "plugin" => plugin.name.clone())
            .record(elapsed.as_secs_f64() * 1000.0);
        debug!(
            target = "mdrelay::render::dispatch",
            plugin = %plugin.name,
            outcome,
            elapsed_ms = elapsed.as_millis() as u64,
            "plugin invoked"
        );

        result
    }
}

/// `text` first, then the extracted parameters by name. A parameter called `text` is dropped so
/// it can never shadow the content.
pub(crate) fn invocation_form(
    content: &str,
    params: &BTreeMap<String, String>,
) -> Vec<(String, String)> {
    let mut form = Vec::with_capacity(params.len() + 1);
    form.push((CONTENT_FIELD.to_string(), content.to_string()));
    form.extend(
        params
            .iter()
            .filter(|(name, _)| name.as_str() != CONTENT_FIELD)
            .map(|(name, value)| (name.clone(), value.clone())),
    );
    form
}
