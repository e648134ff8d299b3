mod config;
mod dispatch;
mod rewrite;

use std::{sync::Arc, time::Duration};

use tracing::debug;

use crate::{
    application::{plugins::PluginClient, render::types::RenderError},
    domain::plugin::PluginList,
};

pub use config::default_options;
pub use dispatch::{METRIC_PLUGIN_FAILURES, METRIC_PLUGIN_INVOCATIONS, METRIC_PLUGIN_LATENCY};

use dispatch::Dispatcher;
use rewrite::{LeafPlan, plan_document};

/// Comrak-based renderer that lets discovered plugins override the output of individual leaves.
pub struct OverrideRenderService {
    options: comrak::Options<'static>,
    client: Arc<dyn PluginClient>,
    timeout: Duration,
}

impl OverrideRenderService {
    /// `timeout` bounds every single plugin invocation.
    pub fn new(client: Arc<dyn PluginClient>, timeout: Duration) -> Self {
        Self {
            options: default_options(),
            client,
            timeout,
        }
    }

    pub async fn render(&self, markdown: &str, plugins: &PluginList) -> Result<String, RenderError> {
        let plan = plan_document(markdown, plugins, &self.options)?;
        if plan.leaves.is_empty() {
            return Ok(plan.html);
        }

        debug!(
            target = "mdrelay::render",
            leaves = plan.leaves.len(),
            plugins = plugins.len(),
            "dispatching matched leaves"
        );

        let dispatcher = Dispatcher::new(self.client.as_ref(), plugins, self.timeout);
        let mut fragments = Vec::with_capacity(plan.leaves.len());
        for leaf in &plan.leaves {
            fragments.push(dispatcher.resolve(leaf).await);
        }

        Ok(restore_stage(&plan.html, &plan.marker, &plan.leaves, fragments))
    }
}

/// Single pass over `html`, splicing each leaf's fragment over its placeholder. Each placeholder
/// is substituted at most once.
fn restore_stage(html: &str, marker: &str, leaves: &[LeafPlan], fragments: Vec<String>) -> String {
    let mut fragments: Vec<Option<String>> = fragments.into_iter().map(Some).collect();
    let mut restored = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(start) = rest.find(marker) {
        restored.push_str(&rest[..start]);
        let tail = &rest[start..];
        let digits = tail[marker.len()..]
            .bytes()
            .take_while(u8::is_ascii_digit)
            .count();
        let index = tail[marker.len()..marker.len() + digits].parse::<usize>().ok();

        let spliced = index.and_then(|index| {
            let leaf = leaves.get(index)?;
            if !tail.starts_with(&leaf.token) {
                return None;
            }
            let fragment = fragments.get_mut(index)?.take()?;
            Some((fragment, leaf.token.len()))
        });

        match spliced {
            Some((fragment, consumed)) => {
                restored.push_str(&fragment);
                rest = &tail[consumed..];
            }
            None => {
                restored.push_str(marker);
                rest = &tail[marker.len()..];
            }
        }
    }

    restored.push_str(rest);
    restored
}
