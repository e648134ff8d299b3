use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::node::{NodeKind, UnknownNodeKind};

pub const COMPOSABLE_FLAG: &str = "composable";

/// Body returned by a plugin's `/discover` endpoint.
///
/// A `route` field, if the plugin echoes one, is ignored: invocation always targets the URL the
/// plugin was discovered at.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DiscoveryPayload {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub flags: BTreeMap<String, bool>,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
}

/// A discovered rendering plugin, valid for the duration of one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginDescriptor {
    pub name: String,
    pub route: String,
    pub node_kind: NodeKind,
    pub flags: BTreeMap<String, bool>,
    /// Output parameter name mapped to the node field it is read from.
    pub attrs: BTreeMap<String, String>,
}

impl PluginDescriptor {
    pub fn from_payload(
        route: impl Into<String>,
        payload: DiscoveryPayload,
    ) -> Result<Self, UnknownNodeKind> {
        let node_kind = payload.node_type.parse()?;
        Ok(Self {
            name: payload.name,
            route: route.into(),
            node_kind,
            flags: payload.flags,
            attrs: payload.attrs,
        })
    }

    pub fn is_composable(&self) -> bool {
        self.flags.get(COMPOSABLE_FLAG).copied().unwrap_or(false)
    }
}

/// Plugins in trial order: composable plugins first, each partition in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PluginList {
    plugins: Vec<PluginDescriptor>,
}

impl PluginList {
    pub fn new(discovered: Vec<PluginDescriptor>) -> Self {
        let (mut plugins, terminal): (Vec<_>, Vec<_>) = discovered
            .into_iter()
            .partition(PluginDescriptor::is_composable);
        plugins.extend(terminal);
        Self { plugins }
    }

    pub fn iter(&self) -> impl Iterator<Item = &PluginDescriptor> {
        self.plugins.iter()
    }

    pub fn get(&self, index: usize) -> Option<&PluginDescriptor> {
        self.plugins.get(index)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl<'a> IntoIterator for &'a PluginList {
    type Item = &'a PluginDescriptor;
    type IntoIter = std::slice::Iter<'a, PluginDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.plugins.iter()
    }
}
