//! Transport boundary between the renderer and plugin services.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::plugin::DiscoveryPayload;

#[derive(Debug, Error)]
pub enum PluginClientError {
    #[error("request to `{url}` failed: {message}")]
    Transport { url: String, message: String },
    #[error("`{url}` responded with status {status}")]
    Status { url: String, status: u16 },
    #[error("invalid discovery payload from `{url}`: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl PluginClientError {
    pub fn transport(url: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Transport {
            url: url.into(),
            message: err.to_string(),
        }
    }
}

/// Network operations the registry and dispatcher need from a plugin.
#[async_trait]
pub trait PluginClient: Send + Sync {
    /// `GET` the discovery document at `url`.
    async fn fetch_descriptor(&self, url: &str) -> Result<DiscoveryPayload, PluginClientError>;

    /// Form-encoded `POST` to `route`, returning the response body as replacement text.
    async fn invoke(
        &self,
        route: &str,
        form: &[(String, String)],
    ) -> Result<String, PluginClientError>;
}
