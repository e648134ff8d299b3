//! reqwest-backed plugin transport.

use async_trait::async_trait;
use reqwest::{
    Client, Response,
    header::{CONTENT_TYPE, HeaderValue},
};
use url::form_urlencoded;

use crate::{
    application::plugins::{PluginClient, PluginClientError},
    domain::plugin::DiscoveryPayload,
};

use super::error::InfraError;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Clone, Debug)]
pub struct HttpPluginClient {
    client: Client,
}

impl HttpPluginClient {
    /// Timeouts are applied per call by the registry and dispatcher, not on the client.
    pub fn new() -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .build()
            .map_err(|err| InfraError::client(err.to_string()))?;
        Ok(Self { client })
    }

    pub fn user_agent() -> &'static str {
        concat!("mdrelay/", env!("CARGO_PKG_VERSION"))
    }

    async fn body(url: &str, response: Response) -> Result<Vec<u8>, PluginClientError> {
        let status = response.status();
        if !status.is_success() {
            return Err(PluginClientError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        response
            .bytes()
            .await
            .map(|bytes| bytes.to_vec())
            .map_err(|err| PluginClientError::transport(url, err))
    }
}

#[async_trait]
impl PluginClient for HttpPluginClient {
    async fn fetch_descriptor(&self, url: &str) -> Result<DiscoveryPayload, PluginClientError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| PluginClientError::transport(url, err))?;
        let body = Self::body(url, response).await?;
        serde_json::from_slice(&body).map_err(|source| PluginClientError::Decode {
            url: url.to_string(),
            source,
        })
    }

    async fn invoke(
        &self,
        route: &str,
        form: &[(String, String)],
    ) -> Result<String, PluginClientError> {
        let encoded = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(form.iter())
            .finish();
        let response = self
            .client
            .post(route)
            .header(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE))
            .body(encoded)
            .send()
            .await
            .map_err(|err| PluginClientError::transport(route, err))?;
        let body = Self::body(route, response).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}
