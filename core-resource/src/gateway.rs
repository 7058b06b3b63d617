//! Client for the local node's HTTP gateway.

use std::sync::Arc;

use bridge_traits::{
    HttpClient, HttpRequest, HttpResponse, QdnMetadata, ResourceDetails, ResourceKey,
    ResourceStatus, SearchParams,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{ResourceError, Result};

/// Path segment the gateway reads as "no identifier".
const DEFAULT_IDENTIFIER: &str = "default";

/// What the node knows about a built resource's file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceProperties {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Clone)]
pub struct GatewayClient {
    http: Arc<dyn HttpClient>,
    base_url: String,
}

impl GatewayClient {
    pub fn new(http: Arc<dyn HttpClient>, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn resource_path(key: &ResourceKey) -> String {
        let identifier = if key.identifier.is_empty() {
            DEFAULT_IDENTIFIER
        } else {
            key.identifier.as_str()
        };
        format!(
            "{}/{}/{}",
            key.service,
            urlencoding::encode(&key.name),
            urlencoding::encode(identifier)
        )
    }

    /// Where the node serves the raw resource. Independent of status.
    pub fn resource_url(&self, key: &ResourceKey) -> String {
        format!("{}/arbitrary/{}", self.base_url, Self::resource_path(key))
    }

    pub fn body_url(&self, key: &ResourceKey) -> String {
        format!("{}?encoding=base64", self.resource_url(key))
    }

    pub fn status_url(&self, key: &ResourceKey, build: bool) -> String {
        let url = format!(
            "{}/arbitrary/resource/status/{}",
            self.base_url,
            Self::resource_path(key)
        );
        if build {
            format!("{}?build=true", url)
        } else {
            url
        }
    }

    pub fn properties_url(&self, key: &ResourceKey) -> String {
        format!(
            "{}/arbitrary/resource/properties/{}?build=true",
            self.base_url,
            Self::resource_path(key)
        )
    }

    pub fn metadata_url(&self, key: &ResourceKey) -> String {
        format!(
            "{}/arbitrary/metadata/{}",
            self.base_url,
            Self::resource_path(key)
        )
    }

    pub fn search_url(&self, params: &SearchParams) -> String {
        let query: Vec<String> = params
            .query_pairs()
            .into_iter()
            .map(|(name, value)| format!("{}={}", name, urlencoding::encode(&value)))
            .collect();
        format!(
            "{}/arbitrary/resources/search?{}",
            self.base_url,
            query.join("&")
        )
    }

    async fn get_ok(&self, url: String) -> Result<HttpResponse> {
        let response = self.http.execute(HttpRequest::get(url.clone())).await?;
        if !response.is_success() {
            return Err(ResourceError::Gateway {
                status: response.status,
                url,
            });
        }
        Ok(response)
    }

    /// The resource body as the gateway's base64 text.
    #[instrument(skip(self, key), fields(key = %key))]
    pub async fn fetch_body_base64(&self, key: &ResourceKey) -> Result<String> {
        let response = self.get_ok(self.body_url(key)).await?;
        let body = response.text()?;
        debug!(bytes = body.len(), "Fetched resource body");
        Ok(body.trim().to_string())
    }

    pub async fn status(&self, key: &ResourceKey, build: bool) -> Result<ResourceStatus> {
        let response = self.get_ok(self.status_url(key, build)).await?;
        Ok(response.json()?)
    }

    /// Properties lookup, which also makes the node (re)build the resource.
    pub async fn properties(&self, key: &ResourceKey) -> Result<ResourceProperties> {
        let response = self.get_ok(self.properties_url(key)).await?;
        Ok(response.json()?)
    }

    pub async fn metadata(&self, key: &ResourceKey) -> Result<ResourceDetails> {
        let response = self.get_ok(self.metadata_url(key)).await?;
        Ok(response.json()?)
    }

    pub async fn search(&self, params: &SearchParams) -> Result<Vec<QdnMetadata>> {
        let response = self.get_ok(self.search_url(params)).await?;
        Ok(response.json()?)
    }

    /// Ranged GET of the raw resource. Any status is returned as-is so the
    /// caller can read `206`, `200` and `416` itself.
    pub async fn fetch_range(
        &self,
        key: &ResourceKey,
        start: u64,
        end_inclusive: u64,
    ) -> Result<HttpResponse> {
        let request = HttpRequest::get(self.resource_url(key)).range(start, end_inclusive);
        Ok(self.http.execute(request).await?)
    }

    /// Total resource size from a HEAD request.
    pub async fn content_length(&self, key: &ResourceKey) -> Result<Option<u64>> {
        let url = self.resource_url(key);
        let response = self.http.execute(HttpRequest::head(url.clone())).await?;
        if !response.is_success() {
            return Err(ResourceError::Gateway {
                status: response.status,
                url,
            });
        }
        Ok(response.content_length())
    }
}
