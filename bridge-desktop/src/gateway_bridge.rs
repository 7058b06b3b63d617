//! Direct-to-gateway [`QdnBridge`] for hosts without a wallet shell.
//!
//! Search, status and balance queries map onto public gateway endpoints.
//! Actions that need the user's keys (publish, encrypt, account) are not
//! available through this adapter.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{HttpClient, HttpRequest, RetryPolicy},
    qdn::{BridgeRequest, BridgeResponse, QdnBridge, QdnMetadata, ResourceStatus, SearchParams},
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

pub struct GatewayQdnBridge {
    http: Arc<dyn HttpClient>,
    base_url: String,
}

impl GatewayQdnBridge {
    pub fn new(http: Arc<dyn HttpClient>, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn search_url(&self, params: &SearchParams) -> String {
        let query = params
            .query_pairs()
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(&v)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}/arbitrary/resources/search?{}", self.base_url, query)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: String, action: &str) -> Result<T> {
        let response = self
            .http
            .execute_with_retry(HttpRequest::get(url), RetryPolicy::no_retry())
            .await?;

        if !response.is_success() {
            return Err(BridgeError::UnexpectedResponse {
                action: action.to_string(),
                message: format!("gateway returned HTTP {}", response.status),
            });
        }
        response.json()
    }
}

#[async_trait]
impl QdnBridge for GatewayQdnBridge {
    #[instrument(skip(self, request), fields(action = request.action()))]
    async fn call(&self, request: BridgeRequest) -> Result<BridgeResponse> {
        let action = request.action();
        match request {
            BridgeRequest::SearchQdnResources(params) => {
                let items: Vec<QdnMetadata> = self.get_json(self.search_url(&params), action).await?;
                debug!(count = items.len(), "Search returned");
                Ok(BridgeResponse::Resources(items))
            }
            BridgeRequest::GetQdnResourceStatus { key, build } => {
                let mut url = format!(
                    "{}/arbitrary/resource/status/{}/{}/{}",
                    self.base_url,
                    key.service,
                    urlencoding::encode(&key.name),
                    urlencoding::encode(&key.identifier)
                );
                if build {
                    url.push_str("?build=true");
                }
                let status: ResourceStatus = self.get_json(url, action).await?;
                Ok(BridgeResponse::Status(status))
            }
            BridgeRequest::GetBalance { address } => {
                let url = format!(
                    "{}/addresses/balance/{}",
                    self.base_url,
                    urlencoding::encode(&address)
                );
                let balance: f64 = self.get_json(url, action).await?;
                Ok(BridgeResponse::Balance(balance))
            }
            BridgeRequest::PublishMultipleQdnResources { .. }
            | BridgeRequest::EncryptData { .. }
            | BridgeRequest::GetUserAccount => Err(BridgeError::NotAvailable(format!(
                "{} requires a signing host",
                action
            ))),
        }
    }

    async fn call_with_timeout(
        &self,
        request: BridgeRequest,
        timeout: Duration,
    ) -> Result<BridgeResponse> {
        tokio::time::timeout(timeout, self.call(request))
            .await
            .map_err(|_| BridgeError::Timeout(timeout))?
    }
}
