use super::ProvisionerClient;
use anyhow::{bail, Context as _, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared::models::provisioner::{
    NodeStatusRequest, NodeStatusResponse, ProvisionPriority, ProvisionRequest, ProvisionResponse,
    ProvisionerErrorBody, TerminateRequest, TerminateResponse,
};
use shared::models::ComputeNodeConfig;
use std::time::Duration;
use url::Url;

const PROVISION_PATH: &str = "/api/v1/compute/provision";
const TERMINATE_PATH: &str = "/api/v1/compute/terminate";
const STATUS_PATH: &str = "/api/v1/compute/status";

/// JSON-over-HTTP client for the provisioning backend.
#[derive(Debug, Clone)]
pub struct HttpProvisionerClient {
    base_url: String,
    client: Client,
}

impl HttpProvisionerClient {
    pub fn new(endpoint: &str, api_key: Option<&str>, timeout: Duration) -> Result<Self> {
        let url = Url::parse(endpoint)
            .with_context(|| format!("invalid provisioner endpoint: {endpoint}"))?;

        let mut headers = HeaderMap::new();
        if let Some(key) = api_key {
            let value = HeaderValue::from_str(&format!("Bearer {key}"))
                .context("provisioner api key is not a valid header value")?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .context("failed to build provisioner http client")?;

        Ok(Self {
            base_url: url.as_str().trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {url}");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ProvisionerErrorBody>(&text)
                .map(|body| body.error)
                .unwrap_or(text);
            bail!("provisioner returned {status} for {path}: {message}");
        }

        response
            .json::<R>()
            .await
            .with_context(|| format!("invalid response body from {url}"))
    }
}

#[async_trait]
impl ProvisionerClient for HttpProvisionerClient {
    async fn provision(
        &self,
        node_id: &str,
        config: &ComputeNodeConfig,
        priority: Option<ProvisionPriority>,
    ) -> Result<ProvisionResponse> {
        let mut request = ProvisionRequest::new(config, priority);
        request.node_id = node_id.to_string();
        self.post(PROVISION_PATH, &request).await
    }

    async fn terminate(&self, node_id: &str) -> Result<bool> {
        let request = TerminateRequest {
            node_id: node_id.to_string(),
        };
        let response: TerminateResponse = self.post(TERMINATE_PATH, &request).await?;
        Ok(response.success)
    }

    async fn status(&self, node_id: &str) -> Result<NodeStatusResponse> {
        let request = NodeStatusRequest {
            node_id: node_id.to_string(),
        };
        self.post(STATUS_PATH, &request).await
    }
}
