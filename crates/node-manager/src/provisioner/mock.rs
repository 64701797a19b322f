use super::ProvisionerClient;
use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::json;
use shared::models::provisioner::{
    NodeStatusResponse, ProvisionPriority, ProvisionResponse, RemoteNodeStatus,
};
use shared::models::ComputeNodeConfig;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// In-memory provisioner that records every call it receives.
#[derive(Default)]
pub struct MockProvisionerClient {
    latency: Duration,
    terminate_latency: Duration,
    pending_polls: u32,
    provision_failure: Mutex<Option<String>>,
    terminate_failure: Mutex<Option<String>>,
    provision_calls: AtomicUsize,
    terminate_calls: AtomicUsize,
    status_calls: AtomicUsize,
    provisioned: Mutex<Vec<(String, Option<ProvisionPriority>)>>,
    remaining_polls: Mutex<HashMap<String, u32>>,
    pending_endpoints: Mutex<HashMap<String, String>>,
}

impl MockProvisionerClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay applied to every provision call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Delay applied to every terminate call.
    pub fn with_terminate_latency(mut self, latency: Duration) -> Self {
        self.terminate_latency = latency;
        self
    }

    /// Answer provision calls with a pending status and report ready only
    /// after `polls` status requests.
    pub fn with_async_provisioning(mut self, polls: u32) -> Self {
        self.pending_polls = polls;
        self
    }

    pub async fn set_provision_failure(&self, message: Option<&str>) {
        *self.provision_failure.lock().await = message.map(str::to_string);
    }

    pub async fn set_terminate_failure(&self, message: Option<&str>) {
        *self.terminate_failure.lock().await = message.map(str::to_string);
    }

    pub fn provision_calls(&self) -> usize {
        self.provision_calls.load(Ordering::SeqCst)
    }

    pub fn terminate_calls(&self) -> usize {
        self.terminate_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    /// Node ids and priorities of every provision call, in call order.
    pub async fn provisioned(&self) -> Vec<(String, Option<ProvisionPriority>)> {
        self.provisioned.lock().await.clone()
    }
}

#[async_trait]
impl ProvisionerClient for MockProvisionerClient {
    async fn provision(
        &self,
        node_id: &str,
        _config: &ComputeNodeConfig,
        priority: Option<ProvisionPriority>,
    ) -> Result<ProvisionResponse> {
        let attempt = self.provision_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.provisioned
            .lock()
            .await
            .push((node_id.to_string(), priority));

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if let Some(message) = self.provision_failure.lock().await.clone() {
            bail!(message);
        }

        let endpoint = format!("https://{node_id}.mock.local/{attempt}");

        if self.pending_polls > 0 {
            self.remaining_polls
                .lock()
                .await
                .insert(node_id.to_string(), self.pending_polls);
            self.pending_endpoints
                .lock()
                .await
                .insert(node_id.to_string(), endpoint);
            return Ok(ProvisionResponse {
                status: Some(RemoteNodeStatus::Pending),
                ..Default::default()
            });
        }

        Ok(ProvisionResponse {
            endpoint: Some(endpoint),
            internal_endpoint: Some(format!("http://10.0.0.{attempt}:8080")),
            provider_meta: Some(json!({"mock": true, "attempt": attempt})),
            status: None,
            error: None,
        })
    }

    async fn terminate(&self, node_id: &str) -> Result<bool> {
        self.terminate_calls.fetch_add(1, Ordering::SeqCst);
        if !self.terminate_latency.is_zero() {
            tokio::time::sleep(self.terminate_latency).await;
        }
        self.remaining_polls.lock().await.remove(node_id);
        self.pending_endpoints.lock().await.remove(node_id);

        if let Some(message) = self.terminate_failure.lock().await.clone() {
            bail!(message);
        }
        Ok(true)
    }

    async fn status(&self, node_id: &str) -> Result<NodeStatusResponse> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);

        let mut remaining_polls = self.remaining_polls.lock().await;
        let Some(remaining) = remaining_polls.get_mut(node_id) else {
            return Ok(NodeStatusResponse {
                status: RemoteNodeStatus::Terminated,
                endpoint: None,
                internal_endpoint: None,
                provider_meta: None,
                error: None,
            });
        };

        if *remaining > 1 {
            *remaining -= 1;
            return Ok(NodeStatusResponse {
                status: RemoteNodeStatus::Provisioning,
                endpoint: None,
                internal_endpoint: None,
                provider_meta: None,
                error: None,
            });
        }
        remaining_polls.remove(node_id);

        let endpoint = self.pending_endpoints.lock().await.remove(node_id);
        Ok(NodeStatusResponse {
            status: RemoteNodeStatus::Ready,
            endpoint,
            internal_endpoint: None,
            provider_meta: Some(json!({"mock": true, "async": true})),
            error: None,
        })
    }
}
