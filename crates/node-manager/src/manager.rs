use crate::config::ManagerConfig;
use crate::coordinator::ProvisioningCoordinator;
use crate::error::ManagerError;
use crate::executor::RequestExecutor;
use crate::metadata::MetadataProjector;
use crate::models::node::{ComputeNode, NodeMetadata};
use crate::models::provision::{ProvisionNodeOptions, ProvisionResult};
use crate::provisioner::{HttpProvisionerClient, ProvisionerClient};
use crate::reaper::IdleReaper;
use crate::store::NodeStore;
use crate::TaskHandles;
use anyhow::Result;
use log::{info, warn};
use shared::models::ComputeNodeConfig;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Owns the node registry and exposes the manager's public operations.
///
/// Background work (the idle reaper) only runs after [`start`](Self::start).
/// [`shutdown`](Self::shutdown) stops it together with any status polling
/// but leaves provisioned nodes running.
pub struct ComputeNodeManager {
    config: ManagerConfig,
    store: Arc<NodeStore>,
    coordinator: ProvisioningCoordinator,
    executor: RequestExecutor,
    metadata: MetadataProjector,
    reaper: Arc<IdleReaper>,
    cancellation_token: CancellationToken,
    task_handles: TaskHandles,
}

impl ComputeNodeManager {
    pub fn new(config: ManagerConfig, client: Arc<dyn ProvisionerClient>) -> Self {
        let store = Arc::new(NodeStore::new());
        let cancellation_token = CancellationToken::new();
        let coordinator = ProvisioningCoordinator::new(
            store.clone(),
            client,
            &config,
            cancellation_token.clone(),
        );
        let executor = RequestExecutor::new(store.clone(), coordinator.clone());
        let metadata = MetadataProjector::new(store.clone());
        let reaper = Arc::new(IdleReaper::new(
            store.clone(),
            coordinator.clone(),
            config.default_idle_timeout(),
            config.idle_check_interval(),
        ));

        Self {
            config,
            store,
            coordinator,
            executor,
            metadata,
            reaper,
            cancellation_token,
            task_handles: TaskHandles::default(),
        }
    }

    /// Builds a manager talking to the HTTP provisioner named in `config`.
    pub fn from_config(config: ManagerConfig) -> Result<Self> {
        let client = HttpProvisionerClient::new(
            &config.provisioner_endpoint,
            config.provisioner_api_key.as_deref(),
            config.request_timeout(),
        )?;
        Ok(Self::new(config, Arc::new(client)))
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Spawns the idle reaper. Calling it again after the first time does
    /// nothing.
    pub async fn start(&self) {
        let mut handles = self.task_handles.lock().await;
        if !handles.is_empty() || self.cancellation_token.is_cancelled() {
            return;
        }

        let reaper = self.reaper.clone();
        let cancellation_token = self.cancellation_token.clone();
        handles.push(tokio::spawn(async move {
            reaper.run(cancellation_token).await;
        }));
        info!(
            "Compute node manager started with provisioner at {}",
            self.config.provisioner_endpoint
        );
    }

    pub fn register_node(&self, config: ComputeNodeConfig) -> Result<ComputeNode, ManagerError> {
        let node = self.store.add_node(config)?;
        info!("Registered node {}", node.config);
        Ok(node)
    }

    pub fn get_node(&self, node_id: &str) -> Option<ComputeNode> {
        self.store.get_node(node_id)
    }

    pub fn get_all_nodes(&self) -> Vec<ComputeNode> {
        self.store.get_nodes()
    }

    pub fn get_node_metadata(&self, node_id: &str) -> Option<NodeMetadata> {
        self.metadata.get_node_metadata(node_id)
    }

    pub fn get_all_node_metadata(&self) -> Vec<NodeMetadata> {
        self.metadata.get_all_node_metadata()
    }

    /// See [`ProvisioningCoordinator::provision_node`]. Unknown nodes are
    /// reported in the result rather than as an error.
    pub async fn provision_node(
        &self,
        options: impl Into<ProvisionNodeOptions>,
    ) -> ProvisionResult {
        self.coordinator.provision_node(options).await
    }

    /// See [`RequestExecutor::execute_request`].
    pub async fn execute_request<P, R, F, Fut>(
        &self,
        node_id: &str,
        payload: P,
        handler: F,
    ) -> Result<R>
    where
        F: FnOnce(String, P) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        self.executor
            .execute_request(node_id, payload, handler)
            .await
    }

    pub async fn terminate_node(&self, node_id: &str) -> bool {
        self.coordinator.terminate_node(node_id).await
    }

    /// Runs one idle scan outside the reaper's schedule.
    pub async fn reap_idle_nodes(&self) -> Vec<String> {
        self.reaper.reap_idle_nodes().await
    }

    /// Stops background work. Nodes stay provisioned.
    pub async fn shutdown(&self) {
        info!("Shutting down compute node manager");
        self.cancellation_token.cancel();

        let handles: Vec<_> = self.task_handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Background task ended abnormally: {e}");
            }
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
