use anyhow::Result;
use async_trait::async_trait;
use shared::models::provisioner::{NodeStatusResponse, ProvisionPriority, ProvisionResponse};
use shared::models::ComputeNodeConfig;

pub mod http;
pub mod mock;

pub use http::HttpProvisionerClient;
pub use mock::MockProvisionerClient;

/// Boundary to the external backend that creates and destroys compute
/// resources.
#[async_trait]
pub trait ProvisionerClient: Send + Sync {
    /// Request a resource for the node.
    async fn provision(
        &self,
        node_id: &str,
        config: &ComputeNodeConfig,
        priority: Option<ProvisionPriority>,
    ) -> Result<ProvisionResponse>;

    /// Release the node's resource. Returns the backend's `success` flag.
    async fn terminate(&self, node_id: &str) -> Result<bool>;

    /// Current backend-side state of an asynchronously provisioned node.
    async fn status(&self, node_id: &str) -> Result<NodeStatusResponse>;
}
