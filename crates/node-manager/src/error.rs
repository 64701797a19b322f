use std::time::Duration;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ManagerError {
    #[error("Node not found: {0}")]
    NodeNotFound(String),
    #[error("Node already registered: {0}")]
    DuplicateNode(String),
    #[error("Invalid node configuration: {0}")]
    InvalidConfig(String),
    #[error("Provisioning failed for node {node_id}: {message}")]
    ProvisioningFailed { node_id: String, message: String },
    #[error("Timed out after {}ms waiting for node {node_id} to become ready", .waited.as_millis())]
    Timeout { node_id: String, waited: Duration },
    #[error("Node manager is shutting down")]
    Shutdown,
}
