use serde::{Deserialize, Serialize};
use shared::models::provisioner::ProvisionPriority;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProvisionStatus {
    Ready,
    /// The caller stopped waiting but the node is still being provisioned.
    Provisioning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionResult {
    pub status: ProvisionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provision_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProvisionResult {
    pub fn ready(endpoint: impl Into<String>, provision_time_ms: Option<u64>) -> Self {
        Self {
            status: ProvisionStatus::Ready,
            endpoint: Some(endpoint.into()),
            provision_time_ms,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ProvisionStatus::Error,
            endpoint: None,
            provision_time_ms: None,
            error: Some(message.into()),
        }
    }

    pub fn still_provisioning(message: impl Into<String>) -> Self {
        Self {
            status: ProvisionStatus::Provisioning,
            endpoint: None,
            provision_time_ms: None,
            error: Some(message.into()),
        }
    }

    pub fn not_found() -> Self {
        Self::error("Node not found")
    }

    pub fn is_ready(&self) -> bool {
        self.status == ProvisionStatus::Ready
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionNodeOptions {
    pub node_id: String,
    pub priority: Option<ProvisionPriority>,
}

impl ProvisionNodeOptions {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            priority: None,
        }
    }

    pub fn with_priority(mut self, priority: ProvisionPriority) -> Self {
        self.priority = Some(priority);
        self
    }
}

impl From<&str> for ProvisionNodeOptions {
    fn from(node_id: &str) -> Self {
        Self::new(node_id)
    }
}
