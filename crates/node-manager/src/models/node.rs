use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::models::ComputeNodeConfig;
use std::fmt::{self, Display};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Cold,
    Provisioning,
    Ready,
    Active,
    Error,
}

impl NodeStatus {
    /// Ready and active nodes hold a live endpoint.
    pub fn is_serving(&self) -> bool {
        matches!(self, NodeStatus::Ready | NodeStatus::Active)
    }
}

impl Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeStatus::Cold => "cold",
            NodeStatus::Provisioning => "provisioning",
            NodeStatus::Ready => "ready",
            NodeStatus::Active => "active",
            NodeStatus::Error => "error",
        };
        write!(f, "{name}")
    }
}

/// Snapshot of a node's configuration and runtime state.
#[derive(Debug, Clone, Serialize)]
pub struct ComputeNode {
    pub config: ComputeNodeConfig,
    pub status: NodeStatus,
    pub endpoint: Option<String>,
    pub internal_endpoint: Option<String>,
    pub provider_meta: Option<Value>,
    pub active_requests: u32,
    pub total_requests: u64,
    #[serde(skip)]
    pub last_activity_at: Instant,
    #[serde(skip)]
    pub provisioning_started_at: Option<Instant>,
    pub last_error: Option<String>,
    pub last_status_change: Option<DateTime<Utc>>,
}

impl ComputeNode {
    pub fn new(config: ComputeNodeConfig) -> Self {
        Self {
            config,
            status: NodeStatus::Cold,
            endpoint: None,
            internal_endpoint: None,
            provider_meta: None,
            active_requests: 0,
            total_requests: 0,
            last_activity_at: Instant::now(),
            provisioning_started_at: None,
            last_error: None,
            last_status_change: None,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    pub(crate) fn set_status(&mut self, status: NodeStatus) {
        if self.status != status {
            self.status = status;
            self.last_status_change = Some(Utc::now());
        }
    }

    /// Clears everything tied to a provisioned resource and returns to cold.
    pub(crate) fn reset_to_cold(&mut self) {
        self.set_status(NodeStatus::Cold);
        self.endpoint = None;
        self.internal_endpoint = None;
        self.provider_meta = None;
        self.active_requests = 0;
        self.provisioning_started_at = None;
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity_at)
    }
}

impl Display for ComputeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] active={} total={}",
            self.config.node_id, self.status, self.active_requests, self.total_requests
        )
    }
}

/// Read-only view of a node for dashboards and status pages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetadata {
    pub node_id: String,
    pub status: NodeStatus,
    pub endpoint_available: bool,
    pub cold_start_time_ms: u64,
    pub estimated_ready_in_ms: u64,
    pub price_per_hour_wei: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::U256;
    use shared::models::HardwareType;

    fn config() -> ComputeNodeConfig {
        ComputeNodeConfig {
            node_id: "n1".to_string(),
            name: "Node 1".to_string(),
            hardware_type: HardwareType::Cpu,
            tee_type: Default::default(),
            gpu_type: Default::default(),
            gpu_memory_gb: None,
            cpu_cores: 2,
            memory_gb: 4,
            container_image: "alpine:3".to_string(),
            startup_command: None,
            env: None,
            idle_timeout_ms: None,
            cold_start_time_ms: 1000,
            price_per_hour_wei: U256::from(10u64),
            regions: vec!["eu-central".to_string()],
        }
    }

    #[test]
    fn test_new_node_is_cold_and_empty() {
        let node = ComputeNode::new(config());
        assert_eq!(node.status, NodeStatus::Cold);
        assert_eq!(node.endpoint, None);
        assert_eq!(node.active_requests, 0);
        assert_eq!(node.total_requests, 0);
        assert!(node.last_status_change.is_none());
    }

    #[test]
    fn test_reset_to_cold_clears_resource_fields() {
        let mut node = ComputeNode::new(config());
        node.set_status(NodeStatus::Active);
        node.endpoint = Some("http://n1".to_string());
        node.internal_endpoint = Some("http://10.0.0.1".to_string());
        node.provider_meta = Some(serde_json::json!({"id": 1}));
        node.active_requests = 3;
        node.total_requests = 7;

        node.reset_to_cold();

        assert_eq!(node.status, NodeStatus::Cold);
        assert_eq!(node.endpoint, None);
        assert_eq!(node.internal_endpoint, None);
        assert_eq!(node.provider_meta, None);
        assert_eq!(node.active_requests, 0);
        assert_eq!(node.total_requests, 7);
        assert!(node.last_status_change.is_some());
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_value(NodeStatus::Provisioning).unwrap(),
            "provisioning"
        );
        assert_eq!(NodeStatus::Active.to_string(), "active");
        assert!(NodeStatus::Active.is_serving());
        assert!(!NodeStatus::Error.is_serving());
    }
}
