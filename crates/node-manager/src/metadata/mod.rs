use crate::models::node::{ComputeNode, NodeMetadata, NodeStatus};
use crate::store::NodeStore;
use std::sync::Arc;
use tokio::time::Instant;

pub struct MetadataProjector {
    store: Arc<NodeStore>,
}

impl MetadataProjector {
    pub fn new(store: Arc<NodeStore>) -> Self {
        Self { store }
    }

    pub fn get_node_metadata(&self, node_id: &str) -> Option<NodeMetadata> {
        self.store
            .get_node(node_id)
            .map(|node| project(&node, Instant::now()))
    }

    pub fn get_all_node_metadata(&self) -> Vec<NodeMetadata> {
        let now = Instant::now();
        self.store
            .get_nodes()
            .iter()
            .map(|node| project(node, now))
            .collect()
    }
}

/// Display view of a node at `now`.
///
/// While provisioning, the ready estimate counts down from the configured
/// cold start time and stops at zero.
pub fn project(node: &ComputeNode, now: Instant) -> NodeMetadata {
    let cold_start_time_ms = node.config.cold_start_time_ms;
    let estimated_ready_in_ms = match node.status {
        NodeStatus::Ready | NodeStatus::Active => 0,
        NodeStatus::Cold | NodeStatus::Error => cold_start_time_ms,
        NodeStatus::Provisioning => match node.provisioning_started_at {
            Some(started_at) => {
                let elapsed = now.saturating_duration_since(started_at);
                let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
                cold_start_time_ms.saturating_sub(elapsed_ms)
            }
            None => cold_start_time_ms,
        },
    };

    NodeMetadata {
        node_id: node.config.node_id.clone(),
        status: node.status,
        endpoint_available: node.status.is_serving(),
        cold_start_time_ms,
        estimated_ready_in_ms,
        price_per_hour_wei: node.config.price_per_hour_wei.to_string(),
    }
}
