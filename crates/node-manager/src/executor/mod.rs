use crate::coordinator::ProvisioningCoordinator;
use crate::error::ManagerError;
use crate::models::node::NodeStatus;
use crate::models::provision::ProvisionStatus;
use crate::store::node_store::NodeEntry;
use crate::store::NodeStore;
use anyhow::Result;
use log::debug;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;

/// A node can be terminated between becoming ready and admitting the
/// request. Re-provisioning is retried this many times.
const MAX_ADMISSION_ATTEMPTS: usize = 3;

/// Holds one slot of a node's active request count. Dropping it releases the
/// slot, also when the request future is cancelled or the handler panics.
struct ActiveRequestGuard {
    store: Arc<NodeStore>,
    node_id: String,
    generation: u64,
}

impl Drop for ActiveRequestGuard {
    fn drop(&mut self) {
        self.store.update(&self.node_id, |entry| {
            // The node was terminated while the request ran.
            if entry.generation != self.generation {
                return;
            }
            entry.node.active_requests = entry.node.active_requests.saturating_sub(1);
            entry.node.last_activity_at = Instant::now();
            if entry.node.active_requests == 0 && entry.node.status == NodeStatus::Active {
                entry.node.set_status(NodeStatus::Ready);
            }
        });
    }
}

pub struct RequestExecutor {
    store: Arc<NodeStore>,
    coordinator: ProvisioningCoordinator,
}

impl RequestExecutor {
    pub fn new(store: Arc<NodeStore>, coordinator: ProvisioningCoordinator) -> Self {
        Self { store, coordinator }
    }

    /// Runs `handler` against the node's endpoint, provisioning the node
    /// first if it is not serving.
    ///
    /// Unknown nodes, failed provisioning and queue timeouts surface as
    /// [`ManagerError`]s. Errors returned by the handler are passed through
    /// unchanged.
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
        let (endpoint, guard) = self.admit(node_id).await?;
        debug!("Executing request on node {node_id} at {endpoint}");

        let result = handler(endpoint, payload).await;
        drop(guard);
        result
    }

    async fn admit(&self, node_id: &str) -> Result<(String, ActiveRequestGuard)> {
        for attempt in 1..=MAX_ADMISSION_ATTEMPTS {
            let admitted = self
                .store
                .update(node_id, try_admit)
                .ok_or_else(|| ManagerError::NodeNotFound(node_id.to_string()))?;

            if let Some((endpoint, generation)) = admitted {
                let guard = ActiveRequestGuard {
                    store: self.store.clone(),
                    node_id: node_id.to_string(),
                    generation,
                };
                return Ok((endpoint, guard));
            }

            if attempt > 1 {
                debug!(
                    "Node {node_id} stopped serving before the request was admitted, \
                     provisioning again"
                );
            } else {
                debug!("Node {node_id} is not serving, provisioning before executing");
            }

            let result = self.coordinator.provision_node(node_id).await;
            match result.status {
                ProvisionStatus::Ready => continue,
                ProvisionStatus::Provisioning => {
                    return Err(ManagerError::Timeout {
                        node_id: node_id.to_string(),
                        waited: self.coordinator.max_queue_time(),
                    }
                    .into())
                }
                ProvisionStatus::Error => {
                    return Err(ManagerError::ProvisioningFailed {
                        node_id: node_id.to_string(),
                        message: result.error.unwrap_or_default(),
                    }
                    .into())
                }
            }
        }

        Err(ManagerError::ProvisioningFailed {
            node_id: node_id.to_string(),
            message: format!(
                "node stopped serving {MAX_ADMISSION_ATTEMPTS} times before the request \
                 could be admitted"
            ),
        }
        .into())
    }
}

/// Takes an active request slot on a serving node and returns its endpoint
/// together with the generation the slot belongs to.
fn try_admit(entry: &mut NodeEntry) -> Option<(String, u64)> {
    if !entry.node.status.is_serving() {
        return None;
    }
    let endpoint = entry.node.endpoint.clone()?;

    entry.node.active_requests += 1;
    entry.node.total_requests += 1;
    entry.node.last_activity_at = Instant::now();
    if entry.node.status == NodeStatus::Ready {
        entry.node.set_status(NodeStatus::Active);
    }
    Some((endpoint, entry.generation))
}
