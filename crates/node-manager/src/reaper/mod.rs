use crate::coordinator::ProvisioningCoordinator;
use crate::models::node::{ComputeNode, NodeStatus};
use crate::store::NodeStore;
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant};
use tokio_util::sync::CancellationToken;

/// Terminates ready nodes that have had no requests for longer than their
/// idle timeout.
pub struct IdleReaper {
    store: Arc<NodeStore>,
    coordinator: ProvisioningCoordinator,
    default_idle_timeout: Duration,
    check_interval: Duration,
}

impl IdleReaper {
    pub fn new(
        store: Arc<NodeStore>,
        coordinator: ProvisioningCoordinator,
        default_idle_timeout: Duration,
        check_interval: Duration,
    ) -> Self {
        Self {
            store,
            coordinator,
            default_idle_timeout,
            check_interval,
        }
    }

    pub async fn run(&self, cancellation_token: CancellationToken) {
        let mut ticker = interval(self.check_interval);
        info!(
            "Idle reaper started, checking every {}ms",
            self.check_interval.as_millis()
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reaped = self.reap_idle_nodes().await;
                    if !reaped.is_empty() {
                        info!("Reaped {} idle node(s): {}", reaped.len(), reaped.join(", "));
                    }
                }
                _ = cancellation_token.cancelled() => {
                    info!("Idle reaper received cancellation signal");
                    break;
                }
            }
        }
    }

    /// Runs one scan and returns the ids of the nodes it terminated.
    pub async fn reap_idle_nodes(&self) -> Vec<String> {
        let now = Instant::now();
        let candidates: Vec<String> = self
            .store
            .get_nodes()
            .into_iter()
            .filter(|node| self.is_idle(node, now))
            .map(|node| node.config.node_id)
            .collect();
        debug!("Idle scan found {} candidate(s)", candidates.len());

        let mut reaped = Vec::new();
        for node_id in candidates {
            // A request may have been admitted since the snapshot.
            let terminated = self
                .coordinator
                .terminate_node_if(&node_id, |entry| self.is_idle(&entry.node, Instant::now()))
                .await;
            if terminated {
                info!("Node {node_id} exceeded its idle timeout and was terminated");
                reaped.push(node_id);
            }
        }
        reaped
    }

    fn idle_timeout(&self, node: &ComputeNode) -> Duration {
        node.config
            .idle_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_idle_timeout)
    }

    fn is_idle(&self, node: &ComputeNode, now: Instant) -> bool {
        node.status == NodeStatus::Ready
            && node.active_requests == 0
            && node.idle_for(now) > self.idle_timeout(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ManagerConfig;
    use crate::executor::RequestExecutor;
    use crate::provisioner::MockProvisionerClient;
    use crate::utils::test_helper::node_config;
    use tokio::sync::oneshot;

    struct Fixture {
        store: Arc<NodeStore>,
        client: Arc<MockProvisionerClient>,
        coordinator: ProvisioningCoordinator,
        reaper: Arc<IdleReaper>,
    }

    /// `n1` uses its own 60s timeout, `n2` falls back to the 10s default.
    fn fixture() -> Fixture {
        fixture_with_client(MockProvisionerClient::new())
    }

    fn fixture_with_client(client: MockProvisionerClient) -> Fixture {
        let store = Arc::new(NodeStore::new());
        store.add_node(node_config("n1")).unwrap();
        let mut default_timeout = node_config("n2");
        default_timeout.idle_timeout_ms = None;
        store.add_node(default_timeout).unwrap();

        let client = Arc::new(client);
        let coordinator = ProvisioningCoordinator::new(
            store.clone(),
            client.clone(),
            &ManagerConfig::default(),
            CancellationToken::new(),
        );
        let reaper = Arc::new(IdleReaper::new(
            store.clone(),
            coordinator.clone(),
            Duration::from_secs(10),
            Duration::from_secs(1),
        ));
        Fixture {
            store,
            client,
            coordinator,
            reaper,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaps_only_after_idle_timeout() {
        let f = fixture();
        f.coordinator.provision_node("n1").await;

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(f.reaper.reap_idle_nodes().await.is_empty());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(f.reaper.reap_idle_nodes().await, vec!["n1"]);

        let node = f.store.get_node("n1").unwrap();
        assert_eq!(node.status, NodeStatus::Cold);
        assert_eq!(node.endpoint, None);
        assert_eq!(f.client.terminate_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manager_default_applies_without_node_timeout() {
        let f = fixture();
        f.coordinator.provision_node("n1").await;
        f.coordinator.provision_node("n2").await;

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(f.reaper.reap_idle_nodes().await, vec!["n2"]);
        assert_eq!(f.store.get_node("n1").unwrap().status, NodeStatus::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skips_cold_error_and_busy_nodes() {
        let f = fixture();
        f.client.set_provision_failure(Some("boom")).await;
        f.coordinator.provision_node("n2").await;
        f.client.set_provision_failure(None).await;

        let executor = Arc::new(RequestExecutor::new(f.store.clone(), f.coordinator.clone()));
        let (release, rx) = oneshot::channel::<()>();
        let request = tokio::spawn({
            let executor = executor.clone();
            async move {
                executor
                    .execute_request("n1", (), |_, _| async move {
                        let _ = rx.await;
                        Ok(())
                    })
                    .await
            }
        });
        while f.store.get_node("n1").unwrap().active_requests == 0 {
            tokio::task::yield_now().await;
        }

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(f.reaper.reap_idle_nodes().await.is_empty());
        assert_eq!(f.store.get_node("n1").unwrap().status, NodeStatus::Active);
        assert_eq!(f.store.get_node("n2").unwrap().status, NodeStatus::Error);

        release.send(()).unwrap();
        request.await.unwrap().unwrap();
        // Completion restarts the idle clock.
        assert!(f.reaper.reap_idle_nodes().await.is_empty());
        assert_eq!(f.client.terminate_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_reaps_and_stops_on_cancel() {
        let f = fixture();
        f.coordinator.provision_node("n2").await;

        let token = CancellationToken::new();
        let handle = tokio::spawn({
            let reaper = f.reaper.clone();
            let token = token.clone();
            async move { reaper.run(token).await }
        });

        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(f.store.get_node("n2").unwrap().status, NodeStatus::Cold);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_during_slow_terminate_gets_a_fresh_node() {
        let f = fixture_with_client(
            MockProvisionerClient::new().with_terminate_latency(Duration::from_millis(500)),
        );
        f.coordinator.provision_node("n1").await;
        tokio::time::advance(Duration::from_secs(61)).await;

        let reap = tokio::spawn({
            let reaper = f.reaper.clone();
            async move { reaper.reap_idle_nodes().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(f.store.get_node("n1").unwrap().status, NodeStatus::Cold);

        let executor = Arc::new(RequestExecutor::new(f.store.clone(), f.coordinator.clone()));
        let request = tokio::spawn({
            let executor = executor.clone();
            async move {
                executor
                    .execute_request("n1", (), |endpoint, _| async move {
                        tokio::time::sleep(Duration::from_secs(2)).await;
                        Ok(endpoint)
                    })
                    .await
            }
        });

        assert_eq!(reap.await.unwrap(), vec!["n1"]);
        while f.store.get_node("n1").unwrap().active_requests == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // The request landed on a resource provisioned after the terminate call returned.
        let node = f.store.get_node("n1").unwrap();
        assert_eq!(node.status, NodeStatus::Active);
        assert_eq!(node.endpoint.as_deref(), Some("https://n1.mock.local/2"));
        assert_eq!(f.client.provision_calls(), 2);
        assert_eq!(f.client.terminate_calls(), 1);

        let endpoint = request.await.unwrap().unwrap();
        assert_eq!(endpoint, "https://n1.mock.local/2");
        let node = f.store.get_node("n1").unwrap();
        assert_eq!(node.status, NodeStatus::Ready);
        assert_eq!(node.active_requests, 0);
    }
}
