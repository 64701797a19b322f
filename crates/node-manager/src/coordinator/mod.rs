use crate::config::ManagerConfig;
use crate::error::ManagerError;
use crate::models::node::NodeStatus;
use crate::models::provision::{ProvisionNodeOptions, ProvisionResult};
use crate::provisioner::ProvisionerClient;
use crate::store::node_store::{InFlightProvision, NodeEntry, PendingTerminate};
use crate::store::NodeStore;
use anyhow::{bail, Result};
use futures::FutureExt;
use log::{debug, error, info, warn};
use serde_json::Value;
use shared::models::provisioner::{ProvisionPriority, ProvisionResponse, RemoteNodeStatus};
use shared::models::ComputeNodeConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{interval, Instant};
use tokio_util::sync::CancellationToken;

/// A resource the provisioner reported as reachable.
#[derive(Debug, Clone)]
struct ProvisionedResource {
    endpoint: String,
    internal_endpoint: Option<String>,
    provider_meta: Option<Value>,
}

struct ProvisionAttempt {
    node_id: String,
    config: ComputeNodeConfig,
    priority: Option<ProvisionPriority>,
    generation: u64,
    started_at: Instant,
    result_tx: oneshot::Sender<ProvisionResult>,
}

enum Admission {
    Ready(ProvisionResult),
    AwaitTerminate(PendingTerminate),
    Join(InFlightProvision),
    Start {
        handle: InFlightProvision,
        attempt: ProvisionAttempt,
    },
}

/// Drives provision and terminate calls against the provisioner, allowing at
/// most one outstanding provision call per node.
#[derive(Clone)]
pub struct ProvisioningCoordinator {
    store: Arc<NodeStore>,
    client: Arc<dyn ProvisionerClient>,
    max_queue_time: Duration,
    status_poll_interval: Duration,
    provision_timeout: Duration,
    cancellation_token: CancellationToken,
}

impl ProvisioningCoordinator {
    pub fn new(
        store: Arc<NodeStore>,
        client: Arc<dyn ProvisionerClient>,
        config: &ManagerConfig,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            store,
            client,
            max_queue_time: config.max_queue_time(),
            status_poll_interval: config.status_poll_interval(),
            provision_timeout: config.provision_timeout(),
            cancellation_token,
        }
    }

    pub fn max_queue_time(&self) -> Duration {
        self.max_queue_time
    }

    /// Brings a node to `ready`.
    ///
    /// Ready nodes answer immediately without contacting the provisioner.
    /// Callers arriving while a provision call is outstanding share its
    /// result. Cold and errored nodes start a new attempt. A caller that
    /// waits longer than the max queue time gets a `Provisioning` result; the
    /// attempt keeps running and a later call re-attaches to it. A node whose
    /// terminate call is still outstanding is provisioned only after that
    /// call returns.
    pub async fn provision_node(
        &self,
        options: impl Into<ProvisionNodeOptions>,
    ) -> ProvisionResult {
        let options = options.into();
        let handle = loop {
            let Some(admission) = self
                .store
                .update(&options.node_id, |entry| Self::admit(entry, options.priority))
            else {
                return ProvisionResult::not_found();
            };

            match admission {
                Admission::Ready(result) => return result,
                Admission::AwaitTerminate(pending) => {
                    debug!(
                        "Node {} is being terminated, provisioning once that finishes",
                        options.node_id
                    );
                    pending.await;
                }
                Admission::Join(handle) => {
                    debug!(
                        "Node {} is already provisioning, waiting on the in-flight call",
                        options.node_id
                    );
                    break handle;
                }
                Admission::Start { handle, attempt } => {
                    let coordinator = self.clone();
                    tokio::spawn(async move { coordinator.run_attempt(attempt).await });
                    break handle;
                }
            }
        };

        self.wait_for(&options.node_id, handle).await
    }

    fn admit(entry: &mut NodeEntry, priority: Option<ProvisionPriority>) -> Admission {
        if let Some(pending) = &entry.terminating {
            return Admission::AwaitTerminate(pending.clone());
        }
        if entry.node.status.is_serving() {
            if let Some(endpoint) = &entry.node.endpoint {
                return Admission::Ready(ProvisionResult::ready(endpoint.clone(), None));
            }
        }
        if entry.node.status == NodeStatus::Provisioning {
            if let Some(handle) = &entry.in_flight {
                return Admission::Join(handle.clone());
            }
        }

        let (result_tx, result_rx) = oneshot::channel();
        let handle: InFlightProvision = result_rx
            .map(|result| {
                result.unwrap_or_else(|_| {
                    ProvisionResult::error("Provisioning task ended without a result")
                })
            })
            .boxed()
            .shared();
        let started_at = Instant::now();

        entry.generation += 1;
        entry.in_flight = Some(handle.clone());
        entry.node.provisioning_started_at = Some(started_at);
        entry.node.set_status(NodeStatus::Provisioning);

        Admission::Start {
            handle,
            attempt: ProvisionAttempt {
                node_id: entry.node.config.node_id.clone(),
                config: entry.node.config.clone(),
                priority,
                generation: entry.generation,
                started_at,
                result_tx,
            },
        }
    }

    async fn wait_for(&self, node_id: &str, handle: InFlightProvision) -> ProvisionResult {
        if self.max_queue_time.is_zero() {
            return handle.await;
        }
        match tokio::time::timeout(self.max_queue_time, handle).await {
            Ok(result) => result,
            Err(_) => {
                let err = ManagerError::Timeout {
                    node_id: node_id.to_string(),
                    waited: self.max_queue_time,
                };
                warn!("{err}");
                ProvisionResult::still_provisioning(err.to_string())
            }
        }
    }

    async fn run_attempt(self, attempt: ProvisionAttempt) {
        let ProvisionAttempt {
            node_id,
            config,
            priority,
            generation,
            started_at,
            result_tx,
        } = attempt;

        info!("Provisioning node {config}");
        let outcome = self.provision_resource(&node_id, &config, priority).await;
        let provision_time_ms = u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX);

        let applied = self
            .store
            .update(&node_id, |entry| {
                if entry.generation != generation {
                    return None;
                }
                entry.in_flight = None;
                let result = match &outcome {
                    Ok(resource) => {
                        entry.node.endpoint = Some(resource.endpoint.clone());
                        entry.node.internal_endpoint = resource.internal_endpoint.clone();
                        entry.node.provider_meta = resource.provider_meta.clone();
                        entry.node.last_error = None;
                        entry.node.last_activity_at = Instant::now();
                        entry.node.set_status(NodeStatus::Ready);
                        ProvisionResult::ready(resource.endpoint.clone(), Some(provision_time_ms))
                    }
                    Err(e) => {
                        let message = format!("{e:#}");
                        entry.node.endpoint = None;
                        entry.node.internal_endpoint = None;
                        entry.node.provider_meta = None;
                        entry.node.last_error = Some(message.clone());
                        entry.node.set_status(NodeStatus::Error);
                        ProvisionResult::error(message)
                    }
                };
                Some(result)
            })
            .flatten();

        let result = match applied {
            Some(result) => {
                match &result.endpoint {
                    Some(endpoint) => {
                        info!("Node {node_id} ready at {endpoint} after {provision_time_ms}ms")
                    }
                    None => error!(
                        "Provisioning node {node_id} failed: {}",
                        result.error.as_deref().unwrap_or_default()
                    ),
                }
                result
            }
            None => {
                warn!("Node {node_id} was terminated while provisioning, discarding the result");
                if outcome.is_ok() {
                    self.release_stray_resource(&node_id).await;
                }
                ProvisionResult::error(format!(
                    "Node {node_id} was terminated while provisioning"
                ))
            }
        };

        // Waiters may all have timed out and gone away.
        let _ = result_tx.send(result);
    }

    /// Terminates a resource that finished provisioning after its node was
    /// terminated, unless the node has since moved on to a new attempt.
    async fn release_stray_resource(&self, node_id: &str) {
        let released = self
            .terminate_node_if(node_id, |entry| {
                entry.node.status == NodeStatus::Cold && entry.in_flight.is_none()
            })
            .await;
        if released {
            debug!("Released stray resource of node {node_id}");
        }
    }

    async fn provision_resource(
        &self,
        node_id: &str,
        config: &ComputeNodeConfig,
        priority: Option<ProvisionPriority>,
    ) -> Result<ProvisionedResource> {
        let response = self.client.provision(node_id, config, priority).await?;

        match response.status {
            Some(status @ (RemoteNodeStatus::Failed | RemoteNodeStatus::Terminated)) => {
                bail!(response
                    .error
                    .unwrap_or_else(|| format!("provisioner reported node {node_id} {status}")))
            }
            Some(status) if status.is_pending() || status == RemoteNodeStatus::Unknown => {
                debug!("Provisioner accepted node {node_id} asynchronously, polling status");
                self.poll_until_ready(node_id, response).await
            }
            _ => match response.endpoint {
                Some(endpoint) => Ok(ProvisionedResource {
                    endpoint,
                    internal_endpoint: response.internal_endpoint,
                    provider_meta: response.provider_meta,
                }),
                None => {
                    bail!("provisioner response for node {node_id} did not include an endpoint")
                }
            },
        }
    }

    async fn poll_until_ready(
        &self,
        node_id: &str,
        initial: ProvisionResponse,
    ) -> Result<ProvisionedResource> {
        let deadline =
            (!self.provision_timeout.is_zero()).then(|| Instant::now() + self.provision_timeout);
        let mut ticker = interval(self.status_poll_interval);
        // The first tick completes immediately; poll one interval after the provision call.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.cancellation_token.cancelled() => {
                    bail!(ManagerError::Shutdown);
                }
            }

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                bail!(
                    "provisioner did not report node {node_id} ready within {}ms",
                    self.provision_timeout.as_millis()
                );
            }

            let response = match self.client.status(node_id).await {
                Ok(response) => response,
                Err(e) => {
                    warn!("Status poll for node {node_id} failed: {e:#}");
                    continue;
                }
            };

            match response.status {
                status if status.is_ready() => {
                    let Some(endpoint) = response.endpoint.or_else(|| initial.endpoint.clone())
                    else {
                        bail!("provisioner reported node {node_id} ready without an endpoint");
                    };
                    return Ok(ProvisionedResource {
                        endpoint,
                        internal_endpoint: response
                            .internal_endpoint
                            .or_else(|| initial.internal_endpoint.clone()),
                        provider_meta: response
                            .provider_meta
                            .or_else(|| initial.provider_meta.clone()),
                    });
                }
                RemoteNodeStatus::Failed | RemoteNodeStatus::Terminated => {
                    bail!(response.error.unwrap_or_else(|| format!(
                        "provisioner reported node {node_id} {}",
                        response.status
                    )))
                }
                status => debug!("Node {node_id} still {status} at the provisioner"),
            }
        }
    }

    /// Releases a node's resource and returns it to `cold`.
    ///
    /// The node is reset even when the provisioner call fails; the failure is
    /// kept in `last_error`. Returns `false` for unknown nodes.
    pub async fn terminate_node(&self, node_id: &str) -> bool {
        self.terminate_node_if(node_id, |_| true).await
    }

    /// Terminates a node if `should_terminate` holds for its entry.
    ///
    /// The check, the reset to `cold` and the generation bump happen under the
    /// entry lock before the provisioner is contacted, so nothing admitted
    /// after the check can be torn down. Provisioning attempts that arrive
    /// while the terminate call is outstanding wait for it to return. If
    /// another terminate is already outstanding this waits for it and checks
    /// again.
    pub(crate) async fn terminate_node_if(
        &self,
        node_id: &str,
        should_terminate: impl Fn(&NodeEntry) -> bool,
    ) -> bool {
        let fence = loop {
            let start = self.store.update(node_id, |entry| {
                if let Some(pending) = &entry.terminating {
                    return TerminateStart::Busy(pending.clone());
                }
                if !should_terminate(entry) {
                    return TerminateStart::Skipped;
                }

                let (done_tx, done_rx) = oneshot::channel::<()>();
                entry.terminating = Some(done_rx.map(|_| ()).boxed().shared());
                entry.generation += 1;
                entry.in_flight = None;
                entry.node.reset_to_cold();
                TerminateStart::Started(TerminateFence {
                    store: self.store.clone(),
                    node_id: node_id.to_string(),
                    done_tx: Some(done_tx),
                })
            });

            match start {
                None => {
                    debug!("Ignoring terminate for unknown node {node_id}");
                    return false;
                }
                Some(TerminateStart::Skipped) => return false,
                Some(TerminateStart::Busy(pending)) => pending.await,
                Some(TerminateStart::Started(fence)) => break fence,
            }
        };

        info!("Terminating node {node_id}");
        let failure = match self.client.terminate(node_id).await {
            Ok(true) => None,
            Ok(false) => Some("provisioner declined to terminate the resource".to_string()),
            Err(e) => Some(format!("{e:#}")),
        };
        if let Some(reason) = &failure {
            warn!("Terminate call for node {node_id} failed, node is cold anyway: {reason}");
        }
        fence.release(failure.map(|reason| format!("terminate failed: {reason}")));
        true
    }
}

enum TerminateStart {
    Skipped,
    Busy(PendingTerminate),
    Started(TerminateFence),
}

/// Held while a terminate call is outstanding. Dropping it lifts the fence and
/// wakes provisioning attempts waiting on it, even if the terminate future
/// was cancelled.
struct TerminateFence {
    store: Arc<NodeStore>,
    node_id: String,
    done_tx: Option<oneshot::Sender<()>>,
}

impl TerminateFence {
    fn release(mut self, error: Option<String>) {
        self.store.update(&self.node_id, |entry| {
            entry.terminating = None;
            if error.is_some() {
                entry.node.last_error = error;
            }
        });
        if let Some(done_tx) = self.done_tx.take() {
            let _ = done_tx.send(());
        }
    }
}

impl Drop for TerminateFence {
    fn drop(&mut self) {
        if let Some(done_tx) = self.done_tx.take() {
            self.store.update(&self.node_id, |entry| entry.terminating = None);
            let _ = done_tx.send(());
        }
    }
}
