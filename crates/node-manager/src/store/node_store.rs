use crate::error::ManagerError;
use crate::models::node::ComputeNode;
use crate::models::provision::ProvisionResult;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use log::debug;
use shared::models::ComputeNodeConfig;

/// Awaitable result of the one outstanding provision call for a node.
pub(crate) type InFlightProvision = Shared<BoxFuture<'static, ProvisionResult>>;

/// Resolves once an outstanding terminate call for a node has returned.
pub(crate) type PendingTerminate = Shared<BoxFuture<'static, ()>>;

pub(crate) struct NodeEntry {
    pub(crate) node: ComputeNode,
    pub(crate) in_flight: Option<InFlightProvision>,
    /// Set while a terminate call is outstanding. New provisioning attempts
    /// wait for it so they never overlap the backend's teardown.
    pub(crate) terminating: Option<PendingTerminate>,
    /// Bumped whenever a provisioning attempt starts or the node is
    /// terminated. Work started under an older generation must not touch
    /// the entry.
    pub(crate) generation: u64,
}

/// In-memory registry of nodes keyed by node id.
///
/// Callers only ever receive cloned snapshots. Mutation goes through
/// [`NodeStore::update`], which holds the entry lock for the duration of a
/// synchronous closure and never across an `.await`.
#[derive(Default)]
pub struct NodeStore {
    nodes: DashMap<String, NodeEntry>,
}

impl NodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&self, config: ComputeNodeConfig) -> Result<ComputeNode, ManagerError> {
        config
            .validate()
            .map_err(|e| ManagerError::InvalidConfig(e.to_string()))?;

        match self.nodes.entry(config.node_id.clone()) {
            Entry::Occupied(entry) => Err(ManagerError::DuplicateNode(entry.key().clone())),
            Entry::Vacant(entry) => {
                debug!("Registering node {config}");
                let node = ComputeNode::new(config);
                entry.insert(NodeEntry {
                    node: node.clone(),
                    in_flight: None,
                    terminating: None,
                    generation: 0,
                });
                Ok(node)
            }
        }
    }

    pub fn get_node(&self, node_id: &str) -> Option<ComputeNode> {
        self.nodes.get(node_id).map(|entry| entry.node.clone())
    }

    /// All nodes ordered by node id.
    pub fn get_nodes(&self) -> Vec<ComputeNode> {
        let mut nodes: Vec<ComputeNode> = self
            .nodes
            .iter()
            .map(|entry| entry.node.clone())
            .collect();
        nodes.sort_by(|a, b| a.config.node_id.cmp(&b.config.node_id));
        nodes
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Runs `f` against the entry while holding its lock. Returns `None` for
    /// unknown nodes.
    pub(crate) fn update<T>(
        &self,
        node_id: &str,
        f: impl FnOnce(&mut NodeEntry) -> T,
    ) -> Option<T> {
        self.nodes.get_mut(node_id).map(|mut entry| f(&mut entry))
    }
}
