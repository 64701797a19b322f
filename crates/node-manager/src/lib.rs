mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod manager;
pub mod metadata;
pub mod models;
pub mod provisioner;
pub mod reaper;
pub mod store;
pub mod utils;

pub use cli::{Cli, Commands};
pub use config::{Config, ManagerConfig};
pub use error::ManagerError;
pub use manager::ComputeNodeManager;
pub use models::{
    ComputeNode, NodeMetadata, NodeStatus, ProvisionNodeOptions, ProvisionResult, ProvisionStatus,
};
pub use provisioner::{HttpProvisionerClient, MockProvisionerClient, ProvisionerClient};

pub type TaskHandles = std::sync::Arc<tokio::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>>;
