pub mod node;
pub mod provision;

pub use node::ComputeNode;
pub use node::NodeMetadata;
pub use node::NodeStatus;
pub use provision::ProvisionNodeOptions;
pub use provision::ProvisionResult;
pub use provision::ProvisionStatus;
