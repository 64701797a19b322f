pub mod node;
pub mod provisioner;

pub use node::ComputeNodeConfig;
pub use node::GpuType;
pub use node::HardwareType;
pub use node::TeeType;
