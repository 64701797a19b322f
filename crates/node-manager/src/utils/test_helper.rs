use alloy::primitives::U256;
use shared::models::{ComputeNodeConfig, HardwareType};

pub(crate) fn node_config(node_id: &str) -> ComputeNodeConfig {
    ComputeNodeConfig {
        node_id: node_id.to_string(),
        name: format!("Test node {node_id}"),
        hardware_type: HardwareType::Cpu,
        tee_type: Default::default(),
        gpu_type: Default::default(),
        gpu_memory_gb: None,
        cpu_cores: 2,
        memory_gb: 4,
        container_image: "alpine:3".to_string(),
        startup_command: None,
        env: None,
        idle_timeout_ms: Some(60_000),
        cold_start_time_ms: 1000,
        price_per_hour_wei: U256::from(1_000_000_000_000_000u64),
        regions: vec!["eu-central".to_string()],
    }
}
