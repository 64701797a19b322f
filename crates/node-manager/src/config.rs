use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use shared::models::ComputeNodeConfig;
use std::time::Duration;

pub const DEFAULT_PROVISIONER_ENDPOINT: &str = "http://localhost:8095";
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 5 * 60 * 1000;
pub const DEFAULT_MAX_QUEUE_TIME_MS: u64 = 5 * 60 * 1000;
pub const DEFAULT_STATUS_POLL_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_IDLE_CHECK_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_PROVISION_TIMEOUT_MS: u64 = 15 * 60 * 1000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ManagerConfig {
    pub provisioner_endpoint: String,
    pub provisioner_api_key: Option<String>,
    /// Carried for collaborators that settle payments on chain. Unused here.
    pub rpc_url: Option<String>,
    /// Idle timeout for nodes that do not set their own.
    pub default_idle_timeout_ms: u64,
    /// Longest a caller waits for a cold start before giving up.
    pub max_queue_time_ms: u64,
    pub status_poll_interval_ms: u64,
    pub idle_check_interval_ms: u64,
    /// Upper bound on polling an asynchronous provisioner.
    pub provision_timeout_ms: u64,
    /// Per-request timeout of the provisioner HTTP client.
    pub request_timeout_ms: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            provisioner_endpoint: DEFAULT_PROVISIONER_ENDPOINT.to_string(),
            provisioner_api_key: None,
            rpc_url: None,
            default_idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            max_queue_time_ms: DEFAULT_MAX_QUEUE_TIME_MS,
            status_poll_interval_ms: DEFAULT_STATUS_POLL_INTERVAL_MS,
            idle_check_interval_ms: DEFAULT_IDLE_CHECK_INTERVAL_MS,
            provision_timeout_ms: DEFAULT_PROVISION_TIMEOUT_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

impl ManagerConfig {
    pub fn default_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.default_idle_timeout_ms)
    }

    pub fn max_queue_time(&self) -> Duration {
        Duration::from_millis(self.max_queue_time_ms)
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms.max(1))
    }

    pub fn idle_check_interval(&self) -> Duration {
        Duration::from_millis(self.idle_check_interval_ms.max(1))
    }

    pub fn provision_timeout(&self) -> Duration {
        Duration::from_millis(self.provision_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Contents of the daemon's TOML file: a `[manager]` table and a `[[nodes]]`
/// array.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub manager: ManagerConfig,
    #[serde(default)]
    pub nodes: Vec<ComputeNodeConfig>,
}

impl Config {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.load_from_env();
        Ok(config)
    }

    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn load_from_env(&mut self) {
        self.apply_env(|key| std::env::var(key).ok());
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(endpoint) = lookup("PROVISIONER_ENDPOINT") {
            self.manager.provisioner_endpoint = endpoint;
        }
        if let Some(api_key) = lookup("PROVISIONER_API_KEY") {
            self.manager.provisioner_api_key = Some(api_key);
        }
        if let Some(rpc_url) = lookup("RPC_URL") {
            self.manager.rpc_url = Some(rpc_url);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::U256;
    use shared::models::{GpuType, HardwareType, TeeType};
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
        [manager]
        provisioner_endpoint = "https://provisioner.internal"
        max_queue_time_ms = 90000

        [[nodes]]
        node_id = "llama-h100"
        name = "Llama 70B"
        hardware_type = "gpu"
        tee_type = "phala"
        gpu_type = "H100"
        gpu_memory_gb = 80
        cpu_cores = 16
        memory_gb = 200
        container_image = "vllm/vllm-openai:latest"
        idle_timeout_ms = 120000
        cold_start_time_ms = 90000
        price_per_hour_wei = "3000000000000000000"
        regions = ["us-east", "eu-west"]

        [nodes.env]
        MODEL = "meta-llama/Llama-3-70B"

        [[nodes]]
        node_id = "embed-cpu"
        name = "Embeddings"
        hardware_type = "cpu"
        cpu_cores = 4
        memory_gb = 16
        container_image = "ghcr.io/acme/embed:1.2"
        cold_start_time_ms = 8000
        price_per_hour_wei = 120000000000000
        regions = ["us-east"]
    "#;

    #[test]
    fn test_parse_sample_config() {
        let config = Config::from_toml_str(SAMPLE).unwrap();
        assert_eq!(
            config.manager.provisioner_endpoint,
            "https://provisioner.internal"
        );
        assert_eq!(config.manager.max_queue_time_ms, 90_000);
        assert_eq!(
            config.manager.default_idle_timeout_ms,
            DEFAULT_IDLE_TIMEOUT_MS
        );
        assert_eq!(config.nodes.len(), 2);

        let gpu = &config.nodes[0];
        assert_eq!(gpu.hardware_type, HardwareType::Gpu);
        assert_eq!(gpu.tee_type, TeeType::Phala);
        assert_eq!(gpu.gpu_type, GpuType::H100);
        assert_eq!(
            gpu.env,
            Some(HashMap::from([(
                "MODEL".to_string(),
                "meta-llama/Llama-3-70B".to_string()
            )]))
        );
        assert_eq!(
            gpu.price_per_hour_wei,
            U256::from(3_000_000_000_000_000_000u128)
        );

        let cpu = &config.nodes[1];
        assert_eq!(cpu.idle_timeout_ms, None);
        assert_eq!(cpu.price_per_hour_wei, U256::from(120_000_000_000_000u64));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.manager, ManagerConfig::default());
        assert!(config.nodes.is_empty());
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = Config::from_toml_str(SAMPLE).unwrap();
        let env = HashMap::from([
            ("PROVISIONER_ENDPOINT", "http://override:9000"),
            ("PROVISIONER_API_KEY", "k-123"),
        ]);
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.manager.provisioner_endpoint, "http://override:9000");
        assert_eq!(config.manager.provisioner_api_key.as_deref(), Some("k-123"));
        assert_eq!(config.manager.rpc_url, None);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(Config::load_from_file("/nonexistent/node-manager.toml").is_err());
    }

    #[test]
    fn test_zero_intervals_are_clamped() {
        let config = ManagerConfig {
            status_poll_interval_ms: 0,
            idle_check_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.status_poll_interval(), Duration::from_millis(1));
        assert_eq!(config.idle_check_interval(), Duration::from_millis(1));
    }
}
