use crate::models::node::{ComputeNodeConfig, GpuType, HardwareType, TeeType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProvisionPriority {
    Low,
    #[default]
    Normal,
    High,
}

/// Body of `POST /api/v1/compute/provision`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionRequest {
    pub node_id: String,
    pub hardware_type: HardwareType,
    pub tee_type: TeeType,
    pub gpu_type: GpuType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_memory_gb: Option<u32>,
    pub cpu_cores: u32,
    pub memory_gb: u32,
    pub container_image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub startup_command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<ProvisionPriority>,
}

impl ProvisionRequest {
    pub fn new(config: &ComputeNodeConfig, priority: Option<ProvisionPriority>) -> Self {
        Self {
            node_id: config.node_id.clone(),
            hardware_type: config.hardware_type,
            tee_type: config.tee_type,
            gpu_type: config.gpu_type.clone(),
            gpu_memory_gb: config.gpu_memory_gb,
            cpu_cores: config.cpu_cores,
            memory_gb: config.memory_gb,
            container_image: config.container_image.clone(),
            startup_command: config.startup_command.clone(),
            env: config.env.clone(),
            priority,
        }
    }
}

/// Lifecycle state reported by the provisioning backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RemoteNodeStatus {
    Pending,
    Provisioning,
    Ready,
    Running,
    Failed,
    Terminated,
    #[serde(other)]
    Unknown,
}

impl RemoteNodeStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, RemoteNodeStatus::Pending | RemoteNodeStatus::Provisioning)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, RemoteNodeStatus::Ready | RemoteNodeStatus::Running)
    }
}

impl fmt::Display for RemoteNodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RemoteNodeStatus::Pending => "pending",
            RemoteNodeStatus::Provisioning => "provisioning",
            RemoteNodeStatus::Ready => "ready",
            RemoteNodeStatus::Running => "running",
            RemoteNodeStatus::Failed => "failed",
            RemoteNodeStatus::Terminated => "terminated",
            RemoteNodeStatus::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A synchronous backend answers with the endpoint directly. Backends that
/// provision in the background answer with a pending `status` instead and
/// are polled through the status route.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_meta: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RemoteNodeStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TerminateRequest {
    pub node_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TerminateResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatusRequest {
    pub node_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatusResponse {
    pub status: RemoteNodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_meta: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Error body returned by the provisioner on non-2xx responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProvisionerErrorBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::U256;
    use serde_json::json;

    fn config() -> ComputeNodeConfig {
        ComputeNodeConfig {
            node_id: "n1".to_string(),
            name: "Node 1".to_string(),
            hardware_type: HardwareType::Gpu,
            tee_type: TeeType::Sev,
            gpu_type: GpuType::A100_80,
            gpu_memory_gb: Some(80),
            cpu_cores: 8,
            memory_gb: 64,
            container_image: "vllm/vllm-openai:v0.6".to_string(),
            startup_command: Some("serve".to_string()),
            env: Some(HashMap::from([("MODEL".to_string(), "llama".to_string())])),
            idle_timeout_ms: None,
            cold_start_time_ms: 1000,
            price_per_hour_wei: U256::from(1u64),
            regions: vec!["us-west".to_string()],
        }
    }

    #[test]
    fn test_provision_request_body_is_camel_case() {
        let body = serde_json::to_value(ProvisionRequest::new(
            &config(),
            Some(ProvisionPriority::High),
        ))
        .unwrap();
        assert_eq!(
            body,
            json!({
                "nodeId": "n1",
                "hardwareType": "gpu",
                "teeType": "sev",
                "gpuType": "A100_80",
                "gpuMemoryGb": 80,
                "cpuCores": 8,
                "memoryGb": 64,
                "containerImage": "vllm/vllm-openai:v0.6",
                "startupCommand": "serve",
                "env": {"MODEL": "llama"},
                "priority": "high"
            })
        );
    }

    #[test]
    fn test_provision_request_omits_unset_optionals() {
        let mut config = config();
        config.gpu_memory_gb = None;
        config.startup_command = None;
        config.env = None;
        let body = serde_json::to_value(ProvisionRequest::new(&config, None)).unwrap();
        let object = body.as_object().unwrap();
        assert!(!object.contains_key("gpuMemoryGb"));
        assert!(!object.contains_key("startupCommand"));
        assert!(!object.contains_key("env"));
        assert!(!object.contains_key("priority"));
    }

    #[test]
    fn test_provision_response_parsing() {
        let response: ProvisionResponse = serde_json::from_value(json!({
            "endpoint": "https://n1.example.com",
            "internalEndpoint": "http://10.0.0.4:8000",
            "providerMeta": {"instanceId": "i-123"}
        }))
        .unwrap();
        assert_eq!(response.endpoint.as_deref(), Some("https://n1.example.com"));
        assert_eq!(
            response.internal_endpoint.as_deref(),
            Some("http://10.0.0.4:8000")
        );
        assert_eq!(response.provider_meta, Some(json!({"instanceId": "i-123"})));
        assert_eq!(response.status, None);
    }

    #[test]
    fn test_unknown_remote_status_is_tolerated() {
        let response: NodeStatusResponse =
            serde_json::from_value(json!({"status": "hibernating"})).unwrap();
        assert_eq!(response.status, RemoteNodeStatus::Unknown);
        assert!(!response.status.is_ready());
        assert!(!response.status.is_pending());

        let response: NodeStatusResponse =
            serde_json::from_value(json!({"status": "running", "endpoint": "http://x"})).unwrap();
        assert!(response.status.is_ready());
    }

    #[test]
    fn test_remote_status_displays_wire_names() {
        assert_eq!(RemoteNodeStatus::Failed.to_string(), "failed");
        assert_eq!(RemoteNodeStatus::Provisioning.to_string(), "provisioning");
        for status in [
            RemoteNodeStatus::Pending,
            RemoteNodeStatus::Ready,
            RemoteNodeStatus::Running,
            RemoteNodeStatus::Terminated,
        ] {
            assert_eq!(json!(status), json!(status.to_string()));
        }
    }
}
