use alloy::primitives::U256;
use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum HardwareType {
    Cpu,
    Gpu,
}

impl fmt::Display for HardwareType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HardwareType::Cpu => write!(f, "cpu"),
            HardwareType::Gpu => write!(f, "gpu"),
        }
    }
}

/// Trusted execution environment backing a node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum TeeType {
    #[default]
    None,
    Sgx,
    Sev,
    Nitro,
    Phala,
}

impl fmt::Display for TeeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TeeType::None => "none",
            TeeType::Sgx => "sgx",
            TeeType::Sev => "sev",
            TeeType::Nitro => "nitro",
            TeeType::Phala => "phala",
        };
        write!(f, "{name}")
    }
}

/// GPU model requested from the provisioner. Names the provisioner does not
/// publish as a known model are carried through verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum GpuType {
    #[default]
    None,
    H100,
    H200,
    B200,
    A100_80,
    A100_40,
    L40s,
    Rtx4090,
    A10g,
    T4,
    Other(String),
}

impl GpuType {
    pub fn as_str(&self) -> &str {
        match self {
            GpuType::None => "none",
            GpuType::H100 => "H100",
            GpuType::H200 => "H200",
            GpuType::B200 => "B200",
            GpuType::A100_80 => "A100_80",
            GpuType::A100_40 => "A100_40",
            GpuType::L40s => "L40S",
            GpuType::Rtx4090 => "RTX4090",
            GpuType::A10g => "A10G",
            GpuType::T4 => "T4",
            GpuType::Other(name) => name,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, GpuType::None)
    }
}

impl FromStr for GpuType {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let gpu = match s.trim() {
            "" | "none" => GpuType::None,
            "H100" => GpuType::H100,
            "H200" => GpuType::H200,
            "B200" => GpuType::B200,
            "A100_80" => GpuType::A100_80,
            "A100_40" => GpuType::A100_40,
            "L40S" => GpuType::L40s,
            "RTX4090" => GpuType::Rtx4090,
            "A10G" => GpuType::A10g,
            "T4" => GpuType::T4,
            other => GpuType::Other(other.to_string()),
        };
        Ok(gpu)
    }
}

impl From<String> for GpuType {
    fn from(value: String) -> Self {
        match value.parse() {
            Ok(gpu) => gpu,
            Err(never) => match never {},
        }
    }
}

impl From<GpuType> for String {
    fn from(value: GpuType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for GpuType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Static description of a compute node, fixed at registration time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComputeNodeConfig {
    pub node_id: String,
    pub name: String,
    pub hardware_type: HardwareType,
    #[serde(default)]
    pub tee_type: TeeType,
    #[serde(default)]
    pub gpu_type: GpuType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_memory_gb: Option<u32>,
    pub cpu_cores: u32,
    pub memory_gb: u32,
    pub container_image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
    /// Falls back to the manager-wide default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout_ms: Option<u64>,
    /// Expected provisioning latency. Only used for display countdowns.
    pub cold_start_time_ms: u64,
    #[serde(with = "wei")]
    pub price_per_hour_wei: U256,
    pub regions: Vec<String>,
}

impl ComputeNodeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.node_id.trim().is_empty() {
            bail!("node_id must not be empty");
        }
        if self.regions.is_empty() {
            bail!("node {} must list at least one region", self.node_id);
        }
        if self.cpu_cores == 0 {
            bail!("node {} must request at least one cpu core", self.node_id);
        }
        if self.hardware_type == HardwareType::Gpu && self.gpu_type.is_none() {
            bail!("gpu node {} has no gpu_type", self.node_id);
        }
        Ok(())
    }
}

impl fmt::Display for ComputeNodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {}, {} cores, {} GB",
            self.node_id, self.hardware_type, self.container_image, self.cpu_cores, self.memory_gb
        )?;
        if !self.gpu_type.is_none() {
            write!(f, ", gpu {}", self.gpu_type)?;
        }
        if self.tee_type != TeeType::None {
            write!(f, ", tee {}", self.tee_type)?;
        }
        write!(f, ")")
    }
}

/// Parses a wei amount given either in decimal or as a `0x` prefixed hex string.
pub fn parse_wei(value: &str) -> Result<U256> {
    let value = value.trim();
    let parsed = match value.strip_prefix("0x") {
        Some(hex) => U256::from_str_radix(hex, 16),
        None => U256::from_str_radix(value, 10),
    };
    parsed.map_err(|e| anyhow!("invalid wei amount '{value}': {e}"))
}

mod wei {
    use super::parse_wei;
    use alloy::primitives::U256;
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawWei {
        Text(String),
        Number(u64),
    }

    pub(super) fn serialize<S>(value: &U256, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<U256, D::Error>
    where
        D: Deserializer<'de>,
    {
        match RawWei::deserialize(deserializer)? {
            RawWei::Text(text) => parse_wei(&text).map_err(de::Error::custom),
            RawWei::Number(number) => Ok(U256::from(number)),
        }
    }
}
