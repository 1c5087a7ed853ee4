//! GPU memory statistics reported by the diffusion runtime.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Memory usage snapshot, in gigabytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MemoryStats {
    /// Whether the runtime has a CUDA device
    pub gpu_available: bool,
    /// Device name reported by the runtime
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    /// Memory held by live tensors
    #[serde(default)]
    pub allocated_gb: f64,
    /// Memory reserved by the caching allocator
    #[serde(default)]
    pub reserved_gb: f64,
    /// Peak allocated memory since start
    #[serde(default)]
    pub max_allocated_gb: f64,
    /// Total device memory
    #[serde(default)]
    pub total_gb: f64,
}

impl MemoryStats {
    /// Stats for a runtime without a GPU.
    pub fn unavailable() -> Self {
        Self {
            gpu_available: false,
            device_name: None,
            allocated_gb: 0.0,
            reserved_gb: 0.0,
            max_allocated_gb: 0.0,
            total_gb: 0.0,
        }
    }

    /// Fraction of device memory currently reserved (0.0 when unknown).
    pub fn reserved_fraction(&self) -> f64 {
        if self.total_gb <= 0.0 {
            return 0.0;
        }
        self.reserved_gb / self.total_gb
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_fraction() {
        let stats = MemoryStats {
            gpu_available: true,
            device_name: Some("NVIDIA H100 80GB HBM3".to_string()),
            allocated_gb: 30.0,
            reserved_gb: 40.0,
            max_allocated_gb: 60.0,
            total_gb: 80.0,
        };
        assert!((stats.reserved_fraction() - 0.5).abs() < f64::EPSILON);
        assert_eq!(MemoryStats::unavailable().reserved_fraction(), 0.0);
    }

    #[test]
    fn test_partial_payload_deserializes() {
        let stats: MemoryStats = serde_json::from_str(r#"{"gpu_available": false}"#).unwrap();
        assert_eq!(stats, MemoryStats::unavailable());
    }
}
