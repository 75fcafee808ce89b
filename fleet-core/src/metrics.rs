use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One periodic sample of host state, matching the `system` monitor's shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricReport {
    pub uptime_seconds: u64,
    pub cpu: CpuMetrics,
    pub memory: MemoryMetrics,
    pub disk: DiskMetrics,
    pub network: NetworkMetrics,
    pub processes: ProcessesMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery: Option<BatteryMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<TemperatureMetrics>,
    #[serde(default)]
    pub users: Vec<UserSession>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<SecurityFlags>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuMetrics {
    pub percent: f32,
    #[serde(default)]
    pub per_core: Vec<f32>,
    pub load_avg: [f32; 3],
    pub count: u32,
    pub threads: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetrics {
    pub total: u64,
    pub available: u64,
    pub used: u64,
    pub percent: f32,
    pub swap_total: u64,
    pub swap_used: u64,
    pub swap_percent: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskMetrics {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub percent: f32,
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub read_count: u64,
    pub write_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkMetrics {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
    pub errin: u64,
    pub errout: u64,
    pub dropin: u64,
    pub dropout: u64,
    pub connections: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessesMetrics {
    pub total: u32,
    #[serde(default)]
    pub top_cpu: Vec<ProcessSample>,
    #[serde(default)]
    pub top_memory: Vec<ProcessSample>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSample {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f32,
    pub memory_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryMetrics {
    pub percent: f32,
    pub charging: bool,
    pub time_remaining_minutes: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureMetrics {
    pub cpu_celsius: Option<f32>,
    pub gpu_celsius: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSession {
    pub username: String,
    pub terminal: Option<String>,
    pub login_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityFlags {
    pub firewall_enabled: bool,
    pub filevault_enabled: bool,
    pub gatekeeper_enabled: bool,
    pub sip_enabled: bool,
    pub pending_updates: u32,
    /// 0-100 composite posture score.
    pub score: u8,
}
