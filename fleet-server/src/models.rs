//! Response DTOs shared across handlers (§4.6). Distinct from `fleet_core`'s
//! wire types: these are read-API shapes the dashboard/operator consumes,
//! not the agent⇄server report contract.

use chrono::{DateTime, Utc};
use fleet_core::{Alert, MachineStatus};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct MachineSummaryResponse {
    pub machine_id: String,
    pub status: MachineStatus,
    pub last_seen: DateTime<Utc>,
    pub cpu_percent: Option<f32>,
    pub memory_percent: Option<f32>,
    pub disk_percent: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct MachinesListResponse {
    pub machines: Vec<MachineSummaryResponse>,
}

#[derive(Debug, Serialize)]
pub struct FleetSummaryResponse {
    pub total_machines: usize,
    pub online: usize,
    pub warning: usize,
    pub offline: usize,
    pub avg_cpu: f64,
    pub avg_memory: f64,
    pub avg_disk: f64,
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Serialize)]
pub struct SpeedtestPerMachine {
    pub machine_id: String,
    pub avg_download_mbps: f64,
    pub avg_upload_mbps: f64,
    pub avg_ping_ms: f64,
    pub sample_count: usize,
}

#[derive(Debug, Serialize)]
pub struct SpeedtestRecent20Response {
    pub per_machine: Vec<SpeedtestPerMachine>,
    pub fleet_avg_download_mbps: f64,
    pub fleet_avg_upload_mbps: f64,
}

#[derive(Debug, Serialize)]
pub struct SpeedtestSummaryResponse {
    pub hours: i64,
    pub sample_count: usize,
    pub avg_download_mbps: f64,
    pub avg_upload_mbps: f64,
    pub avg_ping_ms: f64,
}

#[derive(Debug, Serialize)]
pub struct SpeedtestComparisonEntry {
    pub machine_id: String,
    pub machine_mean_download_mbps: f64,
    pub fleet_mean_download_mbps: f64,
    pub delta_pct: f64,
}

#[derive(Debug, Serialize)]
pub struct SpeedtestComparisonResponse {
    pub hours: i64,
    pub machines: Vec<SpeedtestComparisonEntry>,
}

#[derive(Debug, Serialize)]
pub struct SpeedtestAnomaly {
    pub timestamp: DateTime<Utc>,
    pub download_mbps: f64,
    pub z_score: f64,
}

#[derive(Debug, Serialize)]
pub struct SpeedtestAnomaliesResponse {
    pub machine_id: String,
    pub anomalies: Vec<SpeedtestAnomaly>,
}

#[derive(Debug, Serialize)]
pub struct ServerResourcesResponse {
    pub cpu_usage_percent: f32,
    pub memory_used_mb: f64,
    pub memory_total_mb: f64,
    pub uptime_seconds: u64,
    pub tls_enabled: bool,
    pub expires_in_days: Option<i64>,
    pub total_machines: usize,
}
