//! Typed snapshots for the eleven specialized monitors in §4.1. Each monitor
//! produces exactly one of these shapes; `Snapshot` is the sum type a generic
//! monitor runtime stores as "the last snapshot" without needing a trait
//! object per kind, and `MonitorSnapshots` is the struct-of-optionals the
//! wire report nests under `"monitors"`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorKind {
    System,
    Vpn,
    Saas,
    NetworkQuality,
    WifiRoaming,
    Security,
    Application,
    DiskHealth,
    Peripheral,
    Power,
    Display,
    SoftwareInventory,
}

impl MonitorKind {
    pub const ALL: [MonitorKind; 12] = [
        MonitorKind::System,
        MonitorKind::Vpn,
        MonitorKind::Saas,
        MonitorKind::NetworkQuality,
        MonitorKind::WifiRoaming,
        MonitorKind::Security,
        MonitorKind::Application,
        MonitorKind::DiskHealth,
        MonitorKind::Peripheral,
        MonitorKind::Power,
        MonitorKind::Display,
        MonitorKind::SoftwareInventory,
    ];

    /// Sampling interval in seconds, per the authoritative table in §4.1.
    pub fn interval_seconds(self) -> u64 {
        match self {
            MonitorKind::System => 5,
            MonitorKind::Vpn => 30,
            MonitorKind::Saas => 60,
            MonitorKind::NetworkQuality => 60,
            MonitorKind::WifiRoaming => 5,
            MonitorKind::Security => 300,
            MonitorKind::Application => 60,
            MonitorKind::DiskHealth => 300,
            MonitorKind::Peripheral => 60,
            MonitorKind::Power => 60,
            MonitorKind::Display => 300,
            MonitorKind::SoftwareInventory => 3600,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MonitorKind::System => "system",
            MonitorKind::Vpn => "vpn",
            MonitorKind::Saas => "saas",
            MonitorKind::NetworkQuality => "network_quality",
            MonitorKind::WifiRoaming => "wifi_roaming",
            MonitorKind::Security => "security",
            MonitorKind::Application => "application",
            MonitorKind::DiskHealth => "disk_health",
            MonitorKind::Peripheral => "peripheral",
            MonitorKind::Power => "power",
            MonitorKind::Display => "display",
            MonitorKind::SoftwareInventory => "software_inventory",
        }
    }
}

/// Sum type over every specialized-monitor snapshot shape. `System` is
/// carried separately as `MetricReport` on the wire but still has a variant
/// here so the agent's generic monitor runtime can store it uniformly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Snapshot {
    System,
    Vpn(VpnSnapshot),
    Saas(SaasSnapshot),
    NetworkQuality(NetworkQualitySnapshot),
    WifiRoaming(WifiRoamingSnapshot),
    Security(SecuritySnapshot),
    Application(ApplicationSnapshot),
    DiskHealth(DiskHealthSnapshot),
    Peripheral(PeripheralSnapshot),
    Power(PowerSnapshot),
    Display(DisplaySnapshot),
    SoftwareInventory(SoftwareInventorySnapshot),
}

/// Struct-of-optionals nested under the report's `"monitors"` key — only
/// the monitors that produced a fresh snapshot this tick are populated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorSnapshots {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpn: Option<VpnSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saas: Option<SaasSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_quality: Option<NetworkQualitySnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wifi_roaming: Option<WifiRoamingSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<SecuritySnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application: Option<ApplicationSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_health: Option<DiskHealthSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peripheral: Option<PeripheralSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power: Option<PowerSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<DisplaySnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub software_inventory: Option<SoftwareInventorySnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VpnClient {
    pub tunnel_name: String,
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub connected_since: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VpnSnapshot {
    pub active_clients: Vec<VpnClient>,
    pub events: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaasEndpoint {
    pub name: String,
    pub latency_ms: Option<f32>,
    pub reachable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaasSnapshot {
    pub endpoints: Vec<SaasEndpoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsLatencySample {
    pub resolver: String,
    pub latency_ms: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkQualitySnapshot {
    pub tcp_retx_rate: f32,
    pub dns_latency: Vec<DnsLatencySample>,
    pub tls_handshake_ms: f32,
    pub http_roundtrip_ms: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WifiNeighbor {
    pub bssid: String,
    pub rssi: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WifiRoamingSnapshot {
    pub current_bssid: Option<String>,
    pub rssi: i32,
    pub channel_utilization_pct: f32,
    pub neighbors: Vec<WifiNeighbor>,
    pub roam_events: u32,
    /// True when this client is "sticky" per the configurable threshold
    /// (default: RSSI <= -75 dBm for >= 60s with >= 2 stronger neighbors).
    pub sticky: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecuritySnapshot {
    pub firewall_enabled: bool,
    pub filevault_enabled: bool,
    pub gatekeeper_enabled: bool,
    pub sip_enabled: bool,
    pub pending_updates: u32,
    pub score: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationSnapshot {
    pub crashes_24h: u32,
    pub hangs_24h: u32,
    pub top_cpu_apps: Vec<String>,
    pub top_mem_apps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmartAttribute {
    pub attribute: String,
    pub value: i64,
    pub threshold: i64,
    pub failing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskHealthEntry {
    pub device: String,
    pub smart_attrs: Vec<SmartAttribute>,
    pub io_latency_ms: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskHealthSnapshot {
    pub disks: Vec<DiskHealthEntry>,
    pub volumes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BluetoothDevice {
    pub name: String,
    pub address: String,
    pub connected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsbDevice {
    pub name: String,
    pub vendor_id: u16,
    pub product_id: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThunderboltDevice {
    pub name: String,
    pub connected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeripheralSnapshot {
    pub bluetooth: Vec<BluetoothDevice>,
    pub usb: Vec<UsbDevice>,
    pub thunderbolt: Vec<ThunderboltDevice>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThermalState {
    Nominal,
    Fair,
    Serious,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerSnapshot {
    pub battery_pct: Option<f32>,
    pub cycles: Option<u32>,
    pub health_pct: Option<f32>,
    pub charging: bool,
    pub thermal_state: ThermalState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayInfo {
    pub name: String,
    pub resolution: String,
    pub refresh_hz: u32,
    pub is_primary: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplaySnapshot {
    pub displays: Vec<DisplayInfo>,
    pub gpu: Option<String>,
    pub vram_mb: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftwarePackage {
    pub name: String,
    pub version: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftwareInventorySnapshot {
    pub apps: Vec<SoftwarePackage>,
    pub extensions: Vec<String>,
}
