use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hardware/OS inventory collected once at agent boot (and refreshed on
/// hardware-change detection). Immutable after `machine_id` is assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    pub machine_id: String,
    pub hostname: String,
    pub os: String,
    pub os_version: String,
    pub processor: String,
    pub cpu_count: u32,
    pub cpu_threads: u32,
    /// Bytes.
    pub total_memory: u64,
    #[serde(default)]
    pub disks: Vec<DiskInfo>,
    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterfaceInfo>,
    #[serde(default)]
    pub gpu: Option<GpuInfo>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskInfo {
    pub name: String,
    pub mount_point: String,
    pub total_bytes: u64,
    pub filesystem: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkInterfaceInfo {
    pub name: String,
    pub mac_address: Option<String>,
    pub ip_addresses: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuInfo {
    pub name: String,
    pub vram_mb: Option<u64>,
}

/// Liveness derived at read time from `last_seen`; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineStatus {
    Online,
    Warning,
    Offline,
}

impl MachineStatus {
    /// `online` if within 2x interval, `warning` up to 5x, `offline` beyond.
    /// `interval_seconds` is the machine's configured reporting interval.
    pub fn derive(last_seen: DateTime<Utc>, now: DateTime<Utc>, interval_seconds: i64) -> Self {
        let elapsed = (now - last_seen).num_seconds().max(0);
        if elapsed <= 2 * interval_seconds {
            MachineStatus::Online
        } else if elapsed <= 5 * interval_seconds {
            MachineStatus::Warning
        } else {
            MachineStatus::Offline
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn status_boundaries_at_2x_and_5x_interval() {
        let now = Utc::now();
        let interval = 10;

        let online_edge = now - Duration::seconds(20);
        assert_eq!(
            MachineStatus::derive(online_edge, now, interval),
            MachineStatus::Online
        );

        let warning_edge = now - Duration::seconds(21);
        assert_eq!(
            MachineStatus::derive(warning_edge, now, interval),
            MachineStatus::Warning
        );

        let warning_far_edge = now - Duration::seconds(50);
        assert_eq!(
            MachineStatus::derive(warning_far_edge, now, interval),
            MachineStatus::Warning
        );

        let offline_edge = now - Duration::seconds(51);
        assert_eq!(
            MachineStatus::derive(offline_edge, now, interval),
            MachineStatus::Offline
        );
    }
}
