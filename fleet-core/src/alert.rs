use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    CpuHigh,
    MemoryHigh,
    DiskHigh,
    BatteryLow,
    TempHigh,
    Offline,
    FailedDisk,
    AppCrashesHigh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Derived, not stored: computed at read time from the latest snapshot plus
/// liveness status. See `fleet-server`'s `alerts` module for derivation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub machine_id: String,
    pub kind: AlertKind,
    pub severity: Severity,
    pub observed_value: f64,
    pub threshold: f64,
    pub since: DateTime<Utc>,
}
