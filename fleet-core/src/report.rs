use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::command::CommandResult;
use crate::machine::Machine;
use crate::metrics::MetricReport;
use crate::monitors::MonitorSnapshots;
use crate::speedtest::SpeedTestResult;

/// The decrypted (or never-encrypted) report body, per §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub machine_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_info: Option<Machine>,
    pub metrics: MetricReport,
    #[serde(default, skip_serializing_if = "is_default_monitors")]
    pub monitors: MonitorSnapshots,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speedtest: Option<SpeedTestResult>,
    #[serde(default)]
    pub command_results: Vec<CommandResult>,
}

fn is_default_monitors(m: &MonitorSnapshots) -> bool {
    m == &MonitorSnapshots::default()
}
