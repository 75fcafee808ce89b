//! Shared wire types for the ATLAS fleet telemetry platform.
//!
//! Both `fleet-agent` and `fleet-server` depend on this crate so the two
//! processes never drift on the JSON shape of a report. Nothing here talks to
//! a socket or a filesystem — it is pure data plus the payload encryption
//! envelope.

pub mod alert;
pub mod command;
pub mod envelope;
pub mod machine;
pub mod metrics;
pub mod monitors;
pub mod report;
pub mod speedtest;

pub use alert::{Alert, AlertKind, Severity};
pub use command::{Command, CommandResult, CommandStatus, CommandType};
pub use envelope::{EncryptError, Envelope};
pub use machine::{DiskInfo, GpuInfo, Machine, MachineStatus, NetworkInterfaceInfo};
pub use metrics::{
    BatteryMetrics, CpuMetrics, DiskMetrics, MemoryMetrics, MetricReport, NetworkMetrics,
    ProcessSample, ProcessesMetrics, SecurityFlags, TemperatureMetrics, UserSession,
};
pub use monitors::{MonitorKind, MonitorSnapshots, Snapshot};
pub use report::Report;
pub use speedtest::SpeedTestResult;
