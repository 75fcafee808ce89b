//! Alert derivation (§4.4, §8 scenario 5). Alerts are never stored — they
//! are computed at read time from the latest snapshot plus derived status.

use fleet_core::monitors::MonitorSnapshots;
use fleet_core::{Alert, AlertKind, MachineStatus, MetricReport, Severity};

use crate::config::AlertThresholds;

/// Derive the alert set for one machine from its latest metrics, monitor
/// snapshots, and status. `since` is approximated as the metric's own
/// timestamp — the spec doesn't require tracking exactly when a threshold
/// was first crossed.
pub fn derive_alerts(
    machine_id: &str,
    status: MachineStatus,
    metrics: Option<&MetricReport>,
    monitors: Option<&MonitorSnapshots>,
    thresholds: &AlertThresholds,
    observed_at: chrono::DateTime<chrono::Utc>,
) -> Vec<Alert> {
    let mut alerts = Vec::new();

    if status != MachineStatus::Online {
        let severity = if status == MachineStatus::Offline {
            Severity::Critical
        } else {
            Severity::Warning
        };
        alerts.push(Alert {
            machine_id: machine_id.to_string(),
            kind: AlertKind::Offline,
            severity,
            observed_value: 0.0,
            threshold: 0.0,
            since: observed_at,
        });
    }

    if let Some(monitors) = monitors {
        if let Some(disk_health) = &monitors.disk_health {
            let failing = disk_health
                .disks
                .iter()
                .filter(|d| d.smart_attrs.iter().any(|a| a.failing))
                .count();
            if failing > 0 {
                alerts.push(Alert {
                    machine_id: machine_id.to_string(),
                    kind: AlertKind::FailedDisk,
                    severity: Severity::Critical,
                    observed_value: failing as f64,
                    threshold: 0.0,
                    since: observed_at,
                });
            }
        }

        if let Some(application) = &monitors.application {
            if application.crashes_24h as f64 >= thresholds.crashes_24h {
                alerts.push(Alert {
                    machine_id: machine_id.to_string(),
                    kind: AlertKind::AppCrashesHigh,
                    severity: Severity::Warning,
                    observed_value: application.crashes_24h as f64,
                    threshold: thresholds.crashes_24h,
                    since: observed_at,
                });
            }
        }
    }

    let Some(metrics) = metrics else {
        return alerts;
    };

    if metrics.cpu.percent as f64 >= thresholds.cpu {
        alerts.push(Alert {
            machine_id: machine_id.to_string(),
            kind: AlertKind::CpuHigh,
            severity: Severity::Warning,
            observed_value: metrics.cpu.percent as f64,
            threshold: thresholds.cpu,
            since: observed_at,
        });
    }

    if metrics.memory.percent as f64 >= thresholds.memory {
        alerts.push(Alert {
            machine_id: machine_id.to_string(),
            kind: AlertKind::MemoryHigh,
            severity: Severity::Warning,
            observed_value: metrics.memory.percent as f64,
            threshold: thresholds.memory,
            since: observed_at,
        });
    }

    if metrics.disk.percent as f64 >= thresholds.disk {
        alerts.push(Alert {
            machine_id: machine_id.to_string(),
            kind: AlertKind::DiskHigh,
            severity: Severity::Warning,
            observed_value: metrics.disk.percent as f64,
            threshold: thresholds.disk,
            since: observed_at,
        });
    }

    if let Some(battery) = &metrics.battery {
        if (battery.percent as f64) <= thresholds.battery {
            alerts.push(Alert {
                machine_id: machine_id.to_string(),
                kind: AlertKind::BatteryLow,
                severity: Severity::Warning,
                observed_value: battery.percent as f64,
                threshold: thresholds.battery,
                since: observed_at,
            });
        }
    }

    if let Some(temp) = &metrics.temperature {
        if let Some(cpu_celsius) = temp.cpu_celsius {
            if (cpu_celsius as f64) >= thresholds.temp {
                alerts.push(Alert {
                    machine_id: machine_id.to_string(),
                    kind: AlertKind::TempHigh,
                    severity: Severity::Critical,
                    observed_value: cpu_celsius as f64,
                    threshold: thresholds.temp,
                    since: observed_at,
                });
            }
        }
    }

    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::{CpuMetrics, DiskMetrics, MemoryMetrics, NetworkMetrics, ProcessesMetrics};

    fn metrics_with_cpu(percent: f32) -> MetricReport {
        MetricReport {
            uptime_seconds: 0,
            cpu: CpuMetrics {
                percent,
                per_core: vec![],
                load_avg: [0.0, 0.0, 0.0],
                count: 1,
                threads: 1,
            },
            memory: MemoryMetrics {
                total: 0,
                available: 0,
                used: 0,
                percent: 0.0,
                swap_total: 0,
                swap_used: 0,
                swap_percent: 0.0,
            },
            disk: DiskMetrics {
                total: 0,
                used: 0,
                free: 0,
                percent: 0.0,
                read_bytes: 0,
                write_bytes: 0,
                read_count: 0,
                write_count: 0,
            },
            network: NetworkMetrics {
                bytes_sent: 0,
                bytes_recv: 0,
                packets_sent: 0,
                packets_recv: 0,
                errin: 0,
                errout: 0,
                dropin: 0,
                dropout: 0,
                connections: 0,
            },
            processes: ProcessesMetrics {
                total: 0,
                top_cpu: vec![],
                top_memory: vec![],
            },
            battery: None,
            temperature: None,
            users: vec![],
            security: None,
        }
    }

    #[test]
    fn cpu_at_or_above_threshold_raises_alert() {
        let thresholds = AlertThresholds::default();
        let metrics = metrics_with_cpu(90.0);
        let alerts = derive_alerts(
            "m3",
            MachineStatus::Online,
            Some(&metrics),
            None,
            &thresholds,
            chrono::Utc::now(),
        );
        assert!(alerts.iter().any(|a| a.kind == AlertKind::CpuHigh && a.observed_value == 90.0));
    }

    #[test]
    fn failing_disk_raises_failed_disk_alert() {
        let thresholds = AlertThresholds::default();
        let monitors = MonitorSnapshots {
            disk_health: Some(fleet_core::monitors::DiskHealthSnapshot {
                disks: vec![fleet_core::monitors::DiskHealthEntry {
                    device: "disk0".to_string(),
                    smart_attrs: vec![fleet_core::monitors::SmartAttribute {
                        attribute: "reallocated_sectors".to_string(),
                        value: 50,
                        threshold: 10,
                        failing: true,
                    }],
                    io_latency_ms: 5.0,
                }],
                volumes: vec![],
            }),
            ..Default::default()
        };
        let alerts = derive_alerts(
            "m4",
            MachineStatus::Online,
            None,
            Some(&monitors),
            &thresholds,
            chrono::Utc::now(),
        );
        assert!(alerts.iter().any(|a| a.kind == AlertKind::FailedDisk));
    }

    #[test]
    fn crashes_at_or_above_threshold_raises_app_crashes_alert() {
        let thresholds = AlertThresholds::default();
        let monitors = MonitorSnapshots {
            application: Some(fleet_core::monitors::ApplicationSnapshot {
                crashes_24h: thresholds.crashes_24h as u32 + 1,
                hangs_24h: 0,
                top_cpu_apps: vec![],
                top_mem_apps: vec![],
            }),
            ..Default::default()
        };
        let alerts = derive_alerts(
            "m5",
            MachineStatus::Online,
            None,
            Some(&monitors),
            &thresholds,
            chrono::Utc::now(),
        );
        assert!(alerts.iter().any(|a| a.kind == AlertKind::AppCrashesHigh));
    }

    #[test]
    fn offline_status_raises_offline_alert() {
        let thresholds = AlertThresholds::default();
        let alerts = derive_alerts(
            "m1",
            MachineStatus::Offline,
            None,
            None,
            &thresholds,
            chrono::Utc::now(),
        );
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::Offline);
        assert_eq!(alerts[0].severity, Severity::Critical);
    }
}
