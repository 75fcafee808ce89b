//! In-memory fleet registry, per §4.4.
//!
//! The map from `machine_id` to `MachineEntry` is guarded by a global
//! `RwLock`; readers take a read lock just long enough to clone an `Arc`,
//! then operate on the per-machine mutex. Ingestion takes the per-machine
//! mutex to serialize `last_seen` advancement without holding the global
//! lock across the SQLite write-through.

pub mod sqlite;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fleet_core::{Machine, MetricReport, MonitorSnapshots, SpeedTestResult};
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Clone)]
pub struct HistorySample {
    pub timestamp: DateTime<Utc>,
    pub metrics: MetricReport,
}

/// Everything the server knows about one machine, in memory.
pub struct MachineEntry {
    pub info: Option<Machine>,
    pub latest_metrics: Option<MetricReport>,
    pub latest_monitors: MonitorSnapshots,
    pub latest_speedtest: Option<SpeedTestResult>,
    pub history: VecDeque<HistorySample>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// The interval this machine last declared (via `machine_info` or
    /// config); used for status derivation when no better value is known.
    pub interval_seconds: i64,
}

impl MachineEntry {
    fn new(now: DateTime<Utc>, default_interval: i64) -> Self {
        Self {
            info: None,
            latest_metrics: None,
            latest_monitors: MonitorSnapshots::default(),
            latest_speedtest: None,
            history: VecDeque::new(),
            first_seen: now,
            last_seen: now,
            interval_seconds: default_interval,
        }
    }

    /// Push a history sample, evicting the oldest once `cap` is exceeded
    /// (FIFO, per invariant §8.6).
    pub fn push_history(&mut self, sample: HistorySample, cap: usize) {
        self.history.push_back(sample);
        while self.history.len() > cap {
            self.history.pop_front();
        }
    }
}

pub struct MachineSummary {
    pub machine_id: String,
    pub status: fleet_core::MachineStatus,
    pub last_seen: DateTime<Utc>,
    pub cpu_percent: Option<f32>,
    pub memory_percent: Option<f32>,
    pub disk_percent: Option<f32>,
}

/// Thread-safe in-memory fleet registry.
pub struct Store {
    machines: RwLock<HashMap<String, Arc<Mutex<MachineEntry>>>>,
    pub history_size: usize,
    pub default_interval_seconds: i64,
}

impl Store {
    pub fn new(history_size: usize, default_interval_seconds: i64) -> Self {
        Self {
            machines: RwLock::new(HashMap::new()),
            history_size,
            default_interval_seconds,
        }
    }

    /// Returns the entry for `machine_id`, registering a fresh one with
    /// `first_seen = now` if this is the first time it's been seen.
    /// `is_new` reports whether registration happened on this call.
    pub async fn get_or_register(
        &self,
        machine_id: &str,
        now: DateTime<Utc>,
    ) -> (Arc<Mutex<MachineEntry>>, bool) {
        {
            let map = self.machines.read().await;
            if let Some(entry) = map.get(machine_id) {
                return (entry.clone(), false);
            }
        }
        let mut map = self.machines.write().await;
        if let Some(entry) = map.get(machine_id) {
            return (entry.clone(), false);
        }
        let entry = Arc::new(Mutex::new(MachineEntry::new(
            now,
            self.default_interval_seconds,
        )));
        map.insert(machine_id.to_string(), entry.clone());
        (entry, true)
    }

    pub async fn get(&self, machine_id: &str) -> Option<Arc<Mutex<MachineEntry>>> {
        self.machines.read().await.get(machine_id).cloned()
    }

    pub async fn machine_ids(&self) -> Vec<String> {
        self.machines.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.machines.read().await.len()
    }

    /// Seed an in-memory entry directly — used on boot to hydrate from
    /// SQLite without going through the ingestion path.
    pub async fn hydrate(&self, machine_id: String, entry: MachineEntry) {
        let mut map = self.machines.write().await;
        map.entry(machine_id)
            .or_insert_with(|| Arc::new(Mutex::new(entry)));
    }

    /// Build read-time summaries for every machine, deriving `status` from
    /// `last_seen` against each machine's own interval (§4.4).
    pub async fn summaries(&self, now: DateTime<Utc>) -> Vec<MachineSummary> {
        let map = self.machines.read().await;
        let mut out = Vec::with_capacity(map.len());
        for (machine_id, entry) in map.iter() {
            let entry = entry.lock().await;
            let status =
                fleet_core::MachineStatus::derive(entry.last_seen, now, entry.interval_seconds);
            out.push(MachineSummary {
                machine_id: machine_id.clone(),
                status,
                last_seen: entry.last_seen,
                cpu_percent: entry.latest_metrics.as_ref().map(|m| m.cpu.percent),
                memory_percent: entry.latest_metrics.as_ref().map(|m| m.memory.percent),
                disk_percent: entry.latest_metrics.as_ref().map(|m| m.disk.percent),
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registers_new_machine_once() {
        let store = Store::new(1000, 10);
        let now = Utc::now();
        let (_, is_new) = store.get_or_register("mac-01", now).await;
        assert!(is_new);
        let (_, is_new_again) = store.get_or_register("mac-01", now).await;
        assert!(!is_new_again);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn history_ring_evicts_oldest_past_cap() {
        let store = Store::new(2, 10);
        let now = Utc::now();
        let (entry, _) = store.get_or_register("mac-01", now).await;
        let mut guard = entry.lock().await;
        for i in 0..5 {
            guard.push_history(
                HistorySample {
                    timestamp: now + chrono::Duration::seconds(i),
                    metrics: sample_metrics(),
                },
                store.history_size.min(2),
            );
        }
        assert_eq!(guard.history.len(), 2);
    }

    fn sample_metrics() -> MetricReport {
        MetricReport {
            uptime_seconds: 0,
            cpu: fleet_core::CpuMetrics {
                percent: 0.0,
                per_core: vec![],
                load_avg: [0.0, 0.0, 0.0],
                count: 1,
                threads: 1,
            },
            memory: fleet_core::MemoryMetrics {
                total: 0,
                available: 0,
                used: 0,
                percent: 0.0,
                swap_total: 0,
                swap_used: 0,
                swap_percent: 0.0,
            },
            disk: fleet_core::DiskMetrics {
                total: 0,
                used: 0,
                free: 0,
                percent: 0.0,
                read_bytes: 0,
                write_bytes: 0,
                read_count: 0,
                write_count: 0,
            },
            network: fleet_core::NetworkMetrics {
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
            processes: fleet_core::ProcessesMetrics {
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
}
