//! Monitor runtime (§4.1): one worker task per monitor (§5 "one worker
//! thread per monitor" — realized here as a `tokio` task, since the agent
//! is async end to end rather than OS-thread-per-worker). Within a monitor,
//! sampling is serialized; a sample that overruns its interval does not
//! pile up, it is simply skipped for that tick.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fleet_core::monitors::{MonitorKind, Snapshot};
use tokio::sync::{watch, Mutex};

use crate::commands::QuiesceState;
use crate::csvlog::{self, CsvLog};
use crate::sensors::MonitorSensor;

/// Three consecutive timeouts demote a monitor to degraded (§4.1).
const DEGRADED_AFTER_FAILURES: u32 = 3;

#[derive(Debug, Clone)]
pub struct MonitorSlot {
    pub snapshot: Option<Snapshot>,
    pub sampled_at: Option<DateTime<Utc>>,
    pub stale: bool,
    pub consecutive_failures: u32,
    pub degraded: bool,
}

impl Default for MonitorSlot {
    fn default() -> Self {
        Self {
            snapshot: None,
            sampled_at: None,
            stale: false,
            consecutive_failures: 0,
            degraded: false,
        }
    }
}

/// Shared, mutex-guarded last-snapshot slots — the only shared mutable
/// state the monitor workers touch (§5).
#[derive(Clone, Default)]
pub struct MonitorSlots {
    slots: Arc<HashMap<MonitorKind, Arc<Mutex<MonitorSlot>>>>,
    data_dir: Option<std::path::PathBuf>,
}

/// The query-contract shape of `get_latest` (§4.1): the last snapshot, when
/// it was taken, and whether it's stale.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LatestSnapshot {
    pub snapshot: Option<Snapshot>,
    pub sampled_at: Option<DateTime<Utc>>,
    pub stale: bool,
}

impl MonitorSlots {
    pub fn new() -> Self {
        let mut map = HashMap::new();
        for kind in MonitorKind::ALL {
            map.insert(kind, Arc::new(Mutex::new(MonitorSlot::default())));
        }
        Self {
            slots: Arc::new(map),
            data_dir: None,
        }
    }

    /// Attach the CSV log directory so `query_range` can read logs back;
    /// in-memory-only slots (as in tests) leave this unset.
    pub fn with_data_dir(mut self, data_dir: std::path::PathBuf) -> Self {
        self.data_dir = Some(data_dir);
        self
    }

    /// `get_latest(name)` (§4.1's query contract): the named monitor's most
    /// recent snapshot with its timestamp and staleness flag.
    pub async fn get_latest(&self, kind: MonitorKind) -> LatestSnapshot {
        let guard = self.slot(kind).lock().await;
        LatestSnapshot {
            snapshot: guard.snapshot.clone(),
            sampled_at: guard.sampled_at,
            stale: guard.stale,
        }
    }

    /// `query_range(name, t0, t1)` (§4.1's query contract): reads the
    /// monitor's CSV log, returning every record (as raw fields) whose
    /// timestamp falls within `[t0, t1]`. Empty if no data directory is
    /// attached or the log doesn't exist yet.
    pub fn query_range(
        &self,
        kind: MonitorKind,
        t0: DateTime<Utc>,
        t1: DateTime<Utc>,
    ) -> std::io::Result<Vec<Vec<String>>> {
        let Some(data_dir) = &self.data_dir else {
            return Ok(Vec::new());
        };
        csvlog::query_range(data_dir, kind.name(), t0, t1)
    }

    fn slot(&self, kind: MonitorKind) -> Arc<Mutex<MonitorSlot>> {
        self.slots
            .get(&kind)
            .cloned()
            .expect("MonitorSlots::new populates every MonitorKind")
    }

    /// The latest *healthy* (non-degraded) snapshot for every monitor that
    /// has one, for assembling a report (§4.3 step 2).
    pub async fn healthy_snapshots(&self) -> HashMap<MonitorKind, Snapshot> {
        let mut out = HashMap::new();
        for kind in MonitorKind::ALL {
            let slot = self.slot(kind).lock().await;
            if let Some(snap) = &slot.snapshot {
                if !slot.degraded {
                    out.insert(kind, snap.clone());
                }
            }
        }
        out
    }

    /// The last snapshot of *every* monitor regardless of health, for
    /// `collect_diag` (§4.11) — a degraded or stale monitor's last reading
    /// is diagnostically useful, unlike in a normal report.
    pub async fn diag_snapshot(&self) -> serde_json::Value {
        let mut out = serde_json::Map::new();
        for kind in MonitorKind::ALL {
            let slot = self.slot(kind).lock().await;
            out.insert(
                kind.name().to_string(),
                serde_json::json!({
                    "snapshot": slot.snapshot,
                    "sampled_at": slot.sampled_at,
                    "stale": slot.stale,
                    "degraded": slot.degraded,
                }),
            );
        }
        serde_json::Value::Object(out)
    }
}

/// Spawn one task per non-system monitor onto an already-built `slots`
/// handle (the caller builds `slots` up front so it can also hand a clone
/// to the command executor's `collect_diag`, per §4.11). Returns the task
/// handles (for shutdown).
pub fn spawn_all(
    slots: &MonitorSlots,
    sensors: Vec<Box<dyn MonitorSensor>>,
    data_dir: std::path::PathBuf,
    shutdown: watch::Receiver<bool>,
    quiesce: Arc<QuiesceState>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::new();

    for sensor in sensors {
        let slot = slots.slot(sensor.kind());
        let data_dir = data_dir.clone();
        let mut shutdown = shutdown.clone();
        let quiesce = quiesce.clone();
        handles.push(tokio::spawn(async move {
            run_monitor(sensor, slot, data_dir, &mut shutdown, quiesce).await;
        }));
    }

    handles
}

async fn run_monitor(
    sensor: Box<dyn MonitorSensor>,
    slot: Arc<Mutex<MonitorSlot>>,
    data_dir: std::path::PathBuf,
    shutdown: &mut watch::Receiver<bool>,
    quiesce: Arc<QuiesceState>,
) {
    let kind = sensor.kind();
    let interval = Duration::from_secs(kind.interval_seconds());
    let timeout = interval.saturating_sub(Duration::from_secs(1)).max(Duration::from_millis(100));

    let mut log = match CsvLog::open(&data_dir, kind.name(), sensor.csv_header()) {
        Ok(log) => Some(log),
        Err(e) => {
            tracing::warn!(monitor = kind.name(), "failed to open CSV log: {}", e);
            None
        }
    };

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {},
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::debug!(monitor = kind.name(), "monitor shutting down");
                    return;
                }
                continue;
            }
        }

        if quiesce.is_quiesced().await {
            tracing::debug!(monitor = kind.name(), "skipping sample, agent is quiesced");
            continue;
        }

        let result = tokio::time::timeout(timeout, sensor.sample()).await;
        let mut guard = slot.lock().await;

        match result {
            Ok(Ok(snapshot)) => {
                if let Some(log) = &mut log {
                    let mut row = vec![Utc::now().to_rfc3339()];
                    row.extend(sensor.csv_row(&snapshot));
                    log.append(&row);
                }
                guard.snapshot = Some(snapshot);
                guard.sampled_at = Some(Utc::now());
                guard.stale = false;
                guard.consecutive_failures = 0;
                guard.degraded = false;
            }
            Ok(Err(e)) => {
                tracing::debug!(monitor = kind.name(), "sensor error: {}", e);
                if let Some(log) = &mut log {
                    log.append(&[Utc::now().to_rfc3339(), format!("error: {e}")]);
                }
            }
            Err(_) => {
                tracing::warn!(monitor = kind.name(), "sample timed out after {:?}", timeout);
                guard.stale = true;
                guard.consecutive_failures += 1;
                guard.degraded = guard.consecutive_failures >= DEGRADED_AFTER_FAILURES;
                if let Some(log) = &mut log {
                    log.append(&[Utc::now().to_rfc3339(), "timeout".to_string()]);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fleet_core::monitors::{SaasSnapshot, Snapshot};

    struct AlwaysOk;

    #[async_trait]
    impl MonitorSensor for AlwaysOk {
        fn kind(&self) -> MonitorKind {
            MonitorKind::Saas
        }
        async fn sample(&self) -> Result<Snapshot, crate::error::AgentError> {
            Ok(Snapshot::Saas(SaasSnapshot { endpoints: vec![] }))
        }
    }

    #[tokio::test]
    async fn healthy_snapshot_visible_after_one_tick() {
        let (_tx, rx) = watch::channel(false);
        let dir = tempfile::tempdir().unwrap();
        let slots = MonitorSlots::new();
        let _handles = spawn_all(
            &slots,
            vec![Box::new(AlwaysOk)],
            dir.path().to_path_buf(),
            rx,
            Arc::new(QuiesceState::new()),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        let snapshots = slots.healthy_snapshots().await;
        assert!(snapshots.contains_key(&MonitorKind::Saas));
    }

    #[tokio::test]
    async fn quiesced_monitor_does_not_sample() {
        let (_tx, rx) = watch::channel(false);
        let dir = tempfile::tempdir().unwrap();
        let quiesce = Arc::new(QuiesceState::new());
        *quiesce.until.write().await = Some(std::time::Instant::now() + Duration::from_secs(60));

        let slots = MonitorSlots::new();
        let _handles = spawn_all(&slots, vec![Box::new(AlwaysOk)], dir.path().to_path_buf(), rx, quiesce);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let snapshots = slots.healthy_snapshots().await;
        assert!(!snapshots.contains_key(&MonitorKind::Saas));
    }

    #[tokio::test]
    async fn csv_log_carries_the_sensor_specific_schema() {
        let (_tx, rx) = watch::channel(false);
        let dir = tempfile::tempdir().unwrap();
        let sensor = crate::sensors::SaasSensor { endpoints: vec![] };

        let slots = MonitorSlots::new();
        let _handles = spawn_all(
            &slots,
            vec![Box::new(sensor)],
            dir.path().to_path_buf(),
            rx,
            Arc::new(QuiesceState::new()),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        let contents = std::fs::read_to_string(dir.path().join("saas.csv")).unwrap();
        let mut lines = contents.lines();
        assert_eq!(
            lines.next().unwrap(),
            "timestamp,endpoints_total,endpoints_reachable,avg_latency_ms"
        );
        let row = lines.next().unwrap();
        assert_eq!(row.split(',').count(), 4);
    }

    #[tokio::test]
    async fn get_latest_reflects_last_sample() {
        let (_tx, rx) = watch::channel(false);
        let dir = tempfile::tempdir().unwrap();
        let slots = MonitorSlots::new();
        let _handles = spawn_all(
            &slots,
            vec![Box::new(AlwaysOk)],
            dir.path().to_path_buf(),
            rx,
            Arc::new(QuiesceState::new()),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        let latest = slots.get_latest(MonitorKind::Saas).await;
        assert!(latest.snapshot.is_some());
        assert!(!latest.stale);
    }

    #[tokio::test]
    async fn query_range_reads_back_through_slots() {
        let (_tx, rx) = watch::channel(false);
        let dir = tempfile::tempdir().unwrap();
        let slots = MonitorSlots::new().with_data_dir(dir.path().to_path_buf());
        let sensor = crate::sensors::SaasSensor { endpoints: vec![] };
        let _handles = spawn_all(&slots, vec![Box::new(sensor)], dir.path().to_path_buf(), rx, Arc::new(QuiesceState::new()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        let rows = slots
            .query_range(MonitorKind::Saas, Utc::now() - chrono::Duration::minutes(1), Utc::now() + chrono::Duration::minutes(1))
            .unwrap();
        assert_eq!(rows.len(), 1);
    }
}
