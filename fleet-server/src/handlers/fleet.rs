//! Fleet-level read endpoints (§4.4, §4.6): machine list, single machine
//! detail, and the aggregate summary the dashboard polls.

use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

use crate::alerts::derive_alerts;
use crate::handlers::ApiError;
use crate::models::{FleetSummaryResponse, MachineSummaryResponse, MachinesListResponse};
use crate::state::AppState;

pub async fn list_machines(
    State(state): State<AppState>,
) -> Result<Json<MachinesListResponse>, ApiError> {
    let now = Utc::now();
    let summaries = state.store.summaries(now).await;
    let machines = summaries
        .into_iter()
        .map(|s| MachineSummaryResponse {
            machine_id: s.machine_id,
            status: s.status,
            last_seen: s.last_seen,
            cpu_percent: s.cpu_percent,
            memory_percent: s.memory_percent,
            disk_percent: s.disk_percent,
        })
        .collect();
    Ok(Json(MachinesListResponse { machines }))
}

pub async fn get_machine(
    State(state): State<AppState>,
    Path(machine_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let entry = state
        .store
        .get(&machine_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("unknown machine {machine_id}")))?;
    let guard = entry.lock().await;
    let now = Utc::now();
    let status = fleet_core::MachineStatus::derive(guard.last_seen, now, guard.interval_seconds);
    Ok(Json(json!({
        "machine_id": machine_id,
        "status": status,
        "info": guard.info,
        "last_seen": guard.last_seen,
        "first_seen": guard.first_seen,
        "latest_metrics": guard.latest_metrics,
        "latest_monitors": guard.latest_monitors,
        "latest_speedtest": guard.latest_speedtest,
    })))
}

pub async fn summary(
    State(state): State<AppState>,
) -> Result<Json<FleetSummaryResponse>, ApiError> {
    let now = Utc::now();
    let summaries = state.store.summaries(now).await;

    let total_machines = summaries.len();
    let mut online = 0usize;
    let mut warning = 0usize;
    let mut offline = 0usize;
    let mut cpu_sum = 0.0;
    let mut memory_sum = 0.0;
    let mut disk_sum = 0.0;
    let mut sample_count = 0usize;
    let mut alerts = Vec::new();

    for s in &summaries {
        match s.status {
            fleet_core::MachineStatus::Online => online += 1,
            fleet_core::MachineStatus::Warning => warning += 1,
            fleet_core::MachineStatus::Offline => offline += 1,
        }
        if let (Some(cpu), Some(mem), Some(disk)) =
            (s.cpu_percent, s.memory_percent, s.disk_percent)
        {
            cpu_sum += cpu as f64;
            memory_sum += mem as f64;
            disk_sum += disk as f64;
            sample_count += 1;
        }

        let entry = state.store.get(&s.machine_id).await;
        let (metrics, monitors) = match &entry {
            Some(e) => {
                let guard = e.lock().await;
                (guard.latest_metrics.clone(), Some(guard.latest_monitors.clone()))
            }
            None => (None, None),
        };
        alerts.extend(derive_alerts(
            &s.machine_id,
            s.status,
            metrics.as_ref(),
            monitors.as_ref(),
            &state.config.alerts,
            now,
        ));
    }

    let divisor = sample_count.max(1) as f64;
    Ok(Json(FleetSummaryResponse {
        total_machines,
        online,
        warning,
        offline,
        avg_cpu: cpu_sum / divisor,
        avg_memory: memory_sum / divisor,
        avg_disk: disk_sum / divisor,
        alerts,
    }))
}
