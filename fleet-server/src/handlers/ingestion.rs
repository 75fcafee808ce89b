//! The ingestion handler (§4.6 `POST /api/fleet/report`) — the core of the
//! whole pipeline. Steps follow the spec's numbered contract exactly so the
//! handler body can be read straight against it.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use fleet_core::{Command, Envelope, PendingCommand, Report};
use serde_json::json;

use crate::handlers::ApiError;
use crate::state::AppState;
use crate::store::sqlite;

const MAX_PENDING_PER_MACHINE: usize = 8;

pub async fn report(
    State(state): State<AppState>,
    Json(envelope): Json<Envelope>,
) -> Result<Json<serde_json::Value>, ApiError> {
    // Step 2: parse envelope, decrypt if declared encrypted.
    let body_bytes = open_envelope(&state, &envelope)?;

    let report: Report = serde_json::from_slice(&body_bytes)
        .map_err(|e| ApiError::BadRequest(format!("malformed report body: {}", e)))?;

    // Step 3: validate required fields.
    if report.machine_id.is_empty() {
        return Err(ApiError::BadRequest("machine_id is required".into()));
    }
    if report.machine_id != envelope.machine_id {
        return Err(ApiError::BadRequest(
            "machine_id mismatch between envelope and report body".into(),
        ));
    }

    // §5 backpressure: reject with 429 once 8 reports for this machine are
    // already in flight.
    let _guard = acquire_ingest_slot(&state, &report.machine_id).await?;

    let now = Utc::now();

    // Step 4/5: register if unknown, advance last_seen, append history,
    // write through to SQLite. Scoped to the per-machine mutex so
    // concurrent reports for the same machine serialize (§5 ordering rule)
    // while distinct machines proceed fully in parallel.
    let (entry, _is_new) = state.store.get_or_register(&report.machine_id, now).await;
    {
        let mut guard = entry.lock().await;

        // Invariant: last_seen is monotonically non-decreasing.
        let advanced = report.timestamp.max(now).max(guard.last_seen);
        guard.last_seen = advanced;

        if let Some(info) = &report.machine_info {
            guard.info = Some(info.clone());
        }
        guard.latest_metrics = Some(report.metrics.clone());
        guard.latest_monitors = report.monitors.clone();

        guard.push_history(
            crate::store::HistorySample {
                timestamp: report.timestamp,
                metrics: report.metrics.clone(),
            },
            state.store.history_size,
        );

        if let Some(speedtest) = &report.speedtest {
            guard.latest_speedtest = Some(speedtest.clone());
        }

        drop(guard);
    }

    // SQLite write-through: failure is logged but does not fail the request.
    if let Some(info) = &report.machine_info {
        if let Err(e) = sqlite::upsert_machine(&state.db, info).await {
            tracing::error!(machine_id = %report.machine_id, "write-through to machines failed: {}", e);
        }
    } else if let Err(e) = sqlite::insert_machine_if_absent(&state.db, &report.machine_id, now).await
    {
        tracing::error!(machine_id = %report.machine_id, "machine registration write failed: {}", e);
    }
    if let Err(e) = sqlite::touch_last_seen(&state.db, &report.machine_id, now).await {
        tracing::error!(machine_id = %report.machine_id, "last_seen write failed: {}", e);
    }

    let payload = serde_json::to_value(&report.metrics).unwrap_or(serde_json::Value::Null);
    if let Err(e) =
        sqlite::insert_metrics_history(&state.db, &report.machine_id, report.timestamp, &payload)
            .await
    {
        tracing::error!(machine_id = %report.machine_id, "metrics_history insert failed: {}", e);
    }

    // Step 6: speedtest result.
    if let Some(speedtest) = &report.speedtest {
        if let Err(e) = sqlite::insert_speedtest(&state.db, speedtest).await {
            tracing::error!(machine_id = %report.machine_id, "speedtest insert failed: {}", e);
        }
    }

    // Step 7: command results — idempotent completion.
    for result in &report.command_results {
        if let Err(e) = sqlite::complete_command(&state.db, result).await {
            tracing::error!(
                machine_id = %report.machine_id,
                command_id = %result.command_id,
                "command completion failed: {}", e
            );
        }
    }

    // Step 8: pending commands for this machine, marked delivered atomically.
    let pending: Vec<Command> = sqlite::pending_commands(&state.db, &report.machine_id).await?;
    let ids: Vec<_> = pending.iter().map(|c| c.command_id).collect();
    if !ids.is_empty() {
        sqlite::mark_delivered(&state.db, &ids, now).await?;
    }
    let commands: Vec<PendingCommand> = pending.iter().map(PendingCommand::from).collect();

    // Step 9.
    Ok(Json(json!({ "ok": true, "commands": commands })))
}

/// Step 2, split out: reject encrypted=true with no server key, accept or
/// warn on a plaintext report depending on `strict_encryption` (§3
/// invariants, §8 property 3).
fn open_envelope(state: &AppState, envelope: &Envelope) -> Result<Vec<u8>, ApiError> {
    match (envelope.encrypted, state.encryption_key) {
        (true, Some(key)) => fleet_core::envelope::open(envelope, &key)
            .map_err(|_| ApiError::BadRequest("decrypt_failed".into())),
        (true, None) => Err(ApiError::BadRequest(
            "report declares encrypted=true but server has no encryption key configured".into(),
        )),
        (false, Some(_)) if state.config.server.strict_encryption => Err(ApiError::BadRequest(
            "ingest_rejected: server requires encrypted reports (strict_encryption)".into(),
        )),
        (false, Some(_)) => {
            tracing::warn!(
                machine_id = %envelope.machine_id,
                "accepting plaintext report despite server encryption key being configured"
            );
            Ok(envelope.ciphertext.clone().into_bytes())
        }
        (false, None) => Ok(envelope.ciphertext.clone().into_bytes()),
    }
}

struct IngestSlotGuard {
    state: AppState,
    machine_id: String,
}

impl Drop for IngestSlotGuard {
    fn drop(&mut self) {
        let state = self.state.clone();
        let machine_id = self.machine_id.clone();
        tokio::spawn(async move {
            state.ingest_queues.lock().await.decrement(&machine_id);
        });
    }
}

async fn acquire_ingest_slot(
    state: &AppState,
    machine_id: &str,
) -> Result<IngestSlotGuard, ApiError> {
    let mut queues = state.ingest_queues.lock().await;
    if queues.depth_for(machine_id) >= MAX_PENDING_PER_MACHINE {
        return Err(ApiError::RateLimited(
            "too many reports in flight for this machine".into(),
        ));
    }
    queues.increment(machine_id);
    drop(queues);
    Ok(IngestSlotGuard {
        state: state.clone(),
        machine_id: machine_id.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use fleet_core::{CpuMetrics, DiskMetrics, MemoryMetrics, MetricReport, NetworkMetrics, ProcessesMetrics};
    use tower::ServiceExt;

    fn sample_metrics(cpu: f32) -> MetricReport {
        MetricReport {
            uptime_seconds: 10,
            cpu: CpuMetrics {
                percent: cpu,
                per_core: vec![],
                load_avg: [0.0, 0.0, 0.0],
                count: 1,
                threads: 1,
            },
            memory: MemoryMetrics {
                total: 100,
                available: 50,
                used: 50,
                percent: 30.0,
                swap_total: 0,
                swap_used: 0,
                swap_percent: 0.0,
            },
            disk: DiskMetrics {
                total: 100,
                used: 25,
                free: 75,
                percent: 25.0,
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

    async fn test_state() -> AppState {
        let db = sqlite::connect_in_memory().await.unwrap();
        let mut config = ServerConfig::default();
        config.server.api_key = "test-key".into();
        AppState::new(db, config).await
    }

    #[tokio::test]
    async fn fresh_agent_registers_and_reports_online() {
        let state = test_state().await;
        let router = crate::create_router(state.clone());

        let report = Report {
            machine_id: "mac-01".into(),
            timestamp: Utc::now(),
            machine_info: None,
            metrics: sample_metrics(5.0),
            monitors: Default::default(),
            speedtest: None,
            command_results: vec![],
        };
        let envelope = fleet_core::envelope::wrap_plaintext(
            &serde_json::to_vec(&report).unwrap(),
            "mac-01",
        );

        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/api/fleet/report")
            .header("content-type", "application/json")
            .header("x-api-key", "test-key")
            .body(axum::body::Body::from(serde_json::to_vec(&envelope).unwrap()))
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);

        let (_, is_new) = state.store.get_or_register("mac-01", Utc::now()).await;
        assert!(!is_new);
    }

    #[tokio::test]
    async fn empty_machine_id_is_rejected() {
        let state = test_state().await;
        let router = crate::create_router(state);

        let report = Report {
            machine_id: "".into(),
            timestamp: Utc::now(),
            machine_info: None,
            metrics: sample_metrics(1.0),
            monitors: Default::default(),
            speedtest: None,
            command_results: vec![],
        };
        let envelope = fleet_core::envelope::wrap_plaintext(&serde_json::to_vec(&report).unwrap(), "");

        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/api/fleet/report")
            .header("content-type", "application/json")
            .header("x-api-key", "test-key")
            .body(axum::body::Body::from(serde_json::to_vec(&envelope).unwrap()))
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
    }
}
