//! Speedtest read endpoints (§4.6): recent samples, windowed summary,
//! per-machine vs fleet comparison, and z-score anomaly detection.

use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use crate::handlers::ApiError;
use crate::models::{
    SpeedtestAnomaliesResponse, SpeedtestAnomaly, SpeedtestComparisonEntry,
    SpeedtestComparisonResponse, SpeedtestPerMachine, SpeedtestRecent20Response,
    SpeedtestSummaryResponse,
};
use crate::state::AppState;
use crate::store::sqlite;

const RECENT_SAMPLE_LIMIT: i64 = 20;
const ANOMALY_WINDOW: i64 = 100;
const ANOMALY_Z_SCORE: f64 = 3.0;

#[derive(Debug, Deserialize)]
pub struct HoursQuery {
    #[serde(default = "default_hours")]
    pub hours: i64,
}

fn default_hours() -> i64 {
    24
}

#[derive(Debug, Deserialize)]
pub struct MachineQuery {
    pub machine_id: String,
}

pub async fn recent20(
    State(state): State<AppState>,
) -> Result<Json<SpeedtestRecent20Response>, ApiError> {
    let machine_ids = sqlite::distinct_machine_ids_with_speedtests(&state.db).await?;

    let mut per_machine = Vec::new();
    let mut fleet_download_sum = 0.0;
    let mut fleet_upload_sum = 0.0;
    let mut fleet_count = 0usize;

    for machine_id in machine_ids {
        let rows = sqlite::recent_speedtests(&state.db, &machine_id, RECENT_SAMPLE_LIMIT).await?;
        if rows.is_empty() {
            continue;
        }
        let n = rows.len() as f64;
        let avg_download = rows.iter().map(|r| r.download).sum::<f64>() / n;
        let avg_upload = rows.iter().map(|r| r.upload).sum::<f64>() / n;
        let avg_ping = rows.iter().map(|r| r.ping).sum::<f64>() / n;

        fleet_download_sum += avg_download;
        fleet_upload_sum += avg_upload;
        fleet_count += 1;

        per_machine.push(SpeedtestPerMachine {
            machine_id,
            avg_download_mbps: avg_download,
            avg_upload_mbps: avg_upload,
            avg_ping_ms: avg_ping,
            sample_count: rows.len(),
        });
    }

    let divisor = fleet_count.max(1) as f64;
    Ok(Json(SpeedtestRecent20Response {
        per_machine,
        fleet_avg_download_mbps: fleet_download_sum / divisor,
        fleet_avg_upload_mbps: fleet_upload_sum / divisor,
    }))
}

pub async fn summary(
    State(state): State<AppState>,
    Query(query): Query<HoursQuery>,
) -> Result<Json<SpeedtestSummaryResponse>, ApiError> {
    let since = Utc::now() - chrono::Duration::hours(query.hours);
    let rows = sqlite::speedtests_since(&state.db, since).await?;

    let n = rows.len().max(1) as f64;
    let avg_download = rows.iter().map(|r| r.download).sum::<f64>() / n;
    let avg_upload = rows.iter().map(|r| r.upload).sum::<f64>() / n;
    let avg_ping = rows.iter().map(|r| r.ping).sum::<f64>() / n;

    Ok(Json(SpeedtestSummaryResponse {
        hours: query.hours,
        sample_count: rows.len(),
        avg_download_mbps: avg_download,
        avg_upload_mbps: avg_upload,
        avg_ping_ms: avg_ping,
    }))
}

pub async fn comparison(
    State(state): State<AppState>,
    Query(query): Query<HoursQuery>,
) -> Result<Json<SpeedtestComparisonResponse>, ApiError> {
    let since = Utc::now() - chrono::Duration::hours(query.hours);
    let rows = sqlite::speedtests_since(&state.db, since).await?;

    let fleet_n = rows.len().max(1) as f64;
    let fleet_mean = rows.iter().map(|r| r.download).sum::<f64>() / fleet_n;

    let mut by_machine: HashMap<String, Vec<f64>> = HashMap::new();
    for r in &rows {
        by_machine.entry(r.machine_id.clone()).or_default().push(r.download);
    }

    let mut machines: Vec<SpeedtestComparisonEntry> = by_machine
        .into_iter()
        .map(|(machine_id, downloads)| {
            let n = downloads.len().max(1) as f64;
            let machine_mean = downloads.iter().sum::<f64>() / n;
            let delta_pct = if fleet_mean.abs() > f64::EPSILON {
                ((machine_mean - fleet_mean) / fleet_mean) * 100.0
            } else {
                0.0
            };
            SpeedtestComparisonEntry {
                machine_id,
                machine_mean_download_mbps: machine_mean,
                fleet_mean_download_mbps: fleet_mean,
                delta_pct,
            }
        })
        .collect();
    machines.sort_by(|a, b| a.machine_id.cmp(&b.machine_id));

    Ok(Json(SpeedtestComparisonResponse {
        hours: query.hours,
        machines,
    }))
}

/// Flags samples whose download speed is more than 3 standard deviations
/// from that machine's own mean over its last 100 samples (§4.9).
pub async fn anomalies(
    State(state): State<AppState>,
    Query(query): Query<MachineQuery>,
) -> Result<Json<SpeedtestAnomaliesResponse>, ApiError> {
    let rows = sqlite::recent_speedtests(&state.db, &query.machine_id, ANOMALY_WINDOW).await?;

    if rows.len() < 2 {
        return Ok(Json(SpeedtestAnomaliesResponse {
            machine_id: query.machine_id,
            anomalies: Vec::new(),
        }));
    }

    let n = rows.len() as f64;
    let mean = rows.iter().map(|r| r.download).sum::<f64>() / n;
    let variance = rows.iter().map(|r| (r.download - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();

    let anomalies = if stddev > f64::EPSILON {
        rows.iter()
            .filter_map(|r| {
                let z = (r.download - mean) / stddev;
                if z.abs() > ANOMALY_Z_SCORE {
                    Some(SpeedtestAnomaly {
                        timestamp: r.timestamp,
                        download_mbps: r.download,
                        z_score: z,
                    })
                } else {
                    None
                }
            })
            .collect()
    } else {
        Vec::new()
    };

    Ok(Json(SpeedtestAnomaliesResponse {
        machine_id: query.machine_id,
        anomalies,
    }))
}
