//! `/api/fleet/server-resources` (§4.7): the server's own vitals plus TLS
//! cert expiry, for the dashboard's "is the server itself healthy" tile.

use axum::extract::State;
use axum::Json;

use crate::handlers::ApiError;
use crate::models::ServerResourcesResponse;
use crate::state::AppState;

pub async fn server_resources(
    State(state): State<AppState>,
) -> Result<Json<ServerResourcesResponse>, ApiError> {
    let snapshot = state.system_monitor.read().await.clone();
    let cert_manager = state.cert_manager.read().await;
    let tls_enabled = cert_manager.is_some();
    let expires_in_days = cert_manager.as_ref().and_then(|c| c.expires_in_days());
    let total_machines = state.store.len().await;

    Ok(Json(ServerResourcesResponse {
        cpu_usage_percent: snapshot.cpu_usage_percent,
        memory_used_mb: snapshot.memory_used_mb,
        memory_total_mb: snapshot.memory_total_mb,
        uptime_seconds: state.start_time.elapsed().as_secs(),
        tls_enabled,
        expires_in_days,
        total_machines,
    }))
}
