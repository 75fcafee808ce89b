//! Operator-facing command endpoints (§4.9): enqueue a command for a machine
//! and accept the agent-side result path used by `ingestion.rs`'s step 7.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::handlers::ApiError;
use crate::state::AppState;
use crate::store::sqlite;
use fleet_core::CommandType;

#[derive(Debug, Deserialize)]
pub struct EnqueueCommandRequest {
    #[serde(rename = "type")]
    pub kind: CommandType,
    #[serde(default)]
    pub args: Value,
}

pub async fn enqueue(
    State(state): State<AppState>,
    Path(machine_id): Path<String>,
    Json(req): Json<EnqueueCommandRequest>,
) -> Result<Json<Value>, ApiError> {
    if state.store.get(&machine_id).await.is_none() {
        return Err(ApiError::NotFound(format!("unknown machine {machine_id}")));
    }
    let command_id = sqlite::enqueue_command(&state.db, &machine_id, req.kind, req.args).await?;
    Ok(Json(json!({ "command_id": command_id })))
}

pub async fn list_for_machine(
    State(state): State<AppState>,
    Path(machine_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let pending = sqlite::pending_commands(&state.db, &machine_id).await?;
    Ok(Json(json!({ "commands": pending })))
}
