//! Human-plane login/logout (§4.5). Password verification, per-IP throttle,
//! transparent re-hash on a stale work factor, and session issuance.

use std::net::IpAddr;

use axum::extract::{ConnectInfo, State};
use axum::http::header::SET_COOKIE;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::auth::password::{hash_password, verify_password};
use crate::auth::session::{clear_cookie_header, extract_cookie_token, generate_token, set_cookie_header};
use crate::handlers::ApiError;
use crate::state::AppState;
use crate::store::sqlite;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    Json(req): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let ip: IpAddr = addr.ip();
    let now = Utc::now();

    if state.login_throttle.is_locked_out(ip, now).await {
        return Err(ApiError::RateLimited(
            "too many failed login attempts, try again later".into(),
        ));
    }

    let user = sqlite::get_user(&state.db, &req.username).await?;

    let authenticated = match &user {
        Some(row) => verify_password(&req.password, &row.password_hash),
        // Run a verification anyway against a dummy hash so the response
        // time for an unknown username matches a known one (§7: never leak
        // which of user/password was wrong).
        None => {
            let _ = verify_password(&req.password, DUMMY_PHC_HASH);
            false
        }
    };

    if !authenticated {
        state.login_throttle.record_failure(ip, now).await;
        return Err(ApiError::Unauthorized("invalid credentials".into()));
    }

    state.login_throttle.record_success(ip).await;

    // Transparent re-hash: if the stored hash was produced under a weaker
    // Argon2 profile than today's default, upgrade it now that we have the
    // plaintext in hand.
    if let Some(row) = &user {
        if needs_rehash(&row.password_hash) {
            if let Ok((new_hash, _salt)) = hash_password(&req.password) {
                if let Err(e) = sqlite::update_password_hash(&state.db, &req.username, &new_hash).await {
                    tracing::warn!("password re-hash write failed: {}", e);
                }
            }
        }
    }

    sqlite::touch_last_login(&state.db, &req.username).await?;

    let token = generate_token();
    let expires_at =
        sqlite::create_session(&state.db, &token, &req.username, state.config.server.session_ttl_seconds)
            .await?;

    let secure = state.cert_manager.read().await.is_some();
    let cookie = set_cookie_header(&token, state.config.server.session_ttl_seconds, secure);

    let mut response = Json(json!({ "ok": true, "expires_at": expires_at })).into_response();
    response.headers_mut().insert(SET_COOKIE, cookie);
    Ok(response)
}

pub async fn logout(
    State(state): State<AppState>,
    request: axum::extract::Request,
) -> Result<Response, ApiError> {
    if let Some(token) = extract_cookie_token(&request) {
        sqlite::delete_session(&state.db, &token).await?;
    }
    let secure = state.cert_manager.read().await.is_some();
    let mut response = Json(json!({ "ok": true })).into_response();
    response.headers_mut().insert(SET_COOKIE, clear_cookie_header(secure));
    Ok(response)
}

/// A PHC string for a password nobody can type, used to keep the verify-path
/// timing constant when the username doesn't exist.
const DUMMY_PHC_HASH: &str =
    "$argon2id$v=19$m=19456,t=2,p=1$c29tZXNhbHRzb21lc2FsdA$Y29uc3RhbnR0aW1lY29uc3RhbnR0aW1l";

fn needs_rehash(phc_hash: &str) -> bool {
    !phc_hash.contains("m=19456")
}
