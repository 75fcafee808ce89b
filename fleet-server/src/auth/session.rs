//! Cookie-session auth for the human plane (§4.5). A session token is a
//! 256-bit random value, issued on successful login and validated on every
//! session-gated route.

use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL;
use base64::Engine;
use chrono::Utc;
use rand::RngCore;

use crate::state::AppState;
use crate::store::sqlite;

pub const COOKIE_NAME: &str = "fleet_session";

/// 256-bit random token, URL-safe base64 encoded.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    BASE64_URL.encode(bytes)
}

/// `Set-Cookie` header value for a freshly issued session, per §4.5's
/// required attributes.
pub fn set_cookie_header(token: &str, ttl_seconds: i64, secure: bool) -> HeaderValue {
    let secure_attr = if secure { " Secure;" } else { "" };
    let value = format!(
        "{}={}; HttpOnly;{} SameSite=Strict; Path=/; Max-Age={}",
        COOKIE_NAME, token, secure_attr, ttl_seconds
    );
    HeaderValue::from_str(&value).expect("cookie value is valid header content")
}

/// `Set-Cookie` header value clearing the session cookie on logout.
pub fn clear_cookie_header(secure: bool) -> HeaderValue {
    let secure_attr = if secure { " Secure;" } else { "" };
    let value = format!(
        "{}=; HttpOnly;{} SameSite=Strict; Path=/; Max-Age=0",
        COOKIE_NAME, secure_attr
    );
    HeaderValue::from_str(&value).expect("cookie value is valid header content")
}

pub fn extract_cookie_token(request: &Request) -> Option<String> {
    let header = request.headers().get(axum::http::header::COOKIE)?;
    let raw = header.to_str().ok()?;
    raw.split(';').find_map(|part| {
        let part = part.trim();
        part.strip_prefix(&format!("{}=", COOKIE_NAME))
            .map(|v| v.to_string())
    })
}

/// Middleware guarding session-plane routes (`/api/fleet/machines`,
/// `/api/fleet/summary`, the speedtest endpoints, `/dashboard`). Expired or
/// unknown tokens both return 401, never distinguishing the two.
pub async fn require_session(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = extract_cookie_token(&request).ok_or(StatusCode::UNAUTHORIZED)?;

    let session = sqlite::get_session(&state.db, &token)
        .await
        .map_err(|e| {
            tracing::error!("session lookup failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if session.expires_at < Utc::now() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_carries_required_attributes() {
        let header = set_cookie_header("tok123", 28_800, true);
        let value = header.to_str().unwrap();
        assert!(value.contains("HttpOnly"));
        assert!(value.contains("Secure"));
        assert!(value.contains("SameSite=Strict"));
        assert!(value.contains("Path=/"));
        assert!(value.contains("Max-Age=28800"));
    }

    #[test]
    fn generated_tokens_are_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert!(a.len() >= 32);
    }
}
