//! API-key validation for the agent plane (§4.5). Constant-time comparison
//! — a naive `==` on the raw header value would leak timing proportional to
//! the matching prefix length.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use subtle::ConstantTimeEq;

use crate::state::AppState;

/// Middleware guarding every `/api/fleet/*` write endpoint. Absent or
/// mismatched `X-API-Key` both return 401 — never distinguish the two in
/// the response (§7 `auth_failed`).
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let provided = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok());

    match provided {
        Some(key) if keys_match(key.as_bytes(), state.config.server.api_key.as_bytes()) => {
            Ok(next.run(request).await)
        }
        _ => {
            tracing::warn!("agent auth failed: missing or invalid X-API-Key");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

fn keys_match(provided: &[u8], expected: &[u8]) -> bool {
    if provided.len() != expected.len() {
        return false;
    }
    provided.ct_eq(expected).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_keys_compare_equal() {
        assert!(keys_match(b"secret-key", b"secret-key"));
    }

    #[test]
    fn mismatched_length_rejected() {
        assert!(!keys_match(b"short", b"a-much-longer-secret"));
    }

    #[test]
    fn mismatched_content_rejected() {
        assert!(!keys_match(b"secret-key", b"secret-kex"));
    }
}
