pub mod alerts;
pub mod auth;
pub mod background;
pub mod cert_manager;
pub mod config;
pub mod handlers;
pub mod models;
pub mod state;
pub mod store;
pub mod system_monitor;

use axum::extract::State;
use axum::http::HeaderValue;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use handlers::{auth_handlers, commands, dashboard, fleet, ingestion, server_resources, speedtest};
use state::AppState;

// ---------------------------------------------------------------------------
// Jaskier Shared Pattern -- request_id middleware
// ---------------------------------------------------------------------------

/// Middleware that assigns a UUID correlation ID to every request.
/// - Adds the ID to the current tracing span for structured logging.
/// - Returns it as `X-Request-Id` response header for client-side correlation.
pub async fn request_id_middleware(
    request: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let request_id = uuid::Uuid::new_v4().to_string();

    tracing::Span::current().record("request_id", &tracing::field::display(&request_id));
    tracing::debug!(request_id = %request_id, "assigned correlation ID");

    let mut response = next.run(request).await;

    if let Ok(val) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", val);
    }

    response
}

/// Build the application router with the given state.
/// Extracted from `main()` so integration tests can construct the app
/// without binding to a network port.
pub fn create_router(state: AppState) -> Router {
    // ── Per-endpoint rate limiting (§5) ──────────────────────────────
    // Jaskier Shared Pattern -- rate_limit (per-endpoint)
    //
    // /api/fleet/report: 2 per second per agent, burst 10 — one report every
    // few seconds is normal, a flood from one key is not.
    // /login: 1 per 2s, burst 5 — on top of the throttle's 5-in-15min lockout.
    // Everything else: 2 per second, burst 120.

    let ingest_governor = GovernorConfigBuilder::default()
        .per_second(2)
        .burst_size(10)
        .use_headers()
        .finish()
        .expect("ingest rate-limit config is valid");

    let login_governor = GovernorConfigBuilder::default()
        .per_second(2)
        .burst_size(5)
        .use_headers()
        .finish()
        .expect("login rate-limit config is valid");

    let default_governor = GovernorConfigBuilder::default()
        .per_second(2)
        .burst_size(120)
        .use_headers()
        .finish()
        .expect("default rate-limit config is valid");

    // ── Agent plane: API-key auth ─────────────────────────────────────
    let agent_routes = Router::new()
        .route("/api/fleet/report", post(ingestion::report))
        .layer(GovernorLayer::new(ingest_governor))
        .route(
            "/api/fleet/commands/{machine_id}",
            get(commands::list_for_machine).post(commands::enqueue),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_api_key));

    // ── Human plane: cookie-session auth ─────────────────────────────
    let session_routes = Router::new()
        .route("/api/fleet/machines", get(fleet::list_machines))
        .route("/api/fleet/machines/{machine_id}", get(fleet::get_machine))
        .route("/api/fleet/summary", get(fleet::summary))
        .route("/api/fleet/speedtest/recent20", get(speedtest::recent20))
        .route("/api/fleet/speedtest/summary", get(speedtest::summary))
        .route("/api/fleet/speedtest/comparison", get(speedtest::comparison))
        .route("/api/fleet/speedtest/anomalies", get(speedtest::anomalies))
        .route("/api/fleet/server-resources", get(server_resources::server_resources))
        .route("/dashboard", get(dashboard::dashboard))
        .route("/logout", post(auth_handlers::logout))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_session));

    // ── Public: login, index, metrics ─────────────────────────────────
    let login_routes = Router::new()
        .route("/login", post(auth_handlers::login))
        .layer(GovernorLayer::new(login_governor));

    let public_routes = Router::new()
        .route("/", get(dashboard::index))
        .route("/api/metrics", get(metrics_handler));

    public_routes
        .merge(login_routes)
        .merge(agent_routes)
        .merge(session_routes)
        .layer(GovernorLayer::new(default_governor))
        .with_state(state)
}

// ── Prometheus-compatible metrics endpoint (ambient, ungated) ──────────────

async fn metrics_handler(State(state): State<AppState>) -> String {
    let snapshot = state.system_monitor.read().await;
    let uptime = state.start_time.elapsed().as_secs();
    let total_machines = state.store.len().await;
    format!(
        "# HELP cpu_usage_percent CPU usage percentage\n\
         # TYPE cpu_usage_percent gauge\n\
         cpu_usage_percent {:.1}\n\
         # HELP memory_used_bytes Memory used in bytes\n\
         # TYPE memory_used_bytes gauge\n\
         memory_used_bytes {}\n\
         # HELP memory_total_bytes Total memory in bytes\n\
         # TYPE memory_total_bytes gauge\n\
         memory_total_bytes {}\n\
         # HELP uptime_seconds Server uptime in seconds\n\
         # TYPE uptime_seconds counter\n\
         uptime_seconds {}\n\
         # HELP fleet_machines_total Machines registered with the fleet\n\
         # TYPE fleet_machines_total gauge\n\
         fleet_machines_total {}\n",
        snapshot.cpu_usage_percent,
        (snapshot.memory_used_mb * 1024.0 * 1024.0) as u64,
        (snapshot.memory_total_mb * 1024.0 * 1024.0) as u64,
        uptime,
        total_machines,
    )
}
