use std::path::PathBuf;

use axum::http::{header, HeaderValue};
use clap::Parser;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use fleet_server::cert_manager::CertManager;
use fleet_server::config::ServerConfig;
use fleet_server::state::AppState;
use fleet_server::{background, store, system_monitor};

/// ATLAS fleet server: ingests agent reports, serves the fleet API, and
/// hosts the operator dashboard (§6).
#[derive(Parser, Debug)]
#[command(name = "fleet-server", version)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = "fleet-server.yaml")]
    config: PathBuf,
}

/// Exit codes per §6: 0 clean shutdown, 1 config error, 2 bind error,
/// 3 TLS error.
#[tokio::main]
async fn main() -> std::process::ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    let config = match ServerConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("config error: {}", e);
            return std::process::ExitCode::from(1);
        }
    };

    let db = match store::sqlite::connect(&config.resolved_database_path()).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("database path is unreachable or invalid: {}", e);
            return std::process::ExitCode::from(1);
        }
    };

    let state = AppState::new(db, config).await;

    system_monitor::spawn(state.system_monitor.clone());
    let _background = background::spawn_all(state.clone());

    let cert_manager = match CertManager::load(
        state.config.resolved_cert_file().as_deref(),
        state.config.resolved_key_file().as_deref(),
    )
    .await
    {
        Ok(manager) => manager,
        Err(e) => {
            tracing::error!("TLS cert/key error: {}", e);
            return std::process::ExitCode::from(3);
        }
    };

    if let Some(manager) = &cert_manager {
        manager.watch();
    } else {
        tracing::warn!("no TLS cert/key configured — serving plain HTTP (§6 fallback)");
    }
    *state.cert_manager.write().await = cert_manager;

    let cors = build_cors_layer(&state.config.cors.allowed_origins);

    // Security headers (§4.5): a fixed, non-configurable baseline applied
    // to every response regardless of route.
    let nosniff: SetResponseHeaderLayer<HeaderValue> = SetResponseHeaderLayer::overriding(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    let frame_deny: SetResponseHeaderLayer<HeaderValue> = SetResponseHeaderLayer::overriding(
        header::X_FRAME_OPTIONS,
        HeaderValue::from_static("DENY"),
    );
    let referrer: SetResponseHeaderLayer<HeaderValue> = SetResponseHeaderLayer::overriding(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    let csp: SetResponseHeaderLayer<HeaderValue> = SetResponseHeaderLayer::overriding(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'self'"),
    );
    let hsts: SetResponseHeaderLayer<HeaderValue> = SetResponseHeaderLayer::overriding(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=63072000; includeSubDomains"),
    );

    let app = fleet_server::create_router(state.clone())
        .layer(axum::middleware::from_fn(fleet_server::request_id_middleware))
        .layer(RequestBodyLimitLayer::new(10 * 1024 * 1024))
        .layer(cors)
        .layer(nosniff)
        .layer(frame_deny)
        .layer(referrer)
        .layer(csp)
        .layer(hsts)
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = tracing::field::Empty,
                )
            }),
        )
        .layer(CompressionLayer::new())
        .into_make_service_with_connect_info::<std::net::SocketAddr>();

    let addr = match format!("{}:{}", state.config.server.host, state.config.server.port).parse() {
        Ok(a) => a,
        Err(e) => {
            tracing::error!("invalid bind address: {}", e);
            return std::process::ExitCode::from(2);
        }
    };

    let tls_config = state.cert_manager.read().await.as_ref().map(|m| m.config.clone());
    let handle = axum_server::Handle::new();

    let result = if let Some(tls_config) = tls_config {
        tracing::info!("fleet-server listening on https://{}", addr);
        tokio::select! {
            biased;
            out = axum_server::bind_rustls(addr, tls_config).handle(handle.clone()).serve(app) => out,
            () = shutdown_signal() => {
                handle.graceful_shutdown(Some(std::time::Duration::from_secs(30)));
                Ok(())
            }
        }
    } else {
        tracing::info!("fleet-server listening on http://{}", addr);
        tokio::select! {
            biased;
            out = axum_server::bind(addr).handle(handle.clone()).serve(app) => out,
            () = shutdown_signal() => {
                handle.graceful_shutdown(Some(std::time::Duration::from_secs(30)));
                Ok(())
            }
        }
    };

    if let Err(e) = result {
        tracing::error!("server error: {}", e);
        return std::process::ExitCode::from(2);
    }

    std::process::ExitCode::from(0)
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    tracing::info!("shutdown signal received, starting graceful shutdown");
}

/// An empty allow-list means no cross-origin access (§4.5) — `CorsLayer`
/// defaults to permitting none, not all, so that's a silent no-op here too.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(std::time::Duration::from_secs(86_400))
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    if std::env::var("RUST_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt().with_env_filter(env_filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
}
