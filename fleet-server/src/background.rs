//! Background workers (§5): nightly `metrics_history` pruning, daily
//! cert-expiry check, session GC every 10 minutes. Adapted from the host
//! crate's watchdog loop shape (sleep-then-check, `tracing` at `info`/`warn`/
//! `error`), generalized from a single combined loop into three independent
//! tickers since the spec gives each its own cadence.

use std::time::Duration;

use chrono::Utc;

use crate::state::AppState;

const PRUNE_INTERVAL: Duration = Duration::from_secs(86_400);
const CERT_CHECK_INTERVAL: Duration = Duration::from_secs(86_400);
const SESSION_GC_INTERVAL: Duration = Duration::from_secs(600);

pub fn spawn_all(state: AppState) -> Vec<tokio::task::JoinHandle<()>> {
    vec![
        spawn_prune(state.clone()),
        spawn_cert_check(state.clone()),
        spawn_session_gc(state),
    ]
}

fn spawn_prune(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(PRUNE_INTERVAL).await;
            let retention_days = state.config.server.history_retention_days;
            match crate::store::sqlite::prune_metrics_history(&state.db, Utc::now(), retention_days)
                .await
            {
                Ok(n) => tracing::info!("background: pruned {} rows past {}d retention", n, retention_days),
                Err(e) => tracing::error!("background: metrics_history prune failed: {}", e),
            }
        }
    })
}

fn spawn_cert_check(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(CERT_CHECK_INTERVAL).await;
            let guard = state.cert_manager.read().await;
            if let Some(manager) = guard.as_ref() {
                if let Some(days) = manager.expires_in_days() {
                    if days <= 30 {
                        tracing::warn!("background: TLS certificate expires in {} days", days);
                    } else {
                        tracing::debug!("background: TLS certificate expires in {} days", days);
                    }
                }
            }
        }
    })
}

fn spawn_session_gc(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(SESSION_GC_INTERVAL).await;
            match crate::store::sqlite::gc_expired_sessions(&state.db, Utc::now()).await {
                Ok(n) if n > 0 => tracing::info!("background: purged {} expired sessions", n),
                Ok(_) => tracing::debug!("background: session GC found nothing to purge"),
                Err(e) => tracing::error!("background: session GC failed: {}", e),
            }
        }
    })
}
