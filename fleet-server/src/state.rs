//! Application state — central composition root (§9 Design Notes:
//! "singleton monitors → composition root"). Everything long-lived is built
//! once in `AppState::new` and handed down explicitly; nothing here is a
//! process-global.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use fleet_core::envelope;
use sqlx::SqlitePool;
use tokio::sync::{Mutex, RwLock};

use crate::auth::LoginThrottle;
use crate::cert_manager::CertManager;
use crate::config::ServerConfig;
use crate::store::Store;
use crate::system_monitor::SystemSnapshot;

/// Per-machine in-flight ingestion counter, for the backpressure rule in §5:
/// more than 8 pending reports for one machine gets 429.
#[derive(Default)]
pub struct IngestQueues {
    depth: HashMap<String, usize>,
}

impl IngestQueues {
    pub fn depth_for(&self, machine_id: &str) -> usize {
        self.depth.get(machine_id).copied().unwrap_or(0)
    }

    pub fn increment(&mut self, machine_id: &str) {
        *self.depth.entry(machine_id.to_string()).or_insert(0) += 1;
    }

    pub fn decrement(&mut self, machine_id: &str) {
        if let Some(n) = self.depth.get_mut(machine_id) {
            *n = n.saturating_sub(1);
            if *n == 0 {
                self.depth.remove(machine_id);
            }
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<ServerConfig>,
    pub store: Arc<Store>,
    pub encryption_key: Option<[u8; envelope::KEY_LEN]>,
    pub login_throttle: Arc<LoginThrottle>,
    pub cert_manager: Arc<RwLock<Option<CertManager>>>,
    pub system_monitor: Arc<RwLock<SystemSnapshot>>,
    pub ingest_queues: Arc<Mutex<IngestQueues>>,
    pub start_time: Instant,
}

impl AppState {
    pub async fn new(db: SqlitePool, config: ServerConfig) -> Self {
        let encryption_key = config
            .server
            .encryption_key
            .as_deref()
            .and_then(|k| envelope::decode_key(k).ok());

        if encryption_key.is_some() {
            tracing::info!("fleet-server: end-to-end encryption key configured");
        } else {
            tracing::info!("fleet-server: no encryption key configured — plaintext reports accepted");
        }

        let user_count = crate::store::sqlite::count_users(&db).await.unwrap_or(0);
        tracing::info!(
            "fleet-server: starting — bound host {}, port {}, {} users",
            config.server.host,
            config.server.port,
            user_count
        );

        let store = Arc::new(Store::new(
            config.server.history_size,
            config.server.default_agent_interval_seconds,
        ));

        Self {
            db,
            store,
            encryption_key,
            login_throttle: Arc::new(LoginThrottle::new()),
            cert_manager: Arc::new(RwLock::new(None)),
            system_monitor: Arc::new(RwLock::new(SystemSnapshot::default())),
            ingest_queues: Arc::new(Mutex::new(IngestQueues::default())),
            start_time: Instant::now(),
            config: Arc::new(config),
        }
    }
}
