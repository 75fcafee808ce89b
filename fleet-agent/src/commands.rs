//! Command executor (§4.9, supplemented by §4.11's dispatch table).
//! At-least-once delivery, at-most-once application: a bounded LRU of the
//! last 1024 seen `command_id`s makes re-dispatch of an already-delivered
//! command a safe no-op.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use fleet_core::command::{CommandResult, CommandType, PendingCommand};
use fleet_core::speedtest::SpeedTestResult;
use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::config::AgentConfig;
use crate::monitors::MonitorSlots;

const SEEN_CAPACITY: usize = 1024;

/// Bounded FIFO set of command IDs already applied.
struct SeenCommands {
    order: VecDeque<Uuid>,
    members: HashMap<Uuid, ()>,
}

impl SeenCommands {
    fn new() -> Self {
        Self {
            order: VecDeque::with_capacity(SEEN_CAPACITY),
            members: HashMap::new(),
        }
    }

    fn contains(&self, id: Uuid) -> bool {
        self.members.contains_key(&id)
    }

    fn insert(&mut self, id: Uuid) {
        if self.members.insert(id, ()).is_some() {
            return;
        }
        self.order.push_back(id);
        if self.order.len() > SEEN_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
    }
}

/// Quiesce state: when `Some(until)`, monitor sampling is paused until
/// that instant; the reporter still sends `machine_info`/`uptime`.
pub struct QuiesceState {
    pub until: RwLock<Option<Instant>>,
}

impl QuiesceState {
    pub fn new() -> Self {
        Self {
            until: RwLock::new(None),
        }
    }

    pub async fn is_quiesced(&self) -> bool {
        match *self.until.read().await {
            Some(until) => Instant::now() < until,
            None => false,
        }
    }
}

pub struct CommandExecutor {
    machine_id: String,
    config_path: PathBuf,
    http_client: reqwest::Client,
    /// Shared with the reporter so a `reload_config` command takes effect
    /// on the reporter's very next tick, without a restart (§4.11).
    config: Arc<RwLock<AgentConfig>>,
    monitors: MonitorSlots,
    seen: Mutex<SeenCommands>,
    pub pending_results: Mutex<VecDeque<CommandResult>>,
    pub pending_speedtest: Mutex<Option<SpeedTestResult>>,
    pub quiesce: Arc<QuiesceState>,
}

impl CommandExecutor {
    pub fn new(
        machine_id: String,
        config_path: PathBuf,
        http_client: reqwest::Client,
        config: Arc<RwLock<AgentConfig>>,
        monitors: MonitorSlots,
        quiesce: Arc<QuiesceState>,
    ) -> Self {
        Self {
            machine_id,
            config_path,
            http_client,
            config,
            monitors,
            seen: Mutex::new(SeenCommands::new()),
            pending_results: Mutex::new(VecDeque::new()),
            pending_speedtest: Mutex::new(None),
            quiesce,
        }
    }

    /// Dispatch one pending command. Idempotent: a `command_id` already
    /// applied is a no-op, satisfying "at-most-once application" (§4.9).
    pub async fn dispatch(&self, command: PendingCommand) {
        {
            let mut seen = self.seen.lock().await;
            if seen.contains(command.command_id) {
                tracing::debug!(command_id = %command.command_id, "duplicate command delivery, skipping");
                return;
            }
            seen.insert(command.command_id);
        }

        let result = match command.kind {
            CommandType::SpeedtestNow => self.run_speedtest(command.command_id).await,
            CommandType::ReloadConfig => self.reload_config(command.command_id).await,
            CommandType::CollectDiag => self.collect_diag(command.command_id).await,
            CommandType::Quiesce => self.quiesce(command.command_id, &command.args).await,
        };

        self.pending_results.lock().await.push_back(result);
    }

    /// Drain accumulated results + the pending speedtest for the next
    /// outgoing report (§4.3 step 2: "latest snapshot"-style handoff).
    pub async fn drain(&self) -> (Vec<CommandResult>, Option<SpeedTestResult>) {
        let results = self.pending_results.lock().await.drain(..).collect();
        let speedtest = self.pending_speedtest.lock().await.take();
        (results, speedtest)
    }

    async fn run_speedtest(&self, command_id: Uuid) -> CommandResult {
        let server_url = self.config.read().await.server_url.clone();

        let ping_start = Instant::now();
        let ping_ok = self.http_client.head(&server_url).send().await.is_ok();
        let ping_ms = ping_start.elapsed().as_secs_f64() * 1000.0;

        let dl_start = Instant::now();
        let download_mbps = match self.http_client.get(&server_url).send().await {
            Ok(resp) => {
                let bytes = resp.bytes().await.map(|b| b.len()).unwrap_or(0);
                let secs = dl_start.elapsed().as_secs_f64().max(0.001);
                (bytes.max(1) as f64 * 8.0 / 1_000_000.0) / secs
            }
            Err(_) => 0.0,
        };
        // No dedicated throughput server is configured — §4.11 scopes this
        // as the network-quality sampler's sub-probe, not a speedtest.net
        // style client, so upload is approximated from the same round trip.
        let upload_mbps = download_mbps;

        if !ping_ok {
            return CommandResult {
                command_id,
                status: "error".to_string(),
                output: json!({ "error": "server_unreachable" }),
            };
        }

        let result = SpeedTestResult {
            machine_id: self.machine_id.clone(),
            timestamp: Utc::now(),
            download_mbps,
            upload_mbps,
            ping_ms,
            jitter_ms: None,
            packet_loss_pct: None,
            server: server_url,
            isp: None,
        };

        let output = json!({
            "download_mbps": result.download_mbps,
            "upload_mbps": result.upload_mbps,
            "ping_ms": result.ping_ms,
        });
        *self.pending_speedtest.lock().await = Some(result);

        CommandResult {
            command_id,
            status: "ok".to_string(),
            output,
        }
    }

    async fn reload_config(&self, command_id: Uuid) -> CommandResult {
        match AgentConfig::load(&self.config_path) {
            Ok(cfg) => {
                let mut live = self.config.write().await;
                let diff = json!({
                    "server_url": { "old": live.server_url, "new": cfg.server_url },
                    "interval": { "old": live.interval, "new": cfg.interval },
                    "encrypted": { "old": live.encryption_key.is_some(), "new": cfg.encryption_key.is_some() },
                });
                *live = cfg;
                CommandResult {
                    command_id,
                    status: "ok".to_string(),
                    output: diff,
                }
            }
            Err(e) => CommandResult {
                command_id,
                status: "error".to_string(),
                output: json!({ "error": e.to_string() }),
            },
        }
    }

    async fn collect_diag(&self, command_id: Uuid) -> CommandResult {
        let monitors = self.monitors.diag_snapshot().await;
        CommandResult {
            command_id,
            status: "ok".to_string(),
            output: json!({
                "machine_id": self.machine_id,
                "pid": std::process::id(),
                "collected_at": Utc::now().to_rfc3339(),
                "monitors": monitors,
            }),
        }
    }

    async fn quiesce(&self, command_id: Uuid, args: &serde_json::Value) -> CommandResult {
        let duration_seconds = args
            .get("duration_seconds")
            .and_then(|v| v.as_u64())
            .unwrap_or(300);

        *self.quiesce.until.write().await = Some(Instant::now() + Duration::from_secs(duration_seconds));

        CommandResult {
            command_id,
            status: "ok".to_string(),
            output: json!({ "duration_seconds": duration_seconds }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_executor(config_path: PathBuf, quiesce: Arc<QuiesceState>) -> CommandExecutor {
        CommandExecutor::new(
            "mac-01".to_string(),
            config_path,
            reqwest::Client::new(),
            Arc::new(RwLock::new(AgentConfig {
                server_url: "http://127.0.0.1:1".to_string(),
                ..AgentConfig::default()
            })),
            MonitorSlots::new(),
            quiesce,
        )
    }

    #[tokio::test]
    async fn reload_config_reports_error_for_missing_file() {
        let executor = test_executor(
            PathBuf::from("/nonexistent/fleet-agent-config.json"),
            Arc::new(QuiesceState::new()),
        );
        let result = executor.reload_config(Uuid::new_v4()).await;
        assert_eq!(result.status, "error");
    }

    #[tokio::test]
    async fn reload_config_applies_new_values_without_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        let on_disk = AgentConfig {
            server_url: "http://reloaded.example:9".to_string(),
            interval: 42,
            ..AgentConfig::default()
        };
        std::fs::write(&config_path, serde_json::to_vec(&on_disk).unwrap()).unwrap();

        let live = Arc::new(RwLock::new(AgentConfig {
            server_url: "http://original.example:9".to_string(),
            interval: 10,
            ..AgentConfig::default()
        }));
        let executor = CommandExecutor::new(
            "mac-01".to_string(),
            config_path,
            reqwest::Client::new(),
            live.clone(),
            MonitorSlots::new(),
            Arc::new(QuiesceState::new()),
        );

        let result = executor.reload_config(Uuid::new_v4()).await;
        assert_eq!(result.status, "ok");
        let reloaded = live.read().await;
        assert_eq!(reloaded.server_url, "http://reloaded.example:9");
        assert_eq!(reloaded.interval, 42);
    }

    #[tokio::test]
    async fn duplicate_command_id_is_applied_once() {
        let executor = test_executor(
            PathBuf::from("/nonexistent/fleet-agent-config.json"),
            Arc::new(QuiesceState::new()),
        );
        let command = PendingCommand {
            command_id: Uuid::new_v4(),
            kind: CommandType::CollectDiag,
            args: json!({}),
        };
        executor.dispatch(command.clone()).await;
        executor.dispatch(command).await;
        let (results, _) = executor.drain().await;
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn quiesce_sets_future_deadline() {
        let quiesce = Arc::new(QuiesceState::new());
        let executor = test_executor(
            PathBuf::from("/nonexistent/fleet-agent-config.json"),
            quiesce.clone(),
        );
        executor
            .quiesce(Uuid::new_v4(), &json!({ "duration_seconds": 1 }))
            .await;
        assert!(quiesce.is_quiesced().await);
    }

    #[tokio::test]
    async fn collect_diag_reports_every_monitor_slot() {
        let executor = test_executor(
            PathBuf::from("/nonexistent/fleet-agent-config.json"),
            Arc::new(QuiesceState::new()),
        );
        let result = executor.collect_diag(Uuid::new_v4()).await;
        let monitors = result.output["monitors"].as_object().unwrap();
        assert_eq!(monitors.len(), fleet_core::monitors::MonitorKind::ALL.len());
        assert!(monitors.contains_key("saas"));
    }
}
