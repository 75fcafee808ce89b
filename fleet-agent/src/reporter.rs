//! The reporter task (§4.3): one tick does one report. The loop below
//! follows the eight numbered steps of that contract in order so it can be
//! read straight against them.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fleet_core::envelope::{seal, wrap_plaintext};
use fleet_core::machine::Machine;
use fleet_core::monitors::{MonitorKind, MonitorSnapshots, Snapshot};
use fleet_core::report::Report;
use rand::Rng;
use reqwest::StatusCode;
use tokio::sync::{watch, Mutex, RwLock};

use crate::commands::CommandExecutor;
use crate::config::AgentConfig;
use crate::monitors::MonitorSlots;
use crate::sensors::SystemSensor;

const BACKOFF_BASE: Duration = Duration::from_secs(2);
const BACKOFF_CAP: Duration = Duration::from_secs(60);
const AUTH_PAUSE: Duration = Duration::from_secs(60);
const IN_FLIGHT_BOUND: Duration = Duration::from_secs(10);

pub struct Reporter {
    /// Shared with the command executor: a `reload_config` command mutates
    /// this in place, so the very next tick picks up the new `server_url`,
    /// `api_key`, `interval`, and `encryption_key` without a restart.
    config: Arc<RwLock<AgentConfig>>,
    machine_id: String,
    http_client: reqwest::Client,
    system: Mutex<SystemSensor>,
    slots: MonitorSlots,
    executor: Arc<CommandExecutor>,
    sent_machine_info: std::sync::atomic::AtomicBool,
    essential_only: std::sync::atomic::AtomicBool,
}

impl Reporter {
    pub fn new(
        config: Arc<RwLock<AgentConfig>>,
        machine_id: String,
        http_client: reqwest::Client,
        slots: MonitorSlots,
        executor: Arc<CommandExecutor>,
    ) -> Self {
        Self {
            config,
            machine_id,
            http_client,
            system: Mutex::new(SystemSensor::new()),
            slots,
            executor,
            sent_machine_info: std::sync::atomic::AtomicBool::new(false),
            essential_only: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = BACKOFF_BASE;

        loop {
            // Step 1: sleep a jittered tick (default interval, ±10%).
            let jittered = jitter(self.config.read().await.interval);
            tokio::select! {
                _ = tokio::time::sleep(jittered) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("reporter shutting down");
                        return;
                    }
                }
            }
            if *shutdown.borrow() {
                return;
            }

            let mut outcome = self.send_one().await;
            if matches!(outcome, Outcome::TooLarge) {
                tracing::warn!("report rejected as too large (413), dropping non-essential monitors and retrying once");
                self.essential_only.store(true, std::sync::atomic::Ordering::Relaxed);
                outcome = self.send_one().await;
            }

            match outcome {
                Outcome::Success => {
                    backoff = BACKOFF_BASE;
                }
                Outcome::AuthFailed => {
                    tracing::warn!("report rejected (401/403), pausing 60s");
                    tokio::time::sleep(AUTH_PAUSE).await;
                }
                Outcome::ServerOrNetworkError => {
                    tracing::warn!("report failed, backing off {:?}", backoff);
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(BACKOFF_CAP);
                }
                Outcome::TooLarge => {
                    tracing::warn!("report still rejected as too large after dropping non-essential monitors");
                }
            }
        }
    }

    async fn send_one(&self) -> Outcome {
        // Snapshot the live config once per tick so a concurrent
        // `reload_config` write can't tear this send across two configs.
        let config = self.config.read().await.clone();
        let encryption_key = config
            .encryption_key
            .as_deref()
            .and_then(|k| fleet_core::envelope::decode_key(k).ok());

        // Step 2: assemble the report.
        let metrics = self.system.lock().await.sample();

        let machine_info: Option<Machine> = if !self
            .sent_machine_info
            .load(std::sync::atomic::Ordering::Relaxed)
        {
            Some(
                self.system
                    .lock()
                    .await
                    .machine_info(&self.machine_id, Utc::now()),
            )
        } else {
            None
        };

        let monitors = if self.executor.quiesce.is_quiesced().await {
            // Quiesced: report machine_info/uptime only (§4.11), so the
            // non-system monitor snapshots are left off entirely rather
            // than replayed stale from before the quiesce began.
            MonitorSnapshots::default()
        } else {
            let mut snapshots = self.slots.healthy_snapshots().await;
            if self.essential_only.load(std::sync::atomic::Ordering::Relaxed) {
                snapshots.remove(&MonitorKind::SoftwareInventory);
                snapshots.remove(&MonitorKind::Display);
            }
            snapshots_to_struct(&snapshots)
        };

        let (command_results, speedtest) = self.executor.drain().await;

        let report = Report {
            machine_id: self.machine_id.clone(),
            timestamp: Utc::now(),
            machine_info,
            metrics,
            monitors,
            speedtest,
            command_results,
        };

        let body = match serde_json::to_vec(&report) {
            Ok(b) => b,
            Err(e) => {
                tracing::error!("failed to serialize report: {}", e);
                return Outcome::ServerOrNetworkError;
            }
        };

        // Step 3: seal if keyed, otherwise wrap as a declared-plaintext
        // envelope so the server can tell the difference from tampering.
        let envelope = match &encryption_key {
            Some(key) => seal(&body, key, &self.machine_id),
            None => wrap_plaintext(&body, &self.machine_id),
        };

        // Step 4: POST, bounding the in-flight request to 10s on shutdown.
        let url = format!("{}/api/fleet/report", config.server_url.trim_end_matches('/'));
        let send = self
            .http_client
            .post(&url)
            .header("X-API-Key", &config.api_key)
            .header("Content-Type", "application/json")
            .json(&envelope)
            .send();

        let response = match tokio::time::timeout(IN_FLIGHT_BOUND, send).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                tracing::warn!("report request failed: {}", e);
                return Outcome::ServerOrNetworkError;
            }
            Err(_) => {
                tracing::warn!("report request exceeded the in-flight bound");
                return Outcome::ServerOrNetworkError;
            }
        };

        match response.status() {
            // Step 5: 2xx, parse and dispatch any commands.
            status if status.is_success() => {
                self.sent_machine_info
                    .store(true, std::sync::atomic::Ordering::Relaxed);
                self.essential_only
                    .store(false, std::sync::atomic::Ordering::Relaxed);
                match response.json::<ReportResponse>().await {
                    Ok(parsed) => {
                        for command in parsed.commands {
                            self.executor.dispatch(command).await;
                        }
                        Outcome::Success
                    }
                    Err(e) => {
                        tracing::warn!("malformed report response: {}", e);
                        Outcome::Success
                    }
                }
            }
            // Step 6: auth rejection.
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Outcome::AuthFailed,
            // Step 8: payload too large, drop non-essential monitors and
            // retry once on the next tick.
            StatusCode::PAYLOAD_TOO_LARGE => Outcome::TooLarge,
            // Step 7: 5xx or anything else unexpected.
            _ => Outcome::ServerOrNetworkError,
        }
    }
}

enum Outcome {
    Success,
    AuthFailed,
    ServerOrNetworkError,
    TooLarge,
}

#[derive(serde::Deserialize)]
struct ReportResponse {
    #[allow(dead_code)]
    ok: bool,
    #[serde(default)]
    commands: Vec<fleet_core::command::PendingCommand>,
}

fn snapshots_to_struct(
    snapshots: &std::collections::HashMap<MonitorKind, Snapshot>,
) -> MonitorSnapshots {
    let mut out = MonitorSnapshots::default();
    for (kind, snapshot) in snapshots {
        match (kind, snapshot) {
            (MonitorKind::Vpn, Snapshot::Vpn(s)) => out.vpn = Some(s.clone()),
            (MonitorKind::Saas, Snapshot::Saas(s)) => out.saas = Some(s.clone()),
            (MonitorKind::NetworkQuality, Snapshot::NetworkQuality(s)) => {
                out.network_quality = Some(s.clone())
            }
            (MonitorKind::WifiRoaming, Snapshot::WifiRoaming(s)) => out.wifi_roaming = Some(s.clone()),
            (MonitorKind::Security, Snapshot::Security(s)) => out.security = Some(s.clone()),
            (MonitorKind::Application, Snapshot::Application(s)) => out.application = Some(s.clone()),
            (MonitorKind::DiskHealth, Snapshot::DiskHealth(s)) => out.disk_health = Some(s.clone()),
            (MonitorKind::Peripheral, Snapshot::Peripheral(s)) => out.peripheral = Some(s.clone()),
            (MonitorKind::Power, Snapshot::Power(s)) => out.power = Some(s.clone()),
            (MonitorKind::Display, Snapshot::Display(s)) => out.display = Some(s.clone()),
            (MonitorKind::SoftwareInventory, Snapshot::SoftwareInventory(s)) => {
                out.software_inventory = Some(s.clone())
            }
            _ => {}
        }
    }
    out
}

/// `interval_secs` ± 10%, per §4.3 step 1.
fn jitter(interval_secs: u64) -> Duration {
    let base = interval_secs.max(1) as f64;
    let spread = base * 0.10;
    let delta = rand::rng().random_range(-spread..=spread);
    Duration::from_secs_f64((base + delta).max(0.1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_ten_percent() {
        for _ in 0..50 {
            let d = jitter(10).as_secs_f64();
            assert!((9.0..=11.0).contains(&d), "jitter out of bounds: {d}");
        }
    }

    #[test]
    fn empty_snapshots_produce_default_struct() {
        let map = std::collections::HashMap::new();
        let out = snapshots_to_struct(&map);
        assert!(out.vpn.is_none());
        assert!(out.saas.is_none());
    }
}
