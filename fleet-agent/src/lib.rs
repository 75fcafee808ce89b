pub mod commands;
pub mod config;
pub mod csvlog;
pub mod error;
pub mod monitors;
pub mod reporter;
pub mod sensors;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

use commands::{CommandExecutor, QuiesceState};
use config::AgentConfig;
use monitors::MonitorSlots;
use reporter::Reporter;
use sensors::{
    ApplicationSensor, DiskHealthSensor, DisplaySensor, MonitorSensor, NetworkQualitySensor,
    PeripheralSensor, PowerSensor, SaasSensor, SecuritySensor, SoftwareInventorySensor, VpnSensor,
    WifiRoamingSensor,
};

/// Everything spawned for one running agent: the monitor tasks, the
/// reporter, and the handle used to drive a cooperative shutdown (§5 — the
/// agent has no shared mutable state beyond the per-monitor slots and the
/// command executor's own queues).
pub struct Agent {
    pub shutdown_tx: watch::Sender<bool>,
    monitor_handles: Vec<JoinHandle<()>>,
    reporter_handle: JoinHandle<()>,
}

impl Agent {
    pub fn start(config: AgentConfig, config_path: PathBuf, machine_id: String) -> Self {
        let data_dir = data_dir_for(&config_path);
        let _ = std::fs::create_dir_all(&data_dir);

        let http_client = build_http_client(&config);
        let sensors = build_sensors(&config, http_client.clone());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let slots = MonitorSlots::new().with_data_dir(data_dir.clone());
        let quiesce = Arc::new(QuiesceState::new());
        // Shared with the reporter so a `reload_config` command, applied by
        // the command executor, is visible on the reporter's very next tick.
        let live_config = Arc::new(RwLock::new(config));
        let executor = Arc::new(CommandExecutor::new(
            machine_id.clone(),
            config_path,
            http_client.clone(),
            live_config.clone(),
            slots.clone(),
            quiesce.clone(),
        ));

        let monitor_handles =
            monitors::spawn_all(&slots, sensors, data_dir, shutdown_rx.clone(), quiesce.clone());

        let reporter = Arc::new(Reporter::new(
            live_config,
            machine_id,
            http_client,
            slots,
            executor,
        ));
        let reporter_handle = tokio::spawn(reporter.run(shutdown_rx));

        Self {
            shutdown_tx,
            monitor_handles,
            reporter_handle,
        }
    }

    /// Signal shutdown and wait for every task to finish, bounded to 10s
    /// for the in-flight report (§5).
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let deadline = tokio::time::sleep(std::time::Duration::from_secs(10));
        tokio::pin!(deadline);

        let joins = futures_join(self.monitor_handles, self.reporter_handle);
        tokio::select! {
            _ = joins => {},
            _ = &mut deadline => {
                tracing::warn!("shutdown deadline elapsed, some tasks did not exit cleanly");
            }
        }
    }
}

async fn futures_join(monitor_handles: Vec<JoinHandle<()>>, reporter_handle: JoinHandle<()>) {
    for handle in monitor_handles {
        let _ = handle.await;
    }
    let _ = reporter_handle.await;
}

fn data_dir_for(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("data")
}

fn build_http_client(config: &AgentConfig) -> reqwest::Client {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(!config.verify_ssl)
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .expect("static reqwest client configuration is always valid")
}

/// Every non-system monitor sensor (`system` is sampled directly by the
/// reporter, not run as its own worker — it has no wire-distinct snapshot
/// shape, it feeds straight into `metrics`).
fn build_sensors(config: &AgentConfig, http_client: reqwest::Client) -> Vec<Box<dyn MonitorSensor>> {
    let probe_url = format!("{}/", config.server_url.trim_end_matches('/'));
    vec![
        Box::new(VpnSensor),
        Box::new(SaasSensor {
            endpoints: config.saas_endpoints.clone(),
        }),
        Box::new(NetworkQualitySensor {
            server_host: host_from_url(&config.server_url),
            client: http_client,
            probe_url,
        }),
        Box::new(WifiRoamingSensor),
        Box::new(SecuritySensor),
        Box::new(ApplicationSensor),
        Box::new(DiskHealthSensor),
        Box::new(PeripheralSensor),
        Box::new(PowerSensor),
        Box::new(DisplaySensor),
        Box::new(SoftwareInventorySensor),
    ]
}

fn host_from_url(url: &str) -> String {
    url.split("://")
        .nth(1)
        .unwrap_or(url)
        .split(['/', ':'])
        .next()
        .unwrap_or(url)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_from_url_strips_scheme_and_port() {
        assert_eq!(host_from_url("https://fleet.example:8768/api"), "fleet.example");
        assert_eq!(host_from_url("http://localhost"), "localhost");
    }
}
