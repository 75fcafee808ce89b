//! Server self-health snapshot — CPU/memory of the fleet-server process's
//! own host, refreshed every 5 seconds by a background task. Surfaced
//! through `/api/fleet/server-resources` alongside cert expiry (§4.7).
//! Not a fleet `Machine`; this is the server's own vitals, kept as a
//! separate cached snapshot the way the host crate caches its own
//! `SystemSnapshot`.

use std::sync::Arc;

use tokio::sync::RwLock;

#[derive(Clone)]
pub struct SystemSnapshot {
    pub cpu_usage_percent: f32,
    pub memory_used_mb: f64,
    pub memory_total_mb: f64,
    pub platform: String,
}

impl Default for SystemSnapshot {
    fn default() -> Self {
        Self {
            cpu_usage_percent: 0.0,
            memory_used_mb: 0.0,
            memory_total_mb: 0.0,
            platform: std::env::consts::OS.to_string(),
        }
    }
}

/// Spawn a background task that refreshes the server's own CPU/memory stats
/// every 5 seconds.
pub fn spawn(snapshot: Arc<RwLock<SystemSnapshot>>) {
    tokio::spawn(async move {
        let mut sys = sysinfo::System::new_all();
        sys.refresh_cpu_all();
        tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;

        loop {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;

            sys.refresh_cpu_all();
            sys.refresh_memory();

            let cpu = if sys.cpus().is_empty() {
                0.0
            } else {
                sys.cpus().iter().map(|c| c.cpu_usage()).sum::<f32>() / sys.cpus().len() as f32
            };

            let snap = SystemSnapshot {
                cpu_usage_percent: cpu,
                memory_used_mb: sys.used_memory() as f64 / 1_048_576.0,
                memory_total_mb: sys.total_memory() as f64 / 1_048_576.0,
                platform: std::env::consts::OS.to_string(),
            };

            *snapshot.write().await = snap;
        }
    });
}
