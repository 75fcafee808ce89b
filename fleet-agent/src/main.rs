use std::path::PathBuf;

use clap::Parser;

use fleet_agent::config::{default_config_path, AgentConfig};
use fleet_agent::Agent;

/// ATLAS fleet agent: samples local monitors and reports to a fleet server
/// on a fixed interval (§6).
#[derive(Parser, Debug)]
#[command(name = "fleet-agent", version)]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run one report cycle and exit instead of looping forever.
    #[arg(long)]
    no_daemon: bool,
}

/// Exit codes per §6: 0 clean shutdown, 1 config error, 2 fatal loop error
/// after the supervisor gave up.
#[tokio::main]
async fn main() -> std::process::ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(default_config_path);

    let mut config = match AgentConfig::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("config error: {}", e);
            return std::process::ExitCode::from(1);
        }
    };

    let machine_id = config.resolve_machine_id(&config_path);
    tracing::info!(machine_id = %machine_id, server = %config.server_url, "fleet-agent starting");

    let agent = Agent::start(config.clone(), config_path, machine_id);

    if cli.no_daemon {
        tokio::time::sleep(std::time::Duration::from_secs(config.interval.max(1) + 2)).await;
        agent.shutdown().await;
        return std::process::ExitCode::from(0);
    }

    shutdown_signal().await;
    agent.shutdown().await;
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

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    if std::env::var("RUST_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt().with_env_filter(env_filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
}
