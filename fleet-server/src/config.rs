//! Server configuration: YAML file + `FLEET_*` environment overlay, per §6.
//!
//! Loading is a pure function of a path so it is unit-testable without
//! touching a real filesystem beyond the fixture under test.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("config invalid: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationConfig {
    #[serde(default = "default_org_name")]
    pub name: String,
}

impl Default for OrganizationConfig {
    fn default() -> Self {
        Self {
            name: default_org_name(),
        }
    }
}

fn default_org_name() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub encryption_key: Option<String>,
    #[serde(default = "default_history_size")]
    pub history_size: usize,
    #[serde(default = "default_retention_days")]
    pub history_retention_days: i64,
    #[serde(default = "default_session_ttl")]
    pub session_ttl_seconds: i64,
    #[serde(default)]
    pub strict_encryption: bool,
    /// Nominal agent report interval used for status derivation (§4.4) when a
    /// machine hasn't reported its own interval. Not in spec.md's config
    /// table verbatim — carried from the agent's default so the server can
    /// derive status before a machine's declared interval is known.
    #[serde(default = "default_agent_interval")]
    pub default_agent_interval_seconds: i64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_key: String::new(),
            encryption_key: None,
            history_size: default_history_size(),
            history_retention_days: default_retention_days(),
            session_ttl_seconds: default_session_ttl(),
            strict_encryption: false,
            default_agent_interval_seconds: default_agent_interval(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8768
}
fn default_history_size() -> usize {
    1000
}
fn default_retention_days() -> i64 {
    30
}
fn default_session_ttl() -> i64 {
    28_800
}
fn default_agent_interval() -> i64 {
    10
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SslSection {
    #[serde(default)]
    pub cert_file: Option<String>,
    #[serde(default)]
    pub key_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsSection {
    /// Exact origins allowed to cross-site access the dashboard's API
    /// (§4.5). Empty means no cross-origin access at all, not "allow any" —
    /// a wildcard would defeat cookie-session auth's `SameSite` protection.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsSection {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertThresholds {
    #[serde(default = "default_cpu_threshold")]
    pub cpu: f64,
    #[serde(default = "default_mem_threshold")]
    pub memory: f64,
    #[serde(default = "default_disk_threshold")]
    pub disk: f64,
    #[serde(default = "default_battery_threshold")]
    pub battery: f64,
    #[serde(default = "default_temp_threshold")]
    pub temp: f64,
    #[serde(default = "default_crashes_threshold")]
    pub crashes_24h: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            cpu: default_cpu_threshold(),
            memory: default_mem_threshold(),
            disk: default_disk_threshold(),
            battery: default_battery_threshold(),
            temp: default_temp_threshold(),
            crashes_24h: default_crashes_threshold(),
        }
    }
}

fn default_cpu_threshold() -> f64 {
    90.0
}
fn default_mem_threshold() -> f64 {
    90.0
}
fn default_disk_threshold() -> f64 {
    90.0
}
fn default_battery_threshold() -> f64 {
    10.0
}
fn default_temp_threshold() -> f64 {
    85.0
}
fn default_crashes_threshold() -> f64 {
    5.0
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub organization: OrganizationConfig,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub ssl: SslSection,
    #[serde(default)]
    pub cors: CorsSection,
    #[serde(default)]
    pub alerts: AlertThresholds,
    /// SQLite database path. Not in the dotted `server.*` table but needed
    /// to make `~/.fleet-data/fleet_data.sqlite3` (§6) configurable for tests.
    #[serde(default = "default_db_path")]
    pub database_path: String,
}

fn default_db_path() -> String {
    "~/.fleet-data/fleet_data.sqlite3".to_string()
}

impl ServerConfig {
    /// Load from a YAML file, then overlay `FLEET_*`-prefixed environment
    /// variables by dotted path (e.g. `FLEET_SERVER_ENCRYPTION_KEY` →
    /// `server.encryption_key`), per §6.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut cfg: ServerConfig =
            serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        cfg.apply_env_overlay();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply `FLEET_*` environment overrides on top of whatever was loaded
    /// from YAML (or the defaults, if called directly on `ServerConfig::default()`).
    pub fn apply_env_overlay(&mut self) {
        if let Ok(v) = std::env::var("FLEET_ORGANIZATION_NAME") {
            self.organization.name = v;
        }
        if let Ok(v) = std::env::var("FLEET_SERVER_HOST") {
            self.server.host = v;
        }
        if let Ok(v) = std::env::var("FLEET_SERVER_PORT") {
            if let Ok(p) = v.parse() {
                self.server.port = p;
            }
        }
        if let Ok(v) = std::env::var("FLEET_SERVER_API_KEY") {
            self.server.api_key = v;
        }
        if let Ok(v) = std::env::var("FLEET_SERVER_ENCRYPTION_KEY") {
            self.server.encryption_key = Some(v);
        }
        if let Ok(v) = std::env::var("FLEET_SERVER_HISTORY_SIZE") {
            if let Ok(n) = v.parse() {
                self.server.history_size = n;
            }
        }
        if let Ok(v) = std::env::var("FLEET_SERVER_HISTORY_RETENTION_DAYS") {
            if let Ok(n) = v.parse() {
                self.server.history_retention_days = n;
            }
        }
        if let Ok(v) = std::env::var("FLEET_SERVER_SESSION_TTL_SECONDS") {
            if let Ok(n) = v.parse() {
                self.server.session_ttl_seconds = n;
            }
        }
        if let Ok(v) = std::env::var("FLEET_SERVER_STRICT_ENCRYPTION") {
            self.server.strict_encryption = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("FLEET_SSL_CERT_FILE") {
            self.ssl.cert_file = Some(v);
        }
        if let Ok(v) = std::env::var("FLEET_SSL_KEY_FILE") {
            self.ssl.key_file = Some(v);
        }
        if let Ok(v) = std::env::var("FLEET_DATABASE_PATH") {
            self.database_path = v;
        }
        if let Ok(v) = std::env::var("FLEET_CORS_ALLOWED_ORIGINS") {
            self.cors.allowed_origins = v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }
        if let Ok(v) = std::env::var("FLEET_ALERTS_CPU") {
            if let Ok(n) = v.parse() {
                self.alerts.cpu = n;
            }
        }
        if let Ok(v) = std::env::var("FLEET_ALERTS_MEMORY") {
            if let Ok(n) = v.parse() {
                self.alerts.memory = n;
            }
        }
        if let Ok(v) = std::env::var("FLEET_ALERTS_DISK") {
            if let Ok(n) = v.parse() {
                self.alerts.disk = n;
            }
        }
        if let Ok(v) = std::env::var("FLEET_ALERTS_BATTERY") {
            if let Ok(n) = v.parse() {
                self.alerts.battery = n;
            }
        }
        if let Ok(v) = std::env::var("FLEET_ALERTS_TEMP") {
            if let Ok(n) = v.parse() {
                self.alerts.temp = n;
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.api_key.is_empty() {
            return Err(ConfigError::Invalid(
                "server.api_key is required for agent-plane auth".into(),
            ));
        }
        if let Some(key) = &self.server.encryption_key {
            if fleet_core::envelope::decode_key(key).is_err() {
                return Err(ConfigError::Invalid(
                    "server.encryption_key must be a base64-encoded 32-byte key".into(),
                ));
            }
        }
        Ok(())
    }

    /// Expand a leading `~` in `database_path` to the user's home directory.
    pub fn resolved_database_path(&self) -> String {
        expand_tilde(&self.database_path)
    }

    pub fn resolved_cert_file(&self) -> Option<String> {
        self.ssl.cert_file.as_deref().map(expand_tilde)
    }

    pub fn resolved_key_file(&self) -> Option<String> {
        self.ssl.key_file.as_deref().map(expand_tilde)
    }
}

fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return format!("{}/{}", home, rest);
        }
    }
    path.to_string()
}

fn dirs_home() -> Option<String> {
    std::env::var("HOME").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.server.port, 8768);
        assert_eq!(cfg.server.history_size, 1000);
        assert_eq!(cfg.server.history_retention_days, 30);
        assert_eq!(cfg.server.session_ttl_seconds, 28_800);
        assert!(!cfg.server.strict_encryption);
        assert_eq!(cfg.alerts.cpu, 90.0);
        assert_eq!(cfg.alerts.battery, 10.0);
    }

    #[test]
    fn cors_allowed_origins_defaults_empty() {
        let cfg = ServerConfig::default();
        assert!(cfg.cors.allowed_origins.is_empty());
    }

    #[test]
    fn cors_env_overlay_splits_comma_separated_origins() {
        std::env::set_var(
            "FLEET_CORS_ALLOWED_ORIGINS",
            "https://a.example, https://b.example",
        );
        let mut cfg = ServerConfig::default();
        cfg.apply_env_overlay();
        assert_eq!(
            cfg.cors.allowed_origins,
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
        std::env::remove_var("FLEET_CORS_ALLOWED_ORIGINS");
    }

    #[test]
    fn rejects_missing_api_key() {
        let cfg = ServerConfig::default();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_overlay_applies_dotted_overrides() {
        std::env::set_var("FLEET_SERVER_PORT", "9999");
        std::env::set_var("FLEET_SERVER_API_KEY", "test-key");
        let mut cfg = ServerConfig::default();
        cfg.apply_env_overlay();
        assert_eq!(cfg.server.port, 9999);
        assert_eq!(cfg.server.api_key, "test-key");
        std::env::remove_var("FLEET_SERVER_PORT");
        std::env::remove_var("FLEET_SERVER_API_KEY");
    }

    #[test]
    fn load_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "server:\n  api_key: abc123\n  port: 8080\nalerts:\n  cpu: 80\n",
        )
        .unwrap();
        let cfg = ServerConfig::load(&path).unwrap();
        assert_eq!(cfg.server.api_key, "abc123");
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.alerts.cpu, 80.0);
    }
}
