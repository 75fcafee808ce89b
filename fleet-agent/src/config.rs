//! Agent configuration: persisted JSON at `~/.fleet-agent/config.json` (§6).
//! `machine_id` auto-generates from the host's reported name on first run
//! and is then pinned — per the machine-id-immutability decision in §9,
//! nothing here ever rewrites it once chosen.

use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub server_url: String,
    pub api_key: String,
    #[serde(default)]
    pub encryption_key: Option<String>,
    #[serde(default)]
    pub machine_id: Option<String>,
    #[serde(default = "default_interval")]
    pub interval: u64,
    #[serde(default = "default_verify_ssl")]
    pub verify_ssl: bool,
    /// `host:port` targets for the `saas` monitor's reachability probe.
    /// Not in spec.md's config table; an empty list is a valid
    /// configuration (the monitor reports zero endpoints, not a failure).
    #[serde(default)]
    pub saas_endpoints: Vec<String>,
}

fn default_interval() -> u64 {
    10
}

fn default_verify_ssl() -> bool {
    true
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            api_key: String::new(),
            encryption_key: None,
            machine_id: None,
            interval: default_interval(),
            verify_ssl: default_verify_ssl(),
            saas_endpoints: Vec::new(),
        }
    }
}

impl AgentConfig {
    /// Load from a JSON file. Env overrides mirror the server's `FLEET_*`
    /// overlay (§6) so a deployed agent can be parameterized without
    /// rewriting the config file on disk.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut cfg: AgentConfig =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        cfg.apply_env_overlay();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_env_overlay(&mut self) {
        if let Ok(v) = std::env::var("FLEET_SERVER_URL") {
            self.server_url = v;
        }
        if let Ok(v) = std::env::var("FLEET_API_KEY") {
            self.api_key = v;
        }
        if let Ok(v) = std::env::var("FLEET_ENCRYPTION_KEY") {
            self.encryption_key = Some(v);
        }
        if let Ok(v) = std::env::var("FLEET_MACHINE_ID") {
            self.machine_id = Some(v);
        }
        if let Ok(v) = std::env::var("FLEET_INTERVAL") {
            if let Ok(n) = v.parse() {
                self.interval = n;
            }
        }
        if let Ok(v) = std::env::var("FLEET_VERIFY_SSL") {
            self.verify_ssl = v == "true" || v == "1";
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server_url.is_empty() {
            return Err(ConfigError::Invalid("server_url is required".into()));
        }
        if self.api_key.is_empty() {
            return Err(ConfigError::Invalid("api_key is required".into()));
        }
        if let Some(key) = &self.encryption_key {
            if fleet_core::envelope::decode_key(key).is_err() {
                return Err(ConfigError::Invalid(
                    "encryption_key must be a base64-encoded 32-byte key".into(),
                ));
            }
        }
        if self.interval == 0 {
            return Err(ConfigError::Invalid("interval must be > 0".into()));
        }
        Ok(())
    }

    /// `machine_id`, assigning and persisting one on first run if absent.
    /// This is the only place `machine_id` is ever written — once set, it
    /// is immutable (§9 Design Notes).
    pub fn resolve_machine_id(&mut self, path: &Path) -> String {
        if let Some(id) = &self.machine_id {
            return id.clone();
        }
        let sys = sysinfo::System::host_name();
        let id = sys.unwrap_or_else(|| format!("agent-{}", Uuid::new_v4()));
        self.machine_id = Some(id.clone());
        if let Err(e) = self.save(path) {
            tracing::warn!("failed to persist auto-assigned machine_id: {}", e);
        }
        id
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(self).expect("AgentConfig always serializes");
        std::fs::write(path, json).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })
    }
}

/// Default config path `~/.fleet-agent/config.json` (§6), with `~`
/// expansion matching the server's own `expand_tilde` convention.
pub fn default_config_path() -> std::path::PathBuf {
    let expanded = expand_tilde("~/.fleet-agent/config.json");
    std::path::PathBuf::from(expanded)
}

pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return format!("{}/{}", home, rest);
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = AgentConfig::default();
        assert_eq!(cfg.interval, 10);
        assert!(cfg.verify_ssl);
        assert!(cfg.machine_id.is_none());
    }

    #[test]
    fn rejects_missing_server_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"api_key":"k"}"#).unwrap();
        let err = AgentConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn load_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"server_url":"https://fleet.example:8768","api_key":"secret","interval":15}"#,
        )
        .unwrap();
        let cfg = AgentConfig::load(&path).unwrap();
        assert_eq!(cfg.server_url, "https://fleet.example:8768");
        assert_eq!(cfg.interval, 15);
        assert!(cfg.verify_ssl);
    }

    #[test]
    fn resolve_machine_id_persists_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut cfg = AgentConfig {
            server_url: "https://fleet.example".into(),
            api_key: "k".into(),
            ..AgentConfig::default()
        };
        let first = cfg.resolve_machine_id(&path);
        let reloaded = AgentConfig::load(&path).unwrap();
        assert_eq!(reloaded.machine_id.as_deref(), Some(first.as_str()));
    }
}
