//! Agent-side typed errors (§4.0.1 of the expanded design). Sensor/monitor
//! failures are *typed conditions*, not exceptions — they increment a
//! failure counter and are logged, never propagated to the reporter.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AgentError {
    #[error("probe_unavailable: {0}")]
    ProbeUnavailable(String),
    #[error("parse_error: {0}")]
    ParseError(String),
    #[error("timeout")]
    Timeout,
    #[error("permission_denied: {0}")]
    PermissionDenied(String),
    #[error("internal: {0}")]
    Internal(String),
}

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
        source: serde_json::Error,
    },
    #[error("config invalid: {0}")]
    Invalid(String),
}
