//! Process configuration, built once at startup and handed to every component that needs it.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Namespace on the control plane that holds member cluster credentials.
pub const DEFAULT_CLUSTER_NAMESPACE: &str = "flotilla-cluster";
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_DISCOVERY_BURST: u32 = 300;
pub const DEFAULT_DISCOVERY_QPS: f32 = 50.0;

/// How a spread group's score is derived from its members' scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GroupScoreReduction {
    #[default]
    Sum,
    Max,
}

impl std::str::FromStr for GroupScoreReduction {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sum" => Ok(Self::Sum),
            "max" => Ok(Self::Max),
            _ => Err(ConfigError::Invalid { var: "FLOTILLA_GROUP_SCORE", value: s.to_string() }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlotillaConfig {
    /// Kubeconfig file; `None` uses the client's default discovery rules.
    pub kubeconfig: Option<PathBuf>,
    /// Kubeconfig context of the control plane.
    pub context: Option<String>,
    pub cluster_namespace: String,
    pub command_timeout: Duration,
    pub discovery_burst: u32,
    pub discovery_qps: f32,
    pub group_score: GroupScoreReduction,
    pub metrics_addr: Option<SocketAddr>,
    pub log_filter: String,
}

impl Default for FlotillaConfig {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            context: None,
            cluster_namespace: DEFAULT_CLUSTER_NAMESPACE.to_string(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            discovery_burst: DEFAULT_DISCOVERY_BURST,
            discovery_qps: DEFAULT_DISCOVERY_QPS,
            group_score: GroupScoreReduction::Sum,
            metrics_addr: None,
            log_filter: "info".to_string(),
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| ConfigError::Invalid { var, value: raw }),
    }
}

impl FlotillaConfig {
    /// Read `FLOTILLA_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from an arbitrary variable source; unset variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Some(p) = parse_var::<PathBuf>(&lookup, "FLOTILLA_KUBECONFIG")? { cfg.kubeconfig = Some(p); }
        if let Some(c) = parse_var::<String>(&lookup, "FLOTILLA_CONTEXT")? { cfg.context = Some(c); }
        if let Some(ns) = parse_var::<String>(&lookup, "FLOTILLA_CLUSTER_NAMESPACE")? { cfg.cluster_namespace = ns; }
        if let Some(secs) = parse_var::<u64>(&lookup, "FLOTILLA_COMMAND_TIMEOUT_SECS")? {
            cfg.command_timeout = Duration::from_secs(secs);
        }
        if let Some(b) = parse_var::<u32>(&lookup, "FLOTILLA_DISCOVERY_BURST")? { cfg.discovery_burst = b; }
        if let Some(q) = parse_var::<f32>(&lookup, "FLOTILLA_DISCOVERY_QPS")? {
            if !(q.is_finite() && q > 0.0) {
                return Err(ConfigError::Invalid { var: "FLOTILLA_DISCOVERY_QPS", value: q.to_string() });
            }
            cfg.discovery_qps = q;
        }
        if let Some(g) = parse_var::<GroupScoreReduction>(&lookup, "FLOTILLA_GROUP_SCORE")? { cfg.group_score = g; }
        cfg.metrics_addr = parse_var::<SocketAddr>(&lookup, "FLOTILLA_METRICS_ADDR")?;
        if let Some(f) = parse_var::<String>(&lookup, "FLOTILLA_LOG")? { cfg.log_filter = f; }
        Ok(cfg)
    }
}
