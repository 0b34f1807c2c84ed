//! Process configuration, read from the environment.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

pub const SERVICE_ACCOUNT_NAMESPACE_FILE: &str =
    "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

pub const MONITOR_INTERVAL: Duration = Duration::from_secs(60);
pub const STALE_AFTER_HOURS: i64 = 48;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:9090";
const DEFAULT_CALL_TIMEOUT_SECS: u64 = 10;
const DEFAULT_POD_AGE_THRESHOLD_HOURS: i64 = 12;
const DEFAULT_REAPER_NAMESPACE: &str = "gitlab";
const DEFAULT_REAPER_INTERVAL_SECS: u64 = 600;
const REAPER_LABEL_KEY: &str = "pod";
const REAPER_LABEL_PREFIX: &str = "runner-";

/// Largest hour count a `chrono::Duration` can hold.
const MAX_AGE_HOURS: i64 = i64::MAX / 3_600_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {var} {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("credential namespace unknown: set POD_NAMESPACE or mount {path} ({source})")]
    MissingNamespace {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReaperConfig {
    pub namespace: String,
    /// Pods are listed with this label key as an existence selector.
    pub label_key: String,
    /// Only pods whose `label_key` value starts with this are reaped.
    pub label_prefix: String,
    pub max_age_hours: i64,
    pub interval: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub metrics_addr: SocketAddr,
    /// Namespace holding owner credential secrets.
    pub service_namespace: String,
    pub call_timeout: Duration,
    pub monitor_interval: Duration,
    pub reaper: ReaperConfig,
    /// When set, workspaces older than this many hours are deleted.
    pub namespace_max_age_hours: Option<i64>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(
            |key| std::env::var(key).ok(),
            Path::new(SERVICE_ACCOUNT_NAMESPACE_FILE),
        )
    }

    /// Build a config from `lookup`, reading the credential namespace from
    /// `namespace_file` when `POD_NAMESPACE` is not set.
    pub fn from_lookup<F>(lookup: F, namespace_file: &Path) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen_addr = parse_addr(&lookup, "LISTEN_ADDR", DEFAULT_LISTEN_ADDR)?;
        let metrics_addr = parse_addr(&lookup, "METRICS_ADDR", DEFAULT_METRICS_ADDR)?;

        let service_namespace = match lookup("POD_NAMESPACE").filter(|v| !v.trim().is_empty()) {
            Some(namespace) => namespace.trim().to_string(),
            None => std::fs::read_to_string(namespace_file)
                .map(|contents| contents.trim().to_string())
                .map_err(|source| ConfigError::MissingNamespace {
                    path: namespace_file.display().to_string(),
                    source,
                })?,
        };

        let call_timeout_secs: u64 =
            parse_number(&lookup, "CLUSTER_CALL_TIMEOUT_SECS", DEFAULT_CALL_TIMEOUT_SECS)?;

        // An unusable threshold falls back to the default rather than
        // stopping the service.
        let max_age_hours = match lookup("POD_AGE_THRESHOLD_HOURS") {
            Some(value) => parse_age_hours(&value).unwrap_or_else(|reason| {
                warn!(
                    "Ignoring invalid POD_AGE_THRESHOLD_HOURS {:?} ({}), using {}",
                    value, reason, DEFAULT_POD_AGE_THRESHOLD_HOURS
                );
                DEFAULT_POD_AGE_THRESHOLD_HOURS
            }),
            None => DEFAULT_POD_AGE_THRESHOLD_HOURS,
        };

        let reaper = ReaperConfig {
            namespace: lookup("REAPER_NAMESPACE")
                .unwrap_or_else(|| DEFAULT_REAPER_NAMESPACE.to_string()),
            label_key: REAPER_LABEL_KEY.to_string(),
            label_prefix: REAPER_LABEL_PREFIX.to_string(),
            max_age_hours,
            interval: Duration::from_secs(parse_number(
                &lookup,
                "REAPER_INTERVAL_SECS",
                DEFAULT_REAPER_INTERVAL_SECS,
            )?),
        };

        let namespace_max_age_hours = match lookup("ZOMBIE_NS_MAX_AGE_HOURS") {
            Some(value) => Some(parse_age_hours(&value).map_err(|reason| {
                ConfigError::Invalid {
                    var: "ZOMBIE_NS_MAX_AGE_HOURS",
                    value: value.clone(),
                    reason,
                }
            })?),
            None => None,
        };

        Ok(Self {
            listen_addr,
            metrics_addr,
            service_namespace,
            call_timeout: Duration::from_secs(call_timeout_secs),
            monitor_interval: MONITOR_INTERVAL,
            reaper,
            namespace_max_age_hours,
        })
    }
}

fn parse_addr<F>(lookup: &F, var: &'static str, default: &str) -> Result<SocketAddr, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(var).unwrap_or_else(|| default.to_string());
    value.trim().parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
        var,
        value,
        reason: e.to_string(),
    })
}

/// A positive hour count small enough to become a `chrono::Duration`.
fn parse_age_hours(value: &str) -> Result<i64, String> {
    let hours: i64 = value.trim().parse().map_err(|e: std::num::ParseIntError| e.to_string())?;
    if (1..=MAX_AGE_HOURS).contains(&hours) {
        Ok(hours)
    } else {
        Err(format!("must be between 1 and {}", MAX_AGE_HOURS))
    }
}

fn parse_number<F>(lookup: &F, var: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(value) => value.trim().parse().map_err(|e: std::num::ParseIntError| {
            ConfigError::Invalid {
                var,
                value,
                reason: e.to_string(),
            }
        }),
        None => Ok(default),
    }
}
