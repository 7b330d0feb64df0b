//! Operator configuration, read once from the environment at startup.

use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::convert::{ConversionContext, Platform};

/// Default namespace of the Machine API objects.
pub const DEFAULT_MAPI_NAMESPACE: &str = "openshift-machine-api";
/// Default namespace of the Cluster API objects.
pub const DEFAULT_CAPI_NAMESPACE: &str = "openshift-cluster-api";
/// How long a mirror may lag before it is reported as diverged.
pub const DEFAULT_DIVERGENCE_DEADLINE_SECS: u64 = 300;
/// Attempts per write when the API server reports a conflict.
pub const DEFAULT_CONFLICT_RETRIES: u32 = 5;

/// Configuration errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Synchronization settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncConfig {
    /// Namespace holding MAPI Machines and MachineSets.
    pub mapi_namespace: String,
    /// Namespace holding CAPI Machines, MachineSets and infrastructure objects.
    pub capi_namespace: String,
    /// Cluster infrastructure name; becomes the CAPI cluster name.
    pub infrastructure_name: String,
    /// Cloud platform of the cluster.
    pub platform: Platform,
    /// Lag after which an unconverged pair is reported as diverged.
    pub divergence_deadline: Duration,
    /// Attempts per write on optimistic-concurrency conflicts.
    pub conflict_retries: u32,
}

impl SyncConfig {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary lookup (used by tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mapi_namespace = lookup("MAPI_NAMESPACE").unwrap_or_else(|| {
            warn!(default = DEFAULT_MAPI_NAMESPACE, "MAPI_NAMESPACE not set, using default");
            DEFAULT_MAPI_NAMESPACE.to_string()
        });
        let capi_namespace = lookup("CAPI_NAMESPACE").unwrap_or_else(|| {
            warn!(default = DEFAULT_CAPI_NAMESPACE, "CAPI_NAMESPACE not set, using default");
            DEFAULT_CAPI_NAMESPACE.to_string()
        });

        let infrastructure_name = lookup("INFRASTRUCTURE_NAME")
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("INFRASTRUCTURE_NAME"))?;

        let platform_raw = lookup("PLATFORM").ok_or(ConfigError::Missing("PLATFORM"))?;
        let platform = platform_raw
            .parse::<Platform>()
            .map_err(|reason| ConfigError::Invalid {
                var: "PLATFORM",
                value: platform_raw.clone(),
                reason,
            })?;

        let divergence_deadline = Duration::from_secs(parse_or(
            &lookup,
            "SYNC_DIVERGENCE_DEADLINE_SECS",
            DEFAULT_DIVERGENCE_DEADLINE_SECS,
        )?);
        let conflict_retries = parse_or(&lookup, "SYNC_CONFLICT_RETRIES", DEFAULT_CONFLICT_RETRIES)?;
        if conflict_retries == 0 {
            return Err(ConfigError::Invalid {
                var: "SYNC_CONFLICT_RETRIES",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            mapi_namespace,
            capi_namespace,
            infrastructure_name,
            platform,
            divergence_deadline,
            conflict_retries,
        })
    }

    /// The cluster facts the field converter needs.
    pub fn conversion_context(&self) -> ConversionContext {
        ConversionContext {
            infrastructure_name: self.infrastructure_name.clone(),
            platform: self.platform,
            mapi_namespace: self.mapi_namespace.clone(),
            capi_namespace: self.capi_namespace.clone(),
        }
    }
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(value) => value.parse::<T>().map_err(|e| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}
