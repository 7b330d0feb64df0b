//! Field conversion between the Machine API and Cluster API models.
//!
//! Everything in this module is pure: no I/O and no clock reads, so every
//! function returns the same output for the same input. The controller
//! decides *when* to convert; this module only decides *what* the other
//! side should look like.

pub mod machine;
pub mod machineset;
pub mod provider;

use std::collections::BTreeMap;
use std::hash::Hasher;

use fnv::FnvHasher;
use thiserror::Error;

use crate::crd::constants::{
    CAPI_CLUSTER_NAME_LABEL, CAPI_PAUSED_ANNOTATION, CAPI_SET_NAME_LABEL, CONDITION_PAUSED,
    CONDITION_SYNCHRONIZED, INSTANCE_LABELS, MAPI_CLUSTER_LABEL, MAPI_MACHINESET_LABEL,
};
use crate::crd::{AuthoritativeApi, Condition};

pub use provider::{InfraSpec, MachinePlacement, Platform, ProviderStatus};

/// Errors raised while converting a resource.
///
/// These are always scoped to one object and are retried; they never stop
/// the controller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConversionError {
    #[error("providerSpec.value is missing or has no kind")]
    MissingProviderSpec,

    #[error("unsupported provider spec kind {0}")]
    UnsupportedProvider(String),

    #[error("provider spec kind {found} does not belong to platform {expected}")]
    PlatformMismatch { expected: Platform, found: String },

    #[error("malformed {what}: {reason}")]
    Malformed { what: String, reason: String },

    #[error("{0} cannot be represented on the other API")]
    UnsupportedField(String),

    #[error("missing required field {0}")]
    MissingField(String),
}

/// Cluster-wide facts every conversion needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversionContext {
    /// Infrastructure (cluster) name, used as the CAPI cluster name.
    pub infrastructure_name: String,
    pub platform: Platform,
    pub mapi_namespace: String,
    pub capi_namespace: String,
}

/// Direction of the last successful synchronization.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum SyncDirection {
    MapiToCapi,
    CapiToMapi,
}

impl SyncDirection {
    /// Direction implied by an authority: the authoritative side is the source.
    pub fn from_source(source: AuthoritativeApi) -> Option<Self> {
        match source {
            AuthoritativeApi::MachineApi => Some(SyncDirection::MapiToCapi),
            AuthoritativeApi::ClusterApi => Some(SyncDirection::CapiToMapi),
            AuthoritativeApi::Migrating => None,
        }
    }

    /// Message used on the `Synchronized` condition.
    pub fn message(self) -> &'static str {
        match self {
            SyncDirection::MapiToCapi => "Successfully synchronized MAPI to CAPI",
            SyncDirection::CapiToMapi => "Successfully synchronized CAPI to MAPI",
        }
    }

    /// Recover the direction from a previously written condition message.
    pub fn from_message(message: &str) -> Option<Self> {
        if message.ends_with("MAPI to CAPI") {
            Some(SyncDirection::MapiToCapi)
        } else if message.ends_with("CAPI to MAPI") {
            Some(SyncDirection::CapiToMapi)
        } else {
            None
        }
    }
}

impl std::fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncDirection::MapiToCapi => write!(f, "MAPI to CAPI"),
            SyncDirection::CapiToMapi => write!(f, "CAPI to MAPI"),
        }
    }
}

/// Whether a condition is owned by this controller and must not cross sides.
pub fn is_sync_private_condition(condition_type: &str) -> bool {
    condition_type == CONDITION_SYNCHRONIZED || condition_type == CONDITION_PAUSED
}

/// Conditions that may be copied to the other side.
pub fn portable_conditions(conditions: &[Condition]) -> Vec<Condition> {
    conditions
        .iter()
        .filter(|c| !is_sync_private_condition(&c.r#type))
        .cloned()
        .collect()
}

/// Translate MAPI object labels for a CAPI mirror.
///
/// Instance labels are dropped; the cluster and set labels are renamed.
pub fn labels_to_capi(
    labels: &BTreeMap<String, String>,
    infrastructure_name: &str,
) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> = labels
        .iter()
        .filter(|(k, _)| !INSTANCE_LABELS.contains(&k.as_str()))
        .filter(|(k, _)| k.as_str() != MAPI_CLUSTER_LABEL)
        .map(|(k, v)| {
            if k == MAPI_MACHINESET_LABEL {
                (CAPI_SET_NAME_LABEL.to_string(), v.clone())
            } else {
                (k.clone(), v.clone())
            }
        })
        .collect();
    out.insert(
        CAPI_CLUSTER_NAME_LABEL.to_string(),
        infrastructure_name.to_string(),
    );
    out
}

/// Translate CAPI object labels for a MAPI mirror.
pub fn labels_to_mapi(
    labels: &BTreeMap<String, String>,
    infrastructure_name: &str,
) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> = labels
        .iter()
        .filter(|(k, _)| k.as_str() != CAPI_CLUSTER_NAME_LABEL)
        .filter(|(k, _)| !INSTANCE_LABELS.contains(&k.as_str()))
        .map(|(k, v)| {
            if k == CAPI_SET_NAME_LABEL {
                (MAPI_MACHINESET_LABEL.to_string(), v.clone())
            } else {
                (k.clone(), v.clone())
            }
        })
        .collect();
    out.insert(
        MAPI_CLUSTER_LABEL.to_string(),
        infrastructure_name.to_string(),
    );
    out
}

/// Annotations that never cross sides.
pub fn portable_annotations(annotations: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    annotations
        .iter()
        .filter(|(k, _)| k.as_str() != CAPI_PAUSED_ANNOTATION)
        .filter(|(k, _)| !k.starts_with("kubectl.kubernetes.io/"))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// 64-bit FNV-1a folded to 32 bits.
pub fn spec_hash(bytes: &[u8]) -> u32 {
    let mut hasher = FnvHasher::default();
    hasher.write(bytes);
    let hash = hasher.finish();
    ((hash >> 32) ^ hash) as u32
}
