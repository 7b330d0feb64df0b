//! Small shapes shared by both API families.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Which API family is the source of truth for a resource.
///
/// `spec.authoritativeAPI` accepts only `MachineAPI` and `ClusterAPI`;
/// `Migrating` appears in `status.authoritativeAPI` while authority flips.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum AuthoritativeApi {
    #[serde(rename = "MachineAPI")]
    MachineApi,
    #[serde(rename = "ClusterAPI")]
    ClusterApi,
    Migrating,
}

impl AuthoritativeApi {
    /// The other API family. `Migrating` has no opposite and maps to itself.
    pub fn opposite(self) -> Self {
        match self {
            AuthoritativeApi::MachineApi => AuthoritativeApi::ClusterApi,
            AuthoritativeApi::ClusterApi => AuthoritativeApi::MachineApi,
            AuthoritativeApi::Migrating => AuthoritativeApi::Migrating,
        }
    }
}

impl std::fmt::Display for AuthoritativeApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthoritativeApi::MachineApi => write!(f, "MachineAPI"),
            AuthoritativeApi::ClusterApi => write!(f, "ClusterAPI"),
            AuthoritativeApi::Migrating => write!(f, "Migrating"),
        }
    }
}

impl std::str::FromStr for AuthoritativeApi {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MachineAPI" => Ok(AuthoritativeApi::MachineApi),
            "ClusterAPI" => Ok(AuthoritativeApi::ClusterApi),
            "Migrating" => Ok(AuthoritativeApi::Migrating),
            _ => Err(format!("Unknown authoritativeAPI value: {}", s)),
        }
    }
}

/// An address reported for a machine.
///
/// The type is kept as an opaque tag: CAPI and Kubernetes node address types
/// spell the same values and are never reinterpreted.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineAddress {
    pub r#type: String,
    pub address: String,
}

/// Labels and annotations carried by a template or propagated to a node.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetaLite {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl ObjectMetaLite {
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty() && self.annotations.is_empty()
    }
}

/// Label selector (matchLabels only; expressions are not used by machine sets here).
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
}
