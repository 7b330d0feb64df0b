//! vSphere: `VSphereMachineProviderSpec` <-> `VSphereMachine` / `VSphereMachineTemplate`.
//!
//! vSphere has no zone notion at the machine level; the workspace fields map
//! onto the flat CAPI spec.

use serde::{Deserialize, Serialize};

use super::MachinePlacement;
use crate::convert::ConversionError;

pub const MAPI_KIND: &str = "VSphereMachineProviderSpec";

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VSphereProviderSpec {
    #[serde(default)]
    pub template: String,
    #[serde(rename = "numCPUs", default)]
    pub num_cpus: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_cores_per_socket: Option<i32>,
    #[serde(rename = "memoryMiB", default)]
    pub memory_mib: i64,
    #[serde(rename = "diskGiB", default)]
    pub disk_gib: i32,
    #[serde(default)]
    pub network: NetworkSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<Workspace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data_secret: Option<super::SecretReference>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct NetworkSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<NetworkDevice>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkDevice {
    pub network_name: String,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub datacenter: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub folder: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub datastore: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_pool: String,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VSphereMachineSpec {
    #[serde(rename = "providerID", default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub template: String,
    #[serde(rename = "numCPUs", default)]
    pub num_cpus: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_cores_per_socket: Option<i32>,
    #[serde(rename = "memoryMiB", default)]
    pub memory_mib: i64,
    #[serde(rename = "diskGiB", default)]
    pub disk_gib: i32,
    #[serde(default)]
    pub network: NetworkSpec,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub datacenter: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub folder: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub datastore: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_pool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone_mode: Option<String>,
}

pub fn from_mapi(
    spec: &VSphereProviderSpec,
) -> Result<(VSphereMachineSpec, MachinePlacement), ConversionError> {
    if spec.template.is_empty() {
        return Err(ConversionError::MissingField(
            "providerSpec.value.template".to_string(),
        ));
    }
    let workspace = spec.workspace.clone().unwrap_or_default();
    let out = VSphereMachineSpec {
        provider_id: None,
        template: spec.template.clone(),
        num_cpus: spec.num_cpus,
        num_cores_per_socket: spec.num_cores_per_socket,
        memory_mib: spec.memory_mib,
        disk_gib: spec.disk_gib,
        network: spec.network.clone(),
        server: workspace.server,
        datacenter: workspace.datacenter,
        folder: workspace.folder,
        datastore: workspace.datastore,
        resource_pool: workspace.resource_pool,
        clone_mode: spec.clone_mode.clone(),
    };
    let placement = MachinePlacement {
        failure_domain: None,
        user_data_secret: spec.user_data_secret.as_ref().map(|s| s.name.clone()),
    };
    Ok((out, placement))
}

pub fn to_mapi(spec: &VSphereMachineSpec, placement: &MachinePlacement) -> VSphereProviderSpec {
    let workspace = Workspace {
        server: spec.server.clone(),
        datacenter: spec.datacenter.clone(),
        folder: spec.folder.clone(),
        datastore: spec.datastore.clone(),
        resource_pool: spec.resource_pool.clone(),
    };
    VSphereProviderSpec {
        template: spec.template.clone(),
        num_cpus: spec.num_cpus,
        num_cores_per_socket: spec.num_cores_per_socket,
        memory_mib: spec.memory_mib,
        disk_gib: spec.disk_gib,
        network: spec.network.clone(),
        workspace: (workspace != Workspace::default()).then_some(workspace),
        clone_mode: spec.clone_mode.clone(),
        user_data_secret: placement
            .user_data_secret
            .clone()
            .map(|name| super::SecretReference { name }),
    }
}
