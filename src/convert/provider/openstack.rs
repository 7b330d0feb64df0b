//! OpenStack: `OpenstackProviderSpec` <-> `OpenStackMachine` / `OpenStackMachineTemplate`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{MachinePlacement, SecretReference};
use crate::convert::ConversionError;

pub const MAPI_KIND: &str = "OpenstackProviderSpec";

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenstackProviderSpec {
    #[serde(default)]
    pub flavor: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub availability_zone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_group_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_groups: Vec<SecurityGroupParam>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<NetworkParam>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub server_metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_volume: Option<RootVolume>,
    #[serde(default)]
    pub trunk: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data_secret: Option<SecretReference>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct SecurityGroupParam {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct NetworkParam {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RootVolume {
    #[serde(default)]
    pub disk_size: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_type: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenStackMachineSpec {
    #[serde(rename = "providerID", default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(rename = "instanceID", default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub flavor: String,
    #[serde(default)]
    pub image: ImageParam,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_group: Option<NameFilterParam>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_groups: Vec<NameFilterParam>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortOpts>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub server_metadata: Vec<ServerMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_volume: Option<CapiRootVolume>,
    #[serde(default)]
    pub trunk: bool,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct ImageParam {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<NameFilter>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct NameFilter {
    pub name: String,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct NameFilterParam {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<NameFilter>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct PortOpts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkId>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct NetworkId {
    pub id: String,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct ServerMetadata {
    pub key: String,
    pub value: String,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapiRootVolume {
    #[serde(rename = "sizeGiB", default)]
    pub size_gib: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
}

fn name_filter(name: String) -> NameFilterParam {
    NameFilterParam {
        filter: Some(NameFilter { name }),
    }
}

pub fn from_mapi(
    spec: &OpenstackProviderSpec,
) -> Result<(OpenStackMachineSpec, MachinePlacement), ConversionError> {
    if spec.image.is_empty() && spec.root_volume.is_none() {
        return Err(ConversionError::MissingField(
            "providerSpec.value.image".to_string(),
        ));
    }

    let mut security_groups = Vec::with_capacity(spec.security_groups.len());
    for sg in &spec.security_groups {
        let name = sg.name.clone().ok_or_else(|| {
            ConversionError::UnsupportedField(
                "providerSpec.value.securityGroups (selection by filter)".to_string(),
            )
        })?;
        security_groups.push(name_filter(name));
    }

    let out = OpenStackMachineSpec {
        provider_id: None,
        instance_id: None,
        flavor: spec.flavor.clone(),
        image: ImageParam {
            filter: (!spec.image.is_empty()).then(|| NameFilter {
                name: spec.image.clone(),
            }),
        },
        ssh_key_name: spec.key_name.clone(),
        server_group: spec.server_group_name.clone().map(name_filter),
        security_groups,
        ports: spec
            .networks
            .iter()
            .filter_map(|n| n.uuid.clone())
            .map(|id| PortOpts {
                network: Some(NetworkId { id }),
            })
            .collect(),
        tags: spec.tags.clone(),
        server_metadata: spec
            .server_metadata
            .iter()
            .map(|(key, value)| ServerMetadata {
                key: key.clone(),
                value: value.clone(),
            })
            .collect(),
        root_volume: spec.root_volume.as_ref().map(|v| CapiRootVolume {
            size_gib: v.disk_size,
            r#type: v.volume_type.clone(),
        }),
        trunk: spec.trunk,
    };
    let placement = MachinePlacement {
        failure_domain: (!spec.availability_zone.is_empty())
            .then(|| spec.availability_zone.clone()),
        user_data_secret: spec.user_data_secret.as_ref().map(|s| s.name.clone()),
    };
    Ok((out, placement))
}

pub fn to_mapi(spec: &OpenStackMachineSpec, placement: &MachinePlacement) -> OpenstackProviderSpec {
    let filter_name = |p: &NameFilterParam| p.filter.as_ref().map(|f| f.name.clone());
    OpenstackProviderSpec {
        flavor: spec.flavor.clone(),
        image: spec
            .image
            .filter
            .as_ref()
            .map(|f| f.name.clone())
            .unwrap_or_default(),
        key_name: spec.ssh_key_name.clone(),
        availability_zone: placement.failure_domain.clone().unwrap_or_default(),
        server_group_name: spec.server_group.as_ref().and_then(filter_name),
        security_groups: spec
            .security_groups
            .iter()
            .map(|sg| SecurityGroupParam {
                name: filter_name(sg),
            })
            .collect(),
        networks: spec
            .ports
            .iter()
            .filter_map(|p| p.network.as_ref())
            .map(|n| NetworkParam {
                uuid: Some(n.id.clone()),
            })
            .collect(),
        tags: spec.tags.clone(),
        server_metadata: spec
            .server_metadata
            .iter()
            .map(|m| (m.key.clone(), m.value.clone()))
            .collect(),
        root_volume: spec.root_volume.as_ref().map(|v| RootVolume {
            disk_size: v.size_gib,
            volume_type: v.r#type.clone(),
        }),
        trunk: spec.trunk,
        user_data_secret: placement
            .user_data_secret
            .clone()
            .map(|name| SecretReference { name }),
    }
}
