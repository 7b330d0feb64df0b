//! AWS: `AWSMachineProviderConfig` <-> `AWSMachine` / `AWSMachineTemplate`.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use super::{MachinePlacement, SecretReference};
use crate::convert::ConversionError;

pub const MAPI_KIND: &str = "AWSMachineProviderConfig";

/// `aws:///<zone>/<instance-id>`
static PROVIDER_ID_RE: LazyLock<Option<regex::Regex>> =
    LazyLock::new(|| regex::Regex::new(r"^aws:///[a-z0-9-]*/(i-[0-9a-z]+)$").ok());

// === MAPI side ===

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsProviderConfig {
    #[serde(default)]
    pub ami: AwsResourceReference,
    #[serde(default)]
    pub instance_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<TagSpecification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iam_instance_profile: Option<AwsResourceReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data_secret: Option<SecretReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
    #[serde(default)]
    pub placement: Placement,
    #[serde(default)]
    pub subnet: AwsResourceReference,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_groups: Vec<AwsResourceReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub block_devices: Vec<BlockDeviceMapping>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub load_balancers: Vec<LoadBalancerReference>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct AwsResourceReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct TagSpecification {
    pub name: String,
    pub value: String,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub availability_zone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenancy: Option<String>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDeviceMapping {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ebs: Option<EbsBlockDevice>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EbsBlockDevice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iops: Option<i64>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct LoadBalancerReference {
    pub name: String,
    pub r#type: String,
}

// === CAPI side ===

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsMachineSpec {
    #[serde(rename = "providerID", default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(rename = "instanceID", default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub ami: AwsResourceReference,
    #[serde(default)]
    pub instance_type: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_tags: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iam_instance_profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet: Option<AwsResourceReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_security_groups: Vec<AwsResourceReference>,
    #[serde(rename = "publicIP", default, skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenancy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_volume: Option<Volume>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub non_root_volumes: Vec<Volume>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(default)]
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iops: Option<i64>,
}

/// Extract the EC2 instance id from a provider id.
pub fn instance_id_from_provider_id(provider_id: &str) -> Option<String> {
    PROVIDER_ID_RE
        .as_ref()?
        .captures(provider_id)?
        .get(1)
        .map(|m| m.as_str().to_string())
}

/// Strip the zone letter: `us-east-1a` -> `us-east-1`.
pub fn region_from_zone(zone: &str) -> String {
    zone.trim_end_matches(|c: char| c.is_ascii_lowercase())
        .to_string()
}

pub fn from_mapi(
    config: &AwsProviderConfig,
) -> Result<(AwsMachineSpec, MachinePlacement), ConversionError> {
    if !config.load_balancers.is_empty() {
        return Err(ConversionError::UnsupportedField(
            "providerSpec.value.loadBalancers".to_string(),
        ));
    }

    let mut root_volume = None;
    let mut non_root_volumes = Vec::new();
    for device in &config.block_devices {
        let ebs = device.ebs.clone().unwrap_or_default();
        let volume = Volume {
            device_name: device.device_name.clone(),
            size: ebs.volume_size.unwrap_or_default(),
            r#type: ebs.volume_type,
            encrypted: ebs.encrypted,
            iops: ebs.iops,
        };
        if device.device_name.is_none() {
            if root_volume.is_some() {
                return Err(ConversionError::UnsupportedField(
                    "providerSpec.value.blockDevices (more than one root volume)".to_string(),
                ));
            }
            root_volume = Some(volume);
        } else {
            non_root_volumes.push(volume);
        }
    }

    let spec = AwsMachineSpec {
        provider_id: None,
        instance_id: None,
        ami: config.ami.clone(),
        instance_type: config.instance_type.clone(),
        additional_tags: config
            .tags
            .iter()
            .map(|t| (t.name.clone(), t.value.clone()))
            .collect(),
        iam_instance_profile: config.iam_instance_profile.as_ref().and_then(|p| p.id.clone()),
        ssh_key_name: config.key_name.clone(),
        subnet: (config.subnet.id.is_some()).then(|| config.subnet.clone()),
        additional_security_groups: config.security_groups.clone(),
        public_ip: config.public_ip,
        tenancy: config.placement.tenancy.clone(),
        root_volume,
        non_root_volumes,
    };
    let placement = MachinePlacement {
        failure_domain: non_empty(&config.placement.availability_zone),
        user_data_secret: config.user_data_secret.as_ref().map(|s| s.name.clone()),
    };
    Ok((spec, placement))
}

pub fn to_mapi(spec: &AwsMachineSpec, placement: &MachinePlacement) -> AwsProviderConfig {
    let zone = placement.failure_domain.clone().unwrap_or_default();
    let mut block_devices: Vec<BlockDeviceMapping> = spec
        .root_volume
        .iter()
        .chain(spec.non_root_volumes.iter())
        .map(|v| BlockDeviceMapping {
            device_name: v.device_name.clone(),
            ebs: Some(EbsBlockDevice {
                volume_size: (v.size > 0).then_some(v.size),
                volume_type: v.r#type.clone(),
                encrypted: v.encrypted,
                iops: v.iops,
            }),
        })
        .collect();
    // Root device first, matching how the installer writes them.
    block_devices.sort_by_key(|d| d.device_name.is_some());

    AwsProviderConfig {
        ami: spec.ami.clone(),
        instance_type: spec.instance_type.clone(),
        tags: spec
            .additional_tags
            .iter()
            .map(|(name, value)| TagSpecification {
                name: name.clone(),
                value: value.clone(),
            })
            .collect(),
        iam_instance_profile: spec
            .iam_instance_profile
            .clone()
            .map(|id| AwsResourceReference { id: Some(id) }),
        user_data_secret: placement
            .user_data_secret
            .clone()
            .map(|name| SecretReference { name }),
        key_name: spec.ssh_key_name.clone(),
        placement: Placement {
            region: region_from_zone(&zone),
            availability_zone: zone,
            tenancy: spec.tenancy.clone(),
        },
        subnet: spec.subnet.clone().unwrap_or_default(),
        security_groups: spec.additional_security_groups.clone(),
        public_ip: spec.public_ip,
        block_devices,
        load_balancers: Vec::new(),
    }
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}
