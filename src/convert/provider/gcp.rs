//! GCP: `GCPMachineProviderSpec` <-> `GCPMachine` / `GCPMachineTemplate`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::MachinePlacement;
use crate::convert::ConversionError;

pub const MAPI_KIND: &str = "GCPMachineProviderSpec";

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GcpProviderSpec {
    #[serde(default)]
    pub machine_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub zone: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<GcpDisk>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub network_interfaces: Vec<GcpNetworkInterface>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_accounts: Vec<GcpServiceAccount>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data_secret: Option<super::SecretReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preemptible: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_host_maintenance: Option<String>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GcpDisk {
    #[serde(default)]
    pub auto_delete: bool,
    #[serde(default)]
    pub boot: bool,
    #[serde(default)]
    pub size_gb: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub r#type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GcpNetworkInterface {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub network: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subnetwork: String,
    #[serde(rename = "publicIP", default)]
    pub public_ip: bool,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct GcpServiceAccount {
    pub email: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GcpMachineSpec {
    #[serde(rename = "providerID", default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub instance_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_network_tags: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub root_device_size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_device_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_disks: Vec<GcpAttachedDisk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<GcpServiceAccount>,
    #[serde(rename = "publicIP", default, skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preemptible: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_host_maintenance: Option<String>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GcpAttachedDisk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
}

/// `us-central1-a` -> `us-central1`
pub fn region_from_zone(zone: &str) -> String {
    zone.rsplit_once('-')
        .map(|(region, _)| region.to_string())
        .unwrap_or_default()
}

pub fn from_mapi(
    spec: &GcpProviderSpec,
) -> Result<(GcpMachineSpec, MachinePlacement), ConversionError> {
    if spec.network_interfaces.len() > 1 {
        return Err(ConversionError::UnsupportedField(
            "providerSpec.value.networkInterfaces (more than one)".to_string(),
        ));
    }
    if spec.service_accounts.len() > 1 {
        return Err(ConversionError::UnsupportedField(
            "providerSpec.value.serviceAccounts (more than one)".to_string(),
        ));
    }
    let boot = spec.disks.iter().find(|d| d.boot);
    let nic = spec.network_interfaces.first();

    let out = GcpMachineSpec {
        provider_id: None,
        instance_type: spec.machine_type.clone(),
        subnet: nic
            .map(|n| n.subnetwork.clone())
            .filter(|s| !s.is_empty()),
        image: boot.map(|d| d.image.clone()).filter(|s| !s.is_empty()),
        additional_network_tags: spec.tags.clone(),
        additional_labels: spec.labels.clone(),
        root_device_size: boot.map(|d| d.size_gb).unwrap_or_default(),
        root_device_type: boot.map(|d| d.r#type.clone()).filter(|s| !s.is_empty()),
        additional_disks: spec
            .disks
            .iter()
            .filter(|d| !d.boot)
            .map(|d| GcpAttachedDisk {
                device_type: (!d.r#type.is_empty()).then(|| d.r#type.clone()),
                size: (d.size_gb > 0).then_some(d.size_gb),
            })
            .collect(),
        service_account: spec.service_accounts.first().cloned(),
        public_ip: nic.map(|n| n.public_ip),
        preemptible: spec.preemptible,
        on_host_maintenance: spec.on_host_maintenance.clone(),
    };
    let placement = MachinePlacement {
        failure_domain: (!spec.zone.is_empty()).then(|| spec.zone.clone()),
        user_data_secret: spec.user_data_secret.as_ref().map(|s| s.name.clone()),
    };
    Ok((out, placement))
}

pub fn to_mapi(spec: &GcpMachineSpec, placement: &MachinePlacement) -> GcpProviderSpec {
    let zone = placement.failure_domain.clone().unwrap_or_default();
    let mut disks = vec![GcpDisk {
        auto_delete: true,
        boot: true,
        size_gb: spec.root_device_size,
        r#type: spec.root_device_type.clone().unwrap_or_default(),
        image: spec.image.clone().unwrap_or_default(),
    }];
    disks.extend(spec.additional_disks.iter().map(|d| GcpDisk {
        auto_delete: true,
        boot: false,
        size_gb: d.size.unwrap_or_default(),
        r#type: d.device_type.clone().unwrap_or_default(),
        image: String::new(),
    }));

    GcpProviderSpec {
        machine_type: spec.instance_type.clone(),
        region: region_from_zone(&zone),
        zone,
        disks,
        network_interfaces: spec
            .subnet
            .iter()
            .map(|subnet| GcpNetworkInterface {
                network: String::new(),
                subnetwork: subnet.clone(),
                public_ip: spec.public_ip.unwrap_or_default(),
            })
            .collect(),
        service_accounts: spec.service_account.iter().cloned().collect(),
        tags: spec.additional_network_tags.clone(),
        labels: spec.additional_labels.clone(),
        user_data_secret: placement
            .user_data_secret
            .clone()
            .map(|name| super::SecretReference { name }),
        preemptible: spec.preemptible,
        on_host_maintenance: spec.on_host_maintenance.clone(),
    }
}
