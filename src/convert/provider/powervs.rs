//! IBM Power VS: `PowerVSMachineProviderConfig` <-> `IBMPowerVSMachine` / `IBMPowerVSMachineTemplate`.

use serde::{Deserialize, Serialize};

use super::{MachinePlacement, SecretReference};
use crate::convert::ConversionError;

pub const MAPI_KIND: &str = "PowerVSMachineProviderConfig";

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerVsProviderConfig {
    #[serde(default)]
    pub service_instance: PowerVsResource,
    #[serde(default)]
    pub image: PowerVsResource,
    #[serde(default)]
    pub network: PowerVsResource,
    #[serde(default)]
    pub key_pair_name: String,
    #[serde(default)]
    pub system_type: String,
    #[serde(default)]
    pub processor_type: String,
    /// Integer or fractional core count, passed through untouched.
    #[serde(default)]
    pub processors: serde_json::Value,
    #[serde(rename = "memoryGiB", default)]
    pub memory_gib: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data_secret: Option<SecretReference>,
}

/// A Power VS resource identified either by ID or by name.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct PowerVsResource {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub r#type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerVsMachineSpec {
    #[serde(rename = "providerID", default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub service_instance: PowerVsReference,
    #[serde(default)]
    pub ssh_key: String,
    #[serde(default)]
    pub image: PowerVsReference,
    #[serde(default)]
    pub system_type: String,
    #[serde(default)]
    pub processor_type: String,
    #[serde(default)]
    pub processors: serde_json::Value,
    #[serde(rename = "memoryGiB", default)]
    pub memory_gib: i32,
    #[serde(default)]
    pub network: PowerVsReference,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct PowerVsReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

fn to_reference(resource: &PowerVsResource, field: &str) -> Result<PowerVsReference, ConversionError> {
    match resource.r#type.as_str() {
        "ID" => Ok(PowerVsReference {
            id: resource.id.clone(),
            name: None,
        }),
        "Name" => Ok(PowerVsReference {
            id: None,
            name: resource.name.clone(),
        }),
        "" if resource.id.is_none() && resource.name.is_none() => Ok(PowerVsReference::default()),
        other => Err(ConversionError::UnsupportedField(format!(
            "providerSpec.value.{}.type={}",
            field, other
        ))),
    }
}

fn to_resource(reference: &PowerVsReference) -> PowerVsResource {
    match (&reference.id, &reference.name) {
        (Some(id), _) => PowerVsResource {
            r#type: "ID".to_string(),
            id: Some(id.clone()),
            name: None,
        },
        (None, Some(name)) => PowerVsResource {
            r#type: "Name".to_string(),
            id: None,
            name: Some(name.clone()),
        },
        (None, None) => PowerVsResource::default(),
    }
}

pub fn from_mapi(
    config: &PowerVsProviderConfig,
) -> Result<(PowerVsMachineSpec, MachinePlacement), ConversionError> {
    if !(config.processors.is_null() || config.processors.is_number() || config.processors.is_string())
    {
        return Err(ConversionError::Malformed {
            what: "providerSpec.value.processors".to_string(),
            reason: "expected a number or string".to_string(),
        });
    }
    let out = PowerVsMachineSpec {
        provider_id: None,
        service_instance: to_reference(&config.service_instance, "serviceInstance")?,
        ssh_key: config.key_pair_name.clone(),
        image: to_reference(&config.image, "image")?,
        system_type: config.system_type.clone(),
        processor_type: config.processor_type.clone(),
        processors: config.processors.clone(),
        memory_gib: config.memory_gib,
        network: to_reference(&config.network, "network")?,
    };
    let placement = MachinePlacement {
        failure_domain: None,
        user_data_secret: config.user_data_secret.as_ref().map(|s| s.name.clone()),
    };
    Ok((out, placement))
}

pub fn to_mapi(spec: &PowerVsMachineSpec, placement: &MachinePlacement) -> PowerVsProviderConfig {
    PowerVsProviderConfig {
        service_instance: to_resource(&spec.service_instance),
        image: to_resource(&spec.image),
        network: to_resource(&spec.network),
        key_pair_name: spec.ssh_key.clone(),
        system_type: spec.system_type.clone(),
        processor_type: spec.processor_type.clone(),
        processors: spec.processors.clone(),
        memory_gib: spec.memory_gib,
        user_data_secret: placement
            .user_data_secret
            .clone()
            .map(|name| SecretReference { name }),
    }
}
