//! Provider-specific payloads.
//!
//! The MAPI `providerSpec.value` is an opaque blob keyed by its embedded
//! `kind`. It is decoded into [`InfraSpec`], a tagged union with one typed
//! variant per supported platform. Unknown kinds fail closed.

pub mod aws;
pub mod gcp;
pub mod openstack;
pub mod powervs;
pub mod vsphere;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ConversionError;

/// Cloud platform the cluster runs on.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Platform {
    Aws,
    Gcp,
    VSphere,
    OpenStack,
    PowerVs,
}

impl Platform {
    pub const ALL: [Platform; 5] = [
        Platform::Aws,
        Platform::Gcp,
        Platform::VSphere,
        Platform::OpenStack,
        Platform::PowerVs,
    ];

    /// `kind` of the MAPI provider spec blob.
    pub fn mapi_provider_kind(self) -> &'static str {
        match self {
            Platform::Aws => aws::MAPI_KIND,
            Platform::Gcp => gcp::MAPI_KIND,
            Platform::VSphere => vsphere::MAPI_KIND,
            Platform::OpenStack => openstack::MAPI_KIND,
            Platform::PowerVs => powervs::MAPI_KIND,
        }
    }

    /// `apiVersion` of the MAPI provider spec blob.
    pub fn mapi_provider_api_version(self) -> &'static str {
        match self {
            Platform::OpenStack => "machine.openshift.io/v1alpha1",
            Platform::PowerVs => "machine.openshift.io/v1",
            _ => "machine.openshift.io/v1beta1",
        }
    }

    /// `kind` of the infrastructure machine object.
    pub fn infra_machine_kind(self) -> &'static str {
        match self {
            Platform::Aws => "AWSMachine",
            Platform::Gcp => "GCPMachine",
            Platform::VSphere => "VSphereMachine",
            Platform::OpenStack => "OpenStackMachine",
            Platform::PowerVs => "IBMPowerVSMachine",
        }
    }

    /// `kind` of the infrastructure machine template.
    pub fn infra_template_kind(self) -> String {
        format!("{}Template", self.infra_machine_kind())
    }

    /// Field of the infrastructure status carrying the instance state, if any.
    pub fn instance_state_field(self) -> Option<&'static str> {
        match self {
            Platform::Aws | Platform::OpenStack | Platform::PowerVs => Some("instanceState"),
            Platform::Gcp => Some("instanceStatus"),
            Platform::VSphere => None,
        }
    }

    fn from_mapi_kind(kind: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.mapi_provider_kind() == kind)
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Aws => write!(f, "AWS"),
            Platform::Gcp => write!(f, "GCP"),
            Platform::VSphere => write!(f, "VSphere"),
            Platform::OpenStack => write!(f, "OpenStack"),
            Platform::PowerVs => write!(f, "PowerVS"),
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "aws" => Ok(Platform::Aws),
            "gcp" => Ok(Platform::Gcp),
            "vsphere" => Ok(Platform::VSphere),
            "openstack" => Ok(Platform::OpenStack),
            "powervs" => Ok(Platform::PowerVs),
            _ => Err(format!("Unsupported platform: {}", s)),
        }
    }
}

/// Machine-level fields that live in the provider blob on MAPI but on the
/// CAPI Machine itself.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MachinePlacement {
    /// Availability zone / failure domain.
    pub failure_domain: Option<String>,
    /// Secret holding the bootstrap user data.
    pub user_data_secret: Option<String>,
}

/// Reference to a secret in the same namespace.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct SecretReference {
    pub name: String,
}

/// Typed provider spec, one variant per platform.
#[derive(Clone, Debug, PartialEq)]
pub enum InfraSpec {
    Aws(aws::AwsMachineSpec),
    Gcp(gcp::GcpMachineSpec),
    VSphere(vsphere::VSphereMachineSpec),
    OpenStack(openstack::OpenStackMachineSpec),
    PowerVs(powervs::PowerVsMachineSpec),
}

impl InfraSpec {
    pub fn platform(&self) -> Platform {
        match self {
            InfraSpec::Aws(_) => Platform::Aws,
            InfraSpec::Gcp(_) => Platform::Gcp,
            InfraSpec::VSphere(_) => Platform::VSphere,
            InfraSpec::OpenStack(_) => Platform::OpenStack,
            InfraSpec::PowerVs(_) => Platform::PowerVs,
        }
    }

    /// Decode a MAPI provider spec blob.
    ///
    /// The blob's `kind` must belong to `expected`; a blob for another
    /// platform, or one without a recognised kind, is rejected.
    pub fn from_provider_spec(
        value: &Value,
        expected: Platform,
    ) -> Result<(Self, MachinePlacement), ConversionError> {
        let kind = value
            .get("kind")
            .and_then(Value::as_str)
            .ok_or(ConversionError::MissingProviderSpec)?;
        let platform = Platform::from_mapi_kind(kind)
            .ok_or_else(|| ConversionError::UnsupportedProvider(kind.to_string()))?;
        if platform != expected {
            return Err(ConversionError::PlatformMismatch {
                expected,
                found: kind.to_string(),
            });
        }

        match platform {
            Platform::Aws => {
                let (spec, placement) = aws::from_mapi(&decode(value, aws::MAPI_KIND)?)?;
                Ok((InfraSpec::Aws(spec), placement))
            }
            Platform::Gcp => {
                let (spec, placement) = gcp::from_mapi(&decode(value, gcp::MAPI_KIND)?)?;
                Ok((InfraSpec::Gcp(spec), placement))
            }
            Platform::VSphere => {
                let (spec, placement) = vsphere::from_mapi(&decode(value, vsphere::MAPI_KIND)?)?;
                Ok((InfraSpec::VSphere(spec), placement))
            }
            Platform::OpenStack => {
                let (spec, placement) =
                    openstack::from_mapi(&decode(value, openstack::MAPI_KIND)?)?;
                Ok((InfraSpec::OpenStack(spec), placement))
            }
            Platform::PowerVs => {
                let (spec, placement) = powervs::from_mapi(&decode(value, powervs::MAPI_KIND)?)?;
                Ok((InfraSpec::PowerVs(spec), placement))
            }
        }
    }

    /// Encode back into a MAPI provider spec blob.
    pub fn to_provider_spec(&self, placement: &MachinePlacement) -> Result<Value, ConversionError> {
        let mut value = match self {
            InfraSpec::Aws(spec) => encode(&aws::to_mapi(spec, placement))?,
            InfraSpec::Gcp(spec) => encode(&gcp::to_mapi(spec, placement))?,
            InfraSpec::VSphere(spec) => encode(&vsphere::to_mapi(spec, placement))?,
            InfraSpec::OpenStack(spec) => encode(&openstack::to_mapi(spec, placement))?,
            InfraSpec::PowerVs(spec) => encode(&powervs::to_mapi(spec, placement))?,
        };
        if let Some(obj) = value.as_object_mut() {
            obj.insert(
                "apiVersion".to_string(),
                Value::String(self.platform().mapi_provider_api_version().to_string()),
            );
            obj.insert(
                "kind".to_string(),
                Value::String(self.platform().mapi_provider_kind().to_string()),
            );
        }
        Ok(value)
    }

    /// Decode the `spec` of an infrastructure machine or template.
    pub fn from_infra_spec(platform: Platform, value: &Value) -> Result<Self, ConversionError> {
        let what = platform.infra_machine_kind();
        Ok(match platform {
            Platform::Aws => InfraSpec::Aws(decode(value, what)?),
            Platform::Gcp => InfraSpec::Gcp(decode(value, what)?),
            Platform::VSphere => InfraSpec::VSphere(decode(value, what)?),
            Platform::OpenStack => InfraSpec::OpenStack(decode(value, what)?),
            Platform::PowerVs => InfraSpec::PowerVs(decode(value, what)?),
        })
    }

    /// Encode as the `spec` of an infrastructure machine.
    pub fn to_infra_spec(&self) -> Result<Value, ConversionError> {
        match self {
            InfraSpec::Aws(spec) => encode(spec),
            InfraSpec::Gcp(spec) => encode(spec),
            InfraSpec::VSphere(spec) => encode(spec),
            InfraSpec::OpenStack(spec) => encode(spec),
            InfraSpec::PowerVs(spec) => encode(spec),
        }
    }

    /// Drop everything that identifies one concrete cloud instance.
    pub fn clear_instance_fields(&mut self) {
        match self {
            InfraSpec::Aws(spec) => {
                spec.provider_id = None;
                spec.instance_id = None;
            }
            InfraSpec::Gcp(spec) => spec.provider_id = None,
            InfraSpec::VSphere(spec) => spec.provider_id = None,
            InfraSpec::OpenStack(spec) => {
                spec.provider_id = None;
                spec.instance_id = None;
            }
            InfraSpec::PowerVs(spec) => spec.provider_id = None,
        }
    }
}

/// Instance-level provider status shared by every MAPI provider.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_state: Option<String>,
}

impl ProviderStatus {
    /// Parse a raw MAPI `status.providerStatus` blob.
    ///
    /// A missing blob is an empty status; anything that is not an object
    /// with string fields is malformed.
    pub fn from_blob(blob: Option<&Value>) -> Result<Self, ConversionError> {
        match blob {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(value @ Value::Object(_)) => decode(value, "providerStatus"),
            Some(other) => Err(ConversionError::Malformed {
                what: "providerStatus".to_string(),
                reason: format!("expected an object, got {}", json_type(other)),
            }),
        }
    }

    /// The infrastructure status patch carrying the instance state.
    pub fn to_infra_status(&self, platform: Platform) -> Option<Value> {
        let field = platform.instance_state_field()?;
        let state = self.instance_state.as_ref()?;
        Some(serde_json::json!({ field: state }))
    }

    /// Rebuild the MAPI provider status from an infrastructure object.
    pub fn from_infra(platform: Platform, spec: &InfraSpec, infra_status: Option<&Value>) -> Self {
        let instance_state = platform
            .instance_state_field()
            .and_then(|field| infra_status?.get(field)?.as_str())
            .map(str::to_string);
        let instance_id = match spec {
            InfraSpec::Aws(s) => s
                .instance_id
                .clone()
                .or_else(|| s.provider_id.as_deref().and_then(aws::instance_id_from_provider_id)),
            InfraSpec::OpenStack(s) => s.instance_id.clone(),
            _ => None,
        };
        Self {
            instance_id,
            instance_state,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.instance_id.is_none() && self.instance_state.is_none()
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: &Value, what: &str) -> Result<T, ConversionError> {
    serde_json::from_value(value.clone()).map_err(|e| ConversionError::Malformed {
        what: what.to_string(),
        reason: e.to_string(),
    })
}

fn encode<T: Serialize>(value: &T) -> Result<Value, ConversionError> {
    serde_json::to_value(value).map_err(|e| ConversionError::Malformed {
        what: std::any::type_name::<T>().to_string(),
        reason: e.to_string(),
    })
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
