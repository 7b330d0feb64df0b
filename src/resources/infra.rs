//! Infrastructure provider objects.
//!
//! `AWSMachine`, `GCPMachineTemplate` and friends are not modelled as typed
//! custom resources. They are read and written as `DynamicObject`s whose
//! `spec`/`status` go through the typed provider structs in
//! [`crate::convert::provider`].

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use kube::{Resource, ResourceExt};
use serde_json::{Value, json};

use crate::convert::{ConversionError, InfraSpec, Platform, ProviderStatus};
use crate::crd::constants::{INFRA_GROUP, INFRA_VERSION};

/// `ApiResource` for an infrastructure kind.
pub fn infra_api_resource(kind: &str) -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind {
        group: INFRA_GROUP.to_string(),
        version: INFRA_VERSION.to_string(),
        kind: kind.to_string(),
    })
}

/// `ApiResource` of the platform's infrastructure machine.
pub fn machine_api_resource(platform: Platform) -> ApiResource {
    infra_api_resource(platform.infra_machine_kind())
}

/// `ApiResource` of the platform's infrastructure machine template.
pub fn template_api_resource(platform: Platform) -> ApiResource {
    infra_api_resource(&platform.infra_template_kind())
}

/// Controller owner reference pointing at `owner`.
pub fn owner_reference<K>(owner: &K) -> Option<OwnerReference>
where
    K: Resource<DynamicType = ()>,
{
    owner.controller_owner_ref(&())
}

fn object(
    resource: &ApiResource,
    name: &str,
    namespace: &str,
    labels: BTreeMap<String, String>,
    spec: Value,
) -> DynamicObject {
    let mut obj = DynamicObject::new(name, resource);
    obj.metadata = ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: (!labels.is_empty()).then_some(labels),
        ..Default::default()
    };
    obj.data = json!({ "spec": spec });
    obj
}

/// Build an infrastructure machine (e.g. `AWSMachine`).
pub fn build_machine(
    name: &str,
    namespace: &str,
    labels: BTreeMap<String, String>,
    spec: &InfraSpec,
) -> Result<DynamicObject, ConversionError> {
    let resource = machine_api_resource(spec.platform());
    Ok(object(&resource, name, namespace, labels, spec.to_infra_spec()?))
}

/// Build an infrastructure machine template (e.g. `AWSMachineTemplate`).
pub fn build_template(
    name: &str,
    namespace: &str,
    labels: BTreeMap<String, String>,
    spec: &InfraSpec,
) -> Result<DynamicObject, ConversionError> {
    let resource = template_api_resource(spec.platform());
    let template = json!({ "template": { "spec": spec.to_infra_spec()? } });
    Ok(object(&resource, name, namespace, labels, template))
}

fn malformed(obj: &DynamicObject, reason: &str) -> ConversionError {
    ConversionError::Malformed {
        what: format!("infrastructure object {}", obj.name_any()),
        reason: reason.to_string(),
    }
}

/// Typed spec of an infrastructure machine.
pub fn machine_spec(platform: Platform, obj: &DynamicObject) -> Result<InfraSpec, ConversionError> {
    let spec = obj.data.get("spec").ok_or_else(|| malformed(obj, "missing spec"))?;
    InfraSpec::from_infra_spec(platform, spec)
}

/// Typed spec of an infrastructure machine template.
pub fn template_spec(platform: Platform, obj: &DynamicObject) -> Result<InfraSpec, ConversionError> {
    let spec = obj
        .data
        .pointer("/spec/template/spec")
        .ok_or_else(|| malformed(obj, "missing spec.template.spec"))?;
    InfraSpec::from_infra_spec(platform, spec)
}

/// Raw `status` of an infrastructure object.
pub fn status(obj: &DynamicObject) -> Option<&Value> {
    obj.data.get("status")
}

/// Provider status derived from an infrastructure machine.
pub fn provider_status(platform: Platform, obj: &DynamicObject) -> Result<ProviderStatus, ConversionError> {
    let spec = machine_spec(platform, obj)?;
    Ok(ProviderStatus::from_infra(platform, &spec, status(obj)))
}

/// Whether an infrastructure machine's status already matches `wanted`.
pub fn status_matches(obj: &DynamicObject, wanted: &Value) -> bool {
    let Some(wanted) = wanted.as_object() else {
        return true;
    };
    let current = status(obj);
    wanted
        .iter()
        .all(|(k, v)| current.and_then(|s| s.get(k)) == Some(v))
}
