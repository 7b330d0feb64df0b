//! Guard rules for MAPI Machines.

use std::collections::BTreeMap;

use kube::ResourceExt;
use serde_json::Value;

use super::{Guarded, remove_pointer};
use crate::crd::{AuthoritativeApi, mapi};

/// Spec fields the user may change whoever is authoritative.
pub const MUTABLE_SPEC_POINTERS: &[&str] = &["/authoritativeAPI"];

/// Populated fields of a machine spec that have no CAPI counterpart.
///
/// `prefix` is the JSON path of the spec, e.g. `spec` or `spec.template.spec`.
pub fn unconvertible_spec_fields(spec: &mapi::MachineSpec, prefix: &str) -> Vec<String> {
    let mut fields = Vec::new();
    if !spec.taints.is_empty() {
        fields.push(format!("{}.taints", prefix));
    }
    if !spec.metadata.annotations.is_empty() {
        fields.push(format!("{}.metadata.annotations", prefix));
    }
    let load_balancers = spec
        .provider_spec
        .value
        .as_ref()
        .and_then(|v| v.get("loadBalancers"))
        .and_then(Value::as_array);
    if load_balancers.is_some_and(|lbs| !lbs.is_empty()) {
        fields.push(format!("{}.providerSpec.value.loadBalancers", prefix));
    }
    fields
}

impl Guarded for mapi::Machine {
    fn declared_authority(&self) -> Option<AuthoritativeApi> {
        self.spec.authoritative_api
    }

    fn status_authority(&self) -> Option<AuthoritativeApi> {
        self.status.as_ref().and_then(|s| s.authoritative_api)
    }

    fn frozen_spec(&self) -> Result<Value, serde_json::Error> {
        let mut spec = serde_json::to_value(&self.spec)?;
        for pointer in MUTABLE_SPEC_POINTERS {
            remove_pointer(&mut spec, pointer);
        }
        Ok(spec)
    }

    fn unconvertible_fields(&self) -> Vec<String> {
        unconvertible_spec_fields(&self.spec, "spec")
    }

    fn labels(&self) -> &BTreeMap<String, String> {
        ResourceExt::labels(self)
    }

    fn annotations(&self) -> &BTreeMap<String, String> {
        ResourceExt::annotations(self)
    }
}
