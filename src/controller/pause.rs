//! Pause control.
//!
//! Only the authoritative side's native reconciler may act on a resource.
//! On the MAPI side this controller writes the `Paused` condition the Machine
//! API reconciler honors; on the CAPI side it sets the `cluster.x-k8s.io/paused`
//! annotation and the Cluster API reconciler reports the `Paused` condition.

use std::collections::BTreeMap;

use serde_json::{Value, json};

use crate::crd::constants::{
    CAPI_PAUSED_ANNOTATION, CONDITION_PAUSED, REASON_AUTHORITATIVE_API_MACHINE_API,
    REASON_AUTHORITATIVE_API_NOT_MACHINE_API,
};
use crate::crd::conditions::{is_capi_true, is_true};
use crate::crd::{AuthoritativeApi, CapiCondition, Condition};

/// Desired pause markers for both sides of a pair
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PausePlan {
    pub mapi_paused: bool,
    pub mapi_reason: &'static str,
    pub mapi_message: String,
    /// Whether the CAPI paused annotation should be present
    pub capi_paused: bool,
}

impl PausePlan {
    /// The MAPI `Paused` condition for this plan
    pub fn mapi_condition(&self) -> Condition {
        Condition::paused(self.mapi_paused, self.mapi_reason, &self.mapi_message)
    }
}

/// Pause markers for an effective authority.
///
/// Exactly one side runs at rest; both are paused while migrating.
pub fn plan(effective: AuthoritativeApi) -> PausePlan {
    match effective {
        AuthoritativeApi::MachineApi => PausePlan {
            mapi_paused: false,
            mapi_reason: REASON_AUTHORITATIVE_API_MACHINE_API,
            mapi_message: "The AuthoritativeAPI is set to MachineAPI".to_string(),
            capi_paused: true,
        },
        AuthoritativeApi::ClusterApi | AuthoritativeApi::Migrating => PausePlan {
            mapi_paused: true,
            mapi_reason: REASON_AUTHORITATIVE_API_NOT_MACHINE_API,
            mapi_message: format!("The AuthoritativeAPI is set to {}", effective),
            capi_paused: effective == AuthoritativeApi::Migrating,
        },
    }
}

/// Whether the CAPI paused annotation is present
pub fn has_pause_annotation(annotations: &BTreeMap<String, String>) -> bool {
    annotations.contains_key(CAPI_PAUSED_ANNOTATION)
}

/// Whether the MAPI side reports itself paused
pub fn mapi_is_paused(conditions: &[Condition]) -> bool {
    is_true(conditions, CONDITION_PAUSED)
}

/// Whether the CAPI side is paused and its reconciler has acknowledged it
pub fn capi_is_paused(annotations: &BTreeMap<String, String>, conditions: &[CapiCondition]) -> bool {
    has_pause_annotation(annotations) && is_capi_true(conditions, CONDITION_PAUSED)
}

/// Merge patch adding or removing the CAPI paused annotation
pub fn pause_annotation_patch(paused: bool) -> Value {
    let value = if paused { json!("") } else { Value::Null };
    json!({
        "metadata": {
            "annotations": {
                CAPI_PAUSED_ANNOTATION: value
            }
        }
    })
}

/// Whether the side `source` is observed paused
pub fn source_paused(
    source: AuthoritativeApi,
    mapi_conditions: &[Condition],
    capi_annotations: &BTreeMap<String, String>,
    capi_conditions: &[CapiCondition],
) -> bool {
    match source {
        AuthoritativeApi::MachineApi => mapi_is_paused(mapi_conditions),
        AuthoritativeApi::ClusterApi => capi_is_paused(capi_annotations, capi_conditions),
        AuthoritativeApi::Migrating => false,
    }
}
