//! Machine <-> Machine conversion.
//!
//! Spec conversion is used once, when a mirror is created. After that only
//! the fields in [`MACHINE_SYNCED_SPEC_FIELDS`] may change, and none of them
//! exist on the CAPI side, so an existing CAPI mirror's spec is never
//! rewritten.

use std::collections::BTreeMap;

use kube::ResourceExt;

use super::{
    ConversionContext, ConversionError, InfraSpec, MachinePlacement, ProviderStatus,
    labels_to_capi, labels_to_mapi, portable_annotations, portable_conditions,
};
use crate::crd::capi::{
    self, Bootstrap, ContractVersionedObjectReference, MachineDeprecatedStatus,
    MachineNodeReference, MachineV1Beta1Status,
};
use crate::crd::constants::INFRA_GROUP;
use crate::crd::mapi::{self, LifecycleHook, LifecycleHooks, NodeReference, ProviderSpec};
use crate::crd::{AuthoritativeApi, ObjectMetaLite};

/// MAPI Machine spec fields that stay mutable once a mirror exists.
pub const MACHINE_SYNCED_SPEC_FIELDS: &[&str] = &["authoritativeAPI"];

/// Annotation prefix CAPI uses for pre-drain hooks.
pub const PRE_DRAIN_HOOK_PREFIX: &str = "pre-drain.delete.hook.machine.cluster.x-k8s.io/";
/// Annotation prefix CAPI uses for pre-terminate hooks.
pub const PRE_TERMINATE_HOOK_PREFIX: &str = "pre-terminate.delete.hook.machine.cluster.x-k8s.io/";

/// A CAPI Machine together with the spec of its infrastructure machine.
#[derive(Clone, Debug, PartialEq)]
pub struct CapiMachineMirror {
    pub machine: capi::Machine,
    pub infra: InfraSpec,
}

/// Lifecycle hooks become CAPI hook annotations (`<prefix><name>: <owner>`).
pub fn hooks_to_annotations(hooks: &LifecycleHooks) -> BTreeMap<String, String> {
    let drain = hooks
        .pre_drain
        .iter()
        .map(|h| (format!("{}{}", PRE_DRAIN_HOOK_PREFIX, h.name), h.owner.clone()));
    let terminate = hooks
        .pre_terminate
        .iter()
        .map(|h| (format!("{}{}", PRE_TERMINATE_HOOK_PREFIX, h.name), h.owner.clone()));
    drain.chain(terminate).collect()
}

/// Inverse of [`hooks_to_annotations`].
pub fn hooks_from_annotations(annotations: &BTreeMap<String, String>) -> LifecycleHooks {
    let collect = |prefix: &str| -> Vec<LifecycleHook> {
        annotations
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(prefix).map(|name| LifecycleHook {
                    name: name.to_string(),
                    owner: v.clone(),
                })
            })
            .collect()
    };
    LifecycleHooks {
        pre_drain: collect(PRE_DRAIN_HOOK_PREFIX),
        pre_terminate: collect(PRE_TERMINATE_HOOK_PREFIX),
    }
}

/// Whether an annotation encodes a lifecycle hook.
pub fn is_hook_annotation(key: &str) -> bool {
    key.starts_with(PRE_DRAIN_HOOK_PREFIX) || key.starts_with(PRE_TERMINATE_HOOK_PREFIX)
}

/// Convert a MAPI Machine spec.
///
/// Instance identity (`providerID`, `instanceID`) is never carried: the
/// mirror describes the same machine shape, not the same cloud instance.
pub fn machine_spec_to_capi(
    spec: &mapi::MachineSpec,
    infrastructure_ref: ContractVersionedObjectReference,
    ctx: &ConversionContext,
) -> Result<(capi::MachineSpec, InfraSpec), ConversionError> {
    if !spec.taints.is_empty() {
        return Err(ConversionError::UnsupportedField("spec.taints".to_string()));
    }
    if !spec.metadata.annotations.is_empty() {
        return Err(ConversionError::UnsupportedField(
            "spec.metadata.annotations".to_string(),
        ));
    }
    let value = spec
        .provider_spec
        .value
        .as_ref()
        .ok_or(ConversionError::MissingProviderSpec)?;
    let (mut infra, placement) = InfraSpec::from_provider_spec(value, ctx.platform)?;
    infra.clear_instance_fields();

    let out = capi::MachineSpec {
        cluster_name: ctx.infrastructure_name.clone(),
        bootstrap: Bootstrap {
            data_secret_name: placement.user_data_secret,
        },
        infrastructure_ref,
        version: None,
        provider_id: None,
        failure_domain: placement.failure_domain,
        readiness_gates: Vec::new(),
    };
    Ok((out, infra))
}

/// Convert a CAPI Machine spec plus its infrastructure spec.
pub fn machine_spec_to_mapi(
    spec: &capi::MachineSpec,
    infra: &InfraSpec,
    lifecycle_hooks: LifecycleHooks,
    authoritative_api: Option<AuthoritativeApi>,
) -> Result<mapi::MachineSpec, ConversionError> {
    let mut infra = infra.clone();
    infra.clear_instance_fields();
    let placement = MachinePlacement {
        failure_domain: spec.failure_domain.clone(),
        user_data_secret: spec.bootstrap.data_secret_name.clone(),
    };
    Ok(mapi::MachineSpec {
        metadata: ObjectMetaLite::default(),
        lifecycle_hooks,
        taints: Vec::new(),
        provider_spec: ProviderSpec {
            value: Some(infra.to_provider_spec(&placement)?),
        },
        provider_id: None,
        authoritative_api,
    })
}

/// Build the CAPI mirror of a MAPI Machine.
pub fn machine_to_capi(
    machine: &mapi::Machine,
    ctx: &ConversionContext,
) -> Result<CapiMachineMirror, ConversionError> {
    let name = machine.name_any();
    let infra_ref = ContractVersionedObjectReference {
        api_group: INFRA_GROUP.to_string(),
        kind: ctx.platform.infra_machine_kind().to_string(),
        name: name.clone(),
    };
    let (spec, infra) = machine_spec_to_capi(&machine.spec, infra_ref, ctx)?;

    let mut labels = labels_to_capi(machine.labels(), &ctx.infrastructure_name);
    labels.extend(machine.spec.metadata.labels.clone());
    let mut annotations = portable_annotations(machine.annotations());
    annotations.extend(hooks_to_annotations(&machine.spec.lifecycle_hooks));

    let mut out = capi::Machine::new(&name, spec);
    out.metadata.namespace = Some(ctx.capi_namespace.clone());
    out.metadata.labels = Some(labels);
    out.metadata.annotations = (!annotations.is_empty()).then_some(annotations);
    Ok(CapiMachineMirror {
        machine: out,
        infra,
    })
}

/// Build the MAPI mirror of a CAPI Machine. The mirror is created with
/// `authoritativeAPI: ClusterAPI`, since only CAPI-authoritative machines are
/// mirrored in this direction.
pub fn machine_to_mapi(
    machine: &capi::Machine,
    infra: &InfraSpec,
    ctx: &ConversionContext,
) -> Result<mapi::Machine, ConversionError> {
    let name = machine.name_any();
    let hooks = hooks_from_annotations(machine.annotations());
    let spec = machine_spec_to_mapi(
        &machine.spec,
        infra,
        hooks,
        Some(AuthoritativeApi::ClusterApi),
    )?;

    let annotations: BTreeMap<String, String> = portable_annotations(machine.annotations())
        .into_iter()
        .filter(|(k, _)| !is_hook_annotation(k))
        .collect();

    let mut out = mapi::Machine::new(&name, spec);
    out.metadata.namespace = Some(ctx.mapi_namespace.clone());
    out.metadata.labels = Some(labels_to_mapi(machine.labels(), &ctx.infrastructure_name));
    out.metadata.annotations = (!annotations.is_empty()).then_some(annotations);
    Ok(out)
}

/// Convert MAPI status for the CAPI Machine and its infrastructure object.
///
/// Fails on a malformed provider status so that nothing partial is written.
/// v1beta2 conditions are left empty: they belong to the CAPI reconciler.
pub fn machine_status_to_capi(
    status: &mapi::MachineStatus,
) -> Result<(capi::MachineStatus, ProviderStatus), ConversionError> {
    let provider = ProviderStatus::from_blob(status.provider_status.as_ref())?;

    let v1beta1 = MachineV1Beta1Status {
        conditions: portable_conditions(&status.conditions),
        failure_reason: status.error_reason.clone(),
        failure_message: status.error_message.clone(),
    };
    let out = capi::MachineStatus {
        conditions: Vec::new(),
        node_ref: status.node_ref.as_ref().map(|n| MachineNodeReference {
            name: n.name.clone(),
        }),
        last_updated: status.last_updated.clone(),
        addresses: status.addresses.clone(),
        phase: status.phase.clone(),
        observed_generation: None,
        deprecated: (v1beta1 != MachineV1Beta1Status::default()).then_some(
            MachineDeprecatedStatus {
                v1beta1: Some(v1beta1),
            },
        ),
    };
    Ok((out, provider))
}

/// Convert CAPI status (plus the infrastructure-derived provider status) for a MAPI Machine.
///
/// The synchronization fields (`authoritativeAPI`, `synchronizedGeneration`,
/// `Paused`, `Synchronized`) are owned by the status synchronizer and left unset.
pub fn machine_status_to_mapi(
    status: &capi::MachineStatus,
    provider: &ProviderStatus,
) -> mapi::MachineStatus {
    let v1beta1 = status.v1beta1();
    mapi::MachineStatus {
        node_ref: status.node_ref.as_ref().map(|n| NodeReference {
            kind: Some("Node".to_string()),
            name: n.name.clone(),
            uid: None,
        }),
        last_updated: status.last_updated.clone(),
        error_reason: v1beta1.and_then(|v| v.failure_reason.clone()),
        error_message: v1beta1.and_then(|v| v.failure_message.clone()),
        provider_status: (!provider.is_empty())
            .then(|| serde_json::to_value(provider).ok())
            .flatten(),
        addresses: status.addresses.clone(),
        phase: status.phase.clone(),
        conditions: v1beta1
            .map(|v| portable_conditions(&v.conditions))
            .unwrap_or_default(),
        authoritative_api: None,
        synchronized_generation: None,
    }
}
