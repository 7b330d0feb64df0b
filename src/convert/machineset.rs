//! MachineSet <-> MachineSet conversion.
//!
//! Unlike machines, a MachineSet's replica count and template keep flowing
//! from the authoritative set to its mirror for the lifetime of the pair.
//! The CAPI template references an infrastructure machine template whose
//! name embeds a hash of its spec, so a template change rolls to a new name.

use kube::ResourceExt;

use super::machine::{
    hooks_from_annotations, hooks_to_annotations, is_hook_annotation, machine_spec_to_capi,
    machine_spec_to_mapi,
};
use super::{
    ConversionContext, ConversionError, InfraSpec, labels_to_capi, labels_to_mapi,
    portable_annotations, portable_conditions, spec_hash,
};
use crate::crd::capi::{
    self, ContractVersionedObjectReference, MachineSetDeprecatedStatus, MachineSetV1Beta1Status,
};
use crate::crd::constants::INFRA_GROUP;
use crate::crd::mapi;
use crate::crd::{AuthoritativeApi, LabelSelector, ObjectMetaLite};

/// MAPI MachineSet spec fields that stay mutable once a mirror exists.
pub const MACHINESET_SYNCED_SPEC_FIELDS: &[&str] = &["replicas", "template", "authoritativeAPI"];

/// A CAPI MachineSet together with its infrastructure machine template.
#[derive(Clone, Debug, PartialEq)]
pub struct CapiMachineSetMirror {
    pub machine_set: capi::MachineSet,
    pub template: InfraSpec,
    pub template_name: String,
}

/// `<machineset>-<spec_hash(spec) as 8 hex digits>`
pub fn infra_template_name(machine_set: &str, template: &InfraSpec) -> Result<String, ConversionError> {
    let encoded = template.to_infra_spec()?.to_string();
    Ok(format!("{}-{:08x}", machine_set, spec_hash(encoded.as_bytes())))
}

/// Absent CAPI counts compare as zero.
pub fn count(value: Option<i32>) -> i32 {
    value.unwrap_or_default()
}

fn selector_to_capi(selector: &LabelSelector, infrastructure_name: &str) -> LabelSelector {
    LabelSelector {
        match_labels: labels_to_capi(&selector.match_labels, infrastructure_name),
    }
}

fn selector_to_mapi(selector: &LabelSelector, infrastructure_name: &str) -> LabelSelector {
    LabelSelector {
        match_labels: labels_to_mapi(&selector.match_labels, infrastructure_name),
    }
}

/// Build the CAPI mirror of a MAPI MachineSet.
pub fn machineset_to_capi(
    machine_set: &mapi::MachineSet,
    ctx: &ConversionContext,
) -> Result<CapiMachineSetMirror, ConversionError> {
    let name = machine_set.name_any();
    let template = &machine_set.spec.template;

    let (mut machine_spec, infra) = machine_spec_to_capi(
        &template.spec,
        ContractVersionedObjectReference::default(),
        ctx,
    )?;
    let template_name = infra_template_name(&name, &infra)?;
    machine_spec.infrastructure_ref = ContractVersionedObjectReference {
        api_group: INFRA_GROUP.to_string(),
        kind: ctx.platform.infra_template_kind(),
        name: template_name.clone(),
    };

    let mut template_labels = labels_to_capi(&template.metadata.labels, &ctx.infrastructure_name);
    template_labels.extend(template.spec.metadata.labels.clone());
    let mut template_annotations = portable_annotations(&template.metadata.annotations);
    template_annotations.extend(hooks_to_annotations(&template.spec.lifecycle_hooks));

    let spec = capi::MachineSetSpec {
        cluster_name: ctx.infrastructure_name.clone(),
        replicas: machine_set.spec.replicas,
        selector: selector_to_capi(&machine_set.spec.selector, &ctx.infrastructure_name),
        template: capi::MachineTemplateSpec {
            metadata: ObjectMetaLite {
                labels: template_labels,
                annotations: template_annotations,
            },
            spec: machine_spec,
        },
    };

    let mut out = capi::MachineSet::new(&name, spec);
    out.metadata.namespace = Some(ctx.capi_namespace.clone());
    out.metadata.labels = Some(labels_to_capi(machine_set.labels(), &ctx.infrastructure_name));
    let annotations = portable_annotations(machine_set.annotations());
    out.metadata.annotations = (!annotations.is_empty()).then_some(annotations);

    Ok(CapiMachineSetMirror {
        machine_set: out,
        template: infra,
        template_name,
    })
}

/// Build the MAPI mirror of a CAPI MachineSet.
///
/// `template_authority` is the MAPI template's own `authoritativeAPI`, which
/// has no CAPI counterpart and is carried over from the existing mirror.
pub fn machineset_to_mapi(
    machine_set: &capi::MachineSet,
    template: &InfraSpec,
    template_authority: Option<AuthoritativeApi>,
    ctx: &ConversionContext,
) -> Result<mapi::MachineSet, ConversionError> {
    let name = machine_set.name_any();
    let capi_template = &machine_set.spec.template;

    let hooks = hooks_from_annotations(&capi_template.metadata.annotations);
    let machine_spec = machine_spec_to_mapi(&capi_template.spec, template, hooks, template_authority)?;
    let template_annotations = portable_annotations(&capi_template.metadata.annotations)
        .into_iter()
        .filter(|(k, _)| !is_hook_annotation(k))
        .collect();

    let spec = mapi::MachineSetSpec {
        replicas: machine_set.spec.replicas,
        min_ready_seconds: None,
        delete_policy: None,
        selector: selector_to_mapi(&machine_set.spec.selector, &ctx.infrastructure_name),
        template: mapi::MachineTemplateSpec {
            metadata: ObjectMetaLite {
                labels: labels_to_mapi(&capi_template.metadata.labels, &ctx.infrastructure_name),
                annotations: template_annotations,
            },
            spec: machine_spec,
        },
        authoritative_api: Some(AuthoritativeApi::ClusterApi),
    };

    let mut out = mapi::MachineSet::new(&name, spec);
    out.metadata.namespace = Some(ctx.mapi_namespace.clone());
    out.metadata.labels = Some(labels_to_mapi(machine_set.labels(), &ctx.infrastructure_name));
    let annotations = portable_annotations(machine_set.annotations());
    out.metadata.annotations = (!annotations.is_empty()).then_some(annotations);
    Ok(out)
}

/// Whether the synced fields of two CAPI MachineSet specs agree.
pub fn capi_synced_spec_eq(a: &capi::MachineSetSpec, b: &capi::MachineSetSpec) -> bool {
    a.replicas == b.replicas && a.template == b.template
}

/// Whether the synced fields of two MAPI MachineSet specs agree.
pub fn mapi_synced_spec_eq(a: &mapi::MachineSetSpec, b: &mapi::MachineSetSpec) -> bool {
    a.replicas == b.replicas && a.template == b.template
}

pub fn machineset_status_to_capi(status: &mapi::MachineSetStatus) -> capi::MachineSetStatus {
    capi::MachineSetStatus {
        conditions: Vec::new(),
        replicas: Some(status.replicas),
        ready_replicas: Some(status.ready_replicas),
        available_replicas: Some(status.available_replicas),
        up_to_date_replicas: None,
        observed_generation: status.observed_generation,
        selector: None,
        deprecated: Some(MachineSetDeprecatedStatus {
            v1beta1: Some(MachineSetV1Beta1Status {
                conditions: portable_conditions(&status.conditions),
                fully_labeled_replicas: Some(status.fully_labeled_replicas),
                ready_replicas: Some(status.ready_replicas),
                available_replicas: Some(status.available_replicas),
                failure_reason: status.error_reason.clone(),
                failure_message: status.error_message.clone(),
            }),
        }),
    }
}

pub fn machineset_status_to_mapi(status: &capi::MachineSetStatus) -> mapi::MachineSetStatus {
    let v1beta1 = status.v1beta1();
    mapi::MachineSetStatus {
        replicas: count(status.replicas),
        fully_labeled_replicas: count(v1beta1.and_then(|v| v.fully_labeled_replicas)),
        ready_replicas: count(status.ready_replicas),
        available_replicas: count(status.available_replicas),
        observed_generation: status.observed_generation,
        error_reason: v1beta1.and_then(|v| v.failure_reason.clone()),
        error_message: v1beta1.and_then(|v| v.failure_message.clone()),
        conditions: v1beta1
            .map(|v| portable_conditions(&v.conditions))
            .unwrap_or_default(),
        authoritative_api: None,
        synchronized_generation: None,
    }
}
