//! Mirror management.
//!
//! Decides whether the mirror of a resource must be created, adopted or
//! deleted. Every decision is a pure function of what was observed; the
//! reconcilers turn decisions into [`SyncAction`](super::actions::SyncAction)s.
//!
//! Deletion follows authority: deleting the authoritative object deletes its
//! mirror first and is released once the mirror is gone, while deleting a
//! mirror only releases the mirror.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use serde_json::{Value, json};

use crate::crd::AuthoritativeApi;
use crate::crd::constants::{CAPI_CLUSTER_NAME_LABEL, SYNC_FINALIZER};

/// One side of a resource pair.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Side {
    Mapi,
    Capi,
}

impl Side {
    /// The side that owns a resource under an authority.
    pub fn of(authority: AuthoritativeApi) -> Self {
        match authority {
            AuthoritativeApi::ClusterApi => Side::Capi,
            _ => Side::Mapi,
        }
    }

    pub fn other(self) -> Self {
        match self {
            Side::Mapi => Side::Capi,
            Side::Capi => Side::Mapi,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Mapi => write!(f, "MAPI"),
            Side::Capi => write!(f, "CAPI"),
        }
    }
}

/// What was observed about one side of a pair.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Presence {
    pub exists: bool,
    pub deleting: bool,
    pub has_finalizer: bool,
}

impl Presence {
    pub fn of<K: Resource>(resource: Option<&K>) -> Self {
        match resource {
            None => Self::default(),
            Some(r) => Self {
                exists: true,
                deleting: r.meta().deletion_timestamp.is_some(),
                has_finalizer: r.finalizers().iter().any(|f| f == SYNC_FINALIZER),
            },
        }
    }

    fn live(self) -> bool {
        self.exists && !self.deleting
    }
}

/// A step of pair deletion.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeletionStep {
    /// Delete the mirror on this side
    DeleteMirror(Side),
    /// Drop the sync finalizer from this side
    Release(Side),
}

/// Plan deletion for a pair where at least one side is deleting.
///
/// `owner` is the side authoritative at the time of deletion.
pub fn plan_deletion(owner: Side, mapi: Presence, capi: Presence) -> Vec<DeletionStep> {
    let presence = |side: Side| match side {
        Side::Mapi => mapi,
        Side::Capi => capi,
    };

    let mut steps = Vec::new();
    for side in [Side::Mapi, Side::Capi] {
        let this = presence(side);
        if !this.deleting {
            continue;
        }
        if side != owner {
            if this.has_finalizer {
                steps.push(DeletionStep::Release(side));
            }
            continue;
        }
        let mirror = presence(side.other());
        if mirror.live() {
            steps.push(DeletionStep::DeleteMirror(side.other()));
        } else if !mirror.exists && this.has_finalizer {
            steps.push(DeletionStep::Release(side));
        }
    }
    steps
}

/// What to do about the existence of a pair.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MirrorDecision {
    /// Nothing exists, or a standalone CAPI object that is not ours to mirror
    Ignore,
    /// The CAPI side is missing and must be created from MAPI
    CreateCapi,
    /// The MAPI side is missing and must be created from CAPI
    CreateMapi,
    /// Both sides exist
    Paired,
    /// At least one side is being deleted
    Deleting,
}

/// Decide the existence action for a pair.
///
/// A missing CAPI mirror is always created. A missing MAPI mirror is only
/// created when `capi_mirrorable` says the CAPI object belongs to a
/// MachineSet that itself has a MAPI counterpart.
pub fn plan_existence(mapi: Presence, capi: Presence, capi_mirrorable: bool) -> MirrorDecision {
    match (mapi.exists, capi.exists) {
        _ if mapi.deleting || capi.deleting => MirrorDecision::Deleting,
        (false, false) => MirrorDecision::Ignore,
        (true, false) => MirrorDecision::CreateCapi,
        (false, true) if capi_mirrorable => MirrorDecision::CreateMapi,
        (false, true) => MirrorDecision::Ignore,
        (true, true) => MirrorDecision::Paired,
    }
}

/// Labels an adopted CAPI object must carry, or `None` when already present.
pub fn adoption_patch(labels: &BTreeMap<String, String>, infrastructure_name: &str) -> Option<Value> {
    if labels.get(CAPI_CLUSTER_NAME_LABEL).map(String::as_str) == Some(infrastructure_name) {
        return None;
    }
    Some(json!({
        "metadata": {
            "labels": {
                CAPI_CLUSTER_NAME_LABEL: infrastructure_name
            }
        }
    }))
}

/// Name of the MachineSet controlling a resource, if it is one of `api_group`'s.
pub fn owning_set(owner_references: &[OwnerReference], api_group: &str) -> Option<String> {
    owner_references
        .iter()
        .filter(|o| o.controller == Some(true))
        .find(|o| {
            o.kind == "MachineSet"
                && o.api_version.split('/').next() == Some(api_group)
        })
        .map(|o| o.name.clone())
}
