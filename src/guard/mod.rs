//! Write-guard rules for MAPI Machines and MachineSets.
//!
//! Pure functions deciding whether a user write to a MAPI object is allowed,
//! given who is authoritative. An admission layer can call [`validate`] with
//! the old and new object; the controller itself never writes fields the
//! rules forbid.
//!
//! Rules are organized into tiers:
//! - Tier 1 (Conversion): fields that cannot be carried to CAPI are rejected
//!   when the object asks for `ClusterAPI`
//! - Tier 2 (Update): while CAPI is authoritative only the authority fields
//!   of the spec, and no protected label or annotation, may change

pub mod machine;
pub mod machineset;

use std::collections::BTreeMap;

use serde_json::Value;

use crate::crd::AuthoritativeApi;
use crate::crd::constants::PROTECTED_PREFIXES;

/// Rejection for a spec change while CAPI is authoritative.
pub const SPEC_CHANGE_MESSAGE: &str = "You may only modify spec.authoritativeAPI. Any other change inside .spec is not allowed. This is because status.authoritativeAPI is set to Cluster API.";

/// Rejection for a protected label change while CAPI is authoritative.
pub const LABEL_CHANGE_MESSAGE: &str = "Cannot add, modify or delete any machine.openshift.io/* or kubernetes.io/* label. This is because status.authoritativeAPI is set to Cluster API.";

/// Rejection for a protected annotation change while CAPI is authoritative.
pub const ANNOTATION_CHANGE_MESSAGE: &str = "Cannot add, modify or delete any machine.openshift.io/* or kubernetes.io/* annotation. This is because status.authoritativeAPI is set to Cluster API.";

/// Result of a guard check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardResult {
    /// Whether the write may proceed
    pub allowed: bool,
    /// Machine-readable reason (if not allowed)
    pub reason: Option<String>,
    /// Human-readable message (if not allowed)
    pub message: Option<String>,
}

impl GuardResult {
    /// Create an allowed result
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
            message: None,
        }
    }

    /// Create a denied result
    pub fn denied(reason: &str, message: &str) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
        }
    }
}

/// "spec.<field> is a forbidden field"
pub fn forbidden_field_message(path: &str) -> String {
    format!("{} is a forbidden field", path)
}

/// A MAPI object the guard knows how to check.
pub trait Guarded {
    /// `spec.authoritativeAPI` as declared by the user
    fn declared_authority(&self) -> Option<AuthoritativeApi>;

    /// `status.authoritativeAPI` as last written by the controller
    fn status_authority(&self) -> Option<AuthoritativeApi>;

    /// Spec as JSON, with the fields the user may always change removed.
    fn frozen_spec(&self) -> Result<Value, serde_json::Error>;

    /// Paths of populated fields the converter cannot carry to CAPI
    fn unconvertible_fields(&self) -> Vec<String>;

    fn labels(&self) -> &BTreeMap<String, String>;

    fn annotations(&self) -> &BTreeMap<String, String>;
}

/// Context for a guard check
pub struct GuardContext<'a, K> {
    /// The object being written
    pub resource: &'a K,
    /// The stored object (for UPDATE operations)
    pub old_resource: Option<&'a K>,
}

impl<K> GuardContext<'_, K> {
    /// Check if this is an UPDATE operation
    pub fn is_update(&self) -> bool {
        self.old_resource.is_some()
    }
}

/// Whether a label or annotation key belongs to a protected domain or one of
/// its subdomains.
pub fn is_protected_key(key: &str) -> bool {
    let Some((domain, _)) = key.split_once('/') else {
        return false;
    };
    PROTECTED_PREFIXES.iter().any(|prefix| {
        let protected = prefix.trim_end_matches('/');
        domain == protected || domain.strip_suffix(protected).is_some_and(|rest| rest.ends_with('.'))
    })
}

fn protected(map: &BTreeMap<String, String>) -> BTreeMap<&str, &str> {
    map.iter()
        .filter(|(k, _)| is_protected_key(k))
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect()
}

/// Whether any protected key was added, changed or removed.
pub fn protected_changed(old: &BTreeMap<String, String>, new: &BTreeMap<String, String>) -> bool {
    protected(old) != protected(new)
}

/// Remove the value at a `/`-separated pointer, if present.
pub(crate) fn remove_pointer(value: &mut Value, pointer: &str) {
    let Some((parent, leaf)) = pointer.rsplit_once('/') else {
        return;
    };
    let target = if parent.is_empty() {
        Some(value)
    } else {
        value.pointer_mut(parent)
    };
    if let Some(Value::Object(map)) = target {
        map.remove(leaf);
    }
}

/// Run all guard rules
pub fn validate<K: Guarded>(ctx: &GuardContext<'_, K>) -> GuardResult {
    // Tier 1: the object must be convertible when it asks for ClusterAPI
    if ctx.resource.declared_authority() == Some(AuthoritativeApi::ClusterApi)
        && let Some(field) = ctx.resource.unconvertible_fields().first()
    {
        return GuardResult::denied("ForbiddenField", &forbidden_field_message(field));
    }

    // Tier 2: only for UPDATE operations while CAPI is authoritative
    let Some(old) = ctx.old_resource else {
        return GuardResult::allowed();
    };
    match old.status_authority() {
        None | Some(AuthoritativeApi::MachineApi) => return GuardResult::allowed(),
        Some(_) => {}
    }

    let spec_changed = match (old.frozen_spec(), ctx.resource.frozen_spec()) {
        (Ok(old_spec), Ok(new_spec)) => old_spec != new_spec,
        // An unreadable spec cannot be shown to be unchanged.
        _ => true,
    };
    if spec_changed {
        return GuardResult::denied("NonAuthoritativeSpecChange", SPEC_CHANGE_MESSAGE);
    }
    if protected_changed(old.labels(), ctx.resource.labels()) {
        return GuardResult::denied("ProtectedLabelChange", LABEL_CHANGE_MESSAGE);
    }
    if protected_changed(old.annotations(), ctx.resource.annotations()) {
        return GuardResult::denied("ProtectedAnnotationChange", ANNOTATION_CHANGE_MESSAGE);
    }

    GuardResult::allowed()
}
