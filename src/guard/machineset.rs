//! Guard rules for MAPI MachineSets.
//!
//! Same as machines, except that the template's own `authoritativeAPI` is
//! mutable too and the template's machine spec must be convertible.

use std::collections::BTreeMap;

use kube::ResourceExt;
use serde_json::Value;

use super::machine::unconvertible_spec_fields;
use super::{Guarded, remove_pointer};
use crate::crd::{AuthoritativeApi, mapi};

/// Spec fields the user may change whoever is authoritative.
pub const MUTABLE_SPEC_POINTERS: &[&str] = &["/authoritativeAPI", "/template/spec/authoritativeAPI"];

impl Guarded for mapi::MachineSet {
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
        unconvertible_spec_fields(&self.spec.template.spec, "spec.template.spec")
    }

    fn labels(&self) -> &BTreeMap<String, String> {
        ResourceExt::labels(self)
    }

    fn annotations(&self) -> &BTreeMap<String, String> {
        ResourceExt::annotations(self)
    }
}
