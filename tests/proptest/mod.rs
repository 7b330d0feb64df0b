// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Property-based tests for machine-sync-operator.
//!
//! Uses proptest to generate random inputs and verify invariants.

#[path = "../common/mod.rs"]
mod common;

use std::collections::BTreeMap;

use kube::ResourceExt;
use proptest::prelude::*;

use machine_sync_operator::controller::authority::{
    AuthorityStateMachine, TransitionContext, decide,
};
use machine_sync_operator::controller::pause;
use machine_sync_operator::controller::status_sync::{SyncOutcome, next_synchronized_generation};
use machine_sync_operator::convert::machineset::machineset_to_capi;
use machine_sync_operator::convert::{SyncDirection, labels_to_capi, labels_to_mapi};
use machine_sync_operator::crd::AuthoritativeApi;
use machine_sync_operator::crd::constants::MAPI_CLUSTER_LABEL;
use machine_sync_operator::crd::mapi::MachineStatus;
use machine_sync_operator::guard::{GuardContext, validate};

use common::fixtures::{MachineBuilder, MachineSetBuilder, conversion_context};

/// Strategy for authorities a user may declare.
fn declared_api() -> impl Strategy<Value = AuthoritativeApi> {
    prop_oneof![
        Just(AuthoritativeApi::MachineApi),
        Just(AuthoritativeApi::ClusterApi),
    ]
}

/// Strategy for `status.authoritativeAPI`, including unset.
fn status_api() -> impl Strategy<Value = Option<AuthoritativeApi>> {
    prop_oneof![
        Just(None),
        Just(Some(AuthoritativeApi::MachineApi)),
        Just(Some(AuthoritativeApi::ClusterApi)),
        Just(Some(AuthoritativeApi::Migrating)),
    ]
}

fn transition_context() -> impl Strategy<Value = TransitionContext> {
    (any::<bool>(), proptest::option::of(1..20i64), proptest::option::of(1..20i64)).prop_map(
        |(source_paused, synchronized_generation, source_generation)| TransitionContext {
            source_paused,
            synchronized_generation,
            source_generation,
        },
    )
}

/// Strategy for user label keys outside the renamed and instance domains.
fn user_labels() -> impl Strategy<Value = BTreeMap<String, String>> {
    proptest::collection::btree_map("[a-z]{1,8}(\\.example\\.com/[a-z]{1,8})?", "[a-z0-9]{0,8}", 0..6)
}

proptest! {
    /// The same observations always produce the same decision.
    #[test]
    fn decide_is_deterministic(
        previous in status_api(),
        declared in declared_api(),
        ctx in transition_context(),
    ) {
        let sm = AuthorityStateMachine::new();
        prop_assert_eq!(
            decide(&sm, previous, declared, &ctx),
            decide(&sm, previous, declared, &ctx)
        );
    }

    /// Authority never jumps straight between the two APIs.
    #[test]
    fn flips_always_pass_through_migrating(
        previous in status_api(),
        declared in declared_api(),
        ctx in transition_context(),
    ) {
        let sm = AuthorityStateMachine::new();
        let decision = decide(&sm, previous, declared, &ctx);
        match previous {
            Some(api @ (AuthoritativeApi::MachineApi | AuthoritativeApi::ClusterApi)) => {
                prop_assert!(
                    decision.effective == api || decision.effective == AuthoritativeApi::Migrating
                );
            }
            None => prop_assert_eq!(decision.effective, declared),
            Some(AuthoritativeApi::Migrating) => {
                let completed = ctx.source_paused && ctx.source_synchronized();
                let expected = if completed { declared } else { AuthoritativeApi::Migrating };
                prop_assert_eq!(decision.effective, expected);
            }
        }
    }

    /// Exactly one side runs at rest; neither runs while migrating.
    #[test]
    fn exactly_one_side_runs_at_rest(effective in status_api()) {
        let effective = effective.unwrap_or(AuthoritativeApi::Migrating);
        let plan = pause::plan(effective);
        if effective == AuthoritativeApi::Migrating {
            prop_assert!(plan.mapi_paused && plan.capi_paused);
        } else {
            prop_assert!(plan.mapi_paused != plan.capi_paused);
        }
    }

    /// synchronizedGeneration never moves backwards within one direction.
    #[test]
    fn synchronized_generation_is_monotonic_per_direction(
        previous in proptest::option::of(1..50i64),
        next in 1..50i64,
        succeeded in any::<bool>(),
    ) {
        let outcome = SyncOutcome {
            direction: SyncDirection::MapiToCapi,
            source_generation: Some(next),
            succeeded,
            foreign_conditions: None,
        };
        let result = next_synchronized_generation(previous, Some(SyncDirection::MapiToCapi), &outcome);
        if let Some(previous) = previous {
            prop_assert!(result >= Some(previous));
        }
        if !succeeded {
            prop_assert_eq!(result, previous);
        }
    }

    /// User labels survive a trip to CAPI and back.
    #[test]
    fn user_labels_round_trip(labels in user_labels()) {
        let capi = labels_to_capi(&labels, "demo");
        let mut expected = labels.clone();
        expected.insert(MAPI_CLUSTER_LABEL.to_string(), "demo".to_string());
        prop_assert_eq!(labels_to_mapi(&capi, "demo"), expected);
    }

    /// Template names depend on the template only, not on replicas.
    #[test]
    fn template_name_is_stable(replicas in 0..20i32, size in prop_oneof![
        Just("large"), Just("xlarge"), Just("2xlarge"), Just("4xlarge"),
    ]) {
        let ctx = conversion_context();
        let instance_type = format!("m6i.{}", size);
        let a = machineset_to_capi(
            &MachineSetBuilder::new("worker-a").instance_type(&instance_type).build(),
            &ctx,
        ).unwrap();
        let b = machineset_to_capi(
            &MachineSetBuilder::new("worker-a").instance_type(&instance_type).replicas(replicas).build(),
            &ctx,
        ).unwrap();
        prop_assert_eq!(&a.template_name, &b.template_name);
        let suffix = a.template_name.strip_prefix("worker-a-").unwrap();
        prop_assert_eq!(suffix.len(), 8);
        prop_assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    /// Non-protected label edits are allowed whoever is authoritative;
    /// protected ones only while MAPI is.
    #[test]
    fn guard_partitions_label_edits(
        authority in status_api(),
        key in "[a-z]{1,8}",
        protected in any::<bool>(),
    ) {
        let mut old = MachineBuilder::new("worker-a").build();
        old.status = Some(MachineStatus {
            authoritative_api: authority,
            ..Default::default()
        });
        let mut new = old.clone();
        let key = if protected { format!("machine.openshift.io/{}", key) } else { key };
        new.labels_mut().insert(key, "x".to_string());

        let result = validate(&GuardContext { resource: &new, old_resource: Some(&old) });
        let capi_holds = matches!(
            authority,
            Some(AuthoritativeApi::ClusterApi | AuthoritativeApi::Migrating)
        );
        prop_assert_eq!(result.allowed, !(protected && capi_holds));
    }
}
