// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Unit tests for machine-sync-operator.
//!
//! These tests run without a Kubernetes cluster and test individual
//! components in isolation through the public API.

#[path = "../common/mod.rs"]
mod common;

mod config_tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use machine_sync_operator::config::{ConfigError, DEFAULT_CONFLICT_RETRIES};
    use machine_sync_operator::convert::Platform;
    use machine_sync_operator::SyncConfig;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config =
            SyncConfig::from_lookup(lookup(&[("INFRASTRUCTURE_NAME", "demo"), ("PLATFORM", "AWS")]))
                .unwrap();
        assert_eq!(config.mapi_namespace, "openshift-machine-api");
        assert_eq!(config.capi_namespace, "openshift-cluster-api");
        assert_eq!(config.platform, Platform::Aws);
        assert_eq!(config.conflict_retries, DEFAULT_CONFLICT_RETRIES);
        assert_eq!(config.divergence_deadline, Duration::from_secs(300));
    }

    #[test]
    fn test_missing_required_values() {
        let err = SyncConfig::from_lookup(lookup(&[("PLATFORM", "gcp")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("INFRASTRUCTURE_NAME"));

        let err = SyncConfig::from_lookup(lookup(&[("INFRASTRUCTURE_NAME", "demo")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("PLATFORM"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = SyncConfig::from_lookup(lookup(&[
            ("INFRASTRUCTURE_NAME", "demo"),
            ("PLATFORM", "azure"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "PLATFORM", .. }));

        let err = SyncConfig::from_lookup(lookup(&[
            ("INFRASTRUCTURE_NAME", "demo"),
            ("PLATFORM", "aws"),
            ("SYNC_CONFLICT_RETRIES", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "SYNC_CONFLICT_RETRIES", .. }));
    }

    #[test]
    fn test_conversion_context_follows_config() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("INFRASTRUCTURE_NAME", "demo"),
            ("PLATFORM", "vsphere"),
            ("MAPI_NAMESPACE", "mapi"),
            ("CAPI_NAMESPACE", "capi"),
        ]))
        .unwrap();
        let ctx = config.conversion_context();
        assert_eq!(ctx.platform, Platform::VSphere);
        assert_eq!(ctx.mapi_namespace, "mapi");
        assert_eq!(ctx.capi_namespace, "capi");
        assert_eq!(ctx.infrastructure_name, "demo");
    }
}

mod authority_tests {
    use machine_sync_operator::controller::authority::{
        AuthorityEvent, AuthorityStateMachine, TransitionContext, decide, determine_event,
        resolve, sync_source,
    };
    use machine_sync_operator::crd::AuthoritativeApi::{self, ClusterApi, MachineApi, Migrating};

    fn ready(generation: i64) -> TransitionContext {
        TransitionContext {
            source_paused: true,
            synchronized_generation: Some(generation),
            source_generation: Some(generation),
        }
    }

    #[test]
    fn test_resolve_defaults_to_machine_api() {
        assert_eq!(resolve(None).unwrap(), MachineApi);
        assert_eq!(resolve(Some(ClusterApi)).unwrap(), ClusterApi);
        assert!(resolve(Some(Migrating)).is_err());
    }

    #[test]
    fn test_valid_events() {
        let sm = AuthorityStateMachine::new();
        assert_eq!(
            sm.valid_events(None),
            vec![AuthorityEvent::MachineApiRequested, AuthorityEvent::ClusterApiRequested]
        );
        assert_eq!(
            sm.valid_events(Some(MachineApi)),
            vec![AuthorityEvent::AuthorityChangeRequested]
        );
        assert!(!sm.can_transition(Some(MachineApi), AuthorityEvent::MigratedToClusterApi));
    }

    #[test]
    fn test_determine_event() {
        assert_eq!(determine_event(None, ClusterApi), Some(AuthorityEvent::ClusterApiRequested));
        assert_eq!(determine_event(Some(MachineApi), MachineApi), None);
        assert_eq!(
            determine_event(Some(MachineApi), ClusterApi),
            Some(AuthorityEvent::AuthorityChangeRequested)
        );
        assert_eq!(
            determine_event(Some(Migrating), MachineApi),
            Some(AuthorityEvent::MigratedToMachineApi)
        );
    }

    #[test]
    fn test_flip_passes_through_migrating() {
        let sm = AuthorityStateMachine::new();
        let decision = decide(&sm, Some(MachineApi), ClusterApi, &ready(1));
        assert_eq!(decision.effective, Migrating);
        assert!(decision.changed());
        // The old authority stays the sync source while migrating
        assert_eq!(decision.source(), MachineApi);

        let decision = decide(&sm, Some(Migrating), ClusterApi, &ready(1));
        assert_eq!(decision.effective, ClusterApi);
        assert_eq!(decision.source(), ClusterApi);
    }

    #[test]
    fn test_migration_blocked_until_source_paused_and_synced() {
        let sm = AuthorityStateMachine::new();

        let not_paused = TransitionContext {
            source_paused: false,
            ..ready(3)
        };
        let decision = decide(&sm, Some(Migrating), MachineApi, &not_paused);
        assert_eq!(decision.effective, Migrating);
        assert!(decision.blocked.is_some());

        let lagging = TransitionContext {
            synchronized_generation: Some(2),
            ..ready(3)
        };
        let decision = decide(&sm, Some(Migrating), MachineApi, &lagging);
        assert_eq!(decision.effective, Migrating);
        assert!(decision.blocked.unwrap().contains("synchronizedGeneration"));
    }

    #[test]
    fn test_sync_source() {
        assert_eq!(sync_source(Migrating, ClusterApi), MachineApi);
        assert_eq!(sync_source(Migrating, MachineApi), ClusterApi);
        for api in [MachineApi, ClusterApi] {
            assert_eq!(sync_source(api, AuthoritativeApi::MachineApi), api);
        }
    }
}

mod pause_tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use machine_sync_operator::controller::pause::{
        capi_is_paused, pause_annotation_patch, plan, source_paused,
    };
    use machine_sync_operator::crd::constants::CAPI_PAUSED_ANNOTATION;
    use machine_sync_operator::crd::{AuthoritativeApi, CapiCondition};

    #[test]
    fn test_exactly_one_side_runs_at_rest() {
        let p = plan(AuthoritativeApi::MachineApi);
        assert!(!p.mapi_paused && p.capi_paused);
        let p = plan(AuthoritativeApi::ClusterApi);
        assert!(p.mapi_paused && !p.capi_paused);
        let p = plan(AuthoritativeApi::Migrating);
        assert!(p.mapi_paused && p.capi_paused);
    }

    #[test]
    fn test_capi_pause_needs_acknowledgement() {
        let annotated = BTreeMap::from([(CAPI_PAUSED_ANNOTATION.to_string(), String::new())]);
        assert!(!capi_is_paused(&annotated, &[]));
        assert!(!capi_is_paused(&annotated, &[CapiCondition::paused(false, Some(1))]));
        assert!(capi_is_paused(&annotated, &[CapiCondition::paused(true, Some(1))]));
        assert!(!capi_is_paused(&BTreeMap::new(), &[CapiCondition::paused(true, Some(1))]));

        assert!(!source_paused(AuthoritativeApi::Migrating, &[], &annotated, &[]));
    }

    #[test]
    fn test_pause_annotation_patch() {
        assert_eq!(
            pause_annotation_patch(true),
            json!({ "metadata": { "annotations": { CAPI_PAUSED_ANNOTATION: "" } } })
        );
        assert_eq!(
            pause_annotation_patch(false),
            json!({ "metadata": { "annotations": { CAPI_PAUSED_ANNOTATION: null } } })
        );
    }
}

mod mirror_tests {
    use std::collections::BTreeMap;

    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

    use machine_sync_operator::controller::mirror::{
        DeletionStep, MirrorDecision, Presence, Side, adoption_patch, owning_set, plan_deletion,
        plan_existence,
    };
    use machine_sync_operator::crd::AuthoritativeApi;
    use machine_sync_operator::crd::constants::CAPI_CLUSTER_NAME_LABEL;

    const LIVE: Presence = Presence {
        exists: true,
        deleting: false,
        has_finalizer: true,
    };
    const DELETING: Presence = Presence {
        exists: true,
        deleting: true,
        has_finalizer: true,
    };
    const ABSENT: Presence = Presence {
        exists: false,
        deleting: false,
        has_finalizer: false,
    };

    #[test]
    fn test_side_of_authority() {
        assert_eq!(Side::of(AuthoritativeApi::ClusterApi), Side::Capi);
        assert_eq!(Side::of(AuthoritativeApi::MachineApi), Side::Mapi);
        assert_eq!(Side::Mapi.other(), Side::Capi);
    }

    #[test]
    fn test_existence_decisions() {
        assert_eq!(plan_existence(LIVE, ABSENT, false), MirrorDecision::CreateCapi);
        assert_eq!(plan_existence(ABSENT, LIVE, false), MirrorDecision::Ignore);
        assert_eq!(plan_existence(ABSENT, LIVE, true), MirrorDecision::CreateMapi);
        assert_eq!(plan_existence(LIVE, LIVE, false), MirrorDecision::Paired);
        assert_eq!(plan_existence(LIVE, DELETING, false), MirrorDecision::Deleting);
        assert_eq!(plan_existence(ABSENT, ABSENT, true), MirrorDecision::Ignore);
    }

    #[test]
    fn test_deleting_owner_deletes_mirror_then_releases() {
        assert_eq!(
            plan_deletion(Side::Mapi, DELETING, LIVE),
            vec![DeletionStep::DeleteMirror(Side::Capi)]
        );
        assert_eq!(
            plan_deletion(Side::Mapi, DELETING, ABSENT),
            vec![DeletionStep::Release(Side::Mapi)]
        );
    }

    #[test]
    fn test_deleting_mirror_is_only_released() {
        assert_eq!(
            plan_deletion(Side::Mapi, LIVE, DELETING),
            vec![DeletionStep::Release(Side::Capi)]
        );
    }

    #[test]
    fn test_adoption_patch() {
        let patch = adoption_patch(&BTreeMap::new(), "demo").unwrap();
        assert_eq!(patch["metadata"]["labels"][CAPI_CLUSTER_NAME_LABEL], "demo");

        let labelled = BTreeMap::from([(CAPI_CLUSTER_NAME_LABEL.to_string(), "demo".to_string())]);
        assert!(adoption_patch(&labelled, "demo").is_none());
    }

    #[test]
    fn test_owning_set_requires_controller_ref() {
        let mut owner = OwnerReference {
            api_version: "cluster.x-k8s.io/v1beta2".to_string(),
            kind: "MachineSet".to_string(),
            name: "worker-a".to_string(),
            uid: "uid-1".to_string(),
            controller: Some(true),
            block_owner_deletion: None,
        };
        assert_eq!(
            owning_set(std::slice::from_ref(&owner), "cluster.x-k8s.io"),
            Some("worker-a".to_string())
        );
        assert_eq!(owning_set(std::slice::from_ref(&owner), "machine.openshift.io"), None);
        owner.controller = None;
        assert_eq!(owning_set(&[owner], "cluster.x-k8s.io"), None);
    }
}

mod status_sync_tests {
    use machine_sync_operator::controller::status_sync::{
        SyncOutcome, next_synchronized_generation,
    };
    use machine_sync_operator::convert::SyncDirection;

    fn outcome(direction: SyncDirection, generation: i64, succeeded: bool) -> SyncOutcome {
        SyncOutcome {
            direction,
            source_generation: Some(generation),
            succeeded,
            foreign_conditions: None,
        }
    }

    #[test]
    fn test_synchronized_generation_follows_success() {
        let ok = outcome(SyncDirection::MapiToCapi, 4, true);
        assert_eq!(next_synchronized_generation(Some(3), Some(SyncDirection::MapiToCapi), &ok), Some(4));

        let failed = outcome(SyncDirection::MapiToCapi, 5, false);
        assert_eq!(
            next_synchronized_generation(Some(4), Some(SyncDirection::MapiToCapi), &failed),
            Some(4)
        );
    }

    #[test]
    fn test_synchronized_generation_never_regresses_within_a_direction() {
        let stale = outcome(SyncDirection::MapiToCapi, 2, true);
        assert_eq!(
            next_synchronized_generation(Some(4), Some(SyncDirection::MapiToCapi), &stale),
            Some(4)
        );
        // A direction change resets it to the new source's generation
        let flipped = outcome(SyncDirection::CapiToMapi, 1, true);
        assert_eq!(
            next_synchronized_generation(Some(4), Some(SyncDirection::MapiToCapi), &flipped),
            Some(1)
        );
    }
}

mod guard_tests {
    use machine_sync_operator::crd::AuthoritativeApi;
    use machine_sync_operator::crd::mapi::MachineStatus;
    use machine_sync_operator::guard::{GuardContext, SPEC_CHANGE_MESSAGE, validate};

    use crate::common::fixtures::MachineBuilder;

    #[test]
    fn test_provider_id_change_depends_on_status_authority() {
        let mut old = MachineBuilder::new("worker-a")
            .authority(AuthoritativeApi::ClusterApi)
            .build();
        old.status = Some(MachineStatus {
            authoritative_api: Some(AuthoritativeApi::ClusterApi),
            ..Default::default()
        });
        let mut new = old.clone();
        new.spec.provider_id = Some("aws:///us-east-1a/i-0abc".to_string());

        let result = validate(&GuardContext {
            resource: &new,
            old_resource: Some(&old),
        });
        assert!(!result.allowed);
        assert_eq!(result.message.as_deref(), Some(SPEC_CHANGE_MESSAGE));

        old.status = Some(MachineStatus {
            authoritative_api: Some(AuthoritativeApi::MachineApi),
            ..Default::default()
        });
        let result = validate(&GuardContext {
            resource: &new,
            old_resource: Some(&old),
        });
        assert!(result.allowed);
    }

    #[test]
    fn test_create_is_allowed_without_status() {
        let machine = MachineBuilder::new("worker-a")
            .authority(AuthoritativeApi::ClusterApi)
            .build();
        assert!(validate(&GuardContext {
            resource: &machine,
            old_resource: None,
        })
        .allowed);
    }
}

mod convert_tests {
    use std::collections::BTreeMap;

    use kube::ResourceExt;

    use machine_sync_operator::convert::machine::{
        hooks_from_annotations, hooks_to_annotations, machine_to_capi, machine_to_mapi,
    };
    use machine_sync_operator::convert::machineset::{infra_template_name, machineset_to_capi};
    use machine_sync_operator::convert::{labels_to_capi, labels_to_mapi};
    use machine_sync_operator::crd::constants::{
        CAPI_CLUSTER_NAME_LABEL, CAPI_SET_NAME_LABEL, MAPI_CLUSTER_LABEL, MAPI_MACHINESET_LABEL,
    };
    use machine_sync_operator::crd::{AuthoritativeApi, mapi};

    use crate::common::fixtures::{
        CAPI_NAMESPACE, INFRASTRUCTURE_NAME, MachineBuilder, MachineSetBuilder, conversion_context,
    };

    #[test]
    fn test_machine_mirror_keeps_provider_fields() {
        let ctx = conversion_context();
        let machine = MachineBuilder::new("worker-a").instance_type("m6i.2xlarge").build();

        let mirror = machine_to_capi(&machine, &ctx).unwrap();
        assert_eq!(mirror.machine.name_any(), "worker-a");
        assert_eq!(mirror.machine.namespace().as_deref(), Some(CAPI_NAMESPACE));
        assert_eq!(mirror.machine.spec.cluster_name, INFRASTRUCTURE_NAME);
        assert_eq!(mirror.machine.spec.infrastructure_ref.kind, "AWSMachine");
        assert!(mirror.machine.spec.provider_id.is_none());

        let back = machine_to_mapi(&mirror.machine, &mirror.infra, &ctx).unwrap();
        assert_eq!(back.spec.authoritative_api, Some(AuthoritativeApi::ClusterApi));
        let value = back.spec.provider_spec.value.unwrap();
        assert_eq!(value["instanceType"], "m6i.2xlarge");
        assert_eq!(value["kind"], "AWSMachineProviderConfig");
    }

    #[test]
    fn test_lifecycle_hooks_travel_as_annotations() {
        let hooks = mapi::LifecycleHooks {
            pre_drain: vec![mapi::LifecycleHook {
                name: "drain-guard".to_string(),
                owner: "storage-team".to_string(),
            }],
            pre_terminate: Vec::new(),
        };
        let annotations = hooks_to_annotations(&hooks);
        assert_eq!(annotations.len(), 1);
        assert_eq!(hooks_from_annotations(&annotations), hooks);
    }

    #[test]
    fn test_cluster_and_set_labels_are_renamed() {
        let labels = BTreeMap::from([
            (MAPI_CLUSTER_LABEL.to_string(), "demo".to_string()),
            (MAPI_MACHINESET_LABEL.to_string(), "worker-a".to_string()),
            ("team".to_string(), "infra".to_string()),
        ]);
        let capi = labels_to_capi(&labels, "demo");
        assert_eq!(capi[CAPI_CLUSTER_NAME_LABEL], "demo");
        assert_eq!(capi[CAPI_SET_NAME_LABEL], "worker-a");
        assert!(!capi.contains_key(MAPI_CLUSTER_LABEL));

        assert_eq!(labels_to_mapi(&capi, "demo"), labels);
    }

    #[test]
    fn test_template_name_tracks_template_content() {
        let ctx = conversion_context();
        let small = machineset_to_capi(&MachineSetBuilder::new("worker-a").build(), &ctx).unwrap();
        let again = machineset_to_capi(&MachineSetBuilder::new("worker-a").replicas(5).build(), &ctx)
            .unwrap();
        let large = machineset_to_capi(
            &MachineSetBuilder::new("worker-a").instance_type("m6i.8xlarge").build(),
            &ctx,
        )
        .unwrap();

        assert_eq!(small.template_name, again.template_name);
        assert_ne!(small.template_name, large.template_name);
        assert_eq!(
            small.template_name,
            infra_template_name("worker-a", &small.template).unwrap()
        );
        assert_eq!(
            small.machine_set.spec.template.spec.infrastructure_ref.name,
            small.template_name
        );
    }
}
