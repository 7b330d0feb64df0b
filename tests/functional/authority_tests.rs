//! Authority flips between the Machine API and the Cluster API.

use kube::ResourceExt;
use serde_json::json;

use machine_sync_operator::controller::error::ConvergenceClass;
use machine_sync_operator::crd::conditions::{is_capi_true, is_true};
use machine_sync_operator::crd::constants::{CAPI_PAUSED_ANNOTATION, CONDITION_PAUSED};
use machine_sync_operator::crd::{AuthoritativeApi, MachineAddress, mapi};

use crate::common::fixtures::MachineBuilder;
use crate::world::{MAPI_MACHINE, World};

fn settled(authority: AuthoritativeApi) -> World {
    let mut world = World::new();
    world
        .create(
            MAPI_MACHINE,
            "worker-a",
            &MachineBuilder::new("worker-a").authority(authority).build(),
        )
        .unwrap();
    world.settle_machine("worker-a", 10);
    world
}

fn request(world: &mut World, authority: AuthoritativeApi) {
    world.edit_spec(MAPI_MACHINE, "worker-a", |m: &mut mapi::Machine| {
        m.spec.authoritative_api = Some(authority);
    });
}

fn status_authority(world: &World) -> Option<AuthoritativeApi> {
    world
        .mapi_machine("worker-a")
        .and_then(|m| m.status)
        .and_then(|s| s.authoritative_api)
}

/// Which sides are paused, as (MAPI, CAPI).
fn paused_sides(world: &World) -> (bool, bool) {
    let machine = world.mapi_machine("worker-a").unwrap();
    let mirror = world.capi_machine("worker-a").unwrap();
    let mapi_paused = is_true(&machine.status.unwrap_or_default().conditions, CONDITION_PAUSED);
    let capi_paused = mirror.annotations().contains_key(CAPI_PAUSED_ANNOTATION)
        && is_capi_true(&mirror.status.unwrap_or_default().conditions, CONDITION_PAUSED);
    (mapi_paused, capi_paused)
}

#[test]
fn test_cluster_api_machine_settles_with_mapi_paused() {
    let world = settled(AuthoritativeApi::ClusterApi);
    assert_eq!(status_authority(&world), Some(AuthoritativeApi::ClusterApi));
    assert_eq!(paused_sides(&world), (true, false));
}

#[test]
fn test_flip_to_cluster_api() {
    let mut world = settled(AuthoritativeApi::MachineApi);
    assert_eq!(paused_sides(&world), (false, true));

    request(&mut world, AuthoritativeApi::ClusterApi);
    let pass = world.sync_machine("worker-a");
    assert_eq!(pass.requeue, Some(ConvergenceClass::Short));
    assert_eq!(status_authority(&world), Some(AuthoritativeApi::Migrating));
    assert!(
        is_true(
            &world.mapi_machine("worker-a").unwrap().status.unwrap().conditions,
            CONDITION_PAUSED
        ),
        "the migration source is paused first"
    );

    world.settle_machine("worker-a", 10);
    assert_eq!(status_authority(&world), Some(AuthoritativeApi::ClusterApi));
    assert_eq!(paused_sides(&world), (true, false));
    let mirror = world.capi_machine("worker-a").unwrap();
    assert_eq!(mirror.status.unwrap().phase.as_deref(), Some("Running"));
}

/// The observed fields both sides share, as (phase, node, addresses, lastUpdated).
fn observed(world: &World) -> [(Option<String>, Option<String>, Vec<MachineAddress>, Option<String>); 2] {
    let mapi = world.mapi_machine("worker-a").unwrap().status.unwrap();
    let capi = world.capi_machine("worker-a").unwrap().status.unwrap();
    [
        (mapi.phase, mapi.node_ref.map(|n| n.name), mapi.addresses, mapi.last_updated),
        (capi.phase, capi.node_ref.map(|n| n.name), capi.addresses, capi.last_updated),
    ]
}

#[test]
fn test_flip_round_trip() {
    let mut world = settled(AuthoritativeApi::MachineApi);
    world
        .patch(
            MAPI_MACHINE,
            "worker-a",
            &json!({
                "status": {
                    "phase": "Running",
                    "nodeRef": { "kind": "Node", "name": "ip-1" },
                    "addresses": [{ "type": "InternalIP", "address": "10.0.0.1" }],
                    "lastUpdated": "2026-01-01T00:00:00Z",
                }
            }),
        )
        .unwrap();
    world.settle_machine("worker-a", 10);

    request(&mut world, AuthoritativeApi::ClusterApi);
    world.settle_machine("worker-a", 10);
    assert_eq!(status_authority(&world), Some(AuthoritativeApi::ClusterApi));

    request(&mut world, AuthoritativeApi::MachineApi);
    world.settle_machine("worker-a", 10);
    assert_eq!(status_authority(&world), Some(AuthoritativeApi::MachineApi));
    assert_eq!(paused_sides(&world), (false, true));

    let expected = (
        Some("Running".to_string()),
        Some("ip-1".to_string()),
        vec![MachineAddress {
            r#type: "InternalIP".to_string(),
            address: "10.0.0.1".to_string(),
        }],
        Some("2026-01-01T00:00:00Z".to_string()),
    );
    let [mapi, capi] = observed(&world);
    assert_eq!(mapi, expected, "MAPI status after the round trip");
    assert_eq!(capi, expected, "CAPI status after the round trip");
}

#[test]
fn test_migration_waits_for_capi_pause_acknowledgement() {
    let mut world = settled(AuthoritativeApi::ClusterApi);

    request(&mut world, AuthoritativeApi::MachineApi);
    // Without the Cluster API reconciler acknowledging the pause, the
    // migration source never counts as stopped.
    for _ in 0..5 {
        world.sync_machine("worker-a");
    }
    assert_eq!(status_authority(&world), Some(AuthoritativeApi::Migrating));
    let mirror = world.capi_machine("worker-a").unwrap();
    assert!(mirror.annotations().contains_key(CAPI_PAUSED_ANNOTATION));

    world.run_capi_reconciler("worker-a");
    world.settle_machine("worker-a", 10);
    assert_eq!(status_authority(&world), Some(AuthoritativeApi::MachineApi));
}

#[test]
fn test_migrating_in_spec_is_rejected() {
    let mut world = settled(AuthoritativeApi::MachineApi);

    request(&mut world, AuthoritativeApi::Migrating);
    let pass = world.sync_machine("worker-a");
    assert!(pass.actions.is_empty());
    assert_eq!(pass.requeue, Some(ConvergenceClass::Overlong));
    assert_eq!(status_authority(&world), Some(AuthoritativeApi::MachineApi));
}
