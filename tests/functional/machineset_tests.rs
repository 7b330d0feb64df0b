//! MachineSet scenarios: mirror creation, template rolls, replica propagation.

use serde_json::json;

use machine_sync_operator::crd::{AuthoritativeApi, mapi};

use crate::common::fixtures::{MachineSetBuilder, aws_provider_spec};
use crate::world::{CAPI_MACHINESET, MAPI_MACHINESET, World};

const TEMPLATE_KIND: &str = "AWSMachineTemplate";

fn settled(builder: MachineSetBuilder) -> World {
    let mut world = World::new();
    world.create(MAPI_MACHINESET, "worker-a", &builder.build()).unwrap();
    world.settle_machineset("worker-a", 10);
    world
}

fn template_ref(world: &World) -> String {
    world
        .capi_machineset("worker-a")
        .unwrap()
        .spec
        .template
        .spec
        .infrastructure_ref
        .name
}

#[test]
fn test_machineset_mirror_with_template() {
    let world = settled(MachineSetBuilder::new("worker-a").replicas(2));

    let mirror = world.capi_machineset("worker-a").unwrap();
    assert_eq!(mirror.spec.replicas, Some(2));
    let template = template_ref(&world);
    assert!(template.starts_with("worker-a-"));
    assert_eq!(world.infra_names(TEMPLATE_KIND), vec![template]);

    let status = world.mapi_machineset("worker-a").unwrap().status.unwrap();
    assert_eq!(status.authoritative_api, Some(AuthoritativeApi::MachineApi));
}

#[test]
fn test_template_change_rolls_infra_template() {
    let mut world = settled(MachineSetBuilder::new("worker-a"));
    let old_template = template_ref(&world);

    world.edit_spec(MAPI_MACHINESET, "worker-a", |s: &mut mapi::MachineSet| {
        s.spec.template.spec.provider_spec.value = Some(aws_provider_spec("m6i.4xlarge"));
    });
    let pass = world.sync_machineset("worker-a");

    let position = |prefix: &str| {
        pass.actions
            .iter()
            .position(|a| a.starts_with(prefix))
            .unwrap_or_else(|| panic!("no {prefix:?} action in {:?}", pass.actions))
    };
    let ensure = position("ensure AWSMachineTemplate");
    let patch = position("patch CAPI spec");
    let delete = position("delete AWSMachineTemplate");
    assert!(ensure < patch && patch < delete, "order: {:?}", pass.actions);

    world.settle_machineset("worker-a", 10);
    let new_template = template_ref(&world);
    assert_ne!(new_template, old_template);
    assert_eq!(world.infra_names(TEMPLATE_KIND), vec![new_template]);
}

#[test]
fn test_replica_change_keeps_template() {
    let mut world = settled(MachineSetBuilder::new("worker-a"));
    let template = template_ref(&world);

    world.edit_spec(MAPI_MACHINESET, "worker-a", |s: &mut mapi::MachineSet| {
        s.spec.replicas = Some(4);
    });
    world.settle_machineset("worker-a", 10);

    assert_eq!(world.capi_machineset("worker-a").unwrap().spec.replicas, Some(4));
    assert_eq!(template_ref(&world), template);
    assert_eq!(world.infra_names(TEMPLATE_KIND), vec![template]);
}

#[test]
fn test_cluster_api_set_propagates_replicas_to_mapi() {
    let mut world = settled(
        MachineSetBuilder::new("worker-a")
            .replicas(1)
            .authority(AuthoritativeApi::ClusterApi),
    );
    assert_eq!(
        world
            .mapi_machineset("worker-a")
            .unwrap()
            .status
            .unwrap()
            .authoritative_api,
        Some(AuthoritativeApi::ClusterApi)
    );

    world
        .patch(CAPI_MACHINESET, "worker-a", &json!({ "spec": { "replicas": 3 } }))
        .unwrap();
    world.settle_machineset("worker-a", 10);

    assert_eq!(world.mapi_machineset("worker-a").unwrap().spec.replicas, Some(3));
}

#[test]
fn test_deleting_machineset_removes_mirror_and_template() {
    let mut world = settled(MachineSetBuilder::new("worker-a"));

    world.delete(MAPI_MACHINESET, "worker-a");
    world.settle_machineset("worker-a", 10);

    assert!(!world.exists(MAPI_MACHINESET, "worker-a"));
    assert!(!world.exists(CAPI_MACHINESET, "worker-a"));
    assert!(world.infra_names(TEMPLATE_KIND).is_empty());
}
