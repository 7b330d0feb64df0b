//! End-to-end synchronization tests against a live cluster.

use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use serde_json::json;

use machine_sync_operator::controller::error::ConvergenceClass;
use machine_sync_operator::crd::constants::SYNC_FINALIZER;
use machine_sync_operator::crd::{AuthoritativeApi, capi, mapi};
use machine_sync_operator::resources::infra;

use crate::common::fixtures::{MachineBuilder, MachineSetBuilder};
use crate::namespace::TestNamespace;
use crate::operator::ScopedOperator;
use crate::wait::{
    has_status_authority, is_capi_paused, is_synchronized, timeout_for, wait_for, wait_for_authority,
    wait_for_condition, wait_for_deletion, wait_for_object,
};

/// Namespaces plus a running operator for one test.
struct Harness {
    client: Client,
    mapi_ns: TestNamespace,
    capi_ns: TestNamespace,
    operator: ScopedOperator,
}

impl Harness {
    async fn start(prefix: &str) -> Self {
        let _ = tracing_subscriber::fmt::try_init();
        let client = Client::try_default().await.expect("kubeconfig available");
        let mapi_ns = TestNamespace::create(client.clone(), &format!("{}-mapi", prefix)).await;
        let capi_ns = TestNamespace::create(client.clone(), &format!("{}-capi", prefix)).await;
        let operator = ScopedOperator::start(client.clone(), mapi_ns.name(), capi_ns.name()).await;
        Self {
            client,
            mapi_ns,
            capi_ns,
            operator,
        }
    }

    fn mapi_machines(&self) -> Api<mapi::Machine> {
        self.mapi_ns.api()
    }

    fn capi_machines(&self) -> Api<capi::Machine> {
        self.capi_ns.api()
    }

    async fn create_machine(&self, builder: MachineBuilder) -> mapi::Machine {
        let mut machine = builder.build();
        machine.metadata.namespace = Some(self.mapi_ns.name().to_string());
        machine.metadata.uid = None;
        self.mapi_machines()
            .create(&PostParams::default(), &machine)
            .await
            .expect("MAPI machine created")
    }

    async fn request_authority(&self, name: &str, authority: AuthoritativeApi) {
        let patch = json!({ "spec": { "authoritativeAPI": authority } });
        self.mapi_machines()
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .expect("authority patched");
    }
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires Kubernetes cluster with Machine API and Cluster API CRDs"]
async fn test_machine_gets_paused_capi_mirror() {
    let h = Harness::start("mirror").await;
    h.create_machine(MachineBuilder::new("worker-a")).await;

    let mirror = wait_for(&h.capi_machines(), "worker-a", |m| {
        is_capi_paused(m) && m.finalizers().contains(&SYNC_FINALIZER.to_string())
    })
    .await
    .expect("paused CAPI mirror");
    assert_eq!(mirror.spec.infrastructure_ref.kind, "AWSMachine");

    let machine = wait_for(&h.mapi_machines(), "worker-a", |m| {
        has_status_authority(m, AuthoritativeApi::MachineApi) && is_synchronized(m)
    })
    .await
    .expect("MAPI machine synchronized");
    assert!(machine.finalizers().contains(&SYNC_FINALIZER.to_string()));

    let infra_api: Api<DynamicObject> = Api::namespaced_with(
        h.client.clone(),
        h.capi_ns.name(),
        &infra::machine_api_resource(h.operator.config().platform),
    );
    wait_for_object(&infra_api, "worker-a", timeout_for(ConvergenceClass::Short))
        .await
        .expect("infrastructure machine created");
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires Kubernetes cluster with Machine API and Cluster API CRDs"]
async fn test_flip_to_cluster_api_unpauses_mirror() {
    let h = Harness::start("flip").await;
    h.create_machine(MachineBuilder::new("worker-a")).await;
    wait_for_authority(
        &h.mapi_machines(),
        "worker-a",
        AuthoritativeApi::MachineApi,
        timeout_for(ConvergenceClass::Short),
    )
    .await
    .expect("MachineAPI at rest");

    h.request_authority("worker-a", AuthoritativeApi::ClusterApi).await;
    wait_for_authority(
        &h.mapi_machines(),
        "worker-a",
        AuthoritativeApi::ClusterApi,
        timeout_for(ConvergenceClass::Medium),
    )
    .await
    .expect("migration completes");

    wait_for_condition(
        &h.capi_machines(),
        "worker-a",
        |m| !is_capi_paused(m),
        timeout_for(ConvergenceClass::Short),
    )
    .await
    .expect("CAPI mirror unpaused");
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires Kubernetes cluster with Machine API and Cluster API CRDs"]
async fn test_deleting_authoritative_machine_deletes_mirror() {
    let h = Harness::start("delete").await;
    h.create_machine(MachineBuilder::new("worker-a")).await;
    wait_for(&h.capi_machines(), "worker-a", is_capi_paused)
        .await
        .expect("CAPI mirror");

    h.mapi_machines()
        .delete("worker-a", &DeleteParams::default())
        .await
        .expect("delete accepted");

    wait_for_deletion(&h.capi_machines(), "worker-a", timeout_for(ConvergenceClass::Medium))
        .await
        .expect("mirror deleted");
    wait_for_deletion(&h.mapi_machines(), "worker-a", timeout_for(ConvergenceClass::Medium))
        .await
        .expect("MAPI machine released");
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires Kubernetes cluster with Machine API and Cluster API CRDs"]
async fn test_machineset_gets_mirror_and_template() {
    let h = Harness::start("set").await;
    let mut set = MachineSetBuilder::new("worker-a").replicas(0).build();
    set.metadata.namespace = Some(h.mapi_ns.name().to_string());
    set.metadata.uid = None;
    let sets: Api<mapi::MachineSet> = h.mapi_ns.api();
    sets.create(&PostParams::default(), &set).await.expect("MAPI set created");

    let capi_sets: Api<capi::MachineSet> = h.capi_ns.api();
    let mirror = wait_for(&capi_sets, "worker-a", |s| s.spec.replicas == Some(0))
        .await
        .expect("CAPI set mirrored");

    let template_api: Api<DynamicObject> = Api::namespaced_with(
        h.client.clone(),
        h.capi_ns.name(),
        &infra::template_api_resource(h.operator.config().platform),
    );
    wait_for_object(
        &template_api,
        &mirror.spec.template.spec.infrastructure_ref.name,
        timeout_for(ConvergenceClass::Short),
    )
    .await
    .expect("infrastructure template created");
}
