//! machine-sync-operator library crate
//!
//! Keeps OpenShift Machine API (MAPI) machines and their Cluster API (CAPI)
//! mirrors in sync while a cluster migrates between the two. This module
//! exports the controllers, the field converter, the write guard and the
//! resource bindings.

pub mod config;
pub mod controller;
pub mod convert;
pub mod crd;
pub mod guard;
pub mod health;
pub mod resources;

pub use config::SyncConfig;
pub use health::HealthState;

use std::fmt::Debug;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use kube::api::DynamicObject;
use kube::runtime::controller::{Action, Error as ControllerError};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{Controller, WatchStreamExt, reflector, watcher};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use controller::context::Context;
use controller::error::Error;
use controller::{machine_sync, machineset_sync};
use crd::{capi, mapi};
use resources::infra;

/// Create the default watcher configuration for all controllers.
///
/// `any_semantic()` gives more reliable resource discovery in test environments.
fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Create a reflector-backed stream for a resource type.
///
/// The stream keeps an in-memory cache, retries with exponential backoff and
/// emits Added/Modified objects. Status-only updates are kept: statuses are
/// part of what gets synchronized.
fn create_stream<K>(
    api: Api<K>,
    watcher_config: WatcherConfig,
) -> (
    reflector::Store<K>,
    impl Stream<Item = Result<K, watcher::Error>>,
)
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, watcher_config))
        .default_backoff()
        .applied_objects();
    (reader, stream)
}

/// Reference to the MAPI object of kind `K` paired with `obj`.
///
/// Paired objects share their name across the two APIs.
fn paired_ref<K, O>(obj: &O, namespace: &str) -> Option<ObjectRef<K>>
where
    K: Resource<DynamicType = ()>,
    O: ResourceExt,
{
    Some(ObjectRef::new(&obj.name_any()).within(namespace))
}

/// Log the outcome of each reconciliation.
async fn drain<K, S>(kind: &'static str, results: S)
where
    K: Resource,
    S: Stream<Item = Result<(ObjectRef<K>, Action), ControllerError<Error, watcher::Error>>>,
{
    results
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    debug!(kind = kind, name = %obj.name, "Reconciled");
                }
                Err(e) => {
                    // Watch events for objects deleted in the meantime are expected.
                    let is_not_found = match &e {
                        ControllerError::ObjectNotFound(_) => true,
                        ControllerError::ReconcilerFailed(err, _) => err.is_not_found(),
                        _ => false,
                    };
                    if is_not_found {
                        debug!(kind = kind, "Object no longer exists (likely deleted): {:?}", e);
                    } else {
                        error!(kind = kind, "Reconciliation error: {:?}", e);
                    }
                }
            }
        })
        .await;
}

/// Machine pairs, driven from the MAPI side.
///
/// CAPI Machines and infrastructure machines trigger the MAPI machine of the
/// same name.
async fn run_machine_controller(ctx: Arc<Context>) {
    let config = &ctx.config;
    let mapi_machines: Api<mapi::Machine> = Api::namespaced(ctx.client.clone(), &config.mapi_namespace);
    let capi_machines: Api<capi::Machine> = Api::namespaced(ctx.client.clone(), &config.capi_namespace);
    let infra_resource = infra::machine_api_resource(config.platform);
    let infra_machines: Api<DynamicObject> =
        Api::namespaced_with(ctx.client.clone(), &config.capi_namespace, &infra_resource);

    let watcher_config = default_watcher_config();
    let (reader, stream) = create_stream(mapi_machines, watcher_config.clone());
    let namespace = config.mapi_namespace.clone();
    let infra_namespace = config.mapi_namespace.clone();

    let results = Controller::for_stream(stream, reader)
        .watches(capi_machines, watcher_config.clone(), move |m: capi::Machine| {
            paired_ref::<mapi::Machine, _>(&m, &namespace)
        })
        .watches_with(infra_machines, infra_resource, watcher_config, move |o: DynamicObject| {
            paired_ref::<mapi::Machine, _>(&o, &infra_namespace)
        })
        .run(machine_sync::reconcile, machine_sync::error_policy, ctx.clone());
    drain(machine_sync::KIND, results).await;
}

/// Machine pairs that exist only on the CAPI side.
async fn run_capi_machine_controller(ctx: Arc<Context>) {
    let capi_machines: Api<capi::Machine> =
        Api::namespaced(ctx.client.clone(), &ctx.config.capi_namespace);
    let (reader, stream) = create_stream(capi_machines, default_watcher_config());
    let results = Controller::for_stream(stream, reader).run(
        machine_sync::reconcile_capi,
        machine_sync::error_policy,
        ctx.clone(),
    );
    drain(machine_sync::KIND, results).await;
}

/// MachineSet pairs, driven from the MAPI side.
async fn run_machineset_controller(ctx: Arc<Context>) {
    let config = &ctx.config;
    let mapi_sets: Api<mapi::MachineSet> = Api::namespaced(ctx.client.clone(), &config.mapi_namespace);
    let capi_sets: Api<capi::MachineSet> = Api::namespaced(ctx.client.clone(), &config.capi_namespace);

    let watcher_config = default_watcher_config();
    let (reader, stream) = create_stream(mapi_sets, watcher_config.clone());
    let namespace = config.mapi_namespace.clone();

    let results = Controller::for_stream(stream, reader)
        .watches(capi_sets, watcher_config, move |s: capi::MachineSet| {
            paired_ref::<mapi::MachineSet, _>(&s, &namespace)
        })
        .run(machineset_sync::reconcile, machineset_sync::error_policy, ctx.clone());
    drain(machineset_sync::KIND, results).await;
}

/// MachineSets that exist only on the CAPI side.
async fn run_capi_machineset_controller(ctx: Arc<Context>) {
    let capi_sets: Api<capi::MachineSet> =
        Api::namespaced(ctx.client.clone(), &ctx.config.capi_namespace);
    let (reader, stream) = create_stream(capi_sets, default_watcher_config());
    let results = Controller::for_stream(stream, reader).run(
        machineset_sync::reconcile_capi,
        machineset_sync::error_policy,
        ctx.clone(),
    );
    drain(machineset_sync::KIND, results).await;
}

/// Run all synchronization controllers.
///
/// Can be called from main.rs or spawned as a background task during
/// integration tests. If health_state is provided, metrics are recorded for
/// every pass.
pub async fn run_controllers(client: Client, config: SyncConfig, health_state: Option<Arc<HealthState>>) {
    info!(
        mapi_namespace = %config.mapi_namespace,
        capi_namespace = %config.capi_namespace,
        platform = %config.platform,
        "Starting machine sync controllers"
    );

    // Mark as ready once we start the controllers
    if let Some(ref state) = health_state {
        state.set_ready(true).await;
    }

    let ctx = Arc::new(Context::new(client, config, health_state));
    tokio::join!(
        run_machine_controller(ctx.clone()),
        run_capi_machine_controller(ctx.clone()),
        run_machineset_controller(ctx.clone()),
        run_capi_machineset_controller(ctx),
    );

    // This should never complete in normal operation
    error!("Controller streams ended unexpectedly");
}
