//! Machine synchronization.
//!
//! One pass reads both sides of a pair into a [`MachineSnapshot`], plans the
//! writes with [`plan_machine`] (pure) and applies them through the
//! [`Executor`]. A write conflict restarts the whole pass from a fresh read.

use std::sync::Arc;
use std::time::Instant;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::DynamicObject;
use kube::runtime::controller::Action;
use kube::{Api, Resource, ResourceExt};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::controller::actions::{Execution, Executor, SyncAction};
use crate::controller::authority::{
    AuthorityDecision, AuthorityStateMachine, DEFAULT_AUTHORITATIVE_API, TransitionContext, decide,
    resolve, sync_source,
};
use crate::controller::common::retry_on_conflict;
use crate::controller::context::Context;
use crate::controller::error::{ConvergenceClass, Error, Result};
use crate::controller::mirror::{
    DeletionStep, MirrorDecision, Presence, Side, adoption_patch, owning_set, plan_deletion,
    plan_existence,
};
use crate::controller::pause;
use crate::controller::status_sync::{
    SYNC_FIELD_KEYS, StatusWrite, SyncFields, SyncOutcome, conversion_failed_write, is_converged,
    mapi_sync_fields,
};
use crate::convert::machine::{
    machine_status_to_capi, machine_status_to_mapi, machine_to_capi, machine_to_mapi,
};
use crate::convert::{ConversionContext, ConversionError, SyncDirection};
use crate::crd::constants::{CAPI_GROUP, CAPI_PAUSED_ANNOTATION, SYNC_FINALIZER};
use crate::crd::{AuthoritativeApi, Condition, capi, mapi};
use crate::resources::infra;
use crate::resources::owner_reference;

/// Kind label used for metrics, events and tracker keys
pub const KIND: &str = "Machine";

/// MAPI status keys written from a converted CAPI status
pub const MAPI_CONVERTED_STATUS_KEYS: &[&str] = &[
    "phase",
    "nodeRef",
    "lastUpdated",
    "addresses",
    "errorReason",
    "errorMessage",
    "providerStatus",
];

/// MAPI status keys owned by the synchronizer
pub const MAPI_SYNC_STATUS_KEYS: &[&str] = SYNC_FIELD_KEYS;

/// CAPI status keys written from a converted MAPI status.
///
/// v1beta2 `conditions` belong to the CAPI reconciler and are never written.
pub const CAPI_STATUS_KEYS: &[&str] = &["phase", "nodeRef", "lastUpdated", "addresses", "deprecated"];

type MachineAction = SyncAction<mapi::Machine, capi::Machine>;

/// Everything observed about one logical machine
#[derive(Clone, Debug, Default)]
pub struct MachineSnapshot {
    pub mapi: Option<mapi::Machine>,
    pub capi: Option<capi::Machine>,
    /// Infrastructure machine referenced by the CAPI machine
    pub infra: Option<DynamicObject>,
    /// Owner reference to the MAPI MachineSet mirroring the CAPI machine's set.
    /// Only looked up when the MAPI machine is missing.
    pub mapi_set_owner: Option<OwnerReference>,
}

/// Result of planning one pass
#[derive(Debug, Default)]
pub struct MachinePlan {
    pub actions: Vec<MachineAction>,
    /// Pending MAPI status write, kept apart so divergence can amend it
    pub mapi_status: Option<StatusWrite>,
    pub decision: Option<AuthorityDecision>,
    /// Whether the mirror reflects the latest source generation at rest
    pub converged: bool,
    /// When to look again; `None` waits for the next change
    pub requeue: Option<ConvergenceClass>,
    pub conversion_error: Option<ConversionError>,
    pub validation_error: Option<String>,
}

impl MachinePlan {
    fn requeue(requeue: ConvergenceClass) -> Self {
        Self {
            requeue: Some(requeue),
            ..Default::default()
        }
    }

    /// All writes of this pass, the MAPI status last.
    pub fn into_actions(self) -> Vec<MachineAction> {
        let mut actions = self.actions;
        if let Some(patch) = self.mapi_status.and_then(StatusWrite::into_patch) {
            actions.push(SyncAction::PatchStatus {
                side: Side::Mapi,
                patch,
            });
        }
        actions
    }
}

fn infra_kind(conv: &ConversionContext) -> String {
    conv.platform.infra_machine_kind().to_string()
}

fn infra_name(capi: &capi::Machine) -> String {
    let name = &capi.spec.infrastructure_ref.name;
    if name.is_empty() {
        capi.name_any()
    } else {
        name.clone()
    }
}

/// Declared authority of a MAPI machine, falling back to the default on an invalid value.
fn declared_authority(machine: &mapi::Machine) -> std::result::Result<AuthoritativeApi, String> {
    resolve(machine.spec.authoritative_api).map_err(|e| e.to_string())
}

/// Plan one pass for a logical machine.
pub fn plan_machine(
    snapshot: &MachineSnapshot,
    conv: &ConversionContext,
    sm: &AuthorityStateMachine,
) -> Result<MachinePlan> {
    let mapi_p = Presence::of(snapshot.mapi.as_ref());
    let capi_p = Presence::of(snapshot.capi.as_ref());

    match plan_existence(mapi_p, capi_p, snapshot.mapi_set_owner.is_some()) {
        MirrorDecision::Ignore => {
            let mut plan = MachinePlan::default();
            if capi_p.has_finalizer {
                plan.actions.push(SyncAction::RemoveFinalizer(Side::Capi));
            }
            Ok(plan)
        }
        MirrorDecision::Deleting => Ok(plan_machine_deletion(snapshot, conv, mapi_p, capi_p)),
        MirrorDecision::CreateCapi => plan_create_capi(snapshot, conv, sm, mapi_p),
        MirrorDecision::CreateMapi => plan_create_mapi(snapshot, conv, capi_p),
        MirrorDecision::Paired => plan_paired(snapshot, conv, sm, mapi_p, capi_p),
    }
}

fn plan_machine_deletion(
    snapshot: &MachineSnapshot,
    conv: &ConversionContext,
    mapi_p: Presence,
    capi_p: Presence,
) -> MachinePlan {
    let owner = match &snapshot.mapi {
        Some(machine) => {
            let declared = declared_authority(machine).unwrap_or(DEFAULT_AUTHORITATIVE_API);
            let previous = machine.status.as_ref().and_then(|s| s.authoritative_api);
            Side::of(sync_source(previous.unwrap_or(declared), declared))
        }
        None => Side::Capi,
    };

    let mut plan = MachinePlan::requeue(ConvergenceClass::Short);
    for step in plan_deletion(owner, mapi_p, capi_p) {
        match step {
            DeletionStep::DeleteMirror(Side::Capi) => {
                if let Some(capi) = &snapshot.capi {
                    plan.actions.push(SyncAction::DeleteInfra {
                        kind: infra_kind(conv),
                        name: infra_name(capi),
                    });
                }
                plan.actions.push(SyncAction::Delete(Side::Capi));
            }
            DeletionStep::DeleteMirror(Side::Mapi) => plan.actions.push(SyncAction::Delete(Side::Mapi)),
            DeletionStep::Release(side) => plan.actions.push(SyncAction::RemoveFinalizer(side)),
        }
    }
    plan
}

fn generation<K: Resource>(resource: &K) -> Option<i64> {
    resource.meta().generation
}

fn plan_create_capi(
    snapshot: &MachineSnapshot,
    conv: &ConversionContext,
    sm: &AuthorityStateMachine,
    mapi_p: Presence,
) -> Result<MachinePlan> {
    let Some(machine) = &snapshot.mapi else {
        return Ok(MachinePlan::default());
    };
    let declared = match declared_authority(machine) {
        Ok(declared) => declared,
        Err(reason) => {
            return Ok(MachinePlan {
                validation_error: Some(reason),
                ..MachinePlan::requeue(ConvergenceClass::Overlong)
            });
        }
    };
    let status = machine.status.clone().unwrap_or_default();
    let ctx = TransitionContext {
        source_paused: pause::mapi_is_paused(&status.conditions),
        synchronized_generation: status.synchronized_generation,
        source_generation: generation(machine),
    };
    let decision = decide(sm, status.authoritative_api, declared, &ctx);
    let pause_plan = pause::plan(decision.effective);

    let mirror = match machine_to_capi(machine, conv) {
        Ok(mirror) => mirror,
        Err(e) => {
            let current = SyncFields {
                conditions: status.conditions.clone(),
                authoritative_api: status.authoritative_api,
                synchronized_generation: status.synchronized_generation,
            };
            let write = conversion_failed_write(
                &serde_json::to_value(&status)?,
                &current,
                &decision,
                &pause_plan,
                SyncDirection::MapiToCapi,
                &e.to_string(),
                machine.resource_version(),
            )?;
            return Ok(MachinePlan {
                mapi_status: Some(write),
                decision: Some(decision),
                conversion_error: Some(e),
                ..MachinePlan::requeue(ConvergenceClass::Medium)
            });
        }
    };

    let mut object = mirror.machine;
    if pause_plan.capi_paused {
        object
            .annotations_mut()
            .insert(CAPI_PAUSED_ANNOTATION.to_string(), String::new());
    }
    object.finalizers_mut().push(SYNC_FINALIZER.to_string());
    let infra_object = infra::build_machine(
        &object.name_any(),
        &conv.capi_namespace,
        object.labels().clone(),
        &mirror.infra,
    )?;

    let mut plan = MachinePlan::requeue(ConvergenceClass::Short);
    if !mapi_p.has_finalizer {
        plan.actions.push(SyncAction::AddFinalizer(Side::Mapi));
    }
    plan.actions.push(SyncAction::CreateCapi(object));
    plan.actions.push(SyncAction::EnsureInfra {
        object: infra_object,
        owner: Side::Capi,
    });
    plan.decision = Some(decision);
    Ok(plan)
}

fn plan_create_mapi(
    snapshot: &MachineSnapshot,
    conv: &ConversionContext,
    capi_p: Presence,
) -> Result<MachinePlan> {
    let Some(machine) = &snapshot.capi else {
        return Ok(MachinePlan::default());
    };
    let Some(infra_object) = &snapshot.infra else {
        debug!(name = %machine.name_any(), "Infrastructure machine not found yet");
        return Ok(MachinePlan::requeue(ConvergenceClass::Short));
    };

    let mirror = infra::machine_spec(conv.platform, infra_object)
        .and_then(|spec| machine_to_mapi(machine, &spec, conv));
    let mut object = match mirror {
        Ok(object) => object,
        Err(e) => {
            return Ok(MachinePlan {
                conversion_error: Some(e),
                ..MachinePlan::requeue(ConvergenceClass::Medium)
            });
        }
    };
    object.metadata.owner_references = snapshot.mapi_set_owner.clone().map(|o| vec![o]);
    object.finalizers_mut().push(SYNC_FINALIZER.to_string());

    let mut plan = MachinePlan::requeue(ConvergenceClass::Short);
    if !capi_p.has_finalizer {
        plan.actions.push(SyncAction::AddFinalizer(Side::Capi));
    }
    plan.actions.push(SyncAction::CreateMapi(object));
    Ok(plan)
}

/// Converted status of the source side
enum Converted {
    /// MAPI is the source: writes for the CAPI side
    ToCapi,
    /// CAPI is the source: the converted MAPI status
    ToMapi(mapi::MachineStatus),
    Failed(ConversionError),
    /// A required object is not there yet
    Missing,
}

fn plan_paired(
    snapshot: &MachineSnapshot,
    conv: &ConversionContext,
    sm: &AuthorityStateMachine,
    mapi_p: Presence,
    capi_p: Presence,
) -> Result<MachinePlan> {
    let (Some(machine), Some(mirror)) = (&snapshot.mapi, &snapshot.capi) else {
        return Ok(MachinePlan::default());
    };
    let declared = match declared_authority(machine) {
        Ok(declared) => declared,
        Err(reason) => {
            return Ok(MachinePlan {
                validation_error: Some(reason),
                ..MachinePlan::requeue(ConvergenceClass::Overlong)
            });
        }
    };

    let mut plan = MachinePlan::default();
    if !mapi_p.has_finalizer {
        plan.actions.push(SyncAction::AddFinalizer(Side::Mapi));
    }
    if !capi_p.has_finalizer {
        plan.actions.push(SyncAction::AddFinalizer(Side::Capi));
    }
    if let Some(patch) = adoption_patch(mirror.labels(), &conv.infrastructure_name) {
        plan.actions.push(SyncAction::PatchMetadata {
            side: Side::Capi,
            patch,
        });
    }
    // Later writes carry the observed resourceVersions, which these bump.
    if !plan.actions.is_empty() {
        plan.requeue = Some(ConvergenceClass::Short);
        return Ok(plan);
    }

    // Authority
    let status = machine.status.clone().unwrap_or_default();
    let capi_status = mirror.status.clone().unwrap_or_default();
    let previous = status.authoritative_api;
    let pending_source = sync_source(previous.unwrap_or(declared), declared);
    let ctx = TransitionContext {
        source_paused: pause::source_paused(
            pending_source,
            &status.conditions,
            mirror.annotations(),
            &capi_status.conditions,
        ),
        synchronized_generation: status.synchronized_generation,
        source_generation: match pending_source {
            AuthoritativeApi::ClusterApi => generation(mirror),
            _ => generation(machine),
        },
    };
    let decision = decide(sm, previous, declared, &ctx);

    // Pause
    let pause_plan = pause::plan(decision.effective);
    let pause_flipped = pause::has_pause_annotation(mirror.annotations()) != pause_plan.capi_paused;
    if pause_flipped {
        plan.actions.push(SyncAction::PatchMetadata {
            side: Side::Capi,
            patch: pause::pause_annotation_patch(pause_plan.capi_paused),
        });
    }

    // Status
    let source = decision.source();
    let converted = match source {
        AuthoritativeApi::ClusterApi => match &snapshot.infra {
            None => Converted::Missing,
            Some(infra_object) => match infra::provider_status(conv.platform, infra_object) {
                Ok(provider) => Converted::ToMapi(machine_status_to_mapi(&capi_status, &provider)),
                Err(e) => Converted::Failed(e),
            },
        },
        // The CAPI status patch would race the pause patch's resourceVersion.
        _ if pause_flipped => Converted::Missing,
        _ => match machine_status_to_capi(&status) {
            Err(e) => Converted::Failed(e),
            Ok((wanted, provider)) => {
                let current = serde_json::to_value(&capi_status)?;
                let write = StatusWrite::new(
                    &current,
                    &serde_json::to_value(&wanted)?,
                    CAPI_STATUS_KEYS,
                    Vec::new(),
                    mirror.resource_version(),
                );
                if let Some(patch) = write.into_patch() {
                    plan.actions.push(SyncAction::PatchStatus {
                        side: Side::Capi,
                        patch,
                    });
                }
                match &snapshot.infra {
                    Some(infra_object) => {
                        if let Some(wanted) = provider.to_infra_status(conv.platform)
                            && !infra::status_matches(infra_object, &wanted)
                        {
                            plan.actions.push(SyncAction::PatchInfraStatus {
                                kind: infra_kind(conv),
                                name: infra_object.name_any(),
                                patch: json!({ "status": wanted }),
                            });
                        }
                        Converted::ToCapi
                    }
                    // Recreate a lost infrastructure machine from the source spec.
                    None => match machine_to_capi(machine, conv) {
                        Ok(rebuilt) => {
                            plan.actions.push(SyncAction::EnsureInfra {
                                object: infra::build_machine(
                                    &infra_name(mirror),
                                    &conv.capi_namespace,
                                    mirror.labels().clone(),
                                    &rebuilt.infra,
                                )?,
                                owner: Side::Capi,
                            });
                            Converted::Missing
                        }
                        Err(e) => Converted::Failed(e),
                    },
                }
            }
        },
    };

    let outcome = SyncOutcome {
        direction: match source {
            AuthoritativeApi::ClusterApi => SyncDirection::CapiToMapi,
            _ => SyncDirection::MapiToCapi,
        },
        source_generation: match source {
            AuthoritativeApi::ClusterApi => generation(mirror),
            _ => generation(machine),
        },
        succeeded: matches!(converted, Converted::ToCapi | Converted::ToMapi(_)),
        foreign_conditions: match &converted {
            Converted::ToMapi(s) => Some(s.conditions.clone()),
            _ => None,
        },
    };
    let current_fields = SyncFields {
        conditions: status.conditions.clone(),
        authoritative_api: previous,
        synchronized_generation: status.synchronized_generation,
    };
    let fields = mapi_sync_fields(&current_fields, &decision, &pause_plan, &outcome);

    let (mut next, keys): (mapi::MachineStatus, Vec<&str>) = match &converted {
        Converted::ToMapi(s) => (
            s.clone(),
            MAPI_CONVERTED_STATUS_KEYS
                .iter()
                .chain(MAPI_SYNC_STATUS_KEYS)
                .copied()
                .collect(),
        ),
        _ => (status.clone(), MAPI_SYNC_STATUS_KEYS.to_vec()),
    };
    next.conditions = fields.conditions.clone();
    next.authoritative_api = fields.authoritative_api;
    next.synchronized_generation = fields.synchronized_generation;
    plan.mapi_status = Some(StatusWrite::new(
        &serde_json::to_value(&status)?,
        &serde_json::to_value(&next)?,
        &keys,
        fields.conditions.clone(),
        machine.resource_version(),
    ));

    plan.converged = is_converged(&decision, &fields, &outcome);
    plan.requeue = Some(match &converted {
        Converted::Failed(_) => ConvergenceClass::Medium,
        _ if !plan.converged || decision.changed() => ConvergenceClass::Short,
        _ => ConvergenceClass::Long,
    });
    if let Converted::Failed(e) = converted {
        plan.conversion_error = Some(e);
    }
    plan.decision = Some(decision);
    Ok(plan)
}

/// Read both sides of the pair `name`.
pub async fn observe(ctx: &Context, name: &str) -> Result<MachineSnapshot> {
    let client = ctx.client.clone();
    let mapi_api: Api<mapi::Machine> = Api::namespaced(client.clone(), &ctx.config.mapi_namespace);
    let capi_api: Api<capi::Machine> = Api::namespaced(client.clone(), &ctx.config.capi_namespace);

    let mapi = mapi_api.get_opt(name).await?;
    let capi = capi_api.get_opt(name).await?;

    let infra = match &capi {
        Some(machine) => {
            let infra_api: Api<DynamicObject> = Api::namespaced_with(
                client.clone(),
                &ctx.config.capi_namespace,
                &infra::machine_api_resource(ctx.config.platform),
            );
            infra_api.get_opt(&infra_name(machine)).await?
        }
        None => None,
    };

    let mapi_set_owner = match (&mapi, &capi) {
        (None, Some(machine)) => match owning_set(machine.owner_references(), CAPI_GROUP) {
            Some(set) => {
                let sets: Api<mapi::MachineSet> =
                    Api::namespaced(client, &ctx.config.mapi_namespace);
                sets.get_opt(&set).await?.and_then(|s| owner_reference(&s))
            }
            None => None,
        },
        _ => None,
    };

    Ok(MachineSnapshot {
        mapi,
        capi,
        infra,
        mapi_set_owner,
    })
}

/// Publish events and metrics for what a plan found.
async fn report(ctx: &Context, snapshot: &MachineSnapshot, plan: &MachinePlan) {
    let metrics = ctx.health_state.as_ref().map(|h| &h.metrics);
    let Some(machine) = &snapshot.mapi else {
        if let (Some(e), Some(machine)) = (&plan.conversion_error, &snapshot.capi) {
            warn!(name = %machine.name_any(), error = %e, "Conversion failed");
            if let Some(m) = metrics {
                m.record_conversion_failure(KIND);
            }
            ctx.publish_warning_event(machine, "ConversionFailed", "Convert", Some(e.to_string()))
                .await;
        }
        return;
    };

    if let Some(reason) = &plan.validation_error {
        warn!(name = %machine.name_any(), reason = %reason, "Invalid authoritativeAPI");
        ctx.publish_warning_event(machine, "InvalidAuthority", "Resolve", Some(reason.clone()))
            .await;
    }
    if let Some(e) = &plan.conversion_error {
        warn!(name = %machine.name_any(), error = %e, "Conversion failed");
        if let Some(m) = metrics {
            m.record_conversion_failure(KIND);
        }
        ctx.publish_warning_event(machine, "ConversionFailed", "Convert", Some(e.to_string()))
            .await;
    }
    if let Some(decision) = &plan.decision {
        if let Some(event) = decision.applied {
            info!(
                name = %machine.name_any(),
                event = %event,
                from = ?decision.previous,
                to = %decision.effective,
                "Authority transition"
            );
            if let Some(m) = metrics {
                m.record_authority_transition(KIND, &decision.effective.to_string());
            }
            ctx.publish_normal_event(
                machine,
                "AuthorityTransition",
                "Transition",
                Some(format!("{}: status.authoritativeAPI is {}", event, decision.effective)),
            )
            .await;
        }
        if let Some(reason) = &decision.blocked {
            debug!(name = %machine.name_any(), reason = %reason, "Authority transition waiting");
        }
    }
}

/// Attach a divergence report once the pair has lagged past the deadline.
async fn check_divergence(ctx: &Context, snapshot: &MachineSnapshot, plan: &mut MachinePlan, name: &str) -> Result<()> {
    let key = format!("{}/{}", KIND, name);
    let Some(machine) = &snapshot.mapi else {
        ctx.divergence.forget(&key).await;
        return Ok(());
    };
    if machine.meta().deletion_timestamp.is_some() {
        ctx.divergence.forget(&key).await;
        return Ok(());
    }

    let lag = ctx.divergence.observe(&key, plan.converged, Instant::now()).await;
    if let Some(health) = &ctx.health_state {
        let lagging = ctx.divergence.lagging(&format!("{}/", KIND)).await;
        health.metrics.set_lagging(KIND, lagging as i64);
    }
    let Some(lag) = lag.filter(|lag| *lag > ctx.config.divergence_deadline) else {
        return Ok(());
    };
    if let Some(write) = &mut plan.mapi_status {
        write.diverge(lag)?;
    } else {
        // No status write was planned (e.g. waiting for the mirror to exist).
        let mut write = StatusWrite::new(
            &serde_json::to_value(machine.status.clone().unwrap_or_default())?,
            &serde_json::to_value(machine.status.clone().unwrap_or_default())?,
            &["conditions"],
            machine
                .status
                .as_ref()
                .map(|s| s.conditions.clone())
                .unwrap_or_default(),
            machine.resource_version(),
        );
        write.diverge(lag)?;
        plan.mapi_status = Some(write);
    }

    warn!(name = %name, lag_secs = lag.as_secs(), "Mirror has diverged from its source");
    if let Some(health) = &ctx.health_state {
        health.metrics.record_divergence(KIND, name);
    }
    ctx.publish_warning_event(
        machine,
        "SyncDiverged",
        "Synchronize",
        Some(format!("Mirror has not converged for {}s", lag.as_secs())),
    )
    .await;
    Ok(())
}

async fn sync_once(ctx: &Context, name: &str, root: Side, sm: &AuthorityStateMachine) -> Result<Action> {
    let snapshot = observe(ctx, name).await?;
    if root == Side::Capi && snapshot.mapi.is_some() {
        // Pairs with a MAPI machine are driven from the MAPI side.
        return Ok(Action::await_change());
    }

    let conv = ctx.conversion_context();
    let mut plan = plan_machine(&snapshot, &conv, sm)?;
    report(ctx, &snapshot, &plan).await;
    check_divergence(ctx, &snapshot, &mut plan, name).await?;

    let requeue = plan.requeue;
    let actions = plan.into_actions();
    if !actions.is_empty() {
        let executor: Executor<'_, mapi::Machine, capi::Machine> = Executor::new(ctx, KIND, name);
        if let Execution::ZombieAverted(side) = executor.run(actions).await? {
            info!(name = %name, side = %side, "Removed mirror of a deleted machine");
            return Ok(Action::await_change());
        }
    }

    Ok(match requeue {
        Some(class) => Action::requeue(class.duration()),
        None => Action::await_change(),
    })
}

async fn sync(ctx: &Context, name: &str, root: Side) -> Result<Action> {
    let start = Instant::now();
    let sm = AuthorityStateMachine::new();
    let action = retry_on_conflict(ctx.config.conflict_retries, "machine sync", || {
        sync_once(ctx, name, root, &sm)
    })
    .await?;

    if let Some(health) = &ctx.health_state {
        health
            .metrics
            .record_sync(KIND, name, start.elapsed().as_secs_f64());
        health.last_sync.store(
            jiff::Timestamp::now().as_second().max(0) as u64,
            std::sync::atomic::Ordering::Relaxed,
        );
    }
    Ok(action)
}

/// Reconcile a machine pair from a MAPI Machine event.
pub async fn reconcile(obj: Arc<mapi::Machine>, ctx: Arc<Context>) -> Result<Action> {
    sync(&ctx, &obj.name_any(), Side::Mapi).await
}

/// Reconcile a machine pair from a CAPI Machine event.
///
/// Only pairs without a MAPI machine are handled here.
pub async fn reconcile_capi(obj: Arc<capi::Machine>, ctx: Arc<Context>) -> Result<Action> {
    sync(&ctx, &obj.name_any(), Side::Capi).await
}

/// Error policy shared by both machine controllers
pub fn error_policy<K: ResourceExt>(obj: Arc<K>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    warn!(kind = KIND, name = %name, error = %error, "Machine sync failed");
    if let Some(health) = &ctx.health_state {
        health.metrics.record_error(KIND, &name);
    }
    Action::requeue(error.requeue_after())
}

/// MAPI conditions after a pass, for tests and diagnostics.
pub fn planned_conditions(plan: &MachinePlan) -> Option<Vec<Condition>> {
    let patch = plan.mapi_status.clone()?.into_patch()?;
    serde_json::from_value(patch.pointer("/status/conditions")?.clone()).ok()
}
