//! MachineSet synchronization.
//!
//! Same pass structure as machines, with two differences: the synced spec
//! fields (`replicas`, `template`) keep flowing from the source after the
//! mirror exists, and the CAPI side references an infrastructure machine
//! template whose name changes whenever the template spec does.

use std::sync::Arc;
use std::time::Instant;

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
use crate::controller::common::{retry_on_conflict, with_resource_version};
use crate::controller::context::Context;
use crate::controller::error::{ConvergenceClass, Error, Result};
use crate::controller::mirror::{
    DeletionStep, MirrorDecision, Presence, Side, adoption_patch, plan_deletion, plan_existence,
};
use crate::controller::pause;
use crate::controller::status_sync::{
    SYNC_FIELD_KEYS, StatusWrite, SyncFields, SyncOutcome, conversion_failed_write, is_converged,
    mapi_sync_fields,
};
use crate::convert::machineset::{
    capi_synced_spec_eq, machineset_status_to_capi, machineset_status_to_mapi, machineset_to_capi,
    machineset_to_mapi, mapi_synced_spec_eq,
};
use crate::convert::{ConversionContext, ConversionError, SyncDirection};
use crate::crd::constants::{CAPI_PAUSED_ANNOTATION, SYNC_FINALIZER};
use crate::crd::{AuthoritativeApi, capi, mapi};
use crate::resources::infra;

/// Kind label used for metrics, events and tracker keys
pub const KIND: &str = "MachineSet";

/// MAPI status keys written from a converted CAPI status
pub const MAPI_CONVERTED_STATUS_KEYS: &[&str] = &[
    "replicas",
    "fullyLabeledReplicas",
    "readyReplicas",
    "availableReplicas",
    "observedGeneration",
    "errorReason",
    "errorMessage",
];

/// MAPI status keys owned by the synchronizer
pub const MAPI_SYNC_STATUS_KEYS: &[&str] = SYNC_FIELD_KEYS;

/// CAPI status keys written from a converted MAPI status
pub const CAPI_STATUS_KEYS: &[&str] = &[
    "replicas",
    "readyReplicas",
    "availableReplicas",
    "observedGeneration",
    "deprecated",
];

type MachineSetAction = SyncAction<mapi::MachineSet, capi::MachineSet>;

/// Everything observed about one MachineSet pair
#[derive(Clone, Debug, Default)]
pub struct MachineSetSnapshot {
    pub mapi: Option<mapi::MachineSet>,
    pub capi: Option<capi::MachineSet>,
    /// Infrastructure template referenced by the CAPI MachineSet
    pub template: Option<DynamicObject>,
}

/// Result of planning one pass
#[derive(Debug, Default)]
pub struct MachineSetPlan {
    pub actions: Vec<MachineSetAction>,
    /// Pending MAPI status write, kept apart so divergence can amend it
    pub mapi_status: Option<StatusWrite>,
    pub decision: Option<AuthorityDecision>,
    pub converged: bool,
    pub requeue: Option<ConvergenceClass>,
    pub conversion_error: Option<ConversionError>,
    pub validation_error: Option<String>,
}

impl MachineSetPlan {
    fn requeue(requeue: ConvergenceClass) -> Self {
        Self {
            requeue: Some(requeue),
            ..Default::default()
        }
    }

    /// All writes of this pass, the MAPI status last.
    pub fn into_actions(self) -> Vec<MachineSetAction> {
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

fn template_name(set: &capi::MachineSet) -> Option<String> {
    let name = &set.spec.template.spec.infrastructure_ref.name;
    (!name.is_empty()).then(|| name.clone())
}

fn generation<K: Resource>(resource: &K) -> Option<i64> {
    resource.meta().generation
}

/// Plan one pass for a MachineSet pair.
///
/// CAPI MachineSets without a MAPI counterpart are never mirrored.
pub fn plan_machineset(
    snapshot: &MachineSetSnapshot,
    conv: &ConversionContext,
    sm: &AuthorityStateMachine,
) -> Result<MachineSetPlan> {
    let mapi_p = Presence::of(snapshot.mapi.as_ref());
    let capi_p = Presence::of(snapshot.capi.as_ref());

    match plan_existence(mapi_p, capi_p, false) {
        MirrorDecision::Ignore | MirrorDecision::CreateMapi => {
            let mut plan = MachineSetPlan::default();
            if capi_p.has_finalizer {
                plan.actions.push(SyncAction::RemoveFinalizer(Side::Capi));
            }
            Ok(plan)
        }
        MirrorDecision::Deleting => Ok(plan_deletion_pass(snapshot, conv, mapi_p, capi_p)),
        MirrorDecision::CreateCapi => plan_create_capi(snapshot, conv, sm, mapi_p),
        MirrorDecision::Paired => plan_paired(snapshot, conv, sm, mapi_p, capi_p),
    }
}

fn plan_deletion_pass(
    snapshot: &MachineSetSnapshot,
    conv: &ConversionContext,
    mapi_p: Presence,
    capi_p: Presence,
) -> MachineSetPlan {
    let owner = match &snapshot.mapi {
        Some(set) => {
            let declared = resolve(set.spec.authoritative_api).unwrap_or(DEFAULT_AUTHORITATIVE_API);
            let previous = set.status.as_ref().and_then(|s| s.authoritative_api);
            Side::of(sync_source(previous.unwrap_or(declared), declared))
        }
        None => Side::Capi,
    };

    let mut plan = MachineSetPlan::requeue(ConvergenceClass::Short);
    for step in plan_deletion(owner, mapi_p, capi_p) {
        match step {
            DeletionStep::DeleteMirror(Side::Capi) => {
                plan.actions.push(SyncAction::Delete(Side::Capi));
                if let Some(name) = snapshot.capi.as_ref().and_then(template_name) {
                    plan.actions.push(SyncAction::DeleteInfra {
                        kind: conv.platform.infra_template_kind(),
                        name,
                    });
                }
            }
            DeletionStep::DeleteMirror(Side::Mapi) => plan.actions.push(SyncAction::Delete(Side::Mapi)),
            DeletionStep::Release(side) => plan.actions.push(SyncAction::RemoveFinalizer(side)),
        }
    }
    plan
}

fn plan_create_capi(
    snapshot: &MachineSetSnapshot,
    conv: &ConversionContext,
    sm: &AuthorityStateMachine,
    mapi_p: Presence,
) -> Result<MachineSetPlan> {
    let Some(set) = &snapshot.mapi else {
        return Ok(MachineSetPlan::default());
    };
    let declared = match resolve(set.spec.authoritative_api) {
        Ok(declared) => declared,
        Err(e) => {
            return Ok(MachineSetPlan {
                validation_error: Some(e.to_string()),
                ..MachineSetPlan::requeue(ConvergenceClass::Overlong)
            });
        }
    };
    let status = set.status.clone().unwrap_or_default();
    let ctx = TransitionContext {
        source_paused: pause::mapi_is_paused(&status.conditions),
        synchronized_generation: status.synchronized_generation,
        source_generation: generation(set),
    };
    let decision = decide(sm, status.authoritative_api, declared, &ctx);

    let mirror = match machineset_to_capi(set, conv) {
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
                &pause::plan(decision.effective),
                SyncDirection::MapiToCapi,
                &e.to_string(),
                set.resource_version(),
            )?;
            return Ok(MachineSetPlan {
                mapi_status: Some(write),
                decision: Some(decision),
                conversion_error: Some(e),
                ..MachineSetPlan::requeue(ConvergenceClass::Medium)
            });
        }
    };

    let mut object = mirror.machine_set;
    if pause::plan(decision.effective).capi_paused {
        object
            .annotations_mut()
            .insert(CAPI_PAUSED_ANNOTATION.to_string(), String::new());
    }
    object.finalizers_mut().push(SYNC_FINALIZER.to_string());

    let mut plan = MachineSetPlan::requeue(ConvergenceClass::Short);
    if !mapi_p.has_finalizer {
        plan.actions.push(SyncAction::AddFinalizer(Side::Mapi));
    }
    let template = infra::build_template(
        &mirror.template_name,
        &conv.capi_namespace,
        object.labels().clone(),
        &mirror.template,
    )?;
    plan.actions.push(SyncAction::CreateCapi(object));
    plan.actions.push(SyncAction::EnsureInfra {
        object: template,
        owner: Side::Capi,
    });
    plan.decision = Some(decision);
    Ok(plan)
}

/// Outcome of syncing spec and status from the source
enum Converted {
    /// MAPI is the source and the CAPI writes are planned
    ToCapi,
    /// CAPI is the source: the converted MAPI status
    ToMapi(mapi::MachineSetStatus),
    Failed(ConversionError),
    /// The infrastructure template is not there yet
    Missing,
    /// The MAPI spec was patched; its status waits for the next pass
    MapiSpecPatched,
}

fn plan_paired(
    snapshot: &MachineSetSnapshot,
    conv: &ConversionContext,
    sm: &AuthorityStateMachine,
    mapi_p: Presence,
    capi_p: Presence,
) -> Result<MachineSetPlan> {
    let (Some(set), Some(mirror)) = (&snapshot.mapi, &snapshot.capi) else {
        return Ok(MachineSetPlan::default());
    };
    let declared = match resolve(set.spec.authoritative_api) {
        Ok(declared) => declared,
        Err(e) => {
            return Ok(MachineSetPlan {
                validation_error: Some(e.to_string()),
                ..MachineSetPlan::requeue(ConvergenceClass::Overlong)
            });
        }
    };

    let mut plan = MachineSetPlan::default();
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

    let status = set.status.clone().unwrap_or_default();
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
            _ => generation(set),
        },
    };
    let decision = decide(sm, previous, declared, &ctx);

    let pause_plan = pause::plan(decision.effective);
    let pause_flipped = pause::has_pause_annotation(mirror.annotations()) != pause_plan.capi_paused;
    if pause_flipped {
        plan.actions.push(SyncAction::PatchMetadata {
            side: Side::Capi,
            patch: pause::pause_annotation_patch(pause_plan.capi_paused),
        });
    }

    let source = decision.source();
    let converted = match source {
        AuthoritativeApi::ClusterApi => sync_from_capi(snapshot, set, mirror, conv, &mut plan)?,
        // The CAPI writes would race the pause patch's resourceVersion.
        _ if pause_flipped => Converted::Missing,
        _ => sync_from_mapi(snapshot, set, mirror, conv, &mut plan)?,
    };

    let outcome = SyncOutcome {
        direction: match source {
            AuthoritativeApi::ClusterApi => SyncDirection::CapiToMapi,
            _ => SyncDirection::MapiToCapi,
        },
        source_generation: match source {
            AuthoritativeApi::ClusterApi => generation(mirror),
            _ => generation(set),
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

    let (mut next, keys): (mapi::MachineSetStatus, Vec<&str>) = match &converted {
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
    if !matches!(converted, Converted::MapiSpecPatched) {
        plan.mapi_status = Some(StatusWrite::new(
            &serde_json::to_value(&status)?,
            &serde_json::to_value(&next)?,
            &keys,
            fields.conditions.clone(),
            set.resource_version(),
        ));
    }

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

/// MAPI is the source: roll the template if needed, then copy the synced
/// spec fields and the status to CAPI.
fn sync_from_mapi(
    snapshot: &MachineSetSnapshot,
    set: &mapi::MachineSet,
    mirror: &capi::MachineSet,
    conv: &ConversionContext,
    plan: &mut MachineSetPlan,
) -> Result<Converted> {
    let wanted = match machineset_to_capi(set, conv) {
        Ok(wanted) => wanted,
        Err(e) => return Ok(Converted::Failed(e)),
    };

    let current_template = template_name(mirror);
    let template_missing = snapshot.template.is_none();
    if template_missing || current_template.as_deref() != Some(wanted.template_name.as_str()) {
        plan.actions.push(SyncAction::EnsureInfra {
            object: infra::build_template(
                &wanted.template_name,
                &conv.capi_namespace,
                mirror.labels().clone(),
                &wanted.template,
            )?,
            owner: Side::Capi,
        });
    }

    if !capi_synced_spec_eq(&wanted.machine_set.spec, &mirror.spec) {
        let patch = json!({
            "spec": {
                "replicas": wanted.machine_set.spec.replicas,
                "template": serde_json::to_value(&wanted.machine_set.spec.template)?,
            }
        });
        plan.actions.push(SyncAction::PatchSpec {
            side: Side::Capi,
            patch: with_resource_version(patch, mirror.resource_version()),
        });
        if let Some(old) = current_template.filter(|old| *old != wanted.template_name) {
            plan.actions.push(SyncAction::DeleteInfra {
                kind: conv.platform.infra_template_kind(),
                name: old,
            });
        }
        // The status below belongs to the spec just replaced.
        return Ok(Converted::Missing);
    }

    let status = set.status.clone().unwrap_or_default();
    let write = StatusWrite::new(
        &serde_json::to_value(mirror.status.clone().unwrap_or_default())?,
        &serde_json::to_value(machineset_status_to_capi(&status))?,
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
    Ok(if template_missing {
        Converted::Missing
    } else {
        Converted::ToCapi
    })
}

/// CAPI is the source: copy the synced spec fields to MAPI and convert the status.
fn sync_from_capi(
    snapshot: &MachineSetSnapshot,
    set: &mapi::MachineSet,
    mirror: &capi::MachineSet,
    conv: &ConversionContext,
    plan: &mut MachineSetPlan,
) -> Result<Converted> {
    let Some(template) = &snapshot.template else {
        debug!(name = %mirror.name_any(), "Infrastructure template not found yet");
        return Ok(Converted::Missing);
    };
    let wanted = infra::template_spec(conv.platform, template).and_then(|spec| {
        machineset_to_mapi(mirror, &spec, set.spec.template.spec.authoritative_api, conv)
    });
    let wanted = match wanted {
        Ok(wanted) => wanted,
        Err(e) => return Ok(Converted::Failed(e)),
    };

    if !mapi_synced_spec_eq(&wanted.spec, &set.spec) {
        let patch = json!({
            "spec": {
                "replicas": wanted.spec.replicas,
                "template": serde_json::to_value(&wanted.spec.template)?,
            }
        });
        plan.actions.push(SyncAction::PatchSpec {
            side: Side::Mapi,
            patch: with_resource_version(patch, set.resource_version()),
        });
        return Ok(Converted::MapiSpecPatched);
    }

    let status = machineset_status_to_mapi(&mirror.status.clone().unwrap_or_default());
    Ok(Converted::ToMapi(status))
}

/// Read both sides of the MachineSet pair `name`.
pub async fn observe(ctx: &Context, name: &str) -> Result<MachineSetSnapshot> {
    let client = ctx.client.clone();
    let mapi_api: Api<mapi::MachineSet> = Api::namespaced(client.clone(), &ctx.config.mapi_namespace);
    let capi_api: Api<capi::MachineSet> = Api::namespaced(client.clone(), &ctx.config.capi_namespace);

    let mapi = mapi_api.get_opt(name).await?;
    let capi = capi_api.get_opt(name).await?;
    let template = match capi.as_ref().and_then(template_name) {
        Some(template) => {
            let api: Api<DynamicObject> = Api::namespaced_with(
                client,
                &ctx.config.capi_namespace,
                &infra::template_api_resource(ctx.config.platform),
            );
            api.get_opt(&template).await?
        }
        None => None,
    };

    Ok(MachineSetSnapshot {
        mapi,
        capi,
        template,
    })
}

async fn report(ctx: &Context, set: &mapi::MachineSet, plan: &MachineSetPlan) {
    let metrics = ctx.health_state.as_ref().map(|h| &h.metrics);
    if let Some(reason) = &plan.validation_error {
        warn!(name = %set.name_any(), reason = %reason, "Invalid authoritativeAPI");
        ctx.publish_warning_event(set, "InvalidAuthority", "Resolve", Some(reason.clone()))
            .await;
    }
    if let Some(e) = &plan.conversion_error {
        warn!(name = %set.name_any(), error = %e, "Conversion failed");
        if let Some(m) = metrics {
            m.record_conversion_failure(KIND);
        }
        ctx.publish_warning_event(set, "ConversionFailed", "Convert", Some(e.to_string()))
            .await;
    }
    if let Some(decision) = &plan.decision
        && let Some(event) = decision.applied
    {
        info!(
            name = %set.name_any(),
            event = %event,
            from = ?decision.previous,
            to = %decision.effective,
            "Authority transition"
        );
        if let Some(m) = metrics {
            m.record_authority_transition(KIND, &decision.effective.to_string());
        }
        ctx.publish_normal_event(
            set,
            "AuthorityTransition",
            "Transition",
            Some(format!("{}: status.authoritativeAPI is {}", event, decision.effective)),
        )
        .await;
    }
}

async fn check_divergence(
    ctx: &Context,
    set: &mapi::MachineSet,
    plan: &mut MachineSetPlan,
) -> Result<()> {
    let name = set.name_any();
    let key = format!("{}/{}", KIND, name);
    if set.meta().deletion_timestamp.is_some() {
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
    match &mut plan.mapi_status {
        Some(write) => write.diverge(lag)?,
        None => {
            let status = serde_json::to_value(set.status.clone().unwrap_or_default())?;
            let conditions = set
                .status
                .as_ref()
                .map(|s| s.conditions.clone())
                .unwrap_or_default();
            let mut write =
                StatusWrite::new(&status, &status, &["conditions"], conditions, set.resource_version());
            write.diverge(lag)?;
            plan.mapi_status = Some(write);
        }
    }

    warn!(name = %name, lag_secs = lag.as_secs(), "Mirror has diverged from its source");
    if let Some(health) = &ctx.health_state {
        health.metrics.record_divergence(KIND, &name);
    }
    ctx.publish_warning_event(
        set,
        "SyncDiverged",
        "Synchronize",
        Some(format!("Mirror has not converged for {}s", lag.as_secs())),
    )
    .await;
    Ok(())
}

async fn sync_once(ctx: &Context, name: &str, root: Side, sm: &AuthorityStateMachine) -> Result<Action> {
    let snapshot = observe(ctx, name).await?;
    match (&snapshot.mapi, root) {
        // Pairs with a MAPI MachineSet are driven from the MAPI side.
        (Some(_), Side::Capi) => return Ok(Action::await_change()),
        (None, _) => ctx.divergence.forget(&format!("{}/{}", KIND, name)).await,
        _ => {}
    }

    let conv = ctx.conversion_context();
    let mut plan = plan_machineset(&snapshot, &conv, sm)?;
    if let Some(set) = &snapshot.mapi {
        report(ctx, set, &plan).await;
        check_divergence(ctx, set, &mut plan).await?;
    }

    let requeue = plan.requeue;
    let actions = plan.into_actions();
    if !actions.is_empty() {
        let executor: Executor<'_, mapi::MachineSet, capi::MachineSet> = Executor::new(ctx, KIND, name);
        if let Execution::ZombieAverted(side) = executor.run(actions).await? {
            info!(name = %name, side = %side, "Removed mirror of a deleted MachineSet");
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
    let action = retry_on_conflict(ctx.config.conflict_retries, "machineset sync", || {
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

/// Reconcile a MachineSet pair from a MAPI MachineSet event.
pub async fn reconcile(obj: Arc<mapi::MachineSet>, ctx: Arc<Context>) -> Result<Action> {
    sync(&ctx, &obj.name_any(), Side::Mapi).await
}

/// Reconcile from a CAPI MachineSet event. Only releases finalizers of
/// CAPI sets whose MAPI counterpart is gone.
pub async fn reconcile_capi(obj: Arc<capi::MachineSet>, ctx: Arc<Context>) -> Result<Action> {
    sync(&ctx, &obj.name_any(), Side::Capi).await
}

pub fn error_policy<K: ResourceExt>(obj: Arc<K>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    warn!(kind = KIND, name = %name, error = %error, "MachineSet sync failed");
    if let Some(health) = &ctx.health_state {
        health.metrics.record_error(KIND, &name);
    }
    Action::requeue(error.requeue_after())
}
