//! Sync actions and their executor.
//!
//! Reconcilers plan a list of [`SyncAction`]s from a snapshot of both sides
//! and hand it to an [`Executor`], which performs the writes in order. All
//! writes are merge patches; the ones that must not clobber a concurrent
//! change carry `metadata.resourceVersion` and fail with 409, which sends the
//! whole pass back through a fresh read.

use std::fmt;
use std::sync::LazyLock;

use k8s_openapi::NamespaceResourceScope;
use kube::api::{DeleteParams, DynamicObject, Patch, PatchParams, PostParams};
use kube::{Api, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::controller::common::{add_finalizer, is_deleting, remove_finalizer};
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::mirror::Side;
use crate::crd::constants::{FIELD_MANAGER, SYNC_FINALIZER};
use crate::resources::infra::infra_api_resource;
use crate::resources::owner_reference;

/// A resource type the executor can read and write.
pub trait SyncResource:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + DeserializeOwned
    + Serialize
    + fmt::Debug
    + Send
    + Sync
    + 'static
{
}

impl<T> SyncResource for T where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + DeserializeOwned
        + Serialize
        + fmt::Debug
        + Send
        + Sync
        + 'static
{
}

/// Whether a mirror created from `source` outlived it: the source, re-read
/// after the create, is gone or being deleted.
pub fn is_zombie<K: Resource>(source: Option<&K>) -> bool {
    source.is_none_or(is_deleting)
}

/// One write against the object store.
#[derive(Clone, Debug)]
pub enum SyncAction<M, C> {
    /// Create the CAPI mirror
    CreateCapi(C),
    /// Create the MAPI mirror
    CreateMapi(M),
    /// Create an infrastructure object unless it exists, owned by the object on `owner`
    EnsureInfra { object: DynamicObject, owner: Side },
    /// Delete an infrastructure object
    DeleteInfra { kind: String, name: String },
    AddFinalizer(Side),
    RemoveFinalizer(Side),
    /// Delete the object on a side
    Delete(Side),
    /// Merge patch of metadata (labels, annotations)
    PatchMetadata { side: Side, patch: Value },
    /// Merge patch of the main resource, typically spec
    PatchSpec { side: Side, patch: Value },
    /// Merge patch of the status subresource
    PatchStatus { side: Side, patch: Value },
    /// Merge patch of an infrastructure object's status subresource
    PatchInfraStatus { kind: String, name: String, patch: Value },
}

impl<M, C> fmt::Display for SyncAction<M, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncAction::CreateCapi(_) => write!(f, "create CAPI mirror"),
            SyncAction::CreateMapi(_) => write!(f, "create MAPI mirror"),
            SyncAction::EnsureInfra { object, .. } => write!(
                f,
                "ensure {} {}",
                object.types.as_ref().map(|t| t.kind.as_str()).unwrap_or("infra"),
                object.name_any()
            ),
            SyncAction::DeleteInfra { kind, name } => write!(f, "delete {} {}", kind, name),
            SyncAction::AddFinalizer(side) => write!(f, "add {} finalizer", side),
            SyncAction::RemoveFinalizer(side) => write!(f, "remove {} finalizer", side),
            SyncAction::Delete(side) => write!(f, "delete {} object", side),
            SyncAction::PatchMetadata { side, .. } => write!(f, "patch {} metadata", side),
            SyncAction::PatchSpec { side, .. } => write!(f, "patch {} spec", side),
            SyncAction::PatchStatus { side, .. } => write!(f, "patch {} status", side),
            SyncAction::PatchInfraStatus { kind, name, .. } => {
                write!(f, "patch {} {} status", kind, name)
            }
        }
    }
}

/// How an execution ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Execution {
    /// Every action was applied
    Completed,
    /// A just-created mirror was removed because its source disappeared
    ZombieAverted(Side),
}

static RELEASE_FINALIZERS: LazyLock<Value> =
    LazyLock::new(|| json!({ "metadata": { "finalizers": null } }));

fn patch_params() -> PatchParams {
    PatchParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}

/// Ignore 404 on delete.
fn deleted(result: std::result::Result<(), kube::Error>) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Applies sync actions for one resource pair.
pub struct Executor<'a, M, C> {
    ctx: &'a Context,
    kind: &'static str,
    name: String,
    mapi: Api<M>,
    capi: Api<C>,
}

impl<'a, M: SyncResource, C: SyncResource> Executor<'a, M, C> {
    /// Executor for the pair `name` of `kind` ("Machine" or "MachineSet").
    pub fn new(ctx: &'a Context, kind: &'static str, name: &str) -> Self {
        Self {
            ctx,
            kind,
            name: name.to_string(),
            mapi: Api::namespaced(ctx.client.clone(), &ctx.config.mapi_namespace),
            capi: Api::namespaced(ctx.client.clone(), &ctx.config.capi_namespace),
        }
    }

    fn infra_api(&self, kind: &str) -> Api<DynamicObject> {
        Api::namespaced_with(
            self.ctx.client.clone(),
            &self.ctx.config.capi_namespace,
            &infra_api_resource(kind),
        )
    }

    fn record_created(&self, side: Side) {
        if let Some(health) = &self.ctx.health_state {
            health.metrics.record_mirror_created(self.kind, &side.to_string());
        }
    }

    fn record_deleted(&self, side: Side) {
        if let Some(health) = &self.ctx.health_state {
            health.metrics.record_mirror_deleted(self.kind, &side.to_string());
        }
    }

    /// Apply `actions` in order, stopping early if a new mirror turned out to be a zombie.
    pub async fn run(&self, actions: Vec<SyncAction<M, C>>) -> Result<Execution> {
        for action in actions {
            debug!(kind = self.kind, name = %self.name, action = %action, "Applying sync action");
            if let Some(side) = self.apply(action).await? {
                return Ok(Execution::ZombieAverted(side));
            }
        }
        Ok(Execution::Completed)
    }

    async fn apply(&self, action: SyncAction<M, C>) -> Result<Option<Side>> {
        match action {
            SyncAction::CreateCapi(object) => {
                self.capi.create(&post_params(), &object).await?;
                info!(kind = self.kind, name = %self.name, "Created CAPI mirror");
                self.record_created(Side::Capi);
                return self.guard_zombie(Side::Capi).await;
            }
            SyncAction::CreateMapi(object) => {
                self.mapi.create(&post_params(), &object).await?;
                info!(kind = self.kind, name = %self.name, "Created MAPI mirror");
                self.record_created(Side::Mapi);
                return self.guard_zombie(Side::Mapi).await;
            }
            SyncAction::EnsureInfra { object, owner } => self.ensure_infra(object, owner).await?,
            SyncAction::DeleteInfra { kind, name } => self.delete_infra(&kind, &name).await?,
            SyncAction::AddFinalizer(Side::Mapi) => {
                add_finalizer(&self.mapi, &self.name, SYNC_FINALIZER).await?
            }
            SyncAction::AddFinalizer(Side::Capi) => {
                add_finalizer(&self.capi, &self.name, SYNC_FINALIZER).await?
            }
            SyncAction::RemoveFinalizer(Side::Mapi) => {
                remove_finalizer(&self.mapi, &self.name, SYNC_FINALIZER).await?
            }
            SyncAction::RemoveFinalizer(Side::Capi) => {
                remove_finalizer(&self.capi, &self.name, SYNC_FINALIZER).await?
            }
            SyncAction::Delete(side) => {
                self.delete(side).await?;
                info!(kind = self.kind, name = %self.name, side = %side, "Deleted mirror");
            }
            SyncAction::PatchMetadata { side, patch } | SyncAction::PatchSpec { side, patch } => {
                self.patch(side, &patch).await?
            }
            SyncAction::PatchStatus { side, patch } => match side {
                Side::Mapi => {
                    self.mapi
                        .patch_status(&self.name, &patch_params(), &Patch::Merge(&patch))
                        .await?;
                }
                Side::Capi => {
                    self.capi
                        .patch_status(&self.name, &patch_params(), &Patch::Merge(&patch))
                        .await?;
                }
            },
            SyncAction::PatchInfraStatus { kind, name, patch } => {
                self.infra_api(&kind)
                    .patch_status(&name, &patch_params(), &Patch::Merge(&patch))
                    .await?;
            }
        }
        Ok(None)
    }

    async fn patch(&self, side: Side, patch: &Value) -> Result<()> {
        match side {
            Side::Mapi => {
                self.mapi
                    .patch(&self.name, &patch_params(), &Patch::Merge(patch))
                    .await?;
            }
            Side::Capi => {
                self.capi
                    .patch(&self.name, &patch_params(), &Patch::Merge(patch))
                    .await?;
            }
        }
        Ok(())
    }

    /// Delete the mirror on `side`.
    ///
    /// Mirrors are paused, so their native reconciler never releases its
    /// finalizers; they are dropped before the delete.
    async fn delete(&self, side: Side) -> Result<()> {
        let dp = DeleteParams::default();
        let pp = patch_params();
        let release = Patch::Merge(&*RELEASE_FINALIZERS);
        match side {
            Side::Mapi => {
                deleted(self.mapi.patch(&self.name, &pp, &release).await.map(|_| ()))?;
                deleted(self.mapi.delete(&self.name, &dp).await.map(|_| ()))?;
            }
            Side::Capi => {
                deleted(self.capi.patch(&self.name, &pp, &release).await.map(|_| ()))?;
                deleted(self.capi.delete(&self.name, &dp).await.map(|_| ()))?;
            }
        }
        self.record_deleted(side);
        Ok(())
    }

    async fn delete_infra(&self, kind: &str, name: &str) -> Result<()> {
        let api = self.infra_api(kind);
        let release = Patch::Merge(&*RELEASE_FINALIZERS);
        deleted(api.patch(name, &patch_params(), &release).await.map(|_| ()))?;
        deleted(api.delete(name, &DeleteParams::default()).await.map(|_| ()))?;
        info!(infra_kind = %kind, infra_name = %name, "Deleted infrastructure object");
        Ok(())
    }

    async fn ensure_infra(&self, mut object: DynamicObject, owner: Side) -> Result<()> {
        let kind = object
            .types
            .as_ref()
            .map(|t| t.kind.clone())
            .ok_or_else(|| Error::MissingField("infrastructure object kind".to_string()))?;
        let api = self.infra_api(&kind);
        let infra_name = object.name_any();
        if api.get_opt(&infra_name).await?.is_some() {
            return Ok(());
        }

        let owner_ref = match owner {
            Side::Mapi => self.mapi.get(&self.name).await.map(|o| owner_reference(&o))?,
            Side::Capi => self.capi.get(&self.name).await.map(|o| owner_reference(&o))?,
        };
        object.metadata.owner_references = owner_ref.map(|o| vec![o]);

        match api.create(&post_params(), &object).await {
            Ok(_) => {
                info!(infra_kind = %kind, infra_name = %infra_name, "Created infrastructure object");
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.reason == "AlreadyExists" => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Re-read the source of a just-created mirror. If it vanished or is
    /// being deleted in the meantime, delete the mirror again.
    async fn guard_zombie(&self, created: Side) -> Result<Option<Side>> {
        let zombie = match created.other() {
            Side::Mapi => is_zombie(self.mapi.get_opt(&self.name).await?.as_ref()),
            Side::Capi => is_zombie(self.capi.get_opt(&self.name).await?.as_ref()),
        };
        if !zombie {
            return Ok(None);
        }
        warn!(
            kind = self.kind,
            name = %self.name,
            side = %created,
            "Source disappeared while its mirror was created, removing mirror"
        );
        self.delete(created).await?;
        Ok(Some(created))
    }
}
