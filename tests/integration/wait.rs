//! Watch-based condition waiting utilities.
//!
//! Provides functions to wait for resources to reach specific states
//! using Kubernetes watch API for efficiency.

use futures::StreamExt;
use kube::{Resource, ResourceExt};
use kube::api::{Api, DynamicObject};
use kube::runtime::watcher::{self, Event};
use std::fmt::Debug;
use std::time::Duration;
use tokio::time::timeout;

use machine_sync_operator::controller::error::ConvergenceClass;
use machine_sync_operator::crd::conditions::is_true;
use machine_sync_operator::crd::constants::{CAPI_PAUSED_ANNOTATION, CONDITION_SYNCHRONIZED};
use machine_sync_operator::crd::{AuthoritativeApi, capi, mapi};

/// Error type for wait operations.
#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("Timeout waiting for condition after {0:?}")]
    Timeout(Duration),

    #[error("Resource was deleted while waiting")]
    ResourceDeleted,

    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Watcher error: {0}")]
    WatcherError(#[from] watcher::Error),

    #[error("Watch stream ended unexpectedly")]
    StreamEnded,
}

/// Wait for a resource to satisfy a condition.
///
/// # Arguments
/// * `api` - API client for the resource type
/// * `name` - Name of the resource to watch
/// * `condition` - Closure that returns true when the condition is met
/// * `timeout_duration` - Maximum time to wait
///
/// # Returns
/// The resource when the condition is satisfied, or an error on timeout.
pub async fn wait_for_condition<K, F>(
    api: &Api<K>,
    name: &str,
    condition: F,
    timeout_duration: Duration,
) -> Result<K, WaitError>
where
    K: Resource + Clone + Debug + Send + 'static,
    K: serde::de::DeserializeOwned,
    <K as Resource>::DynamicType: Default,
    F: Fn(&K) -> bool,
{
    let watch_future = async {
        let mut stream = watcher::watcher(
            api.clone(),
            watcher::Config::default().fields(&format!("metadata.name={}", name)),
        )
        .boxed();

        // First, check the current state
        if let Ok(resource) = api.get(name).await
            && condition(&resource)
        {
            return Ok(resource);
        }

        // Watch for changes
        while let Some(event) = stream.next().await {
            match event {
                Ok(Event::Apply(resource)) | Ok(Event::InitApply(resource)) => {
                    if condition(&resource) {
                        return Ok(resource);
                    }
                }
                Ok(Event::Delete(_)) => {
                    return Err(WaitError::ResourceDeleted);
                }
                Ok(Event::Init) | Ok(Event::InitDone) => {
                    // Continue watching
                }
                Err(e) => {
                    return Err(WaitError::WatcherError(e));
                }
            }
        }

        Err(WaitError::StreamEnded)
    };

    timeout(timeout_duration, watch_future)
        .await
        .map_err(|_| WaitError::Timeout(timeout_duration))?
}

/// Wait for a resource to exist.
pub async fn wait_for_resource<K>(
    api: &Api<K>,
    name: &str,
    timeout_duration: Duration,
) -> Result<K, WaitError>
where
    K: Resource + Clone + Debug + Send + 'static,
    K: serde::de::DeserializeOwned,
    <K as Resource>::DynamicType: Default,
{
    wait_for_condition(api, name, |_| true, timeout_duration).await
}

/// Wait for a resource to be deleted.
pub async fn wait_for_deletion<K>(
    api: &Api<K>,
    name: &str,
    timeout_duration: Duration,
) -> Result<(), WaitError>
where
    K: Resource + Clone + Debug + Send + 'static,
    K: serde::de::DeserializeOwned,
    <K as Resource>::DynamicType: Default,
{
    let wait_future = async {
        // First check if already deleted
        match api.get(name).await {
            Err(kube::Error::Api(e)) if e.code == 404 => {
                return Ok(());
            }
            Err(e) => return Err(WaitError::KubeError(e)),
            Ok(_) => {}
        }

        // Watch for deletion
        let mut stream = watcher::watcher(
            api.clone(),
            watcher::Config::default().fields(&format!("metadata.name={}", name)),
        )
        .boxed();

        while let Some(event) = stream.next().await {
            match event {
                Ok(Event::Delete(_)) => {
                    return Ok(());
                }
                Ok(_) => continue,
                Err(e) => {
                    // Watcher errors don't provide 404 details like kube::Error::Api.
                    // The initial api.get() check above handles the already-deleted case.
                    return Err(WaitError::WatcherError(e));
                }
            }
        }

        Err(WaitError::StreamEnded)
    };

    timeout(timeout_duration, wait_future)
        .await
        .map_err(|_| WaitError::Timeout(timeout_duration))?
}

/// Wait for an infrastructure object to exist.
///
/// Dynamic objects carry their type at runtime, so this polls instead of
/// watching.
pub async fn wait_for_object(
    api: &Api<DynamicObject>,
    name: &str,
    timeout_duration: Duration,
) -> Result<DynamicObject, WaitError> {
    let poll = async {
        loop {
            if let Some(obj) = api.get_opt(name).await? {
                return Ok(obj);
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    };
    timeout(timeout_duration, poll)
        .await
        .map_err(|_| WaitError::Timeout(timeout_duration))?
}

/// Wait bounds mirroring the controller's convergence classes.
///
/// Each bound is a few requeue periods of its class, so a test only fails
/// when the controller missed more than one chance to converge.
pub fn timeout_for(class: ConvergenceClass) -> Duration {
    match class {
        ConvergenceClass::Short => Duration::from_secs(30),
        ConvergenceClass::Medium => Duration::from_secs(90),
        ConvergenceClass::Long => Duration::from_secs(300),
        ConvergenceClass::Overlong => Duration::from_secs(900),
    }
}

/// Convenience function to wait on the short class.
pub async fn wait_for<K, F>(api: &Api<K>, name: &str, condition: F) -> Result<K, WaitError>
where
    K: Resource + Clone + Debug + Send + 'static,
    K: serde::de::DeserializeOwned,
    <K as Resource>::DynamicType: Default,
    F: Fn(&K) -> bool,
{
    wait_for_condition(api, name, condition, timeout_for(ConvergenceClass::Short)).await
}

// ============================================================
// Machine-specific wait helpers
// ============================================================

/// Check if a MAPI machine reports the given authority in its status.
pub fn has_status_authority(machine: &mapi::Machine, authority: AuthoritativeApi) -> bool {
    machine
        .status
        .as_ref()
        .is_some_and(|s| s.authoritative_api == Some(authority))
}

/// Check if a MAPI machine's source generation has been mirrored.
pub fn is_synchronized(machine: &mapi::Machine) -> bool {
    machine.status.as_ref().is_some_and(|s| {
        is_true(&s.conditions, CONDITION_SYNCHRONIZED) && s.synchronized_generation.is_some()
    })
}

/// Check if a CAPI machine carries the paused annotation.
pub fn is_capi_paused(machine: &capi::Machine) -> bool {
    machine.annotations().contains_key(CAPI_PAUSED_ANNOTATION)
}

/// Wait for a MAPI machine to settle on an authority.
pub async fn wait_for_authority(
    api: &Api<mapi::Machine>,
    name: &str,
    authority: AuthoritativeApi,
    timeout_duration: Duration,
) -> Result<mapi::Machine, WaitError> {
    wait_for_condition(
        api,
        name,
        |m| has_status_authority(m, authority),
        timeout_duration,
    )
    .await
}
