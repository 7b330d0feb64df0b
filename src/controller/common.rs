//! Shared controller helpers.
//!
//! Utilities used by both the Machine and MachineSet controllers.

use std::time::Duration;

use kube::{
    Api, Resource, ResourceExt,
    api::{Patch, PatchParams},
};
use serde::de::DeserializeOwned;
use tracing::{error, warn};

use crate::controller::error::Error;

const CONFLICT_INITIAL_DELAY: Duration = Duration::from_millis(100);
const CONFLICT_MAX_DELAY: Duration = Duration::from_secs(2);

/// Add a finalizer to a resource.
pub async fn add_finalizer<T>(api: &Api<T>, name: &str, finalizer: &str) -> Result<(), Error>
where
    T: Resource + Clone + DeserializeOwned + std::fmt::Debug,
    <T as Resource>::DynamicType: Default,
{
    // Get current resource to check existing finalizers
    let resource = api.get(name).await?;
    let mut finalizers = resource.finalizers().to_vec();

    // Only add if not already present
    if !finalizers.iter().any(|f| f == finalizer) {
        finalizers.push(finalizer.to_string());

        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": resource.resource_version(),
            }
        });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
    }
    Ok(())
}

/// Remove a specific finalizer from a resource.
pub async fn remove_finalizer<T>(api: &Api<T>, name: &str, finalizer: &str) -> Result<(), Error>
where
    T: Resource + Clone + DeserializeOwned + std::fmt::Debug,
    <T as Resource>::DynamicType: Default,
{
    let resource = match api.get(name).await {
        Ok(r) => r,
        Err(kube::Error::Api(e)) if e.code == 404 => {
            // Resource already deleted, nothing to do
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let mut finalizers = resource.finalizers().to_vec();

    // Only patch if the finalizer exists
    if let Some(pos) = finalizers.iter().position(|f| f == finalizer) {
        finalizers.remove(pos);

        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": resource.resource_version(),
            }
        });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
    }
    Ok(())
}

/// Attach an optimistic-concurrency precondition to a merge patch.
///
/// The write fails with 409 if the object changed since `resource_version`
/// was read.
pub fn with_resource_version(mut patch: serde_json::Value, resource_version: Option<String>) -> serde_json::Value {
    if let (Some(rv), Some(root)) = (resource_version, patch.as_object_mut()) {
        let metadata = root
            .entry("metadata")
            .or_insert_with(|| serde_json::json!({}));
        if let Some(metadata) = metadata.as_object_mut() {
            metadata.insert("resourceVersion".to_string(), serde_json::Value::String(rv));
        }
    }
    patch
}

/// Whether a resource has been marked for deletion.
pub fn is_deleting<T: Resource>(resource: &T) -> bool {
    resource.meta().deletion_timestamp.is_some()
}

/// Run a read-modify-write operation, retrying with a fresh read on conflict.
///
/// The closure must perform its own read; it is called again from scratch
/// after every 409. Other errors are returned immediately.
pub async fn retry_on_conflict<F, Fut, T>(
    attempts: u32,
    operation_name: &str,
    mut operation: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, Error>>,
{
    let mut attempt = 0u32;
    let mut delay = CONFLICT_INITIAL_DELAY;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_conflict() => {
                if attempt >= attempts {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        "Write still conflicting after max retries"
                    );
                    return Err(e);
                }
                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    delay_ms = delay.as_millis(),
                    "Write conflict, retrying with a fresh read"
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(CONFLICT_MAX_DELAY);
            }
            Err(e) => return Err(e),
        }
    }
}
