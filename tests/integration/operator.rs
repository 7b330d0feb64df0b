//! Scoped operator spawning for integration tests.
//!
//! Runs the sync controllers against a pair of test namespaces, one standing
//! in for the Machine API namespace and one for the Cluster API namespace.
//!
//! # Usage
//!
//! ```rust,ignore
//! let operator = ScopedOperator::start(client.clone(), mapi_ns.name(), capi_ns.name()).await;
//! // ... run tests ...
//! // operator is automatically stopped when dropped
//! ```
//!
//! The controller task panics if the controllers exit unexpectedly, so tests
//! fail immediately rather than timing out.

use std::time::Duration;

use kube::Client;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use machine_sync_operator::SyncConfig;
use machine_sync_operator::convert::Platform;

use crate::common::fixtures::INFRASTRUCTURE_NAME;

/// A scoped operator instance for integration testing.
///
/// The controllers are stopped when this struct is dropped (RAII pattern).
pub struct ScopedOperator {
    handle: JoinHandle<()>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    config: SyncConfig,
}

impl ScopedOperator {
    /// Start the controllers for the given MAPI and CAPI namespaces.
    pub async fn start(client: Client, mapi_namespace: &str, capi_namespace: &str) -> Self {
        let config = SyncConfig {
            mapi_namespace: mapi_namespace.to_string(),
            capi_namespace: capi_namespace.to_string(),
            infrastructure_name: INFRASTRUCTURE_NAME.to_string(),
            platform: Platform::Aws,
            divergence_deadline: Duration::from_secs(60),
            conflict_retries: 5,
        };
        Self::start_with_config(client, config).await
    }

    pub async fn start_with_config(client: Client, config: SyncConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        info!(
            mapi_namespace = %config.mapi_namespace,
            capi_namespace = %config.capi_namespace,
            "Starting scoped operator"
        );

        let task_config = config.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = machine_sync_operator::run_controllers(client, task_config, None) => {
                    panic!("Sync controllers exited unexpectedly");
                }
                _ = shutdown_rx => {
                    debug!("Controllers received shutdown signal");
                }
            }
        });

        // Give the controllers a moment to start watching
        tokio::time::sleep(Duration::from_millis(100)).await;

        Self {
            handle,
            shutdown_tx: Some(shutdown_tx),
            config,
        }
    }

    /// Check if the operator is still running.
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }
}

impl Drop for ScopedOperator {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.handle.abort();
    }
}
