//! machine-sync-operator - keeps MAPI and CAPI machines in sync.
//!
//! Startup order:
//! - structured logging
//! - configuration from the environment
//! - health server (probes answer before leadership is held)
//! - leader election, then the sync controllers

use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio::signal;
use tracing::{error, info, warn};

use machine_sync_operator::SyncConfig;
use machine_sync_operator::health::{HealthState, run_health_server};
use machine_sync_operator::run_controllers;

const LEASE_NAME: &str = "machine-sync-operator-leader";
const LEASE_TTL_SECS: u64 = 15;
const LEASE_RENEW_INTERVAL_SECS: u64 = 5;

/// Time given to in-flight sync passes before the process exits
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;

/// Who we are for leader election: holder id and lease namespace.
struct LeaderIdentity {
    holder_id: String,
    namespace: String,
}

impl LeaderIdentity {
    fn from_env() -> Self {
        let holder_id = std::env::var("POD_NAME").unwrap_or_else(|_| {
            warn!("POD_NAME not set, using hostname");
            hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string())
        });
        let namespace = std::env::var("POD_NAMESPACE").unwrap_or_else(|_| {
            warn!("POD_NAMESPACE not set, using 'default'");
            "default".to_string()
        });
        Self {
            holder_id,
            namespace,
        }
    }

    fn lease(&self, client: Client) -> LeaseLock {
        LeaseLock::new(
            client,
            &self.namespace,
            LeaseLockParams {
                holder_id: self.holder_id.clone(),
                lease_name: LEASE_NAME.to_string(),
                lease_ttl: Duration::from_secs(LEASE_TTL_SECS),
            },
        )
    }
}

/// Block until this replica holds the lease.
async fn acquire_leadership(lease: &LeaseLock) {
    info!("Waiting to acquire leadership...");
    loop {
        match lease.try_acquire_or_renew().await {
            Ok(result) if result.acquired_lease => {
                info!("Acquired leadership");
                return;
            }
            Ok(_) => info!("Another instance is leader, waiting..."),
            Err(e) => warn!(error = %e, "Failed to acquire lease, retrying"),
        }
        tokio::time::sleep(Duration::from_secs(LEASE_RENEW_INTERVAL_SECS)).await;
    }
}

/// Renew the lease forever. Losing it exits the process so that two
/// replicas never plan writes for the same pair.
#[allow(clippy::exit)]
async fn keep_leadership(lease: LeaseLock) {
    loop {
        tokio::time::sleep(Duration::from_secs(LEASE_RENEW_INTERVAL_SECS)).await;
        match lease.try_acquire_or_renew().await {
            Ok(result) if result.acquired_lease => {}
            Ok(_) => {
                error!("Lost leadership, shutting down");
                std::process::exit(1);
            }
            Err(e) => {
                error!(error = %e, "Failed to renew lease, shutting down");
                std::process::exit(1);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("machine_sync_operator=info".parse()?)
                .add_directive("kube=info".parse()?)
                .add_directive("kube_leader_election=info".parse()?),
        )
        .json()
        .init();

    info!("Starting machine-sync-operator");

    let config = SyncConfig::from_env()?;
    info!(
        mapi_namespace = %config.mapi_namespace,
        capi_namespace = %config.capi_namespace,
        platform = %config.platform,
        infrastructure_name = %config.infrastructure_name,
        divergence_deadline_secs = config.divergence_deadline.as_secs(),
        "Loaded configuration"
    );

    let client = Client::try_default().await?;
    let identity = LeaderIdentity::from_env();
    info!(
        holder_id = %identity.holder_id,
        namespace = %identity.namespace,
        lease_name = LEASE_NAME,
        "Initializing leader election"
    );

    let health_state = Arc::new(HealthState::new());
    let health_handle = {
        let health_state = health_state.clone();
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state).await {
                error!(error = %e, "Health server error");
            }
        })
    };

    acquire_leadership(&identity.lease(client.clone())).await;
    let lease_handle = tokio::spawn(keep_leadership(identity.lease(client.clone())));

    let controller_handle = {
        let health_state = health_state.clone();
        tokio::spawn(run_controllers(client, config, Some(health_state)))
    };

    tokio::select! {
        result = controller_handle => {
            if let Err(e) = result {
                error!(error = %e, "Controller task panicked");
            }
        }
        result = health_handle => {
            if let Err(e) = result {
                error!(error = %e, "Health server task panicked");
            }
        }
        // keep_leadership only returns by panicking
        Err(e) = lease_handle => {
            error!(error = %e, "Lease renewal task panicked");
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal");
            health_state.set_ready(false).await;
            info!(
                grace_secs = SHUTDOWN_GRACE_PERIOD_SECS,
                "Marked not ready, letting in-flight sync passes finish"
            );
            tokio::time::sleep(Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS)).await;
        }
    }

    info!("Operator stopped");
    Ok(())
}

/// Wait for SIGTERM or SIGINT.
///
/// Failing to install a handler is fatal.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
