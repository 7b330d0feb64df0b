//! Status synchronization.
//!
//! After every pass the MAPI object records which authority is in effect,
//! the source generation it has mirrored and a `Synchronized` condition.
//! These helpers compute those fields and track how long a pair has been
//! lagging so divergence can be reported once it outlasts the deadline.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::controller::authority::AuthorityDecision;
use crate::controller::common::with_resource_version;
use crate::controller::pause::PausePlan;
use crate::controller::status::{ConditionBuilder, get_condition_message};
use crate::convert::SyncDirection;
use crate::crd::constants::{
    CONDITION_PAUSED, CONDITION_SYNCHRONIZED, REASON_CONVERSION_FAILED,
    REASON_RESOURCE_SYNC_DIVERGED, REASON_RESOURCE_SYNCHRONIZED,
};
use crate::crd::{AuthoritativeApi, Condition};

/// The synchronization-owned fields of a MAPI status.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SyncFields {
    pub conditions: Vec<Condition>,
    pub authoritative_api: Option<AuthoritativeApi>,
    pub synchronized_generation: Option<i64>,
}

/// Result of converting the source side's status in one pass.
#[derive(Clone, Debug, PartialEq)]
pub struct SyncOutcome {
    pub direction: SyncDirection,
    /// `metadata.generation` of the source object
    pub source_generation: Option<i64>,
    /// Whether the mirror now reflects the source
    pub succeeded: bool,
    /// Conditions converted from CAPI, when CAPI is the source
    pub foreign_conditions: Option<Vec<Condition>>,
}

/// Next `synchronizedGeneration`.
///
/// Within one direction the value never moves backwards; after the
/// direction flips it restarts from the new source's generation.
pub fn next_synchronized_generation(
    previous: Option<i64>,
    previous_direction: Option<SyncDirection>,
    outcome: &SyncOutcome,
) -> Option<i64> {
    if !outcome.succeeded {
        return previous;
    }
    match (previous, outcome.source_generation) {
        (Some(prev), Some(next)) if previous_direction == Some(outcome.direction) && next < prev => {
            Some(prev)
        }
        (_, Some(next)) => Some(next),
        (prev, None) => prev,
    }
}

/// Compute the synchronization-owned MAPI status fields for a pass.
pub fn mapi_sync_fields(
    current: &SyncFields,
    decision: &AuthorityDecision,
    pause: &PausePlan,
    outcome: &SyncOutcome,
) -> SyncFields {
    let previous_direction = get_condition_message(&current.conditions, CONDITION_SYNCHRONIZED)
        .and_then(SyncDirection::from_message);

    let mut builder = ConditionBuilder::from_existing(&current.conditions);
    if let Some(foreign) = &outcome.foreign_conditions {
        builder.replace_foreign(foreign.clone(), &[CONDITION_SYNCHRONIZED, CONDITION_PAUSED]);
    }
    builder.set(pause.mapi_condition());
    if outcome.succeeded {
        builder.synchronized(true, REASON_RESOURCE_SYNCHRONIZED, outcome.direction.message());
    }

    SyncFields {
        conditions: builder.build(),
        authoritative_api: Some(decision.effective),
        synchronized_generation: next_synchronized_generation(
            current.synchronized_generation,
            previous_direction,
            outcome,
        ),
    }
}

/// Replace the `Synchronized` condition with a divergence report.
pub fn diverged_conditions(conditions: &[Condition], lag: Duration) -> Vec<Condition> {
    let mut builder = ConditionBuilder::from_existing(conditions);
    builder.synchronized(
        false,
        REASON_RESOURCE_SYNC_DIVERGED,
        &format!("Mirror has not converged for {}s", lag.as_secs()),
    );
    builder.build()
}

/// Replace the `Synchronized` condition with a conversion failure.
pub fn conversion_failed_conditions(conditions: &[Condition], error: &str) -> Vec<Condition> {
    let mut builder = ConditionBuilder::from_existing(conditions);
    builder.synchronized(false, REASON_CONVERSION_FAILED, error);
    builder.build()
}

/// Status keys holding [`SyncFields`] on MAPI objects.
pub const SYNC_FIELD_KEYS: &[&str] = &["conditions", "authoritativeAPI", "synchronizedGeneration"];

/// MAPI status write for a source whose mirror cannot be built.
///
/// Authority and pause are still recorded so the source keeps running;
/// `Synchronized` reports the conversion error.
pub fn conversion_failed_write(
    current_status: &Value,
    current: &SyncFields,
    decision: &AuthorityDecision,
    pause: &PausePlan,
    direction: SyncDirection,
    error: &str,
    resource_version: Option<String>,
) -> Result<StatusWrite, serde_json::Error> {
    let outcome = SyncOutcome {
        direction,
        source_generation: None,
        succeeded: false,
        foreign_conditions: None,
    };
    let fields = mapi_sync_fields(current, decision, pause, &outcome);
    let conditions = conversion_failed_conditions(&fields.conditions, error);

    let mut next = match current_status {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    next.insert("conditions".to_string(), serde_json::to_value(&conditions)?);
    next.insert(
        "authoritativeAPI".to_string(),
        serde_json::to_value(fields.authoritative_api)?,
    );
    next.insert(
        "synchronizedGeneration".to_string(),
        serde_json::to_value(fields.synchronized_generation)?,
    );
    Ok(StatusWrite::new(
        current_status,
        &Value::Object(next),
        SYNC_FIELD_KEYS,
        conditions,
        resource_version,
    ))
}

/// Whether the pair is at rest and the mirror reflects the latest source generation.
pub fn is_converged(decision: &AuthorityDecision, fields: &SyncFields, outcome: &SyncOutcome) -> bool {
    outcome.succeeded
        && !decision.is_migrating()
        && decision.blocked.is_none()
        && outcome.source_generation.is_some()
        && fields.synchronized_generation == outcome.source_generation
}

/// Build a `{"status": {...}}` merge patch writing exactly `keys`.
///
/// Keys absent from `status` are written as `null` so stale values are cleared.
pub fn owned_status_patch(status: &Value, keys: &[&str]) -> Value {
    let mut out = Map::new();
    for key in keys {
        let value = status.get(*key).cloned().unwrap_or(Value::Null);
        out.insert((*key).to_string(), value);
    }
    let mut root = Map::new();
    root.insert("status".to_string(), Value::Object(out));
    Value::Object(root)
}

/// A pending write of the owned keys of a status.
///
/// Only emitted when the owned keys actually change, so a converged pair
/// produces no writes.
#[derive(Clone, Debug, PartialEq)]
pub struct StatusWrite {
    current: Value,
    next: Value,
    conditions: Vec<Condition>,
    resource_version: Option<String>,
}

impl StatusWrite {
    /// `conditions` are the conditions carried by `next`, kept for divergence reporting.
    pub fn new(
        current: &Value,
        next: &Value,
        keys: &[&str],
        conditions: Vec<Condition>,
        resource_version: Option<String>,
    ) -> Self {
        Self {
            current: owned_status_patch(current, keys),
            next: owned_status_patch(next, keys),
            conditions,
            resource_version,
        }
    }

    /// Report the pair as diverged for `lag`.
    pub fn diverge(&mut self, lag: Duration) -> Result<(), serde_json::Error> {
        let conditions = serde_json::to_value(diverged_conditions(&self.conditions, lag))?;
        if let Some(status) = self.next.get_mut("status").and_then(Value::as_object_mut) {
            status.insert("conditions".to_string(), conditions);
        }
        Ok(())
    }

    /// The merge patch to send, if anything changed.
    pub fn into_patch(self) -> Option<Value> {
        (self.next != self.current).then(|| with_resource_version(self.next, self.resource_version))
    }
}

/// When each unconverged pair was first seen lagging.
#[derive(Debug, Default)]
pub struct DivergenceTracker {
    first_lag: RwLock<HashMap<String, Instant>>,
}

impl DivergenceTracker {
    /// Record a pass for `key`. Returns how long the pair has been lagging,
    /// or `None` once it has converged.
    pub async fn observe(&self, key: &str, converged: bool, now: Instant) -> Option<Duration> {
        let mut first_lag = self.first_lag.write().await;
        if converged {
            first_lag.remove(key);
            return None;
        }
        let since = *first_lag.entry(key.to_string()).or_insert(now);
        Some(now.saturating_duration_since(since))
    }

    /// Forget a pair, e.g. after deletion.
    pub async fn forget(&self, key: &str) {
        self.first_lag.write().await.remove(key);
    }

    /// Number of pairs currently lagging whose key starts with `prefix`.
    pub async fn lagging(&self, prefix: &str) -> usize {
        self.first_lag
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .count()
    }
}
