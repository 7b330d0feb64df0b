//! Condition shapes used by both API families.
//!
//! MAPI conditions and CAPI's deprecated v1beta1 conditions share the
//! "severity" field; CAPI v1beta2 conditions follow `metav1.Condition` and
//! carry an observed generation instead.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::constants::{
    CONDITION_PAUSED, CONDITION_SYNCHRONIZED, REASON_NOT_PAUSED, REASON_PAUSED,
};

/// Condition status string.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConditionStatus::True => write!(f, "True"),
            ConditionStatus::False => write!(f, "False"),
            ConditionStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Condition on a MAPI object (also the CAPI deprecated v1beta1 shape).
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition.
    pub r#type: String,
    /// Status of the condition.
    pub status: ConditionStatus,
    /// Severity, only meaningful when status is False.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    /// Machine-readable reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Human-readable message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Last time the condition transitioned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

impl Condition {
    /// Create a new condition stamped with the current time.
    pub fn new(condition_type: &str, status: bool, reason: &str, message: &str) -> Self {
        Self {
            r#type: condition_type.to_string(),
            status: status.into(),
            severity: None,
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
            last_transition_time: Some(jiff::Timestamp::now().to_string()),
        }
    }

    /// Create a "Synchronized" condition.
    pub fn synchronized(synchronized: bool, reason: &str, message: &str) -> Self {
        let mut condition = Self::new(CONDITION_SYNCHRONIZED, synchronized, reason, message);
        if !synchronized {
            condition.severity = Some("Warning".to_string());
        }
        condition
    }

    /// Create a "Paused" condition.
    pub fn paused(paused: bool, reason: &str, message: &str) -> Self {
        Self::new(CONDITION_PAUSED, paused, reason, message)
    }

    /// Whether type, status, reason and message match, ignoring timestamps.
    pub fn same_state(&self, other: &Condition) -> bool {
        self.r#type == other.r#type
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
            && self.severity == other.severity
    }
}

/// `metav1.Condition` as used by CAPI v1beta2 objects.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CapiCondition {
    pub r#type: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

impl CapiCondition {
    /// The Paused condition the Cluster API reconciler reports for a given pause state.
    pub fn paused(paused: bool, generation: Option<i64>) -> Self {
        Self {
            r#type: CONDITION_PAUSED.to_string(),
            status: paused.into(),
            observed_generation: generation,
            last_transition_time: Some(jiff::Timestamp::now().to_string()),
            reason: if paused { REASON_PAUSED } else { REASON_NOT_PAUSED }.to_string(),
            message: String::new(),
        }
    }
}

/// Find a condition by type.
pub fn find<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}

/// Find a v1beta2 condition by type.
pub fn find_capi<'a>(
    conditions: &'a [CapiCondition],
    condition_type: &str,
) -> Option<&'a CapiCondition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}

/// Check if a condition type is true.
pub fn is_true(conditions: &[Condition], condition_type: &str) -> bool {
    find(conditions, condition_type).is_some_and(|c| c.status == ConditionStatus::True)
}

/// Check if a v1beta2 condition type is true.
pub fn is_capi_true(conditions: &[CapiCondition], condition_type: &str) -> bool {
    find_capi(conditions, condition_type).is_some_and(|c| c.status == ConditionStatus::True)
}
