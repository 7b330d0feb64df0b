//! Status management utilities.
//!
//! Provides helpers for building the MAPI conditions list this controller
//! writes. Conditions owned by other controllers are carried through
//! unchanged.

use crate::crd::Condition;
use crate::crd::conditions::find;

/// Builder for managing conditions list
pub struct ConditionBuilder {
    conditions: Vec<Condition>,
}

impl ConditionBuilder {
    /// Create a new condition builder
    pub fn new() -> Self {
        Self {
            conditions: Vec::new(),
        }
    }

    /// Start from an existing conditions list
    pub fn from_existing(conditions: &[Condition]) -> Self {
        Self {
            conditions: conditions.to_vec(),
        }
    }

    /// Add or update a condition.
    ///
    /// The transition time only moves when the status flips.
    pub fn set(&mut self, mut condition: Condition) -> &mut Self {
        if let Some(existing) = self
            .conditions
            .iter_mut()
            .find(|c| c.r#type == condition.r#type)
        {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time.clone();
            }
            *existing = condition;
        } else {
            self.conditions.push(condition);
        }
        self
    }

    /// Replace every condition not in `keep` with `incoming`.
    pub fn replace_foreign(&mut self, incoming: Vec<Condition>, keep: &[&str]) -> &mut Self {
        let kept: Vec<Condition> = self
            .conditions
            .drain(..)
            .filter(|c| keep.contains(&c.r#type.as_str()))
            .collect();
        self.conditions = incoming;
        for condition in kept {
            self.set(condition);
        }
        self
    }

    /// Set Synchronized condition
    pub fn synchronized(&mut self, synchronized: bool, reason: &str, message: &str) -> &mut Self {
        self.set(Condition::synchronized(synchronized, reason, message))
    }

    /// Set Paused condition
    pub fn paused(&mut self, paused: bool, reason: &str, message: &str) -> &mut Self {
        self.set(Condition::paused(paused, reason, message))
    }

    /// Build the conditions list
    pub fn build(self) -> Vec<Condition> {
        self.conditions
    }
}

impl Default for ConditionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Check if a condition type is true
pub fn is_condition_true(conditions: &[Condition], condition_type: &str) -> bool {
    crate::crd::conditions::is_true(conditions, condition_type)
}

/// Get the reason for a condition
pub fn get_condition_reason<'a>(
    conditions: &'a [Condition],
    condition_type: &str,
) -> Option<&'a str> {
    find(conditions, condition_type).and_then(|c| c.reason.as_deref())
}

/// Get the message for a condition
pub fn get_condition_message<'a>(
    conditions: &'a [Condition],
    condition_type: &str,
) -> Option<&'a str> {
    find(conditions, condition_type).and_then(|c| c.message.as_deref())
}

/// Whether two condition lists carry the same states, ignoring timestamps and order.
pub fn conditions_equivalent(a: &[Condition], b: &[Condition]) -> bool {
    a.len() == b.len()
        && a.iter()
            .all(|x| find(b, &x.r#type).is_some_and(|y| x.same_state(y)))
}
