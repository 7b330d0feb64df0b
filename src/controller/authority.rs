//! Authority resolution and the authority-flip state machine.
//!
//! `spec.authoritativeAPI` declares which API family should own a resource;
//! `status.authoritativeAPI` records which one currently does. A change of
//! declared authority never takes effect directly: the resource first passes
//! through `Migrating`, where both sides are paused, and only completes once
//! the old source has stopped and its latest generation has been mirrored.
//!
//! ```text
//! <none> ──MachineAPIRequested──▶ MachineAPI ──AuthorityChangeRequested──▶ Migrating
//! <none> ──ClusterAPIRequested──▶ ClusterAPI ──AuthorityChangeRequested──▶ Migrating
//! Migrating ──MigratedToMachineAPI──▶ MachineAPI
//! Migrating ──MigratedToClusterAPI──▶ ClusterAPI
//! ```

use std::fmt;

use tracing::debug;

use crate::controller::error::Error;
use crate::crd::AuthoritativeApi;

/// Authority assumed when `spec.authoritativeAPI` is unset.
pub const DEFAULT_AUTHORITATIVE_API: AuthoritativeApi = AuthoritativeApi::MachineApi;

/// Resolve the declared authority of a resource.
///
/// `Migrating` is a status-only value and is rejected here.
pub fn resolve(declared: Option<AuthoritativeApi>) -> Result<AuthoritativeApi, Error> {
    match declared {
        None => {
            debug!(default = %DEFAULT_AUTHORITATIVE_API, "spec.authoritativeAPI unset, using default");
            Ok(DEFAULT_AUTHORITATIVE_API)
        }
        Some(AuthoritativeApi::Migrating) => Err(Error::Validation(
            "spec.authoritativeAPI must be MachineAPI or ClusterAPI, not Migrating".to_string(),
        )),
        Some(api) => Ok(api),
    }
}

/// Events that drive the authority state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthorityEvent {
    /// First observation of a resource declaring MachineAPI
    MachineApiRequested,
    /// First observation of a resource declaring ClusterAPI
    ClusterApiRequested,
    /// Declared authority differs from the current one
    AuthorityChangeRequested,
    /// Migration towards MachineAPI is complete
    MigratedToMachineApi,
    /// Migration towards ClusterAPI is complete
    MigratedToClusterApi,
}

impl fmt::Display for AuthorityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthorityEvent::MachineApiRequested => write!(f, "MachineAPIRequested"),
            AuthorityEvent::ClusterApiRequested => write!(f, "ClusterAPIRequested"),
            AuthorityEvent::AuthorityChangeRequested => write!(f, "AuthorityChangeRequested"),
            AuthorityEvent::MigratedToMachineApi => write!(f, "MigratedToMachineAPI"),
            AuthorityEvent::MigratedToClusterApi => write!(f, "MigratedToClusterAPI"),
        }
    }
}

/// Observations available to transition guards
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionContext {
    /// Whether the migration source is observed paused
    pub source_paused: bool,
    /// `status.synchronizedGeneration` on the MAPI object
    pub synchronized_generation: Option<i64>,
    /// `metadata.generation` of the migration source
    pub source_generation: Option<i64>,
}

impl TransitionContext {
    /// Whether the latest source generation has been mirrored
    pub fn source_synchronized(&self) -> bool {
        self.source_generation.is_some() && self.synchronized_generation == self.source_generation
    }
}

/// A state transition definition
#[derive(Debug)]
pub struct Transition {
    /// Source state; `None` is a resource never observed before
    pub from: Option<AuthoritativeApi>,
    /// Target state
    pub to: AuthoritativeApi,
    /// Event that triggers this transition
    pub event: AuthorityEvent,
    /// Human-readable description of this transition
    pub description: &'static str,
}

impl Transition {
    const fn new(
        from: Option<AuthoritativeApi>,
        to: AuthoritativeApi,
        event: AuthorityEvent,
        description: &'static str,
    ) -> Self {
        Self {
            from,
            to,
            event,
            description,
        }
    }
}

/// Result of attempting a state transition
#[derive(Debug, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition was successful
    Success {
        from: Option<AuthoritativeApi>,
        to: AuthoritativeApi,
        event: AuthorityEvent,
        description: &'static str,
    },
    /// Transition was not valid for current state
    InvalidTransition {
        current: Option<AuthoritativeApi>,
        event: AuthorityEvent,
    },
    /// Guard condition prevented the transition
    GuardFailed {
        from: Option<AuthoritativeApi>,
        to: AuthoritativeApi,
        event: AuthorityEvent,
        reason: String,
    },
}

/// Transition table for `status.authoritativeAPI`
pub struct AuthorityStateMachine {
    transitions: Vec<Transition>,
}

impl Default for AuthorityStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthorityStateMachine {
    /// Create a new state machine with the defined transition table
    pub fn new() -> Self {
        use AuthoritativeApi::{ClusterApi, MachineApi, Migrating};

        Self {
            transitions: vec![
                Transition::new(
                    None,
                    MachineApi,
                    AuthorityEvent::MachineApiRequested,
                    "First observation, Machine API is authoritative",
                ),
                Transition::new(
                    None,
                    ClusterApi,
                    AuthorityEvent::ClusterApiRequested,
                    "First observation, Cluster API is authoritative",
                ),
                Transition::new(
                    Some(MachineApi),
                    Migrating,
                    AuthorityEvent::AuthorityChangeRequested,
                    "Authority change requested, pausing Machine API",
                ),
                Transition::new(
                    Some(ClusterApi),
                    Migrating,
                    AuthorityEvent::AuthorityChangeRequested,
                    "Authority change requested, pausing Cluster API",
                ),
                Transition::new(
                    Some(Migrating),
                    MachineApi,
                    AuthorityEvent::MigratedToMachineApi,
                    "Migration complete, Machine API is authoritative",
                ),
                Transition::new(
                    Some(Migrating),
                    ClusterApi,
                    AuthorityEvent::MigratedToClusterApi,
                    "Migration complete, Cluster API is authoritative",
                ),
            ],
        }
    }

    /// Attempt a transition
    pub fn transition(
        &self,
        current: Option<AuthoritativeApi>,
        event: AuthorityEvent,
        ctx: &TransitionContext,
    ) -> TransitionResult {
        let transition = self
            .transitions
            .iter()
            .find(|t| t.from == current && t.event == event);

        match transition {
            Some(t) => {
                if let Some(reason) = self.check_guard(t, ctx) {
                    TransitionResult::GuardFailed {
                        from: t.from,
                        to: t.to,
                        event,
                        reason,
                    }
                } else {
                    TransitionResult::Success {
                        from: t.from,
                        to: t.to,
                        event,
                        description: t.description,
                    }
                }
            }
            None => TransitionResult::InvalidTransition { current, event },
        }
    }

    /// Check if a transition is valid (ignoring guards)
    pub fn can_transition(&self, from: Option<AuthoritativeApi>, event: AuthorityEvent) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == from && t.event == event)
    }

    /// Get all valid events for a given state
    pub fn valid_events(&self, state: Option<AuthoritativeApi>) -> Vec<AuthorityEvent> {
        self.transitions
            .iter()
            .filter(|t| t.from == state)
            .map(|t| t.event)
            .collect()
    }

    fn check_guard(&self, transition: &Transition, ctx: &TransitionContext) -> Option<String> {
        match transition.event {
            AuthorityEvent::MigratedToMachineApi | AuthorityEvent::MigratedToClusterApi => {
                if !ctx.source_paused {
                    Some(format!(
                        "{} is not yet paused",
                        transition.to.opposite()
                    ))
                } else if !ctx.source_synchronized() {
                    Some(format!(
                        "synchronizedGeneration {:?} does not match source generation {:?}",
                        ctx.synchronized_generation, ctx.source_generation
                    ))
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

/// Determine the event implied by the current and declared authority.
///
/// Returns `None` when the resource is at rest.
pub fn determine_event(
    current: Option<AuthoritativeApi>,
    declared: AuthoritativeApi,
) -> Option<AuthorityEvent> {
    match current {
        None => Some(match declared {
            AuthoritativeApi::ClusterApi => AuthorityEvent::ClusterApiRequested,
            _ => AuthorityEvent::MachineApiRequested,
        }),
        Some(AuthoritativeApi::Migrating) => Some(match declared {
            AuthoritativeApi::ClusterApi => AuthorityEvent::MigratedToClusterApi,
            _ => AuthorityEvent::MigratedToMachineApi,
        }),
        Some(api) if api == declared => None,
        Some(_) => Some(AuthorityEvent::AuthorityChangeRequested),
    }
}

/// Side whose state is copied to the other for an effective authority.
///
/// While migrating, the source is the side being migrated away from.
pub fn sync_source(effective: AuthoritativeApi, declared: AuthoritativeApi) -> AuthoritativeApi {
    match effective {
        AuthoritativeApi::Migrating => declared.opposite(),
        api => api,
    }
}

/// Outcome of one pass of the authority state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityDecision {
    /// `status.authoritativeAPI` before this pass
    pub previous: Option<AuthoritativeApi>,
    /// Authority in effect after this pass
    pub effective: AuthoritativeApi,
    /// Declared (spec) authority
    pub declared: AuthoritativeApi,
    /// Transition applied in this pass
    pub applied: Option<AuthorityEvent>,
    /// Why a pending transition could not be applied yet
    pub blocked: Option<String>,
}

impl AuthorityDecision {
    /// Whether `status.authoritativeAPI` changes in this pass
    pub fn changed(&self) -> bool {
        self.previous != Some(self.effective)
    }

    /// Side whose state is copied to the other
    pub fn source(&self) -> AuthoritativeApi {
        sync_source(self.effective, self.declared)
    }

    /// Whether the resource is between authorities
    pub fn is_migrating(&self) -> bool {
        self.effective == AuthoritativeApi::Migrating
    }
}

/// Run one pass of the state machine for a resource.
pub fn decide(
    machine: &AuthorityStateMachine,
    previous: Option<AuthoritativeApi>,
    declared: AuthoritativeApi,
    ctx: &TransitionContext,
) -> AuthorityDecision {
    let at_rest = previous.unwrap_or(declared);
    let Some(event) = determine_event(previous, declared) else {
        return AuthorityDecision {
            previous,
            effective: at_rest,
            declared,
            applied: None,
            blocked: None,
        };
    };

    match machine.transition(previous, event, ctx) {
        TransitionResult::Success { to, .. } => AuthorityDecision {
            previous,
            effective: to,
            declared,
            applied: Some(event),
            blocked: None,
        },
        TransitionResult::GuardFailed { reason, .. } => AuthorityDecision {
            previous,
            effective: at_rest,
            declared,
            applied: None,
            blocked: Some(reason),
        },
        TransitionResult::InvalidTransition { current, event } => AuthorityDecision {
            previous,
            effective: at_rest,
            declared,
            applied: None,
            blocked: Some(format!("invalid transition {} from {:?}", event, current)),
        },
    }
}
