//! Controller module for machine-sync-operator.
//!
//! Each pass reads both sides of a pair, plans the writes as pure data and
//! applies them through [`actions::Executor`].
//!
//! Two resource kinds are synchronized:
//! - Machines (`machine_sync`)
//! - MachineSets (`machineset_sync`)

// Shared modules
pub mod actions;
pub mod common;
pub mod context;
pub mod error;
pub mod status;
pub mod status_sync;

// Decision logic
pub mod authority;
pub mod mirror;
pub mod pause;

// Per-kind synchronizers
pub mod machine_sync;
pub mod machineset_sync;
