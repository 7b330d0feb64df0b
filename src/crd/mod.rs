//! Bindings for the resources kept in sync.
//!
//! - `mapi`: Machine API `Machine` / `MachineSet`
//! - `capi`: Cluster API `Machine` / `MachineSet`
//!
//! Infrastructure provider objects are handled as `DynamicObject`s built from
//! the typed provider specs in `convert::provider`.

pub mod capi;
pub mod conditions;
pub mod constants;
pub mod mapi;
mod types;

pub use conditions::{CapiCondition, Condition, ConditionStatus};
pub use types::*;
