//! Resource generation module.
//!
//! Contains utilities for generating the infrastructure objects owned by
//! CAPI mirrors.
//!
//! ## Resources Generated
//!
//! | Resource | Purpose |
//! |----------|---------|
//! | `<Provider>Machine` | Infrastructure machine referenced by a CAPI Machine |
//! | `<Provider>MachineTemplate` | Infrastructure template referenced by a CAPI MachineSet |

pub mod infra;

pub use infra::owner_reference;
