// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Integration tests for machine-sync-operator
//!
//! These tests require a running Kubernetes cluster accessible via kubeconfig,
//! with the Machine API, Cluster API and AWS infrastructure CRDs installed.
//! No native Machine API or Cluster API controllers need to run. Tests are
//! marked with #[ignore] and must be run explicitly:
//!
//! ```bash
//! # Run all integration tests (parallel execution supported)
//! cargo test --test integration -- --ignored
//!
//! # Run specific test
//! cargo test --test integration test_machine_gets_paused_capi_mirror -- --ignored
//! ```
//!
//! The tests use your existing kubeconfig (~/.kube/config or KUBECONFIG env var).
//!
//! ## Design Principles
//!
//! - **Parallel Test Execution**: Each test creates its own pair of namespaces
//!   and a scoped operator, enabling concurrent test runs without interference
//! - **RAII Cleanup**: TestNamespace implements Drop for automatic cleanup even on panic
//! - **Watch-Based Waiting**: Uses kube-rs watches for efficient resource detection
//! - **Bounded Waits**: Every wait uses one of the convergence timeout classes

// Shared test fixtures (used by unit, functional, integration, and proptest)
#[path = "../common/mod.rs"]
mod common;

mod operator;
mod wait;

// Test modules
mod sync_tests;

pub use namespace::*;
pub use operator::*;
pub use wait::*;
