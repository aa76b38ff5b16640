//! lyncs-provision - locate, fetch, patch, build and verify the native
//! libraries behind the Lyncs lattice QCD API.
//!
//! Each external library is one declarative [`LibrarySpec`] in
//! `Provision.toml`; one generic [`Orchestrator`] walks the dependency
//! graph and guarantees that every enabled library ends up with all of its
//! marker artifacts under a known root before the consuming build runs.

pub mod core;
pub mod provision;
pub mod util;

/// Test utilities and mocks for unit tests.
///
/// Only compiled for `cargo test`. Provides a recording mock of the
/// provisioning steps and small filesystem fixtures.
#[cfg(test)]
pub mod test_support;

pub use self::core::{BuildContext, LibrarySpec, Manifest};
pub use provision::{DependencyGraph, Orchestrator, ProvisionError, ProvisionResult, RunReport};
pub use util::context::GlobalContext;
