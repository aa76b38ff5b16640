//! The side-effecting provisioning steps, behind a trait so the
//! orchestrator can be driven by a recording mock in tests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::core::context::BuildContext;
use crate::core::library::LibrarySpec;
use crate::provision::errors::ProvisionError;
use crate::provision::{builder, fetcher, patcher};

/// Fetch, patch and build one library.
pub trait ProvisionSteps: Sync {
    /// Fetch the pinned source; returns the complete source tree.
    fn fetch(&self, spec: &LibrarySpec, ctx: &BuildContext) -> Result<PathBuf, ProvisionError>;

    /// Apply the library's patches. Never called with an empty patch list.
    fn patch(&self, spec: &LibrarySpec, source: &Path) -> Result<(), ProvisionError>;

    /// Configure, compile and install into `ctx.install_root`.
    /// `prerequisites` maps each prerequisite to its verified root.
    fn build(
        &self,
        spec: &LibrarySpec,
        ctx: &BuildContext,
        source: &Path,
        prerequisites: &BTreeMap<String, PathBuf>,
    ) -> Result<(), ProvisionError>;
}

/// Steps that run git, the patch tool and the real build systems.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSteps;

impl ProvisionSteps for SystemSteps {
    fn fetch(&self, spec: &LibrarySpec, ctx: &BuildContext) -> Result<PathBuf, ProvisionError> {
        fetcher::fetch(spec, ctx)
    }

    fn patch(&self, spec: &LibrarySpec, source: &Path) -> Result<(), ProvisionError> {
        patcher::apply_patches(spec, source)
    }

    fn build(
        &self,
        spec: &LibrarySpec,
        ctx: &BuildContext,
        source: &Path,
        prerequisites: &BTreeMap<String, PathBuf>,
    ) -> Result<(), ProvisionError> {
        builder::build(spec, ctx, source, prerequisites)
    }
}
