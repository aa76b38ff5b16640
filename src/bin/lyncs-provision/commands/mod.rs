//! Command implementations

pub mod clean;
pub mod completions;
pub mod init;
pub mod plan;
pub mod provision;
pub mod status;

use anyhow::{anyhow, bail, Result};

use crate::cli::{GlobalArgs, SelectionArgs};
use ::provision::core::{BuildContext, Manifest, ManifestError};
use ::provision::provision::DependencyGraph;
use ::provision::util::diagnostic::{emit, suggestions};
use ::provision::util::{Definitions, Diagnostic, GlobalContext};

/// Everything a command needs after the manifest has been read.
pub struct Session {
    pub gctx: GlobalContext,
    pub manifest: Manifest,
    pub ctx: BuildContext,
    pub graph: DependencyGraph,
}

/// Locate and load the manifest, resolve the build context and validate
/// the dependency graph. Nothing is fetched or built.
pub fn load_session(global: &GlobalArgs, selection: &SelectionArgs) -> Result<Session> {
    let gctx = global.context()?;

    let manifest_path = match gctx.find_manifest() {
        Ok(path) => path,
        Err(err @ ManifestError::NotFound { .. }) => {
            emit(
                &Diagnostic::error(err.to_string()).with_suggestion(suggestions::NO_MANIFEST),
                gctx.color(),
            );
            bail!("could not find a manifest");
        }
        Err(err) => return Err(err.into()),
    };
    let manifest = Manifest::load(&manifest_path)?;
    let config = gctx.load_config(&manifest.dir);

    let cli_defs = Definitions::parse_args(&selection.defines).map_err(|e| anyhow!(e))?;
    let defs = Definitions::from_env().overridden_by(cli_defs);

    let ctx = BuildContext::resolve(&manifest, &config, &defs).map_err(|e| anyhow!(e))?;
    tracing::debug!(
        "install root {}, scratch root {}, {} job(s)",
        ctx.install_root.display(),
        ctx.scratch_root.display(),
        ctx.jobs
    );

    let graph = match DependencyGraph::new(manifest.library_specs()) {
        Ok(graph) => graph,
        Err(err) => {
            emit(&err.to_diagnostic(), gctx.color());
            bail!("invalid dependency graph in {}", manifest.path.display());
        }
    };
    let graph = if selection.only.is_empty() {
        graph
    } else {
        match graph.restrict(&selection.only) {
            Ok(graph) => graph,
            Err(err) => {
                emit(&err.to_diagnostic(), gctx.color());
                bail!("invalid library selection");
            }
        }
    };

    Ok(Session {
        gctx,
        manifest,
        ctx,
        graph,
    })
}
