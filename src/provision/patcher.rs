//! Patcher - applies a library's ordered patch list to its fetched source.
//!
//! Every patch is dry-run with `git apply --check` first, so a patch that
//! does not apply never leaves a half-patched tree.

use std::path::{Path, PathBuf};

use crate::core::library::{LibrarySpec, PatchSpec};
use crate::provision::errors::ProvisionError;
use crate::util::fs::is_file;
use crate::util::hash::verify_file_sha256;
use crate::util::process::{find_git, output_text, ProcessBuilder};

/// Apply every patch of `spec` to `source`, in order.
pub fn apply_patches(spec: &LibrarySpec, source: &Path) -> Result<(), ProvisionError> {
    let git = find_git().unwrap_or_else(|| PathBuf::from("git"));
    for patch in &spec.patches {
        apply_patch(&spec.name, &git, patch, source)?;
    }
    Ok(())
}

fn apply_patch(library: &str, git: &Path, patch: &PatchSpec, source: &Path) -> Result<(), ProvisionError> {
    let patch_error = |output: String| ProvisionError::Patch {
        library: library.to_string(),
        patch: patch.path.clone(),
        output,
    };

    if !is_file(&patch.path) {
        return Err(patch_error(format!(
            "patch file not found: {}",
            patch.path.display()
        )));
    }
    if let Some(ref expected) = patch.sha256 {
        verify_file_sha256(&patch.path, expected).map_err(|e| patch_error(format!("{:#}", e)))?;
    }

    // Keep git from discovering a repository above the source tree.
    let ceiling = source.parent().unwrap_or(source);
    let git_apply = ProcessBuilder::new(git)
        .arg("apply")
        .env("GIT_CEILING_DIRECTORIES", ceiling.to_string_lossy())
        .cwd(source);

    let check = git_apply
        .clone()
        .arg("--check")
        .arg(&patch.path)
        .exec()
        .map_err(|e| patch_error(format!("{:#}", e)))?;
    if !check.status.success() {
        return Err(patch_error(output_text(&check)));
    }

    let apply = git_apply
        .arg(&patch.path)
        .exec()
        .map_err(|e| patch_error(format!("{:#}", e)))?;
    if !apply.status.success() {
        return Err(patch_error(output_text(&apply)));
    }

    tracing::info!("applied patch {} to `{}`", patch.path.display(), library);
    Ok(())
}
