//! `lyncs-provision init` command

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};

use crate::cli::{GlobalArgs, InitArgs};
use provision::core::catalog::default_manifest;
use provision::core::MANIFEST_NAME;
use provision::util::fs::{ensure_dir, write_string};

/// Where `init` writes the manifest for a target directory.
pub fn manifest_target(dir: &Path) -> PathBuf {
    dir.join(MANIFEST_NAME)
}

pub fn execute(global: &GlobalArgs, args: InitArgs) -> Result<()> {
    let gctx = global.context()?;
    let dir = match args.path {
        Some(path) => provision::util::fs::absolutize(gctx.cwd(), &path),
        None => gctx.cwd().to_path_buf(),
    };
    let target = manifest_target(&dir);

    if target.exists() && !args.force {
        bail!(
            "{} already exists (use --force to overwrite)",
            target.display()
        );
    }

    ensure_dir(&dir)?;
    write_string(&target, default_manifest())?;
    eprintln!("     Created {}", target.display());

    Ok(())
}
